use std::{sync::Arc, time::Duration};

use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde_json::{Map, Value};
use wallet_ucan_common::{duration_ms, Clock, SystemClock};
use wallet_ucan_storage::KeyValueStore;

use super::{
    cache::{InvocationCache, InvocationKey, DEFAULT_INVOCATION_SKEW},
    key::{generate_ed25519_key, signing_key_to_did},
    root::{
        build_ucan_statement, eth_address_to_did, is_root_expired, iso_timestamp, random_nonce,
        RootOptions, SiweMessage, SiweProof, UcanRoot, UcanStatement, DEFAULT_CHAIN_ID,
        DEFAULT_ROOT_DOMAIN, DEFAULT_ROOT_URI, ROOT_TYPE_SIWE,
    },
    session::{
        SessionRecord, SessionStore, UcanSession, WalletSessionResponse, WalletSessionSigner,
        DEFAULT_SESSION_ID, DEFAULT_SESSION_METHOD, DEFAULT_UCAN_SIGN_METHOD,
    },
    token::{sign_ucan_payload, Proof, UcanOptions, UcanPayload},
};
use crate::{
    error::{AuthError, AuthResult},
    http::{HttpRequest, HttpResponse, HttpTransport},
    provider::{get_chain_id, resolve_address, sign_message, Provider, ProviderHost, ProviderOptions},
};

/// Lifetime of a root grant unless asked otherwise
pub const DEFAULT_ROOT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Lifetime of delegations and invocations unless asked otherwise
pub const DEFAULT_UCAN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
pub struct UcanConfig {
    /// Wallet RPC method that produces a session descriptor
    pub session_method: String,
    /// Wallet RPC method that signs with the session key
    pub sign_method: String,
    pub root_ttl: Duration,
    pub ucan_ttl: Duration,
    pub invocation_skew: Duration,
    /// SIWE domain; `localhost` when unset
    pub domain: Option<String>,
    /// SIWE URI; `http://localhost` when unset
    pub uri: Option<String>,
    pub discovery: ProviderOptions,
}

impl Default for UcanConfig {
    fn default() -> Self {
        UcanConfig {
            session_method: DEFAULT_SESSION_METHOD.into(),
            sign_method: DEFAULT_UCAN_SIGN_METHOD.into(),
            root_ttl: DEFAULT_ROOT_TTL,
            ucan_ttl: DEFAULT_UCAN_TTL,
            invocation_skew: DEFAULT_INVOCATION_SKEW,
            domain: None,
            uri: None,
            discovery: ProviderOptions::default(),
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionOptions {
    pub id: Option<String>,
    pub provider: Option<Provider>,
    pub expires_in: Option<Duration>,
    pub force_new: Option<bool>,
}

/// How [UcanContext::ucan_fetch] authorizes a request: with a ready token,
/// or by minting an invocation
#[derive(Clone, Default)]
pub struct UcanFetchOptions {
    pub ucan: Option<String>,
    pub invocation: UcanOptions,
}

/// Owns everything the UCAN lifecycle needs between calls: the durable
/// session records, the wallet host, a clock and the invocation cache. One
/// context is created at bootstrap and shared for the lifetime of the app.
pub struct UcanContext<S>
where
    S: KeyValueStore,
{
    sessions: SessionStore<S>,
    host: Option<Arc<ProviderHost>>,
    clock: Arc<dyn Clock>,
    cache: InvocationCache,
    config: UcanConfig,
}

impl<S> UcanContext<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S, host: Option<Arc<ProviderHost>>) -> Self {
        Self::with_config(store, host, UcanConfig::default())
    }

    pub fn with_config(store: S, host: Option<Arc<ProviderHost>>, config: UcanConfig) -> Self {
        UcanContext {
            sessions: SessionStore::new(store),
            host,
            clock: Arc::new(SystemClock),
            cache: InvocationCache::new(config.invocation_skew),
            config,
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &UcanConfig {
        &self.config
    }

    pub fn host(&self) -> Option<&Arc<ProviderHost>> {
        self.host.as_ref()
    }

    pub fn invocation_cache(&self) -> &InvocationCache {
        &self.cache
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The explicitly given provider, else one discovered through the host
    pub async fn resolve_provider(&self, provider: Option<&Provider>) -> AuthResult<Provider> {
        if let Some(provider) = provider {
            return Ok(provider.clone());
        }

        match &self.host {
            Some(host) => host.require_provider(&self.config.discovery).await,
            None => Err(AuthError::NoProvider),
        }
    }

    async fn read_record(&self, id: &str) -> Option<SessionRecord> {
        match self.sessions.read(id).await {
            Ok(record) => record,
            Err(error) => {
                warn!("Could not read UCAN session '{}': {}", id, error);
                None
            }
        }
    }

    async fn write_record(&self, record: &SessionRecord) {
        let mut sessions = self.sessions.clone();
        if let Err(error) = sessions.write(record).await {
            warn!("Could not persist UCAN session '{}': {}", record.id, error);
        }
    }

    /// Ask the wallet for a session DID. Any root stored for the session is
    /// kept unless it grants to a different DID.
    pub async fn create_ucan_session(&self, options: SessionOptions) -> AuthResult<UcanSession> {
        let session_id = options.id.unwrap_or_else(|| DEFAULT_SESSION_ID.to_owned());
        let provider = self.resolve_provider(options.provider.as_ref()).await?;

        let mut request = Map::new();
        request.insert("sessionId".into(), Value::String(session_id.clone()));
        if let Some(expires_in) = options.expires_in {
            request.insert("expiresInMs".into(), duration_ms(expires_in).into());
        }
        if let Some(force_new) = options.force_new {
            request.insert("forceNew".into(), force_new.into());
        }

        let method = self.config.session_method.as_str();
        let result = provider
            .request(method, Some(Value::Array(vec![Value::Object(request)])))
            .await
            .map_err(|error| AuthError::provider(method, error))?;
        let response = WalletSessionResponse::parse(result)?;

        let created_at = response.created_at.unwrap_or_else(|| self.now_ms());
        let id = response.id.unwrap_or_else(|| session_id.clone());

        let root = self
            .read_record(&session_id)
            .await
            .and_then(|record| record.root)
            .filter(|root| {
                let usable = root.is_usable_by(&response.did);
                if !usable {
                    debug!("Dropping stored UCAN root granted to a previous session DID");
                }
                usable
            });

        let session = UcanSession {
            id,
            did: response.did,
            created_at,
            expires_at: response.expires_at,
            signer: Some(Arc::new(WalletSessionSigner::new(
                provider,
                &session_id,
                &self.config.sign_method,
            ))),
            private_key: None,
        };

        self.write_record(&session.to_record(root)).await;

        debug!("UCAN session '{}' is {}", session.id, session.did);

        Ok(session)
    }

    /// Same as [UcanContext::create_ucan_session], but yields [None] instead
    /// of failing
    pub async fn get_ucan_session(
        &self,
        id: Option<&str>,
        provider: Option<Provider>,
    ) -> Option<UcanSession> {
        let provider = match provider {
            Some(provider) => provider,
            None => self.host.as_ref()?.get_provider(&self.config.discovery).await?,
        };

        self.create_ucan_session(SessionOptions {
            id: id.map(str::to_owned),
            provider: Some(provider),
            ..Default::default()
        })
        .await
        .ok()
    }

    pub async fn clear_ucan_session(&self, id: Option<&str>) {
        let id = id.unwrap_or(DEFAULT_SESSION_ID);
        let mut sessions = self.sessions.clone();
        if let Err(error) = sessions.remove(id).await {
            warn!("Could not remove UCAN session '{}': {}", id, error);
        }
    }

    /// A session backed by a fresh Ed25519 key held in memory. Only the
    /// record is persisted; the key does not outlive the returned session.
    pub async fn create_local_session(&self, id: Option<&str>) -> UcanSession {
        let id = id.unwrap_or(DEFAULT_SESSION_ID).to_owned();
        let key = generate_ed25519_key();

        let root = self
            .read_record(&id)
            .await
            .and_then(|record| record.root)
            .filter(|root| root.audience().is_none());

        let session = UcanSession {
            did: signing_key_to_did(&key),
            id,
            created_at: self.now_ms(),
            expires_at: None,
            signer: None,
            private_key: Some(key),
        };

        self.write_record(&session.to_record(root)).await;

        session
    }

    /// Attach `root` to the session record `id`, creating the record if
    /// there is none
    pub async fn store_ucan_root(&self, root: &UcanRoot, id: Option<&str>) {
        let id = id.unwrap_or(DEFAULT_SESSION_ID);
        let existing = self.read_record(id).await;

        let record = SessionRecord {
            id: id.to_owned(),
            did: existing
                .as_ref()
                .map(|record| record.did.clone())
                .filter(|did| !did.is_empty())
                .or_else(|| root.aud.clone())
                .unwrap_or_default(),
            created_at: existing
                .as_ref()
                .map(|record| record.created_at)
                .unwrap_or_else(|| self.now_ms()),
            expires_at: existing.as_ref().and_then(|record| record.expires_at),
            root: Some(root.clone()),
        };

        self.write_record(&record).await;
    }

    pub async fn get_stored_ucan_root(&self, id: Option<&str>) -> Option<UcanRoot> {
        self.read_record(id.unwrap_or(DEFAULT_SESSION_ID))
            .await
            .and_then(|record| record.root)
    }

    async fn resolve_session(
        &self,
        session: Option<UcanSession>,
        session_id: Option<&str>,
        provider: &Provider,
    ) -> AuthResult<UcanSession> {
        match session {
            Some(session) => Ok(session),
            None => {
                self.create_ucan_session(SessionOptions {
                    id: session_id.map(str::to_owned),
                    provider: Some(provider.clone()),
                    ..Default::default()
                })
                .await
            }
        }
    }

    /// Have the wallet sign a SIWE message granting `options.capabilities`
    /// to the session DID, and store the resulting root with the session
    pub async fn create_root_ucan(&self, options: RootOptions) -> AuthResult<UcanRoot> {
        let provider = self.resolve_provider(options.provider.as_ref()).await?;
        let session = self
            .resolve_session(options.session, options.session_id.as_deref(), &provider)
            .await?;

        let address = resolve_address(provider.as_ref(), options.address.as_deref()).await?;
        let chain_id = match options.chain_id.filter(|chain_id| !chain_id.is_empty()) {
            Some(chain_id) => chain_id,
            None => get_chain_id(provider.as_ref())
                .await?
                .filter(|chain_id| !chain_id.is_empty())
                .unwrap_or_else(|| DEFAULT_CHAIN_ID.to_owned()),
        };

        let now = self.now_ms();
        let ttl = options.expires_in.unwrap_or(self.config.root_ttl);
        let exp = now.saturating_add(duration_ms(ttl));
        let nbf = options.not_before.filter(|nbf| *nbf > 0);

        let statement = match options.statement {
            Some(statement) => statement,
            None => build_ucan_statement(&UcanStatement {
                aud: session.did.clone(),
                cap: options.capabilities.clone(),
                exp,
                nbf,
            }),
        };

        let message = SiweMessage {
            domain: options
                .domain
                .or_else(|| self.config.domain.clone())
                .unwrap_or_else(|| DEFAULT_ROOT_DOMAIN.to_owned()),
            address: address.clone(),
            statement,
            uri: options
                .uri
                .or_else(|| self.config.uri.clone())
                .unwrap_or_else(|| DEFAULT_ROOT_URI.to_owned()),
            chain_id,
            nonce: options.nonce.unwrap_or_else(random_nonce),
            issued_at: iso_timestamp(now),
            expiration_time: Some(iso_timestamp(exp)),
        }
        .render();

        let signature = sign_message(provider.as_ref(), Some(&address), &message, None).await?;

        let root = UcanRoot {
            kind: ROOT_TYPE_SIWE.to_owned(),
            iss: eth_address_to_did(&address),
            aud: Some(session.did.clone()),
            cap: options.capabilities,
            exp: Some(exp),
            nbf,
            proof: SiweProof { message, signature },
        };

        self.store_ucan_root(&root, Some(&session.id)).await;

        info!("Issued UCAN root from {} to {}", root.iss, session.did);

        Ok(root)
    }

    /// The stored root for the session if it still grants exactly
    /// `options.capabilities` to the session DID and has not expired;
    /// otherwise a newly signed one
    pub async fn get_or_create_ucan_root(&self, options: RootOptions) -> AuthResult<UcanRoot> {
        let (session, provider) = match options.session.clone() {
            Some(session) => (session, options.provider.clone()),
            None => {
                let provider = self.resolve_provider(options.provider.as_ref()).await?;
                let session = self
                    .resolve_session(None, options.session_id.as_deref(), &provider)
                    .await?;
                (session, Some(provider))
            }
        };

        if let Some(stored) = self.get_stored_ucan_root(Some(&session.id)).await {
            if stored.is_usable_by(&session.did)
                && stored.cap == options.capabilities
                && !is_root_expired(&stored, self.now_ms())
            {
                debug!("Reusing stored UCAN root for session '{}'", session.id);
                return Ok(stored);
            }
        }

        self.create_root_ucan(RootOptions {
            session: Some(session),
            provider,
            ..options
        })
        .await
    }

    async fn resolve_issuer(&self, options: &UcanOptions) -> AuthResult<UcanSession> {
        match &options.issuer {
            Some(issuer) => Ok(issuer.clone()),
            None => {
                self.create_ucan_session(SessionOptions {
                    id: options.session_id.clone(),
                    provider: options.provider.clone(),
                    ..Default::default()
                })
                .await
            }
        }
    }

    /// The explicit proofs if any, else the root stored for the issuer's
    /// session, which must grant to the issuer
    async fn resolve_proofs(&self, options: &UcanOptions, issuer: &UcanSession) -> AuthResult<Vec<Proof>> {
        if !options.proofs.is_empty() {
            return Ok(options.proofs.clone());
        }

        let session_id = options.session_id.as_deref().unwrap_or(&issuer.id);
        let stored = self
            .get_stored_ucan_root(Some(session_id))
            .await
            .ok_or(AuthError::MissingProofChain)?;

        if !stored.is_usable_by(&issuer.did) {
            return Err(AuthError::AudienceMismatch {
                expected: issuer.did.clone(),
                found: stored.aud.unwrap_or_default(),
            });
        }

        Ok(vec![Proof::Root(stored)])
    }

    async fn mint(&self, options: &UcanOptions, issuer: &UcanSession) -> AuthResult<String> {
        let prf = self.resolve_proofs(options, issuer).await?;
        let exp = self
            .now_ms()
            .saturating_add(duration_ms(options.expires_in.unwrap_or(self.config.ucan_ttl)));

        let payload = UcanPayload {
            iss: issuer.did.clone(),
            aud: options.audience.clone(),
            cap: options.capabilities.clone(),
            exp,
            nbf: options.not_before,
            prf,
        };

        sign_ucan_payload(&payload, issuer).await
    }

    /// A token passing `options.capabilities` on to `options.audience`
    pub async fn create_delegation_ucan(&self, options: UcanOptions) -> AuthResult<String> {
        let issuer = self.resolve_issuer(&options).await?;
        self.mint(&options, &issuer).await
    }

    /// A short-lived token exercising `options.capabilities` against the
    /// service `options.audience`
    pub async fn create_invocation_ucan(&self, options: UcanOptions) -> AuthResult<String> {
        let issuer = self.resolve_issuer(&options).await?;
        self.mint(&options, &issuer).await
    }

    /// An invocation for the same issuer, audience and capabilities minted
    /// earlier, as long as it is comfortably within its lifetime; otherwise
    /// a new one
    ///
    /// Without an explicit issuer the cache is consulted for the DID of the
    /// stored session first, so a hit costs no wallet round trip.
    pub async fn get_cached_invocation_token(&self, options: UcanOptions) -> AuthResult<String> {
        let known_did = match &options.issuer {
            Some(issuer) => Some(issuer.did.clone()),
            None => self
                .read_record(options.session_id.as_deref().unwrap_or(DEFAULT_SESSION_ID))
                .await
                .map(|record| record.did)
                .filter(|did| !did.is_empty()),
        };

        if let Some(token) = known_did
            .as_deref()
            .and_then(|did| self.cached_invocation(did, &options))
        {
            return Ok(token);
        }

        let issuer = self.resolve_issuer(&options).await?;
        if known_did.as_deref() != Some(issuer.did.as_str()) {
            if let Some(token) = self.cached_invocation(&issuer.did, &options) {
                return Ok(token);
            }
        }

        let token = self.mint(&options, &issuer).await?;
        let key = InvocationKey::new(&issuer.did, &options.audience, &options.capabilities);
        self.cache.insert_token(key, &token, self.now_ms());

        Ok(token)
    }

    fn cached_invocation(&self, issuer_did: &str, options: &UcanOptions) -> Option<String> {
        let key = InvocationKey::new(issuer_did, &options.audience, &options.capabilities);
        let token = self.cache.get(&key, self.now_ms())?;
        trace!("Invocation cache hit for {}", options.audience);
        Some(token)
    }

    /// Send `request` with `Authorization: Bearer <invocation>`, replacing
    /// any existing authorization
    pub async fn ucan_fetch<T>(
        &self,
        transport: &T,
        mut request: HttpRequest,
        options: UcanFetchOptions,
    ) -> AuthResult<HttpResponse>
    where
        T: HttpTransport + ?Sized,
    {
        let token = match options.ucan.filter(|token| !token.is_empty()) {
            Some(token) => token,
            None => {
                let invocation = options.invocation;
                if invocation.audience.is_empty() {
                    return Err(AuthError::MissingAudience);
                }
                if invocation.capabilities.is_empty() {
                    return Err(AuthError::MissingCapabilities);
                }
                self.create_invocation_ucan(invocation).await?
            }
        };

        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|error| AuthError::InvalidToken(error.to_string()))?;
        request.headers.insert(AUTHORIZATION, value);

        transport.send(request).await.map_err(AuthError::transport)
    }
}
