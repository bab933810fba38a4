use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ed25519_zebra::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use wallet_ucan_common::ConditionalSync;
use wallet_ucan_storage::KeyValueStore;

use super::{root::UcanRoot, token::UcanPayload};
use crate::{
    error::{AuthError, AuthResult},
    provider::Provider,
};

pub const DEFAULT_SESSION_ID: &str = "default";

/// The key-value namespace session records are kept under
pub const SESSION_NAMESPACE: &str = "ucan-sessions";

pub const DEFAULT_SESSION_METHOD: &str = "yeying_ucan_session";
pub const DEFAULT_UCAN_SIGN_METHOD: &str = "yeying_ucan_sign";

/// Something that can produce the (base64url) signature of a UCAN signing
/// input on behalf of a session DID
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait SessionSigner: ConditionalSync {
    async fn sign(&self, signing_input: &str, payload: &UcanPayload) -> AuthResult<String>;
}

/// Signs by asking the wallet, which holds the session key
pub struct WalletSessionSigner {
    provider: Provider,
    session_id: String,
    method: String,
}

impl WalletSessionSigner {
    pub fn new(provider: Provider, session_id: &str, method: &str) -> Self {
        WalletSessionSigner {
            provider,
            session_id: session_id.to_owned(),
            method: method.to_owned(),
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl SessionSigner for WalletSessionSigner {
    async fn sign(&self, signing_input: &str, payload: &UcanPayload) -> AuthResult<String> {
        let params = json!([{
            "sessionId": self.session_id,
            "signingInput": signing_input,
            "payload": payload,
        }]);

        let result = self
            .provider
            .request(&self.method, Some(params))
            .await
            .map_err(|error| AuthError::provider(&self.method, error))?;

        match result {
            Value::String(signature) => Ok(signature),
            Value::Object(mut fields) => match fields.remove("signature") {
                Some(Value::String(signature)) => Ok(signature),
                _ => Err(AuthError::InvalidSignatureResponse(self.method.clone())),
            },
            _ => Err(AuthError::InvalidSignatureResponse(self.method.clone())),
        }
    }
}

/// A DID able to issue UCANs, either through a remote [SessionSigner] or a
/// locally held Ed25519 key
#[derive(Clone)]
pub struct UcanSession {
    pub id: String,
    pub did: String,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub signer: Option<Arc<dyn SessionSigner>>,
    pub private_key: Option<SigningKey>,
}

impl UcanSession {
    /// The persistable part of this session
    pub fn to_record(&self, root: Option<UcanRoot>) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            did: self.did.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            root,
        }
    }
}

impl std::fmt::Debug for UcanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UcanSession")
            .field("id", &self.id)
            .field("did", &self.did)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("remote_signer", &self.signer.is_some())
            .field("local_key", &self.private_key.is_some())
            .finish()
    }
}

/// What is persisted for a session: never the signing capability itself
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub did: String,
    pub created_at: u64,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<UcanRoot>,
}

/// The session descriptor a wallet returns from its session method. Only
/// `did` is required; timestamps that are not numbers are ignored.
#[derive(Clone, Debug)]
pub(crate) struct WalletSessionResponse {
    pub id: Option<String>,
    pub did: String,
    pub created_at: Option<u64>,
    pub expires_at: Option<u64>,
}

impl WalletSessionResponse {
    pub fn parse(value: Value) -> AuthResult<Self> {
        let Value::Object(fields) = value else {
            return Err(AuthError::InvalidSessionResponse);
        };

        let did = match fields.get("did") {
            Some(Value::String(did)) => did.clone(),
            _ => return Err(AuthError::InvalidSessionResponse),
        };

        let timestamp = |name: &str| {
            fields
                .get(name)
                .and_then(|value| value.as_u64().or_else(|| value.as_f64().map(|ms| ms as u64)))
        };

        Ok(WalletSessionResponse {
            id: fields
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_owned),
            did,
            created_at: timestamp("createdAt"),
            expires_at: timestamp("expiresAt"),
        })
    }
}

/// Session records in a [KeyValueStore], one per session id
#[derive(Clone)]
pub struct SessionStore<S>
where
    S: KeyValueStore,
{
    store: S,
}

impl<S> SessionStore<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S) -> Self {
        SessionStore { store }
    }

    fn key(id: &str) -> String {
        format!("{SESSION_NAMESPACE}/{id}")
    }

    pub async fn read(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.store.get_key(Self::key(id)).await
    }

    pub async fn write(&mut self, record: &SessionRecord) -> Result<()> {
        self.store.set_key(Self::key(&record.id), record).await?;
        self.store.flush().await
    }

    pub async fn remove(&mut self, id: &str) -> Result<()> {
        self.store.unset_key(Self::key(id)).await
    }
}
