//! One-call setup for a dapp: log in to the app backend and/or prepare a
//! UCAN-authorized WebDAV client rooted at the app's own directory.

use std::time::Duration;

use wallet_ucan_storage::KeyValueStore;

use crate::{
    auth::{BearerTokenStore, LoginOptions, LoginResult},
    error::{AuthError, AuthResult},
    http::HttpTransport,
    provider::Provider,
    ucan::{
        is_root_expired, CapabilitySet, Proof, RootOptions, SessionOptions, UcanContext, UcanOptions,
        UcanRoot, UcanSession,
    },
    webdav::{WebDavClient, WebDavConfig},
};

#[derive(Clone)]
pub struct WebDavStorageOptions {
    pub base_url: String,
    pub prefix: Option<String>,
    /// DID of the storage service
    pub audience: String,
    /// Defaults to the capabilities of `root`
    pub capabilities: Option<CapabilitySet>,
    /// Defaults to `capabilities`
    pub invocation_capabilities: Option<CapabilitySet>,
    pub provider: Option<Provider>,
    pub session: Option<UcanSession>,
    pub session_id: Option<String>,
    /// A previously issued root; discarded if it no longer fits the session
    pub root: Option<UcanRoot>,
    pub root_expires_in: Option<Duration>,
    pub invocation_expires_in: Option<Duration>,
    pub not_before: Option<u64>,
    pub app_id: Option<String>,
    /// Takes precedence over `app_id`
    pub app_dir: Option<String>,
    pub ensure_app_dir: bool,
}

impl Default for WebDavStorageOptions {
    fn default() -> Self {
        WebDavStorageOptions {
            base_url: String::new(),
            prefix: None,
            audience: String::new(),
            capabilities: None,
            invocation_capabilities: None,
            provider: None,
            session: None,
            session_id: None,
            root: None,
            root_expires_in: None,
            invocation_expires_in: None,
            not_before: None,
            app_id: None,
            app_dir: None,
            ensure_app_dir: true,
        }
    }
}

pub struct WebDavStorage<T>
where
    T: HttpTransport,
{
    pub client: WebDavClient<T>,
    pub token: String,
    pub app_dir: Option<String>,
    pub session: UcanSession,
    pub root: UcanRoot,
}

/// Absolute, without a trailing `/`; the empty path is `/`
pub fn normalize_app_dir(path: &str) -> String {
    let trimmed = path.trim();
    let absolute = if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    };

    match absolute.trim_end_matches('/') {
        "" => "/".to_owned(),
        normalized => normalized.to_owned(),
    }
}

/// Replace anything that is not safe in a single path segment with `-`
pub fn sanitize_app_id(app_id: &str) -> String {
    app_id
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .collect()
}

fn resolve_app_dir(options: &WebDavStorageOptions) -> Option<String> {
    if let Some(app_dir) = options.app_dir.as_deref().filter(|dir| !dir.is_empty()) {
        return Some(normalize_app_dir(app_dir));
    }

    options
        .app_id
        .as_deref()
        .filter(|app_id| !app_id.is_empty())
        .map(|app_id| normalize_app_dir(&format!("/apps/{}", sanitize_app_id(app_id))))
}

/// Resolve a session and a root that grants it the storage capabilities,
/// mint (or reuse) an invocation for the storage service and hand back a
/// client that presents it
pub async fn init_webdav_storage<S, T>(
    context: &UcanContext<S>,
    transport: T,
    options: WebDavStorageOptions,
) -> AuthResult<WebDavStorage<T>>
where
    S: KeyValueStore,
    T: HttpTransport,
{
    let capabilities = match (&options.capabilities, &options.root) {
        (Some(capabilities), _) => capabilities.clone(),
        (None, Some(root)) => root.cap.clone(),
        (None, None) => CapabilitySet::default(),
    };
    if capabilities.is_empty() {
        return Err(AuthError::MissingCapabilities);
    }
    if options.audience.is_empty() {
        return Err(AuthError::MissingAudience);
    }

    let provider = match &options.provider {
        Some(provider) => Some(provider.clone()),
        None if options.session.is_none() || options.root.is_none() => {
            Some(context.resolve_provider(None).await?)
        }
        None => None,
    };

    let session = match options.session.clone() {
        Some(session) => session,
        None => {
            context
                .create_ucan_session(SessionOptions {
                    id: options.session_id.clone(),
                    provider: provider.clone(),
                    ..Default::default()
                })
                .await?
        }
    };

    let now = context.now_ms();
    let supplied = options.root.clone().filter(|root| {
        let fits = root.is_usable_by(&session.did)
            && root.cap == capabilities
            && !is_root_expired(root, now);
        if !fits {
            debug!("Discarding supplied UCAN root that no longer fits the session");
        }
        fits
    });

    let root = match supplied {
        Some(root) => root,
        None => {
            context
                .get_or_create_ucan_root(RootOptions {
                    capabilities: capabilities.clone(),
                    session: Some(session.clone()),
                    provider: provider.clone(),
                    expires_in: options.root_expires_in,
                    ..Default::default()
                })
                .await?
        }
    };

    let token = context
        .get_cached_invocation_token(UcanOptions {
            audience: options.audience.clone(),
            capabilities: options
                .invocation_capabilities
                .clone()
                .unwrap_or(capabilities),
            issuer: Some(session.clone()),
            expires_in: options.invocation_expires_in,
            not_before: options.not_before,
            proofs: vec![Proof::Root(root.clone())],
            ..Default::default()
        })
        .await?;

    let client = WebDavClient::new(
        WebDavConfig {
            base_url: options.base_url.clone(),
            prefix: options.prefix.clone(),
            auth: None,
            token: Some(token.clone()),
        },
        transport,
    );

    let app_dir = resolve_app_dir(&options);
    if let Some(app_dir) = &app_dir {
        if options.ensure_app_dir {
            client.ensure_directory(app_dir).await?;
        }
    }

    info!("WebDAV storage ready for session {}", session.did);

    Ok(WebDavStorage {
        client,
        token,
        app_dir,
        session,
        root,
    })
}

#[derive(Clone, Default)]
pub struct DappSessionOptions {
    pub provider: Option<Provider>,
    pub address: Option<String>,
    /// Log in to the app backend with a wallet challenge
    pub app_auth: Option<LoginOptions>,
    pub webdav: Option<WebDavStorageOptions>,
}

pub struct DappSession<T>
where
    T: HttpTransport,
{
    pub provider: Provider,
    pub address: Option<String>,
    pub app_login: Option<LoginResult>,
    pub webdav: Option<WebDavStorage<T>>,
}

/// Run the requested parts of dapp setup against a single wallet provider.
/// The WebDAV client shares the token store's transport.
pub async fn init_dapp_session<S, K, T>(
    context: &UcanContext<S>,
    tokens: &BearerTokenStore<K, T>,
    options: DappSessionOptions,
) -> AuthResult<DappSession<T>>
where
    S: KeyValueStore,
    K: KeyValueStore + 'static,
    T: HttpTransport + Clone + 'static,
{
    if options.app_auth.is_none() && options.webdav.is_none() {
        return Err(AuthError::MissingConfiguration("No init options provided"));
    }

    let provider = match options
        .provider
        .clone()
        .or_else(|| options.webdav.as_ref().and_then(|webdav| webdav.provider.clone()))
    {
        Some(provider) => provider,
        None => context.resolve_provider(None).await?,
    };

    let mut session = DappSession {
        provider: provider.clone(),
        address: options.address.clone(),
        app_login: None,
        webdav: None,
    };

    if let Some(login) = options.app_auth {
        let login = tokens
            .login_with_challenge(
                provider.as_ref(),
                LoginOptions {
                    address: login.address.or_else(|| options.address.clone()),
                    ..login
                },
            )
            .await?;
        session.address = Some(login.address.clone());
        session.app_login = Some(login);
    }

    if let Some(webdav) = options.webdav {
        let storage = init_webdav_storage(
            context,
            tokens.transport().clone(),
            WebDavStorageOptions {
                provider: Some(webdav.provider.clone().unwrap_or_else(|| provider.clone())),
                ..webdav
            },
        )
        .await?;
        session.webdav = Some(storage);
    }

    Ok(session)
}
