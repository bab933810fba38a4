use std::sync::{Arc, Mutex, MutexGuard, RwLock};

#[cfg(not(target_arch = "wasm32"))]
use futures::future::BoxFuture;
#[cfg(target_arch = "wasm32")]
use futures::future::LocalBoxFuture;
use futures::{future::Shared, FutureExt};
use reqwest::{
    header::{HeaderValue, ACCEPT, AUTHORIZATION},
    StatusCode,
};
use serde_json::Value;
use wallet_ucan_storage::KeyValueStore;

use super::{extract::extract_token, AuthEndpoints, TokenOptions};
use crate::{
    error::{AuthError, AuthResult},
    http::{HttpRequest, HttpResponse, HttpTransport},
};

#[derive(Clone, Debug, PartialEq)]
pub struct RefreshedToken {
    pub token: String,
    pub response: Value,
}

#[cfg(not(target_arch = "wasm32"))]
type RefreshFuture = Shared<BoxFuture<'static, AuthResult<RefreshedToken>>>;

#[cfg(target_arch = "wasm32")]
type RefreshFuture = Shared<LocalBoxFuture<'static, AuthResult<RefreshedToken>>>;

#[derive(Clone, Debug)]
pub struct AuthFetchOptions {
    /// Use this token instead of the stored one
    pub access_token: Option<String>,
    /// Refresh and retry once when the server answers 401
    pub retry_on_unauthorized: bool,
}

impl Default for AuthFetchOptions {
    fn default() -> Self {
        AuthFetchOptions {
            access_token: None,
            retry_on_unauthorized: true,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct TokenState<S, T> {
    endpoints: AuthEndpoints,
    options: TokenOptions,
    store: S,
    transport: T,
    cached: RwLock<Option<String>>,
    refresh: Mutex<Option<RefreshFuture>>,
}

impl<S, T> TokenState<S, T>
where
    S: KeyValueStore + 'static,
    T: HttpTransport + 'static,
{
    fn cached(&self) -> Option<String> {
        let cached = match self.cached.read() {
            Ok(cached) => cached,
            Err(poisoned) => poisoned.into_inner(),
        };
        cached.clone().filter(|token| !token.is_empty())
    }

    fn set_cached(&self, token: Option<String>) {
        match self.cached.write() {
            Ok(mut cached) => *cached = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    async fn persist(&self, token: Option<&str>) {
        self.set_cached(token.map(str::to_owned));

        if !self.options.store_token {
            return;
        }

        let mut store = self.store.clone();
        let key = self.options.storage_key.as_str();
        let result = match token.filter(|token| !token.is_empty()) {
            Some(token) => store.set_key(key, token).await,
            None => store.unset_key(key).await,
        };

        if let Err(error) = result {
            warn!("Could not persist access token: {}", error);
        }
    }

    async fn refresh(state: Arc<Self>) -> AuthResult<RefreshedToken> {
        let outcome = state.perform_refresh().await;
        *lock(&state.refresh) = None;
        outcome
    }

    async fn perform_refresh(&self) -> AuthResult<RefreshedToken> {
        let url = self.endpoints.refresh_url()?;
        debug!("Refreshing access token via {}", url);

        let request =
            HttpRequest::post(url).with_header(ACCEPT, HeaderValue::from_static("application/json"));
        let response = self
            .transport
            .send(request)
            .await
            .map_err(AuthError::transport)?;

        if !response.is_success() {
            return Err(AuthError::RefreshRequest {
                status: response.status.as_u16(),
                body: response.text(),
            });
        }

        let payload: Value = response
            .json()
            .map_err(|_| AuthError::InvalidResponse("Refresh"))?;
        let token = extract_token(&payload).ok_or(AuthError::MissingToken("Refresh"))?;

        self.persist(Some(&token)).await;

        Ok(RefreshedToken {
            token,
            response: payload,
        })
    }
}

/// The bearer token for one backend, cached in memory in front of a
/// [KeyValueStore]. Clones share the same token and the same in-flight
/// refresh.
pub struct BearerTokenStore<S, T>
where
    S: KeyValueStore + 'static,
    T: HttpTransport + 'static,
{
    state: Arc<TokenState<S, T>>,
}

impl<S, T> Clone for BearerTokenStore<S, T>
where
    S: KeyValueStore + 'static,
    T: HttpTransport + 'static,
{
    fn clone(&self) -> Self {
        BearerTokenStore {
            state: self.state.clone(),
        }
    }
}

impl<S, T> BearerTokenStore<S, T>
where
    S: KeyValueStore + 'static,
    T: HttpTransport + 'static,
{
    pub fn new(endpoints: AuthEndpoints, store: S, transport: T) -> Self {
        Self::with_options(endpoints, TokenOptions::default(), store, transport)
    }

    pub fn with_options(endpoints: AuthEndpoints, options: TokenOptions, store: S, transport: T) -> Self {
        BearerTokenStore {
            state: Arc::new(TokenState {
                endpoints,
                options,
                store,
                transport,
                cached: RwLock::new(None),
                refresh: Mutex::new(None),
            }),
        }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.state.endpoints
    }

    pub fn transport(&self) -> &T {
        &self.state.transport
    }

    /// The in-memory token if there is one, otherwise the persisted token
    /// (which is then kept in memory)
    pub async fn get_access_token(&self) -> Option<String> {
        if let Some(token) = self.state.cached() {
            return Some(token);
        }

        if !self.state.options.store_token {
            return None;
        }

        match self
            .state
            .store
            .get_key::<_, String>(self.state.options.storage_key.as_str())
            .await
        {
            Ok(Some(token)) if !token.is_empty() => {
                self.state.set_cached(Some(token.clone()));
                Some(token)
            }
            Ok(_) => None,
            Err(error) => {
                warn!("Could not read stored access token: {}", error);
                None
            }
        }
    }

    pub async fn set_access_token(&self, token: &str) {
        self.state.persist(Some(token)).await;
    }

    /// Forget the token, in memory and in storage
    pub async fn clear_access_token(&self) {
        self.state.set_cached(None);

        let mut store = self.state.store.clone();
        if let Err(error) = store.unset_key(self.state.options.storage_key.as_str()).await {
            warn!("Could not remove stored access token: {}", error);
        }
    }

    /// Obtain a new token from the refresh endpoint. While a refresh is in
    /// flight, every caller shares its outcome instead of issuing another.
    pub async fn refresh_access_token(&self) -> AuthResult<RefreshedToken> {
        let refresh = {
            let mut slot = lock(&self.state.refresh);
            match slot.as_ref() {
                Some(refresh) => {
                    trace!("Joining in-flight token refresh");
                    refresh.clone()
                }
                None => {
                    #[cfg(not(target_arch = "wasm32"))]
                    let refresh = TokenState::refresh(self.state.clone()).boxed().shared();
                    #[cfg(target_arch = "wasm32")]
                    let refresh = TokenState::refresh(self.state.clone()).boxed_local().shared();

                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Tell the backend to end the session, then forget the token. Returns
    /// the response body if it was JSON.
    pub async fn logout(&self) -> AuthResult<Option<Value>> {
        let request = HttpRequest::post(self.state.endpoints.logout_url()?)
            .with_header(ACCEPT, HeaderValue::from_static("application/json"));
        let response = self
            .state
            .transport
            .send(request)
            .await
            .map_err(AuthError::transport)?;

        if !response.is_success() {
            return Err(AuthError::LogoutRequest {
                status: response.status.as_u16(),
                body: response.text(),
            });
        }

        let payload = response.json::<Value>().ok();
        self.clear_access_token().await;

        info!("Logged out");

        Ok(payload)
    }

    async fn send_with_token(&self, mut request: HttpRequest, token: Option<String>) -> AuthResult<HttpResponse> {
        let token = match token {
            Some(token) => Some(token),
            None => self.get_access_token().await,
        };

        if let Some(token) = token.filter(|token| !token.is_empty()) {
            if !request.headers.contains_key(AUTHORIZATION) {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|error| AuthError::InvalidToken(error.to_string()))?;
                request.headers.insert(AUTHORIZATION, value);
            }
        }

        self.state
            .transport
            .send(request)
            .await
            .map_err(AuthError::transport)
    }

    /// Send `request` with the bearer token attached (unless it already
    /// carries an `Authorization` header). On a 401 the token is refreshed
    /// and the request retried exactly once; if that refresh or retry fails,
    /// the original 401 response is returned.
    pub async fn auth_fetch(&self, request: HttpRequest, options: AuthFetchOptions) -> AuthResult<HttpResponse> {
        let initial = self
            .send_with_token(request.clone(), options.access_token.clone())
            .await?;

        if initial.status != StatusCode::UNAUTHORIZED || !options.retry_on_unauthorized {
            return Ok(initial);
        }

        debug!("{} {} was unauthorized; refreshing", request.method, request.url);

        let refreshed = match self.refresh_access_token().await {
            Ok(refreshed) => refreshed,
            Err(error) => {
                warn!("Token refresh after 401 failed: {}", error);
                return Ok(initial);
            }
        };

        match self.send_with_token(request, Some(refreshed.token)).await {
            Ok(response) => Ok(response),
            Err(error) => {
                warn!("Retry after token refresh failed: {}", error);
                Ok(initial)
            }
        }
    }
}
