//! A WebDAV client for the storage service, including its quota and
//! recycle-bin extensions. The bearer token it presents is usually a UCAN
//! invocation, which may be supplied after construction.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::{
    error::{AuthError, AuthResult},
    http::{join_url, HttpRequest, HttpResponse, HttpTransport},
};

const QUOTA_PATH: &str = "/api/v1/public/webdav/quota";
const RECYCLE_LIST_PATH: &str = "/api/v1/public/webdav/recycle/list";
const RECYCLE_RECOVER_PATH: &str = "/api/v1/public/webdav/recycle/recover";
const RECYCLE_PERMANENT_PATH: &str = "/api/v1/public/webdav/recycle/permanent";
const RECYCLE_CLEAR_PATH: &str = "/api/v1/public/webdav/recycle/clear";

/// Explicit credentials, taking precedence over a bearer token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebDavAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
}

impl WebDavAuth {
    fn header(&self) -> String {
        match self {
            WebDavAuth::Bearer { token } => format!("Bearer {token}"),
            WebDavAuth::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
        }
    }
}

/// Per-call overrides
#[derive(Clone, Debug, Default)]
pub struct WebDavRequestOptions {
    pub auth: Option<WebDavAuth>,
    pub token: Option<String>,
    pub headers: HeaderMap,
    pub depth: Option<u32>,
    pub overwrite: Option<bool>,
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WebDavConfig {
    pub base_url: String,
    /// Path prefix the WebDAV tree is mounted under
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub auth: Option<WebDavAuth>,
    #[serde(default)]
    pub token: Option<String>,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix {
        None | Some("") | Some("/") => String::new(),
        Some(prefix) => {
            let prefix = if prefix.starts_with('/') {
                prefix.to_owned()
            } else {
                format!("/{prefix}")
            };
            prefix.trim_end_matches('/').to_owned()
        }
    }
}

fn normalize_path(path: &str) -> String {
    match path {
        "" | "/" => "/".to_owned(),
        path if path.starts_with('/') => path.to_owned(),
        path => format!("/{path}"),
    }
}

fn webdav_method(name: &'static str) -> AuthResult<Method> {
    Method::from_bytes(name.as_bytes()).map_err(|error| anyhow::anyhow!(error).into())
}

pub struct WebDavClient<T>
where
    T: HttpTransport,
{
    base_url: String,
    prefix: String,
    auth: Option<WebDavAuth>,
    token: Option<String>,
    transport: T,
}

impl<T> WebDavClient<T>
where
    T: HttpTransport,
{
    pub fn new(config: WebDavConfig, transport: T) -> Self {
        WebDavClient {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            prefix: normalize_prefix(config.prefix.as_deref()),
            auth: config.auth,
            token: config.token.filter(|token| !token.is_empty()),
            transport,
        }
    }

    /// Present `token` as the bearer credential from now on
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token.filter(|token| !token.is_empty());
    }

    pub fn set_auth(&mut self, auth: Option<WebDavAuth>) {
        self.auth = auth;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// The URL of a path in the WebDAV tree
    pub fn build_url(&self, path: &str) -> AuthResult<Url> {
        Ok(join_url(
            &self.base_url,
            &format!("{}{}", self.prefix, normalize_path(path)),
        )?)
    }

    fn build_headers(&self, options: &WebDavRequestOptions) -> AuthResult<HeaderMap> {
        let mut headers = options.headers.clone();

        let authorization = match (&options.auth, &options.token, &self.auth, &self.token) {
            (Some(auth), _, _, _) => Some(auth.header()),
            (None, Some(token), _, _) if !token.is_empty() => Some(format!("Bearer {token}")),
            (None, _, Some(auth), _) => Some(auth.header()),
            (None, _, None, Some(token)) => Some(format!("Bearer {token}")),
            _ => None,
        };

        if let Some(authorization) = authorization {
            headers.insert(AUTHORIZATION, header_value(&authorization)?);
        }
        if let Some(depth) = options.depth {
            headers.insert(HeaderName::from_static("depth"), HeaderValue::from(depth));
        }
        if let Some(overwrite) = options.overwrite {
            headers.insert(
                HeaderName::from_static("overwrite"),
                HeaderValue::from_static(if overwrite { "T" } else { "F" }),
            );
        }
        if let Some(content_type) = &options.content_type {
            headers.insert(CONTENT_TYPE, header_value(content_type)?);
        }

        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
        options: &WebDavRequestOptions,
    ) -> AuthResult<HttpResponse> {
        let request = HttpRequest {
            method,
            url,
            headers: self.build_headers(options)?,
            body,
        };

        self.transport
            .send(request)
            .await
            .map_err(AuthError::transport)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        options: WebDavRequestOptions,
    ) -> AuthResult<HttpResponse> {
        let url = self.build_url(path)?;
        let response = self.send(method.clone(), url, body, &options).await?;

        if !response.is_success() {
            return Err(failure(format!("{method} {path}"), &response));
        }

        Ok(response)
    }

    async fn api(&self, method: Method, path: &str, body: Option<Value>, operation: &str) -> AuthResult<Value> {
        let url = join_url(&self.base_url, path)?;
        let options = WebDavRequestOptions {
            content_type: body.as_ref().map(|_| "application/json".to_owned()),
            ..Default::default()
        };
        let body = match body {
            Some(body) => Some(Bytes::from(
                serde_json::to_vec(&body).map_err(anyhow::Error::from)?,
            )),
            None => None,
        };

        let response = self.send(method, url, body, &options).await?;
        if !response.is_success() {
            return Err(failure(operation.to_owned(), &response));
        }

        Ok(response
            .json()
            .map_err(|_| AuthError::InvalidResponse("WebDAV"))?)
    }

    /// The raw multistatus XML for `path`
    pub async fn list_directory(&self, path: &str, depth: u32) -> AuthResult<String> {
        let response = self
            .request(
                webdav_method("PROPFIND")?,
                path,
                None,
                WebDavRequestOptions {
                    depth: Some(depth),
                    ..Default::default()
                },
            )
            .await?;
        Ok(response.text())
    }

    pub async fn download(&self, path: &str) -> AuthResult<HttpResponse> {
        self.request(Method::GET, path, None, Default::default())
            .await
    }

    pub async fn download_text(&self, path: &str) -> AuthResult<String> {
        Ok(self.download(path).await?.text())
    }

    pub async fn download_bytes(&self, path: &str) -> AuthResult<Bytes> {
        Ok(self.download(path).await?.body)
    }

    pub async fn upload<B: Into<Bytes>>(
        &self,
        path: &str,
        content: B,
        content_type: Option<&str>,
    ) -> AuthResult<HttpResponse> {
        self.request(
            Method::PUT,
            path,
            Some(content.into()),
            WebDavRequestOptions {
                content_type: content_type.map(str::to_owned),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn create_directory(&self, path: &str) -> AuthResult<HttpResponse> {
        self.request(webdav_method("MKCOL")?, path, None, Default::default())
            .await
    }

    /// Create `path` and every missing ancestor. Collections that already
    /// exist (405) are fine.
    pub async fn ensure_directory(&self, path: &str) -> AuthResult<()> {
        let mut current = String::new();

        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            current = format!("{current}/{segment}");

            let response = self
                .send(
                    webdav_method("MKCOL")?,
                    self.build_url(&current)?,
                    None,
                    &Default::default(),
                )
                .await?;

            if response.is_success() || response.status == StatusCode::METHOD_NOT_ALLOWED {
                continue;
            }

            return Err(failure(format!("MKCOL {current}"), &response));
        }

        Ok(())
    }

    pub async fn remove(&self, path: &str) -> AuthResult<HttpResponse> {
        self.request(Method::DELETE, path, None, Default::default())
            .await
    }

    fn destination(&self, destination: &str) -> AuthResult<HeaderMap> {
        let destination = if destination.starts_with("http") {
            destination.to_owned()
        } else {
            self.build_url(destination)?.to_string()
        };

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("destination"), header_value(&destination)?);
        Ok(headers)
    }

    pub async fn move_to(&self, path: &str, destination: &str, overwrite: bool) -> AuthResult<HttpResponse> {
        let options = WebDavRequestOptions {
            headers: self.destination(destination)?,
            overwrite: Some(overwrite),
            ..Default::default()
        };
        self.request(webdav_method("MOVE")?, path, None, options)
            .await
    }

    pub async fn copy_to(&self, path: &str, destination: &str, overwrite: bool) -> AuthResult<HttpResponse> {
        let options = WebDavRequestOptions {
            headers: self.destination(destination)?,
            overwrite: Some(overwrite),
            ..Default::default()
        };
        self.request(webdav_method("COPY")?, path, None, options)
            .await
    }

    pub async fn get_quota(&self) -> AuthResult<Value> {
        self.api(Method::GET, QUOTA_PATH, None, "quota").await
    }

    pub async fn list_recycle(&self) -> AuthResult<Value> {
        self.api(Method::GET, RECYCLE_LIST_PATH, None, "recycle list")
            .await
    }

    pub async fn recover_recycle(&self, hash: &str) -> AuthResult<Value> {
        self.api(
            Method::POST,
            RECYCLE_RECOVER_PATH,
            Some(json!({ "hash": hash })),
            "recycle recover",
        )
        .await
    }

    pub async fn delete_recycle(&self, hash: &str) -> AuthResult<Value> {
        self.api(
            Method::DELETE,
            RECYCLE_PERMANENT_PATH,
            Some(json!({ "hash": hash })),
            "recycle delete",
        )
        .await
    }

    pub async fn clear_recycle(&self) -> AuthResult<Value> {
        self.api(Method::DELETE, RECYCLE_CLEAR_PATH, None, "recycle clear")
            .await
    }
}

fn header_value(value: &str) -> AuthResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|error| anyhow::anyhow!(error).into())
}

fn failure(operation: String, response: &HttpResponse) -> AuthError {
    AuthError::WebDav {
        operation,
        status: response.status.as_u16(),
        status_text: response.status_text().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{WebDavAuth, WebDavClient, WebDavConfig, WebDavRequestOptions};
    use crate::helpers::MockTransport;

    fn client(transport: MockTransport) -> WebDavClient<MockTransport> {
        WebDavClient::new(
            WebDavConfig {
                base_url: "https://dav.example/".into(),
                prefix: Some("dav/".into()),
                auth: None,
                token: Some("invocation".into()),
            },
            transport,
        )
    }

    #[tokio::test]
    async fn it_creates_each_missing_ancestor_and_tolerates_existing_ones() -> Result<()> {
        let transport = MockTransport::default()
            .respond_text("MKCOL", "/dav/apps", StatusCode::METHOD_NOT_ALLOWED, "")
            .respond_text("MKCOL", "/dav/apps/demo", StatusCode::CREATED, "");
        let client = client(transport.clone());

        client.ensure_directory("/apps/demo/").await?;

        let paths: Vec<String> = transport
            .requests()
            .iter()
            .map(|request| request.url.path().to_owned())
            .collect();
        assert_eq!(paths, vec!["/dav/apps", "/dav/apps/demo"]);
        assert_eq!(
            transport.requests()[0].authorization(),
            Some("Bearer invocation")
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_names_the_operation_that_failed() {
        let transport = MockTransport::default().respond_text(
            "MKCOL",
            "/dav/apps",
            StatusCode::FORBIDDEN,
            "",
        );

        let error = client(transport).ensure_directory("/apps/demo").await.unwrap_err();
        assert_eq!(error.to_string(), "WebDAV MKCOL /apps failed: 403 Forbidden");
    }

    #[tokio::test]
    async fn it_resolves_authorization_by_precedence() -> Result<()> {
        let transport = MockTransport::default().respond_text("GET", "/dav/a.txt", StatusCode::OK, "a");
        let mut client = client(transport.clone());
        let headers = |options: WebDavRequestOptions| {
            client
                .build_headers(&options)
                .ok()?
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };

        assert_eq!(headers(Default::default()).as_deref(), Some("Bearer invocation"));
        assert_eq!(
            headers(WebDavRequestOptions {
                token: Some("per-call".into()),
                ..Default::default()
            })
            .as_deref(),
            Some("Bearer per-call")
        );
        assert_eq!(
            headers(WebDavRequestOptions {
                token: Some("per-call".into()),
                auth: Some(WebDavAuth::Basic {
                    username: "user".into(),
                    password: "pass".into(),
                }),
                ..Default::default()
            })
            .as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );

        client.set_auth(Some(WebDavAuth::Bearer {
            token: "configured".into(),
        }));
        client.set_token(None);
        assert_eq!(client.download_text("a.txt").await?, "a");
        assert_eq!(
            transport.requests()[0].authorization(),
            Some("Bearer configured")
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_sends_destination_and_overwrite_headers() -> Result<()> {
        let transport =
            MockTransport::default().respond_text("MOVE", "/dav/a.txt", StatusCode::CREATED, "");
        let client = client(transport.clone());

        client.move_to("/a.txt", "/b.txt", false).await?;

        let request = &transport.requests()[0];
        assert_eq!(
            request.headers.get("destination").and_then(|value| value.to_str().ok()),
            Some("https://dav.example/dav/b.txt")
        );
        assert_eq!(
            request.headers.get("overwrite").and_then(|value| value.to_str().ok()),
            Some("F")
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_posts_recycle_hashes_as_json() -> Result<()> {
        let transport = MockTransport::default().respond_json(
            "POST",
            "/api/v1/public/webdav/recycle/recover",
            StatusCode::OK,
            json!({ "recovered": true }),
        );
        let client = client(transport.clone());

        let result = client.recover_recycle("abc123").await?;

        assert_eq!(result, json!({ "recovered": true }));
        let request = &transport.requests()[0];
        assert_eq!(
            request.body.as_deref(),
            Some(br#"{"hash":"abc123"}"#.as_slice())
        );
        assert_eq!(
            request.headers.get("content-type").and_then(|value| value.to_str().ok()),
            Some("application/json")
        );
        Ok(())
    }
}
