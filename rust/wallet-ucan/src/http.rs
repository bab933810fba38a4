//! A small, fully-buffered HTTP seam. Everything in this crate that talks to
//! a backend does so through an [HttpTransport], so that the token refresh
//! and retry semantics can be exercised against a scripted transport.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;
use wallet_ucan_common::ConditionalSync;

/// An outbound request. Cheap to clone, so that it can be re-issued after a
/// token refresh.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        HttpRequest {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Set (replacing) a header
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `body` as the JSON payload of this request, setting the
    /// content type and asking for JSON back
    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        Ok(self
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_header(ACCEPT, HeaderValue::from_static("application/json"))
            .with_body(bytes))
    }

    /// The value of the `Authorization` header, if any
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
    }
}

/// A response whose body has been read in full
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new<B: Into<Bytes>>(status: StatusCode, body: B) -> Self {
        HttpResponse {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// A response with a JSON body
    pub fn json_body<T: Serialize>(status: StatusCode, body: &T) -> Result<Self> {
        let mut response = Self::new(status, serde_json::to_vec(body)?);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(response)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The canonical reason phrase for the status, or an empty string
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|error| anyhow!(error))
    }
}

/// Something that can put an [HttpRequest] on the wire. Implementations
/// perform no retries and impose no timeouts of their own.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait HttpTransport: ConditionalSync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T> HttpTransport for Arc<T>
where
    T: HttpTransport + ?Sized,
{
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).send(request).await
    }
}

/// The [HttpTransport] used outside of tests. Cookies set by the auth
/// endpoints (for example a refresh cookie) are retained between requests.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        #[allow(unused_mut)]
        let mut builder = reqwest::Client::builder();

        #[cfg(not(target_arch = "wasm32"))]
        {
            builder = builder.cookie_store(true);
        }

        Ok(ReqwestTransport {
            client: builder.build()?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        ReqwestTransport { client }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        trace!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Join a base URL and a relative path with exactly one `/` between them
pub fn join_url(base: &str, path: &str) -> Result<Url> {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{base}/{path}"))
        .map_err(|error| anyhow!("Invalid URL {base}/{path}: {error}"))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use reqwest::StatusCode;

    use super::{join_url, HttpRequest, HttpResponse};

    #[test]
    fn it_joins_urls_without_doubling_slashes() -> Result<()> {
        let url = join_url("https://example.com/api/v1/public/auth///", "/challenge")?;
        assert_eq!(url.as_str(), "https://example.com/api/v1/public/auth/challenge");
        Ok(())
    }

    #[test]
    fn it_marks_json_requests() -> Result<()> {
        let request = HttpRequest::post(url::Url::parse("https://example.com/verify")?)
            .with_json(&serde_json::json!({ "address": "0xabc" }))?;

        assert_eq!(
            request.headers.get("content-type").and_then(|value| value.to_str().ok()),
            Some("application/json")
        );
        assert_eq!(
            request.body.as_deref(),
            Some(br#"{"address":"0xabc"}"#.as_slice())
        );
        Ok(())
    }

    #[test]
    fn it_reports_status_text() {
        let response = HttpResponse::new(StatusCode::UNAUTHORIZED, "nope");
        assert!(!response.is_success());
        assert_eq!(response.status_text(), "Unauthorized");
        assert_eq!(response.text(), "nope");
    }
}
