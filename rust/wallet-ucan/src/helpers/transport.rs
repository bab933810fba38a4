use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::http::{HttpRequest, HttpResponse, HttpTransport};

type Responder = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// An [HttpTransport] that answers from a table of routes keyed by method
/// and URL path, and records every request it sees. Unrouted requests get a
/// 404. Clones share routes and the request log.
#[derive(Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<HashMap<(String, String), Responder>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    delay: Option<Duration>,
}

fn route_key(method: &str, path: &str) -> (String, String) {
    (method.to_uppercase(), path.to_owned())
}

impl MockTransport {
    /// Hold every response for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Install (or replace) the responder for `method` `path`
    pub fn route<F>(&self, method: &str, path: &str, responder: F)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap()
            .insert(route_key(method, path), Arc::new(responder));
    }

    pub fn respond_with<F>(self, method: &str, path: &str, responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.route(method, path, responder);
        self
    }

    pub fn respond_json(self, method: &str, path: &str, status: StatusCode, body: Value) -> Self {
        self.respond_with(method, path, move |_| {
            HttpResponse::json_body(status, &body).unwrap()
        })
    }

    pub fn respond_text<B: Into<String>>(
        self,
        method: &str,
        path: &str,
        status: StatusCode,
        body: B,
    ) -> Self {
        let body = body.into();
        self.respond_with(method, path, move |_| HttpResponse::new(status, body.clone()))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<HttpRequest> {
        let (method, path) = route_key(method, path);
        self.requests()
            .into_iter()
            .filter(|request| request.method.as_str() == method && request.url.path() == path)
            .collect()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests_to(method, path).len()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let responder = self
            .routes
            .lock()
            .unwrap()
            .get(&route_key(request.method.as_str(), request.url.path()))
            .cloned();

        Ok(match responder {
            Some(responder) => responder(&request),
            None => HttpResponse::new(StatusCode::NOT_FOUND, "Not Found"),
        })
    }
}
