use std::time::Duration;

use anyhow::Result;
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde_json::json;
use url::Url;
use wallet_ucan_common::tracing::initialize_tracing;
use wallet_ucan_storage::{KeyValueStore, MemoryStore};

use crate::{
    auth::{AuthEndpoints, AuthFetchOptions, BearerTokenStore, LoginOptions},
    helpers::{MockTransport, MockWallet, MOCK_WALLET_ADDRESS},
    http::{HttpRequest, HttpResponse},
};

fn endpoints() -> Result<AuthEndpoints> {
    Ok(AuthEndpoints::for_origin(&Url::parse("https://app.example")?)?)
}

#[tokio::test]
async fn it_logs_in_and_then_fetches_with_the_token() -> Result<()> {
    initialize_tracing();
    let transport = MockTransport::default()
        .respond_json(
            "POST",
            "/api/v1/public/auth/challenge",
            StatusCode::OK,
            json!({ "challenge": "nonce-123" }),
        )
        .respond_json(
            "POST",
            "/api/v1/public/auth/verify",
            StatusCode::OK,
            json!({ "token": "jwt-xyz" }),
        )
        .respond_with("GET", "/api/v1/kb", |request: &HttpRequest| {
            match request.authorization() {
                Some("Bearer jwt-xyz") => HttpResponse::new(StatusCode::OK, "[]"),
                _ => HttpResponse::new(StatusCode::UNAUTHORIZED, ""),
            }
        });
    let store = MemoryStore::default();
    let tokens = BearerTokenStore::new(endpoints()?, store.clone(), transport.clone());
    let wallet = MockWallet::default();

    let login = tokens
        .login_with_challenge(&wallet, LoginOptions::default())
        .await?;

    assert_eq!(login.challenge, "nonce-123");
    assert_eq!(login.address, MOCK_WALLET_ADDRESS);
    assert_eq!(
        wallet.calls().last().cloned(),
        Some((
            "personal_sign".to_string(),
            Some(json!(["nonce-123", MOCK_WALLET_ADDRESS]))
        ))
    );

    let persisted: Option<String> = store.get_key("authToken").await?;
    assert_eq!(persisted.as_deref(), Some("jwt-xyz"));

    let response = tokens
        .auth_fetch(
            HttpRequest::get(Url::parse("https://app.example/api/v1/kb")?),
            AuthFetchOptions::default(),
        )
        .await?;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(transport.count("POST", "/api/v1/public/auth/refresh"), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn it_recovers_from_an_expired_session_token() -> Result<()> {
    initialize_tracing();
    let transport = MockTransport::default()
        .with_delay(Duration::from_millis(20))
        .respond_json(
            "POST",
            "/api/v1/public/auth/refresh",
            StatusCode::OK,
            json!({ "data": { "token": "renewed" } }),
        )
        .respond_with("GET", "/api/v1/kb", |request: &HttpRequest| {
            match request.authorization() {
                Some("Bearer renewed") => HttpResponse::new(StatusCode::OK, "ok"),
                _ => HttpResponse::new(StatusCode::UNAUTHORIZED, ""),
            }
        });
    let tokens = BearerTokenStore::new(endpoints()?, MemoryStore::default(), transport.clone());
    tokens.set_access_token("expired").await;

    let request = HttpRequest::get(Url::parse("https://app.example/api/v1/kb")?);
    let (first, second) = futures::join!(
        tokens.auth_fetch(request.clone(), AuthFetchOptions::default()),
        tokens.auth_fetch(request, AuthFetchOptions::default())
    );

    assert_eq!(first?.text(), "ok");
    assert_eq!(second?.text(), "ok");
    assert_eq!(transport.count("POST", "/api/v1/public/auth/refresh"), 1);
    assert_eq!(tokens.get_access_token().await.as_deref(), Some("renewed"));

    let retried = transport.requests_to("GET", "/api/v1/kb");
    assert_eq!(retried.len(), 4);
    assert_eq!(
        retried[0].headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()),
        Some("Bearer expired")
    );
    assert_eq!(
        retried[3].headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()),
        Some("Bearer renewed")
    );
    Ok(())
}
