use serde_json::{json, Value};
use wallet_ucan_storage::KeyValueStore;

use super::{
    extract::{extract_challenge, extract_token},
    token::BearerTokenStore,
};
use crate::{
    error::{AuthError, AuthResult},
    http::{HttpRequest, HttpTransport},
    provider::{resolve_address, sign_message, WalletProvider, DEFAULT_SIGN_METHOD},
};

#[derive(Clone, Debug, Default)]
pub struct LoginOptions {
    /// Sign as this address rather than the wallet's first account
    pub address: Option<String>,
    /// Defaults to `personal_sign`
    pub sign_method: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoginResult {
    pub token: String,
    pub address: String,
    pub signature: String,
    pub challenge: String,
    /// The verify endpoint's response body
    pub response: Value,
}

impl<S, T> BearerTokenStore<S, T>
where
    S: KeyValueStore + 'static,
    T: HttpTransport + 'static,
{
    /// Prove control of a wallet address to the backend: fetch a challenge
    /// for the address, have the wallet sign it, and trade the signature for
    /// a bearer token, which is then stored
    pub async fn login_with_challenge(
        &self,
        provider: &dyn WalletProvider,
        options: LoginOptions,
    ) -> AuthResult<LoginResult> {
        let address = resolve_address(provider, options.address.as_deref()).await?;
        let endpoints = self.endpoints();

        debug!("Requesting login challenge for {}", address);

        let request =
            HttpRequest::post(endpoints.challenge_url()?).with_json(&json!({ "address": address }))?;
        let response = self
            .transport()
            .send(request)
            .await
            .map_err(AuthError::transport)?;
        if !response.is_success() {
            return Err(AuthError::ChallengeRequest {
                status: response.status.as_u16(),
                body: response.text(),
            });
        }

        let payload: Value = response
            .json()
            .map_err(|_| AuthError::InvalidResponse("Challenge"))?;
        let challenge = extract_challenge(&payload).ok_or(AuthError::MissingChallenge)?;

        let signature = sign_message(
            provider,
            Some(&address),
            &challenge,
            Some(options.sign_method.as_deref().unwrap_or(DEFAULT_SIGN_METHOD)),
        )
        .await?;

        let request = HttpRequest::post(endpoints.verify_url()?)
            .with_json(&json!({ "address": address, "signature": signature }))?;
        let response = self
            .transport()
            .send(request)
            .await
            .map_err(AuthError::transport)?;
        if !response.is_success() {
            return Err(AuthError::VerifyRequest {
                status: response.status.as_u16(),
                body: response.text(),
            });
        }

        let payload: Value = response
            .json()
            .map_err(|_| AuthError::InvalidResponse("Verify"))?;
        let token = extract_token(&payload).ok_or(AuthError::MissingToken("Verify"))?;

        self.set_access_token(&token).await;

        info!("Logged in as {}", address);

        Ok(LoginResult {
            token,
            address,
            signature,
            challenge,
            response: payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use reqwest::StatusCode;
    use serde_json::json;
    use url::Url;
    use wallet_ucan_storage::MemoryStore;

    use super::LoginOptions;
    use crate::{
        auth::{AuthEndpoints, BearerTokenStore},
        error::AuthError,
        helpers::{MockTransport, MockWallet},
    };

    fn tokens(transport: MockTransport) -> BearerTokenStore<MemoryStore, MockTransport> {
        BearerTokenStore::new(
            AuthEndpoints::new(Url::parse("https://api.example/auth").unwrap()),
            MemoryStore::default(),
            transport,
        )
    }

    #[tokio::test]
    async fn it_surfaces_challenge_failures_with_status_and_body() {
        let transport = MockTransport::default().respond_text(
            "POST",
            "/auth/challenge",
            StatusCode::TOO_MANY_REQUESTS,
            "slow down",
        );
        let wallet = MockWallet::default();

        let error = tokens(transport.clone())
            .login_with_challenge(&wallet, LoginOptions::default())
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Challenge request failed: 429 slow down");
        assert_eq!(transport.count("POST", "/auth/verify"), 0);
    }

    #[tokio::test]
    async fn it_fails_when_the_challenge_is_missing() {
        let transport = MockTransport::default().respond_json(
            "POST",
            "/auth/challenge",
            StatusCode::OK,
            json!({ "data": {} }),
        );
        let wallet = MockWallet::default();

        let error = tokens(transport)
            .login_with_challenge(&wallet, LoginOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, AuthError::MissingChallenge));
        assert!(!wallet.methods().contains(&"personal_sign".to_string()));
    }

    #[tokio::test]
    async fn it_signs_with_the_requested_method() -> Result<()> {
        let transport = MockTransport::default()
            .respond_json("POST", "/auth/challenge", StatusCode::OK, json!({ "result": "abc" }))
            .respond_json("POST", "/auth/verify", StatusCode::OK, json!({ "result": { "token": "t" } }));
        let wallet = MockWallet::default();

        let login = tokens(transport.clone())
            .login_with_challenge(
                &wallet,
                LoginOptions {
                    address: Some("0xexplicit".into()),
                    sign_method: Some("eth_sign".into()),
                },
            )
            .await?;

        assert_eq!(login.token, "t");
        assert_eq!(login.address, "0xexplicit");
        assert_eq!(
            wallet.calls().last().cloned(),
            Some(("eth_sign".to_string(), Some(json!(["0xexplicit", "abc"]))))
        );

        let verify = &transport.requests_to("POST", "/auth/verify")[0];
        let body: serde_json::Value =
            serde_json::from_slice(verify.body.as_deref().unwrap_or_default())?;
        assert_eq!(body, json!({ "address": "0xexplicit", "signature": "0xsig" }));
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_verify_failures_and_missing_tokens() {
        let transport = MockTransport::default()
            .respond_json("POST", "/auth/challenge", StatusCode::OK, json!({ "challenge": "c" }))
            .respond_text("POST", "/auth/verify", StatusCode::UNAUTHORIZED, "bad signature");
        let wallet = MockWallet::default();
        let store = tokens(transport.clone());

        let error = store
            .login_with_challenge(&wallet, LoginOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Verify request failed: 401 bad signature");

        let _ = transport
            .clone()
            .respond_json("POST", "/auth/verify", StatusCode::OK, json!({ "ok": true }));
        let error = store
            .login_with_challenge(&wallet, LoginOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Verify response missing token");
        assert!(store.get_access_token().await.is_none());
    }
}
