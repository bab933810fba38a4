//! Bearer-token authentication against a wallet-login backend: the
//! challenge/verify handshake, the token store with its single-flight
//! refresh, and the 401-aware fetch wrapper.

mod challenge;
mod extract;
mod token;

pub use challenge::*;
pub use extract::*;
pub use token::*;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::http::join_url;

pub const DEFAULT_AUTH_BASE_PATH: &str = "/api/v1/public/auth";
pub const DEFAULT_TOKEN_STORAGE_KEY: &str = "authToken";

/// Where the auth endpoints live. Paths are joined onto `base_url`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEndpoints {
    pub base_url: Url,
    #[serde(default = "default_challenge_path")]
    pub challenge_path: String,
    #[serde(default = "default_verify_path")]
    pub verify_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
}

fn default_challenge_path() -> String {
    "challenge".into()
}

fn default_verify_path() -> String {
    "verify".into()
}

fn default_refresh_path() -> String {
    "refresh".into()
}

fn default_logout_path() -> String {
    "logout".into()
}

impl AuthEndpoints {
    pub fn new(base_url: Url) -> Self {
        AuthEndpoints {
            base_url,
            challenge_path: default_challenge_path(),
            verify_path: default_verify_path(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
        }
    }

    /// Endpoints under the conventional auth prefix of `origin`
    pub fn for_origin(origin: &Url) -> Result<Self> {
        Ok(Self::new(join_url(origin.as_str(), DEFAULT_AUTH_BASE_PATH)?))
    }

    pub fn challenge_url(&self) -> Result<Url> {
        join_url(self.base_url.as_str(), &self.challenge_path)
    }

    pub fn verify_url(&self) -> Result<Url> {
        join_url(self.base_url.as_str(), &self.verify_path)
    }

    pub fn refresh_url(&self) -> Result<Url> {
        join_url(self.base_url.as_str(), &self.refresh_path)
    }

    pub fn logout_url(&self) -> Result<Url> {
        join_url(self.base_url.as_str(), &self.logout_path)
    }
}

/// How the bearer token is kept between calls
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOptions {
    /// The key the token is persisted under
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// When false the token lives in memory only
    #[serde(default = "default_store_token")]
    pub store_token: bool,
}

fn default_storage_key() -> String {
    DEFAULT_TOKEN_STORAGE_KEY.into()
}

fn default_store_token() -> bool {
    true
}

impl Default for TokenOptions {
    fn default() -> Self {
        TokenOptions {
            storage_key: default_storage_key(),
            store_token: default_store_token(),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use url::Url;

    use super::AuthEndpoints;

    #[test]
    fn it_places_endpoints_under_the_auth_prefix() -> Result<()> {
        let endpoints = AuthEndpoints::for_origin(&Url::parse("https://app.example/")?)?;

        assert_eq!(
            endpoints.challenge_url()?.as_str(),
            "https://app.example/api/v1/public/auth/challenge"
        );
        assert_eq!(
            endpoints.logout_url()?.as_str(),
            "https://app.example/api/v1/public/auth/logout"
        );
        Ok(())
    }
}
