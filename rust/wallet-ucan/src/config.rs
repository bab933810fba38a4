//! TOML configuration covering every component, for hosts that would rather
//! ship a file than assemble option structs by hand:
//!
//! ```toml
//! [endpoints]
//! base_url = "https://app.example/api/v1/public/auth"
//!
//! [discovery]
//! timeout_ms = 500
//!
//! [ucan]
//! domain = "app.example"
//! uri = "https://app.example"
//!
//! [webdav]
//! base_url = "https://dav.example"
//! prefix = "/dav"
//! ```

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{AuthEndpoints, TokenOptions},
    provider::{PreferredProvider, ProviderOptions, NATIVE_WALLET_NAME, NATIVE_WALLET_RDNS},
    ucan::{
        UcanConfig, DEFAULT_INVOCATION_SKEW, DEFAULT_ROOT_TTL, DEFAULT_SESSION_METHOD,
        DEFAULT_UCAN_SIGN_METHOD, DEFAULT_UCAN_TTL,
    },
    webdav::WebDavConfig,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub prefer_native: bool,
    pub timeout_ms: u64,
    pub rdns: String,
    pub name_fragment: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            prefer_native: true,
            timeout_ms: 1000,
            rdns: NATIVE_WALLET_RDNS.into(),
            name_fragment: NATIVE_WALLET_NAME.into(),
        }
    }
}

impl From<&DiscoveryConfig> for ProviderOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        ProviderOptions {
            prefer_native: config.prefer_native,
            timeout: Duration::from_millis(config.timeout_ms),
            preferred: PreferredProvider {
                rdns: config.rdns.clone(),
                name_fragment: config.name_fragment.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UcanSettings {
    pub session_method: String,
    pub sign_method: String,
    pub root_ttl_ms: u64,
    pub ucan_ttl_ms: u64,
    pub invocation_skew_ms: u64,
    pub domain: Option<String>,
    pub uri: Option<String>,
}

impl Default for UcanSettings {
    fn default() -> Self {
        UcanSettings {
            session_method: DEFAULT_SESSION_METHOD.into(),
            sign_method: DEFAULT_UCAN_SIGN_METHOD.into(),
            root_ttl_ms: DEFAULT_ROOT_TTL.as_millis() as u64,
            ucan_ttl_ms: DEFAULT_UCAN_TTL.as_millis() as u64,
            invocation_skew_ms: DEFAULT_INVOCATION_SKEW.as_millis() as u64,
            domain: None,
            uri: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebDavSettings {
    pub base_url: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub endpoints: AuthEndpoints,
    #[serde(default)]
    pub token: TokenOptions,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub ucan: UcanSettings,
    #[serde(default)]
    pub webdav: Option<WebDavSettings>,
}

impl AuthConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml_edit::de::from_str(contents)?)
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub async fn read<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading config at {:?}", path);
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&contents)
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions::from(&self.discovery)
    }

    pub fn ucan_config(&self) -> UcanConfig {
        UcanConfig {
            session_method: self.ucan.session_method.clone(),
            sign_method: self.ucan.sign_method.clone(),
            root_ttl: Duration::from_millis(self.ucan.root_ttl_ms),
            ucan_ttl: Duration::from_millis(self.ucan.ucan_ttl_ms),
            invocation_skew: Duration::from_millis(self.ucan.invocation_skew_ms),
            domain: self.ucan.domain.clone(),
            uri: self.ucan.uri.clone(),
            discovery: self.provider_options(),
        }
    }

    /// A client configuration without credentials, if `[webdav]` is present
    pub fn webdav_config(&self) -> Option<WebDavConfig> {
        self.webdav.as_ref().map(|webdav| WebDavConfig {
            base_url: webdav.base_url.clone(),
            prefix: webdav.prefix.clone(),
            auth: None,
            token: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;

    use super::AuthConfig;
    use crate::ucan::DEFAULT_ROOT_TTL;

    #[test]
    fn it_fills_in_every_omitted_section() -> Result<()> {
        let config = AuthConfig::from_toml_str(
            r#"
            [endpoints]
            base_url = "https://app.example/api/v1/public/auth"
            "#,
        )?;

        assert_eq!(config.endpoints.refresh_path, "refresh");
        assert_eq!(config.token.storage_key, "authToken");
        assert!(config.token.store_token);
        assert!(config.webdav_config().is_none());

        let ucan = config.ucan_config();
        assert_eq!(ucan.root_ttl, DEFAULT_ROOT_TTL);
        assert_eq!(ucan.sign_method, "yeying_ucan_sign");
        assert_eq!(ucan.discovery.timeout, Duration::from_millis(1000));
        assert_eq!(ucan.discovery.preferred.rdns, "io.github.yeying");
        Ok(())
    }

    #[test]
    fn it_reads_overrides() -> Result<()> {
        let config = AuthConfig::from_toml_str(
            r#"
            [endpoints]
            base_url = "https://app.example/auth"
            verify_path = "login/verify"

            [token]
            store_token = false

            [discovery]
            prefer_native = false
            timeout_ms = 250

            [ucan]
            ucan_ttl_ms = 60000
            domain = "app.example"

            [webdav]
            base_url = "https://dav.example"
            prefix = "/dav"
            "#,
        )?;

        assert_eq!(
            config.endpoints.verify_url()?.as_str(),
            "https://app.example/auth/login/verify"
        );
        assert!(!config.token.store_token);

        let ucan = config.ucan_config();
        assert!(!ucan.discovery.prefer_native);
        assert_eq!(ucan.discovery.timeout, Duration::from_millis(250));
        assert_eq!(ucan.ucan_ttl, Duration::from_secs(60));
        assert_eq!(ucan.domain.as_deref(), Some("app.example"));

        let prefix = config.webdav_config().and_then(|webdav| webdav.prefix);
        assert_eq!(prefix.as_deref(), Some("/dav"));
        Ok(())
    }

    #[test]
    fn it_requires_the_endpoints_section() {
        assert!(AuthConfig::from_toml_str("[token]\nstore_token = true\n").is_err());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[tokio::test]
    async fn it_reads_a_config_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wallet-ucan.toml");
        tokio::fs::write(&path, "[endpoints]\nbase_url = \"https://app.example/auth\"\n")
            .await?;

        let config = AuthConfig::read(&path).await?;
        assert_eq!(config.endpoints.base_url.as_str(), "https://app.example/auth");
        Ok(())
    }
}
