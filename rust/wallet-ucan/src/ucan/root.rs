use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{capability::CapabilitySet, session::UcanSession};
use crate::provider::Provider;

pub const ROOT_TYPE_SIWE: &str = "siwe";

/// Prefix of the SIWE statement that carries the capability grant
pub const UCAN_STATEMENT_PREFIX: &str = "UCAN-AUTH";

pub const DEFAULT_ROOT_DOMAIN: &str = "localhost";
pub const DEFAULT_ROOT_URI: &str = "http://localhost";
pub const DEFAULT_CHAIN_ID: &str = "1";

const DEFAULT_NONCE_BYTES: usize = 8;

/// The wallet's signature over the SIWE message that grants a root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiweProof {
    pub message: String,
    pub signature: String,
}

/// A wallet-signed root grant of capabilities to a session DID
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UcanRoot {
    #[serde(rename = "type")]
    pub kind: String,
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default)]
    pub cap: CapabilitySet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(rename = "siwe")]
    pub proof: SiweProof,
}

impl UcanRoot {
    /// The audience, treating an empty string as unset
    pub fn audience(&self) -> Option<&str> {
        self.aud.as_deref().filter(|aud| !aud.is_empty())
    }

    /// True unless the root names an audience other than `did`
    pub fn is_usable_by(&self, did: &str) -> bool {
        match self.audience() {
            Some(aud) => aud == did,
            None => true,
        }
    }
}

/// A root is expired only if it carries an expiry and `now_ms` is past it;
/// a root without `exp` never expires
pub fn is_root_expired(root: &UcanRoot, now_ms: u64) -> bool {
    matches!(root.exp, Some(exp) if exp > 0 && now_ms > exp)
}

/// The claims a root statement binds: who may use the grant, for what and
/// until when
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UcanStatement {
    pub aud: String,
    pub cap: CapabilitySet,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
}

pub fn build_ucan_statement(statement: &UcanStatement) -> String {
    format!(
        "{UCAN_STATEMENT_PREFIX} {}",
        serde_json::to_string(statement).unwrap_or_default()
    )
}

/// The fields of an EIP-4361 (Sign-In With Ethereum) message
#[derive(Clone, Debug)]
pub struct SiweMessage {
    pub domain: String,
    pub address: String,
    pub statement: String,
    pub uri: String,
    pub chain_id: String,
    pub nonce: String,
    pub issued_at: String,
    pub expiration_time: Option<String>,
}

impl SiweMessage {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("{} wants you to sign in with your Ethereum account:", self.domain),
            self.address.clone(),
            String::new(),
            self.statement.clone(),
            String::new(),
            format!("URI: {}", self.uri),
            "Version: 1".to_owned(),
            format!("Chain ID: {}", self.chain_id),
            format!("Nonce: {}", self.nonce),
            format!("Issued At: {}", self.issued_at),
        ];

        if let Some(expiration_time) = self.expiration_time.as_ref().filter(|time| !time.is_empty()) {
            lines.push(format!("Expiration Time: {expiration_time}"));
        }

        lines.join("\n")
    }
}

/// Millisecond epoch time as an ISO-8601 UTC timestamp with millisecond
/// precision, e.g. `2024-05-01T12:00:00.000Z`. Times beyond what chrono can
/// represent are clamped to its latest instant.
pub fn iso_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A random hex nonce for a SIWE message
pub fn random_nonce() -> String {
    let mut bytes = [0u8; DEFAULT_NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The `did:pkh` of an Ethereum address
pub fn eth_address_to_did(address: &str) -> String {
    format!("did:pkh:eth:{}", address.to_lowercase())
}

#[derive(Clone, Default)]
pub struct RootOptions {
    pub capabilities: CapabilitySet,
    pub session_id: Option<String>,
    /// Reuse this session rather than asking the wallet for one
    pub session: Option<UcanSession>,
    pub provider: Option<Provider>,
    pub address: Option<String>,
    pub chain_id: Option<String>,
    pub domain: Option<String>,
    pub uri: Option<String>,
    pub nonce: Option<String>,
    /// Defaults to the configured root lifetime
    pub expires_in: Option<Duration>,
    pub not_before: Option<u64>,
    /// Replaces the generated `UCAN-AUTH` statement
    pub statement: Option<String>,
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::{
        build_ucan_statement, is_root_expired, iso_timestamp, random_nonce, SiweMessage,
        SiweProof, UcanRoot, UcanStatement,
    };
    use crate::ucan::capability::{Capability, CapabilitySet};

    fn root(exp: Option<u64>) -> UcanRoot {
        UcanRoot {
            kind: "siwe".into(),
            iss: "did:pkh:eth:0xabc".into(),
            aud: Some("did:key:z6Mk".into()),
            cap: CapabilitySet::default(),
            exp,
            nbf: None,
            proof: SiweProof {
                message: "message".into(),
                signature: "0xsig".into(),
            },
        }
    }

    #[test]
    fn it_renders_siwe_lines_in_order() {
        let message = SiweMessage {
            domain: "app.example".into(),
            address: "0xABC".into(),
            statement: "UCAN-AUTH {}".into(),
            uri: "https://app.example".into(),
            chain_id: "1".into(),
            nonce: "00ff".into(),
            issued_at: "2024-01-01T00:00:00.000Z".into(),
            expiration_time: Some("2024-01-02T00:00:00.000Z".into()),
        };

        assert_eq!(
            message.render(),
            [
                "app.example wants you to sign in with your Ethereum account:",
                "0xABC",
                "",
                "UCAN-AUTH {}",
                "",
                "URI: https://app.example",
                "Version: 1",
                "Chain ID: 1",
                "Nonce: 00ff",
                "Issued At: 2024-01-01T00:00:00.000Z",
                "Expiration Time: 2024-01-02T00:00:00.000Z",
            ]
            .join("\n")
        );
    }

    #[test]
    fn it_embeds_the_grant_in_the_statement() {
        let statement = UcanStatement {
            aud: "did:key:z6Mk".into(),
            cap: CapabilitySet::new(vec![Capability::new("app:demo", "write")]),
            exp: 1700000000000,
            nbf: None,
        };

        assert_eq!(
            build_ucan_statement(&statement),
            r#"UCAN-AUTH {"aud":"did:key:z6Mk","cap":[{"resource":"app:demo","action":"write"}],"exp":1700000000000}"#
        );
    }

    #[test]
    fn it_never_expires_a_root_without_exp() {
        assert!(!is_root_expired(&root(None), u64::MAX));
        assert!(!is_root_expired(&root(Some(1000)), 1000));
        assert!(is_root_expired(&root(Some(1000)), 1001));
    }

    #[test]
    fn it_serializes_the_proof_under_siwe() -> Result<()> {
        let encoded = serde_json::to_value(root(Some(5)))?;

        assert_eq!(encoded["type"], json!("siwe"));
        assert_eq!(encoded["siwe"]["signature"], json!("0xsig"));
        assert!(encoded.get("nbf").is_none());
        Ok(())
    }

    #[test]
    fn it_formats_timestamps_like_a_browser() {
        assert_eq!(iso_timestamp(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso_timestamp(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
        assert_eq!(random_nonce().len(), 16);
    }

    #[test]
    fn it_clamps_timestamps_past_the_representable_range() {
        let latest = iso_timestamp(u64::MAX);

        assert!(!latest.is_empty());
        assert_eq!(iso_timestamp(i64::MAX as u64), latest);
        assert_eq!(iso_timestamp(i64::MAX as u64 + 1), latest);
    }
}
