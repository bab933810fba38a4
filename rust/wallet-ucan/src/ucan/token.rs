use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    capability::CapabilitySet,
    key::sign_ed25519,
    root::UcanRoot,
    session::UcanSession,
};
use crate::{
    error::{AuthError, AuthResult},
    provider::Provider,
};

pub const UCAN_ALGORITHM: &str = "EdDSA";
pub const UCAN_TYPE: &str = "UCAN";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UcanHeader {
    pub alg: String,
    pub typ: String,
}

impl Default for UcanHeader {
    fn default() -> Self {
        UcanHeader {
            alg: UCAN_ALGORITHM.into(),
            typ: UCAN_TYPE.into(),
        }
    }
}

/// One link of a proof chain: either an encoded parent token or an inline
/// wallet-signed root
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Proof {
    Token(String),
    Root(UcanRoot),
}

impl From<UcanRoot> for Proof {
    fn from(root: UcanRoot) -> Self {
        Proof::Root(root)
    }
}

impl From<String> for Proof {
    fn from(token: String) -> Self {
        Proof::Token(token)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UcanPayload {
    pub iss: String,
    pub aud: String,
    pub cap: CapabilitySet,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(default)]
    pub prf: Vec<Proof>,
}

fn encode_json<T: Serialize>(value: &T) -> AuthResult<String> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).map_err(anyhow::Error::from)?))
}

/// Encode and sign `payload` as `header.payload.signature`. The session's
/// remote signer is used when present, otherwise its local key.
pub async fn sign_ucan_payload(payload: &UcanPayload, session: &UcanSession) -> AuthResult<String> {
    let header = encode_json(&UcanHeader::default())?;
    let body = encode_json(payload)?;
    let signing_input = format!("{header}.{body}");

    let signature = match (&session.signer, &session.private_key) {
        (Some(signer), _) => signer.sign(&signing_input, payload).await?,
        (None, Some(key)) => URL_SAFE_NO_PAD.encode(sign_ed25519(key, signing_input.as_bytes())),
        (None, None) => return Err(AuthError::MissingSessionKey),
    };

    trace!("Signed UCAN for {} (issuer {})", payload.aud, payload.iss);

    Ok(format!("{signing_input}.{signature}"))
}

/// The three segments of a compact token
pub fn split_token(token: &str) -> AuthResult<(&str, &str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => Err(AuthError::InvalidToken("expected three segments".into())),
    }
}

pub(crate) fn decode_segment<T: DeserializeOwned>(segment: &str) -> AuthResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|error| AuthError::InvalidToken(error.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|error| AuthError::InvalidToken(error.to_string()))
}

/// Read the payload of a token without checking its signature
pub fn decode_ucan_payload<T: DeserializeOwned>(token: &str) -> AuthResult<T> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next()) {
        (Some(_), Some(payload)) => decode_segment(payload),
        _ => Err(AuthError::InvalidToken("missing payload segment".into())),
    }
}

/// Parameters shared by delegations and invocations
#[derive(Clone, Default)]
pub struct UcanOptions {
    pub audience: String,
    pub capabilities: CapabilitySet,
    /// The issuing session; one is requested from the wallet when absent
    pub issuer: Option<UcanSession>,
    pub session_id: Option<String>,
    pub provider: Option<Provider>,
    /// Defaults to the configured UCAN lifetime
    pub expires_in: Option<Duration>,
    pub not_before: Option<u64>,
    /// Explicit proof chain; the stored root is used when empty
    pub proofs: Vec<Proof>,
}
