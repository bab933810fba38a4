//! Service-side checks for an invocation presented as a bearer token: the
//! token's own signature and lifetime, then each link of its proof chain
//! back to a wallet-signed root.

use anyhow::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use wallet_ucan_common::ConditionalSync;

use crate::{
    error::{AuthError, AuthResult},
    ucan::{
        split_token, verify_ed25519, CapabilitySet, Proof, UcanRoot, ROOT_TYPE_SIWE,
        UCAN_ALGORITHM, UCAN_STATEMENT_PREFIX,
    },
};

const ETH_DID_PREFIX: &str = "did:pkh:eth:";

/// Recovers the Ethereum address that signed a SIWE message. Verification
/// trusts the root's own `iss` when no recoverer is configured.
pub trait SiweVerifier: ConditionalSync {
    fn recover_address(&self, message: &str, signature: &str) -> Result<String>;
}

/// Epoch values below 10^12 are taken to be seconds
pub fn normalize_epoch_ms(value: u64) -> u64 {
    if value < 1_000_000_000_000 {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// An epoch claim as found in the wild: an integer, a float or a numeric
/// string. Zero counts as absent.
fn epoch_claim(value: Option<&Value>) -> Option<u64> {
    let value = match value? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64)),
        Value::String(string) => string.trim().parse::<u64>().ok(),
        _ => None,
    }?;

    match value {
        0 => None,
        value => Some(normalize_epoch_ms(value)),
    }
}

fn check_window(nbf: Option<u64>, exp: Option<u64>, now_ms: u64, subject: &str) -> AuthResult<()> {
    if let Some(nbf) = nbf {
        if now_ms < nbf {
            return Err(AuthError::verification(format!("{subject} not active")));
        }
    }
    if let Some(exp) = exp {
        if now_ms > exp {
            return Err(AuthError::verification(format!("{subject} expired")));
        }
    }
    Ok(())
}

fn caps_allow(available: &CapabilitySet, required: &CapabilitySet) -> bool {
    !available.is_empty() && available.allows_all(required)
}

fn decode_json<T: DeserializeOwned>(segment: &str) -> AuthResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|error| AuthError::InvalidToken(error.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|error| AuthError::InvalidToken(error.to_string()))
}

/// The claims of a token from an arbitrary issuer, read leniently
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default)]
    cap: Option<CapabilitySet>,
    #[serde(default)]
    exp: Option<Value>,
    #[serde(default)]
    nbf: Option<Value>,
    #[serde(default)]
    prf: Option<Vec<Proof>>,
}

impl TokenClaims {
    pub fn capabilities(&self) -> CapabilitySet {
        self.cap.clone().unwrap_or_default()
    }

    pub fn exp(&self) -> Option<u64> {
        epoch_claim(self.exp.as_ref())
    }

    pub fn nbf(&self) -> Option<u64> {
        epoch_claim(self.nbf.as_ref())
    }

    pub fn proofs(&self) -> &[Proof] {
        self.prf.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct DecodedToken {
    pub header: Value,
    pub claims: TokenClaims,
    pub signature: Vec<u8>,
    pub signing_input: String,
}

pub fn decode_ucan_token(token: &str) -> AuthResult<DecodedToken> {
    let (header, claims, signature) = split_token(token)?;

    Ok(DecodedToken {
        header: decode_json(header)?,
        claims: decode_json(claims)?,
        signature: URL_SAFE_NO_PAD
            .decode(signature.trim_end_matches('='))
            .map_err(|error| AuthError::InvalidToken(error.to_string()))?,
        signing_input: format!("{header}.{claims}"),
    })
}

/// Check the signature of `token` against its `did:key` issuer, and that
/// `now_ms` falls within its lifetime
pub fn verify_ucan_jws(token: &str, now_ms: u64) -> AuthResult<TokenClaims> {
    let decoded = decode_ucan_token(token)?;

    if decoded.header.get("alg").and_then(Value::as_str) != Some(UCAN_ALGORITHM) {
        return Err(AuthError::verification("unsupported UCAN alg"));
    }

    verify_ed25519(
        &decoded.claims.iss,
        decoded.signing_input.as_bytes(),
        &decoded.signature,
    )
    .map_err(|error| {
        debug!("UCAN signature rejected: {}", error);
        AuthError::verification("invalid UCAN signature")
    })?;

    check_window(decoded.claims.nbf(), decoded.claims.exp(), now_ms, "UCAN")?;

    Ok(decoded.claims)
}

/// The JSON claims on the `UCAN-AUTH` line of a SIWE message
pub fn extract_ucan_statement(message: &str) -> Option<Value> {
    let prefix_len = UCAN_STATEMENT_PREFIX.len();

    message
        .lines()
        .map(str::trim)
        .find(|line| {
            line.get(..prefix_len)
                .map_or(false, |head| head.eq_ignore_ascii_case(UCAN_STATEMENT_PREFIX))
        })
        .and_then(|line| {
            let payload = line[prefix_len..].trim_start_matches([' ', ':']);
            serde_json::from_str(payload).ok()
        })
}

/// What a verified root grants
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedRoot {
    pub iss: String,
    pub aud: String,
    pub cap: CapabilitySet,
    pub exp: u64,
    pub nbf: Option<u64>,
}

impl VerifiedRoot {
    /// The wallet address behind the grant, lowercased
    pub fn address(&self) -> String {
        self.iss
            .strip_prefix(ETH_DID_PREFIX)
            .unwrap_or(&self.iss)
            .to_lowercase()
    }
}

/// Check a SIWE root: its signer (when a recoverer is given), that the
/// claims embedded in the signed statement agree with the root's own fields,
/// and its lifetime
pub fn verify_root_proof(
    root: &UcanRoot,
    siwe: Option<&dyn SiweVerifier>,
    now_ms: u64,
) -> AuthResult<VerifiedRoot> {
    if root.kind != ROOT_TYPE_SIWE {
        return Err(AuthError::verification("invalid root proof"));
    }

    let message = root.proof.message.as_str();
    let signature = root.proof.signature.as_str();
    if message.is_empty() || signature.is_empty() {
        return Err(AuthError::verification("missing SIWE message"));
    }

    let iss = match siwe {
        Some(siwe) => {
            let recovered = siwe
                .recover_address(message, signature)
                .map_err(|error| AuthError::verification(format!("invalid SIWE signature: {error}")))?;
            let iss = format!("{ETH_DID_PREFIX}{}", recovered.to_lowercase());
            if !root.iss.is_empty() && root.iss != iss {
                return Err(AuthError::verification("root issuer mismatch"));
            }
            iss
        }
        None => root.iss.clone(),
    };

    let statement = extract_ucan_statement(message)
        .ok_or_else(|| AuthError::verification("missing UCAN statement"))?;

    let aud = statement
        .get("aud")
        .and_then(Value::as_str)
        .filter(|aud| !aud.is_empty())
        .map(str::to_owned)
        .or_else(|| root.audience().map(str::to_owned));

    let cap = match statement.get("cap") {
        Some(cap) if !cap.is_null() => serde_json::from_value::<CapabilitySet>(cap.clone()).ok(),
        _ => Some(root.cap.clone()),
    };

    let root_exp = root.exp.filter(|exp| *exp > 0).map(normalize_epoch_ms);
    let exp = epoch_claim(statement.get("exp")).or(root_exp);
    let nbf = epoch_claim(statement.get("nbf")).or(root.nbf.filter(|nbf| *nbf > 0).map(normalize_epoch_ms));

    let (aud, cap, exp) = match (aud, cap, exp) {
        (Some(aud), Some(cap), Some(exp)) => (aud, cap, exp),
        _ => return Err(AuthError::verification("invalid root claims")),
    };

    if root.audience().map_or(false, |root_aud| root_aud != aud) {
        return Err(AuthError::verification("root audience mismatch"));
    }
    if root_exp.map_or(false, |root_exp| root_exp != exp) {
        return Err(AuthError::verification("root expiry mismatch"));
    }

    check_window(nbf, Some(exp), now_ms, "root")?;

    Ok(VerifiedRoot {
        iss,
        aud,
        cap,
        exp,
        nbf,
    })
}

/// Walk `proofs` upward from `current_did`. Every link must be addressed to
/// the DID below it, hold the capabilities it passed on, and live at least
/// as long as it.
pub fn verify_proof_chain(
    current_did: &str,
    required: &CapabilitySet,
    required_exp: Option<u64>,
    proofs: &[Proof],
    siwe: Option<&dyn SiweVerifier>,
    now_ms: u64,
) -> AuthResult<VerifiedRoot> {
    let (first, rest) = proofs.split_first().ok_or(AuthError::MissingProofChain)?;

    match first {
        Proof::Token(token) => {
            let claims = verify_ucan_jws(token, now_ms)?;
            let exp = claims.exp();
            let cap = claims.capabilities();

            if claims.aud != current_did {
                return Err(AuthError::verification("UCAN audience mismatch"));
            }
            if !caps_allow(&cap, required) {
                return Err(AuthError::verification("UCAN capability denied"));
            }
            if let (Some(exp), Some(required_exp)) = (exp, required_exp) {
                if exp < required_exp {
                    return Err(AuthError::verification("UCAN proof expired"));
                }
            }

            let next = match claims.proofs() {
                [] => rest,
                proofs => proofs,
            };

            verify_proof_chain(&claims.iss, &cap, exp, next, siwe, now_ms)
        }
        Proof::Root(root) => {
            let root = verify_root_proof(root, siwe, now_ms)?;

            if root.aud != current_did {
                return Err(AuthError::verification("root audience mismatch"));
            }
            if !caps_allow(&root.cap, required) {
                return Err(AuthError::verification("root capability denied"));
            }
            if required_exp.map_or(false, |required_exp| root.exp < required_exp) {
                return Err(AuthError::verification("root expired"));
            }

            Ok(root)
        }
    }
}

/// Verify an invocation addressed to the service `audience` that exercises
/// `required`, returning the root it ultimately rests on
pub fn verify_invocation(
    token: &str,
    audience: &str,
    required: &CapabilitySet,
    siwe: Option<&dyn SiweVerifier>,
    now_ms: u64,
) -> AuthResult<VerifiedRoot> {
    let claims = verify_ucan_jws(token, now_ms)?;
    let cap = claims.capabilities();

    if claims.aud != audience {
        return Err(AuthError::verification("UCAN audience mismatch"));
    }
    if !caps_allow(&cap, required) {
        return Err(AuthError::verification("UCAN capability denied"));
    }

    let root = verify_proof_chain(&claims.iss, &cap, claims.exp(), claims.proofs(), siwe, now_ms)?;

    debug!("Verified invocation from {} for {}", claims.iss, root.address());

    Ok(root)
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};
    use serde_json::json;

    use super::{
        extract_ucan_statement, normalize_epoch_ms, verify_invocation, verify_root_proof,
        SiweVerifier,
    };
    use crate::{
        error::AuthError,
        ucan::{
            build_ucan_statement, eth_address_to_did, generate_ed25519_key, sign_ucan_payload,
            signing_key_to_did, Capability, CapabilitySet, Proof, SiweMessage, SiweProof,
            UcanPayload, UcanRoot, UcanSession, UcanStatement, ROOT_TYPE_SIWE,
        },
    };

    const NOW: u64 = 1_700_000_000_000;
    const SERVICE: &str = "did:web:storage.example";
    const ADDRESS: &str = "0xAbC0000000000000000000000000000000000001";

    struct FixedSigner(&'static str);

    impl SiweVerifier for FixedSigner {
        fn recover_address(&self, _message: &str, signature: &str) -> Result<String> {
            match signature {
                "0xsig" => Ok(self.0.to_owned()),
                _ => Err(anyhow!("bad signature")),
            }
        }
    }

    fn caps() -> CapabilitySet {
        vec![Capability::new("app:demo", "*")].into()
    }

    fn local_session() -> UcanSession {
        let key = generate_ed25519_key();
        UcanSession {
            id: "default".into(),
            did: signing_key_to_did(&key),
            created_at: NOW,
            expires_at: None,
            signer: None,
            private_key: Some(key),
        }
    }

    fn root_for(did: &str, exp: u64) -> UcanRoot {
        let statement = build_ucan_statement(&UcanStatement {
            aud: did.into(),
            cap: caps(),
            exp,
            nbf: None,
        });
        let message = SiweMessage {
            domain: "localhost".into(),
            address: ADDRESS.into(),
            statement,
            uri: "http://localhost".into(),
            chain_id: "1".into(),
            nonce: "00112233".into(),
            issued_at: "2023-11-14T22:13:20.000Z".into(),
            expiration_time: None,
        }
        .render();

        UcanRoot {
            kind: ROOT_TYPE_SIWE.into(),
            iss: eth_address_to_did(ADDRESS),
            aud: Some(did.into()),
            cap: caps(),
            exp: Some(exp),
            nbf: None,
            proof: SiweProof {
                message,
                signature: "0xsig".into(),
            },
        }
    }

    async fn mint(issuer: &UcanSession, aud: &str, cap: CapabilitySet, exp: u64, prf: Vec<Proof>) -> String {
        sign_ucan_payload(
            &UcanPayload {
                iss: issuer.did.clone(),
                aud: aud.into(),
                cap,
                exp,
                nbf: None,
                prf,
            },
            issuer,
        )
        .await
        .unwrap()
    }

    fn required(resource: &str, action: &str) -> CapabilitySet {
        vec![Capability::new(resource, action)].into()
    }

    #[test]
    fn it_treats_small_epochs_as_seconds() {
        assert_eq!(normalize_epoch_ms(1_700_000_000), NOW);
        assert_eq!(normalize_epoch_ms(NOW), NOW);
    }

    #[test]
    fn it_finds_the_statement_line_case_insensitively() {
        let message = "example.com wants you to sign in\n\n  ucan-auth: {\"aud\":\"did:key:z1\"}\n";
        assert_eq!(
            extract_ucan_statement(message),
            Some(json!({ "aud": "did:key:z1" }))
        );
        assert_eq!(extract_ucan_statement("UCAN-AUTH not json"), None);
        assert_eq!(extract_ucan_statement("no statement here"), None);
    }

    #[tokio::test]
    async fn it_verifies_an_invocation_resting_on_a_root() -> Result<()> {
        let session = local_session();
        let root = root_for(&session.did, NOW + 3_600_000);
        let token = mint(
            &session,
            SERVICE,
            required("app:demo", "write"),
            NOW + 300_000,
            vec![root.into()],
        )
        .await;

        let verified = verify_invocation(
            &token,
            SERVICE,
            &required("app:demo", "write"),
            Some(&FixedSigner(ADDRESS)),
            NOW,
        )?;

        assert_eq!(verified.address(), ADDRESS.to_lowercase());
        assert_eq!(verified.aud, session.did);
        Ok(())
    }

    #[tokio::test]
    async fn it_follows_delegations_back_to_the_root() -> Result<()> {
        let owner = local_session();
        let delegate = local_session();
        let root = root_for(&owner.did, NOW + 3_600_000);

        let delegation = mint(&owner, &delegate.did, caps(), NOW + 600_000, vec![root.into()]).await;
        let invocation = mint(
            &delegate,
            SERVICE,
            required("app:demo", "read"),
            NOW + 300_000,
            vec![delegation.into()],
        )
        .await;

        let verified =
            verify_invocation(&invocation, SERVICE, &required("app:demo", "read"), None, NOW)?;
        assert_eq!(verified.aud, owner.did);
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_broken_links() {
        let owner = local_session();
        let stranger = local_session();
        let root = root_for(&owner.did, NOW + 3_600_000);

        let misaddressed = mint(
            &stranger,
            SERVICE,
            required("app:demo", "read"),
            NOW + 300_000,
            vec![root.clone().into()],
        )
        .await;
        let error = verify_invocation(&misaddressed, SERVICE, &required("app:demo", "read"), None, NOW)
            .unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: root audience mismatch");

        let escalated = mint(
            &owner,
            SERVICE,
            required("app:other", "read"),
            NOW + 300_000,
            vec![root.clone().into()],
        )
        .await;
        let error = verify_invocation(&escalated, SERVICE, &required("app:other", "read"), None, NOW)
            .unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: root capability denied");

        let outliving = mint(
            &owner,
            SERVICE,
            required("app:demo", "read"),
            NOW + 7_200_000,
            vec![root.into()],
        )
        .await;
        let error = verify_invocation(&outliving, SERVICE, &required("app:demo", "read"), None, NOW)
            .unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: root expired");
    }

    #[tokio::test]
    async fn it_rejects_invocations_for_other_services_or_out_of_time() {
        let session = local_session();
        let root = root_for(&session.did, NOW + 3_600_000);
        let token = mint(&session, SERVICE, caps(), NOW + 300_000, vec![root.into()]).await;

        let error = verify_invocation(&token, "did:web:other", &caps(), None, NOW).unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: UCAN audience mismatch");

        let error = verify_invocation(&token, SERVICE, &caps(), None, NOW + 300_001).unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: UCAN expired");

        let error = verify_invocation(&token, SERVICE, &required("kb:*", "read"), None, NOW)
            .unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: UCAN capability denied");
    }

    #[tokio::test]
    async fn it_rejects_a_signature_from_someone_other_than_the_issuer() {
        let session = local_session();
        let impostor = UcanSession {
            did: local_session().did,
            ..session.clone()
        };
        let root = root_for(&impostor.did, NOW + 3_600_000);
        let token = mint(&impostor, SERVICE, caps(), NOW + 300_000, vec![root.into()]).await;

        let error = verify_invocation(&token, SERVICE, &caps(), None, NOW).unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: invalid UCAN signature");
    }

    #[test]
    fn it_checks_root_claims_against_the_signed_statement() {
        let did = "did:key:z6MkTest";
        let root = root_for(did, NOW + 3_600_000);

        let error = verify_root_proof(
            &UcanRoot {
                exp: Some(NOW + 7_200_000),
                ..root.clone()
            },
            None,
            NOW,
        )
        .unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: root expiry mismatch");

        let error = verify_root_proof(
            &UcanRoot {
                aud: Some("did:key:z6MkOther".into()),
                ..root.clone()
            },
            None,
            NOW,
        )
        .unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: root audience mismatch");

        let error = verify_root_proof(&root, Some(&FixedSigner("0xdef")), NOW).unwrap_err();
        assert_eq!(error.to_string(), "UCAN verification failed: root issuer mismatch");

        let error = verify_root_proof(&root, None, NOW + 3_600_001).unwrap_err();
        assert!(matches!(error, AuthError::Verification(message) if message == "root expired"));
    }
}
