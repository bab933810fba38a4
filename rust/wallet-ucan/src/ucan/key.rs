use anyhow::{anyhow, Result};
use ed25519_zebra::{Signature, SigningKey, VerificationKey};

/// Multicodec prefix for an Ed25519 public key
pub const ED25519_MAGIC_BYTES: &[u8] = &[0xed, 0x01];

const DID_KEY_PREFIX: &str = "did:key:z";

/// Generate a fresh Ed25519 signing key
pub fn generate_ed25519_key() -> SigningKey {
    SigningKey::new(rand::thread_rng())
}

/// The `did:key` for an Ed25519 public key
pub fn ed25519_key_to_did(key: &VerificationKey) -> String {
    let bytes = [ED25519_MAGIC_BYTES, key.as_ref()].concat();
    format!("{DID_KEY_PREFIX}{}", bs58::encode(bytes).into_string())
}

/// The `did:key` of the public half of `key`
pub fn signing_key_to_did(key: &SigningKey) -> String {
    ed25519_key_to_did(&VerificationKey::from(key))
}

/// Parse an Ed25519 `did:key` back into a verification key
pub fn did_to_ed25519_key(did: &str) -> Result<VerificationKey> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| anyhow!("Not a base58btc did:key: {did}"))?;
    let bytes = bs58::decode(encoded).into_vec()?;

    match bytes.strip_prefix(ED25519_MAGIC_BYTES) {
        Some(key) => Ok(VerificationKey::try_from(key)?),
        None => Err(anyhow!("Unsupported did:key type: {did}")),
    }
}

pub fn sign_ed25519(key: &SigningKey, payload: &[u8]) -> Vec<u8> {
    let signature: [u8; 64] = key.sign(payload).into();
    signature.to_vec()
}

pub fn verify_ed25519(did: &str, payload: &[u8], signature: &[u8]) -> Result<()> {
    let key = did_to_ed25519_key(did)?;
    let signature = Signature::try_from(signature)?;
    key.verify(&signature, payload)
        .map_err(|error| anyhow!("Could not verify signature: {:?}", error))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{
        did_to_ed25519_key, generate_ed25519_key, sign_ed25519, signing_key_to_did,
        verify_ed25519,
    };

    #[test]
    fn it_round_trips_a_did_key() -> Result<()> {
        let key = generate_ed25519_key();
        let did = signing_key_to_did(&key);

        assert!(did.starts_with("did:key:z6Mk"));
        let parsed = did_to_ed25519_key(&did)?;
        let expected = ed25519_zebra::VerificationKey::from(&key);
        assert_eq!(parsed.as_ref(), expected.as_ref());
        Ok(())
    }

    #[test]
    fn it_verifies_only_matching_signatures() {
        let key = generate_ed25519_key();
        let did = signing_key_to_did(&key);
        let signature = sign_ed25519(&key, b"hello");

        assert!(verify_ed25519(&did, b"hello", &signature).is_ok());
        assert!(verify_ed25519(&did, b"goodbye", &signature).is_err());
        assert!(verify_ed25519("did:pkh:eth:0xabc", b"hello", &signature).is_err());
    }
}
