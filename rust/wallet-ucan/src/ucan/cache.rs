use std::{collections::HashMap, sync::Mutex, time::Duration};

use serde::Deserialize;
use wallet_ucan_common::duration_ms;

use super::{capability::CapabilitySet, token::decode_ucan_payload};

/// How long before its expiry a cached invocation stops being handed out
pub const DEFAULT_INVOCATION_SKEW: Duration = Duration::from_millis(5000);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InvocationKey(String);

impl InvocationKey {
    pub fn new(issuer: &str, audience: &str, capabilities: &CapabilitySet) -> Self {
        InvocationKey(format!("{issuer}|{audience}|{}", capabilities.canonical()))
    }
}

#[derive(Clone, Debug)]
pub struct CachedInvocation {
    pub token: String,
    pub exp: u64,
    pub nbf: Option<u64>,
}

impl CachedInvocation {
    /// Usable iff `now` is more than `skew` before `exp` and not before `nbf`
    pub fn is_valid(&self, now_ms: u64, skew_ms: u64) -> bool {
        let fresh = self.exp.saturating_sub(skew_ms) > now_ms;
        let started = match self.nbf {
            Some(nbf) => now_ms >= nbf,
            None => true,
        };
        fresh && started
    }
}

#[derive(Deserialize)]
struct Lifetime {
    exp: Option<u64>,
    nbf: Option<u64>,
}

/// Invocation tokens minted in this process, keyed by issuer, audience and
/// capability set
#[derive(Debug)]
pub struct InvocationCache {
    entries: Mutex<HashMap<InvocationKey, CachedInvocation>>,
    skew_ms: u64,
}

impl Default for InvocationCache {
    fn default() -> Self {
        InvocationCache::new(DEFAULT_INVOCATION_SKEW)
    }
}

impl InvocationCache {
    pub fn new(skew: Duration) -> Self {
        InvocationCache {
            entries: Mutex::new(HashMap::new()),
            skew_ms: duration_ms(skew),
        }
    }

    pub fn get(&self, key: &InvocationKey, now_ms: u64) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .filter(|entry| entry.is_valid(now_ms, self.skew_ms))
            .map(|entry| entry.token.clone())
    }

    /// Add `entry`, dropping every entry that has run out of lifetime by
    /// `now_ms`
    pub fn insert(&self, key: InvocationKey, entry: CachedInvocation, now_ms: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            let skew_ms = self.skew_ms;
            entries.retain(|_, cached| cached.exp.saturating_sub(skew_ms) > now_ms);
            entries.insert(key, entry);
        }
    }

    /// Cache `token` under its own `exp`/`nbf`. A token whose payload cannot
    /// be read, or that carries no numeric `exp`, is not cached; returns
    /// whether it was.
    pub fn insert_token(&self, key: InvocationKey, token: &str, now_ms: u64) -> bool {
        match decode_ucan_payload::<Lifetime>(token) {
            Ok(Lifetime { exp: Some(exp), nbf }) => {
                self.insert(
                    key,
                    CachedInvocation {
                        token: token.to_owned(),
                        exp,
                        nbf,
                    },
                    now_ms,
                );
                true
            }
            Ok(_) => false,
            Err(error) => {
                debug!("Not caching undecodable invocation: {}", error);
                false
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
