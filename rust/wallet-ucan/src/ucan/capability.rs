use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single grant: an action permitted on a resource, plus any caveats the
/// issuer attached
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub resource: String,
    pub action: String,
    #[serde(flatten)]
    pub caveats: Map<String, Value>,
}

impl Capability {
    pub fn new<R: Into<String>, A: Into<String>>(resource: R, action: A) -> Self {
        Capability {
            resource: resource.into(),
            action: action.into(),
            caveats: Map::new(),
        }
    }

    pub fn with_caveat<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.caveats.insert(key.into(), value);
        self
    }

    /// True if `self` (as held by a proof) covers `requested`. Both resource
    /// and action may be `*` or end in `*` to match by prefix.
    pub fn allows(&self, requested: &Capability) -> bool {
        match_pattern(&self.resource, &requested.resource)
            && match_pattern(&self.action, &requested.action)
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.resource, self.action)
    }
}

/// Match `value` against `pattern`, where a pattern of `*` matches anything
/// and a trailing `*` matches by prefix
pub fn match_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

/// An ordered list of capabilities. Equality is by canonical serialization,
/// so the same capabilities in a different order are a different set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(Vec<Capability>);

impl CapabilitySet {
    pub fn new(capabilities: Vec<Capability>) -> Self {
        CapabilitySet(capabilities)
    }

    /// The compact JSON rendering used for equality and as a cache key
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Capability> {
        self.0.iter()
    }

    /// True if every capability requested is covered by one in this set
    pub fn allows_all(&self, requested: &CapabilitySet) -> bool {
        requested
            .iter()
            .all(|wanted| self.iter().any(|held| held.allows(wanted)))
    }
}

impl PartialEq for CapabilitySet {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(capabilities: Vec<Capability>) -> Self {
        CapabilitySet(capabilities)
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::{match_pattern, Capability, CapabilitySet};

    #[test]
    fn it_compares_capability_sets_in_order() {
        let read = Capability::new("app:demo", "read");
        let write = Capability::new("app:demo", "write");

        let forward = CapabilitySet::new(vec![read.clone(), write.clone()]);
        let same = CapabilitySet::new(vec![read.clone(), write.clone()]);
        let backward = CapabilitySet::new(vec![write, read]);

        assert_eq!(forward, same);
        assert_ne!(forward, backward);
    }

    #[test]
    fn it_flattens_caveats_beside_resource_and_action() -> Result<()> {
        let capability = Capability::new("profile", "read").with_caveat("path", json!("/apps"));
        let encoded = serde_json::to_value(&capability)?;

        assert_eq!(
            encoded,
            json!({ "resource": "profile", "action": "read", "path": "/apps" })
        );
        assert_eq!(
            serde_json::from_value::<Capability>(encoded)?,
            capability
        );
        Ok(())
    }

    #[test]
    fn it_matches_wildcards_and_prefixes() {
        assert!(match_pattern("*", "anything"));
        assert!(match_pattern("app:*", "app:demo"));
        assert!(!match_pattern("app:*", "profile"));
        assert!(match_pattern("read", "read"));
        assert!(!match_pattern("read", "write"));

        let held = CapabilitySet::new(vec![Capability::new("app:*", "*")]);
        let wanted = CapabilitySet::new(vec![
            Capability::new("app:demo", "read"),
            Capability::new("app:other", "write"),
        ]);
        assert!(held.allows_all(&wanted));
        assert!(!wanted.allows_all(&held));
    }
}
