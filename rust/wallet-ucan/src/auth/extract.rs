use serde_json::Value;

/// One place an auth endpoint may put the value we are after. `field` is
/// `challenge` or `token` depending on the endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// `{ "data": { field: "…" } }`
    DataEnvelope,
    /// `{ field: "…" }`
    DirectField,
    /// `{ "result": "…" }`
    BareResult,
    /// `{ "result": { field: "…" } }`
    ResultEnvelope,
    /// `{ "body": { field: "…" } }`
    BodyField,
    /// `{ "body": { "result": "…" } }`
    BodyResult,
    /// `{ "body": { "result": { field: "…" } } }`
    BodyResultEnvelope,
}

/// Shapes probed for a challenge, in priority order
pub const CHALLENGE_STRATEGIES: &[ExtractionStrategy] = &[
    ExtractionStrategy::DataEnvelope,
    ExtractionStrategy::DirectField,
    ExtractionStrategy::BareResult,
    ExtractionStrategy::ResultEnvelope,
    ExtractionStrategy::BodyResult,
    ExtractionStrategy::BodyResultEnvelope,
];

/// Shapes probed for a token, in priority order
pub const TOKEN_STRATEGIES: &[ExtractionStrategy] = &[
    ExtractionStrategy::DataEnvelope,
    ExtractionStrategy::DirectField,
    ExtractionStrategy::BareResult,
    ExtractionStrategy::ResultEnvelope,
    ExtractionStrategy::BodyField,
    ExtractionStrategy::BodyResult,
    ExtractionStrategy::BodyResultEnvelope,
];

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|value| !value.is_empty())
}

impl ExtractionStrategy {
    pub fn extract<'a>(&self, payload: &'a Value, field: &str) -> Option<&'a str> {
        match self {
            ExtractionStrategy::DataEnvelope => non_empty(payload.get("data")?.get(field)),
            ExtractionStrategy::DirectField => non_empty(payload.get(field)),
            ExtractionStrategy::BareResult => non_empty(payload.get("result")),
            ExtractionStrategy::ResultEnvelope => non_empty(payload.get("result")?.get(field)),
            ExtractionStrategy::BodyField => non_empty(payload.get("body")?.get(field)),
            ExtractionStrategy::BodyResult => non_empty(payload.get("body")?.get("result")),
            ExtractionStrategy::BodyResultEnvelope => {
                non_empty(payload.get("body")?.get("result")?.get(field))
            }
        }
    }
}

fn extract_with(payload: &Value, field: &str, strategies: &[ExtractionStrategy]) -> Option<String> {
    if !payload.is_object() {
        return None;
    }

    strategies
        .iter()
        .find_map(|strategy| strategy.extract(payload, field))
        .map(str::to_owned)
}

pub fn extract_challenge(payload: &Value) -> Option<String> {
    extract_with(payload, "challenge", CHALLENGE_STRATEGIES)
}

pub fn extract_token(payload: &Value) -> Option<String> {
    extract_with(payload, "token", TOKEN_STRATEGIES)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extract_challenge, extract_token};

    #[test]
    fn it_prefers_the_data_envelope() {
        let payload = json!({ "data": { "challenge": "A" }, "challenge": "B" });
        assert_eq!(extract_challenge(&payload).as_deref(), Some("A"));
    }

    #[test]
    fn it_probes_every_challenge_shape() {
        for (payload, expected) in [
            (json!({ "challenge": "direct" }), "direct"),
            (json!({ "result": "bare" }), "bare"),
            (json!({ "result": { "challenge": "nested" } }), "nested"),
            (json!({ "body": { "result": "body" } }), "body"),
            (json!({ "body": { "result": { "challenge": "deep" } } }), "deep"),
        ] {
            assert_eq!(extract_challenge(&payload).as_deref(), Some(expected));
        }
    }

    #[test]
    fn it_finds_tokens_in_the_body() {
        let payload = json!({ "body": { "token": "T", "result": "R" } });
        assert_eq!(extract_token(&payload).as_deref(), Some("T"));

        let payload = json!({ "body": { "result": { "token": "jwt" } } });
        assert_eq!(extract_token(&payload).as_deref(), Some("jwt"));
    }

    #[test]
    fn it_treats_empty_and_non_string_values_as_missing() {
        assert!(extract_token(&json!({ "token": "" })).is_none());
        assert!(extract_token(&json!({ "token": 42 })).is_none());
        assert!(extract_token(&json!("jwt")).is_none());
        assert!(extract_challenge(&json!({ "body": { "token": "x" } })).is_none());
        assert_eq!(
            extract_token(&json!({ "token": "", "result": "fallback" })).as_deref(),
            Some("fallback")
        );
    }
}
