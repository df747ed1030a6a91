use lexis_domain::ProviderError;
use lexis_providers::{Error, auth_headers};
use serde_json::{Map, Value};

#[test]
fn auth_headers_include_bearer_and_defaults() {
	let mut defaults = Map::new();

	defaults.insert("X-Tenant".to_string(), Value::String("procurement".to_string()));

	let headers = auth_headers("secret", &defaults).expect("headers");

	assert_eq!(headers.get("authorization").and_then(|v| v.to_str().ok()), Some("Bearer secret"));
	assert_eq!(headers.get("x-tenant").and_then(|v| v.to_str().ok()), Some("procurement"));
}

#[test]
fn auth_headers_reject_non_string_defaults() {
	let mut defaults = Map::new();

	defaults.insert("X-Retries".to_string(), Value::from(3));

	assert!(matches!(auth_headers("secret", &defaults), Err(Error::InvalidConfig { .. })));
}

#[test]
fn status_errors_map_to_retry_classes() {
	let throttled = Error::Status { status: 429, body: "slow down".to_string() };
	let rejected = Error::Status { status: 400, body: "bad input".to_string() };

	assert!(matches!(throttled.into_provider_error("embed"), ProviderError::Transient { .. }));
	assert!(matches!(rejected.into_provider_error("embed"), ProviderError::Permanent { .. }));
}

#[test]
fn malformed_responses_are_permanent() {
	let err = Error::InvalidResponse { message: "missing data".to_string() };

	assert!(!err.into_provider_error("rerank").is_transient());
}
