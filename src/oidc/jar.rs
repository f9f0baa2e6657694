//! JWT-Secured Authorization Requests, RFC 9101 (spec.md §4.6 "OAuth/OIDC authorization").

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::error::DomainError;

/// What the caller expects a JAR assertion to prove, mirroring spec.md §4.6 step 4.
#[derive(Debug, Clone)]
pub struct JarConfig {
    pub expected_client_id: String,
    pub expected_audience: String,
    /// Maximum allowed `now - iat` age, in seconds. Defaults to 3600 (spec.md §4.6).
    pub max_age: i64,
    pub require_signature: bool,
}

impl JarConfig {
    pub const DEFAULT_MAX_AGE: i64 = 3600;
}

/// The OAuth parameters recovered from a validated JAR assertion (spec.md §4.6 step 5).
#[derive(Debug, Clone)]
pub struct JarRequest {
    pub client_id: String,
    pub response_type: String,
    pub redirect_uri: String,
    /// Any other claims the JWT carried, with the JWT-only claims
    /// (`iss`, `aud`, `iat`, `exp`, `jti`) stripped, per spec.md §4.6 step 6.
    pub extra: HashMap<String, Value>,
}

impl JarRequest {
    /// Merges this JAR-derived request over query parameters: JAR fields win
    /// on every key they supply (spec.md §4.6: "JAR fields override query fields").
    pub fn merge_over(&self, query_params: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = query_params.clone();
        merged.insert("client_id".to_string(), self.client_id.clone());
        merged.insert("response_type".to_string(), self.response_type.clone());
        merged.insert("redirect_uri".to_string(), self.redirect_uri.clone());
        for (key, value) in &self.extra {
            if let Some(s) = value.as_str() {
                merged.insert(key.clone(), s.to_string());
            }
        }
        merged
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

const JWT_ONLY_CLAIMS: &[&str] = &["iss", "aud", "iat", "exp", "jti"];

fn jar_error(code: &'static str, message: impl Into<String>) -> DomainError {
    DomainError::invalid_argument(code, message)
}

fn parse_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        "EdDSA" => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Always rejected (spec.md §9 Open Question (c)): the `request_uri` form
/// requires fetching the assertion from a third party, which this crate does
/// not yet do.
///
/// TODO: implement `request_uri` fetching behind a host allow-list.
pub fn reject_request_uri() -> DomainError {
    jar_error("JAR-014", "request_uri is not supported; pass the assertion via request instead")
}

/// Runs the full six-step JAR validation algorithm (spec.md §4.6).
#[tracing::instrument(skip_all, fields(expected_client_id = %config.expected_client_id), err)]
pub fn validate_request_jwt(jwt: &str, config: &JarConfig, public_key: Option<&DecodingKey>, now: DateTime<Utc>) -> Result<JarRequest, DomainError> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        return Err(jar_error("JAR-000", "request JWT must have exactly three dot-separated parts"));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|_| jar_error("JAR-000", "request JWT header is not valid base64url"))?;
    let header: Header =
        serde_json::from_slice(&header_bytes).map_err(|_| jar_error("JAR-000", "request JWT header is not valid JSON"))?;

    let claims: Value = if header.alg == "none" {
        if config.require_signature {
            return Err(jar_error("JAR-001", "alg=none is not accepted when signatures are required"));
        }
        let payload_bytes = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|_| jar_error("JAR-000", "request JWT payload is not valid base64url"))?;
        serde_json::from_slice(&payload_bytes).map_err(|_| jar_error("JAR-000", "request JWT payload is not valid JSON"))?
    } else {
        let key = match public_key {
            Some(key) => key,
            None => return Err(jar_error("JAR-002", "no public key supplied to verify a signed request JWT")),
        };

        let algorithm = parse_algorithm(&header.alg).ok_or_else(|| jar_error("JAR-013", "unsupported signature algorithm"))?;
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let decoded = jsonwebtoken::decode::<Value>(jwt, key, &validation)
            .map_err(|_| jar_error("JAR-013", "request JWT signature verification failed"))?;
        decoded.claims
    };

    let iss = claims.get("iss").and_then(Value::as_str).ok_or_else(|| jar_error("JAR-003", "request JWT is missing iss"))?;
    if iss != config.expected_client_id {
        return Err(jar_error("JAR-004", "request JWT iss does not match the expected client id"));
    }

    let aud_values = claims.get("aud").ok_or_else(|| jar_error("JAR-005", "request JWT is missing aud"))?;
    let aud_matches = match aud_values {
        Value::String(s) => s == &config.expected_audience,
        Value::Array(values) => values.iter().any(|v| v.as_str() == Some(config.expected_audience.as_str())),
        _ => false,
    };
    if !aud_matches {
        return Err(jar_error("JAR-006", "request JWT aud does not include the expected audience"));
    }

    let iat = claims.get("iat").and_then(Value::as_i64).ok_or_else(|| jar_error("JAR-007", "request JWT is missing iat"))?;
    let now_ts = now.timestamp();
    if iat > now_ts {
        return Err(jar_error("JAR-008", "request JWT iat is in the future"));
    }
    if now_ts - iat > config.max_age {
        return Err(jar_error("JAR-009", "request JWT is older than the maximum allowed age"));
    }

    if let Some(exp) = claims.get("exp").and_then(Value::as_i64) {
        if now_ts >= exp {
            return Err(jar_error("JAR-010", "request JWT has expired"));
        }
    }

    let response_type = claims
        .get("response_type")
        .and_then(Value::as_str)
        .ok_or_else(|| jar_error("JAR-011", "request JWT is missing response_type"))?
        .to_string();
    let redirect_uri = claims
        .get("redirect_uri")
        .and_then(Value::as_str)
        .ok_or_else(|| jar_error("JAR-012", "request JWT is missing redirect_uri"))?
        .to_string();
    let client_id = claims.get("client_id").and_then(Value::as_str).unwrap_or(iss).to_string();

    let extra = claims
        .as_object()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|(key, _)| !JWT_ONLY_CLAIMS.contains(&key.as_str()))
        .filter(|(key, _)| !["response_type", "redirect_uri", "client_id"].contains(&key.as_str()))
        .collect();

    Ok(JarRequest { client_id, response_type, redirect_uri, extra })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn unsigned_jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none"}).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.")
    }

    fn config() -> JarConfig {
        JarConfig {
            expected_client_id: "c1".to_string(),
            expected_audience: "https://idp/".to_string(),
            max_age: JarConfig::DEFAULT_MAX_AGE,
            require_signature: false,
        }
    }

    #[test]
    fn valid_request_extracts_oauth_parameters() {
        let now = Utc::now();
        let claims = json!({
            "iss": "c1",
            "aud": ["https://idp/"],
            "iat": (now - Duration::seconds(100)).timestamp(),
            "response_type": "code",
            "redirect_uri": "https://app/cb",
        });
        let jwt = unsigned_jwt(&claims);

        let request = validate_request_jwt(&jwt, &config(), None, now).unwrap();
        assert_eq!(request.response_type, "code");
        assert_eq!(request.redirect_uri, "https://app/cb");
        assert_eq!(request.client_id, "c1");
    }

    #[test]
    fn mismatched_issuer_is_jar_004() {
        let now = Utc::now();
        let claims = json!({
            "iss": "c2",
            "aud": ["https://idp/"],
            "iat": (now - Duration::seconds(100)).timestamp(),
            "response_type": "code",
            "redirect_uri": "https://app/cb",
        });
        let jwt = unsigned_jwt(&claims);

        let err = validate_request_jwt(&jwt, &config(), None, now).unwrap_err();
        assert_eq!(err.code, "JAR-004");
    }

    #[test]
    fn missing_response_type_is_jar_011() {
        let now = Utc::now();
        let claims = json!({
            "iss": "c1",
            "aud": ["https://idp/"],
            "iat": (now - Duration::seconds(100)).timestamp(),
            "redirect_uri": "https://app/cb",
        });
        let jwt = unsigned_jwt(&claims);

        let err = validate_request_jwt(&jwt, &config(), None, now).unwrap_err();
        assert_eq!(err.code, "JAR-011");
    }

    #[test]
    fn too_few_parts_is_jar_000() {
        let err = validate_request_jwt("not-a-jwt", &config(), None, Utc::now()).unwrap_err();
        assert_eq!(err.code, "JAR-000");
    }

    #[test]
    fn stale_iat_beyond_max_age_is_jar_009() {
        let now = Utc::now();
        let claims = json!({
            "iss": "c1",
            "aud": ["https://idp/"],
            "iat": (now - Duration::seconds(7200)).timestamp(),
            "response_type": "code",
            "redirect_uri": "https://app/cb",
        });
        let jwt = unsigned_jwt(&claims);

        let err = validate_request_jwt(&jwt, &config(), None, now).unwrap_err();
        assert_eq!(err.code, "JAR-009");
    }

    #[test]
    fn alg_none_is_rejected_when_signatures_are_required() {
        let now = Utc::now();
        let claims = json!({
            "iss": "c1",
            "aud": ["https://idp/"],
            "iat": now.timestamp(),
            "response_type": "code",
            "redirect_uri": "https://app/cb",
        });
        let jwt = unsigned_jwt(&claims);

        let mut strict = config();
        strict.require_signature = true;
        let err = validate_request_jwt(&jwt, &strict, None, now).unwrap_err();
        assert_eq!(err.code, "JAR-001");
    }

    #[test]
    fn request_uri_is_always_rejected_with_jar_014() {
        assert_eq!(reject_request_uri().code, "JAR-014");
    }
}
