//! Connection gate: turns a bearer credential into a verified identity before a
//! channel is admitted.

use axum::http::{HeaderMap, Uri, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;

/// Query parameter accepted when the client cannot set headers (browser WebSockets).
const TOKEN_QUERY_PARAM: &str = "token";
const BEARER_PREFIX: &str = "Bearer ";

/// Identity attached to an admitted channel. Commands never carry their own identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("invalid bearer credential: {0}")]
    InvalidCredential(String),
}

/// Validates credentials presented at connection time.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, GateError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    name: Option<String>,
}

/// HMAC-SHA256 signed JWT verifier. `exp` is mandatory.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, GateError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|err| GateError::InvalidCredential(err.to_string()))?;
        let claims = data.claims;

        let user_id = claims.sub.trim().to_owned();
        if user_id.is_empty() {
            return Err(GateError::InvalidCredential("empty subject".into()));
        }
        let display_name = claims
            .name
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| user_id.clone());

        Ok(Identity {
            user_id,
            display_name,
        })
    }
}

/// Extract the raw credential from `Authorization: Bearer …` or the `token` query parameter.
pub fn credential_from_request(headers: &HeaderMap, uri: &Uri) -> Result<String, GateError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| GateError::InvalidCredential("authorization header is not ASCII".into()))?;
        let token = value
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GateError::InvalidCredential("authorization header is not a bearer token".into())
            })?;
        return Ok(token.to_owned());
    }

    uri.query()
        .into_iter()
        .flat_map(|query| query.split('&'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.to_owned())
        .filter(|token| !token.is_empty())
        .ok_or(GateError::MissingCredential)
}

/// Run the full gate: extract the credential and verify it.
pub fn admit(
    verifier: &dyn IdentityVerifier,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Identity, GateError> {
    let token = credential_from_request(headers, uri)?;
    verifier.verify(&token)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;

    const SECRET: &str = "test-secret";

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn token(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_identity() {
        let verifier = JwtVerifier::new(SECRET);
        let jwt = token(
            json!({"sub": "u-1", "name": "Alice", "exp": now() + 600}),
            SECRET,
        );
        assert_eq!(
            verifier.verify(&jwt),
            Ok(Identity {
                user_id: "u-1".into(),
                display_name: "Alice".into()
            })
        );
    }

    #[test]
    fn display_name_falls_back_to_subject() {
        let verifier = JwtVerifier::new(SECRET);
        let jwt = token(json!({"sub": "u-2", "exp": now() + 600}), SECRET);
        assert_eq!(verifier.verify(&jwt).unwrap().display_name, "u-2");
    }

    #[test]
    fn expired_or_foreign_tokens_are_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let expired = token(json!({"sub": "u-1", "exp": now() - 3600}), SECRET);
        assert!(matches!(
            verifier.verify(&expired),
            Err(GateError::InvalidCredential(_))
        ));

        let foreign = token(json!({"sub": "u-1", "exp": now() + 600}), "other");
        assert!(matches!(
            verifier.verify(&foreign),
            Err(GateError::InvalidCredential(_))
        ));

        let no_exp = token(json!({"sub": "u-1"}), SECRET);
        assert!(verifier.verify(&no_exp).is_err());
    }

    #[test]
    fn credential_is_read_from_header_then_query() {
        let mut headers = HeaderMap::new();
        let uri: Uri = "/ws?token=from-query".parse().unwrap();
        assert_eq!(
            credential_from_request(&headers, &uri).unwrap(),
            "from-query"
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            credential_from_request(&headers, &uri).unwrap(),
            "from-header"
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            credential_from_request(&headers, &uri),
            Err(GateError::InvalidCredential(_))
        ));
    }

    #[test]
    fn missing_credential_is_reported() {
        let uri: Uri = "/ws".parse().unwrap();
        assert_eq!(
            credential_from_request(&HeaderMap::new(), &uri),
            Err(GateError::MissingCredential)
        );
    }
}
