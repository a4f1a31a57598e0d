use crate::schemas::MemberKey;
use actix_web::{http::header::HeaderValue, HttpRequest};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::ParseIntError;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: MemberKey,
    pub email_verified: bool,
}

#[derive(Debug, PartialEq)]
pub enum AuthorizationLevel {
    Service,
    Member(Identity),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("identity assertion is not valid JSON")]
    Malformed,
    #[error("identity assertion hash is not hex")]
    BadEncoding,
    #[error("identity assertion signature mismatch")]
    BadSignature,
}

/// What the identity provider bridge puts in the `Authorization` header.
#[derive(Deserialize, Serialize, Debug, Clone)]
struct IdentityAssertion {
    uid: String,
    email: String,
    email_verified: bool,
    auth_date: String,
    hash: String,
}

pub fn check_authorization_level(
    request: &HttpRequest,
    secret: &str,
    service_token: Option<&str>,
) -> Result<AuthorizationLevel, AuthError> {
    let authorization = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)
        .and_then(Result::ok)
        .ok_or(AuthError::Missing)?;
    if service_token.is_some_and(|token| token == authorization) {
        return Ok(AuthorizationLevel::Service);
    }
    let assertion: IdentityAssertion =
        serde_json::from_str(authorization).map_err(|_| AuthError::Malformed)?;
    let hash = from_hex(&assertion.hash).map_err(|_| AuthError::BadEncoding)?;

    let mut verifier = keyed_hmac(secret);
    verifier.update(data_check_string(&assertion).as_bytes());
    verifier
        .verify_slice(&hash)
        .map_err(|_| AuthError::BadSignature)?;

    Ok(AuthorizationLevel::Member(Identity {
        uid: assertion.uid,
        email: assertion.email,
        email_verified: assertion.email_verified,
    }))
}

/// Builds a signed header value for `identity`. Used by the identity bridge
/// and by tests.
pub fn sign_identity(identity: &Identity, auth_date: &str, secret: &str) -> String {
    let mut assertion = IdentityAssertion {
        uid: identity.uid.clone(),
        email: identity.email.clone(),
        email_verified: identity.email_verified,
        auth_date: auth_date.to_owned(),
        hash: String::new(),
    };
    assertion.hash = to_hex(&compute_hash(data_check_string(&assertion).as_bytes(), secret));
    serde_json::to_string(&assertion).unwrap_or_default()
}

fn data_check_string(assertion: &IdentityAssertion) -> String {
    let hash_content = vec![
        ("auth_date", assertion.auth_date.clone()),
        ("email", assertion.email.clone()),
        ("email_verified", assertion.email_verified.to_string()),
        ("uid", assertion.uid.clone()),
    ]
    .into_iter()
    .map(|(key, value)| format!("{}={}", key, value))
    .collect::<Vec<_>>();
    hash_content.join("\n")
}

/// The HMAC key is the SHA-256 of the shared secret, never the secret itself.
pub(crate) fn keyed_hmac(secret: &str) -> HmacSha256 {
    let mut sha256_hasher = Sha256::new();
    sha256_hasher.update(secret.as_bytes());
    let secret_hash = sha256_hasher.finalize();
    HmacSha256::new_from_slice(&secret_hash).expect("HMAC accepts keys of any length")
}

pub(crate) fn compute_hash(content: &[u8], secret: &str) -> Vec<u8> {
    let mut hmac_hasher = keyed_hmac(secret);
    hmac_hasher.update(content);
    hmac_hasher.finalize().into_bytes().to_vec()
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

pub(crate) fn from_hex(text: &str) -> Result<Vec<u8>, ParseIntError> {
    text.chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|n| u8::from_str_radix(&String::from_iter(n), 16))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    const SECRET: &str = "test-secret";

    fn ana() -> Identity {
        Identity {
            uid: "u-1".into(),
            email: "ana@example.com".into(),
            email_verified: true,
        }
    }

    fn request_with(header: &str) -> HttpRequest {
        TestRequest::default()
            .insert_header((actix_web::http::header::AUTHORIZATION, header))
            .to_http_request()
    }

    #[test]
    fn signed_identity_is_accepted() {
        let header = sign_identity(&ana(), "1700000000", SECRET);
        assert_eq!(
            check_authorization_level(&request_with(&header), SECRET, None),
            Ok(AuthorizationLevel::Member(ana()))
        );
    }

    #[test]
    fn tampered_identity_is_rejected() {
        let header = sign_identity(&ana(), "1700000000", SECRET)
            .replace("ana@example.com", "mallory@example.com");
        assert_eq!(
            check_authorization_level(&request_with(&header), SECRET, None),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn other_secret_is_rejected() {
        let header = sign_identity(&ana(), "1700000000", "other");
        assert_eq!(
            check_authorization_level(&request_with(&header), SECRET, None),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn service_token_is_recognised() {
        assert_eq!(
            check_authorization_level(&request_with("ocr-token"), SECRET, Some("ocr-token")),
            Ok(AuthorizationLevel::Service)
        );
        assert_eq!(
            check_authorization_level(&request_with("ocr-token"), SECRET, None),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn missing_header() {
        let request = TestRequest::default().to_http_request();
        assert_eq!(
            check_authorization_level(&request, SECRET, None),
            Err(AuthError::Missing)
        );
    }

    #[test]
    fn hex_round_trip() {
        assert_eq!(from_hex(&to_hex(&[0, 15, 255])), Ok(vec![0, 15, 255]));
        assert!(from_hex("zz").is_err());
    }
}
