//! JWT Token Handler
//! Mission: Issue and verify HS256 tokens against an explicit clock

use crate::auth::models::{Claims, Role};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use tracing::debug;

/// Default lifetime of an issued token.
pub const DEFAULT_TTL_HOURS: i64 = 72;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// What a successfully verified token proves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject_id: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// JWT Handler for token operations
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtHandler {
    /// Create a handler bound to `secret`. The secret is never mutated afterwards.
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the caller's clock in `verify`.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `subject_id` valid from `now` until `now + ttl`.
    ///
    /// `role` is carried for debugging only; it is never trusted on the way back in.
    pub fn issue(
        &self,
        subject_id: i64,
        role: Option<Role>,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let claims = Claims {
            sub: subject_id.to_string(),
            role,
            iat,
            exp: iat + self.ttl.num_seconds(),
        };

        debug!(
            "Issuing JWT for user {}, expires in {}h",
            subject_id,
            self.ttl.num_hours()
        );

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Check structure, signature and expiry of `token` as of `now`.
    ///
    /// There is no clock-skew allowance: the token is accepted up to and
    /// including `exp`, and rejected from the next second on.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken, TokenError> {
        let decoded = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            },
        )?;
        let claims = decoded.claims;

        let subject_id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| TokenError::Malformed)?;
        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::Malformed)?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::Malformed)?;

        if now > expires_at {
            return Err(TokenError::Expired);
        }

        Ok(VerifiedToken {
            subject_id,
            issued_at,
            expires_at,
        })
    }
}

/// Extract the token from an `Authorization` header value.
///
/// Only the literal form `Bearer <token>` is accepted.
pub fn parse_bearer(header: &str) -> Result<&str, TokenError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(TokenError::Malformed)?;
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(TokenError::Malformed);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn handler() -> JwtHandler {
        JwtHandler::new("test-secret-key-12345", Duration::hours(DEFAULT_TTL_HOURS))
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let handler = handler();
        let token = handler.issue(42, Some(Role::User), t0()).unwrap();
        assert!(!token.is_empty());

        let verified = handler.verify(&token, t0()).unwrap();
        assert_eq!(verified.subject_id, 42);
        assert_eq!(verified.issued_at, t0());
        assert_eq!(verified.expires_at, t0() + Duration::hours(72));
    }

    #[test]
    fn test_expiry_boundary() {
        let handler = handler();
        let token = handler.issue(7, Some(Role::Admin), t0()).unwrap();

        let just_before = t0() + Duration::hours(71) + Duration::minutes(59);
        assert!(handler.verify(&token, just_before).is_ok());

        let at_expiry = t0() + Duration::hours(72);
        assert!(handler.verify(&token, at_expiry).is_ok());

        let one_milli_late = at_expiry + Duration::milliseconds(1);
        assert_eq!(handler.verify(&token, one_milli_late), Err(TokenError::Expired));

        let half_second_late = at_expiry + Duration::milliseconds(500);
        assert_eq!(handler.verify(&token, half_second_late), Err(TokenError::Expired));

        let one_second_late = at_expiry + Duration::seconds(1);
        assert_eq!(handler.verify(&token, one_second_late), Err(TokenError::Expired));

        let just_after = t0() + Duration::hours(72) + Duration::minutes(1);
        assert_eq!(handler.verify(&token, just_after), Err(TokenError::Expired));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let handler = handler();
        let token = handler.issue(1, None, t0()).unwrap();

        // Flip every character of the signature segment in turn.
        let sig_start = token.rfind('.').unwrap() + 1;
        for i in sig_start..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert_eq!(
                handler.verify(&tampered, t0()),
                Err(TokenError::BadSignature),
                "tampered byte {i} must not verify"
            );
        }
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let handler = handler();
        let token = handler.issue(1, Some(Role::User), t0()).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let forged_claims = URL_SAFE_NO_PAD.encode(format!(
            r#"{{"sub":"1","role":"admin","iat":{},"exp":{}}}"#,
            t0().timestamp(),
            t0().timestamp() + 3600
        ));
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);

        assert_eq!(handler.verify(&forged, t0()), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_different_secrets_reject() {
        let issuer = JwtHandler::new("secret1", Duration::hours(72));
        let verifier = JwtHandler::new("secret2", Duration::hours(72));

        let token = issuer.issue(3, None, t0()).unwrap();
        assert_eq!(verifier.verify(&token, t0()), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let handler = handler();

        assert_eq!(handler.verify("", t0()), Err(TokenError::Malformed));
        assert_eq!(handler.verify("invalid", t0()), Err(TokenError::Malformed));
        assert_eq!(
            handler.verify("invalid.token.here", t0()),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_non_numeric_subject_is_malformed() {
        let handler = handler();
        let claims = Claims {
            sub: "not-a-number".to_string(),
            role: None,
            iat: t0().timestamp(),
            exp: t0().timestamp() + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-12345"),
        )
        .unwrap();

        assert_eq!(handler.verify(&token, t0()), Err(TokenError::Malformed));
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc.def.ghi"), Ok("abc.def.ghi"));

        assert_eq!(parse_bearer("abc.def.ghi"), Err(TokenError::Malformed));
        assert_eq!(parse_bearer("bearer abc"), Err(TokenError::Malformed));
        assert_eq!(parse_bearer("Bearer "), Err(TokenError::Malformed));
        assert_eq!(parse_bearer("Bearer  abc"), Err(TokenError::Malformed));
        assert_eq!(parse_bearer("Bearer abc def"), Err(TokenError::Malformed));
        assert_eq!(parse_bearer("Basic dXNlcjpwYXNz"), Err(TokenError::Malformed));
    }
}
