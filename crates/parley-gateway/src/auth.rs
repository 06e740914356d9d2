use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use parley_types::SyncError;
use parley_types::api::Claims;

/// Validates bearer tokens minted by the external auth service. Shared by the
/// WebSocket `Connect` step and the REST middleware.
#[derive(Clone)]
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, SyncError> {
        let token = token.trim();
        // header.payload.signature, all non-empty
        if token.split('.').count() != 3 || token.split('.').any(str::is_empty) {
            return Err(SyncError::Auth("malformed token".into()));
        }

        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SyncError::Auth("token expired".into()),
                ErrorKind::InvalidSignature => SyncError::Auth("bad token signature".into()),
                _ => SyncError::Auth(format!("invalid token: {}", e)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    fn token(secret: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "alice".into(),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let validator = TokenValidator::new("s3cret");
        let claims = validator.validate(&token("s3cret", 3600)).unwrap();
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn rejects_expired_token() {
        let validator = TokenValidator::new("s3cret");
        let err = validator.validate(&token("s3cret", -3600)).unwrap_err();
        assert_eq!(err, SyncError::Auth("token expired".into()));
    }

    #[test]
    fn rejects_wrong_signature() {
        let validator = TokenValidator::new("s3cret");
        let err = validator.validate(&token("other", 3600)).unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }

    #[test]
    fn rejects_malformed_token() {
        let validator = TokenValidator::new("s3cret");
        for bad in ["", "abc", "a.b", "a..c", "not.a.jwt"] {
            assert!(matches!(validator.validate(bad), Err(SyncError::Auth(_))), "{bad}");
        }
    }
}
