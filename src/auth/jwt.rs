//! JWT verification against the external auth provider.
//!
//! Tokens are minted upstream; this service shares the HS256 secret and
//! only verifies. No password handling lives here.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::types::{AppError, Claims, Result};

/// Verifies bearer tokens issued by the auth provider.
pub struct AuthVerifier {
    jwt_secret: String,
}

impl AuthVerifier {
    /// Create a verifier with the shared secret.
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    /// Verify a token and return its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| AppError::Unauthenticated(format!("invalid token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserRole;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-key-that-is-at-least-32-chars";

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(role: UserRole) -> Claims {
        let now = chrono::Utc::now().timestamp() as usize;
        Claims {
            sub: "user-1".to_string(),
            email: "user@example.com".to_string(),
            role,
            exp: now + 900,
            iat: now,
        }
    }

    #[test]
    fn test_verify_round_trip() {
        let verifier = AuthVerifier::new(SECRET.to_string());
        let token = sign(&claims(UserRole::Premium), SECRET);

        let verified = verifier.verify_token(&token).unwrap();
        assert_eq!(verified.sub, "user-1");
        assert_eq!(verified.role, UserRole::Premium);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = AuthVerifier::new(SECRET.to_string());
        let token = sign(&claims(UserRole::User), "another-secret-of-sufficient-length");
        assert!(verifier.verify_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = AuthVerifier::new(SECRET.to_string());
        let now = chrono::Utc::now().timestamp() as usize;
        let expired = Claims {
            exp: now - 120,
            iat: now - 1000,
            ..claims(UserRole::User)
        };
        let token = sign(&expired, SECRET);
        assert!(verifier.verify_token(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let verifier = AuthVerifier::new(SECRET.to_string());
        assert!(verifier.verify_token("not.a.token").is_err());
    }
}
