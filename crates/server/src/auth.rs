//! Bearer token validation.
//!
//! The quota engine only cares whether a presented token is a valid
//! credential; issuance and revocation live in a separate system. An
//! invalid token is not an error anywhere in the request path, it just
//! demotes the caller to address-based identity.

use jwt_compact::{
    AlgorithmExt, Token, UntrustedToken,
    alg::{Hs512, Hs512Key},
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use config::AuthConfig;

/// Collaborator interface for credential validation.
pub trait TokenValidator: Send + Sync {
    /// Whether `token` is a valid credential.
    fn is_valid(&self, token: &str) -> bool;
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TokenClaims {
    #[serde(rename = "iss")]
    pub(crate) issuer: String,
}

/// Validates HS512-signed JWTs against the configured secret and issuer.
pub struct JwtValidator {
    key: Hs512Key,
    issuer: String,
}

impl JwtValidator {
    /// Build a validator from the auth configuration.
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            key: Hs512Key::new(config.secret.expose_secret().as_bytes()),
            issuer: config.issuer.clone(),
        }
    }
}

impl TokenValidator for JwtValidator {
    fn is_valid(&self, token: &str) -> bool {
        let Ok(untrusted) = UntrustedToken::new(token) else {
            return false;
        };

        let validated: Result<Token<TokenClaims>, _> = Hs512.validator(&self.key).validate(&untrusted);

        match validated {
            Ok(token) => token.claims().custom.issuer == self.issuer,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jwt_compact::{Claims, Header};
    use secrecy::SecretString;

    fn auth_config(secret: &str) -> AuthConfig {
        AuthConfig {
            secret: SecretString::from(secret),
            issuer: "petal".to_string(),
        }
    }

    fn sign(secret: &str, issuer: &str) -> String {
        let key = Hs512Key::new(secret.as_bytes());
        let claims = Claims::new(TokenClaims {
            issuer: issuer.to_string(),
        });

        Hs512.token(&Header::empty(), &claims, &key).unwrap()
    }

    #[test]
    fn accepts_a_correctly_signed_token() {
        let validator = JwtValidator::new(&auth_config("hunter2"));
        let token = sign("hunter2", "petal");

        assert!(validator.is_valid(&token));
    }

    #[test]
    fn rejects_a_token_signed_with_another_secret() {
        let validator = JwtValidator::new(&auth_config("hunter2"));
        let token = sign("not-hunter2", "petal");

        assert!(!validator.is_valid(&token));
    }

    #[test]
    fn rejects_a_token_from_another_issuer() {
        let validator = JwtValidator::new(&auth_config("hunter2"));
        let token = sign("hunter2", "someone-else");

        assert!(!validator.is_valid(&token));
    }

    #[test]
    fn rejects_garbage_without_panicking() {
        let validator = JwtValidator::new(&auth_config("hunter2"));

        assert!(!validator.is_valid("not even close to a jwt"));
        assert!(!validator.is_valid(""));
    }
}
