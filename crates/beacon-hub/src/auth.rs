//! Token minting and verification, plus the ed25519 signature check used
//! by the login endpoint.
//!
//! The realtime core only depends on the `TokenVerifier` trait; HS256 JWTs
//! are one implementation of it.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// What the realtime core learns from a verified token.
#[derive(Debug, Clone)]
pub struct TokenClaims {
    pub user_id: String,
}

/// Opaque token boundary: the hub never inspects tokens beyond this call.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<TokenClaims>;
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
    jti: String,
}

pub struct TokenService {
    secret: String,
    expiry: Duration,
    issuer: String,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, expiry: Duration, issuer: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expiry,
            issuer: issuer.into(),
        }
    }

    pub fn create_token(&self, user_id: &str) -> Result<String> {
        if self.secret.is_empty() {
            bail!("missing secret");
        }
        if user_id.is_empty() {
            bail!("missing userID");
        }
        if self.expiry.is_zero() {
            bail!("invalid expiry");
        }

        let now = crate::store::now_millis() / 1000;
        let jti: [u8; 16] = rand::random();
        let claims = JwtClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.expiry.as_secs() as i64,
            jti: hex(&jti),
        };

        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("sign token")
    }
}

impl TokenVerifier for TokenService {
    fn verify(&self, token: &str) -> Result<TokenClaims> {
        if self.secret.is_empty() {
            bail!("missing secret");
        }

        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<JwtClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .context("invalid token")?;

        if data.claims.sub.is_empty() {
            bail!("invalid token");
        }
        Ok(TokenClaims {
            user_id: data.claims.sub,
        })
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Verify a base64 ed25519 signature over a base64 challenge. Error
/// messages surface verbatim in the login response.
pub fn verify_signature(public_key_b64: &str, challenge_b64: &str, signature_b64: &str) -> Result<()> {
    let public_key = BASE64
        .decode(public_key_b64)
        .ok()
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .and_then(|bytes| VerifyingKey::from_bytes(&bytes).ok());
    let Some(public_key) = public_key else {
        bail!("Invalid public key");
    };

    let challenge = BASE64.decode(challenge_b64).unwrap_or_default();
    if challenge.is_empty() {
        bail!("Invalid signature");
    }

    let signature = BASE64
        .decode(signature_b64)
        .ok()
        .and_then(|bytes| <[u8; 64]>::try_from(bytes).ok())
        .map(|bytes| Signature::from_bytes(&bytes));
    let Some(signature) = signature else {
        bail!("Invalid signature");
    };

    if public_key.verify(&challenge, &signature).is_err() {
        bail!("Invalid signature");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn service() -> TokenService {
        TokenService::new("secret", Duration::from_secs(3600), "beacon-test")
    }

    #[test]
    fn token_round_trips() {
        let svc = service();
        let token = svc.create_token("user-1").unwrap();
        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.user_id, "user-1");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = service().create_token("user-1").unwrap();
        let other = TokenService::new("other", Duration::from_secs(3600), "beacon-test");
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = TokenService::new("secret", Duration::from_secs(1), "beacon-test");
        let now = crate::store::now_millis() / 1000;
        let claims = JwtClaims {
            sub: "user-1".into(),
            iss: "beacon-test".into(),
            iat: now - 7200,
            exp: now - 3600,
            jti: "j".into(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(svc.verify(&token).is_err());
    }

    #[test]
    fn create_token_validates_inputs() {
        assert!(service().create_token("").is_err());
        let empty = TokenService::new("", Duration::from_secs(10), "i");
        assert!(empty.create_token("u").is_err());
    }

    #[test]
    fn signature_verifies() {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let challenge = b"challenge-bytes";
        let signature = key.sign(challenge);

        let pk = BASE64.encode(key.verifying_key().as_bytes());
        let ch = BASE64.encode(challenge);
        let sig = BASE64.encode(signature.to_bytes());

        assert!(verify_signature(&pk, &ch, &sig).is_ok());

        // A flipped challenge fails.
        let other = BASE64.encode(b"other-bytes");
        let err = verify_signature(&pk, &other, &sig).unwrap_err();
        assert_eq!(err.to_string(), "Invalid signature");

        // Malformed key fails with its own message.
        let err = verify_signature("@@@", &ch, &sig).unwrap_err();
        assert_eq!(err.to_string(), "Invalid public key");
    }
}
