//! HS256 identity provider with deterministic per-identity keys.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{FactorKey, keccak256};
use crate::network::{AuthResult, IdentityProvider, LoginCredentials, SessionTokenData};

const ISSUER: &str = "simulated-identity";
const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
struct IdTokenClaims {
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
}

pub struct SimulatedIdentity {
    jwt_secret: [u8; 32],
    node_count: usize,
}

impl SimulatedIdentity {
    pub fn new(node_count: usize) -> Self {
        let mut jwt_secret = [0u8; 32];
        OsRng.fill_bytes(&mut jwt_secret);
        Self { jwt_secret, node_count }
    }

    /// Issue an id token for `sub` that this provider accepts.
    pub fn issue_id_token(&self, sub: &str) -> CoreKitResult<String> {
        let now = Utc::now().timestamp();
        let claims = IdTokenClaims {
            sub: sub.to_string(),
            iss: ISSUER.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.jwt_secret),
        )?)
    }

    fn verify_id_token(&self, id_token: &str) -> CoreKitResult<IdTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["sub", "exp"]);
        let data = jsonwebtoken::decode::<IdTokenClaims>(
            id_token,
            &DecodingKey::from_secret(&self.jwt_secret),
            &validation,
        )?;
        Ok(data.claims)
    }

    /// The nodes derive the same key for the same identity on every login.
    fn oauth_key(&self, verifier: &str, verifier_id: &str) -> CoreKitResult<FactorKey> {
        let mut seed = Vec::with_capacity(verifier.len() + verifier_id.len() + 34);
        seed.extend_from_slice(verifier.as_bytes());
        seed.push(0x1f);
        seed.extend_from_slice(verifier_id.as_bytes());
        seed.push(0x1f);
        seed.extend_from_slice(&self.jwt_secret);
        FactorKey::from_keccak_seed(&seed)
    }

    fn session_tokens(&self) -> Vec<SessionTokenData> {
        (0..self.node_count)
            .map(|_| {
                let mut token = [0u8; 32];
                OsRng.fill_bytes(&mut token);
                let mut signed = token.to_vec();
                signed.extend_from_slice(&self.jwt_secret);
                SessionTokenData {
                    token: hex::encode(token),
                    signature: hex::encode(keccak256(&signed)),
                }
            })
            .collect()
    }
}

#[async_trait]
impl IdentityProvider for SimulatedIdentity {
    async fn authenticate(&self, credentials: &LoginCredentials) -> CoreKitResult<AuthResult> {
        let verifier_id = match credentials {
            LoginCredentials::OAuth(params) => {
                if params.client_id.is_empty() {
                    return Err(CoreKitError::Authentication("client id is required".to_string()));
                }
                params
                    .jwt_params
                    .get("login_hint")
                    .cloned()
                    .unwrap_or_else(|| format!("{:?}-user", params.login_provider).to_lowercase())
            }
            LoginCredentials::IdToken(params) => {
                let claims = self.verify_id_token(&params.id_token)?;
                if claims.sub != params.verifier_id {
                    return Err(CoreKitError::Authentication(
                        "verifier id does not match token subject".to_string(),
                    ));
                }
                claims.sub
            }
        };
        let verifier = credentials.verifier().to_string();

        let oauth_key = self.oauth_key(&verifier, &verifier_id)?;
        tracing::debug!(%verifier, "Simulated identity authenticated");
        Ok(AuthResult {
            oauth_key: oauth_key.to_hex(),
            verifier,
            verifier_id,
            session_tokens: self.session_tokens(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdTokenLoginParams;

    fn id_token_credentials(verifier_id: &str, id_token: String) -> LoginCredentials {
        LoginCredentials::IdToken(IdTokenLoginParams {
            verifier: "torus-test-health".to_string(),
            verifier_id: verifier_id.to_string(),
            id_token,
            sub_verifier: None,
            additional_params: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_same_identity_same_key() {
        let identity = SimulatedIdentity::new(3);
        let token = identity.issue_id_token("alice@example.com").unwrap();

        let first = identity
            .authenticate(&id_token_credentials("alice@example.com", token.clone()))
            .await
            .unwrap();
        let second = identity
            .authenticate(&id_token_credentials("alice@example.com", token))
            .await
            .unwrap();

        assert_eq!(first.oauth_key, second.oauth_key);
        assert_eq!(first.session_tokens.len(), 3);
        assert_ne!(first.session_tokens[0].token, second.session_tokens[0].token);
    }

    #[tokio::test]
    async fn test_rejects_foreign_token() {
        let identity = SimulatedIdentity::new(3);
        let other = SimulatedIdentity::new(3);
        let token = other.issue_id_token("alice@example.com").unwrap();

        let result = identity
            .authenticate(&id_token_credentials("alice@example.com", token))
            .await;
        assert!(matches!(result, Err(CoreKitError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_rejects_subject_mismatch() {
        let identity = SimulatedIdentity::new(3);
        let token = identity.issue_id_token("alice@example.com").unwrap();

        let result = identity
            .authenticate(&id_token_credentials("bob@example.com", token))
            .await;
        assert!(matches!(result, Err(CoreKitError::Authentication(_))));
    }
}
