//! Login orchestration: authentication, topology, threshold key, and the
//! new-user / existing-user branch.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, Validation};
use serde_json::{Map, Value};
use url::Url;
use zeroize::Zeroizing;

use super::{LoginSession, MpcCoreKit};
use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{FactorKey, hash_factor_key};
use crate::network::{AuthResult, LoginCredentials, NodeDetails, SessionTokenData, ThresholdKeyParams};
use crate::state::AppState;
use crate::storage::FactorStorage;
use crate::types::{
    DEFAULT_TSS_TAG, FactorDescription, FactorDescriptionModule, IdTokenLoginParams, KeyDetails,
    LoginProvider, OAuthLoginParams, SERVICE_PROVIDER_SHARE_INDEX, SessionState, TssShareType,
};

/// Decode the claims of a JWT without verifying its signature or lifetime.
pub fn parse_token(jwt: &str) -> CoreKitResult<Map<String, Value>> {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let header = jsonwebtoken::decode_header(jwt)?;
    validation.algorithms = vec![header.alg];

    let data = jsonwebtoken::decode::<Map<String, Value>>(jwt, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Metadata service lives on the host of the first node endpoint.
pub(crate) fn metadata_endpoint(node_details: &NodeDetails) -> CoreKitResult<String> {
    let first = node_details
        .torus_node_endpoints
        .first()
        .ok_or_else(|| CoreKitError::TopologyResolution("no node endpoints returned".to_string()))?;
    let url = Url::parse(first).map_err(|e| CoreKitError::InvalidEndpoint(format!("{first}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| CoreKitError::InvalidEndpoint(format!("{first}: missing host")))?;
    Ok(format!("https://{host}/metadata"))
}

/// One JSON string per node: `{"data": base64(token), "sig": signature}`.
pub(crate) fn session_signatures(tokens: &[SessionTokenData]) -> CoreKitResult<Vec<String>> {
    tokens
        .iter()
        .map(|token| {
            let data = hex::decode(token.token.trim_start_matches("0x"))?;
            let payload = serde_json::json!({
                "data": BASE64.encode(data),
                "sig": token.signature,
            });
            Ok(serde_json::to_string(&payload)?)
        })
        .collect()
}

impl MpcCoreKit {
    /// Log in through an OAuth provider.
    pub async fn login_with_oauth(&mut self, params: OAuthLoginParams) -> CoreKitResult<KeyDetails> {
        if params.login_provider == LoginProvider::Jwt && params.jwt_params.is_empty() {
            return Err(CoreKitError::Authentication(
                "jwt login should provide jwt params".to_string(),
            ));
        }
        let auth = self
            .network
            .identity
            .authenticate(&LoginCredentials::OAuth(params))
            .await?;
        self.login(auth).await
    }

    /// Log in with an id token issued by the application's own auth.
    pub async fn login_with_jwt(&mut self, params: IdTokenLoginParams) -> CoreKitResult<KeyDetails> {
        if params.id_token.trim().is_empty() {
            return Err(CoreKitError::Authentication("id token is empty".to_string()));
        }
        let auth = self
            .network
            .identity
            .authenticate(&LoginCredentials::IdToken(params))
            .await?;
        self.login(auth).await
    }

    async fn login(&mut self, auth: AuthResult) -> CoreKitResult<KeyDetails> {
        let auth_signatures = session_signatures(&auth.session_tokens)?;
        self.session = Some(LoginSession {
            oauth_key: Zeroizing::new(auth.oauth_key.clone()),
            verifier: auth.verifier.clone(),
            verifier_id: auth.verifier_id.clone(),
            auth_signatures,
        });
        self.state = SessionState::Authenticated;
        tracing::info!(verifier = %auth.verifier, "Authenticated");

        let node_details = self
            .network
            .nodes
            .get_node_details(self.settings.network(), &auth.verifier, &auth.verifier_id)
            .await
            .map_err(|e| match e {
                CoreKitError::TopologyResolution(_) | CoreKitError::InvalidEndpoint(_) => e,
                other => CoreKitError::TopologyResolution(other.to_string()),
            })?;
        let metadata_endpoint = metadata_endpoint(&node_details)?;
        tracing::debug!(%metadata_endpoint, nodes = node_details.torus_node_endpoints.len(), "Resolved node topology");

        let threshold_key = self
            .network
            .threshold_keys
            .create(ThresholdKeyParams {
                metadata_endpoint: metadata_endpoint.clone(),
                postbox_key: auth.oauth_key.clone(),
                verifier: auth.verifier.clone(),
                verifier_id: auth.verifier_id.clone(),
                node_details: node_details.clone(),
                network: self.settings.network(),
            })
            .await?;
        let details = threshold_key.initialize().await?;

        self.node_details = Some(node_details);
        self.metadata_endpoint = Some(metadata_endpoint);
        self.threshold_key = Some(threshold_key);
        self.factor_key = None;
        self.last_recovery = None;
        // A previous login's factor must not persist next to this identity.
        self.app_state.clear();

        let required_factors = u32::try_from(details.required_shares.max(0)).unwrap_or_default();
        self.state = SessionState::ThresholdKeyInitialized { required_factors };
        self.update_app_state(
            AppState::default()
                .with_metadata_pub_key(details.pub_key.clone())
                .with_login_time(Utc::now()),
        )
        .await?;

        if required_factors == 0 {
            self.new_user().await?;
        } else {
            self.existing_user().await?;
        }

        tracing::info!(state = %self.state, "Login finished");
        self.get_key_details().await
    }

    async fn new_user(&mut self) -> CoreKitResult<()> {
        let threshold_key = self.threshold_key()?;
        threshold_key.reconstruct().await?;

        let hash_factor = !self.settings.disable_hash_factor();
        let (factor_key, module) = if hash_factor {
            let session = self.login_session()?;
            (
                hash_factor_key(&session.oauth_key, self.settings.client_id())?,
                FactorDescriptionModule::HashedShare,
            )
        } else {
            (FactorKey::random(), FactorDescriptionModule::DeviceShare)
        };
        let factor_pub = factor_key.public_key_hex();

        let share_type = TssShareType::Device;
        threshold_key
            .create_tagged_tss_share(DEFAULT_TSS_TAG, &factor_pub, share_type.index())
            .await?;

        let share_index = threshold_key
            .get_shares_indexes()
            .await?
            .into_iter()
            .find(|index| index != SERVICE_PROVIDER_SHARE_INDEX)
            .ok_or_else(|| CoreKitError::ThresholdKey("no device metadata share".to_string()))?;
        threshold_key
            .backup_share_with_factor_key(&share_index, &factor_key)
            .await?;

        let description = FactorDescription::new(module, share_type, Default::default());
        threshold_key
            .add_share_description(&factor_pub, &description.to_json_string()?)
            .await?;

        let device_share_index = threshold_key.find_device_share_index(&factor_key).await?;
        let metadata_pub_key = threshold_key.get_key_details().await?.pub_key;
        self.update_app_state(
            AppState::default()
                .with_factor_key(factor_key.to_hex())
                .with_metadata_pub_key(metadata_pub_key.clone())
                .with_device_metadata_share_index(device_share_index),
        )
        .await?;

        if !hash_factor {
            self.device_factors
                .set_factor(&metadata_pub_key, &factor_key.to_hex())
                .await?;
        }

        self.factor_key = Some(factor_key);
        self.state = SessionState::Ready;
        tracing::info!(factor_pub = %factor_pub, module = %module, "Created default factor for new user");
        Ok(())
    }

    /// Unlock the session with a factor key.
    ///
    /// Fails with `InvalidFactor` if the key unlocks no registered share.
    pub async fn input_factor(&mut self, factor_key: &str) -> CoreKitResult<()> {
        let threshold_key = self.threshold_key()?;
        let factor_key = FactorKey::from_hex(factor_key)
            .map_err(|e| CoreKitError::InvalidFactor(e.to_string()))?;

        threshold_key
            .input_factor_key(&factor_key)
            .await
            .map_err(|e| CoreKitError::InvalidFactor(e.to_string()))?;
        threshold_key.reconstruct().await?;

        let tag = threshold_key.get_tss_tag().await?;
        let share = threshold_key
            .get_tss_share(&tag, &factor_key)
            .await
            .map_err(|e| CoreKitError::InvalidFactor(e.to_string()))?;

        let device_share_index = threshold_key.find_device_share_index(&factor_key).await?;
        self.update_app_state(
            AppState::default()
                .with_factor_key(factor_key.to_hex())
                .with_device_metadata_share_index(device_share_index),
        )
        .await?;

        tracing::info!(
            factor_pub = %factor_key.public_key_hex(),
            tag = %tag,
            share_index = %share.index,
            "Factor accepted"
        );
        self.factor_key = Some(factor_key);
        self.state = SessionState::Ready;
        Ok(())
    }
}
