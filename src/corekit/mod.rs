//! The core kit: one login session over one threshold key.
//!
//! [`MpcCoreKit`] owns the session exclusively. Every operation that mutates
//! the session or the account's factor set takes `&mut self`, so two factor
//! mutations can never interleave on one kit.
//!
//! ## Flow
//!
//! 1. `login_with_oauth` / `login_with_jwt` authenticate, resolve the node
//!    topology and initialize the threshold key
//! 2. New accounts get a default factor; existing accounts try the recovery
//!    sources in order and otherwise wait for `input_factor`
//! 3. `create_factor`, `delete_factor` and `enable_mfa` manage factors
//! 4. `sign_async` bootstraps a fresh signing session per call

mod factor;
mod login;
mod recovery;
mod signing;

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::config::Settings;
use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{FactorKey, parse_public_key, uncompressed_hex};
use crate::network::{CoreKitNetwork, NodeDetails, ThresholdKey};
use crate::state::AppState;
use crate::storage::{CoreKitStorage, DeviceFactorStorage, KeyValueStore};
use crate::types::{KeyDetails, SessionState};

pub use self::login::parse_token;
pub use self::recovery::{RecoveryAttempt, RecoveryReport, RecoverySource, RecoveryStatus};
pub use self::signing::SigningContext;

/// Key of the persisted [`AppState`] inside the core kit store.
pub const APP_STATE_KEY: &str = "localAppState";

/// Metadata written over a key whose backup must no longer resolve.
pub(crate) const KEY_NOT_FOUND_METADATA: &str = r#"{"message":"KEY_NOT_FOUND"}"#;

/// Identity and node signatures obtained at login.
struct LoginSession {
    oauth_key: Zeroizing<String>,
    verifier: String,
    verifier_id: String,
    auth_signatures: Vec<String>,
}

pub struct MpcCoreKit {
    settings: Settings,
    network: CoreKitNetwork,
    storage: CoreKitStorage,
    device_factors: DeviceFactorStorage,
    app_state: AppState,
    state: SessionState,
    session: Option<LoginSession>,
    node_details: Option<NodeDetails>,
    metadata_endpoint: Option<String>,
    threshold_key: Option<Arc<dyn ThresholdKey>>,
    factor_key: Option<FactorKey>,
    last_recovery: Option<RecoveryReport>,
}

impl MpcCoreKit {
    /// Create an unauthenticated kit. Call [`MpcCoreKit::rehydrate`] to load
    /// state persisted by a previous session.
    pub fn new(
        settings: Settings,
        network: CoreKitNetwork,
        store: Arc<dyn KeyValueStore>,
    ) -> CoreKitResult<Self> {
        settings.validate().map_err(CoreKitError::InvalidInput)?;

        let storage = CoreKitStorage::new(settings.store_key(), store);
        let device_factors = DeviceFactorStorage::new(storage.clone());

        tracing::info!(
            network = %settings.network(),
            hash_factor = !settings.disable_hash_factor(),
            "Core kit created"
        );

        Ok(Self {
            settings,
            network,
            storage,
            device_factors,
            app_state: AppState::default(),
            state: SessionState::Unauthenticated,
            session: None,
            node_details: None,
            metadata_endpoint: None,
            threshold_key: None,
            factor_key: None,
            last_recovery: None,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }

    pub fn metadata_endpoint(&self) -> Option<&str> {
        self.metadata_endpoint.as_deref()
    }

    /// Outcome of the recovery sources tried during the last existing-user login.
    pub fn last_recovery(&self) -> Option<&RecoveryReport> {
        self.last_recovery.as_ref()
    }

    pub fn verifier(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.verifier.as_str())
    }

    pub fn verifier_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.verifier_id.as_str())
    }

    /// Hex of the active factor key.
    pub fn get_current_factor_key(&self) -> CoreKitResult<String> {
        Ok(self.active_factor()?.to_hex())
    }

    pub fn get_device_metadata_share_index(&self) -> CoreKitResult<String> {
        self.app_state
            .device_metadata_share_index
            .clone()
            .ok_or(CoreKitError::MissingState("device metadata share index"))
    }

    pub fn get_metadata_pub_key(&self) -> CoreKitResult<String> {
        self.app_state
            .metadata_pub_key
            .clone()
            .ok_or(CoreKitError::MissingState("metadata public key"))
    }

    pub async fn get_key_details(&self) -> CoreKitResult<KeyDetails> {
        let threshold_key = self.threshold_key()?;
        let details = threshold_key.get_key_details().await?;

        let (tss_pub_key, total_factors) = if self.state == SessionState::Ready {
            let tag = threshold_key.get_tss_tag().await?;
            let compressed = threshold_key.get_tss_pub_key(&tag).await?;
            let factors = threshold_key.get_all_factor_pub(&tag).await?;
            (
                Some(uncompressed_hex(&parse_public_key(&compressed)?)),
                factors.len(),
            )
        } else {
            (None, 0)
        };

        Ok(KeyDetails {
            tss_pub_key,
            metadata_pub_key: details.pub_key,
            required_factors: u32::try_from(details.required_shares.max(0)).unwrap_or_default(),
            threshold: details.threshold,
            share_descriptions: details.share_descriptions,
            total_shares: details.total_shares,
            total_factors,
        })
    }

    // =========================================================================
    // App state
    // =========================================================================

    /// Merge `update` into the session state and persist the result.
    pub async fn update_app_state(&mut self, update: AppState) -> CoreKitResult<()> {
        self.app_state.merge(update);
        self.storage.set(APP_STATE_KEY, &self.app_state).await
    }

    /// Reload state persisted by an earlier session.
    pub async fn rehydrate(&mut self) -> CoreKitResult<&AppState> {
        match self.storage.get::<AppState>(APP_STATE_KEY).await {
            Ok(stored) => {
                self.app_state.clear();
                self.app_state.merge(stored);
                tracing::debug!(
                    has_factor = self.app_state.factor_key.is_some(),
                    "Rehydrated app state"
                );
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("No persisted app state");
            }
            Err(e) => return Err(e),
        }
        Ok(&self.app_state)
    }

    /// End the session, wiping the factor material held in memory and in the store.
    pub async fn logout(&mut self) -> CoreKitResult<()> {
        self.clear_session();
        self.storage.set(APP_STATE_KEY, &self.app_state).await?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Tombstone the account metadata and wipe all local state.
    ///
    /// The next login for this identity starts over as a new user.
    pub async fn reset_account(&mut self) -> CoreKitResult<()> {
        let oauth_key = self.login_session()?.oauth_key.clone();
        let threshold_key = self.threshold_key()?;
        if self.metadata_endpoint.is_none() {
            return Err(CoreKitError::MissingState("metadata endpoint"));
        }

        threshold_key
            .storage_layer_set_metadata(&oauth_key, KEY_NOT_FOUND_METADATA)
            .await?;

        if let Some(metadata_pub_key) = self.app_state.metadata_pub_key.clone() {
            self.device_factors.reset(&metadata_pub_key).await?;
        }
        self.storage.reset_store().await?;

        self.clear_session();
        tracing::warn!("Account reset");
        Ok(())
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Drop every login handle and wipe in-memory factor material.
    fn clear_session(&mut self) {
        self.app_state.clear();
        self.factor_key = None;
        self.session = None;
        self.threshold_key = None;
        self.node_details = None;
        self.metadata_endpoint = None;
        self.last_recovery = None;
        self.state = SessionState::Unauthenticated;
    }

    fn threshold_key(&self) -> CoreKitResult<Arc<dyn ThresholdKey>> {
        self.threshold_key
            .clone()
            .ok_or(CoreKitError::MissingState("threshold key"))
    }

    fn login_session(&self) -> CoreKitResult<&LoginSession> {
        self.session
            .as_ref()
            .ok_or(CoreKitError::MissingState("login session"))
    }

    fn active_factor(&self) -> CoreKitResult<&FactorKey> {
        self.factor_key
            .as_ref()
            .ok_or(CoreKitError::MissingState("factor key"))
    }

    fn node_details(&self) -> CoreKitResult<&NodeDetails> {
        self.node_details
            .as_ref()
            .ok_or(CoreKitError::MissingState("node details"))
    }
}

impl std::fmt::Debug for MpcCoreKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpcCoreKit")
            .field("state", &self.state)
            .field("verifier", &self.verifier())
            .field("metadata_endpoint", &self.metadata_endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedNetwork;
    use crate::storage::InMemoryStore;

    fn kit(store: Arc<dyn KeyValueStore>) -> MpcCoreKit {
        let network = SimulatedNetwork::new();
        MpcCoreKit::new(Settings::for_tests(), network.network(), store).unwrap()
    }

    #[tokio::test]
    async fn test_new_kit_is_unauthenticated() {
        let kit = kit(Arc::new(InMemoryStore::new()));
        assert_eq!(kit.state(), SessionState::Unauthenticated);
        assert!(kit.app_state().is_empty());
        assert!(matches!(
            kit.get_current_factor_key(),
            Err(CoreKitError::MissingState("factor key"))
        ));
        assert!(matches!(
            kit.get_key_details().await,
            Err(CoreKitError::MissingState("threshold key"))
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_settings() {
        let network = SimulatedNetwork::new();
        let settings = Settings::new("", crate::config::Web3AuthNetwork::SapphireDevnet);
        let result = MpcCoreKit::new(settings, network.network(), Arc::new(InMemoryStore::new()));
        assert!(matches!(result, Err(CoreKitError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_update_app_state_persists_and_rehydrates() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let mut first = kit(store.clone());
        first
            .update_app_state(AppState::default().with_metadata_pub_key("02aa"))
            .await
            .unwrap();
        first
            .update_app_state(AppState::default().with_device_metadata_share_index("abc"))
            .await
            .unwrap();

        let mut second = kit(store);
        let state = second.rehydrate().await.unwrap();
        assert_eq!(state.metadata_pub_key.as_deref(), Some("02aa"));
        assert_eq!(state.device_metadata_share_index.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_rehydrate_without_state_is_empty() {
        let mut kit = kit(Arc::new(InMemoryStore::new()));
        assert!(kit.rehydrate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_requires_login() {
        let mut kit = kit(Arc::new(InMemoryStore::new()));
        assert!(matches!(
            kit.reset_account().await,
            Err(CoreKitError::MissingState("login session"))
        ));
    }
}
