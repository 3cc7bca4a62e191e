//! In-process network for tests and the demo binary.
//!
//! [`SimulatedNetwork`] binds all four collaborators of the kit to shared
//! in-memory state, so several kits created from one network see the same
//! accounts. Signing is real secp256k1 ECDSA: signatures verify against the
//! TSS public key.

mod engine;
mod identity;
mod nodes;
mod servers;

use std::sync::Arc;

pub use engine::{EngineCounters, SimulatedEngine, SimulatedThresholdKey};
pub use identity::SimulatedIdentity;
pub use nodes::SimulatedNodeDirectory;
pub use servers::{SessionCounters, SimulatedTssServers};

use crate::network::CoreKitNetwork;

/// Nodes in the default topology.
pub const DEFAULT_NODE_COUNT: usize = 3;

#[derive(Clone)]
pub struct SimulatedNetwork {
    identity: Arc<SimulatedIdentity>,
    nodes: Arc<SimulatedNodeDirectory>,
    engine: SimulatedEngine,
    servers: SimulatedTssServers,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::with_nodes(DEFAULT_NODE_COUNT)
    }

    /// A network with `node_count` nodes. Zero nodes makes topology lookups fail.
    pub fn with_nodes(node_count: usize) -> Self {
        let engine = SimulatedEngine::new();
        Self {
            identity: Arc::new(SimulatedIdentity::new(node_count)),
            nodes: Arc::new(SimulatedNodeDirectory::new(node_count)),
            servers: SimulatedTssServers::new(engine.clone()),
            engine,
        }
    }

    /// Collaborators to hand to [`crate::MpcCoreKit::new`].
    pub fn network(&self) -> CoreKitNetwork {
        CoreKitNetwork {
            identity: self.identity.clone(),
            nodes: self.nodes.clone(),
            threshold_keys: Arc::new(self.engine.clone()),
            tss: Arc::new(self.servers.clone()),
        }
    }

    pub fn identity(&self) -> &SimulatedIdentity {
        &self.identity
    }

    pub fn engine(&self) -> &SimulatedEngine {
        &self.engine
    }

    /// Take the signing servers offline or back online.
    pub fn set_signing_online(&self, online: bool) {
        self.servers.set_online(online);
    }

    /// Let precompute finish or leave the servers never ready.
    pub fn set_precompute_available(&self, available: bool) {
        self.servers.set_precompute_available(available);
    }

    pub fn signing_sessions(&self) -> SessionCounters {
        self.servers.session_counters()
    }
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Web3AuthNetwork;
    use crate::keys::FactorKey;
    use crate::network::{NodeDetails, ThresholdKey, ThresholdKeyFactory, ThresholdKeyParams};
    use crate::types::DEFAULT_TSS_TAG;

    fn create_test_params(postbox_key: &FactorKey) -> ThresholdKeyParams {
        ThresholdKeyParams {
            metadata_endpoint: "https://node-1.sapphire-devnet.web3auth.simulated/metadata".to_string(),
            postbox_key: postbox_key.to_hex(),
            verifier: "verifier".to_string(),
            verifier_id: "alice".to_string(),
            node_details: NodeDetails::default(),
            network: Web3AuthNetwork::SapphireDevnet,
        }
    }

    fn signatures() -> Vec<String> {
        vec![r#"{"data":"AQID","sig":"abcd"}"#.to_string()]
    }

    async fn create_test_account(engine: &SimulatedEngine, postbox: &FactorKey, factor: &FactorKey) -> String {
        let key = engine.create(create_test_params(postbox)).await.unwrap();
        let details = key.initialize().await.unwrap();
        assert_eq!(details.required_shares, 0);

        key.create_tagged_tss_share(DEFAULT_TSS_TAG, &factor.public_key_hex(), 2)
            .await
            .unwrap();
        let share_index = key.get_shares_indexes().await.unwrap().remove(1);
        key.backup_share_with_factor_key(&share_index, factor).await.unwrap();
        share_index
    }

    #[tokio::test]
    async fn test_existing_account_needs_factor() {
        let engine = SimulatedEngine::new();
        let postbox = FactorKey::random();
        let factor = FactorKey::random();
        let share_index = create_test_account(&engine, &postbox, &factor).await;

        let key = engine.create(create_test_params(&postbox)).await.unwrap();
        assert_eq!(key.initialize().await.unwrap().required_shares, 1);
        assert!(key.reconstruct().await.is_err());
        assert!(key.input_factor_key(&FactorKey::random()).await.is_err());

        key.input_factor_key(&factor).await.unwrap();
        key.reconstruct().await.unwrap();
        assert_eq!(key.find_device_share_index(&factor).await.unwrap(), share_index);
        assert_eq!(key.get_tss_share(DEFAULT_TSS_TAG, &factor).await.unwrap().index, "2");
    }

    #[tokio::test]
    async fn test_copy_keeps_slot_and_add_bumps_nonce() {
        let engine = SimulatedEngine::new();
        let postbox = FactorKey::random();
        let factor = FactorKey::random();
        create_test_account(&engine, &postbox, &factor).await;
        let key = engine.create(create_test_params(&postbox)).await.unwrap();
        key.initialize().await.unwrap();
        key.input_factor_key(&factor).await.unwrap();

        let copy = FactorKey::random();
        key.copy_factor_pub(DEFAULT_TSS_TAG, &factor, &copy.public_key_hex(), 2)
            .await
            .unwrap();
        assert!(
            key.copy_factor_pub(DEFAULT_TSS_TAG, &factor, &FactorKey::random().public_key_hex(), 3)
                .await
                .is_err()
        );
        assert_eq!(key.get_tss_nonce(DEFAULT_TSS_TAG).await.unwrap(), 0);

        let recovery = FactorKey::random();
        assert!(
            key.add_factor_pub(DEFAULT_TSS_TAG, &factor, &[], &recovery.public_key_hex(), 3)
                .await
                .is_err()
        );
        key.add_factor_pub(DEFAULT_TSS_TAG, &factor, &signatures(), &recovery.public_key_hex(), 3)
            .await
            .unwrap();
        assert_eq!(key.get_tss_nonce(DEFAULT_TSS_TAG).await.unwrap(), 1);

        let first = key.get_tss_share(DEFAULT_TSS_TAG, &factor).await.unwrap();
        let copied = key.get_tss_share(DEFAULT_TSS_TAG, &copy).await.unwrap();
        assert_eq!(first.share, copied.share);
        assert_eq!(key.get_tss_share(DEFAULT_TSS_TAG, &recovery).await.unwrap().index, "3");

        let counters = engine.counters().await;
        assert_eq!(counters.copy_factor_pub, 1);
        assert_eq!(counters.add_factor_pub, 1);
    }

    #[tokio::test]
    async fn test_tombstoned_account_starts_over() {
        let engine = SimulatedEngine::new();
        let postbox = FactorKey::random();
        let factor = FactorKey::random();
        create_test_account(&engine, &postbox, &factor).await;

        let key = engine.create(create_test_params(&postbox)).await.unwrap();
        key.initialize().await.unwrap();
        key.storage_layer_set_metadata(&postbox.to_hex(), r#"{"message":"KEY_NOT_FOUND"}"#)
            .await
            .unwrap();

        let fresh = engine.create(create_test_params(&postbox)).await.unwrap();
        assert_eq!(fresh.initialize().await.unwrap().required_shares, 0);
    }
}
