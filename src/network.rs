//! External collaborators of the core kit.
//!
//! The kit never talks to the identity provider, the node directory, the
//! threshold key engine or the signing servers directly. Each one sits behind
//! a trait here; production hosts bind real clients, tests and the demo bind
//! [`crate::simulated`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::Web3AuthNetwork;
use crate::error::CoreKitResult;
use crate::keys::FactorKey;
use crate::tss::SessionDescriptor;
use crate::types::{IdTokenLoginParams, OAuthLoginParams};

// =============================================================================
// Identity
// =============================================================================

/// Credentials handed to the identity provider.
#[derive(Debug, Clone)]
pub enum LoginCredentials {
    OAuth(OAuthLoginParams),
    IdToken(IdTokenLoginParams),
}

impl LoginCredentials {
    pub fn verifier(&self) -> &str {
        match self {
            Self::OAuth(params) => &params.verifier,
            Self::IdToken(params) => &params.verifier,
        }
    }
}

/// Session token issued by one node, hex encoded, with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokenData {
    pub token: String,
    pub signature: String,
}

/// Outcome of a successful login.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthResult {
    /// Hex secret key derived by the nodes for this identity (the postbox key).
    pub oauth_key: String,
    #[zeroize(skip)]
    pub verifier: String,
    #[zeroize(skip)]
    pub verifier_id: String,
    #[zeroize(skip)]
    pub session_tokens: Vec<SessionTokenData>,
}

impl std::fmt::Debug for AuthResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResult")
            .field("verifier", &self.verifier)
            .field("verifier_id", &self.verifier_id)
            .field("session_tokens", &self.session_tokens.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails with `Authentication` when the provider rejects the credentials.
    async fn authenticate(&self, credentials: &LoginCredentials) -> CoreKitResult<AuthResult>;
}

// =============================================================================
// Node directory
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDetails {
    pub torus_node_endpoints: Vec<String>,
    /// TSS endpoints, one per node, in node index order.
    pub torus_node_tss_endpoints: Vec<String>,
    /// DKG indexes of the nodes participating in signing.
    #[serde(default)]
    pub tss_node_indexes: Vec<u32>,
}

#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn get_node_details(
        &self,
        network: Web3AuthNetwork,
        verifier: &str,
        verifier_id: &str,
    ) -> CoreKitResult<NodeDetails>;
}

// =============================================================================
// Threshold key engine
// =============================================================================

/// Parameters the engine handle is created from.
#[derive(Clone)]
pub struct ThresholdKeyParams {
    pub metadata_endpoint: String,
    pub postbox_key: String,
    pub verifier: String,
    pub verifier_id: String,
    pub node_details: NodeDetails,
    pub network: Web3AuthNetwork,
}

impl Drop for ThresholdKeyParams {
    fn drop(&mut self) {
        self.postbox_key.zeroize();
    }
}

/// Key details as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineKeyDetails {
    /// Compressed metadata public key.
    pub pub_key: String,
    pub required_shares: i32,
    pub threshold: u32,
    pub total_shares: u32,
    pub share_descriptions: BTreeMap<String, Vec<String>>,
}

/// A TSS share unlocked by a factor key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TssShare {
    /// Share index in hex, as the engine reports it.
    #[zeroize(skip)]
    pub index: String,
    /// Share scalar in hex.
    pub share: String,
}

impl std::fmt::Debug for TssShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TssShare")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ThresholdKeyFactory: Send + Sync {
    async fn create(&self, params: ThresholdKeyParams) -> CoreKitResult<Arc<dyn ThresholdKey>>;
}

/// Handle onto the external threshold key engine for one account.
///
/// Operations that change the authorized factor set are authenticated against
/// the nodes with the session signatures obtained at login.
#[async_trait]
pub trait ThresholdKey: Send + Sync {
    /// Load the account, creating it on first use.
    async fn initialize(&self) -> CoreKitResult<EngineKeyDetails>;

    async fn reconstruct(&self) -> CoreKitResult<()>;

    async fn get_key_details(&self) -> CoreKitResult<EngineKeyDetails>;

    /// Indexes of the metadata shares, in hex.
    async fn get_shares_indexes(&self) -> CoreKitResult<Vec<String>>;

    /// Load the metadata share backed up under `factor_key`.
    async fn input_factor_key(&self, factor_key: &FactorKey) -> CoreKitResult<()>;

    async fn add_share_description(&self, key: &str, description: &str) -> CoreKitResult<()>;

    /// Overwrite the metadata stored under a private key.
    async fn storage_layer_set_metadata(&self, private_key: &str, json: &str) -> CoreKitResult<()>;

    async fn get_tss_tag(&self) -> CoreKitResult<String>;

    async fn get_tss_share(&self, tag: &str, factor_key: &FactorKey) -> CoreKitResult<TssShare>;

    async fn get_tss_nonce(&self, tag: &str) -> CoreKitResult<u32>;

    /// TSS public key of the tag, compressed hex.
    async fn get_tss_pub_key(&self, tag: &str) -> CoreKitResult<String>;

    async fn get_all_factor_pub(&self, tag: &str) -> CoreKitResult<Vec<String>>;

    async fn create_tagged_tss_share(
        &self,
        tag: &str,
        factor_pub: &str,
        tss_index: u32,
    ) -> CoreKitResult<()>;

    /// Register a factor for a new TSS share slot.
    async fn add_factor_pub(
        &self,
        tag: &str,
        factor_key: &FactorKey,
        auth_signatures: &[String],
        new_factor_pub: &str,
        new_tss_index: u32,
    ) -> CoreKitResult<()>;

    /// Register another factor for the slot `factor_key` already unlocks.
    async fn copy_factor_pub(
        &self,
        tag: &str,
        factor_key: &FactorKey,
        new_factor_pub: &str,
        tss_index: u32,
    ) -> CoreKitResult<()>;

    async fn delete_factor_pub(
        &self,
        tag: &str,
        factor_key: &FactorKey,
        auth_signatures: &[String],
        delete_factor_pub: &str,
    ) -> CoreKitResult<()>;

    /// Encrypt the metadata share `share_index` under `factor_key`.
    async fn backup_share_with_factor_key(
        &self,
        share_index: &str,
        factor_key: &FactorKey,
    ) -> CoreKitResult<()>;

    /// Metadata share index that `factor_key` backs up.
    async fn find_device_share_index(&self, factor_key: &FactorKey) -> CoreKitResult<String>;

    /// Encode a hex share or factor key in a human-transcribable `format`.
    async fn serialize_share(&self, share: &str, format: &str) -> CoreKitResult<String>;

    /// Inverse of [`ThresholdKey::serialize_share`]. Returns the hex share.
    async fn deserialize_share(&self, serialized: &str, format: &str) -> CoreKitResult<String>;
}

// =============================================================================
// Signing client
// =============================================================================

/// Opaque precompute produced by the signing servers for one session.
#[derive(Clone)]
pub struct Precompute(Vec<u8>);

impl Precompute {
    pub fn new(payload: Vec<u8>) -> Self {
        Self(payload)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for Precompute {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Signature scalars as big-endian magnitudes, possibly shorter than 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
    pub v: u8,
}

#[async_trait]
pub trait TssClientFactory: Send + Sync {
    async fn connect(&self, session: &SessionDescriptor) -> CoreKitResult<Box<dyn TssClient>>;
}

/// Client side of the distributed signing protocol.
#[async_trait]
pub trait TssClient: Send + Sync {
    async fn check_connected(&self) -> CoreKitResult<bool>;

    async fn precompute(
        &mut self,
        server_coefficients: &BTreeMap<String, String>,
        signatures: &[String],
    ) -> CoreKitResult<Precompute>;

    async fn is_ready(&self) -> CoreKitResult<bool>;

    /// Sign a base64 message. With `hash_only` the message is already a digest.
    async fn sign(
        &mut self,
        message: &str,
        hash_only: bool,
        original_message: &str,
        precompute: &Precompute,
        signatures: &[String],
    ) -> CoreKitResult<RawSignature>;

    async fn cleanup(&mut self, signatures: &[String]) -> CoreKitResult<()>;
}

/// The four collaborators a kit instance is wired to.
#[derive(Clone)]
pub struct CoreKitNetwork {
    pub identity: Arc<dyn IdentityProvider>,
    pub nodes: Arc<dyn NodeDirectory>,
    pub threshold_keys: Arc<dyn ThresholdKeyFactory>,
    pub tss: Arc<dyn TssClientFactory>,
}
