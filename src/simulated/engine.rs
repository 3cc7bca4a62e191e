//! In-process threshold key engine.
//!
//! Each account has a service provider share (`"1"`) and one device metadata
//! share, threshold 2. Per tag the TSS secret `x` is shared on the line
//! `f(z) = x + a·z`: the user slots hold `f(2)` and `f(3)`, and the signing
//! servers hold `g(i)` on a second line with `g(0) = f(1)`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, PublicKey, Scalar};
use rand_core::{OsRng, RngCore};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{FactorKey, compressed_hex, to_compressed_hex};
use crate::network::{EngineKeyDetails, ThresholdKey, ThresholdKeyFactory, ThresholdKeyParams, TssShare};
use crate::tss::coefficients::scalar_to_hex;
use crate::types::{DEFAULT_TSS_TAG, SERVICE_PROVIDER_SHARE_INDEX, SHARE_FORMAT_MNEMONIC};

const THRESHOLD: u32 = 2;
const KEY_NOT_FOUND: &str = "KEY_NOT_FOUND";

/// Calls made against the engine, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    pub add_factor_pub: usize,
    pub copy_factor_pub: usize,
    pub delete_factor_pub: usize,
}

struct TagState {
    secret: Scalar,
    slope: Scalar,
    server_slope: Scalar,
    public_key: String,
    nonce: u32,
    /// Compressed factor pub to TSS share index.
    factor_pubs: BTreeMap<String, u32>,
}

impl TagState {
    fn random() -> CoreKitResult<Self> {
        let secret = Scalar::random(&mut OsRng);
        let public_key = PublicKey::from_affine((ProjectivePoint::GENERATOR * secret).to_affine())?;
        Ok(Self {
            secret,
            slope: Scalar::random(&mut OsRng),
            server_slope: Scalar::random(&mut OsRng),
            public_key: compressed_hex(&public_key),
            nonce: 0,
            factor_pubs: BTreeMap::new(),
        })
    }

    fn user_share(&self, index: u32) -> Scalar {
        self.secret + self.slope * Scalar::from(u64::from(index))
    }

    fn server_share(&self, server_index: u32) -> Scalar {
        self.user_share(1) + self.server_slope * Scalar::from(u64::from(server_index))
    }

    fn factor_index(&self, factor_key: &FactorKey) -> CoreKitResult<u32> {
        self.factor_pubs
            .get(&factor_key.public_key_hex())
            .copied()
            .ok_or_else(|| CoreKitError::ThresholdKey("factor is not registered for tag".to_string()))
    }
}

struct Account {
    metadata_pub_key: String,
    device_share_index: String,
    share_descriptions: BTreeMap<String, Vec<String>>,
    tags: BTreeMap<String, TagState>,
}

impl Account {
    fn tag(&self, tag: &str) -> CoreKitResult<&TagState> {
        self.tags
            .get(tag)
            .ok_or_else(|| CoreKitError::ThresholdKey(format!("unknown tag {tag}")))
    }

    fn tag_mut(&mut self, tag: &str) -> CoreKitResult<&mut TagState> {
        self.tags
            .get_mut(tag)
            .ok_or_else(|| CoreKitError::ThresholdKey(format!("unknown tag {tag}")))
    }

    fn share_indexes(&self) -> Vec<String> {
        vec![
            SERVICE_PROVIDER_SHARE_INDEX.to_string(),
            self.device_share_index.clone(),
        ]
    }
}

#[derive(Default)]
struct EngineState {
    accounts: HashMap<String, Account>,
    /// Storage layer: compressed pub of the writing key to its JSON metadata.
    metadata: HashMap<String, Value>,
    counters: EngineCounters,
}

impl EngineState {
    fn is_live(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .is_some_and(|value| value.get("message").and_then(Value::as_str) != Some(KEY_NOT_FOUND))
    }

    fn account(&self, id: &str) -> CoreKitResult<&Account> {
        self.accounts
            .get(id)
            .ok_or_else(|| CoreKitError::ThresholdKey("account not initialized".to_string()))
    }

    fn account_mut(&mut self, id: &str) -> CoreKitResult<&mut Account> {
        self.accounts
            .get_mut(id)
            .ok_or_else(|| CoreKitError::ThresholdKey("account not initialized".to_string()))
    }
}

/// Shared engine state. Clones see the same accounts.
#[derive(Clone, Default)]
pub struct SimulatedEngine {
    state: Arc<Mutex<EngineState>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn counters(&self) -> EngineCounters {
        self.state.lock().await.counters
    }

    /// Share held by signing server `server_index` for the tag with this TSS key.
    pub(crate) async fn server_share(&self, tss_pub_key: &str, server_index: u32) -> CoreKitResult<Scalar> {
        let state = self.state.lock().await;
        state
            .accounts
            .values()
            .flat_map(|account| account.tags.values())
            .find(|tag| tag.public_key == tss_pub_key)
            .map(|tag| tag.server_share(server_index))
            .ok_or_else(|| CoreKitError::SigningFailed("unknown TSS public key".to_string()))
    }
}

#[async_trait]
impl ThresholdKeyFactory for SimulatedEngine {
    async fn create(&self, params: ThresholdKeyParams) -> CoreKitResult<Arc<dyn ThresholdKey>> {
        let postbox = FactorKey::from_hex(&params.postbox_key)?;
        tracing::debug!(
            metadata_endpoint = %params.metadata_endpoint,
            verifier = %params.verifier,
            "Simulated threshold key created"
        );
        Ok(Arc::new(SimulatedThresholdKey {
            engine: self.clone(),
            account_id: postbox.public_key_hex(),
            device_share_loaded: AtomicBool::new(false),
        }))
    }
}

/// Handle for one account, as seen by one login.
pub struct SimulatedThresholdKey {
    engine: SimulatedEngine,
    account_id: String,
    device_share_loaded: AtomicBool,
}

impl SimulatedThresholdKey {
    fn required_shares(&self) -> i32 {
        if self.device_share_loaded.load(Ordering::SeqCst) { 0 } else { 1 }
    }

    fn details(&self, account: &Account) -> EngineKeyDetails {
        EngineKeyDetails {
            pub_key: account.metadata_pub_key.clone(),
            required_shares: self.required_shares(),
            threshold: THRESHOLD,
            total_shares: 2,
            share_descriptions: account.share_descriptions.clone(),
        }
    }

    fn require_loaded(&self) -> CoreKitResult<()> {
        if self.device_share_loaded.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreKitError::ThresholdKey("not enough shares to reconstruct".to_string()))
        }
    }
}

fn verify_signatures(signatures: &[String]) -> CoreKitResult<()> {
    if signatures.is_empty() {
        return Err(CoreKitError::Authentication("missing session signatures".to_string()));
    }
    for signature in signatures {
        let value: Value = serde_json::from_str(signature)
            .map_err(|e| CoreKitError::Authentication(format!("malformed session signature: {e}")))?;
        if value.get("data").and_then(Value::as_str).is_none() || value.get("sig").and_then(Value::as_str).is_none() {
            return Err(CoreKitError::Authentication("malformed session signature".to_string()));
        }
    }
    Ok(())
}

fn random_share_index() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] |= 0x10;
    hex::encode(bytes)
}

#[async_trait]
impl ThresholdKey for SimulatedThresholdKey {
    async fn initialize(&self) -> CoreKitResult<EngineKeyDetails> {
        let mut state = self.engine.state.lock().await;
        let exists = state.accounts.contains_key(&self.account_id) && state.is_live(&self.account_id);

        if !exists {
            let metadata_key = FactorKey::random();
            let account = Account {
                metadata_pub_key: metadata_key.public_key_hex(),
                device_share_index: random_share_index(),
                share_descriptions: BTreeMap::new(),
                tags: BTreeMap::new(),
            };
            state.metadata.insert(
                self.account_id.clone(),
                json!({ "metadataPubKey": account.metadata_pub_key }),
            );
            state.accounts.insert(self.account_id.clone(), account);
            self.device_share_loaded.store(true, Ordering::SeqCst);
        }

        Ok(self.details(state.account(&self.account_id)?))
    }

    async fn reconstruct(&self) -> CoreKitResult<()> {
        self.require_loaded()
    }

    async fn get_key_details(&self) -> CoreKitResult<EngineKeyDetails> {
        let state = self.engine.state.lock().await;
        Ok(self.details(state.account(&self.account_id)?))
    }

    async fn get_shares_indexes(&self) -> CoreKitResult<Vec<String>> {
        let state = self.engine.state.lock().await;
        Ok(state.account(&self.account_id)?.share_indexes())
    }

    async fn input_factor_key(&self, factor_key: &FactorKey) -> CoreKitResult<()> {
        let state = self.engine.state.lock().await;
        let account = state.account(&self.account_id)?;
        let backed_up = state
            .metadata
            .get(&factor_key.public_key_hex())
            .and_then(|value| value.get("shareIndex"))
            .and_then(Value::as_str);
        if backed_up != Some(account.device_share_index.as_str()) {
            return Err(CoreKitError::ThresholdKey(
                "no share is backed up under this factor".to_string(),
            ));
        }
        self.device_share_loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_share_description(&self, key: &str, description: &str) -> CoreKitResult<()> {
        let mut state = self.engine.state.lock().await;
        let key = to_compressed_hex(key).unwrap_or_else(|_| key.to_string());
        state
            .account_mut(&self.account_id)?
            .share_descriptions
            .entry(key)
            .or_default()
            .push(description.to_string());
        Ok(())
    }

    async fn storage_layer_set_metadata(&self, private_key: &str, json: &str) -> CoreKitResult<()> {
        let key = FactorKey::from_hex(private_key)?.public_key_hex();
        let value: Value = serde_json::from_str(json)?;
        self.engine.state.lock().await.metadata.insert(key, value);
        Ok(())
    }

    async fn get_tss_tag(&self) -> CoreKitResult<String> {
        Ok(DEFAULT_TSS_TAG.to_string())
    }

    async fn get_tss_share(&self, tag: &str, factor_key: &FactorKey) -> CoreKitResult<TssShare> {
        self.require_loaded()?;
        let state = self.engine.state.lock().await;
        let tag_state = state.account(&self.account_id)?.tag(tag)?;
        let index = tag_state.factor_index(factor_key)?;
        Ok(TssShare {
            index: format!("{index:x}"),
            share: scalar_to_hex(&tag_state.user_share(index)),
        })
    }

    async fn get_tss_nonce(&self, tag: &str) -> CoreKitResult<u32> {
        let state = self.engine.state.lock().await;
        Ok(state.account(&self.account_id)?.tag(tag)?.nonce)
    }

    async fn get_tss_pub_key(&self, tag: &str) -> CoreKitResult<String> {
        let state = self.engine.state.lock().await;
        Ok(state.account(&self.account_id)?.tag(tag)?.public_key.clone())
    }

    async fn get_all_factor_pub(&self, tag: &str) -> CoreKitResult<Vec<String>> {
        let state = self.engine.state.lock().await;
        Ok(state
            .account(&self.account_id)?
            .tag(tag)?
            .factor_pubs
            .keys()
            .cloned()
            .collect())
    }

    async fn create_tagged_tss_share(&self, tag: &str, factor_pub: &str, tss_index: u32) -> CoreKitResult<()> {
        self.require_loaded()?;
        let factor_pub = to_compressed_hex(factor_pub)?;
        let mut state = self.engine.state.lock().await;
        let account = state.account_mut(&self.account_id)?;
        if account.tags.contains_key(tag) {
            return Err(CoreKitError::ThresholdKey(format!("tag {tag} already exists")));
        }
        let mut tag_state = TagState::random()?;
        tag_state.factor_pubs.insert(factor_pub, tss_index);
        account.tags.insert(tag.to_string(), tag_state);
        Ok(())
    }

    async fn add_factor_pub(
        &self,
        tag: &str,
        factor_key: &FactorKey,
        auth_signatures: &[String],
        new_factor_pub: &str,
        new_tss_index: u32,
    ) -> CoreKitResult<()> {
        verify_signatures(auth_signatures)?;
        let new_factor_pub = to_compressed_hex(new_factor_pub)?;
        let mut state = self.engine.state.lock().await;

        let tag_state = state.account_mut(&self.account_id)?.tag_mut(tag)?;
        tag_state.factor_index(factor_key)?;
        if tag_state.factor_pubs.contains_key(&new_factor_pub) {
            return Err(CoreKitError::ThresholdKey("factor already registered".to_string()));
        }
        tag_state.factor_pubs.insert(new_factor_pub, new_tss_index);
        tag_state.nonce += 1;
        state.counters.add_factor_pub += 1;
        Ok(())
    }

    async fn copy_factor_pub(
        &self,
        tag: &str,
        factor_key: &FactorKey,
        new_factor_pub: &str,
        tss_index: u32,
    ) -> CoreKitResult<()> {
        let new_factor_pub = to_compressed_hex(new_factor_pub)?;
        let mut state = self.engine.state.lock().await;

        let tag_state = state.account_mut(&self.account_id)?.tag_mut(tag)?;
        if tag_state.factor_index(factor_key)? != tss_index {
            return Err(CoreKitError::ThresholdKey(
                "copy requires the factor's own share index".to_string(),
            ));
        }
        tag_state.factor_pubs.insert(new_factor_pub, tss_index);
        state.counters.copy_factor_pub += 1;
        Ok(())
    }

    async fn delete_factor_pub(
        &self,
        tag: &str,
        factor_key: &FactorKey,
        auth_signatures: &[String],
        delete_factor_pub: &str,
    ) -> CoreKitResult<()> {
        verify_signatures(auth_signatures)?;
        let delete_factor_pub = to_compressed_hex(delete_factor_pub)?;
        let mut state = self.engine.state.lock().await;

        let tag_state = state.account_mut(&self.account_id)?.tag_mut(tag)?;
        tag_state.factor_index(factor_key)?;
        if tag_state.factor_pubs.remove(&delete_factor_pub).is_none() {
            return Err(CoreKitError::ThresholdKey("factor is not registered".to_string()));
        }
        tag_state.nonce += 1;
        state.counters.delete_factor_pub += 1;
        Ok(())
    }

    async fn backup_share_with_factor_key(&self, share_index: &str, factor_key: &FactorKey) -> CoreKitResult<()> {
        let mut state = self.engine.state.lock().await;
        if state.account(&self.account_id)?.device_share_index != share_index {
            return Err(CoreKitError::ThresholdKey(format!("unknown share index {share_index}")));
        }
        state
            .metadata
            .insert(factor_key.public_key_hex(), json!({ "shareIndex": share_index }));
        Ok(())
    }

    async fn find_device_share_index(&self, factor_key: &FactorKey) -> CoreKitResult<String> {
        let state = self.engine.state.lock().await;
        state
            .metadata
            .get(&factor_key.public_key_hex())
            .and_then(|value| value.get("shareIndex"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CoreKitError::ThresholdKey("no share is backed up under this factor".to_string()))
    }

    async fn serialize_share(&self, share: &str, format: &str) -> CoreKitResult<String> {
        check_share_format(format)?;
        let key = FactorKey::from_hex(share)?;
        let entropy = Zeroizing::new(key.secret_key().to_bytes().to_vec());
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
            .map_err(|e| CoreKitError::InvalidInput(format!("Cannot encode share: {e}")))?;
        Ok(mnemonic.to_string())
    }

    async fn deserialize_share(&self, serialized: &str, format: &str) -> CoreKitResult<String> {
        check_share_format(format)?;
        let mnemonic = bip39::Mnemonic::parse_in_normalized(bip39::Language::English, serialized.trim())
            .map_err(|e| CoreKitError::InvalidInput(format!("Invalid share mnemonic: {e}")))?;
        let entropy = Zeroizing::new(mnemonic.to_entropy());
        Ok(FactorKey::from_hex(&hex::encode(entropy.as_slice()))?.to_hex())
    }
}

fn check_share_format(format: &str) -> CoreKitResult<()> {
    if format == SHARE_FORMAT_MNEMONIC {
        Ok(())
    } else {
        Err(CoreKitError::InvalidInput(format!("Unsupported share format {format}")))
    }
}
