//! Integration tests for the core kit session lifecycle.
//!
//! These tests drive `MpcCoreKit` end to end against the simulated network:
//! login, recovery of returning users, factor management, the MFA upgrade
//! and signing with real secp256k1 signatures.
//!
//! Run with: cargo test --test `corekit_integration`

use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use tempfile::TempDir;

use mpc_core_kit::corekit::{RecoverySource, RecoveryStatus};
use mpc_core_kit::keys::{FactorKey, keccak256};
use mpc_core_kit::simulated::SimulatedNetwork;
use mpc_core_kit::storage::{InMemoryStore, KeyValueStore, RedbStore};
use mpc_core_kit::types::{
    EnableMfaParams, FactorDescriptionModule, IdTokenLoginParams, LoginProvider, OAuthLoginParams,
    SHARE_FORMAT_MNEMONIC,
};
use mpc_core_kit::{CoreKitError, CoreKitResult, EvmSigner, KeyDetails, MpcCoreKit, SessionState, Settings};

const VERIFIER: &str = "torus-test-health";

fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(InMemoryStore::new())
}

fn create_test_kit(network: &SimulatedNetwork, settings: Settings, store: Arc<dyn KeyValueStore>) -> MpcCoreKit {
    MpcCoreKit::new(settings, network.network(), store).expect("Failed to create kit")
}

async fn login(network: &SimulatedNetwork, kit: &mut MpcCoreKit, user: &str) -> CoreKitResult<KeyDetails> {
    let id_token = network.identity().issue_id_token(user)?;
    kit.login_with_jwt(IdTokenLoginParams {
        verifier: VERIFIER.to_string(),
        verifier_id: user.to_string(),
        id_token,
        sub_verifier: None,
        additional_params: Default::default(),
    })
    .await
}

/// Log in a fresh user and upgrade to MFA. Returns the kit, its store and the recovery key.
async fn create_mfa_user(network: &SimulatedNetwork, user: &str) -> (MpcCoreKit, Arc<dyn KeyValueStore>, String) {
    let store = memory_store();
    let mut kit = create_test_kit(network, Settings::for_tests(), store.clone());
    login(network, &mut kit, user).await.unwrap();
    let recovery = kit
        .enable_mfa(
            EnableMfaParams {
                description: FactorDescriptionModule::SeedPhrase,
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap()
        .expect("recovery factor requested");
    (kit, store, recovery)
}

fn assert_recovers(digest: &[u8], signature: &[u8], public_key: &[u8]) {
    assert_eq!(signature.len(), 65);
    let recovery_id = RecoveryId::from_byte(signature[64]).expect("valid recovery id");
    let parsed = Signature::from_slice(&signature[..64]).expect("valid signature");
    let recovered = VerifyingKey::recover_from_prehash(digest, &parsed, recovery_id).expect("recoverable");
    assert_eq!(recovered.to_encoded_point(false).as_bytes(), public_key);
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_new_user_login_and_sign() {
    let network = SimulatedNetwork::new();
    let mut kit = create_test_kit(&network, Settings::for_tests(), memory_store());

    let details = login(&network, &mut kit, "alice@example.com").await.unwrap();
    assert_eq!(kit.state(), SessionState::Ready);
    assert_eq!(details.required_factors, 0);
    assert_eq!(details.total_factors, 1);
    assert_eq!(details.tss_pub_key.as_ref().map(String::len), Some(130));
    assert!(kit.metadata_endpoint().unwrap().ends_with("/metadata"));
    assert!(kit.app_state().factor_key.is_some());
    assert!(kit.get_device_metadata_share_index().is_ok());

    let digest = keccak256(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    let signature = kit.sign_async(&digest).await.unwrap();
    let public_key = kit.get_tss_pub_key().await.unwrap();
    assert_eq!(public_key.len(), 65);
    assert_recovers(&digest, &signature, &public_key);

    // Every call bootstraps its own session.
    let second = kit.sign_async(&digest).await.unwrap();
    assert_recovers(&digest, &second, &public_key);
}

#[tokio::test]
async fn test_returning_user_recovered_by_hash_factor() {
    let network = SimulatedNetwork::new();
    let mut first = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut first, "alice@example.com").await.unwrap();
    let tss_pub_key = first.get_tss_pub_key().await.unwrap();

    let mut second = create_test_kit(&network, Settings::for_tests(), memory_store());
    let details = login(&network, &mut second, "alice@example.com").await.unwrap();

    assert_eq!(second.state(), SessionState::Ready);
    assert_eq!(details.required_factors, 0);
    let report = second.last_recovery().unwrap();
    assert_eq!(report.recovered_by(), Some(RecoverySource::HashFactor));
    assert_eq!(second.get_tss_pub_key().await.unwrap(), tss_pub_key);
    assert_eq!(
        second.get_current_factor_key().unwrap(),
        first.get_current_factor_key().unwrap()
    );
}

#[tokio::test]
async fn test_login_without_hash_factor_awaits_factor() {
    let network = SimulatedNetwork::new();
    let mut first = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut first, "alice@example.com").await.unwrap();
    let factor_key = first.get_current_factor_key().unwrap();

    let settings = Settings::for_tests().with_disable_hash_factor(true);
    let mut second = create_test_kit(&network, settings, memory_store());
    let details = login(&network, &mut second, "alice@example.com").await.unwrap();

    assert_eq!(second.state(), SessionState::AwaitingFactor);
    assert_eq!(details.required_factors, 1);
    assert!(details.tss_pub_key.is_none());
    let report = second.last_recovery().unwrap();
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].source, RecoverySource::DeviceFactor);
    assert_eq!(report.attempts[0].status, RecoveryStatus::NotFound);

    let wrong = FactorKey::random().to_hex();
    assert!(matches!(
        second.input_factor(&wrong).await,
        Err(CoreKitError::InvalidFactor(_))
    ));
    assert_eq!(second.state(), SessionState::AwaitingFactor);

    second.input_factor(&factor_key).await.unwrap();
    assert_eq!(second.state(), SessionState::Ready);
    assert_eq!(second.get_key_details().await.unwrap().required_factors, 0);
}

#[tokio::test]
async fn test_new_user_without_hash_factor_caches_device_factor() {
    let network = SimulatedNetwork::new();
    let store = memory_store();
    let settings = Settings::for_tests().with_disable_hash_factor(true);
    let mut first = create_test_kit(&network, settings.clone(), store.clone());
    login(&network, &mut first, "carol@example.com").await.unwrap();
    assert_eq!(
        first.get_device_factor().await.unwrap(),
        first.get_current_factor_key().unwrap()
    );

    let mut second = create_test_kit(&network, settings, store);
    login(&network, &mut second, "carol@example.com").await.unwrap();
    assert_eq!(second.state(), SessionState::Ready);
    assert_eq!(
        second.last_recovery().unwrap().recovered_by(),
        Some(RecoverySource::DeviceFactor)
    );
}

#[tokio::test]
async fn test_rejected_device_factor_surfaces_error() {
    let network = SimulatedNetwork::new();
    let mut first = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut first, "frank@example.com").await.unwrap();
    let factor_key = first.get_current_factor_key().unwrap();

    let store = memory_store();
    let settings = Settings::for_tests().with_disable_hash_factor(true);
    let mut second = create_test_kit(&network, settings.clone(), store.clone());
    login(&network, &mut second, "frank@example.com").await.unwrap();
    second.set_device_factor(&FactorKey::random().to_hex()).await.unwrap();

    let mut third = create_test_kit(&network, settings, store);
    assert!(matches!(
        login(&network, &mut third, "frank@example.com").await,
        Err(CoreKitError::InvalidFactor(_))
    ));
    assert_eq!(third.state(), SessionState::AwaitingFactor);
    assert!(third.last_recovery().unwrap().final_error().is_some());

    third.input_factor(&factor_key).await.unwrap();
    assert_eq!(third.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_relogin_drops_previous_identity_factor() {
    let network = SimulatedNetwork::new();
    let mut other = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut other, "bob@example.com").await.unwrap();
    let bob_metadata_pub_key = other.get_metadata_pub_key().unwrap();

    let store = memory_store();
    let settings = Settings::for_tests().with_disable_hash_factor(true);
    let mut kit = create_test_kit(&network, settings.clone(), store.clone());
    login(&network, &mut kit, "alice@example.com").await.unwrap();
    assert!(kit.app_state().factor_key.is_some());

    login(&network, &mut kit, "bob@example.com").await.unwrap();
    assert_eq!(kit.state(), SessionState::AwaitingFactor);
    assert!(kit.app_state().factor_key.is_none());
    assert!(kit.app_state().device_metadata_share_index.is_none());
    assert_eq!(kit.get_metadata_pub_key().unwrap(), bob_metadata_pub_key);

    let mut next = create_test_kit(&network, settings, store);
    let stored = next.rehydrate().await.unwrap();
    assert!(stored.factor_key.is_none());
    assert_eq!(stored.metadata_pub_key.as_deref(), Some(bob_metadata_pub_key.as_str()));
}

#[tokio::test]
async fn test_oauth_login() {
    let network = SimulatedNetwork::new();
    let mut kit = create_test_kit(&network, Settings::for_tests(), memory_store());

    let jwt_without_params = OAuthLoginParams::new(LoginProvider::Jwt, "client", VERIFIER);
    assert!(matches!(
        kit.login_with_oauth(jwt_without_params).await,
        Err(CoreKitError::Authentication(_))
    ));
    assert_eq!(kit.state(), SessionState::Unauthenticated);

    let params = OAuthLoginParams::new(LoginProvider::Jwt, "client", VERIFIER).with_jwt_param("login_hint", "dave");
    kit.login_with_oauth(params).await.unwrap();
    assert_eq!(kit.state(), SessionState::Ready);
    assert_eq!(kit.verifier_id(), Some("dave"));
}

#[tokio::test]
async fn test_login_failures() {
    let network = SimulatedNetwork::new();
    let mut kit = create_test_kit(&network, Settings::for_tests(), memory_store());
    let result = kit
        .login_with_jwt(IdTokenLoginParams {
            verifier: VERIFIER.to_string(),
            verifier_id: "alice@example.com".to_string(),
            id_token: String::new(),
            sub_verifier: None,
            additional_params: Default::default(),
        })
        .await;
    assert!(matches!(result, Err(CoreKitError::Authentication(_))));

    let unreachable = SimulatedNetwork::with_nodes(0);
    let mut kit = create_test_kit(&unreachable, Settings::for_tests(), memory_store());
    assert!(matches!(
        login(&unreachable, &mut kit, "alice@example.com").await,
        Err(CoreKitError::TopologyResolution(_))
    ));
}

// =============================================================================
// Factors and MFA
// =============================================================================

#[tokio::test]
async fn test_enable_mfa_replaces_hash_factor() {
    let network = SimulatedNetwork::new();
    let (mut kit, _store, recovery) = create_mfa_user(&network, "alice@example.com").await;

    let factors = kit.get_all_factor_pubs().await.unwrap();
    assert_eq!(factors.len(), 2);
    let recovery_pub = FactorKey::from_hex(&recovery).unwrap().public_key_hex();
    assert!(factors.contains(&recovery_pub));

    let device_factor = kit.get_device_factor().await.unwrap();
    assert_eq!(device_factor, kit.get_current_factor_key().unwrap());
    let device_pub = FactorKey::from_hex(&device_factor).unwrap().public_key_hex();
    assert!(factors.contains(&device_pub));

    let counters = network.engine().counters().await;
    assert_eq!(counters.copy_factor_pub, 1);
    assert_eq!(counters.add_factor_pub, 1);
    assert_eq!(counters.delete_factor_pub, 1);

    let details = kit.get_key_details().await.unwrap();
    let device_descriptions = details.share_descriptions.get(&device_pub).unwrap();
    assert!(device_descriptions[0].contains(r#""module":"deviceShare""#));
    assert!(device_descriptions[0].contains("test-device"));
    let recovery_descriptions = details.share_descriptions.get(&recovery_pub).unwrap();
    assert!(recovery_descriptions[0].contains(r#""tssShareIndex":"3""#));

    assert!(matches!(
        kit.enable_mfa(EnableMfaParams::default(), false).await,
        Err(CoreKitError::MfaAlreadyEnabled)
    ));
}

#[tokio::test]
async fn test_device_factor_recovers_after_mfa() {
    let network = SimulatedNetwork::new();
    let (kit, store, _recovery) = create_mfa_user(&network, "alice@example.com").await;
    let device_factor = kit.get_current_factor_key().unwrap();

    let mut second = create_test_kit(&network, Settings::for_tests(), store);
    login(&network, &mut second, "alice@example.com").await.unwrap();

    assert_eq!(second.state(), SessionState::Ready);
    assert_eq!(second.get_current_factor_key().unwrap(), device_factor);
    let report = second.last_recovery().unwrap();
    assert!(matches!(report.attempts[0].status, RecoveryStatus::Invalid(_)));
    assert_eq!(report.recovered_by(), Some(RecoverySource::DeviceFactor));
}

#[tokio::test]
async fn test_recovery_factor_on_new_device() {
    let network = SimulatedNetwork::new();
    let (kit, _store, recovery) = create_mfa_user(&network, "alice@example.com").await;
    let tss_pub_key = kit.get_tss_pub_key().await.unwrap();

    let mut second = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut second, "alice@example.com").await.unwrap();
    assert_eq!(second.state(), SessionState::AwaitingFactor);
    assert_eq!(second.last_recovery().unwrap().final_error(), None);

    second.input_factor(&recovery).await.unwrap();
    assert_eq!(second.state(), SessionState::Ready);

    let digest = keccak256(b"new device");
    let signature = second.sign_async(&digest).await.unwrap();
    assert_recovers(&digest, &signature, &tss_pub_key);
}

#[tokio::test]
async fn test_deleted_factor_cannot_be_input() {
    let network = SimulatedNetwork::new();
    let (mut kit, _store, recovery) = create_mfa_user(&network, "alice@example.com").await;
    let recovery_pub = FactorKey::from_hex(&recovery).unwrap().public_key_hex();

    kit.delete_factor(&recovery_pub, Some(&recovery)).await.unwrap();
    assert_eq!(kit.get_all_factor_pubs().await.unwrap().len(), 1);

    let mut second = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut second, "alice@example.com").await.unwrap();
    assert!(matches!(
        second.input_factor(&recovery).await,
        Err(CoreKitError::InvalidFactor(_))
    ));
}

#[tokio::test]
async fn test_factor_key_mnemonic_round_trip() {
    let network = SimulatedNetwork::new();
    let (kit, _store, recovery) = create_mfa_user(&network, "alice@example.com").await;

    let mnemonic = kit.key_to_mnemonic(&recovery, SHARE_FORMAT_MNEMONIC).await.unwrap();
    assert_eq!(mnemonic.split_whitespace().count(), 24);
    assert_eq!(
        kit.mnemonic_to_key(&mnemonic, SHARE_FORMAT_MNEMONIC).await.unwrap(),
        recovery
    );

    // The decoded key unlocks the account on a new device.
    let decoded = kit.mnemonic_to_key(&mnemonic, SHARE_FORMAT_MNEMONIC).await.unwrap();
    let settings = Settings::for_tests().with_disable_hash_factor(true);
    let mut device = create_test_kit(&network, settings, memory_store());
    login(&network, &mut device, "alice@example.com").await.unwrap();
    device.input_factor(&decoded).await.unwrap();
    assert_eq!(device.state(), SessionState::Ready);

    assert!(matches!(
        kit.key_to_mnemonic(&recovery, "hex-words").await,
        Err(CoreKitError::InvalidInput(_))
    ));
    assert!(matches!(
        kit.mnemonic_to_key("not a valid share mnemonic", SHARE_FORMAT_MNEMONIC).await,
        Err(CoreKitError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_delete_factor_guards() {
    let network = SimulatedNetwork::new();
    let (mut kit, _store, recovery) = create_mfa_user(&network, "alice@example.com").await;
    let recovery_pub = FactorKey::from_hex(&recovery).unwrap().public_key_hex();

    let wrong_key = FactorKey::random().to_hex();
    assert!(matches!(
        kit.delete_factor(&recovery_pub, Some(&wrong_key)).await,
        Err(CoreKitError::KeyMismatch { .. })
    ));

    let active_pub = FactorKey::from_hex(&kit.get_current_factor_key().unwrap())
        .unwrap()
        .public_key_hex();
    assert!(matches!(
        kit.delete_factor(&active_pub, None).await,
        Err(CoreKitError::InvalidInput(_))
    ));

    assert_eq!(kit.get_all_factor_pubs().await.unwrap().len(), 2);
    assert_eq!(network.engine().counters().await.delete_factor_pub, 1);
}

#[tokio::test]
async fn test_create_factor_with_supplied_key() {
    let network = SimulatedNetwork::new();
    let mut kit = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut kit, "erin@example.com").await.unwrap();

    let supplied = FactorKey::random();
    let created = kit
        .create_factor(
            mpc_core_kit::types::TssShareType::Recovery,
            Some(&supplied.to_hex()),
            FactorDescriptionModule::PasswordShare,
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(created, supplied.to_hex());
    assert!(kit.get_all_factor_pubs().await.unwrap().contains(&supplied.public_key_hex()));
}

// =============================================================================
// Signing
// =============================================================================

#[tokio::test]
async fn test_sign_requires_connected_servers() {
    let network = SimulatedNetwork::new();
    let mut kit = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut kit, "alice@example.com").await.unwrap();

    network.set_signing_online(false);
    let digest = keccak256(b"offline");
    assert!(matches!(
        kit.sign_async(&digest).await,
        Err(CoreKitError::ClientNotConnected)
    ));

    network.set_signing_online(true);
    assert!(kit.sign_async(&digest).await.is_ok());
}

#[tokio::test]
async fn test_signing_session_cleaned_up_on_every_exit() {
    let network = SimulatedNetwork::new();
    let mut kit = create_test_kit(&network, Settings::for_tests(), memory_store());
    login(&network, &mut kit, "alice@example.com").await.unwrap();
    let digest = keccak256(b"cleanup");

    network.set_precompute_available(false);
    assert!(matches!(
        kit.sign_async(&digest).await,
        Err(CoreKitError::ClientNotReady)
    ));
    let sessions = network.signing_sessions();
    assert_eq!(sessions.opened, 1);
    assert_eq!(sessions.cleaned_up, 1);

    network.set_precompute_available(true);
    network.set_signing_online(false);
    assert!(matches!(
        kit.sign_async(&digest).await,
        Err(CoreKitError::ClientNotConnected)
    ));
    assert_eq!(network.signing_sessions().cleaned_up, 2);

    network.set_signing_online(true);
    kit.sign_async(&digest).await.unwrap();
    let sessions = network.signing_sessions();
    assert_eq!(sessions.opened, 3);
    assert_eq!(sessions.cleaned_up, 3);
}

#[test]
fn test_blocking_adapters() {
    let network = SimulatedNetwork::new();
    let mut kit = create_test_kit(&network, Settings::for_tests(), memory_store());

    assert!(EvmSigner::sign(&kit, &keccak256(b"early")).is_empty());
    assert!(kit.public_key().is_empty());

    tokio_test::block_on(login(&network, &mut kit, "alice@example.com")).unwrap();

    let digest = keccak256(b"blocking");
    let signature = EvmSigner::sign(&kit, &digest);
    let public_key = kit.public_key();
    assert_eq!(public_key.len(), 64);

    let full = tokio_test::block_on(kit.get_tss_pub_key()).unwrap();
    assert_eq!(&full[1..], public_key.as_slice());
    assert_recovers(&digest, &signature, &full);

    network.set_signing_online(false);
    assert!(kit.sign_blocking(&digest, Some(Duration::from_secs(2))).is_empty());
}

// =============================================================================
// Persistence and reset
// =============================================================================

#[tokio::test]
async fn test_redb_store_persists_app_state() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("corekit.redb");
    let network = SimulatedNetwork::new();

    let (factor_key, metadata_pub_key) = {
        let store = Arc::new(RedbStore::open(&db_path).unwrap());
        let mut kit = create_test_kit(&network, Settings::for_tests(), store);
        login(&network, &mut kit, "alice@example.com").await.unwrap();
        (
            kit.get_current_factor_key().unwrap(),
            kit.get_metadata_pub_key().unwrap(),
        )
    };

    let store = Arc::new(RedbStore::open(&db_path).unwrap());
    let mut kit = create_test_kit(&network, Settings::for_tests(), store);
    let state = kit.rehydrate().await.unwrap();
    assert_eq!(state.factor_key.as_deref(), Some(factor_key.as_str()));
    assert_eq!(state.metadata_pub_key.as_deref(), Some(metadata_pub_key.as_str()));
    assert!(state.login_time.is_some());
}

#[tokio::test]
async fn test_logout_clears_state() {
    let network = SimulatedNetwork::new();
    let store = memory_store();
    let mut kit = create_test_kit(&network, Settings::for_tests(), store.clone());
    login(&network, &mut kit, "alice@example.com").await.unwrap();

    kit.logout().await.unwrap();
    assert_eq!(kit.state(), SessionState::Unauthenticated);
    assert!(kit.app_state().is_empty());
    assert!(kit.sign_async(&keccak256(b"gone")).await.is_err());

    let mut next = create_test_kit(&network, Settings::for_tests(), store);
    assert!(next.rehydrate().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_account_starts_over() {
    let network = SimulatedNetwork::new();
    let (mut kit, store, _recovery) = create_mfa_user(&network, "alice@example.com").await;
    let old_pub_key = kit.get_tss_pub_key().await.unwrap();

    kit.reset_account().await.unwrap();
    assert_eq!(kit.state(), SessionState::Unauthenticated);
    assert!(kit.app_state().is_empty());
    assert!(kit.get_device_factor().await.is_err());
    assert_eq!(kit.verifier(), None);
    assert_eq!(kit.metadata_endpoint(), None);
    assert!(kit.last_recovery().is_none());
    assert!(matches!(
        kit.get_all_factor_pubs().await,
        Err(CoreKitError::MissingState("threshold key"))
    ));
    assert!(kit.sign_async(&keccak256(b"after reset")).await.is_err());

    let mut fresh = create_test_kit(&network, Settings::for_tests(), store);
    let details = login(&network, &mut fresh, "alice@example.com").await.unwrap();
    assert_eq!(details.required_factors, 0);
    assert_eq!(details.total_factors, 1);
    assert!(fresh.last_recovery().is_none());
    assert_ne!(fresh.get_tss_pub_key().await.unwrap(), old_pub_key);
}
