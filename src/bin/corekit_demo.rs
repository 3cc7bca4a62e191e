//! Core kit walkthrough against the simulated network.
//!
//! Logs in with an id token, signs a digest, and with `COREKIT_DEMO_MFA=1`
//! upgrades the account from the hash factor to device plus recovery factors.
//! State persists in the ReDB file at `COREKIT_DB_PATH`.

use std::sync::Arc;

use anyhow::Context;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use mpc_core_kit::keys::keccak256;
use mpc_core_kit::simulated::SimulatedNetwork;
use mpc_core_kit::storage::RedbStore;
use mpc_core_kit::types::{EnableMfaParams, FactorDescriptionModule, IdTokenLoginParams};
use mpc_core_kit::{MpcCoreKit, Settings, telemetry};

const DEMO_VERIFIER: &str = "corekit-demo-verifier";
const DEMO_USER: &str = "demo@example.com";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let settings = Settings::from_env();
    if let Err(message) = settings.validate() {
        tracing::error!("{message}");
        std::process::exit(1);
    }

    let store = RedbStore::open(settings.db_path()).context("Failed to open store")?;
    let network = SimulatedNetwork::new();
    let mut kit = MpcCoreKit::new(settings, network.network(), Arc::new(store))?;
    kit.rehydrate().await?;

    let id_token = network.identity().issue_id_token(DEMO_USER)?;
    let details = kit
        .login_with_jwt(IdTokenLoginParams {
            verifier: DEMO_VERIFIER.to_string(),
            verifier_id: DEMO_USER.to_string(),
            id_token,
            sub_verifier: None,
            additional_params: Default::default(),
        })
        .await?;
    tracing::info!(
        state = %kit.state(),
        required_factors = details.required_factors,
        total_factors = details.total_factors,
        "Logged in"
    );

    let digest = keccak256(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    let signature = kit.sign_async(&digest).await?;
    let public_key = kit.get_tss_pub_key().await?;

    let recovery_id = RecoveryId::from_byte(signature[64]).context("Invalid recovery id")?;
    let recovered = VerifyingKey::recover_from_prehash(&digest, &Signature::from_slice(&signature[..64])?, recovery_id)?;
    let verified = recovered.to_encoded_point(false).as_bytes() == public_key.as_slice();

    println!("tss public key: 0x{}", hex::encode(&public_key));
    println!("signature:      0x{}", hex::encode(&signature));
    println!("recovers key:   {verified}");

    if std::env::var("COREKIT_DEMO_MFA").is_ok_and(|value| value == "1") {
        let recovery = kit
            .enable_mfa(
                EnableMfaParams {
                    description: FactorDescriptionModule::SeedPhrase,
                    ..Default::default()
                },
                true,
            )
            .await?;
        let factors = kit.get_all_factor_pubs().await?;
        println!("factors:        {}", factors.join(", "));
        if let Some(recovery) = recovery {
            println!("recovery key:   {recovery}");
        }
    }

    kit.logout().await?;
    telemetry::shutdown_tracing();
    Ok(())
}
