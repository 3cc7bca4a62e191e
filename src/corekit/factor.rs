//! Factor lifecycle: create, delete, device factor cache and MFA upgrade.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{KEY_NOT_FOUND_METADATA, MpcCoreKit};
use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{FactorKey, hash_factor_key, to_compressed_hex};
use crate::storage::FactorStorage;
use crate::types::{EnableMfaParams, FactorDescription, FactorDescriptionModule, TssShareType};

impl MpcCoreKit {
    /// Register a new factor for `share_type` and return its key in hex.
    ///
    /// When the active factor already unlocks `share_type` the new key is a
    /// copy of that slot; otherwise a new slot is registered with the nodes.
    /// The device metadata share is backed up under the new key either way.
    pub async fn create_factor(
        &mut self,
        share_type: TssShareType,
        factor_key: Option<&str>,
        module: FactorDescriptionModule,
        additional_metadata: BTreeMap<String, Value>,
    ) -> CoreKitResult<String> {
        let threshold_key = self.threshold_key()?;
        let current = self.active_factor()?.clone();
        let share_index = self.get_device_metadata_share_index()?;

        let new_factor = match factor_key {
            Some(hex) => FactorKey::from_hex(hex)?,
            None => FactorKey::random(),
        };
        let new_factor_pub = new_factor.public_key_hex();

        let tag = threshold_key.get_tss_tag().await?;
        let current_share = threshold_key.get_tss_share(&tag, &current).await?;

        if share_type.matches_index_str(&current_share.index) {
            threshold_key
                .copy_factor_pub(&tag, &current, &new_factor_pub, share_type.index())
                .await?;
            tracing::debug!(factor_pub = %new_factor_pub, %share_type, "Copied factor into existing share slot");
        } else {
            let signatures = self.login_session()?.auth_signatures.clone();
            threshold_key
                .add_factor_pub(&tag, &current, &signatures, &new_factor_pub, share_type.index())
                .await?;
            tracing::debug!(factor_pub = %new_factor_pub, %share_type, "Registered factor for new share slot");
        }

        threshold_key
            .backup_share_with_factor_key(&share_index, &new_factor)
            .await?;

        let description = FactorDescription::new(module, share_type, additional_metadata);
        threshold_key
            .add_share_description(&new_factor_pub, &description.to_json_string()?)
            .await?;

        tracing::info!(factor_pub = %new_factor_pub, %share_type, %module, "Created factor");
        Ok(new_factor.to_hex())
    }

    /// Remove a factor from the authorized set.
    ///
    /// With `factor_key`, its metadata backup is also tombstoned so the key can
    /// no longer be input. The key must match `factor_pub`.
    pub async fn delete_factor(&mut self, factor_pub: &str, factor_key: Option<&str>) -> CoreKitResult<()> {
        let threshold_key = self.threshold_key()?;
        let current = self.active_factor()?.clone();
        let factor_pub = to_compressed_hex(factor_pub)?;

        if current.public_key_hex() == factor_pub {
            return Err(CoreKitError::InvalidInput(
                "Cannot delete the active factor".to_string(),
            ));
        }

        let deleted_key = factor_key.map(FactorKey::from_hex).transpose()?;
        if let Some(key) = &deleted_key
            && key.public_key_hex() != factor_pub
        {
            return Err(CoreKitError::KeyMismatch { expected: factor_pub });
        }

        let tag = threshold_key.get_tss_tag().await?;
        let signatures = self.login_session()?.auth_signatures.clone();
        threshold_key
            .delete_factor_pub(&tag, &current, &signatures, &factor_pub)
            .await?;

        if let Some(key) = deleted_key {
            threshold_key
                .storage_layer_set_metadata(&key.to_hex(), KEY_NOT_FOUND_METADATA)
                .await?;
        }

        tracing::info!(factor_pub = %factor_pub, tombstoned = factor_key.is_some(), "Deleted factor");
        Ok(())
    }

    /// Factor public keys registered for the current tag.
    pub async fn get_all_factor_pubs(&self) -> CoreKitResult<Vec<String>> {
        let threshold_key = self.threshold_key()?;
        let tag = threshold_key.get_tss_tag().await?;
        threshold_key.get_all_factor_pub(&tag).await
    }

    /// Encode a factor key as a mnemonic in `format`, e.g. [`crate::types::SHARE_FORMAT_MNEMONIC`].
    pub async fn key_to_mnemonic(&self, factor_key: &str, format: &str) -> CoreKitResult<String> {
        let factor_key = FactorKey::from_hex(factor_key)?;
        self.threshold_key()?
            .serialize_share(&factor_key.to_hex(), format)
            .await
    }

    /// Decode a mnemonic produced by [`MpcCoreKit::key_to_mnemonic`] back to the factor key hex.
    pub async fn mnemonic_to_key(&self, mnemonic: &str, format: &str) -> CoreKitResult<String> {
        self.threshold_key()?.deserialize_share(mnemonic, format).await
    }

    pub async fn get_device_factor(&self) -> CoreKitResult<String> {
        let metadata_pub_key = self.get_metadata_pub_key()?;
        self.device_factors.get_factor(&metadata_pub_key).await
    }

    pub async fn set_device_factor(&mut self, factor_key: &str) -> CoreKitResult<()> {
        let metadata_pub_key = self.get_metadata_pub_key()?;
        let factor_key = FactorKey::from_hex(factor_key)?;
        self.device_factors
            .set_factor(&metadata_pub_key, &factor_key.to_hex())
            .await
    }

    /// Replace the hash factor with a device factor, optionally adding a
    /// recovery factor whose key is returned.
    ///
    /// The device factor is stored locally and made active before the hash
    /// factor is deleted; any failure before that point leaves the hash
    /// factor in place.
    pub async fn enable_mfa(
        &mut self,
        params: EnableMfaParams,
        recovery_factor: bool,
    ) -> CoreKitResult<Option<String>> {
        self.get_metadata_pub_key()?;
        let hash_factor = {
            let session = self.login_session()?;
            hash_factor_key(&session.oauth_key, self.settings.client_id())?
        };
        let hash_factor_pub = hash_factor.public_key_hex();

        let registered = self
            .get_all_factor_pubs()
            .await?
            .iter()
            .filter_map(|factor_pub| to_compressed_hex(factor_pub).ok())
            .any(|factor_pub| factor_pub == hash_factor_pub);
        if !registered {
            return Err(CoreKitError::MfaAlreadyEnabled);
        }

        let device_metadata = self.device_metadata();
        let device_factor = self
            .create_factor(
                TssShareType::Device,
                None,
                FactorDescriptionModule::DeviceShare,
                device_metadata,
            )
            .await?;
        self.set_device_factor(&device_factor).await?;
        self.input_factor(&device_factor).await?;

        self.delete_factor(&hash_factor_pub, Some(&hash_factor.to_hex()))
            .await?;
        tracing::info!("Hash factor replaced by device factor");

        if !recovery_factor {
            return Ok(None);
        }
        let EnableMfaParams {
            factor_key,
            description,
            additional_metadata,
        } = params;
        let recovery = self
            .create_factor(
                TssShareType::Recovery,
                factor_key.as_deref(),
                description,
                additional_metadata,
            )
            .await?;
        Ok(Some(recovery))
    }

    fn device_metadata(&self) -> BTreeMap<String, Value> {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "device".to_string(),
            Value::String(std::env::consts::OS.to_string()),
        );
        if let Some(name) = self.settings.device_name() {
            metadata.insert("name".to_string(), Value::String(name.to_string()));
        }
        metadata
    }
}
