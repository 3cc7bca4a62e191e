//! Minimal recoverable session state persisted between launches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Application state persisted to the local store after every mutation.
///
/// Updates go through [`AppState::merge`]: a field is only replaced when the
/// incoming value is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor_key: Option<String>,
    /// Compressed metadata public key of the threshold key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_pub_key: Option<String>,
    /// Share index used for metadata share backup and recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_metadata_share_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_time: Option<DateTime<Utc>>,
}

impl AppState {
    pub fn with_factor_key(mut self, factor_key: impl Into<String>) -> Self {
        self.factor_key = Some(factor_key.into());
        self
    }

    pub fn with_metadata_pub_key(mut self, metadata_pub_key: impl Into<String>) -> Self {
        self.metadata_pub_key = Some(metadata_pub_key.into());
        self
    }

    pub fn with_device_metadata_share_index(mut self, share_index: impl Into<String>) -> Self {
        self.device_metadata_share_index = Some(share_index.into());
        self
    }

    pub fn with_login_time(mut self, login_time: DateTime<Utc>) -> Self {
        self.login_time = Some(login_time);
        self
    }

    /// Field-wise merge; absent incoming fields leave the current value alone.
    pub fn merge(&mut self, mut other: Self) {
        if let Some(factor_key) = other.factor_key.take() {
            if let Some(previous) = self.factor_key.as_mut() {
                previous.zeroize();
            }
            self.factor_key = Some(factor_key);
        }
        if let Some(metadata_pub_key) = other.metadata_pub_key.take() {
            self.metadata_pub_key = Some(metadata_pub_key);
        }
        if let Some(share_index) = other.device_metadata_share_index.take() {
            self.device_metadata_share_index = Some(share_index);
        }
        if let Some(login_time) = other.login_time.take() {
            self.login_time = Some(login_time);
        }
    }

    /// Wipe every field, zeroizing the factor key in place first.
    pub fn clear(&mut self) {
        if let Some(factor_key) = self.factor_key.as_mut() {
            factor_key.zeroize();
        }
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        if let Some(factor_key) = self.factor_key.as_mut() {
            factor_key.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_is_field_wise() {
        let mut state = AppState::default().with_metadata_pub_key("Y");
        state.merge(AppState::default().with_factor_key("X"));

        assert_eq!(state.factor_key.as_deref(), Some("X"));
        assert_eq!(state.metadata_pub_key.as_deref(), Some("Y"));
    }

    #[test]
    fn test_merge_empty_changes_nothing() {
        let mut state = AppState::default()
            .with_factor_key("X")
            .with_device_metadata_share_index("abc");
        let before = state.clone();

        state.merge(AppState::default());
        assert_eq!(state, before);

        // Idempotent
        state.merge(AppState::default().with_factor_key("X"));
        state.merge(AppState::default().with_factor_key("X"));
        assert_eq!(state, before);
    }

    #[test]
    fn test_clear() {
        let mut state = AppState::default()
            .with_factor_key("X")
            .with_login_time(Utc::now());
        state.clear();
        assert!(state.is_empty());
    }

    #[test]
    fn test_json_shape() {
        let state = AppState::default()
            .with_metadata_pub_key("02aa")
            .with_device_metadata_share_index("");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["metadataPubKey"], "02aa");
        assert_eq!(json["deviceMetadataShareIndex"], "");
        assert!(json.get("factorKey").is_none());

        let decoded: AppState = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, state);
    }
}
