//! Factor, key and login types shared across the kit.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{CoreKitError, CoreKitResult};

/// Tag created for every new account.
pub const DEFAULT_TSS_TAG: &str = "default";

/// Metadata share index held by the service provider; never backed up under a factor.
pub const SERVICE_PROVIDER_SHARE_INDEX: &str = "1";

/// Share serialization format for a word mnemonic.
pub const SHARE_FORMAT_MNEMONIC: &str = "mnemonic";

// =============================================================================
// Factor Types
// =============================================================================

/// Kind of factor recorded in a factor description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FactorDescriptionModule {
    #[serde(rename = "hashedShare")]
    HashedShare,
    #[serde(rename = "tssSecurityQuestions")]
    SecurityQuestions,
    #[serde(rename = "deviceShare")]
    DeviceShare,
    #[serde(rename = "seedPhrase")]
    SeedPhrase,
    #[serde(rename = "passwordShare")]
    PasswordShare,
    #[serde(rename = "socialShare")]
    SocialShare,
    #[default]
    #[serde(rename = "Other")]
    Other,
}

impl std::fmt::Display for FactorDescriptionModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashedShare => write!(f, "hashedShare"),
            Self::SecurityQuestions => write!(f, "tssSecurityQuestions"),
            Self::DeviceShare => write!(f, "deviceShare"),
            Self::SeedPhrase => write!(f, "seedPhrase"),
            Self::PasswordShare => write!(f, "passwordShare"),
            Self::SocialShare => write!(f, "socialShare"),
            Self::Other => write!(f, "Other"),
        }
    }
}

/// Logical TSS share slot a factor encrypts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TssShareType {
    Device,
    Recovery,
}

impl TssShareType {
    pub fn index(self) -> u32 {
        match self {
            Self::Device => 2,
            Self::Recovery => 3,
        }
    }

    pub fn from_index(index: u32) -> CoreKitResult<Self> {
        match index {
            2 => Ok(Self::Device),
            3 => Ok(Self::Recovery),
            other => Err(CoreKitError::InvalidInput(format!(
                "Unknown TSS share index {other}"
            ))),
        }
    }

    /// Parse the index the engine reports for a share (base-16 string).
    pub fn from_index_str(index: &str) -> CoreKitResult<Self> {
        let value = u32::from_str_radix(index.trim().trim_start_matches("0x"), 16)
            .map_err(|e| CoreKitError::InvalidInput(format!("Invalid TSS index '{index}': {e}")))?;
        Self::from_index(value)
    }

    /// True when `index` (base-16, as returned by the engine) names this slot.
    pub fn matches_index_str(self, index: &str) -> bool {
        Self::from_index_str(index).is_ok_and(|share_type| share_type == self)
    }
}

impl std::fmt::Display for TssShareType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Description stored alongside a factor public key in the engine metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorDescription {
    pub module: FactorDescriptionModule,
    /// Share slot, serialized as its decimal index ("2" or "3").
    #[serde(with = "share_index_string")]
    pub tss_share_index: TssShareType,
    /// Unix seconds.
    pub date_added: i64,
    /// Caller supplied metadata, flattened next to the well-known fields.
    #[serde(flatten)]
    pub additional: BTreeMap<String, serde_json::Value>,
}

const RESERVED_DESCRIPTION_KEYS: [&str; 3] = ["module", "tssShareIndex", "dateAdded"];

impl FactorDescription {
    /// Create a description dated now. Well-known fields win over colliding metadata keys.
    pub fn new(
        module: FactorDescriptionModule,
        tss_share_index: TssShareType,
        mut additional: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        for key in RESERVED_DESCRIPTION_KEYS {
            additional.remove(key);
        }
        Self {
            module,
            tss_share_index,
            date_added: Utc::now().timestamp(),
            additional,
        }
    }

    pub fn to_json_string(&self) -> CoreKitResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

mod share_index_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::TssShareType;

    pub fn serialize<S: Serializer>(value: &TssShareType, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.index().to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TssShareType, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let index = raw.parse::<u32>().map_err(D::Error::custom)?;
        TssShareType::from_index(index).map_err(D::Error::custom)
    }
}

// =============================================================================
// Key Details
// =============================================================================

/// Snapshot of the account produced by login and on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDetails {
    /// Uncompressed hex of the TSS public key, once the session has a usable factor.
    pub tss_pub_key: Option<String>,
    pub metadata_pub_key: String,
    /// Factors still needed before the key can be reconstructed.
    pub required_factors: u32,
    pub threshold: u32,
    /// Share index to raw description JSON strings.
    pub share_descriptions: BTreeMap<String, Vec<String>>,
    pub total_shares: u32,
    pub total_factors: usize,
}

// =============================================================================
// Login Types
// =============================================================================

/// OAuth provider selected for interactive login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginProvider {
    Google,
    Facebook,
    Reddit,
    Discord,
    Twitch,
    Apple,
    Github,
    Linkedin,
    Twitter,
    Weibo,
    Line,
    EmailPasswordless,
    Jwt,
}

/// Parameters for interactive OAuth login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthLoginParams {
    pub login_provider: LoginProvider,
    pub client_id: String,
    pub verifier: String,
    #[serde(default)]
    pub jwt_params: BTreeMap<String, String>,
    pub redirect_url: String,
    pub browser_redirect_url: String,
}

impl OAuthLoginParams {
    pub fn new(login_provider: LoginProvider, client_id: impl Into<String>, verifier: impl Into<String>) -> Self {
        Self {
            login_provider,
            client_id: client_id.into(),
            verifier: verifier.into(),
            jwt_params: BTreeMap::new(),
            redirect_url: "tdsdk://tdsdk/oauthCallback".to_string(),
            browser_redirect_url: "https://scripts.toruswallet.io/redirect.html".to_string(),
        }
    }

    pub fn with_jwt_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.jwt_params.insert(key.into(), value.into());
        self
    }
}

/// Parameters for login with an id token issued by the application's own auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenLoginParams {
    /// Verifier name, or the top-level verifier of an aggregate setup.
    pub verifier: String,
    /// Unique user identifier for the verifier (e.g. the `sub` claim).
    pub verifier_id: String,
    pub id_token: String,
    #[serde(default)]
    pub sub_verifier: Option<String>,
    #[serde(default)]
    pub additional_params: BTreeMap<String, serde_json::Value>,
}

/// Recovery factor options for [`crate::MpcCoreKit::enable_mfa`].
#[derive(Debug, Clone, Default)]
pub struct EnableMfaParams {
    /// Use this key instead of generating one.
    pub factor_key: Option<String>,
    pub description: FactorDescriptionModule,
    pub additional_metadata: BTreeMap<String, serde_json::Value>,
}

// =============================================================================
// Session State
// =============================================================================

/// Login state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    ThresholdKeyInitialized { required_factors: u32 },
    /// A factor key is active and the TSS share is loaded.
    Ready,
    /// Existing user with no recoverable factor; call `input_factor`.
    AwaitingFactor,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::ThresholdKeyInitialized { .. } => write!(f, "threshold_key_initialized"),
            Self::Ready => write!(f, "ready"),
            Self::AwaitingFactor => write!(f, "awaiting_factor"),
        }
    }
}
