//! Core kit configuration derived from environment variables.
//!
//! ## Environment Variables
//!
//! - `COREKIT_CLIENT_ID`: Web3Auth client id (required, feeds the hash factor)
//! - `COREKIT_NETWORK`: target network (default: sapphire_devnet)
//! - `COREKIT_DISABLE_HASH_FACTOR`: disable the hash-derived default factor
//! - `COREKIT_SIGN_TIMEOUT_MS`: bounded wait for blocking adapters
//! - `COREKIT_STORE_KEY`: key of the JSON object held in the local store
//! - `COREKIT_DB_PATH`: path of the ReDB file backing the durable store
//! - `COREKIT_DEVICE_NAME`: label recorded in device factor descriptions
//! - `COREKIT_LOG_FORMAT`: `json` for JSON log lines (read by `telemetry`)
//! - `RUST_LOG`: Log level filter

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_SIGN_TIMEOUT_MS: u64 = 100_000;
const DEFAULT_STORE_KEY: &str = "corekitStore";
const DEFAULT_DB_PATH: &str = "./.data/corekit.redb";

/// Helper to get trimmed env var or empty string.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

/// Helper to get an optional non-empty env var.
fn env_opt(name: &str) -> Option<String> {
    let value = env_trim(name);
    if value.is_empty() { None } else { Some(value) }
}

/// Check if a string value is truthy.
fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Web3Auth network the kit talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Web3AuthNetwork {
    #[default]
    SapphireDevnet,
    SapphireMainnet,
    Mainnet,
    Testnet,
    Cyan,
    Aqua,
    Celeste,
}

impl Web3AuthNetwork {
    /// Sapphire networks are the ones that support TSS accounts natively.
    pub fn is_sapphire(&self) -> bool {
        matches!(self, Self::SapphireDevnet | Self::SapphireMainnet)
    }
}

impl FromStr for Web3AuthNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "sapphire_devnet" => Ok(Self::SapphireDevnet),
            "sapphire_mainnet" => Ok(Self::SapphireMainnet),
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "cyan" => Ok(Self::Cyan),
            "aqua" => Ok(Self::Aqua),
            "celeste" => Ok(Self::Celeste),
            other => Err(format!(
                "Invalid network '{other}'. Must be one of sapphire_devnet, sapphire_mainnet, \
                 mainnet, testnet, cyan, aqua, celeste."
            )),
        }
    }
}

impl std::fmt::Display for Web3AuthNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SapphireDevnet => write!(f, "sapphire_devnet"),
            Self::SapphireMainnet => write!(f, "sapphire_mainnet"),
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
            Self::Cyan => write!(f, "cyan"),
            Self::Aqua => write!(f, "aqua"),
            Self::Celeste => write!(f, "celeste"),
        }
    }
}

/// Core kit configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    client_id: String,
    network: Web3AuthNetwork,
    disable_hash_factor: bool,
    sign_timeout_ms: u64,
    store_key: String,
    db_path: PathBuf,
    device_name: Option<String>,
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// Unparseable values fall back to their defaults; call [`Settings::validate`]
    /// before use.
    pub fn from_env() -> Self {
        let network = env_trim("COREKIT_NETWORK")
            .parse::<Web3AuthNetwork>()
            .unwrap_or_default();

        let sign_timeout_ms = env_trim("COREKIT_SIGN_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_SIGN_TIMEOUT_MS);

        let db_path = env_opt("COREKIT_DB_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_DB_PATH), PathBuf::from);

        Self {
            client_id: env_trim("COREKIT_CLIENT_ID"),
            network,
            disable_hash_factor: is_truthy(&env_trim("COREKIT_DISABLE_HASH_FACTOR")),
            sign_timeout_ms,
            store_key: env_opt("COREKIT_STORE_KEY").unwrap_or_else(|| DEFAULT_STORE_KEY.to_string()),
            db_path,
            device_name: env_opt("COREKIT_DEVICE_NAME"),
        }
    }

    /// Create settings programmatically for a client id and network.
    pub fn new(client_id: impl Into<String>, network: Web3AuthNetwork) -> Self {
        Self {
            client_id: client_id.into(),
            network,
            disable_hash_factor: false,
            sign_timeout_ms: DEFAULT_SIGN_TIMEOUT_MS,
            store_key: DEFAULT_STORE_KEY.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            device_name: None,
        }
    }

    /// Create settings for tests.
    pub fn for_tests() -> Self {
        Self {
            client_id: "corekit-test-client".to_string(),
            network: Web3AuthNetwork::SapphireDevnet,
            disable_hash_factor: false,
            sign_timeout_ms: 10_000,
            store_key: DEFAULT_STORE_KEY.to_string(),
            db_path: PathBuf::from("./.data/test-corekit.redb"),
            device_name: Some("test-device".to_string()),
        }
    }

    pub fn with_disable_hash_factor(mut self, disable: bool) -> Self {
        self.disable_hash_factor = disable;
        self
    }

    pub fn with_sign_timeout(mut self, timeout: Duration) -> Self {
        self.sign_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Validate settings.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.is_empty() {
            return Err("COREKIT_CLIENT_ID is required. \
                 Provide the Web3Auth client id of this application."
                .to_string());
        }
        if self.store_key.is_empty() {
            return Err("COREKIT_STORE_KEY must not be empty.".to_string());
        }
        if self.sign_timeout_ms == 0 {
            return Err("COREKIT_SIGN_TIMEOUT_MS must be greater than zero.".to_string());
        }
        Ok(())
    }

    // Getters

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn network(&self) -> Web3AuthNetwork {
        self.network
    }

    pub fn disable_hash_factor(&self) -> bool {
        self.disable_hash_factor
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_timeout_ms)
    }

    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}
