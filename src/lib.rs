// Crate-level lint configuration
// Allow noisy pedantic/cargo lints that aren't worth fixing individually
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::missing_panics_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity (e.g., CoreKitError in error mod)
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs
#![allow(clippy::missing_const_for_fn)] // Often debatable, runtime doesn't benefit

//! MPC Core Kit
//!
//! Client-side session and key-recovery layer of a threshold (TSS) wallet.
//!
//! ## Architecture
//!
//! - **Session** ([`MpcCoreKit`]): login, new-user setup, recovery of returning
//!   users, factor lifecycle and the MFA upgrade
//! - **Collaborators** ([`network`]): identity provider, node directory,
//!   threshold key engine and signing client sit behind async traits
//! - **Signing bootstrap** ([`tss`]): session ids, party endpoints and the
//!   coefficients that tie the user share to the server shares
//! - **Storage** ([`storage`]): one JSON object per store key over any
//!   [`storage::KeyValueStore`], with in-memory and ReDB backends
//!
//! ## Security Model
//!
//! - Factor keys and shares are zeroized on drop and never logged
//! - Deleting a factor can tombstone its metadata backup so the key stops resolving
//! - Every factor mutation takes `&mut self`; one kit runs one mutation at a time
//!
//! [`simulated`] provides an in-process network for tests and the demo binary.

pub mod config;
pub mod corekit;
pub mod error;
pub mod keys;
pub mod network;
pub mod signer;
pub mod simulated;
pub mod state;
pub mod storage;
pub mod tss;
pub mod types;

pub mod telemetry {
    //! Console tracing setup.

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    /// Initialize tracing from `RUST_LOG`. `COREKIT_LOG_FORMAT=json` switches to JSON lines.
    pub fn init_tracing() {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "mpc_core_kit=info".into());
        let json = std::env::var("COREKIT_LOG_FORMAT").is_ok_and(|format| format.trim().eq_ignore_ascii_case("json"));

        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    /// Nothing is buffered; kept so hosts can pair it with `init_tracing`.
    pub fn shutdown_tracing() {}
}

// Re-export commonly used types
pub use config::{Settings, Web3AuthNetwork};
pub use corekit::MpcCoreKit;
pub use error::{CoreKitError, CoreKitResult};
pub use signer::EvmSigner;
pub use types::{KeyDetails, SessionState};
