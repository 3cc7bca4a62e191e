//! Opportunistic factor recovery for returning users.
//!
//! Sources are tried in order. A source that has nothing to offer or whose
//! factor no longer unlocks a share is recorded and skipped; running out of
//! sources leaves the session in [`SessionState::AwaitingFactor`]. Login
//! surfaces the rejection only when the last source tried was rejected.

use serde::Serialize;

use super::MpcCoreKit;
use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{FactorKey, hash_factor_key};
use crate::storage::FactorStorage;
use crate::types::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    /// Factor derived from the oauth key and client id.
    HashFactor,
    /// Factor cached in local device storage.
    DeviceFactor,
}

impl RecoverySource {
    /// Sources in the order they are tried.
    pub fn ordered(disable_hash_factor: bool) -> Vec<Self> {
        if disable_hash_factor {
            vec![Self::DeviceFactor]
        } else {
            vec![Self::HashFactor, Self::DeviceFactor]
        }
    }
}

impl std::fmt::Display for RecoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashFactor => write!(f, "hash_factor"),
            Self::DeviceFactor => write!(f, "device_factor"),
        }
    }
}

/// Result of one source.
enum RecoveryOutcome {
    Recovered(FactorKey),
    NotFound,
    Invalid(CoreKitError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RecoveryStatus {
    Recovered,
    NotFound,
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryAttempt {
    pub source: RecoverySource,
    pub status: RecoveryStatus,
}

/// Every source tried during one login, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub attempts: Vec<RecoveryAttempt>,
}

impl RecoveryReport {
    pub fn recovered_by(&self) -> Option<RecoverySource> {
        self.attempts
            .iter()
            .find(|attempt| attempt.status == RecoveryStatus::Recovered)
            .map(|attempt| attempt.source)
    }

    /// The last failure if no source succeeded and the final one was broken.
    pub fn final_error(&self) -> Option<&str> {
        if self.recovered_by().is_some() {
            return None;
        }
        match self.attempts.last().map(|attempt| &attempt.status) {
            Some(RecoveryStatus::Invalid(reason)) => Some(reason.as_str()),
            _ => None,
        }
    }
}

impl MpcCoreKit {
    /// Fails only when the last source tried produced a rejected factor. The
    /// session is left awaiting input either way.
    pub(super) async fn existing_user(&mut self) -> CoreKitResult<()> {
        let mut report = RecoveryReport::default();
        let mut last_invalid = None;

        for source in RecoverySource::ordered(self.settings.disable_hash_factor()) {
            let outcome = match self.candidate_factor(source).await {
                Ok(Some(factor_key)) => match self.input_factor(&factor_key.to_hex()).await {
                    Ok(()) => RecoveryOutcome::Recovered(factor_key),
                    Err(e) => RecoveryOutcome::Invalid(e),
                },
                Ok(None) => RecoveryOutcome::NotFound,
                Err(e) if e.is_not_found() => RecoveryOutcome::NotFound,
                Err(e) => RecoveryOutcome::Invalid(e),
            };

            let status = match outcome {
                RecoveryOutcome::Recovered(factor_key) => {
                    tracing::info!(%source, factor_pub = %factor_key.public_key_hex(), "Recovered factor");
                    RecoveryStatus::Recovered
                }
                RecoveryOutcome::NotFound => {
                    tracing::debug!(%source, "Recovery source has no factor");
                    last_invalid = None;
                    RecoveryStatus::NotFound
                }
                RecoveryOutcome::Invalid(e) => {
                    tracing::warn!(%source, error = %e, "Recovery source factor rejected");
                    let status = RecoveryStatus::Invalid(e.to_string());
                    last_invalid = Some(e);
                    status
                }
            };
            let recovered = status == RecoveryStatus::Recovered;
            report.attempts.push(RecoveryAttempt { source, status });
            if recovered {
                break;
            }
        }

        let recovered = report.recovered_by().is_some();
        if !recovered {
            self.state = SessionState::AwaitingFactor;
            tracing::info!(attempts = report.attempts.len(), "No factor recovered; awaiting input");
        }
        self.last_recovery = Some(report);
        match last_invalid {
            Some(e) if !recovered => Err(e),
            _ => Ok(()),
        }
    }

    async fn candidate_factor(&self, source: RecoverySource) -> CoreKitResult<Option<FactorKey>> {
        match source {
            RecoverySource::HashFactor => {
                let session = self.login_session()?;
                Ok(Some(hash_factor_key(&session.oauth_key, self.settings.client_id())?))
            }
            RecoverySource::DeviceFactor => {
                let metadata_pub_key = self.get_metadata_pub_key()?;
                let factor = self.device_factors.get_factor(&metadata_pub_key).await?;
                Ok(Some(FactorKey::from_hex(&factor)?))
            }
        }
    }
}
