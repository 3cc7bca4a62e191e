//! In-process signing servers.
//!
//! The servers weight their shares by the session coefficients during
//! precompute; the client adds its own weighted share at sign time and signs
//! with the combined scalar. The combined key is checked against the session
//! public key before any signature leaves the client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, PublicKey, Scalar};

use super::engine::SimulatedEngine;
use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{compressed_hex, keccak256, parse_public_key};
use crate::network::{Precompute, RawSignature, TssClient, TssClientFactory};
use crate::tss::SessionDescriptor;
use crate::tss::coefficients::{scalar_from_hex_index, user_coefficient};

fn scalar_from_bytes(bytes: &[u8]) -> CoreKitResult<Scalar> {
    if bytes.len() != 32 {
        return Err(CoreKitError::SigningFailed(format!(
            "expected 32-byte scalar, got {}",
            bytes.len()
        )));
    }
    let scalar: Option<Scalar> = Scalar::from_repr(FieldBytes::clone_from_slice(bytes)).into();
    scalar.ok_or_else(|| CoreKitError::SigningFailed("scalar out of range".to_string()))
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Signing sessions opened and torn down so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub opened: usize,
    pub cleaned_up: usize,
}

#[derive(Default)]
struct SessionTally {
    opened: AtomicUsize,
    cleaned_up: AtomicUsize,
}

/// Signing servers that can be taken offline.
#[derive(Clone)]
pub struct SimulatedTssServers {
    engine: SimulatedEngine,
    online: Arc<AtomicBool>,
    precompute_available: Arc<AtomicBool>,
    tally: Arc<SessionTally>,
}

impl SimulatedTssServers {
    pub fn new(engine: SimulatedEngine) -> Self {
        Self {
            engine,
            online: Arc::new(AtomicBool::new(true)),
            precompute_available: Arc::new(AtomicBool::new(true)),
            tally: Arc::new(SessionTally::default()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// With precompute unavailable the servers answer but never become ready.
    pub fn set_precompute_available(&self, available: bool) {
        self.precompute_available.store(available, Ordering::SeqCst);
    }

    pub fn session_counters(&self) -> SessionCounters {
        SessionCounters {
            opened: self.tally.opened.load(Ordering::SeqCst),
            cleaned_up: self.tally.cleaned_up.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl TssClientFactory for SimulatedTssServers {
    async fn connect(&self, session: &SessionDescriptor) -> CoreKitResult<Box<dyn TssClient>> {
        let public_key = BASE64
            .decode(&session.public_key)
            .map_err(|e| CoreKitError::InvalidInput(format!("Invalid session public key: {e}")))?;
        let tss_pub_key = compressed_hex(&parse_public_key(&hex::encode(public_key))?);

        let share = BASE64
            .decode(&session.share)
            .map_err(|e| CoreKitError::InvalidInput(format!("Invalid session share: {e}")))?;
        let user_share = scalar_from_bytes(&share)?;
        let user_index = scalar_from_hex_index(&session.user_tss_index)?;

        let servers = session.endpoints.iter().flatten().count();
        let connected = self.online.load(Ordering::SeqCst) && servers + 1 == session.party_indexes.len();
        self.tally.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session_id = %session.session_id, servers, connected, "Simulated signing session opened");

        Ok(Box::new(SimulatedTssClient {
            engine: self.engine.clone(),
            precompute_available: self.precompute_available.load(Ordering::SeqCst),
            tally: self.tally.clone(),
            tss_pub_key,
            user_share,
            user_index,
            connected,
            server_part: None,
        }))
    }
}

struct SimulatedTssClient {
    engine: SimulatedEngine,
    precompute_available: bool,
    tally: Arc<SessionTally>,
    tss_pub_key: String,
    user_share: Scalar,
    user_index: Scalar,
    connected: bool,
    server_part: Option<Scalar>,
}

#[async_trait]
impl TssClient for SimulatedTssClient {
    async fn check_connected(&self) -> CoreKitResult<bool> {
        Ok(self.connected)
    }

    async fn precompute(
        &mut self,
        server_coefficients: &BTreeMap<String, String>,
        signatures: &[String],
    ) -> CoreKitResult<Precompute> {
        if !self.connected {
            return Err(CoreKitError::ClientNotConnected);
        }
        if signatures.is_empty() {
            return Err(CoreKitError::Authentication("missing session signatures".to_string()));
        }

        let mut sum = Scalar::ZERO;
        for (index, coefficient) in server_coefficients {
            let server_index = u32::from_str_radix(index, 16)
                .map_err(|e| CoreKitError::InvalidInput(format!("Invalid server index {index}: {e}")))?;
            let coefficient = scalar_from_hex_index(coefficient)?;
            let share = self.engine.server_share(&self.tss_pub_key, server_index).await?;
            sum += coefficient * share;
        }
        if self.precompute_available {
            self.server_part = Some(sum);
        }
        Ok(Precompute::new(sum.to_bytes().to_vec()))
    }

    async fn is_ready(&self) -> CoreKitResult<bool> {
        Ok(self.server_part.is_some())
    }

    async fn sign(
        &mut self,
        message: &str,
        hash_only: bool,
        _original_message: &str,
        precompute: &Precompute,
        _signatures: &[String],
    ) -> CoreKitResult<RawSignature> {
        if self.server_part.is_none() {
            return Err(CoreKitError::ClientNotReady);
        }
        let message = BASE64
            .decode(message)
            .map_err(|e| CoreKitError::InvalidInput(format!("Invalid message encoding: {e}")))?;
        let digest = if hash_only { message } else { keccak256(&message).to_vec() };
        if digest.len() != 32 {
            return Err(CoreKitError::SigningFailed(format!(
                "expected 32-byte digest, got {}",
                digest.len()
            )));
        }

        let server_part = scalar_from_bytes(precompute.as_bytes())?;
        let secret = user_coefficient(&self.user_index)? * self.user_share + server_part;
        let signing_key = SigningKey::from_bytes(&secret.to_bytes())
            .map_err(|e| CoreKitError::SigningFailed(format!("invalid combined key: {e}")))?;
        let combined_pub = compressed_hex(&PublicKey::from(signing_key.verifying_key()));
        if combined_pub != self.tss_pub_key {
            return Err(CoreKitError::SigningFailed(
                "combined key does not match the session public key".to_string(),
            ));
        }

        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| CoreKitError::SigningFailed(e.to_string()))?;
        let (r, s) = signature.split_bytes();
        Ok(RawSignature {
            r: strip_leading_zeros(&r),
            s: strip_leading_zeros(&s),
            v: recovery_id.to_byte(),
        })
    }

    async fn cleanup(&mut self, _signatures: &[String]) -> CoreKitResult<()> {
        self.server_part = None;
        self.user_share = Scalar::ZERO;
        self.tally.cleaned_up.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
