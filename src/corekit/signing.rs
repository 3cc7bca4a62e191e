//! Signing façade over the external signing client.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use super::MpcCoreKit;
use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{FactorKey, parse_public_key, uncompressed_bytes, uncompressed_hex};
use crate::network::{RawSignature, ThresholdKey, TssClient, TssClientFactory};
use crate::tss::{SessionInputs, bootstrap_session};

/// Length of an `r || s || v` signature.
pub const SIGNATURE_LEN: usize = 65;

/// Owned snapshot of what a signing call needs, detached from the kit.
#[derive(Clone)]
pub struct SigningContext {
    threshold_key: Arc<dyn ThresholdKey>,
    tss: Arc<dyn TssClientFactory>,
    factor_key: FactorKey,
    verifier: String,
    verifier_id: String,
    auth_signatures: Vec<String>,
    node_indexes: Vec<u32>,
    tss_endpoints: Vec<String>,
}

impl SigningContext {
    /// Uncompressed SEC1 bytes of the TSS public key.
    pub async fn tss_pub_key(&self) -> CoreKitResult<Vec<u8>> {
        let tag = self.threshold_key.get_tss_tag().await?;
        let compressed = self.threshold_key.get_tss_pub_key(&tag).await?;
        Ok(uncompressed_bytes(&parse_public_key(&compressed)?))
    }

    /// Sign a 32-byte digest. Returns `r || s || v`.
    pub async fn sign(&self, message: &[u8]) -> CoreKitResult<Vec<u8>> {
        let tag = self.threshold_key.get_tss_tag().await?;
        let tss_nonce = self.threshold_key.get_tss_nonce(&tag).await?;
        let compressed = self.threshold_key.get_tss_pub_key(&tag).await?;
        let tss_pub_key = uncompressed_hex(&parse_public_key(&compressed)?);
        let share = self.threshold_key.get_tss_share(&tag, &self.factor_key).await?;

        let session = bootstrap_session(&SessionInputs {
            verifier: &self.verifier,
            verifier_id: &self.verifier_id,
            tag: &tag,
            tss_nonce,
            tss_pub_key: &tss_pub_key,
            share: &share,
            node_indexes: &self.node_indexes,
            tss_endpoints: &self.tss_endpoints,
        })?;

        let mut client = self.tss.connect(&session).await?;
        let signed = self.run_protocol(client.as_mut(), &session.server_coefficients, message).await;
        let cleanup = client.cleanup(&self.auth_signatures).await;

        let raw = match (signed, cleanup) {
            (Ok(raw), Ok(())) => raw,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), cleanup) => {
                if let Err(cleanup_error) = cleanup {
                    tracing::warn!(error = %cleanup_error, "Signing session cleanup failed");
                }
                return Err(e);
            }
        };

        tracing::debug!(tag = %tag, tss_nonce, "Signed message");
        encode_signature(&raw)
    }

    /// Connectivity check, precompute and sign. The caller owns cleanup.
    async fn run_protocol(
        &self,
        client: &mut dyn TssClient,
        server_coefficients: &BTreeMap<String, String>,
        message: &[u8],
    ) -> CoreKitResult<RawSignature> {
        if !client.check_connected().await? {
            return Err(CoreKitError::ClientNotConnected);
        }

        let precompute = client
            .precompute(server_coefficients, &self.auth_signatures)
            .await?;
        if !client.is_ready().await? {
            return Err(CoreKitError::ClientNotReady);
        }

        client
            .sign(
                &BASE64.encode(message),
                true,
                "",
                &precompute,
                &self.auth_signatures,
            )
            .await
    }
}

/// Encode as 32-byte `r`, 32-byte `s`, 1-byte recovery id.
pub fn encode_signature(raw: &RawSignature) -> CoreKitResult<Vec<u8>> {
    let mut out = Vec::with_capacity(SIGNATURE_LEN);
    for scalar in [&raw.r, &raw.s] {
        let magnitude = strip_leading_zeros(scalar);
        if magnitude.len() > 32 {
            return Err(CoreKitError::SigningFailed(format!(
                "signature scalar is {} bytes",
                magnitude.len()
            )));
        }
        out.extend(std::iter::repeat_n(0u8, 32 - magnitude.len()));
        out.extend_from_slice(magnitude);
    }
    out.push(raw.v);
    Ok(out)
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// Drive `job` to completion on a dedicated thread with its own runtime.
///
/// On timeout the job is abandoned; the thread finishes it in the background.
fn run_detached<T, F, Fut>(timeout: Duration, job: F) -> CoreKitResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = CoreKitResult<T>>,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("corekit-blocking".to_string())
        .spawn(move || {
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| CoreKitError::Internal(format!("Failed to build runtime: {e}")))
                .and_then(|runtime| runtime.block_on(job()));
            // The receiver is gone once the caller timed out.
            let _ = tx.send(result);
        })
        .map_err(|e| CoreKitError::Internal(format!("Failed to spawn signing thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(CoreKitError::Timeout(timeout.as_millis())),
        Err(RecvTimeoutError::Disconnected) => Err(CoreKitError::Internal(
            "signing thread exited without a result".to_string(),
        )),
    }
}

impl MpcCoreKit {
    /// Snapshot the session for a signing call.
    pub fn signing_context(&self) -> CoreKitResult<SigningContext> {
        let session = self.login_session()?;
        let node_details = self.node_details()?;
        Ok(SigningContext {
            threshold_key: self.threshold_key()?,
            tss: self.network.tss.clone(),
            factor_key: self.active_factor()?.clone(),
            verifier: session.verifier.clone(),
            verifier_id: session.verifier_id.clone(),
            auth_signatures: session.auth_signatures.clone(),
            node_indexes: node_details.tss_node_indexes.clone(),
            tss_endpoints: node_details.torus_node_tss_endpoints.clone(),
        })
    }

    /// Sign a 32-byte digest through a fresh signing session.
    pub async fn sign_async(&self, message: &[u8]) -> CoreKitResult<Vec<u8>> {
        self.signing_context()?.sign(message).await
    }

    /// Blocking form of [`MpcCoreKit::sign_async`].
    ///
    /// Returns an empty vector on any failure, including timeout. `timeout`
    /// defaults to the configured sign timeout.
    pub fn sign_blocking(&self, message: &[u8], timeout: Option<Duration>) -> Vec<u8> {
        let timeout = timeout.unwrap_or_else(|| self.settings.sign_timeout());
        let context = match self.signing_context() {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(error = %e, "Blocking sign unavailable");
                return Vec::new();
            }
        };
        let message = message.to_vec();
        run_detached(timeout, move || async move { context.sign(&message).await }).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Blocking sign failed");
            Vec::new()
        })
    }

    /// Uncompressed SEC1 bytes of the TSS public key.
    pub async fn get_tss_pub_key(&self) -> CoreKitResult<Vec<u8>> {
        let threshold_key = self.threshold_key()?;
        let tag = threshold_key.get_tss_tag().await?;
        let compressed = threshold_key.get_tss_pub_key(&tag).await?;
        Ok(uncompressed_bytes(&parse_public_key(&compressed)?))
    }

    /// Blocking form of [`MpcCoreKit::get_tss_pub_key`]; empty on failure.
    pub fn get_tss_pub_key_blocking(&self) -> Vec<u8> {
        let context = match self.signing_context() {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(error = %e, "TSS public key unavailable");
                return Vec::new();
            }
        };
        run_detached(self.settings.sign_timeout(), move || async move {
            context.tss_pub_key().await
        })
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Blocking TSS public key lookup failed");
            Vec::new()
        })
    }
}
