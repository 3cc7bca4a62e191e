//! Signing session bootstrap.
//!
//! Builds a fresh [`SessionDescriptor`] for every signing call from the active
//! TSS share, the tag's public key and the node topology resolved at login.
//! Descriptors carry a one-time nonce and must not be reused.

pub mod coefficients;
pub mod helpers;

use std::collections::BTreeMap;

use zeroize::Zeroize;

use crate::error::CoreKitResult;
use crate::network::TssShare;

pub use self::coefficients::{scalar_from_hex_index, server_coefficients, user_coefficient};
pub use self::helpers::{
    PartyEndpoints, assemble_full_session, base64_public_key, base64_share, base64_to_base64url,
    generate_endpoints, hash_message, session_nonce, validate_uncompressed,
};

/// Parties used when the topology does not list node indexes.
pub const DEFAULT_PARTIES: usize = 4;

/// Everything the bootstrapper needs for one session.
pub struct SessionInputs<'a> {
    pub verifier: &'a str,
    pub verifier_id: &'a str,
    pub tag: &'a str,
    pub tss_nonce: u32,
    /// Uncompressed hex of the tag's TSS public key.
    pub tss_pub_key: &'a str,
    pub share: &'a TssShare,
    pub node_indexes: &'a [u32],
    pub tss_endpoints: &'a [String],
}

/// Connection parameters for one signing call.
pub struct SessionDescriptor {
    pub session_id: String,
    pub client_index: usize,
    pub party_indexes: Vec<usize>,
    pub endpoints: Vec<Option<String>>,
    pub socket_endpoints: Vec<Option<String>>,
    /// Coefficient per participating server, keyed by DKG index in hex.
    pub server_coefficients: BTreeMap<String, String>,
    /// TSS index of the client share, in hex.
    pub user_tss_index: String,
    /// Base64 of the 32-byte client share.
    pub share: String,
    /// Base64 of the 64-byte TSS public key.
    pub public_key: String,
}

impl std::fmt::Debug for SessionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDescriptor")
            .field("session_id", &self.session_id)
            .field("client_index", &self.client_index)
            .field("party_indexes", &self.party_indexes)
            .field("endpoints", &self.endpoints)
            .field("server_coefficients", &self.server_coefficients)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionDescriptor {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

/// Total parties including the client, which always takes the last index.
pub fn party_count(node_indexes: &[u32]) -> usize {
    if node_indexes.is_empty() {
        DEFAULT_PARTIES
    } else {
        node_indexes.len() + 1
    }
}

pub fn bootstrap_session(inputs: &SessionInputs<'_>) -> CoreKitResult<SessionDescriptor> {
    validate_uncompressed(inputs.tss_pub_key)?;

    let nonce = session_nonce();
    let session_id = assemble_full_session(
        inputs.verifier,
        inputs.verifier_id,
        inputs.tag,
        &inputs.tss_nonce.to_string(),
        &nonce,
    );

    let user_tss_index = scalar_from_hex_index(&inputs.share.index)?;
    let parties = party_count(inputs.node_indexes);
    let client_index = parties - 1;

    let PartyEndpoints {
        endpoints,
        socket_endpoints,
        party_indexes,
        server_indexes,
    } = generate_endpoints(parties, client_index, inputs.node_indexes, inputs.tss_endpoints)?;

    let server_coefficients = server_coefficients(&server_indexes, &user_tss_index)?;

    tracing::debug!(
        tag = inputs.tag,
        parties,
        servers = ?server_indexes,
        "Bootstrapped signing session"
    );

    Ok(SessionDescriptor {
        session_id,
        client_index,
        party_indexes,
        endpoints,
        socket_endpoints,
        server_coefficients,
        user_tss_index: inputs.share.index.clone(),
        share: base64_share(&inputs.share.share)?,
        public_key: base64_public_key(inputs.tss_pub_key)?,
    })
}
