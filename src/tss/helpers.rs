//! Encoding helpers for the signing session.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{CoreKitError, CoreKitResult};
use crate::keys::{UNCOMPRESSED_PUBKEY_LEN, keccak256};

/// Session id field delimiters.
const VERIFIER_DELIMITER: char = '\u{001c}';
const VERIFIER_ID_DELIMITER: char = '\u{0015}';
const TAG_DELIMITER: char = '\u{0016}';
const NONCE_DELIMITER: char = '\u{0017}';

/// Smallest and largest accepted hex length of an uncompressed public key.
const MIN_UNCOMPRESSED_HEX_LEN: usize = 128;
const MAX_UNCOMPRESSED_HEX_LEN: usize = 130;

/// Base64 of the keccak256 digest of a UTF-8 message.
pub fn hash_message(message: &str) -> String {
    BASE64.encode(keccak256(message.as_bytes()))
}

/// Convert standard base64 to unpadded base64url.
pub fn base64_to_base64url(base64: &str) -> String {
    base64
        .replace('+', "-")
        .replace('/', "_")
        .trim_end_matches('=')
        .to_string()
}

/// Single-use session nonce: a random 256-bit value plus the current unix
/// time, hashed, in base64url.
pub fn session_nonce() -> String {
    let mut random = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(random.as_mut());
    let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let sum = add_u64_be(random.as_ref(), timestamp);
    base64_to_base64url(&hash_message(&hex::encode(sum)))
}

/// Big-endian addition of a `u64` to an arbitrary magnitude, leading zeros stripped.
fn add_u64_be(value: &[u8], addend: u64) -> Vec<u8> {
    let mut out = value.to_vec();
    let mut carry = u128::from(addend);
    for byte in out.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = u128::from(*byte) + (carry & 0xff);
        *byte = (sum & 0xff) as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
    while carry > 0 {
        out.insert(0, (carry & 0xff) as u8);
        carry >>= 8;
    }
    let first_nonzero = out.iter().position(|b| *b != 0).unwrap_or(out.len());
    out.split_off(first_nonzero)
}

pub fn assemble_full_session(
    verifier: &str,
    verifier_id: &str,
    tag: &str,
    tss_nonce: &str,
    session_nonce: &str,
) -> String {
    format!(
        "{verifier}{VERIFIER_DELIMITER}{verifier_id}{VERIFIER_ID_DELIMITER}{tag}{TAG_DELIMITER}{tss_nonce}{NONCE_DELIMITER}{session_nonce}"
    )
}

/// Endpoints ordered by party index. The client's own slot has no endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyEndpoints {
    pub endpoints: Vec<Option<String>>,
    pub socket_endpoints: Vec<Option<String>>,
    pub party_indexes: Vec<usize>,
    /// DKG indexes of the participating servers, in party order.
    pub server_indexes: Vec<u32>,
}

pub fn generate_endpoints(
    parties: usize,
    client_index: usize,
    node_indexes: &[u32],
    urls: &[String],
) -> CoreKitResult<PartyEndpoints> {
    let mut result = PartyEndpoints {
        endpoints: Vec::with_capacity(parties),
        socket_endpoints: Vec::with_capacity(parties),
        party_indexes: Vec::with_capacity(parties),
        server_indexes: Vec::with_capacity(parties.saturating_sub(1)),
    };

    for party in 0..parties {
        result.party_indexes.push(party);
        if party == client_index {
            result.endpoints.push(None);
            result.socket_endpoints.push(None);
            continue;
        }

        let node_index = match node_indexes.get(party) {
            Some(index) => *index,
            None => u32::try_from(party + 1)
                .map_err(|_| CoreKitError::InvalidInput(format!("Party index {party} out of range")))?,
        };
        let url = (node_index as usize)
            .checked_sub(1)
            .and_then(|slot| urls.get(slot))
            .ok_or_else(|| {
                CoreKitError::InvalidEndpoint(format!("No TSS endpoint for node index {node_index}"))
            })?;

        result.endpoints.push(Some(url.clone()));
        result.socket_endpoints.push(Some(url.replace("/tss", "")));
        result.server_indexes.push(node_index);
    }

    Ok(result)
}

/// Fail unless `public_key_hex` looks like an uncompressed point.
pub fn validate_uncompressed(public_key_hex: &str) -> CoreKitResult<()> {
    let length = public_key_hex.len();
    if (MIN_UNCOMPRESSED_HEX_LEN..=MAX_UNCOMPRESSED_HEX_LEN).contains(&length) {
        Ok(())
    } else {
        Err(CoreKitError::InvalidPublicKeyFormat { length })
    }
}

/// Base64 of the share as a 32-byte big-endian scalar.
pub fn base64_share(share_hex: &str) -> CoreKitResult<String> {
    let bytes = Zeroizing::new(hex::decode(share_hex.trim().trim_start_matches("0x"))?);
    if bytes.len() > 32 {
        return Err(CoreKitError::InvalidInput(format!(
            "TSS share too long: {} bytes",
            bytes.len()
        )));
    }
    let mut padded = Zeroizing::new([0u8; 32]);
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(BASE64.encode(padded.as_ref()))
}

/// Base64 of the 64-byte point, without the SEC1 prefix.
pub fn base64_public_key(uncompressed_hex: &str) -> CoreKitResult<String> {
    let bytes = hex::decode(uncompressed_hex.trim().trim_start_matches("0x"))?;
    let point = match bytes.len() {
        UNCOMPRESSED_PUBKEY_LEN if bytes[0] == 0x04 => &bytes[1..],
        len if len == UNCOMPRESSED_PUBKEY_LEN - 1 => &bytes[..],
        len => {
            return Err(CoreKitError::InvalidPublicKeyFormat { length: len * 2 });
        }
    };
    Ok(BASE64.encode(point))
}
