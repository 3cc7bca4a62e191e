//! secp256k1 key material used as factors.
//!
//! A factor key is a secp256k1 secret scalar serialized as 64 hex characters.
//! Factor public keys travel as SEC1 hex, compressed (33 bytes) unless a
//! collaborator explicitly needs the uncompressed point.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand_core::OsRng;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::error::{CoreKitError, CoreKitResult};

/// Length of a compressed SEC1 point.
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// Length of an uncompressed SEC1 point (with 0x04 prefix).
pub const UNCOMPRESSED_PUBKEY_LEN: usize = 65;

/// A secret factor key. Zeroized on drop; `Debug` never prints the scalar.
#[derive(Clone)]
pub struct FactorKey {
    secret: SecretKey,
}

impl FactorKey {
    /// Generate a fresh random factor key.
    pub fn random() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Parse a factor key from hex (with or without `0x`).
    pub fn from_hex(value: &str) -> CoreKitResult<Self> {
        let trimmed = value.trim().trim_start_matches("0x");
        let bytes = Zeroizing::new(
            hex::decode(trimmed)
                .map_err(|e| CoreKitError::InvalidInput(format!("Invalid factor key hex: {e}")))?,
        );
        if bytes.is_empty() || bytes.len() > 32 {
            return Err(CoreKitError::InvalidInput(format!(
                "Invalid factor key length: expected up to 32 bytes, got {}",
                bytes.len()
            )));
        }
        // Left-pad short scalars the same way big-integer serializers strip them.
        let mut padded = Zeroizing::new([0u8; 32]);
        padded[32 - bytes.len()..].copy_from_slice(&bytes);
        let secret = SecretKey::from_slice(padded.as_slice())?;
        Ok(Self { secret })
    }

    /// Derive a factor key deterministically from arbitrary seed bytes via keccak256.
    pub fn from_keccak_seed(seed: &[u8]) -> CoreKitResult<Self> {
        let digest = Zeroizing::new(keccak256(seed));
        let secret = SecretKey::from_slice(digest.as_slice())?;
        Ok(Self { secret })
    }

    /// 64-character lowercase hex encoding of the scalar.
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// Compressed SEC1 hex of the factor public key.
    pub fn public_key_hex(&self) -> String {
        compressed_hex(&self.public_key())
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl PartialEq for FactorKey {
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret
    }
}

impl Eq for FactorKey {}

impl std::fmt::Debug for FactorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactorKey")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// The default factor derived from the oauth key and the application client id.
///
/// `keccak256("{oauth_key}_{client_id}")` read as a secp256k1 scalar.
pub fn hash_factor_key(oauth_key: &str, client_id: &str) -> CoreKitResult<FactorKey> {
    let seed = Zeroizing::new(format!("{oauth_key}_{client_id}"));
    FactorKey::from_keccak_seed(seed.as_bytes())
}

/// Compute Keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Parse a SEC1 public key from hex, compressed or uncompressed.
pub fn parse_public_key(value: &str) -> CoreKitResult<PublicKey> {
    let bytes = hex::decode(value.trim().trim_start_matches("0x"))
        .map_err(|e| CoreKitError::InvalidInput(format!("Invalid public key hex: {e}")))?;
    // Some collaborators hand out the bare 64-byte point without the 0x04 prefix.
    if bytes.len() == UNCOMPRESSED_PUBKEY_LEN - 1 {
        let mut prefixed = Vec::with_capacity(UNCOMPRESSED_PUBKEY_LEN);
        prefixed.push(0x04);
        prefixed.extend_from_slice(&bytes);
        return Ok(PublicKey::from_sec1_bytes(&prefixed)?);
    }
    Ok(PublicKey::from_sec1_bytes(&bytes)?)
}

pub fn compressed_bytes(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

pub fn uncompressed_bytes(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

pub fn compressed_hex(key: &PublicKey) -> String {
    hex::encode(compressed_bytes(key))
}

pub fn uncompressed_hex(key: &PublicKey) -> String {
    hex::encode(uncompressed_bytes(key))
}

/// Normalize any SEC1 hex encoding to compressed hex.
pub fn to_compressed_hex(value: &str) -> CoreKitResult<String> {
    Ok(compressed_hex(&parse_public_key(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_factor_public_key_is_deterministic_and_compressed() {
        let a = FactorKey::from_hex(SAMPLE_KEY).unwrap();
        let b = FactorKey::from_hex(&format!("0x{SAMPLE_KEY}")).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(compressed_bytes(&a.public_key()).len(), COMPRESSED_PUBKEY_LEN);

        for _ in 0..8 {
            let key = FactorKey::random();
            let reparsed = FactorKey::from_hex(&key.to_hex()).unwrap();
            assert_eq!(reparsed.public_key_hex(), key.public_key_hex());
            assert_eq!(hex::decode(key.public_key_hex()).unwrap().len(), 33);
        }
    }

    #[test]
    fn test_short_hex_is_left_padded() {
        let key = FactorKey::from_hex("01").unwrap();
        assert_eq!(key.to_hex(), format!("{}01", "0".repeat(62)));
    }

    #[test]
    fn test_invalid_factor_keys_rejected() {
        assert!(FactorKey::from_hex("").is_err());
        assert!(FactorKey::from_hex("zz").is_err());
        assert!(FactorKey::from_hex(&"00".repeat(32)).is_err());
        assert!(FactorKey::from_hex(&"ab".repeat(33)).is_err());
    }

    #[test]
    fn test_hash_factor_depends_on_client_id() {
        let a = hash_factor_key("abcdef", "client-a").unwrap();
        let again = hash_factor_key("abcdef", "client-a").unwrap();
        let b = hash_factor_key("abcdef", "client-b").unwrap();
        assert_eq!(a, again);
        assert_ne!(a, b);
    }

    #[test]
    fn test_public_key_format_conversion() {
        let key = FactorKey::from_hex(SAMPLE_KEY).unwrap();
        let full = uncompressed_hex(&key.public_key());
        assert_eq!(full.len(), 130);
        assert_eq!(to_compressed_hex(&full).unwrap(), key.public_key_hex());
        // Bare 64-byte point without the 0x04 prefix.
        assert_eq!(to_compressed_hex(&full[2..]).unwrap(), key.public_key_hex());
    }

    #[test]
    fn test_keccak256_known_vector() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = FactorKey::from_hex(SAMPLE_KEY).unwrap();
        assert!(!format!("{key:?}").contains(SAMPLE_KEY));
    }
}
