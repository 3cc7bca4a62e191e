//! Synchronous EVM-style signer over the core kit.

use crate::corekit::MpcCoreKit;
use crate::keys::UNCOMPRESSED_PUBKEY_LEN;

/// Signer interface expected by EVM client libraries.
pub trait EvmSigner {
    /// Signature `r || s || v` over a 32-byte digest, empty on failure.
    fn sign(&self, message: &[u8]) -> Vec<u8>;

    /// The 64-byte public point without the SEC1 prefix, empty on failure.
    fn public_key(&self) -> Vec<u8>;
}

impl EvmSigner for MpcCoreKit {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.sign_blocking(message, None)
    }

    fn public_key(&self) -> Vec<u8> {
        let full = self.get_tss_pub_key_blocking();
        if full.len() == UNCOMPRESSED_PUBKEY_LEN {
            full[1..].to_vec()
        } else {
            Vec::new()
        }
    }
}
