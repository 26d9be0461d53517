//! The 256-byte authorization key produced by the DH handshake.

use std::fmt;

use crate::sha1;

/// An authorization key plus its pre-computed identifiers.
///
/// The key itself never travels over the wire; only the 8-byte `key_id`
/// (the tail of its SHA-1) appears in message envelopes.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    aux_hash: [u8; 8],
    key_id: [u8; 8],
}

impl AuthKey {
    /// Construct from the raw 256-byte DH output.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let digest = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        aux_hash.copy_from_slice(&digest[..8]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&digest[12..]);
        Self { data, aux_hash, key_id }
    }

    /// The raw 256-byte representation (for persistence).
    pub fn to_bytes(&self) -> [u8; 256] {
        self.data
    }

    /// The 8-byte key identifier: `SHA1(key)[12..20]`, little-endian on
    /// the wire.
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// Compute the `new_nonce_hashN` needed to verify `dh_gen_ok`,
    /// `dh_gen_retry` and `dh_gen_fail` (N = 1, 2, 3).
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let digest = sha1!(new_nonce, [number], self.aux_hash);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[4..]);
        out
    }
}

/// Shows the identifier only; 256 bytes of secret stay out of the logs.
impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey")
            .field("key_id", &u64::from_le_bytes(self.key_id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_the_sha1_tail() {
        let key = AuthKey::from_bytes([0x5cu8; 256]);
        let digest = sha1!(&[0x5cu8; 256]);
        assert_eq!(key.key_id(), digest[12..20]);
    }

    #[test]
    fn equality_follows_the_key_bytes() {
        let a = AuthKey::from_bytes([1u8; 256]);
        let b = AuthKey::from_bytes([1u8; 256]);
        let c = AuthKey::from_bytes([2u8; 256]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn debug_output_omits_the_secret() {
        let key = AuthKey::from_bytes([7u8; 256]);
        let printed = format!("{key:?}");
        assert!(printed.contains("key_id"));
        assert!(!printed.contains("7, 7, 7"));
    }
}
