//! Cryptographic primitives for the MTProto v1 session layer.
//!
//! Provides:
//! - AES-256-IGE encryption/decryption (buffer, block, and with-hash forms)
//! - SHA-1 / SHA-256 hash macros
//! - Pollard-rho-Brent PQ factorization
//! - PEM-encoded RSA public keys with raw (unpadded) handshake encryption
//! - [`AuthKey`] — the 256-byte session secret
//! - per-direction AES key/IV derivation from `auth_key` and `msg_key`
//! - handshake nonce→key/IV derivation

#![deny(unsafe_code)]

pub mod aes_ige;
mod auth_key;
mod factorize;
pub mod rsa;
mod sha;

pub use aes_ige::AesIge;
pub use auth_key::AuthKey;
pub use factorize::factorize;
pub use sha::{sha1_parts, sha256_parts};

/// XOR `b` into `a` in place. The spans must have equal length.
pub fn xor_into(a: &mut [u8], b: &[u8]) {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x ^= y;
    }
}

/// Which half of the key material a peer uses.
///
/// The client encrypts with the write offsets and decrypts with the read
/// offsets; a test double playing the server does the opposite.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Direction {
    /// Client → server.
    Write,
    /// Server → client.
    Read,
}

impl Direction {
    fn x(self) -> usize {
        match self {
            Self::Write => 0,
            Self::Read => 8,
        }
    }
}

/// Derive the per-message AES key and IV from `auth_key` and `msg_key`.
///
/// This is the SHA-1 based derivation of MTProto v1; the two directions
/// read the same formula at offsets shifted by 8 bytes.
pub fn prepare_key(auth_key: &AuthKey, msg_key: &[u8; 16], direction: Direction) -> ([u8; 32], [u8; 32]) {
    let ak = &auth_key.data;
    let x = direction.x();

    let sha_a = sha1!(msg_key, &ak[x..x + 32]);
    let sha_b = sha1!(&ak[32 + x..48 + x], msg_key, &ak[48 + x..64 + x]);
    let sha_c = sha1!(&ak[64 + x..96 + x], msg_key);
    let sha_d = sha1!(msg_key, &ak[96 + x..128 + x]);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..20].copy_from_slice(&sha_b[8..20]);
    aes_key[20..].copy_from_slice(&sha_c[4..16]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..12].copy_from_slice(&sha_a[8..20]);
    aes_iv[12..20].copy_from_slice(&sha_b[..8]);
    aes_iv[20..24].copy_from_slice(&sha_c[16..20]);
    aes_iv[24..].copy_from_slice(&sha_d[..8]);

    (aes_key, aes_iv)
}

/// Derive `(key, iv)` from the handshake nonces for the temporary AES-IGE
/// instance that protects `server_DH_inner_data` and `client_DH_inner_data`.
pub fn generate_key_data_from_nonce(server_nonce: &[u8; 16], new_nonce: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}

/// Fill `buf` with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) {
    getrandom::getrandom(buf).expect("getrandom failed");
}
