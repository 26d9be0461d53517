//! AES-256 in IGE (infinite garble extension) mode.
//!
//! IGE chains every block through both the previous ciphertext and the
//! previous plaintext:
//!
//! ```text
//! c = iv2 XOR AES_enc(key, iv1 XOR p);  iv1, iv2 := c, p
//! p = iv1 XOR AES_dec(key, iv2 XOR c);  iv1, iv2 := c, p
//! ```
//!
//! The block-level API is public so the session layer can decrypt lazily,
//! one 16-byte block at a time, while a parser consumes the plaintext.

use std::fmt;

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::{fill_random, sha1, xor_into};

/// Errors from the buffer-level IGE operations.
#[derive(Clone, Debug, PartialEq)]
pub enum IgeError {
    /// Ciphertext length is not a multiple of the 16-byte block size.
    NotBlockAligned {
        /// The offending length.
        len: usize,
    },
    /// With-hash ciphertext too short to contain the 20-byte digest.
    TooShort {
        /// The offending length.
        len: usize,
    },
}

impl fmt::Display for IgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotBlockAligned { len } => {
                write!(f, "ciphertext length {len} is not 16-byte aligned")
            }
            Self::TooShort { len } => {
                write!(f, "with-hash ciphertext of {len} bytes lacks the digest")
            }
        }
    }
}

impl std::error::Error for IgeError {}

/// A stateful AES-256-IGE codec.
///
/// The 32-byte IV is split into two 16-byte halves that carry the chain
/// state; a fresh instance must be created whenever the protocol restarts
/// the chain (IV state is never carried across messages).
pub struct AesIge {
    cipher: Aes256,
    iv1: [u8; 16],
    iv2: [u8; 16],
}

impl AesIge {
    /// Create a codec from a 32-byte key and 32-byte IV.
    pub fn new(key: &[u8; 32], iv: &[u8; 32]) -> Self {
        let mut iv1 = [0u8; 16];
        let mut iv2 = [0u8; 16];
        iv1.copy_from_slice(&iv[..16]);
        iv2.copy_from_slice(&iv[16..]);
        Self {
            cipher: Aes256::new(key.into()),
            iv1,
            iv2,
        }
    }

    /// Encrypt a single block, advancing the chain state.
    pub fn encrypt_block(&mut self, plain: &[u8; 16]) -> [u8; 16] {
        let mut block = aes::Block::clone_from_slice(plain);
        xor_into(&mut block, &self.iv1);
        self.cipher.encrypt_block(&mut block);
        xor_into(&mut block, &self.iv2);
        let cipher: [u8; 16] = block.into();
        self.iv1 = cipher;
        self.iv2 = *plain;
        cipher
    }

    /// Decrypt a single block, advancing the chain state.
    pub fn decrypt_block(&mut self, cipher: &[u8; 16]) -> [u8; 16] {
        let mut block = aes::Block::clone_from_slice(cipher);
        xor_into(&mut block, &self.iv2);
        self.cipher.decrypt_block(&mut block);
        xor_into(&mut block, &self.iv1);
        let plain: [u8; 16] = block.into();
        self.iv1 = *cipher;
        self.iv2 = plain;
        plain
    }

    /// Encrypt `plain`, padding to the next block boundary with random bytes.
    pub fn encrypt(&mut self, plain: &[u8]) -> Vec<u8> {
        let mut pad = [0u8; 16];
        fill_random(&mut pad);
        self.encrypt_padded_with(plain, &pad)
    }

    fn encrypt_padded_with(&mut self, plain: &[u8], pad: &[u8; 16]) -> Vec<u8> {
        let pad_len = (16 - plain.len() % 16) % 16;
        let mut out = Vec::with_capacity(plain.len() + pad_len);
        let mut block = [0u8; 16];
        for chunk in plain.chunks(16) {
            if chunk.len() == 16 {
                block.copy_from_slice(chunk);
            } else {
                block[..chunk.len()].copy_from_slice(chunk);
                block[chunk.len()..].copy_from_slice(&pad[..pad_len]);
            }
            out.extend_from_slice(&self.encrypt_block(&block));
        }
        out
    }

    /// Decrypt a 16-byte aligned ciphertext.
    pub fn decrypt(&mut self, cipher: &[u8]) -> Result<Vec<u8>, IgeError> {
        if cipher.len() % 16 != 0 {
            return Err(IgeError::NotBlockAligned { len: cipher.len() });
        }
        let mut out = Vec::with_capacity(cipher.len());
        let mut block = [0u8; 16];
        for chunk in cipher.chunks(16) {
            block.copy_from_slice(chunk);
            out.extend_from_slice(&self.decrypt_block(&block));
        }
        Ok(out)
    }

    /// Encrypt `SHA1(plain) ‖ plain` (plus random padding).
    pub fn encrypt_with_hash(&mut self, plain: &[u8]) -> Vec<u8> {
        let digest = sha1!(plain);
        let mut buf = Vec::with_capacity(20 + plain.len());
        buf.extend_from_slice(&digest);
        buf.extend_from_slice(plain);
        self.encrypt(&buf)
    }

    /// Decrypt a with-hash ciphertext, dropping the leading 20-byte digest.
    ///
    /// The digest is NOT verified: the padding length is unknown to the
    /// receiver, so the hashed span cannot be reconstructed.
    pub fn decrypt_with_hash(&mut self, cipher: &[u8]) -> Result<Vec<u8>, IgeError> {
        let mut plain = self.decrypt(cipher)?;
        if plain.len() < 20 {
            return Err(IgeError::TooShort { len: cipher.len() });
        }
        plain.drain(..20);
        Ok(plain)
    }
}
