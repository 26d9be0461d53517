//! SHA digests over concatenated byte spans.
//!
//! The protocol hashes ad-hoc concatenations everywhere: key derivation,
//! fingerprints, message keys. These helpers fold each piece straight
//! into one hasher state, so no joined buffer is ever allocated.

/// SHA-1 of `parts` fed through a single hasher, front to back.
pub fn sha1_parts(parts: &[&[u8]]) -> [u8; 20] {
    use sha1::{Digest, Sha1};
    let mut state = Sha1::new();
    for part in parts {
        state.update(part);
    }
    state.finalize().into()
}

/// SHA-256 of `parts` fed through a single hasher, front to back.
pub fn sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut state = Sha256::new();
    for part in parts {
        state.update(part);
    }
    state.finalize().into()
}

/// SHA-1 of the concatenation of the arguments.
///
/// Sugar over [`sha1_parts`]: each argument may be anything that views
/// as `&[u8]` (arrays, slices, vectors, references to either).
#[macro_export]
macro_rules! sha1 {
    ( $( $part:expr ),+ $(,)? ) => {
        $crate::sha1_parts(&[ $( ::core::convert::AsRef::<[u8]>::as_ref(&$part) ),+ ])
    };
}

/// SHA-256 of the concatenation of the arguments; see [`sha1!`](crate::sha1).
#[macro_export]
macro_rules! sha256 {
    ( $( $part:expr ),+ $(,)? ) => {
        $crate::sha256_parts(&[ $( ::core::convert::AsRef::<[u8]>::as_ref(&$part) ),+ ])
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn split_input_hashes_like_the_joined_one() {
        let joined = crate::sha1!(b"abcdef");
        let split = crate::sha1!(b"ab", b"cd", [b'e', b'f']);
        assert_eq!(joined, split);

        let joined = crate::sha256!(b"abcdef");
        let split = crate::sha256!(b"abc".to_vec(), &b"def"[..]);
        assert_eq!(joined, split);
    }
}
