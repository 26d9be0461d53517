//! PEM-encoded RSA public keys and the raw handshake encryption.
//!
//! The handshake wraps `p_q_inner_data` in textbook RSA: the payload is
//! prefixed with its SHA-1, right-padded with random bytes to 255 bytes,
//! interpreted as a big-endian integer and raised to `e` mod `n`. There is
//! no OAEP or PKCS#1 padding in this protocol revision.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use num_bigint::BigUint;

use crate::sha1;

const PEM_HEADER: &str = "-----BEGIN RSA PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END RSA PUBLIC KEY-----";

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;

/// Errors from parsing a PEM-encoded public key.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyError {
    /// Missing PEM armor or broken base64 payload.
    MalformedPem,
    /// The DER payload ended prematurely.
    TruncatedDer,
    /// The DER payload used an ASN.1 tag other than SEQUENCE or INTEGER.
    UnsupportedAsn1 {
        /// The offending tag byte.
        tag: u8,
    },
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPem => write!(f, "error parsing public key PEM"),
            Self::TruncatedDer => write!(f, "truncated ASN.1 payload"),
            Self::UnsupportedAsn1 { tag } => write!(f, "unknown ASN.1 field {tag:#04x}"),
        }
    }
}

impl std::error::Error for KeyError {}

// ─── DER reader ──────────────────────────────────────────────────────────────

struct Der<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Der<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], KeyError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(KeyError::TruncatedDer);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Read one tag/length header. Lengths use the short form below 0x80,
    /// else `0x80 | n` followed by `n` big-endian length bytes.
    fn header(&mut self) -> Result<(u8, usize), KeyError> {
        let head = self.take(2)?;
        let (tag, mut len) = (head[0], head[1] as usize);
        if len & 0x80 != 0 {
            len = self
                .take(len ^ 0x80)?
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        }
        Ok((tag, len))
    }

    fn integer(&mut self) -> Result<&'a [u8], KeyError> {
        match self.header()? {
            (TAG_INTEGER, len) => self.take(len),
            (tag, _) => Err(KeyError::UnsupportedAsn1 { tag }),
        }
    }
}

// ─── PublicRsa ───────────────────────────────────────────────────────────────

/// A parsed RSA public key `(n, e)` with its 64-bit fingerprint.
#[derive(Clone)]
pub struct PublicRsa {
    n: BigUint,
    e: BigUint,
    fingerprint: i64,
}

impl PublicRsa {
    /// Parse an `RSA PUBLIC KEY` PEM block.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let start = pem.find(PEM_HEADER).ok_or(KeyError::MalformedPem)? + PEM_HEADER.len();
        let end = pem.find(PEM_FOOTER).ok_or(KeyError::MalformedPem)?;
        if end < start {
            return Err(KeyError::MalformedPem);
        }
        let payload: String = pem[start..end].chars().filter(|c| !c.is_whitespace()).collect();
        let der = BASE64.decode(payload).map_err(|_| KeyError::MalformedPem)?;

        let mut reader = Der { buf: &der, pos: 0 };
        match reader.header()? {
            (TAG_SEQUENCE, _) => {}
            (tag, _) => return Err(KeyError::UnsupportedAsn1 { tag }),
        }
        let n_bytes = reader.integer()?;
        let e_bytes = reader.integer()?;

        Ok(Self {
            n: BigUint::from_bytes_be(n_bytes),
            e: BigUint::from_bytes_be(e_bytes),
            fingerprint: fingerprint_of(n_bytes, e_bytes),
        })
    }

    /// The low 8 bytes of `SHA1(bytes(n) ‖ bytes(e))`, little-endian signed.
    pub fn fingerprint(&self) -> i64 {
        self.fingerprint
    }

    /// Encrypt `SHA1(plain) ‖ plain` under this key.
    ///
    /// `random_bytes` supplies the suffix padding up to 255 bytes, so
    /// `plain` must be 11–235 bytes: any less would need more padding
    /// than the 224 random bytes can cover, any more overruns the block.
    pub fn encrypt_hashed(&self, plain: &[u8], random_bytes: &[u8; 224]) -> Vec<u8> {
        assert!(plain.len() <= 235, "payload too large for one RSA block");
        assert!(plain.len() >= 11, "payload too small for the padding reserve");

        let mut padded = Vec::with_capacity(255);
        padded.extend_from_slice(&sha1!(plain));
        padded.extend_from_slice(plain);
        padded.extend_from_slice(&random_bytes[..255 - padded.len()]);

        let m = BigUint::from_bytes_be(&padded);
        m.modpow(&self.e, &self.n).to_bytes_be()
    }
}

impl fmt::Debug for PublicRsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicRsa(fingerprint={})", self.fingerprint)
    }
}

/// Fingerprint over the DER integer contents, with the sign-padding zero
/// stripped from the modulus.
fn fingerprint_of(n: &[u8], e: &[u8]) -> i64 {
    let skip = n.iter().position(|&b| b != 0).unwrap_or(n.len());
    let mut hashed = Vec::with_capacity(n.len() + e.len() + 8);
    relay_tl::serialize::write_bytes(&mut hashed, &n[skip..]);
    relay_tl::serialize::write_bytes(&mut hashed, e);
    let digest = sha1!(&hashed);
    i64::from_le_bytes(digest[12..20].try_into().expect("sha1 tail is 8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM_NEGATIVE: &str = "-----BEGIN RSA PUBLIC KEY-----
MIIBCgKCAQEA/z4YLgNVL+1OEauBs3wwu3OsT7LDvd2vZwcWiEHqZS2BfY5SLbJu
ppvlQa6DXv3lgzKscKUcHtG0ww4G6FVfDdJ3Kt/OALrvmEN3v/WImEzK7YpsNjqQ
j6DxLhL6UpQ84RwVzBrDK/O3VGSkrVocTLg6zUfXwcnXnElVVThVijM3dm/IZrPh
rs9wxXcchGyDUU1M257796QDPswxQOYJSt20OFdfpLp9G3YOzuq94GgXJ/ybLMCW
rkVomXElrk2uctp3DMfOFW/zjJzFcjXxQBGNqzZSiImSpikjUHr/wuT0+LgeYZgx
MtSRmHN90naCDc0vWisMImc2MB/7ZFgp+QIDAQAB
-----END RSA PUBLIC KEY-----
";

    const PEM_POSITIVE: &str = "-----BEGIN RSA PUBLIC KEY-----
MIIBCgKCAQEAuZjjPCSu+ac8qNLjfrFq3tlSYeU4mXhwrx/LiFFb4x3tCmY6FEr/
TbJ3qGRntnlgb6Y26Fq9lzJsEAhObiiG0HCKc1EQArzNyo1Tkev1tQvb8dde7TY/
GNY7+HtUWVOmRHxralyqRh7nKjxakzWgdT4cA39rMoUCmC/opjOxLmLSmsYu+57D
grhxHb+1cHucp7jEwwUNul6lTGAbIm5Zo9gtPr28N4nTDpsRE0Z4pj81KSnUN7Bs
WaWRcY94LUCVWZucf4TU5BDd3lCMUau8l+SQCDlhT3C3IVVgZKWmjcuSG3VH9Mmi
6QKHhvwlBfzg69RqavQP9dVBOLdq40dEIwIDAQAB
-----END RSA PUBLIC KEY-----
";

    #[test]
    fn fingerprint_negative() {
        let key = PublicRsa::from_pem(PEM_NEGATIVE).unwrap();
        assert_eq!(key.fingerprint(), -3585188411088722939);
    }

    #[test]
    fn fingerprint_positive() {
        let key = PublicRsa::from_pem(PEM_POSITIVE).unwrap();
        assert_eq!(key.fingerprint(), 4841529786962454712);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = PublicRsa::from_pem(PEM_NEGATIVE).unwrap();
        let b = PublicRsa::from_pem(PEM_NEGATIVE).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn missing_armor_is_rejected() {
        assert!(matches!(
            PublicRsa::from_pem("no key here"),
            Err(KeyError::MalformedPem)
        ));
    }

    #[test]
    fn foreign_asn1_tag_is_rejected() {
        // OCTET STRING (0x04) where the SEQUENCE should be.
        let der = [0x04u8, 0x02, 0x01, 0x02];
        let b64 = BASE64.encode(der);
        let pem = format!("{PEM_HEADER}\n{b64}\n{PEM_FOOTER}\n");
        assert!(matches!(
            PublicRsa::from_pem(&pem),
            Err(KeyError::UnsupportedAsn1 { tag: 0x04 })
        ));
    }

    #[test]
    fn encryption_output_stays_below_the_modulus() {
        let key = PublicRsa::from_pem(PEM_NEGATIVE).unwrap();
        let cipher = key.encrypt_hashed(b"some inner data", &[0xaa; 224]);
        assert!(cipher.len() <= 256);
        assert!(BigUint::from_bytes_be(&cipher) < key.n);
    }

    #[test]
    fn payload_length_bounds_are_accepted() {
        let key = PublicRsa::from_pem(PEM_NEGATIVE).unwrap();
        // Smallest payload: padding consumes all 224 random bytes.
        assert!(!key.encrypt_hashed(&[0u8; 11], &[0xaa; 224]).is_empty());
        // Largest payload: no padding left at all.
        assert!(!key.encrypt_hashed(&[0u8; 235], &[0xaa; 224]).is_empty());
    }

    #[test]
    #[should_panic(expected = "payload too small")]
    fn undersized_payload_is_refused() {
        let key = PublicRsa::from_pem(PEM_NEGATIVE).unwrap();
        key.encrypt_hashed(&[0u8; 10], &[0xaa; 224]);
    }
}
