//! Sans-IO authorization key generation.
//!
//! The four-round exchange that turns a pre-provisioned RSA public key
//! into a shared 256-byte authorization key:
//!
//! ```text
//! let (req, s1) = handshake::step1();
//! // send req, receive resp
//! let (req, s2) = handshake::step2(s1, resp, &rsa_key)?;
//! // send req, receive resp
//! let (req, s3) = handshake::step3(s2, resp)?;
//! // send req, receive resp
//! let done = handshake::finish(s3, resp)?;
//! // done.auth_key is ready
//! ```
//!
//! Each step is a pure function of its inputs plus an injected block of
//! randomness, so the whole exchange replays byte-for-byte in tests.

use std::fmt;

use num_bigint::BigUint;
use num_traits::One;
use relay_crypto::rsa::PublicRsa;
use relay_crypto::{AesIge, AuthKey, fill_random, generate_key_data_from_nonce, sha1, xor_into};
use relay_tl::deserialize::Buffer;
use relay_tl::serialize::write_bytes;
use relay_tl::{Deserializable, Identifiable, Serializable};

/// The only Diffie–Hellman generator the client accepts.
const DH_G: i32 = 3;

/// The only 2048-bit DH modulus the client accepts, as upper-case hex.
const DH_PRIME_HEX: &str = concat!(
    "C71CAEB9C6B1C9048E6C522F70F13F73980D40238E3E21C14934D037563D930F",
    "48198A0AA7C14058229493D22530F4DBFA336F6E0AC925139543AED44CCE7C37",
    "20FD51F69458705AC68CD4FE6B6B13ABDC9746512969328454F18FAF8C595F64",
    "2477FE96BB2A941D5BCD1D4AC8CC49880708FA9B378E3C4F3A9060BEE67CF9A4",
    "A4A695811051907E162753B56B0F6B410DBA74D8A84B2A14B3144E0EF1284754",
    "FD17ED950D5965B4B9DD46582DB1178D169C6BC465B0D6FF9CA3928FEF5B9AE4",
    "E418FC15E83EBEA0F87FA9FF5EED70050DED2849F47BF959D956850CE929851F",
    "0D8115F635B105EE2E4E15D04B2454BF6F4FADF034B10403119CD8E3B92FCC5B",
);

fn accepted_dh_params(g: i32, dh_prime: &BigUint) -> bool {
    g == DH_G && Some(dh_prime) == BigUint::parse_bytes(DH_PRIME_HEX.as_bytes(), 16).as_ref()
}

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors that can occur during auth key generation.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidServerNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidPqSize { size: usize },
    UnknownFingerprint { fingerprints: Vec<i64> },
    DhParamsFail,
    EncryptedResponseNotPadded { len: usize },
    AnswerUndersized { len: usize },
    InvalidDhInnerData { error: relay_tl::deserialize::Error },
    UnsafeDhParameters { g: i32 },
    GParameterOutOfRange { value: BigUint, low: BigUint, high: BigUint },
    DhGenRetry,
    DhGenFail,
    InvalidNewNonceHash { got: [u8; 16], expected: [u8; 16] },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNonce { got, expected } => {
                write!(f, "nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidServerNonce { got, expected } => {
                write!(f, "server_nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidPqSize { size } => write!(f, "pq size {size} invalid (expected 8)"),
            Self::UnknownFingerprint { fingerprints } => {
                write!(f, "our certificate is not among {fingerprints:?}")
            }
            Self::DhParamsFail => write!(f, "server rejected the DH parameter request"),
            Self::EncryptedResponseNotPadded { len } => {
                write!(f, "encrypted answer len {len} is not 16-byte aligned")
            }
            Self::AnswerUndersized { len } => {
                write!(f, "encrypted answer of {len} bytes cannot hold a digest")
            }
            Self::InvalidDhInnerData { error } => {
                write!(f, "DH inner data deserialization error: {error}")
            }
            Self::UnsafeDhParameters { g } => {
                write!(f, "server offered an unexpected DH group (g = {g})")
            }
            Self::GParameterOutOfRange { value, low, high } => {
                write!(f, "g parameter {value} not in range ({low}, {high})")
            }
            Self::DhGenRetry => write!(f, "DH gen retry requested"),
            Self::DhGenFail => write!(f, "DH gen failed"),
            Self::InvalidNewNonceHash { got, expected } => {
                write!(f, "new nonce hash mismatch: got {got:?}, expected {expected:?}")
            }
        }
    }
}

// ─── Wire types ──────────────────────────────────────────────────────────────

/// `req_pq#60469778 nonce:int128 = ResPQ`
#[derive(Clone, Debug, PartialEq)]
pub struct ReqPq {
    /// Client-chosen random nonce.
    pub nonce: [u8; 16],
}

impl Identifiable for ReqPq {
    const CONSTRUCTOR_ID: u32 = 0x60469778;
}

impl Serializable for ReqPq {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
    }
}

/// `resPQ#05162463 nonce:int128 server_nonce:int128 pq:bytes
///  server_public_key_fingerprints:Vector<long> = ResPQ`
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub struct ResPq {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub pq: Vec<u8>,
    pub server_public_key_fingerprints: Vec<i64>,
}

impl Identifiable for ResPq {
    const CONSTRUCTOR_ID: u32 = 0x05162463;
}

impl Deserializable for ResPq {
    fn deserialize(buf: Buffer) -> relay_tl::deserialize::Result<Self> {
        expect_constructor::<Self>(buf)?;
        Ok(Self {
            nonce: <[u8; 16]>::deserialize(buf)?,
            server_nonce: <[u8; 16]>::deserialize(buf)?,
            pq: buf.read_bytes()?,
            server_public_key_fingerprints: Vec::<i64>::deserialize(buf)?,
        })
    }
}

/// `req_DH_params#d712e4be nonce:int128 server_nonce:int128 p:bytes q:bytes
///  public_key_fingerprint:long encrypted_data:bytes = Server_DH_Params`
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub struct ReqDhParams {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub public_key_fingerprint: i64,
    pub encrypted_data: Vec<u8>,
}

impl Identifiable for ReqDhParams {
    const CONSTRUCTOR_ID: u32 = 0xd712e4be;
}

impl Serializable for ReqDhParams {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        write_bytes(buf, &self.p);
        write_bytes(buf, &self.q);
        self.public_key_fingerprint.serialize(buf);
        write_bytes(buf, &self.encrypted_data);
    }
}

/// The boxed `Server_DH_Params` response.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum ServerDhParams {
    /// `server_DH_params_ok#d0e8075c`
    Ok {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        encrypted_answer: Vec<u8>,
    },
    /// `server_DH_params_fail#79cb045d`
    Fail {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash: [u8; 16],
    },
}

impl ServerDhParams {
    const ID_OK: u32 = 0xd0e8075c;
    const ID_FAIL: u32 = 0x79cb045d;
}

impl Deserializable for ServerDhParams {
    fn deserialize(buf: Buffer) -> relay_tl::deserialize::Result<Self> {
        match u32::deserialize(buf)? {
            Self::ID_OK => Ok(Self::Ok {
                nonce: <[u8; 16]>::deserialize(buf)?,
                server_nonce: <[u8; 16]>::deserialize(buf)?,
                encrypted_answer: buf.read_bytes()?,
            }),
            Self::ID_FAIL => Ok(Self::Fail {
                nonce: <[u8; 16]>::deserialize(buf)?,
                server_nonce: <[u8; 16]>::deserialize(buf)?,
                new_nonce_hash: <[u8; 16]>::deserialize(buf)?,
            }),
            id => Err(relay_tl::deserialize::Error::UnexpectedConstructor { id }),
        }
    }
}

/// `server_DH_inner_data#b5890dba nonce:int128 server_nonce:int128 g:int
///  dh_prime:bytes g_a:bytes server_time:int = Server_DH_inner_data`
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub struct ServerDhInnerData {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub g: i32,
    pub dh_prime: Vec<u8>,
    pub g_a: Vec<u8>,
    pub server_time: i32,
}

impl Identifiable for ServerDhInnerData {
    const CONSTRUCTOR_ID: u32 = 0xb5890dba;
}

impl Deserializable for ServerDhInnerData {
    fn deserialize(buf: Buffer) -> relay_tl::deserialize::Result<Self> {
        expect_constructor::<Self>(buf)?;
        Ok(Self {
            nonce: <[u8; 16]>::deserialize(buf)?,
            server_nonce: <[u8; 16]>::deserialize(buf)?,
            g: i32::deserialize(buf)?,
            dh_prime: buf.read_bytes()?,
            g_a: buf.read_bytes()?,
            server_time: i32::deserialize(buf)?,
        })
    }
}

/// `set_client_DH_params#f5045f1f nonce:int128 server_nonce:int128
///  encrypted_data:bytes = Set_client_DH_params_answer`
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub struct SetClientDhParams {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub encrypted_data: Vec<u8>,
}

impl Identifiable for SetClientDhParams {
    const CONSTRUCTOR_ID: u32 = 0xf5045f1f;
}

impl Serializable for SetClientDhParams {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        write_bytes(buf, &self.encrypted_data);
    }
}

/// The boxed `Set_client_DH_params_answer` response.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum SetClientDhParamsAnswer {
    /// `dh_gen_ok#3bcbf734`
    Ok {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash1: [u8; 16],
    },
    /// `dh_gen_retry#46dc1fb9`
    Retry {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash2: [u8; 16],
    },
    /// `dh_gen_fail#a69dae02`
    Fail {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash3: [u8; 16],
    },
}

impl SetClientDhParamsAnswer {
    const ID_OK: u32 = 0x3bcbf734;
    const ID_RETRY: u32 = 0x46dc1fb9;
    const ID_FAIL: u32 = 0xa69dae02;
}

impl Deserializable for SetClientDhParamsAnswer {
    fn deserialize(buf: Buffer) -> relay_tl::deserialize::Result<Self> {
        let id = u32::deserialize(buf)?;
        let nonce = <[u8; 16]>::deserialize(buf)?;
        let server_nonce = <[u8; 16]>::deserialize(buf)?;
        let hash = <[u8; 16]>::deserialize(buf)?;
        match id {
            Self::ID_OK => Ok(Self::Ok { nonce, server_nonce, new_nonce_hash1: hash }),
            Self::ID_RETRY => Ok(Self::Retry { nonce, server_nonce, new_nonce_hash2: hash }),
            Self::ID_FAIL => Ok(Self::Fail { nonce, server_nonce, new_nonce_hash3: hash }),
            id => Err(relay_tl::deserialize::Error::UnexpectedConstructor { id }),
        }
    }
}

fn expect_constructor<T: Identifiable>(buf: Buffer) -> relay_tl::deserialize::Result<()> {
    match u32::deserialize(buf)? {
        id if id == T::CONSTRUCTOR_ID => Ok(()),
        id => Err(relay_tl::deserialize::Error::UnexpectedConstructor { id }),
    }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// State carried from step 1 to step 2.
pub struct Step1 {
    nonce: [u8; 16],
}

/// State carried from step 2 to step 3.
#[derive(Debug)]
pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

/// State carried from step 3 to [`finish`].
#[derive(Debug)]
pub struct Step3 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    gab: BigUint,
}

/// The final output of a successful handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    /// The 256-byte authorization key.
    pub auth_key: [u8; 256],
    /// Initial server salt, derived from the handshake nonces.
    pub first_salt: i64,
}

// ─── Step 1: req_pq ──────────────────────────────────────────────────────────

/// Generate the `req_pq` request with a fresh nonce.
pub fn step1() -> (ReqPq, Step1) {
    let mut nonce = [0u8; 16];
    fill_random(&mut nonce);
    do_step1(&nonce)
}

fn do_step1(random: &[u8; 16]) -> (ReqPq, Step1) {
    let nonce = *random;
    (ReqPq { nonce }, Step1 { nonce })
}

// ─── Step 2: req_DH_params ───────────────────────────────────────────────────

/// Process `resPQ`: factorize the proof-of-work, wrap the inner data in
/// RSA, and generate `req_DH_params`.
pub fn step2(data: Step1, response: ResPq, key: &PublicRsa) -> Result<(ReqDhParams, Step2), Error> {
    let mut random = [0u8; 256];
    fill_random(&mut random);
    do_step2(data, response, key, &random)
}

/// `random` layout: 32 bytes of `new_nonce`, then 224 bytes of RSA padding.
fn do_step2(
    data: Step1,
    response: ResPq,
    key: &PublicRsa,
    random: &[u8; 256],
) -> Result<(ReqDhParams, Step2), Error> {
    let Step1 { nonce } = data;

    check_nonce(&response.nonce, &nonce)?;

    if response.pq.len() != 8 {
        return Err(Error::InvalidPqSize { size: response.pq.len() });
    }
    let pq = u64::from_be_bytes(response.pq.as_slice().try_into().expect("length checked"));

    if !response
        .server_public_key_fingerprints
        .contains(&key.fingerprint())
    {
        return Err(Error::UnknownFingerprint {
            fingerprints: response.server_public_key_fingerprints.clone(),
        });
    }

    let (p, q) = relay_crypto::factorize(pq);

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);
    let rsa_padding: &[u8; 224] = random[32..].try_into().expect("224 bytes remain");

    let p_bytes = trim_be(p);
    let q_bytes = trim_be(q);

    // p_q_inner_data#83c95aec pq:bytes p:bytes q:bytes nonce:int128
    // server_nonce:int128 new_nonce:int256
    let mut inner = Vec::with_capacity(112);
    0x83c95aecu32.serialize(&mut inner);
    write_bytes(&mut inner, &response.pq);
    write_bytes(&mut inner, &p_bytes);
    write_bytes(&mut inner, &q_bytes);
    inner.extend_from_slice(&nonce);
    inner.extend_from_slice(&response.server_nonce);
    inner.extend_from_slice(&new_nonce);

    let encrypted_data = key.encrypt_hashed(&inner, rsa_padding);

    Ok((
        ReqDhParams {
            nonce,
            server_nonce: response.server_nonce,
            p: p_bytes,
            q: q_bytes,
            public_key_fingerprint: key.fingerprint(),
            encrypted_data,
        },
        Step2 {
            nonce,
            server_nonce: response.server_nonce,
            new_nonce,
        },
    ))
}

// ─── Step 3: set_client_DH_params ────────────────────────────────────────────

/// Process `server_DH_params_ok` and generate `set_client_DH_params`.
pub fn step3(data: Step2, response: ServerDhParams) -> Result<(SetClientDhParams, Step3), Error> {
    let mut random = [0u8; 272];
    fill_random(&mut random);
    do_step3(data, response, &random)
}

/// `random` layout: 256 bytes for the DH secret `b`, 16 for IGE padding.
fn do_step3(
    data: Step2,
    response: ServerDhParams,
    random: &[u8; 272],
) -> Result<(SetClientDhParams, Step3), Error> {
    let Step2 { nonce, server_nonce, new_nonce } = data;

    let encrypted_answer = match response {
        ServerDhParams::Fail { nonce: got_nonce, server_nonce: got_server_nonce, new_nonce_hash } => {
            check_nonce(&got_nonce, &nonce)?;
            check_server_nonce(&got_server_nonce, &server_nonce)?;
            let digest = sha1!(new_nonce);
            let mut expected = [0u8; 16];
            expected.copy_from_slice(&digest[4..]);
            check_new_nonce_hash(&new_nonce_hash, &expected)?;
            return Err(Error::DhParamsFail);
        }
        ServerDhParams::Ok { nonce: got_nonce, server_nonce: got_server_nonce, encrypted_answer } => {
            check_nonce(&got_nonce, &nonce)?;
            check_server_nonce(&got_server_nonce, &server_nonce)?;
            encrypted_answer
        }
    };

    if encrypted_answer.len() % 16 != 0 {
        return Err(Error::EncryptedResponseNotPadded { len: encrypted_answer.len() });
    }

    let (tmp_key, tmp_iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);

    // The leading SHA-1 is discarded unverified: the answer's padding
    // length is unknown, so the hashed span cannot be reconstructed.
    let answer = AesIge::new(&tmp_key, &tmp_iv)
        .decrypt_with_hash(&encrypted_answer)
        .map_err(|_| Error::AnswerUndersized { len: encrypted_answer.len() })?;

    let inner = ServerDhInnerData::from_bytes(&answer)
        .map_err(|error| Error::InvalidDhInnerData { error })?;

    check_nonce(&inner.nonce, &nonce)?;
    check_server_nonce(&inner.server_nonce, &server_nonce)?;
    log::debug!("server time during handshake: {}", inner.server_time);

    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    if !accepted_dh_params(inner.g, &dh_prime) {
        return Err(Error::UnsafeDhParameters { g: inner.g });
    }

    let one: BigUint = One::one();
    let g = BigUint::from(inner.g as u32);
    let g_a = BigUint::from_bytes_be(&inner.g_a);
    check_g_in_range(&g_a, &one, &(&dh_prime - &one))?;

    let b = BigUint::from_bytes_be(&random[..256]);
    let g_b = g.modpow(&b, &dh_prime);
    let gab = g_a.modpow(&b, &dh_prime);
    check_g_in_range(&g_b, &one, &(&dh_prime - &one))?;

    // client_DH_inner_data#6643b654 nonce:int128 server_nonce:int128
    // retry_id:long g_b:bytes
    let mut client_inner = Vec::with_capacity(304);
    0x6643b654u32.serialize(&mut client_inner);
    client_inner.extend_from_slice(&nonce);
    client_inner.extend_from_slice(&server_nonce);
    0u64.serialize(&mut client_inner);
    write_bytes(&mut client_inner, &g_b.to_bytes_be());

    let digest = sha1!(&client_inner);
    let pad_len = (16 - (20 + client_inner.len()) % 16) % 16;

    let mut hashed = Vec::with_capacity(20 + client_inner.len() + pad_len);
    hashed.extend_from_slice(&digest);
    hashed.extend_from_slice(&client_inner);
    hashed.extend_from_slice(&random[256..256 + pad_len]);

    // A fresh IGE instance: the chain state from the answer decryption is
    // never carried over.
    let encrypted_data = AesIge::new(&tmp_key, &tmp_iv).encrypt(&hashed);

    Ok((
        SetClientDhParams { nonce, server_nonce, encrypted_data },
        Step3 { nonce, server_nonce, new_nonce, gab },
    ))
}

// ─── Step 4: finish ──────────────────────────────────────────────────────────

/// Finalize the handshake. Only `dh_gen_ok` completes it; the retry and
/// fail variants surface as errors (retry logic is the caller's problem).
pub fn finish(data: Step3, response: SetClientDhParamsAnswer) -> Result<Finished, Error> {
    let Step3 { nonce, server_nonce, new_nonce, gab } = data;

    let (got_nonce, got_server_nonce, hash) = match &response {
        SetClientDhParamsAnswer::Ok { nonce, server_nonce, new_nonce_hash1 } => {
            (nonce, server_nonce, Some(new_nonce_hash1))
        }
        SetClientDhParamsAnswer::Retry { nonce, server_nonce, .. } => (nonce, server_nonce, None),
        SetClientDhParamsAnswer::Fail { nonce, server_nonce, .. } => (nonce, server_nonce, None),
    };

    check_nonce(got_nonce, &nonce)?;
    check_server_nonce(got_server_nonce, &server_nonce)?;

    let hash = match (hash, &response) {
        (Some(h), _) => h,
        (None, SetClientDhParamsAnswer::Retry { .. }) => return Err(Error::DhGenRetry),
        (None, _) => return Err(Error::DhGenFail),
    };

    let mut auth_key = [0u8; 256];
    let gab_bytes = gab.to_bytes_be();
    auth_key[256 - gab_bytes.len()..].copy_from_slice(&gab_bytes);

    let key = AuthKey::from_bytes(auth_key);
    let expected = key.calc_new_nonce_hash(&new_nonce, 1);
    check_new_nonce_hash(hash, &expected)?;

    let mut salt = [0u8; 8];
    salt.copy_from_slice(&new_nonce[..8]);
    xor_into(&mut salt, &server_nonce[..8]);

    Ok(Finished {
        auth_key,
        first_salt: i64::from_le_bytes(salt),
    })
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn trim_be(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[skip..].to_vec()
}

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNonce { got: *got, expected: *expected })
    }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidServerNonce { got: *got, expected: *expected })
    }
}

fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNewNonceHash { got: *got, expected: *expected })
    }
}

fn check_g_in_range(value: &BigUint, low: &BigUint, high: &BigUint) -> Result<(), Error> {
    if low < value && value < high {
        Ok(())
    } else {
        Err(Error::GParameterOutOfRange {
            value: value.clone(),
            low: low.clone(),
            high: high.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::plaintext_message;
    use hex_literal::hex;

    // Recorded exchange: canned server responses plus pinned randomness
    // reproduce every request byte-for-byte.
    const PEM: &str = "\
-----BEGIN RSA PUBLIC KEY-----\n\
MIIBCgKCAQEA/z4YLgNVL+1OEauBs3wwu3OsT7LDvd2vZwcWiEHqZS2BfY5SLbJu\n\
ppvlQa6DXv3lgzKscKUcHtG0ww4G6FVfDdJ3Kt/OALrvmEN3v/WImEzK7YpsNjqQ\n\
j6DxLhL6UpQ84RwVzBrDK/O3VGSkrVocTLg6zUfXwcnXnElVVThVijM3dm/IZrPh\n\
rs9wxXcchGyDUU1M257796QDPswxQOYJSt20OFdfpLp9G3YOzuq94GgXJ/ybLMCW\n\
rkVomXElrk2uctp3DMfOFW/zjJzFcjXxQBGNqzZSiImSpikjUHr/wuT0+LgeYZgx\n\
MtSRmHN90naCDc0vWisMImc2MB/7ZFgp+QIDAQAB\n\
-----END RSA PUBLIC KEY-----\n\
";

    const NONCE: [u8; 16] = hex!("08322d86225102b46abfeb73e2cd128d");

    const MSG1: &[u8] = &hex!(
        "00000000000000000000000000000000140000007897466008322d86225102b4"
        "6abfeb73e2cd128d"
    );

    const RES_PQ: &[u8] = &hex!(
        "6324160508322d86225102b46abfeb73e2cd128d4bdf0ee059909598d69e85f8"
        "36105b41081468b766abd90e2d00000015c4b51c0200000003186e240b987b86"
        "05a435a022da3ece"
    );

    const MSG2: &[u8] = &hex!(
        "0000000000000000000000000000000040010000bee412d708322d86225102b4"
        "6abfeb73e2cd128d4bdf0ee059909598d69e85f836105b410447e8a6a3000000"
        "0448a854ef00000005a435a022da3ecefe0001002f153578c9b41b1bab190c81"
        "4f9313f769b8cbbd0f744ebed5f58a027530f0f1889f6a41e1dec68ff9ed2953"
        "3df25b65d79a0a9298d2625f20dd9dc3212da83bd2db5253b3b9dab6a14d6009"
        "89ea9d771eb7309a9090da7a211966e565ccbae3847f445857107bf4afbf96fc"
        "ccbbc68cedf25962c199d2bc95a2548d257997d7aabab9360df80282446648c2"
        "9f3bfee3071bd3040ec8fdb1f893c4bd06035944ae1dd4e1594401c3980ea9a6"
        "b0357e07c6b6ccabeb5ee27145e0cd24022eb7991c537158e439a13490ea5874"
        "4152efab996cdde19b3f97b8f234f2244417ea240e0e28ff2a364a97b7af8b6a"
        "f1cba4c600f8210a979f5f587583ad0afd37ec52"
    );

    const DH_OK: &[u8] = &hex!(
        "5c07e8d008322d86225102b46abfeb73e2cd128d4bdf0ee059909598d69e85f8"
        "36105b41fe5002009377444cfc1bc4b645dc78ea11cf4044162ead5831eef63c"
        "f771ea741e5277cc0f9838aac542a3cf67d57215d6259fece0605243de0cae5d"
        "d5a2203106644b01d56811ca9ac8dffe1adcc05a2430c0028082e232d50f147f"
        "8f2b3aa7e903df318b334823ff3014ffcf4a6cf1b2dff08aadf3e34226b079fb"
        "5f9685d5c149f93ae6417b043e25417c774b267546733659fb2f518094af3564"
        "6cbfa1134cee91a4e31d3e8ae508046da1f53f3312e3ddcf5db16cd9e7e7a4ca"
        "44b4bf3b1b9afa9809ae5ba78c8dd6dcd525d912215c7000cf8d14a6e9d7abd9"
        "5f48734861ede47e9441a3d57b57268e2bfd5b8f71bb54c40f6b67587940a708"
        "5f5786b8d8c330f645141977ce2a5c9291e50b61ccf20115122c28fd0ec2b259"
        "43dce0d72143a91721572fc1fe56621b2b7376c3352769db9db913366edbaa90"
        "d8a9d23d50b31ff9f2ea8056a9a0b02000bfa9e764cb3577fb05969de59654b6"
        "b9b8b3386397e688dd29656c5610d5b877277b99fd716846c7feb5d8308d709c"
        "474c7fa51cff036ba6ba832ac0070296ad70b8af272371e60757fc3bcebda236"
        "fcdda47af2f5724ca90154e4717b6b1e2d0e29ae57443d193fcde96953eb17df"
        "0b4fe69e93a8296b90f0f9701c1b6eac2ff67e6d5848e5178685110f6fb50a07"
        "48b3da78f636db340f48f378008d4508fc0d910221bb54cc15759502018fc2af"
        "5cc15fe2618ff08d18401faf6d69a31deeeae2fc5665c6ad9042e0f76c3a0a78"
        "140301aa2606d6cc4119ef0619922b8af91d1ae46044bd354f6252a01026b9d8"
        "e38ac55af5f98fc9245cd0bcc01bde0b68f506216bed29ee"
    );

    const MSG3: &[u8] = &hex!(
        "00000000000000000000000000000000780100001f5f04f508322d86225102b4"
        "6abfeb73e2cd128d4bdf0ee059909598d69e85f836105b41fe5001007915f3af"
        "b87dae7dda1430403f102e284385e5105e37d7c045baa21e68a97706da7e83a2"
        "73ba626d26c00dbd60b1d3e90ad15d1ad3e45f06bd4a43c0dfbbb70e654f4609"
        "39bb3a98228509f710eaa071d64f4154718d4ce3028be5f788c799d109398842"
        "644382617d5e9aea7d8893e04e701bfb80fa86b613f67e7466ee6dc768b286c7"
        "5d7a89a4b6281e6109bd5aee63e9744d1a29ad12bf7542930a1e545f813b9c23"
        "643d71593ab71d79278bb59cc0a92c436fd5f8420332b78a9b79c261d07e82eb"
        "e9014e339c9e6b93f05cc21f3c18731262525bf7e694027a985744b2aba566da"
        "9b6c8b61564207a6544757d92ab60d6aa1b510fcde95c4f1c9f3b7a1a6d4568d"
        "93d1038fd3bdf5effb7861924e8cd730b44a8b83a0a5e9d39a0efde4a4a14109"
        "0aa79f0d5f026b7bd4ea5a76ed9827e5e9c94ef89a520f7f58009634048a8844"
        "5c945de115df0456de1aca2f"
    );

    const DH_GEN_OK: &[u8] = &hex!(
        "34f7cb3b08322d86225102b46abfeb73e2cd128d4bdf0ee059909598d69e85f8"
        "36105b41e46fb3ece32ac3e25dbf7e4246db4aab"
    );

    const RANDOM256: &[u8] = &hex!(
        "e094f0a0868d9d1126c52a689941d079b3d05a88957fa578e86d7635e8f9648d"
        "96a2cf9ad6b02da99af1373c4f93432864595edd9a324cbbf57484d3869843d1"
        "89da4b1e42c90abada9adb994b9edc487d8edd7352a38ad611d7af0af632e4c3"
        "19f57ed2041bfcdfc8d01aa19471b8084fe661cc474152e23190b27b33e620ae"
        "da49dce3208253a72484cf888802ad171d4b1264a85ef5e290afb49994f43c07"
        "91f98e5b85ae535f2ac3cff2a5f1378f41105c111144e85c0721a9403acc5010"
        "b45435ffb32aad64e6c4327a70714701ab1eafb0714b2a100cbfc635901d0e44"
        "6185e754985f7e35e868c3d6c7dfcb3e0827970e00dbfb9b613c15d7c88270a2"
    );

    const RANDOM272: &[u8] = &hex!(
        "b20378d96231e0a12a926d6904105380e26a4ef3b283e753ff99dd279f0ad565"
        "07df7988e9572d2b6ac8730e2864efd132eff242b0b7ff436492557d40a983ff"
        "2e16cac0f59efe6eab900cfb6e661614b80b71d3bdd2ec2a38dd620d23209b30"
        "ef16276aa6528d26f97726a551ab3d9f8b1fbc04c77fbf63339345e002041894"
        "fd4ef2a889cdff0e0683d27f2263c0258af39d0cc4aba44693001e30cee14560"
        "6d48ad31e02c946cb7d73bbf9e1c2df3d534f7a4bccf644b4c5ea01c1615daa1"
        "39f5600cb983f6840afc73a63f5db174ba06abb6330d508bf8a3df591ae5fe9c"
        "9472a52b9633e7ce8a32d80454e179fb56b3c35665c668eec0945f95e7b0b8d5"
        "2d478670147a62c90ab9a1b400ec2fb4"
    );

    fn rsa_key() -> PublicRsa {
        PublicRsa::from_pem(PEM).unwrap()
    }

    fn run_to_step3() -> (SetClientDhParams, Step3) {
        let (_, s1) = do_step1(&NONCE);
        let res_pq = ResPq::from_bytes(RES_PQ).unwrap();
        let (_, s2) = do_step2(s1, res_pq, &rsa_key(), RANDOM256.try_into().unwrap()).unwrap();
        let dh = ServerDhParams::from_bytes(DH_OK).unwrap();
        do_step3(s2, dh, RANDOM272.try_into().unwrap()).unwrap()
    }

    #[test]
    fn golden_exchange() {
        let key = rsa_key();

        let (req1, s1) = do_step1(&NONCE);
        assert_eq!(plaintext_message(&req1.to_bytes()), MSG1);

        let res_pq = ResPq::from_bytes(RES_PQ).unwrap();
        let (req2, s2) = do_step2(s1, res_pq, &key, RANDOM256.try_into().unwrap()).unwrap();
        assert_eq!(plaintext_message(&req2.to_bytes()), MSG2);

        let dh = ServerDhParams::from_bytes(DH_OK).unwrap();
        let (req3, s3) = do_step3(s2, dh, RANDOM272.try_into().unwrap()).unwrap();
        assert_eq!(plaintext_message(&req3.to_bytes()), MSG3);

        let answer = SetClientDhParamsAnswer::from_bytes(DH_GEN_OK).unwrap();
        let done = finish(s3, answer).unwrap();

        assert_eq!(&done.auth_key[..16], hex!("61f8521718566c3aa57bca1b685fce02"));
        assert_eq!(AuthKey::from_bytes(done.auth_key).key_id(), hex!("4d24af92b2744ffa"));
        assert_eq!(done.first_salt, -8572569045994419285);
    }

    #[test]
    fn respq_nonce_mismatch_is_rejected() {
        let (_, s1) = do_step1(&NONCE);
        let mut res_pq = ResPq::from_bytes(RES_PQ).unwrap();
        res_pq.nonce[0] ^= 1;
        let err = do_step2(s1, res_pq, &rsa_key(), RANDOM256.try_into().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidNonce { .. }));
    }

    #[test]
    fn wrong_pq_size_is_rejected() {
        let (_, s1) = do_step1(&NONCE);
        let mut res_pq = ResPq::from_bytes(RES_PQ).unwrap();
        res_pq.pq = vec![0; 7];
        let err = do_step2(s1, res_pq, &rsa_key(), RANDOM256.try_into().unwrap()).unwrap_err();
        assert_eq!(err, Error::InvalidPqSize { size: 7 });
    }

    #[test]
    fn foreign_fingerprint_list_is_rejected() {
        let (_, s1) = do_step1(&NONCE);
        let mut res_pq = ResPq::from_bytes(RES_PQ).unwrap();
        res_pq.server_public_key_fingerprints = vec![1, 2, 3];
        let err = do_step2(s1, res_pq, &rsa_key(), RANDOM256.try_into().unwrap()).unwrap_err();
        assert_eq!(err, Error::UnknownFingerprint { fingerprints: vec![1, 2, 3] });
    }

    #[test]
    fn misaligned_encrypted_answer_is_rejected() {
        let (_, s1) = do_step1(&NONCE);
        let res_pq = ResPq::from_bytes(RES_PQ).unwrap();
        let (_, s2) = do_step2(s1, res_pq, &rsa_key(), RANDOM256.try_into().unwrap()).unwrap();
        let dh = ServerDhParams::Ok {
            nonce: NONCE,
            server_nonce: s2.server_nonce,
            encrypted_answer: vec![0; 33],
        };
        let err = do_step3(s2, dh, RANDOM272.try_into().unwrap()).unwrap_err();
        assert_eq!(err, Error::EncryptedResponseNotPadded { len: 33 });
    }

    #[test]
    fn dh_gen_retry_is_rejected() {
        let (_, s3) = run_to_step3();
        let mut raw = DH_GEN_OK.to_vec();
        raw[..4].copy_from_slice(&SetClientDhParamsAnswer::ID_RETRY.to_le_bytes());
        let answer = SetClientDhParamsAnswer::from_bytes(&raw).unwrap();
        assert_eq!(finish(s3, answer), Err(Error::DhGenRetry));
    }

    #[test]
    fn dh_gen_fail_is_rejected() {
        let (_, s3) = run_to_step3();
        let mut raw = DH_GEN_OK.to_vec();
        raw[..4].copy_from_slice(&SetClientDhParamsAnswer::ID_FAIL.to_le_bytes());
        let answer = SetClientDhParamsAnswer::from_bytes(&raw).unwrap();
        assert_eq!(finish(s3, answer), Err(Error::DhGenFail));
    }

    #[test]
    fn tampered_new_nonce_hash_is_rejected() {
        let (_, s3) = run_to_step3();
        let mut raw = DH_GEN_OK.to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let answer = SetClientDhParamsAnswer::from_bytes(&raw).unwrap();
        assert!(matches!(
            finish(s3, answer),
            Err(Error::InvalidNewNonceHash { .. })
        ));
    }

    #[test]
    fn only_the_known_group_is_accepted() {
        let prime = BigUint::parse_bytes(DH_PRIME_HEX.as_bytes(), 16).unwrap();
        assert!(accepted_dh_params(3, &prime));
        assert!(!accepted_dh_params(2, &prime));
        assert!(!accepted_dh_params(3, &(&prime + 2u32)));
    }
}

