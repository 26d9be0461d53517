//! The encrypted MTProto connection.
//!
//! [`Mtp`] owns the link, the RSA trust anchor, and the cryptographic
//! session state (auth key, server salt, message-ID allocator). It runs
//! the key exchange on first use, seals outbound messages, and
//! stream-decrypts inbound ones.

use std::sync::Mutex as StdMutex;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use relay_crypto::rsa::PublicRsa;
use relay_crypto::{AesIge, AuthKey, Direction, fill_random, prepare_key, sha1};
use relay_mtproto::handshake;
use relay_mtproto::message::{MsgIdGen, plaintext_message};
use relay_tl::{Deserializable, Serializable};
use tokio::sync::Mutex;

use crate::errors::SessionError;
use crate::pool::CpuPool;
use crate::transport::AbridgedLink;
use crate::Config;

/// Upper bound on a single decrypted body; larger is assumed corrupt.
const MAX_BODY_BYTES: usize = 1 << 24;

/// A decrypted inbound message.
pub(crate) struct Inbound {
    pub salt: i64,
    pub session_id: i64,
    pub msg_id: i64,
    pub seqno: i32,
    pub body: Vec<u8>,
}

struct MtpState {
    session_id: i64,
    server_salt: i64,
    ids: MsgIdGen,
}

pub(crate) struct Mtp {
    link: AbridgedLink,
    rsa: PublicRsa,
    pool: CpuPool,
    /// Serializes the handshake; holders of the key never block each other.
    auth: Mutex<Option<AuthKey>>,
    /// Serializes header decoding on the inbound path.
    read_lock: Mutex<()>,
    state: StdMutex<MtpState>,
}

impl Mtp {
    pub(crate) fn new(config: &Config) -> Result<Self, SessionError> {
        let rsa = PublicRsa::from_pem(&config.rsa_key_pem)?;

        let auth = match &config.auth_key {
            Some(b64) => Some(decode_auth_key(b64)?),
            None => None,
        };
        let session_id = config.session_id.unwrap_or_else(random_i64);

        Ok(Self {
            link: AbridgedLink::new(config.host.clone(), config.port),
            rsa,
            pool: CpuPool::new(3),
            auth: Mutex::new(auth),
            read_lock: Mutex::new(()),
            state: StdMutex::new(MtpState {
                session_id,
                server_salt: 0,
                ids: MsgIdGen::new(),
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MtpState> {
        self.state.lock().expect("state mutex poisoned")
    }

    // ── Session state accessors ──────────────────────────────────────────

    pub(crate) fn server_salt(&self) -> i64 {
        self.state().server_salt
    }

    pub(crate) fn set_server_salt(&self, salt: i64) {
        self.state().server_salt = salt;
    }

    /// Export `(auth_key_base64, session_id)` once a key exists.
    pub(crate) async fn export_session(&self) -> Option<(String, i64)> {
        let key = self.auth.lock().await.clone()?;
        let session_id = self.state().session_id;
        Some((BASE64.encode(key.to_bytes()), session_id))
    }

    // ── Authorization key ────────────────────────────────────────────────

    /// The session key, creating it through the four-round exchange on
    /// first use. Concurrent callers wait on the same lock.
    async fn auth_key(&self) -> Result<AuthKey, SessionError> {
        let mut guard = self.auth.lock().await;
        if let Some(key) = guard.as_ref() {
            return Ok(key.clone());
        }
        let key = self.create_auth_key().await?;
        *guard = Some(key.clone());
        Ok(key)
    }

    async fn create_auth_key(&self) -> Result<AuthKey, SessionError> {
        log::info!("creating a new authorization key");

        let (req, s1) = handshake::step1();
        self.write_plain(&req.to_bytes()).await?;
        let res_pq: handshake::ResPq = self.read_plain().await?;

        // Factorization and the RSA exponentiation dominate; keep them off
        // the I/O loop.
        let rsa = self.rsa.clone();
        let (req, s2) = self
            .pool
            .run(move || handshake::step2(s1, res_pq, &rsa))
            .await?;
        self.write_plain(&req.to_bytes()).await?;
        let params: handshake::ServerDhParams = self.read_plain().await?;

        let (req, s3) = self.pool.run(move || handshake::step3(s2, params)).await?;
        self.write_plain(&req.to_bytes()).await?;
        let answer: handshake::SetClientDhParamsAnswer = self.read_plain().await?;

        let done = handshake::finish(s3, answer)?;
        self.set_server_salt(done.first_salt);
        log::info!("authorization key established");
        Ok(AuthKey::from_bytes(done.auth_key))
    }

    async fn write_plain(&self, body: &[u8]) -> Result<(), SessionError> {
        self.link.write(&plaintext_message(body)).await?;
        Ok(())
    }

    /// Read one unencrypted handshake envelope and decode its body.
    async fn read_plain<T: Deserializable>(&self) -> Result<T, SessionError> {
        let _guard = self.read_lock.lock().await;
        let auth_key_id = self.link.read(8).await?;
        if auth_key_id != [0u8; 8] {
            return Err(SessionError::Malformed(
                "expected auth_key_id = 0 during handshake".into(),
            ));
        }
        let _msg_id = self.link.read(8).await?;
        let len_bytes = self.link.read(4).await?;
        let len = u32::from_le_bytes(len_bytes.as_slice().try_into().expect("4 bytes")) as usize;
        if len > MAX_BODY_BYTES {
            return Err(SessionError::Malformed(format!(
                "implausible handshake body length {len}"
            )));
        }
        let body = self.link.read(len).await?;
        Ok(T::from_bytes(&body)?)
    }

    // ── Encrypted write path ─────────────────────────────────────────────

    /// Seal and send one message, returning the message ID it went out
    /// under. ID minting is synchronous: no await sits between allocation
    /// and enqueue, so IDs hit the wire in allocation order per caller.
    pub(crate) async fn write_message(&self, seqno: i32, body: &[u8]) -> Result<i64, SessionError> {
        let auth_key = self.auth_key().await?;

        let (msg_id, inner) = {
            let mut st = self.state();
            let msg_id = st.ids.next();
            let mut inner = Vec::with_capacity(32 + body.len());
            inner.extend(st.server_salt.to_le_bytes());
            inner.extend(st.session_id.to_le_bytes());
            inner.extend(msg_id.to_le_bytes());
            inner.extend(seqno.to_le_bytes());
            inner.extend((body.len() as u32).to_le_bytes());
            inner.extend_from_slice(body);
            (msg_id, inner)
        };

        let mut pad = [0u8; 16];
        fill_random(&mut pad);
        let wire = self.pool.run(move || seal(&auth_key, inner, &pad)).await;
        self.link.write(&wire).await?;
        Ok(msg_id)
    }

    // ── Encrypted read path ──────────────────────────────────────────────

    /// Read and decrypt the next inbound message.
    ///
    /// Decryption is lazy: the 32-byte header is pulled block by block,
    /// then the body ciphertext is fetched in one span and decrypted on
    /// the pool. Whatever padding remains in the final block dies with
    /// the per-message cipher state.
    pub(crate) async fn read_message(&self) -> Result<Inbound, SessionError> {
        let auth_key = self.auth_key().await?;
        let _guard = self.read_lock.lock().await;

        let got = self.link.read(8).await?;
        if got != auth_key.key_id() {
            return Err(SessionError::UnknownAuthKey {
                got: got.as_slice().try_into().expect("8 bytes"),
            });
        }
        let msg_key: [u8; 16] = self
            .link
            .read(16)
            .await?
            .as_slice()
            .try_into()
            .expect("16 bytes");

        let key = auth_key.clone();
        let (aes_key, aes_iv) = self
            .pool
            .run(move || prepare_key(&key, &msg_key, Direction::Read))
            .await;

        let mut reader = IgeReader::new(&self.link, AesIge::new(&aes_key, &aes_iv));
        let salt = i64::from_le_bytes(reader.read_array().await?);
        let session_id = i64::from_le_bytes(reader.read_array().await?);
        let msg_id = i64::from_le_bytes(reader.read_array().await?);
        let seqno = i32::from_le_bytes(reader.read_array().await?);
        let body_len = u32::from_le_bytes(reader.read_array().await?) as usize;
        if body_len > MAX_BODY_BYTES {
            return Err(SessionError::Malformed(format!(
                "implausible body length {body_len}"
            )));
        }
        let body = reader.read_remaining(body_len, &self.pool).await?;

        Ok(Inbound { salt, session_id, msg_id, seqno, body })
    }
}

/// Build the encrypted wire frame for one inner message.
///
/// `msg_key` is taken over the unpadded plaintext; `pad` supplies the
/// random bytes that fill the final AES block.
fn seal(auth_key: &AuthKey, mut inner: Vec<u8>, pad: &[u8; 16]) -> Vec<u8> {
    let digest = sha1!(&inner);
    let msg_key: [u8; 16] = digest[4..20].try_into().expect("sha1 slice is 16 bytes");

    let pad_len = (16 - inner.len() % 16) % 16;
    inner.extend_from_slice(&pad[..pad_len]);

    let (key, iv) = prepare_key(auth_key, &msg_key, Direction::Write);
    let cipher = AesIge::new(&key, &iv).encrypt(&inner);

    let mut wire = Vec::with_capacity(24 + cipher.len());
    wire.extend_from_slice(&auth_key.key_id());
    wire.extend_from_slice(&msg_key);
    wire.extend_from_slice(&cipher);
    wire
}

fn decode_auth_key(b64: &str) -> Result<AuthKey, SessionError> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|_| SessionError::Malformed("auth key is not valid base64".into()))?;
    let data: [u8; 256] = bytes
        .try_into()
        .map_err(|_| SessionError::Malformed("auth key must be 256 bytes".into()))?;
    Ok(AuthKey::from_bytes(data))
}

fn random_i64() -> i64 {
    let mut buf = [0u8; 8];
    fill_random(&mut buf);
    i64::from_le_bytes(buf)
}

// ─── Streaming decryptor ─────────────────────────────────────────────────────

/// Pull-based IGE decryptor: owns the cipher state and buffers one or
/// more plaintext blocks while a parser consumes arbitrary spans.
struct IgeReader<'a> {
    link: &'a AbridgedLink,
    aes: AesIge,
    plain: Vec<u8>,
    pos: usize,
}

impl<'a> IgeReader<'a> {
    fn new(link: &'a AbridgedLink, aes: AesIge) -> Self {
        Self { link, aes, plain: Vec::new(), pos: 0 }
    }

    fn buffered(&self) -> usize {
        self.plain.len() - self.pos
    }

    async fn pull_block(&mut self) -> Result<(), SessionError> {
        let block: [u8; 16] = self
            .link
            .read(16)
            .await?
            .as_slice()
            .try_into()
            .expect("16 bytes");
        self.plain.extend_from_slice(&self.aes.decrypt_block(&block));
        Ok(())
    }

    async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SessionError> {
        while self.buffered() < N {
            self.pull_block().await?;
        }
        let out: [u8; N] = self.plain[self.pos..self.pos + N]
            .try_into()
            .expect("buffered span");
        self.pos += N;
        Ok(out)
    }

    /// Consume exactly `n` more plaintext bytes, decrypting the missing
    /// ciphertext in one bulk pool job.
    async fn read_remaining(mut self, n: usize, pool: &CpuPool) -> Result<Vec<u8>, SessionError> {
        let take = self.buffered().min(n);
        let mut out = Vec::with_capacity(n);
        out.extend_from_slice(&self.plain[self.pos..self.pos + take]);
        self.pos += take;
        if out.len() == n {
            return Ok(out);
        }

        let missing = n - out.len();
        let cipher = self.link.read(missing.div_ceil(16) * 16).await?;
        let mut aes = self.aes;
        let plain = pool
            .run(move || aes.decrypt(&cipher))
            .await
            .map_err(|e| SessionError::Malformed(e.to_string()))?;
        out.extend_from_slice(&plain[..missing]);
        Ok(out)
    }
}
