//! The reliability layer: RPC correlation, acknowledgement batching,
//! sequence-number recovery, and flood-wait backpressure.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use relay_mtproto::service::{self, ServiceMessage};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};

use crate::Config;
use crate::errors::{RpcError, SessionError};
use crate::mtp::Mtp;

/// How long a request may stay unanswered before it resolves to
/// [`RpcReply::Timeout`].
const RPC_TIMEOUT: Duration = Duration::from_secs(600);

/// Flush the ack buffer once it holds this many message IDs…
const ACK_FLUSH_COUNT: usize = 32;

/// …or once this much time has passed since the last flush.
const ACK_FLUSH_AGE: Duration = Duration::from_secs(10);

/// The outcome of one RPC invocation.
///
/// Per-request failures never raise; they resolve the slot. A reply may
/// itself be an `rpc_error` body — the caller's schema layer decides.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcReply {
    /// TL bytes of the result object.
    Reply(Vec<u8>),
    /// No response arrived within the deadline.
    Timeout,
    /// The connection went away before a response arrived.
    Dropped,
}

/// A request in flight: its serialized body (kept for resubmission) and
/// the shared completion slot every waiter observes.
struct Pending {
    body: Vec<u8>,
    slot: watch::Sender<Option<RpcReply>>,
}

impl Pending {
    fn new(body: Vec<u8>) -> Arc<Self> {
        let (slot, _) = watch::channel(None);
        Arc::new(Self { body, slot })
    }

    fn resolve(&self, reply: RpcReply) {
        self.slot.send_replace(Some(reply));
    }

    async fn wait(&self) -> RpcReply {
        let mut rx = self.slot.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or(RpcReply::Dropped),
            Err(_) => RpcReply::Dropped,
        }
    }
}

struct State {
    /// Shared high-water mark: fed by outbound allocation and, unless
    /// `separate_inbound_seqno` is set, by inbound sequence numbers too.
    last_seqno: i32,
    /// Inbound high-water when the counters are kept apart.
    inbound_high: i32,
    /// Set on the first successful `rpc_result`; cleared by
    /// `bad_server_salt`. Acks only flush while stable.
    stable_seqno: bool,
    /// Recovery stride for `bad_msg_notification` error 32.
    seqno_increment: i32,
    pending: HashMap<i64, Arc<Pending>>,
    acks: Vec<i64>,
    last_ack_flush: Instant,
    flood_until: Option<Instant>,
}

impl State {
    fn new() -> Self {
        Self {
            last_seqno: 0,
            inbound_high: 0,
            stable_seqno: false,
            seqno_increment: 1,
            pending: HashMap::new(),
            acks: Vec::new(),
            last_ack_flush: Instant::now(),
            flood_until: None,
        }
    }

    fn next_odd_seqno(&mut self) -> i32 {
        self.last_seqno = (self.last_seqno + 1) / 2 * 2 + 1;
        self.last_seqno
    }

    fn next_even_seqno(&mut self) -> i32 {
        self.last_seqno = (self.last_seqno / 2 + 1) * 2;
        self.last_seqno
    }

    fn observe_inbound_seqno(&mut self, seqno: i32, separate: bool) {
        if separate {
            self.inbound_high = self.inbound_high.max(seqno);
        } else {
            self.last_seqno = self.last_seqno.max(seqno);
        }
    }
}

struct SessionInner {
    mtp: Mtp,
    state: StdMutex<State>,
    push: mpsc::UnboundedSender<Vec<u8>>,
    separate_inbound_seqno: bool,
    read_task: AsyncMutex<Option<JoinHandle<()>>>,
}

/// A live session: cheap to clone, shared by the read loop and callers.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().expect("state mutex poisoned")
    }

    /// Create the session and spawn its read loop.
    ///
    /// No I/O happens yet: the TCP connection (and the key exchange, when
    /// no key was imported) is established on first use. Messages the
    /// session cannot correlate to a request arrive on the returned
    /// channel as raw TL bytes.
    pub fn connect(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<Vec<u8>>), SessionError> {
        let (push, push_rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(SessionInner {
                mtp: Mtp::new(&config)?,
                state: StdMutex::new(State::new()),
                push,
                separate_inbound_seqno: config.separate_inbound_seqno,
                read_task: AsyncMutex::new(None),
            }),
        };

        let task = tokio::spawn(session.clone().read_loop());
        *session
            .inner
            .read_task
            .try_lock()
            .expect("read task lock is uncontended at startup") = Some(task);
        Ok((session, push_rx))
    }

    /// Send one pre-serialized request and await its outcome.
    pub async fn invoke(&self, body: Vec<u8>) -> Result<RpcReply, SessionError> {
        self.rpc_call(Pending::new(body)).await
    }

    /// Export `(auth_key_base64, session_id)` for persistence, if a key
    /// exists yet.
    pub async fn export_session(&self) -> Option<(String, i64)> {
        self.inner.mtp.export_session().await
    }

    /// The current server salt.
    pub fn server_salt(&self) -> i64 {
        self.inner.mtp.server_salt()
    }

    /// Stop the read loop and fail whatever is still pending.
    pub async fn stop(&self) {
        if let Err(e) = self.flush_acks().await {
            log::debug!("final ack flush failed: {e}");
        }
        if let Some(task) = self.inner.read_task.lock().await.take() {
            task.abort();
        }
        self.drop_pending();
    }

    // ── Outbound path ────────────────────────────────────────────────────

    async fn rpc_call(&self, pending: Arc<Pending>) -> Result<RpcReply, SessionError> {
        self.flush_acks().await?;
        let seqno = self.state().next_odd_seqno();
        self.flood_sleep().await;

        let msg_id = self.inner.mtp.write_message(seqno, &pending.body).await?;
        self.state().pending.insert(msg_id, pending.clone());

        let reply = match timeout(RPC_TIMEOUT, pending.wait()).await {
            Ok(reply) => reply,
            Err(_) => {
                log::warn!("request {msg_id} timed out without a response");
                pending.resolve(RpcReply::Timeout);
                RpcReply::Timeout
            }
        };

        let mut state = self.state();
        state.seqno_increment = 1;
        state.pending.remove(&msg_id);
        Ok(reply)
    }

    /// Issue a single `msgs_ack` for everything buffered. A no-op while
    /// the buffer is empty or the seqno state is unstable.
    async fn flush_acks(&self) -> Result<(), SessionError> {
        let (msg_ids, seqno) = {
            let mut state = self.state();
            state.last_ack_flush = Instant::now();
            if state.acks.is_empty() || !state.stable_seqno {
                return Ok(());
            }
            let ids = std::mem::take(&mut state.acks);
            let seqno = state.next_even_seqno();
            (ids, seqno)
        };
        log::debug!("acknowledging {} messages", msg_ids.len());
        self.inner
            .mtp
            .write_message(seqno, &service::msgs_ack(&msg_ids))
            .await?;
        Ok(())
    }

    async fn flood_sleep(&self) {
        let deadline = self.state().flood_until;
        if let Some(deadline) = deadline {
            if deadline > Instant::now() {
                log::info!("flood wait in effect, holding the send");
                sleep_until(deadline).await;
            }
        }
    }

    fn set_flood_wait(&self, seconds: u64) {
        let mut state = self.state();
        let now = Instant::now();
        match state.flood_until {
            Some(deadline) if deadline > now => {}
            _ => {
                log::warn!("FLOOD_WAIT: pausing sends for {seconds} s");
                state.flood_until = Some(now + Duration::from_secs(seconds));
            }
        }
    }

    // ── Inbound path ─────────────────────────────────────────────────────

    async fn read_loop(self) {
        loop {
            let inbound = match self.inner.mtp.read_message().await {
                Ok(inbound) => inbound,
                Err(e) => {
                    log::error!("inbound loop stopped: {e}");
                    self.drop_pending();
                    return;
                }
            };
            log::trace!(
                "inbound msg_id={} seqno={} salt={} session={}",
                inbound.msg_id,
                inbound.seqno,
                inbound.salt,
                inbound.session_id,
            );

            if let Err(e) = self.process_message(inbound.msg_id, inbound.seqno, inbound.body) {
                log::error!("undecodable service message, tearing down: {e}");
                self.drop_pending();
                return;
            }

            let flush_due = {
                let state = self.state();
                state.acks.len() >= ACK_FLUSH_COUNT
                    || state.last_ack_flush.elapsed() > ACK_FLUSH_AGE
            };
            if flush_due {
                if let Err(e) = self.flush_acks().await {
                    log::warn!("ack flush failed: {e}");
                }
            }
        }
    }

    fn process_message(&self, msg_id: i64, seqno: i32, body: Vec<u8>) -> Result<(), SessionError> {
        self.state()
            .observe_inbound_seqno(seqno, self.inner.separate_inbound_seqno);

        match ServiceMessage::parse(&body)? {
            ServiceMessage::GzipPacked { packed_data } => {
                return self.process_message(msg_id, seqno, gz_inflate(&packed_data)?);
            }
            ServiceMessage::Container { messages } => {
                for entry in messages {
                    self.process_message(entry.msg_id, entry.seqno, entry.body)?;
                }
                return Ok(());
            }
            parsed => self.dispatch(parsed, &body)?,
        }

        if seqno % 2 == 1 {
            self.state().acks.push(msg_id);
        }
        Ok(())
    }

    fn dispatch(&self, message: ServiceMessage, raw: &[u8]) -> Result<(), SessionError> {
        match message {
            ServiceMessage::NewSessionCreated { server_salt, .. } => {
                // TODO: adopt the salt here instead of waiting for the
                // server's bad_server_salt correction.
                log::debug!("new session created (salt {server_salt})");
            }
            ServiceMessage::MsgsAck { msg_ids } => {
                log::debug!("server acknowledged {msg_ids:?}");
            }
            ServiceMessage::BadServerSalt { bad_msg_id, new_server_salt, .. } => {
                log::info!("updating salt: {new_server_salt}");
                self.state().stable_seqno = false;
                self.inner.mtp.set_server_salt(new_server_salt);
                self.resubmit(bad_msg_id);
            }
            ServiceMessage::BadMsgNotification { bad_msg_id, error_code, .. } => {
                let unstable = {
                    let state = self.state();
                    !state.stable_seqno
                };
                // Error 32: msg_seqno too low. Recoverable only while the
                // session has not yet proven its counter to the server.
                if error_code == 32 && unstable {
                    let mut state = self.state();
                    state.seqno_increment = state.seqno_increment.saturating_mul(2);
                    state.last_seqno = state.last_seqno.saturating_add(state.seqno_increment);
                    log::info!(
                        "advancing seqno by {} to {}",
                        state.seqno_increment,
                        state.last_seqno
                    );
                    drop(state);
                    self.resubmit(bad_msg_id);
                } else {
                    // Not recoverable here; let the caller see it.
                    log::warn!("bad_msg_notification {error_code} for {bad_msg_id}");
                    let _ = self.inner.push.send(raw.to_vec());
                }
            }
            ServiceMessage::RpcResult { req_msg_id, result } => {
                self.process_rpc_result(req_msg_id, result)?;
            }
            ServiceMessage::Opaque(bytes) => {
                // Out-of-band traffic (updates and the like) belongs to
                // the caller.
                let _ = self.inner.push.send(bytes);
            }
            ServiceMessage::Container { .. } | ServiceMessage::GzipPacked { .. } => {
                unreachable!("unwrapped before dispatch");
            }
        }
        Ok(())
    }

    fn process_rpc_result(&self, req_msg_id: i64, result: Vec<u8>) -> Result<(), SessionError> {
        if let Some(err) = RpcError::from_tl_bytes(&result) {
            if let Some(seconds) = err.flood_wait_seconds() {
                // The server's figure is doubled on purpose: resubmitting
                // at the exact boundary just earns another FLOOD_WAIT.
                self.set_flood_wait(2 * seconds);
                self.resubmit(req_msg_id);
                return Ok(());
            }
        }

        let result = if result.len() >= 4
            && result[..4] == service::ID_GZIP_PACKED.to_le_bytes()
        {
            let mut cursor = relay_tl::deserialize::Cursor::from_slice(&result[4..]);
            gz_inflate(&cursor.read_bytes()?)?
        } else {
            result
        };

        let pending = {
            let mut state = self.state();
            state.stable_seqno = true;
            state.pending.remove(&req_msg_id)
        };
        match pending {
            Some(pending) => pending.resolve(RpcReply::Reply(result)),
            None => log::info!("rpc_result for unknown req_msg_id {req_msg_id}"),
        }
        Ok(())
    }

    /// Re-send the request a recovery notification pointed at, under a
    /// fresh message ID and sequence number.
    fn resubmit(&self, msg_id: i64) {
        let pending = self.state()
            .pending
            .remove(&msg_id);
        match pending {
            Some(pending) => {
                let session = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.rpc_call(pending).await {
                        log::warn!("resubmission of {msg_id} failed: {e}");
                    }
                });
            }
            None => log::info!("referenced msg_id {msg_id} not found"),
        }
    }

    fn drop_pending(&self) {
        let pending: Vec<_> = {
            let mut state = self.state();
            state.pending.drain().map(|(_, p)| p).collect()
        };
        for p in &pending {
            p.resolve(RpcReply::Dropped);
        }
    }
}

fn gz_inflate(data: &[u8]) -> Result<Vec<u8>, SessionError> {
    let mut out = Vec::new();
    if flate2::read::GzDecoder::new(data).read_to_end(&mut out).is_ok() && !out.is_empty() {
        return Ok(out);
    }
    out.clear();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|_| SessionError::Malformed("gzip_packed inflate failed".into()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_seqno_allocation_follows_the_halving_rule() {
        let mut state = State::new();
        assert_eq!(state.next_odd_seqno(), 1);
        assert_eq!(state.next_odd_seqno(), 3);
        assert_eq!(state.next_odd_seqno(), 5);
    }

    #[test]
    fn even_seqno_allocation_interleaves_with_odd() {
        let mut state = State::new();
        let odd = state.next_odd_seqno();
        let even = state.next_even_seqno();
        assert_eq!(odd % 2, 1);
        assert_eq!(even % 2, 0);
        assert!(even > odd);
        assert_eq!(state.next_odd_seqno() % 2, 1);
    }

    #[test]
    fn inbound_high_water_pushes_the_shared_counter() {
        let mut state = State::new();
        state.observe_inbound_seqno(9, false);
        assert_eq!(state.next_odd_seqno(), 11);
    }

    #[test]
    fn separate_counters_keep_outbound_low() {
        let mut state = State::new();
        state.observe_inbound_seqno(9, true);
        assert_eq!(state.next_odd_seqno(), 1);
        assert_eq!(state.inbound_high, 9);
    }

    #[test]
    fn gz_inflate_roundtrip() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"compressed payload").unwrap();
        let packed = enc.finish().unwrap();
        assert_eq!(gz_inflate(&packed).unwrap(), b"compressed payload");
    }

    #[tokio::test]
    async fn pending_slot_resolves_every_waiter() {
        let pending = Pending::new(vec![1, 2, 3]);
        let a = pending.clone();
        let waiter = tokio::spawn(async move { a.wait().await });
        pending.resolve(RpcReply::Reply(vec![9]));
        assert_eq!(waiter.await.unwrap(), RpcReply::Reply(vec![9]));
        // Late subscribers see the settled value too.
        assert_eq!(pending.wait().await, RpcReply::Reply(vec![9]));
    }

    #[tokio::test(start_paused = true)]
    async fn flood_window_is_not_extended_while_active() {
        let (session, _rx) = Session::connect(Config {
            host: "127.0.0.1".into(),
            port: 1,
            rsa_key_pem: TEST_PEM.into(),
            auth_key: None,
            session_id: None,
            separate_inbound_seqno: false,
        })
        .unwrap();

        session.set_flood_wait(10);
        let first = session
            .inner
            .state
            .lock()
            .unwrap()
            .flood_until
            .unwrap();
        session.set_flood_wait(1000);
        let second = session.inner.state.lock().unwrap().flood_until.unwrap();
        assert_eq!(first, second);

        let start = Instant::now();
        session.flood_sleep().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
        session.stop().await;
    }

    const TEST_PEM: &str = "-----BEGIN RSA PUBLIC KEY-----
MIIBCgKCAQEA/z4YLgNVL+1OEauBs3wwu3OsT7LDvd2vZwcWiEHqZS2BfY5SLbJu
ppvlQa6DXv3lgzKscKUcHtG0ww4G6FVfDdJ3Kt/OALrvmEN3v/WImEzK7YpsNjqQ
j6DxLhL6UpQ84RwVzBrDK/O3VGSkrVocTLg6zUfXwcnXnElVVThVijM3dm/IZrPh
rs9wxXcchGyDUU1M257796QDPswxQOYJSt20OFdfpLp9G3YOzuq94GgXJ/ybLMCW
rkVomXElrk2uctp3DMfOFW/zjJzFcjXxQBGNqzZSiImSpikjUHr/wuT0+LgeYZgx
MtSRmHN90naCDc0vWisMImc2MB/7ZFgp+QIDAQAB
-----END RSA PUBLIC KEY-----
";
}
