//! Message identifiers and the plaintext message envelope.

use std::time::{SystemTime, UNIX_EPOCH};

/// Allocates the 64-bit message identifiers of one session.
///
/// An identifier encodes the send time in units of 2⁻³⁰ seconds, OR-ed
/// with 12 random bits, shifted left so the two low bits are zero
/// (reserved for client messages). Identifiers are strictly increasing:
/// when the clock stalls or runs backwards the allocator falls back to
/// `last + 4`.
pub struct MsgIdGen {
    last: i64,
}

impl MsgIdGen {
    /// Start a fresh allocator.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Mint the next message identifier from the system clock.
    pub fn next(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let ticks = (now.as_secs() << 30) | (u64::from(now.subsec_nanos()) << 30) / 1_000_000_000;

        let mut random = [0u8; 2];
        getrandom::getrandom(&mut random).expect("getrandom failed");
        let random12 = u16::from_le_bytes(random) & 0x0fff;

        self.next_at(ticks, random12)
    }

    fn next_at(&mut self, ticks: u64, random12: u16) -> i64 {
        let mut id = ((ticks | u64::from(random12)) << 2) as i64;
        if id <= self.last {
            id = self.last + 4;
        }
        self.last = id;
        id
    }
}

impl Default for MsgIdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a handshake body in the unencrypted envelope:
///
/// ```text
/// auth_key_id:long  (= 0)
/// message_id:long   (= 0)
/// body_length:int
/// body:bytes
/// ```
pub fn plaintext_message(body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 8 + 4 + body.len());
    buf.extend(0u64.to_le_bytes());
    buf.extend(0u64.to_le_bytes());
    buf.extend((body.len() as u32).to_le_bytes());
    buf.extend_from_slice(body);
    buf
}
