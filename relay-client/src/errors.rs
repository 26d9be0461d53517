//! Error types for the session layer.

use std::{fmt, io};

use relay_crypto::rsa::KeyError;
use relay_mtproto::handshake;
use relay_mtproto::service::ID_RPC_ERROR;
use relay_tl::Deserializable;
use relay_tl::deserialize::Cursor;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error object returned by the server inside `rpc_result`.
///
/// The numeric suffix is stripped from the name and kept separately, so
/// `FLOOD_WAIT_30` becomes `{ name: "FLOOD_WAIT", value: Some(30) }`.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name with any numeric suffix removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Decode a TL `rpc_error` body, if that is what `body` contains.
    pub fn from_tl_bytes(body: &[u8]) -> Option<Self> {
        let mut buf = Cursor::from_slice(body);
        if u32::deserialize(&mut buf).ok()? != ID_RPC_ERROR {
            return None;
        }
        let code = i32::deserialize(&mut buf).ok()?;
        let message = String::from_utf8(buf.read_bytes().ok()?).ok()?;
        Some(Self::parse(code, &message))
    }

    /// Split a raw error message like `"FLOOD_WAIT_30"` into name and value.
    pub fn parse(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(value) = suffix.parse::<u32>() {
                    return Self {
                        code,
                        name: message[..idx].to_string(),
                        value: Some(value),
                    };
                }
            }
        }
        Self {
            code,
            name: message.to_string(),
            value: None,
        }
    }

    /// How many seconds the server asked us to pause, if this is a
    /// `FLOOD_WAIT_N` error.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        if self.name == "FLOOD_WAIT" {
            self.value.map(u64::from)
        } else {
            None
        }
    }
}

// ─── SessionError ─────────────────────────────────────────────────────────────

/// The error type surfaced by [`crate::Session`] operations.
#[derive(Debug)]
pub enum SessionError {
    /// Network / I/O failure. The connection is gone but the keys are
    /// kept; the next operation reconnects.
    Io(io::Error),
    /// Wire bytes violated framing or schema assumptions. Fatal to the
    /// current connection.
    Malformed(String),
    /// An inbound frame carried an `auth_key_id` that is not ours.
    UnknownAuthKey {
        /// The identifier the server sent.
        got: [u8; 8],
    },
    /// The key exchange failed.
    Handshake(handshake::Error),
    /// The configured RSA public key could not be parsed.
    InvalidKey(KeyError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Malformed(s) => write!(f, "malformed data: {s}"),
            Self::UnknownAuthKey { got } => {
                write!(f, "message for unknown auth_key_id {got:02x?}")
            }
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::InvalidKey(e) => write!(f, "bad RSA key: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<handshake::Error> for SessionError {
    fn from(e: handshake::Error) -> Self {
        Self::Handshake(e)
    }
}

impl From<KeyError> for SessionError {
    fn from(e: KeyError) -> Self {
        Self::InvalidKey(e)
    }
}

impl From<relay_tl::deserialize::Error> for SessionError {
    fn from(e: relay_tl::deserialize::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
