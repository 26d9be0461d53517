//! # relay-client
//!
//! Async MTProto v1 session over abridged TCP.
//!
//! The session owns everything between raw TL bodies and the socket:
//! - lazy connect and reconnect, `0xef`-initialized abridged framing
//! - DH key exchange on first use (or an imported persisted key)
//! - AES-IGE sealing/unsealing with per-direction key derivation
//! - RPC correlation with a 600 s deadline per request
//! - acknowledgement batching, salt adoption, seqno recovery, flood wait
//!
//! Serialization of API objects stays outside: callers pass in
//! pre-serialized TL bytes and get raw TL bytes back, both for RPC
//! replies and for the out-of-band push channel.
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), relay_client::SessionError> {
//! use relay_client::{Config, Session};
//!
//! let (session, _pushes) = Session::connect(Config {
//!     host: "203.0.113.10".into(),
//!     port: 443,
//!     rsa_key_pem: std::fs::read_to_string("server.pub.pem").unwrap(),
//!     auth_key: None,
//!     session_id: None,
//!     separate_inbound_seqno: false,
//! })?;
//!
//! let reply = session.invoke(my_serialized_request()).await?;
//! # fn my_serialized_request() -> Vec<u8> { Vec::new() }
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

mod errors;
mod mtp;
mod pool;
mod session;
mod transport;

pub use errors::{RpcError, SessionError};
pub use session::{RpcReply, Session};

/// Configuration for [`Session::connect`].
///
/// The target endpoint and trust anchor are fixed for the life of the
/// session; there is deliberately no way to change them afterwards.
#[derive(Clone)]
pub struct Config {
    /// Server host name or address.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// The server's RSA public key, PEM-encoded.
    pub rsa_key_pem: String,
    /// A persisted authorization key (base64 of the 256-byte secret).
    /// When absent, a fresh key is negotiated on first use.
    pub auth_key: Option<String>,
    /// The session identifier matching `auth_key`; a random one is
    /// chosen when absent.
    pub session_id: Option<i64>,
    /// Keep the inbound sequence-number high-water out of the outbound
    /// counter instead of sharing one mark between both directions.
    pub separate_inbound_seqno: bool,
}
