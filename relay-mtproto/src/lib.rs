//! MTProto protocol state, transport-agnostic.
//!
//! This crate handles:
//! * Message identifiers and the plaintext handshake envelope
//! * Sans-IO authorization key generation (the four-round DH exchange)
//! * The service constructors the session layer dispatches on
//!
//! It is intentionally I/O-free: the async client drives it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod handshake;
pub mod message;
pub mod service;

pub use handshake::Finished;
pub use message::MsgIdGen;
pub use service::ServiceMessage;
