//! Binary primitives for the TL wire encoding used by MTProto.
//!
//! The schema compiler itself lives elsewhere; this crate only provides
//! what the protocol layers need to read and write TL objects by hand:
//!
//! * [`Cursor`] — a zero-copy reader over a byte slice
//! * [`Serializable`] / [`Deserializable`] — traits plus primitive impls
//! * the padded short-string codec and the unpadded long-string codec

#![deny(unsafe_code)]

pub mod deserialize;
pub mod serialize;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// Every boxed TL object carries a unique 32-bit constructor ID.
pub trait Identifiable {
    /// The constructor ID as specified in the TL schema.
    const CONSTRUCTOR_ID: u32;
}
