//! The closed set of service constructors the session layer interprets.
//!
//! Everything the server can push at the transport level is either one of
//! these or an API-level object the session forwards untouched (the
//! [`ServiceMessage::Opaque`] case).

use relay_tl::deserialize::{Cursor, Error, Result};
use relay_tl::{Deserializable, Serializable};

/// `rpc_result#f35c6d01 req_msg_id:long result:Object`
pub const ID_RPC_RESULT: u32 = 0xf35c6d01;
/// `rpc_error#2144ca19 error_code:int error_message:string`
pub const ID_RPC_ERROR: u32 = 0x2144ca19;
/// `msg_container#73f1f8dc messages:vector<%Message>`
pub const ID_MSG_CONTAINER: u32 = 0x73f1f8dc;
/// `gzip_packed#3072cfa1 packed_data:bytes`
pub const ID_GZIP_PACKED: u32 = 0x3072cfa1;
/// `msgs_ack#62d6b459 msg_ids:Vector<long>`
pub const ID_MSGS_ACK: u32 = 0x62d6b459;
/// `bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int error_code:int new_server_salt:long`
pub const ID_BAD_SERVER_SALT: u32 = 0xedab447b;
/// `bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int error_code:int`
pub const ID_BAD_MSG_NOTIFICATION: u32 = 0xa7eff811;
/// `new_session_created#9ec20908 first_msg_id:long unique_id:long server_salt:long`
pub const ID_NEW_SESSION_CREATED: u32 = 0x9ec20908;

/// One entry of a `msg_container`: a full inner message with its own
/// identifier and sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerEntry {
    /// Identifier of the inner message.
    pub msg_id: i64,
    /// Sequence number of the inner message.
    pub seqno: i32,
    /// TL-serialized inner body.
    pub body: Vec<u8>,
}

/// A decoded service-level message.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum ServiceMessage {
    NewSessionCreated {
        first_msg_id: i64,
        unique_id: i64,
        server_salt: i64,
    },
    MsgsAck {
        msg_ids: Vec<i64>,
    },
    BadServerSalt {
        bad_msg_id: i64,
        bad_msg_seqno: i32,
        error_code: i32,
        new_server_salt: i64,
    },
    BadMsgNotification {
        bad_msg_id: i64,
        bad_msg_seqno: i32,
        error_code: i32,
    },
    RpcResult {
        req_msg_id: i64,
        /// TL bytes of the result object (possibly `rpc_error` or
        /// `gzip_packed`; the session inspects them).
        result: Vec<u8>,
    },
    Container {
        messages: Vec<ContainerEntry>,
    },
    GzipPacked {
        packed_data: Vec<u8>,
    },
    /// Any constructor outside the service set, passed through verbatim.
    Opaque(Vec<u8>),
}

impl ServiceMessage {
    /// Decode a message body into its service-level shape.
    ///
    /// Unknown constructors are not an error; they come back as
    /// [`ServiceMessage::Opaque`].
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(Error::UnexpectedEof);
        }
        let mut buf = Cursor::from_slice(body);
        let id = u32::deserialize(&mut buf)?;

        Ok(match id {
            ID_NEW_SESSION_CREATED => Self::NewSessionCreated {
                first_msg_id: i64::deserialize(&mut buf)?,
                unique_id: i64::deserialize(&mut buf)?,
                server_salt: i64::deserialize(&mut buf)?,
            },
            ID_MSGS_ACK => Self::MsgsAck {
                msg_ids: Vec::<i64>::deserialize(&mut buf)?,
            },
            ID_BAD_SERVER_SALT => Self::BadServerSalt {
                bad_msg_id: i64::deserialize(&mut buf)?,
                bad_msg_seqno: i32::deserialize(&mut buf)?,
                error_code: i32::deserialize(&mut buf)?,
                new_server_salt: i64::deserialize(&mut buf)?,
            },
            ID_BAD_MSG_NOTIFICATION => Self::BadMsgNotification {
                bad_msg_id: i64::deserialize(&mut buf)?,
                bad_msg_seqno: i32::deserialize(&mut buf)?,
                error_code: i32::deserialize(&mut buf)?,
            },
            ID_RPC_RESULT => {
                let req_msg_id = i64::deserialize(&mut buf)?;
                let mut result = Vec::with_capacity(buf.remaining());
                buf.read_to_end(&mut result);
                Self::RpcResult { req_msg_id, result }
            }
            ID_MSG_CONTAINER => {
                let count = u32::deserialize(&mut buf)? as usize;
                let mut messages = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let msg_id = i64::deserialize(&mut buf)?;
                    let seqno = i32::deserialize(&mut buf)?;
                    let len = u32::deserialize(&mut buf)? as usize;
                    let body = buf.read_raw(len)?.to_vec();
                    messages.push(ContainerEntry { msg_id, seqno, body });
                }
                Self::Container { messages }
            }
            ID_GZIP_PACKED => Self::GzipPacked {
                packed_data: buf.read_bytes()?,
            },
            _ => Self::Opaque(body.to_vec()),
        })
    }
}

/// Serialize an outbound `msgs_ack` body.
pub fn msgs_ack(msg_ids: &[i64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + 8 * msg_ids.len());
    ID_MSGS_ACK.serialize(&mut buf);
    msg_ids.to_vec().serialize(&mut buf);
    buf
}
