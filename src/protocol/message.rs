//! Typed protocol messages.
//!
//! Logical message shapes exchanged with the broker, their MsgPack
//! payload encoding, and the mapping between message kinds and frame
//! type tags. Everything outside this module treats payloads as opaque
//! bytes.

use serde::{Deserialize, Serialize};

use super::frame::Frame;
use super::wire::frame_type;
use crate::codec::MsgPackCodec;
use crate::error::{Result, SodibusError};

/// Role a client declares at handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMode {
    /// Issues remote invocations and awaits correlated results.
    Caller,
    /// Advertises service names and serves inbound invocations.
    Callee,
}

/// Client → broker session intent. Sent once per physical connection,
/// immediately after connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Declared role.
    pub mode: ClientMode,
    /// Provided service names (callee only; empty for callers).
    pub provides: Vec<String>,
}

/// Broker → client reply to [`Handshake`]. The connection is usable
/// only after this parses successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    /// Broker-assigned client identifier.
    pub client_id: u64,
    /// Identifier of the broker node that accepted the session.
    pub node_id: u64,
}

/// A named remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Target service name.
    pub callee_name: String,
    /// Method to invoke on the service.
    pub method_name: String,
    /// Ordered argument list.
    pub arguments: Vec<String>,
    /// When true, the caller does not expect a result.
    pub no_return: bool,
}

/// Caller → broker invocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerSend {
    /// Caller-local correlation id.
    pub id: u64,
    /// The call to route.
    pub invocation: Invocation,
}

/// Broker → caller invocation result, correlated by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerRecv {
    /// Correlation id from the matching [`CallerSend`].
    pub id: u64,
    /// Result string produced by the serving callee.
    pub result: String,
}

/// Broker → callee invocation to serve, correlated by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalleeRecv {
    /// Broker-scoped correlation id; echoed back in [`CalleeSend`].
    pub id: u64,
    /// The call to execute.
    pub invocation: Invocation,
}

/// Callee → broker result for a served invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalleeSend {
    /// Correlation id from the matching [`CalleeRecv`].
    pub id: u64,
    /// Handler result.
    pub result: String,
}

/// Any protocol message, tagged with its frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Handshake(Handshake),
    Ready(Ready),
    CallerSend(CallerSend),
    CallerRecv(CallerRecv),
    CalleeSend(CalleeSend),
    CalleeRecv(CalleeRecv),
}

impl Message {
    /// Frame type tag for this message kind.
    pub fn frame_type(&self) -> u8 {
        match self {
            Message::Handshake(_) => frame_type::HANDSHAKE,
            Message::Ready(_) => frame_type::READY,
            Message::CallerSend(_) => frame_type::CALLER_SEND,
            Message::CallerRecv(_) => frame_type::CALLER_RECV,
            Message::CalleeSend(_) => frame_type::CALLEE_SEND,
            Message::CalleeRecv(_) => frame_type::CALLEE_RECV,
        }
    }

    /// Message kind name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake(_) => "Handshake",
            Message::Ready(_) => "Ready",
            Message::CallerSend(_) => "CallerSend",
            Message::CallerRecv(_) => "CallerRecv",
            Message::CalleeSend(_) => "CalleeSend",
            Message::CalleeRecv(_) => "CalleeRecv",
        }
    }

    /// Serialize into a frame.
    pub fn to_frame(&self) -> Result<Frame> {
        let payload = match self {
            Message::Handshake(m) => MsgPackCodec::encode(m)?,
            Message::Ready(m) => MsgPackCodec::encode(m)?,
            Message::CallerSend(m) => MsgPackCodec::encode(m)?,
            Message::CallerRecv(m) => MsgPackCodec::encode(m)?,
            Message::CalleeSend(m) => MsgPackCodec::encode(m)?,
            Message::CalleeRecv(m) => MsgPackCodec::encode(m)?,
        };
        Ok(Frame::new(self.frame_type(), payload.into()))
    }

    /// Parse a frame into a typed message.
    ///
    /// # Errors
    ///
    /// [`SodibusError::Protocol`] for an unknown type tag, or a decode
    /// error if the payload does not match the tagged shape.
    pub fn from_frame(frame: &Frame) -> Result<Message> {
        match frame.frame_type {
            frame_type::HANDSHAKE => Ok(Message::Handshake(MsgPackCodec::decode(&frame.payload)?)),
            frame_type::READY => Ok(Message::Ready(MsgPackCodec::decode(&frame.payload)?)),
            frame_type::CALLER_SEND => {
                Ok(Message::CallerSend(MsgPackCodec::decode(&frame.payload)?))
            }
            frame_type::CALLER_RECV => {
                Ok(Message::CallerRecv(MsgPackCodec::decode(&frame.payload)?))
            }
            frame_type::CALLEE_SEND => {
                Ok(Message::CalleeSend(MsgPackCodec::decode(&frame.payload)?))
            }
            frame_type::CALLEE_RECV => {
                Ok(Message::CalleeRecv(MsgPackCodec::decode(&frame.payload)?))
            }
            other => Err(SodibusError::Protocol(format!(
                "unknown frame type 0x{:02X}",
                other
            ))),
        }
    }
}
