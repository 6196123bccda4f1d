//! Wire protocol - framing envelope and typed messages.
//!
//! Every transmission on a SODIBus connection is a [`Frame`]: a sync
//! marker, a one-byte type tag, a big-endian length, and an opaque
//! MsgPack payload. The typed message layer ([`Message`] and friends)
//! is the only code that looks inside payloads.

mod frame;
mod message;
pub mod wire;

pub use frame::Frame;
pub use message::{
    CallerRecv, CallerSend, CalleeRecv, CalleeSend, ClientMode, Handshake, Invocation, Message,
    Ready,
};
pub use wire::{frame_type, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, SYNC_MARKER};
