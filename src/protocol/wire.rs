//! Wire format constants.
//!
//! Frame envelope layout:
//! ```text
//! ┌────────┬──────────┬───────────┬───────────┐
//! │ Sync   │ Type tag │ Length    │ Payload   │
//! │ 1 byte │ 1 byte   │ 4 bytes   │ N bytes   │
//! │ 0xAA   │ uint8    │ uint32 BE │ MsgPack   │
//! └────────┴──────────┴───────────┴───────────┘
//! ```

/// Synchronization marker opening every frame.
pub const SYNC_MARKER: u8 = 0xAA;

/// Envelope size in bytes (marker + type tag + length).
pub const HEADER_SIZE: usize = 6;

/// Default maximum payload size (16 MiB).
///
/// A declared length above this bound is treated as stream corruption
/// and fails the connection attempt rather than being allocated.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Frame type tags, one per protocol message kind.
pub mod frame_type {
    /// Client → broker: session intent (mode, provided services).
    pub const HANDSHAKE: u8 = 0x01;
    /// Broker → client: session established, identifiers assigned.
    pub const READY: u8 = 0x02;
    /// Caller → broker: outbound invocation request.
    pub const CALLER_SEND: u8 = 0x03;
    /// Broker → caller: correlated invocation result.
    pub const CALLER_RECV: u8 = 0x04;
    /// Callee → broker: result for a served invocation.
    pub const CALLEE_SEND: u8 = 0x05;
    /// Broker → callee: inbound invocation to serve.
    pub const CALLEE_RECV: u8 = 0x06;
}
