//! Codec module - serialization/deserialization for frame payloads.
//!
//! All protocol messages travel as MessagePack inside the frame envelope.
//! [`MsgPackCodec`] is implemented as a marker struct with static methods
//! rather than a trait object, allowing compile-time codec selection.
//!
//! # Example
//!
//! ```
//! use sodibus_client::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
