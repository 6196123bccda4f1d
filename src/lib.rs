//! # sodibus-client
//!
//! Rust client SDK for the SODIBus bus RPC protocol.
//!
//! Nodes connect to a central broker over TCP, identify themselves as
//! either a **caller** (issues remote invocations) or a **callee**
//! (serves named services), and exchange length-prefixed binary frames
//! carrying MsgPack-serialized messages.
//!
//! ## Architecture
//!
//! - **Frame layer** ([`protocol`]): sync marker + type tag + length +
//!   payload, with byte-level resynchronization on corruption
//! - **Connection layer** ([`conn`]): one auto-reconnecting logical
//!   connection per client, handshake on every physical attempt,
//!   concurrent send/receive loops
//! - **Roles** ([`Caller`], [`Callee`]): two delegate implementations
//!   over the same connection machinery
//!
//! ## Example
//!
//! ```ignore
//! use sodibus_client::{Callee, Caller};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let callee = Callee::builder("127.0.0.1:7788")
//!         .provide("calculator")
//!         .handler(|_service, method, args| match method {
//!             "multiply" => {
//!                 let x: i64 = args[0].parse().unwrap_or(0);
//!                 let y: i64 = args[1].parse().unwrap_or(0);
//!                 (x * y).to_string()
//!             }
//!             _ => "UNKNOWN".to_string(),
//!         })
//!         .connect();
//!
//!     let caller = Caller::connect("127.0.0.1:7788");
//!     let result = caller
//!         .invoke("calculator", "multiply", vec!["2".into(), "4".into()])
//!         .await?;
//!     assert_eq!(result, "8");
//!
//!     caller.close();
//!     callee.close();
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod conn;
pub mod error;
pub mod protocol;
pub mod registry;

mod callee;
mod caller;

pub use callee::{Callee, CalleeBuilder, CalleeHandler};
pub use caller::{Caller, CallerBuilder, CallerConfig, DEFAULT_INVOKE_TIMEOUT};
pub use conn::{
    Conn, ConnConfig, ConnDelegate, DispatchPolicy, DEFAULT_RECONNECT_DELAY,
    DEFAULT_SEND_QUEUE_CAPACITY,
};
pub use error::{Result, SodibusError};
pub use protocol::{Frame, Handshake, Invocation, Message, Ready};
