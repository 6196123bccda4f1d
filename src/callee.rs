//! Callee role - serves named services.
//!
//! A [`Callee`] advertises its service names at handshake and runs a
//! single user-supplied handler for every inbound invocation. The
//! handler returns a plain string; failures must be encoded into the
//! result by the application's own convention.

use std::sync::{Arc, RwLock};

use crate::conn::{BoxFuture, Conn, ConnConfig, ConnDelegate, DispatchPolicy};
use crate::protocol::{CalleeSend, ClientMode, Frame, Handshake, Message, Ready};

/// Handler invoked for each inbound invocation:
/// `(service_name, method_name, arguments) -> result`.
pub type CalleeHandler = Arc<dyn Fn(&str, &str, &[String]) -> String + Send + Sync>;

/// Builder for configuring and connecting a [`Callee`].
pub struct CalleeBuilder {
    addr: String,
    provides: Vec<String>,
    handler: Option<CalleeHandler>,
    config: ConnConfig,
}

impl CalleeBuilder {
    fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            provides: Vec::new(),
            handler: None,
            config: ConnConfig::default(),
        }
    }

    /// Add a provided service name.
    pub fn provide(mut self, name: impl Into<String>) -> Self {
        self.provides.push(name.into());
        self
    }

    /// Set the invocation handler.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str, &[String]) -> String + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set the delay between reconnect attempts. Default: 3 seconds.
    pub fn reconnect_delay(mut self, delay: std::time::Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set the inbound dispatch policy. Default: concurrent.
    pub fn dispatch(mut self, policy: DispatchPolicy) -> Self {
        self.config.dispatch = policy;
        self
    }

    /// Connect and start the callee.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(self) -> Callee {
        Callee::start(self.addr, self.provides, self.handler, self.config)
    }
}

struct CalleeState {
    provides: Vec<String>,
    handler: RwLock<Option<CalleeHandler>>,
}

impl ConnDelegate for CalleeState {
    fn prepare_handshake(&self, _conn: &Conn) -> Handshake {
        Handshake {
            mode: ClientMode::Callee,
            provides: self.provides.clone(),
        }
    }

    fn on_ready(&self, conn: &Conn, ready: Ready) {
        tracing::info!(
            addr = %conn.addr(),
            client_id = ready.client_id,
            node_id = ready.node_id,
            provides = ?self.provides,
            "callee ready"
        );
    }

    fn on_frame(&self, conn: &Arc<Conn>, frame: Frame) -> BoxFuture<'static, ()> {
        let recv = match Message::from_frame(&frame) {
            Ok(Message::CalleeRecv(recv)) => recv,
            Ok(other) => {
                tracing::debug!(kind = other.kind(), "ignoring unexpected message");
                return Box::pin(async {});
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unparseable frame");
                return Box::pin(async {});
            }
        };

        let handler = match self.handler.read().unwrap().clone() {
            Some(h) => h,
            None => {
                // With no handler there is nothing to reply; the caller
                // observes a timeout.
                tracing::debug!(id = recv.id, "no handler configured, dropping invocation");
                return Box::pin(async {});
            }
        };

        // The handler may be slow; run it inside the dispatched future.
        let conn = Arc::clone(conn);
        Box::pin(async move {
            let invocation = &recv.invocation;
            let result = handler(
                &invocation.callee_name,
                &invocation.method_name,
                &invocation.arguments,
            );

            let reply = Message::CalleeSend(CalleeSend {
                id: recv.id,
                result,
            });
            match reply.to_frame() {
                Ok(f) => {
                    if let Err(e) = conn.send(f).await {
                        tracing::warn!(id = recv.id, error = %e, "failed to submit reply");
                    }
                }
                Err(e) => {
                    tracing::warn!(id = recv.id, error = %e, "failed to encode reply");
                }
            }
        })
    }
}

/// A client that serves invocations for its advertised service names.
///
/// Cheap to clone; clones share the connection and handler.
///
/// # Example
///
/// ```ignore
/// let callee = Callee::builder("127.0.0.1:7788")
///     .provide("calculator")
///     .handler(|_service, method, args| match method {
///         "multiply" => {
///             let x: i64 = args[0].parse().unwrap_or(0);
///             let y: i64 = args[1].parse().unwrap_or(0);
///             (x * y).to_string()
///         }
///         _ => "UNKNOWN".to_string(),
///     })
///     .connect();
/// ```
#[derive(Clone)]
pub struct Callee {
    conn: Arc<Conn>,
    state: Arc<CalleeState>,
}

impl Callee {
    /// Connect to a broker, providing the given service names.
    ///
    /// Must be called from within a Tokio runtime. Invocations that
    /// arrive before a handler is set are dropped.
    pub fn connect(addr: impl Into<String>, provides: Vec<String>) -> Callee {
        Self::with_config(addr, provides, ConnConfig::default())
    }

    /// Create a callee builder.
    pub fn builder(addr: impl Into<String>) -> CalleeBuilder {
        CalleeBuilder::new(addr)
    }

    /// Connect with explicit connection configuration.
    pub fn with_config(
        addr: impl Into<String>,
        provides: Vec<String>,
        config: ConnConfig,
    ) -> Callee {
        Self::start(addr, provides, None, config)
    }

    fn start(
        addr: impl Into<String>,
        provides: Vec<String>,
        handler: Option<CalleeHandler>,
        config: ConnConfig,
    ) -> Callee {
        let state = Arc::new(CalleeState {
            provides,
            handler: RwLock::new(handler),
        });
        let conn = Conn::new(addr, state.clone() as Arc<dyn ConnDelegate>, config);
        tokio::spawn(conn.clone().run());

        Callee { conn, state }
    }

    /// Install or replace the invocation handler.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str, &[String]) -> String + Send + Sync + 'static,
    {
        *self.state.handler.write().unwrap() = Some(Arc::new(handler));
    }

    /// Service names this callee advertises.
    pub fn provides(&self) -> &[String] {
        &self.state.provides
    }

    /// Close the client.
    pub fn close(&self) {
        self.conn.close();
    }
}
