//! Caller role - issues remote invocations.
//!
//! A [`Caller`] owns one logical broker connection and a registry of
//! in-flight invocations. [`Caller::invoke`] looks synchronous to the
//! library user: it registers a waiter, submits the request frame, and
//! suspends until the correlated result arrives or the per-call timeout
//! elapses. Responses are matched purely by correlation id, so
//! concurrent calls complete in whatever order the broker answers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::conn::{BoxFuture, Conn, ConnConfig, ConnDelegate, DispatchPolicy};
use crate::error::{Result, SodibusError};
use crate::protocol::{CallerSend, ClientMode, Frame, Handshake, Invocation, Message, Ready};
use crate::registry::InvocationRegistry;

/// Default per-invocation timeout.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`Caller`].
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// How long each `invoke` waits for its result.
    pub invoke_timeout: Duration,
    /// Underlying connection configuration.
    pub conn: ConnConfig,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            conn: ConnConfig::default(),
        }
    }
}

/// Builder for configuring and connecting a [`Caller`].
pub struct CallerBuilder {
    addr: String,
    config: CallerConfig,
}

impl CallerBuilder {
    fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            config: CallerConfig::default(),
        }
    }

    /// Set the per-invocation timeout. Default: 10 seconds.
    pub fn invoke_timeout(mut self, timeout: Duration) -> Self {
        self.config.invoke_timeout = timeout;
        self
    }

    /// Set the delay between reconnect attempts. Default: 3 seconds.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.conn.reconnect_delay = delay;
        self
    }

    /// Set the inbound dispatch policy. Default: concurrent.
    pub fn dispatch(mut self, policy: DispatchPolicy) -> Self {
        self.config.conn.dispatch = policy;
        self
    }

    /// Connect and start the caller.
    ///
    /// Must be called from within a Tokio runtime; the connection's run
    /// loop is spawned onto it.
    pub fn connect(self) -> Caller {
        Caller::with_config(self.addr, self.config)
    }
}

/// Shared caller state; implements the connection delegate.
struct CallerState {
    /// Monotonic correlation id source, scoped to this client.
    seq: AtomicU64,
    pending: InvocationRegistry,
}

impl ConnDelegate for CallerState {
    fn prepare_handshake(&self, _conn: &Conn) -> Handshake {
        Handshake {
            mode: ClientMode::Caller,
            provides: vec![],
        }
    }

    fn on_ready(&self, conn: &Conn, ready: Ready) {
        tracing::info!(
            addr = %conn.addr(),
            client_id = ready.client_id,
            node_id = ready.node_id,
            "caller ready"
        );
    }

    fn on_frame(&self, _conn: &Arc<Conn>, frame: Frame) -> BoxFuture<'static, ()> {
        // Resolution is a map lookup; do it here rather than in the
        // returned future.
        match Message::from_frame(&frame) {
            Ok(Message::CallerRecv(recv)) => {
                let id = recv.id;
                if !self.pending.resolve(recv) {
                    tracing::debug!(id, "dropping result with no pending invocation");
                }
            }
            Ok(other) => {
                tracing::debug!(kind = other.kind(), "ignoring unexpected message");
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unparseable frame");
            }
        }
        Box::pin(async {})
    }
}

/// A client that issues remote invocations through the broker.
///
/// Cheap to clone; clones share the connection and the invocation
/// registry.
///
/// # Example
///
/// ```ignore
/// let caller = Caller::connect("127.0.0.1:7788");
/// let result = caller
///     .invoke("calculator", "multiply", vec!["2".into(), "4".into()])
///     .await?;
/// assert_eq!(result, "8");
/// ```
#[derive(Clone)]
pub struct Caller {
    conn: Arc<Conn>,
    state: Arc<CallerState>,
    invoke_timeout: Duration,
}

impl Caller {
    /// Connect to a broker with default configuration.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(addr: impl Into<String>) -> Caller {
        Self::with_config(addr, CallerConfig::default())
    }

    /// Create a caller builder.
    pub fn builder(addr: impl Into<String>) -> CallerBuilder {
        CallerBuilder::new(addr)
    }

    /// Connect to a broker with explicit configuration.
    pub fn with_config(addr: impl Into<String>, config: CallerConfig) -> Caller {
        let state = Arc::new(CallerState {
            seq: AtomicU64::new(0),
            pending: InvocationRegistry::new(),
        });
        let conn = Conn::new(addr, state.clone() as Arc<dyn ConnDelegate>, config.conn);
        tokio::spawn(conn.clone().run());

        Caller {
            conn,
            state,
            invoke_timeout: config.invoke_timeout,
        }
    }

    /// Invoke `method_name` on the service `callee_name`.
    ///
    /// Suspends until the correlated result arrives or the configured
    /// timeout elapses. Concurrent invocations are independent; no
    /// ordering is imposed between their completions.
    ///
    /// # Errors
    ///
    /// - [`SodibusError::Closed`] - the client was closed; nothing sent
    /// - [`SodibusError::InvocationTimeout`] - no result in time
    pub async fn invoke(
        &self,
        callee_name: &str,
        method_name: &str,
        arguments: Vec<String>,
    ) -> Result<String> {
        if self.conn.is_closed() {
            return Err(SodibusError::Closed);
        }

        let id = self.state.seq.fetch_add(1, Ordering::Relaxed) + 1;

        // Register before sending so the sink exists before any
        // response can arrive.
        let mut result_rx = self.state.pending.register(id);

        let outcome = self
            .send_and_wait(id, callee_name, method_name, arguments, &mut result_rx)
            .await;

        // The entry is removed on every path; a result arriving after
        // this point is dropped by the registry.
        self.state.pending.remove(id);
        outcome
    }

    async fn send_and_wait(
        &self,
        id: u64,
        callee_name: &str,
        method_name: &str,
        arguments: Vec<String>,
        result_rx: &mut tokio::sync::mpsc::Receiver<crate::protocol::CallerRecv>,
    ) -> Result<String> {
        let frame = Message::CallerSend(CallerSend {
            id,
            invocation: Invocation {
                callee_name: callee_name.to_string(),
                method_name: method_name.to_string(),
                arguments,
                no_return: false,
            },
        })
        .to_frame()?;

        self.conn.send(frame).await?;

        match tokio::time::timeout(self.invoke_timeout, result_rx.recv()).await {
            Ok(Some(recv)) => Ok(recv.result),
            Ok(None) => Err(SodibusError::Closed),
            Err(_) => Err(SodibusError::InvocationTimeout),
        }
    }

    /// Number of invocations currently awaiting results.
    pub fn pending_invocations(&self) -> usize {
        self.state.pending.len()
    }

    /// Close the client. Pending invocations are not failed early; they
    /// time out on schedule.
    pub fn close(&self) {
        self.conn.close();
    }
}
