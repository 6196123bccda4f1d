//! Resumable broker connection.
//!
//! [`Conn`] presents one long-lived logical connection over any number
//! of physical socket lifetimes. Each physical attempt walks the same
//! state machine:
//!
//! ```text
//! Connecting → Handshaking → Ready → Exchanging → (Closed | Disconnected)
//! ```
//!
//! While exchanging, a send loop drains the bounded outbound queue and
//! a receive loop decodes inbound frames, dispatching each one to the
//! connection's [`ConnDelegate`]. When the socket fails, the outer run
//! loop waits a fixed delay and starts over with a fresh handshake;
//! only an explicit [`Conn::close`] ends the cycle.
//!
//! Role types ([`Caller`](crate::Caller), [`Callee`](crate::Callee))
//! implement the delegate; `Conn` itself never interprets payloads.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Result, SodibusError};
use crate::protocol::{Frame, Handshake, Message, Ready, DEFAULT_MAX_PAYLOAD_SIZE};

/// Delay between the end of one physical connection and the next
/// attempt. Fixed; there is no backoff growth and no retry cap.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Capacity of the outbound frame queue. Producers block when full.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 16;

/// Boxed future for delegate frame handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How inbound frames are handed to the delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Spawn one task per inbound frame. A slow handler never stalls
    /// frame decoding; handler completions carry no ordering guarantee.
    #[default]
    Concurrent,
    /// Await each handler inline in the receive loop. Frames are
    /// handled strictly in receive order; a slow handler delays every
    /// frame behind it.
    Ordered,
}

/// Configuration for a [`Conn`].
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Fixed delay before reconnecting after a lost connection.
    pub reconnect_delay: Duration,
    /// Outbound queue capacity; senders block once it fills.
    pub send_queue_capacity: usize,
    /// Largest payload length accepted from the wire.
    pub max_payload_size: u32,
    /// Inbound frame dispatch policy.
    pub dispatch: DispatchPolicy,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            dispatch: DispatchPolicy::default(),
        }
    }
}

/// Capability set a connection role must provide.
///
/// One shared [`Conn`] drives either role; the delegate decides what
/// the handshake declares and what inbound frames mean.
pub trait ConnDelegate: Send + Sync + 'static {
    /// Produce the handshake sent at the start of every physical
    /// connection.
    fn prepare_handshake(&self, conn: &Conn) -> Handshake;

    /// Notification that the broker accepted the handshake.
    fn on_ready(&self, conn: &Conn, ready: Ready);

    /// Handle one inbound frame. The returned future runs under the
    /// connection's [`DispatchPolicy`]; do slow work inside the future,
    /// not before returning it.
    fn on_frame(&self, conn: &Arc<Conn>, frame: Frame) -> BoxFuture<'static, ()>;
}

/// A logical, auto-reconnecting connection to a broker.
///
/// Create with [`Conn::new`], then spawn [`Conn::run`] exactly once; it
/// occupies its task for the lifetime of the client. Frames submitted
/// via [`Conn::send`] while disconnected wait in the queue and go out
/// once a new physical connection reaches the exchanging phase.
pub struct Conn {
    addr: String,
    delegate: Arc<dyn ConnDelegate>,
    config: ConnConfig,
    send_tx: mpsc::Sender<Frame>,
    /// Queue receiver, taken by the first (only) `run` call.
    send_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    /// Terminal close flag; `true` is sticky.
    closed: watch::Sender<bool>,
}

impl Conn {
    /// Create a new connection to `addr` driven by `delegate`.
    pub fn new(
        addr: impl Into<String>,
        delegate: Arc<dyn ConnDelegate>,
        config: ConnConfig,
    ) -> Arc<Self> {
        let (send_tx, send_rx) = mpsc::channel(config.send_queue_capacity);
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            addr: addr.into(),
            delegate,
            config,
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            closed,
        })
    }

    /// Remote broker address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether [`close`](Self::close) has been requested.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Enqueue a frame for transmission.
    ///
    /// Blocks while the outbound queue is full (backpressure). The
    /// frame is accepted in any connection phase and waits out
    /// disconnections in the queue.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(SodibusError::Closed);
        }
        self.send_tx
            .send(frame)
            .await
            .map_err(|_| SodibusError::Closed)
    }

    /// Request termination of the logical connection.
    ///
    /// Wakes every loop blocked on the current socket; the run loop
    /// exits after the current attempt unwinds. No further reconnect
    /// attempts occur. Idempotent.
    pub fn close(&self) {
        tracing::debug!(addr = %self.addr, "closing connection");
        self.closed.send_replace(true);
    }

    /// Main loop for this logical connection.
    ///
    /// Must be invoked exactly once, typically via `tokio::spawn`.
    /// Runs physical connection attempts back to back, sleeping the
    /// configured reconnect delay between them, until closed.
    pub async fn run(self: Arc<Self>) {
        let mut send_rx = match self.send_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                tracing::error!(addr = %self.addr, "run() invoked more than once");
                return;
            }
        };
        let mut closed_rx = self.closed.subscribe();
        let mut carry: Option<Frame> = None;

        loop {
            let (rx, carried, result) = self
                .run_single(send_rx, carry.take(), &mut closed_rx)
                .await;
            send_rx = rx;
            carry = carried;

            match result {
                Ok(()) => tracing::debug!(addr = %self.addr, "connection attempt ended"),
                Err(e) => tracing::warn!(addr = %self.addr, error = %e, "disconnected"),
            }

            if self.is_closed() {
                break;
            }

            tracing::debug!(
                addr = %self.addr,
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "reconnecting after delay"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = closed_rx.wait_for(|closed| *closed) => break,
            }
        }

        tracing::debug!(addr = %self.addr, "connection closed");
    }

    /// Run one physical connection attempt to completion.
    ///
    /// Returns the queue receiver (and any frame that failed to write)
    /// so the next attempt can pick up where this one stopped.
    async fn run_single(
        self: &Arc<Self>,
        rx: mpsc::Receiver<Frame>,
        carry: Option<Frame>,
        closed_rx: &mut watch::Receiver<bool>,
    ) -> (mpsc::Receiver<Frame>, Option<Frame>, Result<()>) {
        // Connecting + Handshaking + Ready; abortable by close.
        let halves = tokio::select! {
            res = self.connect_and_handshake() => res,
            _ = closed_rx.wait_for(|closed| *closed) => return (rx, carry, Ok(())),
        };
        let (reader, writer) = match halves {
            Ok(h) => h,
            Err(e) => return (rx, carry, Err(e)),
        };

        // Exchanging: both loops run until the socket fails or close is
        // requested. The receive loop signals `stop` on the way out;
        // the send loop signals `fail` when a write errors.
        let (stop_tx, stop_rx) = oneshot::channel();
        let (fail_tx, fail_rx) = oneshot::channel();

        let send_fut = send_loop(writer, rx, carry, stop_rx, fail_tx);
        let recv_fut = async {
            let result = self.recv_loop(reader, closed_rx, fail_rx).await;
            let _ = stop_tx.send(());
            result
        };

        let ((rx, carry), result) = tokio::join!(send_fut, recv_fut);
        (rx, carry, result)
    }

    async fn connect_and_handshake(self: &Arc<Self>) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        tracing::debug!(addr = %self.addr, "connecting");
        let stream = TcpStream::connect(&self.addr).await?;
        let (mut reader, mut writer) = stream.into_split();

        let handshake = self.delegate.prepare_handshake(self);
        Message::Handshake(handshake)
            .to_frame()?
            .write(&mut writer)
            .await?;

        let frame = match Frame::read(&mut reader, self.config.max_payload_size).await {
            Ok(f) => f,
            Err(e @ SodibusError::Io(_)) => return Err(e),
            Err(e) => {
                return Err(SodibusError::Handshake(format!(
                    "reading ready frame: {e}"
                )))
            }
        };
        let ready = match Message::from_frame(&frame) {
            Ok(Message::Ready(r)) => r,
            Ok(other) => {
                return Err(SodibusError::Handshake(format!(
                    "expected Ready, got {}",
                    other.kind()
                )))
            }
            Err(e) => {
                return Err(SodibusError::Handshake(format!(
                    "parsing ready frame: {e}"
                )))
            }
        };

        tracing::debug!(
            addr = %self.addr,
            client_id = ready.client_id,
            node_id = ready.node_id,
            "session ready"
        );
        self.delegate.on_ready(self, ready);

        Ok((reader, writer))
    }

    /// Decode inbound frames until the socket fails, the send loop
    /// reports a write failure, or close is requested.
    async fn recv_loop(
        self: &Arc<Self>,
        mut reader: OwnedReadHalf,
        closed_rx: &mut watch::Receiver<bool>,
        mut fail_rx: oneshot::Receiver<SodibusError>,
    ) -> Result<()> {
        loop {
            let frame = tokio::select! {
                res = Frame::read(&mut reader, self.config.max_payload_size) => match res {
                    Ok(frame) => frame,
                    Err(SodibusError::Desync) => {
                        // Scan forward one byte at a time until the
                        // stream realigns on the sync marker.
                        tracing::trace!("skipping unsynchronized byte");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                _ = closed_rx.wait_for(|closed| *closed) => return Ok(()),
                res = &mut fail_rx => return Err(res.unwrap_or(SodibusError::Closed)),
            };
            self.dispatch(frame).await;
        }
    }

    async fn dispatch(self: &Arc<Self>, frame: Frame) {
        let fut = self.delegate.on_frame(self, frame);
        match self.config.dispatch {
            DispatchPolicy::Concurrent => {
                tokio::spawn(fut);
            }
            DispatchPolicy::Ordered => fut.await,
        }
    }
}

/// Drain the outbound queue onto one physical socket.
///
/// Owns the queue receiver for the duration of the attempt and hands it
/// back when done. A frame whose write fails is returned as the carry
/// so the next attempt transmits it first.
async fn send_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Frame>,
    carry: Option<Frame>,
    mut stop: oneshot::Receiver<()>,
    fail: oneshot::Sender<SodibusError>,
) -> (mpsc::Receiver<Frame>, Option<Frame>) {
    if let Some(frame) = carry {
        if let Err(e) = frame.write(&mut writer).await {
            tracing::warn!(error = %e, "carried frame write failed");
            let _ = fail.send(e);
            return (rx, Some(frame));
        }
    }

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(frame) => {
                    if let Err(e) = frame.write(&mut writer).await {
                        tracing::warn!(error = %e, "frame write failed, frame kept for next connection");
                        let _ = fail.send(e);
                        return (rx, Some(frame));
                    }
                }
                None => return (rx, None),
            },
            _ = &mut stop => return (rx, None),
        }
    }
}
