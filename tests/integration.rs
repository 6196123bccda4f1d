//! Integration tests against a mock broker on real TCP sockets.
//!
//! The helpers below implement just enough of the broker side of the
//! protocol to accept sessions, route frames, and misbehave on demand.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use sodibus_client::conn::BoxFuture;
use sodibus_client::protocol::{
    CallerRecv, CalleeRecv, ClientMode, Frame, Handshake, Message, Ready,
    DEFAULT_MAX_PAYLOAD_SIZE,
};
use sodibus_client::{Callee, Caller, Conn, ConnConfig, ConnDelegate, SodibusError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
}

/// Read the next parseable message, scanning past corrupted bytes.
async fn read_message(stream: &mut TcpStream) -> Message {
    loop {
        match Frame::read(stream, DEFAULT_MAX_PAYLOAD_SIZE).await {
            Ok(frame) => return Message::from_frame(&frame).expect("broker got unknown frame"),
            Err(SodibusError::Desync) => continue,
            Err(e) => panic!("broker read failed: {e}"),
        }
    }
}

async fn write_message(stream: &mut TcpStream, message: &Message) {
    message
        .to_frame()
        .expect("encode failed")
        .write(stream)
        .await
        .expect("broker write failed");
}

/// Accept one connection and read its handshake, without replying.
async fn accept_handshake(listener: &TcpListener) -> (TcpStream, Handshake) {
    let (mut stream, _) = listener.accept().await.expect("accept failed");
    match read_message(&mut stream).await {
        Message::Handshake(handshake) => (stream, handshake),
        other => panic!("expected Handshake, got {}", other.kind()),
    }
}

/// Accept one connection, complete the session handshake, return the
/// exchanging-phase stream.
async fn accept_session(listener: &TcpListener) -> (TcpStream, Handshake) {
    let (mut stream, handshake) = accept_handshake(listener).await;
    write_message(
        &mut stream,
        &Message::Ready(Ready {
            client_id: 1,
            node_id: 1,
        }),
    )
    .await;
    (stream, handshake)
}

async fn bind_broker() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("local addr").to_string();
    (listener, addr)
}

#[tokio::test]
async fn concurrent_invocations_resolve_out_of_order() {
    init_tracing();
    let (listener, addr) = bind_broker().await;

    let broker = tokio::spawn(async move {
        let (mut stream, handshake) = accept_session(&listener).await;
        assert_eq!(handshake.mode, ClientMode::Caller);
        assert!(handshake.provides.is_empty());

        let mut requests = Vec::new();
        for _ in 0..4 {
            match read_message(&mut stream).await {
                Message::CallerSend(send) => requests.push(send),
                other => panic!("expected CallerSend, got {}", other.kind()),
            }
        }

        // Answer in reverse submission order; correlation is by id,
        // never by arrival order.
        for request in requests.iter().rev() {
            write_message(
                &mut stream,
                &Message::CallerRecv(CallerRecv {
                    id: request.id,
                    result: format!("result-{}", request.invocation.arguments[0]),
                }),
            )
            .await;
        }
        stream
    });

    let caller = Caller::connect(&addr);

    let mut tasks = Vec::new();
    for i in 0..4 {
        let caller = caller.clone();
        tasks.push(tokio::spawn(async move {
            let result = caller
                .invoke("calculator", "echo", vec![i.to_string()])
                .await
                .expect("invoke failed");
            (i, result)
        }));
    }

    for task in tasks {
        let (i, result) = task.await.expect("task panicked");
        assert_eq!(result, format!("result-{i}"));
    }
    assert_eq!(caller.pending_invocations(), 0);

    caller.close();
    broker.await.expect("broker panicked");
}

#[tokio::test]
async fn invocation_timeout_and_late_response_dropped() {
    init_tracing();
    let (listener, addr) = bind_broker().await;

    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_session(&listener).await;

        // Sit on the first request well past the caller's timeout,
        // then answer it anyway.
        let first = match read_message(&mut stream).await {
            Message::CallerSend(send) => send,
            other => panic!("expected CallerSend, got {}", other.kind()),
        };
        tokio::time::sleep(Duration::from_millis(400)).await;
        write_message(
            &mut stream,
            &Message::CallerRecv(CallerRecv {
                id: first.id,
                result: "too late".to_string(),
            }),
        )
        .await;

        // The second request gets an immediate answer.
        let second = match read_message(&mut stream).await {
            Message::CallerSend(send) => send,
            other => panic!("expected CallerSend, got {}", other.kind()),
        };
        write_message(
            &mut stream,
            &Message::CallerRecv(CallerRecv {
                id: second.id,
                result: "on time".to_string(),
            }),
        )
        .await;
        stream
    });

    let caller = Caller::builder(&addr)
        .invoke_timeout(Duration::from_millis(200))
        .connect();

    let err = caller
        .invoke("calculator", "slow", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, SodibusError::InvocationTimeout));
    assert_eq!(caller.pending_invocations(), 0);

    // Let the stale response arrive; it must be dropped silently and
    // leave the client usable.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let result = caller
        .invoke("calculator", "fast", vec![])
        .await
        .expect("second invoke failed");
    assert_eq!(result, "on time");

    caller.close();
    broker.await.expect("broker panicked");
}

#[tokio::test]
async fn invoke_unserved_service_times_out() {
    init_tracing();
    let (listener, addr) = bind_broker().await;

    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_session(&listener).await;
        // Accept the request but never produce a result, as a broker
        // does when no callee serves the name.
        let _ = read_message(&mut stream).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        stream
    });

    let caller = Caller::builder(&addr)
        .invoke_timeout(Duration::from_millis(150))
        .connect();

    let err = caller
        .invoke("nobody-home", "anything", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, SodibusError::InvocationTimeout));

    caller.close();
    broker.await.expect("broker panicked");
}

#[tokio::test]
async fn recovers_from_stream_corruption() {
    init_tracing();
    let (listener, addr) = bind_broker().await;

    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept_session(&listener).await;

        let request = match read_message(&mut stream).await {
            Message::CallerSend(send) => send,
            other => panic!("expected CallerSend, got {}", other.kind()),
        };

        // Corrupt the stream, then send the real answer. The client
        // must scan forward to the sync marker and resolve the call.
        stream
            .write_all(&[0x00, 0x17, 0x42])
            .await
            .expect("write garbage");
        write_message(
            &mut stream,
            &Message::CallerRecv(CallerRecv {
                id: request.id,
                result: "intact".to_string(),
            }),
        )
        .await;
        stream
    });

    let caller = Caller::connect(&addr);
    let result = caller
        .invoke("calculator", "echo", vec![])
        .await
        .expect("invoke failed");
    assert_eq!(result, "intact");

    caller.close();
    broker.await.expect("broker panicked");
}

struct RecordingDelegate {
    ready_tx: mpsc::UnboundedSender<Ready>,
}

impl ConnDelegate for RecordingDelegate {
    fn prepare_handshake(&self, _conn: &Conn) -> Handshake {
        Handshake {
            mode: ClientMode::Caller,
            provides: vec![],
        }
    }

    fn on_ready(&self, _conn: &Conn, ready: Ready) {
        let _ = self.ready_tx.send(ready);
    }

    fn on_frame(&self, _conn: &Arc<Conn>, _frame: Frame) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

#[tokio::test]
async fn reconnects_and_flushes_frame_submitted_during_outage() {
    init_tracing();
    let (listener, addr) = bind_broker().await;

    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    let config = ConnConfig {
        reconnect_delay: Duration::from_millis(100),
        ..ConnConfig::default()
    };
    let conn = Conn::new(&addr, Arc::new(RecordingDelegate { ready_tx }), config);
    tokio::spawn(conn.clone().run());

    // First physical connection: handshake completes, then the broker
    // severs the socket.
    let (stream, handshake) = accept_session(&listener).await;
    assert_eq!(handshake.mode, ClientMode::Caller);
    ready_rx.recv().await.expect("first ready");
    drop(stream);

    // Give the client a moment to observe the severed socket, then
    // submit a frame during the outage.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = Message::CallerSend(sodibus_client::protocol::CallerSend {
        id: 1,
        invocation: sodibus_client::Invocation {
            callee_name: "calculator".to_string(),
            method_name: "multiply".to_string(),
            arguments: vec!["2".to_string(), "4".to_string()],
            no_return: false,
        },
    })
    .to_frame()
    .expect("encode");
    conn.send(queued).await.expect("send during outage");

    // Second physical connection: the handshake repeats and the queued
    // frame is delivered once the session is exchanging.
    let (mut stream, handshake) = accept_session(&listener).await;
    assert_eq!(handshake.mode, ClientMode::Caller);
    ready_rx.recv().await.expect("second ready");

    match read_message(&mut stream).await {
        Message::CallerSend(send) => {
            assert_eq!(send.id, 1);
            assert_eq!(send.invocation.method_name, "multiply");
        }
        other => panic!("expected CallerSend, got {}", other.kind()),
    }

    conn.close();
}

#[tokio::test]
async fn handshake_violation_triggers_retry() {
    init_tracing();
    let (listener, addr) = bind_broker().await;

    let broker = tokio::spawn(async move {
        // First attempt: answer the handshake with the wrong message
        // kind; the client must abandon the attempt.
        let (mut stream, _) = accept_handshake(&listener).await;
        write_message(
            &mut stream,
            &Message::CallerRecv(CallerRecv {
                id: 0,
                result: String::new(),
            }),
        )
        .await;
        drop(stream);

        // Second attempt: behave, then serve one invocation.
        let (mut stream, _) = accept_session(&listener).await;
        let request = match read_message(&mut stream).await {
            Message::CallerSend(send) => send,
            other => panic!("expected CallerSend, got {}", other.kind()),
        };
        write_message(
            &mut stream,
            &Message::CallerRecv(CallerRecv {
                id: request.id,
                result: "recovered".to_string(),
            }),
        )
        .await;
        stream
    });

    let caller = Caller::builder(&addr)
        .invoke_timeout(Duration::from_secs(2))
        .reconnect_delay(Duration::from_millis(50))
        .connect();

    let result = caller
        .invoke("calculator", "echo", vec![])
        .await
        .expect("invoke failed after retry");
    assert_eq!(result, "recovered");

    caller.close();
    broker.await.expect("broker panicked");
}

#[tokio::test]
async fn calculator_end_to_end() {
    init_tracing();
    let (listener, addr) = bind_broker().await;

    // Routing broker: pairs one callee session with one caller session
    // and forwards a single invocation between them.
    let broker = tokio::spawn(async move {
        let (mut callee_stream, callee_hs) = accept_session(&listener).await;
        assert_eq!(callee_hs.mode, ClientMode::Callee);
        assert_eq!(callee_hs.provides, ["calculator"]);

        let (mut caller_stream, caller_hs) = accept_session(&listener).await;
        assert_eq!(caller_hs.mode, ClientMode::Caller);

        let request = match read_message(&mut caller_stream).await {
            Message::CallerSend(send) => send,
            other => panic!("expected CallerSend, got {}", other.kind()),
        };
        write_message(
            &mut callee_stream,
            &Message::CalleeRecv(CalleeRecv {
                id: request.id,
                invocation: request.invocation.clone(),
            }),
        )
        .await;

        let reply = match read_message(&mut callee_stream).await {
            Message::CalleeSend(send) => send,
            other => panic!("expected CalleeSend, got {}", other.kind()),
        };
        assert_eq!(reply.id, request.id);
        write_message(
            &mut caller_stream,
            &Message::CallerRecv(CallerRecv {
                id: reply.id,
                result: reply.result,
            }),
        )
        .await;

        (caller_stream, callee_stream)
    });

    let callee = Callee::builder(&addr)
        .provide("calculator")
        .handler(|service, method, args| {
            assert_eq!(service, "calculator");
            match method {
                "multiply" => {
                    let x: i64 = args[0].parse().unwrap_or(0);
                    let y: i64 = args[1].parse().unwrap_or(0);
                    (x * y).to_string()
                }
                _ => "UNKNOWN".to_string(),
            }
        })
        .connect();

    // Let the callee session come up before the caller dials in, so
    // the broker sees them in a fixed order.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let caller = Caller::connect(&addr);
    let result = caller
        .invoke(
            "calculator",
            "multiply",
            vec!["2".to_string(), "4".to_string()],
        )
        .await
        .expect("invoke failed");
    assert_eq!(result, "8");

    caller.close();
    callee.close();
    broker.await.expect("broker panicked");
}
