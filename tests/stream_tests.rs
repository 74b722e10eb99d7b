mod common;

use ase_sdk::{AseError, CloseReason, ConnectError, FrameStatus, Request, Resp};
use common::{frame, Mode, WsServer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn collector() -> (
    Arc<Mutex<Vec<Resp>>>,
    impl FnMut(Resp) -> anyhow::Result<()> + Send + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |resp: Resp| -> anyhow::Result<()> {
        sink.lock().unwrap().push(resp);
        Ok(())
    })
}

#[tokio::test]
async fn test_stream_round_trip() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server.client();
    let (seen, handler) = collector();

    let (tx, rx) = mpsc::channel(8);
    let handle = client.stream(rx, handler);
    for status in [
        FrameStatus::FirstFrame,
        FrameStatus::Continue,
        FrameStatus::Continue,
        FrameStatus::LastFrame,
    ] {
        tx.send(frame(status)).await.unwrap();
    }

    timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("stream did not finish")
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert!(seen[3].header.is_last());
    assert!(seen[..3].iter().all(|r| !r.header.is_last()));
    assert_eq!(seen[0].header.sid, "sid-test");

    let received = server.received();
    assert_eq!(received.len(), 4);
    assert_eq!(received[0]["header"]["status"], 0);
    assert_eq!(received[0]["header"]["app_id"], common::APP_ID);
    assert_eq!(received[3]["header"]["status"], 2);

    assert_eq!(client.close_reason(), Some(CloseReason::Completed));
}

#[tokio::test]
async fn test_handshake_url_is_signed() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server.client();
    client.connect().await.unwrap();

    let uris = server.uris();
    assert_eq!(uris.len(), 1);
    let url = url::Url::parse(&format!("http://{}{}", server.addr, uris[0])).unwrap();
    assert_eq!(url.path(), common::PATH);

    let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
    assert_eq!(keys, vec!["host", "date", "authorization"]);
    let host = url.query_pairs().find(|(k, _)| k == "host").unwrap().1;
    assert_eq!(host, server.addr.to_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_handshakes_once() {
    let server = WsServer::start(Mode::Echo).await;
    let client = Arc::new(server.client());

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.connect().await })
        })
        .collect();
    for attempt in attempts {
        attempt.await.unwrap().unwrap();
    }

    assert_eq!(server.accepted(), 1);
    assert!(client.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_handshake_is_shared_and_sticky() {
    let server =
        WsServer::start(Mode::Reject(r#"{"message":"HMAC signature does not match"}"#)).await;
    let client = Arc::new(server.client());

    let attempts: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.connect().await })
        })
        .collect();

    let mut errors = Vec::new();
    for attempt in attempts {
        match attempt.await.unwrap() {
            Err(AseError::Connect(err)) => errors.push(err),
            other => panic!("expected handshake failure, got {:?}", other),
        }
    }

    match &errors[0] {
        ConnectError::Handshake { status, reason, .. } => {
            assert_eq!(*status, 403);
            assert_eq!(reason, "Forbidden");
        }
        other => panic!("expected handshake error, got {:?}", other),
    }
    assert!(errors.iter().all(|e| e == &errors[0]));

    // Later I/O sees the cached failure without dialing again
    assert!(matches!(
        client.send(&frame(FrameStatus::FirstFrame)).await,
        Err(AseError::Connect(ConnectError::Handshake { status: 403, .. }))
    ));
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_send_loop_stops_after_last_frame() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server.client();
    let (_seen, handler) = collector();

    let (tx, rx) = mpsc::channel(8);
    // Everything is queued before the stream starts; the trailing frame must never go out.
    for status in [
        FrameStatus::FirstFrame,
        FrameStatus::Continue,
        FrameStatus::LastFrame,
        FrameStatus::Continue,
    ] {
        tx.send(frame(status)).await.unwrap();
    }
    let handle = client.stream(rx, handler);

    timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("stream did not finish")
        .unwrap();

    let statuses: Vec<_> = server
        .received()
        .iter()
        .map(|f| f["header"]["status"].clone())
        .collect();
    assert_eq!(statuses, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_server_last_frame_ends_stream_and_rejects_late_frames() {
    let server = WsServer::start(Mode::CompleteAfter(1)).await;
    let client = server.client();
    let (seen, handler) = collector();

    let (tx, rx) = mpsc::channel(8);
    let handle = client.stream(rx, handler);
    tx.send(frame(FrameStatus::FirstFrame)).await.unwrap();

    timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("stream did not finish")
        .unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(client.close_reason(), Some(CloseReason::Completed));

    // The frame source was dropped with the send loop
    assert!(tx.send(frame(FrameStatus::Continue)).await.is_err());

    match client.send(&frame(FrameStatus::Continue)).await {
        Err(AseError::ConnectionClosed(CloseReason::Completed)) => {}
        other => panic!("expected late frame to fail, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_error_is_reported_exactly() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server.client();

    let mut calls = 0;
    let handler = move |_resp: Resp| -> anyhow::Result<()> {
        calls += 1;
        if calls == 2 {
            anyhow::bail!("rejected second response");
        }
        Ok(())
    };

    let (tx, rx) = mpsc::channel(8);
    let handle = client.stream(rx, handler);
    tx.send(frame(FrameStatus::FirstFrame)).await.unwrap();
    tx.send(frame(FrameStatus::Continue)).await.unwrap();

    let err = timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("stream did not finish")
        .unwrap_err();
    match err {
        AseError::Handler(inner) => assert_eq!(inner.to_string(), "rejected second response"),
        other => panic!("expected handler error, got {:?}", other),
    }

    assert!(matches!(client.close_reason(), Some(CloseReason::Failed(_))));
    assert!(matches!(
        client.send(&frame(FrameStatus::Continue)).await,
        Err(AseError::ConnectionClosed(CloseReason::Failed(_)))
    ));
}

#[tokio::test]
async fn test_frame_without_status_fails_stream() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server.client();
    let (_seen, handler) = collector();

    let (tx, rx) = mpsc::channel(8);
    let handle = client.stream(rx, handler);
    tx.send(Request::default()).await.unwrap();

    let err = timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("stream did not finish")
        .unwrap_err();
    assert!(matches!(err, AseError::MissingStatus), "got {:?}", err);
    assert!(server.received().is_empty());
}

#[tokio::test]
async fn test_connection_lifetime_cap_is_reported_as_deadline() {
    let server = WsServer::start(Mode::Silent).await;
    let client = server
        .builder()
        .with_connection_lifetime(Duration::from_millis(300))
        .build()
        .unwrap();
    let (_seen, handler) = collector();

    let (tx, rx) = mpsc::channel(8);
    let handle = client.stream(rx, handler);
    tx.send(frame(FrameStatus::FirstFrame)).await.unwrap();

    let err = timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("stream did not finish")
        .unwrap_err();
    assert!(matches!(err, AseError::ConnectionDeadlined), "got {:?}", err);
    assert!(err.is_deadlined());
    assert_eq!(client.close_reason(), Some(CloseReason::Deadlined));
    drop(tx);
}

#[tokio::test]
async fn test_busy_stream_is_cut_off_at_lifetime() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server
        .builder()
        .with_connection_lifetime(Duration::from_millis(300))
        .build()
        .unwrap();
    let (seen, handler) = collector();

    let (tx, rx) = mpsc::channel(8);
    let handle = client.stream(rx, handler);
    let producer = tokio::spawn(async move {
        let mut status = FrameStatus::FirstFrame;
        while tx.send(frame(status)).await.is_ok() {
            status = FrameStatus::Continue;
            sleep(Duration::from_millis(20)).await;
        }
    });

    let err = timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("stream did not finish")
        .unwrap_err();
    assert!(matches!(err, AseError::ConnectionDeadlined), "got {:?}", err);
    assert_eq!(client.close_reason(), Some(CloseReason::Deadlined));
    assert!(!seen.lock().unwrap().is_empty());

    timeout(TEST_TIMEOUT, producer)
        .await
        .expect("producer kept running")
        .unwrap();
}

#[tokio::test]
async fn test_send_after_lifetime_is_deadlined() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server
        .builder()
        .with_connection_lifetime(Duration::from_millis(100))
        .build()
        .unwrap();
    client.connect().await.unwrap();
    sleep(Duration::from_millis(400)).await;

    for _ in 0..2 {
        assert!(matches!(
            client.send(&frame(FrameStatus::FirstFrame)).await,
            Err(AseError::ConnectionDeadlined)
        ));
    }
    assert_eq!(client.close_reason(), Some(CloseReason::Deadlined));

    sleep(Duration::from_millis(100)).await;
    assert!(server.received().is_empty());
}

#[tokio::test]
async fn test_buffered_response_after_lifetime_is_deadlined() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server
        .builder()
        .with_connection_lifetime(Duration::from_millis(200))
        .build()
        .unwrap();

    client.send(&frame(FrameStatus::FirstFrame)).await.unwrap();
    // The echo is sitting in the socket by the time the cap passes
    sleep(Duration::from_millis(500)).await;

    assert!(matches!(
        client.recv().await,
        Err(AseError::ConnectionDeadlined)
    ));
    assert_eq!(client.close_reason(), Some(CloseReason::Deadlined));
}

#[tokio::test]
async fn test_handshake_timeout_is_cached() {
    let server = WsServer::start(Mode::Stall).await;
    let client = server
        .builder()
        .with_handshake_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    match timeout(TEST_TIMEOUT, client.connect()).await.expect("handshake hung") {
        Err(AseError::Connect(ConnectError::HandshakeTimeout(after))) => {
            assert_eq!(after, Duration::from_millis(200));
        }
        other => panic!("expected handshake timeout, got {:?}", other),
    }

    // Later callers get the same failure without waiting again
    let started = Instant::now();
    assert!(matches!(
        client.send(&frame(FrameStatus::FirstFrame)).await,
        Err(AseError::Connect(ConnectError::HandshakeTimeout(_)))
    ));
    assert!(matches!(
        client.connect().await,
        Err(AseError::Connect(ConnectError::HandshakeTimeout(_)))
    ));
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_write_timeout_closes_connection() {
    let server = WsServer::start(Mode::Deaf).await;
    let client = server
        .builder()
        .with_write_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let mut big = frame(FrameStatus::Continue);
    big.set_parameter("blob", json!("x".repeat(256 * 1024)));

    // Nobody reads, so the socket buffers fill and a write stalls
    let outcome = timeout(TEST_TIMEOUT, async {
        for _ in 0..256 {
            client.send(&big).await?;
        }
        Ok::<(), AseError>(())
    })
    .await
    .expect("writes never stalled");

    match outcome {
        Err(AseError::Timeout { operation, after }) => {
            assert_eq!(operation, "write");
            assert_eq!(after, Duration::from_millis(200));
        }
        other => panic!("expected write timeout, got {:?}", other),
    }
    assert!(matches!(client.close_reason(), Some(CloseReason::Failed(_))));
}

#[tokio::test]
async fn test_read_timeout_closes_connection() {
    let server = WsServer::start(Mode::Silent).await;
    let client = server
        .builder()
        .with_read_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    client.send(&frame(FrameStatus::FirstFrame)).await.unwrap();
    match client.recv().await {
        Err(AseError::Timeout { operation, after }) => {
            assert_eq!(operation, "read");
            assert_eq!(after, Duration::from_millis(200));
        }
        other => panic!("expected read timeout, got {:?}", other),
    }

    assert!(matches!(client.close_reason(), Some(CloseReason::Failed(_))));
    assert!(matches!(
        client.send(&frame(FrameStatus::Continue)).await,
        Err(AseError::ConnectionClosed(_))
    ));
}

#[tokio::test]
async fn test_peer_close_surfaces_as_transport_error() {
    let server = WsServer::start(Mode::CloseImmediately).await;
    let client = server.client();

    assert!(matches!(client.recv().await, Err(AseError::Transport(_))));
    assert!(matches!(client.close_reason(), Some(CloseReason::Failed(_))));
}

#[tokio::test]
async fn test_send_and_recv_one_frame_at_a_time() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server.client();

    client.send(&frame(FrameStatus::FirstFrame)).await.unwrap();
    let first = client.recv().await.unwrap();
    assert!(!first.header.is_last());
    assert_eq!(first.payload.unwrap()["result"]["seq"], 1);

    client.send(&frame(FrameStatus::LastFrame)).await.unwrap();
    let last = client.recv().await.unwrap().ensure_success().unwrap();
    assert!(last.header.is_last());
    assert_eq!(client.close_reason(), Some(CloseReason::Completed));
}

#[tokio::test]
async fn test_direct_send_requires_status() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server.client();
    assert!(matches!(
        client.send(&Request::default()).await,
        Err(AseError::MissingStatus)
    ));
}

#[tokio::test]
async fn test_close_is_idempotent_and_blocks_later_connects() {
    let server = WsServer::start(Mode::Echo).await;
    let client = server.client();

    client.close().await;
    client.close().await;
    assert_eq!(client.close_reason(), Some(CloseReason::Requested));
    assert!(matches!(
        client.connect().await,
        Err(AseError::Connect(ConnectError::Closed))
    ));
    assert_eq!(server.accepted(), 0);
}

#[tokio::test]
async fn test_close_during_handshake_shuts_new_connection() {
    let server = WsServer::start(Mode::SlowHandshake(Duration::from_millis(300))).await;
    let client = Arc::new(server.client());

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    sleep(Duration::from_millis(100)).await;
    client.close().await;

    match timeout(TEST_TIMEOUT, connecting).await.expect("connect hung").unwrap() {
        Err(AseError::ConnectionClosed(CloseReason::Requested)) => {}
        other => panic!("expected closed connection, got {:?}", other),
    }
    assert!(!client.is_connected());

    // The server sees the close while the client is still alive
    timeout(TEST_TIMEOUT, async {
        while !server.received().iter().any(|f| f["closed"] == true) {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection was left open");
}

#[tokio::test]
async fn test_close_ends_running_stream() {
    let server = WsServer::start(Mode::Silent).await;
    let client = server.client();
    let (_seen, handler) = collector();

    let (tx, rx) = mpsc::channel(8);
    let handle = client.stream(rx, handler);
    tx.send(frame(FrameStatus::FirstFrame)).await.unwrap();
    client.connect().await.unwrap();

    client.close().await;
    let err = timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("stream did not finish")
        .unwrap_err();
    assert!(matches!(
        err,
        AseError::ConnectionClosed(CloseReason::Requested)
    ));
}

#[tokio::test]
async fn test_reset_connection_allows_a_new_session() {
    let server = WsServer::start(Mode::Echo).await;
    let mut client = server.client();

    client.close().await;
    client.reset_connection().await;
    assert_eq!(client.close_reason(), None);

    client.send(&frame(FrameStatus::FirstFrame)).await.unwrap();
    assert!(client.recv().await.is_ok());
    assert_eq!(server.accepted(), 1);
}
