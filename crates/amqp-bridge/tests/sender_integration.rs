//! Exercises `sender::run` against a real UNIX-domain gateway listener,
//! the way the teacher's `span_collector` integration tests exercise a
//! fake exporter rather than mocking the transport.

use amqp_bridge::config::{BridgeConfig, Gateway};
use amqp_bridge::stats::Stats;
use amqp_bridge::url::AmqpUrl;
use amqp_bridge::sender;
use bridge_ring::{Config as RingConfig, OverflowPolicy, Ring};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

fn test_config(gateway: Gateway, block: bool) -> BridgeConfig {
    BridgeConfig {
        amqp_url: AmqpUrl::parse("amqp://127.0.0.1/collectd/telemetry").unwrap(),
        gateway,
        block,
        rbc: 64,
        rbs: 256,
        stat_period: 0,
        cid: "bridge-test".to_string(),
        count: 0,
        verbose: 0,
        amqp_block: false,
    }
}

#[tokio::test]
async fn happy_path_unix_delivers_every_payload_in_order() {
    let dir = tempdir();
    let sock_path = dir.join("gw.sock");
    let listener = UnixListener::bind(&sock_path).unwrap();

    let config = Arc::new(test_config(Gateway::Unix(sock_path), false));
    let ring = Arc::new(Ring::new(RingConfig::new(config.rbc, config.rbs, OverflowPolicy::DropOldest)));
    let stats = Arc::new(Stats::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sender_task = tokio::spawn(sender::run(config.clone(), ring.clone(), stats.clone(), shutdown_rx));

    // Accept the sender's connection and read back every byte it writes.
    // Stream sockets give no message-boundary guarantee, so frames may
    // coalesce into a single `read`; collect raw bytes and check the
    // concatenation rather than assuming one read per payload.
    let reader = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match timeout(Duration::from_millis(500), stream.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => received.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => break,
            }
        }
        received
    });

    for i in 0..5u8 {
        loop {
            if let Ok(mut slot) = ring.reserve_write() {
                slot.as_mut_slice()[0] = i;
                slot.commit(1);
                break;
            }
        }
    }

    // Give the sender a chance to drain the ring before shutting down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();
    sender_task.await.unwrap();
    let received = reader.await.unwrap();

    assert_eq!(received, vec![0, 1, 2, 3, 4]);
    assert_eq!(stats.snapshot(0).sock_sent, 5);
    assert_eq!(stats.snapshot(0).sock_would_block, 0);
}

#[tokio::test]
async fn sender_reconnects_after_listener_restarts() {
    let dir = tempdir();
    let sock_path = dir.join("gw.sock");

    let config = Arc::new(test_config(Gateway::Unix(sock_path.clone()), false));
    let ring = Arc::new(Ring::new(RingConfig::new(config.rbc, config.rbs, OverflowPolicy::DropOldest)));
    let stats = Arc::new(Stats::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // No listener yet: the sender must retry with backoff rather than
    // giving up.
    let sender_task = tokio::spawn(sender::run(config.clone(), ring.clone(), stats.clone(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let listener = UnixListener::bind(&sock_path).unwrap();
    let reader = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        buf[..n].to_vec()
    });

    loop {
        if let Ok(mut slot) = ring.reserve_write() {
            slot.as_mut_slice()[0] = 42;
            slot.commit(1);
            break;
        }
    }

    let frame = timeout(Duration::from_secs(5), reader).await.unwrap().unwrap();
    assert_eq!(frame, vec![42]);

    shutdown_tx.send(true).unwrap();
    sender_task.await.unwrap();
}

fn tempdir() -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!("amqp-bridge-test-{}-{}", std::process::id(), unique_suffix()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn unique_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
