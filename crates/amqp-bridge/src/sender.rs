//! C3: pops payloads from the ring buffer and writes them to the
//! downstream gateway socket, with reconnect/backoff and drop accounting.

use crate::backoff::{self, BACKOFF_INITIAL};
use crate::config::{BridgeConfig, Gateway};
use crate::stats::Stats;
use bridge_ring::{Backoff, Ring};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::watch;
use tracing::{info, warn};

enum Socket {
    Unix(UnixStream),
    Inet(TcpStream),
}

impl Socket {
    async fn connect(gateway: &Gateway) -> io::Result<Self> {
        match gateway {
            Gateway::Unix(path) => Ok(Socket::Unix(UnixStream::connect(path).await?)),
            Gateway::Inet { host, port } => {
                Ok(Socket::Inet(TcpStream::connect((host.as_str(), *port)).await?))
            }
        }
    }

    /// Non-blocking attempt: returns `Ok(false)` on would-block rather than
    /// awaiting readiness, matching the spec's "single send attempt" policy.
    async fn try_send(&mut self, payload: &[u8]) -> io::Result<bool> {
        let result = match self {
            Socket::Unix(s) => s.try_write(payload),
            Socket::Inet(s) => s.try_write(payload),
        };
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Blocking mode (`--block`): the write is awaited to completion.
    async fn send_blocking(&mut self, payload: &[u8]) -> io::Result<()> {
        match self {
            Socket::Unix(s) => s.write_all(payload).await,
            Socket::Inet(s) => s.write_all(payload).await,
        }
    }
}

/// Runs the sender until `shutdown` fires and the ring has drained.
pub async fn run(config: Arc<BridgeConfig>, ring: Arc<Ring>, stats: Arc<Stats>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff_state = BACKOFF_INITIAL;
    let mut socket = connect_with_retry(&config, &mut shutdown, &mut backoff_state).await;

    let mut spin = Backoff::new();

    loop {
        let shutting_down = *shutdown.borrow();

        let Some(slot) = ring.reserve_read() else {
            if shutting_down {
                break;
            }
            spin.snooze();
            if spin.is_completed() {
                spin.reset();
                tokio::task::yield_now().await;
            }
            continue;
        };
        spin.reset();

        let payload = slot.as_slice().to_vec();
        slot.commit();

        let Some(sock) = socket.as_mut() else {
            socket = connect_with_retry(&config, &mut shutdown, &mut backoff_state).await;
            continue;
        };

        let send_result = if config.block {
            sock.send_blocking(&payload).await.map(|()| true)
        } else {
            sock.try_send(&payload).await
        };

        match send_result {
            Ok(true) => stats.record_sock_sent(),
            Ok(false) => stats.record_sock_would_block(),
            Err(e) if is_reconnectable(&e) => {
                warn!(error = %e, "gateway socket error, reconnecting");
                // Spec: retry once after reconnect, unless it was a
                // would-block (handled above, never reaches here).
                socket = connect_with_retry(&config, &mut shutdown, &mut backoff_state).await;
                if let Some(sock) = socket.as_mut() {
                    let retried = if config.block {
                        sock.send_blocking(&payload).await.map(|()| true)
                    } else {
                        sock.try_send(&payload).await
                    };
                    match retried {
                        Ok(true) => stats.record_sock_sent(),
                        Ok(false) => stats.record_sock_would_block(),
                        Err(e) => {
                            warn!(error = %e, "gateway send failed after reconnect, dropping payload");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "gateway send failed, dropping payload");
            }
        }
    }

    info!("sender: shut down");
}

fn is_reconnectable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected
    )
}

async fn connect_with_retry(
    config: &BridgeConfig,
    shutdown: &mut watch::Receiver<bool>,
    backoff: &mut Duration,
) -> Option<Socket> {
    loop {
        if *shutdown.borrow() {
            return None;
        }
        match Socket::connect(&config.gateway).await {
            Ok(s) => {
                *backoff = BACKOFF_INITIAL;
                info!("gateway: connected");
                return Some(s);
            }
            Err(e) => {
                warn!(error = %e, delay = ?*backoff, "gateway: connect failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff::jittered(*backoff)) => {}
                    _ = shutdown.changed() => return None,
                }
                *backoff = backoff::advance(*backoff);
            }
        }
    }
}
