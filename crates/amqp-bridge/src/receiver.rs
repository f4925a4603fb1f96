//! C2: drives one AMQP 1.0 session, reassembles deliveries into payload
//! bytes, and pushes them into the ring buffer.

use crate::backoff::{self, BACKOFF_INITIAL};
use crate::config::BridgeConfig;
use crate::stats::Stats;
use bridge_ring::{OverflowPolicy, Ring, RingError};
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::link::RecvError;
use fe2o3_amqp::{Connection, Receiver, Session};
use fe2o3_amqp_types::messaging::{Body, Data};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Messages of credit granted per window; top-up fires at half that.
const CREDIT_WINDOW: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("amqp connection failed: {0}")]
    Connect(String),
    #[error("amqp session failed: {0}")]
    Session(String),
    #[error("amqp link attach failed: {0}")]
    Attach(String),
}

pub struct ReceiverHandle {
    pub received_total: Arc<AtomicU64>,
}

/// Runs the receiver until `shutdown` fires or the configured `count` of
/// messages has been delivered, whichever comes first.
pub async fn run(
    config: Arc<BridgeConfig>,
    ring: Arc<Ring>,
    stats: Arc<Stats>,
    mut shutdown: watch::Receiver<bool>,
) -> ReceiverHandle {
    let received_total = Arc::new(AtomicU64::new(0));
    let mut backoff = BACKOFF_INITIAL;

    'reconnect: loop {
        if *shutdown.borrow() {
            break;
        }

        info!(url = %config.amqp_url.host, address = %config.amqp_url.address, "amqp: connecting");
        let (connection, session, mut receiver) = match connect(&config).await {
            Ok(triple) => triple,
            Err(e) => {
                warn!(error = %e, delay = ?backoff, "amqp: connect failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff::jittered(backoff)) => {}
                    _ = shutdown.changed() => break 'reconnect,
                }
                backoff = backoff::advance(backoff);
                continue 'reconnect;
            }
        };
        backoff = BACKOFF_INITIAL;
        info!("amqp: running");

        // `CreditMode::Manual` starts at zero credit: nothing arrives until
        // we grant the initial window ourselves.
        let withhold_initial = config.amqp_block && ring.is_full();
        let mut current_credit = if withhold_initial {
            0
        } else {
            if let Err(e) = receiver.set_credit(CREDIT_WINDOW).await {
                warn!(error = ?e, "amqp: initial credit grant failed");
            }
            CREDIT_WINDOW
        };
        let mut processed_since_topup: u32 = 0;

        loop {
            if *shutdown.borrow() {
                let _ = receiver.close().await;
                let _ = session.close().await;
                let _ = connection.close().await;
                break 'reconnect;
            }

            if config.count > 0 && received_total.load(Ordering::Relaxed) >= config.count {
                let _ = receiver.close().await;
                let _ = session.close().await;
                let _ = connection.close().await;
                break 'reconnect;
            }

            let delivery = tokio::select! {
                d = receiver.recv::<Body<Vec<u8>>>() => d,
                _ = shutdown.changed() => continue,
            };

            let delivery = match delivery {
                Ok(d) => d,
                Err(RecvError::LinkStateError(_)) | Err(RecvError::TransportError(_)) => {
                    warn!("amqp: link dropped, reconnecting");
                    continue 'reconnect;
                }
                Err(e) => {
                    warn!(error = ?e, "amqp: recv error, dropping delivery");
                    stats.record_decode_err();
                    continue;
                }
            };

            stats.record_batch();

            let payload = concat_data_sections(delivery.body());
            let is_partial = matches!(delivery.body(), Body::Data(sections) if sections.len() > 1);
            if is_partial {
                stats.record_partial();
            }

            if payload.len() > ring.slot_size() {
                debug!(len = payload.len(), limit = ring.slot_size(), "amqp: oversize payload dropped");
                stats.record_decode_err();
            } else {
                match ring.reserve_write() {
                    Ok(mut slot) => {
                        slot.as_mut_slice()[..payload.len()].copy_from_slice(&payload);
                        slot.commit(payload.len());
                        stats.record_received();
                        received_total.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(RingError::Full) => {
                        // Only reachable under Backpressure; we withhold
                        // credit below before this can happen in practice.
                        debug_assert_eq!(ring.policy(), OverflowPolicy::Backpressure);
                    }
                }
            }

            if let Err(e) = receiver.accept(&delivery).await {
                warn!(error = ?e, "amqp: settlement failed");
            }

            processed_since_topup += 1;
            if processed_since_topup >= CREDIT_WINDOW / 2 {
                processed_since_topup = 0;
                let withhold = config.amqp_block && ring.is_full();
                if !withhold {
                    if let Err(e) = receiver.set_credit(CREDIT_WINDOW).await {
                        warn!(error = ?e, "amqp: credit top-up failed");
                    }
                    current_credit = CREDIT_WINDOW;
                } else {
                    current_credit = 0;
                }
            }
            stats.record_link_credit(current_credit);
        }
    }

    ReceiverHandle { received_total }
}

async fn connect(
    config: &BridgeConfig,
) -> Result<(Connection, Session, Receiver), ReceiverError> {
    let url = &config.amqp_url;
    let addr = format!("{}:{}", url.host, url.port);

    let mut builder = Connection::builder()
        .container_id(config.cid.clone())
        .hostname(url.host.as_str());
    if let Some(user) = &url.user {
        builder = builder.sasl_profile(fe2o3_amqp::sasl_profile::SaslProfile::Plain {
            username: user.clone(),
            password: url.password.clone().unwrap_or_default(),
        });
    }
    let connection = builder
        .open(addr.as_str())
        .await
        .map_err(|e| ReceiverError::Connect(e.to_string()))?;

    let session = Session::begin(&connection)
        .await
        .map_err(|e| ReceiverError::Session(e.to_string()))?;

    let receiver = Receiver::builder()
        .name(format!("{}-receiver", config.cid))
        .source(url.address.as_str())
        .credit_mode(CreditMode::Manual)
        .attach(&session)
        .await
        .map_err(|e| ReceiverError::Attach(e.to_string()))?;

    Ok((connection, session, receiver))
}

/// The observable contract: delivered bytes equal the concatenation of the
/// message's data sections, in order. No header/property/annotation is
/// forwarded.
fn concat_data_sections(body: &Body<Vec<u8>>) -> Vec<u8> {
    match body {
        Body::Data(sections) => sections.iter().flat_map(|d: &Data| d.0.as_ref()).copied().collect(),
        Body::Value(_) | Body::Sequence(_) | Body::Empty => Vec::new(),
    }
}
