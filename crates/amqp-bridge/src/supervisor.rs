//! C4: allocates the ring buffer, starts C2/C3, samples their counters on
//! a wall-clock tick, and coordinates shutdown.

use crate::config::BridgeConfig;
use crate::stats::{Snapshot, Stats};
use crate::{receiver, sender};
use bridge_ring::{Config, OverflowPolicy, Ring};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

pub async fn run(config: BridgeConfig) {
    let config = Arc::new(config);
    let policy = if config.amqp_block {
        OverflowPolicy::Backpressure
    } else {
        OverflowPolicy::DropOldest
    };
    let ring = Arc::new(Ring::new(Config::new(config.rbc, config.rbs, policy)));
    let stats = Arc::new(Stats::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut receiver_task = tokio::spawn(receiver::run(
        config.clone(),
        ring.clone(),
        stats.clone(),
        shutdown_rx.clone(),
    ));
    let mut sender_task = tokio::spawn(sender::run(config.clone(), ring.clone(), stats.clone(), shutdown_rx.clone()));

    let stats_task = if config.stat_period > 0 {
        Some(tokio::spawn(stats_loop(
            config.stat_period,
            ring.clone(),
            stats.clone(),
            shutdown_rx.clone(),
        )))
    } else {
        None
    };

    tokio::select! {
        result = &mut receiver_task => {
            if let Err(e) = result {
                tracing::error!(error = %e, "receiver task panicked");
            }
            info!("supervisor: receiver finished, shutting down sender");
        }
        result = &mut sender_task => {
            if let Err(e) = result {
                tracing::error!(error = %e, "sender task panicked");
            }
            info!("supervisor: sender finished, shutting down receiver");
        }
        () = signal_wait() => {
            info!("supervisor: termination signal received");
        }
    }

    let _ = shutdown_tx.send(true);

    let _ = receiver_task.await;
    let _ = sender_task.await;

    if let Some(task) = stats_task {
        let _ = task.await;
    }

    info!("supervisor: exiting");
}

#[cfg(unix)]
async fn signal_wait() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn signal_wait() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn stats_loop(period: u64, ring: Arc<Ring>, stats: Arc<Stats>, mut shutdown: watch::Receiver<bool>) {
    let mut ticks = 0u64;
    let mut prev = Snapshot::default();
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        ticks += 1;
        if ticks < period {
            continue;
        }
        ticks = 0;

        let now = stats.snapshot(ring.overruns());
        println!("{}", now.format_delta(&prev));
        prev = now;
    }
}
