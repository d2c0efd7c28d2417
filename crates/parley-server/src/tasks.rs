//! Background loops: heartbeat fan-out and expiry sweep.
//!
//! Both run on their own fixed interval until the shutdown channel fires. A
//! failed iteration is logged and the loop carries on at the next tick.

use crate::auth::RateLimiter;
use crate::otp::OtpStore;
use crate::relay::PeerRegistry;
use parley_core::Packet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Broadcast one heartbeat and evict every peer whose write failed.
/// Returns the number of evicted peers.
pub async fn heartbeat_tick(registry: &PeerRegistry) -> usize {
    let report = match registry.broadcast(&Packet::heartbeat()).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "heartbeat broadcast failed");
            return 0;
        }
    };

    let mut evicted = 0;
    for id in report.failed {
        if registry.remove(id).await {
            evicted += 1;
        }
    }
    if evicted > 0 {
        let remaining = registry.count().await;
        info!(evicted, remaining, "evicted unresponsive peers");
    } else {
        debug!(delivered = report.delivered, "heartbeat");
    }
    evicted
}

/// Drop expired tickets and idle rate-limit entries.
pub async fn sweep_tick(otp: &OtpStore, limiter: &Mutex<RateLimiter>) -> usize {
    let expired = otp.sweep().await;
    let idle = limiter.lock().await.gc();
    if expired > 0 || idle > 0 {
        debug!(expired, idle, "sweep");
    }
    expired
}

pub fn spawn_heartbeat(
    registry: Arc<PeerRegistry>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    heartbeat_tick(&registry).await;
                }
                _ = shutdown.recv() => {
                    debug!("heartbeat loop stopped");
                    break;
                }
            }
        }
    })
}

pub fn spawn_sweep(
    otp: Arc<OtpStore>,
    limiter: Arc<Mutex<RateLimiter>>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_tick(&otp, &limiter).await;
                }
                _ = shutdown.recv() => {
                    debug!("sweep loop stopped");
                    break;
                }
            }
        }
    })
}
