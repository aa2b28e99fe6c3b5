//! Bridge reachability monitor
//!
//! Probes the bridge status endpoint on a fixed cadence and maintains a
//! boolean "reachable" indicator for display. The probe is read-only: it
//! never touches slot contents, and probe failures only flip the flag —
//! they are not errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bridge::BridgeClient;

/// Background service deriving a reachability flag from periodic probes.
pub struct BridgeMonitor {
    client: Arc<BridgeClient>,
    interval: Duration,
    reachable: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl BridgeMonitor {
    /// Create a monitor probing the given bridge base URL.
    pub fn new(base_url: &str, interval_secs: u64) -> Self {
        Self {
            client: Arc::new(BridgeClient::new(base_url)),
            interval: Duration::from_secs(interval_secs.max(1)),
            reachable: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current reachability indicator.
    pub fn reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Shared handle to the indicator, for display surfaces.
    pub fn reachable_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reachable)
    }

    /// Whether the probe loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the probe loop (idempotent).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("bridge monitor already running");
            return;
        }

        let client = Arc::clone(&self.client);
        let reachable = Arc::clone(&self.reachable);
        let running = Arc::clone(&self.running);
        let interval = self.interval;

        info!(
            url = %client.base_url(),
            interval_secs = interval.as_secs(),
            "bridge monitor started"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    info!("bridge monitor stopped");
                    break;
                }

                let up = client.probe().await;
                let was_up = reachable.swap(up, Ordering::SeqCst);
                if up != was_up {
                    if up {
                        info!("bridge reachable");
                    } else {
                        warn!("bridge unreachable");
                    }
                }
            }
        });
    }

    /// Stop the probe loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
