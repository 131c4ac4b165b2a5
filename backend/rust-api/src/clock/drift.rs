use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{LocalClock, ServerClock};
use crate::metrics::{CLOCK_OFFSET_MS, CLOCK_SYNC_TOTAL};
use crate::utils::lock;

struct RefreshWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Keeps `offset = server - local` fresh so every "now" the engine reads is
/// corrected. A failed sample keeps the previous offset.
pub struct DriftCorrector {
    server: Arc<dyn ServerClock>,
    local: Arc<dyn LocalClock>,
    offset_ms: AtomicI64,
    refresh_interval: Duration,
    worker: Mutex<Option<RefreshWorker>>,
}

impl DriftCorrector {
    pub fn new(
        server: Arc<dyn ServerClock>,
        local: Arc<dyn LocalClock>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            server,
            local,
            offset_ms: AtomicI64::new(0),
            refresh_interval,
            worker: Mutex::new(None),
        }
    }

    pub fn offset(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }

    pub fn corrected_now(&self) -> DateTime<Utc> {
        self.local.now() + self.offset()
    }

    /// Samples the server clock once. Returns false when the sample failed.
    pub async fn refresh(&self) -> bool {
        let before = self.local.now();
        match self.server.now().await {
            Ok(server_now) => {
                let after = self.local.now();
                // Server reading is taken to be halfway through the round-trip
                let midpoint = before + (after - before) / 2;
                let offset = (server_now - midpoint).num_milliseconds();
                self.offset_ms.store(offset, Ordering::SeqCst);

                CLOCK_SYNC_TOTAL.with_label_values(&["success"]).inc();
                CLOCK_OFFSET_MS.set(offset);
                tracing::debug!(offset_ms = offset, "Server clock sampled");
                true
            }
            Err(e) => {
                CLOCK_SYNC_TOTAL.with_label_values(&["error"]).inc();
                tracing::warn!(
                    error = %e,
                    offset_ms = self.offset_ms.load(Ordering::SeqCst),
                    "Server clock sample failed, keeping last offset"
                );
                false
            }
        }
    }

    /// Fresh server time for decisions that must not rely on a stale offset.
    /// Falls back to the corrected local time when the server is unreachable.
    pub async fn authoritative_now(&self) -> DateTime<Utc> {
        self.refresh().await;
        self.corrected_now()
    }

    /// Samples eagerly, then keeps refreshing on the configured interval until [`stop`](Self::stop).
    pub async fn start(self: &Arc<Self>) {
        if lock(&self.worker).is_some() {
            return;
        }

        self.refresh().await;

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let period = this.refresh_interval;
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        this.refresh().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Clock drift refresher stopped");
        });

        tracing::info!(
            "Clock drift refresher started (interval {}s)",
            self.refresh_interval.as_secs()
        );

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            // Lost a concurrent start; keep the first refresher
            let _ = shutdown.send(true);
            return;
        }
        *worker = Some(RefreshWorker { shutdown, handle });
    }

    pub async fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(true);
            if let Err(e) = worker.handle.await {
                tracing::warn!("Clock drift refresher ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).is_some()
    }
}
