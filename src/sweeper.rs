//! Background services: hold expiry and WAL compaction.
//!
//! Both run a single ticking loop (ticks never overlap) and are owned by the
//! process entry point through explicit `start()` / `stop()`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::observability;

pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// A running periodic loop plus the means to stop it.
struct Ticker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// First tick fires immediately, then every `period`. A slow tick delays
    /// the next one instead of bunching up.
    fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            info!(task = name, period_ms = period.as_millis() as u64, "background task started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!(task = name, "background task stopped");
        });
        Self { shutdown, handle }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("background task ended abnormally: {e}");
        }
    }
}

/// Periodically demotes lapsed holds to `expired`.
pub struct ExpirySweeper {
    engine: Arc<Engine>,
    period: Duration,
    ticker: Option<Ticker>,
}

impl ExpirySweeper {
    pub fn new(engine: Arc<Engine>, period: Duration) -> Self {
        Self {
            engine,
            period,
            ticker: None,
        }
    }

    /// Spawn the sweep loop. No-op if already running.
    pub fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let engine = self.engine.clone();
        self.ticker = Some(Ticker::spawn("expiry_sweeper", self.period, move || {
            let engine = engine.clone();
            async move { sweep_once(&engine).await }
        }));
    }

    /// Signal the loop and wait for it to exit. An in-flight tick finishes first.
    pub async fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }
}

async fn sweep_once(engine: &Engine) {
    let started = Instant::now();
    match engine.sweep_expired_holds().await {
        Ok(0) => debug!("sweep: no lapsed holds"),
        Ok(_) => {}
        Err(e) => {
            metrics::counter!(observability::SWEEP_FAILURES_TOTAL).increment(1);
            error!("sweep failed: {e}");
        }
    }
    metrics::histogram!(observability::SWEEP_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
}

/// Periodically rewrites the WAL once enough appends have accumulated.
pub struct WalCompactor {
    engine: Arc<Engine>,
    period: Duration,
    threshold: u64,
    ticker: Option<Ticker>,
}

impl WalCompactor {
    pub fn new(engine: Arc<Engine>, period: Duration, threshold: u64) -> Self {
        Self {
            engine,
            period,
            threshold,
            ticker: None,
        }
    }

    pub fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let engine = self.engine.clone();
        let threshold = self.threshold;
        self.ticker = Some(Ticker::spawn("wal_compactor", self.period, move || {
            let engine = engine.clone();
            async move { compact_if_needed(&engine, threshold).await }
        }));
    }

    pub async fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }
}

async fn compact_if_needed(engine: &Engine, threshold: u64) {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            debug!(appends, "compaction complete");
        }
        Err(e) => error!("WAL compaction failed: {e}"),
    }
}
