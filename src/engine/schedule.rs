//! Training strategy and the batch interval timer

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::{EngineInner, PredictionEngine, DEFAULT_BATCH_INTERVAL, DEFAULT_BATCH_THRESHOLD};
use crate::models::TrainingMode;

pub type TrainingFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Host routine run in place of the per-algorithm loop in Custom mode
pub type CustomTrainingLogic = Arc<dyn Fn() -> TrainingFuture + Send + Sync>;

/// Wrap an async closure as custom training logic
pub fn custom_logic<F, Fut>(f: F) -> CustomTrainingLogic
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// When and how the engine retrains on its own
#[derive(Clone)]
pub struct TrainingStrategy {
    pub mode: TrainingMode,
    /// Only used in Custom mode
    pub custom_logic: Option<CustomTrainingLogic>,
    /// Only used in BatchScheduled mode
    pub batch_interval: Duration,
    /// Only used in BatchScheduled mode
    pub batch_threshold: u32,
}

impl TrainingStrategy {
    pub fn new(mode: TrainingMode) -> Self {
        Self {
            mode,
            custom_logic: None,
            batch_interval: DEFAULT_BATCH_INTERVAL,
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
        }
    }

    pub fn manual() -> Self {
        Self::new(TrainingMode::Manual)
    }

    pub fn on_startup_once() -> Self {
        Self::new(TrainingMode::OnStartupOnce)
    }

    pub fn continuous() -> Self {
        Self::new(TrainingMode::ContinuousDevelopment)
    }

    pub fn batch_scheduled(interval: Option<Duration>, threshold: Option<u32>) -> Self {
        Self {
            batch_interval: interval.unwrap_or(DEFAULT_BATCH_INTERVAL),
            batch_threshold: threshold.unwrap_or(DEFAULT_BATCH_THRESHOLD),
            ..Self::new(TrainingMode::BatchScheduled)
        }
    }

    pub fn custom(logic: CustomTrainingLogic) -> Self {
        Self {
            custom_logic: Some(logic),
            ..Self::new(TrainingMode::Custom)
        }
    }

    /// Threshold used for triggering; 0 behaves like 1
    pub(super) fn effective_threshold(&self) -> u32 {
        self.batch_threshold.max(1)
    }

    /// Interval used for the timer; zero falls back to the default
    pub(super) fn effective_interval(&self) -> Duration {
        if self.batch_interval.is_zero() {
            DEFAULT_BATCH_INTERVAL
        } else {
            self.batch_interval
        }
    }
}

impl Default for TrainingStrategy {
    fn default() -> Self {
        Self::new(TrainingMode::default())
    }
}

impl fmt::Debug for TrainingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainingStrategy")
            .field("mode", &self.mode)
            .field("custom_logic", &self.custom_logic.as_ref().map(|_| "<fn>"))
            .field("batch_interval", &self.batch_interval)
            .field("batch_threshold", &self.batch_threshold)
            .finish()
    }
}

/// Train every `interval`, first tick one full interval from now.
/// Holds only a weak reference so the timer never keeps the engine alive.
pub(super) fn spawn_batch_timer(engine: Weak<EngineInner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = engine.upgrade() else {
                break;
            };
            debug!("Batch interval elapsed, starting scheduled training");
            PredictionEngine { inner }.train_algorithms().await;
        }
    })
}
