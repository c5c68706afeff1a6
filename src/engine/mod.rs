//! Prediction engine
//!
//! Owns the algorithm set and the training-mode state machine, and merges
//! per-algorithm predictions with user shortcuts into one ranking.
//!
//! Training triggers by mode:
//! - OnStartupOnce: one pass when built (see `EngineBuilder`)
//! - ContinuousDevelopment: after every recorded event
//! - BatchScheduled: interval timer or event-count threshold
//! - Manual: only `train_algorithms`
//! - Custom: host routine instead of the per-algorithm loop
//!
//! At most one training cycle runs at a time. A request that arrives while
//! one is running is skipped, not queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::algorithms::{PredictionAlgorithm, ProgressReporter};
use crate::error::Result;
use crate::integration::{NavigationActionHandler, NavigationCatalog, NavigationNotifier};
use crate::models::{
    ContextData, NavigationEvent, SuggestedItem, TrainingMode, TrainingProgress, USER_CUSTOM_REASON,
};
use crate::storage::{HistoryStore, PreferencesStore};

mod builder;
mod schedule;

pub use builder::EngineBuilder;
pub use schedule::{custom_logic, CustomTrainingLogic, TrainingFuture, TrainingStrategy};

pub const DEFAULT_SUGGESTION_COUNT: usize = 5;
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_BATCH_THRESHOLD: u32 = 50;

/// Custom shortcuts score `CUSTOM_SCORE_BASE + (item count - order)`
pub const CUSTOM_SCORE_BASE: f64 = 1000.0;

/// Progress name for engine-level events
pub const GLOBAL_PROGRESS: &str = "Global";
/// Progress name reported when custom training logic finishes
pub const CUSTOM_LOGIC_PROGRESS: &str = "CustomLogic";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Sent to every `subscribe()` receiver
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Progress(TrainingProgress),
    /// A training cycle finished without error
    TrainingCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingOutcome {
    Completed,
    /// Another cycle was already running
    Skipped,
    /// The error text, as also sent on the progress channel
    Failed(String),
}

#[derive(Debug, Default)]
struct TrainingState {
    in_progress: bool,
    events_since_training: u32,
    completed_cycles: u64,
}

pub(crate) struct EngineInner {
    history: Arc<dyn HistoryStore>,
    preferences: Arc<dyn PreferencesStore>,
    algorithms: RwLock<Vec<Arc<dyn PredictionAlgorithm>>>,
    catalog: StdRwLock<Option<Arc<dyn NavigationCatalog>>>,
    notifier: StdRwLock<Option<Arc<dyn NavigationNotifier>>>,
    action_handler: StdRwLock<Option<Arc<dyn NavigationActionHandler>>>,
    strategy: Mutex<TrainingStrategy>,
    /// In-progress flag and pending-event counter share this one lock
    state: Mutex<TrainingState>,
    batch_timer: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl ProgressReporter for EngineInner {
    fn report(&self, progress: TrainingProgress) {
        debug!(
            "[{}] {} ({}%){}",
            progress.algorithm_name,
            progress.current_step,
            progress.percentage,
            progress.message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
        );
        // No subscribers is fine
        let _ = self.events.send(EngineEvent::Progress(progress));
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let timer = self
            .batch_timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}

/// The state here is plain flags and counters, so a poisoned lock is still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T: Clone>(cell: &StdRwLock<Option<T>>) -> Option<T> {
    cell.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(cell: &StdRwLock<Option<T>>, value: T) {
    *cell.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
}

/// Clears the in-progress flag when the cycle ends, however it ends
struct TrainingGuard<'a> {
    inner: &'a EngineInner,
}

impl<'a> TrainingGuard<'a> {
    fn acquire(inner: &'a EngineInner) -> Option<Self> {
        let mut state = lock(&inner.state);
        if state.in_progress {
            return None;
        }
        state.in_progress = true;
        state.events_since_training = 0;
        Some(Self { inner })
    }
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.inner.state).in_progress = false;
    }
}

/// Cheap to clone; clones share the same engine
#[derive(Clone)]
pub struct PredictionEngine {
    inner: Arc<EngineInner>,
}

impl PredictionEngine {
    /// Engine with no algorithms, no collaborators and the default
    /// strategy (ContinuousDevelopment). `EngineBuilder` is the usual way
    /// to wire one up.
    pub fn new(history: Arc<dyn HistoryStore>, preferences: Arc<dyn PreferencesStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                history,
                preferences,
                algorithms: RwLock::new(Vec::new()),
                catalog: StdRwLock::new(None),
                notifier: StdRwLock::new(None),
                action_handler: StdRwLock::new(None),
                strategy: Mutex::new(TrainingStrategy::default()),
                state: Mutex::new(TrainingState::default()),
                batch_timer: Mutex::new(None),
                events,
            }),
        }
    }

    /// Progress and completion events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Append an algorithm. Catalog consumers get the current catalog right away.
    ///
    /// The list stays write-locked until the catalog is supplied, so a
    /// concurrent `set_navigation_catalog` either is seen here or reaches
    /// the new algorithm through the list afterwards.
    pub async fn add_algorithm(&self, algorithm: Arc<dyn PredictionAlgorithm>) {
        let mut algorithms = self.inner.algorithms.write().await;
        algorithms.push(Arc::clone(&algorithm));

        if let (Some(consumer), Some(catalog)) =
            (algorithm.as_catalog_consumer(), read(&self.inner.catalog))
        {
            consumer.set_navigation_catalog(catalog).await;
        }
        info!("Algorithm '{}' added", algorithm.name());
    }

    /// Set the catalog and push it to every registered catalog consumer
    pub async fn set_navigation_catalog(&self, catalog: Arc<dyn NavigationCatalog>) {
        write(&self.inner.catalog, Arc::clone(&catalog));
        let algorithms = self.inner.algorithms.read().await.clone();
        for algorithm in &algorithms {
            if let Some(consumer) = algorithm.as_catalog_consumer() {
                consumer.set_navigation_catalog(Arc::clone(&catalog)).await;
            }
        }
    }

    pub fn set_notifier(&self, notifier: Arc<dyn NavigationNotifier>) {
        write(&self.inner.notifier, notifier);
    }

    pub fn set_action_handler(&self, handler: Arc<dyn NavigationActionHandler>) {
        write(&self.inner.action_handler, handler);
    }

    /// Switch training mode. Replaces any running batch timer; switching to
    /// BatchScheduled starts a new one, so this must run inside a Tokio runtime.
    /// OnStartupOnce does not train from here; `EngineBuilder::build` does.
    pub fn set_training_strategy(&self, strategy: TrainingStrategy) {
        let timer = (strategy.mode == TrainingMode::BatchScheduled).then(|| {
            schedule::spawn_batch_timer(Arc::downgrade(&self.inner), strategy.effective_interval())
        });
        if let Some(previous) = std::mem::replace(&mut *lock(&self.inner.batch_timer), timer) {
            previous.abort();
        }

        info!("Training strategy set to {}", strategy.mode);
        *lock(&self.inner.strategy) = strategy;
    }

    pub fn training_mode(&self) -> TrainingMode {
        lock(&self.inner.strategy).mode
    }

    pub fn is_training_in_progress(&self) -> bool {
        lock(&self.inner.state).in_progress
    }

    /// Events recorded since the last training cycle started
    pub fn pending_event_count(&self) -> u32 {
        lock(&self.inner.state).events_since_training
    }

    pub fn completed_training_cycles(&self) -> u64 {
        lock(&self.inner.state).completed_cycles
    }

    pub async fn algorithm_names(&self) -> Vec<String> {
        self.inner
            .algorithms
            .read()
            .await
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Store the event, then trigger training as the current mode dictates.
    /// Triggered training runs in the background; this never waits for it.
    pub async fn record_navigation(&self, event: NavigationEvent) -> Result<()> {
        self.inner.history.add_event(event).await?;

        let (mode, threshold) = {
            let strategy = lock(&self.inner.strategy);
            (strategy.mode, strategy.effective_threshold())
        };

        match mode {
            TrainingMode::ContinuousDevelopment => {
                if self.is_training_in_progress() {
                    debug!("Training already running, event picked up next cycle");
                } else {
                    self.spawn_training();
                }
            }
            TrainingMode::BatchScheduled => {
                let pending = {
                    let mut state = lock(&self.inner.state);
                    state.events_since_training += 1;
                    state.events_since_training
                };
                if pending >= threshold {
                    info!("Batch threshold reached ({} >= {}), training", pending, threshold);
                    self.spawn_training();
                }
            }
            TrainingMode::OnStartupOnce | TrainingMode::Manual | TrainingMode::Custom => {}
        }
        Ok(())
    }

    /// Fire-and-forget training. The handle can be awaited but need not be.
    pub fn spawn_training(&self) -> JoinHandle<TrainingOutcome> {
        let engine = self.clone();
        tokio::spawn(async move { engine.train_algorithms().await })
    }

    /// Run one training cycle. Errors are reported on the progress channel
    /// and returned as `Failed`, never raised.
    pub async fn train_algorithms(&self) -> TrainingOutcome {
        let Some(guard) = TrainingGuard::acquire(&self.inner) else {
            info!("Training already in progress, skipping request");
            return TrainingOutcome::Skipped;
        };

        info!("Starting training cycle");
        self.inner.report(
            TrainingProgress::started(GLOBAL_PROGRESS, "Training started")
                .with_message("Preparing historical data..."),
        );

        let (mode, custom) = {
            let strategy = lock(&self.inner.strategy);
            (strategy.mode, strategy.custom_logic.clone())
        };

        let result = match (mode, custom) {
            (TrainingMode::Custom, Some(logic)) => self.run_custom(logic).await,
            (TrainingMode::Custom, None) => {
                warn!("Custom training mode has no logic, using the standard loop");
                self.run_standard().await
            }
            _ => self.run_standard().await,
        };

        match result {
            Ok(()) => {
                let cycles = {
                    let mut state = lock(&self.inner.state);
                    state.completed_cycles += 1;
                    state.completed_cycles
                };
                drop(guard);
                info!("Training cycle {} completed", cycles);
                let _ = self.inner.events.send(EngineEvent::TrainingCompleted);
                TrainingOutcome::Completed
            }
            Err(e) => {
                error!("Training failed: {:#}", e);
                let message = e.to_string();
                self.inner.report(TrainingProgress::completed(
                    GLOBAL_PROGRESS,
                    "Training failed",
                    Some(format!("Error: {}", message)),
                ));
                TrainingOutcome::Failed(message)
            }
        }
    }

    async fn run_custom(&self, logic: CustomTrainingLogic) -> anyhow::Result<()> {
        logic().await?;
        self.inner.report(TrainingProgress::completed(CUSTOM_LOGIC_PROGRESS, "Custom logic finished", None));
        Ok(())
    }

    async fn run_standard(&self) -> anyhow::Result<()> {
        let history = self.inner.history.all_history(None).await?;
        let algorithms = self.inner.algorithms.read().await.clone();
        let total = algorithms.len();

        for (index, algorithm) in algorithms.iter().enumerate() {
            debug!("Training algorithm '{}' on {} events", algorithm.name(), history.len());
            algorithm.train(&history, &*self.inner).await?;

            // Coarse update: share of algorithms done so far
            let done = index + 1;
            self.inner.report(TrainingProgress::new(
                algorithm.name(),
                "Training complete",
                (done * 100 / total) as u8,
                true,
                Some(format!("Algorithm {} finished ({} of {}).", algorithm.name(), done, total)),
            ));
        }
        Ok(())
    }

    /// Merged ranking for a user: every algorithm's candidates plus the
    /// user's shortcuts, highest score per name, top `count`.
    pub async fn get_suggestions(
        &self,
        user_id: &str,
        current_context: Option<&str>,
        count: usize,
        context_data: Option<&ContextData>,
    ) -> Result<Vec<SuggestedItem>> {
        let algorithms = self.inner.algorithms.read().await.clone();
        let mut ranking = Ranking::default();

        for algorithm in &algorithms {
            for item in algorithm.predict(user_id, current_context, count, context_data).await {
                ranking.offer(item);
            }
        }

        let shortcuts = self.inner.preferences.all(user_id).await?;
        let total = shortcuts.len() as f64;
        for shortcut in shortcuts {
            let score = CUSTOM_SCORE_BASE + (total - shortcut.order as f64);
            ranking.offer(SuggestedItem::new(shortcut.item_name, score, USER_CUSTOM_REASON));
        }

        let suggestions = ranking.top(count);
        debug!(
            "Suggestions for '{}': {}",
            user_id,
            suggestions
                .iter()
                .map(|s| format!("{} ({:.2}, {})", s.name, s.score, s.reason))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if let Some(notifier) = read(&self.inner.notifier) {
            notifier.update_suggestions_display(user_id, &suggestions);
        }
        Ok(suggestions)
    }

    /// Ask the host to navigate. False when no handler is configured.
    pub fn perform_suggested_navigation(&self, user_id: &str, item_name: &str) -> bool {
        match read(&self.inner.action_handler) {
            Some(handler) => handler.perform_navigation(user_id, item_name),
            None => {
                warn!("No navigation action handler configured");
                false
            }
        }
    }
}

/// Name-keyed merge that remembers first-seen order.
/// A later item replaces an earlier one only with a strictly higher score.
#[derive(Default)]
struct Ranking {
    items: Vec<SuggestedItem>,
    positions: HashMap<String, usize>,
}

impl Ranking {
    fn offer(&mut self, item: SuggestedItem) {
        match self.positions.get(&item.name) {
            Some(&position) => {
                if self.items[position].score < item.score {
                    self.items[position] = item;
                }
            }
            None => {
                self.positions.insert(item.name.clone(), self.items.len());
                self.items.push(item);
            }
        }
    }

    /// Stable sort: equal scores keep first-seen order
    fn top(mut self, count: usize) -> Vec<SuggestedItem> {
        self.items.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.items.truncate(count);
        self.items
    }
}
