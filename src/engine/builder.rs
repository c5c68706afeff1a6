//! Wiring an engine together

use std::sync::Arc;
use tracing::{info, warn};

use super::{PredictionEngine, TrainingStrategy};
use crate::algorithms::PredictionAlgorithm;
use crate::integration::{NavigationActionHandler, NavigationCatalog, NavigationNotifier};
use crate::models::TrainingMode;
use crate::storage::{HistoryStore, InMemoryHistoryStore, InMemoryPreferencesStore, PreferencesStore};

/// Collects stores, algorithms and collaborators, then builds the engine.
///
/// Missing stores default to in-memory ones. Missing collaborators are
/// logged once at build time and otherwise degrade quietly.
#[derive(Default)]
pub struct EngineBuilder {
    history: Option<Arc<dyn HistoryStore>>,
    preferences: Option<Arc<dyn PreferencesStore>>,
    algorithms: Vec<Arc<dyn PredictionAlgorithm>>,
    catalog: Option<Arc<dyn NavigationCatalog>>,
    notifier: Option<Arc<dyn NavigationNotifier>>,
    action_handler: Option<Arc<dyn NavigationActionHandler>>,
    strategy: TrainingStrategy,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn preferences_store(mut self, store: Arc<dyn PreferencesStore>) -> Self {
        self.preferences = Some(store);
        self
    }

    /// One backend for both stores
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: HistoryStore + PreferencesStore + 'static,
    {
        let history: Arc<dyn HistoryStore> = store.clone();
        let preferences: Arc<dyn PreferencesStore> = store;
        self.history_store(history).preferences_store(preferences)
    }

    /// Algorithms are queried in the order they are added
    pub fn algorithm(mut self, algorithm: Arc<dyn PredictionAlgorithm>) -> Self {
        self.algorithms.push(algorithm);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn NavigationCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NavigationNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn action_handler(mut self, handler: Arc<dyn NavigationActionHandler>) -> Self {
        self.action_handler = Some(handler);
        self
    }

    pub fn training_strategy(mut self, strategy: TrainingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build and apply the strategy. With OnStartupOnce this launches the
    /// single background training pass, so it must run inside a Tokio runtime.
    pub async fn build(self) -> PredictionEngine {
        let history = self.history.unwrap_or_else(|| {
            info!("No history store configured, using in-memory history");
            Arc::new(InMemoryHistoryStore::new())
        });
        let preferences = self.preferences.unwrap_or_else(|| {
            info!("No preferences store configured, using in-memory preferences");
            Arc::new(InMemoryPreferencesStore::new())
        });

        let engine = PredictionEngine::new(history, preferences);

        match self.notifier {
            Some(notifier) => engine.set_notifier(notifier),
            None => warn!("No navigation notifier configured, suggestions will not be pushed"),
        }
        match self.action_handler {
            Some(handler) => engine.set_action_handler(handler),
            None => warn!("No navigation action handler configured, suggested navigation is disabled"),
        }
        match self.catalog {
            Some(catalog) => engine.set_navigation_catalog(catalog).await,
            None => warn!("No navigation catalog configured, the classifier will use its trained labels"),
        }

        if self.algorithms.is_empty() {
            warn!("No prediction algorithms registered, only custom shortcuts will be suggested");
        }
        for algorithm in self.algorithms {
            engine.add_algorithm(algorithm).await;
        }

        let train_now = self.strategy.mode == TrainingMode::OnStartupOnce;
        engine.set_training_strategy(self.strategy);
        if train_now {
            info!("Running startup training");
            engine.spawn_training();
        }

        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::FrequencyAlgorithm;
    use crate::engine::EngineEvent;
    use crate::models::NavigationEvent;

    #[tokio::test]
    async fn test_defaults_to_in_memory_stores() {
        let engine = EngineBuilder::new()
            .algorithm(Arc::new(FrequencyAlgorithm::new()))
            .training_strategy(TrainingStrategy::manual())
            .build()
            .await;

        engine.record_navigation(NavigationEvent::new("u", "Home")).await.unwrap();
        engine.train_algorithms().await;

        let suggestions = engine.get_suggestions("u", None, 5, None).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(engine.algorithm_names().await, vec!["Frequency"]);
        assert_eq!(engine.training_mode(), TrainingMode::Manual);
    }

    #[tokio::test]
    async fn test_startup_training_runs_once() {
        let engine = EngineBuilder::new()
            .algorithm(Arc::new(FrequencyAlgorithm::new()))
            .training_strategy(TrainingStrategy::on_startup_once())
            .build()
            .await;
        let mut events = engine.subscribe();

        loop {
            if let EngineEvent::TrainingCompleted = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(engine.completed_training_cycles(), 1);

        engine.record_navigation(NavigationEvent::new("u", "Home")).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(engine.completed_training_cycles(), 1);
    }
}
