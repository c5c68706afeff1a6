//! Prediction algorithms
//!
//! Each algorithm is trained independently on the full event history and
//! queried independently at suggestion time. The engine merges their output.
//!
//! Default weights reflect relative trust:
//! - Frequency: 1.0 (personal "most used" list)
//! - MarkovChain: 1.5 (sequence aware)
//! - DesignFlow: 0.7 (static rules)
//! - Classifier: 2.0 (learned model)

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::integration::NavigationCatalog;
use crate::models::{ContextData, NavigationEvent, SuggestedItem, TrainingProgress};

pub mod classifier;
mod design_flow;
mod frequency;
mod markov;

pub use classifier::{ClassifierAlgorithm, CLASSIFIER_NAME, DEFAULT_CLASSIFIER_WEIGHT};
pub use design_flow::{DesignFlowAlgorithm, DEFAULT_DESIGN_FLOW_WEIGHT, DESIGN_FLOW_NAME};
pub use frequency::{FrequencyAlgorithm, DEFAULT_FREQUENCY_WEIGHT, FREQUENCY_NAME};
pub use markov::{MarkovChainAlgorithm, DEFAULT_MARKOV_WEIGHT, MARKOV_NAME};

/// Sink for training progress events
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: TrainingProgress);
}

/// A pluggable prediction strategy
///
/// `train` rebuilds the model from scratch on every call and never fails on
/// empty input. `predict` returns an empty list (never an error) when the
/// model is untrained, the user is unknown, or a required context is missing.
#[async_trait]
pub trait PredictionAlgorithm: Send + Sync {
    fn name(&self) -> &str;

    /// Multiplier applied to raw scores before aggregation
    fn weight(&self) -> f64;

    fn set_weight(&self, weight: f64);

    async fn train(&self, history: &[NavigationEvent], reporter: &dyn ProgressReporter) -> Result<()>;

    async fn predict(
        &self,
        user_id: &str,
        current_context: Option<&str>,
        max_results: usize,
        context_data: Option<&ContextData>,
    ) -> Vec<SuggestedItem>;

    /// Algorithms that enumerate candidates from the navigation catalog
    /// expose that capability here.
    fn as_catalog_consumer(&self) -> Option<&dyn CatalogConsumer> {
        None
    }
}

/// Secondary capability: accepts the host's navigation catalog
#[async_trait]
pub trait CatalogConsumer: Send + Sync {
    async fn set_navigation_catalog(&self, catalog: Arc<dyn NavigationCatalog>);
}

/// Lock-free f64 cell for the mutable per-algorithm weight
#[derive(Debug)]
pub(crate) struct Weight(AtomicU64);

impl Weight {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Context filter shared by the context-dependent algorithms
pub(crate) fn non_empty(context: Option<&str>) -> Option<&str> {
    context.filter(|c| !c.is_empty())
}

/// Sort by descending count, then by name so equal counts stay stable across calls
pub(crate) fn rank_by_count<'a, I>(counts: I) -> Vec<(&'a String, u32)>
where
    I: IntoIterator<Item = (&'a String, &'a u32)>,
{
    let mut ranked: Vec<(&String, u32)> = counts.into_iter().map(|(k, v)| (k, *v)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Reporter that keeps every event for assertions
    #[derive(Default)]
    pub struct RecordingReporter {
        pub events: Mutex<Vec<TrainingProgress>>,
    }

    impl RecordingReporter {
        pub fn events(&self) -> Vec<TrainingProgress> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for RecordingReporter {
        fn report(&self, progress: TrainingProgress) {
            self.events.lock().unwrap().push(progress);
        }
    }

    /// Assert the reporter saw a 0% start and a completed 100% finish
    pub fn assert_start_and_finish(reporter: &RecordingReporter, name: &str) {
        let events = reporter.events();
        let first = events.first().expect("no progress reported");
        let last = events.last().expect("no progress reported");
        assert_eq!(first.algorithm_name, name);
        assert_eq!(first.percentage, 0);
        assert!(!first.is_completed);
        assert_eq!(last.algorithm_name, name);
        assert_eq!(last.percentage, 100);
        assert!(last.is_completed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_roundtrip() {
        let weight = Weight::new(1.5);
        assert_eq!(weight.get(), 1.5);
        weight.set(0.25);
        assert_eq!(weight.get(), 0.25);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("Home")), Some("Home"));
        assert_eq!(non_empty(Some("")), None);
        assert_eq!(non_empty(None), None);
    }
}
