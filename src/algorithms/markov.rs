//! First-order Markov chain over page transitions, per user
//!
//! Events are replayed in timestamp order regardless of input order.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{non_empty, rank_by_count, PredictionAlgorithm, ProgressReporter, Weight};
use crate::models::{ContextData, NavigationEvent, SuggestedItem, TrainingProgress};

pub const MARKOV_NAME: &str = "MarkovChain";
pub const DEFAULT_MARKOV_WEIGHT: f64 = 1.5;

/// user -> source page -> destination page -> count
type Transitions = HashMap<String, HashMap<String, HashMap<String, u32>>>;

pub struct MarkovChainAlgorithm {
    weight: Weight,
    transitions: RwLock<Transitions>,
}

impl MarkovChainAlgorithm {
    pub fn new() -> Self {
        Self::with_weight(DEFAULT_MARKOV_WEIGHT)
    }

    pub fn with_weight(weight: f64) -> Self {
        Self {
            weight: Weight::new(weight),
            transitions: RwLock::new(HashMap::new()),
        }
    }

    /// Raw transition count, mostly for diagnostics
    pub async fn transition_count(&self, user_id: &str, from: &str, to: &str) -> u32 {
        self.transitions
            .read()
            .await
            .get(user_id)
            .and_then(|sources| sources.get(from))
            .and_then(|destinations| destinations.get(to))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MarkovChainAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PredictionAlgorithm for MarkovChainAlgorithm {
    fn name(&self) -> &str {
        MARKOV_NAME
    }

    fn weight(&self) -> f64 {
        self.weight.get()
    }

    fn set_weight(&self, weight: f64) {
        self.weight.set(weight);
    }

    async fn train(&self, history: &[NavigationEvent], reporter: &dyn ProgressReporter) -> Result<()> {
        reporter.report(TrainingProgress::started(MARKOV_NAME, "Computing transitions"));

        // Stable sort: events sharing a timestamp keep their recorded order
        let mut ordered: Vec<&NavigationEvent> = history.iter().collect();
        ordered.sort_by_key(|e| e.timestamp);

        let mut transitions = Transitions::new();
        for event in ordered {
            let Some(source) = event.previous() else {
                continue;
            };
            *transitions
                .entry(event.user_id.clone())
                .or_default()
                .entry(source.to_string())
                .or_default()
                .entry(event.current_page.clone())
                .or_insert(0) += 1;
        }

        *self.transitions.write().await = transitions;

        debug!("MarkovChain trained with {} events", history.len());
        reporter.report(TrainingProgress::completed(
            MARKOV_NAME,
            "Transitions computed",
            Some(format!("Processed {} events.", history.len())),
        ));
        Ok(())
    }

    async fn predict(
        &self,
        user_id: &str,
        current_context: Option<&str>,
        max_results: usize,
        _context_data: Option<&ContextData>,
    ) -> Vec<SuggestedItem> {
        let Some(context) = non_empty(current_context) else {
            return Vec::new();
        };

        let transitions = self.transitions.read().await;
        let Some(destinations) = transitions.get(user_id).and_then(|s| s.get(context)) else {
            return Vec::new();
        };

        let total: u32 = destinations.values().sum();
        if total == 0 {
            return Vec::new();
        }

        // Probability is monotonic in count for a fixed source, so ranking by count is enough
        let weight = self.weight();
        let suggestions: Vec<SuggestedItem> = rank_by_count(destinations)
            .into_iter()
            .take(max_results)
            .map(|(page, count)| {
                let probability = count as f64 / total as f64;
                SuggestedItem::new(page.as_str(), probability * weight, MARKOV_NAME)
            })
            .collect();

        debug!(
            "MarkovChain predicted {} items for '{}' from '{}'",
            suggestions.len(),
            user_id,
            context
        );
        suggestions
    }
}
