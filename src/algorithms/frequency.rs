//! Frequency algorithm - a personal "most used" list
//!
//! Counts visits per (user, page). Context is ignored.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{rank_by_count, PredictionAlgorithm, ProgressReporter, Weight};
use crate::models::{ContextData, NavigationEvent, SuggestedItem, TrainingProgress};

pub const FREQUENCY_NAME: &str = "Frequency";
pub const DEFAULT_FREQUENCY_WEIGHT: f64 = 1.0;

/// user -> page -> visit count
type VisitCounts = HashMap<String, HashMap<String, u32>>;

pub struct FrequencyAlgorithm {
    weight: Weight,
    visits: RwLock<VisitCounts>,
}

impl FrequencyAlgorithm {
    pub fn new() -> Self {
        Self::with_weight(DEFAULT_FREQUENCY_WEIGHT)
    }

    pub fn with_weight(weight: f64) -> Self {
        Self {
            weight: Weight::new(weight),
            visits: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for FrequencyAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PredictionAlgorithm for FrequencyAlgorithm {
    fn name(&self) -> &str {
        FREQUENCY_NAME
    }

    fn weight(&self) -> f64 {
        self.weight.get()
    }

    fn set_weight(&self, weight: f64) {
        self.weight.set(weight);
    }

    async fn train(&self, history: &[NavigationEvent], reporter: &dyn ProgressReporter) -> Result<()> {
        reporter.report(TrainingProgress::started(FREQUENCY_NAME, "Counting page visits"));

        let mut counts = VisitCounts::new();
        for event in history {
            if event.user_id.is_empty() {
                continue;
            }
            *counts
                .entry(event.user_id.clone())
                .or_default()
                .entry(event.current_page.clone())
                .or_insert(0) += 1;
        }

        *self.visits.write().await = counts;

        debug!("Frequency trained with {} events", history.len());
        reporter.report(TrainingProgress::completed(
            FREQUENCY_NAME,
            "Visit counts computed",
            Some(format!("Processed {} events.", history.len())),
        ));
        Ok(())
    }

    async fn predict(
        &self,
        user_id: &str,
        _current_context: Option<&str>,
        max_results: usize,
        _context_data: Option<&ContextData>,
    ) -> Vec<SuggestedItem> {
        let visits = self.visits.read().await;
        let Some(pages) = visits.get(user_id) else {
            return Vec::new();
        };

        let weight = self.weight();
        let suggestions: Vec<SuggestedItem> = rank_by_count(pages)
            .into_iter()
            .take(max_results)
            .map(|(page, count)| SuggestedItem::new(page.as_str(), count as f64 * weight, FREQUENCY_NAME))
            .collect();

        debug!("Frequency predicted {} items for '{}'", suggestions.len(), user_id);
        suggestions
    }
}
