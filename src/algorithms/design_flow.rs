//! Design-flow algorithm - static "from this page, users usually go to" rules
//!
//! Not learned from events: each training cycle fetches the current rule
//! set from the provider.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{non_empty, PredictionAlgorithm, ProgressReporter, Weight};
use crate::integration::{DesignFlowRules, DesignFlowRulesProvider};
use crate::models::{ContextData, NavigationEvent, SuggestedItem, TrainingProgress};

pub const DESIGN_FLOW_NAME: &str = "DesignFlow";
pub const DEFAULT_DESIGN_FLOW_WEIGHT: f64 = 0.7;

/// Every rule target gets the same base score
const RULE_SCORE: f64 = 1.0;

pub struct DesignFlowAlgorithm {
    weight: Weight,
    provider: Arc<dyn DesignFlowRulesProvider>,
    /// None until the first training cycle
    rules: RwLock<Option<DesignFlowRules>>,
}

impl DesignFlowAlgorithm {
    pub fn new(provider: Arc<dyn DesignFlowRulesProvider>) -> Self {
        Self::with_weight(provider, DEFAULT_DESIGN_FLOW_WEIGHT)
    }

    pub fn with_weight(provider: Arc<dyn DesignFlowRulesProvider>, weight: f64) -> Self {
        Self {
            weight: Weight::new(weight),
            provider,
            rules: RwLock::new(None),
        }
    }
}

#[async_trait]
impl PredictionAlgorithm for DesignFlowAlgorithm {
    fn name(&self) -> &str {
        DESIGN_FLOW_NAME
    }

    fn weight(&self) -> f64 {
        self.weight.get()
    }

    fn set_weight(&self, weight: f64) {
        self.weight.set(weight);
    }

    async fn train(&self, _history: &[NavigationEvent], reporter: &dyn ProgressReporter) -> Result<()> {
        reporter.report(TrainingProgress::started(DESIGN_FLOW_NAME, "Loading design-flow rules"));

        let rules = self.provider.design_flow_rules().await?;
        let count = rules.len();
        *self.rules.write().await = Some(rules);

        debug!("DesignFlow loaded {} rules", count);
        reporter.report(TrainingProgress::completed(
            DESIGN_FLOW_NAME,
            "Design-flow rules loaded",
            Some(format!("Loaded {} rules.", count)),
        ));
        Ok(())
    }

    async fn predict(
        &self,
        _user_id: &str,
        current_context: Option<&str>,
        _max_results: usize,
        _context_data: Option<&ContextData>,
    ) -> Vec<SuggestedItem> {
        let guard = self.rules.read().await;
        let (Some(rules), Some(context)) = (guard.as_ref(), non_empty(current_context)) else {
            debug!("DesignFlow rules not loaded or context missing");
            return Vec::new();
        };

        let score = RULE_SCORE * self.weight();
        let suggestions: Vec<SuggestedItem> = rules
            .get(context)
            .unwrap_or_default()
            .iter()
            .map(|page| SuggestedItem::new(page.as_str(), score, DESIGN_FLOW_NAME))
            .collect();

        debug!("DesignFlow predicted {} items for '{}'", suggestions.len(), context);
        suggestions
    }
}
