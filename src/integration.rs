//! Integration points supplied by the host application
//!
//! - NavigationCatalog: every page/feature the app can navigate to
//! - DesignFlowRulesProvider: static "from X, users usually go to Y" rules
//! - NavigationNotifier: receives the final suggestion list for display
//! - NavigationActionHandler: performs a real navigation on request

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::models::SuggestedItem;

/// Catalog of all navigable destinations. Used by the classifier to enumerate candidates.
pub trait NavigationCatalog: Send + Sync {
    fn available_navigation_items(&self) -> Vec<String>;
}

/// Source of design-flow rules, fetched once per training cycle.
/// Caching and staleness are the provider's concern.
#[async_trait]
pub trait DesignFlowRulesProvider: Send + Sync {
    async fn design_flow_rules(&self) -> Result<DesignFlowRules>;
}

/// Pushed the final ranking after every suggestion request
pub trait NavigationNotifier: Send + Sync {
    fn update_suggestions_display(&self, user_id: &str, suggestions: &[SuggestedItem]);
}

/// Performs a navigation in the host UI. Returns whether it happened.
pub trait NavigationActionHandler: Send + Sync {
    fn perform_navigation(&self, user_id: &str, item_name: &str) -> bool;
}

/// `context -> [related pages]` with case-insensitive keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignFlowRules {
    rules: HashMap<String, Vec<String>>,
}

impl DesignFlowRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add targets for a source page. A source seen twice (in any casing)
    /// gets the new targets appended, skipping ones it already has.
    pub fn insert(&mut self, source_page: &str, target_pages: impl IntoIterator<Item = String>) {
        let targets = self.rules.entry(source_page.to_lowercase()).or_default();
        for target in target_pages {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    pub fn get(&self, context: &str) -> Option<&[String]> {
        self.rules.get(&context.to_lowercase()).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for DesignFlowRules {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        let mut rules = DesignFlowRules::new();
        for (source, targets) in iter {
            rules.insert(&source, targets);
        }
        rules
    }
}

/// Notifier that writes suggestion updates to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NavigationNotifier for TracingNotifier {
    fn update_suggestions_display(&self, user_id: &str, suggestions: &[SuggestedItem]) {
        if suggestions.is_empty() {
            debug!("No suggestions to display for '{}'", user_id);
            return;
        }

        let summary: Vec<String> = suggestions
            .iter()
            .map(|s| format!("{} ({:.2}, {})", s.name, s.score, s.reason))
            .collect();
        info!("Suggestions for '{}': {}", user_id, summary.join(", "));
    }
}
