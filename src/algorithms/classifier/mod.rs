//! Classifier algorithm - learned next-page model
//!
//! Training pairs each event with the user's next event (by timestamp) and
//! fits a softmax model on (user, current page, previous page, hour, weekday)
//! to predict where the user goes next. The fitted model is persisted so a
//! restart can predict before the first training cycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{non_empty, CatalogConsumer, PredictionAlgorithm, ProgressReporter, Weight};
use crate::integration::NavigationCatalog;
use crate::models::{ContextData, NavigationEvent, SuggestedItem, TrainingProgress};

mod model;

pub use model::{ClassifierInput, SoftmaxModel, TrainingOptions, TrainingSample};

pub const CLASSIFIER_NAME: &str = "Classifier";
pub const DEFAULT_CLASSIFIER_WEIGHT: f64 = 2.0;
pub const DEFAULT_MODEL_FILE: &str = "navigation_model.json";

/// Context key read at prediction time for the previous page
pub const PREVIOUS_PAGE_KEY: &str = "PreviousPage";
/// Stand-in when there is no previous page
pub const NO_PREVIOUS_PAGE: &str = "NONE";

/// `navigation_model.json` next to the running executable
pub fn default_model_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_MODEL_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_FILE))
}

pub struct ClassifierAlgorithm {
    weight: Weight,
    model_path: PathBuf,
    options: TrainingOptions,
    model: RwLock<Option<Arc<SoftmaxModel>>>,
    catalog: RwLock<Option<Arc<dyn NavigationCatalog>>>,
}

impl ClassifierAlgorithm {
    pub fn new() -> Self {
        Self::with_model_path(default_model_path())
    }

    /// Loads a previously persisted model from `path` if one exists.
    /// A missing or unreadable file just means "untrained".
    pub fn with_model_path(path: impl Into<PathBuf>) -> Self {
        let model_path = path.into();
        let model = load_model(&model_path).map(Arc::new);

        Self {
            weight: Weight::new(DEFAULT_CLASSIFIER_WEIGHT),
            model_path,
            options: TrainingOptions::default(),
            model: RwLock::new(model),
            catalog: RwLock::new(None),
        }
    }

    pub fn with_options(mut self, options: TrainingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub async fn is_trained(&self) -> bool {
        self.model.read().await.is_some()
    }
}

impl Default for ClassifierAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}

fn load_model(path: &Path) -> Option<SoftmaxModel> {
    match SoftmaxModel::load(path) {
        Ok(Some(model)) => {
            info!(
                "Loaded classifier model from {:?} ({} samples)",
                path,
                model.sample_count()
            );
            Some(model)
        }
        Ok(None) => {
            debug!("No classifier model at {:?}, a new one will be trained", path);
            None
        }
        Err(e) => {
            warn!("Failed to load classifier model from {:?}: {}. A new one will be trained", path, e);
            None
        }
    }
}

/// Pair every event with the same user's next event, in timestamp order
pub(crate) fn build_samples(history: &[NavigationEvent]) -> Vec<TrainingSample> {
    let mut by_user: BTreeMap<&str, Vec<&NavigationEvent>> = BTreeMap::new();
    for event in history {
        by_user.entry(event.user_id.as_str()).or_default().push(event);
    }

    let mut samples = Vec::new();
    for events in by_user.values_mut() {
        events.sort_by_key(|e| e.timestamp);
        for pair in events.windows(2) {
            samples.push(TrainingSample {
                input: ClassifierInput::from_event(pair[0], NO_PREVIOUS_PAGE),
                label: pair[1].current_page.clone(),
            });
        }
    }
    samples
}

#[async_trait]
impl PredictionAlgorithm for ClassifierAlgorithm {
    fn name(&self) -> &str {
        CLASSIFIER_NAME
    }

    fn weight(&self) -> f64 {
        self.weight.get()
    }

    fn set_weight(&self, weight: f64) {
        self.weight.set(weight);
    }

    async fn train(&self, history: &[NavigationEvent], reporter: &dyn ProgressReporter) -> Result<()> {
        reporter.report(TrainingProgress::started(CLASSIFIER_NAME, "Preparing training data"));

        let samples = build_samples(history);
        if samples.is_empty() {
            info!("Not enough history to train the classifier");
            *self.model.write().await = None;
            reporter.report(TrainingProgress::completed(
                CLASSIFIER_NAME,
                "Insufficient data",
                Some("No consecutive events to learn from.".to_string()),
            ));
            return Ok(());
        }

        let sample_count = samples.len();
        reporter.report(
            TrainingProgress::step(CLASSIFIER_NAME, "Samples prepared", 20)
                .with_message(format!("{} samples.", sample_count)),
        );

        reporter.report(TrainingProgress::step(CLASSIFIER_NAME, "Fitting model", 40));
        let options = self.options.clone();
        let (model, accuracy) = tokio::task::spawn_blocking(move || -> Result<(SoftmaxModel, f64)> {
            let model = SoftmaxModel::fit(&samples, &options)?;
            let accuracy = model.accuracy(&samples);
            Ok((model, accuracy))
        })
        .await
        .context("classifier training task panicked")??;

        info!(
            "Classifier trained on {} samples, {} destinations. Micro-accuracy: {:.1}%",
            sample_count,
            model.labels().len(),
            accuracy * 100.0
        );

        reporter.report(TrainingProgress::step(CLASSIFIER_NAME, "Saving model", 80));
        match model.save(&self.model_path) {
            Ok(()) => debug!("Classifier model saved to {:?}", self.model_path),
            Err(e) => warn!("Failed to save classifier model to {:?}: {}", self.model_path, e),
        }

        let label_count = model.labels().len();
        *self.model.write().await = Some(Arc::new(model));

        reporter.report(TrainingProgress::completed(
            CLASSIFIER_NAME,
            "Model ready",
            Some(format!(
                "Trained on {} samples, {} destinations.",
                sample_count, label_count
            )),
        ));
        Ok(())
    }

    async fn predict(
        &self,
        user_id: &str,
        current_context: Option<&str>,
        max_results: usize,
        context_data: Option<&ContextData>,
    ) -> Vec<SuggestedItem> {
        let Some(context) = non_empty(current_context) else {
            return Vec::new();
        };
        let Some(model) = self.model.read().await.clone() else {
            debug!("Classifier model not trained, cannot predict");
            return Vec::new();
        };

        let catalog_items = match self.catalog.read().await.as_ref() {
            Some(catalog) => catalog.available_navigation_items(),
            None => Vec::new(),
        };
        let candidates = if catalog_items.is_empty() {
            model.labels().to_vec()
        } else {
            catalog_items
        };

        let now = Utc::now();
        let input = ClassifierInput {
            user_id: user_id.to_string(),
            current_page: context.to_string(),
            previous_page: context_data
                .and_then(|data| data.get(PREVIOUS_PAGE_KEY))
                .filter(|page| !page.is_empty())
                .cloned()
                .unwrap_or_else(|| NO_PREVIOUS_PAGE.to_string()),
            hour_of_day: now.hour(),
            day_of_week: now.weekday().num_days_from_sunday(),
        };

        let scores = model.score_all(&input);
        let weight = self.weight();

        // Candidates the model never saw as a destination are skipped
        let mut suggestions: Vec<SuggestedItem> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let score = *scores.get(model.label_index(&candidate)?)?;
                Some(SuggestedItem::new(candidate, score * weight, CLASSIFIER_NAME))
            })
            .collect();

        suggestions.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        suggestions.truncate(max_results);

        debug!("Classifier predicted {} items for '{}' from '{}'", suggestions.len(), user_id, context);
        suggestions
    }

    fn as_catalog_consumer(&self) -> Option<&dyn CatalogConsumer> {
        Some(self)
    }
}

#[async_trait]
impl CatalogConsumer for ClassifierAlgorithm {
    async fn set_navigation_catalog(&self, catalog: Arc<dyn NavigationCatalog>) {
        *self.catalog.write().await = Some(catalog);
        debug!("Classifier received navigation catalog");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::test_support::{assert_start_and_finish, RecordingReporter};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    struct StaticCatalog(Vec<&'static str>);

    impl NavigationCatalog for StaticCatalog {
        fn available_navigation_items(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }
    }

    /// Alternates Home -> Dashboard -> Home -> ... for one user
    fn home_dashboard_loop(user: &str, rounds: usize) -> Vec<NavigationEvent> {
        let base = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let mut events = Vec::new();
        let mut previous: Option<&str> = None;
        for i in 0..rounds * 2 {
            let page = if i % 2 == 0 { "Home" } else { "Dashboard" };
            let mut event = NavigationEvent::new(user, page).at(base + Duration::minutes(i as i64));
            if let Some(p) = previous {
                event = event.with_previous(p);
            }
            events.push(event);
            previous = Some(page);
        }
        events
    }

    fn classifier(dir: &TempDir) -> ClassifierAlgorithm {
        ClassifierAlgorithm::with_model_path(dir.path().join(DEFAULT_MODEL_FILE))
    }

    #[test]
    fn test_build_samples_pairs_consecutive_events() {
        let mut history = home_dashboard_loop("u", 2);
        history.reverse();
        history.push(NavigationEvent::new("solo", "Home"));

        let samples = build_samples(&history);
        // 4 events for "u" give 3 pairs; a single event gives none
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].input.current_page, "Home");
        assert_eq!(samples[0].input.previous_page, NO_PREVIOUS_PAGE);
        assert_eq!(samples[0].label, "Dashboard");
        assert_eq!(samples[1].input.previous_page, "Home");
        assert_eq!(samples[1].label, "Home");
    }

    #[tokio::test]
    async fn test_learns_next_page() {
        let dir = TempDir::new().unwrap();
        let algo = classifier(&dir);
        let reporter = RecordingReporter::default();
        algo.train(&home_dashboard_loop("u", 6), &reporter).await.unwrap();

        assert!(algo.is_trained().await);
        assert_start_and_finish(&reporter, CLASSIFIER_NAME);

        let result = algo.predict("u", Some("Home"), 5, None).await;
        assert_eq!(result[0].name, "Dashboard");
        assert_eq!(result[0].reason, CLASSIFIER_NAME);
        assert!(result.iter().all(|s| s.score <= DEFAULT_CLASSIFIER_WEIGHT + 1e-9));
    }

    #[tokio::test]
    async fn test_model_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let first = classifier(&dir);
        first.train(&home_dashboard_loop("u", 4), &RecordingReporter::default()).await.unwrap();
        assert!(dir.path().join(DEFAULT_MODEL_FILE).exists());

        let second = classifier(&dir);
        assert!(second.is_trained().await);
        assert_eq!(
            first.predict("u", Some("Home"), 5, None).await.first().map(|s| s.name.clone()),
            second.predict("u", Some("Home"), 5, None).await.first().map(|s| s.name.clone())
        );
    }

    #[tokio::test]
    async fn test_corrupt_model_file_means_untrained() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DEFAULT_MODEL_FILE), "{ broken").unwrap();

        let algo = classifier(&dir);
        assert!(!algo.is_trained().await);
        assert!(algo.predict("u", Some("Home"), 5, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_data_clears_model() {
        let dir = TempDir::new().unwrap();
        let algo = classifier(&dir);
        algo.train(&home_dashboard_loop("u", 3), &RecordingReporter::default()).await.unwrap();
        assert!(algo.is_trained().await);

        let reporter = RecordingReporter::default();
        algo.train(&[NavigationEvent::new("u", "Home")], &reporter).await.unwrap();
        assert!(!algo.is_trained().await);
        assert_start_and_finish(&reporter, CLASSIFIER_NAME);
    }

    #[tokio::test]
    async fn test_catalog_limits_candidates() {
        let dir = TempDir::new().unwrap();
        let algo = classifier(&dir);
        algo.train(&home_dashboard_loop("u", 4), &RecordingReporter::default()).await.unwrap();

        let consumer = algo.as_catalog_consumer().expect("classifier consumes the catalog");
        consumer
            .set_navigation_catalog(Arc::new(StaticCatalog(vec!["dashboard", "Reports"])))
            .await;

        // Case-insensitive match on "dashboard"; "Reports" was never a destination
        let result = algo.predict("u", Some("Home"), 5, None).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "dashboard");
    }

    #[tokio::test]
    async fn test_empty_catalog_falls_back_to_trained_labels() {
        let dir = TempDir::new().unwrap();
        let algo = classifier(&dir);
        algo.train(&home_dashboard_loop("u", 4), &RecordingReporter::default()).await.unwrap();
        algo.set_navigation_catalog(Arc::new(StaticCatalog(vec![]))).await;

        let result = algo.predict("u", Some("Home"), 5, None).await;
        let names: Vec<&str> = result.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], "Dashboard");
        assert!(names.contains(&"Home"));
    }

    #[tokio::test]
    async fn test_requires_context_and_truncates() {
        let dir = TempDir::new().unwrap();
        let algo = classifier(&dir);
        algo.train(&home_dashboard_loop("u", 4), &RecordingReporter::default()).await.unwrap();

        assert!(algo.predict("u", None, 5, None).await.is_empty());
        assert!(algo.predict("u", Some(""), 5, None).await.is_empty());
        assert_eq!(algo.predict("u", Some("Home"), 1, None).await.len(), 1);

        let mut data = ContextData::new();
        data.insert(PREVIOUS_PAGE_KEY.to_string(), "Dashboard".to_string());
        assert!(!algo.predict("u", Some("Home"), 5, Some(&data)).await.is_empty());
    }
}
