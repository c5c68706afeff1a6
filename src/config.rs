//! Configuration
//!
//! `config.toml` in the data directory holds the application's page
//! catalog, design-flow rules and engine settings. A missing file means
//! defaults; a malformed one is an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::algorithms::classifier::{TrainingOptions, DEFAULT_CLASSIFIER_WEIGHT, DEFAULT_MODEL_FILE};
use crate::algorithms::{
    DEFAULT_DESIGN_FLOW_WEIGHT, DEFAULT_FREQUENCY_WEIGHT, DEFAULT_MARKOV_WEIGHT,
};
use crate::engine::{
    TrainingStrategy, DEFAULT_BATCH_INTERVAL, DEFAULT_BATCH_THRESHOLD, DEFAULT_SUGGESTION_COUNT,
};
use crate::error::Result;
use crate::integration::{DesignFlowRules, DesignFlowRulesProvider, NavigationCatalog};
use crate::models::TrainingMode;

/// Written by `gotonav init`
pub const DEFAULT_CONFIG: &str = r#"# GoToNav Configuration

# Every page or feature users can navigate to
app_pages = ["Home", "Dashboard", "ProjectList", "ProjectDetails", "NewProject", "Reports", "Settings"]

# Pages shown in the host's main menu (must also be in app_pages)
main_navigation_items = ["Home", "Dashboard", "Reports"]

# From source_page, users are expected to go to target_pages
[[design_flows]]
source_page = "ProjectList"
target_pages = ["ProjectDetails", "NewProject"]

[[design_flows]]
source_page = "Dashboard"
target_pages = ["Reports"]

[engine]
# on_startup_once, continuous_development, batch_scheduled, manual or custom
training_mode = "continuous_development"
batch_interval_secs = 300
batch_threshold = 50
suggestion_count = 5

[weights]
frequency = 1.0
markov = 1.5
design_flow = 0.7
classifier = 2.0

[classifier]
enabled = true
# Relative paths are resolved against the data directory
# model_path = "navigation_model.json"
epochs = 200
learning_rate = 0.5
"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// The navigation catalog
    pub app_pages: Vec<String>,
    pub main_navigation_items: Vec<String>,
    pub design_flows: Vec<DesignFlowEntry>,
    pub engine: EngineConfig,
    pub weights: WeightsConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignFlowEntry {
    pub source_page: String,
    pub target_pages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub training_mode: TrainingMode,
    pub batch_interval_secs: u64,
    pub batch_threshold: u32,
    pub suggestion_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            training_mode: TrainingMode::default(),
            batch_interval_secs: DEFAULT_BATCH_INTERVAL.as_secs(),
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            suggestion_count: DEFAULT_SUGGESTION_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub frequency: f64,
    pub markov: f64,
    pub design_flow: f64,
    pub classifier: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY_WEIGHT,
            markov: DEFAULT_MARKOV_WEIGHT,
            design_flow: DEFAULT_DESIGN_FLOW_WEIGHT,
            classifier: DEFAULT_CLASSIFIER_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let options = TrainingOptions::default();
        Self {
            enabled: true,
            model_path: None,
            epochs: options.epochs,
            learning_rate: options.learning_rate,
        }
    }
}

impl AppConfig {
    /// Strategy for the configured mode. Custom mode has no routine to run
    /// from a config file, so the engine falls back to its standard loop.
    pub fn training_strategy(&self) -> TrainingStrategy {
        match self.engine.training_mode {
            TrainingMode::BatchScheduled => TrainingStrategy::batch_scheduled(
                Some(Duration::from_secs(self.engine.batch_interval_secs)),
                Some(self.engine.batch_threshold),
            ),
            mode => TrainingStrategy::new(mode),
        }
    }

    pub fn classifier_options(&self) -> TrainingOptions {
        TrainingOptions {
            epochs: self.classifier.epochs,
            learning_rate: self.classifier.learning_rate,
            ..TrainingOptions::default()
        }
    }

    /// Configured model path, relative paths resolved against `data_dir`
    pub fn model_path(&self, data_dir: &Path) -> PathBuf {
        match &self.classifier.model_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => data_dir.join(path),
            None => data_dir.join(DEFAULT_MODEL_FILE),
        }
    }
}

/// Load configuration, returning defaults when the file does not exist
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if !config_path.exists() {
        debug!("No config at {:?}, using defaults", config_path);
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(config_path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Serves the configured catalog and design-flow rules to the engine
#[derive(Debug, Clone)]
pub struct ConfigProvider {
    pages: Vec<String>,
    main_items: Vec<String>,
    rules: DesignFlowRules,
}

impl ConfigProvider {
    pub fn new(config: &AppConfig) -> Self {
        // Case-insensitive de-duplication, first spelling wins
        let mut seen = HashSet::new();
        let mut pages: Vec<String> = config
            .app_pages
            .iter()
            .filter(|page| !page.is_empty() && seen.insert(page.to_lowercase()))
            .cloned()
            .collect();
        pages.sort();

        let main_items: Vec<String> = config
            .main_navigation_items
            .iter()
            .filter(|item| seen.contains(&item.to_lowercase()))
            .cloned()
            .collect();

        let rules: DesignFlowRules = config
            .design_flows
            .iter()
            .filter(|flow| !flow.source_page.is_empty())
            .map(|flow| (flow.source_page.clone(), flow.target_pages.clone()))
            .collect();

        info!(
            "Configuration: {} app pages, {} design flows, {} main navigation items",
            pages.len(),
            rules.len(),
            main_items.len()
        );

        Self {
            pages,
            main_items,
            rules,
        }
    }

    /// Main menu entries that exist in the catalog, in configured order
    pub fn main_navigation_items(&self) -> &[String] {
        &self.main_items
    }
}

impl NavigationCatalog for ConfigProvider {
    fn available_navigation_items(&self) -> Vec<String> {
        self.pages.clone()
    }
}

#[async_trait]
impl DesignFlowRulesProvider for ConfigProvider {
    async fn design_flow_rules(&self) -> anyhow::Result<DesignFlowRules> {
        Ok(self.rules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_template_parses() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.app_pages.len(), 7);
        assert_eq!(config.design_flows.len(), 2);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.weights, WeightsConfig::default());
        assert_eq!(config.classifier, ClassifierConfig::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.engine.suggestion_count, 5);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "app_pages = 3").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_load_written_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
app_pages = ["Home", "Reports"]

[[design_flows]]
source_page = "Home"
target_pages = ["Reports"]

[engine]
training_mode = "batch_scheduled"
batch_threshold = 10
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.app_pages, vec!["Home", "Reports"]);
        assert_eq!(
            config.design_flows,
            vec![DesignFlowEntry {
                source_page: "Home".into(),
                target_pages: vec!["Reports".into()],
            }]
        );
        assert_eq!(config.engine.training_mode, TrainingMode::BatchScheduled);
        assert_eq!(config.engine.batch_threshold, 10);
        assert_eq!(config.engine.batch_interval_secs, 300);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = toml::from_str("[engine]\ntraining_mode = \"manual\"\n").unwrap();
        assert_eq!(config.engine.training_mode, TrainingMode::Manual);
        assert_eq!(config.engine.batch_threshold, 50);
        assert!(config.classifier.enabled);
    }

    #[test]
    fn test_training_strategy_from_config() {
        let mut config = AppConfig::default();
        config.engine.training_mode = TrainingMode::BatchScheduled;
        config.engine.batch_interval_secs = 60;
        config.engine.batch_threshold = 3;

        let strategy = config.training_strategy();
        assert_eq!(strategy.mode, TrainingMode::BatchScheduled);
        assert_eq!(strategy.batch_interval, Duration::from_secs(60));
        assert_eq!(strategy.batch_threshold, 3);
    }

    #[test]
    fn test_model_path_resolution() {
        let data_dir = Path::new("/data");
        let mut config = AppConfig::default();
        assert_eq!(config.model_path(data_dir), data_dir.join(DEFAULT_MODEL_FILE));

        config.classifier.model_path = Some(PathBuf::from("models/nav.json"));
        assert_eq!(config.model_path(data_dir), data_dir.join("models/nav.json"));
    }

    #[tokio::test]
    async fn test_provider_catalog_and_rules() {
        let mut config = AppConfig::default();
        config.app_pages = vec!["Reports".into(), "home".into(), "Home".into(), "Dashboard".into()];
        config.main_navigation_items = vec!["HOME".into(), "Missing".into()];
        config.design_flows = vec![
            DesignFlowEntry {
                source_page: "Dashboard".into(),
                target_pages: vec!["Reports".into()],
            },
            DesignFlowEntry {
                source_page: "dashboard".into(),
                target_pages: vec!["Home".into(), "Reports".into()],
            },
        ];

        let provider = ConfigProvider::new(&config);
        assert_eq!(provider.available_navigation_items(), vec!["Dashboard", "Reports", "home"]);
        assert_eq!(provider.main_navigation_items(), &["HOME".to_string()]);

        let rules = provider.design_flow_rules().await.unwrap();
        assert_eq!(
            rules.get("DASHBOARD"),
            Some(&["Reports".to_string(), "Home".to_string()][..])
        );
    }
}
