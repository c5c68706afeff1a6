//! Softmax navigation model
//!
//! Multinomial logistic regression over sparse features:
//! - one-hot user id
//! - one-hot current page
//! - one-hot previous page ("NONE" when absent)
//! - hour of day / 23 and day of week / 6 (Sunday = 0)
//!
//! Categories never seen during training encode to no active feature.
//! Trained with seeded SGD so the same samples always give the same model.

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::models::NavigationEvent;

/// Bumped whenever the persisted layout changes
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Feature row for one (user, page) situation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierInput {
    pub user_id: String,
    pub current_page: String,
    pub previous_page: String,
    pub hour_of_day: u32,
    /// 0 = Sunday
    pub day_of_week: u32,
}

impl ClassifierInput {
    pub fn from_event(event: &NavigationEvent, no_previous: &str) -> Self {
        Self {
            user_id: event.user_id.clone(),
            current_page: event.current_page.clone(),
            previous_page: event.previous().unwrap_or(no_previous).to_string(),
            hour_of_day: event.timestamp.hour(),
            day_of_week: event.timestamp.weekday().num_days_from_sunday(),
        }
    }
}

/// Supervised sample: the page the user went to next
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub input: ClassifierInput,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
    pub seed: u64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.5,
            l2_penalty: 1e-4,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxModel {
    version: u32,
    /// Sorted; index = slot in the score vector
    labels: Vec<String>,
    users: Vec<String>,
    current_pages: Vec<String>,
    previous_pages: Vec<String>,
    /// [label][feature]
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    sample_count: usize,
    trained_at: DateTime<Utc>,
}

impl SoftmaxModel {
    /// Fit a model. Fails only on an empty sample set.
    pub fn fit(samples: &[TrainingSample], options: &TrainingOptions) -> Result<Self> {
        if samples.is_empty() {
            bail!("cannot fit a classifier without samples");
        }

        let labels = sorted_unique(samples.iter().map(|s| s.label.as_str()));
        let mut model = Self {
            version: MODEL_FORMAT_VERSION,
            bias: vec![0.0; labels.len()],
            labels,
            users: sorted_unique(samples.iter().map(|s| s.input.user_id.as_str())),
            current_pages: sorted_unique(samples.iter().map(|s| s.input.current_page.as_str())),
            previous_pages: sorted_unique(samples.iter().map(|s| s.input.previous_page.as_str())),
            weights: Vec::new(),
            sample_count: samples.len(),
            trained_at: Utc::now(),
        };
        model.weights = vec![vec![0.0; model.feature_count()]; model.labels.len()];

        let encoded: Vec<(Vec<(usize, f64)>, usize)> = samples
            .iter()
            .filter_map(|s| {
                let label = model.labels.binary_search(&s.label).ok()?;
                Some((model.encode(&s.input), label))
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut order: Vec<usize> = (0..encoded.len()).collect();

        for epoch in 0..options.epochs {
            order.shuffle(&mut rng);
            let rate = options.learning_rate / (1.0 + epoch as f64 * 0.01);

            for &i in &order {
                let (features, label) = &encoded[i];
                let probabilities = model.probabilities(features);

                for (class, p) in probabilities.iter().enumerate() {
                    let target = if class == *label { 1.0 } else { 0.0 };
                    let gradient = p - target;
                    let row = &mut model.weights[class];
                    for &(feature, value) in features {
                        row[feature] -= rate * (gradient * value + options.l2_penalty * row[feature]);
                    }
                    model.bias[class] -= rate * gradient;
                }
            }
        }

        Ok(model)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// Slot of a label, compared case-insensitively
    pub fn label_index(&self, name: &str) -> Option<usize> {
        let wanted = name.to_lowercase();
        self.labels.iter().position(|l| l.to_lowercase() == wanted)
    }

    /// Probability for every label, indexed like `labels()`
    pub fn score_all(&self, input: &ClassifierInput) -> Vec<f64> {
        self.probabilities(&self.encode(input))
    }

    pub fn predict_label(&self, input: &ClassifierInput) -> Option<&str> {
        let scores = self.score_all(input);
        scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.labels[i].as_str())
    }

    /// Fraction of samples whose top label is the true one
    pub fn accuracy(&self, samples: &[TrainingSample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let correct = samples
            .iter()
            .filter(|s| self.predict_label(&s.input) == Some(s.label.as_str()))
            .count();
        correct as f64 / samples.len() as f64
    }

    /// Write atomically: temp file, then rename over the target
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_string(self)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }

    /// Ok(None) when there is no file yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let model: Self = serde_json::from_slice(&bytes)?;
        if model.version != MODEL_FORMAT_VERSION {
            bail!("unsupported model format version {}", model.version);
        }

        let features = model.feature_count();
        if model.weights.len() != model.labels.len()
            || model.bias.len() != model.labels.len()
            || model.weights.iter().any(|row| row.len() != features)
        {
            bail!("model file has inconsistent dimensions");
        }

        Ok(Some(model))
    }

    fn feature_count(&self) -> usize {
        self.users.len() + self.current_pages.len() + self.previous_pages.len() + 2
    }

    fn encode(&self, input: &ClassifierInput) -> Vec<(usize, f64)> {
        let mut features = Vec::with_capacity(5);
        let mut offset = 0;

        for (vocabulary, value) in [
            (&self.users, &input.user_id),
            (&self.current_pages, &input.current_page),
            (&self.previous_pages, &input.previous_page),
        ] {
            if let Ok(index) = vocabulary.binary_search(value) {
                features.push((offset + index, 1.0));
            }
            offset += vocabulary.len();
        }

        features.push((offset, input.hour_of_day.min(23) as f64 / 23.0));
        features.push((offset + 1, input.day_of_week.min(6) as f64 / 6.0));
        features
    }

    fn probabilities(&self, features: &[(usize, f64)]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| bias + features.iter().map(|&(i, x)| row[i] * x).sum::<f64>())
            .collect();
        softmax(&logits)
    }
}

fn sorted_unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum <= 0.0 {
        return exps;
    }
    exps.into_iter().map(|e| e / sum).collect()
}
