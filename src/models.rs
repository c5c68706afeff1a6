//! Core data types shared by the stores, algorithms and engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Free-form key/value context attached to events and prediction requests
pub type ContextData = HashMap<String, String>;

/// Reason tag carried by suggestions that come from a user's own shortcuts
pub const USER_CUSTOM_REASON: &str = "UserCustom";

/// One observed user transition inside the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub user_id: String,
    pub current_page: String,
    /// None for the first interaction of a session
    pub previous_page: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    /// Device type, role, active project, ...
    pub context_data: Option<ContextData>,
}

impl NavigationEvent {
    /// Create an event timestamped now (UTC)
    pub fn new(user_id: impl Into<String>, current_page: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            current_page: current_page.into(),
            previous_page: None,
            timestamp: Utc::now(),
            session_id: None,
            context_data: None,
        }
    }

    pub fn with_previous(mut self, previous_page: impl Into<String>) -> Self {
        self.previous_page = Some(previous_page.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_data
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Previous page, treating an empty string like a missing one
    pub fn previous(&self) -> Option<&str> {
        self.previous_page.as_deref().filter(|p| !p.is_empty())
    }
}

/// A scored candidate destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedItem {
    pub name: String,
    pub score: f64,
    /// Which algorithm produced it, or `UserCustom`
    pub reason: String,
}

impl SuggestedItem {
    pub fn new(name: impl Into<String>, score: f64, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score,
            reason: reason.into(),
        }
    }
}

/// A shortcut pinned by a user. Smaller `order` means higher priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCustomMenuItem {
    pub user_id: String,
    pub item_name: String,
    pub order: i32,
}

impl UserCustomMenuItem {
    pub fn new(user_id: impl Into<String>, item_name: impl Into<String>, order: i32) -> Self {
        Self {
            user_id: user_id.into(),
            item_name: item_name.into(),
            order,
        }
    }
}

/// When the engine retrains its algorithms on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingMode {
    /// One training pass when the engine is built
    OnStartupOnce,
    /// Retrain after every recorded event. Development and small datasets only;
    /// not suitable for production event rates.
    #[default]
    ContinuousDevelopment,
    /// Retrain on an interval timer or after N recorded events, whichever comes first
    BatchScheduled,
    /// Only when the host calls `train_algorithms`
    Manual,
    /// Host-supplied routine replaces the per-algorithm loop
    Custom,
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingMode::OnStartupOnce => "on_startup_once",
            TrainingMode::ContinuousDevelopment => "continuous_development",
            TrainingMode::BatchScheduled => "batch_scheduled",
            TrainingMode::Manual => "manual",
            TrainingMode::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Granular training progress, emitted by algorithms and by the engine itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub algorithm_name: String,
    pub current_step: String,
    /// 0-100
    pub percentage: u8,
    pub is_completed: bool,
    pub message: Option<String>,
}

impl TrainingProgress {
    pub fn new(
        algorithm_name: impl Into<String>,
        current_step: impl Into<String>,
        percentage: u8,
        is_completed: bool,
        message: Option<String>,
    ) -> Self {
        Self {
            algorithm_name: algorithm_name.into(),
            current_step: current_step.into(),
            percentage: percentage.min(100),
            is_completed,
            message,
        }
    }

    /// 0%, not completed
    pub fn started(algorithm_name: impl Into<String>, current_step: impl Into<String>) -> Self {
        Self::new(algorithm_name, current_step, 0, false, None)
    }

    /// Intermediate step
    pub fn step(
        algorithm_name: impl Into<String>,
        current_step: impl Into<String>,
        percentage: u8,
    ) -> Self {
        Self::new(algorithm_name, current_step, percentage, false, None)
    }

    /// 100%, completed
    pub fn completed(
        algorithm_name: impl Into<String>,
        current_step: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self::new(algorithm_name, current_step, 100, true, message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = NavigationEvent::new("alice", "Dashboard")
            .with_previous("Home")
            .with_session("s1")
            .with_context("device", "desktop");

        assert_eq!(event.previous(), Some("Home"));
        assert_eq!(event.session_id.as_deref(), Some("s1"));
        assert_eq!(
            event.context_data.as_ref().and_then(|c| c.get("device")).map(String::as_str),
            Some("desktop")
        );
    }

    #[test]
    fn test_empty_previous_is_none() {
        let event = NavigationEvent::new("alice", "Home").with_previous("");
        assert_eq!(event.previous(), None);
    }

    #[test]
    fn test_training_mode_serde() {
        let json = serde_json::to_string(&TrainingMode::BatchScheduled).unwrap();
        assert_eq!(json, r#""batch_scheduled""#);

        let mode: TrainingMode = serde_json::from_str(r#""on_startup_once""#).unwrap();
        assert_eq!(mode, TrainingMode::OnStartupOnce);
        assert_eq!(TrainingMode::default(), TrainingMode::ContinuousDevelopment);
    }

    #[test]
    fn test_progress_clamps_percentage() {
        let progress = TrainingProgress::new("Frequency", "done", 150, true, None);
        assert_eq!(progress.percentage, 100);
    }
}
