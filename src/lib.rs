//! GoToNav - navigation suggestions from interaction history
//!
//! Several independent prediction algorithms are trained on recorded
//! navigation events. The engine merges their candidates with each user's
//! pinned shortcuts into one ranked list, and decides when to retrain.

pub mod algorithms;
pub mod config;
pub mod engine;
pub mod error;
pub mod integration;
pub mod menu;
pub mod models;
pub mod storage;

pub use engine::{EngineBuilder, EngineEvent, PredictionEngine, TrainingOutcome, TrainingStrategy};
pub use error::{NavError, Result};
pub use menu::MenuBuilder;
pub use models::{
    ContextData, NavigationEvent, SuggestedItem, TrainingMode, TrainingProgress, UserCustomMenuItem,
};
