//! Storage for navigation history and user shortcuts
//!
//! Two backends implement both stores:
//! - `memory`: process-local maps, the engine default
//! - `sqlite`: durable SQLite file used by the CLI host

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{NavError, Result};
use crate::models::{NavigationEvent, UserCustomMenuItem};

mod memory;
mod sqlite;

pub use memory::{InMemoryHistoryStore, InMemoryPreferencesStore};
pub use sqlite::{SqliteStore, StoreStats};

/// Append-only log of navigation events
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Rejects events with an empty user id
    async fn add_event(&self, event: NavigationEvent) -> Result<()>;

    /// Events for one user, optionally only those at or after `since`
    async fn user_history(&self, user_id: &str, since: Option<DateTime<Utc>>) -> Result<Vec<NavigationEvent>>;

    async fn all_history(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NavigationEvent>>;
}

/// Per-user custom shortcuts, keyed by (user id, item name)
#[async_trait]
pub trait PreferencesStore: Send + Sync {
    /// Upsert. Rejects an empty user id or item name.
    async fn add_or_update(&self, item: UserCustomMenuItem) -> Result<()>;

    /// Removing an unknown item is a no-op
    async fn remove(&self, user_id: &str, item_name: &str) -> Result<()>;

    /// Ordered by `order` ascending, then by name
    async fn all(&self, user_id: &str) -> Result<Vec<UserCustomMenuItem>>;
}

pub(crate) fn validate_event(event: &NavigationEvent) -> Result<()> {
    if event.user_id.is_empty() {
        return Err(NavError::InvalidInput("user id cannot be empty".into()));
    }
    Ok(())
}

pub(crate) fn validate_item(item: &UserCustomMenuItem) -> Result<()> {
    if item.user_id.is_empty() || item.item_name.is_empty() {
        return Err(NavError::InvalidInput("user id and item name cannot be empty".into()));
    }
    Ok(())
}

pub(crate) fn sort_items(items: &mut [UserCustomMenuItem]) {
    items.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.item_name.cmp(&b.item_name)));
}

fn is_since(event: &NavigationEvent, since: Option<DateTime<Utc>>) -> bool {
    since.map_or(true, |s| event.timestamp >= s)
}
