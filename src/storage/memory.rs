//! Process-local stores. Nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::{is_since, sort_items, validate_event, validate_item, HistoryStore, PreferencesStore};
use crate::error::{NavError, Result};
use crate::models::{NavigationEvent, UserCustomMenuItem};

#[derive(Default)]
pub struct InMemoryHistoryStore {
    events: RwLock<HashMap<String, Vec<NavigationEvent>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn add_event(&self, event: NavigationEvent) -> Result<()> {
        validate_event(&event)?;
        debug!("Recorded '{}' for user '{}'", event.current_page, event.user_id);

        let mut events = self.events.write().map_err(|_| NavError::LockPoisoned)?;
        events.entry(event.user_id.clone()).or_default().push(event);
        Ok(())
    }

    async fn user_history(&self, user_id: &str, since: Option<DateTime<Utc>>) -> Result<Vec<NavigationEvent>> {
        let events = self.events.read().map_err(|_| NavError::LockPoisoned)?;
        Ok(events
            .get(user_id)
            .map(|list| list.iter().filter(|e| is_since(e, since)).cloned().collect())
            .unwrap_or_default())
    }

    async fn all_history(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NavigationEvent>> {
        let events = self.events.read().map_err(|_| NavError::LockPoisoned)?;
        Ok(events
            .values()
            .flatten()
            .filter(|e| is_since(e, since))
            .cloned()
            .collect())
    }
}

/// user -> item name -> item
#[derive(Default)]
pub struct InMemoryPreferencesStore {
    items: RwLock<HashMap<String, HashMap<String, UserCustomMenuItem>>>,
}

impl InMemoryPreferencesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferencesStore for InMemoryPreferencesStore {
    async fn add_or_update(&self, item: UserCustomMenuItem) -> Result<()> {
        validate_item(&item)?;
        debug!("User '{}' saved custom item '{}'", item.user_id, item.item_name);

        let mut items = self.items.write().map_err(|_| NavError::LockPoisoned)?;
        items
            .entry(item.user_id.clone())
            .or_default()
            .insert(item.item_name.clone(), item);
        Ok(())
    }

    async fn remove(&self, user_id: &str, item_name: &str) -> Result<()> {
        let mut items = self.items.write().map_err(|_| NavError::LockPoisoned)?;
        if let Some(user_items) = items.get_mut(user_id) {
            if user_items.remove(item_name).is_some() {
                debug!("User '{}' removed custom item '{}'", user_id, item_name);
            }
        }
        Ok(())
    }

    async fn all(&self, user_id: &str) -> Result<Vec<UserCustomMenuItem>> {
        let items = self.items.read().map_err(|_| NavError::LockPoisoned)?;
        let mut list: Vec<UserCustomMenuItem> = items
            .get(user_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        sort_items(&mut list);
        Ok(list)
    }
}
