//! Menu builder - CRUD for a user's custom shortcuts

use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::models::UserCustomMenuItem;
use crate::storage::PreferencesStore;

pub struct MenuBuilder {
    store: Arc<dyn PreferencesStore>,
}

impl MenuBuilder {
    pub fn new(store: Arc<dyn PreferencesStore>) -> Self {
        Self { store }
    }

    /// Add a shortcut, or change the order of an existing one
    pub async fn add_item(&self, user_id: &str, item_name: &str, order: i32) -> Result<()> {
        self.store
            .add_or_update(UserCustomMenuItem::new(user_id, item_name, order))
            .await
    }

    pub async fn remove_item(&self, user_id: &str, item_name: &str) -> Result<()> {
        self.store.remove(user_id, item_name).await
    }

    /// Ordered by `order` ascending
    pub async fn items(&self, user_id: &str) -> Result<Vec<UserCustomMenuItem>> {
        self.store.all(user_id).await
    }

    /// Removes items one at a time. Not atomic: an item added concurrently
    /// may survive. Returns how many were removed.
    pub async fn clear(&self, user_id: &str) -> Result<usize> {
        let items = self.store.all(user_id).await?;
        for item in &items {
            self.store.remove(user_id, &item.item_name).await?;
        }
        info!("Cleared {} custom items for user '{}'", items.len(), user_id);
        Ok(items.len())
    }
}
