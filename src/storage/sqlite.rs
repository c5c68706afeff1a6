//! SQLite-backed history and preferences
//!
//! One connection behind a mutex; every query runs on the blocking pool.
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (nanoseconds,
//! `Z` suffix) so `since` filters compare lexically.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{sort_items, validate_event, validate_item, HistoryStore, PreferencesStore};
use crate::error::{NavError, Result};
use crate::models::{NavigationEvent, UserCustomMenuItem};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS navigation_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    current_page TEXT NOT NULL,
    previous_page TEXT,
    timestamp TEXT NOT NULL,
    session_id TEXT,
    context_data TEXT
);

CREATE TABLE IF NOT EXISTS custom_menu_items (
    user_id TEXT NOT NULL,
    item_name TEXT NOT NULL,
    item_order INTEGER NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (user_id, item_name)
);

CREATE INDEX IF NOT EXISTS idx_events_user ON navigation_events(user_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON navigation_events(timestamp);
"#;

const EVENT_COLUMNS: &str =
    "user_id, current_page, previous_page, timestamp, session_id, context_data";

/// Row counts for the `status` command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub event_count: u64,
    pub user_count: u64,
    pub custom_item_count: u64,
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `db_path` and ensure the schema exists
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        // WAL so a `session` host and one-shot commands can share the file
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self::from_connection(conn)?;
        info!("Opened navigation store at {:?}", db_path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| NavError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| NavError::Task(e.to_string()))?
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let (event_count, user_count): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT user_id) FROM navigation_events",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let custom_item_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM custom_menu_items", [], |row| row.get(0))?;

            Ok(StoreStats {
                event_count: event_count as u64,
                user_count: user_count as u64,
                custom_item_count: custom_item_count as u64,
            })
        })
        .await
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Empty string sorts before every stored timestamp
fn since_bound(since: Option<DateTime<Utc>>) -> String {
    since.as_ref().map(format_timestamp).unwrap_or_default()
}

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<NavigationEvent> {
    let timestamp: String = row.get(3)?;
    let context: Option<String> = row.get(5)?;

    Ok(NavigationEvent {
        user_id: row.get(0)?,
        current_page: row.get(1)?,
        previous_page: row.get(2)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| conversion_error(3, e))?
            .with_timezone(&Utc),
        session_id: row.get(4)?,
        context_data: context
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| conversion_error(5, e))?,
    })
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn add_event(&self, event: NavigationEvent) -> Result<()> {
        validate_event(&event)?;
        let context = event.context_data.as_ref().map(serde_json::to_string).transpose()?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO navigation_events (user_id, current_page, previous_page, timestamp, session_id, context_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.user_id,
                    event.current_page,
                    event.previous_page,
                    format_timestamp(&event.timestamp),
                    event.session_id,
                    context
                ],
            )?;
            debug!("Recorded '{}' for user '{}'", event.current_page, event.user_id);
            Ok(())
        })
        .await
    }

    async fn user_history(&self, user_id: &str, since: Option<DateTime<Utc>>) -> Result<Vec<NavigationEvent>> {
        let user_id = user_id.to_string();
        let since = since_bound(since);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM navigation_events WHERE user_id = ?1 AND timestamp >= ?2 ORDER BY timestamp, id",
                EVENT_COLUMNS
            ))?;
            let events = stmt
                .query_map(params![user_id, since], event_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
        .await
    }

    async fn all_history(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NavigationEvent>> {
        let since = since_bound(since);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM navigation_events WHERE timestamp >= ?1 ORDER BY timestamp, id",
                EVENT_COLUMNS
            ))?;
            let events = stmt
                .query_map(params![since], event_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
        .await
    }
}

#[async_trait]
impl PreferencesStore for SqliteStore {
    async fn add_or_update(&self, item: UserCustomMenuItem) -> Result<()> {
        validate_item(&item)?;

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO custom_menu_items (user_id, item_name, item_order)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(user_id, item_name) DO UPDATE SET
                    item_order = excluded.item_order,
                    updated_at = CURRENT_TIMESTAMP
                "#,
                params![item.user_id, item.item_name, item.order],
            )?;
            debug!("User '{}' saved custom item '{}'", item.user_id, item.item_name);
            Ok(())
        })
        .await
    }

    async fn remove(&self, user_id: &str, item_name: &str) -> Result<()> {
        let user_id = user_id.to_string();
        let item_name = item_name.to_string();

        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM custom_menu_items WHERE user_id = ?1 AND item_name = ?2",
                params![user_id, item_name],
            )?;
            if removed > 0 {
                debug!("User '{}' removed custom item '{}'", user_id, item_name);
            }
            Ok(())
        })
        .await
    }

    async fn all(&self, user_id: &str) -> Result<Vec<UserCustomMenuItem>> {
        let user_id = user_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT user_id, item_name, item_order FROM custom_menu_items WHERE user_id = ?1",
            )?;
            let mut items = stmt
                .query_map(params![user_id], |row| {
                    Ok(UserCustomMenuItem {
                        user_id: row.get(0)?,
                        item_name: row.get(1)?,
                        order: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            sort_items(&mut items);
            Ok(items)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_event_fields_survive_storage() {
        let store = SqliteStore::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap() + Duration::nanoseconds(123_456_789);
        let event = NavigationEvent::new("alice", "Dashboard")
            .with_previous("Home")
            .with_session("s-1")
            .with_context("device", "tablet")
            .at(at);

        store.add_event(event.clone()).await.unwrap();
        store.add_event(NavigationEvent::new("bob", "Home").at(at)).await.unwrap();

        let alice = store.user_history("alice", None).await.unwrap();
        assert_eq!(alice, vec![event]);
        assert_eq!(store.all_history(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_since_filter() {
        let store = SqliteStore::open_in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..4 {
            store
                .add_event(NavigationEvent::new("u", "Home").at(base + Duration::days(i)))
                .await
                .unwrap();
        }

        let since = Some(base + Duration::days(2));
        assert_eq!(store.all_history(since).await.unwrap().len(), 2);
        assert_eq!(store.user_history("u", since).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_since_bound_is_nanosecond_exact() {
        let store = SqliteStore::open_in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 7, 33, 20).unwrap() + Duration::nanoseconds(123_456_000);
        let just_before = NavigationEvent::new("u", "Home").at(base);
        let bound = base + Duration::nanoseconds(789);
        let at_bound = NavigationEvent::new("u", "Reports").at(bound);
        store.add_event(just_before.clone()).await.unwrap();
        store.add_event(at_bound.clone()).await.unwrap();

        assert_eq!(store.all_history(None).await.unwrap(), vec![just_before, at_bound.clone()]);
        assert_eq!(store.all_history(Some(bound)).await.unwrap(), vec![at_bound.clone()]);
        assert_eq!(store.user_history("u", Some(bound)).await.unwrap(), vec![at_bound]);
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.add_event(NavigationEvent::new("", "Home")).await,
            Err(NavError::InvalidInput(_))
        ));
        assert!(matches!(
            store.add_or_update(UserCustomMenuItem::new("u", "", 0)).await,
            Err(NavError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_menu_items_upsert_and_remove() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_or_update(UserCustomMenuItem::new("u", "Reports", 5)).await.unwrap();
        store.add_or_update(UserCustomMenuItem::new("u", "Inbox", 1)).await.unwrap();
        store.add_or_update(UserCustomMenuItem::new("u", "Reports", 0)).await.unwrap();

        let items = store.all("u").await.unwrap();
        assert_eq!(
            items,
            vec![
                UserCustomMenuItem::new("u", "Reports", 0),
                UserCustomMenuItem::new("u", "Inbox", 1),
            ]
        );

        store.remove("u", "Reports").await.unwrap();
        store.remove("u", "Reports").await.unwrap();
        assert_eq!(store.all("u").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persists_and_reports_stats() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gotonav.sqlite");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.add_event(NavigationEvent::new("a", "Home")).await.unwrap();
            store.add_event(NavigationEvent::new("a", "Reports")).await.unwrap();
            store.add_event(NavigationEvent::new("b", "Home")).await.unwrap();
            store.add_or_update(UserCustomMenuItem::new("a", "Inbox", 0)).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                event_count: 3,
                user_count: 2,
                custom_item_count: 1,
            }
        );
    }
}
