//! Persisted copy of the published display list. Writes are debounced
//! (trailing edge, single pending value): a burst of rebuilds coalesces into
//! one disk write carrying the last value, which is safe because the list is
//! always replaced wholesale, never patched.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tabdeck_core::tabs::DisplayTab;
use tabdeck_core::time::epoch_ms;

use crate::database::Database;
use crate::error::StoreError;

/// Fixed record name the display list is cached under.
pub const DISPLAY_RECORD: &str = "displayTabs";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRecord {
    pub display_tabs: Vec<DisplayTab>,
    pub last_saved: i64,
}

#[derive(Clone)]
pub struct DisplayCache {
    db: Database,
}

impl DisplayCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace the cached record with the given list.
    pub fn save(&self, display_tabs: &[DisplayTab]) -> Result<(), StoreError> {
        let record = DisplayRecord {
            display_tabs: display_tabs.to_vec(),
            last_saved: epoch_ms(),
        };
        let payload = serde_json::to_string(&record)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO display_cache (record, payload, last_saved)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(record) DO UPDATE SET payload = ?2, last_saved = ?3",
                rusqlite::params![DISPLAY_RECORD, payload, record.last_saved],
            )?;
            Ok(())
        })
    }

    /// Read the cached record back, if one was ever written.
    pub fn load(&self) -> Result<Option<DisplayRecord>, StoreError> {
        let payload: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload FROM display_cache WHERE record = ?1",
                    [DISPLAY_RECORD],
                    |row| row.get(0),
                )
                .ok())
        })?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }
}

/// Spawn the write-behind task. Callers push every rebuilt list into the
/// returned sender; the task writes once the list has been quiet for
/// `delay`. Closing the sender flushes the pending value and stops the task.
pub fn spawn_writer(
    cache: DisplayCache,
    delay: Duration,
) -> (mpsc::Sender<Vec<DisplayTab>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<DisplayTab>>(64);

    let handle = tokio::spawn(async move {
        while let Some(mut pending) = rx.recv().await {
            loop {
                match tokio::time::timeout(delay, rx.recv()).await {
                    // Newer value within the window: coalesce and re-arm.
                    Ok(Some(newer)) => pending = newer,
                    // Channel closed: flush and stop.
                    Ok(None) => {
                        write(&cache, &pending);
                        return;
                    }
                    // Quiet period elapsed.
                    Err(_) => break,
                }
            }
            write(&cache, &pending);
        }
    });

    (tx, handle)
}

fn write(cache: &DisplayCache, tabs: &[DisplayTab]) {
    if let Err(e) = cache.save(tabs) {
        tracing::warn!(error = %e, "display cache write failed");
    }
}
