//! SQLite-backed store for photo analysis records, the job queue, and the
//! run history ledger.
//!
//! The store is the shared resource between the CLI, the daemon's worker
//! pool, and any other polling consumer. A single connection behind a mutex
//! serializes every read-modify-write, which is what makes the queue's
//! claim-and-mark atomic.

mod schema;

pub mod history;
pub mod queue;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub use history::RunRecord;
pub use queue::{ClaimedJob, EnqueueOptions, EnqueueOutcome, Priority, RejectReason, RunOutcome};
pub use schema::SCHEMA;

use crate::validator::Classification;

/// Lifecycle state of a photo's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Unanalyzed,
    Queued,
    InProgress,
    Finished,
    Failed,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Unanalyzed => "unanalyzed",
            AnalysisState::Queued => "queued",
            AnalysisState::InProgress => "in_progress",
            AnalysisState::Finished => "finished",
            AnalysisState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unanalyzed" => Some(AnalysisState::Unanalyzed),
            "queued" => Some(AnalysisState::Queued),
            "in_progress" => Some(AnalysisState::InProgress),
            "finished" => Some(AnalysisState::Finished),
            "failed" => Some(AnalysisState::Failed),
            _ => None,
        }
    }
}

/// How a run was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunType {
    Initial,
    Retry,
    ManualRerun,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Initial => "initial",
            RunType::Retry => "retry",
            RunType::ManualRerun => "manual-rerun",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(RunType::Initial),
            "retry" => Some(RunType::Retry),
            "manual-rerun" => Some(RunType::ManualRerun),
            _ => None,
        }
    }
}

/// Full analysis record for a photo as stored.
#[derive(Debug, Clone)]
pub struct PhotoAnalysisRecord {
    pub photo_id: String,
    pub content_ref: PathBuf,
    pub state: AnalysisState,
    pub caption: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub classification: Option<Classification>,
    pub poi_analysis: Option<serde_json::Value>,
    pub collectible_insights: Option<serde_json::Value>,
    pub model_used: Option<String>,
    pub retry_count: u32,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).context("Failed to open database")?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Register a photo in state `unanalyzed`. Creation is normally the
    /// upload collaborator's concern; this is the seam it writes through.
    pub fn insert_photo(&self, photo_id: &str, content_ref: &Path) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO photos (photo_id, content_ref) VALUES (?, ?)",
            rusqlite::params![photo_id, content_ref.to_string_lossy()],
        )?;
        Ok(())
    }

    /// Read a photo's full analysis record.
    pub fn photo(&self, photo_id: &str) -> Result<Option<PhotoAnalysisRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                r#"
                SELECT photo_id, content_ref, state, caption, description, keywords,
                       classification, poi_analysis, collectible_insights,
                       model_used, retry_count
                FROM photos WHERE photo_id = ?
                "#,
                [photo_id],
                |row| {
                    Ok(PhotoAnalysisRecord {
                        photo_id: row.get(0)?,
                        content_ref: PathBuf::from(row.get::<_, String>(1)?),
                        state: AnalysisState::parse(&row.get::<_, String>(2)?)
                            .unwrap_or(AnalysisState::Unanalyzed),
                        caption: row.get(3)?,
                        description: row.get(4)?,
                        keywords: parse_json_strings(&row.get::<_, String>(5)?),
                        classification: parse_json_opt(row.get::<_, Option<String>>(6)?),
                        poi_analysis: parse_json_opt(row.get::<_, Option<String>>(7)?),
                        collectible_insights: parse_json_opt(row.get::<_, Option<String>>(8)?),
                        model_used: row.get(9)?,
                        retry_count: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

/// Current UTC time in the fixed-width RFC 3339 form stored in SQLite.
/// Fixed width keeps lexicographic and chronological order identical.
pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn after(delay: Duration) -> String {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
    (Utc::now() + delay).to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_json_strings(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn parse_json_opt<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_read_photo() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_photo("p1", Path::new("/photos/p1.jpg"))
            .unwrap();

        let record = store.photo("p1").unwrap().unwrap();
        assert_eq!(record.photo_id, "p1");
        assert_eq!(record.state, AnalysisState::Unanalyzed);
        assert_eq!(record.caption, "");
        assert!(record.keywords.is_empty());
        assert_eq!(record.retry_count, 0);
        assert!(store.photo("missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.insert_photo("p1", Path::new("/a.jpg")).unwrap();
        store.insert_photo("p1", Path::new("/b.jpg")).unwrap();

        let record = store.photo("p1").unwrap().unwrap();
        assert_eq!(record.content_ref, PathBuf::from("/a.jpg"));
    }

    #[test]
    fn test_open_creates_parent_dirs_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("photoscribe.db");

        let store = Store::open(&db_path).unwrap();
        store.insert_photo("p1", Path::new("/p1.jpg")).unwrap();
        drop(store);
        assert!(db_path.exists());

        let reopened = Store::open(&db_path).unwrap();
        assert!(reopened.photo("p1").unwrap().is_some());
    }

    #[test]
    fn test_timestamps_order_lexicographically() {
        let a = now_str();
        let b = after(Duration::from_secs(60));
        assert!(a < b);
        assert!(parse_timestamp(&a) < parse_timestamp(&b));
    }
}
