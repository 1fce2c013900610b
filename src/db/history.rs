//! Append-only run history ledger.
//!
//! One record per completed run, success or failure, in completion order.
//! This is the system of record for what was tried, independent of the
//! photo's current canonical fields.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use serde::{Deserialize, Serialize};

use crate::validator::Classification;

use super::{parse_timestamp, RunType, Store};

/// One element of a photo's model history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub completed_at: DateTime<Utc>,
    pub run_type: RunType,
    /// Every model attempted during the run, in attempt order, including
    /// failed attempts before a succeeding one.
    pub models_used: Vec<String>,
    pub caption: String,
    pub keywords: Vec<String>,
    pub classification: Option<Classification>,
    pub succeeded: bool,
    /// Distinguishes transport failures from validation failures; the retry
    /// policy treats both the same, the ledger does not.
    pub failure_note: Option<String>,
}

impl RunRecord {
    pub fn success(
        run_type: RunType,
        models_used: Vec<String>,
        caption: String,
        keywords: Vec<String>,
        classification: Option<Classification>,
    ) -> Self {
        Self {
            completed_at: Utc::now(),
            run_type,
            models_used,
            caption,
            keywords,
            classification,
            succeeded: true,
            failure_note: None,
        }
    }

    pub fn failure(run_type: RunType, models_used: Vec<String>, note: impl Into<String>) -> Self {
        Self {
            completed_at: Utc::now(),
            run_type,
            models_used,
            caption: String::new(),
            keywords: Vec::new(),
            classification: None,
            succeeded: false,
            failure_note: Some(note.into()),
        }
    }
}

/// Insert a run record inside an existing transaction, so the append commits
/// together with the state transition it describes.
pub(crate) fn insert_run(tx: &Transaction<'_>, photo_id: &str, record: &RunRecord) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO model_history
            (photo_id, completed_at, run_type, models_used, caption, keywords,
             classification, succeeded, failure_note)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        rusqlite::params![
            photo_id,
            record
                .completed_at
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            record.run_type.as_str(),
            serde_json::to_string(&record.models_used)?,
            record.caption,
            serde_json::to_string(&record.keywords)?,
            record
                .classification
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            record.succeeded,
            record.failure_note,
        ],
    )?;
    Ok(())
}

impl Store {
    /// Append a run record to a photo's history.
    pub fn append_run(&self, photo_id: &str, record: &RunRecord) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        insert_run(&tx, photo_id, record)?;
        tx.commit()?;
        Ok(())
    }

    /// Full audit trail for a photo, in append order.
    pub fn runs_for_photo(&self, photo_id: &str) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT completed_at, run_type, models_used, caption, keywords,
                   classification, succeeded, failure_note
            FROM model_history
            WHERE photo_id = ?
            ORDER BY id ASC
            "#,
        )?;

        let records = stmt
            .query_map([photo_id], |row| {
                Ok(RunRecord {
                    completed_at: parse_timestamp(&row.get::<_, String>(0)?),
                    run_type: RunType::parse(&row.get::<_, String>(1)?)
                        .unwrap_or(RunType::Initial),
                    models_used: serde_json::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or_default(),
                    caption: row.get(3)?,
                    keywords: serde_json::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or_default(),
                    classification: row
                        .get::<_, Option<String>>(5)?
                        .and_then(|s| serde_json::from_str(&s).ok()),
                    succeeded: row.get(6)?,
                    failure_note: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_appends_preserve_order_and_content() {
        let store = Store::open_in_memory().unwrap();
        store.insert_photo("p1", Path::new("/p1.jpg")).unwrap();

        store
            .append_run(
                "p1",
                &RunRecord::failure(RunType::Initial, vec!["m1".to_string()], "timeout"),
            )
            .unwrap();
        store
            .append_run(
                "p1",
                &RunRecord::success(
                    RunType::Retry,
                    vec!["m1".to_string(), "m2".to_string()],
                    "A cat".to_string(),
                    vec!["cat".to_string()],
                    None,
                ),
            )
            .unwrap();

        let runs = store.runs_for_photo("p1").unwrap();
        assert_eq!(runs.len(), 2);
        assert!(!runs[0].succeeded);
        assert_eq!(runs[0].failure_note.as_deref(), Some("timeout"));
        assert!(runs[1].succeeded);
        assert_eq!(runs[1].models_used, vec!["m1", "m2"]);
        assert_eq!(runs[1].caption, "A cat");
    }

    #[test]
    fn test_histories_are_per_photo() {
        let store = Store::open_in_memory().unwrap();
        store.insert_photo("p1", Path::new("/p1.jpg")).unwrap();
        store.insert_photo("p2", Path::new("/p2.jpg")).unwrap();

        store
            .append_run(
                "p1",
                &RunRecord::failure(RunType::Initial, vec!["m1".to_string()], "x"),
            )
            .unwrap();

        assert_eq!(store.runs_for_photo("p1").unwrap().len(), 1);
        assert!(store.runs_for_photo("p2").unwrap().is_empty());
    }
}
