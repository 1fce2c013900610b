//! Job queue operations on the shared store.
//!
//! Every transition here runs inside a single transaction under the store's
//! connection mutex, which is what enforces the two core guarantees: at most
//! one job per photo in flight, and no two workers ever claiming the same
//! photo.

use anyhow::Result;
use rusqlite::{OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::validator::CanonicalMetadata;

use super::history::{insert_run, RunRecord};
use super::{after, now_str, AnalysisState, RunType, Store};

/// Strict priority: every high job dequeues before any normal job,
/// regardless of enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    fn rank(&self) -> i64 {
        match self {
            Priority::Normal => 0,
            Priority::High => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Candidate models in dispatch order. The caller resolves an empty
    /// request to the configured default list before enqueueing.
    pub models: Vec<String>,
    pub priority: Priority,
    pub run_type: RunType,
    /// Caller's choice whether a re-enqueue starts the retry budget over.
    pub reset_retries: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            priority: Priority::Normal,
            run_type: RunType::Initial,
            reset_retries: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyInFlight,
    UnknownPhoto,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::AlreadyInFlight => "alreadyInFlight",
            RejectReason::UnknownPhoto => "unknownPhoto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl EnqueueOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted)
    }
}

/// A job a worker has exclusive ownership of until it records an outcome
/// or its lease expires.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: i64,
    pub photo_id: String,
    pub content_ref: PathBuf,
    pub run_type: RunType,
    pub candidate_models: Vec<String>,
    pub retry_count: u32,
    /// Generation stamped at claim time. Outcome writes check it so a
    /// worker that outlived its lease cannot commit over a later claim.
    pub claim_generation: i64,
}

/// Where a failed run left the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Requeued { retry_count: u32 },
    FailedTerminal { retry_count: u32 },
    /// The reaper reclaimed the job while the run was in flight; the
    /// outcome was discarded.
    LeaseLost,
}

impl Store {
    /// Enqueue an analysis job for a photo.
    ///
    /// Dedup invariant: a photo already `queued` or `in_progress` is
    /// rejected, never queued twice. `unanalyzed`, `finished`, and `failed`
    /// photos transition to `queued`.
    pub fn enqueue(&self, photo_id: &str, options: &EnqueueOptions) -> Result<EnqueueOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let state: Option<String> = tx
            .query_row("SELECT state FROM photos WHERE photo_id = ?", [photo_id], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(state) = state.as_deref().and_then(AnalysisState::parse) else {
            return Ok(EnqueueOutcome::Rejected(RejectReason::UnknownPhoto));
        };

        if matches!(state, AnalysisState::Queued | AnalysisState::InProgress) {
            return Ok(EnqueueOutcome::Rejected(RejectReason::AlreadyInFlight));
        }

        if options.reset_retries {
            tx.execute(
                "UPDATE photos SET state = 'queued', retry_count = 0 WHERE photo_id = ?",
                [photo_id],
            )?;
        } else {
            tx.execute(
                "UPDATE photos SET state = 'queued' WHERE photo_id = ?",
                [photo_id],
            )?;
        }

        // No job row can exist for a photo in a terminal or unanalyzed
        // state, but stay idempotent about it.
        tx.execute("DELETE FROM analysis_jobs WHERE photo_id = ?", [photo_id])?;
        tx.execute(
            r#"
            INSERT INTO analysis_jobs (photo_id, priority, run_type, candidate_models, enqueued_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                photo_id,
                options.priority.rank(),
                options.run_type.as_str(),
                serde_json::to_string(&options.models)?,
                now_str(),
            ],
        )?;

        tx.commit()?;
        Ok(EnqueueOutcome::Accepted)
    }

    /// Atomically claim the next eligible job: highest priority first, FIFO
    /// within a tier, backoff gate respected. The claimed photo moves to
    /// `in_progress` and carries a lease.
    pub fn claim_next(&self, lease: Duration) -> Result<Option<ClaimedJob>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let job = tx
            .query_row(
                r#"
                SELECT j.id, j.photo_id, j.run_type, j.candidate_models,
                       p.content_ref, p.retry_count, j.claim_generation
                FROM analysis_jobs j
                JOIN photos p ON p.photo_id = j.photo_id
                WHERE p.state = 'queued'
                  AND (j.not_before IS NULL OR j.not_before <= ?)
                ORDER BY j.priority DESC, j.id ASC
                LIMIT 1
                "#,
                [now_str()],
                |row| {
                    Ok(ClaimedJob {
                        job_id: row.get(0)?,
                        photo_id: row.get(1)?,
                        run_type: RunType::parse(&row.get::<_, String>(2)?)
                            .unwrap_or(RunType::Initial),
                        candidate_models: serde_json::from_str(&row.get::<_, String>(3)?)
                            .unwrap_or_default(),
                        content_ref: PathBuf::from(row.get::<_, String>(4)?),
                        retry_count: row.get(5)?,
                        claim_generation: row.get::<_, i64>(6)? + 1,
                    })
                },
            )
            .optional()?;

        let Some(job) = job else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE photos SET state = 'in_progress' WHERE photo_id = ?",
            [&job.photo_id],
        )?;
        tx.execute(
            r#"
            UPDATE analysis_jobs
            SET lease_expires_at = ?, claim_generation = claim_generation + 1
            WHERE id = ?
            "#,
            rusqlite::params![after(lease), job.job_id],
        )?;

        tx.commit()?;
        Ok(Some(job))
    }

    /// Commit a successful run: canonical fields, model_used, and the
    /// `finished` state land in one UPDATE, the job row is removed, and the
    /// run record is appended, all in a single transaction. A poller never
    /// observes a partial result.
    ///
    /// Returns false when the claim went stale (the reaper reclaimed the job
    /// mid-run); a stale result is discarded without touching the photo.
    pub fn commit_success(
        &self,
        job: &ClaimedJob,
        metadata: &CanonicalMetadata,
        model_used: &str,
        models_attempted: Vec<String>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if !claim_is_live(&tx, job)? {
            return Ok(false);
        }

        tx.execute(
            r#"
            UPDATE photos
            SET state = 'finished', caption = ?, description = ?, keywords = ?,
                classification = ?, poi_analysis = ?, collectible_insights = ?,
                model_used = ?
            WHERE photo_id = ?
            "#,
            rusqlite::params![
                metadata.caption,
                metadata.description,
                serde_json::to_string(&metadata.keywords)?,
                metadata
                    .classification
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                metadata
                    .poi_analysis
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                metadata
                    .collectible_insights
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                model_used,
                job.photo_id,
            ],
        )?;
        tx.execute("DELETE FROM analysis_jobs WHERE id = ?", [job.job_id])?;

        let record = RunRecord::success(
            job.run_type,
            models_attempted,
            metadata.caption.clone(),
            metadata.keywords.clone(),
            metadata.classification.clone(),
        );
        insert_run(&tx, &job.photo_id, &record)?;

        tx.commit()?;
        Ok(true)
    }

    /// Record a run in which every candidate model failed. Increments the
    /// retry count and either requeues with exponential backoff or, once the
    /// budget of `max_retries + 1` total runs is spent, fails terminally.
    /// A stale claim records nothing and yields `LeaseLost`.
    pub fn record_run_failure(
        &self,
        job: &ClaimedJob,
        models_attempted: Vec<String>,
        note: &str,
        analysis: &AnalysisConfig,
    ) -> Result<RunOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if !claim_is_live(&tx, job)? {
            return Ok(RunOutcome::LeaseLost);
        }

        let outcome = fail_run_tx(
            &tx,
            &job.photo_id,
            job.job_id,
            job.retry_count,
            job.run_type,
            models_attempted,
            note,
            analysis,
        )?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Fail a job terminally without consuming retry budget. Used for
    /// configuration errors (no allowed candidates), which retrying cannot
    /// fix.
    pub fn fail_terminal(&self, job: &ClaimedJob, note: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if !claim_is_live(&tx, job)? {
            return Ok(());
        }

        tx.execute(
            "UPDATE photos SET state = 'failed' WHERE photo_id = ?",
            [&job.photo_id],
        )?;
        tx.execute("DELETE FROM analysis_jobs WHERE id = ?", [job.job_id])?;
        insert_run(
            &tx,
            &job.photo_id,
            &RunRecord::failure(job.run_type, Vec::new(), note),
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Reclaim jobs stuck `in_progress` past their lease. Each reclaim is
    /// one failed run: retry count increments by exactly one and the job is
    /// requeued (or failed terminally if the budget is spent).
    pub fn reap_expired(&self, analysis: &AnalysisConfig) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let expired: Vec<(i64, String, u32, RunType, Vec<String>)> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT j.id, j.photo_id, p.retry_count, j.run_type, j.candidate_models
                FROM analysis_jobs j
                JOIN photos p ON p.photo_id = j.photo_id
                WHERE p.state = 'in_progress'
                  AND j.lease_expires_at IS NOT NULL
                  AND j.lease_expires_at <= ?
                "#,
            )?;
            let rows = stmt
                .query_map([now_str()], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        RunType::parse(&row.get::<_, String>(3)?).unwrap_or(RunType::Initial),
                        serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let count = expired.len();
        for (job_id, photo_id, retry_count, run_type, models) in expired {
            fail_run_tx(
                &tx,
                &photo_id,
                job_id,
                retry_count,
                run_type,
                models,
                "lease expired",
                analysis,
            )?;
        }

        tx.commit()?;
        Ok(count)
    }

    /// Number of jobs currently queued or leased.
    pub fn pending_jobs(&self) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM analysis_jobs", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// A claim is live while its job row still carries the generation stamped at
/// claim time and the photo is still `in_progress`. A reap requeues the
/// photo, and any later claim bumps the generation, so both invalidate
/// outcomes from the worker that lost the lease.
fn claim_is_live(tx: &Transaction<'_>, job: &ClaimedJob) -> Result<bool> {
    let live = tx
        .query_row(
            r#"
            SELECT 1
            FROM analysis_jobs j
            JOIN photos p ON p.photo_id = j.photo_id
            WHERE j.id = ? AND j.claim_generation = ? AND p.state = 'in_progress'
            "#,
            rusqlite::params![job.job_id, job.claim_generation],
            |_| Ok(()),
        )
        .optional()?;
    Ok(live.is_some())
}

#[allow(clippy::too_many_arguments)]
fn fail_run_tx(
    tx: &Transaction<'_>,
    photo_id: &str,
    job_id: i64,
    prev_retry_count: u32,
    run_type: RunType,
    models_attempted: Vec<String>,
    note: &str,
    analysis: &AnalysisConfig,
) -> Result<RunOutcome> {
    let retry_count = prev_retry_count + 1;

    insert_run(
        tx,
        photo_id,
        &RunRecord::failure(run_type, models_attempted, note),
    )?;

    if retry_count > analysis.max_retries {
        tx.execute(
            "UPDATE photos SET state = 'failed', retry_count = ? WHERE photo_id = ?",
            rusqlite::params![retry_count, photo_id],
        )?;
        tx.execute("DELETE FROM analysis_jobs WHERE id = ?", [job_id])?;
        Ok(RunOutcome::FailedTerminal { retry_count })
    } else {
        tx.execute(
            "UPDATE photos SET state = 'queued', retry_count = ? WHERE photo_id = ?",
            rusqlite::params![retry_count, photo_id],
        )?;
        tx.execute(
            r#"
            UPDATE analysis_jobs
            SET not_before = ?, run_type = 'retry', lease_expires_at = NULL
            WHERE id = ?
            "#,
            rusqlite::params![after(analysis.backoff_delay(retry_count)), job_id],
        )?;
        Ok(RunOutcome::Requeued { retry_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    fn store_with(photos: &[&str]) -> Store {
        let store = Store::open_in_memory().unwrap();
        for id in photos {
            store
                .insert_photo(id, Path::new(&format!("/photos/{}.jpg", id)))
                .unwrap();
        }
        store
    }

    fn options(models: &[&str]) -> EnqueueOptions {
        EnqueueOptions {
            models: models.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    fn no_backoff() -> AnalysisConfig {
        AnalysisConfig {
            backoff_base_secs: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_enqueue_unknown_photo_rejected() {
        let store = store_with(&[]);
        let outcome = store.enqueue("ghost", &options(&["m1"])).unwrap();
        assert_eq!(
            outcome,
            EnqueueOutcome::Rejected(RejectReason::UnknownPhoto)
        );
    }

    #[test]
    fn test_dedup_while_queued_and_in_progress() {
        let store = store_with(&["p1"]);

        assert!(store.enqueue("p1", &options(&["m1"])).unwrap().accepted());
        assert_eq!(
            store.enqueue("p1", &options(&["m1"])).unwrap(),
            EnqueueOutcome::Rejected(RejectReason::AlreadyInFlight)
        );

        let job = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();
        assert_eq!(job.photo_id, "p1");
        assert_eq!(
            store.enqueue("p1", &options(&["m1"])).unwrap(),
            EnqueueOutcome::Rejected(RejectReason::AlreadyInFlight)
        );
    }

    #[test]
    fn test_concurrent_enqueue_accepts_exactly_one() {
        let store = Arc::new(store_with(&["p1"]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.enqueue("p1", &options(&["m1"])).unwrap().accepted()
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&accepted| accepted)
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_reenqueue_after_terminal_states() {
        let store = store_with(&["p1"]);
        store.enqueue("p1", &options(&["m1"])).unwrap();
        let job = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();
        assert!(store
            .commit_success(
                &job,
                &CanonicalMetadata::default(),
                "m1",
                vec!["m1".to_string()],
            )
            .unwrap());

        assert_eq!(
            store.photo("p1").unwrap().unwrap().state,
            AnalysisState::Finished
        );
        assert!(store.enqueue("p1", &options(&["m1"])).unwrap().accepted());
        assert_eq!(
            store.photo("p1").unwrap().unwrap().state,
            AnalysisState::Queued
        );
    }

    #[test]
    fn test_reset_retries_is_caller_choice() {
        let store = store_with(&["p1"]);
        let analysis = AnalysisConfig {
            max_retries: 0,
            backoff_base_secs: 0,
            ..Default::default()
        };

        store.enqueue("p1", &options(&["m1"])).unwrap();
        let job = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();
        store
            .record_run_failure(&job, vec!["m1".to_string()], "boom", &analysis)
            .unwrap();
        assert_eq!(store.photo("p1").unwrap().unwrap().retry_count, 1);

        // Without the flag the count survives a manual re-enqueue
        store.enqueue("p1", &options(&["m1"])).unwrap();
        assert_eq!(store.photo("p1").unwrap().unwrap().retry_count, 1);

        // Drain the job and fail again so the photo returns to failed
        let job = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();
        store
            .record_run_failure(&job, vec!["m1".to_string()], "boom", &analysis)
            .unwrap();

        let opts = EnqueueOptions {
            reset_retries: true,
            ..options(&["m1"])
        };
        store.enqueue("p1", &opts).unwrap();
        assert_eq!(store.photo("p1").unwrap().unwrap().retry_count, 0);
    }

    #[test]
    fn test_priority_beats_fifo() {
        let store = store_with(&["p1", "p2", "p3"]);

        store.enqueue("p1", &options(&["m1"])).unwrap();
        store.enqueue("p2", &options(&["m1"])).unwrap();
        let high = EnqueueOptions {
            priority: Priority::High,
            ..options(&["m1"])
        };
        store.enqueue("p3", &high).unwrap();

        let lease = Duration::from_secs(60);
        assert_eq!(store.claim_next(lease).unwrap().unwrap().photo_id, "p3");
        assert_eq!(store.claim_next(lease).unwrap().unwrap().photo_id, "p1");
        assert_eq!(store.claim_next(lease).unwrap().unwrap().photo_id, "p2");
        assert!(store.claim_next(lease).unwrap().is_none());
    }

    #[test]
    fn test_backoff_gates_eligibility() {
        let store = store_with(&["p1"]);
        let slow = AnalysisConfig {
            backoff_base_secs: 3600,
            backoff_cap_secs: 7200,
            ..Default::default()
        };

        store.enqueue("p1", &options(&["m1"])).unwrap();
        let job = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();
        let outcome = store
            .record_run_failure(&job, vec!["m1".to_string()], "timeout", &slow)
            .unwrap();
        assert_eq!(outcome, RunOutcome::Requeued { retry_count: 1 });

        // Queued but not yet eligible
        assert_eq!(
            store.photo("p1").unwrap().unwrap().state,
            AnalysisState::Queued
        );
        assert!(store.claim_next(Duration::from_secs(60)).unwrap().is_none());
    }

    #[test]
    fn test_retry_bound_is_max_retries_plus_one_runs() {
        let store = store_with(&["p1"]);
        let analysis = AnalysisConfig {
            max_retries: 3,
            backoff_base_secs: 0,
            ..Default::default()
        };

        store.enqueue("p1", &options(&["m1"])).unwrap();

        let mut runs = 0;
        loop {
            let job = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();
            runs += 1;
            let outcome = store
                .record_run_failure(&job, vec!["m1".to_string()], "boom", &analysis)
                .unwrap();
            if let RunOutcome::FailedTerminal { retry_count } = outcome {
                assert_eq!(retry_count, 4);
                break;
            }
        }

        assert_eq!(runs, 4); // max_retries + 1, never fewer, never more
        assert_eq!(
            store.photo("p1").unwrap().unwrap().state,
            AnalysisState::Failed
        );
        assert_eq!(store.runs_for_photo("p1").unwrap().len(), 4);
        assert!(store.claim_next(Duration::from_secs(60)).unwrap().is_none());
    }

    #[test]
    fn test_commit_success_populates_canonical_fields() {
        let store = store_with(&["p1"]);
        store.enqueue("p1", &options(&["m1", "m2"])).unwrap();
        let job = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();

        let metadata = CanonicalMetadata {
            caption: "A cat".to_string(),
            description: "A cat on a sofa".to_string(),
            keywords: vec!["cat".to_string(), "pet".to_string()],
            ..Default::default()
        };
        assert!(store
            .commit_success(&job, &metadata, "m2", vec!["m1".to_string(), "m2".to_string()])
            .unwrap());

        let record = store.photo("p1").unwrap().unwrap();
        assert_eq!(record.state, AnalysisState::Finished);
        assert_eq!(record.caption, "A cat");
        assert_eq!(record.description, "A cat on a sofa");
        assert_eq!(record.keywords, vec!["cat", "pet"]);
        assert_eq!(record.model_used.as_deref(), Some("m2"));

        let runs = store.runs_for_photo("p1").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].models_used, vec!["m1", "m2"]);
        assert!(runs[0].succeeded);
    }

    #[test]
    fn test_fail_terminal_skips_retry_budget() {
        let store = store_with(&["p1"]);
        store.enqueue("p1", &options(&["disallowed"])).unwrap();
        let job = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();

        store.fail_terminal(&job, "no allowed candidates").unwrap();

        let record = store.photo("p1").unwrap().unwrap();
        assert_eq!(record.state, AnalysisState::Failed);
        assert_eq!(record.retry_count, 0);
        assert_eq!(store.runs_for_photo("p1").unwrap().len(), 1);
    }

    #[test]
    fn test_reap_reclaims_expired_lease_exactly_once() {
        let store = store_with(&["p1"]);
        store.enqueue("p1", &options(&["m1"])).unwrap();

        // Zero lease: expired the moment it is claimed
        let job = store.claim_next(Duration::ZERO).unwrap().unwrap();
        assert_eq!(job.photo_id, "p1");

        let reaped = store.reap_expired(&no_backoff()).unwrap();
        assert_eq!(reaped, 1);

        let record = store.photo("p1").unwrap().unwrap();
        assert_eq!(record.state, AnalysisState::Queued);
        assert_eq!(record.retry_count, 1);

        // Nothing left to reap
        assert_eq!(store.reap_expired(&no_backoff()).unwrap(), 0);
    }

    #[test]
    fn test_stale_worker_cannot_commit_over_reclaimed_job() {
        let store = store_with(&["p1"]);
        store.enqueue("p1", &options(&["m1"])).unwrap();

        // First worker's lease expires and the reaper requeues the job
        let stale = store.claim_next(Duration::ZERO).unwrap().unwrap();
        assert_eq!(store.reap_expired(&no_backoff()).unwrap(), 1);

        // A second worker picks the job up
        let fresh = store.claim_next(Duration::from_secs(3600)).unwrap().unwrap();
        assert_eq!(fresh.photo_id, "p1");

        // The first worker finishes late; its result must not land
        assert!(!store
            .commit_success(
                &stale,
                &CanonicalMetadata::default(),
                "m1",
                vec!["m1".to_string()],
            )
            .unwrap());
        assert_eq!(
            store.photo("p1").unwrap().unwrap().state,
            AnalysisState::InProgress
        );

        // Nor may its failure path disturb the live claim or the ledger
        let outcome = store
            .record_run_failure(&stale, vec!["m1".to_string()], "late", &no_backoff())
            .unwrap();
        assert_eq!(outcome, RunOutcome::LeaseLost);
        assert_eq!(store.runs_for_photo("p1").unwrap().len(), 1);

        // The live claim commits normally
        assert!(store
            .commit_success(
                &fresh,
                &CanonicalMetadata::default(),
                "m1",
                vec!["m1".to_string()],
            )
            .unwrap());
        assert_eq!(
            store.photo("p1").unwrap().unwrap().state,
            AnalysisState::Finished
        );
    }

    #[test]
    fn test_stale_commit_after_reap_without_reclaim() {
        let store = store_with(&["p1"]);
        store.enqueue("p1", &options(&["m1"])).unwrap();

        let stale = store.claim_next(Duration::ZERO).unwrap().unwrap();
        assert_eq!(store.reap_expired(&no_backoff()).unwrap(), 1);

        // Requeued but not yet re-claimed: the stale commit still must not
        // move the photo off `queued`
        assert!(!store
            .commit_success(
                &stale,
                &CanonicalMetadata::default(),
                "m1",
                vec!["m1".to_string()],
            )
            .unwrap());
        assert_eq!(
            store.photo("p1").unwrap().unwrap().state,
            AnalysisState::Queued
        );
    }

    #[test]
    fn test_reap_ignores_live_leases() {
        let store = store_with(&["p1"]);
        store.enqueue("p1", &options(&["m1"])).unwrap();
        store.claim_next(Duration::from_secs(3600)).unwrap().unwrap();

        assert_eq!(store.reap_expired(&no_backoff()).unwrap(), 0);
        assert_eq!(
            store.photo("p1").unwrap().unwrap().state,
            AnalysisState::InProgress
        );
    }
}
