//! Dispatcher and worker pool.
//!
//! Workers claim jobs from the queue and walk the job's candidate models in
//! order: allowlist check, provider call, validation. The first accepted
//! result finishes the job; exhausting every candidate is one failed run,
//! fed into the retry state machine in the store. All per-attempt errors are
//! absorbed and recorded here; callers only ever observe a state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::allowlist::ModelAllowlist;
use crate::config::AnalysisConfig;
use crate::db::{ClaimedJob, RunOutcome, Store};
use crate::llm::{AnalysisRequest, ModelRegistry};
use crate::validator;

/// Where a single run left its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCompletion {
    Finished { model_used: String },
    Retrying { retry_count: u32 },
    Failed { retry_count: u32 },
    /// No allowed, bound candidate model existed; terminal without
    /// consuming retry budget.
    ConfigError,
    /// The reaper reclaimed the job mid-run; the outcome was discarded and
    /// the job belongs to whoever claims it next.
    LeaseLost,
}

pub struct Dispatcher {
    store: Arc<Store>,
    registry: Arc<ModelRegistry>,
    allowlist: ModelAllowlist,
    analysis: AnalysisConfig,
    request: AnalysisRequest,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ModelRegistry>,
        allowlist: ModelAllowlist,
        analysis: AnalysisConfig,
    ) -> Self {
        let request = AnalysisRequest::from_config(&analysis);
        Self {
            store,
            registry,
            allowlist,
            analysis,
            request,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Execute one claimed job to completion of its run.
    pub fn run_claimed_job(&self, job: &ClaimedJob) -> Result<JobCompletion> {
        let mut attempted: Vec<String> = Vec::new();
        let mut last_note = String::from("no models attempted");

        for model in &job.candidate_models {
            if !self.allowlist.is_allowed(model) {
                warn!(photo = %job.photo_id, model = %model, "model not allowlisted, skipping");
                continue;
            }

            let Some(provider) = self.registry.get(model) else {
                warn!(photo = %job.photo_id, model = %model, "no provider binding, skipping");
                continue;
            };

            debug!(photo = %job.photo_id, model = %model,
                   provider = provider.provider_name(), "invoking model");
            attempted.push(model.clone());

            let raw = match provider.analyze(&job.content_ref, &self.request) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(photo = %job.photo_id, model = %model, error = %e, "provider call failed");
                    last_note = format!("{}: {}", model, e);
                    continue;
                }
            };

            match validator::validate(&raw) {
                Ok(metadata) => {
                    if self.store.commit_success(job, &metadata, model, attempted)? {
                        info!(photo = %job.photo_id, model = %model, "analysis finished");
                        return Ok(JobCompletion::Finished {
                            model_used: model.clone(),
                        });
                    }
                    warn!(photo = %job.photo_id, "lease reclaimed mid-run, result discarded");
                    return Ok(JobCompletion::LeaseLost);
                }
                Err(e) => {
                    warn!(photo = %job.photo_id, model = %model, error = %e, "validation failed");
                    last_note = format!("{}: validation: {}", model, e);
                    continue;
                }
            }
        }

        if attempted.is_empty() {
            // Configuration error: nothing was invokable. Retrying cannot
            // change the outcome, so fail terminally right away.
            error!(photo = %job.photo_id, "no allowed candidate models, failing job");
            self.store
                .fail_terminal(job, "no allowed candidate models")?;
            return Ok(JobCompletion::ConfigError);
        }

        let outcome =
            self.store
                .record_run_failure(job, attempted, &last_note, &self.analysis)?;
        match outcome {
            RunOutcome::Requeued { retry_count } => {
                info!(photo = %job.photo_id, retry_count, "run failed, requeued with backoff");
                Ok(JobCompletion::Retrying { retry_count })
            }
            RunOutcome::FailedTerminal { retry_count } => {
                error!(photo = %job.photo_id, retry_count, "retries exhausted, job failed");
                Ok(JobCompletion::Failed { retry_count })
            }
            RunOutcome::LeaseLost => {
                warn!(photo = %job.photo_id, "lease reclaimed mid-run, failure discarded");
                Ok(JobCompletion::LeaseLost)
            }
        }
    }

    /// Claim and run eligible jobs until the queue yields none. Jobs parked
    /// behind a backoff gate are left for a later pass.
    pub fn drain(&self) -> Result<usize> {
        let lease = self.analysis.lease_timeout();
        let mut processed = 0;

        while let Some(job) = self.store.claim_next(lease)? {
            self.run_claimed_job(&job)?;
            processed += 1;
        }

        Ok(processed)
    }
}

/// Fixed-size pool of worker threads plus the lease reaper.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(dispatcher: Arc<Dispatcher>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let lease = dispatcher.analysis.lease_timeout();
        let idle = Duration::from_secs(dispatcher.analysis.idle_poll_secs.max(1));
        let mut handles = Vec::new();

        for worker in 0..dispatcher.analysis.worker_count.max(1) {
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = Arc::clone(&shutdown);
            handles.push(thread::spawn(move || {
                debug!(worker, "worker started");
                while !shutdown.load(Ordering::SeqCst) {
                    match dispatcher.store.claim_next(lease) {
                        Ok(Some(job)) => {
                            if let Err(e) = dispatcher.run_claimed_job(&job) {
                                error!(worker, photo = %job.photo_id, error = %e,
                                       "job processing error");
                            }
                        }
                        Ok(None) => thread::sleep(idle),
                        Err(e) => {
                            error!(worker, error = %e, "queue claim error");
                            thread::sleep(idle);
                        }
                    }
                }
                debug!(worker, "worker stopped");
            }));
        }

        // Reaper: reclaims jobs whose worker died mid-run
        {
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = Arc::clone(&shutdown);
            let interval = Duration::from_secs((lease.as_secs() / 2).max(1));
            handles.push(thread::spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    match dispatcher.store.reap_expired(&dispatcher.analysis) {
                        Ok(0) => {}
                        Ok(n) => warn!(reclaimed = n, "reaper requeued stuck jobs"),
                        Err(e) => error!(error = %e, "reaper error"),
                    }
                    thread::sleep(interval);
                }
            }));
        }

        Self { handles, shutdown }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn join(self) {
        self.request_shutdown();
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}
