//! Background execution supervisor
//!
//! Owns the single worker slot, the retained failed set and the last
//! outcome. A trigger while a run is in flight is rejected synchronously;
//! nothing is queued. Each run executes the full pipeline on a tokio task:
//!
//! credential check -> record source -> engine -> aggregation
//!
//! and publishes its outcome to the supervisor state under one lock, so
//! readers never see rows from one run next to the failed set of another.

use chrono::{DateTime, Utc};
use hwreg_common::events::{EventBus, UploadEvent};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::RunError;
use crate::models::{IdentityRecord, RunDefaults, UploadOutcome};
use crate::services::credentials::CredentialProvider;
use crate::services::record_source::{RecordInput, RecordSource, ResolvedRecords};
use crate::services::result_aggregator;
use crate::services::submission_engine::{EngineRun, UploadEngine};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Upload {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("No failed records to retry")]
    NothingToRetry,
}

/// The run's task ended without sending an outcome
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Upload {0} was interrupted before reporting an outcome")]
pub struct RunInterrupted(pub Uuid);

/// Input of one run
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub input: RecordInput,
    /// Serial used when the local machine reports none
    pub fallback_serial: Option<String>,
    /// Overrides for the configured run defaults
    pub defaults: RunDefaults,
}

impl UploadRequest {
    pub fn from_file(path: Option<std::path::PathBuf>) -> Self {
        Self {
            input: RecordInput::File(path),
            fallback_serial: None,
            defaults: RunDefaults::default(),
        }
    }
}

/// The steps one run goes through
pub struct Pipeline {
    credentials: Arc<dyn CredentialProvider>,
    source: RecordSource,
    engine: UploadEngine,
    events: EventBus,
}

impl Pipeline {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        source: RecordSource,
        engine: UploadEngine,
        events: EventBus,
    ) -> Self {
        Self {
            credentials,
            source,
            engine,
            events,
        }
    }

    /// Credential check and input resolution; no remote registry calls
    async fn prepare(
        &self,
        request: &UploadRequest,
        defaults: &RunDefaults,
    ) -> Result<ResolvedRecords, RunError> {
        self.credentials
            .get_valid_credential()
            .await
            .map_err(|e| RunError::Precondition(e.to_string()))?;

        let resolved = self
            .source
            .resolve(
                request.input.clone(),
                request.fallback_serial.as_deref(),
                defaults,
            )
            .await?;
        Ok(resolved)
    }

    /// Execute one run; returns its outcome and the terminal event to publish
    pub async fn execute(
        &self,
        run_id: Uuid,
        retry: bool,
        started_at: DateTime<Utc>,
        request: UploadRequest,
        defaults: RunDefaults,
        cancel: &CancellationToken,
    ) -> (UploadOutcome, UploadEvent) {
        self.events.emit_lossy(UploadEvent::RunStarted {
            run_id,
            retry,
            timestamp: started_at,
        });

        let resolved = match self.prepare(&request, &defaults).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Upload aborted");
                let outcome = UploadOutcome::aborted(run_id, retry, started_at, e.to_string());
                let event = UploadEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                    timestamp: outcome.ended_at,
                };
                return (outcome, event);
            }
        };

        info!(
            run_id = %run_id,
            retry,
            records = resolved.records.len(),
            generated = resolved.generated_file.is_some(),
            "Processing identity records"
        );

        match self.engine.run(run_id, resolved.records, cancel).await {
            EngineRun::Blocked { serials } => {
                let outcome = UploadOutcome::blocked(
                    run_id,
                    retry,
                    started_at,
                    &serials,
                    resolved.generated_file,
                );
                let event = UploadEvent::RunBlocked {
                    run_id,
                    serials,
                    timestamp: outcome.ended_at,
                };
                (outcome, event)
            }
            EngineRun::Completed {
                outcomes,
                uploaded,
                cancelled,
            } => {
                if cancelled {
                    warn!(run_id = %run_id, "Upload stopped before all records were resolved");
                    self.events.emit_lossy(UploadEvent::RunCancelled {
                        run_id,
                        timestamp: Utc::now(),
                    });
                }

                let outcome = result_aggregator::build_outcome(
                    run_id,
                    retry,
                    started_at,
                    &outcomes,
                    uploaded,
                    resolved.generated_file,
                );
                info!(
                    run_id = %run_id,
                    success = outcome.success,
                    total = outcome.summary.total,
                    succeeded = outcome.summary.success,
                    failed = outcome.summary.failed,
                    duplicate = outcome.summary.duplicate,
                    pending = outcome.summary.pending,
                    "Upload finished"
                );
                let event = UploadEvent::RunCompleted {
                    run_id,
                    success: outcome.success,
                    total: outcome.summary.total,
                    succeeded: outcome.summary.success,
                    failed: outcome.summary.failed,
                    duplicate: outcome.summary.duplicate,
                    pending: outcome.summary.pending,
                    timestamp: outcome.ended_at,
                };
                (outcome, event)
            }
        }
    }
}

struct ActiveRun {
    run_id: Uuid,
    retry: bool,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SupervisorState {
    active: Option<ActiveRun>,
    last_failed: Vec<IdentityRecord>,
    last_outcome: Option<UploadOutcome>,
}

/// Run currently in flight
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRunInfo {
    pub run_id: Uuid,
    pub retry: bool,
    pub started_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

/// Snapshot of the supervisor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub active: Option<ActiveRunInfo>,
    pub retained_failed: usize,
    pub last_outcome: Option<UploadOutcome>,
}

/// Completion handle for one run
pub struct RunHandle {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    rx: oneshot::Receiver<UploadOutcome>,
}

impl RunHandle {
    /// Wait for the run's outcome
    pub async fn wait(self) -> Result<UploadOutcome, RunInterrupted> {
        self.rx.await.map_err(|_| RunInterrupted(self.run_id))
    }
}

fn lock_state(state: &Mutex<SupervisorState>) -> MutexGuard<'_, SupervisorState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct UploadSupervisor {
    pipeline: Arc<Pipeline>,
    state: Arc<Mutex<SupervisorState>>,
    events: EventBus,
    base_defaults: RunDefaults,
    shutdown_grace: Duration,
}

impl UploadSupervisor {
    pub fn new(
        pipeline: Pipeline,
        events: EventBus,
        base_defaults: RunDefaults,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            state: Arc::new(Mutex::new(SupervisorState::default())),
            events,
            base_defaults,
            shutdown_grace,
        }
    }

    /// Start a run; rejected while another run is in flight
    pub fn start(&self, request: UploadRequest) -> Result<RunHandle, SupervisorError> {
        self.launch(request, false)
    }

    /// Start a run over the previous run's failed records
    pub fn start_retry(&self) -> Result<RunHandle, SupervisorError> {
        let records = {
            let state = lock_state(&self.state);
            if let Some(active) = &state.active {
                return Err(SupervisorError::AlreadyRunning(active.run_id));
            }
            state.last_failed.clone()
        };

        if records.is_empty() {
            return Err(SupervisorError::NothingToRetry);
        }

        info!(count = records.len(), "Retrying failed records");
        self.launch(
            UploadRequest {
                input: RecordInput::Records(records),
                fallback_serial: None,
                defaults: RunDefaults::default(),
            },
            true,
        )
    }

    fn launch(&self, request: UploadRequest, retry: bool) -> Result<RunHandle, SupervisorError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cancel = CancellationToken::new();

        // Slot check, spawn and handle store share one lock: an active run
        // always carries its task.
        let mut guard = lock_state(&self.state);
        if let Some(active) = &guard.active {
            warn!(active_run = %active.run_id, "Upload already running, trigger ignored");
            return Err(SupervisorError::AlreadyRunning(active.run_id));
        }

        let (tx, rx) = oneshot::channel();
        let pipeline = Arc::clone(&self.pipeline);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let defaults = self.base_defaults.overlay(&request.defaults);
        let run_cancel = cancel.clone();

        info!(run_id = %run_id, retry, "Upload started");

        let task = tokio::spawn(async move {
            let (outcome, terminal) = pipeline
                .execute(run_id, retry, started_at, request, defaults, &run_cancel)
                .await;

            {
                let mut state = lock_state(&state);
                if !outcome.is_aborted() {
                    state.last_failed = outcome.failed_records.clone();
                }
                state.last_outcome = Some(outcome.clone());
                if state.active.as_ref().map(|a| a.run_id) == Some(run_id) {
                    state.active = None;
                }
            }

            events.emit_lossy(terminal);
            let _ = tx.send(outcome);
        });

        guard.active = Some(ActiveRun {
            run_id,
            retry,
            started_at,
            cancel,
            task: Some(task),
        });

        Ok(RunHandle {
            run_id,
            started_at,
            rx,
        })
    }

    /// Signal the active run to stop; returns its id
    pub fn cancel(&self) -> Option<Uuid> {
        let state = lock_state(&self.state);
        state.active.as_ref().map(|active| {
            info!(run_id = %active.run_id, "Cancelling upload");
            active.cancel.cancel();
            active.run_id
        })
    }

    /// Cancel the active run and wait up to the grace period for it to finish
    pub async fn shutdown(&self) {
        let (run_id, task) = {
            let mut state = lock_state(&self.state);
            match state.active.as_mut() {
                Some(active) => {
                    active.cancel.cancel();
                    (active.run_id, active.task.take())
                }
                None => return,
            }
        };

        let Some(task) = task else {
            return;
        };

        let abort = task.abort_handle();
        match tokio::time::timeout(self.shutdown_grace, task).await {
            Ok(_) => info!(run_id = %run_id, "Upload stopped for shutdown"),
            Err(_) => {
                warn!(run_id = %run_id, grace = ?self.shutdown_grace, "Upload did not stop in time, aborting");
                abort.abort();
                let mut state = lock_state(&self.state);
                if state.active.as_ref().map(|a| a.run_id) == Some(run_id) {
                    state.active = None;
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock_state(&self.state).active.is_some()
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = lock_state(&self.state);
        SupervisorStatus {
            active: state.active.as_ref().map(|a| ActiveRunInfo {
                run_id: a.run_id,
                retry: a.retry,
                started_at: a.started_at,
                cancel_requested: a.cancel.is_cancelled(),
            }),
            retained_failed: state.last_failed.len(),
            last_outcome: state.last_outcome.clone(),
        }
    }

    /// Records the next retry run would process
    pub fn failed_records(&self) -> Vec<IdentityRecord> {
        lock_state(&self.state).last_failed.clone()
    }

    /// Drop the retained failed set; returns how many records were dropped
    pub fn clear_failed(&self) -> usize {
        let mut state = lock_state(&self.state);
        let count = state.last_failed.len();
        state.last_failed.clear();
        count
    }

    pub fn last_outcome(&self) -> Option<UploadOutcome> {
        lock_state(&self.state).last_outcome.clone()
    }
}
