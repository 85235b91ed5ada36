//! Submission and polling engine
//!
//! Processes the records of one run strictly in order. Each valid record
//! that is not already registered is submitted once and then polled on a
//! fixed interval until it resolves or the attempt budget runs out:
//!
//! ```text
//! Pending -> Submitted -> { Success | Failed | Accepted }
//!    \-> Skipped (registered) / Failed (validation or create error)
//! ```
//!
//! Cancellation is checked between remote calls and interrupts poll sleeps.
//! Records not finished when the token fires get a `Shutdown` row.

use hwreg_common::events::{EventBus, UploadEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{IdentityRecord, PollSettings, RecordOutcome, ResultRow, ScanSettings};
use crate::services::clock::Sleeper;
use crate::services::duplicate_checker::DuplicateChecker;
use crate::services::registry_client::{mentions_already_assigned, DeviceRegistry, ImportStatus};

/// What the engine did with a run's records
#[derive(Debug, Clone)]
pub enum EngineRun {
    /// Every candidate is already registered; nothing was submitted
    Blocked { serials: Vec<String> },
    Completed {
        /// One entry per input record, in input order
        outcomes: Vec<RecordOutcome>,
        /// Records accepted by the create request
        uploaded: usize,
        cancelled: bool,
    },
}

/// Interpretation of one import status reading
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImportState {
    Registered,
    Rejected { reason: String, already_assigned: bool },
    InProgress,
}

fn interpret_status(status: &ImportStatus) -> ImportState {
    match status.status.trim().to_lowercase().as_str() {
        "complete" | "completed" | "success" => ImportState::Registered,
        "error" | "failed" => {
            let name = status.error_name.as_deref().unwrap_or_default();
            let code = status.error_code.as_deref().unwrap_or_default();
            let reason = match (name.is_empty(), code.is_empty()) {
                (false, false) => format!("{} ({})", name, code),
                (false, true) => name.to_string(),
                (true, false) => format!("Import error code {}", code),
                (true, true) => "Import failed without error details".to_string(),
            };
            ImportState::Rejected {
                reason,
                already_assigned: mentions_already_assigned(name) || mentions_already_assigned(code),
            }
        }
        _ => ImportState::InProgress,
    }
}

pub struct UploadEngine {
    registry: Arc<dyn DeviceRegistry>,
    checker: DuplicateChecker,
    sleeper: Arc<dyn Sleeper>,
    poll: PollSettings,
    events: EventBus,
}

impl UploadEngine {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        sleeper: Arc<dyn Sleeper>,
        poll: PollSettings,
        scan: ScanSettings,
        events: EventBus,
    ) -> Self {
        Self {
            checker: DuplicateChecker::new(Arc::clone(&registry), scan),
            registry,
            sleeper,
            poll,
            events,
        }
    }

    pub fn checker(&self) -> &DuplicateChecker {
        &self.checker
    }

    /// Run pre-flight checks, then submit and poll every record in order
    pub async fn run(
        &self,
        run_id: Uuid,
        records: Vec<IdentityRecord>,
        cancel: &CancellationToken,
    ) -> EngineRun {
        let total = records.len();
        let mut registered: HashSet<usize> = HashSet::new();

        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if record.is_valid() && self.checker.check_serial(record.serial_number()).await.blocking {
                registered.insert(index);
            }
        }

        self.events.emit_lossy(UploadEvent::PreflightChecked {
            run_id,
            candidates: total,
            already_registered: registered.len(),
        });

        if !cancel.is_cancelled() && total > 0 && registered.len() == total {
            let serials: Vec<String> = records
                .iter()
                .map(|r| r.serial_number().to_string())
                .collect();
            info!(run_id = %run_id, count = total, "All devices already registered, nothing to upload");
            return EngineRun::Blocked { serials };
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut uploaded = 0;
        let mut cancelled = false;

        for (index, record) in records.into_iter().enumerate() {
            let outcome = if cancelled || cancel.is_cancelled() {
                cancelled = true;
                RecordOutcome {
                    row: ResultRow::shutdown_unsubmitted(
                        record.serial_number(),
                        "Run stopped before this device was submitted",
                    ),
                    record,
                    submitted: false,
                }
            } else {
                self.events.emit_lossy(UploadEvent::RecordStarted {
                    run_id,
                    index,
                    total,
                    serial: record.serial_number().to_string(),
                });

                if registered.contains(&index) {
                    RecordOutcome {
                        row: ResultRow::duplicate(
                            record.serial_number(),
                            "Device is already registered",
                        ),
                        record,
                        submitted: false,
                    }
                } else {
                    self.process_record(run_id, record, cancel).await
                }
            };

            if outcome.submitted {
                uploaded += 1;
            }
            self.emit_record_completed(run_id, index, &outcome.row);
            outcomes.push(outcome);
        }

        EngineRun::Completed {
            outcomes,
            uploaded,
            cancelled: cancelled || cancel.is_cancelled(),
        }
    }

    /// Validate, guard, submit and poll one record
    pub async fn process_record(
        &self,
        run_id: Uuid,
        record: IdentityRecord,
        cancel: &CancellationToken,
    ) -> RecordOutcome {
        let serial = record.serial_number().to_string();

        if let Err(e) = record.validate() {
            warn!(run_id = %run_id, serial = %serial, error = %e, "Record failed validation");
            return unsubmitted(record, ResultRow::validation(&serial, e.to_string()));
        }

        let guard = self.checker.check_serial(&serial).await;
        if guard.blocking {
            info!(run_id = %run_id, serial = %serial, source = %guard.source, "Device already registered, skipping");
            return unsubmitted(
                record,
                ResultRow::duplicate(&serial, "Device is already registered"),
            );
        }

        if cancel.is_cancelled() {
            return unsubmitted(
                record,
                ResultRow::shutdown_unsubmitted(&serial, "Run stopped before submission"),
            );
        }

        let ticket = match self.registry.create_record(&record).await {
            Ok(ticket) => ticket,
            Err(e) if e.is_already_assigned() => {
                info!(run_id = %run_id, serial = %serial, "Registry reports device already assigned");
                return unsubmitted(record, ResultRow::duplicate(&serial, e.remote_message()));
            }
            Err(e) => {
                warn!(run_id = %run_id, serial = %serial, error = %e, "Upload failed");
                return unsubmitted(record, ResultRow::upload_error(&serial, e.remote_message()));
            }
        };

        let import_id = ticket.import_id;
        info!(
            run_id = %run_id,
            serial = %serial,
            import_id = import_id.as_deref().unwrap_or("none"),
            "Device submitted, polling for status"
        );

        let row = self
            .poll_until_resolved(run_id, &serial, import_id.as_deref(), cancel)
            .await;

        RecordOutcome {
            record,
            row,
            submitted: true,
        }
    }

    /// Poll a submitted record; at most `max_attempts` attempts
    async fn poll_until_resolved(
        &self,
        run_id: Uuid,
        serial: &str,
        import_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> ResultRow {
        let max_attempts = self.poll.max_attempts.max(1);
        let id_text = import_id.unwrap_or("none");

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return ResultRow::shutdown_submitted(
                    serial,
                    format!("Run stopped while polling; import id {}", id_text),
                );
            }

            self.events.emit_lossy(UploadEvent::PollAttempt {
                run_id,
                serial: serial.to_string(),
                attempt,
                max_attempts,
            });

            if let Some(id) = import_id {
                match self.registry.get_import_status(id).await {
                    Ok(status) => match interpret_status(&status) {
                        ImportState::Registered => {
                            info!(run_id = %run_id, serial = %serial, attempt, "Import complete");
                            return ResultRow::complete(serial, "Device registered");
                        }
                        ImportState::Rejected {
                            reason,
                            already_assigned: true,
                        } => {
                            info!(run_id = %run_id, serial = %serial, "Import reports device already assigned");
                            return ResultRow::duplicate(serial, reason);
                        }
                        ImportState::Rejected { reason, .. } => {
                            warn!(run_id = %run_id, serial = %serial, reason = %reason, "Import failed");
                            return ResultRow::import_error(serial, reason);
                        }
                        ImportState::InProgress => {
                            debug!(run_id = %run_id, serial = %serial, attempt, status = %status.status, "Import in progress");
                        }
                    },
                    Err(e) => {
                        warn!(run_id = %run_id, serial = %serial, attempt, error = %e, "Import status check failed");
                    }
                }
            }

            match self.registry.find_by_serial(serial).await {
                Ok(devices) if !devices.is_empty() => {
                    info!(run_id = %run_id, serial = %serial, attempt, "Device found in registry");
                    return ResultRow::complete(serial, "Device found in registry");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(run_id = %run_id, serial = %serial, attempt, error = %e, "Registry lookup failed during polling");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return ResultRow::shutdown_submitted(
                            serial,
                            format!("Run stopped while polling; import id {}", id_text),
                        );
                    }
                    _ = self.sleeper.sleep(self.poll.interval) => {}
                }
            }
        }

        info!(run_id = %run_id, serial = %serial, attempts = max_attempts, "Import still queued");
        ResultRow::queued(
            serial,
            format!(
                "Not resolved after {} attempts; import id {}",
                max_attempts, id_text
            ),
        )
    }

    fn emit_record_completed(&self, run_id: Uuid, index: usize, row: &ResultRow) {
        self.events.emit_lossy(UploadEvent::RecordCompleted {
            run_id,
            index,
            serial: row.serial.clone(),
            result: row.result.to_string(),
            status: row.status.to_string(),
            reason: row.reason.clone(),
        });
    }
}

fn unsubmitted(record: IdentityRecord, row: ResultRow) -> RecordOutcome {
    RecordOutcome {
        record,
        row,
        submitted: false,
    }
}
