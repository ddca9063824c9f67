//! # Offline Replay Engine
//!
//! Replays queued receipts strictly in order when connectivity returns.
//!
//! ## Replay Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Replay of One Device                                │
//! │                                                                         │
//! │  take the device gate (no concurrent submissions during replay)        │
//! │  load pending entries, ASCENDING by receipt_global_no                  │
//! │  expected = last CONFIRMED number + 1                                  │
//! │                                                                         │
//! │  for each entry, sequentially (NEVER in parallel):                     │
//! │    entry failed & unreviewed? ──► HALT (manual review)                 │
//! │    number != expected?        ──► HALT FATAL: gap. Lock device,        │
//! │                                   audit, human escalation.             │
//! │    hash doesn't chain?        ──► HALT FATAL: chain mismatch.          │
//! │    submit (backoff on transient)                                       │
//! │       confirmed ──► expected += 1, next entry                          │
//! │       offline   ──► entry back to queued, halt this run               │
//! │       auth      ──► device locked (by submitter), halt                 │
//! │       rejected  ──► entry failed, needs review, halt                   │
//! │                                                                         │
//! │  Entries are never reordered, skipped, or deleted.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A fatal halt (gap or hash mismatch) locks the device's submissions:
//! nothing moves again until a human resolves the chain and unlocks it.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::GatewayClient;
use crate::submitter::ReceiptSubmitter;
use sable_core::{OfflineQueueEntry, QueueState, Receipt};
use sable_db::actions;

// =============================================================================
// Replay Report
// =============================================================================

/// Outcome of one replay run for one device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplayReport {
    /// Receipts confirmed during this run.
    pub submitted: u32,

    /// Why the run stopped early, if it did.
    pub halted_reason: Option<String>,

    /// True when the halt is a human-escalated ordering/chain/auth
    /// condition; the device is locked and replay must not be re-run
    /// until an operator intervenes.
    pub fatal: bool,

    /// Last error observed, for operator display.
    pub last_error: Option<String>,
}

impl ReplayReport {
    fn halted(reason: impl Into<String>, fatal: bool, last_error: Option<String>) -> Self {
        ReplayReport {
            submitted: 0,
            halted_reason: Some(reason.into()),
            fatal,
            last_error,
        }
    }
}

// =============================================================================
// Replay Engine
// =============================================================================

/// Sequential, ordered replay of a device's offline queue.
pub struct ReplayEngine<G: GatewayClient> {
    submitter: ReceiptSubmitter<G>,
    retry: RetryConfig,
}

impl<G: GatewayClient> ReplayEngine<G> {
    /// Creates a replay engine on top of a submitter.
    pub fn new(submitter: ReceiptSubmitter<G>, retry: RetryConfig) -> Self {
        ReplayEngine { submitter, retry }
    }

    /// Borrow the underlying submitter (shared device gates).
    pub fn submitter(&self) -> &ReceiptSubmitter<G> {
        &self.submitter
    }

    /// Replays all queued receipts for one device, strictly in order.
    ///
    /// Returns a report rather than an error for operational halts
    /// (offline again, review required, ordering violation); `Err` is
    /// reserved for storage failures.
    pub async fn replay_device(&self, device_id: i64) -> SyncResult<ReplayReport> {
        let db = self.submitter.db().clone();
        let gate = self.submitter.gates().gate(device_id);
        let _in_flight = gate.lock().await;

        let device = db.devices().get_required(device_id).await?;
        if device.submissions_locked {
            return Ok(ReplayReport::halted(
                "device submissions locked pending manual resolution",
                true,
                None,
            ));
        }

        let entries = db.queue().pending(device_id).await?;
        if entries.is_empty() {
            return Ok(ReplayReport::default());
        }

        info!(device_id, count = entries.len(), "Replaying offline queue");

        let mut report = ReplayReport::default();
        let mut expected = device.last_receipt_global_no + 1;

        for entry in entries {
            if entry.state == QueueState::Failed {
                report.halted_reason =
                    Some("failed entry awaits manual review before replay resumes".to_string());
                report.last_error = entry.last_error.clone();
                break;
            }

            // Ordering check BEFORE submitting anything.
            if entry.receipt_global_no != expected {
                return Ok(self
                    .halt_fatal(
                        device_id,
                        SyncError::OrderingGap {
                            device_id,
                            expected,
                            found: entry.receipt_global_no,
                        },
                        report.submitted,
                    )
                    .await?);
            }

            let receipt = db
                .receipts()
                .get_by_id(&entry.receipt_id)
                .await?
                .ok_or_else(|| {
                    SyncError::Db(sable_db::DbError::not_found("Receipt", &entry.receipt_id))
                })?;

            // Chain check against the stored predecessor.
            if let Err(err) = self.verify_chain(&receipt).await? {
                return Ok(self.halt_fatal(device_id, err, report.submitted).await?);
            }

            db.queue().mark_submitting(&entry.id).await?;

            match self.submit_with_backoff(&receipt, &entry).await {
                Ok(()) => {
                    report.submitted += 1;
                    expected += 1;
                }
                Err(err) if err.is_transient() => {
                    warn!(device_id, global_no = entry.receipt_global_no, "Still offline, replay paused");
                    db.queue().requeue(&entry.id).await?;
                    report.halted_reason = Some("gateway unreachable, will retry".to_string());
                    report.last_error = Some(err.to_string());
                    break;
                }
                Err(err) if err.is_fatal_gateway() => {
                    // Device already locked by the submitter.
                    db.queue().requeue(&entry.id).await?;
                    report.halted_reason =
                        Some("gateway authentication failed, device locked".to_string());
                    report.fatal = true;
                    report.last_error = Some(err.to_string());
                    break;
                }
                Err(err) => {
                    db.queue().mark_failed(&entry.id, &err.to_string()).await?;
                    report.halted_reason =
                        Some("submission rejected, manual review required".to_string());
                    report.last_error = Some(err.to_string());
                    break;
                }
            }
        }

        info!(
            device_id,
            submitted = report.submitted,
            halted = report.halted_reason.as_deref().unwrap_or("-"),
            "Replay run finished"
        );
        Ok(report)
    }

    /// Checks the receipt's stored previous-hash against its predecessor
    /// row. `Ok(Err(_))` means a fatal chain violation.
    async fn verify_chain(&self, receipt: &Receipt) -> SyncResult<Result<(), SyncError>> {
        let db = self.submitter.db();

        if receipt.receipt_counter == 1 {
            if receipt.previous_receipt_hash.is_some() {
                return Ok(Err(SyncError::ChainMismatch {
                    device_id: receipt.device_id,
                    receipt_global_no: receipt.receipt_global_no,
                }));
            }
            return Ok(Ok(()));
        }

        let predecessor = db
            .receipts()
            .get_by_global_no(receipt.device_id, receipt.receipt_global_no - 1)
            .await?;

        let chained = matches!(
            &predecessor,
            Some(prev)
                if prev.fiscal_day_no == receipt.fiscal_day_no
                    && receipt.previous_receipt_hash.as_deref() == Some(prev.receipt_hash.as_str())
        );

        if chained {
            Ok(Ok(()))
        } else {
            Ok(Err(SyncError::ChainMismatch {
                device_id: receipt.device_id,
                receipt_global_no: receipt.receipt_global_no,
            }))
        }
    }

    /// Fatal ordering/chain halt: audit, lock the device, report.
    async fn halt_fatal(
        &self,
        device_id: i64,
        err: SyncError,
        submitted: u32,
    ) -> SyncResult<ReplayReport> {
        error!(device_id, error = %err, "FATAL replay halt, escalating to operator");

        let db = self.submitter.db();
        db.audit()
            .record(
                Some(device_id),
                actions::ORDERING_HALTED,
                json!({ "error": err.to_string() }),
            )
            .await?;
        db.devices().lock_submissions(device_id).await?;
        db.audit()
            .record(
                Some(device_id),
                actions::DEVICE_LOCKED,
                json!({ "reason": "replay ordering violation" }),
            )
            .await?;

        let mut report = ReplayReport::halted(err.to_string(), true, Some(err.to_string()));
        report.submitted = submitted;
        Ok(report)
    }

    /// Submits one queued receipt, retrying transient failures with
    /// exponential backoff up to the configured attempt budget.
    async fn submit_with_backoff(
        &self,
        receipt: &Receipt,
        entry: &OfflineQueueEntry,
    ) -> SyncResult<()> {
        let db = self.submitter.db();
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.retry.initial_backoff_ms),
            max_interval: Duration::from_secs(self.retry.max_backoff_secs),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let mut attempts = 0u32;
        loop {
            match self.submitter.submit_unlocked(receipt).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() => {
                    attempts += 1;
                    db.queue().record_attempt(&entry.id, &err.to_string()).await?;
                    if attempts >= self.retry.max_attempts {
                        return Err(err);
                    }
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(Duration::from_secs(self.retry.max_backoff_secs));
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
