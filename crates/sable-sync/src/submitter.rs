//! # Receipt Submitter
//!
//! The per-receipt fiscalisation pipeline.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Fiscalisation Pipeline                              │
//! │                                                                         │
//! │  ReceiptDraft                                                          │
//! │       │                                                                 │
//! │       ▼ resolve document type (server-side, from intent + buyer)       │
//! │       ▼ build lines (totals, HS codes), VAT gate                       │
//! │       ▼ correction rules (reference, distinct number, currency, age)   │
//! │       ▼ SIGN RULE  (credit negative, sale/debit positive)              │
//! │       ▼ tax buckets (insertion order) + total reconciliation           │
//! │       ▼ duplicate guard fast-fail                                      │
//! │       ▼ ┌───────────── one exclusive transaction ─────────────┐        │
//! │         │ allocate global no + previous hash                  │        │
//! │         │ build canonical string                              │        │
//! │         │ SHA-256 + Ed25519 sign                              │        │
//! │         │ insert receipt row (UNIQUE indexes = authority)     │        │
//! │         └─────────────────────────────────────────────────────┘        │
//! │       ▼                                                                 │
//! │  submit to gateway ──► verified ack ──► confirm (counter advances)     │
//! │       │                                                                 │
//! │       └─ transient ──► resolve via GetStatus, else ENQUEUE             │
//! │       └─ auth/cert ──► LOCK DEVICE                                     │
//! │       └─ rejected / bad counter-signature ──► FAILED (review)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One submission at a time per device: every public entry point takes
//! the device's async gate before touching the gateway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::gateway::{GatewayAck, GatewayClient, GatewayError, SubmitPayload};
use sable_core::canonical::{build_canonical, CanonicalFields};
use sable_core::crypto::{GatewayVerifier, ReceiptSigner};
use sable_core::sign::{apply_sign, apply_sign_bucket, apply_sign_line};
use sable_core::tax::{aggregate, reconcile, total_from_buckets};
use sable_core::validation::{
    build_lines, validate_correction, validate_day, validate_device, validate_vat_registration,
    LINE_TOTAL_TOLERANCE_CENTS,
};
use sable_core::{
    CoreError, DraftKind, Receipt, ReceiptDraft, ReceiptStatus, ValidationError,
};
use sable_db::{actions, Database};

// =============================================================================
// Per-Device Gates
// =============================================================================

/// Async mutex per device: one in-flight submission per device, and the
/// replay engine holds the same gate for a whole replay run.
#[derive(Clone, Default)]
pub(crate) struct DeviceGates {
    inner: Arc<StdMutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl DeviceGates {
    pub(crate) fn gate(&self, device_id: i64) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(device_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

// =============================================================================
// Receipt Submitter
// =============================================================================

/// Builds, signs, and submits receipts.
pub struct ReceiptSubmitter<G: GatewayClient> {
    db: Database,
    gateway: Arc<G>,
    verifier: Option<GatewayVerifier>,
    gates: DeviceGates,
}

// Clones share the gateway, the pool, and the per-device gates.
impl<G: GatewayClient> Clone for ReceiptSubmitter<G> {
    fn clone(&self) -> Self {
        ReceiptSubmitter {
            db: self.db.clone(),
            gateway: Arc::clone(&self.gateway),
            verifier: self.verifier.clone(),
            gates: self.gates.clone(),
        }
    }
}

impl<G: GatewayClient> ReceiptSubmitter<G> {
    /// Creates a submitter.
    ///
    /// `verifier` holds the gateway's public key; without it only the
    /// PRESENCE of a counter-signature is enforced.
    pub fn new(db: Database, gateway: Arc<G>, verifier: Option<GatewayVerifier>) -> Self {
        ReceiptSubmitter {
            db,
            gateway,
            verifier,
            gates: DeviceGates::default(),
        }
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn gates(&self) -> &DeviceGates {
        &self.gates
    }

    /// Fiscalises a draft end to end: build, sign, then submit — or
    /// enqueue when the gateway is unreachable.
    ///
    /// Returns the receipt in its final state for this call: `Submitted`
    /// when confirmed, `Queued` when parked for replay. Validation,
    /// duplicate, rejection, and auth failures are errors; the audit
    /// trail records every rejection.
    pub async fn fiscalise(&self, draft: ReceiptDraft) -> SyncResult<Receipt> {
        let gate = self.gates.gate(draft.device_id);
        let _in_flight = gate.lock().await;

        let receipt = match self.build_receipt(&draft).await {
            Ok(receipt) => receipt,
            Err(err) => {
                self.audit_rejection(draft.device_id, &err).await;
                return Err(err);
            }
        };

        match self.submit_unlocked(&receipt).await {
            Ok(()) => self.reload(&receipt.id).await,
            Err(err) if err.is_transient() => {
                self.db.queue().enqueue(&receipt).await?;
                self.db
                    .audit()
                    .record(
                        Some(receipt.device_id),
                        actions::RECEIPT_QUEUED,
                        json!({
                            "global_no": receipt.receipt_global_no,
                            "invoice_no": receipt.invoice_no,
                            "reason": err.to_string(),
                        }),
                    )
                    .await?;
                info!(
                    device_id = receipt.device_id,
                    global_no = receipt.receipt_global_no,
                    "Gateway unreachable, receipt queued for replay"
                );
                self.reload(&receipt.id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Re-submits an already built/failed receipt under the device gate.
    ///
    /// The receipt keeps its allocated number and previous hash; there is
    /// no re-allocation path.
    pub async fn submit_built(&self, receipt_id: &str) -> SyncResult<Receipt> {
        let receipt = self
            .db
            .receipts()
            .get_by_id(receipt_id)
            .await?
            .ok_or_else(|| {
                SyncError::Db(sable_db::DbError::not_found("Receipt", receipt_id))
            })?;

        let gate = self.gates.gate(receipt.device_id);
        let _in_flight = gate.lock().await;

        if receipt.status == ReceiptStatus::Submitted {
            return Ok(receipt);
        }
        self.submit_unlocked(&receipt).await?;
        self.reload(&receipt.id).await
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Builds, validates, allocates, canonicalizes, signs, and persists a
    /// receipt with status `Built`. No gateway interaction.
    pub async fn build_receipt(&self, draft: &ReceiptDraft) -> SyncResult<Receipt> {
        let now = Utc::now();

        let device = self.db.devices().get_required(draft.device_id).await?;
        validate_device(&device, now)?;

        let day = self
            .db
            .fiscal_days()
            .current_open(draft.device_id)
            .await?
            .ok_or(SyncError::NoOpenDay {
                device_id: draft.device_id,
            })?;
        validate_day(&day)?;

        let document_type = draft.document_type()?;
        let mut lines = build_lines(&draft.lines)?;
        validate_vat_registration(device.is_vat_registered, &lines)?;

        let invoice_no = match &draft.invoice_no {
            Some(number) => number.clone(),
            None => self.db.sequences().next_number(document_type).await?,
        };

        // Correction linkage, validated against the stored original.
        let mut original_invoice_no = None;
        let mut original_receipt_global_no = None;
        let mut reason = None;
        if let DraftKind::Correction {
            original_invoice_no: orig_no,
            original_receipt_global_no: orig_global,
            reason: correction_reason,
            ..
        } = &draft.kind
        {
            let original = self
                .db
                .receipts()
                .get_by_global_no(draft.device_id, *orig_global)
                .await?
                .ok_or(SyncError::OriginalNotFound {
                    device_id: draft.device_id,
                    receipt_global_no: *orig_global,
                })?;
            validate_correction(
                document_type,
                &invoice_no,
                &draft.currency,
                &lines,
                &original,
                now,
            )?;
            original_invoice_no = Some(orig_no.clone());
            original_receipt_global_no = Some(*orig_global);
            reason = Some(correction_reason.clone());
        }

        // Sign rule, applied before anything is hashed.
        for line in &mut lines {
            apply_sign_line(line, document_type);
        }
        let mut buckets = aggregate(&lines);
        for bucket in &mut buckets {
            apply_sign_bucket(bucket, document_type);
        }
        let total = apply_sign(total_from_buckets(&buckets), document_type);
        reconcile(&buckets, total).map_err(CoreError::Validation)?;

        if let Some(declared) = draft.expected_total {
            let declared = apply_sign(declared, document_type);
            if (declared - total).cents().abs() > LINE_TOTAL_TOLERANCE_CENTS {
                return Err(ValidationError::DeclaredTotalMismatch {
                    declared: declared.cents(),
                    computed: total.cents(),
                }
                .into());
            }
        }

        // Fast-fail duplicate check; the UNIQUE index at insert time is
        // the authority and closes the race.
        self.db
            .guard()
            .check_unique(&device.taxpayer_tin, &invoice_no, document_type)
            .await?;

        let seed = device
            .signing_seed
            .as_deref()
            .ok_or(SyncError::MissingSigningKey {
                device_id: device.device_id,
            })?;
        let signer = ReceiptSigner::from_seed(seed).map_err(CoreError::Crypto)?;

        let receipt_date = draft.receipt_date.unwrap_or(now);
        let device_id = draft.device_id;
        let currency = draft.currency.clone();
        let supplier_tin = device.taxpayer_tin.clone();
        let buyer = draft.buyer.clone();

        let receipt = self
            .db
            .chain()
            .create_chained(device_id, day.fiscal_day_no, move |allocation| {
                let canonical = build_canonical(&CanonicalFields {
                    device_id,
                    document_type,
                    currency: &currency,
                    receipt_global_no: allocation.receipt_global_no,
                    receipt_date,
                    total,
                    taxes: &buckets,
                    previous_receipt_hash: allocation.previous_hash.as_deref(),
                });
                let signature = signer.sign(&canonical);

                Receipt {
                    id: Uuid::new_v4().to_string(),
                    device_id,
                    fiscal_day_no: day.fiscal_day_no,
                    receipt_global_no: allocation.receipt_global_no,
                    receipt_counter: allocation.receipt_counter,
                    document_type,
                    invoice_no,
                    supplier_tin,
                    currency,
                    receipt_date,
                    lines,
                    taxes: buckets,
                    buyer,
                    total,
                    previous_receipt_hash: allocation.previous_hash,
                    canonical_string: canonical,
                    receipt_hash: signature.hash,
                    device_signature: signature.signature,
                    gateway_signature: None,
                    gateway_receipt_id: None,
                    operation_id: None,
                    original_invoice_no,
                    original_receipt_global_no,
                    reason,
                    status: ReceiptStatus::Built,
                    created_at: now,
                    updated_at: now,
                }
            })
            .await?;

        self.db
            .audit()
            .record(
                Some(receipt.device_id),
                actions::RECEIPT_BUILT,
                json!({
                    "global_no": receipt.receipt_global_no,
                    "counter": receipt.receipt_counter,
                    "invoice_no": receipt.invoice_no,
                    "document_type": receipt.document_type.canonical_code(),
                    "total_cents": receipt.total.cents(),
                }),
            )
            .await?;

        info!(
            device_id = receipt.device_id,
            global_no = receipt.receipt_global_no,
            invoice_no = %receipt.invoice_no,
            "Receipt built and signed"
        );
        Ok(receipt)
    }

    // =========================================================================
    // Submit
    // =========================================================================

    /// Submits a built receipt. Caller must hold the device gate.
    pub(crate) async fn submit_unlocked(&self, receipt: &Receipt) -> SyncResult<()> {
        self.db
            .receipts()
            .set_status(&receipt.id, ReceiptStatus::Submitting)
            .await?;

        let payload = SubmitPayload::from_receipt(receipt);
        match self
            .gateway
            .submit_receipt(receipt.device_id, &payload)
            .await
        {
            Ok(ack) => self.handle_ack(receipt, ack).await,
            Err(err @ GatewayError::Transient { .. }) => {
                self.resolve_ambiguous(receipt, err).await
            }
            Err(err @ GatewayError::Auth { .. }) => {
                // Fatal: no submission for this device can succeed until
                // re-registration.
                warn!(
                    device_id = receipt.device_id,
                    global_no = receipt.receipt_global_no,
                    error = %err,
                    "Fatal gateway auth error, locking device"
                );
                self.db.devices().lock_submissions(receipt.device_id).await?;
                self.db
                    .audit()
                    .record(
                        Some(receipt.device_id),
                        actions::DEVICE_LOCKED,
                        json!({ "reason": err.to_string(), "operation_id": err.operation_id() }),
                    )
                    .await?;
                self.fail_receipt(receipt, &err.to_string(), err.operation_id())
                    .await?;
                Err(err.into())
            }
            Err(err) => {
                self.fail_receipt(receipt, &err.to_string(), err.operation_id())
                    .await?;
                Err(err.into())
            }
        }
    }

    /// Verifies the acknowledgement and confirms the receipt.
    ///
    /// A 200 without a valid counter-signature is a full failure: the
    /// receipt goes to `Failed` and the counter stays untouched.
    async fn handle_ack(&self, receipt: &Receipt, ack: GatewayAck) -> SyncResult<()> {
        let signature = match &ack.server_signature {
            Some(signature) if !signature.is_empty() => signature,
            _ => {
                self.fail_receipt(receipt, "missing counter-signature", ack.operation_id.as_deref())
                    .await?;
                return Err(SyncError::MissingServerSignature {
                    receipt_global_no: receipt.receipt_global_no,
                    operation_id: ack.operation_id,
                });
            }
        };

        if let Some(verifier) = &self.verifier {
            if verifier.verify(&receipt.receipt_hash, signature).is_err() {
                self.fail_receipt(receipt, "invalid counter-signature", ack.operation_id.as_deref())
                    .await?;
                return Err(SyncError::InvalidServerSignature {
                    receipt_global_no: receipt.receipt_global_no,
                    operation_id: ack.operation_id,
                });
            }
        }

        self.db
            .chain()
            .confirm(
                receipt.device_id,
                receipt.receipt_global_no,
                Some(signature),
                ack.receipt_id,
                ack.operation_id.as_deref(),
            )
            .await?;
        self.db
            .audit()
            .record(
                Some(receipt.device_id),
                actions::RECEIPT_SUBMITTED,
                json!({
                    "global_no": receipt.receipt_global_no,
                    "gateway_receipt_id": ack.receipt_id,
                    "operation_id": ack.operation_id,
                }),
            )
            .await?;

        info!(
            device_id = receipt.device_id,
            global_no = receipt.receipt_global_no,
            "Receipt confirmed by gateway"
        );
        Ok(())
    }

    /// An in-flight submission is never canceled: after a transport
    /// error the gateway's authoritative status decides SUBMITTED vs
    /// retry, never an assumption of failure.
    async fn resolve_ambiguous(
        &self,
        receipt: &Receipt,
        transport_err: GatewayError,
    ) -> SyncResult<()> {
        match self.gateway.device_status(receipt.device_id).await {
            Ok(status) if status.last_receipt_global_no >= receipt.receipt_global_no => {
                info!(
                    device_id = receipt.device_id,
                    global_no = receipt.receipt_global_no,
                    "Ambiguous outcome resolved: gateway reports receipt accepted"
                );
                self.db
                    .chain()
                    .confirm(
                        receipt.device_id,
                        receipt.receipt_global_no,
                        None,
                        None,
                        status.operation_id.as_deref(),
                    )
                    .await?;
                self.db
                    .audit()
                    .record(
                        Some(receipt.device_id),
                        actions::RECEIPT_SUBMITTED,
                        json!({
                            "global_no": receipt.receipt_global_no,
                            "resolved_via": "device_status",
                            "operation_id": status.operation_id,
                        }),
                    )
                    .await?;
                Ok(())
            }
            _ => Err(transport_err.into()),
        }
    }

    async fn fail_receipt(
        &self,
        receipt: &Receipt,
        reason: &str,
        operation_id: Option<&str>,
    ) -> SyncResult<()> {
        self.db
            .receipts()
            .record_failure(&receipt.id, operation_id)
            .await?;
        self.db
            .audit()
            .record(
                Some(receipt.device_id),
                actions::RECEIPT_FAILED,
                json!({
                    "global_no": receipt.receipt_global_no,
                    "reason": reason,
                    "operation_id": operation_id,
                }),
            )
            .await?;
        Ok(())
    }

    async fn audit_rejection(&self, device_id: i64, err: &SyncError) {
        let action = match err {
            SyncError::Duplicate { .. } => actions::DUPLICATE_REJECTED,
            SyncError::Core(CoreError::Validation(_)) => actions::VALIDATION_REJECTED,
            _ => return,
        };
        // Rejection audit is best-effort; the rejection itself already
        // propagates to the caller.
        let _ = self
            .db
            .audit()
            .record(Some(device_id), action, json!({ "error": err.to_string() }))
            .await;
    }

    async fn reload(&self, receipt_id: &str) -> SyncResult<Receipt> {
        self.db
            .receipts()
            .get_by_id(receipt_id)
            .await?
            .ok_or_else(|| SyncError::Db(sable_db::DbError::not_found("Receipt", receipt_id)))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, MockOutcome};
    use sable_core::{DocumentType, Money, QueueState};

    #[tokio::test]
    async fn test_fiscalise_happy_path() {
        let harness = testing::Harness::new().await;
        let receipt = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(2000, 500, "A", 1500)]))
            .await
            .unwrap();

        assert_eq!(receipt.status, ReceiptStatus::Submitted);
        assert_eq!(receipt.receipt_global_no, 1);
        assert_eq!(receipt.total.cents(), 1150); // 10.00 net + 1.50 tax
        assert!(receipt.gateway_signature.is_some());
        assert_eq!(receipt.gateway_receipt_id, Some(9001));

        let device = harness.db.devices().get_required(321).await.unwrap();
        assert_eq!(device.last_receipt_global_no, 1);
        assert_eq!(harness.gateway.submitted_numbers(), vec![1]);
    }

    #[tokio::test]
    async fn test_chain_links_second_receipt() {
        let harness = testing::Harness::new().await;
        let first = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap();
        let second = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 2000, "A", 1500)]))
            .await
            .unwrap();

        assert_eq!(first.previous_receipt_hash, None);
        assert_eq!(
            second.previous_receipt_hash.as_deref(),
            Some(first.receipt_hash.as_str())
        );
        // the predecessor hash is embedded verbatim in the canonical string
        assert!(second.canonical_string.ends_with(&first.receipt_hash));
        assert!(!first.canonical_string.contains(&first.receipt_hash));
    }

    #[tokio::test]
    async fn test_buyer_does_not_change_canonical() {
        let harness = testing::Harness::new().await;
        let mut with_buyer = testing::sale_draft(321, &[(1000, 1000, "A", 1500)]);
        with_buyer.buyer = Some(sable_core::BuyerSnapshot {
            name: "Buyer Ltd".into(),
            tin: "0987654321".into(),
            vat_number: None,
            address: Some("1 Main St".into()),
        });
        with_buyer.kind = DraftKind::Sale {
            issue_formal_invoice: true,
        };

        let receipt = harness.submitter.fiscalise(with_buyer).await.unwrap();
        assert_eq!(receipt.document_type, DocumentType::SaleInvoice);
        // canonical carries fiscal fields only; the buyer block is absent
        assert!(!receipt.canonical_string.contains("Buyer"));
        assert!(!receipt.canonical_string.contains("0987654321"));
    }

    #[tokio::test]
    async fn test_vat_gate_blocks_before_signing() {
        let harness = testing::Harness::new().await;
        harness
            .db
            .devices()
            .set_vat_registered(321, false)
            .await
            .unwrap();

        let err = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1550)]))
            .await
            .unwrap_err();

        assert!(err
            .to_string()
            .starts_with("Validation error: VAT not allowed for non-VAT taxpayer"));
        // rejected before signing: no receipt row, no gateway call
        assert!(harness
            .db
            .receipts()
            .get_by_global_no(321, 1)
            .await
            .unwrap()
            .is_none());
        assert!(harness.gateway.submitted_numbers().is_empty());

        let events = harness.db.audit().recent(321, 5).await.unwrap();
        assert_eq!(events[0].action, actions::VALIDATION_REJECTED);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_with_audit() {
        let harness = testing::Harness::new().await;
        let mut draft = testing::sale_draft(321, &[(1000, 1000, "A", 1500)]);
        draft.invoice_no = Some("INV-2026-77".into());
        harness.submitter.fiscalise(draft.clone()).await.unwrap();

        let err = harness.submitter.fiscalise(draft).await.unwrap_err();
        assert!(matches!(err, SyncError::Duplicate { .. }));

        let events = harness.db.audit().recent(321, 5).await.unwrap();
        assert_eq!(events[0].action, actions::DUPLICATE_REJECTED);
    }

    #[tokio::test]
    async fn test_missing_counter_signature_is_full_failure() {
        let harness = testing::Harness::new().await;
        harness.gateway.script(1, MockOutcome::AcceptWithoutSignature);

        let err = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingServerSignature { .. }));

        // failed, not submitted; counter untouched
        let receipt = harness
            .db
            .receipts()
            .get_by_global_no(321, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Failed);
        let device = harness.db.devices().get_required(321).await.unwrap();
        assert_eq!(device.last_receipt_global_no, 0);
    }

    #[tokio::test]
    async fn test_invalid_counter_signature_is_full_failure() {
        let harness = testing::Harness::new().await;
        harness.gateway.script(1, MockOutcome::AcceptBadSignature);

        let err = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidServerSignature { .. }));
    }

    #[tokio::test]
    async fn test_auth_error_locks_device() {
        let harness = testing::Harness::new().await;
        harness.gateway.script(1, MockOutcome::Auth);

        let err = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap_err();
        assert!(err.is_fatal_gateway());

        let device = harness.db.devices().get_required(321).await.unwrap();
        assert!(device.submissions_locked);

        // subsequent drafts are refused before any work happens
        let err = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("locked"));
    }

    #[tokio::test]
    async fn test_offline_receipt_is_queued_not_lost() {
        let harness = testing::Harness::new().await;
        harness.gateway.set_default(MockOutcome::Transient);
        harness.gateway.set_status_available(false);

        let receipt = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap();

        assert_eq!(receipt.status, ReceiptStatus::Queued);
        let pending = harness.db.queue().pending(321).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, QueueState::Queued);

        // queued submission must not advance the counter
        let device = harness.db.devices().get_required(321).await.unwrap();
        assert_eq!(device.last_receipt_global_no, 0);
    }

    #[tokio::test]
    async fn test_ambiguous_outcome_resolved_via_status() {
        let harness = testing::Harness::new().await;
        // transport error AFTER the gateway recorded the receipt
        harness.gateway.script(1, MockOutcome::TransientButAccepted);

        let receipt = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap();

        // resolved as submitted, not retried and not queued
        assert_eq!(receipt.status, ReceiptStatus::Submitted);
        assert!(harness.db.queue().pending(321).await.unwrap().is_empty());
        let device = harness.db.devices().get_required(321).await.unwrap();
        assert_eq!(device.last_receipt_global_no, 1);
    }

    #[tokio::test]
    async fn test_credit_note_negates_and_references() {
        let harness = testing::Harness::new().await;
        let original = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap();

        let credit = harness
            .submitter
            .fiscalise(testing::correction_draft(
                321,
                DocumentType::CreditNote,
                &original,
                &[(1000, 1000, "A", 1500)],
            ))
            .await
            .unwrap();

        assert_eq!(credit.total.cents(), -1150);
        assert!(credit.lines.iter().all(|l| l.line_total.is_negative()));
        assert!(credit.taxes.iter().all(|b| b.gross.is_negative()));
        assert_eq!(credit.original_receipt_global_no, Some(1));
        assert_ne!(credit.invoice_no, original.invoice_no);
    }

    #[tokio::test]
    async fn test_correction_reusing_original_number_rejected() {
        let harness = testing::Harness::new().await;
        let original = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap();

        let mut draft = testing::correction_draft(
            321,
            DocumentType::CreditNote,
            &original,
            &[(1000, 1000, "A", 1500)],
        );
        draft.invoice_no = Some(original.invoice_no.clone());

        let err = harness.submitter.fiscalise(draft).await.unwrap_err();
        assert!(err.to_string().contains("own external number"));
    }

    #[tokio::test]
    async fn test_declared_total_mismatch_rejected() {
        let harness = testing::Harness::new().await;
        let mut draft = testing::sale_draft(321, &[(1000, 1000, "A", 1500)]);
        draft.expected_total = Some(Money::from_cents(9999));

        let err = harness.submitter.fiscalise(draft).await.unwrap_err();
        assert!(err.to_string().contains("does not match computed total"));
    }

    #[tokio::test]
    async fn test_retry_reuses_allocated_number() {
        let harness = testing::Harness::new().await;
        harness.gateway.set_default(MockOutcome::Transient);
        harness.gateway.set_status_available(false);

        let queued = harness
            .submitter
            .fiscalise(testing::sale_draft(321, &[(1000, 1000, "A", 1500)]))
            .await
            .unwrap();
        assert_eq!(queued.receipt_global_no, 1);

        harness.gateway.set_default(MockOutcome::Accept);
        let submitted = harness.submitter.submit_built(&queued.id).await.unwrap();

        assert_eq!(submitted.receipt_global_no, 1);
        assert_eq!(submitted.status, ReceiptStatus::Submitted);
        // both attempts carried the same number
        assert_eq!(harness.gateway.submitted_numbers(), vec![1, 1]);
    }
}
