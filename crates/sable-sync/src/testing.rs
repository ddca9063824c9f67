//! Test fixtures: a scriptable mock gateway and a database harness.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};

use crate::gateway::{GatewayAck, GatewayClient, GatewayError, GatewayStatus, SubmitPayload};
use crate::submitter::ReceiptSubmitter;
use sable_core::crypto::GatewayVerifier;
use sable_core::{
    DocumentType, DraftKind, DraftLine, FiscalDevice, Money, Receipt, ReceiptDraft, TaxRate,
};
use sable_db::{Database, DbConfig};

/// What the mock gateway does with one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// 200 with a valid counter-signature.
    Accept,
    /// 200 but no counter-signature block.
    AcceptWithoutSignature,
    /// 200 with a counter-signature that fails verification.
    AcceptBadSignature,
    /// Network failure; the gateway never saw the receipt.
    Transient,
    /// Network failure AFTER the gateway recorded the receipt (the
    /// ambiguous in-flight case).
    TransientButAccepted,
    /// 401: certificate/auth failure.
    Auth,
    /// 422: payload rejected.
    Rejected,
}

/// Scriptable in-memory gateway.
///
/// Outcomes are scripted per receipt number (FIFO) with a fallback
/// default; every submission call is recorded for ordering assertions.
pub struct MockGateway {
    key: SigningKey,
    calls: StdMutex<Vec<i64>>,
    scripts: StdMutex<HashMap<i64, VecDeque<MockOutcome>>>,
    default_outcome: StdMutex<MockOutcome>,
    status_last_global_no: StdMutex<i64>,
    status_available: StdMutex<bool>,
}

impl MockGateway {
    /// Creates the gateway plus the verifier matching its signing key.
    pub fn new() -> (Arc<Self>, GatewayVerifier) {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let verifier = GatewayVerifier::from_bytes(&key.verifying_key().to_bytes()).unwrap();
        let gateway = Arc::new(MockGateway {
            key,
            calls: StdMutex::new(Vec::new()),
            scripts: StdMutex::new(HashMap::new()),
            default_outcome: StdMutex::new(MockOutcome::Accept),
            status_last_global_no: StdMutex::new(0),
            status_available: StdMutex::new(true),
        });
        (gateway, verifier)
    }

    /// Queues an outcome for the next submission of `receipt_global_no`.
    pub fn script(&self, receipt_global_no: i64, outcome: MockOutcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(receipt_global_no)
            .or_default()
            .push_back(outcome);
    }

    /// Sets the outcome used when no script entry matches.
    pub fn set_default(&self, outcome: MockOutcome) {
        *self.default_outcome.lock().unwrap() = outcome;
    }

    /// Controls whether GetStatus succeeds.
    pub fn set_status_available(&self, available: bool) {
        *self.status_available.lock().unwrap() = available;
    }

    /// Receipt numbers of every submission call, in call order.
    pub fn submitted_numbers(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }

    /// Forgets recorded calls (keeps scripts and status).
    pub fn clear_submissions(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn next_outcome(&self, receipt_global_no: i64) -> MockOutcome {
        if let Some(queue) = self.scripts.lock().unwrap().get_mut(&receipt_global_no) {
            if let Some(outcome) = queue.pop_front() {
                return outcome;
            }
        }
        *self.default_outcome.lock().unwrap()
    }

    fn record_accepted(&self, receipt_global_no: i64) {
        let mut last = self.status_last_global_no.lock().unwrap();
        *last = (*last).max(receipt_global_no);
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn submit_receipt(
        &self,
        _device_id: i64,
        payload: &SubmitPayload,
    ) -> Result<GatewayAck, GatewayError> {
        let global_no = payload.receipt_global_no;
        self.calls.lock().unwrap().push(global_no);

        match self.next_outcome(global_no) {
            MockOutcome::Accept => {
                self.record_accepted(global_no);
                let signature = self
                    .key
                    .sign(payload.receipt_device_signature.hash.as_bytes());
                Ok(GatewayAck {
                    receipt_id: Some(9000 + global_no),
                    operation_id: Some(format!("op-{global_no}")),
                    server_signature: Some(BASE64.encode(signature.to_bytes())),
                })
            }
            MockOutcome::AcceptWithoutSignature => {
                self.record_accepted(global_no);
                Ok(GatewayAck {
                    receipt_id: Some(9000 + global_no),
                    operation_id: Some(format!("op-{global_no}")),
                    server_signature: None,
                })
            }
            MockOutcome::AcceptBadSignature => {
                self.record_accepted(global_no);
                Ok(GatewayAck {
                    receipt_id: Some(9000 + global_no),
                    operation_id: Some(format!("op-{global_no}")),
                    server_signature: Some(BASE64.encode([0u8; 64])),
                })
            }
            MockOutcome::Transient => Err(GatewayError::Transient {
                message: "connection refused".into(),
            }),
            MockOutcome::TransientButAccepted => {
                self.record_accepted(global_no);
                Err(GatewayError::Transient {
                    message: "connection reset mid-response".into(),
                })
            }
            MockOutcome::Auth => Err(GatewayError::Auth {
                message: "device certificate rejected".into(),
                operation_id: Some("op-auth".into()),
            }),
            MockOutcome::Rejected => Err(GatewayError::Rejected {
                message: "RCPT020 receipt validation failed".into(),
                operation_id: Some("op-rej".into()),
            }),
        }
    }

    async fn device_status(&self, _device_id: i64) -> Result<GatewayStatus, GatewayError> {
        if !*self.status_available.lock().unwrap() {
            return Err(GatewayError::Transient {
                message: "status endpoint unreachable".into(),
            });
        }
        Ok(GatewayStatus {
            operation_id: Some("op-status".into()),
            last_receipt_global_no: *self.status_last_global_no.lock().unwrap(),
            fiscal_day_status: Some("FiscalDayOpened".into()),
        })
    }
}

/// In-memory database + mock gateway + submitter, with device 321 and an
/// open fiscal day ready to go.
pub struct Harness {
    pub db: Database,
    pub gateway: Arc<MockGateway>,
    pub submitter: ReceiptSubmitter<MockGateway>,
}

impl Harness {
    pub async fn new() -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        db.devices()
            .register(&FiscalDevice {
                device_id: 321,
                serial_no: "SN-001".into(),
                taxpayer_name: "Acme Trading".into(),
                taxpayer_tin: "1234567890".into(),
                vat_number: Some("220001122".into()),
                is_vat_registered: true,
                cert_valid_from: Some(now - chrono::Duration::days(1)),
                cert_valid_until: Some(now + chrono::Duration::days(364)),
                signing_seed: Some(vec![7u8; 32]),
                last_fiscal_day_no: None,
                last_receipt_global_no: 0,
                is_active: true,
                submissions_locked: false,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        db.fiscal_days().open(321, 1).await.unwrap();

        let (gateway, verifier) = MockGateway::new();
        let submitter = ReceiptSubmitter::new(db.clone(), Arc::clone(&gateway), Some(verifier));

        Harness {
            db,
            gateway,
            submitter,
        }
    }
}

/// A retail sale draft; lines are (quantity_milli, price_cents, code, bps).
pub fn sale_draft(device_id: i64, lines: &[(i64, i64, &str, u32)]) -> ReceiptDraft {
    ReceiptDraft {
        device_id,
        currency: "USD".into(),
        invoice_no: None,
        lines: lines
            .iter()
            .map(|(quantity_milli, price_cents, code, bps)| DraftLine {
                description: "Widget".into(),
                quantity_milli: *quantity_milli,
                unit_price: Money::from_cents(*price_cents),
                tax_code: (*code).to_string(),
                tax_percent: TaxRate::from_bps(*bps),
                hs_code: "1122".into(),
            })
            .collect(),
        buyer: None,
        expected_total: None,
        receipt_date: None,
        kind: DraftKind::Sale {
            issue_formal_invoice: false,
        },
    }
}

/// A correction draft referencing `original`.
pub fn correction_draft(
    device_id: i64,
    document_type: DocumentType,
    original: &Receipt,
    lines: &[(i64, i64, &str, u32)],
) -> ReceiptDraft {
    let mut draft = sale_draft(device_id, lines);
    draft.kind = DraftKind::Correction {
        document_type,
        original_invoice_no: original.invoice_no.clone(),
        original_receipt_global_no: original.receipt_global_no,
        reason: "Customer refund".into(),
    };
    draft
}

