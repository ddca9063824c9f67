//! # Gateway Client
//!
//! The seam to the tax-authority gateway: an object-safe async trait with
//! structured results, plus the production HTTPS implementation.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Gateway Error Classification                         │
//! │                                                                         │
//! │  connect/timeout/5xx  ──► Transient  ──► queue + retry with backoff    │
//! │  401 / 403            ──► Auth       ──► LOCK the device               │
//! │  other 4xx            ──► Rejected   ──► failed, manual review         │
//! │                                                                         │
//! │  Raw reqwest errors never leave this module; the submitter and the     │
//! │  replay engine only ever see the three categories above.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Amount fields in the payload are integer minor units and quantities
//! are integer thousandths, matching the canonical string end to end.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::GatewayConfig;
use crate::error::{SyncError, SyncResult};
use sable_core::Receipt;

// =============================================================================
// Payload Types
// =============================================================================

/// One line of the submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadLine {
    pub receipt_line_no: u32,
    pub receipt_line_name: String,
    /// Quantity in thousandths of a unit.
    pub receipt_line_quantity: i64,
    /// Unit price in minor units.
    pub receipt_line_price: i64,
    /// Line total in minor units.
    pub receipt_line_total: i64,
    #[serde(rename = "receiptLineHSCode")]
    pub receipt_line_hs_code: String,
    pub tax_code: String,
    /// Percent with two decimals, e.g. "15.00".
    pub tax_percent: String,
}

/// One tax bucket of the submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadTax {
    pub tax_code: String,
    pub tax_percent: String,
    /// Tax amount in minor units.
    pub tax_amount: i64,
    /// Gross amount in minor units.
    pub sales_amount_with_tax: i64,
}

/// Device hash + signature as transmitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSignature {
    pub hash: String,
    pub signature: String,
}

/// Reference block for credit/debit notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadReference {
    pub receipt_global_no: i64,
    pub invoice_no: String,
}

/// The SubmitReceipt request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    #[serde(rename = "deviceID")]
    pub device_id: i64,
    pub receipt_type: String,
    pub receipt_currency: String,
    pub receipt_global_no: i64,
    pub receipt_counter: i64,
    pub invoice_no: String,
    /// Canonical timestamp format, `%Y-%m-%dT%H:%M:%S`.
    pub receipt_date: String,
    /// Total in minor units.
    pub receipt_total: i64,
    pub receipt_lines: Vec<PayloadLine>,
    pub receipt_taxes: Vec<PayloadTax>,
    pub receipt_device_signature: PayloadSignature,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_receipt_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_debit_note: Option<PayloadReference>,
}

impl SubmitPayload {
    /// Builds the wire payload from a built receipt.
    ///
    /// Everything is copied from the receipt's immutable snapshots; the
    /// buyer block is intentionally absent from the wire, mirroring its
    /// exclusion from the canonical string.
    pub fn from_receipt(receipt: &Receipt) -> Self {
        SubmitPayload {
            device_id: receipt.device_id,
            receipt_type: receipt.document_type.canonical_code().to_string(),
            receipt_currency: receipt.currency.to_uppercase(),
            receipt_global_no: receipt.receipt_global_no,
            receipt_counter: receipt.receipt_counter,
            invoice_no: receipt.invoice_no.clone(),
            receipt_date: receipt
                .receipt_date
                .format(sable_core::canonical::CANONICAL_DATE_FORMAT)
                .to_string(),
            receipt_total: receipt.total.cents(),
            receipt_lines: receipt
                .lines
                .iter()
                .map(|line| PayloadLine {
                    receipt_line_no: line.line_no,
                    receipt_line_name: line.description.clone(),
                    receipt_line_quantity: line.quantity_milli,
                    receipt_line_price: line.unit_price.cents(),
                    receipt_line_total: line.line_total.cents(),
                    receipt_line_hs_code: line.hs_code.clone(),
                    tax_code: line.tax_code.clone(),
                    tax_percent: line.tax_percent.percent_2dp(),
                })
                .collect(),
            receipt_taxes: receipt
                .taxes
                .iter()
                .map(|bucket| PayloadTax {
                    tax_code: bucket.tax_code.clone(),
                    tax_percent: bucket.tax_percent.percent_2dp(),
                    tax_amount: bucket.tax.cents(),
                    sales_amount_with_tax: bucket.gross.cents(),
                })
                .collect(),
            receipt_device_signature: PayloadSignature {
                hash: receipt.receipt_hash.clone(),
                signature: receipt.device_signature.clone(),
            },
            previous_receipt_hash: receipt.previous_receipt_hash.clone(),
            credit_debit_note: receipt.original_receipt_global_no.map(|global_no| {
                PayloadReference {
                    receipt_global_no: global_no,
                    invoice_no: receipt.original_invoice_no.clone().unwrap_or_default(),
                }
            }),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Structured acknowledgement of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAck {
    /// The gateway's receipt identifier.
    pub receipt_id: Option<i64>,
    /// Operation identifier for audit and error reports.
    pub operation_id: Option<String>,
    /// Counter-signature over the device receipt hash, Base64.
    pub server_signature: Option<String>,
}

/// The gateway's authoritative device status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayStatus {
    pub operation_id: Option<String>,
    /// Last receipt number the gateway has accepted for this device.
    pub last_receipt_global_no: i64,
    pub fiscal_day_status: Option<String>,
}

// =============================================================================
// Gateway Errors
// =============================================================================

/// Classified gateway failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network/timeout/5xx. Retryable with backoff; the receipt stays
    /// queued.
    #[error("Gateway unreachable: {message}")]
    Transient { message: String },

    /// Certificate/auth failure. Fatal: the device must be locked until
    /// re-registration.
    #[error("Gateway authentication failed: {message}")]
    Auth {
        message: String,
        operation_id: Option<String>,
    },

    /// The gateway rejected the payload. Not retryable as-is; requires
    /// review.
    #[error("Gateway rejected the submission: {message}")]
    Rejected {
        message: String,
        operation_id: Option<String>,
    },
}

impl GatewayError {
    /// True for failures worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient { .. })
    }

    /// Operation identifier, when the gateway got far enough to mint one.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            GatewayError::Transient { .. } => None,
            GatewayError::Auth { operation_id, .. }
            | GatewayError::Rejected { operation_id, .. } => operation_id.as_deref(),
        }
    }
}

// =============================================================================
// Client Trait
// =============================================================================

/// The gateway conversation, mockable in tests.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Submits a receipt payload.
    async fn submit_receipt(
        &self,
        device_id: i64,
        payload: &SubmitPayload,
    ) -> Result<GatewayAck, GatewayError>;

    /// Queries the device's authoritative status. Used to resolve
    /// ambiguous in-flight outcomes instead of assuming failure.
    async fn device_status(&self, device_id: i64) -> Result<GatewayStatus, GatewayError>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponseBody {
    #[serde(rename = "receiptID")]
    receipt_id: Option<i64>,
    #[serde(rename = "operationID")]
    operation_id: Option<String>,
    receipt_server_signature: Option<ServerSignatureBody>,
}

#[derive(Debug, Deserialize)]
struct ServerSignatureBody {
    #[allow(dead_code)]
    hash: Option<String>,
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponseBody {
    #[serde(rename = "operationID")]
    operation_id: Option<String>,
    last_receipt_global_no: Option<i64>,
    fiscal_day_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseBody {
    detail: Option<String>,
    title: Option<String>,
    #[serde(rename = "operationID")]
    operation_id: Option<String>,
}

/// Production HTTPS gateway client.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGateway {
    /// Builds a client from configuration. Validates the base URL.
    pub fn new(config: &GatewayConfig) -> SyncResult<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        Ok(HttpGateway { client, base_url })
    }

    fn endpoint(&self, device_id: i64, operation: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(&format!("Device/v1/{device_id}/{operation}"))
            .map_err(|e| GatewayError::Transient {
                message: e.to_string(),
            })
    }

    fn classify_transport(err: reqwest::Error) -> GatewayError {
        // Connection, DNS, TLS handshake, and timeout problems all mean
        // "possibly never reached the gateway" - retryable.
        GatewayError::Transient {
            message: if err.is_timeout() {
                "request timed out".to_string()
            } else if err.is_connect() {
                "connection failed".to_string()
            } else {
                "transport error".to_string()
            },
        }
    }

    async fn classify_status(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body: ErrorResponseBody = response.json().await.unwrap_or(ErrorResponseBody {
            detail: None,
            title: None,
            operation_id: None,
        });
        let message = body
            .detail
            .or(body.title)
            .unwrap_or_else(|| format!("HTTP {status}"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            GatewayError::Auth {
                message,
                operation_id: body.operation_id,
            }
        } else if status.is_server_error() {
            GatewayError::Transient { message }
        } else {
            GatewayError::Rejected {
                message,
                operation_id: body.operation_id,
            }
        }
    }
}

#[async_trait]
impl GatewayClient for HttpGateway {
    async fn submit_receipt(
        &self,
        device_id: i64,
        payload: &SubmitPayload,
    ) -> Result<GatewayAck, GatewayError> {
        let url = self.endpoint(device_id, "SubmitReceipt")?;
        debug!(device_id, global_no = payload.receipt_global_no, %url, "SubmitReceipt");

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "receipt": payload }))
            .send()
            .await
            .map_err(Self::classify_transport)?;

        if !response.status().is_success() {
            return Err(Self::classify_status(response).await);
        }

        let body: SubmitResponseBody =
            response.json().await.map_err(|_| GatewayError::Rejected {
                message: "unparseable success response".to_string(),
                operation_id: None,
            })?;

        Ok(GatewayAck {
            receipt_id: body.receipt_id,
            operation_id: body.operation_id,
            server_signature: body
                .receipt_server_signature
                .and_then(|sig| sig.signature),
        })
    }

    async fn device_status(&self, device_id: i64) -> Result<GatewayStatus, GatewayError> {
        let url = self.endpoint(device_id, "GetStatus")?;
        debug!(device_id, %url, "GetStatus");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        if !response.status().is_success() {
            return Err(Self::classify_status(response).await);
        }

        let body: StatusResponseBody =
            response.json().await.map_err(|_| GatewayError::Rejected {
                message: "unparseable status response".to_string(),
                operation_id: None,
            })?;

        Ok(GatewayStatus {
            operation_id: body.operation_id,
            last_receipt_global_no: body.last_receipt_global_no.unwrap_or(0),
            fiscal_day_status: body.fiscal_day_status,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use sable_core::{
        BuyerSnapshot, DocumentType, Money, Receipt, ReceiptLine, ReceiptStatus, TaxBucket, TaxRate,
    };

    fn built_receipt() -> Receipt {
        let date = Utc.with_ymd_and_hms(2026, 2, 3, 10, 15, 30).unwrap();
        Receipt {
            id: "r-1".into(),
            device_id: 321,
            fiscal_day_no: 1,
            receipt_global_no: 42,
            receipt_counter: 2,
            document_type: DocumentType::SaleInvoice,
            invoice_no: "INV-2026-7".into(),
            supplier_tin: "1234567890".into(),
            currency: "usd".into(),
            receipt_date: date,
            lines: vec![ReceiptLine {
                line_no: 1,
                description: "Widget".into(),
                quantity_milli: 1500,
                unit_price: Money::from_cents(1000),
                line_total: Money::from_cents(1500),
                tax_code: "A".into(),
                tax_percent: TaxRate::from_bps(1500),
                hs_code: "1122".into(),
            }],
            taxes: vec![TaxBucket {
                tax_code: "A".into(),
                tax_percent: TaxRate::from_bps(1500),
                net: Money::from_cents(1500),
                tax: Money::from_cents(225),
                gross: Money::from_cents(1725),
            }],
            buyer: Some(BuyerSnapshot {
                name: "Buyer Ltd".into(),
                tin: "0987654321".into(),
                vat_number: None,
                address: None,
            }),
            total: Money::from_cents(1725),
            previous_receipt_hash: Some("PREVHASH".into()),
            canonical_string: "...".into(),
            receipt_hash: "HASH".into(),
            device_signature: "SIG".into(),
            gateway_signature: None,
            gateway_receipt_id: None,
            operation_id: None,
            original_invoice_no: None,
            original_receipt_global_no: None,
            reason: None,
            status: ReceiptStatus::Built,
            created_at: date,
            updated_at: date,
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = SubmitPayload::from_receipt(&built_receipt());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["deviceID"], 321);
        assert_eq!(json["receiptType"], "FISCALINVOICE");
        assert_eq!(json["receiptCurrency"], "USD");
        assert_eq!(json["receiptGlobalNo"], 42);
        assert_eq!(json["receiptDate"], "2026-02-03T10:15:30");
        assert_eq!(json["receiptTotal"], 1725);
        assert_eq!(json["receiptTaxes"][0]["taxPercent"], "15.00");
        assert_eq!(json["receiptTaxes"][0]["salesAmountWithTax"], 1725);
        assert_eq!(json["receiptLines"][0]["receiptLineHSCode"], "1122");
        assert_eq!(json["previousReceiptHash"], "PREVHASH");
        assert_eq!(json["receiptDeviceSignature"]["hash"], "HASH");
        // buyer data never crosses the wire
        assert!(json.get("buyer").is_none());
        assert!(json.get("buyerData").is_none());
        // sales carry no reference block
        assert!(json.get("creditDebitNote").is_none());
    }

    #[test]
    fn test_first_receipt_payload_omits_previous_hash() {
        let mut receipt = built_receipt();
        receipt.previous_receipt_hash = None;
        let json = serde_json::to_value(SubmitPayload::from_receipt(&receipt)).unwrap();
        assert!(json.get("previousReceiptHash").is_none());
    }

    #[test]
    fn test_correction_payload_carries_reference() {
        let mut receipt = built_receipt();
        receipt.document_type = DocumentType::CreditNote;
        receipt.original_receipt_global_no = Some(40);
        receipt.original_invoice_no = Some("INV-2026-5".into());

        let json = serde_json::to_value(SubmitPayload::from_receipt(&receipt)).unwrap();
        assert_eq!(json["creditDebitNote"]["receiptGlobalNo"], 40);
        assert_eq!(json["creditDebitNote"]["invoiceNo"], "INV-2026-5");
    }

    #[test]
    fn test_error_classification_helpers() {
        assert!(GatewayError::Transient { message: "x".into() }.is_transient());
        assert!(!GatewayError::Rejected {
            message: "x".into(),
            operation_id: None
        }
        .is_transient());
        assert_eq!(
            GatewayError::Auth {
                message: "x".into(),
                operation_id: Some("op-3".into())
            }
            .operation_id(),
            Some("op-3")
        );
    }
}
