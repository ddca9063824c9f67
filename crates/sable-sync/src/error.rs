//! # Sync Error Types
//!
//! Error taxonomy for submission and replay.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Error Categories                              │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │   Duplicate     │  │  Transient gateway      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  rejected pre-  │  │  rejected, use  │  │  queued for retry with  │ │
//! │  │  signing, never │  │  a correction   │  │  backoff, counter NOT   │ │
//! │  │  auto-corrected │  │  document       │  │  advanced               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Fatal gateway  │  │ Ordering/chain  │  │  Counter-signature      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  auth/cert:     │  │  gap or hash    │  │  200 without a valid    │ │
//! │  │  device locked  │  │  mismatch:      │  │  counter-signature is   │ │
//! │  │  until re-reg   │  │  device halted, │  │  a FULL failure         │ │
//! │  │                 │  │  human-escalated│  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant renders a human-readable message; gateway operation
//! identifiers are carried where the gateway supplied one. Raw transport
//! errors never surface past [`crate::gateway`].

use thiserror::Error;

use crate::gateway::GatewayError;
use sable_core::{CoreError, ValidationError};
use sable_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Submission and replay failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Validation / Domain
    // =========================================================================
    /// Receipt rejected before signing.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Duplicates
    // =========================================================================
    /// The (supplier, invoice number, document type) triple already
    /// exists. The caller must issue a correction document instead.
    #[error("Duplicate fiscal document: {detail}. Use a credit or debit note to correct the original.")]
    Duplicate { detail: String },

    // =========================================================================
    // Storage
    // =========================================================================
    /// Database failure outside the duplicate guard.
    #[error("Storage error: {0}")]
    Db(DbError),

    // =========================================================================
    // Gateway
    // =========================================================================
    /// Gateway call failed; classification inside.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// 200 response without a counter-signature. Treated as a full
    /// submission failure regardless of HTTP status.
    #[error("Gateway response for receipt {receipt_global_no} carried no counter-signature{}", operation_suffix(.operation_id))]
    MissingServerSignature {
        receipt_global_no: i64,
        operation_id: Option<String>,
    },

    /// Counter-signature present but cryptographically invalid.
    #[error("Gateway counter-signature for receipt {receipt_global_no} failed verification{}", operation_suffix(.operation_id))]
    InvalidServerSignature {
        receipt_global_no: i64,
        operation_id: Option<String>,
    },

    // =========================================================================
    // Ordering / Chain (fatal, human-escalated)
    // =========================================================================
    /// A receipt number is missing from the replay sequence.
    #[error(
        "Replay halted for device {device_id}: expected receipt {expected} next but found {found}. \
         Manual resolution required."
    )]
    OrderingGap {
        device_id: i64,
        expected: i64,
        found: i64,
    },

    /// A receipt's previous-hash does not match its predecessor.
    #[error(
        "Replay halted for device {device_id}: receipt {receipt_global_no} does not chain to its \
         predecessor's hash. Manual resolution required."
    )]
    ChainMismatch {
        device_id: i64,
        receipt_global_no: i64,
    },

    // =========================================================================
    // Queue / Device Gating
    // =========================================================================
    /// A failed queue entry needs manual review before replay resumes.
    #[error("Queue entry for receipt {receipt_global_no} failed and awaits manual review")]
    ReviewRequired { receipt_global_no: i64 },

    /// Device submissions are locked pending re-registration.
    #[error("Device {device_id} submissions are locked pending re-registration")]
    DeviceLocked { device_id: i64 },

    /// Device has no signing key material on record.
    #[error("Device {device_id} has no signing key; re-register the device")]
    MissingSigningKey { device_id: i64 },

    /// No open fiscal day for the device.
    #[error("Device {device_id} has no open fiscal day")]
    NoOpenDay { device_id: i64 },

    /// Correction references an original receipt that does not exist.
    #[error("Original receipt {receipt_global_no} not found for device {device_id}")]
    OriginalNotFound {
        device_id: i64,
        receipt_global_no: i64,
    },

    // =========================================================================
    // Configuration
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid gateway URL.
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

fn operation_suffix(operation_id: &Option<String>) -> String {
    match operation_id {
        Some(id) => format!(" (operation {id})"),
        None => String::new(),
    }
}

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UniqueViolation { field, value } => SyncError::Duplicate {
                detail: format!("{field} = {value}"),
            },
            other => SyncError::Db(other),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

// =============================================================================
// Error Categorization (for retry and escalation logic)
// =============================================================================

impl SyncError {
    /// True when the operation may be retried later with backoff
    /// (network/timeout/5xx). The receipt stays queued and the counter is
    /// untouched.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Gateway(g) if g.is_transient())
    }

    /// True for auth/certificate failures that lock the device entirely.
    pub fn is_fatal_gateway(&self) -> bool {
        matches!(self, SyncError::Gateway(GatewayError::Auth { .. }))
    }

    /// True for ordering/chain violations: fatal, halts the device, and
    /// requires a human.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            SyncError::OrderingGap { .. } | SyncError::ChainMismatch { .. }
        )
    }

    /// The gateway operation identifier attached to this error, if any.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            SyncError::Gateway(g) => g.operation_id(),
            SyncError::MissingServerSignature { operation_id, .. }
            | SyncError::InvalidServerSignature { operation_id, .. } => operation_id.as_deref(),
            _ => None,
        }
    }
}
