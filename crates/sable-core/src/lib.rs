//! # sable-core: Pure Fiscal Logic for the Sable Engine
//!
//! This crate is the **heart** of the Sable fiscal engine. It contains the
//! canonicalization, signing, chaining, and validation logic as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sable Fiscal Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Data-entry layer (forms, imports, adapters)          │   │
//! │  │      supplies lines, currency, intent, external number          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ ReceiptDraft                           │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    sable-sync (pipeline)                        │   │
//! │  │   aggregate → sign rule → validate → allocate → sign → submit   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ sable-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   money   │  │    tax    │  │ canonical │  │  crypto   │  │   │
//! │  │   │   sign    │  │  buckets  │  │  builder  │  │ SHA-256   │  │   │
//! │  │   │   rules   │  │  rounding │  │           │  │ Ed25519   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    sable-db (durable store)                     │   │
//! │  │        counters, chain, queue, duplicate guard, audit           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Receipt, FiscalDevice, DocumentType, ...)
//! - [`money`] - Money type with integer-cents arithmetic (no floats!)
//! - [`sign`] - Sign-rule engine (credit notes negative, sales positive)
//! - [`tax`] - Tax bucket aggregation and the rounding-mode constant
//! - [`canonical`] - Canonical string builder
//! - [`crypto`] - SHA-256 hashing, Ed25519 device signature, gateway
//!   counter-signature verification
//! - [`validation`] - Pre-signing business rule validation
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: the same draft always yields the same canonical
//!    string, hash, and signature
//! 2. **No I/O**: database, network, and clock access live in sable-db
//!    and sable-sync
//! 3. **Integer money**: all monetary values are cents (i64)
//! 4. **Reject, never correct**: validation failures are final

// =============================================================================
// Module Declarations
// =============================================================================

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod money;
pub mod sign;
pub mod tax;
pub mod validation;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use sable_core::Money` instead of
// `use sable_core::money::Money`

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;
