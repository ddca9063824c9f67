//! # sable-sync: Gateway Submission & Offline Replay
//!
//! The engine that moves built receipts to the tax authority — and keeps
//! them safe, ordered, and exactly-once when the network disappears for
//! hours.
//!
//! ## Control Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Submission Control Flow                             │
//! │                                                                         │
//! │  ReceiptDraft                                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ReceiptSubmitter::fiscalise()                                         │
//! │       │  build + validate + sign (sable-core)                          │
//! │       │  allocate + persist (sable-db, exclusive per device)           │
//! │       │                                                                 │
//! │       ├── gateway reachable ──► verified ack ──► confirm               │
//! │       │                                          (counter advances)    │
//! │       │                                                                 │
//! │       └── gateway offline ──► OfflineQueue (durable, append-only)      │
//! │                                    │                                    │
//! │                    connectivity returns                                 │
//! │                                    ▼                                    │
//! │                      ReplayEngine::replay_device()                      │
//! │                      ascending, sequential, halt-on-gap                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One concurrent submission per device, none during that device's
//! replay; devices are fully independent of each other.

pub mod config;
pub mod error;
pub mod gateway;
pub mod replay;
pub mod submitter;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{GatewayConfig, RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use gateway::{
    GatewayAck, GatewayClient, GatewayError, GatewayStatus, HttpGateway, SubmitPayload,
};
pub use replay::{ReplayEngine, ReplayReport};
pub use submitter::ReceiptSubmitter;
