//! # Repository Modules
//!
//! One repository per aggregate. All repositories share the same pool and
//! are cheap to construct from a [`crate::Database`] handle.

pub mod chain;
pub mod device;
pub mod fiscal_day;
pub mod guard;
pub mod queue;
pub mod receipt;
pub mod sequence;
