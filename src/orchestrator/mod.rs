//! Run orchestration.
//!
//! Covers engine launching, the strategy dispatcher state machine, and
//! process snapshots through the external checkpoint utility.

pub mod dispatcher;
pub mod launcher;
pub mod snapshot;
