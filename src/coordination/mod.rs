//! Broadcast lifecycle coordination
//!
//! The coordinator:
//! 1. Accepts new broadcasts as pending records
//! 2. Submits pending records once per ingested block
//! 3. Confirms or expires submitted records against the chain tip
//! 4. Detects reorgs that revert already-confirmed transactions

pub mod engine;
pub mod handler;
pub mod worker;

pub use engine::{BroadcastCoordinator, PassSummary};
pub use handler::OutcomeHandler;
pub use worker::{BlockWorker, CommitWorker};
