//! Broadcast record persistence
//!
//! Handles:
//! - Keyed storage of in-flight broadcasts
//! - Guarded state transitions (pending/submitted/confirmed)
//! - The per-account lock view

mod locks;
mod record;
mod store;

pub use locks::AccountLockView;
pub use record::{
    broadcast_key, confirmed_key, BroadcastRecord, BroadcastState, ConfirmedBroadcast,
    BROADCAST_NAMESPACE, CONFIRMED_NAMESPACE,
};
pub use store::{records_in, BroadcastStore};
