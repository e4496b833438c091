//! Observable state for reactive recomputation.
//!
//! Reads of a [`MutableState`] are reported to the innermost read observer on the
//! current thread ([`observe_reads`]). Writes are recorded as pending and reported
//! synchronously to every write observer; [`send_apply_notifications`] later hands the
//! accumulated set of changed states to the apply observers, which is how a consumer
//! learns that something it read has changed.

pub mod context;
pub mod snapshot;
pub mod state;

pub use context::{observe_reads, record_read};
pub use snapshot::{
    ObserverHandle, has_pending_changes, record_write, register_apply_observer,
    register_write_observer, send_apply_notifications,
};
pub use state::{MutableState, StateId, mutable_state_of};
