//! Flow lifecycle reconciliation.
//!
//! Rule removals drive two kinds of cleanup: closing the TCP connection a
//! TCP-aware rule was tracking, and retiring a (source, destination) pair
//! from the admission index once nothing keeps it alive.

mod reconciler;

pub use reconciler::{FlowLifecycleReconciler, ReconcileOutcome};
