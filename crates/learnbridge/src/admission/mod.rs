//! Per-source fan-out admission.
//!
//! Caps the number of distinct destinations a source host may concurrently
//! have installed rules toward. A destination that is already active is
//! always admitted again.

mod controller;

pub use controller::{AdmissionController, Reservation};
