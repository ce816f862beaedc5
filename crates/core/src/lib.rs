//! Domain logic for the Fabula batch illustration scheduler.
//!
//! This crate is intentionally free of internal dependencies and of any
//! I/O: entities, state machines, progress counters, and retry policy are
//! all pure so they can be used (and tested) without a runtime.

pub mod batch;
pub mod error;
pub mod progress;
pub mod retry;
pub mod status;
pub mod types;
