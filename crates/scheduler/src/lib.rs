//! Batch illustration-generation scheduler.
//!
//! A single coordinator task owns all scheduling state (the batch registry,
//! the running counters, the retry and cooldown books) and is the only
//! writer of any of it. Task execution runs on a genuinely parallel worker
//! pool; the two sides communicate exclusively through channels, so every
//! state mutation is applied serially and the concurrency invariants are
//! mechanically checkable.
//!
//! Construct a [`Scheduler`] via [`Scheduler::start`]; it has an explicit
//! lifecycle (no globals), so independent instances can coexist, one per
//! test if need be.

pub mod config;
pub(crate) mod coordinator;
pub mod events;
pub mod recovery;
pub(crate) mod registry;
pub mod scheduler;
pub(crate) mod worker;

pub use config::SchedulerConfig;
pub use events::SchedulerEvent;
pub use recovery::{JobStore, MemoryJobStore, PersistedBatch, PersistedTask, StoreError};
pub use scheduler::Scheduler;
