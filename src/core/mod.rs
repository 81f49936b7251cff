//! Core functionality for the Web3 funnel tracker.
//!
//! This module contains:
//! - The FIFO queue of pending event records
//! - The batcher that flushes, re-queues and retries batches
//! - The public tracker API built on top of both

pub mod batcher;
pub mod queue;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use batcher::{Batcher, DrainReport, FlushOutcome};
pub use queue::EventQueue;
pub use tracker::{ScriptAttributes, Tracker, TrackerConfig, TrackerError, Visibility};
