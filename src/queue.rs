//! Polling consumer of queued analysis runs.

mod worker;

pub use worker::QueueWorker;
