//! Scheduler layer
//!
//! Consumes the job queue and hands each job to the execution service.

pub mod poller;

pub use poller::QueuePoller;
