//! Analysis Execution Module
//!
//! Runs auto-analyses in the background and collects their failures.
//!
//! # Architecture
//!
//! - [`job`]: the [`Execute`] wrapper and the [`RunAnalysis`] hook
//! - [`exceptions`]: the process-wide queue of captured failures

pub mod exceptions;
pub mod job;

pub use exceptions::{CapturedException, ExceptionQueue};
pub use job::{Execute, JobHandle, RunAnalysis};
