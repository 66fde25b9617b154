//! Sandbox pool and execution pipeline.
//!
//! The pool owns every sandbox and hands them out as leases; the pipeline
//! borrows one per request and never keeps it afterwards.

pub mod pipeline;
pub mod pool;
