//! warmbox: warm-pooled container sandboxes for running untrusted snippets
//! Keeps a set of idle containers per language so a request only pays for
//! file injection and process start, not for container creation.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Shared type definitions, error classes, request/result shapes
//! - [`config::presets`]: Language registry (image, file extension, run template)
//! - [`config::config`]: `config.json` loading and validation
//!
//! ## Sandbox Runtime ([`runtime`])
//! - [`runtime::SandboxRuntime`]: Engine-neutral container operations
//! - [`runtime::docker`]: Docker Engine adapter over bollard
//! - [`runtime::archive`]: Single-file tar packing for injection/extraction
//!
//! ## Core ([`core`])
//! - [`core::pool`]: Per-language warm pool with exclusive leases
//! - [`core::pipeline`]: Request execution (pooled and one-shot strategies)
//!
//! ## Observability ([`observability`])
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::mock_runtime`]: In-memory runtime for engine-free tests
//! - [`testing::race_proof`]: Lease exclusivity proof framework
//!
//! # Design Principles
//!
//! 1. **One owner per sandbox** - A sandbox is in a pool or in a lease, never both
//! 2. **Leases always return** - Dropping a lease releases it, whatever the exit path
//! 3. **Tainted sandboxes leave** - A sandbox abandoned mid-run is destroyed, not reused
//! 4. **Program failure is a result** - Non-zero exits and stderr are data, not errors

// Configuration
pub mod config;

// Sandbox runtime adapters
pub mod runtime;

// Pool and pipeline
pub mod core;

// Observability
pub mod observability;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the warmbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;

pub use config::config::WarmboxConfig;
pub use config::presets::{LanguageProfile, LanguageRegistry};
pub use crate::core::pipeline::{ExecutionPipeline, PipelineSettings};
pub use crate::core::pool::{SandboxLease, SandboxPool};
pub use runtime::{Deadline, SandboxRuntime, SandboxSpec};
pub use testing::race_proof;
