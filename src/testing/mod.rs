//! Testing infrastructure
//!
//! In-memory runtime for engine-free tests and the pool race proof harness.

pub mod mock_runtime;
pub mod race_proof;

// Re-export commonly used items
pub use mock_runtime::InMemoryRuntime;
pub use race_proof::*;
