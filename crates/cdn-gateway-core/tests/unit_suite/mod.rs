//! Unit tests for cdn-gateway-core.
//!
//! Every component is wired to the memory backend, memory queue, memory
//! advertisement store and recording registrar.

pub mod grant;
pub mod helpers;
pub mod ingest;
pub mod mutator;
pub mod resolver;
