//! deployfish Provider - infrastructure client trait and adapters
//!
//! Every read and write against the orchestration provider goes through
//! [`InfrastructureClient`]:
//!
//! - **InMemoryProvider**: dashmap-backed simulator. Each describe moves the
//!   service one step toward its desired count, so stability polling behaves
//!   like it does against a real scheduler. Records a call log and supports
//!   injected failures. Optionally persisted to a JSON state file.
//! - **HttpProvider**: JSON client for a provider gateway.
//!
//! ## Idempotency
//!
//! Describe/list/get calls never mutate. Mutating calls are issued at most
//! once per planned action by the engine; adapters never retry them.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod client;
pub mod error;
pub mod http;
pub mod memory;

// Re-exports
pub use client::{InfrastructureClient, Operation, ServiceRequest};
pub use error::{InfrastructureError, Result};
pub use http::HttpProvider;
pub use memory::{InMemoryProvider, ProviderCall};
