//! deployfish Engine - service lifecycle reconciliation
//!
//! Takes the desired state of a service, compares it against what the
//! provider is running, and drives the mutating calls needed to close the
//! gap, polling until the service settles.
//!
//! ## Flow
//!
//! 1. [`observe`] reads a fresh live-state snapshot
//! 2. [`plan`] computes an ordered [`ReconciliationPlan`] (pure)
//! 3. [`Reconciler`] issues the plan's calls through the provider
//! 4. [`StabilityPoller`] waits for convergence, bounded by a timeout
//!
//! [`ServiceManager`] wraps the four steps for each operation.
//!
//! ## Usage
//!
//! ```no_run
//! use deployfish_engine::{PollerConfig, RunOptions, ServiceManager};
//! use deployfish_provider::InMemoryProvider;
//! use deployfish_types::{DeployfishConfig, LoadOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeployfishConfig::from_path("deployfish.yml", &LoadOptions::default())?;
//! let spec = config.load_spec("web")?;
//!
//! let manager = ServiceManager::new(Arc::new(InMemoryProvider::new()), PollerConfig::default());
//! let outcome = manager.update(&spec, RunOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod capacity;
pub mod error;
pub mod manager;
pub mod observe;
pub mod outcome;
pub mod plan;
pub mod poller;
pub mod reconciler;

// Re-exports
pub use capacity::AutoscalingGroupAdjustment;
pub use error::{EngineError, Result};
pub use manager::{CreateOptions, RunOptions, ScaleOptions, ServiceInfo, ServiceManager};
pub use observe::{fetch_live_state, ObservedState};
pub use outcome::{ExecutionReport, HelperFailure, Outcome};
pub use plan::{
    Action, CapacityOptions, PlanKind, PlannedAction, ReconciliationPlan, RevisionSource,
};
pub use poller::{
    LiveStateSource, PollOutcome, PollerConfig, ServiceWatch, StabilityCondition, StabilityPoller,
};
pub use reconciler::Reconciler;
