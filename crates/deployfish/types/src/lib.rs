//! deployfish Types - desired-state and live-state model
//!
//! deployfish reconciles containerized services running on an orchestration
//! provider with the description an operator keeps in `deployfish.yml`.
//! This crate holds the vocabulary shared by every other crate in the
//! workspace.
//!
//! ## Key Concepts
//!
//! - **ServiceSpec**: the validated desired state of one service
//! - **ServiceKind**: closed set of service shapes (load-balanced, worker)
//! - **TaskDefinition**: container/resource template, registered as immutable revisions
//! - **LiveServiceState**: a point-in-time read of what the provider is running
//! - **DeployfishConfig**: the parsed `deployfish.yml` file
//!
//! Nothing in this crate talks to the provider. Reads and writes go through
//! `deployfish-provider`; planning and execution live in `deployfish-engine`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod live;
pub mod spec;
pub mod task_definition;

// Re-export main types
pub use config::{DeployfishConfig, LoadOptions};
pub use error::{ConfigError, Result};
pub use live::{
    CapacityGroupState, DeploymentSummary, HelperTaskBinding, InvocationHandle,
    LiveServiceState, RolloutState, TaskInstance,
};
pub use spec::{
    parameter_prefix, CapacityGroupRef, ConfigParameter, HelperTaskSpec, LoadBalancerAttachment,
    ScalingPolicy, ServiceKind, ServiceSpec, ServiceTarget, StandaloneTaskSpec,
};
pub use task_definition::{
    ContainerDefinition, PortMapping, TaskDefinition, TaskDefinitionRevision,
};
