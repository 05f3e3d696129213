//! Infrastructure client trait
//!
//! The orchestration provider, its autoscaling and load-balancing subsystems,
//! and its parameter store are all reached through this one trait.

use crate::error::Result;
use async_trait::async_trait;
use deployfish_types::{
    CapacityGroupState, ConfigParameter, InvocationHandle, LiveServiceState,
    LoadBalancerAttachment, ScalingPolicy, ServiceTarget, TaskDefinition, TaskDefinitionRevision,
    TaskInstance,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client for the orchestration provider
#[async_trait]
pub trait InfrastructureClient: Send + Sync {
    /// Short adapter name for logs
    fn name(&self) -> &str;

    /// Describe a service; `None` when the provider has no such service
    async fn describe_service(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> Result<Option<LiveServiceState>>;

    /// Fetch the content of a registered revision
    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinition>;

    /// Register a new immutable revision
    async fn register_task_definition(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRevision>;

    /// Create the primary service or bind a helper task to it
    async fn create_service(&self, request: &ServiceRequest) -> Result<()>;

    /// Point the primary service or a helper task at a revision
    async fn update_service(&self, request: &ServiceRequest) -> Result<()>;

    async fn delete_service(&self, cluster_name: &str, service_name: &str) -> Result<()>;

    async fn scale_service(&self, cluster_name: &str, service_name: &str, count: u32)
        -> Result<()>;

    async fn attach_scaling_policy(
        &self,
        cluster_name: &str,
        service_name: &str,
        policy: &ScalingPolicy,
    ) -> Result<()>;

    async fn detach_scaling_policy(&self, cluster_name: &str, service_name: &str) -> Result<()>;

    async fn describe_capacity_group(&self, name: &str) -> Result<CapacityGroupState>;

    /// Set a group's desired capacity; `force` widens min/max as needed
    async fn adjust_capacity_group(&self, name: &str, desired: u32, force: bool) -> Result<()>;

    /// Start a one-off task outside of any service
    async fn run_one_off_task(
        &self,
        cluster_name: &str,
        task_definition_arn: &str,
        command: &[String],
    ) -> Result<InvocationHandle>;

    /// Running instances of a service, oldest first
    async fn list_running_task_instances(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> Result<Vec<TaskInstance>>;

    async fn kill_task_instance(&self, cluster_name: &str, task_id: &str) -> Result<()>;

    /// Write parameters as `{prefix}{name}`
    async fn put_parameters(&self, prefix: &str, parameters: &[ConfigParameter]) -> Result<()>;

    /// Parameters whose full name starts with `prefix`, sorted by name
    async fn get_parameters(&self, prefix: &str) -> Result<Vec<ConfigParameter>>;
}

/// Create/update request for a service target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub cluster_name: String,

    /// Primary service name; helpers are addressed through their parent
    pub service_name: String,

    pub target: ServiceTarget,

    pub task_definition_arn: String,

    /// `None` leaves the live desired count untouched
    #[serde(default)]
    pub desired_count: Option<u32>,

    /// Only honoured on create
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerAttachment>,
}

/// Provider operations, as recorded in call logs and used for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    DescribeService,
    DescribeTaskDefinition,
    RegisterTaskDefinition,
    CreateService,
    UpdateService,
    DeleteService,
    ScaleService,
    AttachScalingPolicy,
    DetachScalingPolicy,
    DescribeCapacityGroup,
    AdjustCapacityGroup,
    RunOneOffTask,
    ListRunningTasks,
    KillTask,
    PutParameters,
    GetParameters,
}

impl Operation {
    /// Whether the operation changes provider state
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Operation::DescribeService
                | Operation::DescribeTaskDefinition
                | Operation::DescribeCapacityGroup
                | Operation::ListRunningTasks
                | Operation::GetParameters
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::DescribeService => "describe_service",
            Operation::DescribeTaskDefinition => "describe_task_definition",
            Operation::RegisterTaskDefinition => "register_task_definition",
            Operation::CreateService => "create_service",
            Operation::UpdateService => "update_service",
            Operation::DeleteService => "delete_service",
            Operation::ScaleService => "scale_service",
            Operation::AttachScalingPolicy => "attach_scaling_policy",
            Operation::DetachScalingPolicy => "detach_scaling_policy",
            Operation::DescribeCapacityGroup => "describe_capacity_group",
            Operation::AdjustCapacityGroup => "adjust_capacity_group",
            Operation::RunOneOffTask => "run_one_off_task",
            Operation::ListRunningTasks => "list_running_task_instances",
            Operation::KillTask => "kill_task_instance",
            Operation::PutParameters => "put_parameters",
            Operation::GetParameters => "get_parameters",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutating_operations() {
        assert!(!Operation::DescribeService.is_mutating());
        assert!(!Operation::ListRunningTasks.is_mutating());
        assert!(Operation::ScaleService.is_mutating());
        assert!(Operation::KillTask.is_mutating());
        assert!(Operation::PutParameters.is_mutating());
    }
}
