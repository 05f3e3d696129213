//! Desired-state model for a service
//!
//! A ServiceSpec is what the operator asked for. It is built once per command
//! from `deployfish.yml` (see [`crate::config`]) and never mutated afterwards.

use crate::task_definition::TaskDefinition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated desired state of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service_name: String,

    pub cluster_name: String,

    /// Shape of the service, fixed at load time
    pub kind: ServiceKind,

    /// Target task definition for the primary service
    pub task_definition: TaskDefinition,

    /// Number of tasks the service should run
    pub desired_count: u32,

    /// Application autoscaling policy
    pub scaling_policy: Option<ScalingPolicy>,

    /// Auxiliary task definitions kept in lockstep with the service
    pub helper_tasks: Vec<HelperTaskSpec>,

    /// Compute capacity group hosting the service's tasks
    pub capacity_group: Option<CapacityGroupRef>,

    /// Parameters published to the provider's parameter store
    pub config: Vec<ConfigParameter>,
}

impl ServiceSpec {
    /// Load balancer binding, if this is a load-balanced service
    pub fn load_balancer(&self) -> Option<&LoadBalancerAttachment> {
        match &self.kind {
            ServiceKind::LoadBalanced { load_balancer } => Some(load_balancer),
            ServiceKind::Worker => None,
        }
    }

    pub fn helper(&self, name: &str) -> Option<&HelperTaskSpec> {
        self.helper_tasks.iter().find(|h| h.name == name)
    }

    /// Prefix under which this service's parameters are stored
    pub fn parameter_prefix(&self) -> String {
        parameter_prefix(&self.cluster_name, &self.service_name)
    }
}

/// Parameter store prefix for a cluster/service pair
pub fn parameter_prefix(cluster_name: &str, service_name: &str) -> String {
    format!("{}.{}.", cluster_name, service_name)
}

/// Closed set of service shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceKind {
    /// Registered with a load balancer target group
    LoadBalanced { load_balancer: LoadBalancerAttachment },

    /// No inbound traffic; consumes work from elsewhere
    Worker,
}

impl ServiceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::LoadBalanced { .. } => "load-balanced",
            ServiceKind::Worker => "worker",
        }
    }
}

/// Load balancer registration of a service
///
/// Fixed at creation time: the provider cannot rebind a running service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerAttachment {
    pub target_group_arn: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener_rule_arn: Option<String>,

    /// Container receiving traffic
    pub container_name: String,

    pub container_port: u16,
}

impl fmt::Display for LoadBalancerAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{}",
            self.target_group_arn, self.container_name, self.container_port
        )
    }
}

/// Application autoscaling policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub min_capacity: u32,

    pub max_capacity: u32,

    /// Tracked metric, e.g. `CPUUtilization`
    pub metric: String,

    /// Target value for the tracked metric
    pub target_value: u32,
}

impl ScalingPolicy {
    /// Whether the live policy differs from this one
    pub fn needs_update(&self, live: Option<&ScalingPolicy>) -> bool {
        live != Some(self)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_capacity > self.max_capacity {
            return Err(format!(
                "scaling min_capacity {} exceeds max_capacity {}",
                self.min_capacity, self.max_capacity
            ));
        }
        if self.metric.is_empty() {
            return Err("scaling metric must not be empty".into());
        }
        Ok(())
    }
}

/// Helper task attached to a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperTaskSpec {
    pub name: String,

    pub task_definition: TaskDefinition,

    pub desired_count: u32,
}

/// Reference to the capacity group hosting a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityGroupRef {
    pub name: String,

    /// How many of the service's tasks fit on one instance
    pub tasks_per_instance: u32,
}

impl CapacityGroupRef {
    /// Instances needed to host `service_count` tasks
    pub fn instances_for(&self, service_count: u32) -> u32 {
        let per = self.tasks_per_instance.max(1);
        service_count.div_ceil(per)
    }
}

/// A key/value parameter for the parameter store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigParameter {
    pub name: String,
    pub value: String,
}

impl ConfigParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Which part of a service an operation addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTarget {
    Primary,
    Helper(String),
}

impl ServiceTarget {
    pub fn is_primary(&self) -> bool {
        matches!(self, ServiceTarget::Primary)
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceTarget::Primary => write!(f, "service"),
            ServiceTarget::Helper(name) => write!(f, "helper:{}", name),
        }
    }
}

/// A standalone task declared in the `tasks:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandaloneTaskSpec {
    pub name: String,

    /// Service this task is associated with
    pub service: Option<String>,

    pub cluster_name: String,

    pub task_definition: TaskDefinition,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min: u32, max: u32) -> ScalingPolicy {
        ScalingPolicy {
            min_capacity: min,
            max_capacity: max,
            metric: "CPUUtilization".into(),
            target_value: 60,
        }
    }

    #[test]
    fn test_scaling_needs_update() {
        let desired = policy(2, 6);
        assert!(desired.needs_update(None));
        assert!(desired.needs_update(Some(&policy(2, 8))));
        assert!(!desired.needs_update(Some(&policy(2, 6))));
    }

    #[test]
    fn test_scaling_validate() {
        assert!(policy(4, 2).validate().is_err());
        assert!(policy(2, 4).validate().is_ok());
    }

    #[test]
    fn test_instances_for() {
        let group = CapacityGroupRef {
            name: "asg".into(),
            tasks_per_instance: 2,
        };
        assert_eq!(group.instances_for(0), 0);
        assert_eq!(group.instances_for(3), 2);
        assert_eq!(group.instances_for(4), 2);

        let one = CapacityGroupRef {
            name: "asg".into(),
            tasks_per_instance: 0,
        };
        assert_eq!(one.instances_for(5), 5);
    }

    #[test]
    fn test_target_display() {
        assert_eq!(ServiceTarget::Primary.to_string(), "service");
        assert_eq!(
            ServiceTarget::Helper("migrate".into()).to_string(),
            "helper:migrate"
        );
    }

    #[test]
    fn test_parameter_prefix() {
        assert_eq!(parameter_prefix("prod", "web"), "prod.web.");
    }
}
