//! Live-state snapshot types
//!
//! Everything here is produced fresh by a provider read and describes what
//! currently exists. Values are never cached across reconciliation steps.

use crate::spec::{LoadBalancerAttachment, ScalingPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time read of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveServiceState {
    /// False when the provider has no such service
    pub exists: bool,

    pub cluster_name: String,

    pub service_name: String,

    /// Revision the service currently points at
    #[serde(default)]
    pub active_task_definition_arn: Option<String>,

    #[serde(default)]
    pub running_count: u32,

    #[serde(default)]
    pub pending_count: u32,

    /// Desired count as recorded by the provider
    #[serde(default)]
    pub desired_count_live: u32,

    /// Rollouts known to the provider, newest first
    #[serde(default)]
    pub deployments: Vec<DeploymentSummary>,

    #[serde(default)]
    pub scaling_policy: Option<ScalingPolicy>,

    #[serde(default)]
    pub load_balancer: Option<LoadBalancerAttachment>,

    /// Helper task name -> bound revision
    #[serde(default)]
    pub helper_tasks: BTreeMap<String, HelperTaskBinding>,

    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl LiveServiceState {
    /// Snapshot for a service the provider does not know about
    pub fn absent(cluster_name: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            exists: false,
            cluster_name: cluster_name.into(),
            service_name: service_name.into(),
            active_task_definition_arn: None,
            running_count: 0,
            pending_count: 0,
            desired_count_live: 0,
            deployments: Vec::new(),
            scaling_policy: None,
            load_balancer: None,
            helper_tasks: BTreeMap::new(),
            created_at: None,
        }
    }

    /// Whether a rollout is still replacing tasks
    pub fn rollout_in_progress(&self) -> bool {
        self.deployments.len() > 1
            || self
                .deployments
                .iter()
                .any(|d| d.rollout_state == RolloutState::InProgress)
    }

    /// Running count matches desired count and no rollout is in flight
    pub fn is_stable(&self) -> bool {
        self.exists
            && self.running_count == self.desired_count_live
            && self.pending_count == 0
            && !self.rollout_in_progress()
    }
}

/// One rollout of a service onto a task definition revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub id: String,

    pub task_definition_arn: String,

    pub desired_count: u32,

    pub running_count: u32,

    pub rollout_state: RolloutState,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Provider-reported rollout progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    InProgress,
    Completed,
    Failed,
}

/// Revision bound to a helper task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperTaskBinding {
    pub task_definition_arn: String,
    pub desired_count: u32,
}

/// A running task instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: String,

    pub task_definition_arn: String,

    pub started_at: chrono::DateTime<chrono::Utc>,

    /// Provider status string (RUNNING, PENDING, ...)
    pub last_status: String,
}

/// Compute capacity group (e.g. an autoscaling group)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityGroupState {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
}

impl CapacityGroupState {
    pub fn allows(&self, desired: u32) -> bool {
        desired >= self.min_size && desired <= self.max_size
    }
}

/// Handle returned when a one-off task is started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationHandle {
    pub cluster_name: String,
    pub task_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(state: RolloutState) -> DeploymentSummary {
        DeploymentSummary {
            id: "d-1".into(),
            task_definition_arn: "web:1".into(),
            desired_count: 2,
            running_count: 2,
            rollout_state: state,
            created_at: chrono::Utc::now(),
        }
    }

    fn live(running: u32, desired: u32) -> LiveServiceState {
        LiveServiceState {
            exists: true,
            running_count: running,
            desired_count_live: desired,
            deployments: vec![deployment(RolloutState::Completed)],
            ..LiveServiceState::absent("prod", "web")
        }
    }

    #[test]
    fn test_stable_when_counts_match() {
        assert!(live(2, 2).is_stable());
        assert!(!live(1, 2).is_stable());
    }

    #[test]
    fn test_not_stable_during_rollout() {
        let mut state = live(2, 2);
        state.deployments = vec![deployment(RolloutState::InProgress)];
        assert!(!state.is_stable());

        state.deployments = vec![
            deployment(RolloutState::Completed),
            deployment(RolloutState::Completed),
        ];
        assert!(!state.is_stable());
    }

    #[test]
    fn test_pending_tasks_block_stability() {
        let mut state = live(2, 2);
        state.pending_count = 1;
        assert!(!state.is_stable());
    }

    #[test]
    fn test_absent_is_never_stable() {
        assert!(!LiveServiceState::absent("prod", "web").is_stable());
    }

    #[test]
    fn test_capacity_bounds() {
        let group = CapacityGroupState {
            name: "asg".into(),
            min_size: 1,
            max_size: 4,
            desired_capacity: 2,
        };
        assert!(group.allows(4));
        assert!(!group.allows(5));
        assert!(!group.allows(0));
    }
}
