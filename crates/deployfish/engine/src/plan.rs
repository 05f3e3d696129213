//! Diff & plan
//!
//! Pure functions from (desired state, observed state, request) to an ordered
//! list of actions. Every validation the engine performs happens here, so a
//! rejected request never reaches a mutating provider call.
//!
//! Ordering rules:
//! - registrations come first, primary before helpers
//! - capacity is adjusted before the service that needs it
//! - helper actions follow the primary action of the same kind

use crate::capacity::AutoscalingGroupAdjustment;
use crate::error::{EngineError, Result};
use crate::observe::ObservedState;
use crate::poller::StabilityCondition;
use deployfish_types::{
    ConfigParameter, LoadBalancerAttachment, ScalingPolicy, ServiceSpec, ServiceTarget,
    TaskDefinition, TaskInstance,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which revision a create/update points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionSource {
    /// The revision registered for the same target earlier in the plan
    Registered,
    /// A revision that already exists
    Existing(String),
}

impl fmt::Display for RevisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionSource::Registered => write!(f, "new revision"),
            RevisionSource::Existing(arn) => write!(f, "{}", arn),
        }
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    RegisterTaskDefinition {
        definition: TaskDefinition,
    },
    WriteParameters {
        prefix: String,
        parameters: Vec<ConfigParameter>,
    },
    AdjustCapacityGroup {
        adjustment: AutoscalingGroupAdjustment,
    },
    CreateService {
        revision: RevisionSource,
        desired_count: u32,
        load_balancer: Option<LoadBalancerAttachment>,
    },
    UpdateService {
        revision: RevisionSource,
    },
    ScaleService {
        count: u32,
    },
    AttachScalingPolicy {
        policy: ScalingPolicy,
    },
    DetachScalingPolicy,
    AwaitStability {
        condition: StabilityCondition,
    },
    DeleteService,
    RestartTask {
        task_id: String,
    },
    RunOneOffTask {
        task_definition_arn: String,
        command: Vec<String>,
    },
}

impl Action {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::AwaitStability { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::RegisterTaskDefinition { definition } => write!(
                f,
                "register task definition {} (image tag {})",
                definition.family,
                definition.version().unwrap_or("-")
            ),
            Action::WriteParameters { prefix, parameters } => {
                write!(f, "write {} parameters under {}", parameters.len(), prefix)
            }
            Action::AdjustCapacityGroup { adjustment } => {
                write!(f, "adjust capacity group {}", adjustment)
            }
            Action::CreateService {
                revision,
                desired_count,
                load_balancer,
            } => {
                write!(f, "create with {} and {} tasks", revision, desired_count)?;
                if let Some(lb) = load_balancer {
                    write!(f, " behind {}", lb)?;
                }
                Ok(())
            }
            Action::UpdateService { revision } => write!(f, "update to {}", revision),
            Action::ScaleService { count } => write!(f, "scale to {} tasks", count),
            Action::AttachScalingPolicy { policy } => write!(
                f,
                "attach scaling policy {}..{} on {} at {}",
                policy.min_capacity, policy.max_capacity, policy.metric, policy.target_value
            ),
            Action::DetachScalingPolicy => write!(f, "detach scaling policy"),
            Action::AwaitStability { condition } => write!(f, "wait until {}", condition),
            Action::DeleteService => write!(f, "delete service"),
            Action::RestartTask { task_id } => write!(f, "stop task {}", task_id),
            Action::RunOneOffTask {
                task_definition_arn,
                command,
            } => write!(f, "run {} on {}", command.join(" "), task_definition_arn),
        }
    }
}

/// An action and the part of the service it addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub target: ServiceTarget,
    pub action: Action,
}

impl PlannedAction {
    fn primary(action: Action) -> Self {
        Self {
            target: ServiceTarget::Primary,
            action,
        }
    }

    fn helper(name: &str, action: Action) -> Self {
        Self {
            target: ServiceTarget::Helper(name.to_string()),
            action,
        }
    }
}

/// The request a plan was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Create,
    Update,
    Scale,
    Restart { hard: bool },
    Delete,
    RunTask,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanKind::Create => write!(f, "create"),
            PlanKind::Update => write!(f, "update"),
            PlanKind::Scale => write!(f, "scale"),
            PlanKind::Restart { hard: true } => write!(f, "hard restart"),
            PlanKind::Restart { hard: false } => write!(f, "restart"),
            PlanKind::Delete => write!(f, "delete"),
            PlanKind::RunTask => write!(f, "run task"),
        }
    }
}

/// Ordered actions for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub cluster_name: String,
    pub service_name: String,
    pub kind: PlanKind,
    pub actions: Vec<PlannedAction>,
}

impl ReconciliationPlan {
    fn new(spec: &ServiceSpec, kind: PlanKind) -> Self {
        Self {
            cluster_name: spec.cluster_name.clone(),
            service_name: spec.service_name.clone(),
            kind,
            actions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn mutating_actions(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.action.is_mutating())
    }

    /// Capacity adjustments, for the pre-flight check
    pub fn capacity_adjustments(&self) -> impl Iterator<Item = &AutoscalingGroupAdjustment> {
        self.actions.iter().filter_map(|a| match &a.action {
            Action::AdjustCapacityGroup { adjustment } => Some(adjustment),
            _ => None,
        })
    }

    fn push(&mut self, action: PlannedAction) {
        self.actions.push(action);
    }
}

impl fmt::Display for ReconciliationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Plan: {} {} in cluster {}",
            self.kind, self.service_name, self.cluster_name
        )?;
        if self.actions.is_empty() {
            return writeln!(f, "  (nothing to do)");
        }
        for (i, planned) in self.actions.iter().enumerate() {
            writeln!(f, "  {:>2}. [{}] {}", i + 1, planned.target, planned.action)?;
        }
        Ok(())
    }
}

/// Capacity group handling requested by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityOptions {
    /// Adjust the capacity group alongside the service
    pub asg: bool,
    /// Adjust even when the new size is outside the group's bounds
    pub force_asg: bool,
}

impl Default for CapacityOptions {
    fn default() -> Self {
        Self {
            asg: true,
            force_asg: false,
        }
    }
}

fn capacity_action(
    spec: &ServiceSpec,
    observed: &ObservedState,
    count: u32,
    options: CapacityOptions,
) -> Result<Option<PlannedAction>> {
    if !options.asg {
        return Ok(None);
    }
    let (Some(group), Some(state)) = (&spec.capacity_group, &observed.capacity_group) else {
        return Ok(None);
    };
    let adjustment = AutoscalingGroupAdjustment::compute(group, state, count, options.force_asg);
    // Out-of-bounds sizes fail at planning time so dry runs report them too
    adjustment.check()?;
    Ok(Some(PlannedAction::primary(Action::AdjustCapacityGroup { adjustment })))
}

fn require_exists(spec: &ServiceSpec, observed: &ObservedState) -> Result<()> {
    if observed.exists() {
        Ok(())
    } else {
        Err(EngineError::ServiceNotFound {
            cluster: spec.cluster_name.clone(),
            service: spec.service_name.clone(),
        })
    }
}

/// Plan creation of a service that does not exist yet
pub fn plan_create(
    spec: &ServiceSpec,
    observed: &ObservedState,
    capacity: CapacityOptions,
    update_configs: bool,
) -> Result<ReconciliationPlan> {
    if observed.exists() {
        return Err(EngineError::AlreadyExists {
            cluster: spec.cluster_name.clone(),
            service: spec.service_name.clone(),
        });
    }

    let mut plan = ReconciliationPlan::new(spec, PlanKind::Create);

    plan.push(PlannedAction::primary(Action::RegisterTaskDefinition {
        definition: spec.task_definition.clone(),
    }));
    for helper in &spec.helper_tasks {
        plan.push(PlannedAction::helper(
            &helper.name,
            Action::RegisterTaskDefinition {
                definition: helper.task_definition.clone(),
            },
        ));
    }

    if update_configs && !spec.config.is_empty() {
        plan.push(PlannedAction::primary(Action::WriteParameters {
            prefix: spec.parameter_prefix(),
            parameters: spec.config.clone(),
        }));
    }

    if let Some(action) = capacity_action(spec, observed, spec.desired_count, capacity)? {
        plan.push(action);
    }

    plan.push(PlannedAction::primary(Action::CreateService {
        revision: RevisionSource::Registered,
        desired_count: spec.desired_count,
        load_balancer: spec.load_balancer().cloned(),
    }));
    for helper in &spec.helper_tasks {
        plan.push(PlannedAction::helper(
            &helper.name,
            Action::CreateService {
                revision: RevisionSource::Registered,
                desired_count: helper.desired_count,
                load_balancer: None,
            },
        ));
    }

    if let Some(policy) = &spec.scaling_policy {
        plan.push(PlannedAction::primary(Action::AttachScalingPolicy {
            policy: policy.clone(),
        }));
    }

    Ok(plan)
}

/// Plan an update of an existing service to the desired revisions
///
/// Never changes the desired count.
pub fn plan_update(spec: &ServiceSpec, observed: &ObservedState) -> Result<ReconciliationPlan> {
    require_exists(spec, observed)?;
    check_immutable_fields(spec, observed)?;

    let mut plan = ReconciliationPlan::new(spec, PlanKind::Update);
    let live = &observed.service;

    let primary_changed = observed.active_definition.as_ref() != Some(&spec.task_definition);
    if primary_changed {
        plan.push(PlannedAction::primary(Action::RegisterTaskDefinition {
            definition: spec.task_definition.clone(),
        }));
    }

    let mut helper_revisions = Vec::with_capacity(spec.helper_tasks.len());
    for helper in &spec.helper_tasks {
        let live_definition = observed.helper_definitions.get(&helper.name);
        let live_arn = live
            .helper_tasks
            .get(&helper.name)
            .map(|b| b.task_definition_arn.clone());

        let revision = match live_arn {
            Some(arn) if live_definition == Some(&helper.task_definition) => {
                RevisionSource::Existing(arn)
            }
            _ => {
                plan.push(PlannedAction::helper(
                    &helper.name,
                    Action::RegisterTaskDefinition {
                        definition: helper.task_definition.clone(),
                    },
                ));
                RevisionSource::Registered
            }
        };
        helper_revisions.push((helper.name.as_str(), revision));
    }

    let primary_revision = match (&live.active_task_definition_arn, primary_changed) {
        (Some(arn), false) => RevisionSource::Existing(arn.clone()),
        _ => RevisionSource::Registered,
    };
    plan.push(PlannedAction::primary(Action::UpdateService {
        revision: primary_revision,
    }));
    for (name, revision) in helper_revisions {
        plan.push(PlannedAction::helper(name, Action::UpdateService { revision }));
    }

    match &spec.scaling_policy {
        Some(policy) if policy.needs_update(live.scaling_policy.as_ref()) => {
            plan.push(PlannedAction::primary(Action::AttachScalingPolicy {
                policy: policy.clone(),
            }));
        }
        None if live.scaling_policy.is_some() => {
            plan.push(PlannedAction::primary(Action::DetachScalingPolicy));
        }
        _ => {}
    }

    Ok(plan)
}

fn check_immutable_fields(spec: &ServiceSpec, observed: &ObservedState) -> Result<()> {
    let live = &observed.service;
    let immutable = |field: &str, live: String, desired: String| EngineError::ImmutableField {
        field: field.to_string(),
        live,
        desired,
    };

    // Live state is fetched under the desired cluster and name, so these two only
    // fire when a provider answers for a different cluster or name
    if live.cluster_name != spec.cluster_name {
        return Err(immutable(
            "cluster",
            live.cluster_name.clone(),
            spec.cluster_name.clone(),
        ));
    }
    if live.service_name != spec.service_name {
        return Err(immutable(
            "service name",
            live.service_name.clone(),
            spec.service_name.clone(),
        ));
    }
    if live.load_balancer.as_ref() != spec.load_balancer() {
        let describe = |lb: Option<&LoadBalancerAttachment>| {
            lb.map(ToString::to_string)
                .unwrap_or_else(|| "none".to_string())
        };
        return Err(immutable(
            "load balancer",
            describe(live.load_balancer.as_ref()),
            describe(spec.load_balancer()),
        ));
    }
    Ok(())
}

/// Plan a change of the primary service's task count
pub fn plan_scale(
    spec: &ServiceSpec,
    observed: &ObservedState,
    count: i64,
    capacity: CapacityOptions,
) -> Result<ReconciliationPlan> {
    let count = validate_count(count)?;
    require_exists(spec, observed)?;

    let mut plan = ReconciliationPlan::new(spec, PlanKind::Scale);
    if let Some(action) = capacity_action(spec, observed, count, capacity)? {
        plan.push(action);
    }
    plan.push(PlannedAction::primary(Action::ScaleService { count }));
    Ok(plan)
}

/// Reject negative or oversized task counts
pub fn validate_count(count: i64) -> Result<u32> {
    u32::try_from(count).map_err(|_| EngineError::InvalidCount(count))
}

/// Plan replacement of every running task, oldest first
///
/// A soft restart waits for each killed task to be replaced before the next
/// kill; a hard restart has no waits.
pub fn plan_restart(
    spec: &ServiceSpec,
    observed: &ObservedState,
    running: &[TaskInstance],
    hard: bool,
) -> Result<ReconciliationPlan> {
    require_exists(spec, observed)?;

    let mut tasks: Vec<&TaskInstance> = running.iter().collect();
    tasks.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.task_id.cmp(&b.task_id))
    });

    let mut plan = ReconciliationPlan::new(spec, PlanKind::Restart { hard });
    for task in tasks {
        plan.push(PlannedAction::primary(Action::RestartTask {
            task_id: task.task_id.clone(),
        }));
        if !hard {
            plan.push(PlannedAction::primary(Action::AwaitStability {
                condition: StabilityCondition::Replaced {
                    task_id: task.task_id.clone(),
                },
            }));
        }
    }
    Ok(plan)
}

/// Plan draining and removal of the primary service
pub fn plan_delete(spec: &ServiceSpec, observed: &ObservedState) -> Result<ReconciliationPlan> {
    require_exists(spec, observed)?;

    let mut plan = ReconciliationPlan::new(spec, PlanKind::Delete);
    plan.push(PlannedAction::primary(Action::ScaleService { count: 0 }));
    plan.push(PlannedAction::primary(Action::AwaitStability {
        condition: StabilityCondition::Drained,
    }));
    plan.push(PlannedAction::primary(Action::DeleteService));
    Ok(plan)
}

/// Plan a one-off task on the service's active revision
pub fn plan_run_task(
    spec: &ServiceSpec,
    observed: &ObservedState,
    command: &[String],
) -> Result<ReconciliationPlan> {
    require_exists(spec, observed)?;
    let task_definition_arn = observed
        .service
        .active_task_definition_arn
        .clone()
        .ok_or_else(|| EngineError::ServiceNotFound {
            cluster: spec.cluster_name.clone(),
            service: spec.service_name.clone(),
        })?;

    let mut plan = ReconciliationPlan::new(spec, PlanKind::RunTask);
    plan.push(PlannedAction::primary(Action::RunOneOffTask {
        task_definition_arn,
        command: command.to_vec(),
    }));
    Ok(plan)
}
