//! Reconciler - executes plans against the provider
//!
//! Actions run one at a time, in plan order. The first failed primary action
//! stops the plan and nothing already applied is rolled back. Helper actions
//! are best-effort: a failure is recorded in the report and later actions for
//! the same helper are skipped, but the primary operation carries on.

use crate::error::{EngineError, Result};
use crate::outcome::{ExecutionReport, HelperFailure, Outcome};
use crate::plan::{Action, PlanKind, PlannedAction, ReconciliationPlan, RevisionSource};
use crate::poller::{ServiceWatch, StabilityCondition, StabilityPoller};
use deployfish_provider::{InfrastructureClient, InfrastructureError, ServiceRequest};
use deployfish_types::ServiceTarget;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

enum Step {
    Continue,
    TimedOut,
}

/// Executes reconciliation plans
pub struct Reconciler {
    client: Arc<dyn InfrastructureClient>,
    poller: StabilityPoller,
}

impl Reconciler {
    pub fn new(client: Arc<dyn InfrastructureClient>, poller: StabilityPoller) -> Self {
        Self { client, poller }
    }

    /// Execute `plan`; with `wait`, poll for stability once every action ran
    #[instrument(skip(self, plan), fields(service = %plan.service_name, kind = %plan.kind))]
    pub async fn execute(&self, plan: &ReconciliationPlan, wait: bool) -> Result<Outcome> {
        // Pre-flight: nothing is issued if any capacity adjustment is out of bounds
        for adjustment in plan.capacity_adjustments() {
            adjustment.check()?;
        }

        let mut report = ExecutionReport::default();
        let mut failed_helpers: BTreeSet<String> = BTreeSet::new();
        let hard_restart = plan.kind == PlanKind::Restart { hard: true };

        let mut index = 0;
        while index < plan.actions.len() {
            let planned = &plan.actions[index];

            if hard_restart && matches!(planned.action, Action::RestartTask { .. }) {
                let batch: Vec<&str> = plan.actions[index..]
                    .iter()
                    .map_while(|a| match &a.action {
                        Action::RestartTask { task_id } => Some(task_id.as_str()),
                        _ => None,
                    })
                    .collect();
                index += batch.len();
                self.kill_concurrently(plan, &batch, &mut report).await?;
                continue;
            }
            index += 1;

            if let ServiceTarget::Helper(name) = &planned.target {
                if failed_helpers.contains(name) {
                    report
                        .skipped
                        .push((planned.target.clone(), planned.action.to_string()));
                    continue;
                }
            }

            match self.apply(plan, planned, &mut report).await {
                Ok(Step::Continue) => {}
                Ok(Step::TimedOut) => return Ok(Outcome::TimedOut(report)),
                Err(e) => match &planned.target {
                    ServiceTarget::Primary => {
                        error!(action = %planned.action, error = %e, "Action failed");
                        return Err(e);
                    }
                    ServiceTarget::Helper(name) => {
                        warn!(helper = %name, action = %planned.action, error = %e, "Helper action failed");
                        report.helper_failures.push(HelperFailure {
                            helper: name.clone(),
                            action: planned.action.to_string(),
                            error: e.to_string(),
                        });
                        failed_helpers.insert(name.clone());
                    }
                },
            }
        }

        if wait {
            let watch = ServiceWatch::new(
                self.client.as_ref(),
                &plan.cluster_name,
                &plan.service_name,
            );
            let outcome = self
                .poller
                .wait_for(&watch, &StabilityCondition::Stable)
                .await?;
            report.poll = Some(outcome);
            if !outcome.is_stable() {
                return Ok(Outcome::TimedOut(report));
            }
        }

        info!(
            applied = report.applied.len(),
            helper_failures = report.helper_failures.len(),
            "Plan complete"
        );
        Ok(Outcome::Completed(report))
    }

    async fn apply(
        &self,
        plan: &ReconciliationPlan,
        planned: &PlannedAction,
        report: &mut ExecutionReport,
    ) -> Result<Step> {
        let client = self.client.as_ref();
        let cluster = plan.cluster_name.as_str();
        let service = plan.service_name.as_str();
        let target = &planned.target;

        info!(scope = %target, action = %planned.action, "Applying");

        match &planned.action {
            Action::RegisterTaskDefinition { definition } => {
                let revision = client.register_task_definition(definition).await?;
                info!(scope = %target, revision = %revision, "Registered task definition");
                report.registered.push((target.clone(), revision));
            }
            Action::WriteParameters { prefix, parameters } => {
                client.put_parameters(prefix, parameters).await?;
            }
            Action::AdjustCapacityGroup { adjustment } => {
                client
                    .adjust_capacity_group(
                        &adjustment.group_name,
                        adjustment.new_desired,
                        adjustment.force,
                    )
                    .await?;
            }
            Action::CreateService {
                revision,
                desired_count,
                load_balancer,
            } => {
                let request = ServiceRequest {
                    cluster_name: cluster.to_string(),
                    service_name: service.to_string(),
                    target: target.clone(),
                    task_definition_arn: resolve(revision, target, report)?,
                    desired_count: Some(*desired_count),
                    load_balancer: load_balancer.clone(),
                };
                client.create_service(&request).await?;
            }
            Action::UpdateService { revision } => {
                let request = ServiceRequest {
                    cluster_name: cluster.to_string(),
                    service_name: service.to_string(),
                    target: target.clone(),
                    task_definition_arn: resolve(revision, target, report)?,
                    desired_count: None,
                    load_balancer: None,
                };
                client.update_service(&request).await?;
            }
            Action::ScaleService { count } => {
                client.scale_service(cluster, service, *count).await?;
            }
            Action::AttachScalingPolicy { policy } => {
                client.attach_scaling_policy(cluster, service, policy).await?;
            }
            Action::DetachScalingPolicy => {
                client.detach_scaling_policy(cluster, service).await?;
            }
            Action::AwaitStability { condition } => {
                let watch = ServiceWatch::new(client, cluster, service);
                let outcome = self.poller.wait_for(&watch, condition).await?;
                report.poll = Some(outcome);
                if !outcome.is_stable() {
                    warn!(%condition, "Stopping plan: service did not settle in time");
                    return Ok(Step::TimedOut);
                }
                return Ok(Step::Continue);
            }
            Action::DeleteService => {
                client.delete_service(cluster, service).await?;
            }
            Action::RestartTask { task_id } => {
                client.kill_task_instance(cluster, task_id).await?;
            }
            Action::RunOneOffTask {
                task_definition_arn,
                command,
            } => {
                let handle = client
                    .run_one_off_task(cluster, task_definition_arn, command)
                    .await?;
                info!(tasks = ?handle.task_ids, "Started one-off task");
                report.invocation = Some(handle);
            }
        }

        report
            .applied
            .push((target.clone(), planned.action.to_string()));
        Ok(Step::Continue)
    }

    /// Kill every task at once; the first failure is returned after all complete
    async fn kill_concurrently(
        &self,
        plan: &ReconciliationPlan,
        task_ids: &[&str],
        report: &mut ExecutionReport,
    ) -> Result<()> {
        info!(tasks = task_ids.len(), "Stopping all tasks at once");
        let client = self.client.as_ref();
        let kills = task_ids
            .iter()
            .map(|task_id| client.kill_task_instance(&plan.cluster_name, task_id));
        let results = futures::future::join_all(kills).await;

        let mut first_error = None;
        for (task_id, result) in task_ids.iter().zip(results) {
            let action = Action::RestartTask {
                task_id: task_id.to_string(),
            };
            match result {
                Ok(()) => report
                    .applied
                    .push((ServiceTarget::Primary, action.to_string())),
                Err(e) => {
                    error!(task_id, error = %e, "Failed to stop task");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn resolve(
    revision: &RevisionSource,
    target: &ServiceTarget,
    report: &ExecutionReport,
) -> Result<String> {
    match revision {
        RevisionSource::Existing(arn) => Ok(arn.clone()),
        RevisionSource::Registered => report
            .revision_for(target)
            .map(|rev| rev.arn.clone())
            .ok_or_else(|| {
                EngineError::Infrastructure(InfrastructureError::NotFound(format!(
                    "revision registered for {}",
                    target
                )))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::AutoscalingGroupAdjustment;
    use crate::poller::PollerConfig;
    use deployfish_provider::{InMemoryProvider, Operation};
    use deployfish_types::{CapacityGroupState, ContainerDefinition, TaskDefinition};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn definition(family: &str) -> TaskDefinition {
        TaskDefinition {
            family: family.into(),
            network_mode: None,
            task_role_arn: None,
            execution_role_arn: None,
            cpu: None,
            memory: None,
            containers: vec![ContainerDefinition {
                name: "app".into(),
                image: "app:1".into(),
                cpu: None,
                memory: None,
                memory_reservation: None,
                essential: true,
                command: Vec::new(),
                ports: Vec::new(),
                environment: BTreeMap::new(),
                secrets: BTreeMap::new(),
            }],
        }
    }

    fn reconciler(provider: &Arc<InMemoryProvider>) -> Reconciler {
        Reconciler::new(
            provider.clone(),
            StabilityPoller::new(PollerConfig {
                interval: Duration::from_secs(5),
                timeout: Duration::from_secs(60),
            }),
        )
    }

    fn plan(kind: PlanKind, actions: Vec<PlannedAction>) -> ReconciliationPlan {
        ReconciliationPlan {
            cluster_name: "prod".into(),
            service_name: "web".into(),
            kind,
            actions,
        }
    }

    fn primary(action: Action) -> PlannedAction {
        PlannedAction {
            target: ServiceTarget::Primary,
            action,
        }
    }

    fn helper(action: Action) -> PlannedAction {
        PlannedAction {
            target: ServiceTarget::Helper("migrate".into()),
            action,
        }
    }

    fn create_plan() -> ReconciliationPlan {
        plan(
            PlanKind::Create,
            vec![
                primary(Action::RegisterTaskDefinition {
                    definition: definition("web"),
                }),
                helper(Action::RegisterTaskDefinition {
                    definition: definition("web-migrate"),
                }),
                primary(Action::CreateService {
                    revision: RevisionSource::Registered,
                    desired_count: 2,
                    load_balancer: None,
                }),
                helper(Action::CreateService {
                    revision: RevisionSource::Registered,
                    desired_count: 1,
                    load_balancer: None,
                }),
            ],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_wait() {
        let provider = Arc::new(InMemoryProvider::new());
        let outcome = reconciler(&provider).execute(&create_plan(), true).await.unwrap();

        let Outcome::Completed(report) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(report.applied.len(), 4);
        assert!(report.poll.unwrap().is_stable());
        let live = provider.describe_service("prod", "web").await.unwrap().unwrap();
        assert!(live.helper_tasks.contains_key("migrate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_helper_failure_is_not_fatal() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.fail_on_subject(Operation::RegisterTaskDefinition, "web-migrate", "quota");

        let outcome = reconciler(&provider).execute(&create_plan(), false).await.unwrap();
        let report = outcome.report().unwrap();
        assert!(outcome.is_success());
        assert_eq!(report.helper_failures.len(), 1);
        assert_eq!(report.helper_failures[0].helper, "migrate");
        // The helper's create was skipped, the primary's went through
        assert_eq!(report.skipped.len(), 1);
        assert!(provider.describe_service("prod", "web").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_primary_failure_short_circuits() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.fail_on(Operation::CreateService, "throttled");

        let err = reconciler(&provider)
            .execute(&create_plan(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("throttled"));

        let ops: Vec<Operation> = provider.mutating_calls().iter().map(|c| c.operation).collect();
        assert_eq!(
            ops,
            vec![
                Operation::RegisterTaskDefinition,
                Operation::RegisterTaskDefinition,
                Operation::CreateService
            ]
        );
    }

    #[tokio::test]
    async fn test_capacity_preflight_blocks_everything() {
        let provider = Arc::new(InMemoryProvider::new());
        let adjustment = AutoscalingGroupAdjustment::compute(
            &deployfish_types::CapacityGroupRef {
                name: "asg".into(),
                tasks_per_instance: 1,
            },
            &CapacityGroupState {
                name: "asg".into(),
                min_size: 1,
                max_size: 4,
                desired_capacity: 2,
            },
            5,
            false,
        );
        let plan = plan(
            PlanKind::Scale,
            vec![
                primary(Action::AdjustCapacityGroup { adjustment }),
                primary(Action::ScaleService { count: 5 }),
            ],
        );

        let err = reconciler(&provider).execute(&plan, false).await.unwrap_err();
        assert!(matches!(err, EngineError::Capacity { requested: 5, .. }));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_timeout_stops_plan() {
        let provider = Arc::new(InMemoryProvider::new());
        reconciler(&provider).execute(&create_plan(), true).await.unwrap();
        provider.set_stalled(true);
        provider.clear_calls();

        let delete = plan(
            PlanKind::Delete,
            vec![
                primary(Action::ScaleService { count: 0 }),
                primary(Action::AwaitStability {
                    condition: StabilityCondition::Drained,
                }),
                primary(Action::DeleteService),
            ],
        );
        let outcome = reconciler(&provider).execute(&delete, false).await.unwrap();
        assert!(matches!(outcome, Outcome::TimedOut(_)));
        assert!(!provider
            .calls()
            .iter()
            .any(|c| c.operation == Operation::DeleteService));
    }
}
