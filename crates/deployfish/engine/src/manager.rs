//! Service Manager - high-level lifecycle operations
//!
//! The ServiceManager is the main entry point of the engine. Each operation
//! observes live state, builds a plan, and either returns it (dry run) or
//! hands it to the [`Reconciler`].

use crate::error::{EngineError, Result};
use crate::observe::{fetch_live_state, observe, ObservedState};
use crate::outcome::Outcome;
use crate::plan::{self, CapacityOptions, ReconciliationPlan};
use crate::poller::{PollerConfig, StabilityPoller};
use crate::reconciler::Reconciler;
use deployfish_provider::InfrastructureClient;
use deployfish_types::{
    parameter_prefix, CapacityGroupState, ConfigParameter, LiveServiceState, ServiceSpec,
    TaskDefinition, TaskInstance,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Options shared by every mutating operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Return the plan without issuing any mutating call
    pub dry_run: bool,
    /// Wait for the service to settle once the plan ran
    pub wait: bool,
    /// Overrides the poller's timeout
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            wait: true,
            timeout: None,
        }
    }
}

/// Options for `create`
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub run: RunOptions,
    pub capacity: CapacityOptions,
    /// Write the service's config parameters before creating it
    pub update_configs: bool,
}

/// Options for `scale`
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleOptions {
    pub run: RunOptions,
    pub capacity: CapacityOptions,
}

/// Read-only report of a service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub live: LiveServiceState,
    pub active_definition: Option<TaskDefinition>,
    pub helper_definitions: BTreeMap<String, TaskDefinition>,
    pub tasks: Vec<TaskInstance>,
    pub capacity_group: Option<CapacityGroupState>,
}

impl ServiceInfo {
    /// Image tag of the active revision's first container
    pub fn version(&self) -> Option<&str> {
        self.active_definition.as_ref().and_then(TaskDefinition::version)
    }
}

/// Entry point for service lifecycle operations
pub struct ServiceManager {
    client: Arc<dyn InfrastructureClient>,
    poller: PollerConfig,
}

impl ServiceManager {
    pub fn new(client: Arc<dyn InfrastructureClient>, poller: PollerConfig) -> Self {
        Self { client, poller }
    }

    pub fn client(&self) -> &Arc<dyn InfrastructureClient> {
        &self.client
    }

    fn reconciler(&self, timeout: Option<Duration>) -> Reconciler {
        let config = match timeout {
            Some(timeout) => self.poller.with_timeout(timeout),
            None => self.poller,
        };
        Reconciler::new(self.client.clone(), StabilityPoller::new(config))
    }

    async fn run(&self, plan: ReconciliationPlan, options: RunOptions, wait: bool) -> Result<Outcome> {
        if options.dry_run {
            info!(
                actions = plan.actions.len(),
                mutating = plan.mutating_actions().count(),
                "Dry run, not executing plan"
            );
            return Ok(Outcome::DryRun(plan));
        }
        self.reconciler(options.timeout).execute(&plan, wait).await
    }

    /// Create a service that does not exist yet
    #[instrument(skip(self, spec, options), fields(service = %spec.service_name, cluster = %spec.cluster_name))]
    pub async fn create(&self, spec: &ServiceSpec, options: CreateOptions) -> Result<Outcome> {
        // Existence is checked before anything else is read
        let live = fetch_live_state(self.client.as_ref(), &spec.cluster_name, &spec.service_name)
            .await?;
        if live.exists {
            return Err(EngineError::AlreadyExists {
                cluster: spec.cluster_name.clone(),
                service: spec.service_name.clone(),
            });
        }

        let include_capacity = options.capacity.asg && spec.capacity_group.is_some();
        let capacity_group = match (&spec.capacity_group, include_capacity) {
            (Some(group), true) => Some(self.client.describe_capacity_group(&group.name).await?),
            _ => None,
        };
        let observed = ObservedState {
            service: live,
            active_definition: None,
            helper_definitions: BTreeMap::new(),
            capacity_group,
        };

        if !options.update_configs && !spec.config.is_empty() {
            warn!(
                parameters = spec.config.len(),
                "Config parameters defined but not written; pass --update-configs to write them"
            );
        }

        let plan = plan::plan_create(spec, &observed, options.capacity, options.update_configs)?;
        self.run(plan, options.run, options.run.wait).await
    }

    /// Point an existing service and its helpers at the desired revisions
    #[instrument(skip(self, spec, options), fields(service = %spec.service_name, cluster = %spec.cluster_name))]
    pub async fn update(&self, spec: &ServiceSpec, options: RunOptions) -> Result<Outcome> {
        let observed = observe(self.client.as_ref(), spec, false).await?;
        let plan = plan::plan_update(spec, &observed)?;
        self.run(plan, options, options.wait).await
    }

    /// Change the number of running tasks
    #[instrument(skip(self, spec, options), fields(service = %spec.service_name, cluster = %spec.cluster_name))]
    pub async fn scale(&self, spec: &ServiceSpec, count: i64, options: ScaleOptions) -> Result<Outcome> {
        plan::validate_count(count)?;

        let include_capacity = options.capacity.asg && spec.capacity_group.is_some();
        let observed = observe(self.client.as_ref(), spec, include_capacity).await?;
        let plan = plan::plan_scale(spec, &observed, count, options.capacity)?;
        self.run(plan, options.run, options.run.wait).await
    }

    /// Replace every running task
    #[instrument(skip(self, spec, options), fields(service = %spec.service_name, cluster = %spec.cluster_name))]
    pub async fn restart(&self, spec: &ServiceSpec, hard: bool, options: RunOptions) -> Result<Outcome> {
        let observed = observe(self.client.as_ref(), spec, false).await?;
        if !observed.exists() {
            return Err(EngineError::ServiceNotFound {
                cluster: spec.cluster_name.clone(),
                service: spec.service_name.clone(),
            });
        }
        let running = self
            .client
            .list_running_task_instances(&spec.cluster_name, &spec.service_name)
            .await?;
        let plan = plan::plan_restart(spec, &observed, &running, hard)?;
        self.run(plan, options, false).await
    }

    /// Drain and delete a service
    ///
    /// `confirm` is asked before anything is read; a `false` answer ends the
    /// operation with [`Outcome::Declined`]. Dry runs are not confirmed.
    #[instrument(skip(self, spec, options, confirm), fields(service = %spec.service_name, cluster = %spec.cluster_name))]
    pub async fn delete<F>(&self, spec: &ServiceSpec, options: RunOptions, confirm: F) -> Result<Outcome>
    where
        F: FnOnce(&ServiceSpec) -> bool,
    {
        if !options.dry_run && !confirm(spec) {
            info!("Delete not confirmed");
            return Ok(Outcome::Declined);
        }
        let observed = observe(self.client.as_ref(), spec, false).await?;
        let plan = plan::plan_delete(spec, &observed)?;
        self.run(plan, options, false).await
    }

    /// Run a one-off command on the service's active revision
    #[instrument(skip(self, spec, command, options), fields(service = %spec.service_name, cluster = %spec.cluster_name))]
    pub async fn run_task(
        &self,
        spec: &ServiceSpec,
        command: &[String],
        options: RunOptions,
    ) -> Result<Outcome> {
        let observed = observe(self.client.as_ref(), spec, false).await?;
        let plan = plan::plan_run_task(spec, &observed, command)?;
        self.run(plan, options, false).await
    }

    /// Read-only report of the service, its helpers and its tasks
    ///
    /// A service the provider does not have yet is reported with
    /// `live.exists == false` and nothing else filled in.
    #[instrument(skip(self, spec), fields(service = %spec.service_name, cluster = %spec.cluster_name))]
    pub async fn info(&self, spec: &ServiceSpec) -> Result<ServiceInfo> {
        let observed = observe(self.client.as_ref(), spec, false).await?;
        if !observed.exists() {
            return Ok(ServiceInfo {
                live: observed.service,
                active_definition: None,
                helper_definitions: BTreeMap::new(),
                tasks: Vec::new(),
                capacity_group: None,
            });
        }

        let tasks = self
            .client
            .list_running_task_instances(&spec.cluster_name, &spec.service_name)
            .await?;

        let capacity_group = match &spec.capacity_group {
            Some(group) => match self.client.describe_capacity_group(&group.name).await {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(group = %group.name, error = %e, "Capacity group unavailable");
                    None
                }
            },
            None => None,
        };

        Ok(ServiceInfo {
            live: observed.service,
            active_definition: observed.active_definition,
            helper_definitions: observed.helper_definitions,
            tasks,
            capacity_group,
        })
    }

    /// Image tag of the first container of the active revision
    #[instrument(skip(self, spec), fields(service = %spec.service_name, cluster = %spec.cluster_name))]
    pub async fn version(&self, spec: &ServiceSpec) -> Result<String> {
        let observed = observe(self.client.as_ref(), spec, false).await?;
        observed
            .active_definition
            .as_ref()
            .and_then(TaskDefinition::version)
            .map(str::to_string)
            .ok_or_else(|| EngineError::ServiceNotFound {
                cluster: spec.cluster_name.clone(),
                service: spec.service_name.clone(),
            })
    }

    /// Parameters stored for a service, with the service prefix stripped
    #[instrument(skip(self))]
    pub async fn service_parameters(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> Result<Vec<ConfigParameter>> {
        let prefix = parameter_prefix(cluster_name, service_name);
        let parameters = self.client.get_parameters(&prefix).await?;
        Ok(parameters
            .into_iter()
            .filter_map(|p| {
                p.name
                    .strip_prefix(&prefix)
                    .filter(|name| !name.is_empty())
                    .map(|name| ConfigParameter::new(name, p.value.clone()))
            })
            .collect())
    }
}
