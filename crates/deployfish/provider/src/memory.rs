//! In-memory provider
//!
//! A small scheduler simulation suitable for development and testing. State
//! lives in dashmaps; every describe advances a service by one step (start,
//! stop, or replace one task), so a freshly created or updated service only
//! becomes stable after a few reads. The whole state can be saved to and
//! loaded from a JSON file, which lets consecutive CLI invocations observe
//! each other.

use crate::client::{InfrastructureClient, Operation, ServiceRequest};
use crate::error::{InfrastructureError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use deployfish_types::{
    CapacityGroupState, ConfigParameter, DeploymentSummary, HelperTaskBinding, InvocationHandle,
    LiveServiceState, LoadBalancerAttachment, RolloutState, ScalingPolicy, ServiceTarget,
    TaskDefinition, TaskDefinitionRevision, TaskInstance,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub sequence: u64,
    pub operation: Operation,
    /// Service, family, group, task id or prefix the call addressed
    pub subject: String,
    pub detail: Option<String>,
}

/// Injected failure key; a `None` subject matches every call of the operation
type FailureKey = (Operation, Option<String>);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimService {
    cluster_name: String,
    service_name: String,
    task_definition_arn: String,
    desired_count: u32,
    tasks: Vec<TaskInstance>,
    #[serde(default)]
    scaling_policy: Option<ScalingPolicy>,
    #[serde(default)]
    load_balancer: Option<LoadBalancerAttachment>,
    #[serde(default)]
    helper_tasks: BTreeMap<String, HelperTaskBinding>,
    created_at: DateTime<Utc>,
    rollout_id: String,
    rollout_started_at: DateTime<Utc>,
}

impl SimService {
    /// Move one step toward `desired_count` tasks on the current revision
    fn advance(&mut self, next_task_id: impl FnOnce() -> String) {
        let stale = self
            .tasks
            .iter()
            .position(|t| t.task_definition_arn != self.task_definition_arn);

        if self.tasks.len() > self.desired_count as usize {
            self.tasks.remove(stale.unwrap_or(0));
        } else if let Some(index) = stale {
            self.tasks.remove(index);
            let task = self.new_task(next_task_id());
            self.tasks.push(task);
        } else if self.tasks.len() < self.desired_count as usize {
            let task = self.new_task(next_task_id());
            self.tasks.push(task);
        }
    }

    fn new_task(&self, task_id: String) -> TaskInstance {
        TaskInstance {
            task_id,
            task_definition_arn: self.task_definition_arn.clone(),
            started_at: Utc::now(),
            last_status: "RUNNING".to_string(),
        }
    }

    fn snapshot(&self) -> LiveServiceState {
        let current = self
            .tasks
            .iter()
            .filter(|t| t.task_definition_arn == self.task_definition_arn)
            .count() as u32;
        let settled = current == self.desired_count && self.tasks.len() as u32 == current;

        let mut deployments = vec![DeploymentSummary {
            id: self.rollout_id.clone(),
            task_definition_arn: self.task_definition_arn.clone(),
            desired_count: self.desired_count,
            running_count: current,
            rollout_state: if settled {
                RolloutState::Completed
            } else {
                RolloutState::InProgress
            },
            created_at: self.rollout_started_at,
        }];

        // Older revisions still running show up as their own deployments
        let mut previous: BTreeMap<&str, u32> = BTreeMap::new();
        for task in self
            .tasks
            .iter()
            .filter(|t| t.task_definition_arn != self.task_definition_arn)
        {
            *previous.entry(task.task_definition_arn.as_str()).or_default() += 1;
        }
        for (arn, running) in previous {
            deployments.push(DeploymentSummary {
                id: format!("{}-previous", arn),
                task_definition_arn: arn.to_string(),
                desired_count: 0,
                running_count: running,
                rollout_state: RolloutState::Completed,
                created_at: self.created_at,
            });
        }

        LiveServiceState {
            exists: true,
            cluster_name: self.cluster_name.clone(),
            service_name: self.service_name.clone(),
            active_task_definition_arn: Some(self.task_definition_arn.clone()),
            running_count: self.tasks.len() as u32,
            pending_count: 0,
            desired_count_live: self.desired_count,
            deployments,
            scaling_policy: self.scaling_policy.clone(),
            load_balancer: self.load_balancer.clone(),
            helper_tasks: self.helper_tasks.clone(),
            created_at: Some(self.created_at),
        }
    }
}

/// On-disk form of the simulator state
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    services: Vec<SimService>,
    #[serde(default)]
    task_definitions: BTreeMap<String, TaskDefinition>,
    #[serde(default)]
    revisions: BTreeMap<String, u32>,
    #[serde(default)]
    capacity_groups: Vec<CapacityGroupState>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
    #[serde(default)]
    next_task: u64,
}

/// In-memory orchestration provider
pub struct InMemoryProvider {
    services: DashMap<String, SimService>,
    task_definitions: DashMap<String, TaskDefinition>,
    revisions: DashMap<String, u32>,
    capacity_groups: DashMap<String, CapacityGroupState>,
    parameters: DashMap<String, String>,
    calls: DashMap<u64, ProviderCall>,
    call_sequence: AtomicU64,
    task_sequence: AtomicU64,
    failures: DashMap<FailureKey, String>,
    stalled: AtomicBool,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            task_definitions: DashMap::new(),
            revisions: DashMap::new(),
            capacity_groups: DashMap::new(),
            parameters: DashMap::new(),
            calls: DashMap::new(),
            call_sequence: AtomicU64::new(0),
            task_sequence: AtomicU64::new(0),
            failures: DashMap::new(),
            stalled: AtomicBool::new(false),
        }
    }

    /// Load simulator state; a missing file yields an empty provider
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let provider = Self::new();
        if !path.exists() {
            return Ok(provider);
        }

        let contents = std::fs::read_to_string(path).map_err(|source| {
            InfrastructureError::StateFile {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let state: StateFile = serde_json::from_str(&contents)?;

        for service in state.services {
            provider
                .services
                .insert(service_key(&service.cluster_name, &service.service_name), service);
        }
        for (arn, definition) in state.task_definitions {
            provider.task_definitions.insert(arn, definition);
        }
        for (family, revision) in state.revisions {
            provider.revisions.insert(family, revision);
        }
        for group in state.capacity_groups {
            provider.capacity_groups.insert(group.name.clone(), group);
        }
        for (name, value) in state.parameters {
            provider.parameters.insert(name, value);
        }
        provider.task_sequence.store(state.next_task, Ordering::SeqCst);

        debug!(path = %path.display(), services = provider.services.len(), "Loaded provider state");
        Ok(provider)
    }

    /// Persist simulator state as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let state = StateFile {
            services: self.services.iter().map(|s| s.value().clone()).collect(),
            task_definitions: self
                .task_definitions
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            revisions: self
                .revisions
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            capacity_groups: self
                .capacity_groups
                .iter()
                .map(|g| g.value().clone())
                .collect(),
            parameters: self
                .parameters
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            next_task: self.task_sequence.load(Ordering::SeqCst),
        };

        let io_error = |source| InfrastructureError::StateFile {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&state)?).map_err(io_error)?;
        Ok(())
    }

    /// Seed a capacity group
    pub fn register_capacity_group(&self, group: CapacityGroupState) {
        self.capacity_groups.insert(group.name.clone(), group);
    }

    pub fn capacity_group(&self, name: &str) -> Option<CapacityGroupState> {
        self.capacity_groups.get(name).map(|g| g.clone())
    }

    /// Stop (or resume) task convergence on describe
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make every call of `operation` fail
    pub fn fail_on(&self, operation: Operation, detail: impl Into<String>) {
        self.failures.insert((operation, None), detail.into());
    }

    /// Make calls of `operation` addressing `subject` fail
    ///
    /// Rules for different subjects of the same operation accumulate.
    pub fn fail_on_subject(
        &self,
        operation: Operation,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.failures
            .insert((operation, Some(subject.into())), detail.into());
    }

    /// Drop every injected failure
    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Recorded calls in issue order
    pub fn calls(&self) -> Vec<ProviderCall> {
        let mut calls: Vec<ProviderCall> = self.calls.iter().map(|c| c.value().clone()).collect();
        calls.sort_by_key(|c| c.sequence);
        calls
    }

    /// Recorded calls that change provider state
    pub fn mutating_calls(&self) -> Vec<ProviderCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation.is_mutating())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.clear();
    }

    /// Advance a service until it is stable, without recording calls
    pub fn settle(&self, cluster_name: &str, service_name: &str) {
        let key = service_key(cluster_name, service_name);
        for _ in 0..1024 {
            let Some(mut service) = self.services.get_mut(&key) else {
                return;
            };
            if service.snapshot().is_stable() {
                return;
            }
            service.advance(|| self.next_task_id());
        }
    }

    fn next_task_id(&self) -> String {
        let n = self.task_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("task-{:06}", n)
    }

    /// Record a call and apply any injected failure
    fn record(&self, operation: Operation, subject: &str, detail: Option<String>) -> Result<()> {
        let sequence = self.call_sequence.fetch_add(1, Ordering::SeqCst);
        if operation.is_mutating() {
            debug!(%operation, subject, detail = detail.as_deref().unwrap_or(""), "Provider call");
        }
        self.calls.insert(
            sequence,
            ProviderCall {
                sequence,
                operation,
                subject: subject.to_string(),
                detail,
            },
        );

        let rule = self
            .failures
            .get(&(operation, Some(subject.to_string())))
            .or_else(|| self.failures.get(&(operation, None)));
        match rule {
            Some(detail) => Err(InfrastructureError::rejected(
                operation.to_string(),
                detail.value().clone(),
            )),
            None => Ok(()),
        }
    }

    fn require_task_definition(&self, arn: &str) -> Result<()> {
        if self.task_definitions.contains_key(arn) {
            Ok(())
        } else {
            Err(InfrastructureError::NotFound(format!(
                "task definition {}",
                arn
            )))
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn service_key(cluster_name: &str, service_name: &str) -> String {
    format!("{}/{}", cluster_name, service_name)
}

fn request_subject(request: &ServiceRequest) -> String {
    match &request.target {
        ServiceTarget::Primary => request.service_name.clone(),
        ServiceTarget::Helper(name) => format!("{}/{}", request.service_name, name),
    }
}

fn service_not_found(cluster_name: &str, service_name: &str) -> InfrastructureError {
    InfrastructureError::NotFound(format!(
        "service {} in cluster {}",
        service_name, cluster_name
    ))
}

#[async_trait]
impl InfrastructureClient for InMemoryProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn describe_service(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> Result<Option<LiveServiceState>> {
        self.record(Operation::DescribeService, service_name, None)?;

        let key = service_key(cluster_name, service_name);
        let Some(mut service) = self.services.get_mut(&key) else {
            return Ok(None);
        };
        if !self.stalled.load(Ordering::SeqCst) {
            service.advance(|| self.next_task_id());
        }
        Ok(Some(service.snapshot()))
    }

    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinition> {
        self.record(Operation::DescribeTaskDefinition, arn, None)?;
        self.task_definitions
            .get(arn)
            .map(|d| d.clone())
            .ok_or_else(|| InfrastructureError::NotFound(format!("task definition {}", arn)))
    }

    async fn register_task_definition(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRevision> {
        self.record(Operation::RegisterTaskDefinition, &definition.family, None)?;

        let revision = {
            let mut latest = self.revisions.entry(definition.family.clone()).or_insert(0);
            *latest += 1;
            *latest
        };
        let arn = format!(
            "arn:deployfish:local:task-definition/{}:{}",
            definition.family, revision
        );
        self.task_definitions.insert(arn.clone(), definition.clone());

        Ok(TaskDefinitionRevision {
            family: definition.family.clone(),
            revision,
            arn,
        })
    }

    async fn create_service(&self, request: &ServiceRequest) -> Result<()> {
        self.record(
            Operation::CreateService,
            &request_subject(request),
            Some(request.task_definition_arn.clone()),
        )?;
        self.require_task_definition(&request.task_definition_arn)?;

        let key = service_key(&request.cluster_name, &request.service_name);
        match &request.target {
            ServiceTarget::Primary => {
                if self.services.contains_key(&key) {
                    return Err(InfrastructureError::rejected(
                        Operation::CreateService.to_string(),
                        format!("service {} already exists", request.service_name),
                    ));
                }
                let now = Utc::now();
                self.services.insert(
                    key,
                    SimService {
                        cluster_name: request.cluster_name.clone(),
                        service_name: request.service_name.clone(),
                        task_definition_arn: request.task_definition_arn.clone(),
                        desired_count: request.desired_count.unwrap_or(0),
                        tasks: Vec::new(),
                        scaling_policy: None,
                        load_balancer: request.load_balancer.clone(),
                        helper_tasks: BTreeMap::new(),
                        created_at: now,
                        rollout_id: uuid::Uuid::new_v4().to_string(),
                        rollout_started_at: now,
                    },
                );
            }
            ServiceTarget::Helper(name) => {
                let mut service = self
                    .services
                    .get_mut(&key)
                    .ok_or_else(|| service_not_found(&request.cluster_name, &request.service_name))?;
                service.helper_tasks.insert(
                    name.clone(),
                    HelperTaskBinding {
                        task_definition_arn: request.task_definition_arn.clone(),
                        desired_count: request.desired_count.unwrap_or(0),
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_service(&self, request: &ServiceRequest) -> Result<()> {
        self.record(
            Operation::UpdateService,
            &request_subject(request),
            Some(request.task_definition_arn.clone()),
        )?;
        self.require_task_definition(&request.task_definition_arn)?;

        let key = service_key(&request.cluster_name, &request.service_name);
        let mut service = self
            .services
            .get_mut(&key)
            .ok_or_else(|| service_not_found(&request.cluster_name, &request.service_name))?;

        match &request.target {
            ServiceTarget::Primary => {
                if service.task_definition_arn != request.task_definition_arn {
                    service.task_definition_arn = request.task_definition_arn.clone();
                    service.rollout_id = uuid::Uuid::new_v4().to_string();
                    service.rollout_started_at = Utc::now();
                }
                if let Some(count) = request.desired_count {
                    service.desired_count = count;
                }
            }
            ServiceTarget::Helper(name) => {
                let desired_count = request
                    .desired_count
                    .or_else(|| service.helper_tasks.get(name).map(|b| b.desired_count))
                    .unwrap_or(0);
                service.helper_tasks.insert(
                    name.clone(),
                    HelperTaskBinding {
                        task_definition_arn: request.task_definition_arn.clone(),
                        desired_count,
                    },
                );
            }
        }
        Ok(())
    }

    async fn delete_service(&self, cluster_name: &str, service_name: &str) -> Result<()> {
        self.record(Operation::DeleteService, service_name, None)?;

        let key = service_key(cluster_name, service_name);
        let running = self
            .services
            .get(&key)
            .map(|s| s.tasks.len())
            .ok_or_else(|| service_not_found(cluster_name, service_name))?;
        if running > 0 {
            return Err(InfrastructureError::rejected(
                Operation::DeleteService.to_string(),
                format!("service {} still has {} running tasks", service_name, running),
            ));
        }
        self.services.remove(&key);
        Ok(())
    }

    async fn scale_service(
        &self,
        cluster_name: &str,
        service_name: &str,
        count: u32,
    ) -> Result<()> {
        self.record(
            Operation::ScaleService,
            service_name,
            Some(format!("count={}", count)),
        )?;
        let mut service = self
            .services
            .get_mut(&service_key(cluster_name, service_name))
            .ok_or_else(|| service_not_found(cluster_name, service_name))?;
        service.desired_count = count;
        Ok(())
    }

    async fn attach_scaling_policy(
        &self,
        cluster_name: &str,
        service_name: &str,
        policy: &ScalingPolicy,
    ) -> Result<()> {
        self.record(
            Operation::AttachScalingPolicy,
            service_name,
            Some(format!("{}..{}", policy.min_capacity, policy.max_capacity)),
        )?;
        let mut service = self
            .services
            .get_mut(&service_key(cluster_name, service_name))
            .ok_or_else(|| service_not_found(cluster_name, service_name))?;
        service.scaling_policy = Some(policy.clone());
        Ok(())
    }

    async fn detach_scaling_policy(&self, cluster_name: &str, service_name: &str) -> Result<()> {
        self.record(Operation::DetachScalingPolicy, service_name, None)?;
        let mut service = self
            .services
            .get_mut(&service_key(cluster_name, service_name))
            .ok_or_else(|| service_not_found(cluster_name, service_name))?;
        service.scaling_policy = None;
        Ok(())
    }

    async fn describe_capacity_group(&self, name: &str) -> Result<CapacityGroupState> {
        self.record(Operation::DescribeCapacityGroup, name, None)?;
        self.capacity_groups
            .get(name)
            .map(|g| g.clone())
            .ok_or_else(|| InfrastructureError::NotFound(format!("capacity group {}", name)))
    }

    async fn adjust_capacity_group(&self, name: &str, desired: u32, force: bool) -> Result<()> {
        self.record(
            Operation::AdjustCapacityGroup,
            name,
            Some(format!("desired={} force={}", desired, force)),
        )?;
        let mut group = self
            .capacity_groups
            .get_mut(name)
            .ok_or_else(|| InfrastructureError::NotFound(format!("capacity group {}", name)))?;

        if !force && !group.allows(desired) {
            return Err(InfrastructureError::rejected(
                Operation::AdjustCapacityGroup.to_string(),
                format!(
                    "desired capacity {} outside [{}, {}]",
                    desired, group.min_size, group.max_size
                ),
            ));
        }
        group.min_size = group.min_size.min(desired);
        group.max_size = group.max_size.max(desired);
        group.desired_capacity = desired;
        Ok(())
    }

    async fn run_one_off_task(
        &self,
        cluster_name: &str,
        task_definition_arn: &str,
        command: &[String],
    ) -> Result<InvocationHandle> {
        self.record(
            Operation::RunOneOffTask,
            task_definition_arn,
            Some(command.join(" ")),
        )?;
        self.require_task_definition(task_definition_arn)?;

        Ok(InvocationHandle {
            cluster_name: cluster_name.to_string(),
            task_ids: vec![uuid::Uuid::new_v4().to_string()],
        })
    }

    async fn list_running_task_instances(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> Result<Vec<TaskInstance>> {
        self.record(Operation::ListRunningTasks, service_name, None)?;
        let service = self
            .services
            .get(&service_key(cluster_name, service_name))
            .ok_or_else(|| service_not_found(cluster_name, service_name))?;

        let mut tasks = service.tasks.clone();
        tasks.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(tasks)
    }

    async fn kill_task_instance(&self, cluster_name: &str, task_id: &str) -> Result<()> {
        self.record(Operation::KillTask, task_id, None)?;
        for mut service in self.services.iter_mut() {
            if service.cluster_name != cluster_name {
                continue;
            }
            if let Some(index) = service.tasks.iter().position(|t| t.task_id == task_id) {
                service.tasks.remove(index);
                return Ok(());
            }
        }
        Err(InfrastructureError::NotFound(format!("task {}", task_id)))
    }

    async fn put_parameters(&self, prefix: &str, parameters: &[ConfigParameter]) -> Result<()> {
        self.record(
            Operation::PutParameters,
            prefix,
            Some(format!("{} parameters", parameters.len())),
        )?;
        for parameter in parameters {
            self.parameters
                .insert(format!("{}{}", prefix, parameter.name), parameter.value.clone());
        }
        Ok(())
    }

    async fn get_parameters(&self, prefix: &str) -> Result<Vec<ConfigParameter>> {
        self.record(Operation::GetParameters, prefix, None)?;
        let mut parameters: Vec<ConfigParameter> = self
            .parameters
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| ConfigParameter::new(e.key().clone(), e.value().clone()))
            .collect();
        parameters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(parameters)
    }
}
