//! Live-state observation
//!
//! Planning is pure, so everything a plan needs to know about the provider is
//! read up front into an [`ObservedState`].

use crate::error::Result;
use deployfish_provider::InfrastructureClient;
use deployfish_types::{CapacityGroupState, LiveServiceState, ServiceSpec, TaskDefinition};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything read from the provider for one service
#[derive(Debug, Clone)]
pub struct ObservedState {
    pub service: LiveServiceState,

    /// Content of the revision the service currently runs
    pub active_definition: Option<TaskDefinition>,

    /// Content of each bound helper revision, by helper name
    pub helper_definitions: BTreeMap<String, TaskDefinition>,

    /// Only read when the service names a group and capacity handling is on
    pub capacity_group: Option<CapacityGroupState>,
}

impl ObservedState {
    pub fn exists(&self) -> bool {
        self.service.exists
    }
}

/// Describe a service, mapping "no such service" to an absent snapshot
pub async fn fetch_live_state(
    client: &dyn InfrastructureClient,
    cluster_name: &str,
    service_name: &str,
) -> Result<LiveServiceState> {
    Ok(client
        .describe_service(cluster_name, service_name)
        .await?
        .unwrap_or_else(|| LiveServiceState::absent(cluster_name, service_name)))
}

/// Read the live service, its revisions and optionally its capacity group
pub async fn observe(
    client: &dyn InfrastructureClient,
    spec: &ServiceSpec,
    include_capacity: bool,
) -> Result<ObservedState> {
    let service = fetch_live_state(client, &spec.cluster_name, &spec.service_name).await?;

    let mut active_definition = None;
    let mut helper_definitions = BTreeMap::new();
    if service.exists {
        if let Some(arn) = &service.active_task_definition_arn {
            active_definition = Some(client.describe_task_definition(arn).await?);
        }
        for (name, binding) in &service.helper_tasks {
            let definition = client
                .describe_task_definition(&binding.task_definition_arn)
                .await?;
            helper_definitions.insert(name.clone(), definition);
        }
    }

    let capacity_group = match (&spec.capacity_group, include_capacity) {
        (Some(group), true) => Some(client.describe_capacity_group(&group.name).await?),
        _ => None,
    };

    debug!(
        service = %spec.service_name,
        exists = service.exists,
        running = service.running_count,
        desired = service.desired_count_live,
        helpers = helper_definitions.len(),
        "Observed live state"
    );

    Ok(ObservedState {
        service,
        active_definition,
        helper_definitions,
        capacity_group,
    })
}
