//! `deployfish.yml` loading
//!
//! The file is parsed into loosely-typed sections first, `${env.NAME}`
//! references in string values are interpolated, and then each service is
//! validated into a [`ServiceSpec`] on request. Services are discriminated
//! into a [`ServiceKind`] here, once, so nothing downstream has to check for
//! optional attributes.

use crate::error::{ConfigError, Result};
use crate::spec::{
    CapacityGroupRef, ConfigParameter, HelperTaskSpec, LoadBalancerAttachment, ScalingPolicy,
    ServiceKind, ServiceSpec, StandaloneTaskSpec,
};
use crate::task_definition::{ContainerDefinition, TaskDefinition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::sync::OnceLock;

/// Options controlling how the config file is read
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Replace unset `${env.NAME}` references with an empty string
    pub ignore_missing_environment: bool,
}

/// Parsed `deployfish.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployfishConfig {
    #[serde(default)]
    pub services: Vec<RawService>,

    #[serde(default)]
    pub tasks: Vec<RawStandaloneTask>,
}

/// A service entry as written in the file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawService {
    pub name: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub task_role_arn: Option<String>,
    #[serde(default)]
    pub execution_role: Option<String>,
    #[serde(default)]
    pub cpu: Option<u32>,
    #[serde(default)]
    pub memory: Option<u32>,
    #[serde(default)]
    pub load_balancer: Option<RawLoadBalancer>,
    #[serde(default)]
    pub application_scaling: Option<ScalingPolicy>,
    #[serde(default)]
    pub autoscalinggroup_name: Option<String>,
    #[serde(default)]
    pub tasks_per_instance: Option<u32>,
    #[serde(default)]
    pub containers: Vec<ContainerDefinition>,
    #[serde(default)]
    pub tasks: Vec<RawHelperTask>,
    /// `KEY=value` entries
    #[serde(default)]
    pub config: Vec<String>,
}

/// Load balancer section; every field is checked at load time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLoadBalancer {
    #[serde(default)]
    pub target_group_arn: Option<String>,
    #[serde(default)]
    pub listener_rule_arn: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub container_port: Option<u16>,
}

/// Helper task nested under a service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHelperTask {
    pub name: String,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub family: Option<String>,
    /// Overrides the command of the first inherited container
    #[serde(default)]
    pub command: Vec<String>,
    /// When empty, the service's containers are reused
    #[serde(default)]
    pub containers: Vec<ContainerDefinition>,
}

/// Entry in the top-level `tasks:` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStandaloneTask {
    pub name: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerDefinition>,
}

impl DeployfishConfig {
    /// Load and interpolate a config file
    pub fn from_path(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents, options)
    }

    /// Parse config text, resolving `${env.NAME}` from the process environment
    pub fn from_yaml_str(contents: &str, options: &LoadOptions) -> Result<Self> {
        Self::from_yaml_str_with_env(contents, options, |name| std::env::var(name).ok())
    }

    /// Parse config text with a caller-supplied environment lookup
    pub fn from_yaml_str_with_env<F>(contents: &str, options: &LoadOptions, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut value: Value = serde_yaml::from_str(contents)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        interpolate(&mut value, options, &lookup)?;
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    /// Validate and return the desired state of a named service
    pub fn load_spec(&self, service_name: &str) -> Result<ServiceSpec> {
        let raw = self
            .services
            .iter()
            .find(|s| s.name == service_name)
            .ok_or_else(|| ConfigError::ServiceNotDefined(service_name.to_string()))?;
        build_service(raw)
    }

    /// Standalone tasks that name `service_name` as their service
    pub fn related_tasks(&self, service_name: &str) -> Result<Vec<StandaloneTaskSpec>> {
        self.tasks
            .iter()
            .filter(|t| t.service.as_deref() == Some(service_name))
            .map(|t| self.build_standalone(t))
            .collect()
    }

    fn build_standalone(&self, raw: &RawStandaloneTask) -> Result<StandaloneTaskSpec> {
        // Tasks bound to a service default to the service's cluster
        let inherited_cluster = raw.service.as_deref().and_then(|name| {
            self.services
                .iter()
                .find(|s| s.name == name)
                .and_then(|s| s.cluster.clone())
        });
        let cluster_name = raw
            .cluster
            .clone()
            .or(inherited_cluster)
            .ok_or_else(|| ConfigError::invalid(&raw.name, "task has no cluster"))?;

        let task_definition = TaskDefinition {
            family: raw.family.clone().unwrap_or_else(|| raw.name.clone()),
            network_mode: None,
            task_role_arn: None,
            execution_role_arn: None,
            cpu: None,
            memory: None,
            containers: raw.containers.clone(),
        };
        task_definition
            .validate()
            .map_err(|reason| ConfigError::invalid(&raw.name, reason))?;

        Ok(StandaloneTaskSpec {
            name: raw.name.clone(),
            service: raw.service.clone(),
            cluster_name,
            task_definition,
        })
    }
}

fn build_service(raw: &RawService) -> Result<ServiceSpec> {
    let name = raw.name.as_str();
    let invalid = |reason: String| ConfigError::invalid(name, reason);

    let cluster_name = raw
        .cluster
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| invalid("missing required field \"cluster\"".into()))?;

    let task_definition = TaskDefinition {
        family: raw.family.clone().unwrap_or_else(|| raw.name.clone()),
        network_mode: raw.network_mode.clone(),
        task_role_arn: raw.task_role_arn.clone(),
        execution_role_arn: raw.execution_role.clone(),
        cpu: raw.cpu,
        memory: raw.memory,
        containers: raw.containers.clone(),
    };
    task_definition.validate().map_err(invalid)?;

    let kind = match &raw.load_balancer {
        Some(lb) => ServiceKind::LoadBalanced {
            load_balancer: build_load_balancer(lb, &task_definition).map_err(invalid)?,
        },
        None => ServiceKind::Worker,
    };

    if let Some(policy) = &raw.application_scaling {
        policy.validate().map_err(invalid)?;
    }

    let capacity_group = match &raw.autoscalinggroup_name {
        Some(group) => {
            let tasks_per_instance = raw.tasks_per_instance.unwrap_or(1);
            if tasks_per_instance == 0 {
                return Err(invalid("tasks_per_instance must be at least 1".into()));
            }
            Some(CapacityGroupRef {
                name: group.clone(),
                tasks_per_instance,
            })
        }
        None => None,
    };

    let mut helper_tasks: Vec<HelperTaskSpec> = Vec::with_capacity(raw.tasks.len());
    for helper in &raw.tasks {
        if helper_tasks.iter().any(|h| h.name == helper.name) {
            return Err(invalid(format!("duplicate helper task \"{}\"", helper.name)));
        }
        helper_tasks.push(build_helper(raw, helper, &task_definition).map_err(invalid)?);
    }

    let config = raw
        .config
        .iter()
        .map(|entry| parse_parameter(entry).map_err(invalid))
        .collect::<Result<Vec<_>>>()?;

    Ok(ServiceSpec {
        service_name: raw.name.clone(),
        cluster_name,
        kind,
        task_definition,
        desired_count: raw.count.unwrap_or(1),
        scaling_policy: raw.application_scaling.clone(),
        helper_tasks,
        capacity_group,
        config,
    })
}

fn build_load_balancer(
    raw: &RawLoadBalancer,
    task_definition: &TaskDefinition,
) -> std::result::Result<LoadBalancerAttachment, String> {
    let missing = |field: &str| format!("load_balancer is missing required field \"{}\"", field);

    let target_group_arn = raw
        .target_group_arn
        .clone()
        .ok_or_else(|| missing("target_group_arn"))?;
    let container_name = raw
        .container_name
        .clone()
        .ok_or_else(|| missing("container_name"))?;
    let container_port = raw.container_port.ok_or_else(|| missing("container_port"))?;

    if task_definition.container(&container_name).is_none() {
        return Err(format!(
            "load_balancer container \"{}\" is not one of the service's containers",
            container_name
        ));
    }

    Ok(LoadBalancerAttachment {
        target_group_arn,
        listener_rule_arn: raw.listener_rule_arn.clone(),
        container_name,
        container_port,
    })
}

fn build_helper(
    service: &RawService,
    raw: &RawHelperTask,
    service_definition: &TaskDefinition,
) -> std::result::Result<HelperTaskSpec, String> {
    let mut containers = if raw.containers.is_empty() {
        service_definition.containers.clone()
    } else {
        raw.containers.clone()
    };
    if !raw.command.is_empty() {
        if let Some(first) = containers.first_mut() {
            first.command = raw.command.clone();
        }
    }

    let task_definition = TaskDefinition {
        family: raw
            .family
            .clone()
            .unwrap_or_else(|| format!("{}-{}", service.name, raw.name)),
        containers,
        ..service_definition.clone()
    };
    task_definition.validate()?;

    Ok(HelperTaskSpec {
        name: raw.name.clone(),
        task_definition,
        desired_count: raw.count.unwrap_or(1),
    })
}

fn parse_parameter(entry: &str) -> std::result::Result<ConfigParameter, String> {
    match entry.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok(ConfigParameter::new(name.trim(), value))
        }
        _ => Err(format!("config entry \"{}\" is not of the form KEY=value", entry)),
    }
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{env\.([A-Za-z_][A-Za-z0-9_]*)\}").unwrap_or_else(|_| unreachable!())
    })
}

fn interpolate<F>(value: &mut Value, options: &LoadOptions, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            if env_reference().is_match(s) {
                *s = interpolate_str(s, options, lookup)?;
            }
        }
        Value::Sequence(items) => {
            for item in items {
                interpolate(item, options, lookup)?;
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate(item, options, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn interpolate_str<F>(input: &str, options: &LoadOptions, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for captures in env_reference().captures_iter(input) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        out.push_str(&input[last..whole.start()]);
        match lookup(name.as_str()) {
            Some(v) => out.push_str(&v),
            None if options.ignore_missing_environment => {}
            None => return Err(ConfigError::MissingEnvironment(name.as_str().to_string())),
        }
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}
