//! Task definitions and their registered revisions
//!
//! A TaskDefinition describes the containers and resources of a task. Once
//! registered with the provider it becomes an immutable, numbered revision;
//! changing anything means registering a new revision.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Container and resource template for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Family name; revisions are numbered within a family
    pub family: String,

    /// Network mode (bridge, host, awsvpc, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    /// Role assumed by the task's containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,

    /// Role used by the agent to pull images and fetch secrets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,

    /// Task-level CPU units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,

    /// Task-level memory (MiB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,

    /// Containers, in declaration order
    pub containers: Vec<ContainerDefinition>,
}

impl TaskDefinition {
    /// The first container, whose image tag is reported as the service version
    pub fn primary_container(&self) -> Option<&ContainerDefinition> {
        self.containers.first()
    }

    /// Image tag of the first container
    pub fn version(&self) -> Option<&str> {
        self.primary_container().map(ContainerDefinition::image_tag)
    }

    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Structural checks that do not depend on the provider
    pub fn validate(&self) -> Result<(), String> {
        if self.family.is_empty() {
            return Err("task definition family must not be empty".into());
        }
        if self.containers.is_empty() {
            return Err(format!(
                "task definition \"{}\" has no containers",
                self.family
            ));
        }
        for container in &self.containers {
            if container.name.is_empty() {
                return Err(format!(
                    "task definition \"{}\" has a container without a name",
                    self.family
                ));
            }
            if container.image.is_empty() {
                return Err(format!("container \"{}\" has no image", container.name));
            }
        }
        let mut names: Vec<&str> = self.containers.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(format!(
                "task definition \"{}\" has duplicate container names",
                self.family
            ));
        }
        Ok(())
    }
}

/// One container inside a task definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,

    /// Image reference, e.g. `registry.example.com/web:1.4.2`
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,

    /// Hard memory limit (MiB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,

    /// Soft memory limit (MiB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<u32>,

    #[serde(default = "default_true")]
    pub essential: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Environment variable name -> parameter store reference
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
}

impl ContainerDefinition {
    /// Tag (or digest) portion of the image reference; `latest` when untagged
    pub fn image_tag(&self) -> &str {
        if let Some((_, digest)) = self.image.split_once('@') {
            return digest;
        }
        // A colon before the last slash belongs to a registry host:port
        let name_start = self.image.rfind('/').map(|i| i + 1).unwrap_or(0);
        match self.image[name_start..].rsplit_once(':') {
            Some((_, tag)) if !tag.is_empty() => tag,
            _ => "latest",
        }
    }
}

/// Container port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    #[serde(default = "default_protocol")]
    pub protocol: String,
}

/// A registered, immutable task definition revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDefinitionRevision {
    pub family: String,
    pub revision: u32,
    /// Provider-assigned identifier
    pub arn: String,
}

impl fmt::Display for TaskDefinitionRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.revision)
    }
}

fn default_true() -> bool {
    true
}

fn default_protocol() -> String {
    "tcp".to_string()
}
