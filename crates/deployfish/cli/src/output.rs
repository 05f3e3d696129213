//! Output formatting utilities

use crate::error::CliResult;
use colored::*;
use deployfish_engine::{ReconciliationPlan, ServiceInfo};
use deployfish_types::{ContainerDefinition, StandaloneTaskSpec, TaskInstance};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Print rows as a table
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No results".dimmed());
    } else {
        println!("{}", Table::new(rows));
    }
}

/// Print a single item as JSON or YAML
pub fn print_single<T: Serialize>(data: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(data)?);
        }
    }
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// Print a plan that was not executed
pub fn print_plan(plan: &ReconciliationPlan, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return print_single(plan, format);
    }
    if plan.is_empty() {
        print_info(&format!(
            "Nothing to do for {} in cluster {}",
            plan.service_name, plan.cluster_name
        ));
        return Ok(());
    }
    print!("{}", plan.to_string().bold());
    print_info("Dry run: no changes were made");
    Ok(())
}

#[derive(Debug, Tabled)]
struct ContainerRow {
    #[tabled(rename = "CONTAINER")]
    name: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "MEMORY")]
    memory: String,
    #[tabled(rename = "PORTS")]
    ports: String,
}

impl From<&ContainerDefinition> for ContainerRow {
    fn from(c: &ContainerDefinition) -> Self {
        let ports = c
            .ports
            .iter()
            .map(|p| match p.host_port {
                Some(host) => format!("{}:{}/{}", host, p.container_port, p.protocol),
                None => format!("{}/{}", p.container_port, p.protocol),
            })
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            name: c.name.clone(),
            image: c.image.clone(),
            cpu: c.cpu.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            memory: c.memory.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            ports: if ports.is_empty() { "-".into() } else { ports },
        }
    }
}

#[derive(Debug, Tabled)]
struct TaskRow {
    #[tabled(rename = "TASK")]
    task_id: String,
    #[tabled(rename = "REVISION")]
    revision: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "STARTED")]
    started: String,
}

impl From<&TaskInstance> for TaskRow {
    fn from(t: &TaskInstance) -> Self {
        Self {
            task_id: t.task_id.clone(),
            revision: short_arn(&t.task_definition_arn).to_string(),
            status: t.last_status.clone(),
            started: t.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Tabled)]
struct HelperRow {
    #[tabled(rename = "HELPER")]
    name: String,
    #[tabled(rename = "REVISION")]
    revision: String,
    #[tabled(rename = "COUNT")]
    count: u32,
}

#[derive(Debug, Tabled)]
struct RelatedTaskRow {
    #[tabled(rename = "TASK")]
    name: String,
    #[tabled(rename = "CLUSTER")]
    cluster: String,
    #[tabled(rename = "FAMILY")]
    family: String,
    #[tabled(rename = "IMAGES")]
    images: String,
}

/// Last path segment of a task definition arn (`family:revision`)
fn short_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// Print the read-only report of a service
pub fn print_service_info(info: &ServiceInfo, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return print_single(info, format);
    }

    let live = &info.live;
    if !live.exists {
        print_info(&format!(
            "\"{}\" service is not in cluster {} yet",
            live.service_name, live.cluster_name
        ));
        return Ok(());
    }
    println!("{}", format!("Service: {}", live.service_name).bold());
    println!("  Cluster:  {}", live.cluster_name);
    println!(
        "  Revision: {}",
        live.active_task_definition_arn
            .as_deref()
            .map(short_arn)
            .unwrap_or("-")
    );
    println!("  Version:  {}", info.version().unwrap_or("-"));
    let counts = format!(
        "{} running / {} desired / {} pending",
        live.running_count, live.desired_count_live, live.pending_count
    );
    if live.is_stable() {
        println!("  Tasks:    {}", counts.green());
    } else {
        println!("  Tasks:    {} {}", counts.yellow(), "(deploying)".dimmed());
    }
    if let Some(lb) = &live.load_balancer {
        println!("  Load balancer: {}", lb);
    }
    if let Some(policy) = &live.scaling_policy {
        println!(
            "  Scaling:  {}..{} on {} at {}",
            policy.min_capacity, policy.max_capacity, policy.metric, policy.target_value
        );
    }
    if let Some(group) = &info.capacity_group {
        println!(
            "  Capacity group: {} (desired {}, min {}, max {})",
            group.name, group.desired_capacity, group.min_size, group.max_size
        );
    }

    if let Some(definition) = &info.active_definition {
        println!();
        print_table(definition.containers.iter().map(ContainerRow::from).collect());
    }

    if !live.helper_tasks.is_empty() {
        println!();
        print_table(
            live.helper_tasks
                .iter()
                .map(|(name, binding)| HelperRow {
                    name: name.clone(),
                    revision: short_arn(&binding.task_definition_arn).to_string(),
                    count: binding.desired_count,
                })
                .collect(),
        );
    }

    println!();
    print_table(info.tasks.iter().map(TaskRow::from).collect());
    Ok(())
}

/// Print the standalone tasks bound to a service
pub fn print_related_tasks(tasks: &[StandaloneTaskSpec], format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return print_single(&tasks, format);
    }
    print_table(
        tasks
            .iter()
            .map(|t| RelatedTaskRow {
                name: t.name.clone(),
                cluster: t.cluster_name.clone(),
                family: t.task_definition.family.clone(),
                images: t
                    .task_definition
                    .containers
                    .iter()
                    .map(|c| c.image.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployfish_types::PortMapping;

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_short_arn() {
        assert_eq!(
            short_arn("arn:deployfish:local:task-definition/web:3"),
            "web:3"
        );
        assert_eq!(short_arn("web:3"), "web:3");
    }

    #[test]
    fn test_container_row_ports() {
        let container = ContainerDefinition {
            name: "web".into(),
            image: "registry.local/web:1.0.0".into(),
            cpu: Some(256),
            memory: None,
            memory_reservation: None,
            essential: true,
            command: Vec::new(),
            ports: vec![
                PortMapping {
                    container_port: 8000,
                    host_port: None,
                    protocol: "tcp".into(),
                },
                PortMapping {
                    container_port: 53,
                    host_port: Some(5353),
                    protocol: "udp".into(),
                },
            ],
            environment: Default::default(),
            secrets: Default::default(),
        };

        let row = ContainerRow::from(&container);
        assert_eq!(row.cpu, "256");
        assert_eq!(row.memory, "-");
        assert_eq!(row.ports, "8000/tcp, 5353:53/udp");
    }
}
