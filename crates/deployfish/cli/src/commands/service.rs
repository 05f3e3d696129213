//! Service lifecycle commands

use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, print_error, print_info, print_success, print_warning, OutputFormat};
use clap::{Args, Subcommand};
use deployfish_engine::{
    CapacityOptions, CreateOptions, ExecutionReport, Outcome, RunOptions, ScaleOptions,
};
use deployfish_types::ServiceSpec;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::future::Future;
use std::io::{BufRead, IsTerminal, Write};
use std::process::ExitCode;
use std::time::Duration;

/// Service subcommands
#[derive(Subcommand)]
pub enum ServiceCommands {
    /// Create a service that does not exist yet
    Create {
        /// Service name in deployfish.yml
        service_name: String,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        capacity: CapacityArgs,

        /// Write the service's config parameters before creating it
        #[arg(long)]
        update_configs: bool,
    },

    /// Show the live state of a service
    Info {
        /// Service name in deployfish.yml
        service_name: String,
    },

    /// Roll a service and its helper tasks onto new task definitions
    Update {
        /// Service name in deployfish.yml
        service_name: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Change the number of running tasks
    Scale {
        /// Service name in deployfish.yml
        service_name: String,

        /// Target task count
        #[arg(allow_negative_numbers = true)]
        count: i64,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        capacity: CapacityArgs,
    },

    /// Replace every running task
    Restart {
        /// Service name in deployfish.yml
        service_name: String,

        /// Stop all tasks at once instead of one at a time
        #[arg(long)]
        hard: bool,

        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Drain and delete a service
    Delete {
        /// Service name in deployfish.yml
        service_name: String,

        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,

        /// Seconds to wait for the service to drain
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },

    /// Run a one-off command on the service's active task definition
    RunTask {
        /// Service name in deployfish.yml
        service_name: String,

        /// Command to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Print the image tag the service is running
    Version {
        /// Service name in deployfish.yml
        service_name: String,
    },

    /// List standalone tasks bound to a service
    RelatedTasks {
        /// Service name in deployfish.yml
        service_name: String,
    },
}

/// Flags shared by commands that change a service
#[derive(Args, Debug, Clone, Copy)]
pub struct RunArgs {
    /// Print the plan without running it
    #[arg(long)]
    dry_run: bool,

    /// Wait for the service to become stable (default)
    #[arg(long, overrides_with = "no_wait")]
    wait: bool,

    /// Return once the changes are issued
    #[arg(long, overrides_with = "wait")]
    no_wait: bool,

    /// Seconds to wait for the service to become stable [default: 600]
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

impl RunArgs {
    fn options(&self, ctx: &Context) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            wait: self.wait || !self.no_wait,
            timeout: Some(ctx.timeout(self.timeout)),
        }
    }
}

/// Capacity group flags
#[derive(Args, Debug, Clone, Copy)]
pub struct CapacityArgs {
    /// Resize the service's capacity group (default)
    #[arg(long, overrides_with = "no_asg")]
    asg: bool,

    /// Leave the capacity group alone
    #[arg(long, overrides_with = "asg")]
    no_asg: bool,

    /// Resize the capacity group even past its min/max bounds
    #[arg(long)]
    force_asg: bool,
}

impl From<CapacityArgs> for CapacityOptions {
    fn from(args: CapacityArgs) -> Self {
        CapacityOptions {
            asg: args.asg || !args.no_asg,
            force_asg: args.force_asg,
        }
    }
}

/// Machine-readable result of a lifecycle command
#[derive(Debug, Serialize)]
struct OperationSummary<'a> {
    service: &'a str,
    cluster: &'a str,
    status: &'static str,
    applied: Vec<String>,
    skipped: Vec<String>,
    helper_failures: Vec<String>,
    registered: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    task_ids: Vec<String>,
}

impl<'a> OperationSummary<'a> {
    fn new(spec: &'a ServiceSpec, status: &'static str, report: &ExecutionReport) -> Self {
        Self {
            service: &spec.service_name,
            cluster: &spec.cluster_name,
            status,
            applied: report
                .applied
                .iter()
                .map(|(target, action)| format!("[{}] {}", target, action))
                .collect(),
            skipped: report
                .skipped
                .iter()
                .map(|(target, action)| format!("[{}] {}", target, action))
                .collect(),
            helper_failures: report
                .helper_failures
                .iter()
                .map(|f| format!("{}: {}: {}", f.helper, f.action, f.error))
                .collect(),
            registered: report
                .registered
                .iter()
                .map(|(target, revision)| format!("[{}] {}", target, revision))
                .collect(),
            task_ids: report
                .invocation
                .as_ref()
                .map(|i| i.task_ids.clone())
                .unwrap_or_default(),
        }
    }
}

/// Execute a service command
pub async fn execute(command: ServiceCommands, ctx: &Context) -> CliResult<ExitCode> {
    match command {
        ServiceCommands::Create {
            service_name,
            run,
            capacity,
            update_configs,
        } => {
            let spec = ctx.load_spec(&service_name)?;
            let options = CreateOptions {
                run: run.options(ctx),
                capacity: capacity.into(),
                update_configs,
            };
            let outcome = with_spinner(
                ctx,
                format!("Creating {}...", spec.service_name),
                ctx.manager.create(&spec, options),
            )
            .await?;
            finish(ctx, &spec, outcome, "Created")
        }

        ServiceCommands::Info { service_name } => {
            let spec = ctx.load_spec(&service_name)?;
            let info = ctx.manager.info(&spec).await?;
            output::print_service_info(&info, ctx.output)?;
            Ok(ExitCode::SUCCESS)
        }

        ServiceCommands::Update { service_name, run } => {
            let spec = ctx.load_spec(&service_name)?;
            let outcome = with_spinner(
                ctx,
                format!("Updating {}...", spec.service_name),
                ctx.manager.update(&spec, run.options(ctx)),
            )
            .await?;
            finish(ctx, &spec, outcome, "Updated")
        }

        ServiceCommands::Scale {
            service_name,
            count,
            run,
            capacity,
        } => {
            let spec = ctx.load_spec(&service_name)?;
            let options = ScaleOptions {
                run: run.options(ctx),
                capacity: capacity.into(),
            };
            let outcome = with_spinner(
                ctx,
                format!("Scaling {} to {}...", spec.service_name, count),
                ctx.manager.scale(&spec, count, options),
            )
            .await?;
            finish(ctx, &spec, outcome, "Scaled")
        }

        ServiceCommands::Restart {
            service_name,
            hard,
            dry_run,
        } => {
            let spec = ctx.load_spec(&service_name)?;
            let options = RunOptions {
                dry_run,
                timeout: Some(ctx.default_timeout),
                ..RunOptions::default()
            };
            let outcome = with_spinner(
                ctx,
                format!("Restarting {}...", spec.service_name),
                ctx.manager.restart(&spec, hard, options),
            )
            .await?;
            finish(ctx, &spec, outcome, "Restarted")
        }

        ServiceCommands::Delete {
            service_name,
            dry_run,
            timeout,
        } => {
            let spec = ctx.load_spec(&service_name)?;
            let options = RunOptions {
                dry_run,
                timeout: Some(ctx.timeout(timeout)),
                ..RunOptions::default()
            };
            let outcome = ctx
                .manager
                .delete(&spec, options, |spec| confirm_service_name(&spec.service_name))
                .await?;
            if matches!(outcome, Outcome::Declined) {
                print_warning("Not deleting service");
                return Ok(ExitCode::SUCCESS);
            }
            finish(ctx, &spec, outcome, "Deleted")
        }

        ServiceCommands::RunTask {
            service_name,
            command,
        } => {
            let spec = ctx.load_spec(&service_name)?;
            let outcome = ctx
                .manager
                .run_task(&spec, &command, RunOptions::default())
                .await?;
            finish(ctx, &spec, outcome, "Started one-off task for")
        }

        ServiceCommands::Version { service_name } => {
            let spec = ctx.load_spec(&service_name)?;
            let version = ctx.manager.version(&spec).await?;
            match ctx.output {
                OutputFormat::Table => println!("{}", version),
                format => output::print_single(
                    &serde_json::json!({ "service": spec.service_name, "version": version }),
                    format,
                )?,
            }
            Ok(ExitCode::SUCCESS)
        }

        ServiceCommands::RelatedTasks { service_name } => {
            let config = ctx.deployfish_config()?;
            // Fails on an unknown service rather than printing an empty list
            config.load_spec(&service_name)?;
            let tasks = config.related_tasks(&service_name)?;
            output::print_related_tasks(&tasks, ctx.output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Report an outcome and pick the exit code
fn finish(ctx: &Context, spec: &ServiceSpec, outcome: Outcome, verb: &str) -> CliResult<ExitCode> {
    let (report, timed_out) = match &outcome {
        Outcome::DryRun(plan) => {
            output::print_plan(plan, ctx.output)?;
            return Ok(ExitCode::SUCCESS);
        }
        Outcome::Declined => return Ok(ExitCode::SUCCESS),
        Outcome::Completed(report) => (report, false),
        Outcome::TimedOut(report) => (report, true),
    };

    if ctx.output != OutputFormat::Table {
        let status = if timed_out { "timed_out" } else { "completed" };
        output::print_single(&OperationSummary::new(spec, status, report), ctx.output)?;
    } else {
        for failure in &report.helper_failures {
            print_warning(&format!(
                "Helper task {} failed to {}: {}",
                failure.helper, failure.action, failure.error
            ));
        }
        for (target, action) in &report.skipped {
            print_info(&format!("Skipped [{}] {}", target, action));
        }
        if let Some(invocation) = &report.invocation {
            for task_id in &invocation.task_ids {
                print_info(&format!("Task {} started", task_id));
            }
        }
        if !timed_out {
            print_success(&format!(
                "{} {} in cluster {}",
                verb, spec.service_name, spec.cluster_name
            ));
        }
    }

    if timed_out {
        let elapsed = report.poll.map(|p| p.elapsed().as_secs()).unwrap_or_default();
        print_error(&format!(
            "Timed out after {}s waiting for {} to become stable",
            elapsed, spec.service_name
        ));
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Show a spinner while a lifecycle call runs
async fn with_spinner<F, T>(ctx: &Context, message: String, operation: F) -> T
where
    F: Future<Output = T>,
{
    if ctx.output != OutputFormat::Table {
        return operation.await;
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    let result = operation.await;
    pb.finish_and_clear();
    result
}

/// Ask the operator to type the service name
fn confirm_service_name(expected: &str) -> bool {
    let prompt = format!("Type the service name \"{}\" to confirm deletion", expected);

    let answer = if std::io::stdin().is_terminal() {
        dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .unwrap_or_default()
    } else {
        print!("{}: ", prompt);
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(_) => line,
            Err(_) => String::new(),
        }
    };

    // Only the line ending is dropped; the name must match exactly
    answer.trim_end_matches(['\r', '\n']) == expected
}
