//! Container entrypoint mode
//!
//! Run as a container's entrypoint, `deploy entrypoint` exports the
//! service's stored config parameters into the environment of the real
//! command. The service is identified by the environment variables the
//! task definition sets; `deployfish.yml` is not read.

use crate::error::{CliError, CliResult};
use crate::output::{self, print_info, OutputFormat};
use clap::Args;
use deployfish_engine::ServiceManager;
use deployfish_types::ConfigParameter;
use std::process::{Command, ExitCode};
use tracing::{debug, info};

/// Entrypoint arguments
#[derive(Args, Debug)]
pub struct EntrypointArgs {
    /// Print the environment and command instead of running it
    #[arg(long)]
    dry_run: bool,

    #[arg(long, env = "DEPLOYFISH_SERVICE_NAME", hide = true)]
    service_name: Option<String>,

    #[arg(long, env = "DEPLOYFISH_CLUSTER_NAME", hide = true)]
    cluster_name: Option<String>,

    /// Command to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

/// Execute the entrypoint
pub async fn execute(
    args: EntrypointArgs,
    manager: &ServiceManager,
    format: OutputFormat,
) -> CliResult<ExitCode> {
    let parameters = match (&args.service_name, &args.cluster_name) {
        (Some(service), Some(cluster)) => {
            let parameters = manager.service_parameters(cluster, service).await?;
            info!(service = %service, cluster = %cluster, parameters = parameters.len(), "Loaded config parameters");
            parameters
        }
        _ => {
            debug!("Service or cluster not set, running command unchanged");
            Vec::new()
        }
    };

    if args.dry_run {
        print_dry_run(&args.command, &parameters, format)?;
        return Ok(ExitCode::SUCCESS);
    }

    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| CliError::InvalidInput("no command given".into()))?;
    let status = Command::new(program)
        .args(rest)
        .envs(parameters.iter().map(|p| (p.name.as_str(), p.value.as_str())))
        .status()?;

    debug!(status = %status, "Command exited");
    // Killed by a signal leaves no code
    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn print_dry_run(
    command: &[String],
    parameters: &[ConfigParameter],
    format: OutputFormat,
) -> CliResult<()> {
    if format != OutputFormat::Table {
        let environment: std::collections::BTreeMap<&str, &str> = parameters
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect();
        return output::print_single(
            &serde_json::json!({ "environment": environment, "command": command }),
            format,
        );
    }

    for parameter in parameters {
        println!("{}={}", parameter.name, parameter.value);
    }
    print_info(&format!("Would run: {}", command.join(" ")));
    Ok(())
}
