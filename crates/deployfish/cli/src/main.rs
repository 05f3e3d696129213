//! deployfish CLI - manage containerized services from `deployfish.yml`
//!
//! The `deploy` binary lets operators:
//! - Create, update, scale, restart and delete services
//! - Inspect live service state, helper tasks and running tasks
//! - Run one-off commands on a service's active task definition
//! - Serve as a container entrypoint that injects stored config parameters

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backend;
mod commands;
mod config;
mod error;
mod output;

use backend::Backend;
use commands::{entrypoint, service, Context};
use config::{CliConfig, ProviderKind};
use deployfish_engine::{PollerConfig, ServiceManager};
use deployfish_types::LoadOptions;
use error::CliResult;

/// deployfish CLI application
#[derive(Parser)]
#[command(name = "deploy")]
#[command(about = "deployfish - declarative deployment of containerized services", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the deployfish config file
    #[arg(
        short = 'f',
        long,
        env = "DEPLOYFISH_CONFIG_FILE",
        default_value = "deployfish.yml",
        global = true
    )]
    filename: PathBuf,

    /// CLI settings file
    #[arg(long, env = "DEPLOYFISH_CLI_CONFIG", global = true)]
    config: Option<String>,

    /// Provider to run against
    #[arg(long, env = "DEPLOYFISH_PROVIDER", value_enum, global = true)]
    provider: Option<ProviderKind>,

    /// Gateway endpoint for the http provider
    #[arg(long, env = "DEPLOYFISH_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// State file of the local provider
    #[arg(long, env = "DEPLOYFISH_STATE_FILE", global = true)]
    state_file: Option<PathBuf>,

    /// Output format (table, json, yaml)
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Replace unset ${env.NAME} references with an empty string
    #[arg(long, global = true)]
    ignore_missing_environment: bool,

    /// Seconds between stability polls
    #[arg(long, value_name = "SECONDS", global = true)]
    poll_interval: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Service(service::ServiceCommands),

    /// Run a command with the service's config parameters in its environment
    Entrypoint(entrypoint::EntrypointArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let config = CliConfig::load(cli.config.as_deref())?;

    let kind = cli.provider.or(config.provider).unwrap_or_default();
    let backend = Backend::connect(
        kind,
        cli.endpoint.or(config.endpoint),
        cli.state_file.or(config.state_file),
    )?;

    let defaults = PollerConfig::default();
    let poller = PollerConfig {
        interval: cli
            .poll_interval
            .or(config.poll_interval_seconds)
            .map(Duration::from_secs)
            .unwrap_or(defaults.interval),
        timeout: config
            .default_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
    };

    let ctx = Context {
        manager: ServiceManager::new(backend.client(), poller),
        output: cli.output,
        filename: cli.filename,
        load_options: LoadOptions {
            ignore_missing_environment: cli.ignore_missing_environment,
        },
        default_timeout: poller.timeout,
    };

    let result = match cli.command {
        Commands::Service(command) => service::execute(command, &ctx).await,
        Commands::Entrypoint(args) => entrypoint::execute(args, &ctx.manager, ctx.output).await,
    };

    // Local state is saved even when the command stopped part-way
    let persisted = backend.persist();
    let code = result?;
    persisted?;
    Ok(code)
}
