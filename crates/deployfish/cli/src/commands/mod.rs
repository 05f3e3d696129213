//! CLI command implementations

pub mod entrypoint;
pub mod service;

use crate::error::CliResult;
use crate::output::OutputFormat;
use deployfish_engine::ServiceManager;
use deployfish_types::{DeployfishConfig, LoadOptions, ServiceSpec};
use std::path::PathBuf;
use std::time::Duration;

/// What every command runs with
pub struct Context {
    pub manager: ServiceManager,
    pub output: OutputFormat,
    /// Path of `deployfish.yml`
    pub filename: PathBuf,
    pub load_options: LoadOptions,
    /// Stability wait used when a command gets no `--timeout`
    pub default_timeout: Duration,
}

impl Context {
    /// Parse `deployfish.yml`; read lazily so `entrypoint` never needs it
    pub fn deployfish_config(&self) -> CliResult<DeployfishConfig> {
        Ok(DeployfishConfig::from_path(&self.filename, &self.load_options)?)
    }

    pub fn load_spec(&self, service_name: &str) -> CliResult<ServiceSpec> {
        Ok(self.deployfish_config()?.load_spec(service_name)?)
    }

    pub fn timeout(&self, seconds: Option<u64>) -> Duration {
        seconds.map(Duration::from_secs).unwrap_or(self.default_timeout)
    }
}
