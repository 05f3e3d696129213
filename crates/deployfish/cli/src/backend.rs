//! Provider selection

use crate::config::ProviderKind;
use crate::error::{CliError, CliResult};
use deployfish_provider::{HttpProvider, InMemoryProvider, InfrastructureClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// State file used by the local provider when none is configured
pub const DEFAULT_STATE_FILE: &str = ".deployfish/state.json";

/// Provider a command runs against
pub enum Backend {
    /// Local simulator, loaded from and saved back to a state file
    Local {
        provider: Arc<InMemoryProvider>,
        state_file: PathBuf,
    },
    Http(Arc<HttpProvider>),
}

impl Backend {
    pub fn connect(
        kind: ProviderKind,
        endpoint: Option<String>,
        state_file: Option<PathBuf>,
    ) -> CliResult<Self> {
        match kind {
            ProviderKind::Local => {
                let state_file = state_file.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
                debug!(state_file = %state_file.display(), "Using local provider");
                let provider = InMemoryProvider::load(&state_file)?;
                Ok(Backend::Local {
                    provider: Arc::new(provider),
                    state_file,
                })
            }
            ProviderKind::Http => {
                let endpoint = endpoint.ok_or_else(|| {
                    CliError::Settings("the http provider needs --endpoint".into())
                })?;
                debug!(endpoint = %endpoint, "Using http provider");
                Ok(Backend::Http(Arc::new(HttpProvider::new(&endpoint)?)))
            }
        }
    }

    pub fn client(&self) -> Arc<dyn InfrastructureClient> {
        match self {
            Backend::Local { provider, .. } => provider.clone(),
            Backend::Http(provider) => provider.clone(),
        }
    }

    /// Save local simulator state; a no-op for remote providers
    pub fn persist(&self) -> CliResult<()> {
        if let Backend::Local {
            provider,
            state_file,
        } = self
        {
            provider.save(state_file)?;
        }
        Ok(())
    }
}
