//! Command implementations.

mod client;
mod info;
mod server;
mod validate;

pub use client::run_client;
pub use info::run_info;
pub use server::run_server;
pub use validate::run_validate;

use std::path::Path;

use anyhow::{Context, Result};
use contracts::FieldBlueprint;
use tracing::error;

use crate::error::CliError;

/// Load and validate the configuration at `path`.
fn load_blueprint(path: &Path) -> Result<FieldBlueprint> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()).into());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Re-run validation after command-line overrides.
fn revalidate(blueprint: &FieldBlueprint) -> Result<()> {
    config_loader::validate(blueprint).map_err(CliError::InvalidOverride)?;
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(source) = tokio::signal::ctrl_c().await {
            error!(error = %CliError::Signal { signal: "Ctrl+C", source }, "shutdown signal unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(source) => {
                error!(error = %CliError::Signal { signal: "SIGTERM", source }, "shutdown signal unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
