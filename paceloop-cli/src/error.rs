//! Error types for the paceloop CLI.

use std::io;
use std::process::ExitStatus;

use paceloop::config::ConfigFileError;
use thiserror::Error;

/// Errors surfaced by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file problem.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigFileError),

    /// Logging could not be initialized.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The Ctrl-C handler could not be installed.
    #[error("Failed to install signal handler: {0}")]
    SignalHandler(String),

    /// The work command could not be spawned.
    #[error("Failed to run '{command}': {source}")]
    Spawn { command: String, source: io::Error },

    /// The work command ran but reported failure.
    #[error("Command '{command}' exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },
}
