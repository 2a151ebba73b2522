//! Error types shared by the execution engine.

use std::io;
use std::path::PathBuf;

/// Result alias used by the lower layers of the shell.
pub type Result<T> = std::result::Result<T, ShellError>;

/// Failures the execution engine reports to the user.
///
/// None of these end the session: the caller prints the error and the
/// affected segment contributes a non-zero status.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// The program could not be located through `PATH`.
    #[error("{0}: command not found")]
    CommandNotFound(String),

    /// The program was found but the process could not be started.
    #[error("{name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Creating an inter-stage pipe failed.
    #[error("pipe: {0}")]
    Pipe(#[source] io::Error),

    /// A redirection target could not be opened.
    #[error("{path}: {source}")]
    Redirect {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Capturing heredoc text into its temporary buffer failed.
    #[error("heredoc: {0}")]
    Heredoc(#[source] io::Error),

    /// A job reference did not resolve to an active job.
    #[error("no such job: {0}")]
    NoSuchJob(String),

    /// A configuration file exists but is not valid TOML.
    #[error("{path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Writing the user configuration file failed.
    #[error("{path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
