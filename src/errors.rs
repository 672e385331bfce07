use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the build engine.
///
/// `Validation` is caller-recoverable (fix the input and retry). The other
/// variants abort the current build or mutation; artifacts already written
/// stay on disk and a rerun picks up where the failure left off.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input: missing password, unknown authority, populated child
    /// lists on an inserted node, certificate name not found.
    #[error("{0}")]
    Validation(String),

    /// The external toolkit exited non-zero. The message carries the
    /// captured stderr; argv is reduced to the leading tokens because the
    /// full command line contains key passwords.
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The toolkit reported success but an expected artifact never
    /// appeared. Indicates a toolkit/version mismatch, not bad input.
    #[error("`{command}` succeeded but expected output file(s) are missing: {missing:?}")]
    MissingOutputs {
        command: String,
        missing: Vec<PathBuf>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to serialize the authority database: {0}")]
    Persist(#[from] toml::ser::Error),

    #[error("failed to parse {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
