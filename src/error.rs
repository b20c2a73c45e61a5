//! Error types for kinder

use std::fmt::{self, Display};
use std::time::Duration;

use thiserror::Error;

use crate::pki::PkiError;

/// Result type for kinder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kinder operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad file paths, malformed CIDRs, unreadable config files
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Values rejected before they are interpolated into generated manifests
    #[error("validation error: {0}")]
    Validation(String),

    /// Container runtime daemon failure (unreachable, pull/create/start failed)
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Registry readiness or artifact push failure
    #[error("registry error: {0}")]
    Registry(String),

    /// External command (kind, kubectl) exited unsuccessfully
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// A bounded wait expired
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: String,
        /// The deadline that expired
        timeout: Duration,
    },

    /// A named start step failed
    #[error("{step}: {source}")]
    Step {
        /// Step that failed
        step: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Certificate hierarchy failure
    #[error(transparent)]
    Pki(#[from] PkiError),

    /// Best-effort teardown finished with failures
    #[error(transparent)]
    Teardown(#[from] TeardownError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a container runtime error with the given message
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a registry error with the given message
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a command failure with the given message
    pub fn command_failed(msg: impl Into<String>) -> Self {
        Self::CommandFailed(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            timeout,
        }
    }

    /// Attach the name of the step that produced this error
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait to convert errors with Display to `Error::CommandFailed`.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// One failed step of a best-effort teardown
#[derive(Debug)]
pub struct StepFailure {
    /// Name of the step (service or resource)
    pub step: String,
    /// Why it failed
    pub error: Error,
}

/// Aggregated failures of a best-effort teardown.
///
/// Every step is attempted; each failure is recorded with the step name so
/// callers can tell exactly which services are still around.
#[derive(Debug, Default)]
pub struct TeardownError {
    failures: Vec<StepFailure>,
}

impl TeardownError {
    /// Create an empty failure set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed step
    pub fn record(&mut self, step: impl Into<String>, error: Error) {
        self.failures.push(StepFailure {
            step: step.into(),
            error,
        });
    }

    /// True when no step failed
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// All recorded failures in the order they happened
    pub fn failures(&self) -> &[StepFailure] {
        &self.failures
    }

    /// Names of the failed steps
    pub fn failed_steps(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.step.as_str()).collect()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregated error
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown(self))
        }
    }
}

impl Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} teardown step(s) failed: [", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", failure.step, failure.error)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for TeardownError {}
