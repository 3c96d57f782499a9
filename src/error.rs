//! Error Types
//!
//! A single error enum shared by the status context, the data pipe
//! registry, the job wrapper and the auto-analysis protocols.
//!
//! The variants follow four broad families:
//! - Usage errors (bad names, unknown types, duplicates)
//! - Missing numeric backends, raised when a pipe type is requested
//! - State consistency errors (missing pipes, missing input data)
//! - Failures captured from background analyses

use thiserror::Error;

use crate::auto_analyses::MODSEL_METHODS;
use crate::pipes::types::VALID_TYPES;

/// Convenience alias used throughout the crate.
pub type RelaxResult<T> = Result<T, RelaxError>;

/// Errors raised by the relaxation analysis core.
#[derive(Error, Debug)]
pub enum RelaxError {
    /// A required name or argument was not supplied.
    #[error("The {0} argument must be supplied.")]
    MissingArgument(String),

    /// The pipe type is not one of the fixed set of types.
    #[error("The data pipe type '{pipe_type}' is invalid and must be one of {valid:?}.", valid = VALID_TYPES)]
    InvalidType { pipe_type: String },

    /// The model selection technique is not supported.
    #[error("The model selection technique '{method}' is not in the allowed list of {allowed:?}.", allowed = MODSEL_METHODS)]
    InvalidModelSelection { method: String },

    /// The pipe type needs a numeric backend which is not available.
    #[error("{message}")]
    BackendUnavailable { pipe_type: String, message: String },

    /// A data pipe with this name already exists.
    #[error("The data pipe '{0}' already exists.")]
    DuplicatePipe(String),

    /// The named pipe (or the current pipe when `None`) does not exist.
    #[error("{}", no_pipe_message(.0))]
    NoPipe(Option<String>),

    /// The pipe is already a member of a bundle.
    #[error("The data pipe '{pipe}' is already within the '{bundle}' bundle.")]
    AlreadyBundled { pipe: String, bundle: String },

    /// An observer key is registered twice on the same channel.
    #[error("The observer '{key}' already exists on the '{channel}' channel.")]
    DuplicateObserverKey { channel: String, key: String },

    /// An observer key was empty.
    #[error("The observer key must be supplied for the '{channel}' channel.")]
    InvalidObserverKey { channel: String },

    /// No observer channel carries this name.
    #[error("The observer channel '{0}' does not exist.")]
    UnknownChannel(String),

    /// An observer callback failed during notification.
    #[error("Observer '{key}' on the '{channel}' channel failed: {source}")]
    ObserverCallback {
        channel: String,
        key: String,
        #[source]
        source: Box<RelaxError>,
    },

    /// The store must be empty for this operation.
    #[error("The data store is not empty, {0} data pipe(s) exist.")]
    NotEmpty(usize),

    /// Analysis input data is missing from a pipe.
    #[error("The {what} data is missing from the data pipe '{pipe}'.")]
    MissingData { pipe: String, what: String },

    /// The execution lock is held, so the operation cannot start.
    #[error("relax is currently executing ('{holder}' holds the execution lock).")]
    ExecutionLocked { holder: String },

    /// A lock was released without being held.
    #[error("The {0} lock is not held.")]
    LockNotHeld(String),

    /// A lock was released by a thread that does not own it.
    #[error("The {lock} lock is held by '{holder}' in another thread.")]
    LockNotOwned { lock: String, holder: String },

    /// A method which must be overridden was called.
    #[error("{0} must be implemented by the concrete analysis.")]
    Unimplemented(String),

    /// A failure raised from inside an analysis.
    #[error("{0}")]
    Analysis(String),

    /// An analysis panicked.
    #[error("The analysis panicked: {0}")]
    Panic(String),

    /// The analysis batch file is invalid.
    #[error("Invalid analysis configuration:\n{0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

fn no_pipe_message(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("The data pipe '{}' has not been created yet.", name),
        None => "The current data pipe has not been set.".to_string(),
    }
}

impl RelaxError {
    /// Shortcut for failures raised by analysis code.
    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    /// Returns true for errors caused by bad arguments.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument(_)
                | Self::InvalidType { .. }
                | Self::InvalidModelSelection { .. }
                | Self::DuplicatePipe(_)
                | Self::AlreadyBundled { .. }
                | Self::DuplicateObserverKey { .. }
                | Self::InvalidObserverKey { .. }
                | Self::UnknownChannel(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_pipe_messages() {
        let named = RelaxError::NoPipe(Some("p1".to_string()));
        assert_eq!(named.to_string(), "The data pipe 'p1' has not been created yet.");

        let current = RelaxError::NoPipe(None);
        assert_eq!(current.to_string(), "The current data pipe has not been set.");
    }

    #[test]
    fn test_analysis_message_is_verbatim() {
        assert_eq!(RelaxError::analysis("boom").to_string(), "boom");
    }

    #[test]
    fn test_invalid_type_lists_valid_types() {
        let err = RelaxError::InvalidType {
            pipe_type: "xyz".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'xyz'"));
        assert!(msg.contains("relax_disp"));
        assert!(err.is_usage());
    }

    #[test]
    fn test_observer_callback_source() {
        use std::error::Error;

        let err = RelaxError::ObserverCallback {
            channel: "pipe_alteration".to_string(),
            key: "counter".to_string(),
            source: Box::new(RelaxError::analysis("callback failed")),
        };
        assert!(err.to_string().contains("callback failed"));
        assert!(err.source().is_some());
        assert!(!err.is_usage());
    }
}
