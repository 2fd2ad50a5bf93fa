//! Error types and their classification.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Whether an error may be logged and survived inside a loop body, or must
/// terminate the owning unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Fatal,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("channel closed")]
    Closed,
}

/// Shape errors in user supplied descriptions. Raised at construction or
/// bind time, never deferred.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("resource description must be a mapping")]
    NotAMapping,

    #[error("resource description is missing key '{0}'")]
    MissingKey(&'static str),

    #[error("resource description key '{key}' must be {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },

    #[error("kernel '{kernel}' does not accept argument '{argument}'")]
    UnknownArgument { kernel: String, argument: String },

    #[error("kernel '{kernel}' requires argument '{argument}'")]
    MissingArgument { kernel: String, argument: String },

    #[error("{child} belongs to '{actual}', not '{expected}'")]
    ForeignChild {
        child: String,
        expected: String,
        actual: String,
    },

    #[error("malformed staging directive '{0}'")]
    StagingDirective(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("kernel '{kernel}' has no configuration for resource '{resource}' and no '*' default")]
    NoKernelConfiguration { kernel: String, resource: String },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Resource(#[from] ValidationError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{entity} {uid}: transition {from} -> {to} rejected")]
pub struct TransitionError {
    pub entity: &'static str,
    pub uid: String,
    pub from: &'static str,
    pub to: &'static str,
}

/// Umbrella error of the dispatch core.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("resource runtime did not return {tasks} task(s) within {timeout:?}")]
    RuntimeTimeout { tasks: usize, timeout: Duration },

    #[error("resource runtime failed: {0}")]
    Runtime(String),

    #[error("{unit} panicked or was aborted: {reason}")]
    Join { unit: &'static str, reason: String },
}

impl EngineError {
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::Broker(BrokerError::Unreachable(_) | BrokerError::Closed) => {
                Severity::Fatal
            }
            EngineError::Join { .. } => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_broker_is_fatal() {
        let err = EngineError::from(BrokerError::Unreachable("down".into()));
        assert!(err.is_fatal());
    }

    #[test]
    fn malformed_messages_are_recoverable() {
        let codec = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let err = EngineError::from(codec);
        assert_eq!(err.severity(), Severity::Recoverable);
        assert!(err.to_string().starts_with("malformed message"));

        let unknown = EngineError::from(BrokerError::UnknownDelivery(7));
        assert!(!unknown.is_fatal());
    }
}
