// Resilience error taxonomy
//
// Errors crossing a dependency boundary are mapped into `DependencyError` at the
// call site; retry decisions pattern-match on `Classification`, never on ad-hoc fields.

use std::fmt;
use thiserror::Error;

/// Network-level transient failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFailure {
    ConnectionRefused,
    ConnectionReset,
    Timeout,
    Dns,
}

impl NetworkFailure {
    pub fn code(&self) -> &'static str {
        match self {
            NetworkFailure::ConnectionRefused => "connection_refused",
            NetworkFailure::ConnectionReset => "connection_reset",
            NetworkFailure::Timeout => "timeout",
            NetworkFailure::Dns => "dns",
        }
    }
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What a retry classifier sees of an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Network(NetworkFailure),
    /// HTTP-equivalent status code
    Status(u16),
    /// Dependency-specific error code
    Code(String),
    /// Rejection manufactured by an open circuit breaker
    CircuitOpen,
    Unclassified,
}

/// Retry verdict for a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Maps an error onto the closed `Classification` taxonomy
pub trait Classify {
    fn classify(&self) -> Classification;
}

/// Failure of a call to an external dependency
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error("network failure ({kind}): {message}")]
    Network { kind: NetworkFailure, message: String },

    #[error("status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{code}: {message}")]
    Coded { code: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl DependencyError {
    pub fn network(kind: NetworkFailure, message: impl Into<String>) -> Self {
        DependencyError::Network {
            kind,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        DependencyError::Status {
            status,
            message: message.into(),
        }
    }

    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        DependencyError::Coded {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        DependencyError::Other(message.into())
    }

    /// Verdict under the default classifier with no extra retryable codes
    pub fn error_class(&self) -> ErrorClass {
        if super::retry::default_is_retryable(&self.classify(), &[]) {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }
}

impl Classify for DependencyError {
    fn classify(&self) -> Classification {
        match self {
            DependencyError::Network { kind, .. } => Classification::Network(*kind),
            DependencyError::Status { status, .. } => Classification::Status(*status),
            DependencyError::Coded { code, .. } => Classification::Code(code.clone()),
            DependencyError::Other(_) => Classification::Unclassified,
        }
    }
}

impl From<std::io::Error> for DependencyError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::ConnectionRefused => Some(NetworkFailure::ConnectionRefused),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Some(NetworkFailure::ConnectionReset)
            }
            ErrorKind::TimedOut => Some(NetworkFailure::Timeout),
            _ => None,
        };
        match kind {
            Some(kind) => DependencyError::network(kind, err.to_string()),
            None => DependencyError::other(err.to_string()),
        }
    }
}

/// Rejection returned by an OPEN breaker without invoking the operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit '{service_name}' is open, retry after {retry_after_ms}ms")]
pub struct CircuitOpenError {
    pub service_name: String,
    pub retry_after_ms: u64,
}

impl Classify for CircuitOpenError {
    fn classify(&self) -> Classification {
        Classification::CircuitOpen
    }
}

/// Outcome of a guarded call that did not succeed.
///
/// `Operation` carries the operation's own error untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError<E> {
    Open(CircuitOpenError),
    Operation(E),
}

impl<E> CallError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CallError::Open(_))
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            CallError::Operation(e) => Some(e),
            CallError::Open(_) => None,
        }
    }

    pub fn as_open(&self) -> Option<&CircuitOpenError> {
        match self {
            CallError::Open(e) => Some(e),
            CallError::Operation(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Open(e) => e.fmt(f),
            CallError::Operation(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Open(e) => e.source(),
            CallError::Operation(e) => e.source(),
        }
    }
}

impl<E> From<CircuitOpenError> for CallError<E> {
    fn from(err: CircuitOpenError) -> Self {
        CallError::Open(err)
    }
}

impl<E: Classify> Classify for CallError<E> {
    fn classify(&self) -> Classification {
        match self {
            CallError::Open(_) => Classification::CircuitOpen,
            CallError::Operation(e) => e.classify(),
        }
    }
}
