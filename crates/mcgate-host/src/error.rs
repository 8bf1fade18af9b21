use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Which kind of store object an invocation failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKind {
    Handler,
    Dependency,
}

impl std::fmt::Display for MissingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingKind::Handler => f.write_str("handler"),
            MissingKind::Dependency => f.write_str("dependency"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{kind} '{name}' not found in container '{container}'")]
    NotFound {
        kind: MissingKind,
        container: String,
        name: String,
    },
    #[error("only one trigger can be assigned or deleted per request (got {0})")]
    AuthorizationConflict(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid account '{0}'")]
    InvalidAccount(String),
    #[error("handler '{name}' is unusable: {reason}")]
    InvalidHandler { name: String, reason: String },
    #[error("sandbox '{name}' unavailable: {source}")]
    SandboxUnavailable {
        name: String,
        #[source]
        source: RuntimeError,
    },
    #[error("control daemon for scope '{scope}' failed to start: {source}")]
    ControlDaemon {
        scope: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to send invocation: {0}")]
    ProtocolSendFailure(#[source] mcgate_sbus::SbusError),
    #[error("no handler response for task {task_id} within {after:?}")]
    Timeout { task_id: String, after: Duration },
    #[error("malformed handler response: {0}")]
    MalformedResponse(String),
    #[error("store error: {0}")]
    Store(#[from] mcgate_store::StoreError),
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    /// Status a request layer would surface for this error.
    pub fn http_status(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::AuthorizationConflict(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidRequest(_)
            | GatewayError::InvalidAccount(_)
            | GatewayError::InvalidHandler { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::SandboxUnavailable { .. } | GatewayError::ControlDaemon { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::ProtocolSendFailure(_)
            | GatewayError::MalformedResponse(_)
            | GatewayError::Store(_)
            | GatewayError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub(crate) fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> GatewayError {
    GatewayError::Io {
        path: path.into(),
        source,
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
