//! Error types for fca-core

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::runtime::{CancelReason, LoginStep};

/// Failure kinds raised while bootstrapping a session
#[derive(Debug, Error)]
pub enum LoginError {
    /// Missing or invalid cookie/options input
    #[error("Invalid login input: {0}")]
    Validation(String),

    /// The platform is demanding interactive verification
    #[error("Security checkpoint detected, log in with a browser to verify the account")]
    Checkpoint,

    /// Neither identity cookie resolved to a user
    #[error(
        "Could not retrieve user id from cookies. The session was rejected or the account is checkpointed"
    )]
    UserIdMissing,

    /// Network call failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Session context could not be derived from the page
    #[error("Session derivation failed: {0}")]
    Session(String),

    /// API client could not be constructed
    #[error("API client error: {0}")]
    ApiClient(String),

    /// Registry refused a mutation
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A [`LoginError`] tagged with the step it happened in.
///
/// Every error leaving the login flow is wrapped in this type. `step` is
/// `None` when the flow could not even be constructed.
#[derive(Debug)]
pub struct LoginFailure {
    pub step: Option<LoginStep>,
    pub critical: bool,
    pub error: LoginError,
}

impl LoginFailure {
    /// Tag an error raised inside a flow step
    pub fn critical(step: LoginStep, error: LoginError) -> Self {
        Self {
            step: Some(step),
            critical: true,
            error,
        }
    }

    /// Tag an error raised before the flow started
    pub fn setup(error: LoginError) -> Self {
        Self {
            step: None,
            critical: true,
            error,
        }
    }

    /// The underlying error kind
    pub fn kind(&self) -> &LoginError {
        &self.error
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }
}

impl fmt::Display for LoginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "LoginError during {}: {}", step, self.error),
            None => write!(f, "LoginError: {}", self.error),
        }
    }
}

impl std::error::Error for LoginFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Terminal rejection delivered by the future-style adapter
#[derive(Debug, Clone, Error)]
pub enum LoginRejected {
    #[error(transparent)]
    Failed(Arc<LoginFailure>),

    #[error("Login cancelled: {0}")]
    Cancelled(CancelReason),

    /// The driving task went away without emitting a terminal event
    #[error("Login task ended without a terminal event")]
    Abandoned,
}

/// HTTP transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request could not be assembled (bad URL, header, form)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Proxy string could not be parsed
    #[error("Invalid proxy '{0}'")]
    InvalidProxy(String),

    /// Server answered with an error status
    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
}

/// API registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Mutation attempted after `seal()`
    #[error("API registry is sealed, cannot {action}")]
    Sealed { action: &'static str },

    #[error("API name is required")]
    EmptyName,

    /// Reserved name
    #[error("API name '{0}' is not allowed")]
    Forbidden(String),

    #[error("API '{0}' already exists")]
    AlreadyExists(String),

    #[error("API '{0}' does not exist")]
    NotFound(String),
}

impl RegistryError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Sealed { .. } => "REGISTRY_SEALED",
            RegistryError::EmptyName => "REGISTRY_EMPTY_NAME",
            RegistryError::Forbidden(_) => "REGISTRY_FORBIDDEN_NAME",
            RegistryError::AlreadyExists(_) => "REGISTRY_DUPLICATE",
            RegistryError::NotFound(_) => "REGISTRY_NOT_FOUND",
        }
    }
}

/// A single capability failed to load. Logged and skipped by the flow.
#[derive(Debug, Error)]
pub enum ApiLoadError {
    #[error("Capability '{name}' failed to build: {reason}")]
    Build { name: String, reason: String },

    #[error("Capability '{name}' could not be registered: {source}")]
    Register {
        name: String,
        #[source]
        source: RegistryError,
    },
}

/// Errors returned by API handlers at call time
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API '{0}' is not registered")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event bus errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("Event '{event}' timed out after {after:?}")]
    Timeout { event: String, after: Duration },

    #[error("Domain name is required")]
    InvalidDomainName,

    /// Listener dropped before the event was emitted
    #[error("Listener for '{0}' was removed before the event fired")]
    Closed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display_includes_step() {
        let failure = LoginFailure::critical(LoginStep::BuildSessionContext, LoginError::Checkpoint);
        let text = failure.to_string();
        assert!(text.starts_with("LoginError during build_session_context"));
        assert!(failure.is_critical());
        assert!(matches!(failure.kind(), LoginError::Checkpoint));
    }

    #[test]
    fn test_registry_codes() {
        assert_eq!(
            RegistryError::Sealed { action: "add" }.code(),
            "REGISTRY_SEALED"
        );
        assert_eq!(
            RegistryError::AlreadyExists("x".into()).to_string(),
            "API 'x' already exists"
        );
    }
}
