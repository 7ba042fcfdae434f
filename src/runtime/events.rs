//! Login event payloads
//!
//! Every login emits on the `login` domain:
//!
//! ```text
//! login.start      once, before the first step
//! login.progress   before each of the six steps
//! login.success    | exactly one of these
//! login.error      |
//! login.cancelled  |
//! ```

use std::fmt;
use std::sync::Arc;

use crate::api::ApiSurface;
use crate::config::LoginOptions;
use crate::error::LoginFailure;
use crate::runtime::bus::SubscriptionCancelled;
use crate::runtime::operation::{CancelReason, Operation};
use crate::session::UserSessionContext;

/// Domain that carries login lifecycle events
pub const LOGIN_DOMAIN: &str = "login";

pub const START: &str = "start";
pub const PROGRESS: &str = "progress";
pub const SUCCESS: &str = "success";
pub const ERROR: &str = "error";
pub const CANCELLED: &str = "cancelled";

/// Named steps of the login state machine, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginStep {
    Cookies,
    GetHtml,
    BuildSessionContext,
    CreateApiClient,
    LoadApiFunctions,
    Success,
}

impl LoginStep {
    pub const ALL: [LoginStep; 6] = [
        LoginStep::Cookies,
        LoginStep::GetHtml,
        LoginStep::BuildSessionContext,
        LoginStep::CreateApiClient,
        LoginStep::LoadApiFunctions,
        LoginStep::Success,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStep::Cookies => "cookies",
            LoginStep::GetHtml => "get_html",
            LoginStep::BuildSessionContext => "build_session_context",
            LoginStep::CreateApiClient => "create_api_client",
            LoginStep::LoadApiFunctions => "load_api_functions",
            LoginStep::Success => "success",
        }
    }
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload type of the login bus
#[derive(Debug, Clone)]
pub enum LoginEvent {
    Start {
        operation: Operation,
        options: Arc<LoginOptions>,
    },
    Progress {
        operation: Operation,
        step: LoginStep,
    },
    Success {
        operation: Operation,
        api: ApiSurface,
        session: Arc<UserSessionContext>,
    },
    Error {
        operation: Operation,
        error: Arc<LoginFailure>,
        critical: bool,
    },
    Cancelled {
        operation: Operation,
        reason: CancelReason,
    },
    /// A cancellable subscription on this bus was torn down
    SubscriptionCancelled(SubscriptionCancelled),
}

impl LoginEvent {
    /// Operation that produced this event
    pub fn operation(&self) -> Option<&Operation> {
        match self {
            LoginEvent::Start { operation, .. }
            | LoginEvent::Progress { operation, .. }
            | LoginEvent::Success { operation, .. }
            | LoginEvent::Error { operation, .. }
            | LoginEvent::Cancelled { operation, .. } => Some(operation),
            LoginEvent::SubscriptionCancelled(_) => None,
        }
    }

    /// Short event name this payload is emitted under
    pub fn name(&self) -> &'static str {
        match self {
            LoginEvent::Start { .. } => START,
            LoginEvent::Progress { .. } => PROGRESS,
            LoginEvent::Success { .. } => SUCCESS,
            LoginEvent::Error { .. } => ERROR,
            LoginEvent::Cancelled { .. } | LoginEvent::SubscriptionCancelled(_) => CANCELLED,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginEvent::Success { .. } | LoginEvent::Error { .. } | LoginEvent::Cancelled { .. }
        )
    }

    /// True when this event belongs to `operation`
    pub fn belongs_to(&self, operation: &Operation) -> bool {
        self.operation() == Some(operation)
    }
}

impl From<SubscriptionCancelled> for LoginEvent {
    fn from(notice: SubscriptionCancelled) -> Self {
        LoginEvent::SubscriptionCancelled(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names() {
        let names: Vec<&str> = LoginStep::ALL.iter().map(LoginStep::as_str).collect();
        assert_eq!(
            names,
            vec![
                "cookies",
                "get_html",
                "build_session_context",
                "create_api_client",
                "load_api_functions",
                "success"
            ]
        );
    }

    #[test]
    fn test_event_ownership() {
        let op = Operation::new();
        let event = LoginEvent::Progress {
            operation: op.clone(),
            step: LoginStep::Cookies,
        };
        assert!(event.belongs_to(&op));
        assert!(!event.belongs_to(&Operation::new()));
        assert!(!event.is_terminal());
        assert_eq!(event.name(), PROGRESS);
    }
}
