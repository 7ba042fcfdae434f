//! Callback-style adapter
//!
//! Several logins may share one bus; each callback only ever sees the
//! terminal event of its own operation, exactly once.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::adapters::{on_terminal, spawn_login};
use crate::api::ApiSurface;
use crate::error::LoginFailure;
use crate::flows::{LoginFlowBuilder, LoginOutcome};
use crate::runtime::events::{CANCELLED, ERROR, SUCCESS};
use crate::runtime::{CancelReason, EventBus, LoginEvent, Operation, LOGIN_DOMAIN};

/// What the callback receives
#[derive(Debug, Clone)]
pub enum LoginNotice {
    Success(ApiSurface),
    Error(Arc<LoginFailure>),
    Cancelled(CancelReason),
}

impl LoginNotice {
    /// `success`, `error` or `cancelled`
    pub fn kind(&self) -> &'static str {
        match self {
            LoginNotice::Success(_) => SUCCESS,
            LoginNotice::Error(_) => ERROR,
            LoginNotice::Cancelled(_) => CANCELLED,
        }
    }

    fn from_event(event: LoginEvent) -> Option<Self> {
        match event {
            LoginEvent::Success { api, .. } => Some(LoginNotice::Success(api)),
            LoginEvent::Error { error, .. } => Some(LoginNotice::Error(error)),
            LoginEvent::Cancelled { reason, .. } => Some(LoginNotice::Cancelled(reason)),
            _ => None,
        }
    }
}

/// Handle to a login started with [`login_with_callback`]
#[derive(Debug)]
pub struct LoginControl {
    operation: Operation,
    task: JoinHandle<LoginOutcome>,
}

impl LoginControl {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn cancel(&self) -> bool {
        self.operation.cancel()
    }

    /// Wait for the driving task. `None` if it panicked or was aborted.
    pub async fn join(self) -> Option<LoginOutcome> {
        self.task.await.ok()
    }
}

/// Start a login on `bus` and call `callback` with its terminal notice.
///
/// When the flow cannot be constructed the callback receives the error
/// right away and no control handle is returned.
pub fn login_with_callback<F>(
    bus: &EventBus<LoginEvent>,
    builder: LoginFlowBuilder,
    callback: F,
) -> Option<LoginControl>
where
    F: FnOnce(LoginNotice) + Send + 'static,
{
    let flow = match builder.build() {
        Ok(flow) => flow,
        Err(failure) => {
            callback(LoginNotice::Error(Arc::new(failure)));
            return None;
        }
    };

    let operation = flow.operation().clone();
    let login = bus.ensure_domain(LOGIN_DOMAIN);

    on_terminal(&login, &operation, move |event| {
        if let Some(notice) = LoginNotice::from_event(event) {
            callback(notice);
        }
    });

    let task = spawn_login(flow, login);
    Some(LoginControl { operation, task })
}
