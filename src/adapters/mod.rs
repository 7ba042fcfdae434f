//! Calling-convention adapters over the login bus
//!
//! Every adapter drives a [`LoginFlow`] through [`spawn_login`], which emits
//! `login.start`, progress for every step and exactly one terminal event.
//! Adapters only translate those events; they hold no flow logic.
//!
//! All entry points spawn onto the current Tokio runtime.

pub mod callback;
pub mod events;
pub mod promise;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{LoginError, LoginFailure};
use crate::flows::{LoginFlow, LoginOutcome};
use crate::runtime::events::{CANCELLED, ERROR, START, SUCCESS};
use crate::runtime::{CancelReason, EventDomain, ListenerId, LoginEvent, LoginStep, Operation};

pub use callback::{login_with_callback, LoginControl, LoginNotice};
pub use events::{login_events, LoginEvents};
pub use promise::{login_async, PendingLogin};

impl LoginOutcome {
    /// The terminal event describing this outcome
    pub fn to_event(&self, operation: &Operation) -> LoginEvent {
        let operation = operation.clone();
        if let Some(error) = &self.error {
            return LoginEvent::Error {
                operation,
                critical: error.is_critical(),
                error: error.clone(),
            };
        }
        if self.cancelled {
            return LoginEvent::Cancelled {
                operation,
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| CancelReason::Requested("Operation cancelled".to_string())),
            };
        }
        match &self.session {
            Some(session) if self.success => LoginEvent::Success {
                operation,
                api: self.api.clone(),
                session: session.clone(),
            },
            _ => LoginEvent::Error {
                operation,
                critical: true,
                error: Arc::new(LoginFailure::critical(
                    LoginStep::Success,
                    LoginError::Session("login settled without a session context".to_string()),
                )),
            },
        }
    }
}

/// Run `flow` on the runtime, reporting through `domain`
pub fn spawn_login(mut flow: LoginFlow, domain: EventDomain<LoginEvent>) -> JoinHandle<LoginOutcome> {
    tokio::spawn(async move {
        let operation = flow.operation().clone();
        domain.emit(
            START,
            LoginEvent::Start {
                operation: operation.clone(),
                options: flow.options().clone(),
            },
        );

        flow.set_notifier(Arc::new(domain.clone()));
        let outcome = flow.run().await;

        let event = outcome.to_event(&operation);
        debug!("Login {} settled with '{}'", operation.id(), event.name());
        domain.emit(event.name(), event);
        outcome
    })
}

/// Deliver the first terminal event belonging to `operation` to `deliver`,
/// then drop all three subscriptions
pub(crate) fn on_terminal<F>(domain: &EventDomain<LoginEvent>, operation: &Operation, deliver: F)
where
    F: FnOnce(LoginEvent) + Send + 'static,
{
    let deliver = Arc::new(Mutex::new(Some(deliver)));
    let ids: Arc<Mutex<Vec<ListenerId>>> = Arc::new(Mutex::new(Vec::new()));

    for name in [SUCCESS, ERROR, CANCELLED] {
        let deliver = deliver.clone();
        let ids_for_handler = ids.clone();
        let operation = operation.clone();
        let unsubscribe = domain.clone();

        let id = domain.on(name, move |event: &LoginEvent| {
            if !event.is_terminal() || !event.belongs_to(&operation) {
                return;
            }
            let Some(deliver) = deliver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            else {
                return;
            };

            let registered: Vec<ListenerId> = ids_for_handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            for id in registered {
                unsubscribe.off(id);
            }
            deliver(event.clone());
        });
        ids.lock().unwrap_or_else(PoisonError::into_inner).push(id);
    }
}
