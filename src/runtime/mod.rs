//! Coordination primitives shared by the login flow and its adapters
//!
//! - [`Operation`]: cancellable, optionally time-bounded unit of work
//! - [`EventBus`] / [`EventDomain`]: namespaced dispatch with history replay
//! - [`LoginEvent`]: the payload carried on the `login` domain

pub mod bus;
pub mod events;
pub mod operation;

pub use bus::{
    Emission, EventBus, EventDomain, EventKey, EventSink, ListenerFailure, ListenerId,
    ListenerOutcome, ListenerResult, SubscriptionCancelled,
};
pub use events::{LoginEvent, LoginStep, LOGIN_DOMAIN};
pub use operation::{
    CancelReason, Operation, OperationId, OperationStatus, DEFAULT_LOGIN_TIMEOUT,
};
