//! fca-core - session bootstrap for an unofficial chat client
//!
//! Establishes an authenticated web session from supplied cookies, derives the
//! security tokens and identifiers the platform expects, and registers a set of
//! callable API functions behind a frozen capability surface.
//!
//! ## Building blocks
//!
//! - **Operation**: cancellable, optionally time-bounded unit of work
//! - **EventBus / EventDomain**: namespaced publish/subscribe with replay,
//!   cancellable subscriptions and an observability hook
//! - **ApiRegistry**: name -> handler map with seal/extend semantics
//! - **LoginFlow**: the step-by-step session bootstrap state machine
//! - **Adapters**: future, callback and event-stream front ends over the flow
//!
//! ## Example
//!
//! ```rust,no_run
//! use fca_core::{adapters, LoginFlow, LoginOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let builder = LoginFlow::builder("c_user=100000000000001; xs=secret")
//!     .options(LoginOptions::default());
//!
//! let api = adapters::login_async(builder).await?;
//! let me = api.call("getCurrentUserID", serde_json::Value::Null).await?;
//! println!("logged in as {}", me);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod flows;
pub mod http;
pub mod logging;
pub mod runtime;
pub mod session;

pub use api::{handler_fn, ApiHandler, ApiRegistry, ApiSurface, Capability};
pub use config::{Args, HttpClientSettings, LoginOptions};
pub use error::{
    ApiError, ApiLoadError, BusError, LoginError, LoginFailure, LoginRejected, RegistryError,
    TransportError,
};
pub use flows::{LoginFlow, LoginFlowBuilder, LoginOutcome};
pub use runtime::{
    CancelReason, EventBus, EventDomain, EventKey, EventSink, LoginEvent, LoginStep, Operation,
    OperationStatus,
};
pub use session::{CookieInput, CookieJar, UserSessionContext};
