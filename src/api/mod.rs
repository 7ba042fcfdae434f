//! Callable API surface
//!
//! Handlers are registered into an [`ApiRegistry`] during login and exposed
//! to callers through a read-only [`ApiSurface`] snapshot.

pub mod capabilities;
pub mod handler;
pub mod registry;

pub use capabilities::{
    capability, default_capabilities, Capability, CurrentUserId, RefreshDtsg, SessionInfo,
    GET_APP_STATE,
};
pub use handler::{handler_fn, ApiHandler, ApiResult, ApiSurface, SharedHandler};
pub use registry::ApiRegistry;
