//! Capability plugins
//!
//! A [`Capability`] turns the per-session API client, the surface registered
//! so far and the session context into one named handler. The login flow
//! builds every capability it was given; one that fails to build is logged
//! and skipped.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::api::handler::{handler_fn, ApiSurface, SharedHandler};
use crate::config::LoginOptions;
use crate::error::{ApiError, ApiLoadError};
use crate::http::ApiClient;
use crate::session::token_store::{refresh_dtsg, TokenStore};
use crate::session::{CookieJar, UserSessionContext};

/// Always registered by the flow after capabilities load
pub const GET_APP_STATE: &str = "getAppState";

pub trait Capability: Send + Sync {
    /// Name the handler is registered under
    fn name(&self) -> &str;

    fn build(
        &self,
        client: &Arc<ApiClient>,
        surface: &ApiSurface,
        session: &Arc<UserSessionContext>,
    ) -> Result<SharedHandler, ApiLoadError>;
}

type BuildFn = dyn Fn(&Arc<ApiClient>, &ApiSurface, &Arc<UserSessionContext>) -> Result<SharedHandler, ApiLoadError>
    + Send
    + Sync;

/// Closure-backed capability
pub struct FnCapability {
    name: String,
    build: Box<BuildFn>,
}

impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        client: &Arc<ApiClient>,
        surface: &ApiSurface,
        session: &Arc<UserSessionContext>,
    ) -> Result<SharedHandler, ApiLoadError> {
        (self.build)(client, surface, session)
    }
}

impl fmt::Debug for FnCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCapability")
            .field("name", &self.name)
            .finish()
    }
}

/// Wrap a build closure as a capability
pub fn capability<F>(name: impl Into<String>, build: F) -> Arc<dyn Capability>
where
    F: Fn(&Arc<ApiClient>, &ApiSurface, &Arc<UserSessionContext>) -> Result<SharedHandler, ApiLoadError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnCapability {
        name: name.into(),
        build: Box::new(build),
    })
}

// =============================================================================
// Built-ins
// =============================================================================

/// `getCurrentUserID` - the logged-in user id
#[derive(Debug, Default)]
pub struct CurrentUserId;

impl Capability for CurrentUserId {
    fn name(&self) -> &str {
        "getCurrentUserID"
    }

    fn build(
        &self,
        _client: &Arc<ApiClient>,
        _surface: &ApiSurface,
        session: &Arc<UserSessionContext>,
    ) -> Result<SharedHandler, ApiLoadError> {
        let user_id = session.user_id.clone();
        Ok(handler_fn(move |_args: Value| {
            let user_id = user_id.clone();
            async move { Ok(Value::String(user_id)) }
        }))
    }
}

/// `getSessionInfo` - endpoint, region and identifiers of the session
#[derive(Debug, Default)]
pub struct SessionInfo;

impl Capability for SessionInfo {
    fn name(&self) -> &str {
        "getSessionInfo"
    }

    fn build(
        &self,
        _client: &Arc<ApiClient>,
        _surface: &ApiSurface,
        session: &Arc<UserSessionContext>,
    ) -> Result<SharedHandler, ApiLoadError> {
        let mut info = serde_json::to_value(session.as_ref()).map_err(|e| ApiLoadError::Build {
            name: self.name().to_string(),
            reason: e.to_string(),
        })?;
        // Token material has its own refresh path
        if let Some(map) = info.as_object_mut() {
            map.remove("fb_dtsg");
            map.remove("jazoest");
        }
        Ok(handler_fn(move |_args: Value| {
            let info = info.clone();
            async move { Ok(info) }
        }))
    }
}

/// `refreshDtsg` - fetch a new security token and install it on the client
#[derive(Debug, Default)]
pub struct RefreshDtsg {
    pub store: Option<TokenStore>,
}

impl Capability for RefreshDtsg {
    fn name(&self) -> &str {
        "refreshDtsg"
    }

    fn build(
        &self,
        client: &Arc<ApiClient>,
        _surface: &ApiSurface,
        _session: &Arc<UserSessionContext>,
    ) -> Result<SharedHandler, ApiLoadError> {
        let client = client.clone();
        let store = self.store.clone();
        Ok(handler_fn(move |_args: Value| {
            let client = client.clone();
            let store = store.clone();
            async move {
                let tokens = refresh_dtsg(&client, store.as_ref()).await?;
                Ok(json!({ "fb_dtsg": tokens.fb_dtsg, "jazoest": tokens.jazoest }))
            }
        }))
    }
}

/// `getAppState` handler: the jar's current platform cookies
pub fn app_state_handler(jar: Arc<CookieJar>) -> SharedHandler {
    handler_fn(move |_args: Value| {
        let jar = jar.clone();
        async move { serde_json::to_value(jar.snapshot()).map_err(ApiError::from) }
    })
}

/// Built-in catalog for `options`
pub fn default_capabilities(options: &LoginOptions) -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(CurrentUserId),
        Arc::new(SessionInfo),
        Arc::new(RefreshDtsg {
            store: options.token_store(),
        }),
    ]
}
