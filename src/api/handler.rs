//! Handler trait and the frozen surface handed to callers

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;

pub type ApiResult = Result<Value, ApiError>;

/// A single callable API function
#[async_trait]
pub trait ApiHandler: Send + Sync {
    async fn call(&self, args: Value) -> ApiResult;
}

pub type SharedHandler = Arc<dyn ApiHandler>;

/// Adapter turning an async closure into an [`ApiHandler`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ApiHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult> + Send + 'static,
{
    async fn call(&self, args: Value) -> ApiResult {
        (self.f)(args).await
    }
}

/// Wrap an async closure as a shared handler
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Read-only snapshot of registered handlers.
///
/// Produced by [`ApiRegistry::expose`](super::ApiRegistry::expose). Later
/// registry mutations are not visible through an existing surface.
#[derive(Clone, Default)]
pub struct ApiSurface {
    handlers: Arc<BTreeMap<String, SharedHandler>>,
}

impl ApiSurface {
    pub(crate) fn from_map(handlers: BTreeMap<String, SharedHandler>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    pub fn get(&self, name: &str) -> Option<SharedHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke a handler by name
    pub async fn call(&self, name: &str, args: Value) -> ApiResult {
        let handler = self
            .get(name)
            .ok_or_else(|| ApiError::NotFound(name.to_string()))?;
        handler.call(args).await
    }
}

impl fmt::Debug for ApiSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSurface")
            .field("names", &self.names())
            .finish()
    }
}
