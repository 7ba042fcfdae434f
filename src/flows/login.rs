//! Login Flow
//!
//! Step-by-step session bootstrap:
//!
//! ```text
//! cookies -> get_html -> build_session_context -> create_api_client
//!         -> load_api_functions -> success
//! ```
//!
//! Before each step the flow reports `progress` to its notifier and then
//! checks its [`Operation`]. A cancelled operation stops the flow with
//! [`Settled::Cancelled`]; that is a normal outcome, not an error. Errors are
//! tagged with the step they happened in.
//!
//! Cancellation is cooperative: an in-flight request is never aborted, its
//! result is discarded at the next check.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::api::capabilities::{app_state_handler, default_capabilities, GET_APP_STATE};
use crate::api::{ApiRegistry, ApiSurface, Capability, SharedHandler};
use crate::config::LoginOptions;
use crate::error::{ApiLoadError, LoginError, LoginFailure, RegistryError, TransportError};
use crate::http::{
    default_headers, platform_url, resolve_user_agent, ApiClient, HttpRequest, HttpTransport,
    ReqwestTransport,
};
use crate::runtime::events::PROGRESS;
use crate::runtime::{CancelReason, EventSink, LoginEvent, LoginStep, Operation};
use crate::session::{CookieInput, CookieJar, PageScraper, SessionScraper, UserSessionContext};

/// Either the step's value or the reason the flow stopped
#[derive(Debug)]
pub enum Settled<T> {
    Completed(T),
    Cancelled(CancelReason),
}

type Step<T> = Result<Settled<T>, LoginError>;

/// Result of [`LoginFlow::run`]
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub success: bool,
    /// Registered surface; may be partial when the flow failed late
    pub api: ApiSurface,
    pub session: Option<Arc<UserSessionContext>>,
    pub error: Option<Arc<LoginFailure>>,
    pub cancelled: bool,
    pub reason: Option<CancelReason>,
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`LoginFlow`]; every collaborator has a default
pub struct LoginFlowBuilder {
    cookie: CookieInput,
    options: LoginOptions,
    operation: Option<Operation>,
    transport: Option<Arc<dyn HttpTransport>>,
    scraper: Option<Arc<dyn SessionScraper>>,
    capabilities: Option<Vec<Arc<dyn Capability>>>,
    extra_capabilities: Vec<Arc<dyn Capability>>,
    notifier: Option<Arc<dyn EventSink<LoginEvent>>>,
}

impl LoginFlowBuilder {
    pub fn new(cookie: impl Into<CookieInput>) -> Self {
        Self {
            cookie: cookie.into(),
            options: LoginOptions::default(),
            operation: None,
            transport: None,
            scraper: None,
            capabilities: None,
            extra_capabilities: Vec::new(),
            notifier: None,
        }
    }

    pub fn options(mut self, options: LoginOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options_ref(&self) -> &LoginOptions {
        &self.options
    }

    /// Use an externally owned operation instead of a fresh one
    pub fn operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn scraper(mut self, scraper: Arc<dyn SessionScraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    /// Replace the built-in capability catalog
    pub fn capabilities(mut self, capabilities: Vec<Arc<dyn Capability>>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Add one capability on top of the catalog
    pub fn capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.extra_capabilities.push(capability);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn EventSink<LoginEvent>>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<LoginFlow, LoginFailure> {
        self.options.validate().map_err(LoginFailure::setup)?;

        let operation = self
            .operation
            .unwrap_or_else(|| Operation::with_timeout(self.options.timeout()));

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(&self.options.effective_http_settings())
                    .map_err(|e| LoginFailure::setup(e.into()))?,
            ),
        };

        let scraper: Arc<dyn SessionScraper> = match self.scraper {
            Some(scraper) => scraper,
            None => Arc::new(PageScraper::new().map_err(LoginFailure::setup)?),
        };

        let mut capabilities = self
            .capabilities
            .unwrap_or_else(|| default_capabilities(&self.options));
        capabilities.extend(self.extra_capabilities);

        let user_agent = resolve_user_agent(&self.options);
        let registry = ApiRegistry::new();
        let api = registry.expose();

        Ok(LoginFlow {
            cookie: self.cookie,
            options: Arc::new(self.options),
            operation,
            jar: Arc::new(CookieJar::new()),
            transport,
            scraper,
            capabilities,
            registry,
            api,
            session: None,
            api_client: None,
            notifier: self.notifier,
            user_agent,
        })
    }
}

// =============================================================================
// Flow
// =============================================================================

pub struct LoginFlow {
    cookie: CookieInput,
    options: Arc<LoginOptions>,
    operation: Operation,
    jar: Arc<CookieJar>,
    transport: Arc<dyn HttpTransport>,
    scraper: Arc<dyn SessionScraper>,
    capabilities: Vec<Arc<dyn Capability>>,
    registry: ApiRegistry,
    api: ApiSurface,
    session: Option<Arc<UserSessionContext>>,
    api_client: Option<Arc<ApiClient>>,
    notifier: Option<Arc<dyn EventSink<LoginEvent>>>,
    user_agent: String,
}

impl LoginFlow {
    pub fn builder(cookie: impl Into<CookieInput>) -> LoginFlowBuilder {
        LoginFlowBuilder::new(cookie)
    }

    /// Flow with default collaborators
    pub fn new(cookie: impl Into<CookieInput>, options: LoginOptions) -> Result<Self, LoginFailure> {
        LoginFlowBuilder::new(cookie).options(options).build()
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn options(&self) -> &Arc<LoginOptions> {
        &self.options
    }

    /// Current read-only surface
    pub fn api(&self) -> ApiSurface {
        self.api.clone()
    }

    pub fn session(&self) -> Option<Arc<UserSessionContext>> {
        self.session.clone()
    }

    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    /// Report progress to `notifier` from now on
    pub fn set_notifier(&mut self, notifier: Arc<dyn EventSink<LoginEvent>>) {
        self.notifier = Some(notifier);
    }

    // =========================================================================
    // Registry surface
    // =========================================================================

    pub fn add_api(&mut self, name: &str, handler: SharedHandler) -> Result<(), RegistryError> {
        self.registry.add(name, handler)?;
        self.api = self.registry.expose();
        Ok(())
    }

    pub fn remove_api(&mut self, name: &str) -> Result<(), RegistryError> {
        self.registry.delete(name)?;
        self.api = self.registry.expose();
        Ok(())
    }

    pub fn get_api(&self, name: &str) -> Option<SharedHandler> {
        self.registry.get(name)
    }

    pub fn extend<F>(&mut self, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&ApiSurface, &mut ApiRegistry) -> Result<(), RegistryError>,
    {
        self.registry.extend(f)?;
        self.api = self.registry.expose();
        Ok(())
    }

    pub fn seal(&mut self) {
        self.registry.seal();
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Drive every step and settle the operation
    pub async fn run(&mut self) -> LoginOutcome {
        info!("Logging in (operation {})", self.operation.id());

        match self.drive().await {
            Ok(Settled::Completed(session)) => {
                self.operation.finish();
                info!(
                    "Logged in as {} with {} API functions",
                    session.user_id,
                    self.api.len()
                );
                LoginOutcome {
                    success: true,
                    api: self.api.clone(),
                    session: Some(session),
                    error: None,
                    cancelled: false,
                    reason: None,
                }
            }
            Ok(Settled::Cancelled(reason)) => {
                warn!("Login cancelled: {}", reason);
                LoginOutcome {
                    success: false,
                    api: self.api.clone(),
                    session: self.session.clone(),
                    error: None,
                    cancelled: true,
                    reason: Some(reason),
                }
            }
            Err(failure) => {
                self.operation.finish();
                error!("{}", failure);
                LoginOutcome {
                    success: false,
                    api: self.api.clone(),
                    session: self.session.clone(),
                    error: Some(Arc::new(failure)),
                    cancelled: false,
                    reason: None,
                }
            }
        }
    }

    /// Report `step`, then stop if the operation was cancelled
    fn gate(&self, step: LoginStep) -> Option<CancelReason> {
        debug!("Login step: {}", step);
        if let Some(notifier) = &self.notifier {
            notifier.emit_event(
                PROGRESS,
                LoginEvent::Progress {
                    operation: self.operation.clone(),
                    step,
                },
            );
        }
        self.operation.reason()
    }

    async fn drive(&mut self) -> Result<Settled<Arc<UserSessionContext>>, LoginFailure> {
        let tag = |step: LoginStep| move |e: LoginError| LoginFailure::critical(step, e);

        if let Some(reason) = self.gate(LoginStep::Cookies) {
            return Ok(Settled::Cancelled(reason));
        }
        self.apply_cookies().map_err(tag(LoginStep::Cookies))?;

        if let Some(reason) = self.gate(LoginStep::GetHtml) {
            return Ok(Settled::Cancelled(reason));
        }
        let html = match self.fetch_html().await.map_err(tag(LoginStep::GetHtml))? {
            Settled::Completed(html) => html,
            Settled::Cancelled(reason) => return Ok(Settled::Cancelled(reason)),
        };

        if let Some(reason) = self.gate(LoginStep::BuildSessionContext) {
            return Ok(Settled::Cancelled(reason));
        }
        let session = match self
            .build_session_context(&html)
            .await
            .map_err(tag(LoginStep::BuildSessionContext))?
        {
            Settled::Completed(session) => session,
            Settled::Cancelled(reason) => return Ok(Settled::Cancelled(reason)),
        };

        if let Some(reason) = self.gate(LoginStep::CreateApiClient) {
            return Ok(Settled::Cancelled(reason));
        }
        self.create_api_client(session.clone())
            .map_err(tag(LoginStep::CreateApiClient))?;

        if let Some(reason) = self.gate(LoginStep::LoadApiFunctions) {
            return Ok(Settled::Cancelled(reason));
        }
        self.load_api_functions()
            .map_err(tag(LoginStep::LoadApiFunctions))?;

        if let Some(reason) = self.gate(LoginStep::Success) {
            return Ok(Settled::Cancelled(reason));
        }
        Ok(Settled::Completed(session))
    }

    // =========================================================================
    // Steps
    // =========================================================================

    fn apply_cookies(&mut self) -> Result<(), LoginError> {
        let cookies = self.cookie.normalize()?;
        self.jar.inject(cookies);
        Ok(())
    }

    async fn fetch_html(&self) -> Step<String> {
        let url = platform_url("");
        let mut headers = default_headers(&url, &self.user_agent, None, true);
        if let Some(cookie) = self.jar.header_for(&url) {
            headers.push(("cookie".to_string(), cookie));
        }

        let response = self
            .transport
            .get(HttpRequest::new(url).headers(headers))
            .await?;

        // The request ran to completion; drop its result if we were cancelled meanwhile
        if let Some(reason) = self.operation.reason() {
            return Ok(Settled::Cancelled(reason));
        }

        if response.status_code >= 400 {
            return Err(TransportError::Status {
                status: response.status_code,
                url: response.url,
            }
            .into());
        }

        self.jar
            .store_set_cookies(response.set_cookies(), &response.url);
        Ok(Settled::Completed(response.body))
    }

    async fn build_session_context(&mut self, html: &str) -> Step<Arc<UserSessionContext>> {
        let user_id = self
            .scraper
            .user_id(&self.jar)
            .ok_or(LoginError::UserIdMissing)?;

        if self.scraper.is_checkpoint(html) {
            warn!("Checkpoint detected, log in with a browser to verify");
            return Err(LoginError::Checkpoint);
        }

        let mut session =
            self.scraper
                .build_session_context(html, self.jar.clone(), user_id, &self.options)?;

        let store = if session.tokens.is_empty() {
            self.options.token_store()
        } else {
            None
        };
        if let Some(store) = store {
            match store.load(&session.user_id).await {
                Ok(Some(tokens)) => {
                    info!("Using stored security token for {}", session.user_id);
                    session.tokens = tokens;
                }
                Ok(None) => {}
                Err(e) => warn!("Could not read token store: {}", e),
            }
            if let Some(reason) = self.operation.reason() {
                return Ok(Settled::Cancelled(reason));
            }
        }

        let session = Arc::new(session);
        self.session = Some(session.clone());
        Ok(Settled::Completed(session))
    }

    fn create_api_client(&mut self, session: Arc<UserSessionContext>) -> Result<(), LoginError> {
        let client = self.scraper.create_api_client(
            self.transport.clone(),
            session,
            self.user_agent.clone(),
        )?;
        self.api_client = Some(Arc::new(client));
        Ok(())
    }

    fn load_api_functions(&mut self) -> Result<(), LoginError> {
        let client = self.api_client.clone().ok_or_else(|| {
            LoginError::ApiClient("API client is missing, cannot load API functions".to_string())
        })?;
        let session = self
            .session
            .clone()
            .ok_or_else(|| LoginError::Session("session context is missing".to_string()))?;

        let surface = self.registry.expose();
        let mut loaded = 0;
        for capability in &self.capabilities {
            let name = capability.name().to_string();
            let result = capability
                .build(&client, &surface, &session)
                .and_then(|handler| {
                    self.registry
                        .add(&name, handler)
                        .map_err(|source| ApiLoadError::Register {
                            name: name.clone(),
                            source,
                        })
                });
            match result {
                Ok(()) => loaded += 1,
                Err(e) => error!("Failed to load API function {}: {}", name, e),
            }
        }
        debug!("Loaded {}/{} API functions", loaded, self.capabilities.len());

        match self
            .registry
            .add(GET_APP_STATE, app_state_handler(self.jar.clone()))
        {
            Ok(()) => {}
            Err(RegistryError::AlreadyExists(_)) => {
                warn!("{} was supplied by a capability, keeping it", GET_APP_STATE)
            }
            Err(e) => return Err(e.into()),
        }

        self.api = self.registry.expose();
        Ok(())
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow")
            .field("operation", &self.operation)
            .field("api", &self.api)
            .finish()
    }
}
