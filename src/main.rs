//! fca-login - bootstrap a chat session from exported cookies
//!
//! Runs the login flow once, logs each step, and prints the registered API
//! functions. Ctrl-C cancels the login in flight.

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};

use fca_core::adapters::login_events;
use fca_core::config::Args;
use fca_core::runtime::events::PROGRESS;
use fca_core::{logging, CookieInput, LoginEvent, LoginFlow};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  fca-login");
    info!("======================================");
    info!("Timeout: {}ms", args.timeout_ms);
    info!("Proxy: {}", args.proxy.as_deref().unwrap_or("none"));
    info!("Observability: {}", args.observability);
    info!("======================================");

    let raw = args.load_cookie().context("Failed to read cookie input")?;
    let cookie = CookieInput::parse(&raw).context("Failed to parse cookie input")?;

    let builder = LoginFlow::builder(cookie).options(args.login_options());
    let mut login = login_events(builder).context("Failed to start login")?;

    login.login.replay(PROGRESS, |event: &LoginEvent| {
        if let LoginEvent::Progress { step, .. } = event {
            info!("Step: {}", step);
        }
    });
    if login.bus.is_observable() {
        login.bus.on_any(|emission| debug!("Event {}", emission.name));
    }

    let operation = login.operation().clone();
    let finished = login.finished();
    tokio::pin!(finished);

    let outcome = tokio::select! {
        outcome = &mut finished => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received interrupt, cancelling login");
            operation.cancel();
            finished.await
        }
    };

    let Some(outcome) = outcome else {
        error!("Login task ended unexpectedly");
        std::process::exit(1);
    };

    if let Some(failure) = &outcome.error {
        error!("Login failed: {}", failure);
        std::process::exit(1);
    }
    if let Some(reason) = &outcome.reason {
        warn!("Login cancelled: {}", reason);
        std::process::exit(2);
    }

    if let Some(session) = &outcome.session {
        info!("User: {}", session.user_id);
        info!("Region: {}", session.region);
    }
    info!("API functions ({}):", outcome.api.len());
    for name in outcome.api.names() {
        info!("  {}", name);
    }

    Ok(())
}
