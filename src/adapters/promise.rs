//! Future-style adapter
//!
//! ```rust,no_run
//! # use fca_core::{adapters, LoginFlow};
//! # async fn example() -> Result<(), fca_core::LoginRejected> {
//! let pending = adapters::login_async(LoginFlow::builder("c_user=1; xs=2"));
//! let operation = pending.operation().clone();
//! // operation.cancel() from anywhere rejects with LoginRejected::Cancelled
//! let api = pending.await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::adapters::{on_terminal, spawn_login};
use crate::api::ApiSurface;
use crate::error::LoginRejected;
use crate::flows::{LoginFlowBuilder, LoginOutcome};
use crate::runtime::{EventBus, LoginEvent, Operation, LOGIN_DOMAIN};

type Settlement = Result<ApiSurface, LoginRejected>;

/// A login in flight. Resolves to the API surface or the rejection.
#[must_use = "the login runs regardless, but its result is lost unless awaited"]
pub struct PendingLogin {
    operation: Operation,
    rx: oneshot::Receiver<Settlement>,
    task: Option<JoinHandle<LoginOutcome>>,
}

impl PendingLogin {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Request cancellation; the future then rejects with `Cancelled`
    pub fn cancel(&self) -> bool {
        self.operation.cancel()
    }
}

impl Future for PendingLogin {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(settled) = Pin::new(&mut this.rx).poll(cx) {
            return Poll::Ready(settled.unwrap_or(Err(LoginRejected::Abandoned)));
        }

        // The terminal event is delivered before the task returns, so a
        // finished task with an empty channel means it never got there.
        if let Some(task) = this.task.as_mut() {
            if Pin::new(task).poll(cx).is_ready() {
                this.task = None;
                return Poll::Ready(
                    this.rx
                        .try_recv()
                        .unwrap_or(Err(LoginRejected::Abandoned)),
                );
            }
        }
        Poll::Pending
    }
}

/// Start a login and return a future for its result
pub fn login_async(builder: LoginFlowBuilder) -> PendingLogin {
    let (tx, rx) = oneshot::channel();

    let flow = match builder.build() {
        Ok(flow) => flow,
        Err(failure) => {
            let operation = Operation::new();
            operation.finish();
            let _ = tx.send(Err(LoginRejected::Failed(Arc::new(failure))));
            return PendingLogin {
                operation,
                rx,
                task: None,
            };
        }
    };

    let operation = flow.operation().clone();
    let bus: EventBus<LoginEvent> = EventBus::with_observability(flow.options().observability);
    let login = bus.ensure_domain(LOGIN_DOMAIN);

    on_terminal(&login, &operation, move |event| {
        let settled = match event {
            LoginEvent::Success { api, .. } => Ok(api),
            LoginEvent::Error { error, .. } => Err(LoginRejected::Failed(error)),
            LoginEvent::Cancelled { reason, .. } => Err(LoginRejected::Cancelled(reason)),
            _ => Err(LoginRejected::Abandoned),
        };
        let _ = tx.send(settled);
    });

    let task = spawn_login(flow, login);
    PendingLogin {
        operation,
        rx,
        task: Some(task),
    }
}
