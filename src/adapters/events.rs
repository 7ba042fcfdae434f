//! Event-stream adapter
//!
//! Hands the caller a private bus with the `login` domain already created.
//! The flow starts on the runtime immediately, so events emitted before the
//! caller subscribes are only reachable through `replay` or `last`.

use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapters::spawn_login;
use crate::error::LoginFailure;
use crate::flows::{LoginFlowBuilder, LoginOutcome};
use crate::runtime::events::{CANCELLED, ERROR, PROGRESS, START, SUCCESS};
use crate::runtime::{EventBus, EventDomain, ListenerId, LoginEvent, Operation, LOGIN_DOMAIN};

/// A running login and the bus it reports on
#[derive(Debug)]
pub struct LoginEvents {
    pub bus: EventBus<LoginEvent>,
    pub login: EventDomain<LoginEvent>,
    operation: Operation,
    task: Option<JoinHandle<LoginOutcome>>,
}

struct StreamState {
    rx: mpsc::UnboundedReceiver<LoginEvent>,
    login: EventDomain<LoginEvent>,
    ids: Vec<ListenerId>,
    done: bool,
}

impl StreamState {
    fn release(&mut self) {
        for id in self.ids.drain(..) {
            self.login.off(id);
        }
    }
}

impl LoginEvents {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn cancel(&self) -> bool {
        self.operation.cancel()
    }

    /// Wait for the flow to settle.
    ///
    /// Returns `None` on the second call or if the task panicked.
    pub async fn finished(&mut self) -> Option<LoginOutcome> {
        let task = self.task.take()?;
        task.await.ok()
    }

    /// This login's events from now on, ending after the terminal one.
    ///
    /// A login that has already settled yields only its terminal event.
    pub fn stream(&self) -> impl Stream<Item = LoginEvent> + Send + 'static {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ids = Vec::new();

        for name in [START, PROGRESS, SUCCESS, ERROR, CANCELLED] {
            let tx = tx.clone();
            let operation = self.operation.clone();
            ids.push(self.login.on(name, move |event: &LoginEvent| {
                if event.belongs_to(&operation) {
                    let _ = tx.send(event.clone());
                }
            }));
        }

        // Settled before we subscribed: the history still holds the outcome
        let settled = [SUCCESS, ERROR, CANCELLED]
            .into_iter()
            .filter_map(|name| self.login.last(name))
            .find(|event| event.belongs_to(&self.operation));
        if let Some(event) = settled {
            let _ = tx.send(event);
        }

        let state = StreamState {
            rx,
            login: self.login.clone(),
            ids,
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            let event = state.rx.recv().await?;
            if event.is_terminal() {
                state.done = true;
                state.release();
            }
            Some((event, state))
        })
    }
}

/// Start a login that reports only through its event bus
pub fn login_events(builder: LoginFlowBuilder) -> Result<LoginEvents, LoginFailure> {
    let bus = EventBus::with_observability(builder.options_ref().observability);
    let flow = builder.build()?;

    let operation = flow.operation().clone();
    let login = bus.ensure_domain(LOGIN_DOMAIN);
    let task = spawn_login(flow, login.clone());

    Ok(LoginEvents {
        bus,
        login,
        operation,
        task: Some(task),
    })
}
