//! Event Bus
//!
//! Synchronous publish/subscribe with per-event history, namespaced domains,
//! cancellable subscriptions and an opt-in wildcard observability channel.
//!
//! ## Keys
//!
//! ```text
//! EventKey { domain: None,          name: "ready" }   -> "ready"
//! EventKey { domain: Some("login"), name: "start" }   -> "login.start"
//! ```
//!
//! The human-readable name is part of the key itself, so there is no separate
//! name table that could drift out of sync with the listener map.
//!
//! ## Dispatch
//!
//! `emit` records the payload in history, snapshots the listener list under the
//! lock, then runs listeners outside the lock in subscription order. Listeners
//! may therefore subscribe, unsubscribe or emit from inside a callback.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::BusError;

/// Result returned by fallible listeners
pub type ListenerResult = Result<(), Box<dyn StdError + Send + Sync>>;

/// What a listener closure may return: `()` or a `Result`
pub trait ListenerOutcome {
    fn into_result(self) -> ListenerResult;
}

impl ListenerOutcome for () {
    fn into_result(self) -> ListenerResult {
        Ok(())
    }
}

impl<E> ListenerOutcome for Result<(), E>
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    fn into_result(self) -> ListenerResult {
        self.map_err(Into::into)
    }
}

/// Handle for removing a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// =============================================================================
// Event Keys
// =============================================================================

/// Interned event identity, optionally scoped to a domain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    domain: Option<Arc<str>>,
    name: Arc<str>,
}

impl EventKey {
    /// Key on the bus root (no domain)
    pub fn root(name: &str) -> Self {
        Self {
            domain: None,
            name: Arc::from(name),
        }
    }

    /// Key namespaced under `domain`
    pub fn scoped(domain: &str, name: &str) -> Self {
        Self {
            domain: Some(Arc::from(domain)),
            name: Arc::from(name),
        }
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Short name without the domain prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `domain.name`, or just `name` on the root
    pub fn full_name(&self) -> String {
        self.to_string()
    }

    /// Another key in the same domain
    pub fn sibling(&self, name: &str) -> Self {
        Self {
            domain: self.domain.clone(),
            name: Arc::from(name),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}.{}", domain, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for EventKey {
    fn from(name: &str) -> Self {
        EventKey::root(name)
    }
}

impl From<&EventKey> for EventKey {
    fn from(key: &EventKey) -> Self {
        key.clone()
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// Wildcard descriptor delivered to `on_any` listeners
#[derive(Debug)]
pub struct Emission<'a, P> {
    pub event: &'a EventKey,
    pub name: String,
    pub args: &'a P,
}

/// A listener returned an error while handling `event`
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub event: EventKey,
    pub message: String,
}

/// Emitted on the `cancelled` sibling key when a cancellable subscription is
/// torn down by its signal
#[derive(Debug, Clone)]
pub struct SubscriptionCancelled {
    pub event: EventKey,
    pub signal: CancellationToken,
    pub time: DateTime<Utc>,
}

// =============================================================================
// Bus State
// =============================================================================

type Handler<P> = Arc<dyn Fn(&P) -> ListenerResult + Send + Sync>;
type AnyHandler<P> = Arc<dyn Fn(&Emission<'_, P>) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&ListenerFailure) + Send + Sync>;

struct Listener<P> {
    id: ListenerId,
    once: bool,
    handler: Handler<P>,
}

/// Per-domain key cache: one key per short name, stable for the domain's life
struct DomainKeys {
    name: Arc<str>,
    keys: Mutex<HashMap<String, EventKey>>,
}

impl DomainKeys {
    fn key(&self, name: &str) -> EventKey {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.entry(name.to_string())
            .or_insert_with(|| EventKey {
                domain: Some(self.name.clone()),
                name: Arc::from(name),
            })
            .clone()
    }
}

struct BusState<P> {
    listeners: HashMap<EventKey, Vec<Listener<P>>>,
    history: HashMap<EventKey, P>,
    any: Vec<(ListenerId, AnyHandler<P>)>,
    errors: Vec<(ListenerId, ErrorHandler)>,
    domains: HashMap<String, Arc<DomainKeys>>,
}

impl<P> Default for BusState<P> {
    fn default() -> Self {
        Self {
            listeners: HashMap::new(),
            history: HashMap::new(),
            any: Vec::new(),
            errors: Vec::new(),
            domains: HashMap::new(),
        }
    }
}

struct BusInner<P> {
    state: Mutex<BusState<P>>,
    observability: AtomicBool,
    next_id: AtomicU64,
}

// =============================================================================
// Event Bus
// =============================================================================

/// Shared event bus. Clones refer to the same listener table and history.
pub struct EventBus<P> {
    inner: Arc<BusInner<P>>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("observability", &self.is_observable())
            .finish()
    }
}

impl<P> Default for EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventBus<P> {
    fn state(&self) -> MutexGuard<'_, BusState<P>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_observable(&self) -> bool {
        self.inner.observability.load(Ordering::Acquire)
    }
}

impl<P> EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                observability: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a bus with the wildcard channel already enabled or disabled
    pub fn with_observability(enabled: bool) -> Self {
        let bus = Self::new();
        bus.inner.observability.store(enabled, Ordering::Release);
        bus
    }

    pub fn enable_observability(&self) {
        self.inner.observability.store(true, Ordering::Release);
    }

    pub fn disable_observability(&self) {
        self.inner.observability.store(false, Ordering::Release);
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    fn subscribe(&self, key: EventKey, once: bool, handler: Handler<P>) -> ListenerId {
        let id = self.next_id();
        self.state()
            .listeners
            .entry(key)
            .or_default()
            .push(Listener { id, once, handler });
        id
    }

    /// Subscribe for every future emission of `event`
    pub fn on<K, F, R>(&self, event: K, handler: F) -> ListenerId
    where
        K: Into<EventKey>,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        self.subscribe(
            event.into(),
            false,
            Arc::new(move |payload: &P| handler(payload).into_result()),
        )
    }

    /// Subscribe for the next emission of `event` only
    pub fn once<K, F, R>(&self, event: K, handler: F) -> ListenerId
    where
        K: Into<EventKey>,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        self.subscribe(
            event.into(),
            true,
            Arc::new(move |payload: &P| handler(payload).into_result()),
        )
    }

    /// Remove a subscription. Returns true if it was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut state = self.state();
        let mut removed = false;
        state.listeners.retain(|_, listeners| {
            if let Some(pos) = listeners.iter().position(|l| l.id == id) {
                listeners.remove(pos);
                removed = true;
            }
            !listeners.is_empty()
        });
        removed
    }

    /// Deliver the last recorded payload (if any), then keep listening.
    ///
    /// The listener is registered under the same lock that reads history, so
    /// an emission racing with this call is seen either as the replayed value
    /// or as a live delivery, never both.
    pub fn replay<K, F, R>(&self, event: K, handler: F) -> ListenerId
    where
        K: Into<EventKey>,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        let key = event.into();
        let handler: Handler<P> = Arc::new(move |payload: &P| handler(payload).into_result());
        let id = self.next_id();

        let last = {
            let mut state = self.state();
            let last = state.history.get(&key).cloned();
            state
                .listeners
                .entry(key.clone())
                .or_default()
                .push(Listener {
                    id,
                    once: false,
                    handler: handler.clone(),
                });
            last
        };

        if let Some(payload) = last {
            if let Err(e) = handler(&payload) {
                self.report_failure(&key, e);
            }
        }
        id
    }

    /// Last payload recorded for `event`
    pub fn last<K: Into<EventKey>>(&self, event: K) -> Option<P> {
        self.state().history.get(&event.into()).cloned()
    }

    /// Number of listeners currently attached to `event`
    pub fn listener_count<K: Into<EventKey>>(&self, event: K) -> usize {
        self.state()
            .listeners
            .get(&event.into())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Subscribe to the wildcard channel (only fed while observability is on)
    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Emission<'_, P>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.state().any.push((id, Arc::new(handler)));
        id
    }

    pub fn off_any(&self, id: ListenerId) -> bool {
        let mut state = self.state();
        let before = state.any.len();
        state.any.retain(|(lid, _)| *lid != id);
        state.any.len() != before
    }

    /// Subscribe to listener failures
    pub fn on_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ListenerFailure) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.state().errors.push((id, Arc::new(handler)));
        id
    }

    pub fn off_error(&self, id: ListenerId) -> bool {
        let mut state = self.state();
        let before = state.errors.len();
        state.errors.retain(|(lid, _)| *lid != id);
        state.errors.len() != before
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Record `payload` and run listeners in subscription order.
    ///
    /// Returns whether any listener ran. A failing listener is reported on the
    /// error channel and does not stop the ones after it.
    pub fn emit<K: Into<EventKey>>(&self, event: K, payload: P) -> bool {
        let key = event.into();

        let (handlers, any) = {
            let mut state = self.state();
            state.history.insert(key.clone(), payload.clone());

            let mut handlers = Vec::new();
            let mut drained = false;
            if let Some(listeners) = state.listeners.get_mut(&key) {
                handlers.extend(listeners.iter().map(|l| l.handler.clone()));
                listeners.retain(|l| !l.once);
                drained = listeners.is_empty();
            }
            if drained {
                state.listeners.remove(&key);
            }

            let any: Vec<AnyHandler<P>> = if self.is_observable() {
                state.any.iter().map(|(_, h)| h.clone()).collect()
            } else {
                Vec::new()
            };
            (handlers, any)
        };

        for handler in &handlers {
            if let Err(e) = handler(&payload) {
                self.report_failure(&key, e);
            }
        }

        if !any.is_empty() {
            let emission = Emission {
                event: &key,
                name: key.full_name(),
                args: &payload,
            };
            for handler in &any {
                handler(&emission);
            }
        }

        !handlers.is_empty()
    }

    fn report_failure(&self, key: &EventKey, error: Box<dyn StdError + Send + Sync>) {
        let failure = ListenerFailure {
            event: key.clone(),
            message: error.to_string(),
        };

        let handlers: Vec<ErrorHandler> =
            self.state().errors.iter().map(|(_, h)| h.clone()).collect();

        if handlers.is_empty() {
            warn!("Listener for '{}' failed: {}", key, failure.message);
            return;
        }
        for handler in handlers {
            handler(&failure);
        }
    }

    // =========================================================================
    // Timed and cancellable subscriptions
    // =========================================================================

    /// Wait for the next emission of `event`, or fail after `timeout`.
    ///
    /// The listener is removed on both paths, and when the future is dropped
    /// before either.
    pub async fn once_with_timeout<K: Into<EventKey>>(
        &self,
        event: K,
        timeout: Duration,
    ) -> Result<P, BusError> {
        let key = event.into();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let id = self.once(key.clone(), move |payload: &P| {
            let sender = tx.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(payload.clone());
            }
        });
        let _unsubscribe = Unsubscribe { bus: self, id };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(BusError::Closed(key.full_name())),
            Err(_) => Err(BusError::Timeout {
                event: key.full_name(),
                after: timeout,
            }),
        }
    }

    /// Subscribe until `signal` fires.
    ///
    /// On cancellation the listener is removed and a [`SubscriptionCancelled`]
    /// payload is emitted on the `cancelled` key of the same domain. Returns
    /// `None` when the signal has already fired.
    pub fn on_cancellable<K, F, R>(
        &self,
        event: K,
        signal: CancellationToken,
        handler: F,
    ) -> Option<ListenerId>
    where
        K: Into<EventKey>,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
        P: From<SubscriptionCancelled>,
    {
        self.cancellable(event.into(), signal, false, handler)
    }

    /// Like [`on_cancellable`](Self::on_cancellable) but for one delivery
    pub fn once_cancellable<K, F, R>(
        &self,
        event: K,
        signal: CancellationToken,
        handler: F,
    ) -> Option<ListenerId>
    where
        K: Into<EventKey>,
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
        P: From<SubscriptionCancelled>,
    {
        self.cancellable(event.into(), signal, true, handler)
    }

    fn cancellable<F, R>(
        &self,
        key: EventKey,
        signal: CancellationToken,
        once: bool,
        handler: F,
    ) -> Option<ListenerId>
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
        P: From<SubscriptionCancelled>,
    {
        if signal.is_cancelled() {
            debug!("Signal already fired, not subscribing to '{}'", key);
            return None;
        }

        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done_tx = Mutex::new(Some(done_tx));
        let guard = signal.clone();

        let id = self.subscribe(
            key.clone(),
            once,
            Arc::new(move |payload: &P| {
                if guard.is_cancelled() {
                    return Ok(());
                }
                if once {
                    let sender = done_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some(sender) = sender {
                        let _ = sender.send(());
                    }
                }
                handler(payload).into_result()
            }),
        );

        match Handle::try_current() {
            Ok(runtime) => {
                let weak: Weak<BusInner<P>> = Arc::downgrade(&self.inner);
                runtime.spawn(async move {
                    tokio::select! {
                        _ = signal.cancelled() => {}
                        _ = done_rx => return,
                    }
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let bus = EventBus { inner };
                    // Only the path that actually removed the listener reports it
                    if bus.off(id) {
                        let notice = SubscriptionCancelled {
                            event: key.clone(),
                            signal,
                            time: Utc::now(),
                        };
                        bus.emit(key.sibling("cancelled"), P::from(notice));
                    }
                });
            }
            Err(_) => {
                warn!(
                    "No async runtime, subscription to '{}' is only checked at delivery",
                    key
                );
            }
        }

        Some(id)
    }

    // =========================================================================
    // Domains
    // =========================================================================

    /// Create (or fetch) the domain called `name`
    pub fn create_domain(&self, name: &str) -> Result<EventDomain<P>, BusError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BusError::InvalidDomainName);
        }
        Ok(self.ensure_domain(name))
    }

    pub(crate) fn ensure_domain(&self, name: &str) -> EventDomain<P> {
        let keys = {
            let mut state = self.state();
            state
                .domains
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!("Created event domain '{}'", name);
                    Arc::new(DomainKeys {
                        name: Arc::from(name),
                        keys: Mutex::new(HashMap::new()),
                    })
                })
                .clone()
        };
        EventDomain {
            bus: self.clone(),
            keys,
        }
    }

    /// Existing domain, if one was created under `name`
    pub fn domain(&self, name: &str) -> Option<EventDomain<P>> {
        let keys = self.state().domains.get(name).cloned()?;
        Some(EventDomain {
            bus: self.clone(),
            keys,
        })
    }

    /// Drop a domain along with its listeners and history
    pub fn remove_domain(&self, name: &str) -> bool {
        let mut state = self.state();
        if state.domains.remove(name).is_none() {
            return false;
        }
        state.listeners.retain(|key, _| key.domain() != Some(name));
        state.history.retain(|key, _| key.domain() != Some(name));
        true
    }

    pub fn domain_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().domains.keys().cloned().collect();
        names.sort();
        names
    }
}

// =============================================================================
// Event Domain
// =============================================================================

/// Named partition of an [`EventBus`]. Short names map to `domain.name` keys.
/// Removes a listener when dropped. A no-op once the listener has fired.
struct Unsubscribe<'a, P>
where
    P: Clone + Send + Sync + 'static,
{
    bus: &'a EventBus<P>,
    id: ListenerId,
}

impl<P> Drop for Unsubscribe<'_, P>
where
    P: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.bus.off(self.id);
    }
}

pub struct EventDomain<P> {
    bus: EventBus<P>,
    keys: Arc<DomainKeys>,
}

impl<P> Clone for EventDomain<P> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            keys: self.keys.clone(),
        }
    }
}

impl<P> fmt::Debug for EventDomain<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDomain")
            .field("name", &self.keys.name)
            .finish()
    }
}

impl<P> EventDomain<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.keys.name
    }

    /// The bus this domain dispatches through
    pub fn bus(&self) -> &EventBus<P> {
        &self.bus
    }

    /// Bus-level key for a short event name
    pub fn key(&self, event: &str) -> EventKey {
        self.keys.key(event)
    }

    pub fn on<F, R>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        self.bus.on(self.key(event), handler)
    }

    pub fn once<F, R>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        self.bus.once(self.key(event), handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.bus.off(id)
    }

    pub fn emit(&self, event: &str, payload: P) -> bool {
        self.bus.emit(self.key(event), payload)
    }

    pub fn replay<F, R>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        self.bus.replay(self.key(event), handler)
    }

    pub fn last(&self, event: &str) -> Option<P> {
        self.bus.last(self.key(event))
    }

    pub async fn once_with_timeout(&self, event: &str, timeout: Duration) -> Result<P, BusError> {
        self.bus.once_with_timeout(self.key(event), timeout).await
    }

    pub fn on_cancellable<F, R>(
        &self,
        event: &str,
        signal: CancellationToken,
        handler: F,
    ) -> Option<ListenerId>
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
        P: From<SubscriptionCancelled>,
    {
        self.bus.on_cancellable(self.key(event), signal, handler)
    }

    pub fn once_cancellable<F, R>(
        &self,
        event: &str,
        signal: CancellationToken,
        handler: F,
    ) -> Option<ListenerId>
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
        P: From<SubscriptionCancelled>,
    {
        self.bus.once_cancellable(self.key(event), signal, handler)
    }
}

// =============================================================================
// Sink
// =============================================================================

/// Anything the login flow can report progress to
pub trait EventSink<P>: Send + Sync {
    fn emit_event(&self, event: &str, payload: P) -> bool;
}

impl<P> EventSink<P> for EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn emit_event(&self, event: &str, payload: P) -> bool {
        self.emit(EventKey::root(event), payload)
    }
}

impl<P> EventSink<P> for EventDomain<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn emit_event(&self, event: &str, payload: P) -> bool {
        self.emit(event, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum Msg {
        Value(u32),
        Cancelled(String),
    }

    impl From<SubscriptionCancelled> for Msg {
        fn from(notice: SubscriptionCancelled) -> Self {
            Msg::Cancelled(notice.event.full_name())
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |entry: &str| sink.lock().unwrap().push(entry.to_string()))
    }

    #[test]
    fn test_listeners_run_in_subscription_order() {
        let bus: EventBus<Msg> = EventBus::new();
        let (log, push) = recorder();

        let p1 = push.clone();
        bus.on("tick", move |_: &Msg| p1("first"));
        let p2 = push.clone();
        bus.on("tick", move |_: &Msg| p2("second"));

        assert!(bus.emit("tick", Msg::Value(1)));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_emit_without_listeners_returns_false() {
        let bus: EventBus<Msg> = EventBus::new();
        assert!(!bus.emit("nobody", Msg::Value(1)));
        assert_eq!(bus.last("nobody"), Some(Msg::Value(1)));
    }

    #[test]
    fn test_once_and_off() {
        let bus: EventBus<Msg> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        bus.once("tick", move |_: &Msg| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = count.clone();
        let id = bus.on("tick", move |_: &Msg| {
            c.fetch_add(10, Ordering::SeqCst);
        });

        bus.emit("tick", Msg::Value(1));
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit("tick", Msg::Value(2));

        assert_eq!(count.load(Ordering::SeqCst), 11);
        assert_eq!(bus.listener_count("tick"), 0);
    }

    #[test]
    fn test_replay_delivers_last_then_live() {
        let bus: EventBus<Msg> = EventBus::new();
        bus.emit("state", Msg::Value(1));
        bus.emit("state", Msg::Value(2));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.replay("state", move |m: &Msg| s.lock().unwrap().push(m.clone()));
        assert_eq!(*seen.lock().unwrap(), vec![Msg::Value(2)]);

        bus.emit("state", Msg::Value(3));
        assert_eq!(*seen.lock().unwrap(), vec![Msg::Value(2), Msg::Value(3)]);
    }

    #[test]
    fn test_replay_inside_listener_sees_value_once() {
        let bus: EventBus<Msg> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = bus.clone();
        let s = seen.clone();
        bus.once("state", move |_: &Msg| {
            let s = s.clone();
            inner_bus.replay("state", move |m: &Msg| s.lock().unwrap().push(m.clone()));
        });

        bus.emit("state", Msg::Value(7));
        assert_eq!(*seen.lock().unwrap(), vec![Msg::Value(7)]);
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let bus: EventBus<Msg> = EventBus::new();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let f = failures.clone();
        bus.on_error(move |failure: &ListenerFailure| {
            f.lock().unwrap().push(failure.clone());
        });

        let (log, push) = recorder();
        bus.on("tick", |_: &Msg| -> ListenerResult { Err("boom".into()) });
        bus.on("tick", move |_: &Msg| push("after"));

        assert!(bus.emit("tick", Msg::Value(1)));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].event, EventKey::root("tick"));
        assert_eq!(failures[0].message, "boom");
    }

    #[test]
    fn test_wildcard_requires_observability() {
        let bus: EventBus<Msg> = EventBus::new();
        let names = Arc::new(Mutex::new(Vec::new()));
        let n = names.clone();
        bus.on_any(move |e: &Emission<'_, Msg>| n.lock().unwrap().push(e.name.clone()));

        let domain = bus.create_domain("login").unwrap();
        domain.emit("start", Msg::Value(1));
        assert!(names.lock().unwrap().is_empty());

        bus.enable_observability();
        domain.emit("start", Msg::Value(2));
        assert_eq!(*names.lock().unwrap(), vec!["login.start"]);

        bus.disable_observability();
        domain.emit("start", Msg::Value(3));
        assert_eq!(names.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_domains_are_idempotent_and_namespaced() {
        let bus: EventBus<Msg> = EventBus::new();
        let a = bus.create_domain("alpha").unwrap();
        let again = bus.create_domain("alpha").unwrap();
        let b = bus.create_domain("beta").unwrap();

        assert_eq!(a.key("ready"), again.key("ready"));
        assert_ne!(a.key("ready"), b.key("ready"));
        assert_eq!(a.key("ready").full_name(), "alpha.ready");

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        again.on("ready", move |_: &Msg| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        b.emit("ready", Msg::Value(1));
        a.emit("ready", Msg::Value(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.create_domain("  ").is_err());
        assert_eq!(bus.domain_names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_remove_domain_drops_listeners() {
        let bus: EventBus<Msg> = EventBus::new();
        let domain = bus.create_domain("temp").unwrap();
        domain.on("x", |_: &Msg| {});
        domain.emit("x", Msg::Value(1));

        assert!(bus.remove_domain("temp"));
        assert!(!bus.remove_domain("temp"));
        assert!(bus.domain("temp").is_none());
        assert_eq!(bus.listener_count(EventKey::scoped("temp", "x")), 0);
        assert!(bus.last(EventKey::scoped("temp", "x")).is_none());
    }

    #[tokio::test]
    async fn test_once_with_timeout_resolves() {
        let bus: EventBus<Msg> = EventBus::new();
        let emitter = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            emitter.emit("done", Msg::Value(9));
        });

        let value = bus
            .once_with_timeout("done", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value, Msg::Value(9));
        assert_eq!(bus.listener_count("done"), 0);
    }

    #[tokio::test]
    async fn test_once_with_timeout_cleans_up() {
        let bus: EventBus<Msg> = EventBus::new();
        let err = bus
            .once_with_timeout("never", Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Timeout { .. }));
        assert_eq!(bus.listener_count("never"), 0);
    }

    #[tokio::test]
    async fn test_dropped_once_with_timeout_releases_listener() {
        let bus: EventBus<Msg> = EventBus::new();

        let waited = tokio::time::timeout(
            Duration::from_millis(5),
            bus.once_with_timeout("slow", Duration::from_secs(10)),
        )
        .await;

        assert!(waited.is_err());
        assert_eq!(bus.listener_count("slow"), 0);
        assert!(!bus.emit("slow", Msg::Value(1)));
    }

    #[tokio::test]
    async fn test_cancellable_subscription_emits_cancelled() {
        let bus: EventBus<Msg> = EventBus::new();
        let domain = bus.create_domain("feed").unwrap();
        let token = CancellationToken::new();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        domain
            .on_cancellable("item", token.clone(), move |_: &Msg| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        domain.emit("item", Msg::Value(1));
        token.cancel();

        let notice = domain
            .once_with_timeout("cancelled", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(notice, Msg::Cancelled("feed.item".to_string()));

        domain.emit("item", Msg::Value(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(domain.bus().listener_count(domain.key("item")), 0);
    }

    #[tokio::test]
    async fn test_once_cancellable_delivered_then_signalled() {
        let bus: EventBus<Msg> = EventBus::new();
        let domain = bus.create_domain("feed").unwrap();
        let token = CancellationToken::new();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        domain
            .once_cancellable("item", token.clone(), move |_: &Msg| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(domain.emit("item", Msg::Value(1)));
        assert_eq!(bus.listener_count(domain.key("item")), 0);

        tokio::task::yield_now().await;
        token.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(domain.last("cancelled").is_none());
        assert!(!domain.emit("item", Msg::Value(2)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_cancellable_signalled_before_delivery() {
        let bus: EventBus<Msg> = EventBus::new();
        let domain = bus.create_domain("feed").unwrap();
        let token = CancellationToken::new();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        domain
            .once_cancellable("item", token.clone(), move |_: &Msg| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(bus.listener_count(domain.key("item")), 1);

        token.cancel();
        let notice = domain
            .once_with_timeout("cancelled", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(notice, Msg::Cancelled("feed.item".to_string()));
        assert_eq!(bus.listener_count(domain.key("item")), 0);
        assert!(!domain.emit("item", Msg::Value(1)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellable_with_fired_signal_is_rejected() {
        let bus: EventBus<Msg> = EventBus::new();
        let token = CancellationToken::new();
        token.cancel();
        assert!(bus.on_cancellable("x", token, |_: &Msg| {}).is_none());
        assert_eq!(bus.listener_count("x"), 0);
    }

    #[test]
    fn test_sink_is_uniform_over_bus_and_domain() {
        let bus: EventBus<Msg> = EventBus::new();
        let domain = bus.create_domain("login").unwrap();

        let sinks: Vec<Box<dyn EventSink<Msg>>> = vec![Box::new(bus.clone()), Box::new(domain)];
        for sink in &sinks {
            sink.emit_event("progress", Msg::Value(1));
        }

        assert!(bus.last("progress").is_some());
        assert!(bus.last(EventKey::scoped("login", "progress")).is_some());
    }
}
