//! Client subscription state machine.
//!
//! [`RemoteEventService`] maps domains to local listeners and keeps the
//! server side in step with that mapping:
//!
//! ```text
//!            add_listener (first for domain) ─► activate
//! Inactive ──────────────────────────────────────────────► Active ─┐
//!    ▲                                                             │ listen loop
//!    └── last listener removed (deactivate) / server abort ◄───────┘
//! ```
//!
//! The service is active exactly while the mapping holds at least one
//! domain. One spawned task runs the listen loop and dispatches every batch
//! to the listeners of each event's domain, in registration order.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::connector::{EventNotification, RemoteEventConnector};
use super::listener::{RemoteEventListener, UnlistenAdapter, UnlistenEventListener};
use crate::config::EventServiceConfig;
use crate::domain::{Domain, DomainEvent, Event, EventFilterSpec};
use crate::error::EventServiceError;

/// A listener as stored by the service; removal matches by identity.
pub type SharedListener = Arc<dyn RemoteEventListener>;

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Server-side registration state of one mapped domain.
#[derive(Debug, Clone)]
enum Activation {
    Pending,
    Active,
    Failed(EventServiceError),
}

struct ListenerEntry {
    domain: Domain,
    listeners: Vec<SharedListener>,
    activation: watch::Receiver<Activation>,
}

impl ListenerEntry {
    fn is_active(&self) -> bool {
        matches!(*self.activation.borrow(), Activation::Active)
    }
}

#[derive(Default)]
struct ServiceState {
    entries: Vec<ListenerEntry>,
    listen_task: Option<JoinHandle<()>>,
}

impl ServiceState {
    fn position(&self, domain: &Domain) -> Option<usize> {
        self.entries.iter().position(|e| &e.domain == domain)
    }

    /// Drops the entry of `domain` if it still belongs to the activation
    /// tracked by `activation`.
    fn drop_entry(&mut self, domain: &Domain, activation: &watch::Receiver<Activation>) {
        self.entries
            .retain(|e| !(&e.domain == domain && e.activation.same_channel(activation)));
    }
}

/// Outcome of the first half of [`RemoteEventService::add_listener`].
enum Attach {
    /// The caller created the entry and has to activate the domain.
    First(watch::Sender<Activation>, watch::Receiver<Activation>),
    /// The domain is already mapped; the caller waits for its activation.
    Joined(watch::Receiver<Activation>),
}

struct ServiceInner {
    connector: Arc<dyn RemoteEventConnector>,
    state: Mutex<ServiceState>,
    errors: broadcast::Sender<EventServiceError>,
    max_listen_retries: u32,
}

/// Client-side subscription state machine.
///
/// Cheap to clone; clones share the mapping and the listen loop.
#[derive(Clone)]
pub struct RemoteEventService {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for RemoteEventService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("RemoteEventService")
            .field("connector", &self.inner.connector)
            .field(
                "domains",
                &state.entries.iter().map(|e| e.domain.name()).collect::<Vec<_>>(),
            )
            .field("listening", &state.listen_task.is_some())
            .field("max_listen_retries", &self.inner.max_listen_retries)
            .finish()
    }
}

impl RemoteEventService {
    /// Creates an inactive service.
    #[must_use]
    pub fn new(connector: Arc<dyn RemoteEventConnector>, max_listen_retries: u32) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ServiceInner {
                connector,
                state: Mutex::new(ServiceState::default()),
                errors,
                max_listen_retries,
            }),
        }
    }

    /// Creates an inactive service with the retry bound of `config`.
    #[must_use]
    pub fn with_config(connector: Arc<dyn RemoteEventConnector>, config: &EventServiceConfig) -> Self {
        Self::new(connector, config.max_listen_retries)
    }

    /// Returns `true` while at least one domain with listeners is activated
    /// on the server.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner
            .lock_state()
            .entries
            .iter()
            .any(ListenerEntry::is_active)
    }

    /// Returns `true` while the listen loop runs.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.inner
            .lock_state()
            .listen_task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Returns the active domains in the order they were activated.
    #[must_use]
    pub fn active_domains(&self) -> Vec<Domain> {
        self.inner
            .lock_state()
            .entries
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.domain.clone())
            .collect()
    }

    /// Returns the number of listeners on `domain`.
    #[must_use]
    pub fn listener_count(&self, domain: &Domain) -> usize {
        let state = self.inner.lock_state();
        state
            .position(domain)
            .and_then(|i| state.entries.get(i))
            .map_or(0, |e| e.listeners.len())
    }

    /// Subscribes to listen loop failures that were not recovered by retrying.
    /// Each failure is sent once.
    #[must_use]
    pub fn subscribe_errors(&self) -> broadcast::Receiver<EventServiceError> {
        self.inner.errors.subscribe()
    }

    /// Adds `listener` to `domain`.
    ///
    /// The first listener of a domain activates it on the server and starts
    /// the listen loop if needed; only in that case can the call fail with a
    /// transport error, and the listener is then not kept. Later listeners
    /// are appended locally, wait for a pending activation of the domain and
    /// share its outcome, then only forward `filter`, if given.
    ///
    /// # Errors
    ///
    /// Returns the connector error of the activation or filter call.
    pub async fn add_listener(
        &self,
        domain: Domain,
        listener: SharedListener,
        filter: Option<EventFilterSpec>,
    ) -> Result<(), EventServiceError> {
        let attach = {
            let mut state = self.inner.lock_state();
            if let Some(entry) = state
                .position(&domain)
                .and_then(|i| state.entries.get_mut(i))
            {
                entry.listeners.push(Arc::clone(&listener));
                Attach::Joined(entry.activation.clone())
            } else {
                let (tx, rx) = watch::channel(Activation::Pending);
                state.entries.push(ListenerEntry {
                    domain: domain.clone(),
                    listeners: vec![Arc::clone(&listener)],
                    activation: rx.clone(),
                });
                Attach::First(tx, rx)
            }
        };

        match attach {
            Attach::First(tx, rx) => self.activate_first(&domain, filter.as_ref(), &tx, &rx).await,
            Attach::Joined(rx) => {
                self.await_activation(&domain, &listener, rx).await?;
                if let Some(filter) = filter {
                    self.inner.connector.register_event_filter(&domain, &filter).await?;
                }
                Ok(())
            }
        }
    }

    async fn activate_first(
        &self,
        domain: &Domain,
        filter: Option<&EventFilterSpec>,
        tx: &watch::Sender<Activation>,
        rx: &watch::Receiver<Activation>,
    ) -> Result<(), EventServiceError> {
        let activated = async {
            self.inner.connector.init().await?;
            self.inner.connector.activate(domain, filter).await
        }
        .await;
        match activated {
            Ok(()) => {
                tx.send_replace(Activation::Active);
                tracing::debug!(domain = %domain, "domain activated");
                self.inner.ensure_listening();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "domain activation failed");
                self.inner.lock_state().drop_entry(domain, rx);
                tx.send_replace(Activation::Failed(e.clone()));
                Err(e)
            }
        }
    }

    /// Waits until the activation another caller started for `domain` is
    /// settled.
    async fn await_activation(
        &self,
        domain: &Domain,
        listener: &SharedListener,
        mut rx: watch::Receiver<Activation>,
    ) -> Result<(), EventServiceError> {
        let settled = rx
            .wait_for(|a| !matches!(a, Activation::Pending))
            .await
            .map(|a| a.clone());
        match settled {
            Ok(Activation::Failed(e)) => Err(e),
            Ok(_) => Ok(()),
            Err(_) => {
                // The activating caller was cancelled; the outcome is unknown.
                self.inner.detach(domain, listener);
                self.inner.lock_state().drop_entry(domain, &rx);
                Err(EventServiceError::Internal(format!(
                    "activation of domain {domain} was abandoned"
                )))
            }
        }
    }

    /// Registers an [`UnlistenEventListener`] on the unlisten domain and
    /// returns the handle to remove it with.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteEventService::add_listener`].
    pub async fn add_unlisten_listener<L>(
        &self,
        listener: Arc<L>,
    ) -> Result<SharedListener, EventServiceError>
    where
        L: UnlistenEventListener + ?Sized + 'static,
    {
        let adapter: SharedListener = Arc::new(UnlistenAdapter(listener));
        self.add_listener(Domain::unlisten(), Arc::clone(&adapter), None)
            .await?;
        Ok(adapter)
    }

    /// Removes one listener instance. Removing the last listener of a domain
    /// deactivates it. Unknown listeners and domains are ignored.
    ///
    /// # Errors
    ///
    /// Returns the connector error of the deactivation call.
    pub async fn remove_listener(
        &self,
        domain: &Domain,
        listener: &SharedListener,
    ) -> Result<(), EventServiceError> {
        if self.inner.detach(domain, listener) {
            self.deactivate(std::slice::from_ref(domain)).await?;
        }
        Ok(())
    }

    /// Removes every listener of `domain` and deactivates it.
    ///
    /// # Errors
    ///
    /// Returns the connector error of the deactivation call.
    pub async fn remove_listeners_for(&self, domain: &Domain) -> Result<(), EventServiceError> {
        self.remove_listeners_in(std::slice::from_ref(domain)).await
    }

    /// Removes every listener of `domains`, deactivating all affected
    /// domains with a single call.
    ///
    /// # Errors
    ///
    /// Returns the connector error of the deactivation call.
    pub async fn remove_listeners_in(&self, domains: &[Domain]) -> Result<(), EventServiceError> {
        let removed: Vec<Domain> = {
            let mut state = self.inner.lock_state();
            let mut removed = Vec::new();
            state.entries.retain(|entry| {
                if domains.contains(&entry.domain) {
                    removed.push(entry.domain.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };
        if removed.is_empty() {
            return Ok(());
        }
        self.deactivate(&removed).await
    }

    /// Removes every listener and closes the connection on the server.
    ///
    /// # Errors
    ///
    /// Returns the connector error of the close call.
    pub async fn remove_all_listeners(&self) -> Result<(), EventServiceError> {
        let (was_active, task) = {
            let mut state = self.inner.lock_state();
            let was_active = !state.entries.is_empty();
            state.entries.clear();
            (was_active, state.listen_task.take())
        };
        if let Some(task) = task {
            task.abort();
        }
        if was_active {
            self.inner.connector.deactivate_all().await?;
            tracing::debug!("all domains deactivated");
        }
        Ok(())
    }

    /// Replaces the server-side filter of an active domain.
    ///
    /// # Errors
    ///
    /// Returns the connector error.
    pub async fn register_event_filter(
        &self,
        domain: &Domain,
        filter: &EventFilterSpec,
    ) -> Result<(), EventServiceError> {
        self.inner.connector.register_event_filter(domain, filter).await
    }

    /// Removes the server-side filter of an active domain.
    ///
    /// # Errors
    ///
    /// Returns the connector error.
    pub async fn deregister_event_filter(&self, domain: &Domain) -> Result<(), EventServiceError> {
        self.inner.connector.deregister_event_filter(domain).await
    }

    /// Publishes an event through the server.
    ///
    /// # Errors
    ///
    /// Returns the connector error.
    pub async fn send_event(&self, domain: &Domain, event: Event) -> Result<(), EventServiceError> {
        self.inner.connector.init().await?;
        self.inner.connector.send_event(domain, event).await
    }

    /// Restarts the listen loop after it stopped on an error. Does nothing
    /// while inactive or while the loop runs.
    pub fn resume_listening(&self) {
        self.inner.ensure_listening();
    }

    async fn deactivate(&self, domains: &[Domain]) -> Result<(), EventServiceError> {
        tracing::debug!(domains = domains.len(), "deactivating domains");
        self.inner.connector.deactivate(domains).await
    }
}

impl ServiceInner {
    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes one listener instance. Returns `true` if that emptied the
    /// domain, which is then dropped from the mapping.
    fn detach(&self, domain: &Domain, listener: &SharedListener) -> bool {
        let mut state = self.lock_state();
        let Some(index) = state.position(domain) else {
            return false;
        };
        let Some(entry) = state.entries.get_mut(index) else {
            return false;
        };
        let Some(slot) = entry.listeners.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        entry.listeners.remove(slot);
        if entry.listeners.is_empty() {
            state.entries.remove(index);
            true
        } else {
            false
        }
    }

    fn ensure_listening(self: &Arc<Self>) {
        let mut state = self.lock_state();
        if state.entries.is_empty() {
            return;
        }
        if state.listen_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        state.listen_task = Some(tokio::spawn(listen_loop(Arc::downgrade(self))));
    }

    /// Decides whether the loop runs another cycle; clears the task slot when
    /// it does not.
    fn continue_listening(&self) -> bool {
        let mut state = self.lock_state();
        if state.entries.is_empty() {
            state.listen_task = None;
            false
        } else {
            true
        }
    }

    fn stop_listening(&self) {
        self.lock_state().listen_task = None;
    }
}

impl EventNotification for ServiceInner {
    fn on_notify(&self, events: Vec<DomainEvent>) {
        for event in events {
            let listeners: Vec<SharedListener> = {
                let state = self.lock_state();
                match state.position(&event.domain).and_then(|i| state.entries.get(i)) {
                    Some(entry) => entry.listeners.clone(),
                    None => {
                        tracing::trace!(domain = %event.domain, "event for inactive domain dropped");
                        continue;
                    }
                }
            };
            for listener in listeners {
                listener.apply(&event);
            }
        }
    }

    fn on_abort(&self) {
        let mut state = self.lock_state();
        let dropped = state.entries.len();
        state.entries.clear();
        tracing::warn!(domains = dropped, "server aborted the connection, all listeners removed");
    }
}

async fn listen_loop(service: Weak<ServiceInner>) {
    let mut retries = 0u32;
    loop {
        let Some(inner) = service.upgrade() else {
            return;
        };
        if !inner.continue_listening() {
            tracing::debug!("listen loop stopped, no active domains");
            return;
        }
        match inner.connector.listen(&*inner).await {
            Ok(()) => retries = 0,
            Err(e) if e.is_retryable() && retries < inner.max_listen_retries => {
                retries = retries.saturating_add(1);
                tracing::warn!(error = %e, attempt = retries, "listen failed, retrying");
            }
            Err(e) => {
                tracing::error!(error = %e, "listen loop stopped");
                inner.stop_listening();
                let _ = inner.errors.send(e);
                return;
            }
        }
    }
}
