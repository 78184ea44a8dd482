//! Per-user event queues and the blocking listen protocol.
//!
//! [`EventRegistry`] is the server-side heart of the event service. Clients
//! register domains, publishers add events, and each client's listen call
//! waits until there is something to deliver:
//!
//! ```text
//! add_event(domain, e) ──► DomainUserMapping ──► UserInfo::offer (filter)
//!                                                      │ notify
//! listen(user) ◄── drain queue ◄── wait(min/max) ◄─────┘
//! ```
//!
//! # Concurrency
//!
//! - Each user has its own short-lived lock; no lock spans users or awaits.
//! - At most one listen call per user is in flight at a time.
//! - Removing a user wakes its listen call with an unknown user error.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use tokio::time::Instant;

use super::domain_user_mapping::DomainUserMapping;
use super::user_info::{Registration, UserInfo};
use super::user_manager::{RemovedUser, UserManager, UserRemovalListener};
use crate::config::EventServiceConfig;
use crate::domain::{
    Domain, DomainEvent, DomainFactory, Event, SharedEventFilter, UnlistenEvent, UserId,
};
use crate::error::EventServiceError;

/// Shared state behind an [`EventRegistry`] handle.
#[derive(Debug)]
struct RegistryCore {
    config: EventServiceConfig,
    users: Arc<UserManager>,
    mapping: DomainUserMapping,
    domains: DomainFactory,
}

/// Server-side event registry.
///
/// Cheap to clone; all clones share the same state.
#[derive(Debug, Clone)]
pub struct EventRegistry {
    core: Arc<RegistryCore>,
}

impl EventRegistry {
    /// Creates a registry with its own user manager. The activity scheduler
    /// is not started; see [`EventRegistry::activate_user_activity_scheduler`].
    #[must_use]
    pub fn new(config: EventServiceConfig) -> Self {
        let users = Arc::new(UserManager::new(
            config.timeout_time,
            config.scheduler_poll_interval,
        ));
        let core = Arc::new(RegistryCore {
            config,
            users: Arc::clone(&users),
            mapping: DomainUserMapping::new(),
            domains: DomainFactory::new(),
        });
        let listener: Weak<RegistryCore> = Arc::downgrade(&core);
        users.add_timeout_listener(listener);
        tracing::info!(config = %core.config, "event registry created");
        Self { core }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EventServiceConfig {
        &self.core.config
    }

    /// Returns the user manager.
    #[must_use]
    pub fn user_manager(&self) -> &Arc<UserManager> {
        &self.core.users
    }

    /// Resolves a domain name through the registry's interner.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::InvalidRequest`] for an empty name.
    pub fn domain(&self, name: &str) -> Result<Domain, EventServiceError> {
        self.core.domains.get_domain(name)
    }

    /// Starts evicting idle users.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Configuration`] outside a Tokio runtime.
    pub fn activate_user_activity_scheduler(&self, auto_clean: bool) -> Result<(), EventServiceError> {
        self.core.users.activate_user_activity_scheduler(auto_clean)
    }

    /// Registers `user_id` to `domain`, creating the user on first contact.
    ///
    /// Idempotent: registering an already registered domain changes nothing,
    /// not even the filter.
    pub fn register(&self, user_id: &UserId, domain: Domain, filter: Option<SharedEventFilter>) {
        let user = self.core.users.add_user(user_id);
        self.register_on(user_id, user, &domain, filter);
    }

    /// Registers on `user`, moving to a fresh record if `user` was removed
    /// since it was looked up.
    fn register_on(
        &self,
        user_id: &UserId,
        mut user: Arc<UserInfo>,
        domain: &Domain,
        filter: Option<SharedEventFilter>,
    ) {
        loop {
            user.touch();
            match user.register_domain(domain.clone(), filter.clone()) {
                Registration::Added => {
                    if !domain.is_user_specific() {
                        self.core.mapping.add(domain.clone(), user_id.clone());
                    }
                    tracing::debug!(user_id = %user_id, domain = %domain, "domain registered");
                    return;
                }
                Registration::AlreadyRegistered => return,
                Registration::UserRemoved => {
                    tracing::debug!(user_id = %user_id, "user removed during register, retrying");
                    user = self.core.users.add_user(user_id);
                }
            }
        }
    }

    /// Registers `user_id` to several domains with the same filter.
    pub fn register_all<I>(&self, user_id: &UserId, domains: I, filter: Option<SharedEventFilter>)
    where
        I: IntoIterator<Item = Domain>,
    {
        for domain in domains {
            self.register(user_id, domain, filter.clone());
        }
    }

    /// Removes one domain from the user's registrations.
    pub fn unregister(&self, user_id: &UserId, domain: &Domain) {
        self.unregister_all(user_id, std::slice::from_ref(domain));
    }

    /// Removes several domains from the user's registrations. When no domain
    /// is left the user's queue is released; the record itself stays until
    /// the activity scheduler or an explicit [`EventRegistry::unregister_user`]
    /// removes it.
    pub fn unregister_all<'a, I>(&self, user_id: &UserId, domains: I)
    where
        I: IntoIterator<Item = &'a Domain>,
    {
        let Some(user) = self.core.users.get_user(user_id) else {
            tracing::debug!(user_id = %user_id, "unregister for unknown user ignored");
            return;
        };
        user.touch();
        let removed = user.unregister_domains(domains);
        self.core.mapping.remove_user(user_id, &removed);
        if !removed.is_empty() {
            tracing::debug!(
                user_id = %user_id,
                domains = removed.len(),
                active = user.is_active(),
                "domains unregistered"
            );
        }
    }

    /// Removes the user completely and publishes an [`UnlistenEvent`].
    /// Returns `false` if the user was unknown.
    pub fn unregister_user(&self, user_id: &UserId) -> bool {
        self.core.users.close_user(user_id).is_some()
    }

    /// Publishes an event on `domain`. Returns the number of users whose
    /// queue received it.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::InvalidRequest`] for the user-specific
    /// domain; use [`EventRegistry::add_user_event`] instead.
    pub fn add_event(&self, domain: &Domain, event: Event) -> Result<usize, EventServiceError> {
        if domain.is_user_specific() {
            return Err(EventServiceError::InvalidRequest(
                "user-specific events need a target user".to_string(),
            ));
        }
        Ok(self.core.publish(DomainEvent::new(domain.clone(), event)))
    }

    /// Sends an event to one user on the user-specific domain, regardless of
    /// its subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::UnknownUser`] if the user is not known.
    pub fn add_user_event(&self, user_id: &UserId, event: Event) -> Result<(), EventServiceError> {
        let user = self.core.users.require_user(user_id)?;
        if user.push_user_specific(event) {
            Ok(())
        } else {
            Err(EventServiceError::UnknownUser(user_id.to_string()))
        }
    }

    /// Waits for events of `user_id` using the configured waiting times.
    ///
    /// # Errors
    ///
    /// See [`EventRegistry::listen_until`].
    pub async fn listen(&self, user_id: &UserId) -> Result<Vec<DomainEvent>, EventServiceError> {
        let deadline = Instant::now() + self.core.config.max_waiting_time;
        self.listen_until(user_id, deadline).await
    }

    /// Waits for events of `user_id` until `deadline`.
    ///
    /// - Queued events are returned once the minimum waiting time has passed
    ///   since the call began, so bursts are coalesced into one batch.
    /// - Without events the call returns an empty batch at `deadline`.
    /// - If the user is removed meanwhile, the call fails.
    ///
    /// Both entering and leaving the call count as activity.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::UnknownUser`] if the user has no record
    /// or is removed while waiting, and [`EventServiceError::InvalidRequest`]
    /// if another listen call for the same user is in flight.
    pub async fn listen_until(
        &self,
        user_id: &UserId,
        deadline: Instant,
    ) -> Result<Vec<DomainEvent>, EventServiceError> {
        let user = self.core.users.require_user(user_id)?;
        let Some(_slot) = user.begin_listen() else {
            return Err(EventServiceError::InvalidRequest(format!(
                "listen already in progress for {user_id}"
            )));
        };
        user.touch();

        let min_deadline = Instant::now() + self.core.config.min_waiting_time;
        let result = wait_for_events(&user, min_deadline, deadline).await;

        user.touch();
        match &result {
            Ok(events) if !events.is_empty() => {
                tracing::trace!(user_id = %user_id, events = events.len(), "listen delivered events");
            }
            Ok(_) => tracing::trace!(user_id = %user_id, "listen keep-alive"),
            Err(e) => tracing::debug!(user_id = %user_id, error = %e, "listen aborted"),
        }
        result
    }

    /// Replaces the filter of a registered domain. Events already queued are
    /// not affected.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::UnknownUser`] for an unknown user and
    /// [`EventServiceError::InvalidRequest`] if the domain is not registered.
    pub fn register_event_filter(
        &self,
        user_id: &UserId,
        domain: &Domain,
        filter: SharedEventFilter,
    ) -> Result<(), EventServiceError> {
        self.set_filter(user_id, domain, Some(filter))
    }

    /// Removes the filter of a registered domain.
    ///
    /// # Errors
    ///
    /// Same as [`EventRegistry::register_event_filter`].
    pub fn deregister_event_filter(
        &self,
        user_id: &UserId,
        domain: &Domain,
    ) -> Result<(), EventServiceError> {
        self.set_filter(user_id, domain, None)
    }

    /// Returns the filter of a registered domain.
    #[must_use]
    pub fn get_event_filter(&self, user_id: &UserId, domain: &Domain) -> Option<SharedEventFilter> {
        self.core.users.get_user(user_id)?.filter(domain)
    }

    /// Returns every domain with at least one registered user.
    #[must_use]
    pub fn registered_domains(&self) -> Vec<Domain> {
        self.core.mapping.domains()
    }

    /// Returns the domains of one user (empty for unknown users).
    #[must_use]
    pub fn registered_domains_of(&self, user_id: &UserId) -> BTreeSet<Domain> {
        self.core
            .users
            .get_user(user_id)
            .map(|u| u.domains())
            .unwrap_or_default()
    }

    /// Returns the users registered to `domain`.
    #[must_use]
    pub fn registered_users(&self, domain: &Domain) -> Vec<UserId> {
        self.core
            .mapping
            .users(domain)
            .into_iter()
            .filter(|id| {
                self.core
                    .users
                    .get_user(id)
                    .is_some_and(|u| u.is_registered(domain))
            })
            .collect()
    }

    /// Returns `true` if the user is registered to at least one domain.
    #[must_use]
    pub fn is_user_registered(&self, user_id: &UserId) -> bool {
        self.core
            .users
            .get_user(user_id)
            .is_some_and(|u| u.is_active())
    }

    fn set_filter(
        &self,
        user_id: &UserId,
        domain: &Domain,
        filter: Option<SharedEventFilter>,
    ) -> Result<(), EventServiceError> {
        let user = self.core.users.require_user(user_id)?;
        user.touch();
        if user.set_filter(domain, filter) {
            Ok(())
        } else {
            Err(EventServiceError::InvalidRequest(format!(
                "{user_id} is not registered to {domain}"
            )))
        }
    }
}

impl RegistryCore {
    fn publish(&self, event: DomainEvent) -> usize {
        let mut delivered = 0usize;
        for user_id in self.mapping.users(&event.domain) {
            match self.users.get_user(&user_id) {
                Some(user) => {
                    if user.offer(&event) {
                        delivered = delivered.saturating_add(1);
                    }
                }
                None => self.mapping.remove(&event.domain, &user_id),
            }
        }
        tracing::trace!(domain = %event.domain, delivered, "event added");
        delivered
    }

    /// Cleans up the index for a removed user and tells the other users.
    fn release(&self, removed: &RemovedUser) {
        let user_id = removed.user.user_id();
        let timeout = removed.timeout;
        self.mapping.remove_user(user_id, &removed.domains);

        let unlisten = UnlistenEvent::new(user_id.as_str(), removed.domains.clone(), timeout);
        match Event::from_payload(&unlisten) {
            Ok(event) => {
                let notified = self.publish(DomainEvent::new(Domain::unlisten(), event));
                tracing::debug!(user_id = %user_id, timeout, notified, "unlisten event published");
            }
            Err(e) => tracing::warn!(user_id = %user_id, error = %e, "unlisten event not encodable"),
        }
    }
}

impl UserRemovalListener for RegistryCore {
    fn on_user_removed(&self, removed: &RemovedUser) {
        self.release(removed);
    }
}

/// The wait loop of a listen call. See [`EventRegistry::listen_until`].
async fn wait_for_events(
    user: &UserInfo,
    min_deadline: Instant,
    deadline: Instant,
) -> Result<Vec<DomainEvent>, EventServiceError> {
    loop {
        let wake_at = {
            let mut state = user.lock_state();
            if state.removed {
                return Err(EventServiceError::UnknownUser(user.user_id().to_string()));
            }
            let now = Instant::now();
            if state.queue.is_empty() {
                if now >= deadline {
                    return Ok(Vec::new());
                }
                deadline
            } else {
                if now >= min_deadline || now >= deadline {
                    return Ok(state.queue.drain(..).collect());
                }
                min_deadline.min(deadline)
            }
        };

        tokio::select! {
            () = user.changed() => {}
            () = tokio::time::sleep_until(wake_at) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventFilterSpec, EventPayload};
    use std::time::Duration;

    fn config(min_ms: u64, max_ms: u64, timeout_ms: u64) -> EventServiceConfig {
        let Ok(config) = EventServiceConfig::new(
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
            Duration::from_millis(timeout_ms),
        ) else {
            panic!("valid config");
        };
        config
    }

    fn registry() -> EventRegistry {
        EventRegistry::new(config(0, 20_000, 90_000))
    }

    fn domain(name: &str) -> Domain {
        let Ok(d) = Domain::new(name) else {
            panic!("valid domain");
        };
        d
    }

    fn message(text: &str) -> Event {
        Event::new("chat_message", serde_json::json!({ "text": text }))
    }

    #[tokio::test(start_paused = true)]
    async fn listen_returns_queued_event_once_then_keeps_alive() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);

        let Ok(count) = registry.add_event(&domain("chat"), message("M1")) else {
            panic!("add_event failed");
        };
        assert_eq!(count, 1);

        let Ok(first) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert_eq!(first, vec![DomainEvent::new(domain("chat"), message("M1"))]);

        let started = Instant::now();
        let Ok(second) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert!(second.is_empty());
        assert_eq!(Instant::now() - started, Duration::from_millis(20_000));
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_listen_wakes_on_event() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);

        let listener = {
            let registry = registry.clone();
            let user = user.clone();
            tokio::spawn(async move { registry.listen(&user).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = registry.add_event(&domain("chat"), message("late"));

        let Ok(Ok(events)) = listener.await else {
            panic!("listen task failed");
        };
        assert_eq!(events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn min_waiting_time_coalesces_events() {
        let registry = EventRegistry::new(config(1_000, 20_000, 90_000));
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);
        let _ = registry.add_event(&domain("chat"), message("a"));

        let publisher = {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let _ = registry.add_event(&domain("chat"), message("b"));
            })
        };

        let started = Instant::now();
        let Ok(events) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert_eq!(Instant::now() - started, Duration::from_millis(1_000));
        assert_eq!(events.len(), 2);
        let _ = publisher.await;
    }

    #[tokio::test]
    async fn events_keep_publish_order() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);
        for i in 0..5 {
            let _ = registry.add_event(&domain("chat"), message(&i.to_string()));
        }
        let Ok(events) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        let texts: Vec<_> = events
            .iter()
            .filter_map(|e| e.event.field("text").and_then(|t| t.as_str()).map(str::to_owned))
            .collect();
        assert_eq!(texts, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn listen_for_unknown_user_fails() {
        let registry = registry();
        assert!(matches!(
            registry.listen(&UserId::new("ghost")).await,
            Err(EventServiceError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn events_only_reach_registered_users() {
        let registry = registry();
        let chat_user = UserId::new("chat");
        let news_user = UserId::new("news");
        registry.register(&chat_user, domain("chat"), None);
        registry.register(&news_user, domain("news"), None);

        let _ = registry.add_event(&domain("chat"), message("hello"));
        let _ = registry.add_event(&domain("news"), message("headline"));

        let Ok(chat_events) = registry.listen(&chat_user).await else {
            panic!("listen failed");
        };
        assert_eq!(chat_events.len(), 1);
        assert_eq!(chat_events.first().map(|e| e.domain.clone()), Some(domain("chat")));
    }

    #[tokio::test]
    async fn event_published_before_unregister_is_still_delivered() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);
        registry.register(&user, domain("news"), None);

        let _ = registry.add_event(&domain("chat"), message("pending"));
        registry.unregister(&user, &domain("chat"));
        let _ = registry.add_event(&domain("chat"), message("after"));

        let Ok(events) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert_eq!(events, vec![DomainEvent::new(domain("chat"), message("pending"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn reject_all_filter_blocks_every_event() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), Some(EventFilterSpec::RejectAll.into_shared()));
        for i in 0..100 {
            let _ = registry.add_event(&domain("chat"), message(&i.to_string()));
        }
        let Ok(events) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn filter_can_be_attached_and_detached() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);

        assert!(registry
            .register_event_filter(&user, &domain("chat"), EventFilterSpec::RejectAll.into_shared())
            .is_ok());
        assert!(registry.get_event_filter(&user, &domain("chat")).is_some());
        assert_eq!(registry.add_event(&domain("chat"), message("x")).ok(), Some(0));

        assert!(registry.deregister_event_filter(&user, &domain("chat")).is_ok());
        assert_eq!(registry.add_event(&domain("chat"), message("y")).ok(), Some(1));

        assert!(matches!(
            registry.register_event_filter(&user, &domain("news"), EventFilterSpec::RejectAll.into_shared()),
            Err(EventServiceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn filter_changes_leave_queued_events_alone() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);
        assert_eq!(registry.add_event(&domain("chat"), message("queued")).ok(), Some(1));

        assert!(registry
            .register_event_filter(&user, &domain("chat"), EventFilterSpec::RejectAll.into_shared())
            .is_ok());
        let Ok(events) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert_eq!(events, vec![DomainEvent::new(domain("chat"), message("queued"))]);

        let filter = Arc::new(crate::domain::FnFilter::new(|e: &Event| {
            e.field("text") == Some(&serde_json::json!("kept"))
        }));
        assert!(registry.register_event_filter(&user, &domain("chat"), filter).is_ok());
        assert_eq!(registry.add_event(&domain("chat"), message("kept")).ok(), Some(1));
        assert!(registry.deregister_event_filter(&user, &domain("chat")).is_ok());
        let Ok(events) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert_eq!(events, vec![DomainEvent::new(domain("chat"), message("kept"))]);
    }

    #[tokio::test]
    async fn register_moves_to_fresh_record_after_concurrent_removal() {
        let registry = registry();
        let user = UserId::new("u1");
        let stale = registry.user_manager().add_user(&user);
        assert!(registry.user_manager().remove_user(&user).is_some());

        registry.register_on(&user, stale, &domain("chat"), None);

        assert!(registry.is_user_registered(&user));
        assert_eq!(registry.registered_users(&domain("chat")), vec![user.clone()]);
        assert_eq!(registry.add_event(&domain("chat"), message("hi")).ok(), Some(1));
        let Ok(events) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert_eq!(events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_cleanup_publishes_unlisten_and_prunes_index() {
        let registry = registry();
        let watcher = UserId::new("watcher");
        let idle = UserId::new("idle");
        registry.register(&idle, domain("chat"), None);
        tokio::time::advance(Duration::from_millis(95_000)).await;
        registry.register(&watcher, Domain::unlisten(), None);

        let manager = registry.user_manager();
        assert!(manager.check_user_timeouts(Instant::now(), false).is_empty());
        for user in manager.timed_out_users() {
            assert!(manager.remove_user(user.user_id()).is_some());
        }

        assert!(registry.registered_users(&domain("chat")).is_empty());
        let Ok(events) = registry.listen(&watcher).await else {
            panic!("listen failed");
        };
        let Some(Ok(payload)) = events.first().map(|e| e.event.decode::<UnlistenEvent>()) else {
            panic!("expected an unlisten event");
        };
        assert_eq!(payload.user_id, "idle");
        assert!(payload.timeout);
    }

    #[tokio::test]
    async fn closing_a_user_is_not_reported_as_timeout() {
        let registry = registry();
        let watcher = UserId::new("watcher");
        let leaving = UserId::new("leaving");
        registry.register(&watcher, Domain::unlisten(), None);
        registry.register(&leaving, domain("chat"), None);

        assert!(registry.unregister_user(&leaving));
        assert!(!registry.unregister_user(&leaving));

        let Ok(events) = registry.listen(&watcher).await else {
            panic!("listen failed");
        };
        assert_eq!(events.len(), 1);
        let Some(Ok(payload)) = events.first().map(|e| e.event.decode::<UnlistenEvent>()) else {
            panic!("expected an unlisten event");
        };
        assert_eq!(payload.user_id, "leaving");
        assert!(!payload.timeout);
    }

    #[tokio::test]
    async fn register_keeps_existing_filter() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), Some(EventFilterSpec::RejectAll.into_shared()));
        registry.register(&user, domain("chat"), None);
        assert!(registry.get_event_filter(&user, &domain("chat")).is_some());
        assert_eq!(registry.registered_users(&domain("chat")), vec![user]);
    }

    #[tokio::test]
    async fn unregistering_last_domain_releases_queue_but_keeps_user() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);
        let _ = registry.add_event(&domain("chat"), message("dropped"));

        registry.unregister_all(&user, &[domain("chat")]);
        assert!(!registry.is_user_registered(&user));
        assert!(registry.user_manager().is_user_contained(&user));
        assert!(registry.registered_domains().is_empty());
        assert_eq!(
            registry.user_manager().get_user(&user).map(|u| u.pending_events()),
            Some(0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn removing_user_aborts_blocked_listen() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);

        let listener = {
            let registry = registry.clone();
            let user = user.clone();
            tokio::spawn(async move { registry.listen(&user).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.unregister_user(&user));

        let Ok(result) = listener.await else {
            panic!("listen task failed");
        };
        assert!(matches!(result, Err(EventServiceError::UnknownUser(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn second_concurrent_listen_is_rejected() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);

        let first = {
            let registry = registry.clone();
            let user = user.clone();
            tokio::spawn(async move { registry.listen(&user).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            registry.listen(&user).await,
            Err(EventServiceError::InvalidRequest(_))
        ));
        let _ = first.await;
    }

    #[tokio::test]
    async fn user_specific_events_bypass_subscriptions() {
        let registry = registry();
        let user = UserId::new("u1");
        registry.register(&user, domain("chat"), None);

        assert!(registry.add_user_event(&user, message("private")).is_ok());
        assert!(registry.add_event(&Domain::user_specific(), message("x")).is_err());
        assert!(matches!(
            registry.add_user_event(&UserId::new("ghost"), message("x")),
            Err(EventServiceError::UnknownUser(_))
        ));

        let Ok(events) = registry.listen(&user).await else {
            panic!("listen failed");
        };
        assert_eq!(
            events,
            vec![DomainEvent::new(Domain::user_specific(), message("private"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_eviction_publishes_unlisten_and_forgets_user() {
        let registry = registry();
        let watcher = UserId::new("watcher");
        let idle = UserId::new("idle");
        registry.register(&idle, domain("chat"), None);
        tokio::time::advance(Duration::from_millis(95_000)).await;
        registry.register(&watcher, Domain::unlisten(), None);

        let evicted = registry
            .user_manager()
            .check_user_timeouts(Instant::now(), true);
        assert_eq!(evicted.len(), 1);
        assert!(registry.registered_users(&domain("chat")).is_empty());
        assert!(matches!(
            registry.listen(&idle).await,
            Err(EventServiceError::UnknownUser(_))
        ));

        let Ok(events) = registry.listen(&watcher).await else {
            panic!("listen failed");
        };
        let Some(unlisten) = events.first() else {
            panic!("expected an unlisten event");
        };
        assert!(unlisten.domain.is_unlisten());
        assert!(unlisten.event.is::<UnlistenEvent>());
        let Ok(payload) = unlisten.event.decode::<UnlistenEvent>() else {
            panic!("unlisten payload decodes");
        };
        assert_eq!(payload.user_id, "idle");
        assert!(payload.timeout);
        assert!(payload.domains.contains(&domain("chat")));
        assert_eq!(UnlistenEvent::TYPE, "unlisten");
    }

    #[tokio::test]
    async fn domain_names_are_interned() {
        let registry = registry();
        let Ok(a) = registry.domain("chat") else {
            panic!("valid domain");
        };
        let Ok(b) = registry.domain(" chat") else {
            panic!("valid domain");
        };
        assert_eq!(a, b);
        assert!(registry.domain("").is_err());
    }
}
