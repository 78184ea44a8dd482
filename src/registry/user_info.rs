//! Per-user registry state.
//!
//! [`UserInfo`] bundles everything the registry knows about one connected
//! client. Queue and subscriptions sit behind one short-lived mutex; the
//! blocking part of a listen call waits on a [`Notify`] instead, so no lock
//! is ever held across an await point.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{Domain, DomainEvent, Event, SharedEventFilter, UserId};

/// Queue and subscriptions of a user.
#[derive(Debug, Default)]
pub(crate) struct UserState {
    /// Registered domains with their optional filter.
    pub(crate) domains: HashMap<Domain, Option<SharedEventFilter>>,
    /// Pending events in publish order.
    pub(crate) queue: VecDeque<DomainEvent>,
    /// Set once the user has been removed from the user manager.
    pub(crate) removed: bool,
}

/// Outcome of [`UserInfo::register_domain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The domain was added.
    Added,
    /// The domain was already registered; its filter is unchanged.
    AlreadyRegistered,
    /// The record was removed from the user manager and takes no new
    /// registrations.
    UserRemoved,
}

/// Server-side record of a connected user.
#[derive(Debug)]
pub struct UserInfo {
    user_id: UserId,
    state: Mutex<UserState>,
    notify: Notify,
    last_activity: Mutex<Instant>,
    listening: AtomicBool,
    timed_out: AtomicBool,
}

impl UserInfo {
    /// Creates a user with no subscriptions, active as of now.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            state: Mutex::new(UserState::default()),
            notify: Notify::new(),
            last_activity: Mutex::new(Instant::now()),
            listening: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
        }
    }

    /// Returns the user id.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, UserState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a domain. An already registered domain keeps its filter.
    pub fn register_domain(&self, domain: Domain, filter: Option<SharedEventFilter>) -> Registration {
        let mut state = self.lock_state();
        if state.removed {
            return Registration::UserRemoved;
        }
        if state.domains.contains_key(&domain) {
            return Registration::AlreadyRegistered;
        }
        state.domains.insert(domain, filter);
        Registration::Added
    }

    /// Removes domains. Returns the ones that were actually registered.
    ///
    /// Queued events stay deliverable, except when no domain is left: then
    /// the queue is released as well.
    pub fn unregister_domains<'a, I>(&self, domains: I) -> Vec<Domain>
    where
        I: IntoIterator<Item = &'a Domain>,
    {
        let mut state = self.lock_state();
        let removed: Vec<Domain> = domains
            .into_iter()
            .filter_map(|d| state.domains.remove_entry(d).map(|(domain, _)| domain))
            .collect();
        if state.domains.is_empty() {
            state.queue.clear();
        }
        removed
    }

    /// Returns `true` if the domain is registered.
    #[must_use]
    pub fn is_registered(&self, domain: &Domain) -> bool {
        self.lock_state().domains.contains_key(domain)
    }

    /// Returns the registered domains.
    #[must_use]
    pub fn domains(&self) -> BTreeSet<Domain> {
        self.lock_state().domains.keys().cloned().collect()
    }

    /// Returns `true` if at least one domain is registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.lock_state().domains.is_empty()
    }

    /// Replaces the filter of a registered domain. Returns `false` if the
    /// domain is not registered.
    pub fn set_filter(&self, domain: &Domain, filter: Option<SharedEventFilter>) -> bool {
        match self.lock_state().domains.get_mut(domain) {
            Some(slot) => {
                *slot = filter;
                true
            }
            None => false,
        }
    }

    /// Returns the filter of a registered domain.
    #[must_use]
    pub fn filter(&self, domain: &Domain) -> Option<SharedEventFilter> {
        self.lock_state().domains.get(domain).cloned().flatten()
    }

    /// Enqueues an event if the user is registered to its domain and the
    /// domain's filter accepts it. Wakes a waiting listen call.
    pub fn offer(&self, event: &DomainEvent) -> bool {
        {
            let mut state = self.lock_state();
            if state.removed {
                return false;
            }
            let accepted = match state.domains.get(&event.domain) {
                Some(Some(filter)) => filter.matches(&event.event),
                Some(None) => true,
                None => false,
            };
            if !accepted {
                return false;
            }
            state.queue.push_back(event.clone());
        }
        self.notify.notify_one();
        true
    }

    /// Enqueues an event on the user-specific domain, regardless of
    /// subscriptions. Returns `false` if the user has been removed.
    pub fn push_user_specific(&self, event: Event) -> bool {
        {
            let mut state = self.lock_state();
            if state.removed {
                return false;
            }
            state
                .queue
                .push_back(DomainEvent::new(Domain::user_specific(), event));
        }
        self.notify.notify_one();
        true
    }

    /// Number of queued events.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Resolves when an event arrives or the user is removed.
    ///
    /// Wakeups are stored as a permit, so a notification that happens
    /// between checking the queue and awaiting is not lost.
    pub(crate) async fn changed(&self) {
        self.notify.notified().await;
    }

    /// Marks the user removed, dropping subscriptions and queue, and wakes a
    /// waiting listen call. Returns the domains that were registered.
    pub(crate) fn mark_removed(&self) -> BTreeSet<Domain> {
        let domains = {
            let mut state = self.lock_state();
            state.removed = true;
            state.queue.clear();
            state.domains.drain().map(|(domain, _)| domain).collect()
        };
        self.notify.notify_one();
        domains
    }

    /// Returns `true` once the user has been removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.lock_state().removed
    }

    /// Records activity now and clears a pending timeout mark.
    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.timed_out.store(false, Ordering::Release);
    }

    /// Returns the instant of the last recorded activity.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns how long the user has been idle as of `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Claims the single listen slot of this user. Returns `None` if another
    /// listen call is already in flight.
    pub(crate) fn begin_listen(&self) -> Option<ListenGuard<'_>> {
        self.listening
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ListenGuard { user: self })
    }

    /// Returns `true` while a listen call is in flight.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Marks the user for manual cleanup. Returns `true` on the first mark.
    pub(crate) fn mark_timed_out(&self) -> bool {
        !self.timed_out.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` if the scheduler flagged the user as idle and no
    /// activity happened since.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }
}

/// Releases the listen slot on drop.
#[derive(Debug)]
pub(crate) struct ListenGuard<'a> {
    user: &'a UserInfo,
}

impl Drop for ListenGuard<'_> {
    fn drop(&mut self) {
        self.user.listening.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventFilterSpec, FnFilter};
    use std::sync::Arc;

    fn domain(name: &str) -> Domain {
        Domain::new(name).unwrap_or_else(|_| Domain::unlisten())
    }

    fn event(domain_name: &str, text: &str) -> DomainEvent {
        DomainEvent::new(
            domain(domain_name),
            Event::new("chat_message", serde_json::json!({ "text": text })),
        )
    }

    #[test]
    fn register_is_idempotent_and_keeps_filter() {
        let user = UserInfo::new(UserId::new("u1"));
        assert_eq!(
            user.register_domain(domain("chat"), Some(EventFilterSpec::RejectAll.into_shared())),
            Registration::Added
        );
        assert_eq!(
            user.register_domain(domain("chat"), None),
            Registration::AlreadyRegistered
        );
        assert!(user.filter(&domain("chat")).is_some());
    }

    #[test]
    fn offer_respects_registration_and_filter() {
        let user = UserInfo::new(UserId::new("u1"));
        assert!(!user.offer(&event("chat", "a")));

        user.register_domain(domain("chat"), None);
        assert!(user.offer(&event("chat", "a")));

        user.register_domain(
            domain("news"),
            Some(Arc::new(FnFilter::new(|e: &Event| {
                e.field("text") == Some(&serde_json::json!("keep"))
            }))),
        );
        assert!(!user.offer(&event("news", "drop")));
        assert!(user.offer(&event("news", "keep")));
        assert_eq!(user.pending_events(), 2);
    }

    #[test]
    fn queued_events_survive_partial_unregister() {
        let user = UserInfo::new(UserId::new("u1"));
        user.register_domain(domain("chat"), None);
        user.register_domain(domain("news"), None);
        user.offer(&event("chat", "a"));

        let removed = user.unregister_domains([&domain("chat")]);
        assert_eq!(removed, vec![domain("chat")]);
        assert_eq!(user.pending_events(), 1);
    }

    #[test]
    fn removing_last_domain_releases_queue() {
        let user = UserInfo::new(UserId::new("u1"));
        user.register_domain(domain("chat"), None);
        user.offer(&event("chat", "a"));

        user.unregister_domains([&domain("chat")]);
        assert!(!user.is_active());
        assert_eq!(user.pending_events(), 0);
    }

    #[test]
    fn removed_user_accepts_nothing() {
        let user = UserInfo::new(UserId::new("u1"));
        user.register_domain(domain("chat"), None);
        let domains = user.mark_removed();
        assert_eq!(domains.len(), 1);
        assert!(user.is_removed());
        assert!(!user.offer(&event("chat", "a")));
        assert!(!user.push_user_specific(Event::new("ping", serde_json::Value::Null)));
        assert_eq!(
            user.register_domain(domain("news"), None),
            Registration::UserRemoved
        );
        assert!(!user.is_registered(&domain("news")));
    }

    #[test]
    fn listen_slot_is_exclusive() {
        let user = UserInfo::new(UserId::new("u1"));
        let guard = user.begin_listen();
        assert!(guard.is_some());
        assert!(user.is_listening());
        assert!(user.begin_listen().is_none());
        drop(guard);
        assert!(!user.is_listening());
        assert!(user.begin_listen().is_some());
    }

    #[test]
    fn touch_clears_timeout_mark() {
        let user = UserInfo::new(UserId::new("u1"));
        assert!(user.mark_timed_out());
        assert!(!user.mark_timed_out());
        assert!(user.is_timed_out());
        user.touch();
        assert!(!user.is_timed_out());
    }
}
