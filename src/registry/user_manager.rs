//! Directory of connected users.
//!
//! [`UserManager`] maps user ids to [`UserInfo`] records and owns the
//! [`UserActivityScheduler`] that evicts idle users. The event registry hooks
//! into every removal through [`UserRemovalListener`] only, so the manager
//! does not depend on it.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::activity_scheduler::UserActivityScheduler;
use super::user_info::UserInfo;
use crate::domain::{Domain, UserId};
use crate::error::EventServiceError;

/// A user taken out of the directory, with the domains it held.
#[derive(Debug, Clone)]
pub struct RemovedUser {
    /// The removed record. Its subscriptions and queue are already cleared.
    pub user: Arc<UserInfo>,
    /// Domains the user was registered to at removal time.
    pub domains: BTreeSet<Domain>,
    /// `true` if the user was removed for inactivity.
    pub timeout: bool,
}

/// Callback invoked whenever a user leaves the directory.
pub trait UserRemovalListener: Send + Sync {
    /// Called once per removed user, after it left the directory.
    fn on_user_removed(&self, removed: &RemovedUser);
}

/// Concurrent user directory with activity-based eviction.
#[derive(Debug)]
pub struct UserManager {
    users: DashMap<UserId, Arc<UserInfo>>,
    removal_listeners: RwLock<Vec<Weak<dyn UserRemovalListener>>>,
    scheduler: UserActivityScheduler,
}

impl UserManager {
    /// Creates an empty directory. Users idle for longer than `timeout` are
    /// evicted once the scheduler is activated; it scans every
    /// `poll_interval`.
    #[must_use]
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            users: DashMap::new(),
            removal_listeners: RwLock::new(Vec::new()),
            scheduler: UserActivityScheduler::new(timeout, poll_interval),
        }
    }

    /// Returns the record for `user_id`, creating it if needed.
    pub fn add_user(&self, user_id: &UserId) -> Arc<UserInfo> {
        let entry = self.users.entry(user_id.clone()).or_insert_with(|| {
            tracing::debug!(user_id = %user_id, "user added");
            Arc::new(UserInfo::new(user_id.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Removes a user, clearing its subscriptions and queue and waking a
    /// waiting listen call, which then fails with an unknown user error.
    /// Removal listeners are notified; a user flagged as timed out is
    /// reported as a timeout.
    pub fn remove_user(&self, user_id: &UserId) -> Option<RemovedUser> {
        self.take_user(user_id, None)
    }

    /// Removes a user on its own request; never reported as a timeout.
    pub(crate) fn close_user(&self, user_id: &UserId) -> Option<RemovedUser> {
        self.take_user(user_id, Some(false))
    }

    fn take_user(&self, user_id: &UserId, timeout: Option<bool>) -> Option<RemovedUser> {
        let (_, user) = self.users.remove(user_id)?;
        let timeout = timeout.unwrap_or_else(|| user.is_timed_out());
        let domains = user.mark_removed();
        tracing::debug!(user_id = %user_id, domains = domains.len(), timeout, "user removed");
        let removed = RemovedUser {
            user,
            domains,
            timeout,
        };
        self.notify_removed(&removed);
        Some(removed)
    }

    /// Removes every user.
    pub fn remove_users(&self) -> Vec<RemovedUser> {
        let ids: Vec<UserId> = self.users.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove_user(id)).collect()
    }

    /// Returns `true` if a record exists for `user_id`.
    #[must_use]
    pub fn is_user_contained(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    /// Returns the record for `user_id`.
    #[must_use]
    pub fn get_user(&self, user_id: &UserId) -> Option<Arc<UserInfo>> {
        self.users.get(user_id).map(|e| Arc::clone(e.value()))
    }

    /// Returns the record for `user_id` or an unknown user error.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::UnknownUser`] if no record exists.
    pub fn require_user(&self, user_id: &UserId) -> Result<Arc<UserInfo>, EventServiceError> {
        self.get_user(user_id)
            .ok_or_else(|| EventServiceError::UnknownUser(user_id.to_string()))
    }

    /// Returns all records.
    #[must_use]
    pub fn get_users(&self) -> Vec<Arc<UserInfo>> {
        self.users.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn get_user_count(&self) -> usize {
        self.users.len()
    }

    /// Returns users flagged idle by a scheduler running without auto-clean.
    #[must_use]
    pub fn timed_out_users(&self) -> Vec<Arc<UserInfo>> {
        self.users
            .iter()
            .filter(|e| e.value().is_timed_out())
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Registers a callback for removals, evictions included. Dropped
    /// listeners are skipped.
    pub fn add_timeout_listener(&self, listener: Weak<dyn UserRemovalListener>) {
        self.removal_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Starts the activity scheduler. Calling it again while it runs only
    /// updates the auto-clean mode.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Configuration`] when called outside a
    /// Tokio runtime.
    pub fn activate_user_activity_scheduler(
        self: &Arc<Self>,
        auto_clean: bool,
    ) -> Result<(), EventServiceError> {
        self.scheduler.start(Arc::downgrade(self), auto_clean)
    }

    /// Stops the activity scheduler. Existing records are kept.
    pub fn deactivate_user_activity_scheduler(&self) {
        self.scheduler.stop();
    }

    /// Returns the activity scheduler.
    #[must_use]
    pub const fn user_activity_scheduler(&self) -> &UserActivityScheduler {
        &self.scheduler
    }

    /// Runs one timeout scan as of `now`. Returns the users evicted, which is
    /// always empty without auto-clean.
    ///
    /// Users with a listen call in flight are never evicted: the listen call
    /// touches them when it returns.
    pub fn check_user_timeouts(&self, now: Instant, auto_clean: bool) -> Vec<RemovedUser> {
        let timeout = self.scheduler.timeout();
        let idle: Vec<Arc<UserInfo>> = self
            .users
            .iter()
            .filter(|e| !e.value().is_listening() && e.value().idle_for(now) > timeout)
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut evicted = Vec::new();
        for user in idle {
            if !auto_clean {
                if user.mark_timed_out() {
                    tracing::info!(user_id = %user.user_id(), "user timed out, awaiting manual cleanup");
                }
                continue;
            }
            // The user may have become active between the scan and now.
            if user.is_listening() || user.idle_for(now) <= timeout {
                continue;
            }
            if let Some(removed) = self.take_user(user.user_id(), Some(true)) {
                tracing::info!(
                    user_id = %removed.user.user_id(),
                    idle_ms = u64::try_from(removed.user.idle_for(now).as_millis()).unwrap_or(u64::MAX),
                    "user evicted after inactivity"
                );
                evicted.push(removed);
            }
        }
        evicted
    }

    fn notify_removed(&self, removed: &RemovedUser) {
        let listeners: Vec<Arc<dyn UserRemovalListener>> = self
            .removal_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for listener in listeners {
            listener.on_user_removed(removed);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn manager() -> Arc<UserManager> {
        Arc::new(UserManager::new(
            Duration::from_secs(90),
            Duration::from_secs(30),
        ))
    }

    #[derive(Default)]
    struct RecordingListener {
        removed: Mutex<Vec<(UserId, bool)>>,
    }

    impl RecordingListener {
        fn attach(mgr: &UserManager) -> Arc<Self> {
            let listener = Arc::new(Self::default());
            let weak: Weak<dyn UserRemovalListener> =
                Arc::downgrade(&listener) as Weak<dyn UserRemovalListener>;
            mgr.add_timeout_listener(weak);
            listener
        }

        fn recorded(&self) -> Vec<(UserId, bool)> {
            self.removed.lock().map(|v| v.clone()).unwrap_or_default()
        }
    }

    impl UserRemovalListener for RecordingListener {
        fn on_user_removed(&self, removed: &RemovedUser) {
            if let Ok(mut seen) = self.removed.lock() {
                seen.push((removed.user.user_id().clone(), removed.timeout));
            }
        }
    }

    #[test]
    fn add_get_remove() {
        let mgr = manager();
        let id = UserId::new("u1");
        let first = mgr.add_user(&id);
        let second = mgr.add_user(&id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mgr.get_user_count(), 1);
        assert!(mgr.is_user_contained(&id));

        let removed = mgr.remove_user(&id);
        assert!(removed.is_some());
        assert!(first.is_removed());
        assert!(mgr.get_user(&id).is_none());
        assert!(mgr.remove_user(&id).is_none());
    }

    #[test]
    fn require_user_reports_unknown() {
        let mgr = manager();
        assert!(matches!(
            mgr.require_user(&UserId::new("ghost")),
            Err(EventServiceError::UnknownUser(_))
        ));
    }

    #[test]
    fn remove_users_clears_directory() {
        let mgr = manager();
        mgr.add_user(&UserId::new("a"));
        mgr.add_user(&UserId::new("b"));
        assert_eq!(mgr.remove_users().len(), 2);
        assert_eq!(mgr.get_user_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_user_is_evicted_with_auto_clean() {
        let mgr = manager();
        let listener = RecordingListener::attach(&mgr);

        let id = UserId::new("u1");
        mgr.add_user(&id);
        tokio::time::advance(Duration::from_millis(95_000)).await;

        let evicted = mgr.check_user_timeouts(Instant::now(), true);
        assert_eq!(evicted.len(), 1);
        assert!(!mgr.is_user_contained(&id));
        assert_eq!(listener.recorded(), vec![(id, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn active_user_is_kept() {
        let mgr = manager();
        let id = UserId::new("u1");
        let user = mgr.add_user(&id);
        tokio::time::advance(Duration::from_secs(80)).await;
        user.touch();
        tokio::time::advance(Duration::from_secs(80)).await;

        assert!(mgr.check_user_timeouts(Instant::now(), true).is_empty());
        assert!(mgr.is_user_contained(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn listening_user_is_never_evicted() {
        let mgr = manager();
        let user = mgr.add_user(&UserId::new("u1"));
        let guard = user.begin_listen();
        tokio::time::advance(Duration::from_secs(120)).await;

        assert!(mgr.check_user_timeouts(Instant::now(), true).is_empty());
        drop(guard);
        assert_eq!(mgr.check_user_timeouts(Instant::now(), true).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn without_auto_clean_users_are_only_marked() {
        let mgr = manager();
        let id = UserId::new("u1");
        mgr.add_user(&id);
        tokio::time::advance(Duration::from_secs(95)).await;

        assert!(mgr.check_user_timeouts(Instant::now(), false).is_empty());
        assert!(mgr.is_user_contained(&id));
        assert_eq!(mgr.timed_out_users().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_cleanup_notifies_removal_listeners() {
        let mgr = manager();
        let listener = RecordingListener::attach(&mgr);
        let (idle, fresh) = (UserId::new("idle"), UserId::new("fresh"));
        mgr.add_user(&idle);
        tokio::time::advance(Duration::from_secs(95)).await;
        mgr.add_user(&fresh);
        assert!(mgr.check_user_timeouts(Instant::now(), false).is_empty());

        for user in mgr.timed_out_users() {
            assert!(mgr.remove_user(user.user_id()).is_some());
        }
        assert!(mgr.remove_user(&fresh).is_some());

        assert_eq!(listener.recorded(), vec![(idle, true), (fresh, false)]);
        assert_eq!(mgr.get_user_count(), 0);
    }
}
