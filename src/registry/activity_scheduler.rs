//! Background eviction of idle users.
//!
//! [`UserActivityScheduler`] runs a Tokio task that wakes every poll
//! interval and asks the [`UserManager`] to check user timeouts. The task
//! only holds a weak reference to the manager and ends on its own once the
//! manager is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::user_manager::UserManager;
use crate::error::EventServiceError;

/// Periodic idle-user scanner.
#[derive(Debug)]
pub struct UserActivityScheduler {
    timeout: Duration,
    poll_interval: Duration,
    auto_clean: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UserActivityScheduler {
    /// Creates an inactive scheduler.
    #[must_use]
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            auto_clean: Arc::new(AtomicBool::new(true)),
            task: Mutex::new(None),
        }
    }

    /// Idle time after which a user counts as timed out.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time between two scans.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns `true` if timed out users are evicted rather than marked.
    #[must_use]
    pub fn is_auto_clean(&self) -> bool {
        self.auto_clean.load(Ordering::Acquire)
    }

    /// Returns `true` while the background task is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the scan loop unless it is already running.
    ///
    /// # Errors
    ///
    /// Returns [`EventServiceError::Configuration`] when called outside a
    /// Tokio runtime.
    pub(crate) fn start(
        &self,
        manager: Weak<UserManager>,
        auto_clean: bool,
    ) -> Result<(), EventServiceError> {
        self.auto_clean.store(auto_clean, Ordering::Release);

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            EventServiceError::Configuration(format!("activity scheduler needs a runtime: {e}"))
        })?;

        let poll_interval = self.poll_interval;
        let flag = Arc::clone(&self.auto_clean);
        *task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let evicted =
                    manager.check_user_timeouts(Instant::now(), flag.load(Ordering::Acquire));
                if !evicted.is_empty() {
                    tracing::debug!(evicted = evicted.len(), "activity scan finished");
                }
            }
            tracing::debug!("activity scheduler stopped");
        }));

        tracing::info!(
            poll_ms = u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX),
            auto_clean,
            "activity scheduler started"
        );
        Ok(())
    }

    /// Stops the scan loop. Idempotent.
    pub(crate) fn stop(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            tracing::info!("activity scheduler deactivated");
        }
    }
}

impl Drop for UserActivityScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
