//! Local listener callbacks of the client.

use std::fmt;

use crate::domain::{DomainEvent, UnlistenEvent};

/// Receives events of the domains it was added for.
///
/// Called on the listen task: keep the work short, every call delays the
/// next listen request. Listeners may add or remove listeners from inside
/// [`RemoteEventListener::apply`].
pub trait RemoteEventListener: Send + Sync {
    /// Handles one event.
    fn apply(&self, event: &DomainEvent);
}

/// Receives [`UnlistenEvent`]s of other clients.
pub trait UnlistenEventListener: Send + Sync {
    /// Handles one unlisten notification.
    fn on_unlisten(&self, event: &UnlistenEvent);
}

/// Adapts a closure into a [`RemoteEventListener`].
pub struct FnListener<F>(F);

impl<F> FnListener<F>
where
    F: Fn(&DomainEvent) + Send + Sync,
{
    /// Wraps `f`.
    #[must_use]
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> RemoteEventListener for FnListener<F>
where
    F: Fn(&DomainEvent) + Send + Sync,
{
    fn apply(&self, event: &DomainEvent) {
        (self.0)(event);
    }
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnListener")
    }
}

/// Decodes unlisten payloads for an [`UnlistenEventListener`].
pub(crate) struct UnlistenAdapter<L: ?Sized>(pub(crate) std::sync::Arc<L>);

impl<L> RemoteEventListener for UnlistenAdapter<L>
where
    L: UnlistenEventListener + ?Sized,
{
    fn apply(&self, event: &DomainEvent) {
        if !event.event.is::<UnlistenEvent>() {
            return;
        }
        match event.event.decode::<UnlistenEvent>() {
            Ok(unlisten) => self.0.on_unlisten(&unlisten),
            Err(e) => tracing::warn!(error = %e, "malformed unlisten event dropped"),
        }
    }
}
