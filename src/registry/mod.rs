//! Server-side registry: users, subscriptions, queues and eviction.
//!
//! [`EventRegistry`] is the entry point. It owns a [`UserManager`], which in
//! turn owns the [`UserActivityScheduler`].

pub mod activity_scheduler;
pub mod domain_user_mapping;
pub mod event_registry;
pub mod user_info;
pub mod user_manager;

pub use activity_scheduler::UserActivityScheduler;
pub use domain_user_mapping::DomainUserMapping;
pub use event_registry::EventRegistry;
pub use user_info::{Registration, UserInfo};
pub use user_manager::{RemovedUser, UserManager, UserRemovalListener};
