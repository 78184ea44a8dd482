//! Reverse index from domains to registered users.
//!
//! [`UserInfo`](super::UserInfo) is authoritative for a user's
//! subscriptions; this index only narrows down which users an event has to
//! be offered to. Stale entries are tolerated and pruned lazily.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::domain::{Domain, UserId};

/// Domain → users index.
#[derive(Debug, Default)]
pub struct DomainUserMapping {
    index: DashMap<Domain, HashSet<UserId>>,
}

impl DomainUserMapping {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `user_id` is registered to `domain`.
    pub fn add(&self, domain: Domain, user_id: UserId) {
        self.index.entry(domain).or_default().insert(user_id);
    }

    /// Forgets a registration. Empty domain entries are dropped.
    pub fn remove(&self, domain: &Domain, user_id: &UserId) {
        if let Some(mut users) = self.index.get_mut(domain) {
            users.remove(user_id);
            if users.is_empty() {
                drop(users);
                self.index.remove_if(domain, |_, users| users.is_empty());
            }
        }
    }

    /// Forgets every listed registration of one user.
    pub fn remove_user<'a, I>(&self, user_id: &UserId, domains: I)
    where
        I: IntoIterator<Item = &'a Domain>,
    {
        for domain in domains {
            self.remove(domain, user_id);
        }
    }

    /// Returns the users registered to `domain`.
    #[must_use]
    pub fn users(&self, domain: &Domain) -> Vec<UserId> {
        self.index
            .get(domain)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every domain with at least one registered user.
    #[must_use]
    pub fn domains(&self) -> Vec<Domain> {
        self.index.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns `true` if no registrations are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str) -> Domain {
        Domain::new(name).unwrap_or_else(|_| Domain::unlisten())
    }

    #[test]
    fn add_and_remove_registrations() {
        let mapping = DomainUserMapping::new();
        let a = UserId::new("a");
        let b = UserId::new("b");
        mapping.add(domain("chat"), a.clone());
        mapping.add(domain("chat"), b.clone());
        mapping.add(domain("news"), a.clone());

        let mut users = mapping.users(&domain("chat"));
        users.sort();
        assert_eq!(users, vec![a.clone(), b.clone()]);

        mapping.remove_user(&a, [&domain("chat"), &domain("news")]);
        assert_eq!(mapping.users(&domain("chat")), vec![b.clone()]);
        assert!(mapping.users(&domain("news")).is_empty());
        assert_eq!(mapping.domains(), vec![domain("chat")]);

        mapping.remove(&domain("chat"), &b);
        assert!(mapping.is_empty());
    }
}
