//! Persistence trait seam (§9, ambient). Every owned collection —
//! `QueueEntry`, `Venue`, `User`, push subscriptions — is reached only
//! through the `Store` trait so a `sqlx`-backed implementation can replace
//! `InMemoryStore` without touching component logic. `InMemoryStore` mirrors
//! the reference server's habit of layering several purpose-built `DashMap`s
//! over one logical stream rather than reaching for a generic document
//! store.

use dashmap::DashMap;
use std::sync::Arc;

use crate::errors::{QueueError, QueueResult};
use crate::models::{QueueEntry, QueueId, User, UserId, Venue, VenueId};

#[derive(Clone, Debug)]
pub struct PushSubscription {
    pub user_id: UserId,
    pub endpoint: String,
    pub p256dh_key: String,
    pub auth_key: String,
}

pub trait Store: Send + Sync {
    fn create_entry(&self, entry: QueueEntry) -> QueueResult<()>;
    fn get_entry(&self, id: &str) -> QueueResult<QueueEntry>;
    fn update_entry(&self, entry: QueueEntry) -> QueueResult<()>;

    /// The entry for (user, venue) currently in a non-terminal state, if any.
    fn active_entry_for_user_venue(&self, user_id: &str, venue_id: &str) -> Option<QueueEntry>;

    /// All non-terminal entries for a user, across every venue (used by the
    /// multi-venue suspicious-pattern check, §4.C).
    fn active_entries_for_user(&self, user_id: &str) -> Vec<QueueEntry>;

    /// All entries for a venue, any status (callers filter as needed).
    fn entries_for_venue(&self, venue_id: &str) -> Vec<QueueEntry>;

    /// All entries in a given status, for the sweepers (§4.J).
    fn entries_in_status(&self, status: crate::models::QueueStatus) -> Vec<QueueEntry>;

    fn get_venue(&self, id: &str) -> QueueResult<Venue>;
    fn get_user(&self, id: &str) -> QueueResult<User>;

    fn put_venue(&self, venue: Venue);
    fn put_user(&self, user: User);

    fn push_subscriptions_for_user(&self, user_id: &str) -> Vec<PushSubscription>;
    fn put_push_subscription(&self, sub: PushSubscription);
    fn remove_push_subscription(&self, user_id: &str, endpoint: &str);
}

pub struct InMemoryStore {
    entries: DashMap<QueueId, QueueEntry>,
    venues: DashMap<VenueId, Venue>,
    users: DashMap<UserId, User>,
    push_subs: DashMap<UserId, Vec<PushSubscription>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            venues: DashMap::new(),
            users: DashMap::new(),
            push_subs: DashMap::new(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for InMemoryStore {
    fn create_entry(&self, entry: QueueEntry) -> QueueResult<()> {
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    fn get_entry(&self, id: &str) -> QueueResult<QueueEntry> {
        self.entries
            .get(id)
            .map(|e| e.clone())
            .ok_or(QueueError::QueueNotFound)
    }

    fn update_entry(&self, entry: QueueEntry) -> QueueResult<()> {
        if !self.entries.contains_key(&entry.id) {
            return Err(QueueError::QueueNotFound);
        }
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    fn active_entry_for_user_venue(&self, user_id: &str, venue_id: &str) -> Option<QueueEntry> {
        self.entries
            .iter()
            .find(|e| e.user_id == user_id && e.venue_id == venue_id && e.is_active())
            .map(|e| e.clone())
    }

    fn active_entries_for_user(&self, user_id: &str) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.user_id == user_id && e.is_active())
            .map(|e| e.clone())
            .collect()
    }

    fn entries_for_venue(&self, venue_id: &str) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.venue_id == venue_id)
            .map(|e| e.clone())
            .collect()
    }

    fn entries_in_status(&self, status: crate::models::QueueStatus) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.clone())
            .collect()
    }

    fn get_venue(&self, id: &str) -> QueueResult<Venue> {
        self.venues.get(id).map(|v| v.clone()).ok_or(QueueError::VenueNotFound)
    }

    fn get_user(&self, id: &str) -> QueueResult<User> {
        self.users.get(id).map(|u| u.clone()).ok_or(QueueError::InvalidUserId)
    }

    fn put_venue(&self, venue: Venue) {
        self.venues.insert(venue.id.clone(), venue);
    }

    fn put_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    fn push_subscriptions_for_user(&self, user_id: &str) -> Vec<PushSubscription> {
        self.push_subs.get(user_id).map(|v| v.clone()).unwrap_or_default()
    }

    fn put_push_subscription(&self, sub: PushSubscription) {
        self.push_subs.entry(sub.user_id.clone()).or_default().push(sub);
    }

    fn remove_push_subscription(&self, user_id: &str, endpoint: &str) {
        if let Some(mut subs) = self.push_subs.get_mut(user_id) {
            subs.retain(|s| s.endpoint != endpoint);
        }
    }
}

pub type SharedStore = Arc<dyn Store>;
