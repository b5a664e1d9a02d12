use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AdSubmission, Listing, ListingStore, SessionStore, SubmissionStore, Subscription, UserRecord, UserStats,
    UserStore,
};
use crate::error::StoreError;
use crate::query::{Column, Predicate, Value};

#[derive(Default)]
struct Inner {
    listings: Vec<Listing>,
    next_listing_id: i64,
    users: HashMap<i64, UserRecord>,
    sessions: HashMap<(i64, String), String>,
    submissions: Vec<AdSubmission>,
}

/// Все хранилища в одной структуре под RwLock
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_listings(listings: Vec<Listing>) -> Self {
        let store = Self::new();
        for listing in listings {
            // Ошибок у хранилища в памяти не бывает
            let _ = store.insert_listing(&listing).await;
        }
        store
    }

    pub async fn listings(&self) -> Vec<Listing> {
        self.inner.read().await.listings.clone()
    }

    fn sorted_matches<'a>(listings: &'a [Listing], filter: &Predicate) -> Vec<&'a Listing> {
        let mut matched: Vec<&Listing> = listings.iter().filter(|l| filter.matches(l)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matched
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn distinct_values(&self, column: Column, filter: &Predicate) -> Result<Vec<Value>, StoreError> {
        let inner = self.inner.read().await;
        let mut values: Vec<Value> = Vec::new();
        for listing in inner.listings.iter().filter(|l| filter.matches(l)) {
            if let Some(v) = column.value_of(listing) {
                if !values.contains(&v) {
                    values.push(v);
                }
            }
        }
        Ok(values)
    }

    async fn fetch_page(&self, filter: &Predicate, offset: usize, limit: usize) -> Result<Vec<Listing>, StoreError> {
        let inner = self.inner.read().await;
        Ok(Self::sorted_matches(&inner.listings, filter)
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_created_after(
        &self,
        filter: &Predicate,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Listing>, StoreError> {
        let inner = self.inner.read().await;
        Ok(Self::sorted_matches(&inner.listings, filter)
            .into_iter()
            .filter(|l| l.created_at > after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_listing(&self, listing: &Listing) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_listing_id += 1;
        let id = inner.next_listing_id;
        let mut listing = listing.clone();
        listing.id = id;
        inner.listings.push(listing);
        Ok(id)
    }

    async fn remove_listing(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.listings.len();
        inner.listings.retain(|l| l.id != id);
        Ok(inner.listings.len() != before)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn touch_user(&self, id: i64, nickname: Option<&str>, now: DateTime<Utc>) -> Result<UserRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .entry(id)
            .or_insert_with(|| UserRecord::new(id, nickname.map(str::to_string), now));
        user.last_active_at = now;
        if nickname.is_some() {
            user.nickname = nickname.map(str::to_string);
        }
        Ok(user.clone())
    }

    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn set_subscription(
        &self,
        id: i64,
        subscription: Option<&Subscription>,
        last_viewed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
        user.subscription = subscription.cloned();
        user.last_viewed_at = last_viewed_at;
        Ok(())
    }

    async fn set_last_viewed(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&id) {
            user.last_viewed_at = Some(at);
        }
        Ok(())
    }

    async fn set_admin(&self, id: i64, is_admin: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .entry(id)
            .or_insert_with(|| UserRecord::new(id, None, Utc::now()));
        user.is_admin = is_admin;
        Ok(())
    }

    async fn subscribed_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut users: Vec<UserRecord> = inner
            .users
            .values()
            .filter(|u| u.subscription.is_some())
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn admin_ids(&self) -> Result<Vec<i64>, StoreError> {
        let inner = self.inner.read().await;
        let mut ids: Vec<i64> = inner.users.values().filter(|u| u.is_admin).map(|u| u.id).collect();
        ids.sort();
        Ok(ids)
    }

    async fn user_stats(&self, since: DateTime<Utc>) -> Result<UserStats, StoreError> {
        let inner = self.inner.read().await;
        Ok(UserStats {
            total: inner.users.len() as i64,
            active_last_hour: inner.users.values().filter(|u| u.last_active_at >= since).count() as i64,
            subscribed: inner.users.values().filter(|u| u.subscription.is_some()).count() as i64,
        })
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(&self, user_id: i64, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .get(&(user_id, key.to_string()))
            .cloned())
    }

    async fn save_session(&self, user_id: i64, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .sessions
            .insert((user_id, key.to_string()), value.to_string());
        Ok(())
    }

    async fn remove_session(&self, user_id: i64, key: &str) -> Result<(), StoreError> {
        self.inner.write().await.sessions.remove(&(user_id, key.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn save_submission(&self, submission: &AdSubmission) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.submissions.push(submission.clone());
        Ok(inner.submissions.len() as i64)
    }

    async fn submissions_for(&self, user_id: i64) -> Result<Vec<AdSubmission>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .submissions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }
}
