//! Хранилище: объявления, пользователи, сессии диалогов и заявки.
//!
//! - [`SqliteStore`] – рабочая реализация на sqlx
//! - [`MemoryStore`] – реализация в памяти для тестов и локального запуска

mod memory;
mod models;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::query::{Column, Predicate, Value};

pub use memory::MemoryStore;
pub use models::{AdSubmission, AnswerField, Listing, ListingKind, Subscription, UserRecord, UserStats};
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Уникальные значения колонки среди объявлений под фильтром
    async fn distinct_values(&self, column: Column, filter: &Predicate) -> Result<Vec<Value>, StoreError>;

    /// Страница объявлений, новые первыми
    async fn fetch_page(&self, filter: &Predicate, offset: usize, limit: usize) -> Result<Vec<Listing>, StoreError>;

    /// Объявления, появившиеся после `after`, новые первыми
    async fn fetch_created_after(
        &self,
        filter: &Predicate,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Listing>, StoreError>;

    async fn insert_listing(&self, listing: &Listing) -> Result<i64, StoreError>;

    async fn remove_listing(&self, id: i64) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Создаёт пользователя при первом обращении и отмечает активность
    async fn touch_user(&self, id: i64, nickname: Option<&str>, now: DateTime<Utc>) -> Result<UserRecord, StoreError>;

    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, StoreError>;

    async fn set_subscription(
        &self,
        id: i64,
        subscription: Option<&Subscription>,
        last_viewed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn set_last_viewed(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn set_admin(&self, id: i64, is_admin: bool) -> Result<(), StoreError>;

    async fn subscribed_users(&self) -> Result<Vec<UserRecord>, StoreError>;

    async fn admin_ids(&self) -> Result<Vec<i64>, StoreError>;

    async fn user_stats(&self, since: DateTime<Utc>) -> Result<UserStats, StoreError>;
}

/// Состояние диалога хранится как непрозрачная строка под ключом пользователя
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, user_id: i64, key: &str) -> Result<Option<String>, StoreError>;

    async fn save_session(&self, user_id: i64, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove_session(&self, user_id: i64, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn save_submission(&self, submission: &AdSubmission) -> Result<i64, StoreError>;

    async fn submissions_for(&self, user_id: i64) -> Result<Vec<AdSubmission>, StoreError>;
}
