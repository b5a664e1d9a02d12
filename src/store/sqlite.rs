//! SQLite-реализация хранилищ.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::info;

use super::{
    AdSubmission, AnswerField, Listing, ListingKind, ListingStore, SessionStore, SubmissionStore, Subscription,
    UserRecord, UserStats, UserStore,
};
use crate::currency::Currency;
use crate::error::StoreError;
use crate::query::{Column, Predicate, Value};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Создаёт пул (файл базы создаётся при необходимости) и таблицы
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        info!("Initializing SQLite pool: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // База в памяти живёт, пока жив её единственный коннект
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().max_connections(5).connect_with(options).await?
        };

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        info!("Creating database tables if not exist");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                district TEXT NOT NULL,
                street TEXT,
                residential_complex TEXT,
                rooms INTEGER NOT NULL,
                rent_price REAL NOT NULL,
                currency TEXT NOT NULL,
                living_area REAL,
                territory_area REAL,
                pets INTEGER NOT NULL DEFAULT 0,
                kids INTEGER NOT NULL DEFAULT 0,
                conditioner INTEGER NOT NULL DEFAULT 0,
                furniture INTEGER NOT NULL DEFAULT 0,
                latitude REAL,
                longitude REAL,
                link TEXT NOT NULL,
                media_group_size INTEGER NOT NULL DEFAULT 1,
                caption TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_listings_kind ON listings(kind)",
            "CREATE INDEX IF NOT EXISTS idx_listings_created_at ON listings(created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                nickname TEXT,
                is_admin INTEGER NOT NULL DEFAULT 0,
                subscription TEXT,
                subscription_text TEXT,
                last_viewed_at INTEGER,
                last_active_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                user_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ad_submissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                answers TEXT NOT NULL,
                photos TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Database tables created successfully");
        Ok(())
    }
}

fn bind_values<'q>(mut query: SqliteQuery<'q>, values: &'q [Value]) -> SqliteQuery<'q> {
    for value in values {
        query = match value {
            Value::Int(i) => query.bind(*i),
            Value::Real(r) => query.bind(*r),
            Value::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp {}", ms)))
}

fn decode_value(row: &SqliteRow, column: Column) -> Result<Value, StoreError> {
    let value = match column {
        Column::Rooms | Column::Pets | Column::Kids | Column::Conditioner | Column::Furniture => {
            Value::Int(row.try_get::<i64, _>("value")?)
        }
        c if c.is_numeric() => Value::Real(row.try_get::<f64, _>("value")?),
        _ => Value::Text(row.try_get::<String, _>("value")?),
    };
    Ok(value)
}

fn listing_from_row(row: &SqliteRow) -> Result<Listing, StoreError> {
    let kind: String = row.try_get("kind")?;
    let currency: String = row.try_get("currency")?;
    Ok(Listing {
        id: row.try_get("id")?,
        kind: ListingKind::parse(&kind).ok_or_else(|| StoreError::Corrupt(format!("listing kind {}", kind)))?,
        district: row.try_get("district")?,
        street: row.try_get("street")?,
        residential_complex: row.try_get("residential_complex")?,
        rooms: row.try_get("rooms")?,
        rent_price: row.try_get("rent_price")?,
        currency: Currency::from_str(&currency).map_err(StoreError::Corrupt)?,
        living_area: row.try_get("living_area")?,
        territory_area: row.try_get("territory_area")?,
        pets: row.try_get::<i64, _>("pets")? != 0,
        kids: row.try_get::<i64, _>("kids")? != 0,
        conditioner: row.try_get::<i64, _>("conditioner")? != 0,
        furniture: row.try_get::<i64, _>("furniture")? != 0,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        link: row.try_get("link")?,
        media_group_size: row.try_get("media_group_size")?,
        caption: row.try_get("caption")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord, StoreError> {
    let predicate: Option<String> = row.try_get("subscription")?;
    let summary: Option<String> = row.try_get("subscription_text")?;
    let subscription = match predicate {
        Some(raw) => Some(Subscription {
            predicate: serde_json::from_str(&raw)?,
            summary: summary.unwrap_or_default(),
        }),
        None => None,
    };
    let last_viewed_at = match row.try_get::<Option<i64>, _>("last_viewed_at")? {
        Some(ms) => Some(from_millis(ms)?),
        None => None,
    };
    Ok(UserRecord {
        id: row.try_get("id")?,
        nickname: row.try_get("nickname")?,
        is_admin: row.try_get::<i64, _>("is_admin")? != 0,
        subscription,
        last_viewed_at,
        last_active_at: from_millis(row.try_get("last_active_at")?)?,
    })
}

#[async_trait]
impl ListingStore for SqliteStore {
    async fn distinct_values(&self, column: Column, filter: &Predicate) -> Result<Vec<Value>, StoreError> {
        let (where_sql, binds) = filter.to_sql();
        let sql = format!(
            "SELECT DISTINCT {col} AS value FROM listings WHERE {col} IS NOT NULL AND {cond}",
            col = column.as_sql(),
            cond = where_sql
        );
        let rows = bind_values(sqlx::query(&sql), &binds).fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_value(row, column)).collect()
    }

    async fn fetch_page(&self, filter: &Predicate, offset: usize, limit: usize) -> Result<Vec<Listing>, StoreError> {
        let (where_sql, binds) = filter.to_sql();
        let sql = format!(
            "SELECT * FROM listings WHERE {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            where_sql
        );
        let rows = bind_values(sqlx::query(&sql), &binds)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(listing_from_row).collect()
    }

    async fn fetch_created_after(
        &self,
        filter: &Predicate,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Listing>, StoreError> {
        let (where_sql, binds) = filter.to_sql();
        let sql = format!(
            "SELECT * FROM listings WHERE created_at > ? AND {} ORDER BY created_at DESC, id DESC LIMIT ?",
            where_sql
        );
        let query = sqlx::query(&sql).bind(to_millis(after));
        let rows = bind_values(query, &binds)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(listing_from_row).collect()
    }

    async fn insert_listing(&self, listing: &Listing) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO listings (kind, district, street, residential_complex, rooms, rent_price, currency,
                living_area, territory_area, pets, kids, conditioner, furniture, latitude, longitude,
                link, media_group_size, caption, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(listing.kind.as_str())
        .bind(&listing.district)
        .bind(&listing.street)
        .bind(&listing.residential_complex)
        .bind(listing.rooms)
        .bind(listing.rent_price)
        .bind(listing.currency.as_str())
        .bind(listing.living_area)
        .bind(listing.territory_area)
        .bind(listing.pets as i64)
        .bind(listing.kids as i64)
        .bind(listing.conditioner as i64)
        .bind(listing.furniture as i64)
        .bind(listing.latitude)
        .bind(listing.longitude)
        .bind(&listing.link)
        .bind(listing.media_group_size)
        .bind(&listing.caption)
        .bind(to_millis(listing.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn remove_listing(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM listings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        info!("Removed listing {}: {} row(s)", id, result.rows_affected());
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn touch_user(&self, id: i64, nickname: Option<&str>, now: DateTime<Utc>) -> Result<UserRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, nickname, last_active_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_active_at = excluded.last_active_at,
                nickname = COALESCE(excluded.nickname, users.nickname)
            "#,
        )
        .bind(id)
        .bind(nickname)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        self.get_user(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }

    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_subscription(
        &self,
        id: i64,
        subscription: Option<&Subscription>,
        last_viewed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let predicate = subscription
            .map(|s| serde_json::to_string(&s.predicate))
            .transpose()?;
        let summary = subscription.map(|s| s.summary.clone());

        let result = sqlx::query(
            "UPDATE users SET subscription = ?, subscription_text = ?, last_viewed_at = ? WHERE id = ?",
        )
        .bind(predicate)
        .bind(summary)
        .bind(last_viewed_at.map(to_millis))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    async fn set_last_viewed(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_viewed_at = ? WHERE id = ?")
            .bind(to_millis(at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_admin(&self, id: i64, is_admin: bool) -> Result<(), StoreError> {
        let now = to_millis(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO users (id, is_admin, last_active_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET is_admin = excluded.is_admin
            "#,
        )
        .bind(id)
        .bind(is_admin as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscribed_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users WHERE subscription IS NOT NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn admin_ids(&self) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE is_admin = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn user_stats(&self, since: DateTime<Utc>) -> Result<UserStats, StoreError> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let recent: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE last_active_at >= ?")
            .bind(to_millis(since))
            .fetch_one(&self.pool)
            .await?;
        let subscribed: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE subscription IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;

        Ok(UserStats {
            total: total.0,
            active_last_hour: recent.0,
            subscribed: subscribed.0,
        })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load_session(&self, user_id: i64, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sessions WHERE user_id = ? AND key = ?")
            .bind(user_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    async fn save_session(&self, user_id: i64, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (user_id, key, value, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_session(&self, user_id: i64, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ? AND key = ?")
            .bind(user_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for SqliteStore {
    async fn save_submission(&self, submission: &AdSubmission) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO ad_submissions (user_id, answers, photos, created_at) VALUES (?, ?, ?, ?)")
            .bind(submission.user_id)
            .bind(serde_json::to_string(&submission.answers)?)
            .bind(serde_json::to_string(&submission.photos)?)
            .bind(to_millis(submission.created_at))
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn submissions_for(&self, user_id: i64) -> Result<Vec<AdSubmission>, StoreError> {
        let rows = sqlx::query("SELECT * FROM ad_submissions WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let answers: String = row.try_get("answers")?;
                let photos: String = row.try_get("photos")?;
                Ok(AdSubmission {
                    user_id: row.try_get("user_id")?,
                    answers: serde_json::from_str::<Vec<AnswerField>>(&answers)?,
                    photos: serde_json::from_str(&photos)?,
                    created_at: from_millis(row.try_get("created_at")?)?,
                })
            })
            .collect()
    }
}
