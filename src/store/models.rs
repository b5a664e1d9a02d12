use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::query::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Apartment,
    House,
}

impl ListingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingKind::Apartment => "apartment",
            ListingKind::House => "house",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "apartment" => Some(ListingKind::Apartment),
            "house" => Some(ListingKind::House),
            _ => None,
        }
    }
}

/// Объявление. Само сообщение с фото лежит в канале `FROM_CHAT_ID`, `link` указывает на него.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub id: i64,
    pub kind: ListingKind,
    pub district: String,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub residential_complex: Option<String>,
    pub rooms: i64,
    pub rent_price: f64,
    pub currency: Currency,
    #[serde(default)]
    pub living_area: Option<f64>,
    #[serde(default)]
    pub territory_area: Option<f64>,
    #[serde(default)]
    pub pets: bool,
    #[serde(default)]
    pub kids: bool,
    #[serde(default)]
    pub conditioner: bool,
    #[serde(default)]
    pub furniture: bool,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub link: String,
    #[serde(default = "single_message")]
    pub media_group_size: i32,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn single_message() -> i32 {
    1
}

impl Listing {
    /// Id первого сообщения поста: последний сегмент ссылки вида https://t.me/c/123/456
    pub fn message_id(&self) -> Option<i32> {
        self.link
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .and_then(|segment| segment.split('?').next())
            .and_then(|segment| segment.parse().ok())
    }

    /// Все сообщения медиагруппы идут подряд, начиная с `message_id`
    pub fn message_ids(&self) -> Vec<i32> {
        match self.message_id() {
            Some(first) => (0..self.media_group_size.max(1)).map(|i| first + i).collect(),
            None => Vec::new(),
        }
    }

    pub fn full_name(&self) -> String {
        let mut parts = vec![format!("#{}", self.id), self.district.clone()];
        if let Some(street) = &self.street {
            parts.push(street.clone());
        }
        if let Some(rc) = &self.residential_complex {
            parts.push(rc.clone());
        }
        parts.push(self.link.clone());
        parts.join(" | ")
    }
}

/// Сохранённый фильтр пользователя, который можно выполнить повторно.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub predicate: Predicate,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: i64,
    pub nickname: Option<String>,
    pub is_admin: bool,
    pub subscription: Option<Subscription>,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub last_active_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(id: i64, nickname: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            nickname,
            is_admin: false,
            subscription: None,
            last_viewed_at: None,
            last_active_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerField {
    pub name: String,
    pub value: String,
}

/// Заявка пользователя на размещение своего объекта
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdSubmission {
    pub user_id: i64,
    pub answers: Vec<AnswerField>,
    pub photos: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AdSubmission {
    pub fn answer(&self, name: &str) -> Option<&str> {
        self.answers
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserStats {
    pub total: i64,
    pub active_last_hour: i64,
    pub subscribed: i64,
}
