//! Валюты и курсы обмена с коротким кешем.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "UAH")]
    Uah,
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Uah, Currency::Usd, Currency::Eur];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Uah => "UAH",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    /// Код ISO 4217, который использует Monobank
    pub fn iso_code(&self) -> u16 {
        match self {
            Currency::Uah => 980,
            Currency::Usd => 840,
            Currency::Eur => 978,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uah" | "грн" | "₴" => Ok(Currency::Uah),
            "usd" | "$" | "дол" => Ok(Currency::Usd),
            "eur" | "€" | "євро" => Ok(Currency::Eur),
            other => Err(format!("unsupported currency: {}", other)),
        }
    }
}

/// Сколько гривен стоит единица каждой валюты.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSnapshot {
    rates: BTreeMap<Currency, f64>,
}

impl RateSnapshot {
    pub fn new(usd: f64, eur: f64) -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(Currency::Uah, 1.0);
        rates.insert(Currency::Usd, usd);
        rates.insert(Currency::Eur, eur);
        Self { rates }
    }

    /// Используется, когда курсы недоступны: фильтр по цене работает только для гривны
    pub fn uah_only() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(Currency::Uah, 1.0);
        Self { rates }
    }

    pub fn rate(&self, currency: Currency) -> Option<f64> {
        self.rates.get(&currency).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Currency, f64)> + '_ {
        self.rates.iter().map(|(c, r)| (*c, *r))
    }

    /// Переводит сумму в гривнах в указанную валюту
    pub fn from_uah(&self, amount: f64, currency: Currency) -> Option<f64> {
        self.rate(currency)
            .filter(|rate| *rate > 0.0)
            .map(|rate| amount / rate)
    }
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn snapshot(&self) -> Result<RateSnapshot>;
}

/// Фиксированные курсы: для тестов и запуска без сети
pub struct FixedRates(pub RateSnapshot);

#[async_trait]
impl RateSource for FixedRates {
    async fn snapshot(&self) -> Result<RateSnapshot> {
        Ok(self.0.clone())
    }
}

/// Кеширует ответ источника на `ttl`. При ошибке отдаёт устаревший снимок, если он есть.
pub struct CachedRates {
    inner: Arc<dyn RateSource>,
    ttl: Duration,
    cache: RwLock<Option<(Instant, RateSnapshot)>>,
}

impl CachedRates {
    pub fn new(inner: Arc<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(None),
        }
    }
}

#[async_trait]
impl RateSource for CachedRates {
    async fn snapshot(&self) -> Result<RateSnapshot> {
        if let Some((fetched_at, snapshot)) = self.cache.read().await.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(snapshot.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Другой запрос мог уже обновить кеш, пока мы ждали блокировку
        if let Some((fetched_at, snapshot)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(snapshot.clone());
            }
        }

        match self.inner.snapshot().await {
            Ok(snapshot) => {
                *cache = Some((Instant::now(), snapshot.clone()));
                Ok(snapshot)
            }
            Err(e) => match cache.as_ref() {
                Some((_, stale)) => {
                    warn!("Failed to refresh exchange rates, using stale snapshot: {}", e);
                    Ok(stale.clone())
                }
                None => Err(e),
            },
        }
    }
}
