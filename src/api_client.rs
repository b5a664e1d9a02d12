use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::currency::{Currency, RateSnapshot, RateSource};

pub const MONOBANK_URL: &str = "https://api.monobank.ua/bank/currency";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonobankRate {
    pub currency_code_a: u16,
    pub currency_code_b: u16,
    #[serde(default)]
    pub rate_sell: Option<f64>,
    #[serde(default)]
    pub rate_buy: Option<f64>,
    #[serde(default)]
    pub rate_cross: Option<f64>,
}

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn currency_rates(&self) -> Result<Vec<MonobankRate>> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .context("Failed to send request to Monobank")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Monobank error ({}): {}", status, text);
        }

        let rates: Vec<MonobankRate> = response
            .json()
            .await
            .context("Failed to parse Monobank response")?;

        Ok(rates)
    }
}

#[async_trait]
impl RateSource for ApiClient {
    async fn snapshot(&self) -> Result<RateSnapshot> {
        let rates = self.currency_rates().await?;
        snapshot_from_rates(&rates)
    }
}

/// Берём курс продажи к гривне; если банк его не отдал, используем кросс-курс
pub fn snapshot_from_rates(rates: &[MonobankRate]) -> Result<RateSnapshot> {
    let sell = |currency: Currency| {
        rates
            .iter()
            .find(|r| {
                r.currency_code_a == currency.iso_code()
                    && r.currency_code_b == Currency::Uah.iso_code()
            })
            .and_then(|r| r.rate_sell.or(r.rate_cross))
    };

    let usd = sell(Currency::Usd).context("USD/UAH rate is missing")?;
    let eur = sell(Currency::Eur).context("EUR/UAH rate is missing")?;
    Ok(RateSnapshot::new(usd, eur))
}
