use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{rate_cache::RateCache, ShippingError};

/// Source of currency exchange rates
#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// Units of `to` per one unit of `from`
    async fn rate(&self, from: &str, to: &str) -> Result<Decimal, ShippingError>;
}

#[derive(Debug, Deserialize)]
struct LatestRates {
    conversion_rates: HashMap<String, Decimal>,
}

/// Reads `GET {base_url}/latest/{from}` and picks `conversion_rates.{to}`
pub struct HttpExchangeRateSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExchangeRateSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ShippingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShippingError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExchangeRateSource for HttpExchangeRateSource {
    async fn rate(&self, from: &str, to: &str) -> Result<Decimal, ShippingError> {
        let url = format!("{}/latest/{}", self.base_url, from.to_ascii_uppercase());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ShippingError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ShippingError::Status(response.status().as_u16()));
        }

        let latest: LatestRates = response
            .json()
            .await
            .map_err(|e| ShippingError::MalformedResponse(e.to_string()))?;

        latest
            .conversion_rates
            .get(&to.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| ShippingError::Conversion(format!("no rate for {} -> {}", from, to)))
    }
}

/// Converts amounts between currencies, caching each pair's rate for `ttl`
pub struct CurrencyConverter {
    source: Arc<dyn ExchangeRateSource>,
    ttl: Duration,
    pairs: Mutex<HashMap<(String, String), Arc<RateCache<Decimal>>>>,
}

impl CurrencyConverter {
    pub fn new(source: Arc<dyn ExchangeRateSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            pairs: Mutex::new(HashMap::new()),
        }
    }

    async fn cache_for(&self, from: &str, to: &str) -> Arc<RateCache<Decimal>> {
        let mut pairs = self.pairs.lock().await;
        pairs
            .entry((from.to_string(), to.to_string()))
            .or_insert_with(|| Arc::new(RateCache::new(self.ttl)))
            .clone()
    }

    /// Converts `amount` from `from` to `to`, rounded to two decimal places.
    #[instrument(skip(self))]
    pub async fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal, ShippingError> {
        let from = from.to_ascii_uppercase();
        let to = to.to_ascii_uppercase();
        if from == to {
            return Ok(amount);
        }

        let cache = self.cache_for(&from, &to).await;
        let rate = cache
            .get_or_refresh(|| self.source.rate(&from, &to))
            .await?;

        if rate <= Decimal::ZERO {
            return Err(ShippingError::UnusableRate(rate));
        }

        let converted = (amount * rate).round_dp(2);
        debug!(%rate, %converted, "Converted amount");
        Ok(converted)
    }
}
