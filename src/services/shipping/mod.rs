//! Shipping quotes for checkout.
//!
//! [`ShippingRateClient`] is what the checkout coordinator talks to. It wraps a
//! fallible [`RateProvider`] and never fails itself: any provider error, timeout
//! or rate that is not a storable positive amount is replaced with the
//! configured fallback rate.

pub mod exchange;
pub mod http;
pub mod rate_cache;
pub mod tariff;

use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    config::ShippingConfig,
    entities::{address, order::MAX_STORED_AMOUNT},
};

pub use exchange::{CurrencyConverter, ExchangeRateSource, HttpExchangeRateSource};
pub use http::HttpRateProvider;
pub use rate_cache::RateCache;
pub use tariff::FlatRateTariff;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPoint {
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

impl From<&crate::config::OriginConfig> for ShippingPoint {
    fn from(origin: &crate::config::OriginConfig) -> Self {
        Self {
            city: origin.city.clone(),
            postal_code: origin.postal_code.clone(),
            country: origin.country.clone(),
        }
    }
}

impl From<&address::Model> for ShippingPoint {
    fn from(address: &address::Model) -> Self {
        Self {
            city: address.city.clone(),
            postal_code: address.zip_code.clone(),
            country: address.country.clone(),
        }
    }
}

/// Body sent to the rate service. `weight` is in kilograms and goes over the
/// wire as a JSON number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingQuoteRequest {
    pub origin: ShippingPoint,
    pub destination: ShippingPoint,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub weight: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Live,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShippingQuote {
    pub amount: Decimal,
    pub source: QuoteSource,
}

#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("rate service unreachable: {0}")]
    Transport(String),

    #[error("rate service returned status {0}")]
    Status(u16),

    #[error("malformed rate response: {0}")]
    MalformedResponse(String),

    #[error("rate response carried no rate")]
    MissingRate,

    #[error("unusable rate {0}")]
    UnusableRate(Decimal),

    #[error("currency conversion failed: {0}")]
    Conversion(String),

    #[error("rate lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of live shipping rates, expressed in store currency
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self, request: &ShippingQuoteRequest) -> Result<Decimal, ShippingError>;
}

/// Builds the HTTP rate provider described by `config`, with currency
/// conversion when an exchange-rate service is configured.
pub fn build_rate_provider(config: &ShippingConfig) -> Result<Arc<dyn RateProvider>, ShippingError> {
    let mut provider = HttpRateProvider::new(
        config.rate_service_url.clone(),
        config.timeout(),
        config.store_currency.clone(),
    )?;

    if let Some(url) = &config.exchange_rate_url {
        let source = HttpExchangeRateSource::new(url.clone(), config.timeout())?;
        provider = provider.with_converter(Arc::new(CurrencyConverter::new(
            Arc::new(source),
            config.exchange_rate_ttl(),
        )));
    }

    Ok(Arc::new(provider))
}

#[derive(Clone)]
pub struct ShippingRateClient {
    provider: Arc<dyn RateProvider>,
    origin: ShippingPoint,
    fallback_rate: Decimal,
    timeout: Duration,
}

impl ShippingRateClient {
    pub fn new(
        provider: Arc<dyn RateProvider>,
        origin: ShippingPoint,
        fallback_rate: Decimal,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            origin,
            fallback_rate,
            timeout,
        }
    }

    pub fn from_config(config: &ShippingConfig, provider: Arc<dyn RateProvider>) -> Self {
        Self::new(
            provider,
            ShippingPoint::from(&config.origin),
            config.fallback_rate,
            config.timeout(),
        )
    }

    pub fn fallback_rate(&self) -> Decimal {
        self.fallback_rate
    }

    /// Quotes shipping from the merchant origin to `destination`.
    #[instrument(skip(self), fields(city = %destination.city))]
    pub async fn quote(&self, destination: ShippingPoint, weight: Decimal) -> ShippingQuote {
        let request = ShippingQuoteRequest {
            origin: self.origin.clone(),
            destination,
            weight,
        };

        let outcome = match tokio::time::timeout(self.timeout, self.provider.fetch_rate(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(ShippingError::Timeout(self.timeout)),
        };

        match outcome.and_then(usable_rate) {
            Ok(rate) => {
                debug!(%rate, "Live shipping rate fetched");
                ShippingQuote {
                    amount: rate,
                    source: QuoteSource::Live,
                }
            }
            Err(e) => {
                warn!(error = %e, fallback = %self.fallback_rate, "Shipping rate lookup failed, using fallback");
                counter!("checkout.shipping.fallback", 1);
                ShippingQuote {
                    amount: self.fallback_rate,
                    source: QuoteSource::Fallback,
                }
            }
        }
    }
}

/// Rounds a live rate to cents and keeps it only if it is positive and fits
/// the order money columns.
fn usable_rate(rate: Decimal) -> Result<Decimal, ShippingError> {
    let rounded = rate.round_dp(2);
    if rounded > Decimal::ZERO && rounded <= MAX_STORED_AMOUNT {
        Ok(rounded)
    } else {
        Err(ShippingError::UnusableRate(rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    enum Behaviour {
        Rate(Decimal),
        Fail,
        Hang,
    }

    struct StubProvider(Behaviour);

    #[async_trait]
    impl RateProvider for StubProvider {
        async fn fetch_rate(&self, _request: &ShippingQuoteRequest) -> Result<Decimal, ShippingError> {
            match &self.0 {
                Behaviour::Rate(rate) => Ok(*rate),
                Behaviour::Fail => Err(ShippingError::Transport("connection refused".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(dec!(1))
                }
            }
        }
    }

    fn client(behaviour: Behaviour) -> ShippingRateClient {
        ShippingRateClient::new(
            Arc::new(StubProvider(behaviour)),
            ShippingPoint {
                city: "Eldoret".into(),
                postal_code: "30100".into(),
                country: "KE".into(),
            },
            dec!(5.00),
            Duration::from_millis(50),
        )
    }

    fn nairobi() -> ShippingPoint {
        ShippingPoint {
            city: "Nairobi".into(),
            postal_code: "00100".into(),
            country: "KE".into(),
        }
    }

    #[tokio::test]
    async fn live_rate_is_used_when_positive() {
        let quote = client(Behaviour::Rate(dec!(300))).quote(nairobi(), dec!(4)).await;
        assert_eq!(quote.amount, dec!(300));
        assert_eq!(quote.source, QuoteSource::Live);
    }

    #[tokio::test]
    async fn provider_error_falls_back() {
        let quote = client(Behaviour::Fail).quote(nairobi(), dec!(4)).await;
        assert_eq!(quote.amount, dec!(5.00));
        assert_eq!(quote.source, QuoteSource::Fallback);
    }

    #[tokio::test]
    async fn zero_rate_falls_back() {
        let quote = client(Behaviour::Rate(Decimal::ZERO)).quote(nairobi(), dec!(4)).await;
        assert_eq!(quote.source, QuoteSource::Fallback);
    }

    #[tokio::test]
    async fn rate_rounding_to_zero_falls_back() {
        let quote = client(Behaviour::Rate(dec!(0.004))).quote(nairobi(), dec!(4)).await;
        assert_eq!(quote.amount, dec!(5.00));
        assert_eq!(quote.source, QuoteSource::Fallback);
    }

    #[tokio::test]
    async fn unstorable_rate_falls_back() {
        for rate in [Decimal::MAX, dec!(10000000000)] {
            let quote = client(Behaviour::Rate(rate)).quote(nairobi(), dec!(4)).await;
            assert_eq!(quote.amount, dec!(5.00));
            assert_eq!(quote.source, QuoteSource::Fallback);
        }
    }

    #[tokio::test]
    async fn live_rate_is_rounded_to_cents() {
        let quote = client(Behaviour::Rate(dec!(412.456))).quote(nairobi(), dec!(4)).await;
        assert_eq!(quote.amount, dec!(412.46));
        assert_eq!(quote.source, QuoteSource::Live);
    }

    #[tokio::test]
    async fn slow_provider_is_cut_off() {
        let quote = client(Behaviour::Hang).quote(nairobi(), dec!(4)).await;
        assert_eq!(quote.amount, dec!(5.00));
        assert_eq!(quote.source, QuoteSource::Fallback);
    }

    #[test]
    fn request_weight_serializes_as_number() {
        let request = ShippingQuoteRequest {
            origin: nairobi(),
            destination: nairobi(),
            weight: dec!(4.5),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["weight"], serde_json::json!(4.5));
    }
}
