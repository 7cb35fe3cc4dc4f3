use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::debug;

use super::{exchange::CurrencyConverter, RateProvider, ShippingError, ShippingQuoteRequest};

#[derive(Debug, Deserialize)]
struct RateResponse {
    #[serde(default)]
    rate: Option<Value>,
    #[serde(default)]
    currency: Option<String>,
}

/// Rate provider backed by an HTTP rate service.
///
/// The service answers `{"rate": <number|string>, "currency"?: "USD"}`. A quote
/// in a currency other than the store's is converted when a
/// [`CurrencyConverter`] is attached and is otherwise rejected.
pub struct HttpRateProvider {
    client: reqwest::Client,
    url: String,
    store_currency: String,
    converter: Option<Arc<CurrencyConverter>>,
}

impl HttpRateProvider {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        store_currency: impl Into<String>,
    ) -> Result<Self, ShippingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShippingError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            store_currency: store_currency.into(),
            converter: None,
        })
    }

    pub fn with_converter(mut self, converter: Arc<CurrencyConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    async fn to_store_currency(&self, rate: Decimal, currency: &str) -> Result<Decimal, ShippingError> {
        if currency.eq_ignore_ascii_case(&self.store_currency) {
            return Ok(rate);
        }

        match &self.converter {
            Some(converter) => converter
                .convert(rate, currency, &self.store_currency)
                .await
                .map_err(|e| ShippingError::Conversion(e.to_string())),
            None => Err(ShippingError::Conversion(format!(
                "no converter configured for {} -> {}",
                currency, self.store_currency
            ))),
        }
    }
}

/// Accepts a rate given as a JSON number or a numeric string.
fn parse_rate(value: &Value) -> Result<Decimal, ShippingError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Null => return Err(ShippingError::MissingRate),
        other => {
            return Err(ShippingError::MalformedResponse(format!(
                "rate is not numeric: {}",
                other
            )))
        }
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| ShippingError::MalformedResponse(format!("rate is not numeric: {}", text)))
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rate(&self, request: &ShippingQuoteRequest) -> Result<Decimal, ShippingError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| ShippingError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShippingError::Status(status.as_u16()));
        }

        let body: RateResponse = response
            .json()
            .await
            .map_err(|e| ShippingError::MalformedResponse(e.to_string()))?;

        let rate = parse_rate(body.rate.as_ref().ok_or(ShippingError::MissingRate)?)?;
        debug!(%rate, currency = ?body.currency, "Rate service answered");

        match body.currency.as_deref() {
            Some(currency) => self.to_store_currency(rate, currency).await,
            None => Ok(rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[rstest]
    #[case(json!(250), dec!(250))]
    #[case(json!(12.5), dec!(12.5))]
    #[case(json!("300.00"), dec!(300.00))]
    #[case(json!(" 42 "), dec!(42))]
    fn parses_numeric_rates(#[case] value: Value, #[case] expected: Decimal) {
        assert_eq!(parse_rate(&value).unwrap(), expected);
    }

    #[test]
    fn rejects_non_numeric_rates() {
        assert_matches!(parse_rate(&json!("free")), Err(ShippingError::MalformedResponse(_)));
        assert_matches!(parse_rate(&json!({"amount": 3})), Err(ShippingError::MalformedResponse(_)));
        assert_matches!(parse_rate(&Value::Null), Err(ShippingError::MissingRate));
    }
}
