use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::common::{failure_response, StorefrontError};
use crate::AppState;

pub fn shipping_routes() -> Router<AppState> {
    Router::new().route("/rates", post(shipping_rates))
}

/// Accepts the checkout rate client's body as well as a bare destination string
#[derive(Debug, Deserialize)]
pub struct RateRequest {
    #[serde(default)]
    pub origin: Option<Value>,
    #[serde(default)]
    pub destination: Option<Value>,
    #[serde(default)]
    pub weight: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct RateResponse {
    pub success: bool,
    pub destination: Value,
    pub weight: Decimal,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub rate: Decimal,
    pub currency: String,
    pub message: String,
}

fn destination_label(destination: &Value) -> Option<String> {
    match destination {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => map
            .get("city")
            .and_then(Value::as_str)
            .filter(|city| !city.trim().is_empty())
            .map(|city| city.trim().to_string()),
        _ => None,
    }
}

/// Built-in flat per-kilogram rate service
pub async fn shipping_rates(
    State(state): State<AppState>,
    payload: Result<Json<RateRequest>, JsonRejection>,
) -> Result<Response, StorefrontError> {
    let Json(request) = payload?;

    let (Some(destination), Some(weight)) = (request.destination, request.weight) else {
        return Ok(failure_response(
            StatusCode::BAD_REQUEST,
            "Destination and weight are required",
        ));
    };
    let Some(label) = destination_label(&destination) else {
        return Ok(failure_response(
            StatusCode::BAD_REQUEST,
            "Destination and weight are required",
        ));
    };
    if weight <= Decimal::ZERO {
        return Ok(failure_response(
            StatusCode::BAD_REQUEST,
            "Weight must be greater than zero",
        ));
    }

    let tariff = state.services.shipping_tariff;
    let currency = state.config.shipping.store_currency.clone();
    let rate = tariff.rate_for(weight);
    debug!(origin = ?request.origin, %label, %weight, %rate, "Quoted flat rate");

    Ok(Json(RateResponse {
        success: true,
        message: format!("Shipping rate to {} is {} {}", label, currency, rate),
        destination,
        weight,
        rate,
        currency,
    })
    .into_response())
}
