use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::StorefrontError;
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::{
        checkout::{PlaceOrderRequest, PlaceOrderResponse},
        orders::{OrderDetail, PushPaymentPrompt, TrackingInfo},
    },
    AppState,
};

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/place", post(place_order))
        .route("/mpesa-payment", get(push_payment_prompt))
        .route("/track/:tracking_number", get(track_order))
        .route("/:id", get(get_order))
}

/// Places an order from the caller's cart
pub async fn place_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    payload: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> Result<Json<PlaceOrderResponse>, StorefrontError> {
    let Json(request) = payload?;

    let placed = state
        .services
        .checkout
        .place_order(auth_user.user_id, request)
        .await?;

    Ok(Json(placed.outcome.into()))
}

pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetail>, ServiceError> {
    let detail = state.services.orders.get_for_user(auth_user.user_id, id).await?;
    Ok(Json(detail))
}

#[derive(Debug, Serialize)]
pub struct TrackingResponse {
    pub success: bool,
    pub order: TrackingInfo,
}

pub async fn track_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(tracking_number): Path<String>,
) -> Result<Json<TrackingResponse>, StorefrontError> {
    let order = state
        .services
        .orders
        .track(auth_user.user_id, &tracking_number)
        .await?;

    Ok(Json(TrackingResponse {
        success: true,
        order,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PushPaymentQuery {
    #[serde(rename = "orderId")]
    pub order_id: Uuid,
    pub amount: Decimal,
}

/// Target of the checkout redirect for push-payment orders
pub async fn push_payment_prompt(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<PushPaymentQuery>,
) -> Result<Json<PushPaymentPrompt>, ServiceError> {
    let prompt = state
        .services
        .orders
        .push_payment_prompt(auth_user.user_id, query.order_id, query.amount)
        .await?;
    Ok(Json(prompt))
}
