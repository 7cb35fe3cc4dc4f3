//! Storefront checkout service
//!
//! Order placement over a customer's cart: cart snapshot, shipping quote with
//! fallback, the transactional order write, and the payment hand-off, exposed
//! through a small axum API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;
pub mod telemetry;

use axum::{extract::FromRef, routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub auth: Arc<auth::AuthService>,
    pub services: handlers::AppServices,
}

impl FromRef<AppState> for Arc<auth::AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Routes under `/api`
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/orders", handlers::orders::order_routes())
        .nest("/shipping", handlers::shipping::shipping_routes())
        .nest("/mpesa", handlers::payment_webhooks::mpesa_routes())
}

/// Full application router with tracing, request ids and a request timeout
pub fn app_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api_routes())
        .layer(telemetry::http_trace_layer())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
