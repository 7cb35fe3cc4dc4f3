use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use tracing::info;

use crate::{
    errors::ServiceError,
    services::payments::{CallbackAck, StkCallbackEnvelope},
    AppState,
};

pub fn mpesa_routes() -> Router<AppState> {
    Router::new().route("/callback", post(mpesa_callback))
}

/// Settlement callback from the push-payment provider. Unauthenticated; the
/// provider only needs a 200 to stop retrying.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    payload: Result<Json<StkCallbackEnvelope>, JsonRejection>,
) -> Result<Json<CallbackAck>, ServiceError> {
    let Json(envelope) = payload.map_err(|e| {
        ServiceError::ValidationError(format!("Malformed callback: {}", e.body_text()))
    })?;

    let outcome = state.services.payments.apply_callback(envelope).await?;
    info!(?outcome, "Push payment callback handled");

    Ok(Json(CallbackAck::from(&outcome)))
}
