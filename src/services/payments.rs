use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        payment::{self, PaymentStatus},
        Payment,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Push-payment provider callback envelope:
/// `{"Body": {"stkCallback": {"ResultCode": 0, "ResultDesc": "...", "CallbackMetadata": {"Item": [...]}}}}`
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    pub result_code: Value,
    #[serde(default)]
    pub result_desc: Option<String>,
    #[serde(default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackMetadata {
    #[serde(default)]
    pub item: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataItem {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl StkCallback {
    /// `ResultCode` arrives as a number or a numeric string
    pub fn result_code(&self) -> Option<i64> {
        match &self.result_code {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code() == Some(0)
    }

    fn metadata_value(&self, name: &str) -> Option<String> {
        self.callback_metadata
            .as_ref()?
            .item
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| match item.value.as_ref()? {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    pub fn account_reference(&self) -> Option<String> {
        self.metadata_value("AccountReference")
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_value("MpesaReceiptNumber")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Completed { order_id: Uuid },
    Failed { order_id: Uuid },
    AlreadySettled { order_id: Uuid },
    UnknownOrder { reference: String },
    MissingReference,
}

/// Body returned to the provider; it only needs a 200 to stop retrying
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackAck {
    pub message: String,
}

impl From<&SettlementOutcome> for CallbackAck {
    fn from(outcome: &SettlementOutcome) -> Self {
        let message = match outcome {
            SettlementOutcome::Completed { .. } => "Callback received and payment updated",
            SettlementOutcome::Failed { .. } => "Callback received, payment not successful",
            SettlementOutcome::AlreadySettled { .. } => "Callback received, payment already settled",
            SettlementOutcome::UnknownOrder { .. } | SettlementOutcome::MissingReference => {
                "Callback received, no matching order"
            }
        };
        Self {
            message: message.to_string(),
        }
    }
}

/// Applies provider settlement callbacks to pending payments
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Moves the order's `pending` payment to `completed` or `failed`.
    /// Payments that already left `pending` are left untouched.
    #[instrument(skip(self, envelope))]
    pub async fn apply_callback(
        &self,
        envelope: StkCallbackEnvelope,
    ) -> Result<SettlementOutcome, ServiceError> {
        let callback = envelope.body.stk_callback;

        let Some(reference) = callback.account_reference() else {
            warn!(result_code = ?callback.result_code(), "Callback without AccountReference");
            return Ok(SettlementOutcome::MissingReference);
        };

        let Ok(order_id) = Uuid::parse_str(&reference) else {
            warn!(%reference, "Callback references an unknown order");
            return Ok(SettlementOutcome::UnknownOrder { reference });
        };

        let succeeded = callback.is_success();
        let new_status = if succeeded {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };

        let mut update = Payment::update_many()
            .col_expr(
                payment::Column::PaymentStatus,
                Expr::value(new_status.to_value()),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()));
        if succeeded {
            update = update.col_expr(
                payment::Column::TransactionId,
                Expr::value(callback.receipt_number()),
            );
        }

        let result = update
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending.to_value()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let exists = Payment::find()
                .filter(payment::Column::OrderId.eq(order_id))
                .one(&*self.db)
                .await?
                .is_some();

            return Ok(if exists {
                info!(%order_id, "Duplicate callback for settled payment");
                SettlementOutcome::AlreadySettled { order_id }
            } else {
                warn!(%order_id, "Callback references an unknown order");
                SettlementOutcome::UnknownOrder { reference }
            });
        }

        let (event, outcome) = if succeeded {
            info!(%order_id, receipt = ?callback.receipt_number(), "Payment completed");
            (
                Event::PaymentCompleted {
                    order_id,
                    transaction_id: callback.receipt_number(),
                },
                SettlementOutcome::Completed { order_id },
            )
        } else {
            let reason = callback
                .result_desc
                .clone()
                .unwrap_or_else(|| format!("result code {:?}", callback.result_code()));
            warn!(%order_id, %reason, "Payment failed");
            (
                Event::PaymentFailed { order_id, reason },
                SettlementOutcome::Failed { order_id },
            )
        };

        if let Err(e) = self.event_sender.send(event).await {
            warn!(%order_id, error = %e, "Could not publish payment event");
        }

        Ok(outcome)
    }
}
