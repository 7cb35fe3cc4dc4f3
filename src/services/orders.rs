use chrono::{DateTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, OrderStatus},
        order_item,
        payment::{self, PaymentMethod, PaymentStatus},
        Order, OrderItem, Payment,
    },
    errors::ServiceError,
};

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment: Option<payment::Model>,
}

/// Tracking view of an order. `total_amount` already includes shipping.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingInfo {
    pub order_id: Uuid,
    pub tracking_number: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub shipping_cost: Decimal,
    pub merchandise_subtotal: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Data the client needs to start a mobile-money push payment
#[derive(Debug, Clone, Serialize)]
pub struct PushPaymentPrompt {
    pub order_id: Uuid,
    pub amount: Decimal,
    /// Whole currency units; the provider rejects fractional amounts
    pub payable_amount: i64,
    pub account_reference: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
}

/// Read side of placed orders
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_owned(&self, user_id: Uuid, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn get_for_user(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = self.find_owned(user_id, order_id).await?;
        let items = order.find_related(OrderItem).all(&*self.db).await?;
        let payment = order.find_related(Payment).one(&*self.db).await?;

        Ok(OrderDetail {
            order,
            items,
            payment,
        })
    }

    #[instrument(skip(self))]
    pub async fn track(&self, user_id: Uuid, tracking_number: &str) -> Result<TrackingInfo, ServiceError> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(ServiceError::ValidationError(
                "Tracking number is required".into(),
            ));
        }

        let order = Order::find()
            .filter(order::Column::TrackingNumber.eq(tracking_number))
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Tracking number not found".into()))?;

        Ok(TrackingInfo {
            order_id: order.id,
            tracking_number: tracking_number.to_string(),
            status: order.status,
            total_amount: order.total_amount,
            shipping_cost: order.shipping_cost,
            merchandise_subtotal: order.merchandise_total(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }

    /// Validates a push-payment request against the stored order and payment.
    #[instrument(skip(self))]
    pub async fn push_payment_prompt(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<PushPaymentPrompt, ServiceError> {
        let order = self.find_owned(user_id, order_id).await?;
        let payment = order
            .find_related(Payment)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No payment for order {}", order_id)))?;

        if payment.payment_status != PaymentStatus::Pending {
            return Err(ServiceError::InvalidOperation(
                "Payment is no longer pending".into(),
            ));
        }

        let expected = payment.amount.round_dp(2);
        if amount.round_dp(2) != expected {
            return Err(ServiceError::ValidationError(
                "Amount does not match order total".into(),
            ));
        }

        let payable_amount = expected
            .floor()
            .to_i64()
            .ok_or_else(|| ServiceError::InternalError(format!("amount {} out of range", expected)))?;

        Ok(PushPaymentPrompt {
            order_id,
            amount: expected,
            payable_amount,
            account_reference: order_id.to_string(),
            payment_method: payment.payment_method,
            payment_status: payment.payment_status,
        })
    }
}
