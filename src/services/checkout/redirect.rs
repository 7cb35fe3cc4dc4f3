use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::entities::payment::PaymentMethod;

pub const ORDER_PLACED_MESSAGE: &str = "Order placed successfully";

/// What the client has to do once the order is committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Finalized { order_id: Uuid, message: String },
    RedirectToPayment { order_id: Uuid, redirect: String },
}

impl CheckoutOutcome {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Finalized { order_id, .. } | Self::RedirectToPayment { order_id, .. } => *order_id,
        }
    }

    pub fn redirect(&self) -> Option<&str> {
        match self {
            Self::RedirectToPayment { redirect, .. } => Some(redirect),
            Self::Finalized { .. } => None,
        }
    }
}

/// Wire shape of a successful placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    pub success: bool,
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl From<CheckoutOutcome> for PlaceOrderResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        match outcome {
            CheckoutOutcome::Finalized { order_id, message } => Self {
                success: true,
                order_id,
                message: Some(message),
                redirect: None,
            },
            CheckoutOutcome::RedirectToPayment { order_id, redirect } => Self {
                success: true,
                order_id,
                message: None,
                redirect: Some(redirect),
            },
        }
    }
}

/// Chooses between finishing checkout and sending the client on to a push
/// payment prompt. Never talks to a payment provider.
#[derive(Debug, Clone)]
pub struct PaymentRedirectDispatcher {
    push_payment_path: String,
}

impl PaymentRedirectDispatcher {
    pub fn new(push_payment_path: impl Into<String>) -> Self {
        Self {
            push_payment_path: push_payment_path.into(),
        }
    }

    pub fn dispatch(&self, order_id: Uuid, grand_total: Decimal, method: PaymentMethod) -> CheckoutOutcome {
        if method.is_async_push() {
            CheckoutOutcome::RedirectToPayment {
                order_id,
                redirect: format!(
                    "{}?orderId={}&amount={}",
                    self.push_payment_path,
                    order_id,
                    grand_total.round_dp(2)
                ),
            }
        } else {
            CheckoutOutcome::Finalized {
                order_id,
                message: ORDER_PLACED_MESSAGE.to_string(),
            }
        }
    }
}
