use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::payment::PaymentMethod;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event to the processing loop
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Domain events emitted after a state change has been committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
        payment_method: PaymentMethod,
    },
    PaymentCompleted {
        order_id: Uuid,
        transaction_id: Option<String>,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderPlaced {
                order_id,
                user_id,
                total,
                payment_method,
            } => {
                info!(
                    %order_id, %user_id, %total, %payment_method,
                    "Order placed"
                );
            }
            Event::PaymentCompleted {
                order_id,
                transaction_id,
            } => {
                info!(
                    %order_id,
                    transaction_id = transaction_id.as_deref().unwrap_or("-"),
                    "Payment completed"
                );
            }
            Event::PaymentFailed { order_id, reason } => {
                warn!(%order_id, %reason, "Payment failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}
