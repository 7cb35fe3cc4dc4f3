use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    cart::{lock_cart, read_cart, CartLine},
    cost::{package_weight, CostBreakdown, CostError},
    redirect::{CheckoutOutcome, PaymentRedirectDispatcher},
};
use crate::{
    entities::{
        address, cart_item,
        order::{self, OrderStatus},
        order_item,
        payment::{self, PaymentMethod, PaymentStatus},
        Address, CartItem, OrderItem,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::shipping::{ShippingPoint, ShippingQuote, ShippingRateClient},
};

/// Checkout request as submitted by the client. Both fields are optional on
/// the wire so missing values can be reported with a readable message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[serde(default, alias = "shipping_address_id")]
    pub shipping_address_id: Option<Uuid>,
    #[serde(default, alias = "payment_method")]
    pub payment_method: Option<String>,
}

impl PlaceOrderRequest {
    fn validate(&self) -> Result<(Uuid, PaymentMethod), ServiceError> {
        let address_id = self
            .shipping_address_id
            .ok_or_else(|| ServiceError::ValidationError("Shipping address is required".into()))?;

        let method = match self.payment_method.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(ServiceError::ValidationError(
                    "Payment method is required".into(),
                ))
            }
            Some(raw) => raw
                .parse::<PaymentMethod>()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?,
        };

        Ok((address_id, method))
    }
}

/// Result of a committed checkout
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub costs: CostBreakdown,
    pub shipping: ShippingQuote,
    pub payment_method: PaymentMethod,
    pub outcome: CheckoutOutcome,
}

#[derive(Debug, Clone, Copy)]
enum CheckoutStep {
    Begin,
    LockCart,
    ReadCart,
    ResolveAddress,
    InsertOrder,
    InsertOrderLines,
    InsertPayment,
    ClearCart,
    Commit,
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "begin",
            Self::LockCart => "lock_cart",
            Self::ReadCart => "read_cart",
            Self::ResolveAddress => "resolve_address",
            Self::InsertOrder => "insert_order",
            Self::InsertOrderLines => "insert_order_lines",
            Self::InsertPayment => "insert_payment",
            Self::ClearCart => "clear_cart",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

fn step_failed(step: CheckoutStep, err: DbErr) -> ServiceError {
    error!(%step, error = %err, "Checkout step failed");
    ServiceError::DatabaseError(err)
}

fn cost_rejected(err: CostError) -> ServiceError {
    warn!(error = %err, "Order costs out of range");
    ServiceError::ValidationError("Order total is too large".into())
}

struct WrittenOrder {
    order_id: Uuid,
    costs: CostBreakdown,
    shipping: ShippingQuote,
}

/// Turns a user's cart into an order, its lines and a pending payment in one
/// transaction.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    shipping: Arc<ShippingRateClient>,
    dispatcher: PaymentRedirectDispatcher,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        shipping: Arc<ShippingRateClient>,
        dispatcher: PaymentRedirectDispatcher,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            shipping,
            dispatcher,
            event_sender,
        }
    }

    /// Places an order for `user_id` from the current contents of their cart.
    ///
    /// Either the order, every line, the pending payment and the cart clear are
    /// all committed, or nothing is.
    #[instrument(skip(self, request), fields(payment_method = ?request.payment_method))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        let (address_id, method) = request.validate()?;

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| step_failed(CheckoutStep::Begin, e))?;

        let written = match self.write_order(&txn, user_id, address_id, method).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Rollback failed");
                }
                counter!("checkout.orders.failed", 1);
                return Err(e);
            }
        };

        if let Err(e) = txn.commit().await {
            counter!("checkout.orders.failed", 1);
            return Err(step_failed(CheckoutStep::Commit, e));
        }

        counter!("checkout.orders.placed", 1);
        info!(
            order_id = %written.order_id,
            %user_id,
            total = %written.costs.grand_total,
            shipping = %written.costs.shipping_cost,
            "Order placed"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::OrderPlaced {
                order_id: written.order_id,
                user_id,
                total: written.costs.grand_total,
                payment_method: method,
            })
            .await
        {
            warn!(order_id = %written.order_id, error = %e, "Could not publish OrderPlaced");
        }

        let outcome = self
            .dispatcher
            .dispatch(written.order_id, written.costs.grand_total, method);

        Ok(PlacedOrder {
            order_id: written.order_id,
            costs: written.costs,
            shipping: written.shipping,
            payment_method: method,
            outcome,
        })
    }

    async fn write_order(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        address_id: Uuid,
        method: PaymentMethod,
    ) -> Result<WrittenOrder, ServiceError> {
        lock_cart(txn, user_id)
            .await
            .map_err(|e| step_failed(CheckoutStep::LockCart, e))?;
        let lines = read_cart(txn, user_id)
            .await
            .map_err(|e| step_failed(CheckoutStep::ReadCart, e))?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".into()));
        }

        let address = Address::find_by_id(address_id)
            .filter(address::Column::UserId.eq(user_id))
            .one(txn)
            .await
            .map_err(|e| step_failed(CheckoutStep::ResolveAddress, e))?
            .ok_or_else(|| {
                warn!(%address_id, %user_id, "Shipping address not found for user");
                ServiceError::ValidationError("Invalid address".into())
            })?;

        let weight = package_weight(&lines).map_err(cost_rejected)?;
        let shipping = self
            .shipping
            .quote(ShippingPoint::from(&address), weight)
            .await;
        let costs = CostBreakdown::compute(&lines, shipping.amount).map_err(cost_rejected)?;

        let order_id = self
            .insert_order(txn, user_id, address_id, &costs)
            .await
            .map_err(|e| step_failed(CheckoutStep::InsertOrder, e))?;

        insert_order_lines(txn, order_id, &lines)
            .await
            .map_err(|e| step_failed(CheckoutStep::InsertOrderLines, e))?;

        insert_pending_payment(txn, order_id, costs.grand_total, method)
            .await
            .map_err(|e| step_failed(CheckoutStep::InsertPayment, e))?;

        CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(txn)
            .await
            .map_err(|e| step_failed(CheckoutStep::ClearCart, e))?;

        Ok(WrittenOrder {
            order_id,
            costs,
            shipping,
        })
    }

    async fn insert_order(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        address_id: Uuid,
        costs: &CostBreakdown,
    ) -> Result<Uuid, DbErr> {
        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            total_amount: Set(costs.grand_total),
            shipping_address_id: Set(address_id),
            shipping_cost: Set(costs.shipping_cost),
            status: Set(OrderStatus::Processing),
            tracking_number: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(txn)
        .await?;

        Ok(order_id)
    }
}

/// Prices come from the cart snapshot, never from a second catalog read.
async fn insert_order_lines(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    lines: &[CartLine],
) -> Result<(), DbErr> {
    let rows = lines.iter().map(|line| order_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        product_id: Set(line.product_id),
        quantity: Set(line.quantity),
        price_at_time_of_sale: Set(line.unit_price),
    });

    OrderItem::insert_many(rows).exec_without_returning(txn).await?;
    Ok(())
}

async fn insert_pending_payment(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    amount: Decimal,
    method: PaymentMethod,
) -> Result<(), DbErr> {
    payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        amount: Set(amount),
        payment_method: Set(method),
        payment_status: Set(PaymentStatus::Pending),
        transaction_id: Set(None),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(txn)
    .await?;

    Ok(())
}
