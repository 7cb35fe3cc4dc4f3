pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod shipping;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        checkout::{CheckoutService, PaymentRedirectDispatcher},
        orders::OrderService,
        payments::PaymentService,
        shipping::{FlatRateTariff, RateProvider, ShippingRateClient},
    },
};

pub use crate::AppState;

/// Services layer used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub shipping_tariff: FlatRateTariff,
}

impl AppServices {
    /// Wires services around `rate_provider`, the source of live shipping quotes.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        rate_provider: Arc<dyn RateProvider>,
    ) -> Self {
        let shipping = Arc::new(ShippingRateClient::from_config(&config.shipping, rate_provider));
        let dispatcher = PaymentRedirectDispatcher::new(config.payments.push_payment_path.clone());

        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            shipping,
            dispatcher,
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(db_pool.clone()));
        let payments = Arc::new(PaymentService::new(db_pool, event_sender));

        Self {
            checkout,
            orders,
            payments,
            shipping_tariff: FlatRateTariff::new(config.shipping.per_kg_rate),
        }
    }
}
