mod common;

use assert_matches::assert_matches;
use common::{StubRate, TestApp};
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use storefront_checkout::{
    entities::{
        order::OrderStatus,
        order_item,
        payment::{self, PaymentMethod, PaymentStatus},
        Order, OrderItem, Payment,
    },
    errors::ServiceError,
    services::{
        checkout::{CheckoutOutcome, PlaceOrderRequest},
        shipping::QuoteSource,
    },
};
use uuid::Uuid;

fn request(address_id: Uuid, method: &str) -> PlaceOrderRequest {
    PlaceOrderRequest {
        shipping_address_id: Some(address_id),
        payment_method: Some(method.to_string()),
    }
}

#[tokio::test]
async fn places_order_with_live_shipping_rate() {
    let app = TestApp::new().await;
    let (user_id, address_id, _) = app.seed_checkout_ready_user().await;

    let placed = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "credit_card"))
        .await
        .expect("checkout should succeed");

    assert_eq!(placed.costs.merchandise_total, dec!(91.97));
    assert_eq!(placed.costs.total_weight, dec!(4));
    assert_eq!(placed.costs.shipping_cost, dec!(300));
    assert_eq!(placed.costs.grand_total, dec!(391.97));
    assert_eq!(placed.shipping.source, QuoteSource::Live);
    assert_eq!(app.rates.calls(), 1);

    let order = Order::find_by_id(placed.order_id)
        .one(app.db())
        .await
        .unwrap()
        .expect("order persisted");
    assert_eq!(order.user_id, user_id);
    assert_eq!(order.shipping_address_id, address_id);
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.total_amount.round_dp(2), dec!(391.97));
    assert_eq!(order.shipping_cost.round_dp(2), dec!(300));

    let lines = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(placed.order_id))
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(lines.len(), 2);
    let merchandise: Decimal = lines.iter().map(|l| l.line_total()).sum();
    assert_eq!(merchandise.round_dp(2), dec!(91.97));

    let payments = Payment::find()
        .filter(payment::Column::OrderId.eq(placed.order_id))
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount.round_dp(2), dec!(391.97));
    assert_eq!(payments[0].payment_status, PaymentStatus::Pending);
    assert_eq!(payments[0].payment_method, PaymentMethod::CreditCard);
    assert_eq!(payments[0].transaction_id, None);

    assert_eq!(app.cart_len(user_id).await, 0);
}

#[rstest]
#[case(StubRate::NetworkError)]
#[case(StubRate::MissingRate)]
#[case(StubRate::Fixed(Decimal::ZERO))]
#[case(StubRate::Fixed(dec!(0.004)))]
#[case(StubRate::Fixed(Decimal::MAX))]
#[case(StubRate::Fixed(dec!(10000000000)))]
#[tokio::test]
async fn unusable_rate_falls_back_and_still_places_order(#[case] rate: StubRate) {
    let app = TestApp::with_rate(rate).await;
    let (user_id, address_id, _) = app.seed_checkout_ready_user().await;

    let placed = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "paypal"))
        .await
        .expect("checkout should succeed on fallback");

    assert_eq!(placed.shipping.source, QuoteSource::Fallback);
    assert_eq!(placed.costs.shipping_cost, dec!(5.00));
    assert_eq!(placed.costs.grand_total, dec!(96.97));

    let order = Order::find_by_id(placed.order_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.shipping_cost.round_dp(2), dec!(5.00));
    assert_eq!(order.total_amount.round_dp(2), dec!(96.97));
}

#[tokio::test]
async fn empty_cart_is_rejected_without_writes() {
    let app = TestApp::new().await;
    let user_id = app.seed_user().await;
    let address_id = app.seed_address(user_id).await;

    let result = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "credit_card"))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg == "Cart is empty");
    assert_eq!(app.order_graph_counts().await, (0, 0, 0));
    assert_eq!(app.rates.calls(), 0);
}

#[rstest]
#[case(None, Some("mpesa"), "Shipping address is required")]
#[case(Some(Uuid::new_v4()), None, "Payment method is required")]
#[case(Some(Uuid::new_v4()), Some("cheque"), "Unsupported payment method: cheque")]
#[tokio::test]
async fn incomplete_request_fails_fast(
    #[case] address: Option<Uuid>,
    #[case] method: Option<&str>,
    #[case] expected: &str,
) {
    let app = TestApp::new().await;
    let (user_id, _, _) = app.seed_checkout_ready_user().await;
    let before = app.cart_quantities(user_id).await;

    let result = app
        .state
        .services
        .checkout
        .place_order(
            user_id,
            PlaceOrderRequest {
                shipping_address_id: address,
                payment_method: method.map(str::to_string),
            },
        )
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg == expected);
    assert_eq!(app.cart_quantities(user_id).await, before);
    assert_eq!(app.order_graph_counts().await, (0, 0, 0));
}

#[tokio::test]
async fn unknown_address_is_invalid() {
    let app = TestApp::new().await;
    let (user_id, _, _) = app.seed_checkout_ready_user().await;

    let result = app
        .state
        .services
        .checkout
        .place_order(user_id, request(Uuid::new_v4(), "credit_card"))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg == "Invalid address");
    assert_eq!(app.cart_len(user_id).await, 2);
    assert_eq!(app.order_graph_counts().await, (0, 0, 0));
}

#[tokio::test]
async fn another_users_address_is_invalid() {
    let app = TestApp::new().await;
    let (user_id, _, _) = app.seed_checkout_ready_user().await;
    let stranger = app.seed_user().await;
    let strangers_address = app.seed_address(stranger).await;

    let result = app
        .state
        .services
        .checkout
        .place_order(user_id, request(strangers_address, "credit_card"))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg == "Invalid address");
    assert_eq!(app.order_graph_counts().await, (0, 0, 0));
}

#[rstest]
#[case::order_insert("orders")]
#[case::order_lines_insert("order_items")]
#[case::payment_insert("payments")]
#[tokio::test]
async fn failed_insert_rolls_back_everything(#[case] table: &str) {
    let app = TestApp::new().await;
    let (user_id, address_id, _) = app.seed_checkout_ready_user().await;
    let before = app.cart_quantities(user_id).await;
    app.fail_inserts_into(table).await;

    let result = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "credit_card"))
        .await;

    assert_matches!(result, Err(ServiceError::DatabaseError(_)));
    assert_eq!(app.order_graph_counts().await, (0, 0, 0));
    assert_eq!(app.cart_quantities(user_id).await, before);
}

#[tokio::test]
async fn failed_cart_clear_rolls_back_everything() {
    let app = TestApp::new().await;
    let (user_id, address_id, _) = app.seed_checkout_ready_user().await;
    let before = app.cart_quantities(user_id).await;
    app.fail_deletes_from("cart_items").await;

    let result = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "mpesa"))
        .await;

    let err = result.expect_err("checkout must fail");
    assert_eq!(err.response_message(), "Server Error");
    assert_eq!(app.order_graph_counts().await, (0, 0, 0));
    assert_eq!(app.cart_quantities(user_id).await, before);
}

#[tokio::test]
async fn order_lines_keep_checkout_time_prices() {
    let app = TestApp::new().await;
    let (user_id, address_id, products) = app.seed_checkout_ready_user().await;
    let jacket = products[0];

    // price changed after the item went into the cart
    app.set_price(jacket, dec!(49.99)).await;

    let placed = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "upi"))
        .await
        .unwrap();
    assert_eq!(placed.costs.merchandise_total, dec!(95.97));

    // and again after the order was placed
    app.set_price(jacket, dec!(59.99)).await;

    let line = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(placed.order_id))
        .filter(order_item::Column::ProductId.eq(jacket))
        .one(app.db())
        .await
        .unwrap()
        .expect("jacket line");
    assert_eq!(line.price_at_time_of_sale.round_dp(2), dec!(49.99));

    let order = Order::find_by_id(placed.order_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.total_amount.round_dp(2), dec!(395.97));
}

#[tokio::test]
async fn push_payment_method_redirects_to_prompt() {
    let app = TestApp::new().await;
    let (user_id, address_id, _) = app.seed_checkout_ready_user().await;

    let placed = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "mpesa"))
        .await
        .unwrap();

    assert_matches!(
        &placed.outcome,
        CheckoutOutcome::RedirectToPayment { order_id, redirect }
            if *order_id == placed.order_id
                && redirect.contains(&placed.order_id.to_string())
                && redirect.contains("amount=391.97")
    );
}

#[tokio::test]
async fn other_methods_finish_immediately() {
    let app = TestApp::new().await;
    let (user_id, address_id, _) = app.seed_checkout_ready_user().await;

    let placed = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "bank_transfer"))
        .await
        .unwrap();

    assert_eq!(placed.outcome.redirect(), None);
    assert_matches!(
        placed.outcome,
        CheckoutOutcome::Finalized { message, .. } if message == "Order placed successfully"
    );
}

#[tokio::test]
async fn second_submission_finds_cart_empty() {
    let app = TestApp::new().await;
    let (user_id, address_id, _) = app.seed_checkout_ready_user().await;
    let checkout = app.state.services.checkout.clone();

    checkout
        .place_order(user_id, request(address_id, "credit_card"))
        .await
        .unwrap();
    let again = checkout
        .place_order(user_id, request(address_id, "credit_card"))
        .await;

    assert_matches!(again, Err(ServiceError::ValidationError(msg)) if msg == "Cart is empty");
    assert_eq!(app.order_graph_counts().await, (1, 2, 1));
}

#[tokio::test]
async fn unweighted_products_count_one_kilogram_each() {
    let app = TestApp::new().await;
    let user_id = app.seed_user().await;
    let address_id = app.seed_address(user_id).await;
    let product = app.seed_product(dec!(10.00), None).await;
    app.add_to_cart(user_id, product, 3).await;

    let placed = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "paypal"))
        .await
        .unwrap();

    assert_eq!(placed.costs.total_weight, dec!(3));
    assert_eq!(placed.costs.grand_total, dec!(330.00));
}

#[tokio::test]
async fn oversized_order_total_is_rejected_without_writes() {
    let app = TestApp::new().await;
    let user_id = app.seed_user().await;
    let address_id = app.seed_address(user_id).await;
    let product = app.seed_product(dec!(9000000000.00), None).await;
    app.add_to_cart(user_id, product, 2).await;

    let result = app
        .state
        .services
        .checkout
        .place_order(user_id, request(address_id, "credit_card"))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(msg)) if msg == "Order total is too large");
    assert_eq!(app.order_graph_counts().await, (0, 0, 0));
    assert_eq!(app.cart_len(user_id).await, 1);
}
