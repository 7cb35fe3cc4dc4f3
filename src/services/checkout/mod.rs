//! Order placement: cart snapshot, cost computation, the transactional order
//! write and the post-commit payment hand-off.

pub mod cart;
pub mod cost;
pub mod redirect;
pub mod service;

pub use cart::{lock_cart, read_cart, CartLine};
pub use cost::{package_weight, CostBreakdown, CostError, MAX_STORED_AMOUNT};
pub use redirect::{CheckoutOutcome, PaymentRedirectDispatcher, PlaceOrderResponse};
pub use service::{CheckoutService, PlaceOrderRequest, PlacedOrder};
