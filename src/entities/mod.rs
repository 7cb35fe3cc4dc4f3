//! sea-orm entities for the storefront schema created by [`crate::migrator`].

pub mod address;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod user;

pub use address::Entity as Address;
pub use cart_item::Entity as CartItem;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use product::Entity as Product;
pub use user::Entity as User;
