use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Select,
};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::{cart_item, CartItem, Product};

/// A cart row joined with the product's live price and weight
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub unit_weight: Option<Decimal>,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

fn cart_lock_query(user_id: Uuid) -> Select<CartItem> {
    CartItem::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .lock_exclusive()
}

/// Takes row locks on the user's cart until the surrounding transaction ends,
/// so overlapping checkouts for one user run one after the other. SQLite has
/// no row locks and relies on its database-level write lock instead.
pub async fn lock_cart<C>(conn: &C, user_id: Uuid) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    cart_lock_query(user_id).all(conn).await?;
    Ok(())
}

/// Reads the user's cart in the order items were added.
///
/// Takes any connection so the checkout coordinator can read inside its
/// transaction.
pub async fn read_cart<C>(conn: &C, user_id: Uuid) -> Result<Vec<CartLine>, DbErr>
where
    C: ConnectionTrait,
{
    let rows = CartItem::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .order_by_asc(cart_item::Column::AddedAt)
        .find_also_related(Product)
        .all(conn)
        .await?;

    rows.into_iter()
        .map(|(item, product)| {
            let product = product.ok_or_else(|| {
                DbErr::RecordNotFound(format!(
                    "product {} referenced by cart item {}",
                    item.product_id, item.id
                ))
            })?;

            Ok(CartLine {
                product_id: product.id,
                quantity: item.quantity,
                unit_price: product.price,
                unit_weight: product.weight,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DbBackend, QueryTrait};

    #[test]
    fn cart_lock_is_for_update_on_postgres() {
        let sql = cart_lock_query(Uuid::new_v4())
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains("FROM \"cart_items\""), "{sql}");
        assert!(sql.ends_with("FOR UPDATE"), "{sql}");
    }

    #[test]
    fn cart_lock_is_dropped_on_sqlite() {
        let sql = cart_lock_query(Uuid::new_v4())
            .build(DbBackend::Sqlite)
            .to_string();
        assert!(!sql.contains("FOR UPDATE"), "{sql}");
    }
}
