use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Provider receipt, set once the provider settles the payment
    #[sea_orm(nullable)]
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "credit_card")]
    CreditCard,
    #[sea_orm(string_value = "paypal")]
    Paypal,
    #[sea_orm(string_value = "mpesa")]
    Mpesa,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
    #[sea_orm(string_value = "upi")]
    Upi,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::Paypal => "paypal",
            Self::Mpesa => "mpesa",
            Self::BankTransfer => "bank_transfer",
            Self::Upi => "upi",
        }
    }

    /// Methods settled out of band by a phone prompt; the client must be sent
    /// to the prompt endpoint after placement.
    pub fn is_async_push(&self) -> bool {
        matches!(self, Self::Mpesa)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported payment method: {0}")]
pub struct UnknownPaymentMethod(pub String);

impl FromStr for PaymentMethod {
    type Err = UnknownPaymentMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "credit_card" => Ok(Self::CreditCard),
            "paypal" => Ok(Self::Paypal),
            "mpesa" => Ok(Self::Mpesa),
            "bank_transfer" => Ok(Self::BankTransfer),
            "upi" => Ok(Self::Upi),
            other => Err(UnknownPaymentMethod(other.to_string())),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_methods_case_insensitively() {
        assert_eq!("MPESA".parse::<PaymentMethod>().unwrap(), PaymentMethod::Mpesa);
        assert_eq!(
            " credit_card ".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::CreditCard
        );
        assert!("cash".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn only_mpesa_is_push_based() {
        assert!(PaymentMethod::Mpesa.is_async_push());
        assert!(!PaymentMethod::Paypal.is_async_push());
        assert!(!PaymentMethod::Upi.is_async_push());
    }
}
