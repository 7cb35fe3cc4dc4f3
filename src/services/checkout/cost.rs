use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use super::cart::CartLine;
pub use crate::entities::order::MAX_STORED_AMOUNT;

/// Weight assumed for a product without a declared weight, in kilograms
pub const DEFAULT_UNIT_WEIGHT: Decimal = Decimal::ONE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CostError {
    #[error("order amounts overflowed")]
    Overflow,

    #[error("order total {0} exceeds the largest storable amount")]
    TooLarge(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostBreakdown {
    pub merchandise_total: Decimal,
    pub total_weight: Decimal,
    pub shipping_cost: Decimal,
    pub grand_total: Decimal,
}

impl CostBreakdown {
    pub fn compute(lines: &[CartLine], shipping_cost: Decimal) -> Result<Self, CostError> {
        let merchandise_total = merchandise_total(lines)?;
        let grand_total = merchandise_total
            .checked_add(shipping_cost)
            .ok_or(CostError::Overflow)?;
        if grand_total > MAX_STORED_AMOUNT {
            return Err(CostError::TooLarge(grand_total));
        }

        Ok(Self {
            merchandise_total,
            total_weight: package_weight(lines)?,
            shipping_cost,
            grand_total,
        })
    }
}

pub fn merchandise_total(lines: &[CartLine]) -> Result<Decimal, CostError> {
    lines.iter().try_fold(Decimal::ZERO, |total, line| {
        line.unit_price
            .checked_mul(Decimal::from(line.quantity))
            .and_then(|line_total| total.checked_add(line_total))
            .ok_or(CostError::Overflow)
    })
}

pub fn package_weight(lines: &[CartLine]) -> Result<Decimal, CostError> {
    lines.iter().try_fold(Decimal::ZERO, |total, line| {
        line.unit_weight
            .unwrap_or(DEFAULT_UNIT_WEIGHT)
            .checked_mul(Decimal::from(line.quantity))
            .and_then(|weight| total.checked_add(weight))
            .ok_or(CostError::Overflow)
    })
}
