use rust_decimal::Decimal;

/// Flat per-kilogram tariff served by the built-in rate endpoint
#[derive(Debug, Clone, Copy)]
pub struct FlatRateTariff {
    per_kg: Decimal,
}

impl FlatRateTariff {
    pub fn new(per_kg: Decimal) -> Self {
        Self { per_kg }
    }

    pub fn rate_for(&self, weight_kg: Decimal) -> Decimal {
        (weight_kg * self.per_kg).round_dp(2)
    }
}
