use rust_decimal::{Decimal, RoundingStrategy};

/// Fixed decimal context for one pipeline run.
///
/// Built once at startup and passed by reference through every monetary
/// operation; enrichment and realization both assume the scale and
/// rounding mode never change mid-run.
#[derive(Debug, Clone)]
pub struct CalcContext {
    /// Reporting currency all amounts are converted into
    pub base_currency: String,
    /// Working scale for intermediate monetary values
    pub scale: u32,
    pub rounding: RoundingStrategy,
    pub tax_year: i32,
}

impl CalcContext {
    pub fn new(base_currency: impl Into<String>, tax_year: i32) -> Self {
        Self {
            base_currency: base_currency.into(),
            scale: 10,
            rounding: RoundingStrategy::MidpointNearestEven,
            tax_year,
        }
    }

    /// Round to the working scale.
    pub fn quantize(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.scale, self.rounding)
    }

    /// Convert a foreign amount to the base currency.
    ///
    /// `rate` is foreign-currency units per one base-currency unit, so
    /// conversion divides.
    pub fn convert(&self, amount: Decimal, rate: Decimal) -> Decimal {
        self.quantize(amount / rate)
    }

    pub fn is_base(&self, currency: &str) -> bool {
        currency.eq_ignore_ascii_case(&self.base_currency)
    }
}
