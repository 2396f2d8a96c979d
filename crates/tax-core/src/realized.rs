use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::asset::{AssetCategory, AssetId, FundType};
use crate::event::EventId;

/// Tax-treatment bucket a realization falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxCategory {
    Stock,
    Fund(FundType),
    Bond,
    StockOption,
    Cfd,
    /// One-year speculation-period assets (physical gold, crypto ETCs)
    PrivateSale,
    Other,
}

impl std::fmt::Display for TaxCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaxCategory::Stock => write!(f, "Stock"),
            TaxCategory::Fund(ft) => write!(f, "Fund ({ft})"),
            TaxCategory::Bond => write!(f, "Bond"),
            TaxCategory::StockOption => write!(f, "Option"),
            TaxCategory::Cfd => write!(f, "CFD"),
            TaxCategory::PrivateSale => write!(f, "Private Sale"),
            TaxCategory::Other => write!(f, "Other"),
        }
    }
}

impl TaxCategory {
    pub fn from_asset(category: AssetCategory, fund_type: FundType) -> Self {
        match category {
            AssetCategory::Stock => TaxCategory::Stock,
            AssetCategory::InvestmentFund => TaxCategory::Fund(fund_type),
            AssetCategory::Bond => TaxCategory::Bond,
            AssetCategory::StockOption => TaxCategory::StockOption,
            AssetCategory::Cfd => TaxCategory::Cfd,
            AssetCategory::PrivateSale => TaxCategory::PrivateSale,
            AssetCategory::CashBalance | AssetCategory::Unknown => TaxCategory::Other,
        }
    }
}

/// How a disposal came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealizationKind {
    /// Ordinary market sale (or short cover)
    Sale,
    /// Option expired worthless
    Expiry,
    /// Disposal driven by option assignment
    Assignment,
    /// Disposal driven by option exercise
    Exercise,
    /// Cash-settled corporate action
    CorporateAction,
}

/// One record per lot consumed by a disposal, in base currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedGainLoss {
    pub asset_id: AssetId,
    pub symbol: String,
    pub acquired: NaiveDate,
    pub realized: NaiveDate,
    /// Unsigned quantity of the consumed lot slice
    pub quantity: Decimal,
    pub cost_base: Decimal,
    pub proceeds_base: Decimal,
    pub gain_base: Decimal,
    pub tax_category: TaxCategory,
    pub holding_days: i64,
    pub realization: RealizationKind,
}

/// Periodic income aggregates for the tax year, in base currency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncomeSummary {
    pub dividends: Decimal,
    pub distributions: Decimal,
    pub interest: Decimal,
    pub payments_in_lieu: Decimal,
    /// Premium collected writing options (stillhalter income)
    pub option_writer_premium: Decimal,
    pub fees: Decimal,
    /// Withholding tax by source-country code
    pub withholding_by_country: BTreeMap<String, Decimal>,
}

impl IncomeSummary {
    pub fn total_income(&self) -> Decimal {
        self.dividends + self.distributions + self.interest + self.payments_in_lieu
    }

    pub fn total_withholding(&self) -> Decimal {
        self.withholding_by_country.values().copied().sum()
    }
}

/// Per-asset year-end state, reconciled against the broker's EOY report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetFinalState {
    pub asset_id: AssetId,
    pub symbol: String,
    pub category: AssetCategory,
    /// Quantity the engine computed from the event stream
    pub computed_quantity: Decimal,
    /// Quantity the broker reported at year end
    pub reported_quantity: Option<Decimal>,
    pub eoy_value_base: Option<Decimal>,
    pub reconciled: bool,
}

/// Everything the reporting sink consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub tax_year: i32,
    pub base_currency: String,
    pub realized: Vec<RealizedGainLoss>,
    pub income: IncomeSummary,
    pub final_states: Vec<AssetFinalState>,
    /// Fatal-diagnostic counter: EOY quantity mismatches
    pub eoy_mismatches: u32,
    pub unlinked_withholding: Vec<EventId>,
    pub unmatched_option_trades: Vec<EventId>,
}

impl PipelineOutput {
    pub fn total_gain(&self) -> Decimal {
        self.realized.iter().map(|r| r.gain_base).sum()
    }

    pub fn gains_by_category(&self) -> BTreeMap<String, Decimal> {
        let mut by_category = BTreeMap::new();
        for r in &self.realized {
            *by_category
                .entry(r.tax_category.to_string())
                .or_insert(Decimal::ZERO) += r.gain_base;
        }
        by_category
    }
}
