use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Run-stable internal asset identifier, allocated by the resolver.
///
/// Opaque on purpose: cache keys and cross-run identity always derive
/// from external identifiers, never from this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u32);

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Resolved semantic category of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetCategory {
    /// Investment fund / ETF, sub-typed via [`FundType`]
    InvestmentFund,
    Stock,
    Bond,
    StockOption,
    Cfd,
    /// Physical gold, crypto ETCs and similar private-sale assets
    PrivateSale,
    /// One per currency, tracks the cash leg of the account
    CashBalance,
    Unknown,
}

impl std::fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetCategory::InvestmentFund => write!(f, "Investment Fund"),
            AssetCategory::Stock => write!(f, "Stock"),
            AssetCategory::Bond => write!(f, "Bond"),
            AssetCategory::StockOption => write!(f, "Option"),
            AssetCategory::Cfd => write!(f, "CFD"),
            AssetCategory::PrivateSale => write!(f, "Private Sale Asset"),
            AssetCategory::CashBalance => write!(f, "Cash Balance"),
            AssetCategory::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Fund sub-type, only meaningful when the category is `InvestmentFund`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FundType {
    EquityFund,
    MixedFund,
    RealEstateFund,
    /// Catch-all bucket when no partial-exemption class applies
    OtherFund,
    None,
}

impl std::fmt::Display for FundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FundType::EquityFund => write!(f, "Equity Fund"),
            FundType::MixedFund => write!(f, "Mixed Fund"),
            FundType::RealEstateFund => write!(f, "Real Estate Fund"),
            FundType::OtherFund => write!(f, "Other Fund"),
            FundType::None => write!(f, "None"),
        }
    }
}

/// Put/call flag on an option contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionRight {
    Put,
    Call,
}

/// Derivative linkage: option terms and the resolved underlying.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivativeTerms {
    /// Resolved underlying asset, filled by `link_derivatives`
    pub underlying: Option<AssetId>,
    /// Underlying symbol as carried by the option's own symbol/description
    pub underlying_symbol: Option<String>,
    /// Shares per contract; brokers omit it for the standard 100
    pub multiplier: Option<Decimal>,
    pub strike: Option<Decimal>,
    pub expiry: Option<String>,
    pub right: Option<OptionRight>,
}

/// One canonical record per distinct instrument or cash currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: Option<String>,
    pub isin: Option<String>,
    pub contract_id: Option<String>,
    /// Instrument currency as reported by the broker
    pub currency: String,
    pub description: String,
    pub raw_category: String,
    pub raw_subcategory: String,
    pub category: AssetCategory,
    pub fund_type: FundType,
    pub derivative: Option<DerivativeTerms>,
    /// Start-of-year position snapshot
    pub soy_quantity: Option<Decimal>,
    pub soy_cost_basis: Option<Decimal>,
    /// End-of-year position snapshot
    pub eoy_quantity: Option<Decimal>,
    pub eoy_price: Option<Decimal>,
    pub eoy_value: Option<Decimal>,
    /// Free-text classification notes, accumulated across passes
    pub notes: Vec<String>,
}

impl Asset {
    pub fn new(id: AssetId, currency: &str) -> Self {
        Self {
            id,
            symbol: None,
            isin: None,
            contract_id: None,
            currency: currency.to_string(),
            description: String::new(),
            raw_category: String::new(),
            raw_subcategory: String::new(),
            category: AssetCategory::Unknown,
            fund_type: FundType::None,
            derivative: None,
            soy_quantity: None,
            soy_cost_basis: None,
            eoy_quantity: None,
            eoy_price: None,
            eoy_value: None,
            notes: Vec::new(),
        }
    }

    /// Stable key for the persistent classification cache.
    ///
    /// Derived from external identifiers only (ISIN, then contract id,
    /// then symbol + raw category) so entries survive across runs where
    /// internal ids are reassigned.
    pub fn classification_key(&self) -> String {
        if let Some(isin) = self.isin.as_deref().filter(|s| !s.is_empty()) {
            return isin.to_string();
        }
        if let Some(cid) = self.contract_id.as_deref().filter(|s| !s.is_empty()) {
            return format!("cid:{cid}");
        }
        format!(
            "{}/{}",
            self.symbol.as_deref().unwrap_or("?"),
            self.raw_category
        )
    }

    /// Identifier used for event-ordering tiebreaks and diagnostics.
    pub fn sort_token(&self) -> String {
        self.symbol
            .clone()
            .or_else(|| self.isin.clone())
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Display label for reports and log lines.
    pub fn label(&self) -> String {
        self.symbol
            .clone()
            .or_else(|| self.isin.clone())
            .or_else(|| self.contract_id.clone())
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn push_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        if !note.is_empty() && !self.notes.contains(&note) {
            self.notes.push(note);
        }
    }

    pub fn is_cash_balance(&self) -> bool {
        self.category == AssetCategory::CashBalance
    }
}
