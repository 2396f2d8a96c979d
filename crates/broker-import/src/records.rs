use rust_decimal::Decimal;
use serde::Deserialize;

/// One executed trade (stocks, funds, options, CFDs, FX).
#[derive(Debug, Clone, Deserialize)]
pub struct RawTradeRow {
    #[serde(default)]
    pub currency: String,
    /// Broker asset-class code, e.g. `STK`, `OPT`, `CFD`, `BOND`, `CASH`
    #[serde(default)]
    pub asset_class: String,
    #[serde(default)]
    pub sub_category: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub description: String,
    /// Signed: positive = buy, negative = sell
    pub quantity: Decimal,
    pub price: Decimal,
    /// Signed gross proceeds as reported; not always present
    #[serde(default)]
    pub proceeds: Option<Decimal>,
    #[serde(default)]
    pub commission: Option<Decimal>,
    #[serde(default)]
    pub commission_currency: Option<String>,
    #[serde(default)]
    pub tx_id: String,
    /// Broker notation codes: `O` open, `C` close, `Ex` exercised,
    /// `A` assigned, `Ep` expired
    #[serde(default)]
    pub notes: String,
    pub date: String,
}

impl RawTradeRow {
    pub fn has_code(&self, code: &str) -> bool {
        self.notes.split(';').any(|c| c.trim() == code)
    }
}

/// One cash transaction (income, withholding, fees, FX conversions).
#[derive(Debug, Clone, Deserialize)]
pub struct RawCashRow {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
    /// Transaction type: `DIV`, `DIST`, `INT`, `PIL`, `WHT`, `FEE`, `FX`
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub tx_id: String,
    pub date: String,
}

/// One corporate action.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCorporateActionRow {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub asset_class: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub description: String,
    /// Action code: `FS` split, `TC` merger, `SD` stock dividend,
    /// `DI` dividend rights issue, `ED` expire dividend rights
    pub code: String,
    #[serde(default)]
    pub ratio: Option<Decimal>,
    #[serde(default)]
    pub cash_per_share: Option<Decimal>,
    #[serde(default)]
    pub fmv_per_share: Option<Decimal>,
    /// Shares received or affected
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub tx_id: String,
    pub date: String,
}

/// One position snapshot row, used for both SOY and EOY reports.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPositionRow {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub asset_class: String,
    #[serde(default)]
    pub sub_category: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub description: String,
    pub quantity: Decimal,
    /// Total cost basis; present on SOY reports when known
    #[serde(default)]
    pub cost_basis: Option<Decimal>,
    /// Market price; present on EOY reports
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Market value; present on EOY reports
    #[serde(default)]
    pub value: Option<Decimal>,
}
