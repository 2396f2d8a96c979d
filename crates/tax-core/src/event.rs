use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::asset::AssetId;

/// Run-stable event identifier, allocated by the event factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u32);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Closed tag set of everything the pipeline processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Buy opening a long position
    BuyOpen,
    /// Buy closing a short position
    BuyClose,
    /// Sell opening a short position
    SellOpen,
    /// Sell closing a long position
    SellClose,
    Dividend,
    Distribution,
    Interest,
    PaymentInLieu,
    WithholdingTax,
    Split,
    Merger,
    StockDividend,
    DividendRightsIssue,
    ExpireDividendRights,
    OptionExercise,
    OptionAssignment,
    OptionExpiry,
    CurrencyConversion,
    Fee,
}

impl EventKind {
    pub fn is_buy(&self) -> bool {
        matches!(self, EventKind::BuyOpen | EventKind::BuyClose)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, EventKind::SellOpen | EventKind::SellClose)
    }

    pub fn is_trade(&self) -> bool {
        self.is_buy() || self.is_sell()
    }

    /// Income kinds that a withholding-tax event can link to.
    pub fn is_income(&self) -> bool {
        matches!(
            self,
            EventKind::Dividend
                | EventKind::Distribution
                | EventKind::Interest
                | EventKind::PaymentInLieu
        )
    }

    pub fn is_corporate_action(&self) -> bool {
        matches!(
            self,
            EventKind::Split
                | EventKind::Merger
                | EventKind::StockDividend
                | EventKind::DividendRightsIssue
                | EventKind::ExpireDividendRights
        )
    }

    pub fn is_option_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::OptionExercise | EventKind::OptionAssignment | EventKind::OptionExpiry
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Trade-specific fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeDetails {
    /// Signed: positive = buy direction, negative = sell direction
    pub quantity: Decimal,
    /// Per-unit price in the original currency
    pub price: Decimal,
    pub commission: Decimal,
    pub commission_currency: String,
    /// Commission converted to the base currency (enrichment)
    pub commission_base: Option<Decimal>,
    /// Net cost (buys) or net proceeds (sells) in the base currency
    pub net_base: Option<Decimal>,
    /// Option-lifecycle event this trade was caused by, if any
    pub linked_option: Option<EventId>,
}

/// Withholding-tax-specific fields, filled by the WHT linker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithholdingDetails {
    pub linked_income: Option<EventId>,
    pub country: Option<String>,
    /// Matcher certainty, 0-100
    pub confidence: Option<u8>,
    /// WHT amount divided by the linked income's gross amount
    pub effective_rate: Option<Decimal>,
}

/// Corporate-action-specific fields; which ones are set depends on the kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorporateActionDetails {
    /// New-for-old ratio (splits, share-for-share mergers)
    pub ratio: Option<Decimal>,
    pub cash_per_share: Option<Decimal>,
    pub cash_per_share_base: Option<Decimal>,
    /// Fair market value per share received (stock dividends)
    pub fmv_per_share: Option<Decimal>,
    pub fmv_per_share_base: Option<Decimal>,
    /// Shares received; zeroed when dividend rights expire unexercised
    pub shares_received: Option<Decimal>,
}

/// Option lifecycle (exercise/assignment/expiry) fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionLifecycleDetails {
    /// Contracts affected, unsigned
    pub contracts: Decimal,
}

/// Both legs of a currency conversion plus the reported rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionDetails {
    pub from_amount: Decimal,
    pub from_currency: String,
    pub to_amount: Decimal,
    pub to_currency: String,
    pub rate: Option<Decimal>,
}

/// Variant payload, matched exhaustively wherever behavior differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Trade(TradeDetails),
    Income,
    WithholdingTax(WithholdingDetails),
    CorporateAction(CorporateActionDetails),
    OptionLifecycle(OptionLifecycleDetails),
    CurrencyConversion(ConversionDetails),
    Fee,
}

impl EventPayload {
    fn matches_kind(&self, kind: EventKind) -> bool {
        match self {
            EventPayload::Trade(_) => kind.is_trade(),
            EventPayload::Income => kind.is_income(),
            EventPayload::WithholdingTax(_) => kind == EventKind::WithholdingTax,
            EventPayload::CorporateAction(_) => kind.is_corporate_action(),
            EventPayload::OptionLifecycle(_) => kind.is_option_lifecycle(),
            EventPayload::CurrencyConversion(_) => kind == EventKind::CurrencyConversion,
            EventPayload::Fee => kind == EventKind::Fee,
        }
    }
}

/// The unit of the processing pipeline.
///
/// Created once by the event factory; mutated only by enrichment
/// (converted amounts), the linkers (back-references) and the
/// dividend-rights post-processor. Never deleted or re-identified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialEvent {
    pub id: EventId,
    pub asset_id: AssetId,
    /// Raw calendar-date string as reported by the broker
    pub date: String,
    pub kind: EventKind,
    /// Gross amount in the original currency
    pub gross_amount: Option<Decimal>,
    pub currency: String,
    /// Gross amount in the base currency, filled exactly once by enrichment
    pub gross_base: Option<Decimal>,
    /// Broker transaction id, used by the linkers
    pub tx_id: Option<String>,
    pub description: String,
    pub payload: EventPayload,
}

impl FinancialEvent {
    pub fn new(
        id: EventId,
        asset_id: AssetId,
        date: impl Into<String>,
        kind: EventKind,
        currency: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        debug_assert!(
            payload.matches_kind(kind),
            "payload shape inconsistent with event kind {kind:?}"
        );
        Self {
            id,
            asset_id,
            date: date.into(),
            kind,
            gross_amount: None,
            currency: currency.into(),
            gross_base: None,
            tx_id: None,
            description: String::new(),
            payload,
        }
    }

    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_event_date(&self.date)
    }

    pub fn trade(&self) -> Option<&TradeDetails> {
        match &self.payload {
            EventPayload::Trade(t) => Some(t),
            _ => None,
        }
    }

    pub fn trade_mut(&mut self) -> Option<&mut TradeDetails> {
        match &mut self.payload {
            EventPayload::Trade(t) => Some(t),
            _ => None,
        }
    }

    pub fn withholding(&self) -> Option<&WithholdingDetails> {
        match &self.payload {
            EventPayload::WithholdingTax(w) => Some(w),
            _ => None,
        }
    }

    pub fn withholding_mut(&mut self) -> Option<&mut WithholdingDetails> {
        match &mut self.payload {
            EventPayload::WithholdingTax(w) => Some(w),
            _ => None,
        }
    }

    pub fn corporate_action(&self) -> Option<&CorporateActionDetails> {
        match &self.payload {
            EventPayload::CorporateAction(c) => Some(c),
            _ => None,
        }
    }

    pub fn corporate_action_mut(&mut self) -> Option<&mut CorporateActionDetails> {
        match &mut self.payload {
            EventPayload::CorporateAction(c) => Some(c),
            _ => None,
        }
    }
}

/// Parse a broker-reported date string to a calendar date.
///
/// Brokers mix `YYYY-MM-DD`, compact `YYYYMMDD`, and datetime forms with
/// a `,` or `;` separated time component; the time is always discarded.
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let head = raw
        .split([',', ';'])
        .next()
        .unwrap_or(raw)
        .trim();
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%Y%m%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        assert_eq!(parse_event_date("2023-06-01"), Some(expected));
        assert_eq!(parse_event_date("20230601"), Some(expected));
        assert_eq!(parse_event_date("2023-06-01, 09:30:00"), Some(expected));
        assert_eq!(parse_event_date("2023-06-01; 09:30:00"), Some(expected));
        assert_eq!(parse_event_date("junk"), None);
        assert_eq!(parse_event_date(""), None);
    }

    #[test]
    fn test_kind_predicates() {
        assert!(EventKind::BuyOpen.is_buy());
        assert!(EventKind::SellClose.is_sell());
        assert!(EventKind::Dividend.is_income());
        assert!(!EventKind::WithholdingTax.is_income());
        assert!(EventKind::ExpireDividendRights.is_corporate_action());
        assert!(EventKind::OptionAssignment.is_option_lifecycle());
    }

    #[test]
    fn test_payload_matches_kind() {
        let ev = FinancialEvent::new(
            EventId(1),
            AssetId(1),
            "2023-01-02",
            EventKind::BuyOpen,
            "USD",
            EventPayload::Trade(TradeDetails::default()),
        );
        assert!(ev.trade().is_some());
        assert!(ev.withholding().is_none());
    }
}
