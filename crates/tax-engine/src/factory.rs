use std::sync::OnceLock;

use broker_import::{RawCashRow, RawCorporateActionRow, RawTradeRow};
use regex::Regex;
use rust_decimal::Decimal;
use tax_core::{
    event::{
        ConversionDetails, CorporateActionDetails, OptionLifecycleDetails, TradeDetails,
        WithholdingDetails,
    },
    EventId, EventKind, EventPayload, FinancialEvent,
};
use tracing::warn;

use crate::resolver::{AssetIdentifiers, AssetResolver};

/// Factory output: the full event list plus the two candidate sub-lists
/// earmarked for the linking passes.
///
/// Invariant: `events[i].id == EventId(i)` — the list is an arena and
/// linkers index into it by id.
pub struct FactoryOutput {
    pub events: Vec<FinancialEvent>,
    /// Option-lifecycle events (exercise/assignment/expiry)
    pub option_candidates: Vec<EventId>,
    /// Stock trades carrying exercise/assignment notation
    pub trade_candidates: Vec<EventId>,
}

/// Converts raw typed rows into the domain event set.
pub struct EventFactory;

fn fx_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]{3})\.([A-Z]{3})$").expect("static regex"))
}

fn country_tax_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]{2})\s+TAX\b").expect("static regex"))
}

impl EventFactory {
    pub fn build(
        resolver: &mut AssetResolver,
        trades: &[RawTradeRow],
        cash: &[RawCashRow],
        actions: &[RawCorporateActionRow],
    ) -> FactoryOutput {
        let mut events: Vec<FinancialEvent> = Vec::new();
        let mut option_candidates = Vec::new();
        let mut trade_candidates = Vec::new();

        let next_id = |events: &Vec<FinancialEvent>| EventId(events.len() as u32);

        for row in trades {
            let id = next_id(&events);
            match Self::trade_event(resolver, row, id) {
                Some(TradeEvent::OptionLifecycle(ev)) => {
                    option_candidates.push(ev.id);
                    events.push(ev);
                }
                Some(TradeEvent::Trade { ev, candidate }) => {
                    if candidate {
                        trade_candidates.push(ev.id);
                    }
                    events.push(ev);
                }
                Some(TradeEvent::Conversion(ev)) => events.push(ev),
                None => {}
            }
        }

        for row in cash {
            let id = next_id(&events);
            if let Some(ev) = Self::cash_event(resolver, row, id) {
                events.push(ev);
            }
        }

        for row in actions {
            let id = next_id(&events);
            if let Some(ev) = Self::action_event(resolver, row, id) {
                events.push(ev);
            }
        }

        FactoryOutput {
            events,
            option_candidates,
            trade_candidates,
        }
    }

    fn trade_event(
        resolver: &mut AssetResolver,
        row: &RawTradeRow,
        id: EventId,
    ) -> Option<TradeEvent> {
        let asset_id = resolver.get_or_create(&AssetIdentifiers {
            symbol: &row.symbol,
            isin: &row.isin,
            contract_id: &row.contract_id,
            currency: &row.currency,
            description: &row.description,
            raw_category: &row.asset_class,
            raw_subcategory: &row.sub_category,
        });

        // FX conversions are booked as trades on a pair symbol under the
        // cash asset class; they become currency-conversion events.
        if row.asset_class.eq_ignore_ascii_case("CASH") {
            if let Some(caps) = fx_pair_regex().captures(row.symbol.trim()) {
                let from_currency = caps[1].to_string();
                let to_currency = caps[2].to_string();
                let to_amount = row.quantity * row.price;
                let mut ev = FinancialEvent::new(
                    id,
                    asset_id,
                    row.date.clone(),
                    EventKind::CurrencyConversion,
                    row.currency.clone(),
                    EventPayload::CurrencyConversion(ConversionDetails {
                        from_amount: row.quantity,
                        from_currency,
                        to_amount,
                        to_currency,
                        rate: Some(row.price),
                    }),
                );
                ev.gross_amount = Some(to_amount.abs());
                ev.tx_id = non_empty(&row.tx_id);
                ev.description = row.description.clone();
                return Some(TradeEvent::Conversion(ev));
            }
        }

        let is_option = row.asset_class.eq_ignore_ascii_case("OPT")
            || row.asset_class.eq_ignore_ascii_case("FOP");

        // Option rows with lifecycle notation are not market trades.
        if is_option {
            let lifecycle_kind = if row.has_code("Ex") {
                Some(EventKind::OptionExercise)
            } else if row.has_code("A") {
                Some(EventKind::OptionAssignment)
            } else if row.has_code("Ep") {
                Some(EventKind::OptionExpiry)
            } else {
                None
            };
            if let Some(kind) = lifecycle_kind {
                let mut ev = FinancialEvent::new(
                    id,
                    asset_id,
                    row.date.clone(),
                    kind,
                    row.currency.clone(),
                    EventPayload::OptionLifecycle(OptionLifecycleDetails {
                        contracts: row.quantity.abs(),
                    }),
                );
                ev.gross_amount = row.proceeds.map(|p| p.abs());
                ev.tx_id = non_empty(&row.tx_id);
                ev.description = row.description.clone();
                return Some(TradeEvent::OptionLifecycle(ev));
            }
        }

        let kind = trade_kind(row.quantity, row);
        let commission = row.commission.unwrap_or_default().abs();
        let commission_currency = row
            .commission_currency
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| row.currency.clone());

        let mut ev = FinancialEvent::new(
            id,
            asset_id,
            row.date.clone(),
            kind,
            row.currency.clone(),
            EventPayload::Trade(TradeDetails {
                quantity: row.quantity,
                price: row.price,
                commission,
                commission_currency,
                commission_base: None,
                net_base: None,
                linked_option: None,
            }),
        );
        ev.gross_amount = row.proceeds.map(|p| p.abs());
        ev.tx_id = non_empty(&row.tx_id);
        ev.description = row.description.clone();

        // Stock trades stamped as exercised/assigned are candidates for
        // the option-trade linker.
        let candidate = !is_option && (row.has_code("Ex") || row.has_code("A"));
        Some(TradeEvent::Trade { ev, candidate })
    }

    fn cash_event(
        resolver: &mut AssetResolver,
        row: &RawCashRow,
        id: EventId,
    ) -> Option<FinancialEvent> {
        // Instrument-specific cash flow vs pure cash-balance movement.
        let is_instrument_flow = !row.isin.is_empty()
            || !row.contract_id.is_empty()
            || (!row.symbol.is_empty() && !row.symbol.eq_ignore_ascii_case(&row.currency));

        let asset_id = if is_instrument_flow {
            resolver.get_or_create(&AssetIdentifiers {
                symbol: &row.symbol,
                isin: &row.isin,
                contract_id: &row.contract_id,
                currency: &row.currency,
                description: &row.description,
                ..Default::default()
            })
        } else {
            resolver.get_or_create_cash(&row.currency)
        };

        let kind = match cash_kind(&row.kind, &row.description) {
            Some(kind) => kind,
            None => {
                warn!(
                    "unrecognized cash transaction kind {:?} (tx {}), skipping",
                    row.kind, row.tx_id
                );
                return None;
            }
        };

        let payload = match kind {
            EventKind::WithholdingTax => EventPayload::WithholdingTax(WithholdingDetails {
                country: wht_country(&row.description, &row.isin),
                ..Default::default()
            }),
            EventKind::Fee => EventPayload::Fee,
            _ => EventPayload::Income,
        };

        let mut ev = FinancialEvent::new(
            id,
            asset_id,
            row.date.clone(),
            kind,
            row.currency.clone(),
            payload,
        );
        // Withholding and fees arrive as negative cash movements; the
        // kind already carries the direction.
        ev.gross_amount = Some(match kind {
            EventKind::WithholdingTax | EventKind::Fee => row.amount.abs(),
            _ => row.amount,
        });
        ev.tx_id = non_empty(&row.tx_id);
        ev.description = row.description.clone();
        Some(ev)
    }

    fn action_event(
        resolver: &mut AssetResolver,
        row: &RawCorporateActionRow,
        id: EventId,
    ) -> Option<FinancialEvent> {
        let kind = match row.code.to_uppercase().as_str() {
            "FS" | "RS" | "SPLIT" => EventKind::Split,
            "TC" | "MERGER" | "MERGED" => EventKind::Merger,
            "SD" => EventKind::StockDividend,
            "DI" => EventKind::DividendRightsIssue,
            "ED" => EventKind::ExpireDividendRights,
            other => {
                warn!("unrecognized corporate action code {other:?}, skipping");
                return None;
            }
        };

        let asset_id = resolver.get_or_create(&AssetIdentifiers {
            symbol: &row.symbol,
            isin: &row.isin,
            contract_id: &row.contract_id,
            currency: &row.currency,
            description: &row.description,
            raw_category: &row.asset_class,
            ..Default::default()
        });

        let mut ev = FinancialEvent::new(
            id,
            asset_id,
            row.date.clone(),
            kind,
            row.currency.clone(),
            EventPayload::CorporateAction(CorporateActionDetails {
                ratio: row.ratio,
                cash_per_share: row.cash_per_share,
                cash_per_share_base: None,
                fmv_per_share: row.fmv_per_share,
                fmv_per_share_base: None,
                shares_received: row.quantity,
            }),
        );
        ev.gross_amount = row.amount;
        ev.tx_id = non_empty(&row.tx_id);
        ev.description = row.description.clone();
        Some(ev)
    }
}

enum TradeEvent {
    Trade { ev: FinancialEvent, candidate: bool },
    OptionLifecycle(FinancialEvent),
    Conversion(FinancialEvent),
}

/// Directional trade kind from quantity sign and open/close notation.
fn trade_kind(quantity: Decimal, row: &RawTradeRow) -> EventKind {
    let closing = row.has_code("C");
    if quantity >= Decimal::ZERO {
        if closing {
            EventKind::BuyClose
        } else {
            EventKind::BuyOpen
        }
    } else if closing {
        EventKind::SellClose
    } else if row.has_code("O") {
        EventKind::SellOpen
    } else {
        // No notation: assume an ordinary long-position sale.
        EventKind::SellClose
    }
}

fn cash_kind(raw: &str, description: &str) -> Option<EventKind> {
    match raw.to_uppercase().as_str() {
        "DIV" => return Some(EventKind::Dividend),
        "DIST" => return Some(EventKind::Distribution),
        "INT" => return Some(EventKind::Interest),
        "PIL" => return Some(EventKind::PaymentInLieu),
        "WHT" => return Some(EventKind::WithholdingTax),
        "FEE" => return Some(EventKind::Fee),
        _ => {}
    }
    // Fall back to description patterns for untyped exports.
    let upper = description.to_uppercase();
    if upper.contains("WITHHOLDING") {
        Some(EventKind::WithholdingTax)
    } else if upper.contains("IN LIEU") {
        Some(EventKind::PaymentInLieu)
    } else if upper.contains("DIVIDEND") {
        Some(EventKind::Dividend)
    } else if upper.contains("INTEREST") {
        Some(EventKind::Interest)
    } else if upper.contains("FEE") {
        Some(EventKind::Fee)
    } else {
        None
    }
}

/// Source country of a withholding deduction: explicit "XX TAX" token in
/// the description, else the ISIN country prefix.
fn wht_country(description: &str, isin: &str) -> Option<String> {
    if let Some(caps) = country_tax_regex().captures(&description.to_uppercase()) {
        return Some(caps[1].to_string());
    }
    if isin.len() >= 2 {
        return Some(isin[..2].to_uppercase());
    }
    None
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
