use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tax_core::{parse_event_date, EventKind, FinancialEvent};
use tracing::warn;

use crate::error::EngineError;
use crate::resolver::AssetResolver;

/// Total-order sort key for one event.
///
/// Ordering: parsed date (sentinel `NaiveDate::MIN` on parse failure) →
/// event-kind priority (corporate actions before option lifecycle before
/// trades before income before withholding before conversions and fees)
/// → asset sort token → absolute normalized original-currency amount →
/// transaction id. FIFO correctness depends on this being unambiguous,
/// so validation rejects any collision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventSortKey {
    pub date: NaiveDate,
    pub kind_priority: u8,
    pub asset_token: String,
    pub amount: Decimal,
    pub tx_id: String,
}

fn kind_priority(kind: EventKind) -> u8 {
    match kind {
        EventKind::Split
        | EventKind::Merger
        | EventKind::StockDividend
        | EventKind::DividendRightsIssue
        | EventKind::ExpireDividendRights => 0,
        EventKind::OptionExercise | EventKind::OptionAssignment | EventKind::OptionExpiry => 1,
        EventKind::BuyOpen | EventKind::BuyClose | EventKind::SellOpen | EventKind::SellClose => 2,
        EventKind::Dividend
        | EventKind::Distribution
        | EventKind::Interest
        | EventKind::PaymentInLieu => 3,
        EventKind::WithholdingTax => 4,
        EventKind::CurrencyConversion => 5,
        EventKind::Fee => 6,
    }
}

/// Derive the sort key for one event, consulting the resolver for the
/// asset tiebreak token.
pub fn sort_key(ev: &FinancialEvent, resolver: &AssetResolver) -> EventSortKey {
    let date = parse_event_date(&ev.date).unwrap_or(NaiveDate::MIN);
    let asset_token = resolver
        .get(ev.asset_id)
        .map(|a| a.sort_token())
        .unwrap_or_else(|| ev.asset_id.to_string());
    EventSortKey {
        date,
        kind_priority: kind_priority(ev.kind),
        asset_token,
        amount: ev.gross_amount.unwrap_or_default().abs().normalize(),
        tx_id: ev.tx_id.clone().unwrap_or_default(),
    }
}

/// Sort the full event list into its global total order and verify the
/// ordering is trustworthy.
///
/// After sorting, every key is regenerated and checked: a sentinel date
/// on an event whose raw date actually parses means the key function
/// silently diverged, and two events sharing a key means the tiebreaks
/// cannot discriminate them. Either corrupts FIFO matching irrecoverably,
/// so both abort the pipeline.
pub fn sort_and_validate(
    events: &mut Vec<FinancialEvent>,
    resolver: &AssetResolver,
) -> Result<(), EngineError> {
    events.sort_by_cached_key(|ev| sort_key(ev, resolver));

    let mut seen: HashMap<EventSortKey, Vec<usize>> = HashMap::new();
    let mut violations: Vec<String> = Vec::new();

    for (idx, ev) in events.iter().enumerate() {
        let key = sort_key(ev, resolver);

        if key.date == NaiveDate::MIN {
            if parse_event_date(&ev.date).is_some() {
                violations.push(format!(
                    "sentinel date in key despite parseable raw date: {}",
                    describe(ev)
                ));
            } else {
                warn!("event {} has unparseable date {:?}", ev.id, ev.date);
            }
        }

        seen.entry(key).or_default().push(idx);
    }

    for (key, indices) in &seen {
        if indices.len() > 1 {
            let conflict: Vec<String> = indices.iter().map(|&i| describe(&events[i])).collect();
            violations.push(format!(
                "duplicate sort key {key:?} shared by:\n    {}",
                conflict.join("\n    ")
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(EngineError::SortKeyConflict(violations.join("\n")))
    }
}

fn describe(ev: &FinancialEvent) -> String {
    format!(
        "{} {} {:?} amount={:?} tx={:?}",
        ev.id,
        ev.kind,
        ev.description,
        ev.gross_amount,
        ev.tx_id.as_deref().unwrap_or("-")
    )
}
