use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tax_core::{parse_event_date, EventId, EventKind, FinancialEvent};
use tracing::warn;

use crate::resolver::AssetResolver;

/// Shares per contract when the broker leaves the multiplier unset.
const DEFAULT_MULTIPLIER: Decimal = dec!(100);

#[derive(Debug, Default)]
pub struct OptionLinkReport {
    pub linked: u32,
    /// Candidate stock trades no option event matched
    pub unmatched: Vec<EventId>,
}

/// Associate exercise/assignment-driven stock trades with the option
/// event that caused them.
///
/// Lookup key: (event date, underlying asset, absolute expected share
/// quantity as an exact decimal string). Expected quantity is contracts
/// times the option multiplier. Duplicate keys resolve last-write-wins
/// with a warning naming both events; misses are logged with every
/// option key sharing the date and never fail the pipeline.
pub fn link_option_trades(
    events: &mut [FinancialEvent],
    resolver: &AssetResolver,
    option_candidates: &[EventId],
    trade_candidates: &[EventId],
) -> OptionLinkReport {
    let mut lookup: HashMap<(String, u32, String), EventId> = HashMap::new();

    for &opt_id in option_candidates {
        let ev = &events[opt_id.0 as usize];
        if !matches!(
            ev.kind,
            EventKind::OptionExercise | EventKind::OptionAssignment
        ) {
            continue;
        }
        let Some(key) = option_key(ev, resolver) else {
            continue;
        };
        if let Some(displaced) = lookup.insert(key.clone(), opt_id) {
            // Ambiguous: two lifecycle events expect the same stock
            // delivery. Keep last-write-wins but surface both ids.
            warn!(
                "duplicate option link key {key:?}: {displaced} displaced by {opt_id}"
            );
        }
    }

    let mut report = OptionLinkReport::default();

    for &trade_id in trade_candidates {
        let key = {
            let ev = &events[trade_id.0 as usize];
            let Some(trade) = ev.trade() else {
                continue;
            };
            (
                normalized_date(ev),
                ev.asset_id.0,
                trade.quantity.abs().normalize().to_string(),
            )
        };

        match lookup.get(&key) {
            Some(&opt_id) => {
                if let Some(trade) = events[trade_id.0 as usize].trade_mut() {
                    trade.linked_option = Some(opt_id);
                    report.linked += 1;
                }
            }
            None => {
                let same_day: Vec<&(String, u32, String)> =
                    lookup.keys().filter(|k| k.0 == key.0).collect();
                warn!(
                    "no option event for exercised/assigned trade {trade_id} \
                     (key {key:?}); option keys on that date: {same_day:?}"
                );
                report.unmatched.push(trade_id);
            }
        }
    }

    report
}

/// Lookup key for an exercise/assignment event, keyed by the option's
/// underlying so it compares against the stock trade's own asset.
fn option_key(ev: &FinancialEvent, resolver: &AssetResolver) -> Option<(String, u32, String)> {
    let contracts = match &ev.payload {
        tax_core::EventPayload::OptionLifecycle(o) => o.contracts,
        _ => return None,
    };
    let asset = resolver.get(ev.asset_id)?;
    let terms = asset.derivative.as_ref()?;
    let underlying = terms.underlying?;
    let multiplier = match terms.multiplier {
        Some(m) if !m.is_zero() => m,
        _ => DEFAULT_MULTIPLIER,
    };
    let expected_shares = (contracts.abs() * multiplier).normalize().to_string();
    Some((normalized_date(ev), underlying.0, expected_shares))
}

fn normalized_date(ev: &FinancialEvent) -> String {
    match parse_event_date(&ev.date) {
        Some(d) => d.to_string(),
        None => ev.date.clone(),
    }
}
