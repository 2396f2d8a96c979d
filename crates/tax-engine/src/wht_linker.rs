use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tax_core::{EventId, FinancialEvent};
use tracing::{debug, warn};

/// Minimum confidence a candidate must reach to be accepted.
const MIN_CONFIDENCE: u8 = 50;

/// Plausible withholding ratio band before per-strategy tolerance.
const RATIO_LOW: Decimal = dec!(0.05);
const RATIO_HIGH: Decimal = dec!(0.50);

#[derive(Debug, Clone)]
pub struct WhtMatch {
    pub wht: EventId,
    pub income: EventId,
    pub confidence: u8,
    pub criteria: Vec<&'static str>,
    pub effective_rate: Decimal,
}

#[derive(Debug, Default)]
pub struct WhtLinkReport {
    pub matches: Vec<WhtMatch>,
    /// Withholding events no income event qualified for
    pub unlinked: Vec<EventId>,
}

/// Associate each withholding-tax event with the income event it taxed.
///
/// Strategies are tried in order per candidate (first hit wins for that
/// candidate), then the highest-confidence candidate overall is chosen.
/// Unmatched events are reported, never fatal.
pub fn link_withholding(events: &mut [FinancialEvent]) -> WhtLinkReport {
    let wht_ids: Vec<EventId> = events
        .iter()
        .filter(|e| e.kind == tax_core::EventKind::WithholdingTax)
        .map(|e| e.id)
        .collect();
    let income_ids: Vec<EventId> = events
        .iter()
        .filter(|e| e.kind.is_income())
        .map(|e| e.id)
        .collect();

    let mut report = WhtLinkReport::default();

    for &wht_id in &wht_ids {
        let mut best: Option<(EventId, u8, Vec<&'static str>)> = None;

        for &inc_id in &income_ids {
            let wht = &events[wht_id.0 as usize];
            let income = &events[inc_id.0 as usize];
            if let Some((confidence, criteria)) = evaluate(wht, income) {
                let better = match &best {
                    Some((_, best_conf, _)) => confidence > *best_conf,
                    None => true,
                };
                if better {
                    best = Some((inc_id, confidence, criteria));
                }
            }
        }

        match best.filter(|(_, conf, _)| *conf >= MIN_CONFIDENCE) {
            Some((inc_id, confidence, criteria)) => {
                let rate = amount_ratio(&events[wht_id.0 as usize], &events[inc_id.0 as usize])
                    .map(|r| r.round_dp(4))
                    .unwrap_or_default();
                if let Some(details) = events[wht_id.0 as usize].withholding_mut() {
                    details.linked_income = Some(inc_id);
                    details.confidence = Some(confidence);
                    details.effective_rate = Some(rate);
                }
                debug!(
                    "linked WHT {wht_id} -> income {inc_id} (confidence {confidence}, \
                     criteria {criteria:?})"
                );
                report.matches.push(WhtMatch {
                    wht: wht_id,
                    income: inc_id,
                    confidence,
                    criteria,
                    effective_rate: rate,
                });
            }
            None => {
                warn!("no income event qualified for withholding event {wht_id}");
                report.unlinked.push(wht_id);
            }
        }
    }

    report
}

/// First successful strategy for a (WHT, income) pair.
fn evaluate(wht: &FinancialEvent, income: &FinancialEvent) -> Option<(u8, Vec<&'static str>)> {
    strategy_exact(wht, income)
        .or_else(|| strategy_strong(wht, income))
        .or_else(|| strategy_interest_pattern(wht, income))
        .or_else(|| strategy_proximity(wht, income))
}

/// Same date, asset and currency, sequential transaction ids, plausible
/// ratio with wide tolerance. Confidence 100.
fn strategy_exact(wht: &FinancialEvent, income: &FinancialEvent) -> Option<(u8, Vec<&'static str>)> {
    if !same_date(wht, income)
        || wht.asset_id != income.asset_id
        || !same_currency(wht, income)
        || !sequential_tx_ids(wht, income)
    {
        return None;
    }
    let ratio = amount_ratio(wht, income)?;
    if !in_band(ratio, dec!(0.3)) {
        return None;
    }
    Some((
        100,
        vec![
            "same_date",
            "exact_asset",
            "exact_currency",
            "sequential_transaction_ids",
            "reasonable_amount_relationship",
        ],
    ))
}

/// Same date, asset and currency, ratio within the plausible band with
/// a small tolerance. Confidence 80.
fn strategy_strong(wht: &FinancialEvent, income: &FinancialEvent) -> Option<(u8, Vec<&'static str>)> {
    if !same_date(wht, income) || wht.asset_id != income.asset_id || !same_currency(wht, income) {
        return None;
    }
    let ratio = amount_ratio(wht, income)?;
    if !in_band(ratio, dec!(0.1)) {
        return None;
    }
    Some((
        80,
        vec![
            "same_date",
            "exact_asset",
            "exact_currency",
            "reasonable_amount_relationship",
        ],
    ))
}

/// Interest-specific pattern match: the WHT description names a
/// withholding on credit interest. Same date and currency are required;
/// a matching month-year period token and a plausible extracted tax rate
/// each add a criterion, and at least three criteria must hold in total.
/// Confidence 70.
fn strategy_interest_pattern(
    wht: &FinancialEvent,
    income: &FinancialEvent,
) -> Option<(u8, Vec<&'static str>)> {
    if income.kind != tax_core::EventKind::Interest {
        return None;
    }
    let caps = interest_wht_regex().captures(&wht.description)?;
    if !same_date(wht, income) || !same_currency(wht, income) {
        return None;
    }

    let mut criteria = vec!["same_date", "exact_currency", "interest_withholding_pattern"];
    let mut matched = 2u32;

    if let (Some(wp), Some(ip)) = (
        period_token(&wht.description),
        period_token(&income.description),
    ) {
        if wp == ip {
            criteria.push("same_period");
            matched += 1;
        }
    }

    let rate = caps
        .get(1)
        .and_then(|m| m.as_str().replace(',', ".").parse::<Decimal>().ok())
        .map(|pct| pct / dec!(100))
        .or_else(|| amount_ratio(wht, income));
    if let Some(rate) = rate {
        if rate >= dec!(0.18) && rate <= dec!(0.22) {
            criteria.push("plausible_tax_rate");
            matched += 1;
        }
    }

    if matched < 3 {
        return None;
    }
    Some((70, criteria))
}

/// Same asset and currency, dates within three days, ratio within the
/// plausible band with a generous tolerance. Confidence 60.
fn strategy_proximity(
    wht: &FinancialEvent,
    income: &FinancialEvent,
) -> Option<(u8, Vec<&'static str>)> {
    if wht.asset_id != income.asset_id || !same_currency(wht, income) {
        return None;
    }
    if !dates_within(wht, income, 3) {
        return None;
    }
    let ratio = amount_ratio(wht, income)?;
    if !in_band(ratio, dec!(0.5)) {
        return None;
    }
    Some((
        60,
        vec![
            "exact_asset",
            "exact_currency",
            "close_dates",
            "reasonable_amount_relationship",
        ],
    ))
}

/// WHT gross divided by income gross. A non-positive income amount
/// invalidates any match.
fn amount_ratio(wht: &FinancialEvent, income: &FinancialEvent) -> Option<Decimal> {
    let income_gross = income.gross_amount?;
    if income_gross <= Decimal::ZERO {
        return None;
    }
    let wht_gross = wht.gross_amount?.abs();
    Some(wht_gross / income_gross)
}

fn in_band(ratio: Decimal, tolerance: Decimal) -> bool {
    ratio >= RATIO_LOW - tolerance && ratio <= RATIO_HIGH + tolerance
}

fn same_currency(a: &FinancialEvent, b: &FinancialEvent) -> bool {
    a.currency.eq_ignore_ascii_case(&b.currency)
}

fn same_date(a: &FinancialEvent, b: &FinancialEvent) -> bool {
    match (a.parsed_date(), b.parsed_date()) {
        (Some(da), Some(db)) => da == db,
        _ => false,
    }
}

fn dates_within(a: &FinancialEvent, b: &FinancialEvent, days: i64) -> bool {
    match (a.parsed_date(), b.parsed_date()) {
        (Some(da), Some(db)) => (da - db).num_days().abs() <= days,
        _ => false,
    }
}

/// Sequential means the WHT's numeric transaction id is 1 to 5 greater
/// than the income's; non-numeric ids never qualify.
fn sequential_tx_ids(wht: &FinancialEvent, income: &FinancialEvent) -> bool {
    let (Some(w), Some(i)) = (
        wht.tx_id.as_deref().and_then(|s| s.parse::<i64>().ok()),
        income.tx_id.as_deref().and_then(|s| s.parse::<i64>().ok()),
    ) else {
        return false;
    };
    (1..=5).contains(&(w - i))
}

fn interest_wht_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)withholding\s*(?:@\s*(\d+(?:[.,]\d+)?)\s*%)?\s*on\s*(?:credit\s+)?interest")
            .expect("static regex")
    })
}

fn period_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC)[A-Z]*[\s-]*(\d{4})\b")
            .expect("static regex")
    })
}

/// Month-year period token, e.g. "JUN-2023" from "FOR JUN-2023".
fn period_token(description: &str) -> Option<(String, String)> {
    let caps = period_regex().captures(description)?;
    Some((caps[1].to_uppercase(), caps[2].to_string()))
}
