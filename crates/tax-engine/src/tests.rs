use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use asset_classifier::{AssetClassifier, ClassificationStore};
use broker_import::{RawCashRow, RawPositionRow, RawTradeRow};
use rate_service::{RateCache, RateError, RateService, RateSource};
use tax_core::{
    event::{OptionLifecycleDetails, TradeDetails, WithholdingDetails},
    AssetId, CalcContext, EventId, EventKind, EventPayload, FinancialEvent,
};

use crate::fifo::realize;
use crate::option_linker::link_option_trades;
use crate::orchestrator::{Pipeline, PipelineInputs};
use crate::resolver::{AssetIdentifiers, AssetResolver};
use crate::sort::sort_and_validate;
use crate::wht_linker::link_withholding;
use crate::{enrich_events, EngineError};

/// Scripted rate source with a fixed (date, currency) → rate table.
struct FixedSource(Vec<(NaiveDate, String, Decimal)>);

impl RateSource for FixedSource {
    fn rate(&self, day: NaiveDate, currency: &str) -> Result<Option<Decimal>, RateError> {
        Ok(self
            .0
            .iter()
            .find(|(d, c, _)| *d == day && c == currency)
            .map(|(_, _, r)| *r))
    }
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn ctx() -> CalcContext {
    CalcContext::new("EUR", 2023)
}

fn rates(table: Vec<(&str, &str, Decimal)>) -> RateService {
    let table = table
        .into_iter()
        .map(|(d, c, r)| (date(d), c.to_string(), r))
        .collect();
    RateService::new(Box::new(FixedSource(table)), RateCache::in_memory(), "EUR")
}

/// Helper: an income event with the given tag, amount and tx id.
fn income_event(
    id: u32,
    asset: AssetId,
    day: &str,
    kind: EventKind,
    amount: Decimal,
    currency: &str,
    tx: &str,
) -> FinancialEvent {
    let mut ev = FinancialEvent::new(
        EventId(id),
        asset,
        day,
        kind,
        currency,
        EventPayload::Income,
    );
    ev.gross_amount = Some(amount);
    ev.tx_id = Some(tx.to_string());
    ev
}

/// Helper: a withholding-tax event.
fn wht_event(
    id: u32,
    asset: AssetId,
    day: &str,
    amount: Decimal,
    currency: &str,
    tx: &str,
) -> FinancialEvent {
    let mut ev = FinancialEvent::new(
        EventId(id),
        asset,
        day,
        EventKind::WithholdingTax,
        currency,
        EventPayload::WithholdingTax(WithholdingDetails::default()),
    );
    ev.gross_amount = Some(amount);
    ev.tx_id = Some(tx.to_string());
    ev
}

/// Helper: a plain trade event.
fn trade_event(
    id: u32,
    asset: AssetId,
    day: &str,
    kind: EventKind,
    quantity: Decimal,
    price: Decimal,
    currency: &str,
    tx: &str,
) -> FinancialEvent {
    let mut ev = FinancialEvent::new(
        EventId(id),
        asset,
        day,
        kind,
        currency,
        EventPayload::Trade(TradeDetails {
            quantity,
            price,
            commission: Decimal::ZERO,
            commission_currency: currency.to_string(),
            ..Default::default()
        }),
    );
    ev.tx_id = Some(tx.to_string());
    ev
}

// ---------------------------------------------------------------------
// Withholding-tax linker
// ---------------------------------------------------------------------

#[test]
fn test_wht_sequential_ids_link_at_confidence_100() {
    let asset = AssetId(0);
    let mut events = vec![
        income_event(
            0,
            asset,
            "2023-04-03",
            EventKind::Dividend,
            dec!(206.00),
            "CAD",
            "1633925900",
        ),
        wht_event(1, asset, "2023-04-03", dec!(30.90), "CAD", "1633925901"),
    ];

    let report = link_withholding(&mut events);
    assert_eq!(report.matches.len(), 1);
    assert!(report.unlinked.is_empty());

    let m = &report.matches[0];
    assert_eq!(m.confidence, 100);
    assert_eq!(m.effective_rate, dec!(0.15));

    let details = events[1].withholding().unwrap();
    assert_eq!(details.linked_income, Some(EventId(0)));
    assert_eq!(details.confidence, Some(100));
    assert_eq!(details.effective_rate, Some(dec!(0.15)));
}

#[test]
fn test_wht_shifted_date_links_at_confidence_60() {
    let asset = AssetId(0);
    let mut events = vec![
        income_event(
            0,
            asset,
            "2023-04-03",
            EventKind::Dividend,
            dec!(206.00),
            "CAD",
            "1633925900",
        ),
        wht_event(1, asset, "2023-04-05", dec!(30.90), "CAD", "9999999"),
    ];

    let report = link_withholding(&mut events);
    assert_eq!(report.matches.len(), 1);

    let m = &report.matches[0];
    assert_eq!(m.confidence, 60);
    assert_eq!(
        m.criteria,
        vec![
            "exact_asset",
            "exact_currency",
            "close_dates",
            "reasonable_amount_relationship"
        ]
    );
}

#[test]
fn test_wht_excessive_amount_never_links() {
    let asset = AssetId(0);
    let mut events = vec![
        income_event(
            0,
            asset,
            "2023-04-03",
            EventKind::Dividend,
            dec!(206.00),
            "CAD",
            "1633925900",
        ),
        // More than 100% of the income amount: outside every band.
        wht_event(1, asset, "2023-04-03", dec!(250.00), "CAD", "1633925901"),
    ];

    let report = link_withholding(&mut events);
    assert!(report.matches.is_empty());
    assert_eq!(report.unlinked, vec![EventId(1)]);
    assert!(events[1].withholding().unwrap().linked_income.is_none());
}

#[test]
fn test_wht_non_positive_income_never_links() {
    let asset = AssetId(0);
    let mut events = vec![
        income_event(
            0,
            asset,
            "2023-04-03",
            EventKind::Dividend,
            dec!(-10.00),
            "CAD",
            "100",
        ),
        wht_event(1, asset, "2023-04-03", dec!(1.50), "CAD", "101"),
    ];

    let report = link_withholding(&mut events);
    assert_eq!(report.unlinked, vec![EventId(1)]);
}

#[test]
fn test_wht_interest_pattern_links_at_confidence_70() {
    let cash = AssetId(3);
    let mut interest = income_event(
        0,
        cash,
        "2023-07-05",
        EventKind::Interest,
        dec!(100.00),
        "USD",
        "AB-1",
    );
    interest.description = "CREDIT INTEREST FOR JUN-2023".to_string();

    // Different asset id and non-numeric tx ids: only the interest
    // pattern can match this pair.
    let mut wht = wht_event(1, AssetId(4), "2023-07-05", dec!(20.00), "USD", "AB-2");
    wht.description = "WITHHOLDING @ 20% ON CREDIT INTEREST FOR JUN-2023".to_string();

    let mut events = vec![interest, wht];
    let report = link_withholding(&mut events);
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].confidence, 70);
    assert!(report.matches[0].criteria.contains(&"same_period"));
    assert!(report.matches[0].criteria.contains(&"plausible_tax_rate"));
}

#[test]
fn test_wht_prefers_highest_confidence_candidate() {
    let asset = AssetId(0);
    let mut events = vec![
        // Proximity-grade candidate two days earlier.
        income_event(
            0,
            asset,
            "2023-04-01",
            EventKind::Dividend,
            dec!(200.00),
            "CAD",
            "500",
        ),
        // Exact-grade candidate on the same day with sequential id.
        income_event(
            1,
            asset,
            "2023-04-03",
            EventKind::Dividend,
            dec!(206.00),
            "CAD",
            "1633925900",
        ),
        wht_event(2, asset, "2023-04-03", dec!(30.90), "CAD", "1633925901"),
    ];

    let report = link_withholding(&mut events);
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].income, EventId(1));
    assert_eq!(report.matches[0].confidence, 100);
}

// ---------------------------------------------------------------------
// Option-trade linker
// ---------------------------------------------------------------------

/// Resolver with a stock and a call option on it, derivative-linked.
fn option_fixture() -> (AssetResolver, AssetId, AssetId) {
    let mut resolver = AssetResolver::new();
    let stock = resolver.get_or_create(&AssetIdentifiers {
        symbol: "XYZ",
        currency: "USD",
        raw_category: "STK",
        ..Default::default()
    });
    let option = resolver.get_or_create(&AssetIdentifiers {
        symbol: "XYZ 16JUN23 50 C",
        currency: "USD",
        raw_category: "OPT",
        ..Default::default()
    });
    resolver.link_derivatives();
    (resolver, stock, option)
}

fn exercise_event(id: u32, asset: AssetId, day: &str, contracts: Decimal) -> FinancialEvent {
    FinancialEvent::new(
        EventId(id),
        asset,
        day,
        EventKind::OptionExercise,
        "USD",
        EventPayload::OptionLifecycle(OptionLifecycleDetails { contracts }),
    )
}

#[test]
fn test_option_exercise_links_matching_share_quantity() {
    let (resolver, stock, option) = option_fixture();
    let mut events = vec![
        exercise_event(0, option, "2023-06-01", dec!(1)),
        trade_event(
            1,
            stock,
            "2023-06-01",
            EventKind::BuyOpen,
            dec!(100),
            dec!(50),
            "USD",
            "t1",
        ),
    ];

    let report = link_option_trades(&mut events, &resolver, &[EventId(0)], &[EventId(1)]);
    assert_eq!(report.linked, 1);
    assert!(report.unmatched.is_empty());
    assert_eq!(
        events[1].trade().unwrap().linked_option,
        Some(EventId(0))
    );
}

#[test]
fn test_option_exercise_rejects_wrong_share_quantity() {
    let (resolver, stock, option) = option_fixture();
    let mut events = vec![
        exercise_event(0, option, "2023-06-01", dec!(1)),
        trade_event(
            1,
            stock,
            "2023-06-01",
            EventKind::BuyOpen,
            dec!(50),
            dec!(50),
            "USD",
            "t1",
        ),
    ];

    let report = link_option_trades(&mut events, &resolver, &[EventId(0)], &[EventId(1)]);
    assert_eq!(report.linked, 0);
    assert_eq!(report.unmatched, vec![EventId(1)]);
    assert!(events[1].trade().unwrap().linked_option.is_none());
}

#[test]
fn test_option_duplicate_key_last_write_wins() {
    let (resolver, stock, option) = option_fixture();
    let mut events = vec![
        exercise_event(0, option, "2023-06-01", dec!(1)),
        exercise_event(1, option, "2023-06-01", dec!(1)),
        trade_event(
            2,
            stock,
            "2023-06-01",
            EventKind::BuyOpen,
            dec!(100),
            dec!(50),
            "USD",
            "t1",
        ),
    ];

    let report = link_option_trades(
        &mut events,
        &resolver,
        &[EventId(0), EventId(1)],
        &[EventId(2)],
    );
    assert_eq!(report.linked, 1);
    assert_eq!(
        events[2].trade().unwrap().linked_option,
        Some(EventId(1))
    );
}

// ---------------------------------------------------------------------
// Currency enrichment
// ---------------------------------------------------------------------

#[test]
fn test_enrichment_base_currency_copies_verbatim() {
    let ctx = ctx();
    let mut service = rates(vec![]);
    let mut events = vec![income_event(
        0,
        AssetId(0),
        "2023-03-01",
        EventKind::Dividend,
        dec!(55.50),
        "EUR",
        "1",
    )];

    enrich_events(&mut events, &ctx, &mut service);
    assert_eq!(events[0].gross_base, Some(dec!(55.50)));
}

#[test]
fn test_enrichment_zero_amount_needs_no_rate() {
    let ctx = ctx();
    // Empty table: any lookup would come back empty.
    let mut service = rates(vec![]);
    let mut events = vec![income_event(
        0,
        AssetId(0),
        "2023-03-01",
        EventKind::Dividend,
        dec!(0),
        "JPY",
        "1",
    )];

    enrich_events(&mut events, &ctx, &mut service);
    assert_eq!(events[0].gross_base, Some(Decimal::ZERO));
}

#[test]
fn test_enrichment_missing_rate_leaves_field_unset() {
    let ctx = ctx();
    let mut service = rates(vec![]);
    let mut events = vec![income_event(
        0,
        AssetId(0),
        "2023-03-01",
        EventKind::Dividend,
        dec!(10),
        "JPY",
        "1",
    )];

    enrich_events(&mut events, &ctx, &mut service);
    assert_eq!(events[0].gross_base, None);
}

#[test]
fn test_enrichment_trade_net_includes_commission() {
    let ctx = ctx();
    let mut service = rates(vec![("2023-03-01", "USD", dec!(1.10))]);
    let mut buy = trade_event(
        0,
        AssetId(0),
        "2023-03-01",
        EventKind::BuyOpen,
        dec!(10),
        dec!(110),
        "USD",
        "1",
    );
    if let Some(t) = buy.trade_mut() {
        t.commission = dec!(1.10);
        t.commission_currency = "USD".to_string();
    }
    let mut events = vec![buy];

    enrich_events(&mut events, &ctx, &mut service);
    // Gross derived from quantity × price: 1100 USD -> 1000 EUR.
    assert_eq!(events[0].gross_base, Some(dec!(1000)));
    let t = events[0].trade().unwrap();
    assert_eq!(t.commission_base, Some(dec!(1)));
    assert_eq!(t.net_base, Some(dec!(1001)));
}

#[test]
fn test_enrichment_is_idempotent() {
    let ctx = ctx();
    let mut service = rates(vec![("2023-03-01", "USD", dec!(1.10))]);
    let mut events = vec![income_event(
        0,
        AssetId(0),
        "2023-03-01",
        EventKind::Dividend,
        dec!(110),
        "USD",
        "1",
    )];

    enrich_events(&mut events, &ctx, &mut service);
    let first = events[0].gross_base;
    // Re-run against an empty rate table: converted fields must survive.
    let mut empty = rates(vec![]);
    enrich_events(&mut events, &ctx, &mut empty);
    assert_eq!(events[0].gross_base, first);
    assert_eq!(first, Some(dec!(100)));
}

// ---------------------------------------------------------------------
// Deterministic sort & validation
// ---------------------------------------------------------------------

#[test]
fn test_sort_orders_by_date_then_kind_priority() {
    let mut resolver = AssetResolver::new();
    let asset = resolver.get_or_create(&AssetIdentifiers {
        symbol: "AAPL",
        currency: "USD",
        raw_category: "STK",
        ..Default::default()
    });

    let mut events = vec![
        income_event(0, asset, "2023-06-02", EventKind::Dividend, dec!(5), "USD", "3"),
        trade_event(
            1,
            asset,
            "2023-06-02",
            EventKind::SellClose,
            dec!(-5),
            dec!(10),
            "USD",
            "2",
        ),
        trade_event(
            2,
            asset,
            "2023-06-01",
            EventKind::BuyOpen,
            dec!(5),
            dec!(10),
            "USD",
            "1",
        ),
    ];

    sort_and_validate(&mut events, &resolver).unwrap();
    let ids: Vec<EventId> = events.iter().map(|e| e.id).collect();
    // Earlier date first; on the same day the trade precedes the income.
    assert_eq!(ids, vec![EventId(2), EventId(1), EventId(0)]);
}

#[test]
fn test_sort_rejects_duplicate_keys() {
    let mut resolver = AssetResolver::new();
    let asset = resolver.get_or_create(&AssetIdentifiers {
        symbol: "AAPL",
        currency: "USD",
        raw_category: "STK",
        ..Default::default()
    });

    // The same dividend row imported twice: identical in every key field.
    let mut events = vec![
        income_event(0, asset, "2023-06-02", EventKind::Dividend, dec!(5), "USD", "77"),
        income_event(1, asset, "2023-06-02", EventKind::Dividend, dec!(5), "USD", "77"),
    ];

    let err = sort_and_validate(&mut events, &resolver).unwrap_err();
    match err {
        EngineError::SortKeyConflict(msg) => {
            assert!(msg.contains("duplicate sort key"));
            assert!(msg.contains("E0"));
            assert!(msg.contains("E1"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_sort_tolerates_genuinely_unparseable_date() {
    let mut resolver = AssetResolver::new();
    let asset = resolver.get_or_create(&AssetIdentifiers {
        symbol: "AAPL",
        currency: "USD",
        raw_category: "STK",
        ..Default::default()
    });

    let mut events = vec![
        income_event(0, asset, "not-a-date", EventKind::Dividend, dec!(5), "USD", "1"),
        income_event(1, asset, "2023-06-02", EventKind::Dividend, dec!(6), "USD", "2"),
    ];

    sort_and_validate(&mut events, &resolver).unwrap();
    // The sentinel sorts first.
    assert_eq!(events[0].id, EventId(0));
}

// ---------------------------------------------------------------------
// FIFO realization
// ---------------------------------------------------------------------

/// Resolver with one classified stock asset for realization tests.
fn stock_fixture() -> (AssetResolver, AssetId) {
    let mut resolver = AssetResolver::new();
    let id = resolver.get_or_create(&AssetIdentifiers {
        symbol: "AAPL",
        currency: "USD",
        raw_category: "STK",
        ..Default::default()
    });
    resolver.get_mut(id).unwrap().category = tax_core::AssetCategory::Stock;
    (resolver, id)
}

fn enriched_trade(
    id: u32,
    asset: AssetId,
    day: &str,
    kind: EventKind,
    quantity: Decimal,
    net_base: Decimal,
) -> FinancialEvent {
    let mut ev = trade_event(id, asset, day, kind, quantity, Decimal::ZERO, "EUR", "");
    ev.tx_id = Some(format!("tx{id}"));
    if let Some(t) = ev.trade_mut() {
        t.net_base = Some(net_base);
    }
    ev
}

#[test]
fn test_fifo_partial_sale_realizes_one_record() {
    let (resolver, asset) = stock_fixture();
    let ctx = ctx();

    let events = vec![
        enriched_trade(0, asset, "2023-02-01", EventKind::BuyOpen, dec!(10), dec!(1000)),
        enriched_trade(1, asset, "2023-08-01", EventKind::SellClose, dec!(-4), dec!(520)),
    ];

    let result = realize(&events, &resolver, &ctx);
    assert_eq!(result.realized.len(), 1);

    let r = &result.realized[0];
    assert_eq!(r.quantity, dec!(4));
    assert_eq!(r.cost_base, dec!(400));
    assert_eq!(r.proceeds_base, dec!(520));
    assert_eq!(r.gain_base, dec!(120));
    assert_eq!(r.acquired, date("2023-02-01"));
    assert_eq!(r.holding_days, 181);

    // 6 units remain open at the original unit cost.
    let state = result
        .final_states
        .iter()
        .find(|s| s.asset_id == asset)
        .unwrap();
    assert_eq!(state.computed_quantity, dec!(6));
}

#[test]
fn test_fifo_sale_spanning_lots_emits_record_per_lot() {
    let (resolver, asset) = stock_fixture();
    let ctx = ctx();

    let events = vec![
        enriched_trade(0, asset, "2023-02-01", EventKind::BuyOpen, dec!(10), dec!(1000)),
        enriched_trade(1, asset, "2023-03-01", EventKind::BuyOpen, dec!(10), dec!(1200)),
        enriched_trade(2, asset, "2023-09-01", EventKind::SellClose, dec!(-15), dec!(1800)),
    ];

    let result = realize(&events, &resolver, &ctx);
    assert_eq!(result.realized.len(), 2);
    assert_eq!(result.realized[0].quantity, dec!(10));
    assert_eq!(result.realized[0].cost_base, dec!(1000));
    assert_eq!(result.realized[1].quantity, dec!(5));
    assert_eq!(result.realized[1].cost_base, dec!(600));
    // Proceeds split 120 EUR/unit across both slices.
    assert_eq!(result.realized[0].proceeds_base, dec!(1200));
    assert_eq!(result.realized[1].proceeds_base, dec!(600));
}

#[test]
fn test_fifo_soy_lot_seeds_inventory() {
    let (mut resolver, asset) = stock_fixture();
    {
        let a = resolver.get_mut(asset).unwrap();
        a.soy_quantity = Some(dec!(10));
        a.soy_cost_basis = Some(dec!(800));
        a.eoy_quantity = Some(dec!(5));
    }
    let ctx = ctx();

    let events = vec![enriched_trade(
        0,
        asset,
        "2023-05-01",
        EventKind::SellClose,
        dec!(-5),
        dec!(500),
    )];

    let result = realize(&events, &resolver, &ctx);
    assert_eq!(result.realized.len(), 1);
    let r = &result.realized[0];
    // SOY basis 80/unit, opening lot dated Jan 1.
    assert_eq!(r.cost_base, dec!(400));
    assert_eq!(r.gain_base, dec!(100));
    assert_eq!(r.acquired, date("2023-01-01"));
    assert_eq!(result.eoy_mismatches, 0);
}

#[test]
fn test_fifo_short_position_is_symmetric() {
    let (resolver, asset) = stock_fixture();
    let ctx = ctx();

    let events = vec![
        enriched_trade(0, asset, "2023-02-01", EventKind::SellOpen, dec!(-10), dec!(1000)),
        enriched_trade(1, asset, "2023-04-01", EventKind::BuyClose, dec!(4), dec!(360)),
    ];

    let result = realize(&events, &resolver, &ctx);
    assert_eq!(result.realized.len(), 1);
    let r = &result.realized[0];
    assert_eq!(r.quantity, dec!(4));
    assert_eq!(r.proceeds_base, dec!(400));
    assert_eq!(r.cost_base, dec!(360));
    assert_eq!(r.gain_base, dec!(40));

    let state = result
        .final_states
        .iter()
        .find(|s| s.asset_id == asset)
        .unwrap();
    assert_eq!(state.computed_quantity, dec!(-6));
}

#[test]
fn test_fifo_eoy_mismatch_is_counted_not_fatal() {
    let (mut resolver, asset) = stock_fixture();
    resolver.get_mut(asset).unwrap().eoy_quantity = Some(dec!(99));
    let ctx = ctx();

    let events = vec![enriched_trade(
        0,
        asset,
        "2023-02-01",
        EventKind::BuyOpen,
        dec!(10),
        dec!(1000),
    )];

    let result = realize(&events, &resolver, &ctx);
    assert_eq!(result.eoy_mismatches, 1);
    let state = result
        .final_states
        .iter()
        .find(|s| s.asset_id == asset)
        .unwrap();
    assert!(!state.reconciled);
    assert_eq!(state.computed_quantity, dec!(10));
    assert_eq!(state.reported_quantity, Some(dec!(99)));
}

// ---------------------------------------------------------------------
// End-to-end pipeline
// ---------------------------------------------------------------------

fn trade_row(
    symbol: &str,
    qty: Decimal,
    price: Decimal,
    currency: &str,
    tx: &str,
    notes: &str,
    day: &str,
) -> RawTradeRow {
    RawTradeRow {
        currency: currency.to_string(),
        asset_class: "STK".to_string(),
        sub_category: "COMMON".to_string(),
        symbol: symbol.to_string(),
        isin: String::new(),
        contract_id: String::new(),
        description: format!("{symbol} COMMON STOCK"),
        quantity: qty,
        price,
        proceeds: None,
        commission: Some(dec!(-1)),
        commission_currency: Some(currency.to_string()),
        tx_id: tx.to_string(),
        notes: notes.to_string(),
        date: day.to_string(),
    }
}

#[test]
fn test_pipeline_end_to_end() {
    let ctx = CalcContext::new("EUR", 2023);
    let classifier = AssetClassifier::new(ClassificationStore::in_memory());
    let mut pipeline = Pipeline::new(ctx, classifier);
    let mut service = rates(vec![("2023-04-03", "CAD", dec!(1.45))]);

    let inputs = PipelineInputs {
        trades: vec![
            trade_row("ADS", dec!(10), dec!(100), "EUR", "1001", "O", "2023-02-01"),
            trade_row("ADS", dec!(-4), dec!(120), "EUR", "1002", "C", "2023-08-01"),
        ],
        cash: vec![
            RawCashRow {
                currency: "CAD".to_string(),
                symbol: "RY".to_string(),
                isin: "CA7800871021".to_string(),
                contract_id: String::new(),
                description: "RY CASH DIVIDEND".to_string(),
                amount: dec!(206.00),
                kind: "DIV".to_string(),
                tx_id: "1633925900".to_string(),
                date: "2023-04-03".to_string(),
            },
            RawCashRow {
                currency: "CAD".to_string(),
                symbol: "RY".to_string(),
                isin: "CA7800871021".to_string(),
                contract_id: String::new(),
                description: "CA TAX ON RY CASH DIVIDEND".to_string(),
                amount: dec!(-30.90),
                kind: "WHT".to_string(),
                tx_id: "1633925901".to_string(),
                date: "2023-04-03".to_string(),
            },
        ],
        corporate_actions: Vec::new(),
        soy_positions: Vec::new(),
        eoy_positions: vec![RawPositionRow {
            currency: "EUR".to_string(),
            asset_class: "STK".to_string(),
            sub_category: "COMMON".to_string(),
            symbol: "ADS".to_string(),
            isin: String::new(),
            contract_id: String::new(),
            description: "ADS COMMON STOCK".to_string(),
            quantity: dec!(6),
            cost_basis: None,
            price: Some(dec!(125)),
            value: Some(dec!(750)),
        }],
    };

    let output = pipeline.run(&inputs, &mut service).unwrap();

    // One disposal of 4 units: cost (1000 + 1) * 4/10, proceeds 480 - 1.
    assert_eq!(output.realized.len(), 1);
    let r = &output.realized[0];
    assert_eq!(r.quantity, dec!(4));
    assert_eq!(r.cost_base, dec!(400.4));
    assert_eq!(r.proceeds_base, dec!(479));
    assert_eq!(r.gain_base, dec!(78.6));

    // Dividend converted at 1.45 CAD per EUR; WHT linked exactly.
    assert_eq!(output.income.dividends, ctx_convert(dec!(206.00), dec!(1.45)));
    assert!(output.unlinked_withholding.is_empty());
    assert_eq!(
        output.income.withholding_by_country.get("CA").copied(),
        Some(ctx_convert(dec!(30.90), dec!(1.45)))
    );

    // EOY reconciles: 10 bought - 4 sold = 6 reported.
    assert_eq!(output.eoy_mismatches, 0);
    assert!(output.unmatched_option_trades.is_empty());
}

fn ctx_convert(amount: Decimal, rate: Decimal) -> Decimal {
    CalcContext::new("EUR", 2023).convert(amount, rate)
}

#[test]
fn test_pipeline_aborts_on_duplicate_rows() {
    let ctx = CalcContext::new("EUR", 2023);
    let classifier = AssetClassifier::new(ClassificationStore::in_memory());
    let mut pipeline = Pipeline::new(ctx, classifier);
    let mut service = rates(vec![]);

    // The identical row twice: the sort validation must refuse to order
    // them and abort the run.
    let row = trade_row("ADS", dec!(10), dec!(100), "EUR", "1001", "O", "2023-02-01");
    let inputs = PipelineInputs {
        trades: vec![row.clone(), row],
        ..Default::default()
    };

    let err = pipeline.run(&inputs, &mut service).unwrap_err();
    assert!(matches!(err, EngineError::SortKeyConflict(_)));
}
