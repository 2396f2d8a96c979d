use std::collections::{HashMap, VecDeque};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::Signed;
use tax_core::{
    AssetCategory, AssetFinalState, AssetId, CalcContext, EventId, EventKind, EventPayload,
    FinancialEvent, IncomeSummary, RealizationKind, RealizedGainLoss, TaxCategory,
};
use tracing::{error, warn};

use crate::resolver::AssetResolver;

/// An open lot: a quantity acquired at a specific date and unit cost in
/// base currency. Negative quantity models a short position; all lots in
/// one inventory share the same sign.
#[derive(Debug, Clone)]
pub struct Lot {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub acquired: NaiveDate,
}

/// A slice of a lot consumed by a disposal.
#[derive(Debug, Clone)]
pub struct ConsumedSlice {
    /// Unsigned quantity taken from the lot
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub acquired: NaiveDate,
}

/// Ordered queue of open lots for one asset, consumed strictly
/// oldest-first.
#[derive(Debug, Default)]
pub struct LotInventory {
    lots: VecDeque<Lot>,
}

impl LotInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_quantity(&self) -> Decimal {
        self.lots.iter().map(|l| l.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    fn push(&mut self, quantity: Decimal, unit_cost: Decimal, acquired: NaiveDate) {
        if quantity.is_zero() {
            return;
        }
        self.lots.push_back(Lot {
            quantity,
            unit_cost,
            acquired,
        });
    }

    /// Apply a signed quantity change at the given unit value.
    ///
    /// Same-direction changes open a new lot. Opposite-direction changes
    /// consume open lots oldest-first, splitting the last one touched;
    /// any excess flips the position and opens a lot on the other side.
    /// Returns the consumed slices.
    pub fn apply(
        &mut self,
        quantity: Decimal,
        unit_value: Decimal,
        date: NaiveDate,
    ) -> Vec<ConsumedSlice> {
        if quantity.is_zero() {
            return Vec::new();
        }

        let position = self.total_quantity();
        if position.is_zero() || position.signum() == quantity.signum() {
            self.push(quantity, unit_value, date);
            return Vec::new();
        }

        let mut remaining = quantity.abs();
        let mut consumed = Vec::new();

        while remaining > Decimal::ZERO {
            let Some(front) = self.lots.front_mut() else {
                break;
            };
            let available = front.quantity.abs();
            let take = remaining.min(available);

            consumed.push(ConsumedSlice {
                quantity: take,
                unit_cost: front.unit_cost,
                acquired: front.acquired,
            });

            if take == available {
                self.lots.pop_front();
            } else {
                front.quantity -= take * front.quantity.signum();
            }
            remaining -= take;
        }

        if remaining > Decimal::ZERO {
            // Disposal exceeded the open position: flip sides.
            self.push(remaining * quantity.signum(), unit_value, date);
        }
        consumed
    }

    /// Consume the entire inventory (cash-settled merger, expiry).
    pub fn drain_all(&mut self) -> Vec<ConsumedSlice> {
        self.lots
            .drain(..)
            .map(|l| ConsumedSlice {
                quantity: l.quantity.abs(),
                unit_cost: l.unit_cost,
                acquired: l.acquired,
            })
            .collect()
    }

    /// Rescale open lots for a split: quantities multiply by the ratio,
    /// unit costs divide, total cost is preserved.
    pub fn rescale(&mut self, ratio: Decimal) {
        if ratio.is_zero() {
            return;
        }
        for lot in &mut self.lots {
            lot.quantity *= ratio;
            lot.unit_cost /= ratio;
        }
    }
}

/// What the realization engine produced.
#[derive(Debug)]
pub struct RealizationResult {
    pub realized: Vec<RealizedGainLoss>,
    pub income: IncomeSummary,
    pub final_states: Vec<AssetFinalState>,
    pub eoy_mismatches: u32,
}

/// Consume the sorted, enriched event stream and produce realized
/// gains/losses, income aggregates and reconciled year-end state.
pub fn realize(
    events: &[FinancialEvent],
    resolver: &AssetResolver,
    ctx: &CalcContext,
) -> RealizationResult {
    // Sorting reordered the list, so linked-event lookups go by id.
    let kinds_by_id: HashMap<EventId, EventKind> =
        events.iter().map(|e| (e.id, e.kind)).collect();

    let mut engine = Engine {
        ctx,
        resolver,
        kinds_by_id,
        inventories: HashMap::new(),
        option_premiums: HashMap::new(),
        realized: Vec::new(),
        income: IncomeSummary::default(),
    };

    engine.seed_soy_lots();
    for ev in events {
        engine.process(ev);
    }
    engine.finish()
}

struct Engine<'a> {
    ctx: &'a CalcContext,
    resolver: &'a AssetResolver,
    kinds_by_id: HashMap<EventId, EventKind>,
    inventories: HashMap<AssetId, LotInventory>,
    /// Premium carried from an exercised/assigned option event into the
    /// linked stock trade, signed (paid positive, received negative).
    option_premiums: HashMap<EventId, Decimal>,
    realized: Vec<RealizedGainLoss>,
    income: IncomeSummary,
}

impl<'a> Engine<'a> {
    fn seed_soy_lots(&mut self) {
        let opening = NaiveDate::from_ymd_opt(self.ctx.tax_year, 1, 1)
            .expect("January 1st always exists");
        for asset in self.resolver.iter() {
            if asset.is_cash_balance() {
                continue;
            }
            let Some(quantity) = asset.soy_quantity.filter(|q| !q.is_zero()) else {
                continue;
            };
            let cost = asset.soy_cost_basis.unwrap_or_default();
            let unit_cost = self.ctx.quantize(cost / quantity.abs());
            self.inventories
                .entry(asset.id)
                .or_default()
                .push(quantity, unit_cost, opening);
        }
    }

    fn process(&mut self, ev: &FinancialEvent) {
        match ev.kind {
            k if k.is_trade() => self.process_trade(ev),
            EventKind::OptionExercise | EventKind::OptionAssignment => {
                self.process_option_consumption(ev)
            }
            EventKind::OptionExpiry => self.process_option_expiry(ev),
            EventKind::Split => self.process_split(ev),
            EventKind::Merger => self.process_merger(ev),
            EventKind::StockDividend | EventKind::DividendRightsIssue => {
                self.process_share_distribution(ev)
            }
            EventKind::ExpireDividendRights => self.process_rights_expiry(ev),
            k if k.is_income() => self.process_income(ev),
            EventKind::WithholdingTax => self.process_withholding(ev),
            EventKind::Fee => self.process_fee(ev),
            EventKind::CurrencyConversion => {}
            _ => {}
        }
    }

    fn process_trade(&mut self, ev: &FinancialEvent) {
        let Some(asset) = self.resolver.get(ev.asset_id) else {
            return;
        };
        if asset.is_cash_balance() {
            return;
        }
        let Some(trade) = ev.trade() else {
            return;
        };
        let Some(date) = ev.parsed_date() else {
            warn!("trade {} has unparseable date, not realized", ev.id);
            return;
        };
        let Some(mut net) = trade.net_base.or(ev.gross_base) else {
            warn!(
                "trade {} on {} has no base-currency value, not realized",
                ev.id,
                asset.label()
            );
            return;
        };
        if trade.quantity.is_zero() {
            return;
        }

        // Stillhalter: premium collected writing options is income in
        // its own right, beside any later realization on the close.
        if asset.category == AssetCategory::StockOption && ev.kind == EventKind::SellOpen {
            self.income.option_writer_premium += net;
        }

        // A trade caused by exercise/assignment folds the option premium
        // into its basis (buys) or proceeds (sells).
        let mut realization = RealizationKind::Sale;
        if let Some(opt_id) = trade.linked_option {
            let premium = self.option_premiums.remove(&opt_id).unwrap_or_default();
            if ev.kind.is_buy() {
                net += premium;
            } else {
                net -= premium;
            }
            realization = match self.kinds_by_id.get(&opt_id) {
                Some(EventKind::OptionAssignment) => RealizationKind::Assignment,
                _ => RealizationKind::Exercise,
            };
        }

        let unit_value = self.ctx.quantize(net / trade.quantity.abs());
        let slices = self
            .inventories
            .entry(ev.asset_id)
            .or_default()
            .apply(trade.quantity, unit_value, date);

        let tax_category = TaxCategory::from_asset(asset.category, asset.fund_type);
        let symbol = asset.label();
        for slice in slices {
            let record = if trade.quantity < Decimal::ZERO {
                // Long disposal: lot cost against sale proceeds.
                self.build_record(
                    ev.asset_id,
                    &symbol,
                    &slice,
                    slice.unit_cost,
                    unit_value,
                    date,
                    tax_category,
                    realization,
                )
            } else {
                // Short cover: buy cost against short-open proceeds.
                self.build_record(
                    ev.asset_id,
                    &symbol,
                    &slice,
                    unit_value,
                    slice.unit_cost,
                    date,
                    tax_category,
                    realization,
                )
            };
            self.realized.push(record);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        asset_id: AssetId,
        symbol: &str,
        slice: &ConsumedSlice,
        unit_cost: Decimal,
        unit_proceeds: Decimal,
        realized: NaiveDate,
        tax_category: TaxCategory,
        realization: RealizationKind,
    ) -> RealizedGainLoss {
        let cost = self.ctx.quantize(unit_cost * slice.quantity);
        let proceeds = self.ctx.quantize(unit_proceeds * slice.quantity);
        RealizedGainLoss {
            asset_id,
            symbol: symbol.to_string(),
            acquired: slice.acquired,
            realized,
            quantity: slice.quantity,
            cost_base: cost,
            proceeds_base: proceeds,
            gain_base: proceeds - cost,
            tax_category,
            holding_days: (realized - slice.acquired).num_days(),
            realization,
        }
    }

    /// Exercise/assignment consumes the option position without
    /// realizing it; the premium is carried into the linked stock trade.
    fn process_option_consumption(&mut self, ev: &FinancialEvent) {
        let EventPayload::OptionLifecycle(lifecycle) = &ev.payload else {
            return;
        };
        let Some(date) = ev.parsed_date() else {
            return;
        };
        let inventory = self.inventories.entry(ev.asset_id).or_default();
        if inventory.is_empty() {
            warn!(
                "option event {} consumes an empty inventory, premium unknown",
                ev.id
            );
            self.option_premiums.insert(ev.id, Decimal::ZERO);
            return;
        }
        let direction = -inventory.total_quantity().signum();
        let was_long = direction < Decimal::ZERO;
        let slices = inventory.apply(direction * lifecycle.contracts, Decimal::ZERO, date);

        // Long positions carried premium paid (positive adjustment),
        // short positions premium received (negative).
        let magnitude: Decimal = slices.iter().map(|s| s.quantity * s.unit_cost).sum();
        let premium = if was_long { magnitude } else { -magnitude };
        self.option_premiums.insert(ev.id, premium);
    }

    fn process_option_expiry(&mut self, ev: &FinancialEvent) {
        let EventPayload::OptionLifecycle(lifecycle) = &ev.payload else {
            return;
        };
        let Some(date) = ev.parsed_date() else {
            return;
        };
        let Some(asset) = self.resolver.get(ev.asset_id) else {
            return;
        };
        let inventory = self.inventories.entry(ev.asset_id).or_default();
        if inventory.is_empty() {
            return;
        }
        let was_long = inventory.total_quantity() > Decimal::ZERO;
        let direction = if was_long { -Decimal::ONE } else { Decimal::ONE };
        let slices = inventory.apply(direction * lifecycle.contracts, Decimal::ZERO, date);

        let tax_category = TaxCategory::from_asset(asset.category, asset.fund_type);
        let symbol = asset.label();
        for slice in slices {
            // Worthless expiry: a long loses the premium paid, a short
            // keeps the premium received.
            let record = if was_long {
                self.build_record(
                    ev.asset_id,
                    &symbol,
                    &slice,
                    slice.unit_cost,
                    Decimal::ZERO,
                    date,
                    tax_category,
                    RealizationKind::Expiry,
                )
            } else {
                self.build_record(
                    ev.asset_id,
                    &symbol,
                    &slice,
                    Decimal::ZERO,
                    slice.unit_cost,
                    date,
                    tax_category,
                    RealizationKind::Expiry,
                )
            };
            self.realized.push(record);
        }
    }

    fn process_split(&mut self, ev: &FinancialEvent) {
        let Some(action) = ev.corporate_action() else {
            return;
        };
        let Some(ratio) = action.ratio.filter(|r| !r.is_zero()) else {
            warn!("split {} without ratio, ignored", ev.id);
            return;
        };
        self.inventories.entry(ev.asset_id).or_default().rescale(ratio);
    }

    fn process_merger(&mut self, ev: &FinancialEvent) {
        let Some(action) = ev.corporate_action() else {
            return;
        };
        let Some(date) = ev.parsed_date() else {
            return;
        };
        let Some(asset) = self.resolver.get(ev.asset_id) else {
            return;
        };

        if let Some(cash) = action.cash_per_share_base {
            // Cash-settled: the whole inventory realizes at the cash
            // consideration.
            let slices = self.inventories.entry(ev.asset_id).or_default().drain_all();
            let tax_category = TaxCategory::from_asset(asset.category, asset.fund_type);
            let symbol = asset.label();
            for slice in slices {
                let record = self.build_record(
                    ev.asset_id,
                    &symbol,
                    &slice,
                    slice.unit_cost,
                    cash,
                    date,
                    tax_category,
                    RealizationKind::CorporateAction,
                );
                self.realized.push(record);
            }
        } else if let Some(ratio) = action.ratio.filter(|r| !r.is_zero()) {
            // Share-for-share: carry the basis over at the new ratio.
            self.inventories.entry(ev.asset_id).or_default().rescale(ratio);
        } else {
            warn!("merger {} with neither cash nor ratio, ignored", ev.id);
        }
    }

    fn process_share_distribution(&mut self, ev: &FinancialEvent) {
        let Some(action) = ev.corporate_action() else {
            return;
        };
        let Some(date) = ev.parsed_date() else {
            return;
        };
        let Some(shares) = action.shares_received.filter(|s| !s.is_zero()) else {
            return;
        };
        let unit_cost = action.fmv_per_share_base.unwrap_or_default();
        self.inventories
            .entry(ev.asset_id)
            .or_default()
            .push(shares, unit_cost, date);
    }

    /// Rights expired unexercised: the zero-cost rights position simply
    /// disappears, realizing nothing.
    fn process_rights_expiry(&mut self, ev: &FinancialEvent) {
        if let Some(inventory) = self.inventories.get_mut(&ev.asset_id) {
            inventory.drain_all();
        }
    }

    fn process_income(&mut self, ev: &FinancialEvent) {
        let Some(amount) = ev.gross_base else {
            warn!("income event {} not converted, excluded from totals", ev.id);
            return;
        };
        match ev.kind {
            EventKind::Dividend => self.income.dividends += amount,
            EventKind::Distribution => self.income.distributions += amount,
            EventKind::Interest => self.income.interest += amount,
            EventKind::PaymentInLieu => self.income.payments_in_lieu += amount,
            _ => {}
        }
    }

    fn process_withholding(&mut self, ev: &FinancialEvent) {
        let Some(amount) = ev.gross_base else {
            warn!("withholding event {} not converted, excluded from totals", ev.id);
            return;
        };
        let country = ev
            .withholding()
            .and_then(|w| w.country.clone())
            .unwrap_or_else(|| "??".to_string());
        *self
            .income
            .withholding_by_country
            .entry(country)
            .or_default() += amount;
    }

    fn process_fee(&mut self, ev: &FinancialEvent) {
        if let Some(amount) = ev.gross_base {
            self.income.fees += amount;
        }
    }

    fn finish(mut self) -> RealizationResult {
        let mut final_states = Vec::new();
        let mut mismatches = 0u32;

        for asset in self.resolver.iter() {
            if asset.is_cash_balance() {
                continue;
            }
            let computed = self
                .inventories
                .remove(&asset.id)
                .map(|inv| inv.total_quantity())
                .unwrap_or_default();
            let reported = asset.eoy_quantity;
            let reconciled = computed == reported.unwrap_or_default();

            if !reconciled {
                mismatches += 1;
                error!(
                    "EOY quantity mismatch for {}: computed {computed}, reported {:?}",
                    asset.label(),
                    reported
                );
            }

            final_states.push(AssetFinalState {
                asset_id: asset.id,
                symbol: asset.label(),
                category: asset.category,
                computed_quantity: computed,
                reported_quantity: reported,
                eoy_value_base: asset.eoy_value,
                reconciled,
            });
        }

        RealizationResult {
            realized: self.realized,
            income: self.income,
            final_states,
            eoy_mismatches: mismatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_inventory_fifo_split_lot() {
        let mut inv = LotInventory::new();
        inv.apply(dec!(10), dec!(5), date("2023-01-10"));
        inv.apply(dec!(10), dec!(7), date("2023-02-10"));

        let slices = inv.apply(dec!(-15), dec!(9), date("2023-03-10"));
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].quantity, dec!(10));
        assert_eq!(slices[0].unit_cost, dec!(5));
        assert_eq!(slices[1].quantity, dec!(5));
        assert_eq!(slices[1].unit_cost, dec!(7));
        assert_eq!(inv.total_quantity(), dec!(5));
    }

    #[test]
    fn test_inventory_flip_to_short() {
        let mut inv = LotInventory::new();
        inv.apply(dec!(10), dec!(5), date("2023-01-10"));
        let slices = inv.apply(dec!(-12), dec!(6), date("2023-02-10"));
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].quantity, dec!(10));
        assert_eq!(inv.total_quantity(), dec!(-2));
    }

    #[test]
    fn test_inventory_rescale_preserves_cost() {
        let mut inv = LotInventory::new();
        inv.apply(dec!(10), dec!(30), date("2023-01-10"));
        inv.rescale(dec!(3));
        assert_eq!(inv.total_quantity(), dec!(30));
        let slices = inv.drain_all();
        assert_eq!(slices[0].unit_cost, dec!(10));
    }

    #[test]
    fn test_short_lots_consume_buy_direction_first() {
        let mut inv = LotInventory::new();
        inv.apply(dec!(-5), dec!(20), date("2023-01-10"));
        inv.apply(dec!(-5), dec!(25), date("2023-02-10"));
        let slices = inv.apply(dec!(7), dec!(18), date("2023-03-10"));
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].unit_cost, dec!(20));
        assert_eq!(slices[1].quantity, dec!(2));
        assert_eq!(inv.total_quantity(), dec!(-3));
    }
}
