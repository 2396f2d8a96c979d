use std::path::Path;
use std::sync::OnceLock;

use asset_classifier::{preliminary_classification, AssetClassifier};
use broker_import::{
    read_cash, read_corporate_actions, read_positions, read_trades, RawCashRow,
    RawCorporateActionRow, RawPositionRow, RawTradeRow,
};
use rate_service::RateService;
use regex::Regex;
use rust_decimal::Decimal;
use tax_core::{
    AssetCategory, CalcContext, EventId, EventKind, FinancialEvent, PipelineOutput,
};
use tracing::{info, warn};

use crate::enrich::enrich_events;
use crate::error::EngineError;
use crate::factory::EventFactory;
use crate::fifo::realize;
use crate::option_linker::link_option_trades;
use crate::resolver::{AssetIdentifiers, AssetResolver};
use crate::sort::sort_and_validate;
use crate::wht_linker::link_withholding;

/// The full-year record set one run processes.
#[derive(Debug, Default)]
pub struct PipelineInputs {
    pub trades: Vec<RawTradeRow>,
    pub cash: Vec<RawCashRow>,
    pub corporate_actions: Vec<RawCorporateActionRow>,
    pub soy_positions: Vec<RawPositionRow>,
    pub eoy_positions: Vec<RawPositionRow>,
}

impl PipelineInputs {
    /// Load the conventional file set from an input directory. Trades
    /// and cash files are required; the others default to empty when
    /// absent.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        let optional = |name: &str| -> Result<Vec<RawPositionRow>, EngineError> {
            let path = dir.join(name);
            if path.exists() {
                Ok(read_positions(&path)?)
            } else {
                warn!("{} not found, continuing without it", path.display());
                Ok(Vec::new())
            }
        };

        let actions_path = dir.join("corporate_actions.csv");
        let corporate_actions = if actions_path.exists() {
            read_corporate_actions(&actions_path)?
        } else {
            warn!("{} not found, continuing without it", actions_path.display());
            Vec::new()
        };

        Ok(Self {
            trades: read_trades(&dir.join("trades.csv"))?,
            cash: read_cash(&dir.join("cash.csv"))?,
            corporate_actions,
            soy_positions: optional("positions_soy.csv")?,
            eoy_positions: optional("positions_eoy.csv")?,
        })
    }
}

/// Drives the multi-pass pipeline in strict order: positions, asset
/// discovery, derivative linking, classification, event construction,
/// the linking passes, enrichment, the global sort, and realization.
pub struct Pipeline {
    ctx: CalcContext,
    resolver: AssetResolver,
    classifier: AssetClassifier,
}

impl Pipeline {
    pub fn new(ctx: CalcContext, classifier: AssetClassifier) -> Self {
        Self {
            ctx,
            resolver: AssetResolver::new(),
            classifier,
        }
    }

    pub fn run(
        &mut self,
        inputs: &PipelineInputs,
        rates: &mut RateService,
    ) -> Result<PipelineOutput, EngineError> {
        self.process_soy_positions(&inputs.soy_positions);
        self.process_eoy_positions(&inputs.eoy_positions);
        self.discover_assets(inputs);
        self.resolver.link_derivatives();
        self.finalize_classifications();
        self.backfill_soy_quantities();

        let output = EventFactory::build(
            &mut self.resolver,
            &inputs.trades,
            &inputs.cash,
            &inputs.corporate_actions,
        );
        let mut events = output.events;
        info!("constructed {} events", events.len());

        let option_report = link_option_trades(
            &mut events,
            &self.resolver,
            &output.option_candidates,
            &output.trade_candidates,
        );
        let wht_report = link_withholding(&mut events);
        self.process_dividend_rights(&mut events);

        enrich_events(&mut events, &self.ctx, rates);
        rates.save();

        sort_and_validate(&mut events, &self.resolver)?;

        let result = realize(&events, &self.resolver, &self.ctx);
        info!(
            "realized {} gain/loss records, {} EOY mismatches",
            result.realized.len(),
            result.eoy_mismatches
        );

        Ok(PipelineOutput {
            tax_year: self.ctx.tax_year,
            base_currency: self.ctx.base_currency.clone(),
            realized: result.realized,
            income: result.income,
            final_states: result.final_states,
            eoy_mismatches: result.eoy_mismatches,
            unlinked_withholding: wht_report.unlinked,
            unmatched_option_trades: option_report.unmatched,
        })
    }

    /// Populate start-of-year snapshots. A position with quantity but no
    /// cost basis is coerced to zero basis with a warning, never left
    /// half-populated.
    fn process_soy_positions(&mut self, rows: &[RawPositionRow]) {
        for row in rows {
            let id = self.resolver.get_or_create(&position_idents(row));
            let asset = self.resolver.get_mut(id).expect("just created");
            asset.soy_quantity = Some(row.quantity);
            asset.soy_cost_basis = match row.cost_basis {
                Some(basis) => Some(basis),
                None if !row.quantity.is_zero() => {
                    warn!(
                        "SOY position {} has quantity {} but no cost basis, coercing to zero",
                        asset.label(),
                        row.quantity
                    );
                    Some(Decimal::ZERO)
                }
                None => None,
            };
        }
    }

    fn process_eoy_positions(&mut self, rows: &[RawPositionRow]) {
        for row in rows {
            let id = self.resolver.get_or_create(&position_idents(row));
            let asset = self.resolver.get_mut(id).expect("just created");
            asset.eoy_quantity = Some(row.quantity);
            asset.eoy_price = row.price;
            asset.eoy_value = row.value;
        }
    }

    /// Discover every asset referenced by trades, cash transactions and
    /// corporate actions, applying the preliminary classification.
    fn discover_assets(&mut self, inputs: &PipelineInputs) {
        for row in &inputs.trades {
            let id = self.resolver.get_or_create(&AssetIdentifiers {
                symbol: &row.symbol,
                isin: &row.isin,
                contract_id: &row.contract_id,
                currency: &row.currency,
                description: &row.description,
                raw_category: &row.asset_class,
                raw_subcategory: &row.sub_category,
            });
            self.apply_preliminary(id);
        }

        for row in &inputs.cash {
            // Instrument-specific flows reference the instrument; pure
            // cash-balance movements get the per-currency cash asset.
            let is_instrument_flow = !row.isin.is_empty()
                || !row.contract_id.is_empty()
                || (!row.symbol.is_empty() && !row.symbol.eq_ignore_ascii_case(&row.currency));
            let id = if is_instrument_flow {
                self.resolver.get_or_create(&AssetIdentifiers {
                    symbol: &row.symbol,
                    isin: &row.isin,
                    contract_id: &row.contract_id,
                    currency: &row.currency,
                    description: &row.description,
                    ..Default::default()
                })
            } else {
                self.resolver.get_or_create_cash(&row.currency)
            };
            self.apply_preliminary(id);
        }

        for row in &inputs.corporate_actions {
            let id = self.resolver.get_or_create(&AssetIdentifiers {
                symbol: &row.symbol,
                isin: &row.isin,
                contract_id: &row.contract_id,
                currency: &row.currency,
                description: &row.description,
                raw_category: &row.asset_class,
                ..Default::default()
            });
            self.apply_preliminary(id);
        }

        info!("discovered {} assets", self.resolver.len());
    }

    fn apply_preliminary(&mut self, id: tax_core::AssetId) {
        let Some(asset) = self.resolver.get_mut(id) else {
            return;
        };
        if asset.category != AssetCategory::Unknown || asset.raw_category.is_empty() {
            return;
        }
        let (category, fund_type) = preliminary_classification(
            &asset.raw_category,
            &asset.raw_subcategory,
            &asset.description,
            asset.symbol.as_deref().unwrap_or(""),
            asset.isin.as_deref().unwrap_or(""),
        );
        asset.category = category;
        asset.fund_type = fund_type;
    }

    /// Finalize every discovered asset's classification and normalize
    /// its concrete shape, then flush the decision cache once.
    fn finalize_classifications(&mut self) {
        for id in self.resolver.ids() {
            let (category, fund_type) = {
                let asset = self.resolver.get_mut(id).expect("id from resolver");
                self.classifier.ensure_final_classification(asset);
                (asset.category, asset.fund_type)
            };
            self.resolver.replace_asset_type(id, category, fund_type, "");
        }
        self.classifier.save();
    }

    /// Any non-cash asset still without an SOY quantity starts the year
    /// flat.
    fn backfill_soy_quantities(&mut self) {
        for id in self.resolver.ids() {
            let asset = self.resolver.get_mut(id).expect("id from resolver");
            if !asset.is_cash_balance() && asset.soy_quantity.is_none() {
                asset.soy_quantity = Some(Decimal::ZERO);
            }
        }
    }

    /// Reconcile DI/ED corporate-action pairs.
    ///
    /// For every expire-dividend-rights event: zero the received-share
    /// count of the matching stock-dividend issuance, then re-point the
    /// rights-expiry cash event at the real underlying stock extracted
    /// from the issuance description. Best-effort per event.
    fn process_dividend_rights(&mut self, events: &mut [FinancialEvent]) {
        let ed_ids: Vec<EventId> = events
            .iter()
            .filter(|e| e.kind == EventKind::ExpireDividendRights)
            .map(|e| e.id)
            .collect();

        for ed_id in ed_ids {
            let ed_asset = match events.iter().find(|e| e.id == ed_id) {
                Some(ev) => ev.asset_id,
                None => continue,
            };

            // 1. The stock-dividend issuance on the same instrument.
            let issuance = events.iter().position(|e| {
                e.kind == EventKind::StockDividend
                    && e.asset_id == ed_asset
                    && denotes_rights_issuance(&e.description)
            });
            let Some(issuance_idx) = issuance else {
                warn!("no stock-dividend issuance found for rights expiry {ed_id}");
                continue;
            };

            let issuance_description = events[issuance_idx].description.clone();
            if let Some(action) = events[issuance_idx].corporate_action_mut() {
                // Rights expired unexercised: no shares were ever
                // received from this issuance.
                action.shares_received = Some(Decimal::ZERO);
            }

            // 2. Re-point the expiry cash payment at the underlying
            //    stock named (as a parenthesized ISIN) in the issuance.
            let Some(underlying_isin) = parenthesized_isin(&issuance_description) else {
                warn!("no underlying ISIN in issuance description for {ed_id}");
                continue;
            };
            let Some(underlying_id) = self.resolver.by_isin(&underlying_isin) else {
                warn!("underlying {underlying_isin} from rights issuance is not a known asset");
                continue;
            };

            let cash_event = events.iter_mut().find(|e| {
                matches!(e.kind, EventKind::Dividend | EventKind::Distribution)
                    && e.asset_id == ed_asset
                    && denotes_rights_expiry(&e.description)
            });
            match cash_event {
                Some(ev) => {
                    info!(
                        "re-pointing rights-expiry cash event {} to underlying {underlying_isin}",
                        ev.id
                    );
                    ev.asset_id = underlying_id;
                }
                None => warn!("no rights-expiry cash event found for {ed_id}"),
            }
        }
    }
}

fn position_idents(row: &RawPositionRow) -> AssetIdentifiers<'_> {
    AssetIdentifiers {
        symbol: &row.symbol,
        isin: &row.isin,
        contract_id: &row.contract_id,
        currency: &row.currency,
        description: &row.description,
        raw_category: &row.asset_class,
        raw_subcategory: &row.sub_category,
    }
}

fn denotes_rights_issuance(description: &str) -> bool {
    let upper = description.to_uppercase();
    upper.contains("DIVIDEND RIGHTS") || upper.contains("RIGHTS ISSUE")
}

fn denotes_rights_expiry(description: &str) -> bool {
    description.to_uppercase().contains("EXPIR")
}

fn isin_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([A-Z]{2}[A-Z0-9]{9}[0-9])\)").expect("static regex"))
}

/// Extract a parenthesized ISIN token, e.g. "(US0378331005)".
fn parenthesized_isin(description: &str) -> Option<String> {
    isin_regex()
        .captures(description)
        .map(|caps| caps[1].to_string())
}
