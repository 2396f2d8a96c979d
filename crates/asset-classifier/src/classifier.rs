use tax_core::{Asset, AssetCategory, FundType};
use tracing::{debug, warn};

use crate::heuristics::{
    has_commodity_etc_phrase, has_fund_vocab, is_known_crypto_etc, is_known_gold_etc,
    looks_like_fx_pair,
};
use crate::oracle::{ClassificationOracle, PendingAsset};
use crate::store::ClassificationStore;

/// Finalizes asset classifications.
///
/// Resolution order per asset: cached decision (re-validated against the
/// FX-pair pattern), auto-resolution for still-unknown assets, then
/// either the interactive oracle (potentially-special assets only) or
/// acceptance of the preliminary category. Every decision is written
/// back to the persistent store; the orchestrator flushes it once per
/// classification pass.
pub struct AssetClassifier {
    store: ClassificationStore,
    oracle: Option<Box<dyn ClassificationOracle>>,
}

impl AssetClassifier {
    pub fn new(store: ClassificationStore) -> Self {
        Self {
            store,
            oracle: None,
        }
    }

    pub fn with_oracle(store: ClassificationStore, oracle: Box<dyn ClassificationOracle>) -> Self {
        Self {
            store,
            oracle: Some(oracle),
        }
    }

    /// Resolve and persist the final classification for one asset.
    pub fn ensure_final_classification(&mut self, asset: &mut Asset) {
        let key = asset.classification_key();
        let symbol = asset.symbol.clone().unwrap_or_default();

        // 1. Cached decision wins, re-validated against the identifier
        //    pattern: a cache claiming "cash balance" for an FX-pair
        //    symbol is stale and forced back to unknown.
        if let Some(entry) = self.store.get(&key) {
            if entry.category == AssetCategory::CashBalance && looks_like_fx_pair(&symbol) {
                warn!(
                    "cached cash-balance classification for FX pair {symbol}, overriding to unknown"
                );
                asset.category = AssetCategory::Unknown;
                asset.fund_type = FundType::None;
                asset.push_note("FX pair cannot be a cash balance; cache entry overridden");
                self.store.insert(
                    &key,
                    AssetCategory::Unknown,
                    FundType::None,
                    "FX pair cannot be a cash balance; cache entry overridden",
                );
                return;
            }
            debug!("classification cache hit for {key}: {}", entry.category);
            asset.category = entry.category;
            asset.fund_type = entry.fund_type;
            if !entry.notes.is_empty() {
                asset.push_note(entry.notes);
            }
            return;
        }

        // 2. Still unknown: auto-resolve without prompting.
        if asset.category == AssetCategory::Unknown {
            let (category, note) = if looks_like_fx_pair(&symbol) {
                (
                    AssetCategory::Unknown,
                    "FX trading instrument, excluded from cash balances",
                )
            } else if !symbol.is_empty() && symbol.eq_ignore_ascii_case(&asset.currency) {
                (AssetCategory::CashBalance, "")
            } else {
                (
                    AssetCategory::Stock,
                    "no classification rule matched; defaulted to stock",
                )
            };
            asset.category = category;
            asset.fund_type = FundType::None;
            if !note.is_empty() {
                asset.push_note(note);
            }
            self.store.insert(&key, category, FundType::None, note);
            return;
        }

        // 3. Decided and not special: accept the preliminary category.
        if !Self::is_potentially_special(asset) {
            self.accept_preliminary(asset, &key);
            return;
        }

        // 4. Special: ask the oracle when one is wired in. FX-pair-shaped
        //    assets never prompt.
        if !looks_like_fx_pair(&symbol) {
            if let Some(oracle) = self.oracle.as_mut() {
                let pending = PendingAsset {
                    key: key.clone(),
                    symbol: symbol.clone(),
                    description: asset.description.clone(),
                    preliminary_category: asset.category,
                    preliminary_fund_type: asset.fund_type,
                };
                if let Some(mut decision) = oracle.decide(&pending) {
                    if decision.category == AssetCategory::CashBalance
                        && looks_like_fx_pair(&symbol)
                    {
                        warn!("blocking cash-balance choice for FX-pair-shaped {symbol}");
                        decision.category = AssetCategory::Unknown;
                        decision.fund_type = FundType::None;
                        decision.note =
                            Some("FX pair cannot be a cash balance; forced to unknown".to_string());
                    }
                    asset.category = decision.category;
                    asset.fund_type = decision.fund_type;
                    if let Some(note) = &decision.note {
                        asset.push_note(note.clone());
                    }
                    self.store.insert(
                        &key,
                        decision.category,
                        decision.fund_type,
                        decision.note.as_deref().unwrap_or(""),
                    );
                    return;
                }
            }
        }

        // No oracle (batch mode) or no decision: keep the preliminary.
        self.accept_preliminary(asset, &key);
    }

    fn accept_preliminary(&mut self, asset: &mut Asset, key: &str) {
        if asset.category == AssetCategory::InvestmentFund && asset.fund_type == FundType::None {
            asset.fund_type = FundType::OtherFund;
        }
        self.store
            .insert(key, asset.category, asset.fund_type, "");
    }

    /// Assets needing human review when interactive mode is enabled.
    ///
    /// Options, CFDs, bonds and already-typed plain stocks and cash
    /// balances are never flagged.
    fn is_potentially_special(asset: &Asset) -> bool {
        let symbol = asset.symbol.as_deref().unwrap_or("");
        let isin = asset.isin.as_deref().unwrap_or("");

        match asset.category {
            AssetCategory::StockOption | AssetCategory::Cfd | AssetCategory::Bond => return false,
            _ => {}
        }

        if asset.category == AssetCategory::InvestmentFund
            || has_fund_vocab(&asset.raw_subcategory)
        {
            return true;
        }
        if is_known_gold_etc(isin, symbol) || is_known_crypto_etc(isin, symbol) {
            return true;
        }
        if has_commodity_etc_phrase(&asset.description) {
            return true;
        }
        if asset.category == AssetCategory::CashBalance && looks_like_fx_pair(symbol) {
            return true;
        }
        if asset.category == AssetCategory::Stock && has_fund_vocab(&asset.description) {
            return true;
        }
        if asset.category == AssetCategory::PrivateSale {
            return true;
        }
        false
    }

    /// Flush the decision store. Called once per classification pass.
    pub fn save(&mut self) {
        self.store.save();
    }
}
