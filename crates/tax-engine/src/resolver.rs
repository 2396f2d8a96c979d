use std::collections::HashMap;

use rust_decimal::Decimal;
use std::str::FromStr;
use tax_core::{Asset, AssetCategory, AssetId, DerivativeTerms, FundType, OptionRight};
use tracing::{debug, warn};

/// Identifier fields observed on a raw record.
///
/// Any subset may be present; the resolver cross-references them so
/// every identifier combination seen for one real-world instrument maps
/// to the same canonical [`Asset`].
#[derive(Debug, Clone, Default)]
pub struct AssetIdentifiers<'a> {
    pub symbol: &'a str,
    pub isin: &'a str,
    pub contract_id: &'a str,
    pub currency: &'a str,
    pub description: &'a str,
    pub raw_category: &'a str,
    pub raw_subcategory: &'a str,
}

/// Owns the canonical asset records for one run.
///
/// Arena plus identifier indexes; ids are positions, stable for the run.
pub struct AssetResolver {
    assets: Vec<Asset>,
    by_isin: HashMap<String, AssetId>,
    by_contract: HashMap<String, AssetId>,
    by_symbol: HashMap<String, AssetId>,
}

impl AssetResolver {
    pub fn new() -> Self {
        Self {
            assets: Vec::new(),
            by_isin: HashMap::new(),
            by_contract: HashMap::new(),
            by_symbol: HashMap::new(),
        }
    }

    /// Look up an asset by any identifier, creating it on first
    /// reference. Newly observed identifiers are backfilled onto the
    /// existing record.
    pub fn get_or_create(&mut self, ident: &AssetIdentifiers) -> AssetId {
        let found = self
            .lookup_contract(ident.contract_id)
            .or_else(|| self.lookup_isin(ident.isin))
            .or_else(|| self.lookup_symbol(ident.symbol));

        let id = match found {
            Some(id) => id,
            None => {
                let id = AssetId(self.assets.len() as u32);
                let mut asset = Asset::new(id, ident.currency);
                asset.raw_category = ident.raw_category.to_string();
                asset.raw_subcategory = ident.raw_subcategory.to_string();
                self.assets.push(asset);
                id
            }
        };

        self.backfill(id, ident);
        id
    }

    /// The per-currency cash-balance asset, synthesized on first use.
    pub fn get_or_create_cash(&mut self, currency: &str) -> AssetId {
        let symbol = currency.to_uppercase();
        if let Some(id) = self.by_symbol.get(&symbol) {
            return *id;
        }
        let id = AssetId(self.assets.len() as u32);
        let mut asset = Asset::new(id, &symbol);
        asset.symbol = Some(symbol.clone());
        asset.raw_category = "CASH".to_string();
        asset.description = format!("{symbol} cash balance");
        asset.category = AssetCategory::CashBalance;
        self.assets.push(asset);
        self.by_symbol.insert(symbol, id);
        id
    }

    pub fn get(&self, id: AssetId) -> Option<&Asset> {
        self.assets.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: AssetId) -> Option<&mut Asset> {
        self.assets.get_mut(id.0 as usize)
    }

    pub fn by_isin(&self, isin: &str) -> Option<AssetId> {
        self.by_isin.get(isin).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }

    pub fn ids(&self) -> Vec<AssetId> {
        self.assets.iter().map(|a| a.id).collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Replace an asset's resolved type. The classification pass calls
    /// this when the final category implies a different concrete shape
    /// than the record currently holds (derivative terms appear or
    /// disappear with the option category).
    pub fn replace_asset_type(
        &mut self,
        id: AssetId,
        category: AssetCategory,
        fund_type: FundType,
        notes: &str,
    ) -> Option<&Asset> {
        let asset = self.assets.get_mut(id.0 as usize)?;
        asset.category = category;
        asset.fund_type = fund_type;
        if !notes.is_empty() {
            asset.push_note(notes);
        }
        match category {
            AssetCategory::StockOption => {
                if asset.derivative.is_none() {
                    asset.derivative = Some(DerivativeTerms::default());
                }
            }
            _ => {
                if asset.derivative.is_some() {
                    debug!("dropping derivative terms from re-typed asset {}", asset.label());
                    asset.derivative = None;
                }
            }
        }
        Some(&self.assets[id.0 as usize])
    }

    /// Resolve option → underlying references after discovery.
    ///
    /// Option symbols follow `"<UNDERLYING> <EXPIRY> <STRIKE> <P|C>"`;
    /// an underlying never traded directly gets a placeholder asset so
    /// the linkage is always resolvable.
    pub fn link_derivatives(&mut self) {
        let option_ids: Vec<AssetId> = self
            .assets
            .iter()
            .filter(|a| {
                a.raw_category.eq_ignore_ascii_case("OPT")
                    || a.category == AssetCategory::StockOption
            })
            .map(|a| a.id)
            .collect();

        for id in option_ids {
            let (symbol, currency) = {
                let asset = &self.assets[id.0 as usize];
                (
                    asset.symbol.clone().unwrap_or_default(),
                    asset.currency.clone(),
                )
            };
            let Some(parsed) = parse_option_symbol(&symbol) else {
                warn!("cannot parse option symbol {symbol:?}, leaving unlinked");
                continue;
            };

            let underlying_id = match self.by_symbol.get(&parsed.underlying) {
                Some(existing) => *existing,
                None => {
                    let placeholder = AssetId(self.assets.len() as u32);
                    let mut asset = Asset::new(placeholder, &currency);
                    asset.symbol = Some(parsed.underlying.clone());
                    asset.raw_category = "STK".to_string();
                    asset.description = format!("{} (underlying)", parsed.underlying);
                    asset.category = AssetCategory::Stock;
                    self.assets.push(asset);
                    self.by_symbol.insert(parsed.underlying.clone(), placeholder);
                    placeholder
                }
            };

            let asset = &mut self.assets[id.0 as usize];
            let terms = asset.derivative.get_or_insert_with(DerivativeTerms::default);
            terms.underlying = Some(underlying_id);
            terms.underlying_symbol = Some(parsed.underlying);
            terms.strike = Some(parsed.strike);
            terms.expiry = Some(parsed.expiry);
            terms.right = Some(parsed.right);
        }
    }

    fn lookup_contract(&self, contract_id: &str) -> Option<AssetId> {
        if contract_id.is_empty() {
            return None;
        }
        self.by_contract.get(contract_id).copied()
    }

    fn lookup_isin(&self, isin: &str) -> Option<AssetId> {
        if isin.is_empty() {
            return None;
        }
        self.by_isin.get(isin).copied()
    }

    fn lookup_symbol(&self, symbol: &str) -> Option<AssetId> {
        if symbol.is_empty() {
            return None;
        }
        self.by_symbol.get(symbol).copied()
    }

    fn backfill(&mut self, id: AssetId, ident: &AssetIdentifiers) {
        let asset = &mut self.assets[id.0 as usize];

        if asset.symbol.is_none() && !ident.symbol.is_empty() {
            asset.symbol = Some(ident.symbol.to_string());
        }
        if asset.isin.is_none() && !ident.isin.is_empty() {
            asset.isin = Some(ident.isin.to_string());
        }
        if asset.contract_id.is_none() && !ident.contract_id.is_empty() {
            asset.contract_id = Some(ident.contract_id.to_string());
        }
        if asset.description.is_empty() && !ident.description.is_empty() {
            asset.description = ident.description.to_string();
        }
        if asset.raw_category.is_empty() && !ident.raw_category.is_empty() {
            asset.raw_category = ident.raw_category.to_string();
        }
        if asset.raw_subcategory.is_empty() && !ident.raw_subcategory.is_empty() {
            asset.raw_subcategory = ident.raw_subcategory.to_string();
        }

        if !ident.symbol.is_empty() {
            self.by_symbol.insert(ident.symbol.to_string(), id);
        }
        if !ident.isin.is_empty() {
            self.by_isin.insert(ident.isin.to_string(), id);
        }
        if !ident.contract_id.is_empty() {
            self.by_contract.insert(ident.contract_id.to_string(), id);
        }
    }
}

impl Default for AssetResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ParsedOptionSymbol {
    underlying: String,
    expiry: String,
    strike: Decimal,
    right: OptionRight,
}

/// Parse `"AAPL 16JUN23 150 C"`-style option symbols.
fn parse_option_symbol(symbol: &str) -> Option<ParsedOptionSymbol> {
    let parts: Vec<&str> = symbol.split_whitespace().collect();
    if parts.len() != 4 {
        return None;
    }
    let right = match parts[3] {
        "C" => OptionRight::Call,
        "P" => OptionRight::Put,
        _ => return None,
    };
    let strike = Decimal::from_str(parts[2]).ok()?;
    Some(ParsedOptionSymbol {
        underlying: parts[0].to_string(),
        expiry: parts[1].to_string(),
        strike,
        right,
    })
}
