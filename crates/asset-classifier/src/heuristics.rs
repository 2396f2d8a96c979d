use std::sync::OnceLock;

use regex::Regex;
use tax_core::{AssetCategory, FundType};

/// Fund/ETF vocabulary checked against symbols, descriptions and raw
/// sub-category strings.
const FUND_VOCAB: &[&str] = &[
    "ETF", "FUND", "FONDS", "UCITS", "SICAV", "INDEX", "ISHARES", "VANGUARD", "XTRACKERS",
    "LYXOR", "AMUNDI", "WISDOMTREE", "INVESCO",
];

/// Known physical-gold ETC instruments.
const GOLD_ETC_ISINS: &[&str] = &["DE000A0S9GB0", "DE000EWG2LD7", "CH0047533549"];
const GOLD_ETC_SYMBOLS: &[&str] = &["4GLD", "EWG2", "ZGLD"];

/// Known crypto ETC instruments.
const CRYPTO_ETC_ISINS: &[&str] = &["DE000A27Z304", "DE000A28M8D0", "SE0007126024"];
const CRYPTO_ETC_SYMBOLS: &[&str] = &["BTCE", "VBTC", "COINXBT"];

const COMMODITY_WORDS: &[&str] = &[
    "GOLD", "SILVER", "PLATINUM", "PALLADIUM", "COMMODITY", "PHYSICAL", "BITCOIN", "ETHEREUM",
    "CRYPTO",
];

fn fx_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{3}\.[A-Z]{3}$").expect("static regex"))
}

/// A `EUR.USD`-shaped symbol: an FX trading instrument, not a cash
/// balance, even when the broker files it under a cash asset class.
pub fn looks_like_fx_pair(symbol: &str) -> bool {
    fx_pair_regex().is_match(symbol.trim())
}

fn contains_any(haystack: &str, words: &[&str]) -> bool {
    let upper = haystack.to_uppercase();
    words.iter().any(|w| upper.contains(w))
}

/// Fund/ETF language anywhere in the given text.
pub fn has_fund_vocab(text: &str) -> bool {
    contains_any(text, FUND_VOCAB)
}

pub fn is_known_gold_etc(isin: &str, symbol: &str) -> bool {
    GOLD_ETC_ISINS.contains(&isin) || GOLD_ETC_SYMBOLS.contains(&symbol.to_uppercase().as_str())
}

pub fn is_known_crypto_etc(isin: &str, symbol: &str) -> bool {
    CRYPTO_ETC_ISINS.contains(&isin) || CRYPTO_ETC_SYMBOLS.contains(&symbol.to_uppercase().as_str())
}

/// Generic commodity-ETC phrasing: "ETC" next to a commodity word.
pub fn has_commodity_etc_phrase(description: &str) -> bool {
    let upper = description.to_uppercase();
    upper.contains("ETC") && contains_any(&upper, COMMODITY_WORDS)
}

/// Guess the partial-exemption fund bucket from the description.
pub fn fund_subtype_hint(description: &str) -> FundType {
    let upper = description.to_uppercase();
    if contains_any(&upper, &["REIT", "REAL ESTATE", "PROPERTY", "IMMOBILIEN"]) {
        FundType::RealEstateFund
    } else if contains_any(&upper, &["BALANCED", "MIXED", "ALLOCATION", "MULTI-ASSET"]) {
        FundType::MixedFund
    } else if contains_any(&upper, &["EQUITY", "MSCI", "S&P", "STOXX", "FTSE", "AKTIEN"]) {
        FundType::EquityFund
    } else {
        FundType::OtherFund
    }
}

/// Map raw instrument metadata to a preliminary category and fund
/// sub-type.
///
/// Cash-class rows are disambiguated: an FX-pair-shaped symbol is a
/// trading instrument, preliminarily `Unknown` pending review, while a
/// symbol matching a plain currency code is the account's cash balance.
pub fn preliminary_classification(
    raw_category: &str,
    sub_category: &str,
    description: &str,
    symbol: &str,
    isin: &str,
) -> (AssetCategory, FundType) {
    if is_known_gold_etc(isin, symbol) || is_known_crypto_etc(isin, symbol) {
        return (AssetCategory::PrivateSale, FundType::None);
    }

    match raw_category.to_uppercase().as_str() {
        "OPT" | "FOP" => (AssetCategory::StockOption, FundType::None),
        "CFD" => (AssetCategory::Cfd, FundType::None),
        "BOND" | "BILL" => (AssetCategory::Bond, FundType::None),
        "FUND" => (
            AssetCategory::InvestmentFund,
            fund_subtype_hint(description),
        ),
        "CASH" => {
            if looks_like_fx_pair(symbol) {
                (AssetCategory::Unknown, FundType::None)
            } else {
                (AssetCategory::CashBalance, FundType::None)
            }
        }
        "STK" => {
            if has_fund_vocab(sub_category)
                || sub_category.to_uppercase().contains("ETF")
                || has_fund_vocab(description)
            {
                (
                    AssetCategory::InvestmentFund,
                    fund_subtype_hint(description),
                )
            } else {
                (AssetCategory::Stock, FundType::None)
            }
        }
        _ => (AssetCategory::Unknown, FundType::None),
    }
}
