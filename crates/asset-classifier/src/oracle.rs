use std::io::Write;

use tax_core::{AssetCategory, FundType};
use tracing::warn;

/// Everything an oracle sees about an asset awaiting review.
#[derive(Debug, Clone)]
pub struct PendingAsset {
    pub key: String,
    pub symbol: String,
    pub description: String,
    pub preliminary_category: AssetCategory,
    pub preliminary_fund_type: FundType,
}

/// An oracle's classification choice plus an optional free-text note
/// that is persisted to the cache alongside it.
#[derive(Debug, Clone)]
pub struct ClassificationDecision {
    pub category: AssetCategory,
    pub fund_type: FundType,
    pub note: Option<String>,
}

/// Synchronous classification decision source.
///
/// The console implementation asks a human; scripted implementations
/// keep tests and batch runs headless. `None` means "no decision",
/// falling back to the preliminary classification.
pub trait ClassificationOracle {
    fn decide(&mut self, pending: &PendingAsset) -> Option<ClassificationDecision>;
}

/// Fixed menu of category + fund-type combinations offered to the user.
const MENU: &[(&str, AssetCategory, FundType)] = &[
    ("Stock", AssetCategory::Stock, FundType::None),
    ("Equity fund", AssetCategory::InvestmentFund, FundType::EquityFund),
    ("Mixed fund", AssetCategory::InvestmentFund, FundType::MixedFund),
    (
        "Real estate fund",
        AssetCategory::InvestmentFund,
        FundType::RealEstateFund,
    ),
    ("Other fund", AssetCategory::InvestmentFund, FundType::OtherFund),
    (
        "Private sale asset (physical gold / crypto ETC)",
        AssetCategory::PrivateSale,
        FundType::None,
    ),
    ("Bond", AssetCategory::Bond, FundType::None),
    ("Cash balance", AssetCategory::CashBalance, FundType::None),
    ("Unknown", AssetCategory::Unknown, FundType::None),
];

/// Interactive console prompt.
pub struct ConsoleOracle;

impl ConsoleOracle {
    fn default_choice(pending: &PendingAsset) -> usize {
        MENU.iter()
            .position(|(_, cat, ft)| {
                *cat == pending.preliminary_category
                    && (*cat != AssetCategory::InvestmentFund
                        || *ft == pending.preliminary_fund_type)
            })
            .unwrap_or(MENU.len() - 1)
    }

    fn read_line() -> Option<String> {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(e) => {
                warn!("stdin read failed: {e}");
                None
            }
        }
    }
}

impl ClassificationOracle for ConsoleOracle {
    fn decide(&mut self, pending: &PendingAsset) -> Option<ClassificationDecision> {
        let default = Self::default_choice(pending);

        println!();
        println!(
            "Review classification for {} ({})",
            pending.symbol, pending.key
        );
        if !pending.description.is_empty() {
            println!("  {}", pending.description);
        }
        for (i, (label, _, _)) in MENU.iter().enumerate() {
            let marker = if i == default { "*" } else { " " };
            println!("  {marker} [{}] {label}", i + 1);
        }
        print!("Choice [{}]: ", default + 1);
        std::io::stdout().flush().ok();

        let choice = match Self::read_line() {
            Some(line) if line.is_empty() => default,
            Some(line) => match line.parse::<usize>() {
                Ok(n) if (1..=MENU.len()).contains(&n) => n - 1,
                _ => {
                    warn!("invalid choice {line:?}, keeping default");
                    default
                }
            },
            None => return None,
        };

        print!("Note (optional): ");
        std::io::stdout().flush().ok();
        let note = Self::read_line().filter(|n| !n.is_empty());

        let (_, category, fund_type) = MENU[choice];
        Some(ClassificationDecision {
            category,
            fund_type,
            note,
        })
    }
}
