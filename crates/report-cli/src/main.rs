//! tax-report: Compute a capital-gains tax report from broker exports.
//!
//! Reads the year's activity CSVs from an input directory, reconstructs
//! and links the event stream, converts everything to the base currency,
//! realizes gains/losses under FIFO and prints the report.
//!
//! Usage:
//!   cargo run -p report-cli -- --dir exports/2023 --year 2023
//!   cargo run -p report-cli -- --dir exports/2023 --year 2023 --interactive
//!   cargo run -p report-cli -- --dir exports/2023 --year 2023 --offline

mod sink;

use std::path::PathBuf;

use anyhow::Context;
use asset_classifier::{AssetClassifier, ClassificationStore, ConsoleOracle};
use chrono::NaiveDate;
use rate_service::{HttpRateSource, RateCache, RateError, RateService, RateSource};
use rust_decimal::Decimal;
use tax_core::{CalcContext, ReportSink};
use tax_engine::{Pipeline, PipelineInputs};

use crate::sink::ConsoleSink;

/// Rate source for offline runs: every lookup misses, cached failures
/// and the cache's prior contents still apply.
struct OfflineSource;

impl RateSource for OfflineSource {
    fn rate(&self, _date: NaiveDate, _currency: &str) -> Result<Option<Decimal>, RateError> {
        Ok(None)
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tax_engine=info,asset_classifier=info,rate_service=warn".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let interactive = args.iter().any(|a| a == "--interactive");
    let offline = args.iter().any(|a| a == "--offline");

    let arg_value = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };

    let input_dir = PathBuf::from(
        arg_value("--dir")
            .or_else(|| std::env::var("TAX_INPUT_DIR").ok())
            .context("input directory required (--dir or TAX_INPUT_DIR)")?,
    );

    let tax_year: i32 = arg_value("--year")
        .or_else(|| std::env::var("TAX_YEAR").ok())
        .context("tax year required (--year or TAX_YEAR)")?
        .parse()
        .context("tax year must be an integer")?;

    let base_currency = arg_value("--currency")
        .or_else(|| std::env::var("TAX_BASE_CURRENCY").ok())
        .unwrap_or_else(|| "EUR".to_string());

    let cache_dir = arg_value("--cache-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tax-report")
        });
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("cannot create cache directory {}", cache_dir.display()))?;

    tracing::info!(
        "tax year {tax_year}, base currency {base_currency}, input {}",
        input_dir.display()
    );

    let ctx = CalcContext::new(base_currency.clone(), tax_year);

    let store = ClassificationStore::load(cache_dir.join("classifications.json"));
    let classifier = if interactive {
        AssetClassifier::with_oracle(store, Box::new(ConsoleOracle))
    } else {
        AssetClassifier::new(store)
    };

    let source: Box<dyn RateSource> = if offline {
        Box::new(OfflineSource)
    } else {
        Box::new(HttpRateSource::new(&base_currency))
    };
    let mut rates = RateService::new(
        source,
        RateCache::load(cache_dir.join("rates.json")),
        &base_currency,
    );

    let inputs = PipelineInputs::load(&input_dir)
        .with_context(|| format!("loading broker exports from {}", input_dir.display()))?;

    let mut pipeline = Pipeline::new(ctx, classifier);
    let output = pipeline
        .run(&inputs, &mut rates)
        .context("pipeline failed")?;

    let mut sink = ConsoleSink;
    sink.emit(&output).context("rendering report")?;

    if output.eoy_mismatches > 0 {
        anyhow::bail!(
            "{} asset(s) failed end-of-year reconciliation; review the report",
            output.eoy_mismatches
        );
    }
    Ok(())
}
