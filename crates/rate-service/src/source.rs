use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RateError {
    #[error("Rate API error: {0}")]
    Api(String),

    #[error("Cache I/O error: {0}")]
    CacheIo(String),
}

/// A provider of daily reference exchange rates.
///
/// `Ok(None)` means the source has no rate for that exact date (weekend,
/// holiday); the caller decides whether to walk to an earlier day.
pub trait RateSource {
    fn rate(&self, date: NaiveDate, currency: &str) -> Result<Option<Decimal>, RateError>;
}

const BASE_URL: &str = "https://api.frankfurter.app";

/// ECB reference rates via the Frankfurter API.
pub struct HttpRateSource {
    client: reqwest::blocking::Client,
    base_currency: String,
}

#[derive(Debug, Deserialize)]
struct FrankfurterResponse {
    rates: HashMap<String, Decimal>,
}

impl HttpRateSource {
    pub fn new(base_currency: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());

        Self {
            client,
            base_currency: base_currency.to_uppercase(),
        }
    }
}

impl RateSource for HttpRateSource {
    fn rate(&self, date: NaiveDate, currency: &str) -> Result<Option<Decimal>, RateError> {
        let currency = currency.to_uppercase();
        let url = format!(
            "{BASE_URL}/{date}?from={}&to={}",
            self.base_currency, currency
        );
        debug!("fetching rate: {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RateError::Api(e.to_string()))?;

        // The API answers 404 for unknown currencies and for dates before
        // its history starts; both mean "no rate here".
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RateError::Api(format!(
                "HTTP {} for {date} {currency}",
                response.status()
            )));
        }

        let body: FrankfurterResponse = response
            .json()
            .map_err(|e| RateError::Api(e.to_string()))?;

        Ok(body.rates.get(&currency).copied())
    }
}
