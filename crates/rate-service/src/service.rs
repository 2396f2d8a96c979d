use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::cache::{CachedRate, RateCache};
use crate::source::RateSource;

/// Default number of earlier days to try when a date has no rate.
pub const DEFAULT_FALLBACK_DAYS: u32 = 7;

/// Cached, fallback-walking rate lookup.
///
/// For a requested (date, currency) the service consults the cache, then
/// the source, walking backward one day at a time up to `fallback_days`
/// (weekends, holidays). Successes and per-day failures are both cached;
/// the caller flushes the cache at phase boundaries via [`save`].
///
/// [`save`]: RateService::save
pub struct RateService {
    source: Box<dyn RateSource>,
    cache: RateCache,
    base_currency: String,
    fallback_days: u32,
}

impl RateService {
    pub fn new(source: Box<dyn RateSource>, cache: RateCache, base_currency: &str) -> Self {
        Self {
            source,
            cache,
            base_currency: base_currency.to_uppercase(),
            fallback_days: DEFAULT_FALLBACK_DAYS,
        }
    }

    pub fn with_fallback_days(mut self, days: u32) -> Self {
        self.fallback_days = days;
        self
    }

    /// Rate for (date, currency), expressed as foreign-currency units per
    /// one base-currency unit. `None` when no rate exists within the
    /// fallback window.
    pub fn get_rate(&mut self, date: NaiveDate, currency: &str) -> Option<Decimal> {
        let currency = currency.to_uppercase();
        if currency == self.base_currency {
            return Some(Decimal::ONE);
        }

        for offset in 0..=self.fallback_days {
            let day = date - Duration::days(offset as i64);

            match self.cache.get(day, &currency) {
                Some(CachedRate::Rate(rate)) => {
                    if offset > 0 {
                        // Remember the resolved value under the requested
                        // date so later runs skip the walk entirely.
                        self.cache.insert_rate(date, &currency, rate);
                    }
                    return Some(rate);
                }
                Some(CachedRate::Failure) => continue,
                None => {}
            }

            match self.source.rate(day, &currency) {
                Ok(Some(rate)) => {
                    self.cache.insert_rate(day, &currency, rate);
                    if offset > 0 {
                        self.cache.insert_rate(date, &currency, rate);
                    }
                    return Some(rate);
                }
                Ok(None) => {
                    debug!("no {currency} rate for {day}, walking back");
                    self.cache.insert_failure(day, &currency);
                }
                Err(e) => {
                    // Transient (network) failure: give up on this lookup
                    // without poisoning the cache.
                    warn!("rate lookup {date} {currency} failed: {e}");
                    return None;
                }
            }
        }

        warn!(
            "no {currency} rate within {} days before {date}",
            self.fallback_days
        );
        None
    }

    /// Flush the cache to disk. Called once per pipeline phase.
    pub fn save(&mut self) {
        self.cache.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RateError, RateSource};
    use rust_decimal_macros::dec;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Scripted source: fixed (date, currency) → rate map plus a shared
    /// call counter, so tests can assert on fetch behavior.
    struct MapSource {
        rates: HashMap<(NaiveDate, String), Decimal>,
        calls: Rc<Cell<u32>>,
    }

    impl MapSource {
        fn new(rates: Vec<(&str, &str, Decimal)>) -> Self {
            let rates = rates
                .into_iter()
                .map(|(d, c, r)| ((date(d), c.to_string()), r))
                .collect();
            Self {
                rates,
                calls: Rc::new(Cell::new(0)),
            }
        }
    }

    impl RateSource for MapSource {
        fn rate(&self, day: NaiveDate, currency: &str) -> Result<Option<Decimal>, RateError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.rates.get(&(day, currency.to_string())).copied())
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_base_currency_is_one() {
        let source = MapSource::new(vec![]);
        let mut service = RateService::new(Box::new(source), RateCache::in_memory(), "EUR");
        assert_eq!(service.get_rate(date("2023-06-01"), "eur"), Some(Decimal::ONE));
    }

    #[test]
    fn test_walks_back_over_weekend() {
        // 2023-06-04 is a Sunday; only Friday the 2nd has a rate.
        let source = MapSource::new(vec![("2023-06-02", "USD", dec!(1.07))]);
        let mut service = RateService::new(Box::new(source), RateCache::in_memory(), "EUR");
        assert_eq!(service.get_rate(date("2023-06-04"), "USD"), Some(dec!(1.07)));
    }

    #[test]
    fn test_fallback_window_is_bounded() {
        let source = MapSource::new(vec![("2023-05-01", "USD", dec!(1.10))]);
        let mut service = RateService::new(Box::new(source), RateCache::in_memory(), "EUR")
            .with_fallback_days(3);
        // The only rate is far outside the 3-day window.
        assert_eq!(service.get_rate(date("2023-06-01"), "USD"), None);
    }

    #[test]
    fn test_cached_failures_are_not_refetched() {
        let source = MapSource::new(vec![("2023-06-02", "USD", dec!(1.07))]);
        let calls = Rc::clone(&source.calls);
        let mut service = RateService::new(Box::new(source), RateCache::in_memory(), "EUR");

        assert_eq!(service.get_rate(date("2023-06-04"), "USD"), Some(dec!(1.07)));
        let after_first = calls.get();

        // Second lookup resolves fully from cache.
        assert_eq!(service.get_rate(date("2023-06-04"), "USD"), Some(dec!(1.07)));
        assert_eq!(calls.get(), after_first);
    }
}
