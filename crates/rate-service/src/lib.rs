//! Currency-rate lookup for the tax pipeline.
//!
//! Rates are foreign-currency units per one base-currency unit, keyed by
//! (date, currency). An HTTP source fetches ECB reference rates; a
//! file-backed cache remembers both successes and explicit failures, and
//! the service walks backward day-by-day over weekends and holidays.

pub mod cache;
pub mod service;
pub mod source;

pub use cache::{CachedRate, RateCache};
pub use service::RateService;
pub use source::{HttpRateSource, RateError, RateSource};
