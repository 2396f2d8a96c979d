//! Event reconstruction, linking and FIFO realization.
//!
//! Turns raw broker records into a deterministically ordered stream of
//! financial events, links related events across record types (option
//! exercises to stock trades, withholding tax to income, dividend-rights
//! expiries to their issues), converts every amount to the base currency,
//! and realizes gains/losses under strict FIFO lot matching.

pub mod enrich;
pub mod error;
pub mod factory;
pub mod fifo;
pub mod option_linker;
pub mod orchestrator;
pub mod resolver;
pub mod sort;
pub mod wht_linker;

#[cfg(test)]
mod tests;

pub use enrich::enrich_events;
pub use error::EngineError;
pub use factory::{EventFactory, FactoryOutput};
pub use fifo::{realize, RealizationResult};
pub use option_linker::{link_option_trades, OptionLinkReport};
pub use orchestrator::{Pipeline, PipelineInputs};
pub use resolver::{AssetIdentifiers, AssetResolver};
pub use sort::{sort_and_validate, sort_key, EventSortKey};
pub use wht_linker::{link_withholding, WhtLinkReport, WhtMatch};
