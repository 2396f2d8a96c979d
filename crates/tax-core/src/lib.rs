//! Core data model for the brokerage tax pipeline.
//!
//! Assets, the financial-event taxonomy, realized gain/loss records, and
//! the calculation context shared by every monetary operation. Downstream
//! crates (classifier, rate service, engine, CLI) all speak these types.

pub mod asset;
pub mod context;
pub mod error;
pub mod event;
pub mod realized;
pub mod traits;

pub use asset::{Asset, AssetCategory, AssetId, DerivativeTerms, FundType, OptionRight};
pub use context::CalcContext;
pub use error::CoreError;
pub use event::{parse_event_date, EventId, EventKind, EventPayload, FinancialEvent};
pub use realized::{
    AssetFinalState, IncomeSummary, PipelineOutput, RealizationKind, RealizedGainLoss, TaxCategory,
};
pub use traits::ReportSink;
