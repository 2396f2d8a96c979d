//! Raw record reader for broker activity exports.
//!
//! A thin validation/mapping layer: CSV files in, typed rows out.
//! Malformed rows are skipped with a diagnostic, never fatal; a missing
//! or unreadable file is an error.

pub mod reader;
pub mod records;

pub use reader::{read_cash, read_corporate_actions, read_positions, read_trades, ImportError};
pub use records::{RawCashRow, RawCorporateActionRow, RawPositionRow, RawTradeRow};
