pub mod coach;
pub mod config;
pub mod data;
pub mod error;
pub mod journal;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod storage;
pub mod table;
pub mod trade;

pub use error::{JournalError, Result, SecurityError, ValidationError};
pub use journal::{ImportSummary, Journal};
