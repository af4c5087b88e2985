//! Order book snapshots read from the CLOB.

pub mod types;

pub use types::{OutcomeBook, PriceLevel};
