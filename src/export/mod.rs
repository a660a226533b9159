mod csv;
#[cfg(feature = "store")]
mod store;

pub use self::csv::*;
#[cfg(feature = "store")]
pub use store::*;

use crate::{EnrichedCandle, Interval, Symbol, Venue};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// The completed candles of one (venue, symbol) pair.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub run_id: Uuid,
    pub venue: Venue,
    pub symbol: Symbol,
    pub interval: Interval,
    pub candles: &'a [EnrichedCandle],
}

/// Persists completed pairs. An export either writes the whole batch or
/// nothing.
#[async_trait]
pub trait Export: Send + Sync {
    async fn export(&self, batch: Batch<'_>) -> Result<(), ExportError>;
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not write CSV: {0}")]
    Csv(#[from] ::csv::Error),
    #[cfg(feature = "store")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Export task failed: {0}")]
    Task(String),
}
