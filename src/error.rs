use crate::{apis::ApiError, export::ExportError, Venue};
use thiserror::Error;

pub type AnyError = Box<dyn std::error::Error>;

/// Reasons a single (venue, symbol) pair can fail.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No perpetual swap for {coin} on {venue}.")]
    SymbolNotFound { venue: Venue, coin: String },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Cancelled.")]
    Cancelled,
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl Error {
    /// A rate limit response from the venue.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Api(ApiError::RateLimited(_)))
    }
}
