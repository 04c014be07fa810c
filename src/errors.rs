use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Failures surfaced by storage bootstrap and outbound geocoding. Venue-level
/// lookups never propagate these past the resolvers; they only get logged.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid storage location: {0}")]
    Path(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error("geo cache serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("geocoder answered {status} for \"{query}\"")]
    GeocoderStatus { status: u16, query: String },
    #[error("geocoder request timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Config(String),
}
