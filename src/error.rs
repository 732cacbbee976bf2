//! One `thiserror` error enum plus a crate-wide `Result` alias.
//!
//! `anyhow` is reserved for the CLI boundary; everything inside the library
//! surfaces this typed `Error`. The `#[from]` conversions let `?` propagate
//! the foreign errors the pipeline touches (sqlx, io, reqwest, serde_json,
//! toml, zip, image).

use thiserror::Error;

/// Crate-wide result alias over [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible operation in the library surfaces one of these.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// No configuration has been written yet; `init` must run first.
    #[error("not initialized; run `eidolon init` first")]
    NotInitialized,

    /// No datastore exists for the given identity id.
    #[error("datastore not found for identity {0}")]
    DatastoreNotFound(i64),

    /// The requested identity id is absent from the registry.
    #[error("identity {0} not found")]
    IdentityNotFound(i64),

    /// Archive intake or extraction failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// A model HTTP backend was unreachable or returned an error.
    #[error("model backend error: {0}")]
    ModelBackend(String),

    /// Structured-extraction (analyzer) response could not be parsed.
    #[error("analyzer error: {0}")]
    Analyzer(String),

    /// Embedding generation failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// A vector-store (qdrant) operation failed.
    #[error("qdrant error: {0}")]
    Qdrant(String),

    /// Anything that doesn't fit a more specific variant.
    #[error("{0}")]
    Other(String),

    /// SQLite / sqlx error.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Filesystem / IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Zip archive error.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// Image decoding / metadata error.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Qdrant client errors flatten into the string-bearing [`Error::Qdrant`]
/// variant so `?` propagation and the manual `map_err` sites share one shape.
impl From<qdrant_client::QdrantError> for Error {
    fn from(e: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(e.to_string())
    }
}
