//! Typed error handling for the docstore crate
//!
//! Errors fall into the four kinds callers need to tell apart:
//!
//! - [`Error::Validation`]: a bad argument caught before any store call
//! - [`Error::Query`]: an OData/filter translation failure (see [`QueryError`])
//! - [`Error::Store`]: a driver-level failure, propagated unchanged
//! - [`Error::NotFound`]: an operation that cannot proceed without the document
//!
//! Absence of a document from `find_by_id`/`find_one` is a normal outcome and
//! is returned as `Ok(None)`, never as an error; `NotFound` is reserved for
//! operations that have nothing sensible to do without the document (soft
//! deleting by id, reading back a just-committed insert).

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the docstore crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument was rejected before any store round trip.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// A query option set failed translation; never silently clamped.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The requested document does not exist and the operation requires it.
    #[error("{collection}: no document with id {id}")]
    NotFound { collection: String, id: String },

    /// A store-level failure, propagated unchanged from the driver.
    #[error(transparent)]
    Store(#[from] mongodb::error::Error),

    /// An entity could not be encoded into a store document.
    #[error("entity encoding failed: {0}")]
    Encode(String),

    /// A store document could not be decoded into an entity.
    #[error("entity decoding failed: {0}")]
    Decode(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}

/// Errors raised while translating query options into a native query.
///
/// Every variant is a hard rejection: exceeding a ceiling fails the request
/// with a structured error rather than truncating the query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The tokenizer or parser hit something it cannot make sense of.
    #[error("invalid filter: unexpected `{0}`")]
    UnexpectedToken(String),

    /// A string literal was opened but never closed.
    #[error("invalid filter: unterminated string literal")]
    UnterminatedString,

    /// The filter ended mid-expression.
    #[error("invalid filter: unexpected end of input")]
    UnexpectedEnd,

    /// A numeric option (`$top`, `$skip`, or a literal) failed to parse.
    #[error("invalid numeric value `{0}`")]
    InvalidNumber(String),

    /// The combined filter expressions exceed the node-count ceiling.
    #[error("filter expression exceeds the maximum node count of {max}")]
    NodeCountExceeded { max: usize },

    /// `any`/`all` lambdas are nested deeper than allowed.
    #[error("any/all nesting exceeds the maximum depth of {max}")]
    LambdaDepthExceeded { max: usize },

    /// `$top` on a count pass exceeds the counting window ceiling.
    #[error("$top value {got} exceeds the maximum of {max} for count queries")]
    TopExceeded { got: u32, max: u32 },
}
