use thiserror::Error;

/// Boxed error coming out of a [`crate::RecordSource`].
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum LocatorError {
    /// The head or the first record could not be fetched.
    #[error("boundary records unavailable: {0}")]
    BoundaryUnavailable(#[source] SourceError),
    #[error("failed to fetch record {number}: {source}")]
    FetchFailed {
        number: u64,
        #[source]
        source: SourceError,
    },
    /// The probe ceiling was reached before the search converged.
    #[error("no record found for timestamp {target} within {probes} probes")]
    Exhausted { target: i64, probes: usize },
    #[error("invalid RFC 3339 date {input:?}: {source}")]
    InvalidDate {
        input: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("record {number} has unrepresentable timestamp {timestamp}")]
    TimestampOutOfRange { number: u64, timestamp: i64 },
}
