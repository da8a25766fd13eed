/// Errors raised by the derived-data layer and its Gateway adapter.
///
/// Missing data (an unresolved round timestamp, a month with no rounds, an empty
/// activity page) is never represented here: those outcomes are `None` or empty
/// results. Only upstream failures and precondition violations surface as errors.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The Gateway did not report a latest closed round.
    #[error("Could not determine latest round")]
    LatestRoundUnavailable,

    #[error("Step must be a positive integer, got {0}")]
    InvalidStep(u64),

    #[error("Invalid round range: first round {first} is after last round {last}")]
    InvalidRange { first: u64, last: u64 },

    #[error("Invalid timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Invalid month {year}-{month:02}")]
    InvalidMonth { year: i32, month: u32 },

    /// Transport failure or non-success HTTP status from the Gateway.
    #[error("Gateway request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The Gateway answered with a payload that does not match the expected shape.
    #[error("Malformed Gateway response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
