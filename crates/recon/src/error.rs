use thiserror::Error;

use crate::record::Side;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (side names, passes, column policies).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A match list already holds a match for this index on `side`.
    #[error("{side} index '{index}' is already present in the match list")]
    DuplicateIndex { side: Side, index: String },
    /// Records on one side of a match disagree on their index.
    #[error("{side} records of one match have different indices: {indices:?}")]
    InconsistentIndex { side: Side, indices: Vec<String> },
    /// Column aliases refer back to themselves.
    #[error("alias cycle through column '{column}'")]
    AliasCycle { column: String },
    /// Missing required column in input data.
    #[error("{side} source: missing column '{column}'")]
    MissingColumn { side: Side, column: String },
    /// Timestamp parse error.
    #[error("{side} source, record '{record}': cannot parse timestamp '{value}'")]
    TimeParse { side: Side, record: String, value: String },
    /// IO error (file read, CSV decode, etc.).
    #[error("IO error: {0}")]
    Io(String),
}
