pub use anyhow::{anyhow, bail, Context, Error, Result};

/// Structural problems in a network description that callers may want to
/// tell apart from I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("element <{element}> lacks required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },
    #[error("attribute '{attribute}' = '{value}' is not a valid {expected}")]
    BadNumber {
        attribute: String,
        value: String,
        expected: &'static str,
    },
    #[error("array {array} lacks required column '{column}'")]
    MissingColumn { array: String, column: String },
    #[error("cannot resolve synapse type for {what} in projection {projection}; candidates: {candidates:?}")]
    AmbiguousSynapse {
        projection: String,
        what: String,
        candidates: Vec<String>,
    },
}
