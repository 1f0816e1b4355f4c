use thiserror::Error;

use crate::controller::LinkId;

/// Errors surfaced by the splitting controller.
///
/// Every variant is fatal for the caller: configuration and shape errors mean
/// the controller was wired up wrong, `Unsupported` marks combinations that are
/// deliberately not implemented.
#[derive(Error, Debug)]
pub enum SplitError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Measurement field `{field}` has {actual} entries, expected {expected}")]
    MeasurementShape {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Measurement sample has no links")]
    EmptyMeasurement,

    #[error("Inconsistent measurement: {0}")]
    InvalidMeasurement(String),

    #[error("Unknown link id {0}")]
    UnknownLink(LinkId),

    #[error("Not implemented: {0}")]
    Unsupported(&'static str),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, SplitError>;
