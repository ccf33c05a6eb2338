//! Error types for overlap detection.

use crate::types::VesselId;
use chrono::{DateTime, Utc};
use ship2ship_store::StoreError;
use thiserror::Error;

/// Errors raised by the geometry adapter, the indexer and the join engine.
///
/// Per-record variants (`InvalidCoordinate`, `IndexingFailure`,
/// `MalformedGeometry`) are recovered by the stage that sees them: the
/// record is dropped and counted. Structural variants end the run.
#[derive(Debug, Error)]
pub enum OverlapError {
    /// Non-finite or out-of-domain position
    #[error("Invalid coordinate: lat={latitude}, lon={longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    /// Buffer radius must be finite and positive
    #[error("Invalid buffer radius: {0}")]
    InvalidRadius(f64),

    /// H3 resolution outside 0..=15
    #[error("Invalid cell resolution: {0}")]
    InvalidResolution(u8),

    /// A buffered region produced no covering cells
    #[error("No covering cells for vessel {vessel_id} at {timestamp}")]
    IndexingFailure {
        vessel_id: VesselId,
        timestamp: DateTime<Utc>,
    },

    /// Geometry bytes could not be decoded
    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),

    /// A join partition failed; the run must be retried from the start
    #[error("Join partition {partition} failed: {reason}")]
    JoinPartitionFailure { partition: usize, reason: String },

    /// Configuration rejected by validation or unreadable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl OverlapError {
    /// Returns true for errors that only invalidate a single record.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            OverlapError::InvalidCoordinate { .. }
                | OverlapError::IndexingFailure { .. }
                | OverlapError::MalformedGeometry(_)
        )
    }
}

/// Result type for overlap detection.
pub type Result<T> = std::result::Result<T, OverlapError>;
