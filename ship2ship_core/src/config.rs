//! Run configuration for the overlap detector.

use crate::error::{OverlapError, Result};
use crate::geometry;
use crate::types::TimeRange;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for an `OverlapDetector` run.
///
/// Missing JSON fields fall back to [`DetectionConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// H3 resolution for the cell cover (default: 9 ~174m edge)
    pub resolution: u8,

    /// Buffer radius around each ping in metres (default: 100)
    pub buffer_radius_m: f64,

    /// Inclusive ping time filter (default: none, every ping)
    pub time_range: Option<TimeRange>,

    /// Join partitions (default: 4 per rayon worker thread)
    pub parallelism: usize,

    /// Candidates a single join partition may emit (default: unlimited)
    pub max_candidates_per_partition: Option<usize>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            resolution: 9,
            buffer_radius_m: 100.0,
            time_range: None,
            parallelism: rayon::current_num_threads() * 4,
            max_candidates_per_partition: None,
        }
    }
}

impl DetectionConfig {
    pub fn with_resolution(mut self, resolution: u8) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_buffer_radius(mut self, radius_m: f64) -> Self {
        self.buffer_radius_m = radius_m;
        self
    }

    pub fn with_time_range(mut self, range: Option<TimeRange>) -> Self {
        self.time_range = range;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_candidate_limit(mut self, limit: Option<usize>) -> Self {
        self.max_candidates_per_partition = limit;
        self
    }

    /// Checks every option, reporting the first invalid one.
    pub fn validate(&self) -> Result<()> {
        geometry::resolution(self.resolution)
            .map_err(|_| OverlapError::Config(format!("resolution {} outside 0..=15", self.resolution)))?;

        if !(self.buffer_radius_m.is_finite() && self.buffer_radius_m > 0.0) {
            return Err(OverlapError::Config(format!(
                "buffer_radius_m must be positive, got {}",
                self.buffer_radius_m
            )));
        }

        if self.parallelism == 0 {
            return Err(OverlapError::Config("parallelism must be at least 1".to_string()));
        }

        if let Some(range) = &self.time_range {
            if range.end < range.start {
                return Err(OverlapError::Config(format!(
                    "time_range ends ({}) before it starts ({})",
                    range.end, range.start
                )));
            }
        }

        Ok(())
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OverlapError::Config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| OverlapError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }
}
