//! ship2ship Core - Buffered-Region Overlap Detection over AIS Pings
//!
//! Finds pairs of distinct vessels whose positions, expanded to a fixed
//! radius, overlap within a time window derived from their speeds:
//! 1. **Indexing**: each ping is buffered and covered by H3 cells
//! 2. **Kinematic pruning**: pairs are kept only while `|Δt|` is below the
//!    time the vessels need to close the buffer radius
//! 3. **Join**: a partitioned hash-bucket self-join on cell id, confirmed by
//!    core-cell membership or exact polygon intersection
//! 4. **Reporting**: per-cell, per-pair counts and harbour-masked summaries

pub mod config;
pub mod error;
pub mod geometry;
pub mod indexing;
pub mod join;
pub mod kinematics;
pub mod pipeline;
pub mod report;
pub mod types;
pub mod wkb;

// Re-export key types for convenience
pub use config::DetectionConfig;
pub use error::{OverlapError, Result};
pub use geometry::{CellMembership, GeometryProvider, H3Geometry};
pub use indexing::{IndexReport, IndexedBatch, IndexedRecord, IndexedRow, RecordIndexer};
pub use join::{CandidateJoin, CandidatePair, JoinInput, JoinOutput, JoinStats};
pub use kinematics::{kinematic_window, KinematicWindow, MotionState};
pub use pipeline::{tables, BatchOutcome, OverlapDetector, RunSummary};
pub use report::{aggregate, hotspots, AggregatedCandidate, CellHotspot, HarbourMask, Port, VesselPairSummary};
pub use types::{Ping, TimeRange, VesselId};
