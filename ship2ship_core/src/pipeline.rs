//! The staged detection pipeline
//!
//! ```text
//! pings ──► index ──► join ──► aggregate
//!             │         │          │
//!             ▼         ▼          ▼
//!          indexed  candidates  aggregates
//! ```
//!
//! Every stage materializes its output before the next one starts. Output
//! tables are written only after the join barrier, each as a whole-partition
//! overwrite under a lease taken before any work begins. A failed run leaves
//! every output partition as it was.

use crate::config::DetectionConfig;
use crate::error::{OverlapError, Result};
use crate::geometry::{GeometryProvider, H3Geometry};
use crate::indexing::{IndexReport, IndexedBatch, IndexedRow, RecordIndexer};
use crate::join::{CandidateJoin, CandidatePair, JoinInput, JoinInputReport, JoinOutput, JoinStats};
use crate::report::{aggregate, AggregatedCandidate};
use crate::types::Ping;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ship2ship_store::{keyed_rows, ordered_rows, PartitionWrite, StoreError, TableStore, TableStoreExt};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Table names used by the pipeline.
pub mod tables {
    /// Raw pings, one partition per ingest (e.g. a day)
    pub const PINGS: &str = "pings";

    /// One row per (ping, covering cell), clustered by cell then time
    pub const INDEXED: &str = "indexed";

    /// Raw candidate pairs, clustered by cell
    pub const CANDIDATES: &str = "candidates";

    /// Aggregated candidates in descending count order
    pub const AGGREGATES: &str = "aggregates";
}

/// Everything an in-memory run produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch: IndexedBatch,
    pub join_input: JoinInputReport,
    pub join: JoinOutput,
    pub aggregates: Vec<AggregatedCandidate>,
}

/// Summary of a stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub partition: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,

    /// Pings in the partition after the time filter
    pub pings: usize,

    pub index: IndexReport,
    pub join_input: JoinInputReport,
    pub join: JoinStats,

    /// Rows written per output table
    pub indexed_rows: usize,
    pub candidates: usize,
    pub aggregates: usize,
}

/// Indexes, joins and aggregates vessel pings.
pub struct OverlapDetector<G: GeometryProvider = H3Geometry> {
    config: DetectionConfig,
    geometry: G,
}

impl OverlapDetector<H3Geometry> {
    /// Creates a detector over H3 cells.
    pub fn new(config: DetectionConfig) -> Result<Self> {
        Self::with_geometry(config, H3Geometry::new())
    }
}

impl<G: GeometryProvider> OverlapDetector<G> {
    /// Creates a detector over a custom geometry provider.
    ///
    /// # Errors
    /// `Config` when the configuration fails validation.
    pub fn with_geometry(config: DetectionConfig, geometry: G) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, geometry })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// Stage 1: buffers and cell-indexes pings.
    pub fn index(&self, pings: &[Ping]) -> Result<IndexedBatch> {
        RecordIndexer::new(&self.geometry, self.config.buffer_radius_m, self.config.resolution).build(pings)
    }

    /// Stage 2: the candidate join.
    pub fn detect(&self, input: &JoinInput) -> Result<JoinOutput> {
        CandidateJoin::new(&self.geometry, self.config.buffer_radius_m, self.config.parallelism)
            .with_candidate_limit(self.config.max_candidates_per_partition)
            .run(input)
    }

    /// Stage 3: per-cell, per-pair counts.
    pub fn aggregate(&self, candidates: &[CandidatePair]) -> Vec<AggregatedCandidate> {
        aggregate(candidates)
    }

    /// Runs every stage in memory, applying the configured time range.
    pub fn run_batch(&self, pings: &[Ping]) -> Result<BatchOutcome> {
        let selected: Vec<Ping> = match &self.config.time_range {
            Some(range) => pings.iter().filter(|p| range.contains(p.timestamp)).cloned().collect(),
            None => pings.to_vec(),
        };

        let batch = self.index(&selected)?;
        let input = JoinInput::from_batch(&batch);
        let join = self.detect(&input)?;
        let aggregates = self.aggregate(&join.candidates);

        Ok(BatchOutcome {
            batch,
            join_input: input.report().clone(),
            join,
            aggregates,
        })
    }

    /// Runs the pipeline over one stored partition of `pings`.
    ///
    /// Output tables are overwritten under the same partition name and
    /// published together: readers see all three new partitions or none.
    /// Leases for every output are taken up front, so a concurrent run over
    /// the same partition fails with `PartitionBusy` before doing any work.
    pub fn run<S: TableStore + ?Sized>(&self, store: &S, partition: &str) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        let indexed_lease = store.lease(tables::INDEXED, partition)?;
        let candidates_lease = store.lease(tables::CANDIDATES, partition)?;
        let aggregates_lease = store.lease(tables::AGGREGATES, partition)?;

        let pings = self.load_pings(store, partition)?;
        info!(%run_id, partition, pings = pings.len(), "Loaded pings");

        let outcome = self.run_batch(&pings)?;

        let indexed = keyed_rows(&outcome.batch.to_rows())?;
        let candidates = keyed_rows(&outcome.join.candidates)?;
        let aggregates = ordered_rows(&outcome.aggregates)?;
        let (indexed_rows, candidates_count, aggregates_count) = (indexed.len(), candidates.len(), aggregates.len());
        store.save_overwrite_all(vec![
            PartitionWrite::new(&indexed_lease, indexed),
            PartitionWrite::new(&candidates_lease, candidates),
            PartitionWrite::new(&aggregates_lease, aggregates),
        ])?;

        let summary = RunSummary {
            run_id,
            partition: partition.to_string(),
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            pings: pings.len(),
            index: outcome.batch.report,
            join_input: outcome.join_input,
            join: outcome.join.stats,
            indexed_rows,
            candidates: candidates_count,
            aggregates: aggregates_count,
        };

        info!(
            %run_id,
            partition,
            indexed_rows,
            candidates = candidates_count,
            aggregates = aggregates_count,
            elapsed_ms = summary.elapsed_ms,
            "Run committed"
        );
        Ok(summary)
    }

    /// Re-runs the join from the persisted `indexed` partition.
    pub fn detect_from_store<S: TableStore + ?Sized>(&self, store: &S, partition: &str) -> Result<(JoinInputReport, JoinOutput)> {
        let rows: Vec<IndexedRow> = store.load_partition(tables::INDEXED, partition)?;
        let input = JoinInput::from_rows(&rows);
        info!(
            partition,
            rows = input.report().rows,
            malformed = input.report().malformed_entries,
            "Rebuilt join input from store"
        );
        let output = self.detect(&input)?;
        Ok((input.report().clone(), output))
    }

    /// Reads a ping partition, skipping rows outside the time range before
    /// decoding them.
    fn load_pings<S: TableStore + ?Sized>(&self, store: &S, partition: &str) -> Result<Vec<Ping>> {
        let range = self.config.time_range.map(|r| r.to_store_range());
        store
            .read_partition(tables::PINGS, partition)?
            .into_iter()
            .filter(|row| range.map_or(true, |r| r.contains(row.key.timestamp_millis)))
            .map(|row| serde_json::from_slice(&row.payload).map_err(|e| OverlapError::Storage(StoreError::from(e))))
            .collect()
    }
}

/// Replaces a ping partition.
pub fn save_pings<S: TableStore + ?Sized>(store: &S, partition: &str, pings: &[Ping]) -> Result<usize> {
    let lease = store.lease(tables::PINGS, partition)?;
    let written = store.save_rows(&lease, pings)?;
    info!(partition, pings = written, "Saved pings");
    Ok(written)
}

/// Reads the candidates of one partition.
pub fn load_candidates<S: TableStore + ?Sized>(store: &S, partition: &str) -> Result<Vec<CandidatePair>> {
    Ok(store.load_partition(tables::CANDIDATES, partition)?)
}

/// Reads the aggregates of one partition, busiest first.
pub fn load_aggregates<S: TableStore + ?Sized>(store: &S, partition: &str) -> Result<Vec<AggregatedCandidate>> {
    Ok(store.load_partition(tables::AGGREGATES, partition)?)
}
