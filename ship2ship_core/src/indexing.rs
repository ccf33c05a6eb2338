//! The Indexed Record Store - buffered, cell-indexed pings
//!
//! Each ping becomes one [`IndexedRecord`] (point → buffer → cell cover),
//! which explodes into one [`IndexedRow`] per covering cell when persisted.
//! Rows are laid out by `(cell_id, timestamp)` so the downstream equality
//! join reads each cell's rows contiguously.

use crate::error::{OverlapError, Result};
use crate::geometry::{CellMembership, GeometryProvider};
use crate::types::Ping;
use crate::wkb;
use geo::{Point, Polygon};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use ship2ship_store::Keyed;
use std::sync::Arc;
use tracing::{info, warn};

/// A ping with its buffered region and cell cover. Read-only once built.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub ping: Ping,

    /// Speed over ground in km/h (rounded to two decimals)
    pub sog_kmph: f64,

    /// The ping's position as validated by the geometry provider
    pub point: Point<f64>,

    /// Buffered region, shared by every cell row of this record
    pub region: Arc<Polygon<f64>>,

    /// Covering cells, ascending by cell id. Never empty.
    pub cells: Vec<CellMembership>,
}

/// Persisted cell-cover entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCoverEntry {
    /// Raw H3 index
    pub cell_id: u64,

    pub is_core: bool,

    /// Cell boundary as WKB
    pub wkb: Vec<u8>,
}

/// One persisted (ping, cell) row of the `indexed` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRow {
    #[serde(flatten)]
    pub ping: Ping,

    pub sog_kmph: f64,

    /// Ping position as WKB
    pub point_wkb: Vec<u8>,

    /// Buffered region as WKB
    pub buffer_wkb: Vec<u8>,

    pub ix: CellCoverEntry,
}

impl Keyed for IndexedRow {
    fn row_key(&self) -> (u64, i64) {
        (self.ix.cell_id, self.ping.timestamp.timestamp_millis())
    }
}

/// Data-quality counters for one indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    /// Pings offered to the indexer
    pub pings: usize,

    /// Pings that produced a record
    pub indexed: usize,

    /// Exploded (ping, cell) rows
    pub rows: usize,

    /// Pings rejected for non-finite or out-of-domain coordinates
    pub invalid_coordinates: usize,

    /// Pings whose buffer touched no cell
    pub indexing_failures: usize,

    /// Pings carrying a "not available" position sentinel, whatever their
    /// indexing outcome
    pub sentinel_positions: usize,
}

/// The output of one indexing pass.
#[derive(Debug, Clone, Default)]
pub struct IndexedBatch {
    pub records: Vec<IndexedRecord>,
    pub report: IndexReport,
}

impl IndexedBatch {
    /// Explodes records into persisted rows ordered by `(cell_id, timestamp)`.
    pub fn to_rows(&self) -> Vec<IndexedRow> {
        let mut rows: Vec<IndexedRow> = self
            .records
            .iter()
            .flat_map(|record| {
                let point_wkb = wkb::point_to_wkb(&record.point);
                let buffer_wkb = wkb::polygon_to_wkb(&record.region);
                record.cells.iter().map(move |m| IndexedRow {
                    ping: record.ping.clone(),
                    sog_kmph: record.sog_kmph,
                    point_wkb: point_wkb.clone(),
                    buffer_wkb: buffer_wkb.clone(),
                    ix: CellCoverEntry {
                        cell_id: u64::from(m.cell_id),
                        is_core: m.is_core,
                        wkb: wkb::polygon_to_wkb(&m.cell),
                    },
                })
            })
            .collect();

        rows.sort_by_key(|r| r.row_key());
        rows
    }

    pub fn row_count(&self) -> usize {
        self.records.iter().map(|r| r.cells.len()).sum()
    }
}

/// Builds [`IndexedBatch`]es with a fixed radius and resolution.
pub struct RecordIndexer<'g, G: GeometryProvider> {
    geometry: &'g G,
    radius_m: f64,
    resolution: u8,
}

impl<'g, G: GeometryProvider> RecordIndexer<'g, G> {
    pub fn new(geometry: &'g G, radius_m: f64, resolution: u8) -> Self {
        Self {
            geometry,
            radius_m,
            resolution,
        }
    }

    /// Indexes a single ping.
    ///
    /// # Errors
    /// * `InvalidCoordinate` - the ping's position is unusable
    /// * `IndexingFailure` - the buffer touched zero cells
    pub fn index_one(&self, ping: &Ping) -> Result<IndexedRecord> {
        let point = self.geometry.point(ping.longitude, ping.latitude)?;
        let region = self.geometry.buffer(&point, self.radius_m)?;
        let cells = match self.geometry.cell_cover(&region, self.resolution) {
            Ok(cells) if !cells.is_empty() => cells,
            Ok(_) => {
                return Err(OverlapError::IndexingFailure {
                    vessel_id: ping.vessel_id,
                    timestamp: ping.timestamp,
                })
            }
            Err(e) => return Err(e),
        };

        Ok(IndexedRecord {
            ping: ping.clone(),
            sog_kmph: ping.sog_kmph(),
            point,
            region: Arc::new(region),
            cells,
        })
    }

    /// Indexes a batch of pings in parallel.
    ///
    /// Per-record failures are logged and counted; structural failures
    /// (bad radius or resolution) abort the batch.
    pub fn build(&self, pings: &[Ping]) -> Result<IndexedBatch> {
        let outcomes: Vec<Result<IndexedRecord>> =
            pings.par_iter().map(|ping| self.index_one(ping)).collect();

        let mut batch = IndexedBatch {
            records: Vec::with_capacity(pings.len()),
            report: IndexReport {
                pings: pings.len(),
                ..IndexReport::default()
            },
        };

        for (ping, outcome) in pings.iter().zip(outcomes) {
            if ping.has_sentinel_position() {
                batch.report.sentinel_positions += 1;
            }
            match outcome {
                Ok(record) => {
                    batch.report.rows += record.cells.len();
                    batch.records.push(record);
                }
                Err(OverlapError::InvalidCoordinate { latitude, longitude }) => {
                    warn!(
                        vessel = %ping.vessel_id,
                        timestamp = %ping.timestamp,
                        latitude,
                        longitude,
                        "Rejected ping with invalid coordinate"
                    );
                    batch.report.invalid_coordinates += 1;
                }
                Err(OverlapError::IndexingFailure { vessel_id, timestamp }) => {
                    warn!(
                        vessel = %vessel_id,
                        %timestamp,
                        "Buffered region touched no cells; excluded from join"
                    );
                    batch.report.indexing_failures += 1;
                }
                Err(e) if e.is_per_record() => {
                    warn!(vessel = %ping.vessel_id, error = %e, "Dropped ping");
                    batch.report.indexing_failures += 1;
                }
                Err(e) => return Err(e),
            }
        }

        batch.report.indexed = batch.records.len();
        info!(
            pings = batch.report.pings,
            indexed = batch.report.indexed,
            rows = batch.report.rows,
            invalid = batch.report.invalid_coordinates,
            unindexed = batch.report.indexing_failures,
            sentinels = batch.report.sentinel_positions,
            "Indexed ping batch"
        );
        Ok(batch)
    }
}
