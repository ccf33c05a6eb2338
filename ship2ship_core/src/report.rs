//! Candidate Aggregator/Reporter
//!
//! Rolls raw candidate pairs up into per-cell, per-pair counts, plus the
//! harbour-masked per-vessel-pair view used to shortlist encounters at sea.

use crate::error::Result;
use crate::geometry::GeometryProvider;
use crate::join::CandidatePair;
use crate::types::VesselId;
use chrono::{DateTime, Utc};
use h3o::CellIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::info;

/// Candidate count for one (cell, vessel pair).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedCandidate {
    pub cell_id: CellIndex,
    pub vessel_1: VesselId,
    pub vessel_2: VesselId,
    pub count: u64,
}

type AggregateKey = (u64, VesselId, VesselId);

/// Groups candidates by `(cell_id, vessel_1, vessel_2)`.
///
/// Sorted by count descending, ties by key ascending.
pub fn aggregate(candidates: &[CandidatePair]) -> Vec<AggregatedCandidate> {
    let mut counts: BTreeMap<AggregateKey, (CellIndex, u64)> = BTreeMap::new();
    for c in candidates {
        let key = (u64::from(c.cell_id), c.vessel_1, c.vessel_2);
        counts.entry(key).or_insert((c.cell_id, 0)).1 += 1;
    }

    // BTreeMap iteration is key-ascending, so a stable sort keeps key order on ties
    let mut rows: Vec<AggregatedCandidate> = counts
        .into_iter()
        .map(|((_, vessel_1, vessel_2), (cell_id, count))| AggregatedCandidate {
            cell_id,
            vessel_1,
            vessel_2,
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// Candidate activity in a single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellHotspot {
    pub cell_id: CellIndex,

    /// Raw candidates in the cell
    pub count: u64,

    /// Distinct vessel pairs in the cell
    pub pairs: usize,
}

/// Per-cell candidate totals, busiest first.
pub fn hotspots(aggregates: &[AggregatedCandidate]) -> Vec<CellHotspot> {
    let mut cells: BTreeMap<u64, CellHotspot> = BTreeMap::new();
    for a in aggregates {
        let spot = cells.entry(u64::from(a.cell_id)).or_insert(CellHotspot {
            cell_id: a.cell_id,
            count: 0,
            pairs: 0,
        });
        spot.count += a.count;
        spot.pairs += 1;
    }

    let mut spots: Vec<CellHotspot> = cells.into_values().collect();
    spots.sort_by(|a, b| b.count.cmp(&a.count));
    spots
}

/// A named port location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
}

/// Encounter summary for one vessel pair outside harbour cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VesselPairSummary {
    pub vessel_1: VesselId,
    pub vessel_2: VesselId,
    pub vessel_name_1: String,
    pub vessel_name_2: String,

    /// Distinct cells the pair was seen in
    pub cells: usize,

    /// Raw candidates
    pub count: u64,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Cells around ports. Candidates in these cells are ordinary port traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarbourMask {
    cells: HashSet<CellIndex>,
}

impl HarbourMask {
    /// Default exclusion radius around a port (10 km).
    pub const DEFAULT_RADIUS_M: f64 = 10_000.0;

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_cells<I: IntoIterator<Item = CellIndex>>(cells: I) -> Self {
        Self {
            cells: cells.into_iter().collect(),
        }
    }

    /// Covers each port's buffered location at `resolution`.
    ///
    /// The resolution must match the one the candidates were indexed at.
    pub fn from_ports<G: GeometryProvider>(
        geometry: &G,
        ports: &[Port],
        radius_m: f64,
        resolution: u8,
    ) -> Result<Self> {
        let mut cells = HashSet::new();
        for port in ports {
            let point = geometry.point(port.longitude, port.latitude)?;
            let region = geometry.buffer(&point, radius_m)?;
            cells.extend(
                geometry
                    .cell_cover(&region, resolution)?
                    .into_iter()
                    .map(|m| m.cell_id),
            );
        }

        info!(ports = ports.len(), cells = cells.len(), "Built harbour mask");
        Ok(Self { cells })
    }

    pub fn contains(&self, cell: CellIndex) -> bool {
        self.cells.contains(&cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Drops aggregates in harbour cells, keeping order.
    pub fn exclude(&self, aggregates: &[AggregatedCandidate]) -> Vec<AggregatedCandidate> {
        aggregates
            .iter()
            .filter(|a| !self.contains(a.cell_id))
            .cloned()
            .collect()
    }

    /// Groups candidates outside harbour cells by vessel pair.
    ///
    /// Sorted by count descending, ties by pair ascending.
    pub fn vessel_pairs(&self, candidates: &[CandidatePair]) -> Vec<VesselPairSummary> {
        let mut groups: BTreeMap<(VesselId, VesselId), (VesselPairSummary, BTreeSet<u64>)> = BTreeMap::new();

        for c in candidates.iter().filter(|c| !self.contains(c.cell_id)) {
            let earliest = c.timestamp_1.min(c.timestamp_2);
            let latest = c.timestamp_1.max(c.timestamp_2);
            let (summary, cells) = groups.entry((c.vessel_1, c.vessel_2)).or_insert_with(|| {
                (
                    VesselPairSummary {
                        vessel_1: c.vessel_1,
                        vessel_2: c.vessel_2,
                        vessel_name_1: c.vessel_name_1.clone(),
                        vessel_name_2: c.vessel_name_2.clone(),
                        cells: 0,
                        count: 0,
                        first_seen: earliest,
                        last_seen: latest,
                    },
                    BTreeSet::new(),
                )
            });

            summary.count += 1;
            summary.first_seen = summary.first_seen.min(earliest);
            summary.last_seen = summary.last_seen.max(latest);
            cells.insert(u64::from(c.cell_id));
        }

        let mut pairs: Vec<VesselPairSummary> = groups
            .into_values()
            .map(|(mut summary, cells)| {
                summary.cells = cells.len();
                summary
            })
            .collect();
        pairs.sort_by(|a, b| b.count.cmp(&a.count));
        pairs
    }
}
