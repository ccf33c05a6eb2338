//! The Candidate Join Engine
//!
//! Self-join of the indexed records on cell id. Rows are bucketed by cell,
//! buckets are spread over partitions by `cell_id % parallelism`, and each
//! partition is evaluated independently on the rayon pool:
//!
//! 1. drop self-pairs and orient the pair so `vessel_1 < vessel_2`
//! 2. reject pairs outside the kinematic window
//! 3. accept on core membership, otherwise on exact region intersection
//!
//! Partitions share nothing. The collect over partition results is the
//! barrier; a single failed partition fails the whole join.

use crate::error::{OverlapError, Result};
use crate::geometry::GeometryProvider;
use crate::indexing::{IndexedBatch, IndexedRow};
use crate::kinematics::{kinematic_window, MotionState};
use crate::types::VesselId;
use crate::wkb;
use chrono::{DateTime, Utc};
use geo::Polygon;
use h3o::CellIndex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use ship2ship_store::Keyed;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One (record, cell) row as seen by the join.
#[derive(Debug, Clone)]
pub struct JoinRow {
    pub vessel_id: VesselId,
    pub vessel_name: String,
    pub timestamp: DateTime<Utc>,
    pub motion: MotionState,
    pub region: Arc<Polygon<f64>>,
    pub cell_id: CellIndex,
    pub is_core: bool,
}

/// Counters for rows dropped while rebuilding join input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInputReport {
    /// Rows accepted into the join
    pub rows: usize,

    /// Rows with an invalid cell id or undecodable geometry
    pub malformed_entries: usize,
}

/// Bucketable join input.
#[derive(Debug, Clone, Default)]
pub struct JoinInput {
    rows: Vec<JoinRow>,
    report: JoinInputReport,
}

impl JoinInput {
    /// Builds join input straight from an in-memory batch.
    pub fn from_batch(batch: &IndexedBatch) -> Self {
        let rows: Vec<JoinRow> = batch
            .records
            .iter()
            .flat_map(|record| {
                let motion = MotionState::new(record.sog_kmph, record.ping.heading);
                record.cells.iter().map(move |m| JoinRow {
                    vessel_id: record.ping.vessel_id,
                    vessel_name: record.ping.vessel_name.clone(),
                    timestamp: record.ping.timestamp,
                    motion,
                    region: Arc::clone(&record.region),
                    cell_id: m.cell_id,
                    is_core: m.is_core,
                })
            })
            .collect();

        let report = JoinInputReport {
            rows: rows.len(),
            malformed_entries: 0,
        };
        Self { rows, report }
    }

    /// Rebuilds join input from persisted `indexed` rows.
    ///
    /// Rows with a bad cell id or malformed WKB are logged and skipped.
    /// Regions are decoded once per (vessel, timestamp).
    pub fn from_rows(rows: &[IndexedRow]) -> Self {
        let mut regions: HashMap<(VesselId, i64), Arc<Polygon<f64>>> = HashMap::new();
        let mut input = Self::default();

        for row in rows {
            match Self::decode_row(row, &mut regions) {
                Ok(join_row) => input.rows.push(join_row),
                Err(e) => {
                    warn!(
                        vessel = %row.ping.vessel_id,
                        timestamp = %row.ping.timestamp,
                        cell = row.ix.cell_id,
                        error = %e,
                        "Skipping malformed cell-cover entry"
                    );
                    input.report.malformed_entries += 1;
                }
            }
        }

        input.report.rows = input.rows.len();
        input
    }

    fn decode_row(
        row: &IndexedRow,
        regions: &mut HashMap<(VesselId, i64), Arc<Polygon<f64>>>,
    ) -> Result<JoinRow> {
        let cell_id = CellIndex::try_from(row.ix.cell_id).map_err(|e| {
            OverlapError::MalformedGeometry(format!("cell id {:#x}: {}", row.ix.cell_id, e))
        })?;
        wkb::polygon_from_wkb(&row.ix.wkb)?;
        wkb::point_from_wkb(&row.point_wkb)?;

        let key = (row.ping.vessel_id, row.ping.timestamp.timestamp_millis());
        let region = match regions.get(&key) {
            Some(region) => Arc::clone(region),
            None => {
                let region = Arc::new(wkb::polygon_from_wkb(&row.buffer_wkb)?);
                regions.insert(key, Arc::clone(&region));
                region
            }
        };

        Ok(JoinRow {
            vessel_id: row.ping.vessel_id,
            vessel_name: row.ping.vessel_name.clone(),
            timestamp: row.ping.timestamp,
            motion: MotionState::new(row.sog_kmph, row.ping.heading),
            region,
            cell_id,
            is_core: row.ix.is_core,
        })
    }

    pub fn rows(&self) -> &[JoinRow] {
        &self.rows
    }

    pub fn report(&self) -> &JoinInputReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A pair of distinct vessels whose buffered regions overlap within the
/// kinematic window. Always `vessel_1 < vessel_2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub vessel_1: VesselId,
    pub vessel_2: VesselId,
    pub vessel_name_1: String,
    pub vessel_name_2: String,
    pub timestamp_1: DateTime<Utc>,
    pub timestamp_2: DateTime<Utc>,

    /// The shared cell that produced the pair
    pub cell_id: CellIndex,
}

impl CandidatePair {
    fn sort_key(&self) -> (u64, VesselId, VesselId, DateTime<Utc>, DateTime<Utc>) {
        (
            u64::from(self.cell_id),
            self.vessel_1,
            self.vessel_2,
            self.timestamp_1,
            self.timestamp_2,
        )
    }

    /// Signed seconds from `timestamp_1` to `timestamp_2`.
    pub fn elapsed_secs(&self) -> f64 {
        elapsed_secs(self.timestamp_1, self.timestamp_2)
    }
}

impl Keyed for CandidatePair {
    fn row_key(&self) -> (u64, i64) {
        (u64::from(self.cell_id), self.timestamp_1.timestamp_millis())
    }
}

/// Signed seconds between two instants, at millisecond precision.
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Join counters, summed over partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStats {
    pub partitions: usize,
    pub buckets: usize,

    /// Within-bucket row pairs examined
    pub comparisons: u64,

    /// Pairs dropped because both rows belong to the same vessel
    pub self_pairs: u64,

    /// Pairs dropped by the kinematic window
    pub outside_window: u64,

    /// Pairs accepted on core membership without an exact test
    pub core_accepts: u64,

    pub exact_tests: u64,
    pub exact_rejections: u64,

    /// Pairs evaluated under an unbounded window
    pub unbounded_windows: u64,

    pub emitted: u64,
}

impl JoinStats {
    pub fn merge(&mut self, other: &JoinStats) {
        self.partitions += other.partitions;
        self.buckets += other.buckets;
        self.comparisons += other.comparisons;
        self.self_pairs += other.self_pairs;
        self.outside_window += other.outside_window;
        self.core_accepts += other.core_accepts;
        self.exact_tests += other.exact_tests;
        self.exact_rejections += other.exact_rejections;
        self.unbounded_windows += other.unbounded_windows;
        self.emitted += other.emitted;
    }
}

/// Join result: candidates sorted by `(cell, vessel_1, vessel_2, t1, t2)`.
#[derive(Debug, Clone, Default)]
pub struct JoinOutput {
    pub candidates: Vec<CandidatePair>,
    pub stats: JoinStats,
}

type Bucket<'a> = (CellIndex, Vec<&'a JoinRow>);

/// The partitioned hash-bucket join.
pub struct CandidateJoin<'g, G: GeometryProvider> {
    geometry: &'g G,
    radius_m: f64,
    parallelism: usize,
    max_candidates_per_partition: Option<usize>,
}

impl<'g, G: GeometryProvider> CandidateJoin<'g, G> {
    pub fn new(geometry: &'g G, radius_m: f64, parallelism: usize) -> Self {
        Self {
            geometry,
            radius_m,
            parallelism: parallelism.max(1),
            max_candidates_per_partition: None,
        }
    }

    /// Caps the candidates a single partition may produce.
    pub fn with_candidate_limit(mut self, limit: Option<usize>) -> Self {
        self.max_candidates_per_partition = limit;
        self
    }

    /// Runs the join to completion or fails as a whole.
    pub fn run(&self, input: &JoinInput) -> Result<JoinOutput> {
        let partitions = self.partition(input.rows());

        let results = partitions
            .par_iter()
            .enumerate()
            .map(|(index, buckets)| self.run_partition(index, buckets))
            .collect::<Result<Vec<_>>>()?;

        let mut output = JoinOutput::default();
        for (candidates, stats) in results {
            output.stats.merge(&stats);
            output.candidates.extend(candidates);
        }
        output.candidates.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        info!(
            rows = input.len(),
            buckets = output.stats.buckets,
            partitions = output.stats.partitions,
            comparisons = output.stats.comparisons,
            emitted = output.stats.emitted,
            "Candidate join complete"
        );
        Ok(output)
    }

    fn partition<'a>(&self, rows: &'a [JoinRow]) -> Vec<Vec<Bucket<'a>>> {
        let mut buckets: HashMap<CellIndex, Vec<&'a JoinRow>> = HashMap::new();
        for row in rows {
            buckets.entry(row.cell_id).or_default().push(row);
        }

        let mut partitions: Vec<Vec<Bucket<'a>>> = vec![Vec::new(); self.parallelism];
        for (cell_id, members) in buckets {
            let slot = (u64::from(cell_id) % self.parallelism as u64) as usize;
            partitions[slot].push((cell_id, members));
        }
        partitions
    }

    fn run_partition(&self, index: usize, buckets: &[Bucket<'_>]) -> Result<(Vec<CandidatePair>, JoinStats)> {
        let mut stats = JoinStats {
            partitions: 1,
            buckets: buckets.len(),
            ..JoinStats::default()
        };
        let mut candidates = Vec::new();

        for (cell_id, members) in buckets {
            for (i, first) in members.iter().enumerate() {
                for second in &members[i + 1..] {
                    stats.comparisons += 1;
                    if let Some(pair) = self.evaluate(*cell_id, first, second, &mut stats) {
                        candidates.push(pair);
                    }
                }
            }

            if let Some(limit) = self.max_candidates_per_partition {
                if candidates.len() > limit {
                    return Err(OverlapError::JoinPartitionFailure {
                        partition: index,
                        reason: format!("candidate limit {} exceeded", limit),
                    });
                }
            }
        }

        stats.emitted = candidates.len() as u64;
        debug!(
            partition = index,
            buckets = stats.buckets,
            comparisons = stats.comparisons,
            emitted = stats.emitted,
            "Join partition finished"
        );
        Ok((candidates, stats))
    }

    fn evaluate(
        &self,
        cell_id: CellIndex,
        first: &JoinRow,
        second: &JoinRow,
        stats: &mut JoinStats,
    ) -> Option<CandidatePair> {
        let (a, b) = match first.vessel_id.cmp(&second.vessel_id) {
            std::cmp::Ordering::Less => (first, second),
            std::cmp::Ordering::Greater => (second, first),
            std::cmp::Ordering::Equal => {
                stats.self_pairs += 1;
                return None;
            }
        };

        let window = kinematic_window(a.motion, b.motion, self.radius_m);
        if window.is_unbounded() {
            stats.unbounded_windows += 1;
        }
        if !window.admits(elapsed_secs(a.timestamp, b.timestamp)) {
            stats.outside_window += 1;
            return None;
        }

        if a.is_core || b.is_core {
            stats.core_accepts += 1;
        } else {
            stats.exact_tests += 1;
            if !self.geometry.intersects(&a.region, &b.region) {
                stats.exact_rejections += 1;
                return None;
            }
        }

        Some(CandidatePair {
            vessel_1: a.vessel_id,
            vessel_2: b.vessel_id,
            vessel_name_1: a.vessel_name.clone(),
            vessel_name_2: b.vessel_name.clone(),
            timestamp_1: a.timestamp,
            timestamp_2: b.timestamp,
            cell_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::H3Geometry;
    use crate::indexing::RecordIndexer;
    use crate::types::fixtures::ping;
    use crate::types::Ping;
    use proptest::prelude::*;

    fn join(pings: &[Ping], radius_m: f64, resolution: u8) -> JoinOutput {
        let geom = H3Geometry::new();
        let batch = RecordIndexer::new(&geom, radius_m, resolution).build(pings).unwrap();
        CandidateJoin::new(&geom, radius_m, 4)
            .run(&JoinInput::from_batch(&batch))
            .unwrap()
    }

    fn vessel_pairs(output: &JoinOutput) -> Vec<(u64, u64)> {
        let mut pairs: Vec<(u64, u64)> = output
            .candidates
            .iter()
            .map(|c| (c.vessel_1.0, c.vessel_2.0))
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    #[test]
    fn test_closing_vessels_are_paired() {
        let pings = vec![
            ping(111_111_111, 0.0, 0.0, 10.0, 0.0, 0),
            ping(222_222_222, 0.0009, 0.0, 10.0, 180.0, 0),
        ];

        let output = join(&pings, 100.0, 9);
        assert!(!output.candidates.is_empty());
        assert!(output
            .candidates
            .iter()
            .all(|c| c.vessel_1 == VesselId(111_111_111) && c.vessel_2 == VesselId(222_222_222)));
        assert_eq!(output.candidates[0].vessel_name_1, "VESSEL 111111111");
    }

    #[test]
    fn test_stationary_vessels_hours_apart_are_paired() {
        let pings = vec![
            ping(1, 0.0, 0.0, 0.0, 0.0, 0),
            ping(2, 0.0009, 0.0, 0.0, 0.0, 2 * 3600),
        ];

        let output = join(&pings, 100.0, 9);
        assert_eq!(vessel_pairs(&output), vec![(1, 2)]);
        assert!(output.stats.unbounded_windows > 0);
        assert_eq!(output.stats.outside_window, 0);
    }

    #[test]
    fn test_fast_vessels_far_apart_in_time_are_rejected() {
        let pings = vec![
            ping(1, 0.0, 0.0, 30.0, 90.0, 0),
            ping(2, 0.0009, 0.0, 30.0, 90.0, 3600),
        ];

        let output = join(&pings, 100.0, 9);
        assert!(output.candidates.is_empty());
        assert!(output.stats.outside_window > 0);
    }

    #[test]
    fn test_identical_position_and_time_always_pair() {
        let pings = vec![
            ping(7, 4.4, 51.9, 12.0, 45.0, 30),
            ping(3, 4.4, 51.9, 8.0, 270.0, 30),
        ];

        let output = join(&pings, 100.0, 9);
        assert_eq!(vessel_pairs(&output), vec![(3, 7)]);
    }

    #[test]
    fn test_vessels_across_the_antimeridian_pair() {
        let pings = vec![
            ping(1, 179.9996, 0.0, 0.0, 0.0, 0),
            ping(2, -179.9996, 0.0, 0.0, 0.0, 0),
        ];

        let output = join(&pings, 100.0, 9);
        assert_eq!(vessel_pairs(&output), vec![(1, 2)]);
    }

    #[test]
    fn test_distant_vessels_at_fine_resolution_never_pair() {
        let pings = vec![
            ping(1, 0.0, 0.0, 0.0, 0.0, 0),
            ping(2, 0.01, 0.0, 0.0, 0.0, 0),
        ];

        let output = join(&pings, 100.0, 12);
        assert!(output.candidates.is_empty());
        assert_eq!(output.stats.comparisons, 0);
    }

    #[test]
    fn test_same_vessel_is_never_paired() {
        let pings = vec![
            ping(5, 0.0, 0.0, 0.0, 0.0, 0),
            ping(5, 0.0, 0.0, 0.0, 0.0, 60),
        ];

        let output = join(&pings, 100.0, 9);
        assert!(output.candidates.is_empty());
        assert!(output.stats.self_pairs > 0);
    }

    #[test]
    fn test_exact_test_rejects_non_overlapping_buffers() {
        // Buffers 300 m apart share a coarse cell but cannot intersect
        let pings = vec![
            ping(1, 4.4, 51.9, 0.0, 0.0, 0),
            ping(2, 4.4054, 51.9, 0.0, 0.0, 0),
        ];

        let output = join(&pings, 100.0, 4);
        assert!(output.candidates.is_empty());
        assert!(output.stats.exact_tests > 0);
        assert_eq!(output.stats.exact_tests, output.stats.exact_rejections);
    }

    #[test]
    fn test_candidate_limit_fails_the_join() {
        let geom = H3Geometry::new();
        let pings = vec![
            ping(1, 0.0, 0.0, 0.0, 0.0, 0),
            ping(2, 0.0, 0.0, 0.0, 0.0, 0),
        ];
        let batch = RecordIndexer::new(&geom, 100.0, 9).build(&pings).unwrap();

        let err = CandidateJoin::new(&geom, 100.0, 2)
            .with_candidate_limit(Some(0))
            .run(&JoinInput::from_batch(&batch))
            .unwrap_err();
        assert!(matches!(err, OverlapError::JoinPartitionFailure { .. }));
    }

    #[test]
    fn test_persisted_rows_give_same_candidates() {
        let geom = H3Geometry::new();
        let pings: Vec<Ping> = (0..8)
            .map(|i| ping(100 + i % 4, 4.40 + 0.0003 * i as f64, 51.90, 6.0, 90.0 * i as f64, 20 * i as i64))
            .collect();
        let batch = RecordIndexer::new(&geom, 100.0, 9).build(&pings).unwrap();
        let joiner = CandidateJoin::new(&geom, 100.0, 3);

        let direct = joiner.run(&JoinInput::from_batch(&batch)).unwrap();
        let reloaded = JoinInput::from_rows(&batch.to_rows());
        assert_eq!(reloaded.report().malformed_entries, 0);
        let persisted = joiner.run(&reloaded).unwrap();

        assert_eq!(direct.candidates, persisted.candidates);
        assert_eq!(direct.stats, persisted.stats);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let geom = H3Geometry::new();
        let batch = RecordIndexer::new(&geom, 100.0, 9)
            .build(&[ping(1, 0.0, 0.0, 0.0, 0.0, 0)])
            .unwrap();
        let mut rows = batch.to_rows();
        let good = rows.len();
        let mut bad_cell = rows[0].clone();
        bad_cell.ix.cell_id = 0;
        let mut bad_wkb = rows[0].clone();
        bad_wkb.buffer_wkb.truncate(7);
        bad_wkb.ping.vessel_id = VesselId(2);
        let mut bad_point = rows[0].clone();
        bad_point.point_wkb.clear();
        bad_point.ping.vessel_id = VesselId(3);
        rows.push(bad_cell);
        rows.push(bad_wkb);
        rows.push(bad_point);

        let input = JoinInput::from_rows(&rows);
        assert_eq!(input.report().rows, good);
        assert_eq!(input.report().malformed_entries, 3);
    }

    #[test]
    fn test_partition_count_does_not_change_output() {
        let geom = H3Geometry::new();
        let pings: Vec<Ping> = (0..12)
            .map(|i| ping(i % 5, 4.40 + 0.0002 * i as f64, 51.90 + 0.0001 * i as f64, 4.0, 30.0 * i as f64, 15 * i as i64))
            .collect();
        let batch = RecordIndexer::new(&geom, 100.0, 9).build(&pings).unwrap();
        let input = JoinInput::from_batch(&batch);

        let one = CandidateJoin::new(&geom, 100.0, 1).run(&input).unwrap();
        let many = CandidateJoin::new(&geom, 100.0, 16).run(&input).unwrap();
        assert_eq!(one.candidates, many.candidates);
        assert_eq!(one.stats.comparisons, many.stats.comparisons);
    }

    fn fleet() -> impl Strategy<Value = Vec<Ping>> {
        prop::collection::vec(
            (1u64..6, -0.002f64..0.002, -0.002f64..0.002, 0.0f64..40.0, 0.0f64..360.0, 0i64..1800),
            2..10,
        )
        .prop_map(|specs| {
            let mut seen = std::collections::HashSet::new();
            specs
                .into_iter()
                .filter(|(id, .., t)| seen.insert((*id, *t)))
                .map(|(id, dx, dy, speed, heading, t)| ping(id, dx, dy, speed, heading, t))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_pairs_are_ordered_and_within_window(pings in fleet()) {
            let output = join(&pings, 100.0, 9);
            let by_key: HashMap<(VesselId, DateTime<Utc>), &Ping> =
                pings.iter().map(|p| ((p.vessel_id, p.timestamp), p)).collect();

            for c in &output.candidates {
                prop_assert!(c.vessel_1 < c.vessel_2);
                let a = by_key[&(c.vessel_1, c.timestamp_1)];
                let b = by_key[&(c.vessel_2, c.timestamp_2)];
                let window = kinematic_window(
                    MotionState::new(a.sog_kmph(), a.heading),
                    MotionState::new(b.sog_kmph(), b.heading),
                    100.0,
                );
                prop_assert!(window.admits(c.elapsed_secs()));
            }
        }

        #[test]
        fn prop_larger_radius_never_loses_vessel_pairs(pings in fleet(), extra in 1.0f64..200.0) {
            let small = join(&pings, 100.0, 9);
            let large = join(&pings, 100.0 + extra, 9);

            let to_set = |o: &JoinOutput| -> std::collections::BTreeSet<(VesselId, VesselId, DateTime<Utc>, DateTime<Utc>)> {
                o.candidates.iter().map(|c| (c.vessel_1, c.vessel_2, c.timestamp_1, c.timestamp_2)).collect()
            };
            prop_assert!(to_set(&small).is_subset(&to_set(&large)));
        }
    }
}
