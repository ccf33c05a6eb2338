//! The Geometry Adapter - points, buffers and H3 cell covers
//!
//! Regions live in planar degree space (x = longitude, y = latitude), the
//! same space the cell boundaries are expressed in, so every predicate is a
//! plain `geo` planar test. Longitudes wrap: before a predicate, the other
//! shape is moved by whole turns of 360° into the frame of the region, so
//! shapes on either side of the antimeridian compare as neighbours.

use crate::error::{OverlapError, Result};
use geo::{BoundingRect, Centroid, Contains, Coord, Intersects, LineString, Point, Polygon, Translate};
use h3o::{CellIndex, LatLng, Resolution};
use std::f64::consts::PI;

/// Degrees per metre at the equator (`0.00001 - 0.000001`).
pub const DEGREES_PER_METRE: f64 = 0.00001 - 0.000001;

/// Metres per degree of latitude, used to size grid-disk searches.
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// Number of vertices in a buffered region.
pub const BUFFER_SEGMENTS: usize = 32;

/// Largest accepted |latitude|, admitting the "not available" sentinel.
const LATITUDE_DOMAIN: f64 = 91.0;

/// Largest accepted |longitude|, admitting the "not available" sentinel.
const LONGITUDE_DOMAIN: f64 = 181.0;

/// Membership of a region in one spatial cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellMembership {
    pub cell_id: CellIndex,

    /// The cell lies entirely inside the region
    pub is_core: bool,

    /// Cell boundary in degree space
    pub cell: Polygon<f64>,
}

/// Capabilities the detector needs from a geometry/spatial-index library.
///
/// Implementations are pure: no hidden state, same inputs give same outputs.
pub trait GeometryProvider: Send + Sync {
    /// Builds a point from degrees.
    ///
    /// Sentinel values are passed through; only non-finite or out-of-domain
    /// values are rejected with `InvalidCoordinate`.
    fn point(&self, longitude: f64, latitude: f64) -> Result<Point<f64>>;

    /// Expands a point into a disk-like region of `radius_m` metres.
    fn buffer(&self, point: &Point<f64>, radius_m: f64) -> Result<Polygon<f64>>;

    /// Lists every cell at `resolution` that overlaps `region`.
    ///
    /// Cell boundaries are returned in the region's longitude frame.
    fn cell_cover(&self, region: &Polygon<f64>, resolution: u8) -> Result<Vec<CellMembership>>;

    /// Exact intersection predicate.
    fn intersects(&self, a: &Polygon<f64>, b: &Polygon<f64>) -> bool;
}

/// H3 cells with `geo` predicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct H3Geometry;

impl H3Geometry {
    pub fn new() -> Self {
        Self
    }
}

/// Parses an H3 resolution level.
pub fn resolution(level: u8) -> Result<Resolution> {
    Resolution::try_from(level).map_err(|_| OverlapError::InvalidResolution(level))
}

/// Boundary of an H3 cell as a degree-space polygon.
pub fn cell_polygon(cell: CellIndex) -> Polygon<f64> {
    let ring: Vec<Coord<f64>> = cell
        .boundary()
        .iter()
        .map(|ll| Coord {
            x: ll.lng(),
            y: ll.lat(),
        })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// Whole turns of longitude that bring `x` nearest to `reference_x`.
fn frame_shift(reference_x: f64, x: f64) -> f64 {
    360.0 * ((reference_x - x) / 360.0).round()
}

/// Moves each vertex to the copy of its longitude nearest `reference_x`.
///
/// Also closes up cells whose H3 boundary jumps across ±180°.
fn wrap_into_frame(polygon: &Polygon<f64>, reference_x: f64) -> Polygon<f64> {
    let ring: Vec<Coord<f64>> = polygon
        .exterior()
        .coords()
        .map(|c| Coord {
            x: c.x + frame_shift(reference_x, c.x),
            y: c.y,
        })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// Circumradius scale that makes a regular n-gon's area equal the circle's.
///
/// An n-gon with circumradius R has area `(n/2) R² sin(2π/n)`.
fn area_preserving_scale(segments: usize) -> f64 {
    let n = segments as f64;
    (2.0 * PI / (n * (2.0 * PI / n).sin())).sqrt()
}

impl GeometryProvider for H3Geometry {
    fn point(&self, longitude: f64, latitude: f64) -> Result<Point<f64>> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && latitude.abs() <= LATITUDE_DOMAIN
            && longitude.abs() <= LONGITUDE_DOMAIN;
        if !valid {
            return Err(OverlapError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        Ok(Point::new(longitude, latitude))
    }

    fn buffer(&self, point: &Point<f64>, radius_m: f64) -> Result<Polygon<f64>> {
        if !(radius_m.is_finite() && radius_m > 0.0) {
            return Err(OverlapError::InvalidRadius(radius_m));
        }

        let r = radius_m * DEGREES_PER_METRE * area_preserving_scale(BUFFER_SEGMENTS);
        let step = 2.0 * PI / BUFFER_SEGMENTS as f64;
        let ring: Vec<Coord<f64>> = (0..BUFFER_SEGMENTS)
            .map(|i| {
                let theta = step * i as f64;
                Coord {
                    x: point.x() + r * theta.cos(),
                    y: point.y() + r * theta.sin(),
                }
            })
            .collect();

        Ok(Polygon::new(LineString::from(ring), vec![]))
    }

    fn cell_cover(&self, region: &Polygon<f64>, level: u8) -> Result<Vec<CellMembership>> {
        let res = resolution(level)?;
        let (centroid, bbox) = match (region.centroid(), region.bounding_rect()) {
            (Some(c), Some(b)) => (c, b),
            _ => return Err(OverlapError::MalformedGeometry("empty region".to_string())),
        };

        let center = LatLng::new(centroid.y(), centroid.x())
            .map_err(|_| OverlapError::InvalidCoordinate {
                latitude: centroid.y(),
                longitude: centroid.x(),
            })?
            .to_cell(res);

        // Ring count: half the region's extent over the average edge length,
        // plus one ring of slack for cell size variation
        let extent_m = bbox.width().max(bbox.height()) / 2.0 * METRES_PER_DEGREE;
        let k = (extent_m / res.edge_length_m()).ceil() as u32 + 1;

        let mut cover: Vec<CellMembership> = center
            .grid_disk_safe(k)
            .filter_map(|cell_id| {
                let cell = wrap_into_frame(&cell_polygon(cell_id), centroid.x());
                if !region.intersects(&cell) {
                    return None;
                }
                let is_core = region.contains(&cell);
                Some(CellMembership {
                    cell_id,
                    is_core,
                    cell,
                })
            })
            .collect();

        cover.sort_by_key(|m| m.cell_id);
        Ok(cover)
    }

    fn intersects(&self, a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
        let shift = match (a.centroid(), b.centroid()) {
            (Some(ca), Some(cb)) => frame_shift(ca.x(), cb.x()),
            _ => 0.0,
        };
        if shift == 0.0 {
            a.intersects(b)
        } else {
            a.intersects(&b.translate(shift, 0.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Area;

    #[test]
    fn test_point_passes_sentinels_through() {
        let geom = H3Geometry::new();
        let p = geom.point(181.0, 91.0).unwrap();
        assert_eq!(p.x(), 181.0);
        assert_eq!(p.y(), 91.0);
    }

    #[test]
    fn test_point_rejects_non_finite_and_out_of_domain() {
        let geom = H3Geometry::new();
        assert!(matches!(
            geom.point(f64::NAN, 0.0),
            Err(OverlapError::InvalidCoordinate { .. })
        ));
        assert!(geom.point(0.0, f64::INFINITY).is_err());
        assert!(geom.point(0.0, 120.0).is_err());
        assert!(geom.point(-200.0, 0.0).is_err());
    }

    #[test]
    fn test_buffer_preserves_circle_area() {
        let geom = H3Geometry::new();
        let region = geom.buffer(&Point::new(0.0, 0.0), 100.0).unwrap();

        let r = 100.0 * DEGREES_PER_METRE;
        assert_relative_eq!(region.unsigned_area(), PI * r * r, max_relative = 1e-9);
        assert_eq!(region.exterior().0.len(), BUFFER_SEGMENTS + 1);
    }

    #[test]
    fn test_buffer_rejects_bad_radius() {
        let geom = H3Geometry::new();
        let p = Point::new(0.0, 0.0);
        assert!(matches!(geom.buffer(&p, 0.0), Err(OverlapError::InvalidRadius(_))));
        assert!(geom.buffer(&p, -5.0).is_err());
        assert!(geom.buffer(&p, f64::NAN).is_err());
    }

    #[test]
    fn test_cell_cover_contains_point_cell() {
        let geom = H3Geometry::new();
        let p = geom.point(-94.7, 29.3).unwrap();
        let region = geom.buffer(&p, 100.0).unwrap();
        let cover = geom.cell_cover(&region, 9).unwrap();

        let home = LatLng::new(29.3, -94.7).unwrap().to_cell(Resolution::Nine);
        assert!(!cover.is_empty());
        assert!(cover.iter().any(|m| m.cell_id == home));
        // A 100 m disk cannot swallow a ~174 m-edge hexagon
        assert!(cover.iter().all(|m| !m.is_core));
    }

    #[test]
    fn test_cell_cover_marks_core_cells_at_fine_resolution() {
        let geom = H3Geometry::new();
        let p = geom.point(-94.7, 29.3).unwrap();
        let region = geom.buffer(&p, 100.0).unwrap();
        let cover = geom.cell_cover(&region, 12).unwrap();

        let home = LatLng::new(29.3, -94.7).unwrap().to_cell(Resolution::Twelve);
        let membership = cover.iter().find(|m| m.cell_id == home).unwrap();
        assert!(membership.is_core);
        assert!(cover.iter().any(|m| !m.is_core), "boundary cells are partial");
    }

    #[test]
    fn test_cell_cover_grows_with_radius() {
        let geom = H3Geometry::new();
        let p = geom.point(4.4, 51.9).unwrap();
        let small = geom.cell_cover(&geom.buffer(&p, 100.0).unwrap(), 10).unwrap();
        let large = geom.cell_cover(&geom.buffer(&p, 400.0).unwrap(), 10).unwrap();

        assert!(large.len() > small.len());
        for m in &small {
            assert!(large.iter().any(|l| l.cell_id == m.cell_id));
        }
    }

    #[test]
    fn test_cell_cover_rejects_bad_resolution() {
        let geom = H3Geometry::new();
        let region = geom.buffer(&Point::new(0.0, 0.0), 100.0).unwrap();
        assert!(matches!(
            geom.cell_cover(&region, 16),
            Err(OverlapError::InvalidResolution(16))
        ));
    }

    #[test]
    fn test_intersects_is_exact() {
        let geom = H3Geometry::new();
        let a = geom.buffer(&Point::new(0.0, 0.0), 100.0).unwrap();
        let near = geom.buffer(&Point::new(0.0015, 0.0), 100.0).unwrap();
        let far = geom.buffer(&Point::new(0.0025, 0.0), 100.0).unwrap();

        assert!(geom.intersects(&a, &near));
        assert!(!geom.intersects(&a, &far));
    }

    #[test]
    fn test_cell_cover_wraps_across_antimeridian() {
        let geom = H3Geometry::new();
        let region = geom.buffer(&Point::new(179.9996, 0.0), 100.0).unwrap();
        let cover = geom.cell_cover(&region, 9).unwrap();

        let east = LatLng::new(0.0, 179.9996).unwrap().to_cell(Resolution::Nine);
        let west = LatLng::new(0.0, -179.9999).unwrap().to_cell(Resolution::Nine);
        assert!(cover.iter().any(|m| m.cell_id == east));
        assert!(cover.iter().any(|m| m.cell_id == west));
        for m in &cover {
            assert!(m.cell.exterior().coords().all(|c| c.x > 179.0 && c.x < 181.0));
        }
    }

    #[test]
    fn test_intersects_across_antimeridian() {
        let geom = H3Geometry::new();
        let east = geom.buffer(&Point::new(179.9996, 0.0), 100.0).unwrap();
        let west = geom.buffer(&Point::new(-179.9996, 0.0), 100.0).unwrap();
        let far = geom.buffer(&Point::new(-179.9, 0.0), 100.0).unwrap();

        assert!(geom.intersects(&east, &west));
        assert!(geom.intersects(&west, &east));
        assert!(!geom.intersects(&east, &far));
    }
}
