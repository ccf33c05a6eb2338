//! Well-Known Binary encoding for points and polygons.
//!
//! ```text
//! Point:   byte_order (1B) | type=1 (u32) | x (f64) | y (f64)
//! Polygon: byte_order (1B) | type=3 (u32) | num_rings (u32)
//!          per ring: num_points (u32) | (x f64, y f64) * num_points
//! ```
//!
//! Writers always emit little-endian (byte_order = 1); readers accept both.

use crate::error::{OverlapError, Result};
use geo::{Coord, LineString, Point, Polygon};

const LITTLE_ENDIAN: u8 = 1;
const BIG_ENDIAN: u8 = 0;
const WKB_POINT: u32 = 1;
const WKB_POLYGON: u32 = 3;

/// Encode a point.
pub fn point_to_wkb(point: &Point<f64>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(21);
    buf.push(LITTLE_ENDIAN);
    buf.extend_from_slice(&WKB_POINT.to_le_bytes());
    buf.extend_from_slice(&point.x().to_le_bytes());
    buf.extend_from_slice(&point.y().to_le_bytes());
    buf
}

/// Encode a polygon (exterior ring first, then interiors).
pub fn polygon_to_wkb(polygon: &Polygon<f64>) -> Vec<u8> {
    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .collect();
    let points: usize = rings.iter().map(|r| r.0.len()).sum();

    let mut buf = Vec::with_capacity(9 + rings.len() * 4 + points * 16);
    buf.push(LITTLE_ENDIAN);
    buf.extend_from_slice(&WKB_POLYGON.to_le_bytes());
    buf.extend_from_slice(&(rings.len() as u32).to_le_bytes());
    for ring in rings {
        buf.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
        for c in &ring.0 {
            buf.extend_from_slice(&c.x.to_le_bytes());
            buf.extend_from_slice(&c.y.to_le_bytes());
        }
    }
    buf
}

/// Decode a point.
pub fn point_from_wkb(bytes: &[u8]) -> Result<Point<f64>> {
    let mut reader = Reader::new(bytes)?;
    reader.expect_type(WKB_POINT)?;
    let coord = reader.coord()?;
    reader.finish()?;
    Ok(Point::from(coord))
}

/// Decode a polygon.
pub fn polygon_from_wkb(bytes: &[u8]) -> Result<Polygon<f64>> {
    let mut reader = Reader::new(bytes)?;
    reader.expect_type(WKB_POLYGON)?;

    let num_rings = reader.u32()? as usize;
    if num_rings == 0 {
        return Err(malformed("polygon has no rings"));
    }

    let mut rings = Vec::with_capacity(num_rings.min(64));
    for _ in 0..num_rings {
        let num_points = reader.u32()? as usize;
        if num_points > reader.remaining() / 16 {
            return Err(malformed("ring length exceeds buffer"));
        }
        let coords = (0..num_points)
            .map(|_| reader.coord())
            .collect::<Result<Vec<_>>>()?;
        rings.push(LineString::from(coords));
    }
    reader.finish()?;

    let mut rings = rings.into_iter();
    let exterior = rings.next().ok_or_else(|| malformed("polygon has no rings"))?;
    Ok(Polygon::new(exterior, rings.collect()))
}

fn malformed(reason: &str) -> OverlapError {
    OverlapError::MalformedGeometry(reason.to_string())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Result<Self> {
        let little_endian = match buf.first() {
            Some(&LITTLE_ENDIAN) => true,
            Some(&BIG_ENDIAN) => false,
            Some(other) => return Err(malformed(&format!("unknown byte order {}", other))),
            None => return Err(malformed("empty buffer")),
        };
        Ok(Self {
            buf,
            pos: 1,
            little_endian,
        })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let bytes: [u8; N] = self
            .buf
            .get(self.pos..end)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| malformed("unexpected end of buffer"))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let b = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }

    fn coord(&mut self) -> Result<Coord<f64>> {
        Ok(Coord {
            x: self.f64()?,
            y: self.f64()?,
        })
    }

    fn expect_type(&mut self, expected: u32) -> Result<()> {
        let found = self.u32()?;
        if found != expected {
            return Err(malformed(&format!(
                "expected geometry type {}, found {}",
                expected, found
            )));
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(malformed("trailing bytes after geometry"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_polygon_layout() {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ];
        let bytes = polygon_to_wkb(&square);

        // header + ring count + point count + 5 closed points
        assert_eq!(bytes.len(), 1 + 4 + 4 + 4 + 5 * 16);
        assert_eq!(bytes[0], LITTLE_ENDIAN);
        assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), WKB_POLYGON);
        assert_eq!(polygon_from_wkb(&bytes).unwrap(), square);
    }

    #[test]
    fn test_point_layout() {
        let bytes = point_to_wkb(&Point::new(-94.7, 29.3));
        assert_eq!(bytes.len(), 21);
        assert_eq!(point_from_wkb(&bytes).unwrap(), Point::new(-94.7, 29.3));
    }

    #[test]
    fn test_reads_big_endian_point() {
        let mut bytes = vec![BIG_ENDIAN];
        bytes.extend_from_slice(&WKB_POINT.to_be_bytes());
        bytes.extend_from_slice(&2.5f64.to_be_bytes());
        bytes.extend_from_slice(&(-1.0f64).to_be_bytes());
        assert_eq!(point_from_wkb(&bytes).unwrap(), Point::new(2.5, -1.0));
    }

    #[test]
    fn test_rejects_truncated_and_mistyped_input() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let bytes = polygon_to_wkb(&square);

        assert!(polygon_from_wkb(&bytes[..bytes.len() - 3]).is_err());
        assert!(polygon_from_wkb(&[]).is_err());
        assert!(polygon_from_wkb(&[7, 3, 0, 0, 0]).is_err());
        assert!(matches!(
            polygon_from_wkb(&point_to_wkb(&Point::new(0.0, 0.0))),
            Err(OverlapError::MalformedGeometry(_))
        ));

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(polygon_from_wkb(&trailing).is_err());
    }
}
