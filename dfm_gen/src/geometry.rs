// dfm_gen - stochastic growth modelling of natural fracture networks
// Copyright (C) 2026 The dfm_gen developers

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Points, pillars and cell-local coordinate frames
//!
//! The grid lives in a right-handed map frame: x east, y north, z positive
//! down ("depth"). Azimuths are measured clockwise from grid north.

/// A 3-D coordinate. Z is positive-down depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointXYZ {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PointXYZ {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        PointXYZ { x, y, z }
    }

    /// Plan-view (x,y) projection
    pub fn xy(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// A vertical grid pillar: the top and bottom point shared by up to four
/// adjacent cells.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pillar {
    pub top: PointXYZ,
    pub bottom: PointXYZ,
}

impl Pillar {
    pub fn new(top: PointXYZ, bottom: PointXYZ) -> Self {
        Pillar { top, bottom }
    }

    pub fn thickness(&self) -> f64 {
        self.bottom.z - self.top.z
    }
}

/// Corner position within a cell footprint (row 0 is the southern edge,
/// column 0 the western edge).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CornerPosition {
    SW,
    SE,
    NW,
    NE,
}

/// Four-neighbour direction on the grid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

/// Unit direction of an azimuth (clockwise from north) in the map frame
#[inline(always)]
pub fn azimuth_direction(azimuth: f64) -> [f64; 2] {
    [azimuth.sin(), azimuth.cos()]
}

/// Smallest angle between two strike lines (lines, not rays), in [0, π/2]
pub fn strike_difference(az1: f64, az2: f64) -> f64 {
    let mut d = (az1 - az2).rem_euclid(std::f64::consts::PI);
    if d > std::f64::consts::FRAC_PI_2 {
        d = std::f64::consts::PI - d;
    }
    d
}

/// Plan-view frame of one cell. Local IJ coordinates are metric distances
/// along the southern (I) and western (J) cell edges from the SW corner.
///
/// The frame treats the footprint as the parallelogram spanned by the two
/// edges at the SW corner; for the rectangular cells produced by the default
/// grid builder the mapping is exact.
#[derive(Clone, Debug)]
pub struct CellFrame {
    origin: [f64; 2],
    axis_i: [f64; 2],
    axis_j: [f64; 2],
    len_i: f64,
    len_j: f64,
    // corner depths in SW, SE, NW, NE order
    z_top: [f64; 4],
    z_bottom: [f64; 4],
}

impl CellFrame {
    /// Build a frame from the four pillars of a cell (SW, SE, NW, NE)
    pub fn from_pillars(sw: &Pillar, se: &Pillar, nw: &Pillar, ne: &Pillar) -> Self {
        let origin = sw.top.xy();
        let di = [se.top.x - sw.top.x, se.top.y - sw.top.y];
        let dj = [nw.top.x - sw.top.x, nw.top.y - sw.top.y];
        let len_i = (di[0] * di[0] + di[1] * di[1]).sqrt();
        let len_j = (dj[0] * dj[0] + dj[1] * dj[1]).sqrt();
        let axis_i = if len_i > 0.0 {
            [di[0] / len_i, di[1] / len_i]
        } else {
            [1.0, 0.0]
        };
        let axis_j = if len_j > 0.0 {
            [dj[0] / len_j, dj[1] / len_j]
        } else {
            [0.0, 1.0]
        };
        CellFrame {
            origin,
            axis_i,
            axis_j,
            len_i,
            len_j,
            z_top: [sw.top.z, se.top.z, nw.top.z, ne.top.z],
            z_bottom: [sw.bottom.z, se.bottom.z, nw.bottom.z, ne.bottom.z],
        }
    }

    pub fn len_i(&self) -> f64 {
        self.len_i
    }

    pub fn len_j(&self) -> f64 {
        self.len_j
    }

    /// Map a global plan-view point into local IJ coordinates
    pub fn to_local(&self, xy: [f64; 2]) -> [f64; 2] {
        let dx = xy[0] - self.origin[0];
        let dy = xy[1] - self.origin[1];
        // Solve dx,dy = i*axis_i + j*axis_j
        let det = self.axis_i[0] * self.axis_j[1] - self.axis_i[1] * self.axis_j[0];
        if det.abs() < 1e-12 {
            return [dx, dy];
        }
        let i = (dx * self.axis_j[1] - dy * self.axis_j[0]) / det;
        let j = (dy * self.axis_i[0] - dx * self.axis_i[1]) / det;
        [i, j]
    }

    /// Map local IJ coordinates to a global plan-view point
    pub fn to_global(&self, ij: [f64; 2]) -> [f64; 2] {
        [
            self.origin[0] + ij[0] * self.axis_i[0] + ij[1] * self.axis_j[0],
            self.origin[1] + ij[0] * self.axis_i[1] + ij[1] * self.axis_j[1],
        ]
    }

    /// Does a local point lie inside the footprint (with a small tolerance)?
    pub fn contains(&self, ij: [f64; 2]) -> bool {
        let eps = 1e-9 * self.len_i.max(self.len_j).max(1.0);
        ij[0] >= -eps && ij[0] <= self.len_i + eps && ij[1] >= -eps && ij[1] <= self.len_j + eps
    }

    fn bilinear(&self, values: &[f64; 4], ij: [f64; 2]) -> f64 {
        let u = if self.len_i > 0.0 {
            (ij[0] / self.len_i).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let v = if self.len_j > 0.0 {
            (ij[1] / self.len_j).clamp(0.0, 1.0)
        } else {
            0.0
        };
        values[0] * (1.0 - u) * (1.0 - v)
            + values[1] * u * (1.0 - v)
            + values[2] * (1.0 - u) * v
            + values[3] * u * v
    }

    /// Interpolated depth of the layer top at a local point
    pub fn top_depth_at(&self, ij: [f64; 2]) -> f64 {
        self.bilinear(&self.z_top, ij)
    }

    /// Interpolated depth of the layer bottom at a local point
    pub fn bottom_depth_at(&self, ij: [f64; 2]) -> f64 {
        self.bilinear(&self.z_bottom, ij)
    }

    pub fn mean_top_depth(&self) -> f64 {
        self.z_top.iter().sum::<f64>() / 4.0
    }

    pub fn mean_thickness(&self) -> f64 {
        (self.z_bottom.iter().sum::<f64>() - self.z_top.iter().sum::<f64>()) / 4.0
    }

    /// Plan-view footprint area (parallelogram approximation)
    pub fn area(&self) -> f64 {
        let cross = self.axis_i[0] * self.axis_j[1] - self.axis_i[1] * self.axis_j[0];
        (self.len_i * self.len_j * cross).abs()
    }

    /// Bulk cell volume
    pub fn volume(&self) -> f64 {
        self.area() * self.mean_thickness()
    }

    /// Where does the local segment p0→p1 leave the footprint, if at all?
    ///
    /// Returns the crossing parameter t ∈ (0, 1] and the edge crossed.
    pub fn exit_crossing(&self, p0: [f64; 2], p1: [f64; 2]) -> Option<(f64, Direction)> {
        let mut best: Option<(f64, Direction)> = None;
        let mut consider = |t: f64, dir: Direction| {
            if t > 1e-12 && t <= 1.0 {
                match best {
                    Some((bt, _)) if bt <= t => {}
                    _ => best = Some((t, dir)),
                }
            }
        };
        let d = [p1[0] - p0[0], p1[1] - p0[1]];
        if d[0] > 0.0 && p1[0] > self.len_i {
            consider((self.len_i - p0[0]) / d[0], Direction::East);
        }
        if d[0] < 0.0 && p1[0] < 0.0 {
            consider(-p0[0] / d[0], Direction::West);
        }
        if d[1] > 0.0 && p1[1] > self.len_j {
            consider((self.len_j - p0[1]) / d[1], Direction::North);
        }
        if d[1] < 0.0 && p1[1] < 0.0 {
            consider(-p0[1] / d[1], Direction::South);
        }
        best
    }
}

/// Intersection of two plan-view segments p0→p1 and q0→q1.
///
/// Returns the parameters (t, u) along each segment when they properly
/// cross (both parameters within [0, 1]).
pub fn segment_intersection(
    p0: [f64; 2],
    p1: [f64; 2],
    q0: [f64; 2],
    q1: [f64; 2],
) -> Option<(f64, f64)> {
    let r = [p1[0] - p0[0], p1[1] - p0[1]];
    let s = [q1[0] - q0[0], q1[1] - q0[1]];
    let denom = r[0] * s[1] - r[1] * s[0];
    if denom.abs() < 1e-15 {
        return None;
    }
    let qp = [q0[0] - p0[0], q0[1] - p0[1]];
    let t = (qp[0] * s[1] - qp[1] * s[0]) / denom;
    let u = (qp[0] * r[1] - qp[1] * r[0]) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some((t, u))
    } else {
        None
    }
}

/// Distance from a point to a segment, and the projection parameter on it
pub fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> (f64, f64) {
    let ab = [b[0] - a[0], b[1] - a[1]];
    let ap = [p[0] - a[0], p[1] - a[1]];
    let len2 = ab[0] * ab[0] + ab[1] * ab[1];
    let t = if len2 > 0.0 {
        ((ap[0] * ab[0] + ap[1] * ab[1]) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let cx = a[0] + t * ab[0] - p[0];
    let cy = a[1] + t * ab[1] - p[1];
    ((cx * cx + cy * cy).sqrt(), t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cell() -> CellFrame {
        let p = |x: f64, y: f64| Pillar::new(PointXYZ::new(x, y, 2000.0), PointXYZ::new(x, y, 2001.0));
        CellFrame::from_pillars(&p(0.0, 0.0), &p(20.0, 0.0), &p(0.0, 20.0), &p(20.0, 20.0))
    }

    #[test]
    fn local_global_roundtrip() {
        let f = unit_cell();
        let ij = [3.5, 12.25];
        let xy = f.to_global(ij);
        let back = f.to_local(xy);
        assert!((back[0] - ij[0]).abs() < 1e-9);
        assert!((back[1] - ij[1]).abs() < 1e-9);
    }

    #[test]
    fn volume_and_thickness() {
        let f = unit_cell();
        assert!((f.area() - 400.0).abs() < 1e-9);
        assert!((f.mean_thickness() - 1.0).abs() < 1e-12);
        assert!((f.volume() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn exit_crossing_finds_nearest_edge() {
        let f = unit_cell();
        let (t, dir) = f.exit_crossing([19.0, 10.0], [22.0, 10.0]).unwrap();
        assert_eq!(dir, Direction::East);
        assert!((t - 1.0 / 3.0).abs() < 1e-9);
        assert!(f.exit_crossing([5.0, 5.0], [6.0, 6.0]).is_none());
    }

    #[test]
    fn segments_cross() {
        let hit = segment_intersection([0.0, 0.0], [2.0, 2.0], [0.0, 2.0], [2.0, 0.0]);
        let (t, u) = hit.unwrap();
        assert!((t - 0.5).abs() < 1e-12 && (u - 0.5).abs() < 1e-12);
        assert!(segment_intersection([0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]).is_none());
    }

    #[test]
    fn strike_difference_wraps() {
        let d = strike_difference(0.1, std::f64::consts::PI + 0.1);
        assert!(d.abs() < 1e-12);
        let d = strike_difference(0.0, std::f64::consts::FRAC_PI_2);
        assert!((d - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }
}
