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

//! Output emission: per-cell implicit tables, ASCII DFN and FAB DFN
//!
//! File writing happens only at episode boundaries and after DFN
//! construction, never on the hot path. IO failures warn and leave the
//! in-memory results intact; the caller decides the process exit code.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use itertools::Itertools;

use crate::dfn::{DiscreteFractureNetwork, Macrofracture, TipState};
use crate::episode::TimeUnits;
use crate::error::DfmError;
use crate::geometry::azimuth_direction;
use crate::grid::FractureGrid;

/// Write one tabular implicit-data file per cell
pub fn write_implicit_files(
    grid: &FractureGrid,
    time_units: TimeUnits,
    output_compliance: bool,
    dir: &Path,
) -> Result<(), DfmError> {
    fs::create_dir_all(dir)?;
    let unit = time_units.seconds();
    for r in 0..grid.rows() {
        for c in 0..grid.cols() {
            let cell = grid.cell(r, c);
            if cell.sets.is_empty() {
                continue;
            }
            let path = dir.join(format!("implicit_r{}_c{}.txt", r, c));
            let file = fs::File::create(&path)?;
            let mut w = BufWriter::new(file);

            writeln!(w, "% implicit fracture data for cell ({},{})", r, c)?;
            writeln!(
                w,
                "% depth {:.1} m, thickness {:.3} m, {} fracture sets",
                cell.depth,
                cell.thickness,
                cell.sets.len()
            )?;
            write!(w, "Time[{}]", time_units.label())?;
            for s in 0..cell.sets.len() {
                write!(
                    w,
                    "\ta_MFP30_{i}\ttotal_MFP30_{i}\ta_MFP32_{i}\ttotal_MFP32_{i}\ttotal_MFP33_{i}\tsigmaN_{i}[Pa]\taperture_{i}[m]",
                    i = s
                )?;
            }
            write!(w, "\tporosity")?;
            if output_compliance {
                write!(w, "\tSxx[1/Pa]\tSyy[1/Pa]\tSxy[1/Pa]")?;
            }
            writeln!(w)?;

            let steps = cell
                .sets
                .iter()
                .flat_map(|s| s.dipsets.iter())
                .map(|d| d.series.timestep_count())
                .min()
                .unwrap_or(0);
            for n in 0..=steps {
                let time = cell.sets[0].dipsets[0].series.record(n).end_time() / unit;
                write!(w, "{:.6e}", time)?;
                let mut macro_porosity = 0.0;
                let mut micro_porosity = 0.0;
                let mut compliance = [0.0f64; 3];
                for set in &cell.sets {
                    let records: Vec<_> =
                        set.dipsets.iter().map(|d| d.series.record(n)).collect();
                    let a30: f64 = records.iter().map(|r| r.a_MFP30).sum();
                    let t30: f64 = records.iter().map(|r| r.total_MFP30).sum();
                    let a32: f64 = records.iter().map(|r| r.a_MFP32).sum();
                    let t32: f64 = records.iter().map(|r| r.total_MFP32).sum();
                    let t33: f64 = records.iter().map(|r| r.total_MFP33).sum();
                    let sn = records[0].mean_normal_stress;
                    let aperture = records
                        .iter()
                        .map(|r| r.mean_aperture)
                        .fold(0.0, f64::max);
                    write!(
                        w,
                        "\t{:.6e}\t{:.6e}\t{:.6e}\t{:.6e}\t{:.6e}\t{:.6e}\t{:.6e}",
                        a30, t30, a32, t32, t33, sn, aperture
                    )?;
                    macro_porosity += t33;
                    micro_porosity += set
                        .dipsets
                        .iter()
                        .map(|d| d.microfracture_porosity(n, d.series.record(n).mean_aperture))
                        .sum::<f64>();
                    // normal compliance added by the set, resolved onto the
                    // horizontal axes
                    let c_set = t33 / cell.mech.young_mod;
                    let normal = azimuth_direction(set.normal_azimuth);
                    let (nx2, ny2) = (normal[0] * normal[0], normal[1] * normal[1]);
                    compliance[0] += c_set * nx2 * nx2;
                    compliance[1] += c_set * ny2 * ny2;
                    compliance[2] += c_set * nx2 * ny2;
                }
                write!(
                    w,
                    "\t{:.6e}",
                    cell.mech.porosity + macro_porosity + micro_porosity
                )?;
                if output_compliance {
                    write!(
                        w,
                        "\t{:.6e}\t{:.6e}\t{:.6e}",
                        compliance[0], compliance[1], compliance[2]
                    )?;
                }
                writeln!(w)?;
            }

            if !cell.snapshots.is_empty() {
                writeln!(w, "% intermediate density snapshots")?;
                for snap in &cell.snapshots {
                    write!(w, "% t={:.6e}", snap.time / unit)?;
                    for (i, d) in snap.per_set.iter().enumerate() {
                        write!(
                            w,
                            " set{}: a30={:.4e} t30={:.4e} t32={:.4e}",
                            i, d.a_MFP30, d.total_MFP30, d.total_MFP32
                        )?;
                    }
                    writeln!(w)?;
                }
            }
        }
    }
    Ok(())
}

fn tip_label(state: TipState) -> &'static str {
    match state {
        TipState::Propagating => "propagating",
        TipState::BoundaryTerminated => "boundary",
        TipState::Cropped => "cropped",
        TipState::ShadowTerminated => "shadow",
        TipState::Relayed => "relay",
        TipState::Intersected => "intersection",
    }
}

// polyline through a whole fracture: minus-half tip → nucleation point →
// plus-half tip, with the cell owning each vertex
fn fracture_polyline(fracture: &Macrofracture) -> Vec<([f64; 2], (usize, usize))> {
    let mut points = Vec::new();
    let minus = &fracture.halves[1];
    for seg in minus.segments.iter().rev() {
        points.push((seg.to_xy, seg.cell));
    }
    points.push((fracture.nucleation_xy, fracture.nucleation_cell));
    let plus = &fracture.halves[0];
    for seg in plus.segments.iter() {
        points.push((seg.to_xy, seg.cell));
    }
    // drop consecutive duplicates
    points
        .into_iter()
        .coalesce(|a, b| {
            let dx = a.0[0] - b.0[0];
            let dy = a.0[1] - b.0[1];
            if (dx * dx + dy * dy).sqrt() < 1e-9 {
                Ok(a)
            } else {
                Err((a, b))
            }
        })
        .collect()
}

// top and bottom depth of the layer at a plan-view point of a cell
fn depths_at(grid: &FractureGrid, cell: (usize, usize), xy: [f64; 2]) -> (f64, f64) {
    let frame = grid.frame(cell.0, cell.1);
    let ij = frame.to_local(xy);
    (frame.top_depth_at(ij), frame.bottom_depth_at(ij))
}

fn microfracture_polygon(
    grid: &FractureGrid,
    dfn: &DiscreteFractureNetwork,
    m: &crate::dfn::MicrofractureDisk,
) -> Vec<[f64; 3]> {
    let strike = grid.cell(m.cell.0, m.cell.1).sets[m.set].strike_azimuth();
    let d = azimuth_direction(strike);
    let n = dfn.n_uf_points.max(3);
    (0..n)
        .map(|k| {
            let phi = 2.0 * std::f64::consts::PI * (k as f64) / (n as f64);
            [
                m.center.x + m.radius * phi.cos() * d[0],
                m.center.y + m.radius * phi.cos() * d[1],
                m.center.z + m.radius * phi.sin(),
            ]
        })
        .collect()
}

/// Write the explicit DFN in the ASCII format: per-fracture centre points,
/// corner point lists and per-segment attributes
pub fn write_dfn_ascii(
    dfn: &DiscreteFractureNetwork,
    grid: &FractureGrid,
    path: &Path,
) -> Result<(), DfmError> {
    let file = fs::File::create(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "% explicit DFN: {} macrofractures, {} microfractures",
        dfn.macrofractures.len(), dfn.microfractures.len())?;

    writeln!(w, "BEGIN MACROFRACTURES")?;
    for (id, fracture) in dfn.macrofractures.iter().enumerate() {
        writeln!(
            w,
            "Fracture {} Set {} NucleationTime {:.6e} Length {:.4} TipMinus {} TipPlus {}",
            id,
            fracture.set,
            fracture.nucleation_time,
            fracture.total_length(),
            tip_label(fracture.halves[1].state),
            tip_label(fracture.halves[0].state),
        )?;
        writeln!(
            w,
            "Centre {:.4} {:.4}",
            fracture.nucleation_xy[0], fracture.nucleation_xy[1]
        )?;
        let line = fracture_polyline(fracture);
        writeln!(w, "CornerPoints {}", 2 * line.len())?;
        for (xy, cell) in line.iter() {
            let (top, _) = depths_at(grid, *cell, *xy);
            writeln!(w, "{:.4} {:.4} {:.4}", xy[0], xy[1], top)?;
        }
        for (xy, cell) in line.iter().rev() {
            let (_, bottom) = depths_at(grid, *cell, *xy);
            writeln!(w, "{:.4} {:.4} {:.4}", xy[0], xy[1], bottom)?;
        }
        for half in &fracture.halves {
            for seg in &half.segments {
                writeln!(
                    w,
                    "Segment cell {} {} set {} relay {} from {:.4} {:.4} to {:.4} {:.4}",
                    seg.cell.0,
                    seg.cell.1,
                    seg.set,
                    seg.relay as u8,
                    seg.from_ij[0],
                    seg.from_ij[1],
                    seg.to_ij[0],
                    seg.to_ij[1],
                )?;
            }
        }
    }
    writeln!(w, "END MACROFRACTURES")?;

    writeln!(w, "BEGIN MICROFRACTURES")?;
    for (id, m) in dfn.microfractures.iter().enumerate() {
        writeln!(
            w,
            "Microfracture {} Set {} Centre {:.4} {:.4} {:.4} Radius {:.5}",
            id, m.set, m.center.x, m.center.y, m.center.z, m.radius
        )?;
        if dfn.n_uf_points >= 3 {
            for p in microfracture_polygon(grid, dfn, m) {
                writeln!(w, "{:.4} {:.4} {:.4}", p[0], p[1], p[2])?;
            }
        }
    }
    writeln!(w, "END MICROFRACTURES")?;
    Ok(())
}

/// Write the explicit DFN in FAB format for reservoir-tool ingestion
pub fn write_dfn_fab(
    dfn: &DiscreteFractureNetwork,
    grid: &FractureGrid,
    path: &Path,
) -> Result<(), DfmError> {
    let file = fs::File::create(path)?;
    let mut w = BufWriter::new(file);

    let n_sets = (0..grid.rows() * grid.cols())
        .map(|i| grid.cell(i / grid.cols(), i % grid.cols()).sets.len())
        .max()
        .unwrap_or(0);
    let n_tess = if dfn.n_uf_points >= 3 {
        dfn.microfractures.len()
    } else {
        0
    };

    writeln!(w, "BEGIN FORMAT")?;
    writeln!(w, "\tFormat = Ascii")?;
    writeln!(w, "\tXAxis = East")?;
    writeln!(w, "\tZPositive = Depth")?;
    writeln!(w, "\tScale = 1.0")?;
    writeln!(w, "\tNo_Fractures = {}", dfn.macrofractures.len())?;
    writeln!(w, "\tNo_TessFractures = {}", n_tess)?;
    writeln!(w, "END FORMAT")?;

    writeln!(w, "BEGIN PROPERTIES")?;
    writeln!(w, "\tProp1 = (Real) \"Permeability\"")?;
    writeln!(w, "\tProp2 = (Real) \"Compressibility\"")?;
    writeln!(w, "\tProp3 = (Real) \"Aperture\"")?;
    writeln!(w, "END PROPERTIES")?;

    writeln!(w, "BEGIN SETS")?;
    for s in 0..n_sets.max(1) {
        writeln!(w, "\tSet{} = \"Set_{}\"", s + 1, s + 1)?;
    }
    writeln!(w, "END SETS")?;

    writeln!(w, "BEGIN FRACTURE")?;
    for (id, fracture) in dfn.macrofractures.iter().enumerate() {
        let line = fracture_polyline(fracture);
        let n_corners = 2 * line.len();
        writeln!(w, "\t{} {} {}", id + 1, n_corners, fracture.set + 1)?;
        let mut corner = 0usize;
        for (xy, cell) in line.iter() {
            let (top, _) = depths_at(grid, *cell, *xy);
            corner += 1;
            writeln!(w, "\t{} {:.4} {:.4} {:.4}", corner, xy[0], xy[1], top)?;
        }
        for (xy, cell) in line.iter().rev() {
            let (_, bottom) = depths_at(grid, *cell, *xy);
            corner += 1;
            writeln!(w, "\t{} {:.4} {:.4} {:.4}", corner, xy[0], xy[1], bottom)?;
        }
        let aperture = grid
            .cell(fracture.nucleation_cell.0, fracture.nucleation_cell.1)
            .sets
            .get(fracture.set)
            .map(|s| {
                s.dipsets
                    .iter()
                    .map(|d| d.series.last().mean_aperture)
                    .fold(0.0, f64::max)
            })
            .unwrap_or(0.0);
        // cubic-law permeability
        let permeability = aperture * aperture / 12.0;
        writeln!(w, "\t0 {:.6e} {:.6e} {:.6e}", permeability, 1e-9, aperture)?;
    }
    writeln!(w, "END FRACTURE")?;

    if n_tess > 0 {
        writeln!(w, "BEGIN TESSFRACTURE")?;
        for (id, m) in dfn.microfractures.iter().enumerate() {
            let polygon = microfracture_polygon(grid, dfn, m);
            writeln!(w, "\t{} {} {}", id + 1, polygon.len(), m.set + 1)?;
            for (k, p) in polygon.iter().enumerate() {
                writeln!(w, "\t{} {:.4} {:.4} {:.4}", k + 1, p[0], p[1], p[2])?;
            }
            let aperture = m.radius * 1e-4;
            writeln!(w, "\t0 {:.6e} {:.6e} {:.6e}", aperture * aperture / 12.0, 1e-9, aperture)?;
        }
        writeln!(w, "END TESSFRACTURE")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfn::{HalfMacrofracture, MacrofractureSegment};

    fn segment(cell: (usize, usize), from: [f64; 2], to: [f64; 2]) -> MacrofractureSegment {
        MacrofractureSegment {
            cell,
            set: 0,
            from_ij: from,
            to_ij: to,
            from_xy: from,
            to_xy: to,
            relay: false,
        }
    }

    #[test]
    fn polyline_runs_tip_to_tip() {
        let fracture = Macrofracture {
            set: 0,
            nucleation_cell: (0, 0),
            nucleation_xy: [10.0, 10.0],
            nucleation_time: 0.0,
            halves: [
                HalfMacrofracture {
                    segments: vec![
                        segment((0, 0), [10.0, 10.0], [14.0, 10.0]),
                        segment((0, 1), [14.0, 10.0], [18.0, 10.0]),
                    ],
                    state: TipState::Propagating,
                    dir: [1.0, 0.0],
                },
                HalfMacrofracture {
                    segments: vec![segment((0, 0), [10.0, 10.0], [4.0, 10.0])],
                    state: TipState::ShadowTerminated,
                    dir: [-1.0, 0.0],
                },
            ],
        };
        let line = fracture_polyline(&fracture);
        assert_eq!(line.first().unwrap().0, [4.0, 10.0]);
        assert_eq!(line.last().unwrap().0, [18.0, 10.0]);
        // nucleation point appears once in the middle
        assert_eq!(line.len(), 4);
    }
}
