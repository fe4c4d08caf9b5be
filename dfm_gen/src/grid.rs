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

//! The 2-D fracture grid: pillar lattice, stacks of cells, parallel driver
//!
//! Cell corners are views of a shared pillar lattice, so overwriting a
//! corner on one cell overwrites the matching corner of every adjacent
//! cell. Cells are grouped into [GridblockStack]s; the 2-D grid is the
//! special case where every stack holds exactly one cell, but vertical
//! neighbour links come for free from the stack ordering.
//!
//! The implicit calculation is cell-parallel and time-serial within a
//! cell: stacks are chunked over a scoped thread pool and each worker owns
//! its chunk exclusively for the whole run.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};

use crate::cell::GridblockCell;
use crate::controller::{CellRunSummary, PropagationControl, PropagationController};
use crate::error::DfmError;
use crate::geometry::{CellFrame, CornerPosition, Direction, Pillar, PointXYZ};
use crate::helpers::ceil_div;
use crate::progress::ProgressReporter;

/// Strictness of the geometry validation after overrides
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryValidation {
    /// Only reject non-positive cell volumes
    Lenient,
    /// Additionally require convex footprints and positive thickness at
    /// every pillar
    Strict,
}

/// A vertical stack of cells sharing a footprint. Vertical neighbours are
/// adjacent indices in `cells` (top first).
pub struct GridblockStack {
    pub cells: Vec<GridblockCell>,
}

impl GridblockStack {
    pub fn single(cell: GridblockCell) -> Self {
        GridblockStack { cells: vec![cell] }
    }

    pub fn top(&self) -> &GridblockCell {
        &self.cells[0]
    }

    pub fn above(&self, layer: usize) -> Option<&GridblockCell> {
        if layer == 0 {
            None
        } else {
            self.cells.get(layer - 1)
        }
    }

    pub fn below(&self, layer: usize) -> Option<&GridblockCell> {
        self.cells.get(layer + 1)
    }
}

/// R × C mesh of cells with four-neighbour topology
pub struct FractureGrid {
    rows: usize,
    cols: usize,
    pillars: Vec<Pillar>,
    stacks: Vec<GridblockStack>,
}

impl FractureGrid {
    /// Build a grid from a pillar lattice and a per-cell constructor.
    ///
    /// `pillars` holds `(rows+1) × (cols+1)` entries in row-then-column
    /// order (southern pillar row first).
    pub fn build<F>(
        rows: usize,
        cols: usize,
        pillars: Vec<Pillar>,
        mut make_cell: F,
    ) -> Result<Self, DfmError>
    where
        F: FnMut(usize, usize, &CellFrame) -> GridblockCell,
    {
        if rows == 0 || cols == 0 {
            return Err(DfmError::Geometry(format!(
                "grid must have at least one cell ({}x{})",
                rows, cols
            )));
        }
        if pillars.len() != (rows + 1) * (cols + 1) {
            return Err(DfmError::Geometry(format!(
                "expected {} pillars, got {}",
                (rows + 1) * (cols + 1),
                pillars.len()
            )));
        }
        let mut grid = FractureGrid {
            rows,
            cols,
            pillars,
            stacks: Vec::with_capacity(rows * cols),
        };
        for r in 0..rows {
            for c in 0..cols {
                let frame = grid.frame(r, c);
                grid.stacks
                    .push(GridblockStack::single(make_cell(r, c, &frame)));
            }
        }
        Ok(grid)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn stack_index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    fn pillar_index(&self, prow: usize, pcol: usize) -> usize {
        prow * (self.cols + 1) + pcol
    }

    pub fn cell(&self, row: usize, col: usize) -> &GridblockCell {
        self.stacks[self.stack_index(row, col)].top()
    }

    pub fn cell_mut(&mut self, row: usize, col: usize) -> &mut GridblockCell {
        let idx = self.stack_index(row, col);
        &mut self.stacks[idx].cells[0]
    }

    pub fn stacks(&self) -> &[GridblockStack] {
        &self.stacks
    }

    pub fn pillar(&self, prow: usize, pcol: usize) -> &Pillar {
        &self.pillars[self.pillar_index(prow, pcol)]
    }

    pub fn set_pillar(&mut self, prow: usize, pcol: usize, pillar: Pillar) {
        let idx = self.pillar_index(prow, pcol);
        self.pillars[idx] = pillar;
    }

    /// The four pillars of a cell in SW, SE, NW, NE order
    pub fn cell_pillars(&self, row: usize, col: usize) -> [&Pillar; 4] {
        [
            self.pillar(row, col),
            self.pillar(row, col + 1),
            self.pillar(row + 1, col),
            self.pillar(row + 1, col + 1),
        ]
    }

    /// Overwrite one corner of a cell. The matching corner of every
    /// neighbour sharing the pillar is overwritten too.
    pub fn set_cell_corner(
        &mut self,
        row: usize,
        col: usize,
        position: CornerPosition,
        top: PointXYZ,
        bottom: PointXYZ,
    ) {
        let (pr, pc) = match position {
            CornerPosition::SW => (row, col),
            CornerPosition::SE => (row, col + 1),
            CornerPosition::NW => (row + 1, col),
            CornerPosition::NE => (row + 1, col + 1),
        };
        self.set_pillar(pr, pc, Pillar::new(top, bottom));
    }

    pub fn frame(&self, row: usize, col: usize) -> CellFrame {
        let [sw, se, nw, ne] = self.cell_pillars(row, col);
        CellFrame::from_pillars(sw, se, nw, ne)
    }

    pub fn neighbor(&self, row: usize, col: usize, dir: Direction) -> Option<(usize, usize)> {
        match dir {
            Direction::North => {
                if row + 1 < self.rows {
                    Some((row + 1, col))
                } else {
                    None
                }
            }
            Direction::South => row.checked_sub(1).map(|r| (r, col)),
            Direction::East => {
                if col + 1 < self.cols {
                    Some((row, col + 1))
                } else {
                    None
                }
            }
            Direction::West => col.checked_sub(1).map(|c| (row, c)),
        }
    }

    /// Reset all fracture data, refreshing each cell's geometry scalars
    /// from the (possibly overridden) pillar lattice
    pub fn reset_fractures(&mut self) {
        for r in 0..self.rows {
            for c in 0..self.cols {
                let frame = self.frame(r, c);
                let thickness = frame.mean_thickness();
                let area = frame.area();
                let depth = frame.mean_top_depth();
                let cell = self.cell_mut(r, c);
                cell.thickness = thickness;
                cell.area = area;
                cell.initial_depth = depth;
                cell.reset_fractures();
            }
        }
    }

    /// Validate the grid geometry. Non-positive cell volume is always
    /// fatal; strict mode additionally rejects non-convex footprints and
    /// non-positive pillar thickness.
    pub fn validate_geometry(&self, mode: GeometryValidation) -> Result<(), DfmError> {
        for r in 0..self.rows {
            for c in 0..self.cols {
                let frame = self.frame(r, c);
                if frame.volume() <= 0.0 {
                    return Err(DfmError::Geometry(format!(
                        "cell ({},{}) has non-positive volume {}",
                        r,
                        c,
                        frame.volume()
                    )));
                }
                if mode == GeometryValidation::Strict {
                    if !self.footprint_is_convex(r, c) {
                        return Err(DfmError::Geometry(format!(
                            "cell ({},{}) footprint is not convex",
                            r, c
                        )));
                    }
                    for pillar in self.cell_pillars(r, c).iter() {
                        if pillar.thickness() <= 0.0 {
                            return Err(DfmError::Geometry(format!(
                                "cell ({},{}) has a pillar with non-positive thickness",
                                r, c
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn footprint_is_convex(&self, row: usize, col: usize) -> bool {
        let [sw, se, nw, ne] = self.cell_pillars(row, col);
        // walk the footprint boundary
        let ring = [sw.top.xy(), se.top.xy(), ne.top.xy(), nw.top.xy()];
        let mut sign = 0.0f64;
        for i in 0..4 {
            let a = ring[i];
            let b = ring[(i + 1) % 4];
            let c = ring[(i + 2) % 4];
            let cross = (b[0] - a[0]) * (c[1] - b[1]) - (b[1] - a[1]) * (c[0] - b[0]);
            if cross.abs() < 1e-12 {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Run the implicit fracture calculation for every cell, cell-parallel
    /// and time-serial within each cell.
    pub fn run_implicit(
        &mut self,
        control: &PropagationControl,
        num_threads: usize,
        progress: &dyn ProgressReporter,
    ) -> Vec<CellRunSummary> {
        let total: usize = self.stacks.iter().map(|s| s.cells.len()).sum();
        let completed = AtomicUsize::new(0);
        let mut summaries: Vec<Option<CellRunSummary>> = Vec::new();
        summaries.resize_with(total, || None);

        if num_threads < 2 {
            let controller = PropagationController::new(control, progress);
            let mut i = 0;
            for stack in self.stacks.iter_mut() {
                for cell in stack.cells.iter_mut() {
                    summaries[i] = Some(controller.run_cell(cell));
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.report(done, total);
                    i += 1;
                }
            }
        } else {
            let chunk_size = ceil_div(self.stacks.len(), num_threads);
            let mut pool = scoped_threadpool::Pool::new(num_threads as u32);
            let completed = &completed;
            pool.scoped(|scope| {
                let stack_chunks = self.stacks.chunks_mut(chunk_size);
                let summary_chunks = summaries.chunks_mut(chunk_size);
                for (stacks, summaries) in stack_chunks.zip(summary_chunks) {
                    scope.execute(move || {
                        let controller = PropagationController::new(control, progress);
                        for (stack, slot) in stacks.iter_mut().zip(summaries.iter_mut()) {
                            for cell in stack.cells.iter_mut() {
                                *slot = Some(controller.run_cell(cell));
                                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                                progress.report(done, total);
                            }
                        }
                    });
                }
            });
        }

        let mut out = Vec::with_capacity(total);
        for (i, summary) in summaries.into_iter().enumerate() {
            match summary {
                Some(s) => {
                    if s.cancelled {
                        debug!("cell {} cancelled after {} timesteps", i, s.timesteps);
                    }
                    out.push(s);
                }
                None => {
                    warn!("cell {} did not complete; its results are skipped", i);
                    out.push(CellRunSummary {
                        timesteps: 0,
                        end_time: 0.0,
                        cancelled: true,
                    });
                }
            }
        }
        out
    }
}

/// Build a rectangular pillar lattice: `cell_width` east-west spacing,
/// `cell_length` north-south spacing, a flat top at `depth` and a flat
/// bottom at `depth + thickness`.
pub fn regular_pillars(
    rows: usize,
    cols: usize,
    cell_width: f64,
    cell_length: f64,
    depth: f64,
    thickness: f64,
) -> Vec<Pillar> {
    let mut pillars = Vec::with_capacity((rows + 1) * (cols + 1));
    for r in 0..=rows {
        for c in 0..=cols {
            let x = c as f64 * cell_width;
            let y = r as f64 * cell_length;
            pillars.push(Pillar::new(
                PointXYZ::new(x, y, depth),
                PointXYZ::new(x, y, depth + thickness),
            ));
        }
    }
    pillars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellInit, MechanicalProperties};
    use crate::episode::DeformationEpisode;
    use crate::fracture_set::ApertureModel;

    fn make_grid(rows: usize, cols: usize) -> FractureGrid {
        let pillars = regular_pillars(rows, cols, 20.0, 20.0, 2000.0, 1.0);
        FractureGrid::build(rows, cols, pillars, |r, c, frame| {
            GridblockCell::new(
                r,
                c,
                CellInit {
                    thickness: frame.mean_thickness(),
                    area: frame.area(),
                    depth: frame.mean_top_depth(),
                    mech: MechanicalProperties::default(),
                    episodes: vec![DeformationEpisode::default()],
                    n_fracture_sets: 1,
                    forced_mode: None,
                    set_normal_azimuth: 0.0,
                    aperture_hmin: ApertureModel::Uniform { aperture: 5e-4 },
                    aperture_hmax: ApertureModel::Uniform { aperture: 5e-4 },
                    residual_ratio: 0.5,
                    geothermal_gradient: 0.03,
                    sediment_density: 2250.0,
                    fluid_density: 1000.0,
                    initial_overpressure: 0.0,
                    initial_stress_relaxation: 1.0,
                    overwrite_depth: false,
                    rng_seed: (r * 100 + c) as u64,
                },
            )
        })
        .unwrap()
    }

    #[test]
    fn corner_override_is_shared_by_neighbours() {
        let mut grid = make_grid(3, 3);
        let top = PointXYZ::new(39.5, 40.5, 1999.0);
        let bottom = PointXYZ::new(39.5, 40.5, 2002.0);
        grid.set_cell_corner(1, 1, CornerPosition::NE, top, bottom);
        // the NE pillar of (1,1) is the NW of (1,2), SE of (2,1), SW of (2,2)
        assert_eq!(grid.cell_pillars(1, 2)[2].top, top);
        assert_eq!(grid.cell_pillars(2, 1)[1].top, top);
        assert_eq!(grid.cell_pillars(2, 2)[0].bottom, bottom);
    }

    #[test]
    fn four_neighbour_topology() {
        let grid = make_grid(2, 3);
        assert_eq!(grid.neighbor(0, 0, Direction::South), None);
        assert_eq!(grid.neighbor(0, 0, Direction::West), None);
        assert_eq!(grid.neighbor(0, 0, Direction::North), Some((1, 0)));
        assert_eq!(grid.neighbor(0, 0, Direction::East), Some((0, 1)));
        assert_eq!(grid.neighbor(1, 2, Direction::North), None);
        assert_eq!(grid.neighbor(1, 2, Direction::East), None);
    }

    #[test]
    fn negative_volume_is_rejected() {
        let mut grid = make_grid(2, 2);
        // push every bottom above its top
        for pr in 0..=2 {
            for pc in 0..=2 {
                let mut pillar = *grid.pillar(pr, pc);
                pillar.bottom.z = pillar.top.z - 1.0;
                grid.set_pillar(pr, pc, pillar);
            }
        }
        assert!(grid.validate_geometry(GeometryValidation::Lenient).is_err());
    }

    #[test]
    fn strict_mode_rejects_nonconvex_footprints() {
        let mut grid = make_grid(2, 2);
        assert!(grid.validate_geometry(GeometryValidation::Strict).is_ok());
        // fold the shared centre pillar deep into cell (0,0)
        grid.set_pillar(
            1,
            1,
            Pillar::new(
                PointXYZ::new(5.0, 5.0, 2000.0),
                PointXYZ::new(5.0, 5.0, 2001.0),
            ),
        );
        assert!(grid.validate_geometry(GeometryValidation::Strict).is_err());
        // lenient mode tolerates it as long as volumes stay positive
        assert!(grid.validate_geometry(GeometryValidation::Lenient).is_ok());
    }

    #[test]
    fn reset_refreshes_cell_geometry() {
        let mut grid = make_grid(2, 2);
        for pr in 0..=2 {
            for pc in 0..=2 {
                let mut pillar = *grid.pillar(pr, pc);
                pillar.bottom.z = pillar.top.z + 2.5;
                grid.set_pillar(pr, pc, pillar);
            }
        }
        grid.reset_fractures();
        assert!((grid.cell(0, 0).thickness - 2.5).abs() < 1e-12);
        assert!((grid.cell(1, 1).volume - 1000.0).abs() < 1e-9);
    }
}
