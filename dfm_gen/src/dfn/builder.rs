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

//! Explicit DFN construction
//!
//! The builder walks the merged timeline of all cells' implicit timesteps.
//! In each virtual step it nucleates new macrofracture seeds from the
//! implicit nucleation rates, then advances every live tip by the implicit
//! propagation rate, handling cell-boundary crossing, stress-shadow
//! capture (with optional relay linking), oblique intersection and outer
//! boundary cropping. Microfractures above the explicit radius cutoff are
//! emitted at the end.
//!
//! Construction is serial per virtual timestep: a tip that exits one cell
//! is handed to the neighbour before the next step begins.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::debug;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use rand_pcg::Pcg64Mcg;

use super::{
    DFNControl, DFNPropagationOrder, DiscreteFractureNetwork, HalfMacrofracture, Macrofracture,
    MacrofractureSegment, MicrofractureDisk, TipState,
};
use crate::geometry::{azimuth_direction, segment_intersection, CellFrame, PointXYZ};
use crate::grid::FractureGrid;
use crate::helpers::OrderedTime;
use crate::progress::ProgressReporter;

// segments at an angle below this are treated as parallel (shadow casting),
// above it as oblique (intersection)
const PARALLEL_ANGLE: f64 = std::f64::consts::FRAC_PI_4;
const POSITION_ATTEMPTS: usize = 50;
const NUDGE: f64 = 1e-9;

#[derive(Clone, Copy)]
struct SegKey {
    frac: usize,
    half: usize,
    seg: usize,
}

struct CellSetInfo {
    strike: f64,
    shadow_width: f64,
    exclusion_width: f64,
}

struct CellInfo {
    row: usize,
    col: usize,
    frame: CellFrame,
    volume: f64,
    sets: Vec<CellSetInfo>,
}

enum Event {
    Intersect {
        s: f64,
    },
    Shadow {
        s: f64,
        target: SegKey,
    },
    Exit {
        s: f64,
        dir: crate::geometry::Direction,
    },
}

impl Event {
    fn s(&self) -> f64 {
        match self {
            Event::Intersect { s } => *s,
            Event::Shadow { s, .. } => *s,
            Event::Exit { s, .. } => *s,
        }
    }
}

struct AdvancePlan {
    new_segments: Vec<MacrofractureSegment>,
    state: TipState,
    dir: [f64; 2],
}

/// Builds the explicit DFN from a grid with completed timestep series
pub struct DFNBuilder<'a> {
    grid: &'a FractureGrid,
    control: &'a DFNControl,
}

impl<'a> DFNBuilder<'a> {
    pub fn new(grid: &'a FractureGrid, control: &'a DFNControl) -> Self {
        DFNBuilder { grid, control }
    }

    pub fn build(&self, progress: &dyn ProgressReporter) -> DiscreteFractureNetwork {
        let mut network = DiscreteFractureNetwork {
            n_uf_points: self.control.n_uf_points,
            ..Default::default()
        };
        if !self.control.generate {
            return network;
        }
        let cells = self.cell_infos();
        if cells.iter().all(|c| c.sets.is_empty()) {
            return network;
        }
        let times = self.merged_timeline();
        if times.len() < 2 {
            return network;
        }

        // one deterministic random source per cell, from the master seed
        let n_cells = cells.len();
        let mut rngs: Vec<Pcg64Mcg> = cells
            .iter()
            .map(|info| Pcg64Mcg::seed_from_u64(self.grid.cell(info.row, info.col).rng_seed))
            .collect();
        let mut fractures: Vec<Macrofracture> = Vec::new();
        let mut segments_by_cell: Vec<Vec<SegKey>> = vec![Vec::new(); n_cells];
        let mut seeds_by_cell: Vec<Vec<([f64; 2], usize)>> = vec![Vec::new(); n_cells];

        let steps = times.len() - 1;
        for step in 0..steps {
            if progress.is_cancelled() {
                debug!("DFN construction cancelled at virtual step {}", step);
                break;
            }
            let t0 = times[step];
            let t1 = times[step + 1];
            let dt = t1 - t0;
            if dt <= 0.0 {
                continue;
            }
            let t_mid = 0.5 * (t0 + t1);
            let rates = self.propagation_rates(&cells, t_mid);

            // 1. nucleate macrofracture seeds
            self.nucleate(
                &cells,
                t0,
                t_mid,
                dt,
                &mut rngs,
                &mut fractures,
                &segments_by_cell,
                &mut seeds_by_cell,
            );

            // 2. advance every live tip
            let order = self.tip_order(&fractures);
            for fi in order {
                for half in 0..2 {
                    if fractures[fi].halves[half].state != TipState::Propagating {
                        continue;
                    }
                    let plan =
                        self.plan_half(&cells, &rates, &fractures, &segments_by_cell, fi, half, dt);
                    if let Some(plan) = plan {
                        self.apply_plan(&mut fractures, &mut segments_by_cell, fi, half, plan);
                    }
                }
            }
            progress.report(step + 1, steps);
        }

        // 7. explicit microfractures
        self.emit_microfractures(&cells, &mut rngs, &segments_by_cell, &fractures, &mut network);

        network.macrofractures = fractures;
        network
    }

    fn cell_infos(&self) -> Vec<CellInfo> {
        let mut infos = Vec::with_capacity(self.grid.rows() * self.grid.cols());
        for r in 0..self.grid.rows() {
            for c in 0..self.grid.cols() {
                let frame = self.grid.frame(r, c);
                let cell = self.grid.cell(r, c);
                let sets = cell
                    .sets
                    .iter()
                    .map(|s| CellSetInfo {
                        strike: s.strike_azimuth(),
                        shadow_width: s
                            .dipsets
                            .iter()
                            .map(|d| d.shadow_width())
                            .fold(0.0, f64::max),
                        exclusion_width: s
                            .dipsets
                            .iter()
                            .map(|d| d.exclusion_width())
                            .fold(0.0, f64::max),
                    })
                    .collect();
                infos.push(CellInfo {
                    row: r,
                    col: c,
                    volume: frame.volume(),
                    frame,
                    sets,
                });
            }
        }
        infos
    }

    fn cell_index(&self, row: usize, col: usize) -> usize {
        row * self.grid.cols() + col
    }

    // merged global timeline of every cell's timestep boundaries
    fn merged_timeline(&self) -> Vec<f64> {
        let mut times = vec![0.0];
        for r in 0..self.grid.rows() {
            for c in 0..self.grid.cols() {
                for set in &self.grid.cell(r, c).sets {
                    for dipset in &set.dipsets {
                        for n in 1..=dipset.series.timestep_count() {
                            times.push(dipset.series.record(n).end_time());
                        }
                    }
                }
            }
        }
        times.sort_by(|a, b| a.total_cmp(b));
        let mut merged: Vec<f64> = Vec::with_capacity(times.len());
        for t in times {
            match merged.last() {
                Some(last) if t - last <= 1e-9 * (t.abs() + 1.0) => {}
                _ => merged.push(t),
            }
        }
        merged
    }

    // per-cell per-set propagation rate over a virtual step
    fn propagation_rates(&self, cells: &[CellInfo], t_mid: f64) -> Vec<Vec<f64>> {
        cells
            .iter()
            .map(|info| {
                let cell = self.grid.cell(info.row, info.col);
                cell.sets
                    .iter()
                    .map(|s| {
                        s.dipsets
                            .iter()
                            .map(|d| {
                                // a cell contributes no growth past its own
                                // simulated history
                                if t_mid > d.series.last().end_time() {
                                    return 0.0;
                                }
                                let n = d.series.record_index_at(t_mid);
                                d.series.record(n).propagation_rate
                            })
                            .fold(0.0, f64::max)
                    })
                    .collect()
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn nucleate(
        &self,
        cells: &[CellInfo],
        t0: f64,
        t_mid: f64,
        dt: f64,
        rngs: &mut [Pcg64Mcg],
        fractures: &mut Vec<Macrofracture>,
        segments_by_cell: &[Vec<SegKey>],
        seeds_by_cell: &mut [Vec<([f64; 2], usize)>],
    ) {
        for (ci, info) in cells.iter().enumerate() {
            let cell = self.grid.cell(info.row, info.col);
            for (k, set) in cell.sets.iter().enumerate() {
                // expected seeds: clear-zone volume × raw seed density rate
                let mut lambda = 0.0;
                for dipset in &set.dipsets {
                    if t_mid > dipset.series.last().end_time() {
                        continue;
                    }
                    let n = dipset.series.record_index_at(t_mid);
                    let rec = dipset.series.record(n);
                    if rec.duration <= 0.0 {
                        continue;
                    }
                    let rate = rec.nucleation_increment_raw / rec.duration;
                    lambda += rec.theta_prime_allFS * info.volume * rate * dt;
                }
                if lambda <= 0.0 {
                    continue;
                }
                let count = if self.control.nucleation_mode.probabilistic(lambda) {
                    match Poisson::new(lambda) {
                        Ok(poisson) => poisson.sample(&mut rngs[ci]) as usize,
                        Err(_) => 0,
                    }
                } else {
                    lambda.round() as usize
                };
                for _ in 0..count {
                    if let Some(xy) = self.sample_clear_position(
                        info,
                        k,
                        &mut rngs[ci],
                        fractures,
                        &segments_by_cell[ci],
                        &seeds_by_cell[ci],
                    ) {
                        let dir = azimuth_direction(info.sets[k].strike);
                        seeds_by_cell[ci].push((xy, k));
                        fractures.push(Macrofracture {
                            set: k,
                            nucleation_cell: (info.row, info.col),
                            nucleation_xy: xy,
                            nucleation_time: t0,
                            halves: [
                                HalfMacrofracture {
                                    segments: Vec::new(),
                                    state: TipState::Propagating,
                                    dir,
                                },
                                HalfMacrofracture {
                                    segments: Vec::new(),
                                    state: TipState::Propagating,
                                    dir: [-dir[0], -dir[1]],
                                },
                            ],
                        });
                    }
                }
            }
        }
    }

    // rejection-sample a nucleation position outside existing exclusion
    // zones of the same set
    fn sample_clear_position(
        &self,
        info: &CellInfo,
        set: usize,
        rng: &mut Pcg64Mcg,
        fractures: &[Macrofracture],
        cell_segments: &[SegKey],
        cell_seeds: &[([f64; 2], usize)],
    ) -> Option<[f64; 2]> {
        let half_exclusion = 0.5 * info.sets[set].exclusion_width;
        'attempt: for _ in 0..POSITION_ATTEMPTS {
            let i = rng.gen_range(0.0..info.frame.len_i());
            let j = rng.gen_range(0.0..info.frame.len_j());
            let xy = info.frame.to_global([i, j]);
            for key in cell_segments {
                let seg = &fractures[key.frac].halves[key.half].segments[key.seg];
                if seg.set != set || seg.length() < NUDGE {
                    continue;
                }
                let (dist, _) =
                    crate::geometry::point_segment_distance(xy, seg.from_xy, seg.to_xy);
                if dist < half_exclusion {
                    continue 'attempt;
                }
            }
            for (seed, seed_set) in cell_seeds {
                if *seed_set != set {
                    continue;
                }
                let dx = xy[0] - seed[0];
                let dy = xy[1] - seed[1];
                if (dx * dx + dy * dy).sqrt() < half_exclusion {
                    continue 'attempt;
                }
            }
            return Some(xy);
        }
        None
    }

    // order in which tips advance within one virtual step
    fn tip_order(&self, fractures: &[Macrofracture]) -> Vec<usize> {
        let active = |f: &Macrofracture| f.is_active();
        match self.control.order {
            DFNPropagationOrder::BySet => {
                let max_set = fractures.iter().map(|f| f.set).max().unwrap_or(0);
                let mut order = Vec::new();
                for s in 0..=max_set {
                    for (i, f) in fractures.iter().enumerate() {
                        if f.set == s && active(f) {
                            order.push(i);
                        }
                    }
                }
                order
            }
            DFNPropagationOrder::ByNucleationTime => {
                let mut heap: BinaryHeap<Reverse<(OrderedTime, usize)>> = fractures
                    .iter()
                    .enumerate()
                    .filter(|&(_, f)| active(f))
                    .map(|(i, f)| Reverse((OrderedTime(f.nucleation_time), i)))
                    .collect();
                let mut order = Vec::with_capacity(heap.len());
                while let Some(Reverse((_, i))) = heap.pop() {
                    order.push(i);
                }
                order
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_half(
        &self,
        cells: &[CellInfo],
        rates: &[Vec<f64>],
        fractures: &[Macrofracture],
        segments_by_cell: &[Vec<SegKey>],
        fi: usize,
        half: usize,
        dt: f64,
    ) -> Option<AdvancePlan> {
        let fracture = &fractures[fi];
        let h = &fracture.halves[half];
        let (mut cell_rc, mut set, mut pos) = match h.segments.last() {
            Some(seg) => (seg.cell, seg.set, seg.to_xy),
            None => (fracture.nucleation_cell, fracture.set, fracture.nucleation_xy),
        };
        let mut dir = h.dir;
        let mut time_left = dt;
        let mut plan = AdvancePlan {
            new_segments: Vec::new(),
            state: TipState::Propagating,
            dir,
        };
        let max_crossings = self.grid.rows() + self.grid.cols() + 4;

        for _ in 0..max_crossings {
            let ci = self.cell_index(cell_rc.0, cell_rc.1);
            let info = &cells[ci];
            let rate = rates[ci].get(set).copied().unwrap_or(0.0);
            let stride = rate * time_left;
            if stride <= NUDGE {
                break;
            }
            let proposed = [pos[0] + dir[0] * stride, pos[1] + dir[1] * stride];

            let event = self.earliest_event(
                info, ci, fractures, segments_by_cell, fi, pos, proposed, dir, stride,
            );
            match event {
                None => {
                    plan.new_segments
                        .push(self.make_segment(info, cell_rc, set, pos, proposed));
                    time_left = 0.0;
                    break;
                }
                Some(Event::Intersect { s }) => {
                    let point = [pos[0] + dir[0] * s, pos[1] + dir[1] * s];
                    plan.new_segments
                        .push(self.make_segment(info, cell_rc, set, pos, point));
                    plan.state = TipState::Intersected;
                    break;
                }
                Some(Event::Shadow { s, target }) => {
                    let entry = [pos[0] + dir[0] * s, pos[1] + dir[1] * s];
                    plan.new_segments
                        .push(self.make_segment(info, cell_rc, set, pos, entry));
                    if self.control.link_stress_shadows {
                        // relay to the nearest end of the capturing segment
                        let seg = &fractures[target.frac].halves[target.half].segments[target.seg];
                        let d_from = dist2(entry, seg.from_xy);
                        let d_to = dist2(entry, seg.to_xy);
                        let link_to = if d_from < d_to { seg.from_xy } else { seg.to_xy };
                        let mut relay = self.make_segment(info, cell_rc, set, entry, link_to);
                        relay.relay = true;
                        plan.new_segments.push(relay);
                        plan.state = TipState::Relayed;
                    } else {
                        plan.state = TipState::ShadowTerminated;
                    }
                    break;
                }
                Some(Event::Exit { s, dir: edge }) => {
                    let exit = [pos[0] + dir[0] * s, pos[1] + dir[1] * s];
                    plan.new_segments
                        .push(self.make_segment(info, cell_rc, set, pos, exit));
                    time_left -= s / rate;
                    match self.grid.neighbor(cell_rc.0, cell_rc.1, edge) {
                        None => {
                            if self.control.crop_at_boundary {
                                plan.state = TipState::Cropped;
                            } else {
                                // let the tip run out its remaining growth
                                // beyond the grid, then stop for good
                                let overshoot = rate * time_left;
                                if overshoot > NUDGE {
                                    let out = [
                                        exit[0] + dir[0] * overshoot,
                                        exit[1] + dir[1] * overshoot,
                                    ];
                                    plan.new_segments
                                        .push(self.make_segment(info, cell_rc, set, exit, out));
                                }
                                plan.state = TipState::BoundaryTerminated;
                            }
                            break;
                        }
                        Some((nr, nc)) => {
                            let nci = self.cell_index(nr, nc);
                            let ninfo = &cells[nci];
                            // continue in the set minimising azimuth mismatch
                            let current_azimuth = dir[0].atan2(dir[1]);
                            let mut best: Option<(usize, f64)> = None;
                            for (k, s_info) in ninfo.sets.iter().enumerate() {
                                let mismatch = crate::geometry::strike_difference(
                                    current_azimuth,
                                    s_info.strike,
                                );
                                if best.map_or(true, |(_, m)| mismatch < m) {
                                    best = Some((k, mismatch));
                                }
                            }
                            match best {
                                Some((k, mismatch))
                                    if mismatch <= self.control.max_consistency_angle =>
                                {
                                    let new_dir = azimuth_direction(ninfo.sets[k].strike);
                                    let dot = new_dir[0] * dir[0] + new_dir[1] * dir[1];
                                    dir = if dot >= 0.0 {
                                        new_dir
                                    } else {
                                        [-new_dir[0], -new_dir[1]]
                                    };
                                    plan.dir = dir;
                                    set = k;
                                    cell_rc = (nr, nc);
                                    pos = [exit[0] + dir[0] * NUDGE, exit[1] + dir[1] * NUDGE];
                                }
                                _ => {
                                    plan.state = TipState::BoundaryTerminated;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        if plan.new_segments.is_empty() && plan.state == TipState::Propagating {
            None
        } else {
            Some(plan)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn earliest_event(
        &self,
        info: &CellInfo,
        ci: usize,
        fractures: &[Macrofracture],
        segments_by_cell: &[Vec<SegKey>],
        fi: usize,
        pos: [f64; 2],
        proposed: [f64; 2],
        dir: [f64; 2],
        stride: f64,
    ) -> Option<Event> {
        let mut best: Option<Event> = None;
        let mut consider = |event: Event| {
            if best.as_ref().map_or(true, |b| event.s() < b.s()) {
                best = Some(event);
            }
        };

        for key in &segments_by_cell[ci] {
            if key.frac == fi {
                continue;
            }
            let seg = &fractures[key.frac].halves[key.half].segments[key.seg];
            let len = seg.length();
            if len < NUDGE {
                continue;
            }
            let sdir = [
                (seg.to_xy[0] - seg.from_xy[0]) / len,
                (seg.to_xy[1] - seg.from_xy[1]) / len,
            ];
            let cross = (dir[0] * sdir[1] - dir[1] * sdir[0]).abs();
            let angle = cross.asin();
            if angle > PARALLEL_ANGLE {
                // 5. oblique: terminate at the crossing point
                if let Some((t, _)) =
                    segment_intersection(pos, proposed, seg.from_xy, seg.to_xy)
                {
                    let s = t * stride;
                    if s > NUDGE {
                        consider(Event::Intersect { s });
                    }
                }
            } else {
                // 4. parallel: stress-shadow capture. The perpendicular
                // offset stays ~constant along the advance, so capture
                // happens where lateral overlap with the segment begins
                let width = 0.5 * info.sets[seg.set].shadow_width;
                let a_from = (seg.from_xy[0] - pos[0]) * dir[0] + (seg.from_xy[1] - pos[1]) * dir[1];
                let a_to = (seg.to_xy[0] - pos[0]) * dir[0] + (seg.to_xy[1] - pos[1]) * dir[1];
                let lo = a_from.min(a_to);
                let hi = a_from.max(a_to);
                if hi <= NUDGE {
                    continue;
                }
                let line_offset = {
                    // distance from pos to the infinite line through seg
                    let nx = -sdir[1];
                    let ny = sdir[0];
                    ((pos[0] - seg.from_xy[0]) * nx + (pos[1] - seg.from_xy[1]) * ny).abs()
                };
                if line_offset < width {
                    let entry = lo.max(NUDGE);
                    if entry <= stride {
                        consider(Event::Shadow {
                            s: entry,
                            target: *key,
                        });
                    }
                }
            }
        }

        // 3./6. cell boundary
        let p0 = info.frame.to_local(pos);
        let p1 = info.frame.to_local(proposed);
        if let Some((t, edge)) = info.frame.exit_crossing(p0, p1) {
            consider(Event::Exit {
                s: t * stride,
                dir: edge,
            });
        }

        best
    }

    fn make_segment(
        &self,
        info: &CellInfo,
        cell: (usize, usize),
        set: usize,
        from_xy: [f64; 2],
        to_xy: [f64; 2],
    ) -> MacrofractureSegment {
        MacrofractureSegment {
            cell,
            set,
            from_ij: info.frame.to_local(from_xy),
            to_ij: info.frame.to_local(to_xy),
            from_xy,
            to_xy,
            relay: false,
        }
    }

    fn apply_plan(
        &self,
        fractures: &mut [Macrofracture],
        segments_by_cell: &mut [Vec<SegKey>],
        fi: usize,
        half: usize,
        plan: AdvancePlan,
    ) {
        let h = &mut fractures[fi].halves[half];
        h.state = plan.state;
        h.dir = plan.dir;
        for seg in plan.new_segments {
            let ci = self.cell_index(seg.cell.0, seg.cell.1);
            let key = SegKey {
                frac: fi,
                half,
                seg: h.segments.len(),
            };
            h.segments.push(seg);
            segments_by_cell[ci].push(key);
        }
    }

    // 7. explicit microfractures from the surviving implicit population
    fn emit_microfractures(
        &self,
        cells: &[CellInfo],
        rngs: &mut [Pcg64Mcg],
        segments_by_cell: &[Vec<SegKey>],
        fractures: &[Macrofracture],
        network: &mut DiscreteFractureNetwork,
    ) {
        let r_cut = self.control.min_explicit_microfracture_radius;
        if r_cut <= 0.0 {
            return;
        }
        for (ci, info) in cells.iter().enumerate() {
            let cell = self.grid.cell(info.row, info.col);
            for (k, set) in cell.sets.iter().enumerate() {
                for dipset in &set.dipsets {
                    let n = dipset.series.timestep_count();
                    if n == 0 {
                        continue;
                    }
                    let r_max = 0.5 * dipset.layer_thickness();
                    if r_cut >= r_max {
                        continue;
                    }
                    let density = dipset.microfracture_density_above(r_cut, n);
                    let lambda = density * info.volume;
                    if lambda <= 0.0 {
                        continue;
                    }
                    let count = if self.control.nucleation_mode.probabilistic(lambda) {
                        match Poisson::new(lambda) {
                            Ok(p) => p.sample(&mut rngs[ci]) as usize,
                            Err(_) => 0,
                        }
                    } else {
                        lambda.round() as usize
                    };
                    let c_exp = dipset.size_exponent();
                    for _ in 0..count {
                        let xy = match self.sample_clear_position(
                            info,
                            k,
                            &mut rngs[ci],
                            fractures,
                            &segments_by_cell[ci],
                            &[],
                        ) {
                            Some(xy) => xy,
                            None => continue,
                        };
                        // truncated power-law radius between the cutoff and
                        // the half layer thickness
                        let u: f64 = rngs[ci].gen_range(0.0..1.0);
                        let lo = r_cut.powf(-c_exp);
                        let hi = r_max.powf(-c_exp);
                        let radius = (u * (lo - hi) + hi).powf(-1.0 / c_exp);
                        let ij = info.frame.to_local(xy);
                        let z = 0.5
                            * (info.frame.top_depth_at(ij) + info.frame.bottom_depth_at(ij));
                        network.microfractures.push(MicrofractureDisk {
                            cell: (info.row, info.col),
                            set: k,
                            center: PointXYZ::new(xy[0], xy[1], z),
                            radius,
                        });
                    }
                }
            }
        }
    }
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}
