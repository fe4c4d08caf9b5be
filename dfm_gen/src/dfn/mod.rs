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

//! Explicit Discrete Fracture Network primitives and controls

mod builder;

pub use builder::DFNBuilder;

use crate::geometry::PointXYZ;

/// State of a half-macrofracture tip
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TipState {
    /// Still propagating
    Propagating,
    /// Stopped at a cell or grid boundary (no consistent set to continue
    /// into, or the outer boundary with cropping disabled)
    BoundaryTerminated,
    /// Clipped at the outer grid boundary
    Cropped,
    /// Entered the stress shadow of a parallel fracture
    ShadowTerminated,
    /// Linked to a parallel fracture by a relay segment
    Relayed,
    /// Crossed an oblique fracture and stopped there
    Intersected,
}

impl TipState {
    pub fn is_terminal(&self) -> bool {
        *self != TipState::Propagating
    }
}

/// One straight piece of a half-macrofracture within a single cell.
///
/// End points are stored both in cell-local IJ coordinates (metric
/// distances along the cell edges) and in the global plan-view frame.
#[derive(Clone, Debug)]
pub struct MacrofractureSegment {
    pub cell: (usize, usize),
    /// Index of the fracture set within the cell
    pub set: usize,
    pub from_ij: [f64; 2],
    pub to_ij: [f64; 2],
    pub from_xy: [f64; 2],
    pub to_xy: [f64; 2],
    /// True for relay segments inserted by stress-shadow linking
    pub relay: bool,
}

impl MacrofractureSegment {
    pub fn length(&self) -> f64 {
        let dx = self.to_xy[0] - self.from_xy[0];
        let dy = self.to_xy[1] - self.from_xy[1];
        (dx * dx + dy * dy).sqrt()
    }
}

/// One half of a macrofracture: the chain of segments grown from the
/// nucleation point towards one tip
#[derive(Clone, Debug)]
pub struct HalfMacrofracture {
    pub segments: Vec<MacrofractureSegment>,
    pub state: TipState,
    /// Current unit propagation direction in the global plan-view frame
    pub dir: [f64; 2],
}

impl HalfMacrofracture {
    pub fn tip_xy(&self, nucleation: [f64; 2]) -> [f64; 2] {
        self.segments
            .last()
            .map(|s| s.to_xy)
            .unwrap_or(nucleation)
    }

    pub fn length(&self) -> f64 {
        self.segments.iter().map(|s| s.length()).sum()
    }
}

/// A layer-bound macrofracture tracked as two half-fractures growing from
/// a common nucleation point
#[derive(Clone, Debug)]
pub struct Macrofracture {
    pub set: usize,
    pub nucleation_cell: (usize, usize),
    pub nucleation_xy: [f64; 2],
    pub nucleation_time: f64,
    pub halves: [HalfMacrofracture; 2],
}

impl Macrofracture {
    pub fn total_length(&self) -> f64 {
        self.halves.iter().map(|h| h.length()).sum()
    }

    pub fn is_active(&self) -> bool {
        self.halves.iter().any(|h| h.state == TipState::Propagating)
    }
}

/// An explicit microfracture: a disk in the fracture plane, optionally
/// polygonised on output
#[derive(Clone, Debug)]
pub struct MicrofractureDisk {
    pub cell: (usize, usize),
    pub set: usize,
    pub center: PointXYZ,
    pub radius: f64,
}

/// The explicit DFN produced after the implicit phase
#[derive(Clone, Debug, Default)]
pub struct DiscreteFractureNetwork {
    pub macrofractures: Vec<Macrofracture>,
    pub microfractures: Vec<MicrofractureDisk>,
    /// Number of points used when polygonising microfractures (0 = disks)
    pub n_uf_points: usize,
}

/// Probabilistic nucleation control: below the limit the per-step count is
/// drawn from a Poisson distribution, above it the deterministic rounded
/// count is used. Automatic resolves the limit to one event per step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NucleationMode {
    Automatic,
    Threshold(f64),
}

impl NucleationMode {
    pub fn probabilistic(&self, lambda: f64) -> bool {
        match self {
            NucleationMode::Automatic => lambda < 1.0,
            NucleationMode::Threshold(limit) => lambda < *limit,
        }
    }
}

/// Order in which live tips are advanced within a virtual timestep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DFNPropagationOrder {
    /// Cheaper: set by set
    BySet,
    /// Unbiased between sets: a global priority queue keyed on nucleation
    /// time
    ByNucleationTime,
}

/// Controls for explicit DFN construction
#[derive(Clone, Debug)]
pub struct DFNControl {
    pub generate: bool,
    pub crop_at_boundary: bool,
    pub link_stress_shadows: bool,
    /// Maximum azimuth mismatch when handing a tip to a neighbour cell [rad]
    pub max_consistency_angle: f64,
    /// Microfractures below this radius stay implicit; non-positive
    /// disables explicit microfractures entirely
    pub min_explicit_microfracture_radius: f64,
    /// Points per microfracture polygon; 0 emits disks
    pub n_uf_points: usize,
    pub nucleation_mode: NucleationMode,
    pub order: DFNPropagationOrder,
    /// Reserved filter; parsed and stored but not applied
    pub min_macrofracture_length: f64,
}

impl Default for DFNControl {
    fn default() -> Self {
        DFNControl {
            generate: false,
            crop_at_boundary: true,
            link_stress_shadows: false,
            max_consistency_angle: std::f64::consts::FRAC_PI_4,
            min_explicit_microfracture_radius: 0.0,
            n_uf_points: 0,
            nucleation_mode: NucleationMode::Automatic,
            order: DFNPropagationOrder::BySet,
            min_macrofracture_length: 0.0,
        }
    }
}
