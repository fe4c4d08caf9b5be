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

//! Oriented fracture sets: dip-set grouping, aperture models, mode selection

use crate::cell::MechanicalProperties;
use crate::dipset::{FractureDipSet, FractureMode};
use crate::helpers::blend_by_angle;
use crate::timestep::EvolutionStage;

/// Fracture aperture model. A single entry point computes the aperture from
/// the representative half-length and the current effective normal stress.
#[derive(Clone, Copy, Debug)]
pub enum ApertureModel {
    /// Constant aperture [m]
    Uniform { aperture: f64 },
    /// Aperture proportional to fracture half-length
    SizeDependent { multiplier: f64 },
    /// Aperture proportional to half-length and effective normal tension;
    /// the compliance is in 1/Pa
    Dynamic { compliance: f64 },
    /// Barton-Bandis joint closure model
    BartonBandis {
        jrc: f64,
        ucs_ratio: f64,
        initial_normal_stress: f64,
        normal_stiffness: f64,
        max_closure: f64,
    },
}

impl ApertureModel {
    /// Aperture [m] for a fracture of the given half-length under the given
    /// effective normal stress (positive = compressive)
    pub fn aperture(&self, half_length: f64, normal_stress: f64) -> f64 {
        match *self {
            ApertureModel::Uniform { aperture } => aperture,
            ApertureModel::SizeDependent { multiplier } => multiplier * half_length,
            ApertureModel::Dynamic { compliance } => {
                compliance * half_length * (-normal_stress).max(0.0)
            }
            ApertureModel::BartonBandis {
                jrc,
                ucs_ratio,
                initial_normal_stress,
                normal_stiffness,
                max_closure,
            } => {
                // initial mechanical aperture from joint roughness (mm → m)
                let e0 = (jrc / 5.0) * (0.2 * ucs_ratio - 0.1) * 1e-3;
                let closure = |sn: f64| {
                    let sn = sn.max(0.0);
                    if normal_stiffness <= 0.0 || max_closure <= 0.0 {
                        0.0
                    } else {
                        (sn / (normal_stiffness + sn / max_closure)).min(max_closure)
                    }
                };
                let dv = closure(normal_stress) - closure(initial_normal_stress);
                (e0 - dv).max(0.0)
            }
        }
    }
}

/// A sub-population of fractures sharing an azimuth.
///
/// Holds one dip set per displacement mode (Mode 1 dilatant and Mode 2
/// shear, unless a single mode is forced), the aperture control parameters
/// for the hmin and hmax directions, and the cross-dipset tie-breaking.
pub struct FractureSet {
    /// Azimuth of the set normal (radians clockwise from north)
    pub normal_azimuth: f64,
    pub dipsets: Vec<FractureDipSet>,
    aperture_hmin: ApertureModel,
    aperture_hmax: ApertureModel,
}

impl FractureSet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        normal_azimuth: f64,
        mech: &MechanicalProperties,
        layer_thickness: f64,
        start_time: f64,
        residual_ratio: f64,
        forced_mode: Option<FractureMode>,
        aperture_hmin: ApertureModel,
        aperture_hmax: ApertureModel,
    ) -> Self {
        let dipsets = match forced_mode {
            Some(mode) => vec![FractureDipSet::new(
                mode,
                mech,
                layer_thickness,
                start_time,
                residual_ratio,
            )],
            None => vec![
                FractureDipSet::new(
                    FractureMode::Mode1,
                    mech,
                    layer_thickness,
                    start_time,
                    residual_ratio,
                ),
                FractureDipSet::new(
                    FractureMode::Mode2,
                    mech,
                    layer_thickness,
                    start_time,
                    residual_ratio,
                ),
            ],
        };
        FractureSet {
            normal_azimuth,
            dipsets,
            aperture_hmin,
            aperture_hmax,
        }
    }

    /// Strike azimuth: fractures of this set propagate along this direction
    pub fn strike_azimuth(&self) -> f64 {
        self.normal_azimuth + std::f64::consts::FRAC_PI_2
    }

    /// Index of the dip set that accumulates this timestep's displacement.
    ///
    /// Each dip set's driving stress is compared against its fracture-mode
    /// threshold (zero for both modes); the largest positive excess wins and
    /// ties go to the earlier (Mode 1) entry.
    pub fn select_growing(&self, driving_stresses: &[f64]) -> usize {
        debug_assert_eq!(driving_stresses.len(), self.dipsets.len());
        let mut winner = 0;
        let mut best = f64::NEG_INFINITY;
        for (i, &sd) in driving_stresses.iter().enumerate() {
            if sd > best {
                best = sd;
                winner = i;
            }
        }
        winner
    }

    /// Aperture for this set, blending the hmin and hmax parameter sets by
    /// the angle between the set normal and the hmin azimuth
    pub fn aperture(&self, half_length: f64, normal_stress: f64, hmin_azimuth: f64) -> f64 {
        let delta = self.normal_azimuth - hmin_azimuth;
        blend_by_angle(
            self.aperture_hmin.aperture(half_length, normal_stress),
            self.aperture_hmax.aperture(half_length, normal_stress),
            delta,
        )
    }

    /// Representative half-length of the active population [m]
    pub fn mean_half_length(&self) -> f64 {
        let a30: f64 = self.dipsets.iter().map(|d| d.series.last().a_MFP30).sum();
        let a32: f64 = self.dipsets.iter().map(|d| d.series.last().a_MFP32).sum();
        let h = self
            .dipsets
            .first()
            .map(|d| d.layer_thickness())
            .unwrap_or(1.0);
        if a30 > 0.0 && h > 0.0 {
            a32 / (a30 * h)
        } else {
            0.0
        }
    }

    pub fn is_deactivated(&self) -> bool {
        self.dipsets
            .iter()
            .all(|d| d.stage() == EvolutionStage::Deactivated)
    }

    #[allow(non_snake_case)]
    pub fn a_MFP30(&self) -> f64 {
        self.dipsets.iter().map(|d| d.series.last().a_MFP30).sum()
    }

    #[allow(non_snake_case)]
    pub fn total_MFP30(&self) -> f64 {
        self.dipsets
            .iter()
            .map(|d| d.series.last().total_MFP30)
            .sum()
    }

    #[allow(non_snake_case)]
    pub fn a_MFP32(&self) -> f64 {
        self.dipsets.iter().map(|d| d.series.last().a_MFP32).sum()
    }

    #[allow(non_snake_case)]
    pub fn total_MFP32(&self) -> f64 {
        self.dipsets
            .iter()
            .map(|d| d.series.last().total_MFP32)
            .sum()
    }

    #[allow(non_snake_case)]
    pub fn a_MFP33(&self) -> f64 {
        self.dipsets.iter().map(|d| d.series.last().a_MFP33).sum()
    }

    #[allow(non_snake_case)]
    pub fn total_MFP33(&self) -> f64 {
        self.dipsets
            .iter()
            .map(|d| d.series.last().total_MFP33)
            .sum()
    }

    #[allow(non_snake_case)]
    pub fn peak_a_MFP33(&self) -> f64 {
        self.dipsets.iter().map(|d| d.peak_a_mfp33()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_and_size_dependent_apertures() {
        let u = ApertureModel::Uniform { aperture: 5e-4 };
        assert_eq!(u.aperture(10.0, 1e7), 5e-4);
        let s = ApertureModel::SizeDependent { multiplier: 1e-4 };
        assert!((s.aperture(10.0, 1e7) - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn dynamic_aperture_closes_under_compression() {
        let d = ApertureModel::Dynamic { compliance: 1e-10 };
        assert_eq!(d.aperture(10.0, 1e6), 0.0);
        assert!((d.aperture(10.0, -1e6) - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn barton_bandis_closure() {
        let bb = ApertureModel::BartonBandis {
            jrc: 10.0,
            ucs_ratio: 2.0,
            initial_normal_stress: 1e6,
            normal_stiffness: 1e10,
            max_closure: 2e-4,
        };
        let e0 = (10.0 / 5.0) * (0.2 * 2.0 - 0.1) * 1e-3;
        // at the initial normal stress the aperture equals e0
        assert!((bb.aperture(1.0, 1e6) - e0).abs() < 1e-12);
        // higher stress closes the joint
        assert!(bb.aperture(1.0, 5e7) < e0);
        // closure saturates at the maximum
        assert!(bb.aperture(1.0, 1e12) >= e0 - 2e-4 - 1e-12);
    }

    #[test]
    fn mode_selection_prefers_largest_excess() {
        let mech = MechanicalProperties::default();
        let set = FractureSet::new(
            0.0,
            &mech,
            1.0,
            0.0,
            0.5,
            None,
            ApertureModel::Uniform { aperture: 5e-4 },
            ApertureModel::Uniform { aperture: 5e-4 },
        );
        assert_eq!(set.dipsets.len(), 2);
        assert_eq!(set.select_growing(&[2e6, 1e6]), 0);
        assert_eq!(set.select_growing(&[-1e6, 1e6]), 1);
        // tie goes to Mode 1
        assert_eq!(set.select_growing(&[1e6, 1e6]), 0);
    }

    #[test]
    fn forced_mode_yields_a_single_dipset() {
        let mech = MechanicalProperties::default();
        let set = FractureSet::new(
            0.0,
            &mech,
            1.0,
            0.0,
            0.5,
            Some(FractureMode::Mode1),
            ApertureModel::Uniform { aperture: 5e-4 },
            ApertureModel::Uniform { aperture: 5e-4 },
        );
        assert_eq!(set.dipsets.len(), 1);
    }
}
