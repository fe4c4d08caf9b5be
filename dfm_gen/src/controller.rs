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

//! Per-cell outer loop: timestep selection, termination, snapshots

use log::warn;

use crate::cell::GridblockCell;
use crate::progress::ProgressReporter;

/// Fallback timestep (1000 years) when neither the MFP33 target nor the
/// maximum duration bounds the step
const FALLBACK_TIMESTEP: f64 = 3.15576e10;

/// How applied stresses are redistributed by existing fractures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StressDistribution {
    /// Stress is shared evenly; no stress shadows
    EvenlyDistributedStress,
    /// Fractures cast stress shadows suppressing parallel growth
    StressShadow,
    /// Reserved; currently behaves as StressShadow
    DuctileBoundary,
}

/// Three-state flag whose Automatic value is resolved from the model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutomaticFlag {
    Automatic,
    On,
    Off,
}

impl AutomaticFlag {
    pub fn resolve(&self, automatic_value: bool) -> bool {
        match self {
            AutomaticFlag::Automatic => automatic_value,
            AutomaticFlag::On => true,
            AutomaticFlag::Off => false,
        }
    }
}

/// When to take intermediate density snapshots within an episode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntermediateOutputControl {
    ByTime,
    ByArea,
    EpisodeEnd,
}

/// Calculation controls for the implicit fracture evolution
#[derive(Clone, Debug)]
pub struct PropagationControl {
    /// Maximum timesteps per deformation episode
    pub max_timesteps: usize,
    /// Maximum timestep duration [s]; non-positive disables the bound
    pub max_timestep_duration: f64,
    /// Target upper bound on the MFP33 increase per timestep
    pub max_mfp33_increase: f64,
    /// Stop when active/peak MFP33 falls below this; negative disables
    pub historic_mfp33_termination_ratio: f64,
    /// Stop when active/total MFP30 falls below this; negative disables
    pub active_total_mfp30_termination_ratio: f64,
    /// Stop when the all-sets clear-zone volume falls below this
    pub minimum_clear_zone_volume: f64,
    /// a_MFP30/peak ratio below which a dip set turns ResidualActive
    pub residual_active_ratio: f64,
    pub stress_distribution: StressDistribution,
    /// Fabric anisotropy above which the isotropic exclusion-zone
    /// approximation is used
    pub anisotropy_cutoff: f64,
    /// Whether nucleating microfractures see other sets' shadows;
    /// Automatic resolves to true for more than two sets
    pub check_all_uf_stress_shadows: AutomaticFlag,
    /// Number of intermediate snapshot points per episode
    pub intermediate_outputs: usize,
    pub intermediate_control: IntermediateOutputControl,
}

impl Default for PropagationControl {
    fn default() -> Self {
        PropagationControl {
            max_timesteps: 1000,
            max_timestep_duration: -1.0,
            max_mfp33_increase: 2e-4,
            historic_mfp33_termination_ratio: 0.01,
            active_total_mfp30_termination_ratio: -1.0,
            minimum_clear_zone_volume: 1e-4,
            residual_active_ratio: 0.5,
            stress_distribution: StressDistribution::StressShadow,
            anisotropy_cutoff: 1.0,
            check_all_uf_stress_shadows: AutomaticFlag::Automatic,
            intermediate_outputs: 0,
            intermediate_control: IntermediateOutputControl::EpisodeEnd,
        }
    }
}

/// Outcome of one cell's implicit run
#[derive(Clone, Copy, Debug)]
pub struct CellRunSummary {
    pub timesteps: usize,
    pub end_time: f64,
    pub cancelled: bool,
}

/// Drives a cell through its deformation episodes
pub struct PropagationController<'a> {
    pub control: &'a PropagationControl,
    pub progress: &'a dyn ProgressReporter,
}

impl<'a> PropagationController<'a> {
    pub fn new(control: &'a PropagationControl, progress: &'a dyn ProgressReporter) -> Self {
        PropagationController { control, progress }
    }

    /// Run every deformation episode of one cell to completion
    pub fn run_cell(&self, cell: &mut GridblockCell) -> CellRunSummary {
        let control = self.control;
        let check_all = control
            .check_all_uf_stress_shadows
            .resolve(cell.no_fracture_sets() > 2);
        let episodes = cell.episodes.clone();
        let mut time = 0.0;
        let mut total_steps = 0usize;
        let mut cancelled = false;

        'episodes: for episode in &episodes {
            cell.apply_episode_uplift(episode);
            let rates = cell.episode_rates(episode);
            let mut episode_time = 0.0;
            let mut episode_steps = 0usize;
            let mut warned_partial = false;

            // intermediate snapshot schedule
            let snap_interval = if control.intermediate_outputs > 0
                && control.intermediate_control == IntermediateOutputControl::ByTime
                && !episode.is_indefinite()
            {
                episode.duration / (control.intermediate_outputs as f64 + 1.0)
            } else {
                f64::INFINITY
            };
            let mut next_snap = snap_interval;
            let mut area_quanta = self.area_quanta(cell);

            loop {
                if self.progress.is_cancelled() {
                    cancelled = true;
                    break 'episodes;
                }
                if episode_steps >= control.max_timesteps {
                    break;
                }
                if !episode.is_indefinite() && episode_time >= episode.duration * (1.0 - 1e-12) {
                    break;
                }
                if cell.no_fracture_sets() == 0 || cell.all_sets_deactivated() {
                    break;
                }
                if control.historic_mfp33_termination_ratio >= 0.0 {
                    if let Some(ratio) = cell.active_peak_mfp33_ratio() {
                        if ratio < control.historic_mfp33_termination_ratio {
                            break;
                        }
                    }
                }
                if control.active_total_mfp30_termination_ratio >= 0.0 {
                    if let Some(ratio) = cell.active_total_mfp30_ratio() {
                        if ratio < control.active_total_mfp30_termination_ratio {
                            break;
                        }
                    }
                }
                if cell.min_clear_zone_volume() < control.minimum_clear_zone_volume {
                    break;
                }

                // 3. optimum timestep duration, clamped. With nothing to
                // constrain the step (no active fractures yet) the episode
                // is resolved into MaxTimesteps slices so load changes are
                // still tracked.
                let fallback = if episode.is_indefinite() {
                    FALLBACK_TIMESTEP
                } else {
                    episode.duration / control.max_timesteps.max(1) as f64
                };
                let optimum = cell.optimum_timestep(episode, control.max_mfp33_increase);
                let mut dt = optimum.unwrap_or(fallback);
                if control.max_timestep_duration > 0.0 && dt > control.max_timestep_duration {
                    if !warned_partial && optimum.is_some() {
                        warn!(
                            "cell ({},{}): MFP33 step target unreachable within the maximum \
                             timestep duration, accepting partial steps",
                            cell.row, cell.col
                        );
                        warned_partial = true;
                    }
                    dt = control.max_timestep_duration;
                }
                if !episode.is_indefinite() {
                    dt = dt.min(episode.duration - episode_time);
                }
                if !dt.is_finite() || dt <= 0.0 {
                    dt = FALLBACK_TIMESTEP;
                }

                cell.advance_timestep(
                    time,
                    dt,
                    episode,
                    &rates,
                    control.stress_distribution,
                    check_all,
                    control.anisotropy_cutoff,
                    control.minimum_clear_zone_volume,
                );
                time += dt;
                episode_time += dt;
                episode_steps += 1;
                total_steps += 1;

                // 4. intermediate snapshots
                if episode_time >= next_snap {
                    cell.take_snapshot(time);
                    next_snap += snap_interval;
                }
                if control.intermediate_control == IntermediateOutputControl::ByArea {
                    let quanta = self.area_quanta(cell);
                    if quanta > area_quanta {
                        cell.take_snapshot(time);
                        area_quanta = quanta;
                    }
                }
            }
            cell.take_snapshot(time);
        }

        CellRunSummary {
            timesteps: total_steps,
            end_time: time,
            cancelled,
        }
    }

    // cumulative fracture area in units of the cell plan area
    fn area_quanta(&self, cell: &GridblockCell) -> u64 {
        let total_area: f64 = cell
            .sets
            .iter()
            .map(|s| s.total_MFP32() * cell.volume)
            .sum();
        if cell.area > 0.0 {
            (total_area / cell.area).floor().max(0.0) as u64
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellInit, MechanicalProperties};
    use crate::episode::{DeformationEpisode, TimeUnits};
    use crate::fracture_set::ApertureModel;
    use crate::progress::NullProgressReporter;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn uniaxial_cell(n_sets: usize, duration_ma: f64) -> GridblockCell {
        let ma = TimeUnits::Ma.seconds();
        let episode = DeformationEpisode {
            ehmin_azimuth: 0.0,
            ehmin_rate: -0.01 / ma,
            ehmax_rate: 0.0,
            overpressure_rate: 0.0,
            temperature_rate: 0.0,
            uplift_rate: 0.0,
            stress_arching: 0.0,
            duration: duration_ma * ma,
        };
        GridblockCell::new(
            0,
            0,
            CellInit {
                thickness: 1.0,
                area: 400.0,
                depth: 2000.0,
                mech: MechanicalProperties::default(),
                episodes: vec![episode],
                n_fracture_sets: n_sets,
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
                rng_seed: 1,
            },
        )
    }

    #[test]
    fn uniaxial_run_terminates_with_fractures() {
        let control = PropagationControl::default();
        let progress = NullProgressReporter;
        let controller = PropagationController::new(&control, &progress);
        let mut cell = uniaxial_cell(1, 5.0);
        let summary = controller.run_cell(&mut cell);
        assert!(!summary.cancelled);
        assert!(summary.timesteps > 0);
        assert!(cell.sets[0].total_MFP30() > 0.0);
        // the run must have driven the population towards quiescence
        let ratio = cell.active_peak_mfp33_ratio().unwrap();
        assert!(
            ratio < control.historic_mfp33_termination_ratio,
            "active/peak ratio {} did not fall below the termination ratio",
            ratio
        );
        // the mode that accumulated the displacement has been driven most of
        // the way to extinction
        let cum_phi = cell.sets[0]
            .dipsets
            .iter()
            .max_by(|a, b| {
                a.series
                    .last()
                    .total_MFP30
                    .total_cmp(&b.series.last().total_MFP30)
            })
            .unwrap()
            .series
            .last()
            .cum_phi;
        assert!(cum_phi < 0.5, "cum_phi = {}", cum_phi);
    }

    #[test]
    fn zero_sets_produce_no_fracture_data() {
        let control = PropagationControl::default();
        let progress = NullProgressReporter;
        let controller = PropagationController::new(&control, &progress);
        let mut cell = uniaxial_cell(0, 5.0);
        let summary = controller.run_cell(&mut cell);
        assert_eq!(summary.timesteps, 0);
        assert!(cell.sets.is_empty());
    }

    #[test]
    fn cancellation_stops_between_timesteps() {
        struct CancelAfter {
            polls: AtomicUsize,
            flag: AtomicBool,
        }
        impl ProgressReporter for CancelAfter {
            fn report(&self, _: usize, _: usize) {}
            fn is_cancelled(&self) -> bool {
                if self.polls.fetch_add(1, Ordering::SeqCst) >= 3 {
                    self.flag.store(true, Ordering::SeqCst);
                }
                self.flag.load(Ordering::SeqCst)
            }
        }
        let control = PropagationControl::default();
        let progress = CancelAfter {
            polls: AtomicUsize::new(0),
            flag: AtomicBool::new(false),
        };
        let controller = PropagationController::new(&control, &progress);
        let mut cell = uniaxial_cell(1, 5.0);
        let summary = controller.run_cell(&mut cell);
        assert!(summary.cancelled);
        assert_eq!(summary.timesteps, 3);
        // the last appended record is intact
        let series = &cell.sets[0].dipsets[0].series;
        assert_eq!(series.timestep_count(), 3);
    }

    #[test]
    fn intermediate_snapshots_by_time() {
        let mut control = PropagationControl::default();
        control.intermediate_outputs = 4;
        control.intermediate_control = IntermediateOutputControl::ByTime;
        // keep the run alive for the whole episode
        control.historic_mfp33_termination_ratio = -1.0;
        control.minimum_clear_zone_volume = 0.0;
        let progress = NullProgressReporter;
        let controller = PropagationController::new(&control, &progress);
        let mut cell = uniaxial_cell(1, 0.5);
        controller.run_cell(&mut cell);
        // intermediate points plus the episode end
        assert!(cell.snapshots.len() >= 2);
        for pair in cell.snapshots.windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }
    }
}
