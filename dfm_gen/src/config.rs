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

//! Configuration input: the line-oriented model file, per-cell overrides,
//! include files and the commented template
//!
//! Comment lines begin with `%`. Each non-comment line is
//! `KEY value [value …]`; keys that describe deformation episodes accept a
//! list with one value per episode. A `Gridblock C R` / `End Gridblock`
//! pair collects per-cell overrides, and `Include <file>` loads a
//! property-array file whose `#KEY [episode]` blocks carry row-major cell
//! values (`NA` retains the default) and whose `#Geometry` block carries
//! six floats per pillar. Unknown keys and malformed values warn and are
//! skipped; parsing always continues.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;

use crate::cell::{CellInit, MechanicalProperties};
use crate::controller::{
    AutomaticFlag, IntermediateOutputControl, PropagationControl, StressDistribution,
};
use crate::dfn::{DFNControl, DFNPropagationOrder, NucleationMode};
use crate::dipset::FractureMode;
use crate::episode::{DeformationEpisode, TimeUnits};
use crate::error::DfmError;
use crate::fracture_set::ApertureModel;
use crate::grid::{regular_pillars, FractureGrid, GeometryValidation};
use crate::cell::GridblockCell;

/// Default configuration file name when no CLI argument is given
pub const DEFAULT_CONFIG_FILENAME: &str = "DFMGenerator_configuration.txt";

const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Explicit DFN output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DfnFileType {
    Ascii,
    Fab,
}

/// Aperture model selector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApertureKind {
    Uniform,
    SizeDependent,
    Dynamic,
    BartonBandis,
}

/// A parameter with separate values for the hmin and hmax directions
#[derive(Clone, Copy, Debug)]
pub struct AperturePair {
    pub hmin: f64,
    pub hmax: f64,
}

impl AperturePair {
    fn new(v: f64) -> Self {
        AperturePair { hmin: v, hmax: v }
    }

    fn assign(&mut self, values: &[f64]) {
        if let Some(&v) = values.first() {
            self.hmin = v;
            self.hmax = values.get(1).copied().unwrap_or(v);
        }
    }
}

/// All aperture-control parameters from the configuration
#[derive(Clone, Debug)]
pub struct ApertureSettings {
    pub kind: ApertureKind,
    pub uniform: AperturePair,
    pub size_multiplier: AperturePair,
    pub dynamic_multiplier: AperturePair,
    pub jrc: AperturePair,
    pub ucs_ratio: AperturePair,
    pub initial_normal_stress: AperturePair,
    pub normal_stiffness: AperturePair,
    pub max_closure: AperturePair,
}

impl Default for ApertureSettings {
    fn default() -> Self {
        ApertureSettings {
            kind: ApertureKind::Uniform,
            uniform: AperturePair::new(5e-4),
            size_multiplier: AperturePair::new(1e-5),
            dynamic_multiplier: AperturePair::new(1e-11),
            jrc: AperturePair::new(10.0),
            ucs_ratio: AperturePair::new(2.0),
            initial_normal_stress: AperturePair::new(2e5),
            normal_stiffness: AperturePair::new(2.5e9),
            max_closure: AperturePair::new(5e-4),
        }
    }
}

impl ApertureSettings {
    /// The hmin- and hmax-direction aperture models
    pub fn models(&self) -> (ApertureModel, ApertureModel) {
        let make = |hmin: bool| {
            let pick = |p: &AperturePair| if hmin { p.hmin } else { p.hmax };
            match self.kind {
                ApertureKind::Uniform => ApertureModel::Uniform {
                    aperture: pick(&self.uniform),
                },
                ApertureKind::SizeDependent => ApertureModel::SizeDependent {
                    multiplier: pick(&self.size_multiplier),
                },
                ApertureKind::Dynamic => ApertureModel::Dynamic {
                    compliance: pick(&self.dynamic_multiplier),
                },
                ApertureKind::BartonBandis => ApertureModel::BartonBandis {
                    jrc: pick(&self.jrc),
                    ucs_ratio: pick(&self.ucs_ratio),
                    initial_normal_stress: pick(&self.initial_normal_stress),
                    normal_stiffness: pick(&self.normal_stiffness),
                    max_closure: pick(&self.max_closure),
                },
            }
        };
        (make(true), make(false))
    }
}

/// Properties that may vary per cell. Time-dependent values are kept in
/// model time units until the grid is built.
#[derive(Clone, Debug)]
pub struct CellProperties {
    pub mech: MechanicalProperties,
    pub geothermal_gradient: f64,
    pub sediment_density: f64,
    pub fluid_density: f64,
    pub initial_overpressure: f64,
    pub initial_stress_relaxation: f64,
    pub n_fracture_sets: usize,
    /// Per-cell initial depth override [m]
    pub depth: Option<f64>,
    // per-episode load lists (azimuth in degrees, rates per model unit)
    pub ehmin_azi: Vec<f64>,
    pub ehmin_rate: Vec<f64>,
    pub ehmax_rate: Vec<f64>,
    pub overpressure_rate: Vec<f64>,
    pub temperature_rate: Vec<f64>,
    pub uplift_rate: Vec<f64>,
    pub stress_arching: Vec<f64>,
    pub durations: Vec<f64>,
}

impl Default for CellProperties {
    fn default() -> Self {
        CellProperties {
            mech: MechanicalProperties::default(),
            geothermal_gradient: 0.03,
            sediment_density: 2250.0,
            fluid_density: 1000.0,
            initial_overpressure: 0.0,
            initial_stress_relaxation: 1.0,
            n_fracture_sets: 2,
            depth: None,
            ehmin_azi: Vec::new(),
            ehmin_rate: Vec::new(),
            ehmax_rate: Vec::new(),
            overpressure_rate: Vec::new(),
            temperature_rate: Vec::new(),
            uplift_rate: Vec::new(),
            stress_arching: Vec::new(),
            durations: Vec::new(),
        }
    }
}

fn set_episode_value(list: &mut Vec<f64>, index: usize, value: f64, default: f64) {
    while list.len() <= index {
        let fill = list.last().copied().unwrap_or(default);
        list.push(fill);
    }
    list[index] = value;
}

fn episode_value(list: &[f64], index: usize, default: f64) -> f64 {
    list.get(index)
        .or_else(|| list.last())
        .copied()
        .unwrap_or(default)
}

impl CellProperties {
    /// Apply a recognised per-cell key. Returns false for keys this bundle
    /// does not know, so the caller can try the global keys.
    pub fn apply_values(&mut self, key: &str, episode: Option<usize>, values: &[f64]) -> bool {
        let v0 = match values.first() {
            Some(&v) => v,
            None => return false,
        };
        let mut list = |target: &mut Vec<f64>, default: f64| match episode {
            Some(i) => set_episode_value(target, i, v0, default),
            None => *target = values.to_vec(),
        };
        match key.to_ascii_lowercase().as_str() {
            "ehminazi" => list(&mut self.ehmin_azi, 0.0),
            "ehminrate" => list(&mut self.ehmin_rate, 0.0),
            "ehmaxrate" => list(&mut self.ehmax_rate, 0.0),
            "appliedoverpressurerate" => list(&mut self.overpressure_rate, 0.0),
            "appliedtemperaturechange" => list(&mut self.temperature_rate, 0.0),
            "appliedupliftrate" => list(&mut self.uplift_rate, 0.0),
            "stressarchingfactor" => list(&mut self.stress_arching, 0.0),
            "episodeduration" => list(&mut self.durations, 0.0),
            "youngsmod" => self.mech.young_mod = v0,
            "poissonsratio" => self.mech.poisson = v0,
            "porosity" => self.mech.porosity = v0,
            "biotcoefficient" => self.mech.biot = v0,
            "thermalexpansioncoefficient" => self.mech.thermal_expansion = v0,
            "cracksurfaceenergy" => self.mech.crack_surface_energy = v0,
            "frictioncoefficient" => self.mech.friction = v0,
            "initialmicrofracturedensity" => self.mech.initial_microfracture_density = v0,
            "initialmicrofracturesizedistribution" => {
                self.mech.microfracture_size_exponent = v0
            }
            "subcriticalpropagationindex" => self.mech.subcritical_index = v0,
            "criticalpropagationrate" => self.mech.critical_propagation_rate = v0,
            "minmicrofractureradius" => self.mech.min_microfracture_radius = v0,
            "rockstrainrelaxation" => self.mech.rock_strain_relaxation = v0,
            "fracturestrainrelaxation" => self.mech.fracture_strain_relaxation = v0,
            "geothermalgradient" => self.geothermal_gradient = v0,
            "meanoverlyingsedimentdensity" => self.sediment_density = v0,
            "fluiddensity" => self.fluid_density = v0,
            "initialoverpressure" => self.initial_overpressure = v0,
            "initialstressrelaxation" => self.initial_stress_relaxation = v0,
            "nofracturesets" => self.n_fracture_sets = v0.max(0.0) as usize,
            "depth" | "initialdepth" => self.depth = Some(v0),
            _ => return false,
        }
        true
    }

    pub fn episode_count(&self) -> usize {
        [
            self.ehmin_azi.len(),
            self.ehmin_rate.len(),
            self.ehmax_rate.len(),
            self.overpressure_rate.len(),
            self.temperature_rate.len(),
            self.uplift_rate.len(),
            self.stress_arching.len(),
            self.durations.len(),
        ]
        .iter()
        .copied()
        .max()
        .unwrap_or(0)
    }

    /// Resolve the episode lists into SI-unit deformation episodes
    pub fn episodes_si(&self, unit_seconds: f64) -> Vec<DeformationEpisode> {
        let n = self.episode_count();
        (0..n)
            .map(|i| {
                let duration = episode_value(&self.durations, i, 0.0);
                DeformationEpisode {
                    ehmin_azimuth: episode_value(&self.ehmin_azi, i, 0.0).to_radians(),
                    ehmin_rate: episode_value(&self.ehmin_rate, i, 0.0) / unit_seconds,
                    ehmax_rate: episode_value(&self.ehmax_rate, i, 0.0) / unit_seconds,
                    overpressure_rate: episode_value(&self.overpressure_rate, i, 0.0)
                        / unit_seconds,
                    temperature_rate: episode_value(&self.temperature_rate, i, 0.0)
                        / unit_seconds,
                    uplift_rate: episode_value(&self.uplift_rate, i, 0.0) / unit_seconds,
                    stress_arching: episode_value(&self.stress_arching, i, 0.0).clamp(0.0, 1.0),
                    duration: if duration < 0.0 {
                        -1.0
                    } else {
                        duration * unit_seconds
                    },
                }
            })
            .collect()
    }
}

/// One `Gridblock C R` override block (or one include-file cell value)
#[derive(Clone, Debug)]
pub struct CellOverride {
    pub row: usize,
    pub col: usize,
    pub assignments: Vec<Assignment>,
}

#[derive(Clone, Debug)]
pub struct Assignment {
    pub key: String,
    pub episode: Option<usize>,
    pub values: Vec<f64>,
}

/// The complete parsed model configuration
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub rows: usize,
    pub cols: usize,
    pub cell_width: f64,
    pub cell_length: f64,
    pub layer_thickness: f64,
    pub depth: f64,
    pub initial_depth: Option<f64>,
    pub overwrite_depth: bool,
    pub time_units: TimeUnits,
    pub base: CellProperties,
    pub forced_mode: Option<FractureMode>,
    /// Azimuth of the first set's normal [deg]; defaults to the first
    /// episode's minimum-strain azimuth
    pub fracture_azimuth: Option<f64>,
    pub aperture: ApertureSettings,
    /// Calculation controls; MaxTimestepDuration is in model time units
    pub control: PropagationControl,
    pub geometry_validation: GeometryValidation,
    pub dfn: DFNControl,
    pub write_implicit: bool,
    pub write_dfn: bool,
    pub dfn_format: DfnFileType,
    pub output_compliance_tensor: bool,
    pub threads: usize,
    pub random_seed: u64,
    pub overrides: Vec<CellOverride>,
    /// Pillar geometry overrides from `#Geometry`: (pillar index,
    /// component 0..6 = top x y z bottom x y z, value)
    pub geometry_overrides: Vec<(usize, usize, f64)>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            rows: 1,
            cols: 1,
            cell_width: 20.0,
            cell_length: 20.0,
            layer_thickness: 1.0,
            depth: 2000.0,
            initial_depth: None,
            overwrite_depth: false,
            time_units: TimeUnits::Ma,
            base: CellProperties::default(),
            forced_mode: None,
            fracture_azimuth: None,
            aperture: ApertureSettings::default(),
            control: PropagationControl::default(),
            geometry_validation: GeometryValidation::Lenient,
            dfn: DFNControl::default(),
            write_implicit: true,
            write_dfn: true,
            dfn_format: DfnFileType::Ascii,
            output_compliance_tensor: false,
            threads: 1,
            random_seed: 0,
            overrides: Vec::new(),
            geometry_overrides: Vec::new(),
        }
    }
}

fn parse_f64(key: &str, token: &str) -> Option<f64> {
    match token.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{}: malformed value '{}' ignored", key, token);
            None
        }
    }
}

fn parse_f64_list(key: &str, tokens: &[&str]) -> Vec<f64> {
    tokens
        .iter()
        .filter_map(|t| parse_f64(key, t))
        .collect()
}

fn parse_usize(key: &str, token: &str) -> Option<usize> {
    match token.parse::<usize>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{}: malformed value '{}' ignored", key, token);
            None
        }
    }
}

fn parse_bool(key: &str, token: &str) -> Option<bool> {
    match token.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            warn!("{}: malformed boolean '{}' ignored", key, token);
            None
        }
    }
}

impl ModelConfig {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<ModelConfig, DfmError> {
        let text = fs::read_to_string(path)
            .map_err(|e| DfmError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(Self::parse(&text, &base_dir))
    }

    /// Parse configuration text. Never fails: unknown keys and malformed
    /// values warn and are skipped.
    pub fn parse(text: &str, base_dir: &Path) -> ModelConfig {
        let mut cfg = ModelConfig::default();
        let mut current_override: Option<CellOverride> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let key = tokens[0];
            let args = &tokens[1..];
            let lower = key.to_ascii_lowercase();

            match lower.as_str() {
                "gridblock" => {
                    if current_override.is_some() {
                        warn!("Gridblock: nested block ignored; previous block still open");
                        continue;
                    }
                    let col = args.first().and_then(|t| parse_usize(key, t));
                    let row = args.get(1).and_then(|t| parse_usize(key, t));
                    match (col, row) {
                        (Some(c), Some(r)) => {
                            current_override = Some(CellOverride {
                                row: r,
                                col: c,
                                assignments: Vec::new(),
                            })
                        }
                        _ => warn!("Gridblock: expected 'Gridblock C R'"),
                    }
                    continue;
                }
                "end" => {
                    if args
                        .first()
                        .map(|t| t.eq_ignore_ascii_case("gridblock"))
                        .unwrap_or(false)
                    {
                        match current_override.take() {
                            Some(block) => cfg.overrides.push(block),
                            None => warn!("End Gridblock without an open block"),
                        }
                    } else {
                        warn!("unrecognised key 'End {}'", args.first().unwrap_or(&""));
                    }
                    continue;
                }
                "include" => {
                    if let Some(file) = args.first() {
                        let path = base_dir.join(file);
                        cfg.parse_include(&path);
                    } else {
                        warn!("Include: missing file name");
                    }
                    continue;
                }
                _ => {}
            }

            // inside a Gridblock, recognised per-cell keys become overrides
            if let Some(block) = current_override.as_mut() {
                let values = parse_f64_list(key, args);
                let mut probe = cfg.base.clone();
                if !values.is_empty() && probe.apply_values(key, None, &values) {
                    block.assignments.push(Assignment {
                        key: lower,
                        episode: None,
                        values,
                    });
                } else {
                    warn!("Gridblock ({},{}): key '{}' ignored", block.col, block.row, key);
                }
                continue;
            }

            cfg.apply_global_key(key, &lower, args);
        }

        if current_override.is_some() {
            warn!("Gridblock block not closed before end of file");
        }
        cfg
    }

    fn apply_global_key(&mut self, key: &str, lower: &str, args: &[&str]) {
        let first = args.first().copied().unwrap_or("");
        match lower {
            "norows" => {
                if let Some(v) = parse_usize(key, first) {
                    self.rows = v;
                }
            }
            "nocols" => {
                if let Some(v) = parse_usize(key, first) {
                    self.cols = v;
                }
            }
            "width" => {
                if let Some(v) = parse_f64(key, first) {
                    self.cell_width = v;
                }
            }
            "length" => {
                if let Some(v) = parse_f64(key, first) {
                    self.cell_length = v;
                }
            }
            "layerthickness" => {
                if let Some(v) = parse_f64(key, first) {
                    self.layer_thickness = v;
                }
            }
            "depth" => {
                if let Some(v) = parse_f64(key, first) {
                    self.depth = v;
                }
            }
            "initialdepth" => {
                if let Some(v) = parse_f64(key, first) {
                    self.initial_depth = Some(v);
                }
            }
            "overwritedepth" => {
                if let Some(v) = parse_bool(key, first) {
                    self.overwrite_depth = v;
                }
            }
            "modeltimeunits" => match TimeUnits::parse(first) {
                Some(u) => self.time_units = u,
                None => warn!("ModelTimeUnits: unknown unit '{}'", first),
            },
            "geometryvalidation" => match first.to_ascii_lowercase().as_str() {
                "strict" => self.geometry_validation = GeometryValidation::Strict,
                "lenient" => self.geometry_validation = GeometryValidation::Lenient,
                _ => warn!("GeometryValidation: expected strict or lenient"),
            },
            "fracturemode" => match first.to_ascii_lowercase().as_str() {
                "automatic" => self.forced_mode = None,
                "mode1" => self.forced_mode = Some(FractureMode::Mode1),
                "mode2" => self.forced_mode = Some(FractureMode::Mode2),
                _ => warn!("FractureMode: expected Automatic, Mode1 or Mode2"),
            },
            "fractureazimuth" => {
                if let Some(v) = parse_f64(key, first) {
                    self.fracture_azimuth = Some(v);
                }
            }
            "aperturecontrol" => match first.to_ascii_lowercase().as_str() {
                "uniform" => self.aperture.kind = ApertureKind::Uniform,
                "sizedependent" => self.aperture.kind = ApertureKind::SizeDependent,
                "dynamic" => self.aperture.kind = ApertureKind::Dynamic,
                "bartonbandis" => self.aperture.kind = ApertureKind::BartonBandis,
                _ => warn!("ApertureControl: unknown model '{}'", first),
            },
            "uniformaperture" => self.aperture.uniform.assign(&parse_f64_list(key, args)),
            "sizedependentaperturemultiplier" => {
                self.aperture.size_multiplier.assign(&parse_f64_list(key, args))
            }
            "dynamicaperturemultiplier" => self
                .aperture
                .dynamic_multiplier
                .assign(&parse_f64_list(key, args)),
            "jrc" => self.aperture.jrc.assign(&parse_f64_list(key, args)),
            "ucsratio" => self.aperture.ucs_ratio.assign(&parse_f64_list(key, args)),
            "initialnormalstress" => self
                .aperture
                .initial_normal_stress
                .assign(&parse_f64_list(key, args)),
            "fracturenormalstiffness" => self
                .aperture
                .normal_stiffness
                .assign(&parse_f64_list(key, args)),
            "maxclosure" => self.aperture.max_closure.assign(&parse_f64_list(key, args)),
            "maxtimesteps" => {
                if let Some(v) = parse_usize(key, first) {
                    self.control.max_timesteps = v;
                }
            }
            "maxtimestepduration" => {
                if let Some(v) = parse_f64(key, first) {
                    self.control.max_timestep_duration = v;
                }
            }
            "maxtimestepmfp33increase" => {
                if let Some(v) = parse_f64(key, first) {
                    self.control.max_mfp33_increase = v;
                }
            }
            "current_historicmfp33terminationratio" => {
                if let Some(v) = parse_f64(key, first) {
                    self.control.historic_mfp33_termination_ratio = v;
                }
            }
            "active_totalmfp30terminationratio" => {
                if let Some(v) = parse_f64(key, first) {
                    self.control.active_total_mfp30_termination_ratio = v;
                }
            }
            "minimumclearzonevolume" => {
                if let Some(v) = parse_f64(key, first) {
                    self.control.minimum_clear_zone_volume = v;
                }
            }
            "residualactiveratio" => {
                if let Some(v) = parse_f64(key, first) {
                    self.control.residual_active_ratio = v;
                }
            }
            "stressdistributionscenario" => match first.to_ascii_lowercase().as_str() {
                "evenlydistributedstress" => {
                    self.control.stress_distribution = StressDistribution::EvenlyDistributedStress
                }
                "stressshadow" => {
                    self.control.stress_distribution = StressDistribution::StressShadow
                }
                "ductileboundary" => {
                    self.control.stress_distribution = StressDistribution::DuctileBoundary
                }
                _ => warn!("StressDistributionScenario: unknown scenario '{}'", first),
            },
            "anisotropycutoff" => {
                if let Some(v) = parse_f64(key, first) {
                    self.control.anisotropy_cutoff = v;
                }
            }
            "checkallufstressshadows" => {
                if first.eq_ignore_ascii_case("automatic") {
                    self.control.check_all_uf_stress_shadows = AutomaticFlag::Automatic;
                } else if let Some(v) = parse_bool(key, first) {
                    self.control.check_all_uf_stress_shadows =
                        if v { AutomaticFlag::On } else { AutomaticFlag::Off };
                }
            }
            "intermediateoutputs" => {
                if let Some(v) = parse_usize(key, first) {
                    self.control.intermediate_outputs = v;
                }
            }
            "intermediateoutputcontrol" => match first.to_ascii_lowercase().as_str() {
                "bytime" => self.control.intermediate_control = IntermediateOutputControl::ByTime,
                "byarea" => self.control.intermediate_control = IntermediateOutputControl::ByArea,
                "episodeend" => {
                    self.control.intermediate_control = IntermediateOutputControl::EpisodeEnd
                }
                _ => warn!("IntermediateOutputControl: expected ByTime, ByArea or EpisodeEnd"),
            },
            "calculationthreads" => {
                if let Some(v) = parse_usize(key, first) {
                    self.threads = v.max(1);
                }
            }
            "randomseed" => match first.parse::<u64>() {
                Ok(v) => self.random_seed = v,
                Err(_) => warn!("RandomSeed: malformed value '{}' ignored", first),
            },
            "generateexplicitdfn" => {
                if let Some(v) = parse_bool(key, first) {
                    self.dfn.generate = v;
                }
            }
            "cropatboundary" => {
                if let Some(v) = parse_bool(key, first) {
                    self.dfn.crop_at_boundary = v;
                }
            }
            "linkstressshadows" => {
                if let Some(v) = parse_bool(key, first) {
                    self.dfn.link_stress_shadows = v;
                }
            }
            "maxconsistencyangle" => {
                if let Some(v) = parse_f64(key, first) {
                    self.dfn.max_consistency_angle = v.to_radians();
                }
            }
            "minexplicitmicrofractureradius" => {
                if let Some(v) = parse_f64(key, first) {
                    self.dfn.min_explicit_microfracture_radius = v;
                }
            }
            "number_uf_points" => {
                if let Some(v) = parse_usize(key, first) {
                    if v == 0 || v >= 3 {
                        self.dfn.n_uf_points = v;
                    } else {
                        warn!("Number_uF_Points: need 0 (disks) or at least 3");
                    }
                }
            }
            "probabilisticfracturenucleationlimit" => {
                if first.eq_ignore_ascii_case("automatic") {
                    self.dfn.nucleation_mode = NucleationMode::Automatic;
                } else if let Some(v) = parse_f64(key, first) {
                    self.dfn.nucleation_mode = NucleationMode::Threshold(v);
                }
            }
            "propagatefracturesinnucleationorder" => {
                if let Some(v) = parse_bool(key, first) {
                    self.dfn.order = if v {
                        DFNPropagationOrder::ByNucleationTime
                    } else {
                        DFNPropagationOrder::BySet
                    };
                }
            }
            "mindfnmacrofracturelength" => {
                if let Some(v) = parse_f64(key, first) {
                    // reserved: stored but not applied
                    self.dfn.min_macrofracture_length = v;
                }
            }
            "writeimplicitdatafiles" => {
                if let Some(v) = parse_bool(key, first) {
                    self.write_implicit = v;
                }
            }
            "writedfnfiles" => {
                if let Some(v) = parse_bool(key, first) {
                    self.write_dfn = v;
                }
            }
            "dfnfiletype" => match first.to_ascii_lowercase().as_str() {
                "ascii" => self.dfn_format = DfnFileType::Ascii,
                "fab" => self.dfn_format = DfnFileType::Fab,
                _ => warn!("DFNFileType: expected ascii or fab"),
            },
            "outputcompliancetensor" => {
                if let Some(v) = parse_bool(key, first) {
                    self.output_compliance_tensor = v;
                }
            }
            _ => {
                let values = parse_f64_list(key, args);
                if values.is_empty() || !self.base.apply_values(key, None, &values) {
                    warn!("unrecognised key '{}' ignored", key);
                }
            }
        }
    }

    // Parse a property-array include file: `#KEY [episode]` blocks with
    // row-major cell values, and `#Geometry` with six floats per pillar.
    fn parse_include(&mut self, path: &Path) {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!("Include: cannot read {}: {}", path.display(), e);
                return;
            }
        };
        let mut header: Option<(String, Option<usize>)> = None;
        let mut slot = 0usize;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('#') {
                let mut parts = rest.split_whitespace();
                let key = parts.next().unwrap_or("").to_ascii_lowercase();
                let episode = parts.next().and_then(|t| t.parse::<usize>().ok());
                header = Some((key, episode));
                slot = 0;
                continue;
            }
            let (key, episode) = match &header {
                Some(h) => (h.0.clone(), h.1),
                None => {
                    warn!("{}: values before any #KEY header ignored", path.display());
                    continue;
                }
            };
            for token in line.split_whitespace() {
                if key == "geometry" {
                    let pillar = slot / 6;
                    let component = slot % 6;
                    if pillar >= (self.rows + 1) * (self.cols + 1) {
                        warn!("{}: surplus geometry value ignored", path.display());
                    } else if !token.eq_ignore_ascii_case("na") {
                        if let Ok(v) = token.parse::<f64>() {
                            self.geometry_overrides.push((pillar, component, v));
                        } else {
                            warn!("{}: malformed geometry value '{}'", path.display(), token);
                        }
                    }
                    slot += 1;
                } else {
                    let cell = slot;
                    if cell >= self.rows * self.cols {
                        warn!("{}: surplus value for #{} ignored", path.display(), key);
                    } else if !token.eq_ignore_ascii_case("na") {
                        if let Ok(v) = token.parse::<f64>() {
                            self.overrides.push(CellOverride {
                                row: cell / self.cols,
                                col: cell % self.cols,
                                assignments: vec![Assignment {
                                    key: key.clone(),
                                    episode,
                                    values: vec![v],
                                }],
                            });
                        } else {
                            warn!(
                                "{}: malformed value '{}' for #{} ignored",
                                path.display(),
                                token,
                                key
                            );
                        }
                    }
                    slot += 1;
                }
            }
        }
    }

    /// Calculation controls with durations converted to seconds
    pub fn propagation_control(&self) -> PropagationControl {
        let mut control = self.control.clone();
        if control.max_timestep_duration > 0.0 {
            control.max_timestep_duration *= self.time_units.seconds();
        }
        control
    }

    /// Build the fracture grid: pillar lattice (with geometry overrides),
    /// then per-cell properties (global + Gridblock/include overrides).
    pub fn build_grid(&self) -> Result<FractureGrid, DfmError> {
        let unit = self.time_units.seconds();
        let mut pillars = regular_pillars(
            self.rows,
            self.cols,
            self.cell_width,
            self.cell_length,
            self.depth,
            self.layer_thickness,
        );
        for &(pillar, component, value) in &self.geometry_overrides {
            let p = &mut pillars[pillar];
            match component {
                0 => p.top.x = value,
                1 => p.top.y = value,
                2 => p.top.z = value,
                3 => p.bottom.x = value,
                4 => p.bottom.y = value,
                5 => p.bottom.z = value,
                _ => unreachable!(),
            }
        }

        let (aperture_hmin, aperture_hmax) = self.aperture.models();
        let grid = FractureGrid::build(self.rows, self.cols, pillars, |r, c, frame| {
            let mut props = self.base.clone();
            for block in &self.overrides {
                if block.row == r && block.col == c {
                    for a in &block.assignments {
                        if !props.apply_values(&a.key, a.episode, &a.values) {
                            warn!("override for cell ({},{}): key '{}' ignored", c, r, a.key);
                        }
                    }
                }
            }
            if props.mech.subcritical_index < 2.0 {
                warn!(
                    "cell ({},{}): subcritical propagation index {} below 2 clamped",
                    c, r, props.mech.subcritical_index
                );
                props.mech.subcritical_index = 2.0;
            }
            let episodes = props.episodes_si(unit);
            let normal_azimuth = self
                .fracture_azimuth
                .map(|d| d.to_radians())
                .unwrap_or_else(|| episodes.first().map(|e| e.ehmin_azimuth).unwrap_or(0.0));
            let depth = props
                .depth
                .or(self.initial_depth)
                .unwrap_or_else(|| frame.mean_top_depth());
            let mut mech = props.mech;
            mech.rock_strain_relaxation *= unit;
            mech.fracture_strain_relaxation *= unit;
            let index = (r * self.cols + c) as u64;
            GridblockCell::new(
                r,
                c,
                CellInit {
                    thickness: frame.mean_thickness(),
                    area: frame.area(),
                    depth,
                    mech,
                    episodes,
                    n_fracture_sets: props.n_fracture_sets,
                    forced_mode: self.forced_mode,
                    set_normal_azimuth: normal_azimuth,
                    aperture_hmin,
                    aperture_hmax,
                    residual_ratio: self.control.residual_active_ratio,
                    geothermal_gradient: props.geothermal_gradient,
                    sediment_density: props.sediment_density,
                    fluid_density: props.fluid_density,
                    initial_overpressure: props.initial_overpressure,
                    initial_stress_relaxation: props.initial_stress_relaxation,
                    overwrite_depth: self.overwrite_depth,
                    rng_seed: self
                        .random_seed
                        .wrapping_add((index + 1).wrapping_mul(SEED_MIX)),
                },
            )
        })?;
        grid.validate_geometry(self.geometry_validation)?;
        Ok(grid)
    }

    /// Output folder next to the input file: `<stem>_output/`
    pub fn output_folder(input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dfm_gen".to_string());
        input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}_output", stem))
    }
}

/// Write a fully commented configuration template
pub fn write_template(path: &Path) -> Result<(), DfmError> {
    let mut f = fs::File::create(path)?;
    f.write_all(TEMPLATE.as_bytes())?;
    Ok(())
}

const TEMPLATE: &str = r#"% dfm_gen configuration template
% Lines starting with % are comments. Each setting is KEY value [value ...].
% Keys marked per-episode accept one value per deformation episode.

% --- Grid geometry ---
NoRows 1
NoCols 1
% Cell size [m]: Width is east-west, Length is north-south
Width 20
Length 20
LayerThickness 1
% Present-day mean depth of the layer top [m]
Depth 2000
% Uncomment to start the deformation history at a different depth
%InitialDepth 2000
% true pins the depth to its initial value instead of accumulating uplift
OverwriteDepth false
% Geometry checks after overrides: lenient (volume only) or strict
GeometryValidation lenient

% --- Time ---
% ma, year or second; all rates and durations below use this unit
ModelTimeUnits ma

% --- Deformation episodes (per-episode lists) ---
% Azimuth of minimum horizontal strain [deg from north]
EhminAzi 0
% Horizontal strain rates [/unit]; negative = extensional
EhminRate -0.01
EhmaxRate 0
% Fluid overpressure rate [Pa/unit]
AppliedOverpressureRate 0
% Temperature change in excess of the geothermal trend [degC/unit]
AppliedTemperatureChange 0
% Depth change rate [m/unit]
AppliedUpliftRate 0
% Fraction of the overpressure carried by stress arching [0-1]
StressArchingFactor 0
% Episode duration [unit]; negative = run until fractures stop growing
EpisodeDuration 5

% --- Mechanical properties ---
YoungsMod 1e10
PoissonsRatio 0.25
Porosity 0.2
BiotCoefficient 1
ThermalExpansionCoefficient 4e-5
CrackSurfaceEnergy 1000
FrictionCoefficient 0.5
% Initial microfracture density B [m^(c-3)] and size exponent c
InitialMicrofractureDensity 0.001
InitialMicrofractureSizeDistribution 2
% Sub-critical propagation index b (must be at least 2)
SubcriticalPropagationIndex 5
% Critical macrofracture propagation rate [m/s]
CriticalPropagationRate 2000
% Smallest flaw radius in the initial population [m]
MinMicrofractureRadius 0.03
% Strain relaxation time constants [unit]; 0 disables
RockStrainRelaxation 0
FractureStrainRelaxation 0

% --- Stress state ---
MeanOverlyingSedimentDensity 2250
FluidDensity 1000
InitialOverpressure 0
% Geothermal gradient [degC/m]
GeothermalGradient 0.03
% Initial horizontal stress relaxation [0-1]; -1 = critical (frictional)
InitialStressRelaxation 1

% --- Fracture sets ---
% Typically 1, 2 or 6
NoFractureSets 2
% Automatic, Mode1 (dilatant only) or Mode2 (shear only)
FractureMode Automatic
% Azimuth of the first set normal [deg]; defaults to EhminAzi
%FractureAzimuth 0

% --- Aperture ---
% Uniform, SizeDependent, Dynamic or BartonBandis
ApertureControl Uniform
% Each aperture key takes one value for hmin and optionally one for hmax
UniformAperture 5e-4
SizeDependentApertureMultiplier 1e-5
DynamicApertureMultiplier 1e-11
JRC 10
UCSRatio 2
InitialNormalStress 2e5
FractureNormalStiffness 2.5e9
MaxClosure 5e-4

% --- Calculation controls ---
MaxTimesteps 1000
% Maximum timestep duration [unit]; negative disables the bound
MaxTimestepDuration -1
MaxTimestepMFP33Increase 2e-4
% Stop when active/peak MFP33 falls below this ratio; negative disables
Current_HistoricMFP33TerminationRatio 0.01
% Stop when active/total MFP30 falls below this ratio; negative disables
Active_TotalMFP30TerminationRatio -1
MinimumClearZoneVolume 1e-4
ResidualActiveRatio 0.5
% EvenlyDistributedStress, StressShadow or DuctileBoundary (reserved)
StressDistributionScenario StressShadow
AnisotropyCutoff 1
% Automatic, true or false
CheckAlluFStressShadows Automatic
% Intermediate density snapshots per episode and their trigger
IntermediateOutputs 0
% ByTime, ByArea or EpisodeEnd
IntermediateOutputControl EpisodeEnd
CalculationThreads 1
RandomSeed 0

% --- Explicit DFN ---
GenerateExplicitDFN true
CropAtBoundary true
LinkStressShadows false
% Maximum azimuth mismatch when crossing into a neighbour cell [deg]
MaxConsistencyAngle 45
% Microfractures above this radius are emitted explicitly [m]; 0 disables
MinExplicitMicrofractureRadius 0
% Points per microfracture polygon (at least 3), or 0 for disks
Number_uF_Points 0
% Poisson nucleation below this expected count per step, or Automatic
ProbabilisticFractureNucleationLimit Automatic
% true uses the global nucleation-time queue instead of set order
PropagateFracturesInNucleationOrder false
% Reserved
MinDFNMacrofractureLength 0

% --- Output ---
WriteImplicitDataFiles true
WriteDFNFiles true
% ascii or fab
DFNFileType ascii
OutputComplianceTensor false

% --- Per-cell overrides ---
% Gridblock C R
%   YoungsMod 2e10
% End Gridblock
% Include property_arrays.txt
%   (blocks of '#KEY [episode]' with NoRows x NoCols row-major values,
%    'NA' retains the default; '#Geometry' takes six values per pillar:
%    top x y z, bottom x y z, in row-then-column pillar order)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_keys() {
        let text = "
% comment
NoRows 2
NoCols 3
Width 25
ModelTimeUnits year
EhminRate -0.01 -0.02
EpisodeDuration 1 2
NoFractureSets 1
StressDistributionScenario EvenlyDistributedStress
WriteDFNFiles false
";
        let cfg = ModelConfig::parse(text, Path::new("."));
        assert_eq!(cfg.rows, 2);
        assert_eq!(cfg.cols, 3);
        assert_eq!(cfg.cell_width, 25.0);
        assert_eq!(cfg.time_units, TimeUnits::Year);
        assert_eq!(cfg.base.ehmin_rate, vec![-0.01, -0.02]);
        assert_eq!(cfg.base.durations, vec![1.0, 2.0]);
        assert_eq!(cfg.base.n_fracture_sets, 1);
        assert_eq!(
            cfg.control.stress_distribution,
            StressDistribution::EvenlyDistributedStress
        );
        assert!(!cfg.write_dfn);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_skipped() {
        let text = "
NoRows 2
FrobnicationIndex 7
YoungsMod banana
PoissonsRatio 0.3
";
        let cfg = ModelConfig::parse(text, Path::new("."));
        assert_eq!(cfg.rows, 2);
        // the malformed value left the default in place
        assert_eq!(cfg.base.mech.young_mod, 1e10);
        assert_eq!(cfg.base.mech.poisson, 0.3);
    }

    #[test]
    fn gridblock_overrides_are_collected() {
        let text = "
NoRows 2
NoCols 2
Gridblock 1 0
YoungsMod 2e10
EhminRate -0.05
End Gridblock
";
        let cfg = ModelConfig::parse(text, Path::new("."));
        assert_eq!(cfg.overrides.len(), 1);
        let block = &cfg.overrides[0];
        assert_eq!((block.col, block.row), (1, 0));
        assert_eq!(block.assignments.len(), 2);

        let grid = cfg.build_grid().unwrap();
        assert_eq!(grid.cell(0, 1).mech.young_mod, 2e10);
        assert_eq!(grid.cell(0, 0).mech.young_mod, 1e10);
    }

    #[test]
    fn episode_lists_pad_with_last_value() {
        let mut props = CellProperties::default();
        props.apply_values("EhminRate", None, &[-0.01, -0.02]);
        props.apply_values("EpisodeDuration", None, &[1.0, 2.0, 3.0]);
        let episodes = props.episodes_si(1.0);
        assert_eq!(episodes.len(), 3);
        assert_eq!(episodes[2].ehmin_rate, -0.02);
        assert_eq!(episodes[1].duration, 2.0);
    }

    #[test]
    fn indefinite_episode_duration_survives_conversion() {
        let mut props = CellProperties::default();
        props.apply_values("EpisodeDuration", None, &[-1.0]);
        let episodes = props.episodes_si(3.15576e13);
        assert!(episodes[0].is_indefinite());
    }

    #[test]
    fn template_parses_back() {
        let cfg = ModelConfig::parse(TEMPLATE, Path::new("."));
        assert_eq!(cfg.rows, 1);
        assert_eq!(cfg.cols, 1);
        assert_eq!(cfg.base.n_fracture_sets, 2);
        assert!(cfg.dfn.generate);
        assert!((cfg.base.durations[0] - 5.0).abs() < 1e-12);
        let grid = cfg.build_grid().unwrap();
        assert_eq!(grid.rows(), 1);
        assert!((grid.cell(0, 0).thickness - 1.0).abs() < 1e-12);
        assert!((grid.cell(0, 0).depth - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn include_files_override_cells_and_geometry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("arrays.txt"),
            "#YoungsMod\n2e10 NA\nNA 4e10\n#EhminRate 0\n-0.5 NA NA NA\n",
        )
        .unwrap();
        let cfg = ModelConfig::parse("NoRows 2\nNoCols 2\nInclude arrays.txt\n", dir.path());
        let grid = cfg.build_grid().unwrap();
        assert_eq!(grid.cell(0, 0).mech.young_mod, 2e10);
        assert_eq!(grid.cell(0, 1).mech.young_mod, 1e10);
        assert_eq!(grid.cell(1, 1).mech.young_mod, 4e10);
        let unit = cfg.time_units.seconds();
        assert!((grid.cell(0, 0).episodes[0].ehmin_rate - (-0.5 / unit)).abs() < 1e-30);
    }

    #[test]
    fn output_folder_uses_input_stem() {
        let folder = ModelConfig::output_folder(Path::new("/tmp/run_a.txt"));
        assert_eq!(folder, PathBuf::from("/tmp/run_a_output"));
    }
}
