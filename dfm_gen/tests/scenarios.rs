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

//! End-to-end scenarios driving the public API the way the CLI does

use std::path::Path;

use dfm_gen::{
    critical_stress_relaxation, DFNBuilder, FractureGrid, ModelConfig, NullProgressReporter,
    TipState,
};

fn run(text: &str) -> (ModelConfig, FractureGrid) {
    let cfg = ModelConfig::parse(text, Path::new("."));
    let mut grid = cfg.build_grid().expect("grid must build");
    let progress = NullProgressReporter;
    grid.run_implicit(&cfg.propagation_control(), cfg.threads, &progress);
    (cfg, grid)
}

#[test]
fn s1_uniaxial_single_set() {
    let (_, grid) = run(
        "NoRows 1\nNoCols 1\nWidth 20\nLength 20\nLayerThickness 1\nDepth 2000\n\
         NoFractureSets 1\nEhminRate -0.01\nEhmaxRate 0\n\
         StressDistributionScenario StressShadow\nEpisodeDuration 5\n",
    );
    let cell = grid.cell(0, 0);
    let set = &cell.sets[0];
    assert!(set.total_MFP30() > 0.0, "extension must nucleate fractures");
    // the displacement-accumulating mode is driven towards extinction
    let dominant = set
        .dipsets
        .iter()
        .max_by(|a, b| {
            a.series
                .last()
                .total_MFP30
                .total_cmp(&b.series.last().total_MFP30)
        })
        .unwrap();
    assert!(
        dominant.series.last().cum_phi < 0.5,
        "cum_phi = {}",
        dominant.series.last().cum_phi
    );
    let ratio = cell.active_peak_mfp33_ratio().unwrap();
    assert!(ratio < 0.01, "active/peak MFP33 ratio = {}", ratio);
}

#[test]
fn s2_two_orthogonal_sets_isotropic_strain() {
    let (_, grid) = run(
        "NoRows 1\nNoCols 1\nWidth 20\nLength 20\nLayerThickness 1\nDepth 2000\n\
         NoFractureSets 2\nEhminRate -0.005\nEhmaxRate -0.005\nEpisodeDuration 5\n",
    );
    let cell = grid.cell(0, 0);
    let t0 = cell.sets[0].total_MFP30();
    let t1 = cell.sets[1].total_MFP30();
    assert!(t0 > 0.0);
    assert!(
        (t0 - t1).abs() <= 0.01 * t0.max(t1),
        "sets diverged: {} vs {}",
        t0,
        t1
    );
    // the all-sets shadow volume is strictly tighter than any single set's
    for set in &cell.sets {
        for dipset in &set.dipsets {
            let rec = dipset.series.last();
            if rec.total_MFP30 > 0.0 {
                assert!(
                    rec.theta_allFS < rec.theta,
                    "theta_allFS {} !< theta {}",
                    rec.theta_allFS,
                    rec.theta
                );
            }
        }
    }
}

#[test]
fn s3_grid_dfn_respects_boundaries() {
    let (cfg, grid) = run(
        "NoRows 3\nNoCols 3\nWidth 20\nLength 20\nLayerThickness 1\nDepth 2000\n\
         NoFractureSets 2\nEhminRate -0.01\nEhmaxRate 0\nEpisodeDuration 2\n\
         InitialMicrofractureDensity 1e-5\n\
         GenerateExplicitDFN true\nCropAtBoundary true\nRandomSeed 7\n",
    );
    let progress = NullProgressReporter;
    let dfn = DFNBuilder::new(&grid, &cfg.dfn).build(&progress);
    assert!(
        !dfn.macrofractures.is_empty(),
        "the DFN must contain fractures"
    );

    let eps = 1e-6;
    let (xmax, ymax) = (60.0, 60.0);
    for fracture in &dfn.macrofractures {
        for half in &fracture.halves {
            for seg in &half.segments {
                for p in [seg.from_xy, seg.to_xy].iter() {
                    assert!(
                        p[0] >= -eps && p[0] <= xmax + eps && p[1] >= -eps && p[1] <= ymax + eps,
                        "segment point {:?} escapes the cropped grid",
                        p
                    );
                }
            }
            // chained segments stay four-neighbour contiguous
            for pair in half.segments.windows(2) {
                let (a, b) = (pair[0].cell, pair[1].cell);
                let dr = (a.0 as i64 - b.0 as i64).abs();
                let dc = (a.1 as i64 - b.1 as i64).abs();
                assert!(
                    dr + dc <= 1,
                    "segment chain jumps from {:?} to {:?}",
                    a,
                    b
                );
            }
            // a tip that stopped is flagged; a live tip sits inside the grid
            if half.state == TipState::Propagating {
                let tip = half.tip_xy(fracture.nucleation_xy);
                assert!(
                    tip[0] >= -eps && tip[0] <= xmax + eps && tip[1] >= -eps && tip[1] <= ymax + eps
                );
            }
        }
    }
}

#[test]
fn s4_uplift_then_injection_accumulates_depth() {
    let (_, grid) = run(
        "NoRows 1\nNoCols 1\nWidth 20\nLength 20\nLayerThickness 1\nDepth 2000\n\
         NoFractureSets 1\n\
         EhminRate -0.01 0 0\n\
         AppliedUpliftRate 0 100 0\n\
         AppliedOverpressureRate 0 0 1e12\n\
         StressArchingFactor 0 0 1\n\
         EpisodeDuration 1 18 1e-5\n",
    );
    let cell = grid.cell(0, 0);
    assert!(
        (cell.depth - 3800.0).abs() < 1e-6,
        "depth = {}, expected 3800",
        cell.depth
    );
}

#[test]
fn s5_critical_initial_stress_relaxation() {
    let nu = 0.25;
    let mu: f64 = 0.5;
    let phi = mu.atan();
    let expected =
        ((1.0 - nu) * (1.0 - phi.sin()) / (1.0 + phi.sin()) - nu) / (1.0 - 2.0 * nu);
    assert!((critical_stress_relaxation(nu, mu) - expected).abs() < 1e-12);

    let cfg = ModelConfig::parse(
        "NoRows 1\nNoCols 1\nInitialStressRelaxation -1\nPoissonsRatio 0.25\n\
         FrictionCoefficient 0.5\nNoFractureSets 1\nEhminRate -0.01\nEpisodeDuration 1\n",
        Path::new("."),
    );
    let grid = cfg.build_grid().unwrap();
    assert!(
        (grid.cell(0, 0).stress.applied_relaxation - expected).abs() < 1e-12,
        "applied relaxation {} != {}",
        grid.cell(0, 0).stress.applied_relaxation,
        expected
    );
}

#[test]
fn s6_probabilistic_nucleation_matches_poisson_mean() {
    // tiny cell, thin layer: a handful of expected nucleations per run
    let (cfg, mut grid) = run(
        "NoRows 1\nNoCols 1\nWidth 1\nLength 1\nLayerThickness 0.01\nDepth 2000\n\
         NoFractureSets 1\nEhminRate -0.01\nEpisodeDuration 5\n\
         MinMicrofractureRadius 0.001\n\
         GenerateExplicitDFN true\nProbabilisticFractureNucleationLimit 1000\n",
    );

    // the exact expected count from the implicit records
    let expected: f64 = {
        let cell = grid.cell(0, 0);
        cell.sets
            .iter()
            .flat_map(|s| s.dipsets.iter())
            .map(|d| {
                (1..=d.series.timestep_count())
                    .map(|n| {
                        let rec = d.series.record(n);
                        rec.nucleation_increment_raw * rec.theta_prime_allFS * cell.volume
                    })
                    .sum::<f64>()
            })
            .sum()
    };
    assert!(expected > 0.5, "expected count {} too small", expected);

    let progress = NullProgressReporter;
    let runs = 200;
    let mut total = 0usize;
    for run_idx in 0..runs {
        grid.cell_mut(0, 0).rng_seed = 7919 * (run_idx as u64) + 1;
        let dfn = DFNBuilder::new(&grid, &cfg.dfn).build(&progress);
        total += dfn.macrofractures.len();
    }
    let mean = total as f64 / runs as f64;
    // the sum of per-step Poisson draws is Poisson(expected); allow 5 sigma
    // of the sample-mean distribution
    let tolerance = 5.0 * (expected / runs as f64).sqrt();
    assert!(
        (mean - expected).abs() <= tolerance + 0.05 * expected,
        "sample mean {} vs expected {} (tolerance {})",
        mean,
        expected,
        tolerance
    );
}
