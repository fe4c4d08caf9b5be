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

//! Configuration template, override and output-file round trips

use std::fs;
use std::path::Path;

use dfm_gen::{
    write_dfn_ascii, write_dfn_fab, write_implicit_files, write_template, DFNBuilder, ModelConfig,
    NullProgressReporter,
};

#[test]
fn template_is_a_valid_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("DFMGenerator_configuration.txt");
    write_template(&path).unwrap();
    let cfg = ModelConfig::load(&path).unwrap();
    assert_eq!(cfg.rows, 1);
    assert_eq!(cfg.cols, 1);
    let grid = cfg.build_grid().unwrap();
    assert_eq!(grid.rows(), 1);
    assert!((grid.cell(0, 0).depth - 2000.0).abs() < 1e-9);
}

#[test]
fn missing_file_is_an_error() {
    assert!(ModelConfig::load(Path::new("/nonexistent/nowhere.txt")).is_err());
}

#[test]
fn geometry_include_reshapes_the_grid() {
    let dir = tempfile::tempdir().unwrap();
    // deepen the single cell's four pillars to 3000 m with 2 m thickness
    let mut geometry = String::from("#Geometry\n");
    for _ in 0..4 {
        geometry.push_str("NA NA 3000 NA NA 3002\n");
    }
    fs::write(dir.path().join("geom.txt"), geometry).unwrap();
    let cfg = ModelConfig::parse(
        "NoRows 1\nNoCols 1\nNoFractureSets 1\nEhminRate -0.01\nEpisodeDuration 1\n\
         Include geom.txt\n",
        dir.path(),
    );
    let grid = cfg.build_grid().unwrap();
    let cell = grid.cell(0, 0);
    assert!((cell.depth - 3000.0).abs() < 1e-9);
    assert!((cell.thickness - 2.0).abs() < 1e-9);
}

#[test]
fn output_files_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ModelConfig::parse(
        "NoRows 1\nNoCols 1\nNoFractureSets 1\nEhminRate -0.01\nEpisodeDuration 2\n\
         InitialMicrofractureDensity 1e-4\nGenerateExplicitDFN true\n\
         OutputComplianceTensor true\n",
        Path::new("."),
    );
    let mut grid = cfg.build_grid().unwrap();
    let progress = NullProgressReporter;
    grid.run_implicit(&cfg.propagation_control(), 1, &progress);

    let outdir = dir.path().join("out");
    write_implicit_files(&grid, cfg.time_units, cfg.output_compliance_tensor, &outdir).unwrap();
    let implicit = fs::read_to_string(outdir.join("implicit_r0_c0.txt")).unwrap();
    assert!(implicit.contains("a_MFP30_0"));
    assert!(implicit.contains("Sxx[1/Pa]"));
    assert!(implicit.lines().count() > 3);

    let dfn = DFNBuilder::new(&grid, &cfg.dfn).build(&progress);
    let ascii_path = outdir.join("DFN.txt");
    write_dfn_ascii(&dfn, &grid, &ascii_path).unwrap();
    let ascii = fs::read_to_string(&ascii_path).unwrap();
    assert!(ascii.contains("BEGIN MACROFRACTURES"));
    assert!(ascii.contains("END MICROFRACTURES"));

    let fab_path = outdir.join("DFN.fab");
    write_dfn_fab(&dfn, &grid, &fab_path).unwrap();
    let fab = fs::read_to_string(&fab_path).unwrap();
    assert!(fab.contains("BEGIN FORMAT"));
    assert!(fab.contains(&format!("No_Fractures = {}", dfn.macrofractures.len())));
    assert!(fab.contains("BEGIN FRACTURE"));
}

#[test]
fn no_fracture_sets_produces_no_data_and_an_empty_dfn() {
    let cfg = ModelConfig::parse(
        "NoRows 1\nNoCols 1\nNoFractureSets 0\nEhminRate -0.01\nEpisodeDuration 1\n\
         GenerateExplicitDFN true\n",
        Path::new("."),
    );
    let mut grid = cfg.build_grid().unwrap();
    let progress = NullProgressReporter;
    grid.run_implicit(&cfg.propagation_control(), 1, &progress);
    assert!(grid.cell(0, 0).sets.is_empty());
    let dfn = DFNBuilder::new(&grid, &cfg.dfn).build(&progress);
    assert!(dfn.macrofractures.is_empty());
    assert!(dfn.microfractures.is_empty());
}
