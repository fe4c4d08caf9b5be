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

//! This crate simulates the growth of natural fractures in a layered rock
//! volume under a prescribed sequence of tectonic, fluid-pressure, thermal
//! and uplift loads. It produces an *implicit* statistical description of
//! the fracture population in every grid cell (densities, survival,
//! porosity) and an *explicit* Discrete Fracture Network of individual
//! micro- and macrofractures.
//!
//! Usage
//! -----
//! Basic usage follows the same pattern as the command-line tool: parse a
//! configuration, build the grid, run the implicit calculation, then
//! (optionally) build the DFN:
//!
//! ```
//! use std::path::Path;
//! use dfm_gen::{DFNBuilder, ModelConfig, NullProgressReporter};
//!
//! let cfg = ModelConfig::parse(
//!     "NoRows 1\nNoCols 1\nNoFractureSets 1\nEhminRate -0.01\nEpisodeDuration 0.01\n",
//!     Path::new("."),
//! );
//! let mut grid = cfg.build_grid().unwrap();
//! let progress = NullProgressReporter;
//! grid.run_implicit(&cfg.propagation_control(), cfg.threads, &progress);
//! let dfn = DFNBuilder::new(&grid, &cfg.dfn).build(&progress);
//! assert!(grid.cell(0, 0).sets[0].total_MFP30() >= 0.0);
//! // explicit DFN generation is off unless the configuration asks for it
//! assert!(dfn.macrofractures.is_empty());
//! ```

pub mod dfn;

mod cell;
mod config;
mod controller;
mod dipset;
mod episode;
mod error;
mod fracture_set;
mod geometry;
mod grid;
mod helpers;
mod output;
mod progress;
mod timestep;

pub use cell::*;
pub use config::*;
pub use controller::*;
pub use dfn::*;
pub use dipset::*;
pub use episode::*;
pub use error::*;
pub use fracture_set::*;
pub use geometry::*;
pub use grid::*;
pub use output::*;
pub use progress::*;
pub use timestep::*;
