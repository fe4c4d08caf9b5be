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

//! Error types for the fracture model

use std::io;

use thiserror::Error;

/// Errors surfaced by the fracture model.
///
/// Most parse-level problems are recoverable and only logged; the variants
/// here are the ones that abort an operation. Geometry violations are the
/// only errors considered fatal for a whole grid run.
#[derive(Debug, Error)]
pub enum DfmError {
    /// The configuration file could not be read or is structurally unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// A grid geometry invariant is violated (non-positive cell volume,
    /// non-convex footprint under strict validation)
    #[error("invalid grid geometry: {0}")]
    Geometry(String),

    /// An output file or directory could not be written
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
