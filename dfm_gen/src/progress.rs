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

//! Injected progress reporting and cooperative cancellation
//!
//! The reporter is the only cross-cell side effect during the implicit
//! calculation, so it must be thread-safe. Cancellation is cooperative:
//! the controller polls [ProgressReporter::is_cancelled] between timesteps.

/// Thread-safe progress sink shared by all cells
pub trait ProgressReporter: Send + Sync {
    /// Called when a unit of work (one cell, or one DFN stage) completes
    fn report(&self, completed: usize, total: usize);

    /// Polled between timesteps; returning true aborts the current episode
    /// and skips the remaining ones
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Reporter that ignores everything
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {
    fn report(&self, _completed: usize, _total: usize) {}
}
