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

//! Deformation episodes and model time units

/// Time units accepted in configuration files. All rates and durations are
/// converted to seconds when cells are constructed and never converted back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnits {
    Ma,
    Year,
    Second,
}

impl TimeUnits {
    /// Length of one unit in seconds
    pub fn seconds(&self) -> f64 {
        const YEAR: f64 = 365.25 * 24.0 * 3600.0;
        match self {
            TimeUnits::Ma => 1e6 * YEAR,
            TimeUnits::Year => YEAR,
            TimeUnits::Second => 1.0,
        }
    }

    pub fn parse(token: &str) -> Option<TimeUnits> {
        match token.to_ascii_lowercase().as_str() {
            "ma" => Some(TimeUnits::Ma),
            "year" | "years" => Some(TimeUnits::Year),
            "second" | "seconds" => Some(TimeUnits::Second),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeUnits::Ma => "ma",
            TimeUnits::Year => "year",
            TimeUnits::Second => "second",
        }
    }
}

/// One contiguous period of constant load rates.
///
/// All quantities are in SI units (seconds, Pa/s, K/s, m/s, radians); the
/// configuration layer performs unit conversion before episodes reach a
/// cell. A negative duration means "run until fractures cease growing".
#[derive(Clone, Copy, Debug)]
pub struct DeformationEpisode {
    /// Azimuth of the minimum horizontal strain direction (rad from north)
    pub ehmin_azimuth: f64,
    /// Minimum horizontal strain rate; negative = extensional
    pub ehmin_rate: f64,
    /// Maximum horizontal strain rate; negative = extensional
    pub ehmax_rate: f64,
    /// Rate of fluid overpressure change [Pa/s]
    pub overpressure_rate: f64,
    /// Rate of temperature change in excess of the geothermal trend [K/s]
    pub temperature_rate: f64,
    /// Rate of depth change [m/s]; applied to cell depth only for episodes
    /// with non-negative duration
    pub uplift_rate: f64,
    /// Stress arching factor in [0, 1]: the fraction of the overpressure
    /// change carried by arching rather than by effective vertical stress
    pub stress_arching: f64,
    /// Duration [s]; negative = indefinite
    pub duration: f64,
}

impl DeformationEpisode {
    pub fn is_indefinite(&self) -> bool {
        self.duration < 0.0
    }
}

impl Default for DeformationEpisode {
    fn default() -> Self {
        DeformationEpisode {
            ehmin_azimuth: 0.0,
            ehmin_rate: 0.0,
            ehmax_rate: 0.0,
            overpressure_rate: 0.0,
            temperature_rate: 0.0,
            uplift_rate: 0.0,
            stress_arching: 0.0,
            duration: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversion() {
        assert!((TimeUnits::Year.seconds() - 31_557_600.0).abs() < 1.0);
        assert!((TimeUnits::Ma.seconds() - 3.15576e13).abs() < 1e6);
        assert_eq!(TimeUnits::parse("MA"), Some(TimeUnits::Ma));
        assert_eq!(TimeUnits::parse("fortnight"), None);
    }
}
