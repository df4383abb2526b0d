//! Household appliance-usage simulation engines.
//!
//! The pipeline only depends on the [`SimulationEngine`] capability: given a
//! unit's appliance configuration and a date range, return one
//! minute-resolution load sample per minute of the range.

use chrono::NaiveDate;
use thiserror::Error;

use crate::error::EngineError;
use crate::io::tables::{ApplianceSpec, ApplianceTemplate};
use crate::key::UnitKey;

/// Appliance-usage model driven by template parameters and a seeded RNG.
pub mod stochastic;
/// Deterministic analytic engine.
pub mod waveform;

pub use stochastic::StochasticEngine;
pub use waveform::WaveformEngine;

/// Samples per simulated day.
pub const MINUTES_PER_DAY: usize = 1440;

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

/// Rejected date range bounds.
#[derive(Debug, Error)]
pub enum DateRangeError {
    #[error("invalid date {value:?}: {source}")]
    Parse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("end date {end} is before start date {start}")]
    Reversed { start: NaiveDate, end: NaiveDate },
}

impl DateRange {
    /// Creates a range covering `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns `DateRangeError::Reversed` if `end < start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if end < start {
            return Err(DateRangeError::Reversed { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parses `YYYY-MM-DD` bounds.
    ///
    /// # Errors
    ///
    /// Returns `DateRangeError::Parse` for a malformed date and
    /// `DateRangeError::Reversed` for reversed bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, DateRangeError> {
        let parse = |value: &str| {
            NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|source| DateRangeError::Parse {
                value: value.to_string(),
                source,
            })
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days in the range, both bounds included.
    pub fn days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Expected profile length: `days × 1440`.
    pub fn minutes(&self) -> usize {
        self.days() * MINUTES_PER_DAY
    }
}

/// One appliance of a unit: template parameters plus the unit's count.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplianceUse {
    pub spec: ApplianceSpec,
    pub number: f64,
}

/// Per-unit appliance configuration handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitApplianceConfig {
    pub unit: UnitKey,
    /// Appliances in template order.
    pub appliances: Vec<ApplianceUse>,
}

impl UnitApplianceConfig {
    /// Substitutes `counts` (template order) into a copy of the template.
    ///
    /// `counts` must have one entry per template appliance.
    pub fn from_template(unit: UnitKey, template: &ApplianceTemplate, counts: &[f64]) -> Self {
        debug_assert_eq!(counts.len(), template.len());
        let appliances = template
            .appliances()
            .iter()
            .zip(counts)
            .map(|(spec, &number)| ApplianceUse {
                spec: spec.clone(),
                number,
            })
            .collect();
        Self { unit, appliances }
    }
}

/// Capability interface of a household load simulator.
pub trait SimulationEngine {
    /// Produces the unit's minute-resolution load over `range`.
    ///
    /// Implementations must return exactly `range.minutes()` samples.
    ///
    /// # Errors
    ///
    /// Returns an `EngineError` when the simulation cannot be carried out.
    fn simulate(&mut self, config: &UnitApplianceConfig, range: &DateRange) -> Result<Vec<f64>, EngineError>;

    /// Returns a human-readable engine name.
    fn engine_name(&self) -> &'static str;
}

/// Engine selectable from configuration.
pub enum AnyEngine {
    Stochastic(StochasticEngine),
    Waveform(WaveformEngine),
}

impl SimulationEngine for AnyEngine {
    fn simulate(&mut self, config: &UnitApplianceConfig, range: &DateRange) -> Result<Vec<f64>, EngineError> {
        match self {
            Self::Stochastic(e) => e.simulate(config, range),
            Self::Waveform(e) => e.simulate(config, range),
        }
    }

    fn engine_name(&self) -> &'static str {
        match self {
            Self::Stochastic(e) => e.engine_name(),
            Self::Waveform(e) => e.engine_name(),
        }
    }
}
