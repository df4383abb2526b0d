use crate::error::EngineError;

use super::{DateRange, MINUTES_PER_DAY, SimulationEngine, UnitApplianceConfig};

/// A deterministic engine producing a known analytic load shape.
///
/// Each unit's mean load is the sum over appliances of
/// `number × power × func_time / 1440`, i.e. the energy the template asks for
/// spread evenly over the day. That mean is modulated by a daily sinusoid and
/// a linear day-over-day trend:
///
/// `load(t) = mean × (1 + amp × sin(2π·m/1440 + phase)) × (1 + trend × d)`
///
/// with `m = t mod 1440` and `d = t / 1440`. The result is clamped at zero.
///
/// # Examples
///
/// ```
/// use demand_atlas::engine::{DateRange, SimulationEngine, UnitApplianceConfig, WaveformEngine};
/// use demand_atlas::io::tables::{ApplianceSpec, ApplianceTemplate};
/// use demand_atlas::key::UnitKey;
///
/// let template = ApplianceTemplate::new(vec![ApplianceSpec::new("fridge", 100.0, 1440.0)]).unwrap();
/// let cfg = UnitApplianceConfig::from_template(UnitKey::new("Ikeja", "Lagos"), &template, &[2.0]);
/// let range = DateRange::parse("2024-01-01", "2024-01-02").unwrap();
///
/// let profile = WaveformEngine::flat().simulate(&cfg, &range).unwrap();
/// assert_eq!(profile.len(), 2 * 1440);
/// assert_eq!(profile[0], 200.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformEngine {
    /// Relative amplitude of the daily sinusoid.
    pub amp: f64,
    /// Phase offset (radians).
    pub phase_rad: f64,
    /// Relative change of the daily level per elapsed day.
    pub trend_per_day: f64,
}

impl Default for WaveformEngine {
    fn default() -> Self {
        Self {
            amp: 0.5,
            phase_rad: 1.2,
            trend_per_day: 0.01,
        }
    }
}

impl WaveformEngine {
    pub fn new(amp: f64, phase_rad: f64, trend_per_day: f64) -> Self {
        Self {
            amp,
            phase_rad,
            trend_per_day,
        }
    }

    /// Constant load at the unit's mean level.
    pub fn flat() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Mean load (W) implied by the configuration.
    pub fn mean_load(config: &UnitApplianceConfig) -> f64 {
        config
            .appliances
            .iter()
            .map(|a| a.number * a.spec.power * a.spec.func_time / MINUTES_PER_DAY as f64)
            .sum()
    }

    /// Load at global minute `t` for a unit with the given mean load.
    pub fn value_at(&self, mean: f64, t: usize) -> f64 {
        let minute = (t % MINUTES_PER_DAY) as f64;
        let day = (t / MINUTES_PER_DAY) as f64;
        let angle = 2.0 * std::f64::consts::PI * minute / MINUTES_PER_DAY as f64 + self.phase_rad;
        let shape = 1.0 + self.amp * angle.sin();
        let trend = 1.0 + self.trend_per_day * day;
        (mean * shape * trend).max(0.0)
    }
}

impl SimulationEngine for WaveformEngine {
    fn simulate(&mut self, config: &UnitApplianceConfig, range: &DateRange) -> Result<Vec<f64>, EngineError> {
        let mean = Self::mean_load(config);
        if !mean.is_finite() {
            return Err(EngineError::new(format!("non-finite mean load for ({})", config.unit)));
        }
        Ok((0..range.minutes()).map(|t| self.value_at(mean, t)).collect())
    }

    fn engine_name(&self) -> &'static str {
        "waveform"
    }
}
