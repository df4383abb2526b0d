use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::error::EngineError;
use crate::io::tables::ApplianceSpec;
use crate::key::UnitKey;

use super::{DateRange, MINUTES_PER_DAY, SimulationEngine, UnitApplianceConfig};

/// A bottom-up appliance-usage engine.
///
/// Every appliance is simulated as a set of representative instances. Each
/// instance, each day, draws a daily functioning time around `func_time`
/// (relative spread `random_var_w`) and places switch-on cycles of at least
/// `func_cycle` minutes at random minutes inside its usage windows. The
/// instance load is scaled so that the instances together stand for the
/// unit's full appliance count.
///
/// The RNG is seeded from the engine seed and the unit key, so a unit's
/// profile does not depend on which units were simulated before it.
#[derive(Debug, Clone)]
pub struct StochasticEngine {
    /// Master random seed.
    pub seed: u64,
    /// Maximum simulated instances per appliance type.
    pub max_instances: usize,
    /// Gaussian noise on instance power, relative to nominal power.
    pub power_noise_std: f64,
}

impl StochasticEngine {
    /// Creates a new engine.
    ///
    /// # Arguments
    ///
    /// * `seed` - Master seed for reproducible profiles
    /// * `max_instances` - Cap on simulated instances per appliance (at least 1)
    pub fn new(seed: u64, max_instances: usize) -> Self {
        Self {
            seed,
            max_instances: max_instances.max(1),
            power_noise_std: 0.05,
        }
    }

    fn unit_rng(&self, unit: &UnitKey) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ fnv1a(unit.adm2.as_bytes(), unit.adm1.as_bytes()))
    }

    /// Adds one instance-day of usage into `day` (1440 samples).
    fn place_instance_day(&self, rng: &mut StdRng, spec: &ApplianceSpec, windows: &[(usize, usize)], scale: f64, day: &mut [f64]) {
        let window_minutes: usize = windows.iter().map(|(s, e)| e - s).sum();
        if window_minutes == 0 {
            return;
        }

        let spread = gaussian_noise(rng, spec.random_var_w.max(0.0));
        let target = (spec.func_time * (1.0 + spread)).clamp(0.0, window_minutes as f64);
        let mut remaining = target.round() as usize;
        let cycle = spec.func_cycle.max(1.0).round() as usize;
        let power = (spec.power * (1.0 + gaussian_noise(rng, self.power_noise_std))).max(0.0) * scale;

        // Every placement covers at least one minute, so this terminates.
        while remaining > 0 {
            let mut offset = rng.random_range(0..window_minutes);
            let Some(&(start, end)) = windows.iter().find(|(s, e)| {
                if offset < e - s {
                    true
                } else {
                    offset -= e - s;
                    false
                }
            }) else {
                break;
            };
            let on = start + offset;
            let duration = cycle.min(remaining).min(end - on);
            for sample in &mut day[on..on + duration] {
                *sample += power;
            }
            remaining -= duration;
        }
    }
}

impl Default for StochasticEngine {
    fn default() -> Self {
        Self::new(42, 25)
    }
}

impl SimulationEngine for StochasticEngine {
    fn simulate(&mut self, config: &UnitApplianceConfig, range: &DateRange) -> Result<Vec<f64>, EngineError> {
        let mut profile = vec![0.0; range.minutes()];
        let mut rng = self.unit_rng(&config.unit);

        for usage in &config.appliances {
            let spec = &usage.spec;
            if !usage.number.is_finite() || usage.number < 0.0 {
                return Err(EngineError::new(format!(
                    "invalid count {} for appliance \"{}\" in ({})",
                    usage.number, spec.name, config.unit
                )));
            }
            if usage.number == 0.0 || spec.power <= 0.0 || spec.func_time <= 0.0 {
                continue;
            }

            let instances = (usage.number.ceil() as usize).clamp(1, self.max_instances);
            let scale = usage.number / instances as f64;
            let windows = spec.windows();
            for day in profile.chunks_mut(MINUTES_PER_DAY) {
                for _ in 0..instances {
                    self.place_instance_day(&mut rng, spec, &windows, scale, day);
                }
            }
        }

        Ok(profile)
    }

    fn engine_name(&self) -> &'static str {
        "stochastic"
    }
}

/// Gaussian noise via the Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}

/// 64-bit FNV-1a over the two key parts, with a separator byte between them.
fn fnv1a(a: &[u8], b: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in a.iter().chain(&[0xff]).chain(b) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tables::ApplianceTemplate;

    fn template() -> ApplianceTemplate {
        let mut lamp = ApplianceSpec::new("lamp", 10.0, 240.0);
        lamp.func_cycle = 30.0;
        lamp.window_1_start = Some(1080);
        lamp.window_1_end = Some(1380);
        let fridge = ApplianceSpec::new("fridge", 150.0, 720.0);
        ApplianceTemplate::new(vec![lamp, fridge]).expect("template")
    }

    fn config(adm2: &str, counts: &[f64]) -> UnitApplianceConfig {
        UnitApplianceConfig::from_template(UnitKey::new(adm2, "Lagos"), &template(), counts)
    }

    fn range() -> DateRange {
        DateRange::parse("2024-01-01", "2024-01-03").expect("range")
    }

    #[test]
    fn profile_has_one_sample_per_minute() {
        let profile = StochasticEngine::default().simulate(&config("Ikeja", &[5.0, 2.0]), &range());
        assert_eq!(profile.map(|p| p.len()).ok(), Some(3 * 1440));
    }

    #[test]
    fn same_seed_and_unit_is_deterministic() {
        let a = StochasticEngine::new(7, 10).simulate(&config("Ikeja", &[5.0, 2.0]), &range()).ok();
        let b = StochasticEngine::new(7, 10).simulate(&config("Ikeja", &[5.0, 2.0]), &range()).ok();
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn lamp_only_draws_inside_its_window() {
        let profile = StochasticEngine::default()
            .simulate(&config("Ikeja", &[3.0, 0.0]), &range())
            .unwrap_or_default();
        for (t, &v) in profile.iter().enumerate() {
            let minute = t % MINUTES_PER_DAY;
            if !(1080..1380).contains(&minute) {
                assert_eq!(v, 0.0, "load outside window at minute {minute}");
            }
        }
        assert!(profile.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn energy_tracks_functioning_time() {
        let mut engine = StochasticEngine::default();
        engine.power_noise_std = 0.0;
        // 4 fridges, no variability: 4 × 150 W × 720 min per day.
        let profile = engine
            .simulate(&config("Ikeja", &[0.0, 4.0]), &range())
            .unwrap_or_default();
        let per_day: f64 = profile[..MINUTES_PER_DAY].iter().sum();
        assert!((per_day - 4.0 * 150.0 * 720.0).abs() < 1e-6, "got {per_day}");
    }

    #[test]
    fn negative_count_is_an_engine_error() {
        let result = StochasticEngine::default().simulate(&config("Ikeja", &[-1.0, 0.0]), &range());
        assert!(result.is_err());
    }

    #[test]
    fn unit_seed_differs_between_units() {
        let engine = StochasticEngine::default();
        let mut a = engine.unit_rng(&UnitKey::new("Ikeja", "Lagos"));
        let mut b = engine.unit_rng(&UnitKey::new("Lagos", "Ikeja"));
        assert_ne!(a.random::<u64>(), b.random::<u64>());
    }
}
