//! TOML-based pipeline configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::columns;
use crate::engine::{AnyEngine, DateRange, StochasticEngine, WaveformEngine};
use crate::error::TableError;
use crate::io::checkpoint::CheckpointLayout;
use crate::io::tables::CountColumns;
use crate::pipeline::bind::{GeometryNameColumns, NameCorrections};
use crate::pipeline::cache::CachePolicy;
use crate::pipeline::unify::{InvalidGeometryPolicy, Iso3Rule, UnifySettings};

/// Top-level pipeline configuration parsed from TOML.
///
/// Every section is optional and falls back to its defaults. Load with
/// [`PipelineConfig::from_toml_file`] and check with
/// [`PipelineConfig::validate`] before running a stage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Appliance-count table and template.
    #[serde(default)]
    pub input: InputConfig,
    /// Profile generation and checkpointing.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Statistics artifacts.
    #[serde(default)]
    pub aggregation: AggregationConfig,
    /// Geometry join.
    #[serde(default)]
    pub binding: BindingConfig,
    /// Inline name corrections, `alias = "canonical"`.
    #[serde(default)]
    pub corrections: BTreeMap<String, String>,
    /// Geographic layer unification.
    #[serde(default)]
    pub unify: UnifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// Appliance-count CSV, one row per unit.
    pub appliance_counts: PathBuf,
    /// Appliance template CSV.
    pub template: PathBuf,
    pub adm2_column: String,
    pub adm1_column: String,
    /// Ignore `adm1_column`; every unit gets the placeholder as adm1.
    pub single_level: bool,
    pub households_column: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            appliance_counts: PathBuf::from("data/appliance_counts.csv"),
            template: PathBuf::from("data/appliance_template.csv"),
            adm2_column: "shapeName".to_string(),
            adm1_column: columns::ADM1.to_string(),
            single_level: false,
            households_column: columns::NUM_HH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// First simulated day, `YYYY-MM-DD`.
    pub start_date: String,
    /// Last simulated day (inclusive), `YYYY-MM-DD`.
    pub end_date: String,
    /// Units per checkpoint (must be > 0).
    pub save_every: usize,
    pub output_dir: PathBuf,
    /// Checkpoint file name prefix.
    pub output_prefix: String,
    pub resume: bool,
    /// Engine: `"stochastic"` or `"waveform"`.
    pub engine: String,
    /// Master random seed of the stochastic engine.
    pub seed: u64,
    /// Instance cap per appliance type of the stochastic engine.
    pub max_instances: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            start_date: "2020-01-01".to_string(),
            end_date: "2020-01-07".to_string(),
            save_every: 50,
            output_dir: PathBuf::from("output/profiles"),
            output_prefix: "profiles".to_string(),
            resume: false,
            engine: "stochastic".to_string(),
            seed: 42,
            max_instances: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregationConfig {
    /// Statistics cache artifact.
    pub output: PathBuf,
    pub normalized_output: PathBuf,
    /// `"use-if-present"`, `"force-refresh"` or `"always-compute"`.
    pub cache: String,
    pub daily_series_output: PathBuf,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("output/statistics.csv"),
            normalized_output: PathBuf::from("output/statistics_normalized.csv"),
            cache: "use-if-present".to_string(),
            daily_series_output: PathBuf::from("output/daily_profiles.csv"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BindingConfig {
    /// Administrative shapes (GeoJSON).
    pub geometry: PathBuf,
    pub adm2_property: String,
    /// Absent for a single-level join.
    pub adm1_property: Option<String>,
    pub output: PathBuf,
    /// Optional `alias,canonical` CSV, merged with `[corrections]`.
    pub corrections_file: Option<PathBuf>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            geometry: PathBuf::from("data/boundaries.geojson"),
            adm2_property: "shapeName".to_string(),
            adm1_property: Some(columns::ADM1.to_string()),
            output: PathBuf::from("output/statistics.geojson"),
            corrections_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnifyConfig {
    /// Glob pattern of source layers.
    pub pattern: String,
    pub output: PathBuf,
    pub special_iso3: Vec<String>,
    pub admin2_candidates: Vec<String>,
    pub admin1_candidates: Vec<String>,
    pub retain_invalid_geometries: bool,
}

impl Default for UnifyConfig {
    fn default() -> Self {
        let settings = UnifySettings::default();
        Self {
            pattern: "layers/*.geojson".to_string(),
            output: PathBuf::from("output/webmap_layers.geojson"),
            special_iso3: settings.special_iso3.into_iter().collect(),
            admin2_candidates: settings.admin2_candidates,
            admin1_candidates: settings.admin1_candidates,
            retain_invalid_geometries: false,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"generation.save_every"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl PipelineConfig {
    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let i = &self.input;
        if i.adm2_column.trim().is_empty() {
            errors.push(ConfigError::new("input.adm2_column", "must not be empty"));
        }
        if !i.single_level && i.adm1_column.trim().is_empty() {
            errors.push(ConfigError::new(
                "input.adm1_column",
                "must not be empty unless input.single_level is set",
            ));
        }

        let g = &self.generation;
        if g.save_every == 0 {
            errors.push(ConfigError::new("generation.save_every", "must be > 0"));
        }
        if g.max_instances == 0 {
            errors.push(ConfigError::new("generation.max_instances", "must be > 0"));
        }
        if g.output_prefix.is_empty() || g.output_prefix.contains(['/', '\\']) {
            errors.push(ConfigError::new(
                "generation.output_prefix",
                "must be a non-empty file name prefix",
            ));
        }
        if g.engine != "stochastic" && g.engine != "waveform" {
            errors.push(ConfigError::new(
                "generation.engine",
                format!("must be \"stochastic\" or \"waveform\", got \"{}\"", g.engine),
            ));
        }
        if let Err(e) = self.date_range() {
            errors.push(e);
        }

        if CachePolicy::from_name(&self.aggregation.cache).is_none() {
            errors.push(ConfigError::new(
                "aggregation.cache",
                format!(
                    "must be \"use-if-present\", \"force-refresh\" or \"always-compute\", got \"{}\"",
                    self.aggregation.cache
                ),
            ));
        }

        if self.binding.adm2_property.trim().is_empty() {
            errors.push(ConfigError::new("binding.adm2_property", "must not be empty"));
        }

        let u = &self.unify;
        if u.pattern.trim().is_empty() {
            errors.push(ConfigError::new("unify.pattern", "must not be empty"));
        }
        if u.admin2_candidates.is_empty() {
            errors.push(ConfigError::new("unify.admin2_candidates", "must list at least one column"));
        }
        if let Some(code) = u
            .special_iso3
            .iter()
            .find(|c| c.len() != 3 || !c.bytes().all(|b| b.is_ascii_uppercase()))
        {
            errors.push(ConfigError::new(
                "unify.special_iso3",
                format!("\"{code}\" is not a three-letter uppercase code"),
            ));
        }

        errors
    }

    /// Simulated date range.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for malformed or reversed dates.
    pub fn date_range(&self) -> Result<DateRange, ConfigError> {
        DateRange::parse(&self.generation.start_date, &self.generation.end_date)
            .map_err(|e| ConfigError::new("generation.start_date", e.to_string()))
    }

    pub fn count_columns(&self) -> CountColumns {
        CountColumns {
            adm2: self.input.adm2_column.clone(),
            adm1: (!self.input.single_level).then(|| self.input.adm1_column.clone()),
            households: self.input.households_column.clone(),
        }
    }

    pub fn checkpoint_layout(&self) -> CheckpointLayout {
        CheckpointLayout::new(&self.generation.output_dir, &self.generation.output_prefix)
    }

    /// Engine selected by `generation.engine`; unknown names fall back to
    /// the stochastic engine (rejected earlier by `validate`).
    pub fn engine(&self) -> AnyEngine {
        match self.generation.engine.as_str() {
            "waveform" => AnyEngine::Waveform(WaveformEngine::default()),
            _ => AnyEngine::Stochastic(StochasticEngine::new(
                self.generation.seed,
                self.generation.max_instances,
            )),
        }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::from_name(&self.aggregation.cache).unwrap_or_default()
    }

    pub fn name_columns(&self) -> GeometryNameColumns {
        GeometryNameColumns {
            adm2: self.binding.adm2_property.clone(),
            adm1: self.binding.adm1_property.clone(),
        }
    }

    /// Name corrections from `binding.corrections_file`, overlaid by the
    /// inline `[corrections]` table.
    ///
    /// # Errors
    ///
    /// See [`NameCorrections::from_csv_path`].
    pub fn name_corrections(&self) -> Result<NameCorrections, TableError> {
        let mut corrections = match &self.binding.corrections_file {
            Some(path) => NameCorrections::from_csv_path(path)?,
            None => NameCorrections::new(),
        };
        corrections.extend(&self.corrections);
        Ok(corrections)
    }

    pub fn unify_settings(&self) -> UnifySettings {
        let u = &self.unify;
        UnifySettings {
            admin2_candidates: u.admin2_candidates.clone(),
            admin1_candidates: u.admin1_candidates.clone(),
            special_iso3: u.special_iso3.iter().cloned().collect(),
            iso3_rules: Iso3Rule::default_chain(),
            invalid_geometries: if u.retain_invalid_geometries {
                InvalidGeometryPolicy::Retain
            } else {
                InvalidGeometryPolicy::Filter
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let errors = PipelineConfig::default().validate();
        assert!(errors.is_empty(), "defaults should be valid: {errors:?}");
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[input]
appliance_counts = "data/nga_counts.csv"
template = "data/template.csv"
adm2_column = "shapeName"
adm1_column = "state"

[generation]
start_date = "2019-01-01"
end_date = "2019-12-31"
save_every = 10
output_dir = "out/nga"
output_prefix = "NGA_all_intermediate"
engine = "waveform"

[aggregation]
cache = "force-refresh"

[binding]
geometry = "data/nga_lga.geojson"
adm2_property = "lga_name"
adm1_property = "state_name"

[corrections]
"Ifelodun North" = "Ifelodun"

[unify]
pattern = "layers/*.geojson"
special_iso3 = ["NGA"]
"#;
        let cfg = PipelineConfig::from_toml_str(toml).expect("should parse");
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.generation.save_every, 10);
        assert_eq!(cfg.cache_policy(), CachePolicy::ForceRefresh);
        assert_eq!(cfg.date_range().map(|r| r.days()).ok(), Some(365));
        let corrections = cfg.name_corrections().expect("corrections");
        assert_eq!(corrections.correct("Ifelodun North"), "Ifelodun");
        assert_eq!(cfg.count_columns().adm1.as_deref(), Some("state"));
        assert!(matches!(cfg.engine(), AnyEngine::Waveform(_)));
    }

    #[test]
    fn inline_corrections_override_the_corrections_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("corrections.csv");
        fs::write(&file, "alias,canonical\nOshodi Isolo,Oshodi/Isolo\nEgbado North,Yewa North\n").expect("write");

        let mut cfg = PipelineConfig::default();
        cfg.binding.corrections_file = Some(file);
        cfg.corrections.insert("Oshodi Isolo".to_string(), "Oshodi-Isolo".to_string());

        let corrections = cfg.name_corrections().expect("corrections");
        assert_eq!(corrections.len(), 2);
        assert_eq!(corrections.correct("Oshodi Isolo"), "Oshodi-Isolo");
        assert_eq!(corrections.correct("Egbado North"), "Yewa North");
    }

    #[test]
    fn missing_corrections_file_is_an_error() {
        let mut cfg = PipelineConfig::default();
        cfg.binding.corrections_file = Some(PathBuf::from("does/not/exist.csv"));
        assert!(cfg.name_corrections().is_err());
    }

    #[test]
    fn single_level_drops_adm1_column() {
        let cfg = PipelineConfig::from_toml_str("[input]\nsingle_level = true\nadm1_column = \"\"\n")
            .expect("should parse");
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.count_columns().adm1, None);
    }

    #[test]
    fn unknown_field_rejected() {
        let err = PipelineConfig::from_toml_str("[generation]\nsave_evry = 3\n");
        assert!(err.is_err());
    }

    #[test]
    fn invalid_values_reported_by_field() {
        let toml = r#"
[generation]
save_every = 0
engine = "magic"
start_date = "2020-02-01"
end_date = "2020-01-01"

[aggregation]
cache = "sometimes"

[unify]
special_iso3 = ["ng"]
"#;
        let cfg = PipelineConfig::from_toml_str(toml).expect("should parse");
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        for expected in [
            "generation.save_every",
            "generation.engine",
            "generation.start_date",
            "aggregation.cache",
            "unify.special_iso3",
        ] {
            assert!(fields.iter().any(|f| f == expected), "missing {expected} in {fields:?}");
        }
    }
}
