//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use demand_atlas::config::PipelineConfig;
use demand_atlas::engine::{DateRange, WaveformEngine};
use demand_atlas::io::checkpoint::CheckpointLayout;
use demand_atlas::io::tables::{ApplianceCountTable, ApplianceTemplate, CountColumns};
use demand_atlas::pipeline::{GenerationSettings, ProfileBatchGenerator};

/// Two appliances running all day: 100 W fridge, 10 W lamp.
pub const TEMPLATE_CSV: &str = "unified_names,power,func_time\nfridge,100,1440\nlamp,10,1440\n";

/// Three units. Ikeja draws a flat 1200 W over 4 households; Epe has no
/// household count; Nassarawa draws 30 W over 10 households.
pub const COUNTS_CSV: &str = "\
shapeName,adm1,fridge,lamp,num_hh
Ikeja,Lagos,12,0,4
Epe,Lagos,1,0,
Nassarawa,Kano,0,3,10
";

/// Writes `contents` to `dir/name` and returns the path.
pub fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fixture dir");
    }
    fs::write(&path, contents).expect("write fixture");
    path
}

pub fn template() -> ApplianceTemplate {
    ApplianceTemplate::from_reader(TEMPLATE_CSV.as_bytes(), Path::new("template.csv")).expect("template")
}

pub fn count_table(csv: &str) -> ApplianceCountTable {
    ApplianceCountTable::from_reader(csv.as_bytes(), Path::new("counts.csv"), &CountColumns::default(), &template())
        .expect("count table")
}

/// One simulated day.
pub fn one_day() -> DateRange {
    DateRange::parse("2024-03-01", "2024-03-01").expect("date range")
}

/// Generator over a flat waveform, so every profile sample equals the unit's
/// mean load.
pub fn flat_generator(dir: &Path, save_every: usize, resume: bool) -> ProfileBatchGenerator<WaveformEngine> {
    let settings = GenerationSettings {
        range: one_day(),
        save_every,
        resume,
    };
    ProfileBatchGenerator::new(
        WaveformEngine::flat(),
        template(),
        CheckpointLayout::new(dir.join("profiles"), "profiles"),
        settings,
    )
    .expect("generator")
}

/// Configuration with every input and output under `dir`.
pub fn config_in(dir: &Path) -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.input.template = write(dir, "data/template.csv", TEMPLATE_CSV);
    cfg.input.appliance_counts = write(dir, "data/counts.csv", COUNTS_CSV);
    cfg.generation.start_date = "2024-03-01".to_string();
    cfg.generation.end_date = "2024-03-02".to_string();
    cfg.generation.save_every = 2;
    cfg.generation.engine = "waveform".to_string();
    cfg.generation.output_dir = dir.join("out/profiles");
    cfg.aggregation.output = dir.join("out/statistics.csv");
    cfg.aggregation.normalized_output = dir.join("out/statistics_normalized.csv");
    cfg.aggregation.daily_series_output = dir.join("out/daily.csv");
    cfg.binding.output = dir.join("out/statistics.geojson");
    cfg.unify.output = dir.join("out/webmap.geojson");
    cfg
}

/// A unit square feature collection with the given properties per feature.
pub fn squares_geojson(properties: &[serde_json::Value]) -> String {
    let features: Vec<serde_json::Value> = properties
        .iter()
        .map(|props| {
            serde_json::json!({
                "type": "Feature",
                "properties": props,
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                }
            })
        })
        .collect();
    serde_json::json!({ "type": "FeatureCollection", "features": features }).to_string()
}
