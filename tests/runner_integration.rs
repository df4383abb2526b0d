//! Integration tests for the config-driven stage runner.

mod common;

use std::fs;

use demand_atlas::columns;
use demand_atlas::io::geojson::read_feature_collection;
use demand_atlas::key::UnitKey;
use demand_atlas::pipeline::aggregate::AggregateError;
use demand_atlas::runner::{self, RunError};
use serde_json::json;
use tempfile::TempDir;

#[test]
fn stages_chain_from_counts_to_region_row() {
    let dir = TempDir::new().expect("tempdir");
    let mut cfg = common::config_in(dir.path());
    cfg.binding.geometry = common::write(
        dir.path(),
        "data/lga.geojson",
        &common::squares_geojson(&[
            json!({ "fid": 1, "shapeName": "Ikeja", "adm1": "Lagos" }),
            json!({ "fid": 2, "shapeName": "Nassarawa", "adm1": "Kano" }),
        ]),
    );
    cfg.binding.output = dir.path().join("out/NGA_statistics.geojson");
    cfg.unify.pattern = format!("{}/out/NGA_*.geojson", dir.path().display());
    assert!(cfg.validate().is_empty());

    let summary = runner::generate(&cfg, false).expect("generate");
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.checkpoints.len(), 2);

    let normalized = runner::aggregate(&cfg, false, None).expect("aggregate");
    assert_eq!(normalized.len(), 3);
    let missing_hh = normalized.rows().filter(|r| r.per_household.is_none()).count();
    assert_eq!(missing_hh, 1);
    assert!(cfg.aggregation.output.exists());
    assert!(cfg.aggregation.normalized_output.exists());

    runner::daily(&cfg, None).expect("daily");
    let daily = fs::read_to_string(&cfg.aggregation.daily_series_output).expect("daily csv");
    assert_eq!(daily.lines().count(), 1 + 3 * 1440);

    runner::bind(&cfg, None).expect("bind");
    let bound = read_feature_collection(&cfg.binding.output).expect("bound layer");
    assert_eq!(bound.features.len(), 3);
    let epe = bound
        .features
        .iter()
        .find(|f| f.property_text(columns::ADM2).as_deref() == Some("Epe"))
        .expect("Epe appended without geometry");
    assert!(epe.geometry.is_none());
    assert!(bound.features.iter().all(|f| f.property(columns::FID).is_none()));

    runner::unify(&cfg, None).expect("unify");
    let unified = read_feature_collection(&cfg.unify.output).expect("unified layer");
    assert_eq!(unified.features.len(), 2);
    assert!(
        unified
            .features
            .iter()
            .all(|f| f.property_text(columns::ISO3).as_deref() == Some("NGA"))
    );

    let row_path = dir.path().join("out/ikeja.csv");
    runner::region(&cfg, "Ikeja", Some(row_path.as_path())).expect("region");
    let row = fs::read_to_string(&row_path).expect("region csv");
    assert_eq!(row.lines().count(), 2);
    assert!(row.lines().nth(1).is_some_and(|l| l.starts_with("Lagos,Ikeja,NGA,")));

    let unknown = runner::region(&cfg, "Atlantis", None);
    assert!(matches!(unknown, Err(RunError::Region(_))));
}

#[test]
fn cached_statistics_survive_removed_checkpoints() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = common::config_in(dir.path());
    runner::generate(&cfg, false).expect("generate");
    let first = runner::aggregate(&cfg, false, None).expect("aggregate");

    fs::remove_dir_all(&cfg.generation.output_dir).expect("remove checkpoints");
    let cached = runner::aggregate(&cfg, false, None).expect("cached aggregate");
    assert_eq!(cached, first);

    let refreshed = runner::aggregate(&cfg, true, None);
    assert!(matches!(
        refreshed,
        Err(RunError::Aggregate(AggregateError::NoCheckpoints))
    ));
}

#[test]
fn missing_count_column_fails_before_simulation() {
    let dir = TempDir::new().expect("tempdir");
    let mut cfg = common::config_in(dir.path());
    cfg.input.appliance_counts = common::write(dir.path(), "data/bad.csv", "shapeName,adm1,fridge\nIkeja,Lagos,1\n");

    let result = runner::generate(&cfg, false);
    assert!(matches!(result, Err(RunError::Table(_))));
    assert!(!cfg.generation.output_dir.exists());
}

#[test]
fn resume_from_config_flag() {
    let dir = TempDir::new().expect("tempdir");
    let mut cfg = common::config_in(dir.path());
    runner::generate(&cfg, false).expect("first run");

    cfg.generation.resume = true;
    let summary = runner::generate(&cfg, false).expect("resume");
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.resumed, 3);
    assert!(summary.checkpoints.is_empty());

    let normalized = runner::aggregate(&cfg, true, None).expect("aggregate");
    assert!(normalized.get(&UnitKey::new("Ikeja", "Lagos")).is_some());
}
