//! Stage wiring: configuration in, artifacts out.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cli::{CliOptions, Command};
use crate::config::PipelineConfig;
use crate::error::{CheckpointError, GeoError, TableError};
use crate::io::checkpoint::CheckpointKind;
use crate::io::export::{export_daily_series, export_normalized, export_region_row};
use crate::io::geojson::{read_feature_collection, write_feature_collection};
use crate::io::tables::{ApplianceCountTable, ApplianceTemplate, HouseholdTable};
use crate::pipeline::aggregate::AggregateError;
use crate::pipeline::bind::BindError;
use crate::pipeline::cache::{ArtifactCache, CachePolicy, FsStore};
use crate::pipeline::generate::GenerateError;
use crate::pipeline::region::RegionError;
use crate::pipeline::unify::UnifyError;
use crate::pipeline::{
    DailySeriesBuilder, GenerationSettings, GenerationSummary, GeometryBinder, HouseholdNormalizer,
    MultiSourceGeoUnifier, NormalizedTable, ProfileBatchGenerator, RegionRowExporter, StatisticsAggregator,
};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Geo(#[from] GeoError),

    #[error(transparent)]
    Unify(#[from] UnifyError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("cannot write \"{}\": {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Runs the stage selected on the command line.
///
/// # Errors
///
/// Returns the first stage error; artifacts written before it stay on disk.
pub fn execute(config: &PipelineConfig, opts: &CliOptions) -> Result<(), RunError> {
    let out = opts.out.as_deref();
    match &opts.command {
        Command::Generate => generate(config, opts.resume).map(drop),
        Command::Aggregate => aggregate(config, opts.refresh, out).map(drop),
        Command::Daily => daily(config, out),
        Command::Bind => bind(config, out),
        Command::Unify => unify(config, out),
        Command::Region { name } => region(config, name, out),
        Command::Run => {
            generate(config, opts.resume)?;
            aggregate(config, opts.refresh, None)?;
            daily(config, None)?;
            bind(config, None)
        }
    }
}

/// Simulates every unit of the appliance-count table into checkpoints.
///
/// # Errors
///
/// Missing input columns fail before any simulation.
pub fn generate(config: &PipelineConfig, resume: bool) -> Result<GenerationSummary, RunError> {
    let template = ApplianceTemplate::from_csv_path(&config.input.template)?;
    let table = ApplianceCountTable::from_csv_path(&config.input.appliance_counts, &config.count_columns(), &template)?;
    let settings = GenerationSettings {
        range: config.date_range()?,
        save_every: config.generation.save_every,
        resume: resume || config.generation.resume,
    };

    let engine = config.engine();
    let mut generator = ProfileBatchGenerator::new(engine, template, config.checkpoint_layout(), settings)?;
    let summary = generator.run(&table)?;
    log::info!(
        "generated {} units ({} resumed, {} skipped) into {} checkpoints",
        summary.processed,
        summary.resumed,
        summary.skipped.len(),
        summary.checkpoints.len()
    );
    Ok(summary)
}

/// Aggregates full-resolution checkpoints, then joins household counts and
/// writes the normalized table to `out` or `aggregation.normalized_output`.
///
/// # Errors
///
/// See [`StatisticsAggregator::aggregate`].
pub fn aggregate(config: &PipelineConfig, refresh: bool, out: Option<&Path>) -> Result<NormalizedTable, RunError> {
    let checkpoints = config.checkpoint_layout().paths(CheckpointKind::Full)?;
    let policy = if refresh {
        CachePolicy::ForceRefresh
    } else {
        config.cache_policy()
    };
    let (root, key) = split_artifact_path(&config.aggregation.output);
    let mut aggregator = StatisticsAggregator::new(ArtifactCache::new(FsStore::new(root), policy), key);
    let stats = aggregator.aggregate(&checkpoints)?.into_inner();

    let households = HouseholdTable::from_csv_path(&config.input.appliance_counts, &config.count_columns())?;
    let normalized = HouseholdNormalizer.normalize(&stats, &households);

    let path = out.unwrap_or(&config.aggregation.normalized_output);
    export_normalized(&normalized, path).map_err(|source| write_error(path, source))?;
    log::info!("wrote {} normalized rows to {}", normalized.len(), path.display());
    Ok(normalized)
}

/// Collects the daily-average checkpoints into one long-format CSV.
///
/// # Errors
///
/// See [`DailySeriesBuilder::build`].
pub fn daily(config: &PipelineConfig, out: Option<&Path>) -> Result<(), RunError> {
    let checkpoints = config.checkpoint_layout().paths(CheckpointKind::DailyAverage)?;
    let series = DailySeriesBuilder.build(&checkpoints)?;
    let path = out.unwrap_or(&config.aggregation.daily_series_output);
    export_daily_series(&series, path).map_err(|source| write_error(path, source))?;
    log::info!("wrote daily series of {} units to {}", series.len(), path.display());
    Ok(())
}

/// Joins the normalized table onto the administrative geometry.
///
/// # Errors
///
/// See [`GeometryBinder::bind`].
pub fn bind(config: &PipelineConfig, out: Option<&Path>) -> Result<(), RunError> {
    let normalized = NormalizedTable::from_csv_path(&config.aggregation.normalized_output)?;
    let geometry_path = &config.binding.geometry;
    let geometry = read_feature_collection(geometry_path)?.to_wgs84(geometry_path)?;

    let binder = GeometryBinder::new(config.name_columns(), config.name_corrections()?);
    let layer = binder.bind(geometry, &normalized)?;
    let path = out.unwrap_or(&config.binding.output);
    write_feature_collection(path, &layer.collection)?;
    let s = layer.summary;
    log::info!(
        "bound {} units to geometry ({} geometry only, {} statistics only) into {}",
        s.matched,
        s.geometry_only,
        s.statistics_only,
        path.display()
    );
    Ok(())
}

/// Merges every source layer matching `unify.pattern`.
///
/// # Errors
///
/// See [`MultiSourceGeoUnifier::unify_files`].
pub fn unify(config: &PipelineConfig, out: Option<&Path>) -> Result<(), RunError> {
    let path = out.unwrap_or(&config.unify.output);
    let sources = MultiSourceGeoUnifier::discover(&config.unify.pattern, Some(path))?;
    let layer = MultiSourceGeoUnifier::new(config.unify_settings()).unify_files(&sources)?;
    for skipped in &layer.report.skipped {
        log::warn!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    write_feature_collection(path, &layer.collection).map_err(UnifyError::Write)?;
    log::info!(
        "unified {} features from {} sources into {}",
        layer.collection.features.len(),
        layer.report.processed.len(),
        path.display()
    );
    Ok(())
}

/// Writes one region of the unified layer to `out`, or stdout.
///
/// # Errors
///
/// Returns `RegionError::UnknownRegion` for a name absent from the layer.
pub fn region(config: &PipelineConfig, name: &str, out: Option<&Path>) -> Result<(), RunError> {
    let layer = read_feature_collection(&config.unify.output)?;
    let exporter = RegionRowExporter::new(&layer);
    match out {
        Some(path) => {
            let feature = exporter.find(name).ok_or_else(|| RegionError::UnknownRegion {
                name: name.to_string(),
            })?;
            export_region_row(feature, path).map_err(|source| write_error(path, source))?;
        }
        None => exporter.export(name, io::stdout().lock())?,
    }
    Ok(())
}

/// Store root and key of a cache artifact path.
fn split_artifact_path(path: &Path) -> (PathBuf, String) {
    let root = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let key = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "statistics.csv".to_string());
    (root, key)
}

fn write_error(path: &Path, source: io::Error) -> RunError {
    RunError::Write {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_splits_into_root_and_key() {
        let (root, key) = split_artifact_path(Path::new("output/stats/statistics.csv"));
        assert_eq!(root, PathBuf::from("output/stats"));
        assert_eq!(key, "statistics.csv");

        let (root, key) = split_artifact_path(Path::new("statistics.csv"));
        assert_eq!(root, PathBuf::from("."));
        assert_eq!(key, "statistics.csv");
    }
}
