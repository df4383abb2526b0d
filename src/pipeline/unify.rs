//! Unification of heterogeneous GeoJSON sources into one fixed-schema layer.
//!
//! Every source is reprojected to WGS84, its administrative names and
//! country code are resolved through ordered rule lists, and its features are
//! projected onto the unified property schema before concatenation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::columns;
use crate::error::GeoError;
use crate::io::geojson::{Feature, FeatureCollection, read_feature_collection};
use crate::key::PLACEHOLDER;

#[derive(Debug, Error)]
pub enum UnifyError {
    #[error("invalid source pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("no geographic sources match {pattern:?}")]
    NoSources { pattern: String },

    #[error("none of the {skipped} geographic sources could be processed")]
    NoUsableSources { skipped: usize },

    #[error(transparent)]
    Write(#[from] GeoError),
}

/// One step of the ISO3 fallback chain: a predicate on the file, and an
/// extractor run per feature when the predicate holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iso3Rule {
    /// Three uppercase letters before the first `_` of the file stem.
    FilenamePrefix,
    /// A code property with at least one non-null value, uppercased.
    Column(String),
    /// A file stem that is itself three uppercase letters.
    BareFilename,
}

impl Iso3Rule {
    /// Filename prefix, `iso_a3`, `ISO_A3`, bare filename.
    pub fn default_chain() -> Vec<Self> {
        vec![
            Self::FilenamePrefix,
            Self::Column("iso_a3".to_string()),
            Self::Column("ISO_A3".to_string()),
            Self::BareFilename,
        ]
    }

    pub fn matches(&self, stem: &str, collection: &FeatureCollection) -> bool {
        match self {
            Self::FilenamePrefix => prefix_token(stem).is_some(),
            Self::Column(name) => collection.has_values(name),
            Self::BareFilename => is_iso3_token(stem),
        }
    }

    pub fn extract(&self, stem: &str, feature: &Feature) -> Option<String> {
        match self {
            Self::FilenamePrefix => prefix_token(stem).map(str::to_string),
            Self::Column(name) => feature.property_text(name).map(|v| v.trim().to_ascii_uppercase()),
            Self::BareFilename => is_iso3_token(stem).then(|| stem.to_string()),
        }
    }
}

fn is_iso3_token(s: &str) -> bool {
    s.len() == 3 && s.bytes().all(|b| b.is_ascii_uppercase())
}

fn prefix_token(stem: &str) -> Option<&str> {
    let (head, _) = stem.split_once('_')?;
    is_iso3_token(head).then_some(head)
}

/// First candidate property that exists with at least one non-null value.
pub fn resolve_column<'a>(candidates: &'a [String], collection: &FeatureCollection) -> Option<&'a str> {
    candidates
        .iter()
        .map(String::as_str)
        .find(|c| collection.has_values(c))
}

/// What happens to features whose geometry is null or structurally invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidGeometryPolicy {
    #[default]
    Filter,
    /// Keep them and log a warning; meant for diagnostic runs.
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifySettings {
    pub admin2_candidates: Vec<String>,
    pub admin1_candidates: Vec<String>,
    /// Countries whose real first-level names are kept.
    pub special_iso3: BTreeSet<String>,
    pub iso3_rules: Vec<Iso3Rule>,
    pub invalid_geometries: InvalidGeometryPolicy,
}

impl Default for UnifySettings {
    fn default() -> Self {
        Self {
            admin2_candidates: columns::ADMIN2_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            admin1_candidates: columns::ADMIN1_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            special_iso3: ["NGA", "GHA"].into_iter().map(str::to_string).collect(),
            iso3_rules: Iso3Rule::default_chain(),
            invalid_geometries: InvalidGeometryPolicy::Filter,
        }
    }
}

/// A source file left out of the unified layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

/// Per-source outcome of a unification run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnifyReport {
    /// Processed sources with the number of features each contributed.
    pub processed: Vec<(PathBuf, usize)>,
    pub skipped: Vec<SkippedSource>,
    /// Features dropped for a null or invalid geometry.
    pub dropped_geometries: usize,
}

/// Result of [`MultiSourceGeoUnifier::unify_files`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedLayer {
    pub collection: FeatureCollection,
    pub report: UnifyReport,
}

/// Features of one source projected onto the unified schema.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedSource {
    pub features: Vec<Feature>,
    pub iso3: Option<String>,
    pub dropped_geometries: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MultiSourceGeoUnifier {
    settings: UnifySettings,
}

impl MultiSourceGeoUnifier {
    pub fn new(settings: UnifySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &UnifySettings {
        &self.settings
    }

    /// Source files matching `pattern`, sorted, without `exclude` (normally
    /// the output of a previous run).
    ///
    /// # Errors
    ///
    /// Returns `UnifyError::Pattern` for a malformed pattern and `NoSources`
    /// when nothing matches.
    pub fn discover(pattern: &str, exclude: Option<&Path>) -> Result<Vec<PathBuf>, UnifyError> {
        let entries = glob::glob(pattern).map_err(|source| UnifyError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|p| exclude.is_none_or(|x| !same_file(p, x)))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(UnifyError::NoSources {
                pattern: pattern.to_string(),
            });
        }
        log::info!("found {} geographic sources for {pattern:?}", paths.len());
        Ok(paths)
    }

    /// Reads, reprojects and unifies every file. A file that fails to parse,
    /// has no geometry or declares an unsupported CRS is skipped.
    ///
    /// # Errors
    ///
    /// Returns `UnifyError::NoUsableSources` when every file was skipped.
    pub fn unify_files(&self, paths: &[PathBuf]) -> Result<UnifiedLayer, UnifyError> {
        let mut report = UnifyReport::default();
        let mut features = Vec::new();

        for path in paths {
            let collection = match read_feature_collection(path).and_then(|fc| fc.to_wgs84(path)) {
                Ok(fc) => fc,
                Err(e) => {
                    log::warn!("skipping {}: {e}", path.display());
                    report.skipped.push(SkippedSource {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let unified = self.unify_collection(stem, collection);
            log::info!(
                "{}: {} features, ISO3 {}",
                path.display(),
                unified.features.len(),
                unified.iso3.as_deref().unwrap_or("unknown")
            );
            report.dropped_geometries += unified.dropped_geometries;
            report.processed.push((path.clone(), unified.features.len()));
            features.extend(unified.features);
        }

        if report.processed.is_empty() {
            return Err(UnifyError::NoUsableSources {
                skipped: report.skipped.len(),
            });
        }
        log::info!(
            "unified layer: {} features from {} sources ({} skipped)",
            features.len(),
            report.processed.len(),
            report.skipped.len()
        );
        Ok(UnifiedLayer {
            collection: FeatureCollection::new(features),
            report,
        })
    }

    /// Projects one already-reprojected source onto the unified schema.
    pub fn unify_collection(&self, stem: &str, mut collection: FeatureCollection) -> UnifiedSource {
        let before = collection.features.len();
        let invalid = |f: &Feature| !f.geometry.as_ref().is_some_and(|g| g.is_valid());
        let dropped_geometries = match self.settings.invalid_geometries {
            InvalidGeometryPolicy::Filter => {
                collection.features.retain(|f| !invalid(f));
                before - collection.features.len()
            }
            InvalidGeometryPolicy::Retain => {
                let n = collection.features.iter().filter(|f| invalid(f)).count();
                if n > 0 {
                    log::warn!("{stem}: keeping {n} features with null or invalid geometry");
                }
                0
            }
        };
        if dropped_geometries > 0 {
            log::debug!("{stem}: dropped {dropped_geometries} features with null or invalid geometry");
        }

        let iso3_rule = self.settings.iso3_rules.iter().find(|r| r.matches(stem, &collection));
        let iso3_of = |f: &Feature| iso3_rule.and_then(|r| r.extract(stem, f));
        let iso3 = collection.features.first().and_then(iso3_of);

        let admin2_col = resolve_column(&self.settings.admin2_candidates, &collection);
        if admin2_col.is_none() {
            log::warn!("{stem}: no admin2 candidate column; admin2 left null");
        }
        let special = iso3.as_ref().is_some_and(|c| self.settings.special_iso3.contains(c));
        let admin1_col = if special {
            resolve_column(&self.settings.admin1_candidates, &collection)
        } else {
            None
        };

        let features = collection
            .features
            .iter()
            .map(|f| {
                let admin1 = if special {
                    text_value(admin1_col.and_then(|c| f.property_text(c)))
                } else {
                    Value::from(PLACEHOLDER)
                };
                let admin2 = text_value(admin2_col.and_then(|c| f.property_text(c)));
                let code = text_value(iso3_of(f));

                let mut properties = Map::new();
                for name in columns::UNIFIED_COLUMNS {
                    let value = match name {
                        columns::ADMIN1 => admin1.clone(),
                        columns::ADMIN2 => admin2.clone(),
                        columns::ISO3 => code.clone(),
                        other => f.property(other).cloned().unwrap_or(Value::Null),
                    };
                    properties.insert(name.to_string(), value);
                }
                Feature::new(properties, f.geometry.clone())
            })
            .collect();

        UnifiedSource {
            features,
            iso3,
            dropped_geometries,
        }
    }
}

fn text_value(text: Option<String>) -> Value {
    text.map_or(Value::Null, Value::String)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
