//! Join of normalized statistics onto administrative shapes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::columns;
use crate::error::TableError;
use crate::io::geojson::{Feature, FeatureCollection};
use crate::io::tables::{open, require_columns, text_cell};
use crate::key::{PLACEHOLDER, UnitKey};

use super::normalize::{NormalizedRow, NormalizedTable};

#[derive(Debug, Error)]
pub enum BindError {
    /// The configured name property is absent from every feature.
    #[error("geometry source has no \"{property}\" property")]
    MissingNameProperty { property: String },

    #[error("unit ({key}) appears twice in the {side} after name correction")]
    DuplicateKey { key: UnitKey, side: &'static str },
}

/// Alternate or misspelled unit names mapped to their canonical spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameCorrections {
    map: BTreeMap<String, String>,
}

impl NameCorrections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.map.insert(alias.into(), canonical.into());
    }

    /// Reads a two-column `alias,canonical` CSV.
    ///
    /// # Errors
    ///
    /// Returns `TableError::MissingColumns` if either column is absent and
    /// `MalformedArtifact` for a row with an empty cell.
    pub fn from_csv_path(path: &Path) -> Result<Self, TableError> {
        Self::from_reader(open(path)?, path)
    }

    /// See [`NameCorrections::from_csv_path`].
    pub fn from_reader(reader: impl Read, path: &Path) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers().map_err(|e| TableError::csv(path, e))?.clone();
        let idx = require_columns(&headers, &["alias", "canonical"], path)?;

        let mut corrections = Self::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| TableError::csv(path, e))?;
            match (text_cell(&record, idx[0]), text_cell(&record, idx[1])) {
                (Some(alias), Some(canonical)) => corrections.insert(alias, canonical),
                _ => {
                    return Err(TableError::MalformedArtifact {
                        path: path.to_path_buf(),
                        row,
                        reason: "empty alias or canonical name".to_string(),
                    });
                }
            }
        }
        Ok(corrections)
    }

    /// Canonical spelling of `name`; unknown names are returned unchanged.
    pub fn correct<'a>(&'a self, name: &'a str) -> &'a str {
        self.map.get(name).map_or(name, String::as_str)
    }

    /// Applies [`NameCorrections::correct`] to both key levels.
    pub fn correct_key(&self, key: &UnitKey) -> UnitKey {
        UnitKey::new(self.correct(&key.adm2), self.correct(&key.adm1))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NameCorrections {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for NameCorrections {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.map.extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

/// Raw geometry properties holding the unit names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryNameColumns {
    pub adm2: String,
    /// `None` for a single-level join on `adm2` alone.
    pub adm1: Option<String>,
}

impl GeometryNameColumns {
    pub fn two_level(adm2: impl Into<String>, adm1: impl Into<String>) -> Self {
        Self {
            adm2: adm2.into(),
            adm1: Some(adm1.into()),
        }
    }

    pub fn single_level(adm2: impl Into<String>) -> Self {
        Self {
            adm2: adm2.into(),
            adm1: None,
        }
    }
}

/// Join counts of a binding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindSummary {
    pub matched: usize,
    pub geometry_only: usize,
    pub statistics_only: usize,
}

/// Result of [`GeometryBinder::bind`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundLayer {
    pub collection: FeatureCollection,
    pub summary: BindSummary,
}

/// Outer-joins normalized statistics onto geometry features by corrected
/// composite key.
#[derive(Debug, Clone)]
pub struct GeometryBinder {
    columns: GeometryNameColumns,
    corrections: NameCorrections,
}

impl GeometryBinder {
    pub fn new(columns: GeometryNameColumns, corrections: NameCorrections) -> Self {
        Self { columns, corrections }
    }

    /// Joins `stats` onto `geometry`.
    ///
    /// Output features carry `adm2`, `adm1`, the nine statistic properties
    /// and the source's remaining properties. Raw name properties, `fid` and
    /// the feature `id` are dropped. Geometry features come first in source
    /// order, then statistics-only units with a null geometry in key order.
    ///
    /// # Errors
    ///
    /// Returns `BindError::MissingNameProperty` if a configured name property
    /// exists on no feature, and `DuplicateKey` if two features, or two
    /// statistics rows, share a key after correction.
    pub fn bind(&self, geometry: FeatureCollection, stats: &NormalizedTable) -> Result<BoundLayer, BindError> {
        for property in std::iter::once(&self.columns.adm2).chain(self.columns.adm1.as_ref()) {
            if !geometry.features.is_empty() && !geometry.has_property(property) {
                return Err(BindError::MissingNameProperty {
                    property: property.clone(),
                });
            }
        }

        let mut by_key: HashMap<UnitKey, &NormalizedRow> = HashMap::with_capacity(stats.len());
        for row in stats.rows() {
            let key = self.join_key(&row.key);
            if by_key.insert(key.clone(), row).is_some() {
                return Err(BindError::DuplicateKey { key, side: "statistics" });
            }
        }

        let mut summary = BindSummary::default();
        let mut seen = HashSet::new();
        let mut features = Vec::with_capacity(geometry.features.len() + stats.len());
        for feature in geometry.features {
            let key = self.feature_key(&feature);
            let row = match &key {
                Some(k) => {
                    if !seen.insert(k.clone()) {
                        return Err(BindError::DuplicateKey {
                            key: k.clone(),
                            side: "geometry source",
                        });
                    }
                    by_key.remove(k)
                }
                None => {
                    log::warn!("feature without a usable name kept with null statistics");
                    None
                }
            };
            match row {
                Some(_) => summary.matched += 1,
                None => summary.geometry_only += 1,
            }
            features.push(self.output_feature(feature, key.as_ref(), row));
        }

        let mut leftover: Vec<(UnitKey, &NormalizedRow)> = by_key.into_iter().collect();
        leftover.sort_by(|a, b| a.0.cmp(&b.0));
        summary.statistics_only = leftover.len();
        for (key, row) in leftover {
            let mut out = Feature::new(Map::new(), None);
            write_key(&mut out.properties, Some(&key));
            write_statistics(&mut out.properties, Some(row));
            features.push(out);
        }

        if summary.geometry_only > 0 || summary.statistics_only > 0 {
            log::warn!(
                "geometry join: {} matched, {} shapes without statistics, {} units without shape",
                summary.matched,
                summary.geometry_only,
                summary.statistics_only
            );
        } else {
            log::info!("geometry join: {} units matched", summary.matched);
        }

        Ok(BoundLayer {
            collection: FeatureCollection {
                crs: geometry.crs,
                features,
            },
            summary,
        })
    }

    /// Statistics key as used for the join: corrected, and collapsed to one
    /// level for single-level configurations.
    fn join_key(&self, key: &UnitKey) -> UnitKey {
        let corrected = self.corrections.correct_key(key);
        match self.columns.adm1 {
            Some(_) => corrected,
            None => UnitKey::single_level(corrected.adm2),
        }
    }

    fn feature_key(&self, feature: &Feature) -> Option<UnitKey> {
        let adm2 = feature.property_text(&self.columns.adm2)?;
        let adm1 = match &self.columns.adm1 {
            Some(col) => feature.property_text(col)?,
            None => PLACEHOLDER.to_string(),
        };
        Some(self.corrections.correct_key(&UnitKey::new(adm2.trim(), adm1.trim())))
    }

    fn output_feature(&self, feature: Feature, key: Option<&UnitKey>, row: Option<&NormalizedRow>) -> Feature {
        let mut properties = feature.properties;
        properties.remove(columns::FID);
        properties.remove(&self.columns.adm2);
        if let Some(col) = &self.columns.adm1 {
            properties.remove(col);
        }
        write_key(&mut properties, key);
        write_statistics(&mut properties, row);
        Feature::new(properties, feature.geometry)
    }
}

fn write_key(properties: &mut Map<String, Value>, key: Option<&UnitKey>) {
    let (adm2, adm1) = match key {
        Some(k) => (Value::from(k.adm2.as_str()), Value::from(k.adm1.as_str())),
        None => (Value::Null, Value::Null),
    };
    properties.insert(columns::ADM2.to_string(), adm2);
    properties.insert(columns::ADM1.to_string(), adm1);
}

/// Writes the nine statistic properties; missing values become `null`.
fn write_statistics(properties: &mut Map<String, Value>, row: Option<&NormalizedRow>) {
    let stats = row.and_then(|r| r.stats);
    let hh = row.and_then(|r| r.per_household);
    let values = [
        (columns::MIN, stats.map(|s| s.min)),
        (columns::MAX, stats.map(|s| s.max)),
        (columns::SUM, stats.map(|s| s.sum)),
        (columns::MEAN, stats.map(|s| s.mean)),
        (columns::NUM_HH, row.and_then(|r| r.num_hh)),
        (columns::HH_SUM, hh.map(|h| h.hh_sum)),
        (columns::HH_MEAN, hh.map(|h| h.hh_mean)),
        (columns::HH_MAX, hh.map(|h| h.hh_max)),
        (columns::HH_MIN, hh.map(|h| h.hh_min)),
    ];
    for (name, value) in values {
        properties.insert(name.to_string(), number(value));
    }
}

/// JSON number, or `null` for missing and non-finite values.
fn number(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::geojson::Geometry;
    use crate::pipeline::aggregate::UnitStatistics;
    use serde_json::json;

    fn feature(props: Value) -> Feature {
        let properties = props.as_object().cloned().unwrap_or_default();
        let mut f = Feature::new(
            properties,
            Some(Geometry::Point {
                coordinates: vec![3.0, 6.0],
            }),
        );
        f.id = Some(json!(7));
        f
    }

    fn row(adm2: &str, adm1: &str, sum: f64) -> NormalizedRow {
        NormalizedRow {
            key: UnitKey::new(adm2, adm1),
            stats: Some(UnitStatistics {
                min: 0.0,
                max: sum,
                sum,
                mean: sum / 2.0,
            }),
            num_hh: Some(2.0),
            per_household: None,
        }
    }

    fn corrections() -> NameCorrections {
        [("Ikeja LGA", "Ikeja"), ("Ifelodun North", "Ifelodun")].into_iter().collect()
    }

    #[test]
    fn geometry_alias_and_statistics_name_share_a_join_key() {
        let binder = GeometryBinder::new(GeometryNameColumns::two_level("shapeName", "state"), corrections());
        let from_geometry = binder.feature_key(&feature(json!({"shapeName": "Ikeja LGA", "state": "Lagos"})));
        let from_stats = binder.join_key(&UnitKey::new("Ikeja", "Lagos"));
        assert_eq!(from_geometry, Some(from_stats));

        let uncorrected = binder.feature_key(&feature(json!({"shapeName": "Epe", "state": "Lagos"})));
        assert_ne!(uncorrected, Some(binder.join_key(&UnitKey::new("Ikeja", "Lagos"))));
    }

    #[test]
    fn misspelled_names_match_after_correction() {
        let geometry = FeatureCollection::new(vec![
            feature(json!({"shapeName": "Ikeja LGA", "state": "Lagos", "fid": 1})),
            feature(json!({"shapeName": "Epe", "state": "Lagos", "fid": 2})),
        ]);
        let stats: NormalizedTable = [row("Ikeja", "Lagos", 10.0), row("Ife", "Osun", 4.0)].into_iter().collect();
        let binder = GeometryBinder::new(GeometryNameColumns::two_level("shapeName", "state"), corrections());
        let layer = binder.bind(geometry, &stats).expect("bind");

        assert_eq!(
            layer.summary,
            BindSummary {
                matched: 1,
                geometry_only: 1,
                statistics_only: 1
            }
        );
        let features = &layer.collection.features;
        assert_eq!(features.len(), 3);
        assert_eq!(features[0].property_text("adm2").as_deref(), Some("Ikeja"));
        assert_eq!(features[0].property("sum"), Some(&json!(10.0)));
        assert!(features[0].property("fid").is_none());
        assert!(features[0].property("shapeName").is_none());
        assert!(features[0].id.is_none());
        assert!(features[1].property("sum").is_none());
        assert!(features[2].geometry.is_none());
        assert_eq!(features[2].property_text("adm2").as_deref(), Some("Ife"));
    }

    #[test]
    fn single_level_joins_on_adm2() {
        let geometry = FeatureCollection::new(vec![feature(json!({"NAME_2": "Ikeja"}))]);
        let stats: NormalizedTable = [row("Ikeja", PLACEHOLDER, 3.0)].into_iter().collect();
        let binder = GeometryBinder::new(GeometryNameColumns::single_level("NAME_2"), NameCorrections::new());
        let layer = binder.bind(geometry, &stats).expect("bind");
        assert_eq!(layer.summary.matched, 1);
        assert_eq!(layer.collection.features[0].property_text("adm1").as_deref(), Some(PLACEHOLDER));
    }

    #[test]
    fn missing_name_property_is_refused() {
        let geometry = FeatureCollection::new(vec![feature(json!({"name": "Ikeja"}))]);
        let binder = GeometryBinder::new(GeometryNameColumns::single_level("shapeName"), NameCorrections::new());
        assert!(matches!(
            binder.bind(geometry, &NormalizedTable::default()),
            Err(BindError::MissingNameProperty { .. })
        ));
    }

    #[test]
    fn collapsing_statistics_keys_is_refused() {
        let geometry = FeatureCollection::new(vec![]);
        let stats: NormalizedTable = [row("Ikeja", "Lagos", 1.0), row("Ikeja LGA", "Lagos", 2.0)]
            .into_iter()
            .collect();
        let binder = GeometryBinder::new(GeometryNameColumns::two_level("shapeName", "state"), corrections());
        assert!(matches!(
            binder.bind(geometry, &stats),
            Err(BindError::DuplicateKey { side: "statistics", .. })
        ));
    }

    #[test]
    fn corrections_csv() {
        let text = "alias,canonical\nIkeja LGA,Ikeja\n";
        let c = NameCorrections::from_reader(text.as_bytes(), Path::new("c.csv")).expect("read");
        assert_eq!(c.len(), 1);
        assert_eq!(c.correct("Ikeja LGA"), "Ikeja");
    }
}
