//! Outer join of unit statistics with household counts.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::columns;
use crate::error::TableError;
use crate::io::tables::{HouseholdTable, number_cell, open, require_columns, text_cell};
use crate::key::UnitKey;

use super::aggregate::{StatsTable, UnitStatistics};

/// Base statistics divided by the household count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerHousehold {
    pub hh_sum: f64,
    pub hh_mean: f64,
    pub hh_max: f64,
    pub hh_min: f64,
}

impl PerHousehold {
    /// `None` for a zero or non-finite household count.
    pub fn derive(stats: &UnitStatistics, households: f64) -> Option<Self> {
        if households == 0.0 || !households.is_finite() {
            return None;
        }
        Some(Self {
            hh_sum: stats.sum / households,
            hh_mean: stats.mean / households,
            hh_max: stats.max / households,
            hh_min: stats.min / households,
        })
    }
}

/// One unit of the normalized table. Fields missing on either join side are
/// `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub key: UnitKey,
    pub stats: Option<UnitStatistics>,
    pub num_hh: Option<f64>,
    pub per_household: Option<PerHousehold>,
}

/// Row counts by join side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinDiagnostics {
    pub matched: usize,
    pub statistics_only: usize,
    pub households_only: usize,
}

/// Normalized statistics, ordered by composite key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTable {
    rows: BTreeMap<UnitKey, NormalizedRow>,
}

impl NormalizedTable {
    pub fn rows(&self) -> impl Iterator<Item = &NormalizedRow> {
        self.rows.values()
    }

    pub fn get(&self, key: &UnitKey) -> Option<&NormalizedRow> {
        self.rows.get(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Counts rows by join side. A unit whose household cell was empty
    /// counts as statistics-only.
    pub fn diagnostics(&self) -> JoinDiagnostics {
        let mut d = JoinDiagnostics::default();
        for row in self.rows.values() {
            match (row.stats.is_some(), row.num_hh.is_some()) {
                (true, true) => d.matched += 1,
                (true, false) => d.statistics_only += 1,
                (false, _) => d.households_only += 1,
            }
        }
        d
    }

    /// Reads a normalized artifact from disk.
    ///
    /// # Errors
    ///
    /// See [`NormalizedTable::from_reader`].
    pub fn from_csv_path(path: &Path) -> Result<Self, TableError> {
        Self::from_reader(open(path)?, path)
    }

    /// Reads a normalized artifact.
    ///
    /// # Errors
    ///
    /// Returns `TableError::MissingColumns` for a wrong header and
    /// `MalformedArtifact` for an empty key, a partially filled statistics
    /// group or a repeated key.
    pub fn from_reader(reader: impl Read, path: &Path) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers().map_err(|e| TableError::csv(path, e))?.clone();
        let idx = require_columns(&headers, &columns::NORMALIZED_COLUMNS, path)?;

        let mut rows = BTreeMap::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| TableError::csv(path, e))?;
            let malformed = |reason: String| TableError::MalformedArtifact {
                path: path.to_path_buf(),
                row,
                reason,
            };
            let key = text_cell(&record, idx[0])
                .zip(text_cell(&record, idx[1]))
                .map(|(adm2, adm1)| UnitKey::new(adm2, adm1))
                .ok_or_else(|| malformed("empty key cell".to_string()))?;

            let mut cells = [None; 9];
            for (slot, (&i, name)) in cells.iter_mut().zip(idx[2..].iter().zip(&columns::NORMALIZED_COLUMNS[2..])) {
                *slot = number_cell(&record, i, name, row, path)?;
            }
            let [min, max, sum, mean, num_hh, hh_sum, hh_mean, hh_max, hh_min] = cells;

            let stats = match (min, max, sum, mean) {
                (Some(min), Some(max), Some(sum), Some(mean)) => Some(UnitStatistics { min, max, sum, mean }),
                (None, None, None, None) => None,
                _ => return Err(malformed(format!("partial statistics for ({key})"))),
            };
            let per_household = match (hh_sum, hh_mean, hh_max, hh_min) {
                (Some(hh_sum), Some(hh_mean), Some(hh_max), Some(hh_min)) => Some(PerHousehold {
                    hh_sum,
                    hh_mean,
                    hh_max,
                    hh_min,
                }),
                (None, None, None, None) => None,
                _ => return Err(malformed(format!("partial per-household values for ({key})"))),
            };

            let entry = NormalizedRow {
                key: key.clone(),
                stats,
                num_hh,
                per_household,
            };
            if rows.insert(key.clone(), entry).is_some() {
                return Err(malformed(format!("({key}) listed twice")));
            }
        }
        Ok(Self { rows })
    }
}

impl FromIterator<NormalizedRow> for NormalizedTable {
    fn from_iter<I: IntoIterator<Item = NormalizedRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().map(|r| (r.key.clone(), r)).collect(),
        }
    }
}

/// Joins statistics and household counts, keeping unmatched rows from both
/// sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct HouseholdNormalizer;

impl HouseholdNormalizer {
    pub fn normalize(&self, stats: &StatsTable, households: &HouseholdTable) -> NormalizedTable {
        let mut rows: BTreeMap<UnitKey, NormalizedRow> = stats
            .iter()
            .map(|(key, s)| {
                (
                    key.clone(),
                    NormalizedRow {
                        key: key.clone(),
                        stats: Some(*s),
                        num_hh: None,
                        per_household: None,
                    },
                )
            })
            .collect();

        for (key, num_hh) in households.iter() {
            let row = rows.entry(key.clone()).or_insert_with(|| NormalizedRow {
                key: key.clone(),
                stats: None,
                num_hh: None,
                per_household: None,
            });
            row.num_hh = num_hh;
            row.per_household = row.stats.as_ref().zip(num_hh).and_then(|(s, n)| PerHousehold::derive(s, n));
        }

        let table = NormalizedTable { rows };
        let d = table.diagnostics();
        if d.statistics_only > 0 || d.households_only > 0 {
            log::warn!(
                "household join: {} matched, {} without household count, {} without profile",
                d.matched,
                d.statistics_only,
                d.households_only
            );
        } else {
            log::info!("household join: {} units matched", d.matched);
        }
        let missing = table.rows().filter(|r| r.stats.is_some() && r.per_household.is_none()).count();
        if missing > 0 {
            log::debug!("{missing} units have no per-household values");
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(sum: f64) -> UnitStatistics {
        UnitStatistics {
            min: 0.0,
            max: sum / 2.0,
            sum,
            mean: sum / 4.0,
        }
    }

    fn key(adm2: &str) -> UnitKey {
        UnitKey::new(adm2, "Lagos")
    }

    #[test]
    fn divides_by_household_count() {
        let hh = PerHousehold::derive(&stats(1200.0), 4.0).expect("derived");
        assert_eq!(hh.hh_sum, 300.0);
        assert_eq!(hh.hh_max, 150.0);
        assert_eq!(hh.hh_mean, 75.0);
        assert_eq!(hh.hh_min, 0.0);
    }

    #[test]
    fn zero_or_missing_households_give_missing_values() {
        assert_eq!(PerHousehold::derive(&stats(1200.0), 0.0), None);

        let table: StatsTable = [(key("a"), stats(1200.0)), (key("b"), stats(10.0))].into_iter().collect();
        let households: HouseholdTable = [(key("a"), None), (key("b"), Some(0.0))].into_iter().collect();
        let out = HouseholdNormalizer.normalize(&table, &households);
        assert!(out.rows().all(|r| r.per_household.is_none()));
    }

    #[test]
    fn outer_join_keeps_both_sides() {
        let table: StatsTable = [(key("a"), stats(1200.0)), (key("b"), stats(8.0))].into_iter().collect();
        let households: HouseholdTable = [(key("a"), Some(4.0)), (key("c"), Some(2.0))].into_iter().collect();
        let out = HouseholdNormalizer.normalize(&table, &households);

        assert_eq!(out.len(), 3);
        assert_eq!(
            out.diagnostics(),
            JoinDiagnostics {
                matched: 1,
                statistics_only: 1,
                households_only: 1
            }
        );
        let c = out.get(&key("c")).expect("household-only row");
        assert_eq!((c.stats, c.num_hh, c.per_household), (None, Some(2.0), None));
        let keys: Vec<&str> = out.rows().map(|r| r.key.adm2.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn reads_artifact_with_empty_cells() {
        let text = "\
adm2,adm1,min,max,sum,mean,num_hh,hh_sum,hh_mean,hh_max,hh_min
a,Lagos,0,600,1200,300,4,300,75,150,0
c,Lagos,,,,,2,,,,
";
        let table = NormalizedTable::from_reader(text.as_bytes(), Path::new("n.csv")).expect("read");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&key("a")).and_then(|r| r.per_household).map(|p| p.hh_sum), Some(300.0));
        assert_eq!(table.get(&key("c")).and_then(|r| r.stats), None);
    }

    #[test]
    fn partial_statistics_are_malformed() {
        let text = "\
adm2,adm1,min,max,sum,mean,num_hh,hh_sum,hh_mean,hh_max,hh_min
a,Lagos,0,,1200,300,4,,,,
";
        let err = NormalizedTable::from_reader(text.as_bytes(), Path::new("n.csv"));
        assert!(matches!(err, Err(TableError::MalformedArtifact { .. })));
    }
}
