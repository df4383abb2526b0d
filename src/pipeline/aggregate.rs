//! Rollup of full-resolution checkpoints into per-unit statistics.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::columns;
use crate::error::{CheckpointError, TableError};
use crate::io::checkpoint::CheckpointReader;
use crate::io::export::write_statistics;
use crate::io::tables::{number_cell, require_columns, text_cell};
use crate::key::UnitKey;

use super::cache::{ArtifactCache, ArtifactStore, CacheOutcome};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no checkpoints to aggregate")]
    NoCheckpoints,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The cached artifact exists but does not parse.
    #[error(transparent)]
    Artifact(#[from] TableError),

    #[error("artifact store failed for \"{key}\": {source}")]
    Store {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot serialize statistics: {0}")]
    Serialize(#[source] io::Error),
}

/// Min, max, sum and mean of one unit's profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitStatistics {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub mean: f64,
}

/// Streaming reducer behind [`UnitStatistics`].
#[derive(Debug, Clone, Copy)]
pub struct StatsAccumulator {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }
}

impl StatsAccumulator {
    pub fn push(&mut self, v: f64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
        self.count += 1;
    }

    /// `None` when no sample was pushed.
    pub fn finish(&self) -> Option<UnitStatistics> {
        (self.count > 0).then(|| UnitStatistics {
            min: self.min,
            max: self.max,
            sum: self.sum,
            mean: self.sum / self.count as f64,
        })
    }
}

impl UnitStatistics {
    pub fn of(samples: &[f64]) -> Option<Self> {
        let mut acc = StatsAccumulator::default();
        samples.iter().for_each(|&v| acc.push(v));
        acc.finish()
    }
}

/// Statistics indexed by composite key, iterated in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsTable {
    rows: BTreeMap<UnitKey, UnitStatistics>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row; returns the previous statistics for the key, if any.
    pub fn insert(&mut self, key: UnitKey, stats: UnitStatistics) -> Option<UnitStatistics> {
        self.rows.insert(key, stats)
    }

    pub fn get(&self, key: &UnitKey) -> Option<&UnitStatistics> {
        self.rows.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitKey, &UnitStatistics)> {
        self.rows.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &UnitKey> {
        self.rows.keys()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reads a statistics artifact (`adm2,adm1,min,max,sum,mean`).
    ///
    /// # Errors
    ///
    /// Returns `TableError::MissingColumns` for a wrong header and
    /// `MalformedArtifact` for empty cells or a repeated key.
    pub fn from_reader(reader: impl Read, path: &Path) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers().map_err(|e| TableError::csv(path, e))?.clone();
        let idx = require_columns(&headers, &columns::STATISTICS_COLUMNS, path)?;

        let mut table = Self::new();
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

            let mut values = [0.0; 4];
            for (slot, (&i, name)) in values.iter_mut().zip(idx[2..].iter().zip(&columns::STATISTICS_COLUMNS[2..])) {
                *slot = number_cell(&record, i, name, row, path)?
                    .ok_or_else(|| malformed(format!("empty \"{name}\" for ({key})")))?;
            }
            let [min, max, sum, mean] = values;
            if table.insert(key.clone(), UnitStatistics { min, max, sum, mean }).is_some() {
                return Err(malformed(format!("({key}) listed twice")));
            }
        }
        Ok(table)
    }

    pub fn from_csv_str(text: &str, path: &Path) -> Result<Self, TableError> {
        Self::from_reader(text.as_bytes(), path)
    }
}

impl FromIterator<(UnitKey, UnitStatistics)> for StatsTable {
    fn from_iter<I: IntoIterator<Item = (UnitKey, UnitStatistics)>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

/// Per-column statistics of one checkpoint, in column order.
///
/// # Errors
///
/// Returns `CheckpointError::Key` for an undecodable column label and
/// `Malformed` for a truncated or empty checkpoint.
pub fn checkpoint_statistics(path: &Path) -> Result<Vec<(UnitKey, UnitStatistics)>, CheckpointError> {
    let reader = CheckpointReader::open(path)?;
    let keys = reader.keys().to_vec();
    let mut accs = vec![StatsAccumulator::default(); keys.len()];
    reader.for_each_row(|row| {
        for (acc, &v) in accs.iter_mut().zip(row) {
            acc.push(v);
        }
    })?;

    keys.into_iter()
        .zip(accs)
        .map(|(key, acc)| match acc.finish() {
            Some(stats) => Ok((key, stats)),
            None => Err(CheckpointError::Malformed {
                path: path.to_path_buf(),
                row: 0,
                reason: format!("no samples for ({key})"),
            }),
        })
        .collect()
}

/// Merges checkpoints into one [`StatsTable`], behind an artifact cache.
pub struct StatisticsAggregator<S> {
    cache: ArtifactCache<S>,
    artifact_key: String,
}

impl<S: ArtifactStore> StatisticsAggregator<S> {
    pub fn new(cache: ArtifactCache<S>, artifact_key: impl Into<String>) -> Self {
        Self {
            cache,
            artifact_key: artifact_key.into(),
        }
    }

    pub fn cache(&self) -> &ArtifactCache<S> {
        &self.cache
    }

    /// Returns the cached table when the policy allows it, otherwise reduces
    /// every checkpoint and stores the result.
    ///
    /// The result does not depend on the order of `checkpoints`.
    ///
    /// # Errors
    ///
    /// Any unreadable or malformed checkpoint, and any unit present in two
    /// checkpoints, is fatal. A cached artifact that does not parse is
    /// `AggregateError::Artifact`.
    pub fn aggregate(&mut self, checkpoints: &[PathBuf]) -> Result<CacheOutcome<StatsTable>, AggregateError> {
        let key = self.artifact_key.as_str();
        let stored = self.cache.lookup(key).map_err(|source| AggregateError::Store {
            key: key.to_string(),
            source,
        })?;
        if let Some(text) = stored {
            log::info!("using cached statistics \"{key}\"; remove it or refresh to recompute");
            let table = StatsTable::from_csv_str(&text, Path::new(key))?;
            return Ok(CacheOutcome::Cached(table));
        }

        let table = reduce_checkpoints(checkpoints)?;
        let mut buf = Vec::new();
        write_statistics(&table, &mut buf).map_err(AggregateError::Serialize)?;
        let text = String::from_utf8_lossy(&buf);
        self.cache.commit(key, &text).map_err(|source| AggregateError::Store {
            key: self.artifact_key.clone(),
            source,
        })?;
        log::info!("aggregated {} units from {} checkpoints", table.len(), checkpoints.len());
        Ok(CacheOutcome::Computed(table))
    }
}

/// Reduces each checkpoint independently and merges the per-unit rows.
///
/// # Errors
///
/// See [`StatisticsAggregator::aggregate`].
pub fn reduce_checkpoints(checkpoints: &[PathBuf]) -> Result<StatsTable, AggregateError> {
    if checkpoints.is_empty() {
        return Err(AggregateError::NoCheckpoints);
    }
    let mut rows = BTreeMap::new();
    for path in checkpoints {
        let stats = checkpoint_statistics(path)?;
        log::debug!("{}: {} units", path.display(), stats.len());
        for (key, s) in stats {
            match rows.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(s);
                }
                Entry::Occupied(slot) => {
                    return Err(CheckpointError::DuplicateKey {
                        key: slot.key().clone(),
                        path: path.clone(),
                    }
                    .into());
                }
            }
        }
    }
    Ok(StatsTable { rows })
}
