//! Long-format mean-day series built from the daily-average checkpoints.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::PathBuf;

use crate::engine::MINUTES_PER_DAY;
use crate::error::CheckpointError;
use crate::io::checkpoint::CheckpointReader;
use crate::key::UnitKey;

/// Mean day of every unit, ordered by composite key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailySeries {
    units: BTreeMap<UnitKey, Vec<f64>>,
}

impl DailySeries {
    pub fn units(&self) -> impl Iterator<Item = (&UnitKey, &[f64])> {
        self.units.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn get(&self, key: &UnitKey) -> Option<&[f64]> {
        self.units.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// `HH:MM` label of a minute of day.
    pub fn time_label(minute: usize) -> String {
        format!("{:02}:{:02}", minute / 60, minute % 60)
    }
}

/// Merges daily-average checkpoints into a [`DailySeries`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DailySeriesBuilder;

impl DailySeriesBuilder {
    /// # Errors
    ///
    /// Column keys that do not decode are `CheckpointError::Key`; a
    /// checkpoint without exactly 1440 rows is `Malformed`; a unit found in
    /// two checkpoints is `DuplicateKey`.
    pub fn build(&self, checkpoints: &[PathBuf]) -> Result<DailySeries, CheckpointError> {
        let mut units = BTreeMap::new();
        for path in checkpoints {
            let columns = CheckpointReader::open(path)?.read_columns()?;
            for (key, day) in columns {
                if day.len() != MINUTES_PER_DAY {
                    return Err(CheckpointError::Malformed {
                        path: path.clone(),
                        row: day.len(),
                        reason: format!("{} rows, expected {MINUTES_PER_DAY}", day.len()),
                    });
                }
                match units.entry(key) {
                    Entry::Vacant(slot) => {
                        slot.insert(day);
                    }
                    Entry::Occupied(slot) => {
                        return Err(CheckpointError::DuplicateKey {
                            key: slot.key().clone(),
                            path: path.clone(),
                        });
                    }
                }
            }
        }
        log::info!("daily series: {} units from {} checkpoints", units.len(), checkpoints.len());
        Ok(DailySeries { units })
    }
}
