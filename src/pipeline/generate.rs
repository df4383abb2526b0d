//! Per-unit profile synthesis with chunked checkpointing.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::{DateRange, MINUTES_PER_DAY, SimulationEngine, UnitApplianceConfig};
use crate::error::{CheckpointError, EngineError, TableError};
use crate::io::checkpoint::{CheckpointKind, CheckpointLayout, CheckpointReader, write_checkpoint};
use crate::io::tables::{ApplianceCountTable, ApplianceTemplate};
use crate::key::UnitKey;

/// Failures that abort a generation run.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Configuration error raised before any simulation work.
    #[error(transparent)]
    Table(#[from] TableError),

    #[error("count table columns {found:?} do not match template appliances {expected:?}")]
    TemplateMismatch { expected: Vec<String>, found: Vec<String> },

    #[error("save_every must be at least 1")]
    InvalidBatchSize,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("engine failed for ({unit}): {source}")]
    Engine {
        unit: UnitKey,
        #[source]
        source: EngineError,
    },

    #[error("engine returned {found} samples for ({unit}), expected {expected}")]
    ProfileLength {
        unit: UnitKey,
        expected: usize,
        found: usize,
    },
}

/// Run parameters of the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub range: DateRange,
    /// Units per checkpoint.
    pub save_every: usize,
    /// Skip units already present in existing checkpoints.
    pub resume: bool,
}

/// Why a count-table row produced no profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An identifying cell is empty.
    MissingName,
    /// No row with this key has a complete set of appliance counts.
    NoCounts,
    /// The key was already handled at an earlier row.
    Duplicate,
}

/// A row the generator did not simulate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedUnit {
    /// Zero-based data row of the count table.
    pub row: usize,
    pub key: Option<UnitKey>,
    pub reason: SkipReason,
}

/// One flushed pair of checkpoint files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub seq: u32,
    pub full: PathBuf,
    pub daily: PathBuf,
    pub units: usize,
}

/// Outcome of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    /// Units simulated during this run.
    pub processed: usize,
    pub skipped: Vec<SkippedUnit>,
    /// Units found in checkpoints of an earlier run.
    pub resumed: usize,
    /// Checkpoints written during this run, in order.
    pub checkpoints: Vec<CheckpointRecord>,
}

/// Mean day of a minute-resolution profile.
///
/// Value `m` is the mean of samples `m, m + 1440, m + 2880, ...`. A trailing
/// partial day is ignored.
pub fn daily_average(profile: &[f64]) -> Vec<f64> {
    let mut avg = vec![0.0; MINUTES_PER_DAY];
    let days = profile.len() / MINUTES_PER_DAY;
    if days == 0 {
        return avg;
    }
    for day in profile.chunks_exact(MINUTES_PER_DAY) {
        for (a, v) in avg.iter_mut().zip(day) {
            *a += v;
        }
    }
    for a in &mut avg {
        *a /= days as f64;
    }
    avg
}

/// Drives a simulation engine over every unit of a count table and writes
/// the profiles as checkpoint pairs of at most `save_every` units.
pub struct ProfileBatchGenerator<E> {
    engine: E,
    template: ApplianceTemplate,
    layout: CheckpointLayout,
    settings: GenerationSettings,
}

impl<E: SimulationEngine> ProfileBatchGenerator<E> {
    /// # Errors
    ///
    /// Returns `GenerateError::InvalidBatchSize` if `save_every` is zero.
    pub fn new(
        engine: E,
        template: ApplianceTemplate,
        layout: CheckpointLayout,
        settings: GenerationSettings,
    ) -> Result<Self, GenerateError> {
        if settings.save_every == 0 {
            return Err(GenerateError::InvalidBatchSize);
        }
        Ok(Self {
            engine,
            template,
            layout,
            settings,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn layout(&self) -> &CheckpointLayout {
        &self.layout
    }

    /// Simulates every unit of `table` in row order.
    ///
    /// # Errors
    ///
    /// Returns `GenerateError::TemplateMismatch` before any simulation if the
    /// table was not read against this generator's template. Engine failures,
    /// wrong profile lengths and checkpoint I/O errors abort the run; units
    /// already flushed stay on disk.
    pub fn run(&mut self, table: &ApplianceCountTable) -> Result<GenerationSummary, GenerateError> {
        let expected: Vec<String> = self.template.names().into_iter().map(str::to_string).collect();
        if table.appliance_names() != expected.as_slice() {
            return Err(GenerateError::TemplateMismatch {
                expected,
                found: table.appliance_names().to_vec(),
            });
        }

        let mut summary = GenerationSummary::default();
        let (done, mut next_seq) = if self.settings.resume {
            self.existing_units()?
        } else {
            self.clear_stale()?;
            (HashSet::new(), 0)
        };
        summary.resumed = done.len();
        if summary.resumed > 0 {
            log::info!(
                "resuming: {} units already checkpointed, next checkpoint is #{next_seq}",
                summary.resumed
            );
        }

        let expected_len = self.settings.range.minutes();
        let mut seen = HashSet::new();
        let mut full_buf: Vec<(UnitKey, Vec<f64>)> = Vec::with_capacity(self.settings.save_every);
        let mut daily_buf: Vec<(UnitKey, Vec<f64>)> = Vec::with_capacity(self.settings.save_every);

        for (row, record) in table.rows().iter().enumerate() {
            let Some(key) = &record.key else {
                log::warn!("row {row}: empty identifying cell, skipped");
                summary.skipped.push(SkippedUnit {
                    row,
                    key: None,
                    reason: SkipReason::MissingName,
                });
                continue;
            };
            if !seen.insert(key.clone()) {
                log::warn!("row {row}: ({key}) already handled at an earlier row, skipped");
                summary.skipped.push(SkippedUnit {
                    row,
                    key: Some(key.clone()),
                    reason: SkipReason::Duplicate,
                });
                continue;
            }
            if done.contains(key) {
                log::debug!("({key}) found in an earlier checkpoint");
                continue;
            }
            let Some(counts) = table.counts_for(key) else {
                log::warn!("row {row}: no appliance counts for ({key}), skipped");
                summary.skipped.push(SkippedUnit {
                    row,
                    key: Some(key.clone()),
                    reason: SkipReason::NoCounts,
                });
                continue;
            };

            let config = UnitApplianceConfig::from_template(key.clone(), &self.template, counts);
            let profile = self
                .engine
                .simulate(&config, &self.settings.range)
                .map_err(|source| GenerateError::Engine {
                    unit: key.clone(),
                    source,
                })?;
            if profile.len() != expected_len {
                return Err(GenerateError::ProfileLength {
                    unit: key.clone(),
                    expected: expected_len,
                    found: profile.len(),
                });
            }
            if let Some(minute) = profile.iter().position(|v| !v.is_finite()) {
                return Err(GenerateError::Engine {
                    unit: key.clone(),
                    source: EngineError::new(format!("non-finite sample {} at minute {minute}", profile[minute])),
                });
            }
            log::debug!("simulated ({key}) with {} engine", self.engine.engine_name());

            daily_buf.push((key.clone(), daily_average(&profile)));
            full_buf.push((key.clone(), profile));
            summary.processed += 1;

            if full_buf.len() >= self.settings.save_every {
                summary.checkpoints.push(self.flush(next_seq, &mut full_buf, &mut daily_buf)?);
                next_seq += 1;
            }
        }

        if !full_buf.is_empty() {
            summary.checkpoints.push(self.flush(next_seq, &mut full_buf, &mut daily_buf)?);
        }

        log::info!(
            "generation finished: {} processed, {} skipped, {} resumed, {} checkpoints",
            summary.processed,
            summary.skipped.len(),
            summary.resumed,
            summary.checkpoints.len()
        );
        Ok(summary)
    }

    /// Writes both buffers and clears them. The daily file goes first so a
    /// full checkpoint never exists without its daily counterpart.
    fn flush(
        &self,
        seq: u32,
        full_buf: &mut Vec<(UnitKey, Vec<f64>)>,
        daily_buf: &mut Vec<(UnitKey, Vec<f64>)>,
    ) -> Result<CheckpointRecord, GenerateError> {
        let daily = self.layout.path(CheckpointKind::DailyAverage, seq);
        let full = self.layout.path(CheckpointKind::Full, seq);
        write_checkpoint(&daily, daily_buf)?;
        write_checkpoint(&full, full_buf)?;

        let units = full_buf.len();
        log::info!("checkpoint #{seq}: {units} units -> {}", full.display());
        full_buf.clear();
        daily_buf.clear();
        Ok(CheckpointRecord {
            seq,
            full,
            daily,
            units,
        })
    }

    /// Keys of all units in existing full-resolution checkpoints, and the
    /// next free sequence number.
    fn existing_units(&self) -> Result<(HashSet<UnitKey>, u32), GenerateError> {
        let mut done = HashSet::new();
        let mut next_seq = 0;
        for (seq, path) in self.layout.discover(CheckpointKind::Full)? {
            let reader = CheckpointReader::open(&path)?;
            done.extend(reader.keys().iter().cloned());
            next_seq = seq + 1;
        }
        Ok((done, next_seq))
    }

    fn clear_stale(&self) -> Result<(), GenerateError> {
        for kind in [CheckpointKind::Full, CheckpointKind::DailyAverage] {
            for path in self.layout.paths(kind)? {
                log::warn!("removing stale checkpoint {}", path.display());
                fs::remove_file(&path).map_err(|source| CheckpointError::Io { path, source })?;
            }
        }
        Ok(())
    }
}
