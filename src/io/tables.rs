//! Readers for the tabular pipeline inputs: the appliance template, the
//! appliance-count table and the household table.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::Deserialize;

use crate::columns;
use crate::error::TableError;
use crate::key::{PLACEHOLDER, UnitKey};

/// One appliance of the household template.
///
/// Times are minutes; windows are `[start, end)` minutes of day and wrap past
/// midnight when `start > end`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplianceSpec {
    /// Canonical appliance name, matched against count-table columns.
    #[serde(rename = "unified_names")]
    pub name: String,
    /// Nominal power draw (W).
    #[serde(default)]
    pub power: f64,
    /// Total functioning time per day (minutes).
    #[serde(default)]
    pub func_time: f64,
    /// Minimum length of one switch-on cycle (minutes).
    #[serde(default = "default_func_cycle")]
    pub func_cycle: f64,
    #[serde(default)]
    pub window_1_start: Option<u32>,
    #[serde(default)]
    pub window_1_end: Option<u32>,
    #[serde(default)]
    pub window_2_start: Option<u32>,
    #[serde(default)]
    pub window_2_end: Option<u32>,
    /// Relative variability of the daily functioning time (0.0 to 1.0).
    #[serde(default)]
    pub random_var_w: f64,
}

fn default_func_cycle() -> f64 {
    1.0
}

impl ApplianceSpec {
    /// Creates an appliance with a whole-day window and no variability.
    pub fn new(name: impl Into<String>, power: f64, func_time: f64) -> Self {
        Self {
            name: name.into(),
            power,
            func_time,
            func_cycle: default_func_cycle(),
            window_1_start: None,
            window_1_end: None,
            window_2_start: None,
            window_2_end: None,
            random_var_w: 0.0,
        }
    }

    /// Usage windows as non-wrapping `[start, end)` minute ranges.
    ///
    /// Returns the whole day when no window is configured.
    pub fn windows(&self) -> Vec<(usize, usize)> {
        const DAY: usize = 1440;
        let mut out = Vec::new();
        for (start, end) in [
            (self.window_1_start, self.window_1_end),
            (self.window_2_start, self.window_2_end),
        ] {
            let (Some(start), Some(end)) = (start, end) else {
                continue;
            };
            let start = (start as usize).min(DAY);
            let end = (end as usize).min(DAY);
            if start < end {
                out.push((start, end));
            } else if start > end {
                out.push((start, DAY));
                if end > 0 {
                    out.push((0, end));
                }
            }
        }
        if out.is_empty() {
            out.push((0, DAY));
        }
        out
    }
}

/// Ordered catalog of canonical appliances.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplianceTemplate {
    appliances: Vec<ApplianceSpec>,
}

impl ApplianceTemplate {
    /// Builds a template from specs, rejecting duplicate names.
    ///
    /// # Errors
    ///
    /// Returns `TableError::DuplicateAppliance` or `TableError::EmptyTemplate`.
    pub fn new(appliances: Vec<ApplianceSpec>) -> Result<Self, TableError> {
        Self::checked(appliances, Path::new("<memory>"))
    }

    fn checked(appliances: Vec<ApplianceSpec>, path: &Path) -> Result<Self, TableError> {
        if appliances.is_empty() {
            return Err(TableError::EmptyTemplate {
                path: path.to_path_buf(),
            });
        }
        for (i, spec) in appliances.iter().enumerate() {
            if appliances[..i].iter().any(|a| a.name == spec.name) {
                return Err(TableError::DuplicateAppliance {
                    path: path.to_path_buf(),
                    name: spec.name.clone(),
                });
            }
        }
        Ok(Self { appliances })
    }

    /// Reads a template CSV with a `unified_names` column.
    ///
    /// # Errors
    ///
    /// Returns a `TableError` if the file cannot be read, lacks the
    /// `unified_names` column or has malformed rows.
    pub fn from_csv_path(path: &Path) -> Result<Self, TableError> {
        let file = open(path)?;
        Self::from_reader(file, path)
    }

    /// Reads a template CSV from any reader; `path` is used for diagnostics.
    ///
    /// # Errors
    ///
    /// See [`ApplianceTemplate::from_csv_path`].
    pub fn from_reader(reader: impl Read, path: &Path) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers().map_err(|e| TableError::csv(path, e))?.clone();
        require_columns(&headers, &[columns::UNIFIED_NAMES], path)?;

        let mut appliances = Vec::new();
        for row in rdr.deserialize::<ApplianceSpec>() {
            appliances.push(row.map_err(|e| TableError::csv(path, e))?);
        }
        Self::checked(appliances, path)
    }

    pub fn appliances(&self) -> &[ApplianceSpec] {
        &self.appliances
    }

    /// Canonical names in template order.
    pub fn names(&self) -> Vec<&str> {
        self.appliances.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.appliances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appliances.is_empty()
    }
}

/// Identifying columns of the appliance-count input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountColumns {
    pub adm2: String,
    /// `None` for single-level sources; every row then gets the placeholder.
    pub adm1: Option<String>,
    pub households: String,
}

impl Default for CountColumns {
    fn default() -> Self {
        Self {
            adm2: "shapeName".to_string(),
            adm1: Some(columns::ADM1.to_string()),
            households: columns::NUM_HH.to_string(),
        }
    }
}

/// One row of the appliance-count table.
#[derive(Debug, Clone, PartialEq)]
pub struct CountRow {
    /// `None` when an identifying cell is empty.
    pub key: Option<UnitKey>,
    /// Counts in template order; `None` when any appliance cell is empty.
    pub counts: Option<Vec<f64>>,
    pub households: Option<f64>,
}

/// Appliance counts per administrative unit, in source row order.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplianceCountTable {
    rows: Vec<CountRow>,
    appliance_names: Vec<String>,
}

impl ApplianceCountTable {
    /// Builds a table from already-parsed rows.
    pub fn from_rows(appliance_names: Vec<String>, rows: Vec<CountRow>) -> Self {
        Self {
            rows,
            appliance_names,
        }
    }

    /// Reads the appliance-count CSV.
    ///
    /// # Errors
    ///
    /// Returns `TableError::MissingColumns` if an identifying column or a
    /// template appliance column is absent, and `TableError::InvalidNumber`
    /// for non-numeric count cells.
    pub fn from_csv_path(
        path: &Path,
        cols: &CountColumns,
        template: &ApplianceTemplate,
    ) -> Result<Self, TableError> {
        let file = open(path)?;
        Self::from_reader(file, path, cols, template)
    }

    /// Reads the appliance-count CSV from any reader.
    ///
    /// # Errors
    ///
    /// See [`ApplianceCountTable::from_csv_path`].
    pub fn from_reader(
        reader: impl Read,
        path: &Path,
        cols: &CountColumns,
        template: &ApplianceTemplate,
    ) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers().map_err(|e| TableError::csv(path, e))?.clone();

        let mut required: Vec<&str> = vec![cols.adm2.as_str()];
        if let Some(adm1) = &cols.adm1 {
            required.push(adm1);
        }
        required.extend(template.names());
        let idx = require_columns(&headers, &required, path)?;
        let (adm2_idx, adm1_idx) = (idx[0], cols.adm1.as_ref().map(|_| idx[1]));
        let appliance_idx = &idx[if cols.adm1.is_some() { 2 } else { 1 }..];
        let households_idx = column_index(&headers, &cols.households);

        let mut rows = Vec::new();
        for (row_no, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| TableError::csv(path, e))?;
            let adm2 = text_cell(&record, adm2_idx);
            let adm1 = match adm1_idx {
                Some(i) => text_cell(&record, i),
                None => Some(PLACEHOLDER.to_string()),
            };
            let key = adm2.zip(adm1).map(|(adm2, adm1)| UnitKey::new(adm2, adm1));

            let mut counts = Some(Vec::with_capacity(appliance_idx.len()));
            for (&i, name) in appliance_idx.iter().zip(template.names()) {
                let cell = number_cell(&record, i, name, row_no, path)?;
                match (cell, counts.as_mut()) {
                    (Some(v), Some(c)) => c.push(v),
                    _ => counts = None,
                }
            }
            let households = match households_idx {
                Some(i) => number_cell(&record, i, &cols.households, row_no, path)?,
                None => None,
            };

            rows.push(CountRow {
                key,
                counts,
                households,
            });
        }

        Ok(Self {
            rows,
            appliance_names: template.names().into_iter().map(str::to_string).collect(),
        })
    }

    pub fn rows(&self) -> &[CountRow] {
        &self.rows
    }

    pub fn appliance_names(&self) -> &[String] {
        &self.appliance_names
    }

    /// Counts of the last row whose key equals `key` and whose counts are
    /// complete.
    pub fn counts_for(&self, key: &UnitKey) -> Option<&[f64]> {
        self.rows
            .iter()
            .rev()
            .filter(|r| r.key.as_ref() == Some(key))
            .find_map(|r| r.counts.as_deref())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Household counts indexed by composite key.
///
/// A present key with a `None` count is a unit whose household cell was empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HouseholdTable {
    counts: BTreeMap<UnitKey, Option<f64>>,
}

impl HouseholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a count; a later insert for the same key wins.
    pub fn insert(&mut self, key: UnitKey, households: Option<f64>) {
        if self.counts.insert(key.clone(), households).is_some() {
            log::warn!("household table: duplicate unit ({key}), keeping the last row");
        }
    }

    /// Reads the household column of the appliance-count CSV.
    ///
    /// # Errors
    ///
    /// Returns `TableError::MissingColumns` if an identifying column or the
    /// household column is absent.
    pub fn from_csv_path(path: &Path, cols: &CountColumns) -> Result<Self, TableError> {
        let file = open(path)?;
        Self::from_reader(file, path, cols)
    }

    /// Reads the household table from any reader.
    ///
    /// # Errors
    ///
    /// See [`HouseholdTable::from_csv_path`].
    pub fn from_reader(reader: impl Read, path: &Path, cols: &CountColumns) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers().map_err(|e| TableError::csv(path, e))?.clone();

        let mut required: Vec<&str> = vec![cols.adm2.as_str(), cols.households.as_str()];
        if let Some(adm1) = &cols.adm1 {
            required.push(adm1);
        }
        let idx = require_columns(&headers, &required, path)?;

        let mut table = Self::new();
        for (row_no, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| TableError::csv(path, e))?;
            let adm1 = match cols.adm1 {
                Some(_) => text_cell(&record, idx[2]),
                None => Some(PLACEHOLDER.to_string()),
            };
            let Some((adm2, adm1)) = text_cell(&record, idx[0]).zip(adm1) else {
                log::warn!("household table: row {row_no} has no unit name, ignored");
                continue;
            };
            let households = number_cell(&record, idx[1], &cols.households, row_no, path)?;
            table.insert(UnitKey::new(adm2, adm1), households);
        }
        Ok(table)
    }

    /// Returns `Some(count)` for a known unit (the count itself may be missing).
    pub fn get(&self, key: &UnitKey) -> Option<Option<f64>> {
        self.counts.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitKey, Option<f64>)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl FromIterator<(UnitKey, Option<f64>)> for HouseholdTable {
    fn from_iter<I: IntoIterator<Item = (UnitKey, Option<f64>)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, households) in iter {
            table.insert(key, households);
        }
        table
    }
}

pub(crate) fn open(path: &Path) -> Result<File, TableError> {
    File::open(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

/// Resolves every required column, reporting all missing ones at once.
pub(crate) fn require_columns(
    headers: &StringRecord,
    names: &[&str],
    path: &Path,
) -> Result<Vec<usize>, TableError> {
    let mut found = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match column_index(headers, name) {
            Some(i) => found.push(i),
            None => missing.push((*name).to_string()),
        }
    }
    if missing.is_empty() {
        Ok(found)
    } else {
        Err(TableError::MissingColumns {
            path: PathBuf::from(path),
            columns: missing,
        })
    }
}

pub(crate) fn text_cell(record: &StringRecord, idx: usize) -> Option<String> {
    record
        .get(idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parses a numeric cell. Empty and `NaN` cells are missing values.
pub(crate) fn number_cell(
    record: &StringRecord,
    idx: usize,
    column: &str,
    row: usize,
    path: &Path,
) -> Result<Option<f64>, TableError> {
    let raw = record.get(idx).map(str::trim).unwrap_or("");
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| TableError::InvalidNumber {
            path: path.to_path_buf(),
            column: column.to_string(),
            row,
            value: raw.to_string(),
        })
}
