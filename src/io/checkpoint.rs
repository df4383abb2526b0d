//! Profile checkpoint files.
//!
//! A checkpoint is a CSV whose first column is the sample index (`minute`)
//! and whose remaining columns hold one profile each, labelled with the
//! unit's composite key. Full-resolution checkpoints are named
//! `<prefix>_<seq>.csv`, daily-average ones `<prefix>_avg_<seq>.csv`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::columns;
use crate::error::CheckpointError;
use crate::key::UnitKey;

/// Which of the two profile representations a checkpoint holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Minute-resolution profile over the whole date range.
    Full,
    /// 1440-sample mean day.
    DailyAverage,
}

/// Location and naming of a run's checkpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointLayout {
    dir: PathBuf,
    prefix: String,
}

impl CheckpointLayout {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of checkpoint number `seq` of the given kind.
    pub fn path(&self, kind: CheckpointKind, seq: u32) -> PathBuf {
        let name = match kind {
            CheckpointKind::Full => format!("{}_{seq}.csv", self.prefix),
            CheckpointKind::DailyAverage => format!("{}_avg_{seq}.csv", self.prefix),
        };
        self.dir.join(name)
    }

    /// Parses the sequence number out of a file name of the given kind.
    pub fn sequence_of(&self, kind: CheckpointKind, file_name: &str) -> Option<u32> {
        let rest = file_name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')?
            .strip_suffix(".csv")?;
        let digits = match kind {
            CheckpointKind::Full => rest,
            CheckpointKind::DailyAverage => rest.strip_prefix("avg_")?,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Lists existing checkpoints of one kind, sorted by sequence number.
    ///
    /// A missing directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Io` if the directory cannot be listed.
    pub fn discover(&self, kind: CheckpointKind) -> Result<Vec<(u32, PathBuf)>, CheckpointError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CheckpointError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            if let Some(seq) = name.to_str().and_then(|n| self.sequence_of(kind, n)) {
                found.push((seq, entry.path()));
            }
        }
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found)
    }

    /// Paths of existing checkpoints of one kind, sorted by sequence number.
    ///
    /// # Errors
    ///
    /// See [`CheckpointLayout::discover`].
    pub fn paths(&self, kind: CheckpointKind) -> Result<Vec<PathBuf>, CheckpointError> {
        Ok(self.discover(kind)?.into_iter().map(|(_, p)| p).collect())
    }
}

/// Writes one checkpoint.
///
/// All columns must have the same length. The file is written next to its
/// destination and renamed into place, so a reader never sees a partial
/// checkpoint under the final name.
///
/// # Errors
///
/// Returns `CheckpointError::Io`/`Csv` if writing fails, or `Malformed` if the
/// columns differ in length.
pub fn write_checkpoint(path: &Path, columns: &[(UnitKey, Vec<f64>)]) -> Result<(), CheckpointError> {
    let rows = columns.first().map_or(0, |(_, v)| v.len());
    if let Some((key, v)) = columns.iter().find(|(_, v)| v.len() != rows) {
        return Err(CheckpointError::Malformed {
            path: path.to_path_buf(),
            row: 0,
            reason: format!("profile of ({key}) has {} samples, expected {rows}", v.len()),
        });
    }

    let io_err = |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp).map_err(io_err)?;
        write_checkpoint_to(BufWriter::new(file), columns).map_err(|source| CheckpointError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    }
    fs::rename(&tmp, path).map_err(io_err)
}

/// Writes checkpoint CSV content to any writer.
///
/// # Errors
///
/// Returns a `csv::Error` if writing fails.
pub fn write_checkpoint_to(writer: impl Write, columns: &[(UnitKey, Vec<f64>)]) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push(columns::MINUTE.to_string());
    header.extend(columns.iter().map(|(key, _)| key.to_label()));
    wtr.write_record(&header)?;

    let rows = columns.first().map_or(0, |(_, v)| v.len());
    let mut record = Vec::with_capacity(columns.len() + 1);
    for i in 0..rows {
        record.clear();
        record.push(i.to_string());
        record.extend(columns.iter().map(|(_, v)| v[i].to_string()));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Streaming reader over one checkpoint file.
pub struct CheckpointReader {
    path: PathBuf,
    keys: Vec<UnitKey>,
    rdr: csv::Reader<File>,
}

impl CheckpointReader {
    /// Opens a checkpoint and decodes its column keys.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Io` if the file cannot be opened, `Csv` if the
    /// header cannot be read and `Key` if a column label is not a composite key.
    pub fn open(path: &Path) -> Result<Self, CheckpointError> {
        let file = File::open(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut rdr = csv::ReaderBuilder::new().from_reader(file);
        let headers = rdr
            .headers()
            .map_err(|source| CheckpointError::Csv {
                path: path.to_path_buf(),
                source,
            })?
            .clone();

        let keys = headers
            .iter()
            .skip(1)
            .map(UnitKey::from_label)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| CheckpointError::Key {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            keys,
            rdr,
        })
    }

    pub fn keys(&self) -> &[UnitKey] {
        &self.keys
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Calls `f` with the values of every data row, in file order, and returns
    /// the number of rows read.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Malformed` on a short row or a non-numeric
    /// cell; a truncated file surfaces here.
    pub fn for_each_row(mut self, mut f: impl FnMut(&[f64])) -> Result<usize, CheckpointError> {
        let mut values = vec![0.0; self.keys.len()];
        let mut rows = 0;
        for (row, record) in self.rdr.records().enumerate() {
            let record = record.map_err(|e| CheckpointError::Malformed {
                path: self.path.clone(),
                row,
                reason: e.to_string(),
            })?;
            if record.len() != self.keys.len() + 1 {
                return Err(CheckpointError::Malformed {
                    path: self.path.clone(),
                    row,
                    reason: format!("{} fields, expected {}", record.len(), self.keys.len() + 1),
                });
            }
            for (slot, cell) in values.iter_mut().zip(record.iter().skip(1)) {
                *slot = cell.trim().parse().map_err(|_| CheckpointError::Malformed {
                    path: self.path.clone(),
                    row,
                    reason: format!("non-numeric sample {cell:?}"),
                })?;
            }
            f(&values);
            rows += 1;
        }
        Ok(rows)
    }

    /// Reads every column into memory.
    ///
    /// # Errors
    ///
    /// See [`CheckpointReader::for_each_row`].
    pub fn read_columns(self) -> Result<Vec<(UnitKey, Vec<f64>)>, CheckpointError> {
        let keys = self.keys.clone();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); keys.len()];
        self.for_each_row(|row| {
            for (col, v) in columns.iter_mut().zip(row) {
                col.push(*v);
            }
        })?;
        Ok(keys.into_iter().zip(columns).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<(UnitKey, Vec<f64>)> {
        vec![
            (UnitKey::new("Ikeja", "Lagos"), vec![1.0, 2.5, 0.125]),
            (UnitKey::new("Ife, North", "Osun"), vec![0.0, -1.0, 3.0]),
        ]
    }

    #[test]
    fn names_and_sequence_numbers_agree() {
        let layout = CheckpointLayout::new("out", "NGA_all_intermediate");
        let full = layout.path(CheckpointKind::Full, 12);
        let avg = layout.path(CheckpointKind::DailyAverage, 3);
        assert!(full.ends_with("NGA_all_intermediate_12.csv"));
        assert!(avg.ends_with("NGA_all_intermediate_avg_3.csv"));
        assert_eq!(layout.sequence_of(CheckpointKind::Full, "NGA_all_intermediate_12.csv"), Some(12));
        assert_eq!(layout.sequence_of(CheckpointKind::Full, "NGA_all_intermediate_avg_3.csv"), None);
        assert_eq!(
            layout.sequence_of(CheckpointKind::DailyAverage, "NGA_all_intermediate_avg_3.csv"),
            Some(3)
        );
        assert_eq!(layout.sequence_of(CheckpointKind::Full, "NGA_all_intermediate_12.csv.tmp"), None);
    }

    #[test]
    fn header_carries_minute_and_labels() {
        let mut buf = Vec::new();
        write_checkpoint_to(&mut buf, &columns()).ok();
        let text = String::from_utf8(buf).unwrap_or_default();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(r#"minute,"[""Ikeja"",""Lagos""]","[""Ife, North"",""Osun""]""#)
        );
        assert_eq!(lines.next(), Some("0,1,0"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn written_checkpoint_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run_0.csv");
        write_checkpoint(&path, &columns()).expect("write should succeed");
        assert!(!dir.path().join("run_0.csv.tmp").exists());

        let read = CheckpointReader::open(&path)
            .and_then(CheckpointReader::read_columns)
            .expect("read should succeed");
        assert_eq!(read, columns());
    }

    #[test]
    fn ragged_columns_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = vec![
            (UnitKey::new("a", "b"), vec![1.0, 2.0]),
            (UnitKey::new("c", "d"), vec![1.0]),
        ];
        let err = write_checkpoint(&dir.path().join("x_0.csv"), &bad);
        assert!(matches!(err, Err(CheckpointError::Malformed { .. })));
    }

    #[test]
    fn corrupted_label_is_a_key_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run_0.csv");
        fs::write(&path, "minute,\"('Ikeja', 'Lagos')\"\n0,1.0\n").expect("fixture");
        let err = CheckpointReader::open(&path);
        assert!(matches!(err, Err(CheckpointError::Key { .. })));
    }

    #[test]
    fn truncated_row_is_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run_0.csv");
        fs::write(&path, "minute,\"[\"\"a\"\",\"\"b\"\"]\"\n0,1.0\n1\n").expect("fixture");
        let result = CheckpointReader::open(&path).and_then(|r| r.for_each_row(|_| {}));
        assert!(matches!(result, Err(CheckpointError::Malformed { row: 1, .. })));
    }

    #[test]
    fn discover_sorts_numerically_and_ignores_strangers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = CheckpointLayout::new(dir.path(), "run");
        for name in ["run_10.csv", "run_2.csv", "run_avg_2.csv", "other_1.csv", "run_x.csv"] {
            fs::write(dir.path().join(name), "minute\n").expect("fixture");
        }
        let seqs: Vec<u32> = layout
            .discover(CheckpointKind::Full)
            .expect("discover")
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(seqs, vec![2, 10]);
        assert_eq!(layout.discover(CheckpointKind::DailyAverage).map(|v| v.len()).ok(), Some(1));
    }

    #[test]
    fn discover_in_missing_directory_is_empty() {
        let layout = CheckpointLayout::new("/nonexistent/demand-atlas", "run");
        assert_eq!(layout.discover(CheckpointKind::Full).map(|v| v.len()).ok(), Some(0));
    }
}
