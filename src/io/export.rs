//! CSV export of the tabular pipeline artifacts.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use crate::columns;
use crate::io::geojson::{Feature, value_text};
use crate::pipeline::aggregate::StatsTable;
use crate::pipeline::daily::DailySeries;
use crate::pipeline::normalize::NormalizedTable;

/// Opens `path` for writing, creating missing parent directories.
fn create(path: &Path) -> io::Result<io::BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(io::BufWriter::new(File::create(path)?))
}

/// Number cell; missing values are empty cells.
fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Exports the statistics cache artifact to `path`.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_statistics(table: &StatsTable, path: &Path) -> io::Result<()> {
    write_statistics(table, create(path)?)
}

/// Writes `adm2,adm1,min,max,sum,mean`, one row per unit in key order.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_statistics(table: &StatsTable, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(columns::STATISTICS_COLUMNS)?;
    for (key, s) in table.iter() {
        wtr.write_record([
            key.adm2.clone(),
            key.adm1.clone(),
            s.min.to_string(),
            s.max.to_string(),
            s.sum.to_string(),
            s.mean.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Exports the normalized statistics artifact to `path`.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_normalized(table: &NormalizedTable, path: &Path) -> io::Result<()> {
    write_normalized(table, create(path)?)
}

/// Writes the normalized table with all eleven columns.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_normalized(table: &NormalizedTable, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(columns::NORMALIZED_COLUMNS)?;
    for row in table.rows() {
        let s = row.stats;
        let hh = row.per_household;
        wtr.write_record([
            row.key.adm2.clone(),
            row.key.adm1.clone(),
            cell(s.map(|s| s.min)),
            cell(s.map(|s| s.max)),
            cell(s.map(|s| s.sum)),
            cell(s.map(|s| s.mean)),
            cell(row.num_hh),
            cell(hh.map(|h| h.hh_sum)),
            cell(hh.map(|h| h.hh_mean)),
            cell(hh.map(|h| h.hh_max)),
            cell(hh.map(|h| h.hh_min)),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Exports the long-format daily series to `path`.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_daily_series(series: &DailySeries, path: &Path) -> io::Result<()> {
    write_daily_series(series, create(path)?)
}

/// Writes `adm2,adm1,time,value`, 1440 rows per unit.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_daily_series(series: &DailySeries, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record([columns::ADM2, columns::ADM1, columns::TIME, columns::VALUE])?;
    for (key, day) in series.units() {
        for (minute, v) in day.iter().enumerate() {
            let time = DailySeries::time_label(minute);
            let value = v.to_string();
            wtr.write_record([key.adm2.as_str(), key.adm1.as_str(), time.as_str(), value.as_str()])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Exports one region's properties to `path`.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_region_row(feature: &Feature, path: &Path) -> io::Result<()> {
    write_region_row(feature, create(path)?)
}

/// Writes the unified property schema as header and the feature's values as
/// the single data row.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_region_row(feature: &Feature, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(columns::UNIFIED_COLUMNS)?;
    wtr.write_record(
        columns::UNIFIED_COLUMNS
            .iter()
            .map(|name| feature.property(name).map(value_text).unwrap_or_default()),
    )?;
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::UnitKey;
    use crate::pipeline::aggregate::UnitStatistics;
    use crate::pipeline::normalize::{NormalizedRow, PerHousehold};
    use serde_json::Value;

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap_or_default()
    }

    #[test]
    fn statistics_header_and_rows() {
        let table: StatsTable = [(
            UnitKey::new("Ikeja", "Lagos"),
            UnitStatistics {
                min: 0.5,
                max: 2.0,
                sum: 10.0,
                mean: 1.25,
            },
        )]
        .into_iter()
        .collect();
        let mut buf = Vec::new();
        write_statistics(&table, &mut buf).expect("write");
        assert_eq!(text(buf), "adm2,adm1,min,max,sum,mean\nIkeja,Lagos,0.5,2,10,1.25\n");
    }

    #[test]
    fn normalized_missing_values_are_empty_cells() {
        let table: NormalizedTable = [
            NormalizedRow {
                key: UnitKey::new("a", "x"),
                stats: Some(UnitStatistics {
                    min: 0.0,
                    max: 8.0,
                    sum: 1200.0,
                    mean: 4.0,
                }),
                num_hh: Some(4.0),
                per_household: Some(PerHousehold {
                    hh_sum: 300.0,
                    hh_mean: 1.0,
                    hh_max: 2.0,
                    hh_min: 0.0,
                }),
            },
            NormalizedRow {
                key: UnitKey::new("b", "x"),
                stats: None,
                num_hh: Some(2.0),
                per_household: None,
            },
        ]
        .into_iter()
        .collect();
        let mut buf = Vec::new();
        write_normalized(&table, &mut buf).expect("write");
        let out = text(buf);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "adm2,adm1,min,max,sum,mean,num_hh,hh_sum,hh_mean,hh_max,hh_min");
        assert_eq!(lines[1], "a,x,0,8,1200,4,4,300,1,2,0");
        assert_eq!(lines[2], "b,x,,,,,2,,,,");
    }

    #[test]
    fn normalized_output_reads_back() {
        let table: NormalizedTable = [NormalizedRow {
            key: UnitKey::new("a", "x"),
            stats: None,
            num_hh: None,
            per_household: None,
        }]
        .into_iter()
        .collect();
        let mut buf = Vec::new();
        write_normalized(&table, &mut buf).expect("write");
        let back = NormalizedTable::from_reader(buf.as_slice(), Path::new("n.csv")).expect("read");
        assert_eq!(back, table);
    }

    #[test]
    fn region_row_has_header_and_one_line() {
        let mut props = serde_json::Map::new();
        props.insert("admin2".to_string(), Value::from("Ikeja"));
        props.insert("admin1".to_string(), Value::from("Lagos"));
        props.insert("ISO3".to_string(), Value::from("NGA"));
        props.insert("sum".to_string(), Value::from(12.5));
        props.insert("num_hh".to_string(), Value::Null);
        let feature = Feature::new(props, None);

        let mut buf = Vec::new();
        write_region_row(&feature, &mut buf).expect("write");
        let out = text(buf);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "admin1,admin2,ISO3,min,max,sum,mean,num_hh,cluster,hh_sum,hh_mean,hh_max,hh_min"
        );
        assert_eq!(lines[1], "Lagos,Ikeja,NGA,,,12.5,,,,,,,");
    }
}
