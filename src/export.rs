//! CSV tables in the layout the downstream analysis notebooks read:
//! a leading index column and a header row of column numbers.

use csv::WriterBuilder;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

use crate::{parameter::format_float, sweep::SweepTable};

pub const TIMES_FILE: &str = "APCEMM-sweep-times.csv";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("CSV error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("sample {sample} of `{tag}` holds a gridded field, only scalar series can be tabulated")]
    NonScalar { tag: String, sample: usize },
}

pub fn inputs_file(tag: &str) -> String {
    format!("APCEMM-sweep-inputs-{tag}.csv")
}

pub fn evaluations_file(tag: &str) -> String {
    format!("APCEMM-sweep-evaluations-{tag}.csv")
}

/// Paths written by [`export_table`].
#[derive(Debug, Clone)]
pub struct ExportedFiles {
    pub inputs:      PathBuf,
    pub evaluations: PathBuf,
    pub times:       PathBuf,
}

/// Writes the swept inputs, the per-sample evaluations and the time axis
/// of `table` into `dir`.
pub fn export_table(dir: &Path, table: &SweepTable) -> Result<ExportedFiles, ExportError> {
    let rows = table
        .rows
        .iter()
        .enumerate()
        .map(|(sample, series)| {
            series
                .scalars()
                .ok_or_else(|| ExportError::NonScalar { tag: table.tag.clone(), sample })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let files = ExportedFiles {
        inputs:      dir.join(inputs_file(&table.tag)),
        evaluations: dir.join(evaluations_file(&table.tag)),
        times:       dir.join(TIMES_FILE),
    };

    let inputs: Vec<String> = table.inputs.iter().map(ToString::to_string).collect();
    write_column(&files.inputs, &inputs)?;

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|v| format_float(*v)).collect())
        .collect();
    write_rows(&files.evaluations, &cells)?;

    let times: Vec<String> = table.times.iter().map(ToString::to_string).collect();
    write_column(&files.times, &times)?;

    info!(
        "exported `{}`: {} sample(s) → {}",
        table.tag,
        table.rows.len(),
        files.evaluations.display()
    );
    Ok(files)
}

/// Single column with header `,0`.
pub fn write_column(path: &Path, values: &[String]) -> Result<(), ExportError> {
    let rows: Vec<Vec<String>> = values.iter().map(|v| vec![v.clone()]).collect();
    write_rows(path, &rows)
}

/// Rows under a header of column numbers; every row is prefixed by its index.
pub fn write_rows(path: &Path, rows: &[Vec<String>]) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io { path: path.to_path_buf(), source };
    let csv_err = |source| ExportError::Csv { path: path.to_path_buf(), source };

    let file = File::create(path).map_err(io_err)?;
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(BufWriter::new(file));

    let width = rows.iter().map(Vec::len).max().unwrap_or(1);
    let header = std::iter::once(String::new()).chain((0..width).map(|c| c.to_string()));
    wtr.write_record(header).map_err(csv_err)?;

    for (i, row) in rows.iter().enumerate() {
        let record = std::iter::once(i.to_string()).chain(row.iter().cloned());
        wtr.write_record(record).map_err(csv_err)?;
    }

    let mut inner = wtr
        .into_inner()
        .map_err(|e| io_err(std::io::Error::other(e.to_string())))?;
    inner.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        harvest::{Field, HarvestedValue, TimeSeries},
        parameter::{ParamValue, Parameter},
    };
    use std::fs;

    fn series(values: &[f64]) -> TimeSeries {
        let mut s = TimeSeries {
            minutes: (0..values.len() as u32).map(|i| i * 10).collect(),
            values:  values.iter().map(|&v| HarvestedValue::Scalar(v)).collect(),
        };
        s.pad_to_canonical();
        s
    }

    #[test]
    fn column_layout_matches_dataframe_to_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("col.csv");
        write_column(&path, &["0".into(), "5".into(), "10".into()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), ",0\n0,0\n1,5\n2,10\n");
    }

    #[test]
    fn table_export_writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let table = SweepTable {
            tag:       "RH".into(),
            parameter: Parameter::RelativeHumidity,
            inputs:    vec![ParamValue::Int(0), ParamValue::Int(5)],
            times:     series(&[]).minutes,
            rows:      vec![series(&[1.5e-5, 0.25]), series(&[])],
        };

        let files = export_table(dir.path(), &table).unwrap();
        assert!(files.inputs.ends_with("APCEMM-sweep-inputs-RH.csv"));
        assert_eq!(fs::read_to_string(&files.inputs).unwrap(), ",0\n0,0\n1,5\n");

        let evals = fs::read_to_string(&files.evaluations).unwrap();
        let lines: Vec<&str> = evals.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(",0,1,2,"));
        assert!(lines[0].ends_with(",36"));
        assert!(lines[1].starts_with("0,1.5e-05,0.25,0.0,"));
        assert_eq!(lines[2].split(',').count(), 38);

        let times = fs::read_to_string(&files.times).unwrap();
        assert!(times.ends_with("36,360\n"));
    }

    #[test]
    fn gridded_rows_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut row = series(&[1.0]);
        row.values[0] = HarvestedValue::Field(Field { shape: vec![2], data: vec![1.0, 2.0] });
        let table = SweepTable {
            tag:       "T".into(),
            parameter: Parameter::Temperature,
            inputs:    vec![ParamValue::Int(217)],
            times:     row.minutes.clone(),
            rows:      vec![row],
        };
        assert!(matches!(
            export_table(dir.path(), &table),
            Err(ExportError::NonScalar { sample: 0, .. })
        ));
    }
}
