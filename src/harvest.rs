//! Reading `ts_aerosol*.nc` outputs back into an aligned time series.

use glob::{glob, Pattern};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────
pub const OUTPUT_PREFIX:      &str  = "ts_aerosol";
pub const OUTPUT_SUFFIX:      &str  = ".nc";
pub const CANONICAL_LEN:      usize = 37;
pub const PAD_STRIDE_MINUTES: u32   = 10;
pub const DEFAULT_CLIP:       f64   = 1e-3;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("output directory {0} does not exist")]
    MissingDirectory(PathBuf),
    #[error("bad glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot read a HHMM timestamp from {0}")]
    BadTimestamp(String),
    #[error("unknown output field `{0}`")]
    UnknownField(String),
    #[error("{file} has no variable `{variable}`")]
    MissingVariable { file: PathBuf, variable: String },
    #[error("{file}: variable `{variable}` is empty")]
    EmptyVariable { file: PathBuf, variable: String },
    #[error("NetCDF error in {file}: {source}")]
    Netcdf { file: PathBuf, source: netcdf::Error },
}

// ─────────────────────────────────────────────────────────────────────
// Output fields and values
// ─────────────────────────────────────────────────────────────────────

/// Quantities APCEMM writes to each aerosol time-series file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputField {
    #[serde(rename = "Horizontal optical depth")]
    HorizontalOpticalDepth,
    #[serde(rename = "Vertical optical depth")]
    VerticalOpticalDepth,
    /// Ice particles per unit contrail length, #/m.
    #[serde(rename = "Number Ice Particles")]
    NumberIceParticles,
    /// Ice mass per unit contrail length, kg/m.
    #[serde(rename = "Ice Mass")]
    IceMass,
    /// Vertical optical depth integrated over the grid.
    #[serde(rename = "intOD")]
    IntegratedOpticalDepth,
}

impl OutputField {
    pub const ALL: [OutputField; 5] = [
        OutputField::HorizontalOpticalDepth,
        OutputField::VerticalOpticalDepth,
        OutputField::NumberIceParticles,
        OutputField::IceMass,
        OutputField::IntegratedOpticalDepth,
    ];

    /// Name of the NetCDF variable.
    pub fn variable_name(self) -> &'static str {
        match self {
            OutputField::HorizontalOpticalDepth => "Horizontal optical depth",
            OutputField::VerticalOpticalDepth   => "Vertical optical depth",
            OutputField::NumberIceParticles     => "Number Ice Particles",
            OutputField::IceMass                => "Ice Mass",
            OutputField::IntegratedOpticalDepth => "intOD",
        }
    }

    /// Optical-depth profiles are read whole; everything else is reduced to
    /// its first entry along the leading dimension.
    pub fn is_gridded(self) -> bool {
        matches!(self, OutputField::HorizontalOpticalDepth | OutputField::VerticalOpticalDepth)
    }
}

impl fmt::Display for OutputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.variable_name())
    }
}

impl FromStr for OutputField {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputField::ALL
            .into_iter()
            .find(|f| f.variable_name() == s)
            .ok_or_else(|| HarvestError::UnknownField(s.to_string()))
    }
}

/// Row-major block of values with its dimension lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub shape: Vec<usize>,
    pub data:  Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HarvestedValue {
    Scalar(f64),
    Field(Field),
}

impl HarvestedValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            HarvestedValue::Scalar(v) => Some(*v),
            HarvestedValue::Field(_)  => None,
        }
    }

    fn clip_below(&mut self, cutoff: f64) {
        let clip = |v: &mut f64| if *v <= cutoff { *v = 0.0 };
        match self {
            HarvestedValue::Scalar(v) => clip(v),
            HarvestedValue::Field(f)  => f.data.iter_mut().for_each(clip),
        }
    }
}

/// Parallel minute offsets and values, one pair per output file plus padding.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub minutes: Vec<u32>,
    pub values:  Vec<HarvestedValue>,
}

impl TimeSeries {
    /// Seeds an empty axis with 0 and extends both vectors to
    /// [`CANONICAL_LEN`]: minutes continue in steps of
    /// [`PAD_STRIDE_MINUTES`], values are zero. Longer series are kept whole.
    pub fn pad_to_canonical(&mut self) {
        if self.minutes.is_empty() {
            self.minutes.push(0);
        }
        while self.minutes.len() < CANONICAL_LEN {
            let last = self.minutes[self.minutes.len() - 1];
            self.minutes.push(last + PAD_STRIDE_MINUTES);
        }
        while self.values.len() < CANONICAL_LEN {
            self.values.push(HarvestedValue::Scalar(0.0));
        }
    }

    /// Zeroes every value not strictly above `cutoff`.
    pub fn clip_below(&mut self, cutoff: f64) {
        self.values.iter_mut().for_each(|v| v.clip_below(cutoff));
    }

    /// Scalar view of the values, `None` if any entry is a gridded field.
    pub fn scalars(&self) -> Option<Vec<f64>> {
        self.values.iter().map(HarvestedValue::as_scalar).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────
// Dataset access
// ─────────────────────────────────────────────────────────────────────

/// Pulls one field out of one output file.
pub trait DatasetReader: Sync {
    fn read_field(&self, path: &Path, field: OutputField) -> Result<HarvestedValue, HarvestError>;
}

/// [`DatasetReader`] over real NetCDF files.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfReader;

impl DatasetReader for NetcdfReader {
    fn read_field(&self, path: &Path, field: OutputField) -> Result<HarvestedValue, HarvestError> {
        let nc_err = |source| HarvestError::Netcdf { file: path.to_path_buf(), source };

        let file = netcdf::open(path).map_err(nc_err)?;
        let name = field.variable_name();
        let var = file.variable(name).ok_or_else(|| HarvestError::MissingVariable {
            file:     path.to_path_buf(),
            variable: name.to_string(),
        })?;
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let data = var.get_values::<f64, _>(..).map_err(nc_err)?;

        if field.is_gridded() {
            return Ok(HarvestedValue::Field(Field { shape, data }));
        }
        leading_entry(shape, data).ok_or_else(|| HarvestError::EmptyVariable {
            file:     path.to_path_buf(),
            variable: name.to_string(),
        })
    }
}

/// First slab along the leading dimension: a scalar when it holds a single
/// value, otherwise a field with the trailing shape.
fn leading_entry(shape: Vec<usize>, data: Vec<f64>) -> Option<HarvestedValue> {
    if data.is_empty() {
        return None;
    }
    let trailing: Vec<usize> = shape.iter().skip(1).copied().collect();
    let slab_len: usize = trailing.iter().product();
    if slab_len <= 1 {
        return Some(HarvestedValue::Scalar(data[0]));
    }
    Some(HarvestedValue::Field(Field { shape: trailing, data: data[..slab_len].to_vec() }))
}

/// Variable names and dimensions of one output file.
pub fn describe_dataset(path: &Path) -> Result<Vec<(String, Vec<(String, usize)>)>, HarvestError> {
    let file = netcdf::open(path)
        .map_err(|source| HarvestError::Netcdf { file: path.to_path_buf(), source })?;
    let mut out: Vec<_> = file
        .variables()
        .map(|v| {
            let dims = v.dimensions().iter().map(|d| (d.name(), d.len())).collect();
            (v.name(), dims)
        })
        .collect();
    out.sort();
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────
// Directory scanning
// ─────────────────────────────────────────────────────────────────────

/// All `ts_aerosol*.nc` entries directly under `dir`, sorted by name.
pub fn list_output_files(dir: &Path) -> Result<Vec<PathBuf>, HarvestError> {
    if !dir.is_dir() {
        return Err(HarvestError::MissingDirectory(dir.to_path_buf()));
    }
    let pattern = format!(
        "{}/{OUTPUT_PREFIX}*{OUTPUT_SUFFIX}",
        Pattern::escape(&dir.display().to_string())
    );
    let mut v: Vec<_> = glob(&pattern)?.filter_map(Result::ok).collect();
    v.sort();
    Ok(v)
}

/// `ts_aerosol_case0_0130.nc` → 90: the last four characters before the
/// final `.` are HHMM.
pub fn parse_timestamp_minutes(path: &Path) -> Result<u32, HarvestError> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| HarvestError::BadTimestamp(path.display().to_string()))?;
    let bad = || HarvestError::BadTimestamp(name.to_string());

    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    if stem.len() < 4 || !stem.is_char_boundary(stem.len() - 4) {
        return Err(bad());
    }
    let hhmm = &stem[stem.len() - 4..];
    let hrs:  u32 = hhmm[..2].parse().map_err(|_| bad())?;
    let mins: u32 = hhmm[2..].parse().map_err(|_| bad())?;
    Ok(hrs * 60 + mins)
}

/// Reads `field` from every output file in `dir` and pads the result to the
/// canonical axis.
pub fn harvest(dir: &Path, field: OutputField, reader: &dyn DatasetReader) -> Result<TimeSeries, HarvestError> {
    let files = list_output_files(dir)?;
    debug!("harvesting {} from {} file(s) in {}", field, files.len(), dir.display());

    let mut series = TimeSeries { minutes: Vec::with_capacity(CANONICAL_LEN), values: Vec::with_capacity(CANONICAL_LEN) };
    for path in &files {
        let minutes = parse_timestamp_minutes(path)?;
        let value = reader.read_field(path, field)?;
        series.minutes.push(minutes);
        series.values.push(value);
    }
    series.pad_to_canonical();
    Ok(series)
}

// ─────────────────────────────────────────────────────────────────────
// Reset
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub removed: usize,
    pub failed:  usize,
}

/// Deletes every output entry in `dir`: files and symlinks are unlinked,
/// directories removed recursively. Failures are logged and counted, never
/// returned. A missing directory has nothing to delete.
pub fn reset_outputs(dir: &Path) -> ResetReport {
    let mut report = ResetReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            report.failed += 1;
            return report;
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(OUTPUT_PREFIX) && name.ends_with(OUTPUT_SUFFIX)
        })
        .map(|e| e.path())
        .collect();
    matches.sort();

    for path in matches {
        let result = fs::symlink_metadata(&path).and_then(|meta| {
            if meta.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            }
        });
        match result {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!("Failed to delete {}. Reason: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }
    debug!("reset {}: {:?}", dir.display(), report);
    report
}
