//! Runs one parameter across a range of values, one model run per value.

use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    document::{reset_to_defaults, ConfigDocument, PatchError},
    driver::{DriverError, SimulationDriver},
    harvest::{harvest, reset_outputs, DatasetReader, HarvestError, NetcdfReader, OutputField, TimeSeries},
    parameter::{ParamValue, Parameter, ParameterSet},
    schema::{SchemaError, TemplateSchema},
    settings::{SettingsError, SweepSettings},
};

/// Upper bound on the number of values one `arange` may produce.
pub const MAX_SAMPLES: usize = 1_000_000;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Harvest(#[from] HarvestError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid range: {0}")]
    BadRange(String),
    #[error("`{tag}` sample {index} ({value}): {source}")]
    Sample {
        tag:    String,
        index:  usize,
        value:  ParamValue,
        #[source]
        source: Box<SweepError>,
    },
}

// ─────────────────────────────────────────────────────────────────────
// Plans and results
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    /// Short name used in exported file names, e.g. `RH`.
    pub tag:       String,
    pub parameter: Parameter,
    pub values:    Vec<ParamValue>,
}

impl SweepPlan {
    pub fn new(tag: &str, parameter: Parameter, values: Vec<ParamValue>) -> Self {
        Self { tag: tag.to_string(), parameter, values }
    }

    /// Half-open `start..stop` in steps of `step`. Integer bounds and step
    /// give integer values; any float makes every value a float.
    pub fn arange(
        tag:       &str,
        parameter: Parameter,
        start:     ParamValue,
        stop:      ParamValue,
        step:      ParamValue,
    ) -> Result<Self, SweepError> {
        let too_long = || SweepError::BadRange(format!("{start}..{stop} step {step} exceeds {MAX_SAMPLES} samples"));
        let values = match (start, stop, step) {
            (ParamValue::Int(a), ParamValue::Int(b), ParamValue::Int(s)) => {
                if s == 0 {
                    return Err(SweepError::BadRange("step is zero".into()));
                }
                // i128 keeps the span and every intermediate value exact.
                let (a, b, s) = (i128::from(a), i128::from(b), i128::from(s));
                let n = if (s > 0 && b > a) || (s < 0 && b < a) {
                    ((b - a).abs() + s.abs() - 1) / s.abs()
                } else {
                    0
                };
                if n > MAX_SAMPLES as i128 {
                    return Err(too_long());
                }
                (0..n)
                    .map(|i| i64::try_from(a + i * s).map(ParamValue::Int).map_err(|_| too_long()))
                    .collect::<Result<Vec<_>, _>>()?
            }
            _ => {
                let (a, b, s) = (start.as_f64(), stop.as_f64(), step.as_f64());
                if s == 0.0 || !s.is_finite() || !a.is_finite() || !b.is_finite() {
                    return Err(SweepError::BadRange(format!("{start}..{stop} step {step}")));
                }
                let n = ((b - a) / s).ceil().max(0.0);
                if !n.is_finite() || n > MAX_SAMPLES as f64 {
                    return Err(too_long());
                }
                (0..n as usize).map(|i| ParamValue::Float(a + i as f64 * s)).collect()
            }
        };
        if values.is_empty() {
            return Err(SweepError::BadRange(format!("{start}..{stop} step {step} is empty")));
        }
        Ok(Self::new(tag, parameter, values))
    }
}

/// Rows = samples, columns = minutes on the time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepTable {
    pub tag:       String,
    pub parameter: Parameter,
    pub inputs:    Vec<ParamValue>,
    pub times:     Vec<u32>,
    pub rows:      Vec<TimeSeries>,
}

// ─────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workspace:       PathBuf,
    pub config_name:     String,
    pub output_subdir:   PathBuf,
    pub field:           OutputField,
    /// One directory per sample instead of a single reused one.
    pub isolate_samples: bool,
    /// Only honoured together with `isolate_samples`.
    pub parallel:        bool,
    pub clip_below:      Option<f64>,
}

impl RunOptions {
    pub fn new(workspace: impl Into<PathBuf>, field: OutputField) -> Self {
        Self {
            workspace:       workspace.into(),
            config_name:     "input.yaml".to_string(),
            output_subdir:   PathBuf::from("APCEMM_out"),
            field,
            isolate_samples: true,
            parallel:        false,
            clip_below:      None,
        }
    }
}

/// Files one sample reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleWorkspace {
    pub root:       PathBuf,
    pub config:     PathBuf,
    pub output_dir: PathBuf,
}

pub struct SweepRunner {
    template: PathBuf,
    schema:   TemplateSchema,
    driver:   SimulationDriver,
    reader:   Box<dyn DatasetReader>,
    base:     ParameterSet,
    options:  RunOptions,
}

impl SweepRunner {
    pub fn new(template: impl Into<PathBuf>, driver: SimulationDriver, options: RunOptions) -> Self {
        Self {
            template: template.into(),
            schema:   TemplateSchema::builtin(),
            driver,
            reader:   Box::new(NetcdfReader),
            base:     ParameterSet::new(),
            options,
        }
    }

    pub fn from_settings(settings: &SweepSettings) -> Result<Self, SweepError> {
        let driver = SimulationDriver::new(&settings.paths.executable)?;
        let options = RunOptions {
            workspace:       settings.paths.workspace.clone(),
            config_name:     settings.paths.config_name.clone(),
            output_subdir:   settings.paths.output_subdir.clone(),
            field:           settings.run.output,
            isolate_samples: settings.run.isolate_samples,
            parallel:        settings.run.parallel,
            clip_below:      settings.run.clip_below,
        };
        let mut runner = Self::new(&settings.paths.template, driver, options)
            .with_base(settings.base_parameters()?);
        if let Some(path) = &settings.paths.schema {
            runner = runner.with_schema(TemplateSchema::load(path)?);
        }
        Ok(runner)
    }

    pub fn with_schema(mut self, schema: TemplateSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_base(mut self, base: ParameterSet) -> Self {
        self.base = base;
        self
    }

    pub fn with_reader(mut self, reader: Box<dyn DatasetReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn workspace_for(&self, tag: &str, index: usize) -> SampleWorkspace {
        let root = if self.options.isolate_samples {
            self.options.workspace.join(tag).join(format!("sample_{index:04}"))
        } else {
            self.options.workspace.clone()
        };
        SampleWorkspace {
            config:     root.join(&self.options.config_name),
            output_dir: root.join(&self.options.output_subdir),
            root,
        }
    }

    /// Runs every value of `plan`. Any failing sample aborts the sweep.
    pub fn run(&self, plan: &SweepPlan) -> Result<SweepTable, SweepError> {
        let total = plan.values.len();
        info!("sweep `{}`: {} over {} value(s)", plan.tag, plan.parameter, total);

        let run_one = |(index, value): (usize, ParamValue)| {
            info!("[{}] sample {}/{}: {} = {}", plan.tag, index + 1, total, plan.parameter, value);
            self.run_sample(plan, index, value).map_err(|e| SweepError::Sample {
                tag:    plan.tag.clone(),
                index,
                value,
                source: Box::new(e),
            })
        };

        let indexed: Vec<(usize, ParamValue)> = plan.values.iter().copied().enumerate().collect();
        let rows: Vec<TimeSeries> = if self.options.parallel && self.options.isolate_samples {
            indexed.into_par_iter().map(run_one).collect::<Result<_, _>>()?
        } else {
            indexed.into_iter().map(run_one).collect::<Result<_, _>>()?
        };

        let times = rows.last().map(|s| s.minutes.clone()).unwrap_or_default();
        for (index, row) in rows.iter().enumerate() {
            if row.minutes != times {
                warn!("[{}] sample {} has a different time axis than the last sample", plan.tag, index);
            }
        }

        Ok(SweepTable {
            tag:       plan.tag.clone(),
            parameter: plan.parameter,
            inputs:    plan.values.clone(),
            times,
            rows,
        })
    }

    /// reset template → patch → clear outputs → run → harvest
    pub fn run_sample(&self, plan: &SweepPlan, index: usize, value: ParamValue) -> Result<TimeSeries, SweepError> {
        let ws = self.workspace_for(&plan.tag, index);
        create_dir(&ws.root)?;

        reset_to_defaults(&self.template, &ws.config)?;
        ConfigDocument::load(&ws.config)?
            .apply(&self.schema, &self.base)?
            .patch(&self.schema, plan.parameter, value)?
            .save(&ws.config)?;

        let report = reset_outputs(&ws.output_dir);
        if report.failed > 0 {
            warn!("{} stale output(s) could not be removed from {}", report.failed, ws.output_dir.display());
        }
        create_dir(&ws.output_dir)?;

        self.driver.run(&ws.root, Path::new(&self.options.config_name))?;

        let mut series = harvest(&ws.output_dir, self.options.field, self.reader.as_ref())?;
        if let Some(cutoff) = self.options.clip_below {
            series.clip_below(cutoff);
        }
        Ok(series)
    }
}

fn create_dir(path: &Path) -> Result<(), SweepError> {
    fs::create_dir_all(path).map_err(|source| SweepError::Io { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i(v: i64) -> ParamValue { ParamValue::Int(v) }
    fn f(v: f64) -> ParamValue { ParamValue::Float(v) }

    #[test]
    fn integer_arange_is_half_open() {
        let plan = SweepPlan::arange("RH", Parameter::RelativeHumidity, i(0), i(141), i(5)).unwrap();
        assert_eq!(plan.values.len(), 29);
        assert_eq!(plan.values[0], ParamValue::Int(0));
        assert_eq!(plan.values[28], ParamValue::Int(140));

        let plan = SweepPlan::arange("T", Parameter::Temperature, i(197), i(238), i(1)).unwrap();
        assert_eq!(plan.values.len(), 41);
        assert_eq!(plan.values.last(), Some(&ParamValue::Int(237)));

        let down = SweepPlan::arange("T", Parameter::Temperature, i(10), i(0), i(-4)).unwrap();
        assert_eq!(down.values, vec![ParamValue::Int(10), ParamValue::Int(6), ParamValue::Int(2)]);
    }

    #[test]
    fn float_arange_promotes_every_value() {
        let plan = SweepPlan::arange("p", Parameter::Pressure, i(200), f(250.0), f(12.5)).unwrap();
        assert_eq!(
            plan.values,
            vec![
                ParamValue::Float(200.0),
                ParamValue::Float(212.5),
                ParamValue::Float(225.0),
                ParamValue::Float(237.5),
            ]
        );
    }

    #[test]
    fn degenerate_ranges_are_rejected() {
        let t = Parameter::Temperature;
        assert!(matches!(SweepPlan::arange("T", t, i(0), i(10), i(0)), Err(SweepError::BadRange(_))));
        assert!(matches!(SweepPlan::arange("T", t, i(10), i(0), i(1)), Err(SweepError::BadRange(_))));
        assert!(matches!(
            SweepPlan::arange("T", t, f(0.0), f(1.0), f(f64::NAN)),
            Err(SweepError::BadRange(_))
        ));
    }

    #[test]
    fn huge_ranges_are_rejected_not_allocated() {
        let t = Parameter::Temperature;
        assert!(matches!(
            SweepPlan::arange("T", t, f(0.0), f(1e300), f(1e-300)),
            Err(SweepError::BadRange(_))
        ));
        assert!(matches!(
            SweepPlan::arange("T", t, f(-1e308), f(1e308), f(1.0)),
            Err(SweepError::BadRange(_))
        ));
        assert!(matches!(
            SweepPlan::arange("T", t, i(0), i(i64::MAX), i(1)),
            Err(SweepError::BadRange(_))
        ));

        let wide = SweepPlan::arange("T", t, i(i64::MIN), i(i64::MAX), i(i64::MAX)).unwrap();
        assert_eq!(wide.values, vec![i(i64::MIN), i(-1), i(i64::MAX - 1)]);
    }
}
