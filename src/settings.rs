//! Sweep definition files.
//!
//! ```toml
//! [paths]
//! template   = "original.yaml"
//! executable = "../../Code.v05-00/APCEMM"
//!
//! [run]
//! output = "Ice Mass"
//!
//! [base]
//! temp_K = 217
//!
//! [[sweep]]
//! tag       = "RH"
//! parameter = "RH_percent"
//! start     = 0
//! stop      = 141
//! step      = 5
//! ```
//!
//! Relative paths are taken relative to the directory holding the file.

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::{
    driver::DEFAULT_EXECUTABLE,
    harvest::OutputField,
    parameter::{ParamValue, Parameter, ParameterSet},
    document::PatchError,
    sweep::SweepPlan,
};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("parse error in {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("[base]: {0}")]
    Base(#[from] PatchError),
    #[error("sweep `{tag}`: {reason}")]
    BadSweep { tag: String, reason: String },
    #[error("parallel samples need isolate_samples = true")]
    ParallelWithoutIsolation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSettings {
    pub paths: PathSettings,
    #[serde(default)]
    pub run:   RunSettings,
    /// Values written into every sample before the swept one.
    #[serde(default)]
    pub base:  BTreeMap<String, ParamValue>,
    #[serde(default, rename = "sweep")]
    pub sweeps: Vec<SweepDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathSettings {
    /// Pristine input file, never modified.
    pub template:      PathBuf,
    #[serde(default = "default_executable")]
    pub executable:    PathBuf,
    /// Root under which sample directories are created.
    #[serde(default = "default_workspace")]
    pub workspace:     PathBuf,
    /// Where CSV tables go; the workspace when unset.
    #[serde(default)]
    pub export_dir:    Option<PathBuf>,
    #[serde(default = "default_config_name")]
    pub config_name:   String,
    /// Output folder named in the template, relative to the sample directory.
    #[serde(default = "default_output_subdir")]
    pub output_subdir: PathBuf,
    /// Optional TOML schema replacing the built-in line layout.
    #[serde(default)]
    pub schema:        Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default = "default_output")]
    pub output:          OutputField,
    #[serde(default = "default_true")]
    pub isolate_samples: bool,
    #[serde(default)]
    pub parallel:        bool,
    #[serde(default)]
    pub clip_below:      Option<f64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            output:          default_output(),
            isolate_samples: true,
            parallel:        false,
            clip_below:      None,
        }
    }
}

/// Either an explicit `values` list or an `arange`-style
/// `start`/`stop`/`step` triple.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepDefinition {
    pub tag:       String,
    pub parameter: Parameter,
    #[serde(default)]
    pub values:    Option<Vec<ParamValue>>,
    #[serde(default)]
    pub start:     Option<ParamValue>,
    #[serde(default)]
    pub stop:      Option<ParamValue>,
    #[serde(default)]
    pub step:      Option<ParamValue>,
}

fn default_executable()    -> PathBuf     { PathBuf::from(DEFAULT_EXECUTABLE) }
fn default_workspace()     -> PathBuf     { PathBuf::from("sweep_runs") }
fn default_config_name()   -> String      { "input.yaml".to_string() }
fn default_output_subdir() -> PathBuf     { PathBuf::from("APCEMM_out") }
fn default_output()        -> OutputField { OutputField::NumberIceParticles }
fn default_true()          -> bool        { true }

impl SweepSettings {
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, SettingsError> {
        let settings: SweepSettings = toml::from_str(text)
            .map_err(|source| SettingsError::Parse { path: origin.to_path_buf(), source })?;
        if settings.run.parallel && !settings.run.isolate_samples {
            return Err(SettingsError::ParallelWithoutIsolation);
        }
        Ok(settings)
    }

    /// Reads the file and anchors its relative paths at its directory.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)
            .map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;
        let mut settings = Self::from_toml_str(&text, path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        settings.paths.anchor(base_dir);
        Ok(settings)
    }

    pub fn base_parameters(&self) -> Result<ParameterSet, SettingsError> {
        Ok(ParameterSet::from_named(self.base.iter().map(|(k, v)| (k, *v)))?)
    }

    pub fn plans(&self) -> Result<Vec<SweepPlan>, SettingsError> {
        self.sweeps.iter().map(SweepDefinition::to_plan).collect()
    }

    pub fn export_dir(&self) -> &Path {
        self.paths.export_dir.as_deref().unwrap_or(&self.paths.workspace)
    }
}

impl PathSettings {
    fn anchor(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.template);
        fix(&mut self.executable);
        fix(&mut self.workspace);
        if let Some(p) = self.export_dir.as_mut() {
            fix(p);
        }
        if let Some(p) = self.schema.as_mut() {
            fix(p);
        }
    }
}

impl SweepDefinition {
    pub fn to_plan(&self) -> Result<SweepPlan, SettingsError> {
        let bad = |reason: &str| SettingsError::BadSweep { tag: self.tag.clone(), reason: reason.to_string() };
        match (&self.values, self.start, self.stop, self.step) {
            (Some(values), None, None, None) => {
                if values.is_empty() {
                    return Err(bad("empty values list"));
                }
                Ok(SweepPlan::new(&self.tag, self.parameter, values.clone()))
            }
            (None, Some(start), Some(stop), step) => {
                let step = step.unwrap_or(ParamValue::Int(1));
                SweepPlan::arange(&self.tag, self.parameter, start, stop, step)
                    .map_err(|e| bad(&e.to_string()))
            }
            _ => Err(bad("give either `values` or `start` and `stop`")),
        }
    }
}
