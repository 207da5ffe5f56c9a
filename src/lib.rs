//! Parameter sweeps over the APCEMM contrail model.
//!
//! The model is driven from outside: a template `input.yaml` is patched
//! line by line ([`document`]), the executable is run once per sample
//! ([`driver`]), the `ts_aerosol*.nc` files it leaves behind are read back
//! into a fixed-length time series ([`harvest`]) and the results are
//! written as CSV tables ([`export`]). [`sweep`] ties the steps together.

pub mod document;
pub mod driver;
pub mod export;
pub mod harvest;
pub mod parameter;
pub mod schema;
pub mod settings;
pub mod sweep;

pub use document::{reset_to_defaults, ConfigDocument, PatchError};
pub use driver::{DriverError, Invocation, SimulationDriver};
pub use harvest::{harvest, reset_outputs, DatasetReader, HarvestedValue, NetcdfReader, OutputField, TimeSeries};
pub use parameter::{NamedVariable, ParamValue, Parameter, ParameterSet};
pub use schema::TemplateSchema;
pub use settings::SweepSettings;
pub use sweep::{SweepError, SweepPlan, SweepRunner, SweepTable};
