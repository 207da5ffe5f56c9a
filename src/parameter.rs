//! Physical parameters that can be written into an APCEMM input file.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::document::PatchError;

// ─────────────────────────────────────────────────────────────────────
// Parameter identifiers
// ─────────────────────────────────────────────────────────────────────

/// Every quantity the patcher knows how to place in the input file.
///
/// The serialized names are the identifiers used by sweep files and by
/// [`NamedVariable::name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "temp_K")]
    Temperature,
    #[serde(rename = "RH_percent")]
    RelativeHumidity,
    #[serde(rename = "p_hPa")]
    Pressure,
    #[serde(rename = "lon_deg")]
    Longitude,
    #[serde(rename = "lat_deg")]
    Latitude,
    #[serde(rename = "day")]
    EmissionDay,
    #[serde(rename = "time_hrs_UTC")]
    EmissionTime,
    #[serde(rename = "EI_soot_gPerkg")]
    SootEmissionIndex,
    #[serde(rename = "fuel_flow_kgPers")]
    FuelFlow,
    #[serde(rename = "aircraft_mass_kg")]
    AircraftMass,
    #[serde(rename = "flight_speed_mPers")]
    FlightSpeed,
    #[serde(rename = "core_exit_temp_K")]
    CoreExitTemperature,
}

impl Parameter {
    pub const ALL: [Parameter; 12] = [
        Parameter::Temperature,
        Parameter::RelativeHumidity,
        Parameter::Pressure,
        Parameter::Longitude,
        Parameter::Latitude,
        Parameter::EmissionDay,
        Parameter::EmissionTime,
        Parameter::SootEmissionIndex,
        Parameter::FuelFlow,
        Parameter::AircraftMass,
        Parameter::FlightSpeed,
        Parameter::CoreExitTemperature,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Parameter::Temperature         => "temp_K",
            Parameter::RelativeHumidity    => "RH_percent",
            Parameter::Pressure            => "p_hPa",
            Parameter::Longitude           => "lon_deg",
            Parameter::Latitude            => "lat_deg",
            Parameter::EmissionDay         => "day",
            Parameter::EmissionTime        => "time_hrs_UTC",
            Parameter::SootEmissionIndex   => "EI_soot_gPerkg",
            Parameter::FuelFlow            => "fuel_flow_kgPers",
            Parameter::AircraftMass        => "aircraft_mass_kg",
            Parameter::FlightSpeed         => "flight_speed_mPers",
            Parameter::CoreExitTemperature => "core_exit_temp_K",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parameter {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parameter::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PatchError::UnknownParameter(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────

/// A numeric value as it will appear in the input file.
///
/// Integers print bare, floats always carry a fractional part or an
/// exponent, so `Int(100)` writes `100` and `Float(100.0)` writes `100.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Int(v)   => v as f64,
            ParamValue::Float(v) => v,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v)   => write!(f, "{v}"),
            ParamValue::Float(v) => f.write_str(&format_float(*v)),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self { ParamValue::Int(v) }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self { ParamValue::Float(v) }
}

impl FromStr for ParamValue {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.parse::<i64>() {
            Ok(v)  => Ok(ParamValue::Int(v)),
            Err(_) => s.parse::<f64>().map(ParamValue::Float),
        }
    }
}

/// Shortest round-trip rendering of a float, with a two-digit signed
/// exponent outside `[1e-4, 1e16)`: `217.0`, `0.008`, `1e-05`, `1.5e+16`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // `{:?}` already switches to exponent form at the same thresholds.
    let debug = format!("{x:?}");
    match debug.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None    => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => debug,
    }
}

// ─────────────────────────────────────────────────────────────────────
// Named variables and parameter sets
// ─────────────────────────────────────────────────────────────────────

/// A loosely typed (name, value) pair as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedVariable {
    pub name:  String,
    pub value: ParamValue,
}

impl NamedVariable {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn parameter(&self) -> Result<Parameter, PatchError> {
        self.name.parse()
    }
}

impl FromStr for NamedVariable {
    type Err = PatchError;

    /// Parses `name=value`, as given on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, raw) = s
            .split_once('=')
            .ok_or_else(|| PatchError::MalformedAssignment(s.to_string()))?;
        let value: ParamValue = raw
            .parse()
            .map_err(|_| PatchError::MalformedAssignment(s.to_string()))?;
        Ok(NamedVariable::new(name.trim(), value))
    }
}

/// Structured parameter values keyed by [`Parameter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<Parameter, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The values the reference sweep scripts wrote when nothing was
    /// overridden.
    pub fn reference_defaults() -> Self {
        let mut set = Self::new();
        set.insert(Parameter::Temperature,         ParamValue::Int(217));
        set.insert(Parameter::RelativeHumidity,    ParamValue::Float(63.94));
        set.insert(Parameter::Pressure,            ParamValue::Float(250.0));
        set.insert(Parameter::Longitude,           ParamValue::Float(20.2));
        set.insert(Parameter::Latitude,            ParamValue::Float(20.2));
        set.insert(Parameter::EmissionDay,         ParamValue::Int(20));
        set.insert(Parameter::EmissionTime,        ParamValue::Float(20.0));
        set.insert(Parameter::SootEmissionIndex,   ParamValue::Float(0.008));
        set.insert(Parameter::FuelFlow,            ParamValue::Float(2.8));
        set.insert(Parameter::AircraftMass,        ParamValue::Float(3.10e5));
        set.insert(Parameter::FlightSpeed,         ParamValue::Float(250.0));
        set.insert(Parameter::CoreExitTemperature, ParamValue::Float(560.0));
        set
    }

    /// Builds a set from string-keyed values, rejecting unknown names.
    pub fn from_named<I, S>(entries: I) -> Result<Self, PatchError>
    where
        I: IntoIterator<Item = (S, ParamValue)>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for (name, value) in entries {
            set.insert(name.as_ref().parse()?, value);
        }
        Ok(set)
    }

    pub fn insert(&mut self, parameter: Parameter, value: ParamValue) -> Option<ParamValue> {
        self.values.insert(parameter, value)
    }

    pub fn get(&self, parameter: Parameter) -> Option<ParamValue> {
        self.values.get(&parameter).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Parameter, ParamValue)> + '_ {
        self.values.iter().map(|(p, v)| (*p, *v))
    }
}
