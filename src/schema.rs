//! Versioned description of where each parameter lives in the input file.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};
use thiserror::Error;

use crate::parameter::Parameter;

pub const BUILTIN_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IO error reading schema {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("schema parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u32),
    #[error("{first} and {second} both claim line {line}")]
    DuplicateLine { line: usize, first: Parameter, second: Parameter },
    #[error("{0} has an empty label")]
    EmptyLabel(Parameter),
    #[error("{0} is listed more than once")]
    DuplicateParameter(Parameter),
}

/// Position and label text of one parameter line.
///
/// `label` is everything before the value, trailing `": "` included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub line:  usize,
    pub label: String,
}

impl Slot {
    fn new(line: usize, label: &str) -> Self {
        Self { line, label: label.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSchema {
    version: u32,
    slots:   BTreeMap<Parameter, Slot>,
}

#[derive(Deserialize)]
struct SchemaFile {
    version: u32,
    #[serde(rename = "slot")]
    slots:   Vec<SlotEntry>,
}

#[derive(Deserialize)]
struct SlotEntry {
    parameter: Parameter,
    line:      usize,
    label:     String,
}

impl TemplateSchema {
    /// Line layout of the APCEMM `input.yaml` shipped with the sweep example.
    pub fn builtin() -> Self {
        let slots = BTreeMap::from([
            (Parameter::Temperature,         Slot::new(38, "    Temperature [K] (double): ")),
            (Parameter::RelativeHumidity,    Slot::new(39, "    R.Hum. wrt water [%] (double): ")),
            (Parameter::Pressure,            Slot::new(40, "    Pressure [hPa] (double): ")),
            (Parameter::Longitude,           Slot::new(46, "    LON [deg] (double): ")),
            (Parameter::Latitude,            Slot::new(47, "    LAT [deg] (double): ")),
            (Parameter::EmissionDay,         Slot::new(48, "    Emission day [1-365] (int): ")),
            (Parameter::EmissionTime,        Slot::new(49, "    Emission time [hr] (double) : ")),
            (Parameter::SootEmissionIndex,   Slot::new(63, "    Soot [g/kg_fuel] (double): ")),
            (Parameter::FuelFlow,            Slot::new(65, "  Total fuel flow [kg/s] (double) : ")),
            (Parameter::AircraftMass,        Slot::new(66, "  Aircraft mass [kg] (double): ")),
            (Parameter::FlightSpeed,         Slot::new(67, "  Flight speed [m/s] (double): ")),
            (Parameter::CoreExitTemperature, Slot::new(70, "  Core exit temp. [K] (double): ")),
        ]);
        Self { version: BUILTIN_VERSION, slots }
    }

    /// Reads a schema from TOML:
    ///
    /// ```toml
    /// version = 1
    /// [[slot]]
    /// parameter = "temp_K"
    /// line = 38
    /// label = "    Temperature [K] (double): "
    /// ```
    ///
    /// Parameters the file does not mention are simply not patchable.
    pub fn from_toml_str(text: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = toml::from_str(text)?;
        if file.version != BUILTIN_VERSION {
            return Err(SchemaError::UnsupportedVersion(file.version));
        }
        let mut slots = BTreeMap::new();
        for e in file.slots {
            if slots.insert(e.parameter, Slot { line: e.line, label: e.label }).is_some() {
                return Err(SchemaError::DuplicateParameter(e.parameter));
            }
        }
        let schema = Self { version: file.version, slots };
        schema.validate()?;
        Ok(schema)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let text = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let mut seen: HashMap<usize, Parameter> = HashMap::new();
        for (&parameter, slot) in &self.slots {
            if slot.label.trim().is_empty() {
                return Err(SchemaError::EmptyLabel(parameter));
            }
            if let Some(&first) = seen.get(&slot.line) {
                return Err(SchemaError::DuplicateLine { line: slot.line, first, second: parameter });
            }
            seen.insert(slot.line, parameter);
        }
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn slot(&self, parameter: Parameter) -> Option<&Slot> {
        self.slots.get(&parameter)
    }

    pub fn slots(&self) -> impl Iterator<Item = (Parameter, &Slot)> {
        self.slots.iter().map(|(p, s)| (*p, s))
    }
}

impl Default for TemplateSchema {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_parameter_once() {
        let schema = TemplateSchema::builtin();
        assert_eq!(schema.version(), 1);
        for p in Parameter::ALL {
            assert!(schema.slot(p).is_some(), "{p} missing");
        }
        assert!(schema.validate().is_ok());
        assert_eq!(schema.slot(Parameter::FuelFlow).unwrap().line, 65);
    }

    #[test]
    fn toml_schema_loads() {
        let text = r#"
            version = 1
            [[slot]]
            parameter = "temp_K"
            line = 3
            label = "  T [K]: "
            [[slot]]
            parameter = "RH_percent"
            line = 4
            label = "  RH [%]: "
        "#;
        let schema = TemplateSchema::from_toml_str(text).unwrap();
        assert_eq!(schema.slot(Parameter::Temperature), Some(&Slot::new(3, "  T [K]: ")));
        assert!(schema.slot(Parameter::Pressure).is_none());
    }

    #[test]
    fn toml_schema_rejects_bad_layouts() {
        let clash = r#"
            version = 1
            [[slot]]
            parameter = "temp_K"
            line = 3
            label = "a: "
            [[slot]]
            parameter = "p_hPa"
            line = 3
            label = "b: "
        "#;
        assert!(matches!(
            TemplateSchema::from_toml_str(clash),
            Err(SchemaError::DuplicateLine { line: 3, .. })
        ));

        let twice = r#"
            version = 1
            [[slot]]
            parameter = "temp_K"
            line = 3
            label = "a: "
            [[slot]]
            parameter = "temp_K"
            line = 9
            label = "b: "
        "#;
        assert!(matches!(
            TemplateSchema::from_toml_str(twice),
            Err(SchemaError::DuplicateParameter(Parameter::Temperature))
        ));

        let future = "version = 2\nslot = []\n";
        assert!(matches!(
            TemplateSchema::from_toml_str(future),
            Err(SchemaError::UnsupportedVersion(2))
        ));
    }
}
