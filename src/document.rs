//! Line-preserving model of an APCEMM input file and the patch operations
//! that rewrite individual parameter lines.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::{
    parameter::{NamedVariable, ParamValue, Parameter, ParameterSet},
    schema::TemplateSchema,
};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("unknown parameter name `{0}`")]
    UnknownParameter(String),
    #[error("malformed assignment `{0}`, expected name=value")]
    MalformedAssignment(String),
    #[error("schema has no slot for {0}")]
    NotInSchema(Parameter),
    #[error("{parameter} targets line {line} but the document has {len} lines")]
    LineOutOfRange { parameter: Parameter, line: usize, len: usize },
    #[error("{parameter} expects line {line} to start with {expected:?}, found {found:?}")]
    LabelMismatch { parameter: Parameter, line: usize, expected: String, found: String },
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

impl PatchError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        PatchError::Io { path: path.to_path_buf(), source }
    }
}

/// Input file held as its original lines, terminators included, so that
/// untouched lines are written back byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    lines: Vec<String>,
}

impl ConfigDocument {
    pub fn parse(text: &str) -> Self {
        Self { lines: text.split_inclusive('\n').map(str::to_string).collect() }
    }

    pub fn load(path: &Path) -> Result<Self, PatchError> {
        let text = fs::read_to_string(path).map_err(|e| PatchError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    pub fn save(&self, path: &Path) -> Result<(), PatchError> {
        fs::write(path, self.to_string()).map_err(|e| PatchError::io(path, e))
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns a copy with the parameter's line replaced by `label + value`.
    ///
    /// Fails if the schema has no slot for the parameter, the document is
    /// too short, or the target line no longer carries the expected label.
    pub fn patch(
        &self,
        schema:    &TemplateSchema,
        parameter: Parameter,
        value:     ParamValue,
    ) -> Result<ConfigDocument, PatchError> {
        let mut out = self.clone();
        out.patch_in_place(schema, parameter, value)?;
        Ok(out)
    }

    /// Longitude and latitude are always written as a pair.
    pub fn set_coordinates(
        &self,
        schema: &TemplateSchema,
        lon:    ParamValue,
        lat:    ParamValue,
    ) -> Result<ConfigDocument, PatchError> {
        let mut out = self.clone();
        out.patch_in_place(schema, Parameter::Longitude, lon)?;
        out.patch_in_place(schema, Parameter::Latitude, lat)?;
        Ok(out)
    }

    /// Applies each variable in order. An unknown name aborts the whole
    /// batch and leaves `self` untouched.
    pub fn set_named_variables(
        &self,
        schema: &TemplateSchema,
        vars:   &[NamedVariable],
    ) -> Result<ConfigDocument, PatchError> {
        let mut out = self.clone();
        for var in vars {
            out.patch_in_place(schema, var.parameter()?, var.value)?;
        }
        Ok(out)
    }

    pub fn apply(&self, schema: &TemplateSchema, set: &ParameterSet) -> Result<ConfigDocument, PatchError> {
        let mut out = self.clone();
        for (parameter, value) in set.iter() {
            out.patch_in_place(schema, parameter, value)?;
        }
        Ok(out)
    }

    /// Text after the label on the parameter's line, without the newline.
    pub fn read_value(&self, schema: &TemplateSchema, parameter: Parameter) -> Result<&str, PatchError> {
        let (line, label) = self.checked_target(schema, parameter)?;
        let text = &self.lines[line];
        let rest = text
            .strip_prefix(label)
            .unwrap_or_else(|| &text[label.trim_end().len()..]);
        Ok(rest.trim_end_matches(['\n', '\r']).trim())
    }

    fn patch_in_place(
        &mut self,
        schema:    &TemplateSchema,
        parameter: Parameter,
        value:     ParamValue,
    ) -> Result<(), PatchError> {
        let (line, label) = self.checked_target(schema, parameter)?;
        self.lines[line] = format!("{label}{value}\n");
        Ok(())
    }

    fn checked_target<'s>(
        &self,
        schema:    &'s TemplateSchema,
        parameter: Parameter,
    ) -> Result<(usize, &'s str), PatchError> {
        let slot = schema.slot(parameter).ok_or(PatchError::NotInSchema(parameter))?;
        let current = self.lines.get(slot.line).ok_or(PatchError::LineOutOfRange {
            parameter,
            line: slot.line,
            len:  self.lines.len(),
        })?;
        if !current.starts_with(slot.label.trim_end()) {
            return Err(PatchError::LabelMismatch {
                parameter,
                line:     slot.line,
                expected: slot.label.clone(),
                found:    current.trim_end().to_string(),
            });
        }
        Ok((slot.line, slot.label.as_str()))
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.lines.iter().try_for_each(|l| f.write_str(l))
    }
}

/// Copies the pristine template over the working file, discarding any
/// earlier edits.
pub fn reset_to_defaults(template: &Path, working: &Path) -> Result<(), PatchError> {
    fs::copy(template, working).map_err(|e| PatchError::io(template, e))?;
    Ok(())
}
