//! Blocking invocation of the external APCEMM executable.

use std::{
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info};

/// Where the sweep example expects the model, relative to its own directory.
pub const DEFAULT_EXECUTABLE: &str = "../../Code.v05-00/APCEMM";

const STDERR_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("simulation executable not found: {0}")]
    ExecutableNotFound(PathBuf),
    #[error("failed to start {executable}: {source}")]
    Spawn { executable: PathBuf, source: io::Error },
    #[error("simulation exited with {}: {stderr_tail}", describe_exit(.code))]
    Failed { code: Option<i32>, stderr_tail: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None    => "a signal".to_string(),
    }
}

/// Everything observed about one finished run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub status:  ExitStatus,
    pub stdout:  String,
    pub stderr:  String,
    pub elapsed: Duration,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Last few lines of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct SimulationDriver {
    executable: PathBuf,
}

impl SimulationDriver {
    /// Resolves `executable` against the current directory so that later
    /// runs can change their working directory freely.
    pub fn new(executable: impl AsRef<Path>) -> Result<Self, DriverError> {
        let executable = executable.as_ref();
        let absolute = if executable.is_absolute() {
            executable.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| DriverError::Spawn { executable: executable.to_path_buf(), source })?
                .join(executable)
        };
        if !absolute.is_file() {
            return Err(DriverError::ExecutableNotFound(absolute));
        }
        Ok(Self { executable: absolute })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Runs the model with `config_file` as its only argument and
    /// `working_dir` as current directory, blocking until it exits.
    /// A non-zero exit is reported as [`DriverError::Failed`].
    pub fn run(&self, working_dir: &Path, config_file: &Path) -> Result<Invocation, DriverError> {
        let invocation = self.run_unchecked(working_dir, config_file)?;
        if !invocation.success() {
            return Err(DriverError::Failed {
                code:        invocation.status.code(),
                stderr_tail: invocation.stderr_tail(),
            });
        }
        Ok(invocation)
    }

    /// Like [`run`](Self::run) but hands back the invocation whatever the
    /// exit status was. Only a failure to start is an error.
    pub fn run_unchecked(&self, working_dir: &Path, config_file: &Path) -> Result<Invocation, DriverError> {
        info!("running {} {}", self.executable.display(), config_file.display());

        let t0 = Instant::now();
        let output = Command::new(&self.executable)
            .arg(config_file)
            .current_dir(working_dir)
            .output()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => DriverError::ExecutableNotFound(self.executable.clone()),
                _ => DriverError::Spawn { executable: self.executable.clone(), source },
            })?;
        let elapsed = t0.elapsed();

        let invocation = Invocation {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed,
        };
        for line in invocation.stdout.lines() {
            debug!(target: "apcemm::stdout", "{line}");
        }
        for line in invocation.stderr.lines() {
            debug!(target: "apcemm::stderr", "{line}");
        }
        info!("simulation finished with {} after {:?}", invocation.status, elapsed);
        Ok(invocation)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn captures_output_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "model", r#"echo "cfg=$1"; pwd; echo warn >&2"#);
        let work = dir.path().join("work");
        fs::create_dir(&work).unwrap();

        let driver = SimulationDriver::new(&exe).unwrap();
        let inv = driver.run(&work, Path::new("input.yaml")).unwrap();

        assert!(inv.success());
        let mut lines = inv.stdout.lines();
        assert_eq!(lines.next(), Some("cfg=input.yaml"));
        assert!(lines.next().unwrap().ends_with("work"));
        assert_eq!(inv.stderr.trim(), "warn");
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "model", "echo boom >&2; exit 3");
        let driver = SimulationDriver::new(&exe).unwrap();

        match driver.run(dir.path(), Path::new("input.yaml")) {
            Err(DriverError::Failed { code, stderr_tail }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr_tail, "boom");
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let inv = driver.run_unchecked(dir.path(), Path::new("input.yaml")).unwrap();
        assert_eq!(inv.status.code(), Some(3));
    }

    #[test]
    fn missing_executable_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SimulationDriver::new(dir.path().join("nope")),
            Err(DriverError::ExecutableNotFound(_))
        ));
    }
}
