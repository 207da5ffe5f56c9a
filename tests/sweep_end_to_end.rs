#![cfg(unix)]

use apcemm_sweep::{
    driver::DriverError,
    export::export_table,
    harvest::{DatasetReader, HarvestError, HarvestedValue, OutputField, CANONICAL_LEN},
    sweep::{RunOptions, SweepError},
    ConfigDocument, ParamValue, Parameter, SimulationDriver, SweepPlan, SweepRunner, SweepSettings,
    TemplateSchema,
};
use std::{
    fs, io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

const TEMPLATE: &str = "tests/data/original.yaml";

/// Stand-in for the NetCDF reader: each stub output file holds one number.
struct PlainTextReader;

impl DatasetReader for PlainTextReader {
    fn read_field(&self, path: &Path, _field: OutputField) -> Result<HarvestedValue, HarvestError> {
        let text = fs::read_to_string(path)?;
        let value = text
            .trim()
            .parse::<f64>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", path.display())))?;
        Ok(HarvestedValue::Scalar(value))
    }
}

fn stub_model(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("APCEMM");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Writes five outputs, 0000 through 0040, each holding the RH read from
/// the input file plus the minute offset / 1000.
const FIVE_OUTPUTS: &str = r#"
rh=$(sed -n 's/^    R.Hum. wrt water \[%\] (double): //p' "$1")
for hhmm in 0000 0010 0020 0030 0040; do
    echo "$rh.$hhmm" > "APCEMM_out/ts_aerosol_case0_$hhmm.nc"
done
"#;

fn runner(root: &Path, body: &str, isolate: bool, parallel: bool) -> SweepRunner {
    let exe = stub_model(root, body);
    let mut options = RunOptions::new(root.join("runs"), OutputField::IceMass);
    options.isolate_samples = isolate;
    options.parallel = parallel;
    SweepRunner::new(TEMPLATE, SimulationDriver::new(&exe).unwrap(), options)
        .with_reader(Box::new(PlainTextReader))
}

#[test]
fn rh_100_run_yields_five_values_then_zeros() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path(), FIVE_OUTPUTS, true, false);
    let plan = SweepPlan::new("RH", Parameter::RelativeHumidity, vec![ParamValue::Int(100)]);

    let table = runner.run(&plan).unwrap();
    assert_eq!(table.rows.len(), 1);

    let row = table.rows[0].scalars().unwrap();
    assert_eq!(row.len(), CANONICAL_LEN);
    assert_eq!(&row[..5], &[100.0, 100.001, 100.002, 100.003, 100.004]);
    assert!(row[5..].iter().all(|&v| v == 0.0));
    assert_eq!(&table.times[..6], &[0, 10, 20, 30, 40, 50]);
    assert_eq!(table.times[36], 360);

    // The sample's own input file carries the swept value and nothing else changed.
    let ws = runner.workspace_for("RH", 0);
    let schema = TemplateSchema::builtin();
    let written = ConfigDocument::load(&ws.config).unwrap();
    let pristine = ConfigDocument::load(Path::new(TEMPLATE)).unwrap();
    assert_eq!(written.read_value(&schema, Parameter::RelativeHumidity).unwrap(), "100");
    let changed: Vec<usize> = (0..pristine.len())
        .filter(|&i| written.lines()[i] != pristine.lines()[i])
        .collect();
    assert_eq!(changed, vec![39]);
}

#[test]
fn samples_keep_their_order_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path(), FIVE_OUTPUTS, true, true);
    let plan = SweepPlan::arange(
        "RH",
        Parameter::RelativeHumidity,
        ParamValue::Int(0),
        ParamValue::Int(40),
        ParamValue::Int(5),
    )
    .unwrap();

    let table = runner.run(&plan).unwrap();
    assert_eq!(table.rows.len(), 8);
    for (input, row) in table.inputs.iter().zip(&table.rows) {
        assert_eq!(row.scalars().unwrap()[0], input.as_f64());
    }
    for i in 0..8 {
        assert!(runner.workspace_for("RH", i).root.ends_with(format!("RH/sample_{i:04}")));
    }

    let files = export_table(dir.path(), &table).unwrap();
    let evals = fs::read_to_string(files.evaluations).unwrap();
    assert_eq!(evals.lines().count(), 9);
    assert!(evals.lines().nth(2).unwrap().starts_with("1,5.0,5.001,"));
}

#[test]
fn shared_directory_is_cleared_between_samples() {
    let dir = tempfile::tempdir().unwrap();
    // Only the first run produces output; stale files must not leak into the second.
    let body = r#"
if [ ! -f ran_once ]; then
    touch ran_once
    echo 7 > APCEMM_out/ts_aerosol_case0_0000.nc
    echo 8 > APCEMM_out/ts_aerosol_case0_0010.nc
fi
"#;
    let runner = runner(dir.path(), body, false, false);
    let plan = SweepPlan::new(
        "T",
        Parameter::Temperature,
        vec![ParamValue::Int(210), ParamValue::Int(220)],
    );

    let table = runner.run(&plan).unwrap();
    assert_eq!(&table.rows[0].scalars().unwrap()[..3], &[7.0, 8.0, 0.0]);
    assert_eq!(table.rows[1].scalars().unwrap(), vec![0.0; CANONICAL_LEN]);
    assert_eq!(runner.workspace_for("T", 1).root, dir.path().join("runs"));
}

#[test]
fn failing_model_aborts_with_sample_context() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(dir.path(), "echo 'met file missing' >&2\nexit 2", true, false);
    let plan = SweepPlan::new("RH", Parameter::RelativeHumidity, vec![ParamValue::Int(100)]);

    match runner.run(&plan) {
        Err(SweepError::Sample { index, source, .. }) => {
            assert_eq!(index, 0);
            match *source {
                SweepError::Driver(DriverError::Failed { code, ref stderr_tail }) => {
                    assert_eq!(code, Some(2));
                    assert!(stderr_tail.contains("met file missing"));
                }
                ref other => panic!("unexpected cause {other:?}"),
            }
        }
        other => panic!("expected sample failure, got {other:?}"),
    }
}

#[test]
fn settings_file_drives_a_whole_sweep() {
    let dir = tempfile::tempdir().unwrap();
    stub_model(dir.path(), FIVE_OUTPUTS);
    let template = fs::canonicalize(TEMPLATE).unwrap();
    let config = dir.path().join("sweep.toml");
    fs::write(
        &config,
        format!(
            r#"
[paths]
template   = "{}"
executable = "APCEMM"
export_dir = "tables"

[run]
output = "Ice Mass"

[base]
temp_K = 217

[[sweep]]
tag       = "RH"
parameter = "RH_percent"
values    = [60, 120]
"#,
            template.display()
        ),
    )
    .unwrap();

    let settings = SweepSettings::load(&config).unwrap();
    let runner = SweepRunner::from_settings(&settings)
        .unwrap()
        .with_reader(Box::new(PlainTextReader));
    let plans = settings.plans().unwrap();
    let table = runner.run(&plans[0]).unwrap();

    fs::create_dir_all(settings.export_dir()).unwrap();
    let files = export_table(settings.export_dir(), &table).unwrap();
    assert_eq!(fs::read_to_string(files.inputs).unwrap(), ",0\n0,60\n1,120\n");
    assert!(dir.path().join("tables/APCEMM-sweep-times.csv").exists());
}
