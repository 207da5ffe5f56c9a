// USAGE  cargo run --release -- sweep --config path/to/sweep.toml
//        cargo run --release -- harvest --dir APCEMM_out --field "Ice Mass"

use anyhow::{bail, Context, Result};
use apcemm_sweep::{
    export::export_table,
    harvest::{describe_dataset, harvest, reset_outputs, HarvestedValue, NetcdfReader, OutputField},
    parameter::{format_float, NamedVariable, ParameterSet},
    ConfigDocument, SweepRunner, SweepSettings, TemplateSchema,
};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf, time::Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ─────────────────────────────────────────────────────────────────────
// Simple timing helper
// ─────────────────────────────────────────────────────────────────────
fn timeit<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let t0 = Instant::now();
    let out = f();
    info!("{label:<20}{:?}", t0.elapsed());
    out
}

// ─────────────────────────────────────────────────────────────────────
// CLI
// ─────────────────────────────────────────────────────────────────────
#[derive(Parser, Debug)]
#[command(author, version, about = "Patch, run and harvest APCEMM over parameter sweeps.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every [[sweep]] in a sweep file and export the CSV tables.
    Sweep {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Write a patched copy of a template input file.
    Patch {
        #[arg(long)]
        template: PathBuf,
        #[arg(long)]
        output:   PathBuf,
        /// NAME=VALUE, repeatable, e.g. --set RH_percent=100
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        set:      Vec<NamedVariable>,
        /// Write the reference default values before any --set.
        #[arg(long)]
        defaults: bool,
        #[arg(long)]
        schema:   Option<PathBuf>,
    },
    /// Print the padded time series of one output field.
    Harvest {
        #[arg(long)]
        dir:        PathBuf,
        #[arg(long, default_value = "Number Ice Particles", value_parser = parse_field)]
        field:      OutputField,
        #[arg(long)]
        clip_below: Option<f64>,
    },
    /// Delete ts_aerosol*.nc outputs from a directory.
    Reset {
        #[arg(long)]
        dir: PathBuf,
    },
    /// List the variables of an output file.
    Inspect {
        file: PathBuf,
    },
}

fn parse_assignment(s: &str) -> Result<NamedVariable, String> {
    let var: NamedVariable = s.parse().map_err(|e| format!("{e}"))?;
    var.parameter().map_err(|e| format!("{e}"))?;
    Ok(var)
}

fn parse_field(s: &str) -> Result<OutputField, String> {
    s.parse().map_err(|e| format!("{e}"))
}

// ─────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Sweep { config } => run_sweeps(config),
        Command::Patch { template, output, set, defaults, schema } => {
            let schema = match schema {
                Some(path) => TemplateSchema::load(&path)?,
                None       => TemplateSchema::builtin(),
            };
            let base = if defaults { ParameterSet::reference_defaults() } else { ParameterSet::new() };
            ConfigDocument::load(&template)?
                .apply(&schema, &base)?
                .set_named_variables(&schema, &set)?
                .save(&output)?;
            info!("wrote {} ({} assignment(s))", output.display(), base.len() + set.len());
            Ok(())
        }
        Command::Harvest { dir, field, clip_below } => {
            let mut series = harvest(&dir, field, &NetcdfReader)
                .with_context(|| format!("harvesting {}", dir.display()))?;
            if let Some(cutoff) = clip_below {
                series.clip_below(cutoff);
            }
            println!("minutes,{field}");
            for (t, v) in series.minutes.iter().zip(&series.values) {
                match v {
                    HarvestedValue::Scalar(x) => println!("{t},{}", format_float(*x)),
                    HarvestedValue::Field(f)  => println!("{t},<field {:?}>", f.shape),
                }
            }
            Ok(())
        }
        Command::Reset { dir } => {
            let report = reset_outputs(&dir);
            info!("removed {} output(s) from {}, {} failure(s)", report.removed, dir.display(), report.failed);
            Ok(())
        }
        Command::Inspect { file } => {
            for (name, dims) in describe_dataset(&file)? {
                let dims: Vec<String> = dims.iter().map(|(d, n)| format!("{d}={n}")).collect();
                println!("{name:<30}({})", dims.join(", "));
            }
            Ok(())
        }
    }
}

fn run_sweeps(config: PathBuf) -> Result<()> {
    let start: DateTime<Local> = Local::now();
    info!("[{}] Starting sweep from {}", start.format("%Y-%m-%d %H:%M:%S"), config.display());

    let settings = SweepSettings::load(&config)
        .with_context(|| format!("loading {}", config.display()))?;
    let plans = settings.plans()?;
    if plans.is_empty() {
        bail!("{} defines no [[sweep]] tables", config.display());
    }
    let runner = SweepRunner::from_settings(&settings)?;

    let export_dir = settings.export_dir();
    fs::create_dir_all(export_dir)
        .with_context(|| format!("creating {}", export_dir.display()))?;

    for plan in &plans {
        let table = timeit(&plan.tag, || runner.run(plan))?;
        export_table(export_dir, &table)?;
    }

    let end: DateTime<Local> = Local::now();
    let elapsed = end.signed_duration_since(start).num_seconds();
    info!("[{}] Finished {} sweep(s). Total time: {}s", end.format("%Y-%m-%d %H:%M:%S"), plans.len(), elapsed);
    Ok(())
}
