//! qcflow command-line interface.
//!
//! The binary has two faces. Invoked by a user it starts an adaptive
//! sampling run:
//!
//! ```bash
//! qcflow run.ini
//! qcflow run.ini run
//! ```
//!
//! Invoked with a bookkeeping subcommand it performs one task of a queued
//! run; the submission scripts written by the driver call the binary back
//! this way, always passing the configuration file first:
//!
//! ```bash
//! qcflow run.ini make-sets
//! qcflow run.ini write-inputs
//! qcflow run.ini collect-wfns
//! qcflow run.ini make-models O1,H2,H3
//! qcflow run.ini select-points 5
//! qcflow run.ini check-task
//! qcflow run.ini delete-jobs
//! ```

use log::{error, info};
use qcflow::auto_run::{auto_run, RunContext};
use qcflow::config::{Config, FileStructure};
use qcflow::{batch, tasks};
use std::env;
use std::path::{Path, PathBuf};
use std::process;

fn print_usage(program: &str) {
    eprintln!("Usage: {program} <config.ini> [subcommand]");
    eprintln!();
    eprintln!("Subcommands:");
    eprintln!("  run                      start an adaptive sampling run (default)");
    eprintln!("  make-sets                split candidate points into training set and sample pool");
    eprintln!("  write-inputs             write Gaussian input files for the training set");
    eprintln!("  collect-wfns             check wavefunction outputs for the training set");
    eprintln!("  make-models <atoms>      write per-atom model training files (comma-separated)");
    eprintln!("  select-points <n>        move n sample-pool points into the training set");
    eprintln!("  check-task               emit the task-completion marker for retry loops");
    eprintln!("  delete-jobs              delete every recorded job from the scheduler");
}

/// Run the requested subcommand; errors bubble up as a boxed trait object
/// so every task's error type funnels through the same exit path.
fn dispatch(
    config: Config,
    config_path: PathBuf,
    root: &Path,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let subcommand = args.first().map(String::as_str).unwrap_or("run");
    match subcommand {
        "run" => {
            let ctx = RunContext::new(config, root, config_path);
            let final_job = auto_run(&ctx)?;
            match final_job {
                Some(job) => info!("run queued, final job: {job}"),
                None => info!("run queued, nothing was submitted"),
            }
        }
        "make-sets" => {
            let files = FileStructure::new(root);
            tasks::make_sets(&config, &files)?;
        }
        "write-inputs" => {
            let files = FileStructure::new(root);
            let written = tasks::write_inputs(&config, &files)?;
            info!("wrote {written} input file(s)");
        }
        "collect-wfns" => {
            let files = FileStructure::new(root);
            let found = tasks::collect_wfns(&files)?;
            info!("found {found} wavefunction file(s)");
        }
        "make-models" => {
            let atom_list = args
                .get(1)
                .ok_or("make-models requires a comma-separated atom list")?;
            let atoms: Vec<String> = atom_list
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            let files = FileStructure::new(root);
            tasks::make_models(&config, &files, &atoms)?;
        }
        "select-points" => {
            let n: usize = args
                .get(1)
                .ok_or("select-points requires a point count")?
                .parse()
                .map_err(|_| "select-points count must be a non-negative integer")?;
            let files = FileStructure::new(root);
            let moved = tasks::select_points(&config, &files, n)?;
            info!("moved {} point(s) into the training set", moved.len());
        }
        "check-task" => {
            tasks::print_task_completed();
        }
        "delete-jobs" => {
            let ctx = RunContext::new(config, root, config_path);
            batch::delete_jobs(&ctx.files.jid_file, ctx.batch.as_ref())?;
        }
        other => {
            return Err(format!("unknown subcommand: {other}").into());
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stdout)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let config_path = PathBuf::from(&args[1]);
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load {}: {e}", config_path.display());
            process::exit(1);
        }
    };

    // Runs are rooted where the configuration file lives.
    let root = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if let Err(e) = dispatch(config, config_path, &root, &args[2..]) {
        error!("{e}");
        process::exit(1);
    }
}
