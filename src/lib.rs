#![deny(missing_docs)]

//! qcflow - Adaptive-Sampling Workflow Automation for Computational Chemistry
//!
//! qcflow drives an active-learning loop over expensive quantum-chemistry
//! calculations: it manages directories of molecular-geometry "points",
//! submits Gaussian, AIMAll and FEREBUS jobs to an HPC batch system, and
//! alternates between running those calculations and training
//! Gaussian-process surrogate models on their results.
//!
//! # Overview
//!
//! A run starts from a pool of candidate geometries (a trajectory file or
//! a directory of points). The candidates are split into an initial
//! training set and a sample pool; each adaptive-sampling iteration then
//!
//! 1. writes Gaussian inputs for the training-set points,
//! 2. runs Gaussian over them,
//! 3. runs AIMAll over the produced wavefunctions,
//! 4. builds per-atom FEREBUS training inputs,
//! 5. trains the surrogate models with FEREBUS, and
//! 6. moves the next selected points from the sample pool into the
//!    training set.
//!
//! Nothing in this process waits for a batch job to finish: every job is
//! queued held on its predecessor's job ID, so the scheduler enforces the
//! ordering while the driver exits as soon as the whole chain is queued.
//!
//! # Quick Start
//!
//! ```no_run
//! use qcflow::auto_run::{auto_run, RunContext};
//! use qcflow::config::Config;
//! use std::path::{Path, PathBuf};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(Path::new("qcflow.ini"))?;
//!     let ctx = RunContext::new(config, Path::new("."), PathBuf::from("qcflow.ini"));
//!     let last_job = auto_run(&ctx)?;
//!     println!("final job in the chain: {last_job:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`] - Run configuration and working-directory layout
//! - [`atoms`] - Atomic data structures and bonding radii
//! - [`connectivity`] - Bond adjacency matrices with per-topology caching
//! - [`kernels`] - Covariance kernels for the surrogate models
//! - [`points`] - Trajectories and point directories
//! - [`make_sets`] - Initial training-set selection methods
//! - [`batch`] - Scheduler backends (SGE, SLURM) and job records
//! - [`submission`] - Script assembly and the bounded retry wrapper
//! - [`lock`] - Working-directory mutual exclusion
//! - [`auto_run`] - The iteration driver
//! - [`tasks`] - Bookkeeping subcommands executed by submitted scripts

/// Atomic data structures and bonding radii
pub mod atoms;
/// The adaptive-sampling iteration driver
pub mod auto_run;
/// Batch scheduler backends and persisted job records
pub mod batch;
pub mod config;
/// Bond connectivity with per-topology caching
pub mod connectivity;
/// Covariance kernels for Gaussian-process surrogates
pub mod kernels;
/// Working-directory lock guard
pub mod lock;
/// Initial training-set selection
pub mod make_sets;
pub mod points;
/// Submission script assembly
pub mod submission;
/// Bookkeeping tasks run by submitted scripts
pub mod tasks;

pub use config::Config;
pub use connectivity::ConnectivityCache;
