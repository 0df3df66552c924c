//! Run configuration for adaptive-sampling workflows.
//!
//! Configuration is read from an INI file with four sections:
//!
//! ```ini
//! [system]
//! name = WATER
//! points_location = WATER.xyz
//!
//! [run]
//! n_iterations = 5
//! points_per_iteration = 1
//! training_points = 500
//! training_set_method = min_max
//! optimise_atom = all
//!
//! [qm]
//! method = B3LYP
//! basis_set = 6-31+g(d,p)
//! charge = 0
//! multiplicity = 1
//! nprocs = 2
//! mem = 1GB
//!
//! [batch]
//! system = sge
//! check_attempts = 10
//! ```
//!
//! Every key has a default so a minimal file only names the system and the
//! points location. The loaded [`Config`] is read-only for the rest of the
//! run; per-iteration values are derived from it by the driver and passed
//! by value into each step.

use configparser::ini::Ini;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading the configuration file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// A value failed validation
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Which atoms are subject to model optimisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomSelection {
    /// Every atom of the system
    All,
    /// A single named atom, e.g. "O1"
    Atom(String),
}

impl AtomSelection {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("all") {
            AtomSelection::All
        } else {
            AtomSelection::Atom(value.to_string())
        }
    }
}

/// Supported batch scheduler backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchKind {
    /// Sun Grid Engine
    Sge,
    /// SLURM
    Slurm,
}

impl BatchKind {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sge" => Ok(BatchKind::Sge),
            "slurm" => Ok(BatchKind::Slurm),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown batch system '{other}' (expected sge or slurm)"
            ))),
        }
    }
}

/// On-disk layout of a run's working directory.
///
/// All paths are fixed relative to the working-directory root so every
/// subcommand and every submitted job agrees on where things live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStructure {
    /// Training-set points directory
    pub training_set: PathBuf,
    /// Sample-pool points directory
    pub sample_pool: PathBuf,
    /// FEREBUS working directory
    pub ferebus: PathBuf,
    /// Trained model output directory
    pub models: PathBuf,
    /// Generated submission scripts
    pub scripts: PathBuf,
    /// Persisted job-ID records
    pub jid_file: PathBuf,
    /// Working-directory lock marker
    pub data_lock: PathBuf,
}

impl FileStructure {
    /// Layout rooted at a working directory.
    pub fn new(root: &Path) -> Self {
        Self {
            training_set: root.join("TRAINING_SET"),
            sample_pool: root.join("SAMPLE_POOL"),
            ferebus: root.join("FEREBUS"),
            models: root.join("FEREBUS").join("MODELS"),
            scripts: root.join(".scripts"),
            jid_file: root.join(".jobs.json"),
            data_lock: root.join(".DATA_LOCK"),
        }
    }
}

/// Complete configuration for an adaptive-sampling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// System name used as the point directory prefix (e.g. "WATER")
    pub system_name: String,
    /// Initial points source: a trajectory file or a points directory
    pub points_location: PathBuf,
    /// Number of adaptive-sampling iterations N (phases are N + 1 with the
    /// first rewritten to the First phase and a Last appended)
    pub n_iterations: usize,
    /// Points added to the training set per Standard iteration
    pub points_per_iteration: usize,
    /// Requested initial training-set size (the set method may override)
    pub training_points: usize,
    /// Initial set selection method name (e.g. "min_max")
    pub training_set_method: String,
    /// Atoms subject to optimisation
    pub optimise_atom: AtomSelection,
    /// Quantum chemistry method (e.g. "B3LYP")
    pub method: String,
    /// Basis set (e.g. "6-31+g(d,p)")
    pub basis_set: String,
    /// Molecular charge
    pub charge: i32,
    /// Spin multiplicity
    pub multiplicity: usize,
    /// Processors per external calculation
    pub nprocs: usize,
    /// Memory per external calculation
    pub mem: String,
    /// Scheduler backend
    pub batch: BatchKind,
    /// Attempt budget for the in-script retry loop; unbounded when absent
    pub check_attempts: Option<usize>,
    /// Gaussian executable
    pub gaussian_command: String,
    /// AIMAll executable
    pub aimall_command: String,
    /// FEREBUS executable
    pub ferebus_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_name: "SYSTEM".to_string(),
            points_location: PathBuf::from("SYSTEM.xyz"),
            n_iterations: 1,
            points_per_iteration: 1,
            training_points: 500,
            training_set_method: "min_max".to_string(),
            optimise_atom: AtomSelection::All,
            method: "B3LYP".to_string(),
            basis_set: "6-31+g(d,p)".to_string(),
            charge: 0,
            multiplicity: 1,
            nprocs: 2,
            mem: "1GB".to_string(),
            batch: BatchKind::Sge,
            check_attempts: Some(10),
            gaussian_command: "g16".to_string(),
            aimall_command: "aimall".to_string(),
            ferebus_command: "ferebus".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an INI file, filling unset keys with
    /// defaults and validating the result.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        ini.load(path).map_err(ConfigError::IniParse)?;
        debug!("loaded configuration from {}", path.display());
        Self::from_ini(&ini)
    }

    /// Parse configuration from INI text. Used by tests and by `load`.
    pub fn from_ini_str(content: &str) -> Result<Self> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(ConfigError::IniParse)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let defaults = Config::default();

        let get = |section: &str, key: &str| ini.get(section, key);
        let get_usize = |section: &str, key: &str, fallback: usize| -> Result<usize> {
            match ini.get(section, key) {
                Some(value) => value.trim().parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("{section}.{key} = '{value}'"))
                }),
                None => Ok(fallback),
            }
        };

        let config = Self {
            system_name: get("system", "name").unwrap_or(defaults.system_name),
            points_location: get("system", "points_location")
                .map(PathBuf::from)
                .unwrap_or(defaults.points_location),
            n_iterations: get_usize("run", "n_iterations", defaults.n_iterations)?,
            points_per_iteration: get_usize(
                "run",
                "points_per_iteration",
                defaults.points_per_iteration,
            )?,
            training_points: get_usize("run", "training_points", defaults.training_points)?,
            training_set_method: get("run", "training_set_method")
                .unwrap_or(defaults.training_set_method),
            optimise_atom: get("run", "optimise_atom")
                .map(|v| AtomSelection::parse(&v))
                .unwrap_or(defaults.optimise_atom),
            method: get("qm", "method").unwrap_or(defaults.method),
            basis_set: get("qm", "basis_set").unwrap_or(defaults.basis_set),
            charge: match get("qm", "charge") {
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(format!("qm.charge = '{value}'")))?,
                None => defaults.charge,
            },
            multiplicity: get_usize("qm", "multiplicity", defaults.multiplicity)?,
            nprocs: get_usize("qm", "nprocs", defaults.nprocs)?,
            mem: get("qm", "mem").unwrap_or(defaults.mem),
            batch: match get("batch", "system") {
                Some(value) => BatchKind::parse(&value)?,
                None => defaults.batch,
            },
            check_attempts: match get("batch", "check_attempts") {
                Some(value) => Some(value.trim().parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("batch.check_attempts = '{value}'"))
                })?),
                None => defaults.check_attempts,
            },
            gaussian_command: get("qm", "gaussian_command").unwrap_or(defaults.gaussian_command),
            aimall_command: get("qm", "aimall_command").unwrap_or(defaults.aimall_command),
            ferebus_command: get("qm", "ferebus_command").unwrap_or(defaults.ferebus_command),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.n_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "run.n_iterations must be at least 1".to_string(),
            ));
        }
        if self.points_per_iteration == 0 {
            return Err(ConfigError::InvalidValue(
                "run.points_per_iteration must be at least 1".to_string(),
            ));
        }
        if self.multiplicity == 0 {
            return Err(ConfigError::InvalidValue(
                "qm.multiplicity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Gaussian route line assembled from the configured method and basis.
    pub fn gaussian_route(&self) -> String {
        format!("#p {}/{} force output=wfn", self.method, self.basis_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config =
            Config::from_ini_str("[system]\nname = WATER\npoints_location = WATER.xyz\n").unwrap();
        assert_eq!(config.system_name, "WATER");
        assert_eq!(config.n_iterations, 1);
        assert_eq!(config.training_set_method, "min_max");
        assert_eq!(config.optimise_atom, AtomSelection::All);
        assert_eq!(config.batch, BatchKind::Sge);
    }

    #[test]
    fn full_config_overrides_defaults() {
        let config = Config::from_ini_str(
            "[system]\nname = METHANOL\npoints_location = points_dir\n\
             [run]\nn_iterations = 5\npoints_per_iteration = 2\noptimise_atom = O1\n\
             [qm]\nmethod = PBE0\ncharge = -1\nmultiplicity = 2\n\
             [batch]\nsystem = slurm\ncheck_attempts = 3\n",
        )
        .unwrap();
        assert_eq!(config.n_iterations, 5);
        assert_eq!(config.points_per_iteration, 2);
        assert_eq!(config.optimise_atom, AtomSelection::Atom("O1".to_string()));
        assert_eq!(config.method, "PBE0");
        assert_eq!(config.charge, -1);
        assert_eq!(config.batch, BatchKind::Slurm);
        assert_eq!(config.check_attempts, Some(3));
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let result = Config::from_ini_str("[run]\nn_iterations = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn unknown_batch_system_is_rejected() {
        let result = Config::from_ini_str("[batch]\nsystem = pbs\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn file_structure_is_rooted_at_the_working_directory() {
        let fs = FileStructure::new(Path::new("/work/water"));
        assert_eq!(fs.training_set, PathBuf::from("/work/water/TRAINING_SET"));
        assert_eq!(fs.models, PathBuf::from("/work/water/FEREBUS/MODELS"));
        assert_eq!(fs.data_lock, PathBuf::from("/work/water/.DATA_LOCK"));
    }

    #[test]
    fn gaussian_route_carries_method_and_basis() {
        let config = Config::default();
        assert_eq!(
            config.gaussian_route(),
            "#p B3LYP/6-31+g(d,p) force output=wfn"
        );
    }
}
