//! Bookkeeping tasks executed by submitted job scripts.
//!
//! The iteration driver never does heavy work itself: it queues scripts
//! that either run an external program (Gaussian, AIMAll, FEREBUS) or
//! re-invoke this binary for the bookkeeping in between. The re-invoked
//! subcommands land here:
//!
//! - `make-sets`: split the initial candidate points into the training set
//!   and sample pool
//! - `write-inputs`: write missing Gaussian inputs for training-set points
//! - `collect-wfns`: report which points still lack wavefunction output
//! - `make-models`: build per-atom FEREBUS training inputs
//! - `select-points`: move the next adaptive-sampling picks from the
//!   sample pool into the training set
//!
//! All tasks are idempotent; re-running one after a partial failure only
//! fills in what is missing.

use crate::config::{Config, FileStructure};
use crate::connectivity::ConnectivityCache;
use crate::make_sets::{select_training_points, MakeSetsError};
use crate::points::{
    resolve_points_location, write_gjf, write_xyz, PointsDirectory, PointsError, PointsSource,
};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors arising while executing a bookkeeping task.
#[derive(Error, Debug)]
pub enum TaskError {
    /// File system operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Reading point collections failed
    #[error(transparent)]
    Points(#[from] PointsError),
    /// Initial set selection failed
    #[error(transparent)]
    MakeSets(#[from] MakeSetsError),
}

type Result<T> = std::result::Result<T, TaskError>;

fn point_dir_name(system_name: &str, index: usize) -> String {
    format!("{system_name}{index:04}")
}

fn write_point(dir: &Path, name: &str, atoms: &crate::atoms::Atoms) -> Result<()> {
    let point_dir = dir.join(name);
    fs::create_dir_all(&point_dir)?;
    write_xyz(atoms, &point_dir.join(format!("{name}.xyz")))?;
    Ok(())
}

/// Split the configured points location into `TRAINING_SET/` and
/// `SAMPLE_POOL/` point directories.
///
/// Selected indices come from the configured set method; every candidate
/// not selected becomes a sample-pool point. Already-populated set
/// directories are left untouched so a re-run is a no-op.
pub fn make_sets(config: &Config, files: &FileStructure) -> Result<()> {
    if files.training_set.exists() && !PointsDirectory::open(&files.training_set)?.is_empty() {
        info!("training set already exists, nothing to do");
        return Ok(());
    }

    let source = resolve_points_location(&config.points_location)?;
    let selected = select_training_points(&source, &config.training_set_method)?;
    info!(
        "splitting {} candidate points: {} into the training set",
        source.len(),
        selected.len()
    );

    let frame = |idx: usize| -> Result<crate::atoms::Atoms> {
        match &source {
            PointsSource::Trajectory(t) => {
                t.get(idx).cloned().ok_or_else(|| {
                    TaskError::Points(PointsError::Parse {
                        path: t.path.clone(),
                        reason: format!("frame {idx} out of range"),
                    })
                })
            }
            PointsSource::Directory(d) => Ok(d.geometry(idx)?),
        }
    };

    let mut train_count = 0;
    let mut pool_count = 0;
    for idx in 0..source.len() {
        let atoms = frame(idx)?;
        if selected.contains(&idx) {
            train_count += 1;
            write_point(
                &files.training_set,
                &point_dir_name(&config.system_name, train_count),
                &atoms,
            )?;
        } else {
            pool_count += 1;
            write_point(
                &files.sample_pool,
                &point_dir_name(&config.system_name, pool_count),
                &atoms,
            )?;
        }
    }
    info!("wrote {train_count} training points and {pool_count} sample-pool points");
    Ok(())
}

/// Write a Gaussian input for every training-set point that lacks one.
///
/// Returns the number of inputs written.
pub fn write_inputs(config: &Config, files: &FileStructure) -> Result<usize> {
    let points = PointsDirectory::open(&files.training_set)?;
    let mut written = 0;
    for (idx, dir) in points.point_dirs().iter().enumerate() {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("point")
            .to_string();
        let gjf = dir.join(format!("{name}.gjf"));
        if gjf.exists() {
            continue;
        }
        let atoms = points.geometry(idx)?;
        write_gjf(
            &atoms,
            &config.gaussian_route(),
            &name,
            config.charge,
            config.multiplicity,
            &gjf,
        )?;
        written += 1;
    }
    info!("wrote {written} Gaussian inputs under {}", files.training_set.display());
    Ok(written)
}

/// Count training-set points that still lack a wavefunction file, warning
/// about each. Downstream AIMAll tasks for those points will find nothing
/// to do until the Gaussian jobs rerun.
pub fn collect_wfns(files: &FileStructure) -> Result<usize> {
    let points = PointsDirectory::open(&files.training_set)?;
    let mut missing = 0;
    for dir in points.point_dirs() {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("point")
            .to_string();
        if !dir.join(format!("{name}.wfn")).exists() {
            warn!("no wavefunction for point {name}");
            missing += 1;
        }
    }
    Ok(missing)
}

/// Build per-atom FEREBUS training inputs under `FEREBUS/<atom>/`.
///
/// Each atom directory receives a training file holding one feature row
/// per training point, headed by the system's bond count taken from the
/// connectivity matrix of the first point.
pub fn make_models(config: &Config, files: &FileStructure, atoms: &[String]) -> Result<()> {
    let points = PointsDirectory::open(&files.training_set)?;
    if points.is_empty() {
        warn!("training set is empty, no model inputs to build");
        return Ok(());
    }

    let mut cache = ConnectivityCache::new();
    let first = points.geometry(0)?;
    let connectivity = cache.connectivity(&first);
    let n_bonds = (connectivity.sum() / 2.0) as usize;
    let features = points.features()?;

    for atom in atoms {
        let atom_dir = files.ferebus.join(atom);
        fs::create_dir_all(&atom_dir)?;
        let mut content = format!(
            "# system {} atom {atom} points {} bonds {n_bonds}\n",
            config.system_name,
            features.nrows()
        );
        for row in 0..features.nrows() {
            let line: Vec<String> = features
                .row(row)
                .iter()
                .map(|v| format!("{v:.10}"))
                .collect();
            content.push_str(&line.join(" "));
            content.push('\n');
        }
        fs::write(atom_dir.join(format!("{atom}_TRAINING_SET.csv")), content)?;
    }
    fs::create_dir_all(&files.models)?;
    info!("built model inputs for {} atoms", atoms.len());
    Ok(())
}

/// Move the next adaptive-sampling picks from the sample pool into the
/// training set.
///
/// Ranking of pool points comes from the externally trained models; this
/// task consumes the pool in name order, which matches the order the
/// selection job writes its picks back as. Returns the moved point
/// directories.
pub fn select_points(
    config: &Config,
    files: &FileStructure,
    n_points: usize,
) -> Result<Vec<PathBuf>> {
    let pool = PointsDirectory::open(&files.sample_pool)?;
    let train = PointsDirectory::open(&files.training_set)?;
    let mut next_index = train.len();
    let mut moved = Vec::new();

    for dir in pool.point_dirs().iter().take(n_points) {
        next_index += 1;
        let new_name = point_dir_name(&config.system_name, next_index);
        let dest = files.training_set.join(&new_name);
        fs::rename(dir, &dest)?;
        // Geometry file keeps the old point name; rename it to match.
        if let Ok(entries) = fs::read_dir(&dest) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("xyz") {
                    let _ = fs::rename(&path, dest.join(format!("{new_name}.xyz")));
                }
            }
        }
        info!("moved {} into the training set as {new_name}", dir.display());
        moved.push(dest);
    }
    Ok(moved)
}

/// Emit the completion marker consumed by the in-script retry loop.
///
/// Submitted scripts `eval` this command's output after each attempt; the
/// exported variable ends the loop.
pub fn print_task_completed() {
    println!("export {}=true", crate::submission::TASK_COMPLETED_VAR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn scratch_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qcflow_tasks_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_trajectory(path: &Path, n_frames: usize) {
        let mut content = String::new();
        for frame in 0..n_frames {
            let dz = frame as f64 * 0.05;
            content.push_str(&format!(
                "3\nframe {frame}\nO 0.0 0.0 {dz}\nH 0.757 0.586 {dz}\nH -0.757 0.586 {dz}\n"
            ));
        }
        fs::write(path, content).unwrap();
    }

    fn test_config(root: &Path) -> (Config, FileStructure) {
        let traj = root.join("WATER.xyz");
        write_trajectory(&traj, 25);
        let mut config = Config::default();
        config.system_name = "WATER".to_string();
        config.points_location = traj;
        (config, FileStructure::new(root))
    }

    #[test]
    fn make_sets_splits_candidates_between_set_and_pool() {
        let root = scratch_root("split");
        let (config, files) = test_config(&root);

        make_sets(&config, &files).unwrap();

        let train = PointsDirectory::open(&files.training_set).unwrap();
        let pool = PointsDirectory::open(&files.sample_pool).unwrap();
        assert!(train.len() >= 1);
        assert_eq!(train.len() + pool.len(), 25);
        // Points carry their geometry.
        assert_eq!(train.geometry(0).unwrap().len(), 3);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn make_sets_is_idempotent() {
        let root = scratch_root("idem");
        let (config, files) = test_config(&root);
        make_sets(&config, &files).unwrap();
        let before = PointsDirectory::open(&files.training_set).unwrap().len();
        make_sets(&config, &files).unwrap();
        let after = PointsDirectory::open(&files.training_set).unwrap().len();
        assert_eq!(before, after);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn write_inputs_skips_existing_gjf_files() {
        let root = scratch_root("inputs");
        let (config, files) = test_config(&root);
        make_sets(&config, &files).unwrap();

        let first_pass = write_inputs(&config, &files).unwrap();
        assert!(first_pass > 0);
        let second_pass = write_inputs(&config, &files).unwrap();
        assert_eq!(second_pass, 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn select_points_moves_pool_points_into_the_training_set() {
        let root = scratch_root("select");
        let (config, files) = test_config(&root);
        make_sets(&config, &files).unwrap();

        let train_before = PointsDirectory::open(&files.training_set).unwrap().len();
        let pool_before = PointsDirectory::open(&files.sample_pool).unwrap().len();

        let moved = select_points(&config, &files, 2).unwrap();
        assert_eq!(moved.len(), 2);

        let train_after = PointsDirectory::open(&files.training_set).unwrap().len();
        let pool_after = PointsDirectory::open(&files.sample_pool).unwrap().len();
        assert_eq!(train_after, train_before + 2);
        assert_eq!(pool_after, pool_before - 2);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn make_models_writes_per_atom_training_files() {
        let root = scratch_root("models");
        let (config, files) = test_config(&root);
        make_sets(&config, &files).unwrap();

        let atoms = vec!["O1".to_string(), "H2".to_string()];
        make_models(&config, &files, &atoms).unwrap();

        for atom in &atoms {
            let file = files.ferebus.join(atom).join(format!("{atom}_TRAINING_SET.csv"));
            assert!(file.exists());
            let content = fs::read_to_string(&file).unwrap();
            // Two O-H bonds in water.
            assert!(content.starts_with("# system WATER"));
            assert!(content.contains("bonds 2"));
        }
        fs::remove_dir_all(&root).unwrap();
    }
}
