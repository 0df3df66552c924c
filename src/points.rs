//! Point collections: trajectory files and directories of point folders.
//!
//! A "point" is a single molecular geometry. Points arrive in one of two
//! shapes:
//!
//! - a multi-frame XYZ trajectory file, one geometry per frame
//! - a points directory, one subdirectory per point with the geometry file
//!   inside (this is the layout of the training set and sample pool)
//!
//! [`resolve_points_location`] distinguishes the two by inspecting the
//! path; anything that is neither a directory nor a recognised trajectory
//! suffix is a configuration error, which the iteration driver treats as
//! fatal.

use crate::atoms::{Atom, Atoms};
use lazy_static::lazy_static;
use log::debug;
use nalgebra::DMatrix;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors arising while reading point collections.
#[derive(Error, Debug)]
pub enum PointsError {
    /// File system operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed geometry data
    #[error("parse error in {path}: {reason}")]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
    /// Element symbol outside the supported radius table
    #[error("unknown element symbol: {0}")]
    UnknownElement(String),
    /// Points location is neither a directory nor a trajectory file
    #[error("unknown points location: {0}")]
    UnknownPointsLocation(PathBuf),
}

type Result<T> = std::result::Result<T, PointsError>;

lazy_static! {
    // Atom line: " O   0.000000   -0.757000   0.586000"
    static ref ATOM_RE: Regex = Regex::new(
        r"^\s*([A-Z][a-z]?)\s+([-+]?\d+\.?\d*(?:[eE][-+]?\d+)?)\s+([-+]?\d+\.?\d*(?:[eE][-+]?\d+)?)\s+([-+]?\d+\.?\d*(?:[eE][-+]?\d+)?)\s*$"
    )
    .unwrap();
}

/// A multi-geometry trajectory read from an XYZ file.
///
/// Every frame is expected to share element composition and ordering; the
/// connectivity cache relies on that when it keys by topology hash.
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// Source file the frames were read from
    pub path: PathBuf,
    frames: Vec<Atoms>,
}

impl Trajectory {
    /// Read all frames from a multi-frame XYZ file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines();
        let mut frames = Vec::new();

        while let Some(count_line) = lines.next() {
            let trimmed = count_line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let natoms: usize = trimmed.parse().map_err(|_| PointsError::Parse {
                path: path.to_path_buf(),
                reason: format!("expected atom count, got '{trimmed}'"),
            })?;
            // Comment line is ignored.
            lines.next();

            let mut atoms = Vec::with_capacity(natoms);
            for _ in 0..natoms {
                let line = lines.next().ok_or_else(|| PointsError::Parse {
                    path: path.to_path_buf(),
                    reason: "truncated frame".to_string(),
                })?;
                atoms.push(parse_atom_line(line, path)?);
            }
            frames.push(Atoms::new(atoms));
        }

        debug!("read {} frames from {}", frames.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            frames,
        })
    }

    /// Number of frames (points) in the trajectory.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when the trajectory holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at a given index.
    pub fn get(&self, idx: usize) -> Option<&Atoms> {
        self.frames.get(idx)
    }

    /// Iterate over the frames in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Atoms> {
        self.frames.iter()
    }

    /// Feature matrix of shape (n_frames, 3 * n_atoms): one row of
    /// flattened Cartesian coordinates per frame.
    pub fn features(&self) -> DMatrix<f64> {
        feature_matrix(self.frames.iter())
    }
}

fn parse_atom_line(line: &str, path: &Path) -> Result<Atom> {
    let caps = ATOM_RE.captures(line).ok_or_else(|| PointsError::Parse {
        path: path.to_path_buf(),
        reason: format!("malformed atom line: '{line}'"),
    })?;
    let symbol = &caps[1];
    let x: f64 = caps[2].parse().unwrap_or(f64::NAN);
    let y: f64 = caps[3].parse().unwrap_or(f64::NAN);
    let z: f64 = caps[4].parse().unwrap_or(f64::NAN);
    Atom::new(symbol, x, y, z).ok_or_else(|| PointsError::UnknownElement(symbol.to_string()))
}

fn feature_matrix<'a>(frames: impl Iterator<Item = &'a Atoms>) -> DMatrix<f64> {
    let rows: Vec<Vec<f64>> = frames.map(Atoms::features).collect();
    if rows.is_empty() {
        return DMatrix::zeros(0, 0);
    }
    let ncols = rows[0].len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    DMatrix::from_row_slice(flat.len() / ncols, ncols, &flat)
}

/// A directory of point subdirectories (training set or sample pool).
///
/// Each immediate subdirectory is one point holding its geometry and any
/// per-program inputs and outputs accumulated over the run.
#[derive(Debug, Clone)]
pub struct PointsDirectory {
    /// Directory the points live under
    pub path: PathBuf,
    point_dirs: Vec<PathBuf>,
}

impl PointsDirectory {
    /// Open an existing points directory, collecting its point
    /// subdirectories in name order.
    pub fn open(path: &Path) -> Result<Self> {
        let mut point_dirs = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                point_dirs.push(entry.path());
            }
        }
        point_dirs.sort();
        Ok(Self {
            path: path.to_path_buf(),
            point_dirs,
        })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.point_dirs.len()
    }

    /// True when no point subdirectories exist.
    pub fn is_empty(&self) -> bool {
        self.point_dirs.is_empty()
    }

    /// Paths of the point subdirectories in name order.
    pub fn point_dirs(&self) -> &[PathBuf] {
        &self.point_dirs
    }

    /// Load the geometry of a point from the first XYZ file in its
    /// subdirectory. Multi-frame files contribute their first frame.
    pub fn geometry(&self, idx: usize) -> Result<Atoms> {
        let dir = self.point_dirs.get(idx).ok_or_else(|| PointsError::Parse {
            path: self.path.clone(),
            reason: format!("no point at index {idx} ({} points)", self.point_dirs.len()),
        })?;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("xyz") {
                let trajectory = Trajectory::read(&path)?;
                return trajectory
                    .get(0)
                    .cloned()
                    .ok_or_else(|| PointsError::Parse {
                        path: path.clone(),
                        reason: "empty geometry file".to_string(),
                    });
            }
        }
        Err(PointsError::Parse {
            path: dir.clone(),
            reason: "point directory has no xyz geometry".to_string(),
        })
    }

    /// Feature matrix built from every point's geometry.
    pub fn features(&self) -> Result<DMatrix<f64>> {
        let mut frames = Vec::with_capacity(self.len());
        for idx in 0..self.len() {
            frames.push(self.geometry(idx)?);
        }
        Ok(feature_matrix(frames.iter()))
    }
}

/// Resolved kind of an initial points location.
#[derive(Debug)]
pub enum PointsSource {
    /// Pre-existing directory of point subdirectories
    Directory(PointsDirectory),
    /// Single trajectory file of geometries
    Trajectory(Trajectory),
}

impl PointsSource {
    /// Number of points in the source.
    pub fn len(&self) -> usize {
        match self {
            PointsSource::Directory(d) => d.len(),
            PointsSource::Trajectory(t) => t.len(),
        }
    }

    /// True when the source holds no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feature matrix over all points.
    pub fn features(&self) -> Result<DMatrix<f64>> {
        match self {
            PointsSource::Directory(d) => d.features(),
            PointsSource::Trajectory(t) => Ok(t.features()),
        }
    }
}

/// Resolve an initial points location by inspecting the path.
///
/// A directory becomes a [`PointsDirectory`], a file with an `xyz` suffix
/// becomes a [`Trajectory`]; anything else is
/// [`PointsError::UnknownPointsLocation`], which the driver treats as a
/// fatal configuration error.
pub fn resolve_points_location(path: &Path) -> Result<PointsSource> {
    if path.is_dir() {
        Ok(PointsSource::Directory(PointsDirectory::open(path)?))
    } else if path.extension().and_then(|e| e.to_str()) == Some("xyz") {
        Ok(PointsSource::Trajectory(Trajectory::read(path)?))
    } else {
        Err(PointsError::UnknownPointsLocation(path.to_path_buf()))
    }
}

/// Write a single geometry as an XYZ file.
pub fn write_xyz(atoms: &Atoms, path: &Path) -> std::io::Result<()> {
    let mut content = format!("{}\n\n", atoms.len());
    for atom in atoms {
        content.push_str(&format!(
            "{}  {:.8}  {:.8}  {:.8}\n",
            atom.symbol, atom.coordinates.x, atom.coordinates.y, atom.coordinates.z
        ));
    }
    fs::write(path, content)
}

/// Write a Gaussian input file for one geometry.
///
/// The route line carries the method and basis; charge and multiplicity
/// come from the run configuration.
pub fn write_gjf(
    atoms: &Atoms,
    route: &str,
    title: &str,
    charge: i32,
    multiplicity: usize,
    path: &Path,
) -> std::io::Result<()> {
    let mut content = format!("{route}\n\n{title}\n\n{charge} {multiplicity}\n");
    for atom in atoms {
        content.push_str(&format!(
            "{}  {:.8}  {:.8}  {:.8}\n",
            atom.symbol, atom.coordinates.x, atom.coordinates.y, atom.coordinates.z
        ));
    }
    content.push('\n');
    fs::write(path, content)
}
