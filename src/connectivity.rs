//! Bond connectivity calculation with per-topology caching.
//!
//! Which atoms are bonded is decided from interatomic distances against the
//! sum of the two bonding radii, scaled by the Bohr conversion constant. The
//! result is a symmetric 0/1 matrix with a zero diagonal.
//!
//! Connectivity only depends on the element composition and ordering, not on
//! the particular frame, so it is computed once per distinct topology and
//! cached for the life of the [`ConnectivityCache`]. The cache is never
//! evicted; for typical single-run usage the number of distinct topologies
//! is tiny.

use crate::atoms::{Atoms, BOHR_TO_ANGSTROM};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Owned cache of connectivity matrices keyed by topology hash.
///
/// Construct one per run and pass it to whatever needs connectivity; there
/// is deliberately no process-global state here.
#[derive(Debug, Default)]
pub struct ConnectivityCache {
    cache: HashMap<String, DMatrix<f64>>,
}

impl ConnectivityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct topologies cached so far.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True when nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Connectivity matrix for a set of atoms, computed on first use and
    /// cached by topology hash thereafter.
    ///
    /// Entry (i, j) is 1.0 when atoms i and j are bonded, 0.0 otherwise.
    /// The matrix is symmetric with a zero diagonal. Two atoms are bonded
    /// when their squared distance is strictly less than
    /// `((r_i + r_j) / 0.52917706)^2`; a pair exactly at the threshold is
    /// not bonded.
    pub fn connectivity(&mut self, atoms: &Atoms) -> &DMatrix<f64> {
        let key = atoms.topology_hash();
        self.cache
            .entry(key)
            .or_insert_with(|| calculate_connectivity(atoms))
    }
}

/// Compute the connectivity matrix directly, without caching.
///
/// O(N^2) over all atom pairs; no spatial indexing, which is fine for the
/// small molecules this tool handles.
pub fn calculate_connectivity(atoms: &Atoms) -> DMatrix<f64> {
    let n = atoms.len();
    let mut connectivity = DMatrix::zeros(n, n);

    for (i, iatom) in atoms.iter().enumerate() {
        for (j, jatom) in atoms.iter().enumerate() {
            if i == j {
                continue;
            }
            let max_dist = (iatom.radius + jatom.radius) / BOHR_TO_ANGSTROM;
            if iatom.distance_sq(jatom) < max_dist * max_dist {
                connectivity[(i, j)] = 1.0;
            }
        }
    }

    connectivity
}
