//! Core atomic data structures for molecular geometries.
//!
//! This module provides the fundamental types describing a single molecular
//! geometry ("point" in adaptive-sampling terms):
//!
//! - [`Atom`]: element symbol plus Cartesian position
//! - [`Atoms`]: ordered collection of atoms with a stable topology hash
//!
//! Coordinates are in Angstroms throughout. Bonding radii are per-element
//! empirical values used by the connectivity calculator to decide whether
//! two atoms are bonded.

use nalgebra::Vector3;

/// Unit conversion constant: Bohr to Angstrom.
pub const BOHR_TO_ANGSTROM: f64 = 0.52917706;

/// Per-element bonding radius in Angstroms.
///
/// Returns `None` for elements outside the supported table so that callers
/// can reject unknown symbols at parse time instead of bonding with a bogus
/// default.
pub fn bonding_radius(symbol: &str) -> Option<f64> {
    let r = match symbol {
        "H" => 0.37,
        "He" => 0.32,
        "Li" => 1.34,
        "Be" => 0.90,
        "B" => 0.82,
        "C" => 0.77,
        "N" => 0.74,
        "O" => 0.73,
        "F" => 0.71,
        "Ne" => 0.69,
        "Na" => 1.54,
        "Mg" => 1.30,
        "Al" => 1.18,
        "Si" => 1.11,
        "P" => 1.06,
        "S" => 1.02,
        "Cl" => 0.99,
        "Ar" => 0.97,
        "K" => 1.96,
        "Ca" => 1.74,
        "Fe" => 1.25,
        "Zn" => 1.31,
        "Br" => 1.14,
        "I" => 1.33,
        _ => return None,
    };
    Some(r)
}

/// A single atom: element symbol, Cartesian position and bonding radius.
///
/// Immutable once parsed. The radius is resolved from the element table at
/// construction so downstream code never deals with unknown symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Chemical element symbol (e.g. "C", "H", "O")
    pub symbol: String,
    /// Cartesian position in Angstroms
    pub coordinates: Vector3<f64>,
    /// Bonding radius in Angstroms
    pub radius: f64,
}

impl Atom {
    /// Create an atom, resolving the bonding radius from the element table.
    ///
    /// Returns `None` when the element symbol is not in the table.
    pub fn new(symbol: &str, x: f64, y: f64, z: f64) -> Option<Self> {
        let radius = bonding_radius(symbol)?;
        Some(Self {
            symbol: symbol.to_string(),
            coordinates: Vector3::new(x, y, z),
            radius,
        })
    }

    /// Squared Euclidean distance to another atom in Angstroms squared.
    pub fn distance_sq(&self, other: &Atom) -> f64 {
        (self.coordinates - other.coordinates).norm_squared()
    }
}

/// Ordered collection of atoms making up one molecular geometry.
///
/// The ordering is significant: atom names ("O1", "H2", ...) and the
/// topology hash both derive from it, and every frame of a trajectory is
/// expected to share the same ordering.
#[derive(Debug, Clone, Default)]
pub struct Atoms {
    atoms: Vec<Atom>,
}

impl Atoms {
    /// Wrap a vector of atoms.
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self { atoms }
    }

    /// Number of atoms.
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// True when the collection holds no atoms.
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Iterate over the atoms in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Atom> {
        self.atoms.iter()
    }

    /// Atom at a given index.
    pub fn get(&self, idx: usize) -> Option<&Atom> {
        self.atoms.get(idx)
    }

    /// Per-atom names formed from the element symbol and 1-based position,
    /// e.g. `["O1", "H2", "H3"]` for water.
    pub fn names(&self) -> Vec<String> {
        self.atoms
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{}{}", a.symbol, i + 1))
            .collect()
    }

    /// Stable structural hash: element composition and order, independent of
    /// coordinates. Every frame of a trajectory shares this hash, so the
    /// connectivity matrix is computed once per distinct topology.
    pub fn topology_hash(&self) -> String {
        self.atoms
            .iter()
            .map(|a| a.symbol.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Flattened Cartesian coordinates `[x1, y1, z1, x2, ...]` in Angstroms.
    ///
    /// This is the feature vector used by the initial-set selection methods.
    pub fn features(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.atoms.len() * 3);
        for atom in &self.atoms {
            flat.push(atom.coordinates.x);
            flat.push(atom.coordinates.y);
            flat.push(atom.coordinates.z);
        }
        flat
    }
}

impl<'a> IntoIterator for &'a Atoms {
    type Item = &'a Atom;
    type IntoIter = std::slice::Iter<'a, Atom>;

    fn into_iter(self) -> Self::IntoIter {
        self.atoms.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> Atoms {
        Atoms::new(vec![
            Atom::new("O", 0.0, 0.0, 0.0).unwrap(),
            Atom::new("H", 0.757, 0.586, 0.0).unwrap(),
            Atom::new("H", -0.757, 0.586, 0.0).unwrap(),
        ])
    }

    #[test]
    fn names_are_symbol_plus_index() {
        assert_eq!(water().names(), vec!["O1", "H2", "H3"]);
    }

    #[test]
    fn topology_hash_ignores_coordinates() {
        let a = water();
        let mut displaced = water();
        displaced.atoms[1].coordinates.x += 0.3;
        assert_eq!(a.topology_hash(), displaced.topology_hash());
        assert_eq!(a.topology_hash(), "O,H,H");
    }

    #[test]
    fn unknown_element_is_rejected() {
        assert!(Atom::new("Xx", 0.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn features_are_flattened_coordinates() {
        let feats = water().features();
        assert_eq!(feats.len(), 9);
        assert_eq!(feats[3], 0.757);
        assert_eq!(feats[4], 0.586);
    }
}
