//! Initial training-set and sample-pool selection.
//!
//! Before the first adaptive-sampling iteration the candidate points (a
//! trajectory or pre-existing directory) are split into a training set and
//! a sample pool. A [`MakeSetMethod`] decides both how many points the
//! initial training set should hold and which candidate indices to take;
//! everything not selected lands in the sample pool.

use crate::points::{PointsError, PointsSource};
use nalgebra::DMatrix;
use thiserror::Error;

/// Errors arising during set construction.
#[derive(Error, Debug)]
pub enum MakeSetsError {
    /// Reading the candidate points failed
    #[error(transparent)]
    Points(#[from] PointsError),
    /// The configured method name is not implemented
    #[error("unknown training set method: {0}")]
    UnknownMethod(String),
    /// The candidate pool holds no points
    #[error("no candidate points available for set selection")]
    NoPoints,
}

type Result<T> = std::result::Result<T, MakeSetsError>;

/// A policy for picking the initial training-set points.
pub trait MakeSetMethod {
    /// Method name as it appears in the run configuration.
    fn name(&self) -> &'static str;

    /// Number of points the initial training set should hold given the
    /// requested count and the candidate feature matrix.
    fn get_npoints(&self, requested: usize, features: &DMatrix<f64>) -> usize;

    /// Candidate indices (rows of the feature matrix) to place in the
    /// training set. May contain duplicates; callers deduplicate.
    fn get_points(&self, features: &DMatrix<f64>) -> Vec<usize>;
}

/// Min/max feature selection.
///
/// Picks, for every feature column, the candidate with the smallest and the
/// candidate with the largest value, so the initial set brackets the
/// observed feature ranges. The point budget is therefore twice the number
/// of feature dimensions regardless of what was requested.
#[derive(Debug, Default)]
pub struct MinMax;

impl MakeSetMethod for MinMax {
    fn name(&self) -> &'static str {
        "min_max"
    }

    fn get_npoints(&self, _requested: usize, features: &DMatrix<f64>) -> usize {
        2 * features.ncols()
    }

    fn get_points(&self, features: &DMatrix<f64>) -> Vec<usize> {
        // All column minima first, then all maxima; the concatenation
        // order decides training-set numbering after deduplication.
        let mut mins = Vec::with_capacity(features.ncols());
        let mut maxes = Vec::with_capacity(features.ncols());
        for col in 0..features.ncols() {
            let column = features.column(col);
            let mut min_idx = 0;
            let mut max_idx = 0;
            for (row, &value) in column.iter().enumerate() {
                if value < column[min_idx] {
                    min_idx = row;
                }
                if value > column[max_idx] {
                    max_idx = row;
                }
            }
            mins.push(min_idx);
            maxes.push(max_idx);
        }
        mins.extend(maxes);
        mins
    }
}

/// Look up a set method by its configured name.
pub fn method_by_name(name: &str) -> Result<Box<dyn MakeSetMethod>> {
    match name {
        "min_max" => Ok(Box::new(MinMax)),
        other => Err(MakeSetsError::UnknownMethod(other.to_string())),
    }
}

/// Number of points the initial training set will hold for a candidate
/// source under the configured method.
pub fn make_sets_npoints(
    points: &PointsSource,
    requested: usize,
    method_name: &str,
) -> Result<usize> {
    if points.is_empty() {
        return Err(MakeSetsError::NoPoints);
    }
    let method = method_by_name(method_name)?;
    let features = points.features()?;
    Ok(method.get_npoints(requested, &features))
}

/// Indices of the candidate points selected for the initial training set,
/// deduplicated while preserving first-seen order.
pub fn select_training_points(points: &PointsSource, method_name: &str) -> Result<Vec<usize>> {
    if points.is_empty() {
        return Err(MakeSetsError::NoPoints);
    }
    let method = method_by_name(method_name)?;
    let features = points.features()?;
    let mut seen = std::collections::HashSet::new();
    Ok(method
        .get_points(&features)
        .into_iter()
        .filter(|idx| seen.insert(*idx))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_budget_is_twice_the_feature_count() {
        let features = DMatrix::zeros(10, 9);
        assert_eq!(MinMax.get_npoints(500, &features), 18);
    }

    #[test]
    fn min_max_selects_extremes_per_column_minima_first() {
        // Rows: candidates, columns: two features.
        let features = DMatrix::from_row_slice(
            4,
            2,
            &[
                0.0, 0.0, //
                3.0, 1.0, //
                -2.0, 2.0, //
                1.0, 9.0, //
            ],
        );
        let picked = MinMax.get_points(&features);
        // Column minima (rows 2, 0) precede the column maxima (rows 1, 3);
        // interleaving per column would give [2, 1, 0, 3].
        assert_eq!(picked, vec![2, 0, 1, 3]);
    }

    #[test]
    fn unknown_method_is_an_error() {
        assert!(matches!(
            method_by_name("random_walk"),
            Err(MakeSetsError::UnknownMethod(_))
        ));
    }
}
