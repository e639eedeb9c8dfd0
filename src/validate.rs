//! Checks run before a model is built and after the solver returns.
//!
//! The post-solve checks do not trust the solver's own feasibility claim:
//! they re-derive row sums, loads and the bottleneck from the raw values.

use std::collections::BTreeSet;

use tracing::warn;

use crate::{Error, Problem, ResourceSelection, Result};

/// Allowed drift of a row sum or load from its bound
const TOLERANCE: f64 = 1e-6;
/// Allowed distance of a binary value from 0 or 1
const INTEGRALITY_TOLERANCE: f64 = 1e-4;

pub(crate) fn check_problem(problem: &Problem) -> Result<()> {
    check_shapes(problem)?;
    check_distances(&problem.distances)?;
    check_parameters(problem)
}

fn check_shapes(problem: &Problem) -> Result<()> {
    let n = problem.num_municipalities();
    if n == 0 {
        return Err(Error::shape("populations", "at least one municipality", 0));
    }
    if problem.distances.len() != n {
        return Err(Error::shape(
            "distances",
            format!("{n} rows"),
            format!("{} rows", problem.distances.len()),
        ));
    }
    if let Some((i, row)) = problem
        .distances
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != n)
    {
        return Err(Error::shape(
            "distances",
            format!("{n} columns in row {i}"),
            format!("{} columns", row.len()),
        ));
    }
    if let Some(names) = &problem.names {
        if names.len() != n {
            return Err(Error::shape("names", n, names.len()));
        }
    }
    if let Some(coordinates) = &problem.coordinates {
        if coordinates.len() != n {
            return Err(Error::shape(
                "coordinates",
                format!("{n}x2"),
                format!("{}x2", coordinates.len()),
            ));
        }
    }
    Ok(())
}

/// The bottleneck linking constraint relies on D >= 0
fn check_distances(distances: &[Vec<f64>]) -> Result<()> {
    for (i, row) in distances.iter().enumerate() {
        for (j, &d) in row.iter().enumerate() {
            if !d.is_finite() || d < 0.0 {
                return Err(Error::InvalidData(format!(
                    "distance from {i} to {j} is {d}, expected a finite non-negative value"
                )));
            }
        }
    }
    Ok(())
}

fn check_parameters(problem: &Problem) -> Result<()> {
    let n = problem.num_municipalities();
    let k = problem.resources.count();

    if k == 0 || k > n {
        return Err(Error::Config(format!(
            "the number of resources must be between 1 and {n}, got {k}"
        )));
    }
    if let ResourceSelection::Fixed { indices } = &problem.resources {
        if let Some(&index) = indices.iter().find(|&&index| index >= n) {
            return Err(Error::Config(format!(
                "resource index {index} is out of range for {n} municipalities"
            )));
        }
        let unique: BTreeSet<_> = indices.iter().collect();
        if unique.len() != indices.len() {
            return Err(Error::Config(format!(
                "resource indices contain duplicates: {indices:?}"
            )));
        }
    }
    if !problem.alpha.is_finite() || problem.alpha < 0.0 {
        return Err(Error::Config(format!(
            "alpha must be a finite value >= 0, got {}",
            problem.alpha
        )));
    }
    if !problem.epsilon.is_finite() || problem.epsilon < 0.0 {
        return Err(Error::Config(format!(
            "epsilon must be a finite value >= 0, got {}",
            problem.epsilon
        )));
    }
    if let Some(seconds) = problem.time_limit_seconds {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(Error::Config(format!(
                "time limit must be a positive number of seconds, got {seconds}"
            )));
        }
    }
    Ok(())
}

/// Round the raw assignment values to a 0/1 matrix, checking that each
/// value is binary and each row sums to one
pub(crate) fn check_assignment(raw: &[Vec<f64>]) -> Result<Vec<Vec<u8>>> {
    raw.iter()
        .enumerate()
        .map(|(i, row)| {
            if let Some((j, &v)) = row
                .iter()
                .enumerate()
                .find(|(_, v)| (**v - v.round()).abs() > INTEGRALITY_TOLERANCE)
            {
                return Err(Error::InvariantViolation(format!(
                    "assignment of municipality {i} to column {j} is fractional ({v})"
                )));
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > TOLERANCE {
                return Err(Error::InvariantViolation(format!(
                    "municipality {i} is assigned {sum} times instead of once"
                )));
            }
            let rounded: Vec<u8> = row.iter().map(|&v| (v.round() == 1.0) as u8).collect();
            if rounded.iter().filter(|&&v| v == 1).count() != 1 {
                return Err(Error::InvariantViolation(format!(
                    "municipality {i} is not assigned to exactly one resource"
                )));
            }
            Ok(rounded)
        })
        .collect()
}

/// Column indices whose is-resource value reads as chosen. The cardinality
/// constraint guarantees exactly `k` of them, and every column in use must
/// be among them.
pub(crate) fn chosen_resources(raw: &[f64], k: usize, matrix: &[Vec<u8>]) -> Result<Vec<usize>> {
    let chosen: Vec<usize> = raw
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > 0.5)
        .map(|(j, _)| j)
        .collect();
    if chosen.len() != k {
        return Err(Error::InvariantViolation(format!(
            "expected {k} resources to be chosen, found {}",
            chosen.len()
        )));
    }
    for (i, row) in matrix.iter().enumerate() {
        if let Some(j) = row.iter().position(|&v| v == 1) {
            if !chosen.contains(&j) {
                return Err(Error::InvariantViolation(format!(
                    "municipality {i} is assigned to {j}, which is not a resource"
                )));
            }
        }
    }
    Ok(chosen)
}

pub(crate) fn check_capacities(loads: &[u64], capacity: f64) -> Result<()> {
    let bound = capacity * (1.0 + TOLERANCE) + TOLERANCE;
    match loads.iter().enumerate().find(|(_, load)| **load as f64 > bound) {
        Some((j, load)) => Err(Error::InvariantViolation(format!(
            "resource {j} serves {load} people, above the capacity of {capacity}"
        ))),
        None => Ok(()),
    }
}

/// The solver's z must cover the largest assigned distance
pub(crate) fn check_bottleneck(solver_value: f64, bottleneck: f64) -> Result<()> {
    let slack = TOLERANCE * bottleneck.max(1.0);
    if solver_value < bottleneck - slack {
        return Err(Error::InvariantViolation(format!(
            "solver bottleneck {solver_value} is below the largest assigned distance {bottleneck}"
        )));
    }
    if solver_value > bottleneck + slack {
        warn!(
            solver_value,
            bottleneck, "solver bottleneck is not tight, the solve may have stopped early"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_EPSILON;

    fn problem(resources: ResourceSelection) -> Problem {
        Problem {
            distances: vec![vec![0.0, 3.0, 4.0], vec![3.0, 0.0, 5.0], vec![4.0, 5.0, 0.0]],
            populations: vec![1, 2, 3],
            names: Some(vec!["a".into(), "b".into(), "c".into()]),
            coordinates: Some(vec![[0.0, 0.0], [3.0, 0.0], [0.0, 4.0]]),
            resources,
            alpha: 0.1,
            epsilon: DEFAULT_EPSILON,
            time_limit_seconds: None,
        }
    }

    #[test]
    fn accepts_well_formed_problem() {
        check_problem(&problem(ResourceSelection::Fixed { indices: vec![2, 0] })).unwrap();
        check_problem(&problem(ResourceSelection::Select { count: 3 })).unwrap();
    }

    #[test]
    fn rejects_ragged_distances() {
        let mut p = problem(ResourceSelection::Select { count: 1 });
        p.distances[1].pop();
        assert!(matches!(check_problem(&p), Err(Error::DataShape { what: "distances", .. })));

        let mut p = problem(ResourceSelection::Select { count: 1 });
        p.distances.pop();
        assert!(matches!(check_problem(&p), Err(Error::DataShape { .. })));
    }

    #[test]
    fn rejects_mismatched_side_arrays() {
        let mut p = problem(ResourceSelection::Select { count: 1 });
        p.names = Some(vec!["a".into()]);
        assert!(matches!(check_problem(&p), Err(Error::DataShape { what: "names", .. })));

        let mut p = problem(ResourceSelection::Select { count: 1 });
        p.coordinates = Some(vec![[0.0, 0.0]]);
        assert!(matches!(check_problem(&p), Err(Error::DataShape { what: "coordinates", .. })));
    }

    #[test]
    fn rejects_empty_problem() {
        let mut p = problem(ResourceSelection::Select { count: 1 });
        p.distances.clear();
        p.populations.clear();
        p.names = None;
        p.coordinates = None;
        assert!(matches!(check_problem(&p), Err(Error::DataShape { .. })));
    }

    #[test]
    fn rejects_negative_or_nan_distances() {
        let mut p = problem(ResourceSelection::Select { count: 1 });
        p.distances[0][2] = -1.0;
        assert!(matches!(check_problem(&p), Err(Error::InvalidData(_))));

        p.distances[0][2] = f64::NAN;
        assert!(matches!(check_problem(&p), Err(Error::InvalidData(_))));
    }

    #[test]
    fn rejects_bad_resource_counts() {
        for count in [0, 4] {
            let p = problem(ResourceSelection::Select { count });
            assert!(matches!(check_problem(&p), Err(Error::Config(_))), "{count}");
        }
        let p = problem(ResourceSelection::Fixed { indices: vec![] });
        assert!(matches!(check_problem(&p), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_bad_fixed_indices() {
        let p = problem(ResourceSelection::Fixed { indices: vec![0, 3] });
        assert!(matches!(check_problem(&p), Err(Error::Config(_))));

        let p = problem(ResourceSelection::Fixed { indices: vec![1, 1] });
        assert!(matches!(check_problem(&p), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut p = problem(ResourceSelection::Select { count: 2 });
        p.alpha = -0.5;
        assert!(matches!(check_problem(&p), Err(Error::Config(_))));

        let mut p = problem(ResourceSelection::Select { count: 2 });
        p.epsilon = f64::INFINITY;
        assert!(matches!(check_problem(&p), Err(Error::Config(_))));

        let mut p = problem(ResourceSelection::Select { count: 2 });
        p.time_limit_seconds = Some(0.0);
        assert!(matches!(check_problem(&p), Err(Error::Config(_))));
    }

    #[test]
    fn rounds_near_binary_assignments() {
        let raw = vec![vec![0.9999999, 1e-8], vec![0.0, 1.0]];
        assert_eq!(check_assignment(&raw).unwrap(), vec![vec![1, 0], vec![0, 1]]);
    }

    #[test]
    fn flags_unassigned_double_assigned_and_fractional_rows() {
        assert!(matches!(
            check_assignment(&[vec![0.0, 0.0]]),
            Err(Error::InvariantViolation(_))
        ));
        assert!(matches!(
            check_assignment(&[vec![1.0, 1.0]]),
            Err(Error::InvariantViolation(_))
        ));
        assert!(matches!(
            check_assignment(&[vec![0.5, 0.5]]),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn chosen_resources_match_cardinality_and_usage() {
        let matrix = vec![vec![1, 0, 0], vec![0, 0, 1]];
        assert_eq!(chosen_resources(&[1.0, 0.0, 1.0], 2, &matrix).unwrap(), vec![0, 2]);

        assert!(matches!(
            chosen_resources(&[1.0, 0.0, 0.0], 2, &matrix),
            Err(Error::InvariantViolation(_))
        ));
        assert!(matches!(
            chosen_resources(&[1.0, 1.0, 0.0], 2, &matrix),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn capacity_allows_numeric_slack_only() {
        check_capacities(&[20, 20], 20.0).unwrap();
        assert!(matches!(
            check_capacities(&[20, 21], 20.0),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn bottleneck_must_cover_largest_distance() {
        check_bottleneck(2.0, 2.0).unwrap();
        check_bottleneck(2.0 - 1e-9, 2.0).unwrap();
        check_bottleneck(3.0, 2.0).unwrap();
        assert!(matches!(
            check_bottleneck(1.5, 2.0),
            Err(Error::InvariantViolation(_))
        ));
    }
}
