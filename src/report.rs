//! Everything a renderer needs to draw a solved assignment.
//!
//! The renderer gets explicit arguments only: one segment per municipality
//! from its own position to its resource, with the bottleneck segment
//! highlighted.

use serde::{Deserialize, Serialize};

use crate::{Problem, Solution};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub title: String,
    /// Output file name without extension, encoding the resource indices
    #[serde(rename = "fileStem")]
    pub file_stem: String,
    pub resources: Vec<usize>,
    #[serde(rename = "resourceNames", skip_serializing_if = "Option::is_none")]
    pub resource_names: Option<Vec<String>>,
    pub matrix: Vec<Vec<u8>>,
    /// N×k distances from each municipality to each resource
    pub distances: Vec<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Vec<[f64; 2]>>,
    #[serde(rename = "maxRow")]
    pub max_row: usize,
    #[serde(rename = "maxColumn")]
    pub max_column: usize,
    #[serde(rename = "averageDistance")]
    pub average_distance: f64,
    #[serde(rename = "maxDistance")]
    pub max_distance: f64,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub municipality: usize,
    /// Municipality index of the serving resource
    pub resource: usize,
    /// Resource column, one color per column
    pub column: usize,
    pub highlight: bool,
}

impl RenderRequest {
    /// Expects `solution` to come from solving `problem`. Resource names are
    /// left out when `problem.names` does not cover every resource.
    pub fn new(problem: &Problem, solution: &Solution) -> RenderRequest {
        let pair = solution.bottleneck_pair;
        let segments = solution
            .assignment
            .iter()
            .enumerate()
            .map(|(i, &j)| Segment {
                municipality: i,
                resource: solution.resources[j],
                column: j,
                highlight: i == pair.municipality && j == pair.resource,
            })
            .collect();

        let resource_names = problem.names.as_ref().and_then(|names| {
            solution
                .resources
                .iter()
                .map(|&r| names.get(r).cloned())
                .collect()
        });

        RenderRequest {
            title: format!(
                "k = {}\naverage distance: {:.4}\nmax distance: {}",
                solution.resources.len(),
                solution.average_distance,
                solution.bottleneck
            ),
            file_stem: file_stem(problem.resources.mode(), &solution.resources),
            resources: solution.resources.clone(),
            resource_names,
            matrix: solution.matrix.clone(),
            distances: problem.column_distances(&solution.resources),
            coordinates: problem.coordinates.clone(),
            max_row: pair.municipality,
            max_column: pair.resource,
            average_distance: solution.average_distance,
            max_distance: solution.bottleneck,
            segments,
        }
    }
}

fn file_stem(mode: &str, resources: &[usize]) -> String {
    resources
        .iter()
        .fold(mode.to_string(), |stem, r| format!("{stem}_{r}"))
}
