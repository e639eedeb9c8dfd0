use good_lp::Solution as LpSolution;
use good_lp::solvers::ResolutionError;
use good_lp::solvers::coin_cbc::{CoinCbcProblem, coin_cbc};
use good_lp::{
    Expression, ProblemVariables, SolutionStatus, SolverModel, Variable, WithTimeLimit,
    constraint, variable, variables,
};
use std::fmt;
use std::fs::read_to_string;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub mod data;
mod error;
pub mod report;
mod validate;

pub use error::{Error, Result};

pub const DEFAULT_ALPHA: f64 = 0.1;
pub const DEFAULT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// `distances[i][j]` is the distance from municipality i to municipality j
    pub distances: Vec<Vec<f64>>,
    pub populations: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Vec<[f64; 2]>>,
    pub resources: ResourceSelection,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(
        rename = "timeLimitSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub time_limit_seconds: Option<f64>,
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

/// How the resource locations are obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ResourceSelection {
    /// The resources are given; only the assignment is decided
    Fixed { indices: Vec<usize> },
    /// The solver picks `count` municipalities to act as resources
    Select { count: usize },
}

impl ResourceSelection {
    /// Number of resources, k
    pub fn count(&self) -> usize {
        match self {
            ResourceSelection::Fixed { indices } => indices.len(),
            ResourceSelection::Select { count } => *count,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            ResourceSelection::Fixed { .. } => "fixed",
            ResourceSelection::Select { .. } => "select",
        }
    }
}

/// How the solver finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SolveStatus {
    #[default]
    Optimal,
    /// Best assignment found before the time limit; not proven optimal
    TimeLimit,
    /// Stopped within the allowed optimality gap
    GapLimit,
}

impl SolveStatus {
    pub fn is_optimal(self) -> bool {
        self == SolveStatus::Optimal
    }
}

impl From<SolutionStatus> for SolveStatus {
    fn from(status: SolutionStatus) -> Self {
        match status {
            SolutionStatus::Optimal => SolveStatus::Optimal,
            SolutionStatus::TimeLimit => SolveStatus::TimeLimit,
            SolutionStatus::GapLimit => SolveStatus::GapLimit,
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::TimeLimit => write!(f, "time limit"),
            SolveStatus::GapLimit => write!(f, "gap limit"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    #[serde(default)]
    pub status: SolveStatus,
    /// Municipality index of each resource, one per column of `matrix`
    pub resources: Vec<usize>,
    /// Column of `matrix` each municipality is assigned to
    pub assignment: Vec<usize>,
    /// Dense N×k assignment matrix
    pub matrix: Vec<Vec<u8>>,
    /// Population served by each resource
    pub loads: Vec<u64>,
    pub capacity: f64,
    pub bottleneck: f64,
    #[serde(rename = "bottleneckPair")]
    pub bottleneck_pair: BottleneckPair,
    #[serde(rename = "averageDistance")]
    pub average_distance: f64,
    #[serde(rename = "totalDistance")]
    pub total_distance: f64,
    pub objective: f64,
}

/// The assigned (municipality, resource column) pair at the bottleneck distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleneckPair {
    pub municipality: usize,
    pub resource: usize,
}

impl Problem {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Problem> {
        let path = path.as_ref();
        let buf = read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&buf)?)
    }

    pub fn num_municipalities(&self) -> usize {
        self.populations.len()
    }

    /// Capacity threshold M = (1 + alpha) * sum(P) / k
    ///
    /// Meaningful for a problem that passes validation; k = 0 gives inf or NaN.
    pub fn capacity(&self) -> f64 {
        let total: u64 = self.populations.iter().sum();
        (1.0 + self.alpha) * total as f64 / self.resources.count() as f64
    }

    /// Municipalities that may serve others: the fixed set, or every municipality
    fn candidate_columns(&self) -> Vec<usize> {
        match &self.resources {
            ResourceSelection::Fixed { indices } => indices.clone(),
            ResourceSelection::Select { .. } => (0..self.num_municipalities()).collect(),
        }
    }

    /// Distances restricted to the given resource columns.
    /// Panics if a column is out of range for a row.
    pub fn column_distances(&self, columns: &[usize]) -> Vec<Vec<f64>> {
        self.distances
            .iter()
            .map(|row| columns.iter().map(|&j| row[j]).collect())
            .collect()
    }

    pub fn solve(&self) -> Result<Solution> {
        validate::check_problem(self)?;

        let capacity = self.capacity();
        let columns = self.candidate_columns();
        let distances = self.column_distances(&columns);
        debug!(
            municipalities = self.num_municipalities(),
            columns = columns.len(),
            mode = self.resources.mode(),
            capacity,
            "building model"
        );

        // Create all variables upfront: x (N×columns), z, and for the select mode c
        let (variables, model_vars) = init_variables(
            self.num_municipalities(),
            columns.len(),
            &self.resources,
        );

        let objective = create_objective_function(&model_vars, &distances, self.epsilon);
        let model = create_model(variables, objective, self.time_limit_seconds);

        // Constraints shared by both modes
        let model = constrain_total_assignment(model, &model_vars);
        let model = constrain_capacities(model, &model_vars, &self.populations, capacity);
        let model = constrain_bottleneck(model, &model_vars, &distances);
        // Constraints that only exist when the solver picks the resources
        let model = constrain_resource_selection(model, &model_vars, &self.resources);

        let solution = model.solve().map_err(|e| match e {
            ResolutionError::Infeasible => {
                warn!(k = self.resources.count(), alpha = self.alpha, "model is infeasible");
                Error::Infeasible {
                    k: self.resources.count(),
                    alpha: self.alpha,
                    capacity,
                }
            }
            ResolutionError::Unbounded => Error::Unbounded,
            other => Error::Solver(other.to_string()),
        })?;

        let status = SolveStatus::from(solution.status());
        if !status.is_optimal() {
            warn!(%status, "solver stopped before proving optimality");
        }

        let solution = extract_solution(self, &solution, &model_vars, &columns, capacity)
            .map_err(|e| classify_extraction_error(e, status))?;
        let solution = Solution { status, ..solution };
        info!(
            %status,
            resources = ?solution.resources,
            bottleneck = solution.bottleneck,
            average = solution.average_distance,
            "solved"
        );
        Ok(solution)
    }
}

struct ModelVariables {
    /// `assign[i][j]` is 1 iff municipality i is served by column j
    assign: Vec<Vec<Variable>>,
    bottleneck: Variable,
    /// `is_resource[j]` is 1 iff column j is chosen; select mode only
    is_resource: Option<Vec<Variable>>,
}

fn init_variables(
    municipalities: usize,
    columns: usize,
    selection: &ResourceSelection,
) -> (ProblemVariables, ModelVariables) {
    let mut problem_vars = variables!();

    let assign: Vec<Vec<Variable>> = (0..municipalities)
        .map(|_| {
            (0..columns)
                .map(|_| problem_vars.add(variable().binary()))
                .collect()
        })
        .collect();
    let bottleneck = problem_vars.add(variable().min(0));
    let is_resource: Option<Vec<Variable>> = match selection {
        ResourceSelection::Fixed { .. } => None,
        ResourceSelection::Select { .. } => Some(
            (0..columns)
                .map(|_| problem_vars.add(variable().binary()))
                .collect(),
        ),
    };

    (
        problem_vars,
        ModelVariables {
            assign,
            bottleneck,
            is_resource,
        },
    )
}

/// z + epsilon * sum(D * x): minimax first, total distance as a tie-break
fn create_objective_function(
    model_vars: &ModelVariables,
    distances: &[Vec<f64>],
    epsilon: f64,
) -> Expression {
    let tie_break = model_vars
        .assign
        .iter()
        .zip(distances)
        .flat_map(|(vars, row)| vars.iter().zip(row))
        .fold(Expression::from(0.0), |sum, (&x, &d)| sum + x * (d * epsilon));

    tie_break + model_vars.bottleneck
}

fn create_model(
    variables: ProblemVariables,
    objective: Expression,
    time_limit_seconds: Option<f64>,
) -> CoinCbcProblem {
    #[allow(unused_mut)]
    let mut model = variables.minimise(objective).using(coin_cbc);
    #[cfg(not(debug_assertions))]
    model.set_parameter("loglevel", "0");
    match time_limit_seconds {
        Some(seconds) => model.with_time_limit(seconds),
        None => model,
    }
}

/// A solve cut short by a limit may return values that are not an
/// assignment at all. That is a solver outcome, not a modelling bug.
fn classify_extraction_error(err: Error, status: SolveStatus) -> Error {
    match err {
        Error::InvariantViolation(msg) if !status.is_optimal() => Error::Solver(format!(
            "solver stopped on its {status} without a usable assignment: {msg}"
        )),
        other => other,
    }
}

/// Every municipality is served by exactly one resource
fn constrain_total_assignment<Model: SolverModel>(
    model: Model,
    model_vars: &ModelVariables,
) -> Model {
    model_vars.assign.iter().fold(model, |m, row| {
        let assigned = row
            .iter()
            .fold(Expression::from(0.0), |sum, &x| sum + x);
        m.with(assigned.eq(1.0))
    })
}

/// No resource serves more than `capacity` people
fn constrain_capacities<Model: SolverModel>(
    model: Model,
    model_vars: &ModelVariables,
    populations: &[u64],
    capacity: f64,
) -> Model {
    let columns = model_vars.assign.first().map_or(0, Vec::len);
    (0..columns).fold(model, |m, j| {
        let load = model_vars
            .assign
            .iter()
            .zip(populations)
            .fold(Expression::from(0.0), |sum, (row, &p)| sum + row[j] * p as f64);
        m.with(load.leq(capacity))
    })
}

/// z >= D[i][j] * x[i][j]
///
/// x is binary and D is a constant, so the product stays linear. The
/// constraint is vacuous when x[i][j] = 0 because D >= 0 and z >= 0.
fn constrain_bottleneck<Model: SolverModel>(
    model: Model,
    model_vars: &ModelVariables,
    distances: &[Vec<f64>],
) -> Model {
    let z = model_vars.bottleneck;
    model_vars
        .assign
        .iter()
        .zip(distances)
        .flat_map(|(vars, row)| vars.iter().zip(row))
        .fold(model, |m, (&x, &d)| m.with(constraint!(z >= x * d)))
}

/// c[j] >= x[i][j] for every pair, and sum(c) == k
fn constrain_resource_selection<Model: SolverModel>(
    model: Model,
    model_vars: &ModelVariables,
    selection: &ResourceSelection,
) -> Model {
    let (Some(is_resource), ResourceSelection::Select { count }) =
        (&model_vars.is_resource, selection)
    else {
        return model;
    };

    let model = model_vars.assign.iter().fold(model, |m, row| {
        row.iter()
            .zip(is_resource)
            .fold(m, |m2, (&x, &c)| m2.with(constraint!(c >= x)))
    });

    let chosen = is_resource
        .iter()
        .fold(Expression::from(0.0), |sum, &c| sum + c);
    model.with(chosen.eq(*count as f64))
}

/// Read the solver's values back, re-check the invariants and compute statistics
fn extract_solution(
    problem: &Problem,
    solution: &impl LpSolution,
    model_vars: &ModelVariables,
    columns: &[usize],
    capacity: f64,
) -> Result<Solution> {
    let raw: Vec<Vec<f64>> = model_vars
        .assign
        .iter()
        .map(|row| row.iter().map(|&x| solution.value(x)).collect())
        .collect();
    let full_matrix = validate::check_assignment(&raw)?;

    // Keep only the columns of the resources actually in use
    let (resources, matrix) = match &model_vars.is_resource {
        None => (columns.to_vec(), full_matrix),
        Some(is_resource) => {
            let raw_chosen: Vec<f64> = is_resource.iter().map(|&c| solution.value(c)).collect();
            let chosen =
                validate::chosen_resources(&raw_chosen, problem.resources.count(), &full_matrix)?;
            let matrix = full_matrix
                .iter()
                .map(|row| chosen.iter().map(|&j| row[j]).collect())
                .collect();
            let resources = chosen.iter().map(|&j| columns[j]).collect();
            (resources, matrix)
        }
    };

    let loads = resource_loads(&matrix, &problem.populations);
    validate::check_capacities(&loads, capacity)?;

    let distances = problem.column_distances(&resources);
    let assignment: Vec<usize> = matrix
        .iter()
        .map(|row| row.iter().position(|&v| v == 1).unwrap_or_default())
        .collect();

    let mut total_distance = 0.0;
    let mut bottleneck = 0.0;
    let mut bottleneck_pair = BottleneckPair {
        municipality: 0,
        resource: assignment.first().copied().unwrap_or_default(),
    };
    for (i, &j) in assignment.iter().enumerate() {
        let d = distances[i][j];
        total_distance += d;
        if d > bottleneck {
            bottleneck = d;
            bottleneck_pair = BottleneckPair {
                municipality: i,
                resource: j,
            };
        }
    }

    validate::check_bottleneck(solution.value(model_vars.bottleneck), bottleneck)?;

    Ok(Solution {
        status: SolveStatus::Optimal,
        resources,
        assignment,
        matrix,
        loads,
        capacity,
        bottleneck,
        bottleneck_pair,
        average_distance: total_distance / problem.num_municipalities() as f64,
        total_distance,
        objective: bottleneck + problem.epsilon * total_distance,
    })
}

fn resource_loads(matrix: &[Vec<u8>], populations: &[u64]) -> Vec<u64> {
    let columns = matrix.first().map_or(0, Vec::len);
    (0..columns)
        .map(|j| {
            matrix
                .iter()
                .zip(populations)
                .filter(|(row, _)| row[j] == 1)
                .map(|(_, &p)| p)
                .sum()
        })
        .collect()
}
