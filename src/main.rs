use std::fs::write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, warn};

use districting::data::{Dataset, DatasetPaths};
use districting::report::RenderRequest;
use districting::{DEFAULT_ALPHA, DEFAULT_EPSILON, Problem, ResourceSelection, Solution};

#[derive(Debug, Parser)]
#[command(
    name = "districting",
    version,
    about = "Assign municipalities to capacitated resources, minimizing the largest distance"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Solve a YAML problem file
    Solve {
        input: PathBuf,
        /// Write the render request for the solution to this YAML file
        #[arg(long)]
        render: Option<PathBuf>,
    },
    /// Solve a plain-text dataset
    Dataset(DatasetArgs),
}

#[derive(Debug, Args)]
struct DatasetArgs {
    #[arg(long)]
    distances: PathBuf,
    #[arg(long)]
    populations: PathBuf,
    #[arg(long)]
    names: Option<PathBuf>,
    #[arg(long)]
    coordinates: Option<PathBuf>,
    /// Fixed resource indices, e.g. 3,7,23,13,33
    #[arg(
        long,
        value_delimiter = ',',
        conflicts_with = "count",
        required_unless_present = "count"
    )]
    resources: Vec<usize>,
    /// Let the solver choose this many resources
    #[arg(long)]
    count: Option<usize>,
    #[arg(long, default_value_t = DEFAULT_ALPHA, allow_negative_numbers = true)]
    alpha: f64,
    #[arg(long, default_value_t = DEFAULT_EPSILON, allow_negative_numbers = true)]
    epsilon: f64,
    /// Stop the solver after this many seconds
    #[arg(long)]
    time_limit: Option<f64>,
    #[arg(long)]
    render: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(failure_code(&e)),
    }
}

/// 2 for an infeasible model, 1 for everything else
fn failure_code(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<districting::Error>() {
        Some(err) if err.is_infeasible() => {
            warn!("{err}; try a larger alpha or more resources");
            2
        }
        _ => {
            error!("{e:#}");
            1
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let (problem, render) = match cli.command {
        Command::Solve { input, render } => {
            let problem = Problem::from_yaml_file(&input)
                .with_context(|| format!("failed to load {}", input.display()))?;
            (problem, render)
        }
        Command::Dataset(args) => {
            let render = args.render.clone();
            (dataset_problem(args)?, render)
        }
    };

    let solution = problem.solve()?;
    println!("{}", serde_yaml::to_string(&solution)?);

    if let Some(path) = render {
        write_render_request(&path, &problem, &solution)?;
    }
    Ok(())
}

fn dataset_problem(args: DatasetArgs) -> Result<Problem> {
    let paths = DatasetPaths {
        distances: args.distances,
        populations: args.populations,
        names: args.names,
        coordinates: args.coordinates,
    };
    let resources = match args.count {
        Some(count) => ResourceSelection::Select { count },
        None => ResourceSelection::Fixed {
            indices: args.resources,
        },
    };
    let mut problem =
        Dataset::load(&paths)?.into_problem(resources, Some(args.alpha), Some(args.epsilon));
    problem.time_limit_seconds = args.time_limit;
    Ok(problem)
}

fn write_render_request(path: &Path, problem: &Problem, solution: &Solution) -> Result<()> {
    let request = RenderRequest::new(problem, solution);
    write(path, serde_yaml::to_string(&request)?)
        .with_context(|| format!("failed to write {}", path.display()))
}
