//! Loader for the plain-text municipality dataset.
//!
//! Four files describe a dataset of N municipalities:
//! - distances: an N×N matrix of whitespace-separated numbers, row-major
//! - names: one name per non-empty line
//! - populations: N comma-separated integers
//! - coordinates: 2N comma-separated numbers, one (x, y) pair per municipality
//!
//! Tokens that are not numbers (headers, stray separators) are skipped.
//! N is taken from the populations file.

use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{DEFAULT_ALPHA, DEFAULT_EPSILON, Error, Problem, ResourceSelection, Result};

#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub distances: PathBuf,
    pub populations: PathBuf,
    pub names: Option<PathBuf>,
    pub coordinates: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub distances: Vec<Vec<f64>>,
    pub populations: Vec<u64>,
    pub names: Option<Vec<String>>,
    pub coordinates: Option<Vec<[f64; 2]>>,
}

impl Dataset {
    pub fn load(paths: &DatasetPaths) -> Result<Dataset> {
        let populations = parse_populations(&read(&paths.populations)?)?;
        let n = populations.len();
        let distances = parse_distances(&read(&paths.distances)?, n)?;

        let names = match &paths.names {
            Some(path) => {
                let names = parse_names(&read(path)?);
                if names.len() != n {
                    return Err(Error::shape("names", n, names.len()));
                }
                Some(names)
            }
            None => None,
        };
        let coordinates = paths
            .coordinates
            .as_ref()
            .map(|path| parse_coordinates(&read(path)?, n))
            .transpose()?;

        debug!(municipalities = n, "loaded dataset");
        Ok(Dataset {
            distances,
            populations,
            names,
            coordinates,
        })
    }

    /// Combine the arrays with solve parameters; `None` picks the defaults
    pub fn into_problem(
        self,
        resources: ResourceSelection,
        alpha: Option<f64>,
        epsilon: Option<f64>,
    ) -> Problem {
        Problem {
            distances: self.distances,
            populations: self.populations,
            names: self.names,
            coordinates: self.coordinates,
            resources,
            alpha: alpha.unwrap_or(DEFAULT_ALPHA),
            epsilon: epsilon.unwrap_or(DEFAULT_EPSILON),
            time_limit_seconds: None,
        }
    }
}

fn read(path: &Path) -> Result<String> {
    read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn numeric_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> impl Iterator<Item = &'a str> {
    tokens
        .map(str::trim)
        .filter(|token| token.parse::<f64>().is_ok())
}

pub fn parse_distances(text: &str, n: usize) -> Result<Vec<Vec<f64>>> {
    let values: Vec<f64> = numeric_tokens(text.split_whitespace())
        .filter_map(|token| token.parse().ok())
        .collect();
    if values.len() != n * n {
        return Err(Error::shape(
            "distances",
            format!("{} values ({n}x{n})", n * n),
            format!("{} values", values.len()),
        ));
    }
    Ok(values.chunks(n.max(1)).map(<[f64]>::to_vec).collect())
}

pub fn parse_names(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

pub fn parse_populations(text: &str) -> Result<Vec<u64>> {
    numeric_tokens(text.split(','))
        .map(|token| {
            token.parse::<u64>().map_err(|_| {
                Error::InvalidData(format!(
                    "population {token:?} is not a non-negative integer"
                ))
            })
        })
        .collect()
}

pub fn parse_coordinates(text: &str, n: usize) -> Result<Vec<[f64; 2]>> {
    let values: Vec<f64> = numeric_tokens(text.split(|c: char| c == ',' || c.is_whitespace()))
        .filter_map(|token| token.parse().ok())
        .collect();
    if values.len() != 2 * n {
        return Err(Error::shape(
            "coordinates",
            format!("{} values ({n}x2)", 2 * n),
            format!("{} values", values.len()),
        ));
    }
    Ok(values.chunks(2).map(|pair| [pair[0], pair[1]]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;

    #[test]
    fn distances_reshape_row_major() {
        let text = "0 1.5 2\n1.5 0 3\n2 3 0\n";
        let distances = parse_distances(text, 3).unwrap();
        assert_eq!(distances[0], vec![0.0, 1.5, 2.0]);
        assert_eq!(distances[1][2], 3.0);
        assert_eq!(distances[2], vec![2.0, 3.0, 0.0]);
    }

    #[test]
    fn distances_skip_non_numeric_tokens() {
        let text = "from/to a b\na 0 4\nb 4 0";
        assert_eq!(
            parse_distances(text, 2).unwrap(),
            vec![vec![0.0, 4.0], vec![4.0, 0.0]]
        );
    }

    #[test]
    fn distances_must_fill_the_matrix() {
        let err = parse_distances("0 1 1", 2).unwrap_err();
        assert!(matches!(err, Error::DataShape { what: "distances", .. }), "{err}");
    }

    #[test]
    fn populations_are_comma_separated() {
        assert_eq!(
            parse_populations("86000, 29000,\n 64000,").unwrap(),
            vec![86000, 29000, 64000]
        );
        assert!(matches!(
            parse_populations("10, -3"),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn names_ignore_blank_lines() {
        assert_eq!(
            parse_names("Antony\n\nBagneux\r\n  Clamart \n"),
            vec!["Antony", "Bagneux", "Clamart"]
        );
    }

    #[test]
    fn coordinates_pair_up() {
        let coordinates = parse_coordinates("10,20,\n30,40\n", 2).unwrap();
        assert_eq!(coordinates, vec![[10.0, 20.0], [30.0, 40.0]]);
        assert!(matches!(
            parse_coordinates("10,20,30", 2),
            Err(Error::DataShape { what: "coordinates", .. })
        ));
    }

    #[test]
    fn loads_dataset_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DatasetPaths {
            distances: dir.path().join("distances.txt"),
            populations: dir.path().join("populations.txt"),
            names: Some(dir.path().join("names.txt")),
            coordinates: Some(dir.path().join("coordinates.txt")),
        };
        write(&paths.distances, "0 2 7\n2 0 5\n7 5 0\n").unwrap();
        write(&paths.populations, "100,200,300").unwrap();
        write(paths.names.as_ref().unwrap(), "north\ncenter\nsouth\n").unwrap();
        write(paths.coordinates.as_ref().unwrap(), "0,0,\n0,2,\n0,7").unwrap();

        let dataset = Dataset::load(&paths).unwrap();
        assert_eq!(dataset.populations, vec![100, 200, 300]);
        assert_eq!(dataset.distances[2], vec![7.0, 5.0, 0.0]);
        assert_eq!(dataset.names.as_ref().unwrap()[1], "center");
        assert_eq!(dataset.coordinates.as_ref().unwrap()[2], [0.0, 7.0]);

        let problem = dataset.into_problem(ResourceSelection::Select { count: 2 }, None, Some(0.0));
        assert_eq!(problem.alpha, DEFAULT_ALPHA);
        assert_eq!(problem.epsilon, 0.0);
        assert_eq!(problem.num_municipalities(), 3);
    }

    #[test]
    fn mismatched_names_file_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DatasetPaths {
            distances: dir.path().join("distances.txt"),
            populations: dir.path().join("populations.txt"),
            names: Some(dir.path().join("names.txt")),
            coordinates: None,
        };
        write(&paths.distances, "0 1\n1 0\n").unwrap();
        write(&paths.populations, "1,1").unwrap();
        write(paths.names.as_ref().unwrap(), "only one\n").unwrap();

        let err = Dataset::load(&paths).unwrap_err();
        assert!(matches!(err, Error::DataShape { what: "names", .. }), "{err}");
    }

    #[test]
    fn missing_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DatasetPaths {
            distances: dir.path().join("distances.txt"),
            populations: dir.path().join("missing.txt"),
            names: None,
            coordinates: None,
        };
        match Dataset::load(&paths) {
            Err(Error::Io { path, .. }) => assert_eq!(path, paths.populations),
            other => panic!("expected an io error, got {other:?}"),
        }
    }
}
