//! DAG specification: the read-only data model handed to the orchestrator,
//! and a YAML-backed loader for it.
use std::fs;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::channel::MAX_FAN_IN;

/// How a task's work is actually carried out. Only `Cpu` is executed
/// in-process by this core; the others are accepted so a specification
/// written for the accelerator paths still parses, but a task of that
/// kind can only appear as an intermediate node, never as the originator
/// or the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Cpu,
    Omp,
    Fred,
}

fn default_matrix_size() -> usize {
    4
}

fn default_expected_wcet_ratio() -> f64 {
    1.0
}

/// One DAG node as written in the specification file. Units are
/// microseconds unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub priority: u32,
    pub wcet_us: u64,
    pub runtime_us: u64,
    pub deadline_us: u64,
    #[serde(default = "default_affinity")]
    pub affinity: i32,
    #[serde(default = "default_matrix_size")]
    pub matrix_size: usize,
    #[serde(default)]
    pub accelerator_target: Option<u32>,
    #[serde(default)]
    pub ticks_per_us: Option<f64>,
    #[serde(default = "default_expected_wcet_ratio")]
    pub expected_wcet_ratio: f64,
}

fn default_affinity() -> i32 {
    -1
}

/// A whole DAG: name, timing envelope, task list and adjacency matrix.
/// `adjacency[i][j]` is the message size in bytes of the edge from task
/// `i` to task `j`, or 0 if no such edge exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagSpec {
    pub name: String,
    pub period_us: u64,
    pub deadline_us: u64,
    pub hyperperiod_us: u64,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    pub tasks: Vec<TaskSpec>,
    pub adjacency: Vec<Vec<u32>>,
}

fn default_repetitions() -> u32 {
    1
}

/// Why a `DagSpec` was rejected. Configuration errors are always fatal at
/// build time, before any thread is spawned.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecError {
    TooManyTasks { n: usize, max: usize },
    BadAdjacencyShape,
    NoOriginator,
    MultipleOriginators(Vec<String>),
    NoSink,
    MultipleSinks(Vec<String>),
    OriginatorNotCpu(String),
    SinkNotCpu(String),
    HyperperiodNotMultipleOfPeriod { hyperperiod_us: u64, period_us: u64 },
    ZeroRepetitions,
    FanInTooWide { task: String, fan_in: usize, max: usize },
    DeadlineExceedsPeriod { task: String, deadline_us: u64, period_us: u64 },
    ExpectedWcetRatioOutOfRange { task: String, ratio: f64 },
}

impl std::fmt::Display for SpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecError::TooManyTasks { n, max } => {
                write!(f, "DAG has {n} tasks, exceeding the channel fan-in capacity of {max}")
            }
            SpecError::BadAdjacencyShape => {
                write!(f, "adjacency matrix is not N x N for the declared task count")
            }
            SpecError::NoOriginator => write!(f, "no task with zero incoming edges (no originator)"),
            SpecError::MultipleOriginators(names) => {
                write!(f, "multiple originators found: {}", names.join(", "))
            }
            SpecError::NoSink => write!(f, "no task with zero outgoing edges (no sink)"),
            SpecError::MultipleSinks(names) => write!(f, "multiple sinks found: {}", names.join(", ")),
            SpecError::OriginatorNotCpu(name) => {
                write!(f, "originator '{name}' must be of kind cpu")
            }
            SpecError::SinkNotCpu(name) => write!(f, "sink '{name}' must be of kind cpu"),
            SpecError::HyperperiodNotMultipleOfPeriod { hyperperiod_us, period_us } => write!(
                f,
                "hyperperiod {hyperperiod_us} is not a multiple of period {period_us}"
            ),
            SpecError::ZeroRepetitions => write!(f, "repetitions must be at least 1"),
            SpecError::FanInTooWide { task, fan_in, max } => write!(
                f,
                "task '{task}' has {fan_in} incoming edges, exceeding channel capacity {max}"
            ),
            SpecError::DeadlineExceedsPeriod { task, deadline_us, period_us } => write!(
                f,
                "task '{task}' relative deadline {deadline_us}us exceeds DAG period {period_us}us"
            ),
            SpecError::ExpectedWcetRatioOutOfRange { task, ratio } => write!(
                f,
                "task '{task}' expected_wcet_ratio {ratio} is not in (0, 1]"
            ),
        }
    }
}

impl std::error::Error for SpecError {}

/// Load and parse a DAG specification from a YAML file. Does not
/// validate the §3 invariants — call `validate` before building a
/// runtime graph from the result.
pub fn load_from_yaml(file_path: impl AsRef<Path>) -> DagSpec {
    let path = file_path.as_ref();
    let contents = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("cannot read DAG spec file {}: {err}", path.display()));
    serde_yaml::from_str(&contents)
        .unwrap_or_else(|err| panic!("malformed DAG spec file {}: {err}", path.display()))
}

/// Check the §3 invariants. This is the only place configuration errors
/// are detected; everything downstream assumes a validated spec.
pub fn validate(spec: &DagSpec) -> Result<(), SpecError> {
    let n = spec.tasks.len();
    if n == 0 || n > MAX_FAN_IN {
        return Err(SpecError::TooManyTasks { n, max: MAX_FAN_IN });
    }
    if spec.adjacency.len() != n || spec.adjacency.iter().any(|row| row.len() != n) {
        return Err(SpecError::BadAdjacencyShape);
    }
    if spec.repetitions == 0 {
        return Err(SpecError::ZeroRepetitions);
    }
    if spec.period_us == 0 || spec.hyperperiod_us % spec.period_us != 0 {
        return Err(SpecError::HyperperiodNotMultipleOfPeriod {
            hyperperiod_us: spec.hyperperiod_us,
            period_us: spec.period_us,
        });
    }

    let has_incoming: Vec<bool> = (0..n)
        .map(|t| (0..n).any(|s| spec.adjacency[s][t] > 0))
        .collect();
    let has_outgoing: Vec<bool> = (0..n)
        .map(|s| (0..n).any(|t| spec.adjacency[s][t] > 0))
        .collect();

    let originators: Vec<&str> = (0..n)
        .filter(|&t| !has_incoming[t])
        .map(|t| spec.tasks[t].name.as_str())
        .collect();
    match originators.len() {
        0 => return Err(SpecError::NoOriginator),
        1 => {}
        _ => {
            return Err(SpecError::MultipleOriginators(
                originators.iter().map(|s| s.to_string()).collect(),
            ))
        }
    }

    let sinks: Vec<&str> = (0..n)
        .filter(|&t| !has_outgoing[t])
        .map(|t| spec.tasks[t].name.as_str())
        .collect();
    match sinks.len() {
        0 => return Err(SpecError::NoSink),
        1 => {}
        _ => return Err(SpecError::MultipleSinks(sinks.iter().map(|s| s.to_string()).collect())),
    }

    let originator_idx = (0..n).find(|&t| !has_incoming[t]).unwrap();
    if spec.tasks[originator_idx].kind != TaskKind::Cpu {
        return Err(SpecError::OriginatorNotCpu(spec.tasks[originator_idx].name.clone()));
    }
    let sink_idx = (0..n).find(|&t| !has_outgoing[t]).unwrap();
    if spec.tasks[sink_idx].kind != TaskKind::Cpu {
        return Err(SpecError::SinkNotCpu(spec.tasks[sink_idx].name.clone()));
    }

    for t in 0..n {
        let fan_in = (0..n).filter(|&s| spec.adjacency[s][t] > 0).count();
        if fan_in > MAX_FAN_IN {
            return Err(SpecError::FanInTooWide {
                task: spec.tasks[t].name.clone(),
                fan_in,
                max: MAX_FAN_IN,
            });
        }
        if spec.tasks[t].deadline_us > spec.period_us {
            return Err(SpecError::DeadlineExceedsPeriod {
                task: spec.tasks[t].name.clone(),
                deadline_us: spec.tasks[t].deadline_us,
                period_us: spec.period_us,
            });
        }
        let ratio = spec.tasks[t].expected_wcet_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(SpecError::ExpectedWcetRatioOutOfRange {
                task: spec.tasks[t].name.clone(),
                ratio,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, kind: TaskKind) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            kind,
            priority: 0,
            wcet_us: 1000,
            runtime_us: 1000,
            deadline_us: 10000,
            affinity: -1,
            matrix_size: 4,
            accelerator_target: None,
            ticks_per_us: None,
            expected_wcet_ratio: 1.0,
        }
    }

    fn chain_of_three() -> DagSpec {
        DagSpec {
            name: "chain3".to_string(),
            period_us: 100_000,
            deadline_us: 100_000,
            hyperperiod_us: 100_000,
            repetitions: 3,
            tasks: vec![
                task("origin", TaskKind::Cpu),
                task("mid", TaskKind::Cpu),
                task("sink", TaskKind::Cpu),
            ],
            adjacency: vec![vec![0, 8, 0], vec![0, 0, 8], vec![0, 0, 0]],
        }
    }

    #[test]
    fn valid_chain_passes() {
        assert!(validate(&chain_of_three()).is_ok());
    }

    #[test]
    fn missing_sink_is_rejected() {
        let mut spec = chain_of_three();
        spec.name = "no_sink".to_string();
        // task 1 (index 1) gets a self-loop-like extra outgoing edge to
        // itself's own successor so every task keeps an outgoing edge.
        spec.adjacency = vec![vec![0, 4, 0], vec![0, 4, 0], vec![0, 0, 0]];
        assert_eq!(validate(&spec), Err(SpecError::NoSink));
    }

    #[test]
    fn multiple_originators_rejected() {
        let mut spec = chain_of_three();
        spec.adjacency = vec![vec![0, 0, 8], vec![0, 0, 8], vec![0, 0, 0]];
        assert_eq!(
            validate(&spec),
            Err(SpecError::MultipleOriginators(vec!["origin".to_string(), "mid".to_string()]))
        );
    }

    #[test]
    fn hyperperiod_must_be_multiple_of_period() {
        let mut spec = chain_of_three();
        spec.hyperperiod_us = 150_000;
        assert_eq!(
            validate(&spec),
            Err(SpecError::HyperperiodNotMultipleOfPeriod {
                hyperperiod_us: 150_000,
                period_us: 100_000
            })
        );
    }

    #[test]
    fn deadline_beyond_period_rejected() {
        let mut spec = chain_of_three();
        spec.tasks[0].deadline_us = 200_000;
        assert!(matches!(validate(&spec), Err(SpecError::DeadlineExceedsPeriod { .. })));
    }

    #[test]
    fn expected_wcet_ratio_out_of_range_rejected() {
        let mut spec = chain_of_three();
        spec.tasks[0].expected_wcet_ratio = 0.0;
        assert!(matches!(validate(&spec), Err(SpecError::ExpectedWcetRatioOutOfRange { .. })));
    }

    #[test]
    fn load_from_yaml_round_trips_sample() {
        let spec = load_from_yaml("tests/sample_dags/chain_of_three.yaml");
        assert_eq!(spec.name, "chain3");
        assert_eq!(spec.tasks.len(), 3);
        validate(&spec).expect("sample DAG should be valid");
    }
}
