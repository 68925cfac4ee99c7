//! Orchestrator: turns a validated `DagSpec` into a runnable set of
//! `Task` threads wired together by `RendezvousChannel`s and `Edge`s,
//! runs them to completion, and hands back the sink's response times
//! plus every task's measured execution times.
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Instant;

use crate::channel::RendezvousChannel;
use crate::edge::Edge;
use crate::graph::{build_topology, GraphExtension};
use crate::spec::DagSpec;
use crate::task::{Role, Task, TaskConfig};

/// A `start_gate` bounds the whole DAG to one in-flight activation: the
/// originator must acquire its single token before releasing the next
/// activation, and the sink returns the token once it has recorded that
/// activation's result.
const START_GATE_CAPACITY: usize = 1;

/// The result of running a `DagRuntime` to completion (or until
/// cancelled).
pub struct RunResult {
    /// One entry per completed activation, in order.
    pub response_times_us: Vec<u64>,
    /// One `(task name, execution times)` entry per task, in task-index
    /// order; each inner vec has one entry per activation that task
    /// completed before the run ended.
    pub task_exec_times_us: Vec<(String, Vec<u64>)>,
}

/// A built, not-yet-run DAG: one `TaskConfig` per node plus its name, and
/// the output handles that need to survive past `Task::new` consuming
/// each config.
pub struct DagRuntime {
    name: String,
    configs: Vec<TaskConfig>,
    response_times: Arc<Mutex<Vec<u64>>>,
    exec_times: Vec<(String, Arc<Mutex<Vec<u64>>>)>,
}

/// Assemble channels, edges and per-task configs from a validated spec.
/// Panics if `spec` was never passed through `engine::spec::validate` —
/// this is an internal consistency check, not a user-facing error path.
pub fn build(spec: &DagSpec, ticks_per_us: f64) -> DagRuntime {
    let g = build_topology(spec);
    let n = spec.tasks.len();
    let activations = (spec.hyperperiod_us / spec.period_us) * spec.repetitions as u64;

    let channels: Vec<Arc<RendezvousChannel>> = (0..n)
        .map(|t| {
            let fan_in = g.get_pre_nodes_ascending(petgraph::graph::NodeIndex::new(t)).len();
            Arc::new(RendezvousChannel::new(fan_in.max(1)))
        })
        .collect();

    // For every (predecessor, successor) pair, the predecessor's outgoing
    // edge pushes into the slot matching the predecessor's ascending rank
    // among the successor's predecessors.
    let mut outgoing: Vec<Vec<Arc<Edge>>> = vec![Vec::new(); n];
    for t in 0..n {
        let pre = g.get_pre_nodes_ascending(petgraph::graph::NodeIndex::new(t));
        for (slot, &source) in pre.iter().enumerate() {
            let size = spec.adjacency[source.index()][t] as usize;
            let edge = Arc::new(Edge::new(source.index(), t, slot, size.max(1), Arc::clone(&channels[t])));
            outgoing[source.index()].push(edge);
        }
    }

    let sources = g.get_source_nodes();
    let sinks = g.get_sink_nodes();
    assert_eq!(sources.len(), 1, "a validated DagSpec must have exactly one originator");
    assert_eq!(sinks.len(), 1, "a validated DagSpec must have exactly one sink");
    let origin_idx = sources[0].index();
    let sink_idx = sinks[0].index();

    let start_gate = Arc::new(RendezvousChannel::new(START_GATE_CAPACITY));
    // Pre-push the single token so the originator's first acquire in the
    // loop doesn't need to wait for a sink that hasn't run yet.
    start_gate.push(0, &AtomicBool::new(false));

    let response_times = Arc::new(Mutex::new(Vec::new()));
    let mut exec_times = Vec::with_capacity(n);

    let configs = spec
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let role = if i == origin_idx {
                Role::Originator
            } else if i == sink_idx {
                Role::Sink
            } else {
                Role::Intermediate
            };
            let incoming = if role == Role::Originator { None } else { Some(Arc::clone(&channels[i])) };
            let task_exec_times = Arc::new(Mutex::new(Vec::new()));
            exec_times.push((t.name.clone(), Arc::clone(&task_exec_times)));
            TaskConfig {
                index: i,
                name: t.name.clone(),
                kind: t.kind,
                role,
                priority: t.priority,
                affinity: t.affinity,
                matrix_size: t.matrix_size,
                accelerator_target: t.accelerator_target,
                wcet_us: t.wcet_us,
                expected_wcet_ratio: t.expected_wcet_ratio,
                runtime_us: t.runtime_us,
                deadline_us: t.deadline_us,
                period_us: spec.period_us,
                dag_deadline_us: spec.deadline_us,
                activations,
                ticks_per_us: t.ticks_per_us.unwrap_or(ticks_per_us),
                incoming,
                outgoing: std::mem::take(&mut outgoing[i]),
                start_gate: match role {
                    Role::Originator | Role::Sink => Some(Arc::clone(&start_gate)),
                    Role::Intermediate => None,
                },
                response_times_us: if role == Role::Sink { Some(Arc::clone(&response_times)) } else { None },
                exec_times_us: task_exec_times,
            }
        })
        .collect();

    DagRuntime { name: spec.name.clone(), configs, response_times, exec_times }
}

impl DagRuntime {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn every task's thread, run the DAG to completion (or until
    /// `stop` is observed), and return the sink's recorded response
    /// times together with every task's recorded execution times.
    pub fn run(self, stop: Arc<AtomicBool>) -> RunResult {
        let n = self.configs.len();
        let setup_barrier = Arc::new(Barrier::new(n));
        let align_barrier = Arc::new(Barrier::new(n));
        let start_time = Arc::new(AtomicU64::new(0));
        let origin_instant = Instant::now();

        let handles: Vec<_> = self
            .configs
            .into_iter()
            .map(|cfg| {
                let task = Task::new(cfg);
                let setup_barrier = Arc::clone(&setup_barrier);
                let align_barrier = Arc::clone(&align_barrier);
                let start_time = Arc::clone(&start_time);
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name(task.name().to_string())
                    .spawn(move || task.run(setup_barrier, align_barrier, start_time, origin_instant, stop))
                    .expect("failed to spawn task thread")
            })
            .collect();

        for handle in handles {
            handle.join().expect("task thread panicked");
        }

        let response_times_us = Arc::try_unwrap(self.response_times)
            .expect("all task threads have joined; no other Arc clone can remain")
            .into_inner()
            .unwrap();
        let task_exec_times_us = self
            .exec_times
            .into_iter()
            .map(|(name, times)| {
                let times = Arc::try_unwrap(times)
                    .expect("all task threads have joined; no other Arc clone can remain")
                    .into_inner()
                    .unwrap();
                (name, times)
            })
            .collect();

        RunResult { response_times_us, task_exec_times_us }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{TaskKind, TaskSpec};

    fn task(name: &str) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            kind: TaskKind::Cpu,
            priority: 1,
            wcet_us: 100,
            runtime_us: 100,
            deadline_us: 5_000,
            affinity: -1,
            matrix_size: 2,
            accelerator_target: None,
            ticks_per_us: Some(1.0),
            expected_wcet_ratio: 1.0,
        }
    }

    fn chain_of_three(period_us: u64, hyperperiod_us: u64, repetitions: u32) -> DagSpec {
        DagSpec {
            name: "chain3".to_string(),
            period_us,
            deadline_us: period_us,
            hyperperiod_us,
            repetitions,
            tasks: vec![task("origin"), task("mid"), task("sink")],
            adjacency: vec![vec![0, 8, 0], vec![0, 0, 8], vec![0, 0, 0]],
        }
    }

    #[test]
    fn chain_of_three_runs_to_completion_and_records_responses() {
        let spec = chain_of_three(5_000, 5_000, 3);
        crate::spec::validate(&spec).unwrap();
        let runtime = build(&spec, 1.0);
        let stop = Arc::new(AtomicBool::new(false));
        let result = runtime.run(stop);
        assert_eq!(result.response_times_us.len(), 3);
        assert_eq!(result.task_exec_times_us.len(), 3);
        for (_, times) in &result.task_exec_times_us {
            assert_eq!(times.len(), 3);
        }
    }

    #[test]
    fn activation_count_follows_hyperperiod_over_period_times_repetitions() {
        // H = 4P, R = 2 => A = 8 activations, not 2.
        let spec = chain_of_three(1_000, 4_000, 2);
        crate::spec::validate(&spec).unwrap();
        let runtime = build(&spec, 1.0);
        let stop = Arc::new(AtomicBool::new(false));
        let result = runtime.run(stop);
        assert_eq!(result.response_times_us.len(), 8);
    }

    #[test]
    fn diamond_fan_in_sink_waits_for_both_predecessors() {
        let mut spec = chain_of_three(5_000, 5_000, 3);
        spec.name = "diamond".to_string();
        spec.tasks.push(task("d"));
        spec.adjacency = vec![
            vec![0, 8, 8, 0],
            vec![0, 0, 0, 8],
            vec![0, 0, 0, 8],
            vec![0, 0, 0, 0],
        ];
        crate::spec::validate(&spec).unwrap();
        let runtime = build(&spec, 1.0);
        let stop = Arc::new(AtomicBool::new(false));
        let result = runtime.run(stop);
        assert_eq!(result.response_times_us.len(), 3);
    }
}
