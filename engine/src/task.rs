//! A single DAG task's thread body: the SETUP → BARRIER_1 → PERIOD_INIT
//! → BARRIER_2 → ALIGN → LOOP → SHUTDOWN state machine.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Instant;

use crate::channel::RendezvousChannel;
use crate::edge::Edge;
use crate::period::PeriodDriver;
use crate::sched::{sched_apply, SchedPolicy};
use crate::spec::TaskKind;
use crate::workload;

/// Fixed slack applied once, right after `BARRIER_2`, before the
/// originator's schedule origin is considered final. Gives every task
/// time to finish `SETUP` under real-time scheduling before the clock
/// that response times are measured against starts ticking.
const ALIGN_SLACK_US: u64 = 100_000;

/// A task's position in the DAG, which determines which phases of the
/// state machine it actually participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No predecessors. Owns the period schedule, acquires the
    /// `start_gate` token before each release, and publishes the DAG's
    /// per-activation release time for every other task to read.
    Originator,
    Intermediate,
    /// No successors. Records one response time and one execution time
    /// per activation, then returns the token to `start_gate`.
    Sink,
}

/// Everything a task's thread body needs, gathered once at build time so
/// `Task::run` doesn't need to reach back into the DAG spec.
pub struct TaskConfig {
    pub index: usize,
    pub name: String,
    pub kind: TaskKind,
    pub role: Role,
    pub priority: u32,
    pub affinity: i32,
    pub matrix_size: usize,
    pub accelerator_target: Option<u32>,
    pub wcet_us: u64,
    pub expected_wcet_ratio: f64,
    /// SCHED_DEADLINE reservation parameters, used only when `priority`
    /// is 0 (fixed-priority tasks use `priority` instead).
    pub runtime_us: u64,
    pub deadline_us: u64,
    pub period_us: u64,
    /// End-to-end DAG deadline `D`; only consulted by the sink.
    pub dag_deadline_us: u64,
    /// `A = (hyperperiod_us / period_us) * repetitions`.
    pub activations: u64,
    pub ticks_per_us: f64,
    /// This task's own rendezvous channel, awaiting one push per
    /// predecessor. `None` for the originator, which has no predecessors.
    pub incoming: Option<Arc<RendezvousChannel>>,
    /// One edge per successor, in the order successors were discovered.
    pub outgoing: Vec<Arc<Edge>>,
    /// The DAG-wide single-in-flight gate: `Some` only for the
    /// originator (pops one token before each release) and the sink
    /// (pushes one token back after recording).
    pub start_gate: Option<Arc<RendezvousChannel>>,
    /// Where the sink appends one response time per activation. `Some`
    /// only for the sink.
    pub response_times_us: Option<Arc<Mutex<Vec<u64>>>>,
    /// Where this task appends its own measured execution time per
    /// activation. Populated for every task.
    pub exec_times_us: Arc<Mutex<Vec<u64>>>,
}

pub struct Task {
    config: TaskConfig,
}

impl Task {
    pub fn new(config: TaskConfig) -> Self {
        Self { config }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run this task's full lifecycle on the calling thread. Intended to
    /// be the closure body handed to `thread::Builder::spawn`.
    ///
    /// `setup_barrier` synchronizes every task past OS setup and past
    /// the originator's period-driver construction; `align_barrier`
    /// synchronizes every task immediately after the originator's
    /// schedule origin has been re-based by its fixed alignment slack.
    pub fn run(
        mut self,
        setup_barrier: Arc<Barrier>,
        align_barrier: Arc<Barrier>,
        start_time: Arc<AtomicU64>,
        origin_instant: Instant,
        stop: Arc<AtomicBool>,
    ) {
        // SETUP
        log::debug!(
            "task[{}] '{}' setup: affinity={} priority={}",
            self.config.index,
            self.config.name,
            self.config.affinity,
            self.config.priority
        );
        let policy = if self.config.priority > 0 {
            SchedPolicy::Fifo { priority: self.config.priority as i32 }
        } else {
            SchedPolicy::Deadline {
                runtime_ns: self.config.runtime_us * 1_000,
                deadline_ns: self.config.deadline_us * 1_000,
                period_ns: self.config.period_us * 1_000,
            }
        };
        sched_apply(self.config.affinity, policy);
        workload::tick_init(self.config.matrix_size, self.config.kind, self.config.accelerator_target);

        // BARRIER_1: every task has finished OS-level setup.
        setup_barrier.wait();

        let mut period = match self.config.role {
            // PERIOD_INIT: only the originator owns the canonical clock.
            Role::Originator => Some(PeriodDriver::period_init(self.config.period_us)),
            _ => None,
        };

        // BARRIER_2: the originator's period driver now exists; safe for
        // everyone to proceed to ALIGN.
        setup_barrier.wait();

        // ALIGN: the originator re-bases its schedule origin to a fixed
        // slack past construction, giving every task's SETUP time to
        // finish under real-time scheduling before any release is timed.
        if self.config.role == Role::Originator {
            period.as_mut().unwrap().align(ALIGN_SLACK_US);
        }
        align_barrier.wait();

        // LOOP
        for activation in 0..self.config.activations {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            let advanced = match self.config.role {
                Role::Originator => {
                    let release_instant = period.as_mut().unwrap().period_advance_and_wait();
                    match self.config.start_gate.as_ref().unwrap().pop(&stop) {
                        true => {
                            let release_us = release_instant.duration_since(origin_instant).as_micros() as u64;
                            start_time.store(release_us, Ordering::Release);
                            log::debug!(
                                "task[{}] originator activation {activation} released at period index {}",
                                self.config.index,
                                period.as_ref().unwrap().period_current()
                            );
                            true
                        }
                        false => false,
                    }
                }
                _ => self
                    .config
                    .incoming
                    .as_ref()
                    .expect("non-originator task must have an incoming channel")
                    .pop(&stop),
            };
            if !advanced {
                break;
            }

            let budget_us = (self.config.wcet_us as f64 * self.config.expected_wcet_ratio).round() as u64;
            let exec_start = Instant::now();
            workload::count_time_ticks(budget_us, self.config.ticks_per_us);
            let exec_us = exec_start.elapsed().as_micros() as u64;
            self.config.exec_times_us.lock().unwrap().push(exec_us);

            if let Role::Sink = self.config.role {
                let release_us = start_time.load(Ordering::Acquire);
                let now_us = origin_instant.elapsed().as_micros() as u64;
                let response_us = now_us.saturating_sub(release_us);
                if response_us > self.config.dag_deadline_us {
                    log::error!(
                        "task[{}] '{}' activation {activation}: response time {response_us}us exceeds DAG deadline {}us",
                        self.config.index,
                        self.config.name,
                        self.config.dag_deadline_us
                    );
                }
                self.config
                    .response_times_us
                    .as_ref()
                    .expect("sink task must be given a response-time log")
                    .lock()
                    .unwrap()
                    .push(response_us);

                if self.config.start_gate.as_ref().unwrap().push(0, &stop).is_none() {
                    break;
                }
            }

            let mut cancelled = false;
            for edge in &self.config.outgoing {
                edge.stamp(activation as u8);
                if edge.push(&stop).is_none() {
                    cancelled = true;
                    break;
                }
            }
            if cancelled {
                break;
            }
        }

        // SHUTDOWN: nothing to release explicitly — channels, edges and
        // barriers are all reference-counted and drop naturally once
        // every task's thread has returned.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config(role: Role, activations: u64) -> TaskConfig {
        TaskConfig {
            index: 0,
            name: "t".to_string(),
            kind: TaskKind::Cpu,
            role,
            priority: 1,
            affinity: -1,
            matrix_size: 2,
            accelerator_target: None,
            wcet_us: 100,
            expected_wcet_ratio: 1.0,
            runtime_us: 100,
            deadline_us: 1_000,
            period_us: 1_000,
            dag_deadline_us: 1_000,
            activations,
            ticks_per_us: 1.0,
            incoming: None,
            outgoing: vec![],
            start_gate: None,
            response_times_us: None,
            exec_times_us: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn gate_with_token() -> Arc<RendezvousChannel> {
        let gate = Arc::new(RendezvousChannel::new(1));
        gate.push(0, &AtomicBool::new(false));
        gate
    }

    #[test]
    fn originator_alone_runs_its_repetitions_and_returns() {
        let gate = gate_with_token();
        let mut cfg = config(Role::Originator, 3);
        cfg.start_gate = Some(Arc::clone(&gate));
        let exec_times = Arc::clone(&cfg.exec_times_us);
        let task = Task::new(cfg);
        let setup_barrier = Arc::new(Barrier::new(1));
        let align_barrier = Arc::new(Barrier::new(1));
        let start_time = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let origin = Instant::now();

        // The originator pops one token per activation but nothing ever
        // refills it past the first, so only the first activation
        // actually proceeds and the rest block until `stop` is set.
        let stop_clone = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            task.run(setup_barrier, align_barrier, start_time, origin, stop_clone);
        });
        thread::sleep(std::time::Duration::from_millis(150));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(!exec_times.lock().unwrap().is_empty());
    }

    #[test]
    fn sink_records_one_response_and_exec_time_per_activation() {
        let incoming = Arc::new(RendezvousChannel::new(1));
        let gate = Arc::new(RendezvousChannel::new(1));
        let mut cfg = config(Role::Sink, 2);
        cfg.incoming = Some(Arc::clone(&incoming));
        cfg.start_gate = Some(Arc::clone(&gate));
        cfg.response_times_us = Some(Arc::new(Mutex::new(Vec::new())));
        let response_times = Arc::clone(cfg.response_times_us.as_ref().unwrap());
        let exec_times = Arc::clone(&cfg.exec_times_us);
        let task = Task::new(cfg);

        let setup_barrier = Arc::new(Barrier::new(1));
        let align_barrier = Arc::new(Barrier::new(1));
        let start_time = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let origin = Instant::now();

        let handle = thread::spawn(move || {
            task.run(setup_barrier, align_barrier, start_time, origin, stop);
        });

        // Feed the sink's single predecessor slot and drain the gate
        // token it returns, for each activation.
        for _ in 0..2 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            incoming.push(0, &AtomicBool::new(false));
            gate.pop(&AtomicBool::new(false));
        }
        handle.join().unwrap();
        assert_eq!(response_times.lock().unwrap().len(), 2);
        assert_eq!(exec_times.lock().unwrap().len(), 2);
    }

    #[test]
    fn stop_flag_halts_the_loop_early() {
        let gate = gate_with_token();
        let mut cfg = config(Role::Originator, 1_000_000);
        cfg.start_gate = Some(gate);
        let task = Task::new(cfg);
        let setup_barrier = Arc::new(Barrier::new(1));
        let align_barrier = Arc::new(Barrier::new(1));
        let start_time = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let origin = Instant::now();

        let stop_clone = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            task.run(setup_barrier, align_barrier, start_time, origin, stop_clone);
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
