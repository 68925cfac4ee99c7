//! Host calibration: measures how many workload ticks this CPU can run
//! in a microsecond, so a WCET expressed in microseconds in a spec file
//! can be translated into a tick count at run time.
use std::time::Instant;

use crate::spec::TaskKind;
use crate::workload;

/// Run the tick workload for `duration_us` wall-clock microseconds and
/// return the measured ticks-per-microsecond rate for this thread's
/// current CPU and matrix size. Best-effort: run on the same affinity
/// and scheduling policy the real task will use for an accurate number,
/// but calibration itself never touches scheduler policy — it is meant
/// to be run ad hoc, separately from a DAG run.
pub fn calibrate(matrix_size: usize, duration_us: u64) -> f64 {
    workload::tick_init(matrix_size, TaskKind::Cpu, None);
    let start = Instant::now();
    let ticks = workload::count_time(duration_us);
    let elapsed_us = start.elapsed().as_micros() as f64;
    if elapsed_us <= 0.0 {
        0.0
    } else {
        ticks as f64 / elapsed_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrate_reports_a_positive_rate() {
        let rate = calibrate(4, 5_000);
        assert!(rate > 0.0, "calibration measured a non-positive tick rate: {rate}");
    }
}
