//! Deterministic busy-wait workload. Burns CPU time in "ticks" — a
//! platform-independent unit calibrated once per host — so a task
//! advertised with a WCET in microseconds actually executes for that
//! long, wall-clock, on the target.
use std::cell::RefCell;
use std::hint::black_box;
use std::time::Instant;

use crate::spec::TaskKind;

/// Per-thread A/B/C matrices. Thread-local so concurrently running
/// workers never share or false-share this state; the orchestrator never
/// touches it.
struct TickState {
    size: usize,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
}

thread_local! {
    static TICK_STATE: RefCell<Option<TickState>> = const { RefCell::new(None) };
}

/// Initialize this thread's workload state. Must be called once before
/// the first `count_ticks`/`count_time*` call on a given thread.
pub fn tick_init(matrix_size: usize, kind: TaskKind, _target: Option<u32>) {
    if kind != TaskKind::Cpu {
        log::warn!("tick_init: kind {kind:?} has no in-process workload; using the cpu matrix kernel as a stand-in");
    }
    let n = matrix_size * matrix_size;
    let mut a = vec![0.0f64; n];
    let mut b = vec![0.0f64; n];
    for i in 0..matrix_size {
        a[i * matrix_size + i] = 1.0;
        b[i * matrix_size + i] = 1.0;
    }
    TICK_STATE.with(|cell| {
        *cell.borrow_mut() = Some(TickState { size: matrix_size, a, b, c: vec![0.0; n] });
    });
}

/// One primitive iteration: `C = A . B` over the calling thread's
/// matrices, then an approximate identity check. The return value
/// depends on the check so the optimizer cannot elide the multiply.
fn tick_once() -> bool {
    TICK_STATE.with(|cell| {
        let mut state = cell.borrow_mut();
        let state = state.as_mut().expect("tick_init must be called before count_ticks");
        let n = state.size;
        let (a, b, c) = black_box((&state.a, &state.b, &mut state.c));
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += a[i * n + k] * b[k * n + j];
                }
                c[i * n + j] = sum;
            }
        }
        const EPSILON: f64 = 1e-9;
        let is_identity = (0..n).all(|i| {
            (0..n).all(|j| {
                let expected = if i == j { 1.0 } else { 0.0 };
                (c[i * n + j] - expected).abs() < EPSILON
            })
        });
        black_box(is_identity)
    })
}

/// Run `n` primitive iterations.
pub fn count_ticks(n: u64) {
    for _ in 0..n {
        black_box(tick_once());
    }
}

/// Run `ticks_per_us * us` primitive iterations.
pub fn count_time_ticks(us: u64, ticks_per_us: f64) {
    let n = (us as f64 * ticks_per_us).round() as u64;
    count_ticks(n);
}

/// Busy-wait until at least `us` of elapsed wall-clock time has passed,
/// returning the number of iterations it took. Uses wall-clock rather
/// than a thread-CPU-time clock because the latter is not available
/// uniformly across platforms in std; on the Linux target this engine
/// runs on, a pinned, uncontended RT thread makes the two equivalent in
/// practice.
pub fn count_time(us: u64) -> u64 {
    let deadline = Instant::now() + std::time::Duration::from_micros(us);
    let mut n = 0u64;
    while Instant::now() < deadline {
        black_box(tick_once());
        n += 1;
    }
    n
}
