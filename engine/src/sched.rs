//! Applies real-time OS scheduling policy and CPU affinity to the
//! calling thread. `SCHED_DEADLINE` has no wrapper in the `libc` crate,
//! so it goes through the raw `sched_setattr(2)` syscall directly.
use std::process;

/// What to apply to the calling thread before it starts executing its
/// workload. `Fifo` uses a fixed integer priority; `Deadline` uses the
/// three-parameter EDF reservation (runtime/deadline/period, all in
/// nanoseconds).
#[derive(Debug, Clone, Copy)]
pub enum SchedPolicy {
    Fifo { priority: i32 },
    Deadline { runtime_ns: u64, deadline_ns: u64, period_ns: u64 },
    Other,
}

/// Pin the calling thread to a single CPU and apply `policy`. Fatal on
/// failure: a task that silently keeps a non-RT policy would invalidate
/// every timing measurement taken downstream, so this logs and exits
/// the process rather than letting the task proceed degraded.
pub fn sched_apply(affinity: i32, policy: SchedPolicy) {
    if affinity >= 0 {
        set_affinity(affinity as usize);
    }
    match policy {
        SchedPolicy::Fifo { priority } => set_fifo(priority),
        SchedPolicy::Deadline { runtime_ns, deadline_ns, period_ns } => {
            set_deadline(runtime_ns, deadline_ns, period_ns)
        }
        SchedPolicy::Other => {}
    }
}

#[cfg(target_os = "linux")]
fn set_affinity(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            log::error!("sched_setaffinity(cpu={cpu}) failed: {}", std::io::Error::last_os_error());
            process::exit(1);
        }
    }
}

#[cfg(target_os = "linux")]
fn set_fifo(priority: i32) {
    unsafe {
        let param = libc::sched_param { sched_priority: priority };
        let rc = libc::sched_setscheduler(0, libc::SCHED_FIFO, &param);
        if rc != 0 {
            log::error!("sched_setscheduler(SCHED_FIFO, priority={priority}) failed: {}", std::io::Error::last_os_error());
            process::exit(1);
        }
    }
}

/// Mirrors `struct sched_attr` from `<linux/sched/types.h>`. Not in
/// `libc`, so declared here to match the kernel ABI exactly.
#[cfg(target_os = "linux")]
#[repr(C)]
struct SchedAttr {
    size: u32,
    sched_policy: u32,
    sched_flags: u64,
    sched_nice: i32,
    sched_priority: u32,
    sched_runtime: u64,
    sched_deadline: u64,
    sched_period: u64,
}

#[cfg(target_os = "linux")]
const SCHED_DEADLINE: u32 = 6;

#[cfg(target_os = "linux")]
fn set_deadline(runtime_ns: u64, deadline_ns: u64, period_ns: u64) {
    let attr = SchedAttr {
        size: std::mem::size_of::<SchedAttr>() as u32,
        sched_policy: SCHED_DEADLINE,
        sched_flags: 0,
        sched_nice: 0,
        sched_priority: 0,
        sched_runtime: runtime_ns,
        sched_deadline: deadline_ns,
        sched_period: period_ns,
    };
    let rc = unsafe { libc::syscall(libc::SYS_sched_setattr, 0, &attr as *const SchedAttr, 0u32) };
    if rc != 0 {
        log::error!(
            "sched_setattr(SCHED_DEADLINE, runtime={runtime_ns}, deadline={deadline_ns}, period={period_ns}) failed: {}",
            std::io::Error::last_os_error()
        );
        process::exit(1);
    }
}

#[cfg(not(target_os = "linux"))]
fn set_affinity(_cpu: usize) {
    log::warn!("CPU affinity is only applied on Linux; ignoring on this platform");
}

#[cfg(not(target_os = "linux"))]
fn set_fifo(_priority: i32) {
    log::warn!("SCHED_FIFO is only applied on Linux; running at the default scheduling policy");
}

#[cfg(not(target_os = "linux"))]
fn set_deadline(_runtime_ns: u64, _deadline_ns: u64, _period_ns: u64) {
    log::warn!("SCHED_DEADLINE is only applied on Linux; running at the default scheduling policy");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_policy_with_negative_affinity_is_a_no_op() {
        // Must not touch the OS scheduler at all, so this must be safe
        // to run unprivileged in CI.
        sched_apply(-1, SchedPolicy::Other);
    }
}
