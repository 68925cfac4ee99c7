use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use dag_rt_engine::{calibrate, dag, log as output_log, spec};
use log::info;

/// Run a real-time DAG workload described by a YAML specification file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the DAG specification YAML file. Required unless
    /// `--calibrate` is given.
    #[clap(required_unless_present = "calibrate")]
    dag_file: Option<String>,

    /// Measure this host's ticks-per-microsecond rate for `--matrix`-sized
    /// matrices over the given duration (microseconds) and print it,
    /// instead of running a DAG.
    #[clap(long)]
    calibrate: Option<u64>,

    /// Matrix side length used by the workload kernel and by
    /// `--calibrate`.
    #[clap(long, default_value_t = 4)]
    matrix: usize,

    /// Run only the named task's workload in isolation for this many
    /// microseconds, instead of running the whole DAG. Mutually exclusive
    /// with normal operation.
    #[clap(long)]
    test: Option<u64>,

    /// Directory under which `<dag-name>/<dag-name>.log` is written.
    #[clap(long, default_value = "./output")]
    output_dir: String,

    /// Enable debug-level logging.
    #[clap(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Some(duration_us) = args.calibrate {
        let rate = calibrate::calibrate(args.matrix, duration_us);
        println!("{rate:.4}");
        return;
    }

    if let Some(duration_us) = args.test {
        dag_rt_engine::workload::tick_init(args.matrix, spec::TaskKind::Cpu, None);
        let ticks = dag_rt_engine::workload::count_time(duration_us);
        println!("{ticks}");
        return;
    }

    let dag_file = args.dag_file.expect("dag_file is required when not calibrating");
    let dag_spec = spec::load_from_yaml(&dag_file);
    if let Err(err) = spec::validate(&dag_spec) {
        log::error!("invalid DAG specification '{dag_file}': {err}");
        process::exit(1);
    }

    let ticks_per_us = match std::env::var("TICKS_PER_US") {
        Ok(raw) => raw
            .parse::<f64>()
            .unwrap_or_else(|_| panic!("TICKS_PER_US='{raw}' is not a valid floating-point number")),
        Err(_) => {
            log::error!(
                "TICKS_PER_US is not set; run with --calibrate first and export the printed rate"
            );
            process::exit(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::warn!("shutdown requested; finishing the current activation");
            stop.store(true, Ordering::Relaxed);
        })
        .expect("failed to install signal handler");
    }

    info!("starting DAG '{}' ({} tasks, {} repetitions)", dag_spec.name, dag_spec.tasks.len(), dag_spec.repetitions);

    let runtime = dag::build(&dag_spec, ticks_per_us);
    let dag_name = runtime.name().to_string();
    let deadline_us = dag_spec.deadline_us;
    let result = runtime.run(stop);

    for (task_name, exec_times) in &result.task_exec_times_us {
        if exec_times.is_empty() {
            continue;
        }
        let total: u64 = exec_times.iter().sum();
        let mean_us = total / exec_times.len() as u64;
        log::debug!("task '{task_name}': {} activations, mean execution time {mean_us}us", exec_times.len());
    }

    let output = output_log::OutputLog::create(&args.output_dir, &dag_name);
    output.write_run(deadline_us, &result.response_times_us);
    info!("wrote {} response times to {}", result.response_times_us.len(), output.path().display());
}
