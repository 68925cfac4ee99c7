//! Output log: one `<dag-name>.log` file per DAG, holding the deadline
//! on its first line and one measured response time (microseconds) per
//! subsequent line, one line per activation. Runs append rather than
//! overwrite, so repeated invocations against the same output directory
//! accumulate a full history instead of clobbering the previous run.
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Directory permission bits applied to a freshly created DAG output
/// directory, matching the rest of this codebase's convention of
/// leaving output world-writable so a run under one user can be
/// inspected or cleaned up by another.
const OUTPUT_DIR_MODE: u32 = 0o777;

pub struct OutputLog {
    path: PathBuf,
}

impl OutputLog {
    /// Ensure `<output_dir>/<dag_name>/` exists and return a handle to
    /// `<dag_name>.log` inside it.
    pub fn create(output_dir: impl AsRef<Path>, dag_name: &str) -> Self {
        let dir = output_dir.as_ref().join(dag_name);
        fs::create_dir_all(&dir)
            .unwrap_or_else(|err| panic!("cannot create output directory {}: {err}", dir.display()));
        fs::set_permissions(&dir, fs::Permissions::from_mode(OUTPUT_DIR_MODE))
            .unwrap_or_else(|err| panic!("cannot set permissions on {}: {err}", dir.display()));
        Self { path: dir.join(format!("{dag_name}.log")) }
    }

    /// Append one run's worth of results: the DAG's end-to-end deadline
    /// followed by one response time per activation, each on its own
    /// line. Prior runs' lines are left untouched above this run's.
    pub fn write_run(&self, deadline_us: u64, response_times_us: &[u64]) {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .unwrap_or_else(|err| panic!("cannot open output log {}: {err}", self.path.display()));
        writeln!(file, "{deadline_us}").expect("write to output log failed");
        for rt in response_times_us {
            writeln!(file, "{rt}").expect("write to output log failed");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
