use std::{fs::File, os::unix::process::ExitStatusExt, path::Path, process::ExitStatus};

use eyre::{Result, WrapErr, bail};
use serde_json::{Map, Value};
use tokio::{fs::create_dir_all, process::Command};
use tracing::{debug, warn};

use crate::{
    bench::{Benchmark, ExecutionEntry},
    checkpoint::{CheckpointStore, Report, Timer, checkpoint},
    error::CampaignError,
};

pub const STDOUT_FILE: &str = "stdout.txt";
pub const STDERR_FILE: &str = "stderr.txt";

/// Runs one command of the execution matrix inside `run_dir` and records
/// its outcome in the run report.
///
/// A non-zero exit status is recorded, not returned as an error.
pub async fn execute(
    store: &dyn CheckpointStore,
    benchmark: &dyn Benchmark,
    entry: &ExecutionEntry,
    run_dir: &Path,
) -> Result<Report> {
    let timer = Timer::start();
    store.ensure_dir(run_dir).await?;
    // outputs are files, wherever the store keeps reports
    create_dir_all(run_dir)
        .await
        .wrap_err_with(|| format!("Create run directory {}", run_dir.display()))?;
    benchmark
        .pre_execute(run_dir)
        .wrap_err_with(|| format!("Prepare execution of {}", benchmark.name()))?;

    let command = entry.resolve_command(run_dir);
    let Some((program, args)) = command.split_first() else {
        bail!(CampaignError::Configuration(format!(
            "benchmark {} has an empty command in category {}",
            benchmark.name(),
            entry.category
        )));
    };

    let stdout = File::create(run_dir.join(STDOUT_FILE)).wrap_err("Create stdout file")?;
    let stderr = File::create(run_dir.join(STDERR_FILE)).wrap_err("Create stderr file")?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(run_dir)
        .stdout(stdout)
        .stderr(stderr);
    if let Some(environment) = &entry.environment {
        cmd.envs(environment);
    }

    debug!("program={} args={}", program, args.join(" "));
    let status = cmd
        .spawn()
        .wrap_err_with(|| format!("Spawn {program}"))?
        .wait()
        .await
        .wrap_err_with(|| format!("Wait for {program}"))?;
    let exit_status = exit_code(status);
    if exit_status != 0 {
        warn!(
            "Command {} exited with status {exit_status} in {}",
            program,
            run_dir.display()
        );
    }

    let mut payload = Map::new();
    payload.insert("exit_status".to_owned(), Value::from(exit_status));
    payload.insert(
        "benchmark".to_owned(),
        Value::String(benchmark.name().to_owned()),
    );
    if let Value::Object(fields) = serde_json::to_value(entry)? {
        payload.extend(fields);
    }
    checkpoint(store, run_dir, timer, Value::Object(payload), true).await
}

/// Exit code, or the negated signal number for killed processes
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or_default())
}
