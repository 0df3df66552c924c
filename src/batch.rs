//! Batch system backends: job submission, dependency holds, deletion.
//!
//! The iteration driver only needs three things from a scheduler: submit a
//! script (optionally held on a previous job), remember what was
//! submitted, and delete jobs on request. [`BatchSystem`] captures that
//! surface; [`Sge`] and [`Slurm`] generate the corresponding shell scripts
//! and shell out to `qsub`/`sbatch`.
//!
//! Every submitted [`JobID`] is appended to a JSON record file so a later
//! `delete-jobs` invocation can drain the queue without the driver still
//! running.

use crate::submission::SubmissionScript;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Errors arising from batch system interaction.
#[derive(Error, Debug)]
pub enum BatchError {
    /// File system operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Submission command failed or produced unusable output
    #[error("submission failed: {0}")]
    Submission(String),
    /// Job record file is malformed
    #[error("job record error: {0}")]
    Record(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, BatchError>;

/// Opaque handle for a queued batch job.
///
/// Threading a `JobID` into the next submission's hold makes the scheduler
/// start that job only after this one completes; that dependency chain is
/// the only ordering guarantee the driver relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobID {
    /// Script file the job was submitted from
    pub script: String,
    /// Scheduler-assigned identifier
    pub id: String,
}

impl fmt::Display for JobID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.script)
    }
}

/// Scheduler surface consumed by the iteration driver.
pub trait BatchSystem {
    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Queue a script, optionally held on a previous job.
    ///
    /// Returns `Ok(None)` when the script is empty and nothing was queued;
    /// the caller keeps its previous dependency handle in that case.
    fn submit(&self, script: &SubmissionScript, hold: Option<&JobID>) -> Result<Option<JobID>>;

    /// Remove a queued or running job.
    fn delete(&self, job: &JobID) -> Result<()>;
}

lazy_static! {
    // "Your job 123456 ..." or "Your job-array 123456.1-50:1 ..."
    static ref SGE_JOB_RE: Regex = Regex::new(r"Your job(?:-array)? (\d+)").unwrap();
    // "Submitted batch job 123456"
    static ref SLURM_JOB_RE: Regex = Regex::new(r"Submitted batch job (\d+)").unwrap();
}

fn write_script(dir: &Path, script: &SubmissionScript, directives: &[String]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.sh", script.name));
    fs::write(&path, script.render(directives))?;
    Ok(path)
}

fn run_submit(command: &mut Command, job_re: &Regex, script_path: &Path) -> Result<Option<JobID>> {
    let output = command.output()?;
    if !output.status.success() {
        return Err(BatchError::Submission(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let id = job_re
        .captures(&stdout)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            BatchError::Submission(format!("could not parse job id from '{}'", stdout.trim()))
        })?;
    Ok(Some(JobID {
        script: script_path.display().to_string(),
        id,
    }))
}

/// Sun Grid Engine backend (`qsub`, `-hold_jid`, `-t` arrays).
#[derive(Debug)]
pub struct Sge {
    /// Directory the generated scripts are written to
    pub script_dir: PathBuf,
}

impl BatchSystem for Sge {
    fn name(&self) -> &'static str {
        "sge"
    }

    fn submit(&self, script: &SubmissionScript, hold: Option<&JobID>) -> Result<Option<JobID>> {
        if script.is_empty() {
            return Ok(None);
        }
        let mut directives = vec![
            format!("#$ -N {}", script.name),
            "#$ -cwd".to_string(),
            "#$ -S /bin/bash".to_string(),
        ];
        if script.ntasks > 1 {
            directives.push(format!("#$ -t 1-{}", script.ntasks));
            directives.push("QCFLOW_TASK_ID=$SGE_TASK_ID".to_string());
        }
        let path = write_script(&self.script_dir, script, &directives)?;

        let mut cmd = Command::new("qsub");
        if let Some(job) = hold {
            cmd.arg("-hold_jid").arg(&job.id);
        }
        cmd.arg(&path);
        run_submit(&mut cmd, &SGE_JOB_RE, &path)
    }

    fn delete(&self, job: &JobID) -> Result<()> {
        let output = Command::new("qdel").arg(&job.id).output()?;
        if !output.status.success() {
            warn!("qdel {} failed: {}", job.id, String::from_utf8_lossy(&output.stderr).trim());
        }
        Ok(())
    }
}

/// SLURM backend (`sbatch`, `--dependency=afterok`, `--array`).
#[derive(Debug)]
pub struct Slurm {
    /// Directory the generated scripts are written to
    pub script_dir: PathBuf,
}

impl BatchSystem for Slurm {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn submit(&self, script: &SubmissionScript, hold: Option<&JobID>) -> Result<Option<JobID>> {
        if script.is_empty() {
            return Ok(None);
        }
        let mut directives = vec![format!("#SBATCH --job-name={}", script.name)];
        if script.ntasks > 1 {
            directives.push(format!("#SBATCH --array=1-{}", script.ntasks));
            directives.push("QCFLOW_TASK_ID=$SLURM_ARRAY_TASK_ID".to_string());
        }
        let path = write_script(&self.script_dir, script, &directives)?;

        let mut cmd = Command::new("sbatch");
        if let Some(job) = hold {
            cmd.arg(format!("--dependency=afterok:{}", job.id));
        }
        cmd.arg(&path);
        run_submit(&mut cmd, &SLURM_JOB_RE, &path)
    }

    fn delete(&self, job: &JobID) -> Result<()> {
        let output = Command::new("scancel").arg(&job.id).output()?;
        if !output.status.success() {
            warn!("scancel {} failed: {}", job.id, String::from_utf8_lossy(&output.stderr).trim());
        }
        Ok(())
    }
}

/// Append a submitted job to the JSON record file.
pub fn record_job(record_file: &Path, job: &JobID) -> Result<()> {
    let mut jobs = read_job_records(record_file)?;
    jobs.push(job.clone());
    if let Some(parent) = record_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(record_file, serde_json::to_string_pretty(&jobs)?)?;
    Ok(())
}

/// Read the persisted job records; a missing or corrupt file reads as
/// empty, matching a queue with nothing to delete.
pub fn read_job_records(record_file: &Path) -> Result<Vec<JobID>> {
    if !record_file.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(record_file)?;
    Ok(serde_json::from_str(&content).unwrap_or_default())
}

/// Delete every recorded job and truncate the record file.
pub fn delete_jobs(record_file: &Path, batch: &dyn BatchSystem) -> Result<()> {
    for job in read_job_records(record_file)? {
        batch.delete(&job)?;
        info!("deleted {job}");
    }
    if record_file.exists() {
        fs::write(record_file, "[]")?;
    }
    Ok(())
}
