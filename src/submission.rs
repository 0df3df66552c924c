//! Submission script assembly and the bounded retry wrapper.
//!
//! Batch jobs are shell scripts generated here and handed to the batch
//! system backend for queueing. A [`SubmissionScript`] collects the
//! commands for one job (or job array); a [`CheckManager`] optionally
//! wraps the run command in a retry loop that re-executes until a
//! completion marker is set or the attempt budget runs out. The loop runs
//! on the compute node, not in this process: the driver never waits on
//! external jobs.

/// Environment variable counting retry attempts inside a generated script.
pub const NTRIES_VAR: &str = "QCFLOW_N_TRIES";
/// Environment variable marking task completion inside a generated script.
pub const TASK_COMPLETED_VAR: &str = "QCFLOW_TASK_COMPLETED";

/// Bounded retry wrapper for a job's run command.
///
/// The generated fragment loops the command until the completion marker is
/// exported as true; with an attempt budget the loop also breaks after
/// `ntimes` passes. The check command is expected to emit an
/// `export QCFLOW_TASK_COMPLETED=true` line once the task's outputs exist.
#[derive(Debug, Clone)]
pub struct CheckManager {
    /// Command evaluated after each attempt to decide completion
    pub check_command: String,
    /// Maximum number of attempts; unbounded when absent
    pub ntimes: Option<usize>,
}

impl CheckManager {
    /// Create a check manager around a completion-check command.
    pub fn new(check_command: impl Into<String>, ntimes: Option<usize>) -> Self {
        Self {
            check_command: check_command.into(),
            ntimes,
        }
    }

    /// Wrap a run command in the retry loop.
    pub fn wrap(&self, runcmd: &str) -> String {
        let mut out = String::new();
        if self.ntimes.is_some() {
            out.push_str(&format!("{NTRIES_VAR}=0\n"));
        }
        out.push_str(&format!("export {TASK_COMPLETED_VAR}=false\n"));
        out.push_str(&format!("while [ \"${TASK_COMPLETED_VAR}\" == false ]\n"));
        out.push_str("do\n\n");
        out.push_str(runcmd);
        out.push('\n');
        if let Some(ntimes) = self.ntimes {
            out.push_str(&format!("let {NTRIES_VAR}++\n"));
            out.push_str(&format!("if [ \"${NTRIES_VAR}\" == {ntimes} ]\n"));
            out.push_str("then\nbreak\nfi\n");
        }
        out.push_str(&format!("eval $({})\n", self.check_command));
        out.push_str("done\n");
        out
    }
}

/// One batch job, possibly a job array, awaiting submission.
///
/// The script is rendered from system-specific directives supplied by the
/// batch backend plus the commands collected here.
#[derive(Debug, Clone)]
pub struct SubmissionScript {
    /// Job name shown in the queue
    pub name: String,
    /// Array size; 1 means a plain job
    pub ntasks: usize,
    commands: Vec<String>,
    check: Option<CheckManager>,
}

impl SubmissionScript {
    /// Create an empty script with a job name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ntasks: 1,
            commands: Vec::new(),
            check: None,
        }
    }

    /// Make the job an array of `ntasks` tasks.
    pub fn with_array(mut self, ntasks: usize) -> Self {
        self.ntasks = ntasks;
        self
    }

    /// Wrap the run commands with a retry loop.
    pub fn with_check(mut self, check: CheckManager) -> Self {
        self.check = Some(check);
        self
    }

    /// Append a command to the job body.
    pub fn add_command(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    /// True when no commands were added; such a script is never submitted.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Render the full script given system-specific header directives.
    pub fn render(&self, directives: &[String]) -> String {
        let mut script = String::from("#!/bin/bash\n");
        for directive in directives {
            script.push_str(directive);
            script.push('\n');
        }
        script.push('\n');

        let body = self.commands.join("\n");
        match &self.check {
            Some(check) => script.push_str(&check.wrap(&body)),
            None => {
                script.push_str(&body);
                script.push('\n');
            }
        }
        script
    }
}
