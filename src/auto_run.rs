//! The adaptive-sampling iteration driver.
//!
//! An adaptive-sampling run is a fixed sequence of phases: First, then N-1
//! Standard iterations, then Last. Every phase queues the same ordered
//! chain of batch jobs (write inputs -> Gaussian -> collect wavefunctions
//! -> AIMAll -> build model inputs -> FEREBUS -> pick the next points),
//! each held on its predecessor's job ID so the scheduler runs them
//! strictly in order. The chain is threaded across phases as well: the
//! last job of one phase gates the first job of the next, making the whole
//! run one unbroken dependency sequence.
//!
//! The driver itself never waits. It queues everything in one pass while
//! holding the working-directory [`DataLock`] and then returns; all actual
//! ordering is delegated to the scheduler's hold mechanism.

use crate::batch::{record_job, BatchError, BatchSystem, JobID, Sge, Slurm};
use crate::config::{AtomSelection, BatchKind, Config, FileStructure};
use crate::lock::{DataLock, LockError};
use crate::make_sets::{make_sets_npoints, MakeSetsError};
use crate::points::{resolve_points_location, PointsDirectory, PointsError};
use crate::submission::{CheckManager, SubmissionScript};
use log::{info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort an adaptive-sampling run.
#[derive(Error, Debug)]
pub enum AutoRunError {
    /// File system operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Points location could not be read or resolved; an unknown location
    /// kind is the one fatal configuration error of the run
    #[error(transparent)]
    Points(#[from] PointsError),
    /// Initial set sizing failed
    #[error(transparent)]
    MakeSets(#[from] MakeSetsError),
    /// Job submission failed
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// The working directory is already claimed by another run
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Run parameters rejected by the driver
    #[error("invalid run configuration: {0}")]
    Config(String),
}

type Result<T> = std::result::Result<T, AutoRunError>;

/// Phase of the adaptive-sampling loop currently being submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    /// Initial iteration: the training set and sample pool may not exist yet
    First,
    /// Any intermediate iteration
    Standard,
    /// Final iteration: no further points are selected
    Last,
}

/// Which phases a step is allowed to run in.
///
/// The policy is an explicit table rather than operator overloading so it
/// can be read and tested in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterUsage {
    /// Only the First phase
    First,
    /// Every phase
    All,
    /// Every phase except Last
    AllButLast,
}

impl IterUsage {
    /// True when a step with this usage may run in the given phase.
    pub fn permits(&self, state: IterState) -> bool {
        match self {
            IterUsage::All => true,
            IterUsage::AllButLast => state != IterState::Last,
            IterUsage::First => state == IterState::First,
        }
    }
}

/// Per-iteration arguments resolved by the driver before each step
/// sequence and passed by value into every step.
#[derive(Debug, Clone)]
pub struct IterArgs {
    /// Point budget for this iteration
    pub n_points: usize,
    /// Atom names subject to optimisation this iteration
    pub atoms: Vec<String>,
}

/// The job a step submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Split the initial candidates into training set and sample pool
    MakeSets,
    /// Write missing Gaussian inputs
    WriteInputs,
    /// Run Gaussian over the training-set inputs (job array)
    Gaussian,
    /// Verify wavefunction outputs
    CollectWfns,
    /// Run AIMAll over the wavefunctions (job array)
    Aimall,
    /// Build per-atom FEREBUS training inputs
    MakeModels,
    /// Train the surrogate models
    Ferebus,
    /// Pick the next adaptive-sampling points
    SelectPoints,
}

/// One unit of the per-phase job chain: a step kind gated by a usage
/// policy.
#[derive(Debug, Clone, Copy)]
pub struct IterStep {
    /// What the step submits
    pub kind: StepKind,
    /// Phases the step runs in
    pub usage: IterUsage,
}

/// Order in which jobs are submitted within every phase.
pub fn func_order() -> [IterStep; 7] {
    [
        IterStep {
            kind: StepKind::WriteInputs,
            usage: IterUsage::All,
        },
        IterStep {
            kind: StepKind::Gaussian,
            usage: IterUsage::All,
        },
        IterStep {
            kind: StepKind::CollectWfns,
            usage: IterUsage::All,
        },
        IterStep {
            kind: StepKind::Aimall,
            usage: IterUsage::All,
        },
        IterStep {
            kind: StepKind::MakeModels,
            usage: IterUsage::All,
        },
        IterStep {
            kind: StepKind::Ferebus,
            usage: IterUsage::All,
        },
        // No point is added in the last iteration.
        IterStep {
            kind: StepKind::SelectPoints,
            usage: IterUsage::AllButLast,
        },
    ]
}

/// Everything the driver needs to queue a run: configuration, directory
/// layout and the scheduler backend.
pub struct RunContext {
    /// Loaded run configuration
    pub config: Config,
    /// Working-directory layout
    pub files: FileStructure,
    /// Scheduler backend
    pub batch: Box<dyn BatchSystem>,
    /// Configuration file path, re-passed to self-invocations
    pub config_path: PathBuf,
}

impl RunContext {
    /// Build a context rooted at a working directory.
    pub fn new(config: Config, root: &Path, config_path: PathBuf) -> Self {
        let files = FileStructure::new(root);
        let batch: Box<dyn BatchSystem> = match config.batch {
            BatchKind::Sge => Box::new(Sge {
                script_dir: files.scripts.clone(),
            }),
            BatchKind::Slurm => Box::new(Slurm {
                script_dir: files.scripts.clone(),
            }),
        };
        Self {
            config,
            files,
            batch,
            config_path,
        }
    }

    /// Command line re-invoking this binary for a bookkeeping subcommand.
    fn internal_command(&self, subcommand: &str) -> String {
        let exe = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "qcflow".to_string());
        format!("{exe} {} {subcommand}", self.config_path.display())
    }

    fn check_manager(&self) -> CheckManager {
        CheckManager::new(self.internal_command("check-task"), self.config.check_attempts)
    }
}

impl IterStep {
    /// Submit this step's job, held on the given dependency handle.
    ///
    /// A step whose usage excludes the current phase is silently skipped
    /// and the handle passes through unchanged; likewise when the
    /// submission turns out to be a no-op (nothing to queue). Either way
    /// the dependency chain stays intact.
    pub fn run(
        &self,
        ctx: &RunContext,
        args: &IterArgs,
        hold: Option<JobID>,
        state: IterState,
    ) -> Result<Option<JobID>> {
        if !self.usage.permits(state) {
            return Ok(hold);
        }
        let script = build_script(ctx, self.kind, args);
        match ctx.batch.submit(&script, hold.as_ref())? {
            Some(job) => {
                record_job(&ctx.files.jid_file, &job)?;
                info!("submitted: {job}");
                Ok(Some(job))
            }
            None => Ok(hold),
        }
    }
}

/// Shell fragment picking this array task's file from the sorted listing
/// of inputs whose output does not exist yet.
///
/// Arrays are sized to the iteration's point count, not the whole
/// training set, so the selector must only see pending work; listing
/// every input would pin the array onto the oldest points and leave the
/// newly selected ones untouched.
fn array_pending_file(dir: &Path, input_ext: &str, output_ext: &str) -> String {
    format!(
        "task_file=$(for f in $(find {} -name '*.{input_ext}' | sort); do \
         [ -e \"${{f%.{input_ext}}}.{output_ext}\" ] || echo \"$f\"; done \
         | sed -n \"${{QCFLOW_TASK_ID:-1}}p\")",
        dir.display()
    )
}

fn build_script(ctx: &RunContext, kind: StepKind, args: &IterArgs) -> SubmissionScript {
    match kind {
        StepKind::MakeSets => {
            let mut script = SubmissionScript::new("MakeSets");
            script.add_command(ctx.internal_command("make-sets"));
            script
        }
        StepKind::WriteInputs => {
            // Idempotent: skip entirely when every point already has its
            // Gaussian input.
            if let Ok(points) = PointsDirectory::open(&ctx.files.training_set) {
                let all_present = !points.is_empty()
                    && points.point_dirs().iter().all(|dir| {
                        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
                        dir.join(format!("{name}.gjf")).exists()
                    });
                if all_present {
                    return SubmissionScript::new("WriteInputs");
                }
            }
            let mut script = SubmissionScript::new("WriteInputs");
            script.add_command(ctx.internal_command("write-inputs"));
            script
        }
        StepKind::Gaussian => {
            let mut script = SubmissionScript::new("Gaussian")
                .with_array(args.n_points)
                .with_check(ctx.check_manager());
            script.add_command(array_pending_file(&ctx.files.training_set, "gjf", "wfn"));
            script.add_command(format!(
                "[ -n \"$task_file\" ] && {} \"$task_file\"",
                ctx.config.gaussian_command
            ));
            script
        }
        StepKind::CollectWfns => {
            let mut script = SubmissionScript::new("CollectWfns");
            script.add_command(ctx.internal_command("collect-wfns"));
            script
        }
        StepKind::Aimall => {
            let mut script = SubmissionScript::new("Aimall")
                .with_array(args.n_points)
                .with_check(ctx.check_manager());
            script.add_command(array_pending_file(&ctx.files.training_set, "wfn", "sum"));
            script.add_command(format!(
                "[ -n \"$task_file\" ] && {} -nogui \"$task_file\"",
                ctx.config.aimall_command
            ));
            script
        }
        StepKind::MakeModels => {
            let mut script = SubmissionScript::new("MakeModels");
            script.add_command(format!(
                "{} {}",
                ctx.internal_command("make-models"),
                args.atoms.join(",")
            ));
            script
        }
        StepKind::Ferebus => {
            let mut script = SubmissionScript::new("Ferebus");
            for atom in &args.atoms {
                script.add_command(format!(
                    "cd {} && {}",
                    ctx.files.ferebus.join(atom).display(),
                    ctx.config.ferebus_command
                ));
            }
            script
        }
        StepKind::SelectPoints => {
            let mut script = SubmissionScript::new("SelectPoints");
            script.add_command(format!(
                "{} {}",
                ctx.internal_command("select-points"),
                args.n_points
            ));
            script
        }
    }
}

/// Atom names of the system, taken from the first training-set point or,
/// before the sets exist, from the first candidate geometry.
fn system_atom_names(ctx: &RunContext) -> Vec<String> {
    if let Ok(points) = PointsDirectory::open(&ctx.files.training_set) {
        if !points.is_empty() {
            if let Ok(atoms) = points.geometry(0) {
                return atoms.names();
            }
        }
    }
    match resolve_points_location(&ctx.config.points_location) {
        Ok(source) => match &source {
            crate::points::PointsSource::Trajectory(t) => {
                t.get(0).map(|a| a.names()).unwrap_or_default()
            }
            crate::points::PointsSource::Directory(d) => {
                d.geometry(0).map(|a| a.names()).unwrap_or_default()
            }
        },
        Err(_) => {
            warn!("could not resolve system atoms yet");
            Vec::new()
        }
    }
}

/// Queue one phase of the run, returning the handle the next phase must
/// hold on.
///
/// The First phase decides the point budget: an existing training set
/// contributes its point count directly, otherwise the candidate points
/// are resolved and handed to the configured set method, and a make-sets
/// job is queued ahead of the regular chain. Standard and Last phases use
/// the configured per-iteration budget.
pub fn next_iter(
    ctx: &RunContext,
    wait_for_job: Option<JobID>,
    state: IterState,
) -> Result<Option<JobID>> {
    let mut job_id = wait_for_job;

    let n_points = if state == IterState::First {
        if ctx.files.training_set.exists() {
            PointsDirectory::open(&ctx.files.training_set)?.len()
        } else {
            // Unknown location kinds abort here, before anything is queued.
            let points = resolve_points_location(&ctx.config.points_location)?;
            let n_points = make_sets_npoints(
                &points,
                ctx.config.training_points,
                &ctx.config.training_set_method,
            )?;
            let make_sets = IterStep {
                kind: StepKind::MakeSets,
                usage: IterUsage::All,
            };
            let args = IterArgs {
                n_points,
                atoms: Vec::new(),
            };
            job_id = make_sets.run(ctx, &args, job_id, state)?;
            n_points
        }
    } else {
        ctx.config.points_per_iteration
    };

    let atoms = match &ctx.config.optimise_atom {
        AtomSelection::All => system_atom_names(ctx),
        AtomSelection::Atom(name) => vec![name.clone()],
    };
    let args = IterArgs { n_points, atoms };

    for step in func_order() {
        job_id = step.run(ctx, &args, job_id, state)?;
    }
    Ok(job_id)
}

/// Queue an entire adaptive-sampling run.
///
/// Builds the phase list `[First, Standard * (N - 1), Last]` (the N
/// configured iterations with the first rewritten to First, plus the final
/// phase), claims the working-directory lock for the duration, and threads
/// one dependency handle through every phase. Returns the handle of the
/// last queued job.
pub fn auto_run(ctx: &RunContext) -> Result<Option<JobID>> {
    // The INI loader rejects zero, but the field is public.
    if ctx.config.n_iterations == 0 {
        return Err(AutoRunError::Config(
            "n_iterations must be at least 1".to_string(),
        ));
    }
    let mut states = vec![IterState::Standard; ctx.config.n_iterations];
    states[0] = IterState::First;
    states.push(IterState::Last);

    let _lock = DataLock::acquire(ctx.files.data_lock.clone())?;

    let mut job_id = None;
    for (i, state) in states.iter().enumerate() {
        info!("submitting iteration {} ({state:?})", i + 1);
        job_id = next_iter(ctx, job_id, *state)?;
    }
    Ok(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Arc, Mutex};

    /// Scheduler double that queues nothing and records every submission.
    /// Clones share the log so tests keep a handle after boxing it into
    /// the context.
    #[derive(Clone)]
    struct RecordingBatch {
        submissions: Arc<Mutex<Vec<(String, usize, Option<JobID>)>>>,
    }

    impl RecordingBatch {
        fn new() -> Self {
            Self {
                submissions: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn recorded(&self) -> Vec<(String, usize, Option<JobID>)> {
            self.submissions.lock().unwrap().clone()
        }
    }

    impl BatchSystem for RecordingBatch {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn submit(
            &self,
            script: &SubmissionScript,
            hold: Option<&JobID>,
        ) -> std::result::Result<Option<JobID>, BatchError> {
            if script.is_empty() {
                return Ok(None);
            }
            let mut submissions = self.submissions.lock().unwrap();
            let id = JobID {
                script: format!("{}.sh", script.name),
                id: format!("{}", submissions.len() + 1),
            };
            submissions.push((script.name.clone(), script.ntasks, hold.cloned()));
            Ok(Some(id))
        }

        fn delete(&self, _job: &JobID) -> std::result::Result<(), BatchError> {
            Ok(())
        }
    }

    fn scratch_root(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("qcflow_run_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_trajectory(path: &Path, n_frames: usize) {
        let mut content = String::new();
        for frame in 0..n_frames {
            let dz = frame as f64 * 0.05;
            content.push_str(&format!(
                "3\nframe {frame}\nO 0.0 0.0 {dz}\nH 0.757 0.586 {dz}\nH -0.757 0.586 {dz}\n"
            ));
        }
        fs::write(path, content).unwrap();
    }

    fn recording_context(root: &Path, n_iterations: usize) -> (RunContext, RecordingBatch) {
        let traj = root.join("WATER.xyz");
        write_trajectory(&traj, 25);
        let mut config = Config::default();
        config.system_name = "WATER".to_string();
        config.points_location = traj;
        config.n_iterations = n_iterations;
        let batch = RecordingBatch::new();
        let ctx = RunContext {
            config,
            files: FileStructure::new(root),
            batch: Box::new(batch.clone()),
            config_path: root.join("config.ini"),
        };
        (ctx, batch)
    }

    #[test]
    fn usage_table_matches_policy() {
        assert!(IterUsage::All.permits(IterState::First));
        assert!(IterUsage::All.permits(IterState::Standard));
        assert!(IterUsage::All.permits(IterState::Last));

        assert!(IterUsage::AllButLast.permits(IterState::First));
        assert!(IterUsage::AllButLast.permits(IterState::Standard));
        assert!(!IterUsage::AllButLast.permits(IterState::Last));

        assert!(IterUsage::First.permits(IterState::First));
        assert!(!IterUsage::First.permits(IterState::Standard));
        assert!(!IterUsage::First.permits(IterState::Last));
    }

    #[test]
    fn skipped_step_passes_the_handle_through() {
        let root = scratch_root("skip");
        let (ctx, batch) = recording_context(&root, 1);
        let step = IterStep {
            kind: StepKind::SelectPoints,
            usage: IterUsage::AllButLast,
        };
        let held = JobID {
            script: "prev.sh".to_string(),
            id: "77".to_string(),
        };
        let args = IterArgs {
            n_points: 1,
            atoms: vec![],
        };
        let out = step
            .run(&ctx, &args, Some(held.clone()), IterState::Last)
            .unwrap();
        assert_eq!(out, Some(held));
        assert!(batch.recorded().is_empty());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn existing_training_set_fixes_the_first_phase_budget() {
        let root = scratch_root("existing");
        let (mut ctx, batch) = recording_context(&root, 1);
        // Point the candidates at a path that cannot be resolved; with a
        // pre-existing training set the policy must never be consulted.
        ctx.config.points_location = root.join("nonexistent.dat");

        let training_set = ctx.files.training_set.clone();
        for i in 1..=50 {
            let dir = training_set.join(format!("WATER{i:04}"));
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join(format!("WATER{i:04}.xyz")),
                "3\n\nO 0.0 0.0 0.0\nH 0.757 0.586 0.0\nH -0.757 0.586 0.0\n",
            )
            .unwrap();
        }

        next_iter(&ctx, None, IterState::First).unwrap();

        let submissions = batch.recorded();
        // No MakeSets job: the set already exists.
        assert!(submissions.iter().all(|(name, _, _)| name != "MakeSets"));
        // The Gaussian array is sized by the adopted budget of 50.
        let gaussian = submissions
            .iter()
            .find(|(name, _, _)| name == "Gaussian")
            .unwrap();
        assert_eq!(gaussian.1, 50);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn unknown_points_location_is_fatal_and_releases_the_lock() {
        let root = scratch_root("fatal");
        let (mut ctx, _batch) = recording_context(&root, 1);
        ctx.config.points_location = root.join("points.dat");
        fs::write(&ctx.config.points_location, "not points").unwrap();

        let result = auto_run(&ctx);
        assert!(matches!(
            result,
            Err(AutoRunError::Points(PointsError::UnknownPointsLocation(_)))
        ));
        assert!(!ctx.files.data_lock.exists());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn zero_iteration_run_is_rejected_before_anything_is_queued() {
        let root = scratch_root("zero");
        let (ctx, batch) = recording_context(&root, 0);

        assert!(matches!(auto_run(&ctx), Err(AutoRunError::Config(_))));
        assert!(batch.recorded().is_empty());
        assert!(!ctx.files.data_lock.exists());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn auto_run_chains_every_submission_across_four_phases() {
        let root = scratch_root("chain");
        let (ctx, batch) = recording_context(&root, 3);

        let last = auto_run(&ctx).unwrap();
        assert!(last.is_some());

        let submissions = batch.recorded();
        // Phases: First, Standard, Standard, Last.
        // First: MakeSets + 7 steps; Standards: 7 each; Last: 6 (no
        // SelectPoints).
        assert_eq!(
            submissions
                .iter()
                .filter(|(name, _, _)| name == "MakeSets")
                .count(),
            1
        );
        assert_eq!(
            submissions
                .iter()
                .filter(|(name, _, _)| name == "SelectPoints")
                .count(),
            3
        );
        assert_eq!(
            submissions
                .iter()
                .filter(|(name, _, _)| name == "Gaussian")
                .count(),
            4
        );
        assert_eq!(submissions.len(), 8 + 7 + 7 + 6);

        // One unbroken dependency chain: submission k holds on the job id
        // produced by submission k-1, and the very first holds on nothing.
        assert_eq!(submissions[0].2, None);
        for (k, (_, _, hold)) in submissions.iter().enumerate().skip(1) {
            assert_eq!(
                hold.as_ref().map(|j| j.id.as_str()),
                Some(format!("{k}").as_str()),
                "submission {k} is not held on its predecessor"
            );
        }
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn array_steps_only_list_points_with_pending_outputs() {
        let root = scratch_root("pending");
        let (ctx, _batch) = recording_context(&root, 1);
        let args = IterArgs {
            n_points: 2,
            atoms: vec![],
        };

        // Arrays are sized to the iteration's point count; a selector over
        // the full sorted listing would keep hitting the oldest points and
        // never reach the freshly selected ones.
        let gaussian = build_script(&ctx, StepKind::Gaussian, &args).render(&[]);
        assert!(gaussian.contains("[ -e \"${f%.gjf}.wfn\" ] || echo"));
        assert!(gaussian.contains("sed -n \"${QCFLOW_TASK_ID:-1}p\""));
        assert!(!gaussian.contains("| sort | sed"));

        let aimall = build_script(&ctx, StepKind::Aimall, &args).render(&[]);
        assert!(aimall.contains("[ -e \"${f%.wfn}.sum\" ] || echo"));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn first_phase_budget_comes_from_the_set_method() {
        let root = scratch_root("budget");
        let (ctx, batch) = recording_context(&root, 1);

        next_iter(&ctx, None, IterState::First).unwrap();
        let submissions = batch.recorded();
        assert_eq!(submissions[0].0, "MakeSets");
        // min_max over 9 feature columns selects a 18-point budget.
        let gaussian = submissions
            .iter()
            .find(|(name, _, _)| name == "Gaussian")
            .unwrap();
        assert_eq!(gaussian.1, 18);
        fs::remove_dir_all(&root).unwrap();
    }
}
