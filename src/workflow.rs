use crate::config::BATCH_SIZE;
use crate::db::Connector;
use crate::languages;
use crate::mapping::DbMapping;
use crate::reports;
use crate::state::StateManager;
use crate::store::OutputLayout;
use crate::titles;
use crate::upload::{self, Publisher};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{error, info, warn};

/// Workflow steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RetrieveTitles,
    ProcessLanguages,
    GenerateReports,
    Upload,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::RetrieveTitles,
        Step::ProcessLanguages,
        Step::GenerateReports,
        Step::Upload,
    ];

    pub fn number(self) -> u32 {
        match self {
            Step::RetrieveTitles => 1,
            Step::ProcessLanguages => 2,
            Step::GenerateReports => 3,
            Step::Upload => 4,
        }
    }

    pub fn from_number(number: u32) -> Option<Step> {
        Step::ALL.into_iter().find(|step| step.number() == number)
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::RetrieveTitles => "retrieve titles",
            Step::ProcessLanguages => "process languages",
            Step::GenerateReports => "generate reports",
            Step::Upload => "upload reports",
        }
    }

    /// Steps that consume the previous step's artifacts. Step 1 starts from
    /// nothing; every later step reads what its predecessor wrote.
    fn requires_previous(self) -> bool {
        !matches!(self, Step::RetrieveTitles)
    }
}

type StepFn = fn(&mut Orchestrator, &RunOptions) -> Result<Value>;

/// Static step registry: execution order and the function run for each step,
/// resolved at compile time.
const REGISTRY: [(Step, StepFn); 4] = [
    (Step::RetrieveTitles, step_retrieve_titles),
    (Step::ProcessLanguages, step_process_languages),
    (Step::GenerateReports, step_generate_reports),
    (Step::Upload, step_upload),
];

/// Directives for one workflow invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub year: String,
    pub languages: Option<Vec<String>>,
    pub skip_steps: Vec<u32>,
    pub batch_size: usize,
    pub sort_descending: bool,
    pub force_from_step: Option<u32>,
    pub fresh: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            year: String::new(),
            languages: None,
            skip_steps: Vec::new(),
            batch_size: BATCH_SIZE,
            sort_descending: true,
            force_from_step: None,
            fresh: false,
        }
    }
}

/// Sequences step execution: resume from the persisted state, honor skip and
/// force directives, checkpoint completions, abort on the first failure.
pub struct Orchestrator {
    layout: OutputLayout,
    state: StateManager,
    connector: Box<dyn Connector>,
    publisher: Box<dyn Publisher>,
    mapping: Option<DbMapping>,
}

impl Orchestrator {
    pub fn new(
        layout: OutputLayout,
        state: StateManager,
        connector: Box<dyn Connector>,
        publisher: Box<dyn Publisher>,
    ) -> Self {
        Self {
            layout,
            state,
            connector,
            publisher,
            mapping: None,
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Loads the language-to-database mapping once per run; later steps reuse
    /// the same object.
    fn ensure_mapping(&mut self) -> Result<()> {
        if self.mapping.is_none() {
            self.mapping = Some(DbMapping::load_or_fetch(
                &self.layout,
                self.connector.as_ref(),
            )?);
        }
        Ok(())
    }

    /// Runs every pending step in order. Returns an error on the first step
    /// failure, leaving state resumable.
    pub fn run(&mut self, opts: &RunOptions) -> Result<()> {
        self.layout.ensure_dirs()?;

        if opts.fresh {
            info!("Starting fresh: resetting workflow state");
            self.state.reset()?;
        } else if let Some(step) = opts.force_from_step {
            info!(step, "Forcing re-execution from step");
            self.state.reset_from_step(step)?;
        }

        let resume_point = self.state.get_resume_point();
        if resume_point > 1 {
            info!(resume_point, "Resuming workflow");
        }

        for (step, function) in REGISTRY {
            let number = step.number();
            if opts.skip_steps.contains(&number) {
                info!(step = number, name = step.name(), "Skipping step by directive");
                continue;
            }
            if self.state.is_step_completed(number) {
                info!(step = number, name = step.name(), "Step already completed");
                continue;
            }

            self.check_dependency(step, opts)?;
            self.execute(step, function, opts)?;
        }

        let state = self.state.state();
        info!(
            completed_steps = state.completed_steps.len(),
            errors = state.errors.len(),
            "Workflow complete"
        );
        Ok(())
    }

    /// Runs one step in isolation, with the same dependency guard and
    /// checkpointing as a full run.
    pub fn run_single_step(&mut self, step: Step, opts: &RunOptions) -> Result<()> {
        self.layout.ensure_dirs()?;
        self.check_dependency(step, opts)?;

        let (_, function) = REGISTRY
            .into_iter()
            .find(|(registered, _)| *registered == step)
            .context("step missing from registry")?;
        self.execute(step, function, opts)
    }

    fn execute(&mut self, step: Step, function: StepFn, opts: &RunOptions) -> Result<()> {
        let number = step.number();
        info!(step = number, name = step.name(), "Starting step");
        self.state.mark_step_started(number)?;

        match function(self, opts) {
            Ok(artifact) => {
                self.state.mark_step_completed(number, artifact)?;
                info!(step = number, name = step.name(), "Step completed");
                Ok(())
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(step = number, name = step.name(), "Step failed: {message}");
                self.state.log_error(number, &message)?;
                Err(e).with_context(|| format!("Step {number} ({}) failed", step.name()))
            }
        }
    }

    /// Hard data dependency: step n consumes step n-1's output. A skip
    /// directive on the previous step waives the check; the operator is
    /// vouching for whatever artifacts are on disk.
    fn check_dependency(&mut self, step: Step, opts: &RunOptions) -> Result<()> {
        if !step.requires_previous() {
            return Ok(());
        }

        let previous = step.number() - 1;
        if self.state.is_step_completed(previous) {
            return Ok(());
        }
        if opts.skip_steps.contains(&previous) {
            warn!(
                step = step.number(),
                previous, "Previous step skipped by directive; proceeding with existing artifacts"
            );
            return Ok(());
        }

        let message = format!(
            "step {} ({}) requires completed output of step {previous}",
            step.number(),
            step.name()
        );
        self.state.log_error(step.number(), &message)?;
        bail!("{message}");
    }
}

fn step_retrieve_titles(orch: &mut Orchestrator, _opts: &RunOptions) -> Result<Value> {
    orch.ensure_mapping()?;
    let mapping = orch.mapping.as_ref().context("database mapping not loaded")?;
    let artifact = titles::run(orch.connector.as_ref(), mapping, &orch.layout)?;
    Ok(serde_json::to_value(artifact)?)
}

fn step_process_languages(orch: &mut Orchestrator, opts: &RunOptions) -> Result<Value> {
    orch.ensure_mapping()?;
    let Orchestrator {
        layout,
        state,
        connector,
        mapping,
        ..
    } = orch;
    let mapping = mapping.as_ref().context("database mapping not loaded")?;
    let artifact = languages::run(connector.as_ref(), mapping, layout, state, opts)?;
    Ok(serde_json::to_value(artifact)?)
}

fn step_generate_reports(orch: &mut Orchestrator, opts: &RunOptions) -> Result<Value> {
    let artifact = reports::run(&orch.layout, &opts.year)?;
    Ok(serde_json::to_value(artifact)?)
}

fn step_upload(orch: &mut Orchestrator, opts: &RunOptions) -> Result<Value> {
    let Orchestrator {
        layout, publisher, ..
    } = orch;
    let artifact = upload::run(publisher.as_mut(), layout, &opts.year)?;
    Ok(serde_json::to_value(artifact)?)
}

/// Human-readable status table for the `status` subcommand.
pub fn print_status(state: &StateManager) {
    println!();
    println!("Workflow Status:");
    println!("{}", "-".repeat(30));

    for step in Step::ALL {
        let number = step.number();
        let (icon, status) = if state.is_step_completed(number) {
            ("[x]", "Completed")
        } else if state.state().current_step == number {
            ("[~]", "In Progress")
        } else {
            ("[ ]", "Pending")
        };
        println!("  {icon} Step {number}: {} - {status}", step.name());
    }

    let errors = &state.state().errors;
    if !errors.is_empty() {
        println!();
        println!("Errors logged: {}", errors.len());
        if let Some(last) = errors.last() {
            println!("  Last: step {} at {}: {}", last.step, last.timestamp, last.message);
        }
    }
}
