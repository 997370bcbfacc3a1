use crate::store;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// One logged failure, kept across resumes so a run carries its history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub step: u32,
    pub message: String,
    pub timestamp: String,
}

/// The persisted workflow-state document. Mutated only through
/// `StateManager`, which writes every change through to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    pub current_step: u32,
    pub completed_steps: Vec<u32>,
    #[serde(default)]
    pub step_data: BTreeMap<u32, Value>,
    #[serde(default)]
    pub partial_data: BTreeMap<u32, Value>,
    #[serde(default)]
    pub errors: Vec<StepError>,
    pub started_at: Option<String>,
    pub last_updated: Option<String>,
}

/// Durable, monotonic progress tracking. The state file is the single source
/// of truth; nothing in memory is trusted across process restarts.
pub struct StateManager {
    path: PathBuf,
    state: WorkflowState,
}

impl StateManager {
    /// Loads existing state or starts empty. A corrupt state file is a hard
    /// error: silently discarding it could re-run steps already done.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let state: WorkflowState = store::read_json(&path).with_context(|| {
                format!(
                    "Workflow state file is unreadable: {:?} (delete it or pass --fresh to start over)",
                    path
                )
            })?;
            info!(
                completed = state.completed_steps.len(),
                current = state.current_step,
                "Loaded workflow state"
            );
            state
        } else {
            WorkflowState::default()
        };
        Ok(Self { path, state })
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    fn save(&mut self) -> Result<()> {
        self.state.last_updated = Some(Utc::now().to_rfc3339());
        store::write_json_atomic(&self.path, &self.state)
    }

    pub fn mark_step_started(&mut self, step: u32) -> Result<()> {
        self.state.current_step = step;
        if self.state.started_at.is_none() {
            self.state.started_at = Some(Utc::now().to_rfc3339());
        }
        self.save()
    }

    /// Idempotent: completing an already-completed step replaces its data
    /// without duplicating the membership entry. The step's partial
    /// checkpoint is cleared in the same write.
    pub fn mark_step_completed(&mut self, step: u32, data: Value) -> Result<()> {
        if !self.state.completed_steps.contains(&step) {
            self.state.completed_steps.push(step);
        }
        self.state.step_data.insert(step, data);
        self.state.partial_data.remove(&step);
        self.state.current_step = step + 1;
        self.save()?;
        debug!(step, "Step checkpointed");
        Ok(())
    }

    pub fn is_step_completed(&self, step: u32) -> bool {
        self.state.completed_steps.contains(&step)
    }

    pub fn step_data(&self, step: u32) -> Option<&Value> {
        self.state.step_data.get(&step)
    }

    /// Sub-step checkpoint for steps that process a collection incrementally,
    /// so a crash mid-step resumes at the last completed unit.
    pub fn set_partial_data(&mut self, step: u32, data: Value) -> Result<()> {
        self.state.partial_data.insert(step, data);
        self.save()
    }

    pub fn get_partial_data(&self, step: u32) -> Option<&Value> {
        self.state.partial_data.get(&step)
    }

    pub fn clear_partial_data(&mut self, step: u32) -> Result<()> {
        if self.state.partial_data.remove(&step).is_some() {
            self.save()?;
        }
        Ok(())
    }

    pub fn log_error(&mut self, step: u32, message: &str) -> Result<()> {
        self.state.errors.push(StepError {
            step,
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });
        self.save()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.state = WorkflowState::default();
        self.save()
    }

    /// Removes completed-step membership, step data, and partial data for all
    /// steps `>= step`, enabling forced re-execution of a step range without
    /// discarding earlier progress.
    pub fn reset_from_step(&mut self, step: u32) -> Result<()> {
        self.state.completed_steps.retain(|s| *s < step);
        self.state.step_data.retain(|s, _| *s < step);
        self.state.partial_data.retain(|s, _| *s < step);
        self.state.current_step = step;
        self.save()
    }

    /// The sole authority for where a run continues.
    pub fn get_resume_point(&self) -> u32 {
        match self.state.completed_steps.iter().max() {
            Some(max) => max + 1,
            None => 1,
        }
    }
}
