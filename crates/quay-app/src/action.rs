//! Action pipeline — ordered steps with per-step compensating rollback.
//!
//! A pipeline runs its actions' forward functions in order. On the first
//! failure the backward (compensator) of every action that had already
//! succeeded runs in reverse order, undoing its external effect, and the
//! failing step's error is returned. The store is non-transactional
//! across collections; compensators are the substitute.

use tracing::{debug, warn};

use quay_core::types::{App, Plan, User};

use crate::error::AppResult;
use crate::lifecycle::AppService;

/// Shared context threaded through a pipeline's actions.
///
/// Carries the coordinator's collaborators plus the per-operation data;
/// actions read and update it as the pipeline progresses.
pub struct PipelineCtx<'a> {
    pub svc: &'a AppService,
    pub app: App,
    pub user: User,
    /// Units to add (add-units pipeline).
    pub units: u32,
    pub process: String,
    /// The plan being replaced (change-plan pipeline).
    pub old_plan: Option<Plan>,
    /// App token issued during env export, consumed by rollback.
    pub token: Option<String>,
    /// Container ids created so far, consumed by rollback.
    pub created_containers: Vec<String>,
}

impl<'a> PipelineCtx<'a> {
    pub fn new(svc: &'a AppService, app: App) -> Self {
        Self {
            svc,
            app,
            user: User::default(),
            units: 0,
            process: String::new(),
            old_plan: None,
            token: None,
            created_containers: Vec::new(),
        }
    }
}

/// One step of a pipeline.
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the step's effect.
    fn forward(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()>;

    /// Undo the step's effect after a later step failed. Compensators
    /// must not fail; problems are logged inside the implementation.
    fn backward(&self, _ctx: &mut PipelineCtx<'_>) {}
}

/// An ordered list of actions executed with rollback-on-failure.
pub struct Pipeline {
    actions: Vec<Box<dyn Action>>,
}

impl Pipeline {
    pub fn new(actions: Vec<Box<dyn Action>>) -> Self {
        Self { actions }
    }

    /// Run every action's forward in order. On failure, run the
    /// backward of each completed action in reverse order and return
    /// the error.
    pub fn execute(&self, ctx: &mut PipelineCtx<'_>) -> AppResult<()> {
        let mut completed: Vec<&dyn Action> = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            debug!(step = action.name(), "pipeline forward");
            if let Err(err) = action.forward(ctx) {
                warn!(
                    step = action.name(),
                    error = %err,
                    "pipeline step failed, rolling back"
                );
                for done in completed.iter().rev() {
                    debug!(step = done.name(), "pipeline backward");
                    done.backward(ctx);
                }
                return Err(err);
            }
            completed.push(action.as_ref());
        }
        Ok(())
    }
}
