//! # Lifecycle controller
//!
//! On every cadence tick the harness hands control to the
//! [`LifecycleController`], which moves the session through one of three
//! transitions and back to [`LifecycleState::Running`]:
//!
//! ```text
//! Running ──► Checkpointing  ──► Running
//! Running ──► SoftReloading  ──► Running
//! Running ──► HardRestarting ──► Running
//! ```
//!
//! - **Checkpoint**: `CHECKPOINT` on the live connection; handle unchanged.
//! - **Soft reload**: close, reopen the same database file with the same
//!   connect options, `LOAD` the extension.
//! - **Hard restart**: `PRAGMA disable_checkpoint_on_shutdown`, close, open
//!   a connection with no database bound, `LOAD` the extension, `ATTACH` the
//!   database file and `USE` it.
//!
//! Every step either succeeds or aborts the transition with a
//! [`LifecycleFailure`] naming the step. Nothing is retried. On failure the
//! session stays in the transitional state it was in when the step failed.

#[cfg(test)]
mod tests;

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::{Engine, Statement};
use crate::executor::{self, ExecError};
use crate::session::Session;

/// One lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Checkpoint,
    SoftReload,
    HardRestart,
}

impl LifecycleAction {
    /// The transitional state the session is in while this action runs.
    pub fn state(self) -> LifecycleState {
        match self {
            LifecycleAction::Checkpoint => LifecycleState::Checkpointing,
            LifecycleAction::SoftReload => LifecycleState::SoftReloading,
            LifecycleAction::HardRestart => LifecycleState::HardRestarting,
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleAction::Checkpoint => "checkpoint",
            LifecycleAction::SoftReload => "soft reload",
            LifecycleAction::HardRestart => "hard restart",
        })
    }
}

/// Where the session is in the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Running,
    Checkpointing,
    SoftReloading,
    HardRestarting,
}

// ------------------------------------------------------------------------------------------------
// Weighted choice
// ------------------------------------------------------------------------------------------------

/// Weights of the nested coin flips that pick a transition.
///
/// The first flip chooses a checkpoint with probability `checkpoint`. If it
/// fails, the second flip chooses a soft reload with probability
/// `soft_reload`; otherwise the transition is a hard restart. With the
/// defaults this yields 1/4 checkpoint, 3/16 soft reload and 9/16 hard
/// restart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleWeights {
    pub checkpoint: f64,
    pub soft_reload: f64,
}

impl Default for LifecycleWeights {
    fn default() -> Self {
        Self {
            checkpoint: 0.25,
            soft_reload: 0.25,
        }
    }
}

impl LifecycleWeights {
    /// Returns a description of the first weight outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("checkpoint", self.checkpoint),
            ("soft_reload", self.soft_reload),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("lifecycle.{name} must be in [0, 1], got {value}"));
            }
        }
        Ok(())
    }

    /// Picks the next transition.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> LifecycleAction {
        if rng.random::<f64>() < self.checkpoint {
            LifecycleAction::Checkpoint
        } else if rng.random::<f64>() < self.soft_reload {
            LifecycleAction::SoftReload
        } else {
            LifecycleAction::HardRestart
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Failures
// ------------------------------------------------------------------------------------------------

/// A single step inside a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStep {
    Checkpoint,
    DisableAutoCheckpoint,
    Close,
    Connect,
    LoadExtension,
    Attach,
    UseCatalog,
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleStep::Checkpoint => "checkpoint",
            LifecycleStep::DisableAutoCheckpoint => "disable checkpoint on shutdown",
            LifecycleStep::Close => "close",
            LifecycleStep::Connect => "connect",
            LifecycleStep::LoadExtension => "load extension",
            LifecycleStep::Attach => "attach",
            LifecycleStep::UseCatalog => "use catalog",
        })
    }
}

/// A transition aborted at `step`.
#[derive(Debug, Error)]
#[error("{action} failed at {step}: {source}")]
pub struct LifecycleFailure {
    pub action: LifecycleAction,
    pub step: LifecycleStep,
    #[source]
    pub source: ExecError,
}

impl LifecycleFailure {
    fn new(action: LifecycleAction, step: LifecycleStep, source: impl Into<ExecError>) -> Self {
        Self {
            action,
            step,
            source: source.into(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Controller
// ------------------------------------------------------------------------------------------------

/// Drives lifecycle transitions on a [`Session`].
pub struct LifecycleController<'a> {
    engine: &'a dyn Engine,
    disable_checkpoint_on_soft_reload: bool,
}

impl<'a> LifecycleController<'a> {
    pub fn new(engine: &'a dyn Engine) -> Self {
        Self {
            engine,
            disable_checkpoint_on_soft_reload: false,
        }
    }

    /// Also issue `PRAGMA disable_checkpoint_on_shutdown` before a soft
    /// reload, so both reconnect paths close without a final checkpoint.
    pub fn disable_checkpoint_on_soft_reload(mut self, disable: bool) -> Self {
        self.disable_checkpoint_on_soft_reload = disable;
        self
    }

    /// Whether a soft reload closes with a shutdown checkpoint.
    pub fn soft_reload_checkpoints(&self) -> bool {
        !self.disable_checkpoint_on_soft_reload
    }

    /// Whether a completed `action` leaves the current state durable.
    pub fn is_durable(&self, action: LifecycleAction) -> bool {
        match action {
            LifecycleAction::Checkpoint => true,
            LifecycleAction::SoftReload => self.soft_reload_checkpoints(),
            LifecycleAction::HardRestart => false,
        }
    }

    /// Runs `action` and increments its counter on success.
    pub fn apply(
        &self,
        session: &mut Session,
        action: LifecycleAction,
    ) -> Result<(), LifecycleFailure> {
        session.set_state(action.state());
        debug!(%action, "lifecycle: transition started");

        match action {
            LifecycleAction::Checkpoint => self.checkpoint(session)?,
            LifecycleAction::SoftReload => self.soft_reload(session)?,
            LifecycleAction::HardRestart => self.hard_restart(session)?,
        }

        session.set_state(LifecycleState::Running);
        let counters = session.counters_mut();
        match action {
            LifecycleAction::Checkpoint => counters.checkpoints += 1,
            LifecycleAction::SoftReload => counters.soft_reloads += 1,
            LifecycleAction::HardRestart => counters.hard_restarts += 1,
        }
        info!(%action, counters = %session.counters(), "lifecycle: transition complete");
        Ok(())
    }

    fn checkpoint(&self, session: &mut Session) -> Result<(), LifecycleFailure> {
        const ACTION: LifecycleAction = LifecycleAction::Checkpoint;
        executor::execute(session, &Statement::Checkpoint)
            .map_err(|e| LifecycleFailure::new(ACTION, LifecycleStep::Checkpoint, e))?;
        Ok(())
    }

    fn soft_reload(&self, session: &mut Session) -> Result<(), LifecycleFailure> {
        const ACTION: LifecycleAction = LifecycleAction::SoftReload;
        if self.disable_checkpoint_on_soft_reload {
            executor::execute(session, &Statement::DisableCheckpointOnShutdown).map_err(|e| {
                LifecycleFailure::new(ACTION, LifecycleStep::DisableAutoCheckpoint, e)
            })?;
        }
        self.reconnect(session, ACTION, true)
    }

    fn hard_restart(&self, session: &mut Session) -> Result<(), LifecycleFailure> {
        const ACTION: LifecycleAction = LifecycleAction::HardRestart;
        executor::execute(session, &Statement::DisableCheckpointOnShutdown)
            .map_err(|e| LifecycleFailure::new(ACTION, LifecycleStep::DisableAutoCheckpoint, e))?;
        self.reconnect(session, ACTION, false)?;

        let path = session.database_path().to_path_buf();
        let alias = session.catalog_alias();
        executor::execute(
            session,
            &Statement::Attach {
                path,
                alias: alias.clone(),
            },
        )
        .map_err(|e| LifecycleFailure::new(ACTION, LifecycleStep::Attach, e))?;
        executor::execute(session, &Statement::Use { alias })
            .map_err(|e| LifecycleFailure::new(ACTION, LifecycleStep::UseCatalog, e))?;
        Ok(())
    }

    /// Close, connect (bound to the database file or not), load the
    /// extension. The old handle is always closed before the new one opens.
    fn reconnect(
        &self,
        session: &mut Session,
        action: LifecycleAction,
        bind_database: bool,
    ) -> Result<(), LifecycleFailure> {
        session
            .close_handle()
            .map_err(|e| LifecycleFailure::new(action, LifecycleStep::Close, e))?;

        let path = bind_database.then(|| session.database_path().to_path_buf());
        let handle = self
            .engine
            .connect(path.as_deref(), session.connect_config())
            .map_err(|e| LifecycleFailure::new(action, LifecycleStep::Connect, e))?;
        session
            .replace_handle(handle)
            .map_err(|e| LifecycleFailure::new(action, LifecycleStep::Connect, e))?;

        let extension = session.extension_path().to_path_buf();
        executor::execute(session, &Statement::Load { extension })
            .map_err(|e| LifecycleFailure::new(action, LifecycleStep::LoadExtension, e))?;
        Ok(())
    }
}
