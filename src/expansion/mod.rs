//! Outline expansion: turning outlines into chapter plans and committing them.

pub mod order;
pub mod orchestrator;
pub mod plan_cache;

use thiserror::Error;

use crate::model::OutlineRef;

pub use orchestrator::{
    CommitReport, DeletionReport, ExpansionParams, ExpansionState, ExpansionTarget,
    GenerationOutcome, Orchestrator, delete_expanded_chapters,
};
pub use plan_cache::{CachedPlans, PlanCache, PlanScope};

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("outline {blocking} has not been expanded yet; expand it first")]
    OutOfOrder { blocking: OutlineRef },

    /// Terminal error reported by the generation stream, kept verbatim.
    #[error("{0}")]
    Generation(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("no cached chapter plans for this target; generate them again")]
    StaleCache,

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
