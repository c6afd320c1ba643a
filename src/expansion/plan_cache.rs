use std::collections::HashMap;

use serde::Serialize;

use crate::model::{BatchExpansionResult, ExpansionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanScope {
    Single,
    Batch,
}

/// Generated chapter plans awaiting confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPlans {
    Single(ExpansionResult),
    Batch {
        project_id: String,
        result: BatchExpansionResult,
    },
}

impl CachedPlans {
    pub fn scope(&self) -> PlanScope {
        match self {
            Self::Single(_) => PlanScope::Single,
            Self::Batch { .. } => PlanScope::Batch,
        }
    }

    pub fn plan_count(&self) -> usize {
        match self {
            Self::Single(result) => result.chapter_plans.len(),
            Self::Batch { result, .. } => result
                .expansion_results
                .iter()
                .map(|r| r.chapter_plans.len())
                .sum(),
        }
    }
}

/// One slot per scope, in memory only. Storing overwrites the slot.
#[derive(Debug, Default)]
pub struct PlanCache {
    slots: HashMap<PlanScope, CachedPlans>,
}

impl PlanCache {
    pub fn store(&mut self, plans: CachedPlans) {
        let scope = plans.scope();
        if self.slots.insert(scope, plans).is_some() {
            tracing::debug!(?scope, "replaced cached plans");
        }
    }

    /// Reads without clearing so a failed commit can be retried.
    pub fn take(&self, scope: PlanScope) -> Option<&CachedPlans> {
        self.slots.get(&scope)
    }

    pub fn clear(&mut self, scope: PlanScope) {
        self.slots.remove(&scope);
    }
}
