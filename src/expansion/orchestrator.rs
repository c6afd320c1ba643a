use std::sync::Arc;

use futures::StreamExt as _;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::NovelApi;
use crate::expansion::ExpansionError;
use crate::expansion::order::{self, OrderCheck};
use crate::expansion::plan_cache::{CachedPlans, PlanCache, PlanScope};
use crate::model::{
    BatchExpandRequest, ChapterPlan, ExistingChapter, ExpandOutlineRequest, ExpansionStrategy,
    Outline, OutlineRef,
};
use crate::sse::{self, EventStream, StreamEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpansionTarget {
    Outline {
        project_id: String,
        outline_id: String,
    },
    Project {
        project_id: String,
    },
}

impl ExpansionTarget {
    pub fn scope(&self) -> PlanScope {
        match self {
            Self::Outline { .. } => PlanScope::Single,
            Self::Project { .. } => PlanScope::Batch,
        }
    }

    fn matches(&self, plans: &CachedPlans) -> bool {
        match (self, plans) {
            (Self::Outline { outline_id, .. }, CachedPlans::Single(result)) => {
                &result.outline_id == outline_id
            }
            (Self::Project { project_id }, CachedPlans::Batch { project_id: cached, .. }) => {
                cached == project_id
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionParams {
    /// Chapters per outline.
    pub chapter_count: u32,
    pub strategy: ExpansionStrategy,
}

impl Default for ExpansionParams {
    fn default() -> Self {
        Self {
            chapter_count: 3,
            strategy: ExpansionStrategy::Balanced,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub created: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// Batch outlines whose generation produced no plans; nothing was committed for them.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpansionState {
    Idle,
    CheckingExisting,
    /// The outline was expanded before; its plans are read-only.
    HasExisting {
        chapters: Vec<ExistingChapter>,
        plans: Vec<ChapterPlan>,
    },
    Configuring,
    Generating {
        message: String,
        percent: u8,
    },
    Previewing {
        scope: PlanScope,
    },
    Committing,
    Done(CommitReport),
    Cancelled,
    Blocked {
        blocking: OutlineRef,
    },
}

impl ExpansionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingExisting => "checking_existing",
            Self::HasExisting { .. } => "has_existing",
            Self::Configuring => "configuring",
            Self::Generating { .. } => "generating",
            Self::Previewing { .. } => "previewing",
            Self::Committing => "committing",
            Self::Done(_) => "done",
            Self::Cancelled => "cancelled",
            Self::Blocked { .. } => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Cancelled | Self::Blocked { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Previewing,
    Cancelled,
}

/// Drives one expansion session: check, generate, preview, commit.
///
/// Generation and commit are separate steps. Generated plans are held in the
/// session's [`PlanCache`] until committed or discarded, so reopening a
/// preview never triggers a second generation call.
pub struct Orchestrator {
    api: Arc<dyn NovelApi>,
    cache: PlanCache,
    target: Option<ExpansionTarget>,
    state: ExpansionState,
    state_tx: watch::Sender<ExpansionState>,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn NovelApi>) -> Self {
        let (state_tx, _) = watch::channel(ExpansionState::Idle);
        Self {
            api,
            cache: PlanCache::default(),
            target: None,
            state: ExpansionState::Idle,
            state_tx,
        }
    }

    pub fn state(&self) -> &ExpansionState {
        &self.state
    }

    pub fn target(&self) -> Option<&ExpansionTarget> {
        self.target.as_ref()
    }

    /// Every transition, including each progress update, is published here.
    pub fn subscribe(&self) -> watch::Receiver<ExpansionState> {
        self.state_tx.subscribe()
    }

    /// Plans cached for the current target, if any.
    pub fn cached_plans(&self) -> Option<&CachedPlans> {
        let target = self.target.as_ref()?;
        self.cache
            .take(target.scope())
            .filter(|plans| target.matches(plans))
    }

    pub async fn begin(
        &mut self,
        target: ExpansionTarget,
        outlines: &[Outline],
    ) -> Result<(), ExpansionError> {
        self.require("begin", |s| matches!(s, ExpansionState::Idle))?;
        self.target = Some(target.clone());

        let outline_id = match target {
            ExpansionTarget::Project { project_id } => {
                // Batch expansion walks every outline in order on the backend
                // and skips the ones that already have chapters.
                tracing::info!(%project_id, "begin batch expansion");
                self.set_state(ExpansionState::Configuring);
                return Ok(());
            }
            ExpansionTarget::Outline { outline_id, .. } => outline_id,
        };

        tracing::info!(%outline_id, "begin outline expansion");
        if let OrderCheck::Blocked { blocking } =
            order::validate_order_with(self.api.as_ref(), &outline_id, outlines).await
        {
            self.set_state(ExpansionState::Blocked {
                blocking: blocking.clone(),
            });
            return Err(ExpansionError::OutOfOrder { blocking });
        }

        self.set_state(ExpansionState::CheckingExisting);
        let existing = match self.api.outline_chapters(&outline_id).await {
            Ok(existing) => existing,
            Err(err) => {
                self.set_state(ExpansionState::Idle);
                return Err(err.context(format!("check chapters of outline {outline_id}")).into());
            }
        };

        if existing.has_chapters {
            self.set_state(ExpansionState::HasExisting {
                chapters: existing.chapters,
                plans: existing.expansion_plans.unwrap_or_default(),
            });
        } else {
            self.set_state(ExpansionState::Configuring);
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), ExpansionError> {
        self.require("close", |s| matches!(s, ExpansionState::HasExisting { .. }))?;
        self.set_state(ExpansionState::Idle);
        Ok(())
    }

    /// Deletes the existing chapters one at a time, then moves on to
    /// configuration. Stops at the first failure and keeps the chapters that
    /// were not deleted.
    pub async fn delete_existing(&mut self) -> Result<usize, ExpansionError> {
        let ExpansionState::HasExisting { chapters, plans } = &self.state else {
            return Err(self.invalid("delete existing chapters"));
        };
        let chapters = chapters.clone();
        let plans = plans.clone();

        for (idx, chapter) in chapters.iter().enumerate() {
            if let Err(err) = self.api.delete_chapter(&chapter.id).await {
                self.set_state(ExpansionState::HasExisting {
                    chapters: chapters[idx..].to_vec(),
                    plans,
                });
                return Err(err
                    .context(format!("delete chapter {}", chapter.chapter_number))
                    .into());
            }
            tracing::info!(
                chapter_id = %chapter.id,
                chapter_number = chapter.chapter_number,
                "deleted chapter"
            );
        }

        self.set_state(ExpansionState::Configuring);
        Ok(chapters.len())
    }

    pub async fn generate(
        &mut self,
        params: &ExpansionParams,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, ExpansionError> {
        self.require("generate", |s| matches!(s, ExpansionState::Configuring))?;
        let Some(target) = self.target.clone() else {
            return Err(self.invalid("generate"));
        };

        let scope = target.scope();
        self.cache.clear(scope);
        self.set_state(ExpansionState::Generating {
            message: String::new(),
            percent: 0,
        });

        let plans = match target {
            ExpansionTarget::Outline { outline_id, .. } => {
                let request = ExpandOutlineRequest::preview(params.chapter_count, params.strategy);
                tracing::info!(
                    %outline_id,
                    chapters = params.chapter_count,
                    strategy = %params.strategy,
                    "generate chapter plans"
                );
                let opened = self.api.expand_outline(&outline_id, &request).await;
                self.consume(opened, &cancel)
                    .await?
                    .map(CachedPlans::Single)
            }
            ExpansionTarget::Project { project_id } => {
                let request = BatchExpandRequest::preview(
                    project_id.clone(),
                    params.chapter_count,
                    params.strategy,
                );
                tracing::info!(
                    %project_id,
                    chapters_per_outline = params.chapter_count,
                    strategy = %params.strategy,
                    "generate chapter plans for project"
                );
                let opened = self.api.batch_expand(&request).await;
                self.consume(opened, &cancel)
                    .await?
                    .map(|result| CachedPlans::Batch { project_id, result })
            }
        };

        let Some(plans) = plans else {
            return Ok(GenerationOutcome::Cancelled);
        };
        tracing::info!(?scope, plans = plans.plan_count(), "chapter plans ready");
        self.cache.store(plans);
        self.set_state(ExpansionState::Previewing { scope });
        Ok(GenerationOutcome::Previewing)
    }

    /// Applies stream events in arrival order. `Ok(None)` means cancelled.
    async fn consume<T: Send + 'static>(
        &mut self,
        opened: anyhow::Result<EventStream<T>>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ExpansionError> {
        let stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                self.set_state(ExpansionState::Idle);
                return Err(ExpansionError::Generation(format!("{err:#}")));
            }
        };

        let mut events = sse::with_cancellation(stream, cancel.clone());
        let mut result = None;
        let mut completed = false;
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Progress(progress) => {
                    self.set_state(ExpansionState::Generating {
                        message: progress.message,
                        percent: progress.percent,
                    });
                }
                StreamEvent::Result(value) => result = Some(value),
                StreamEvent::Error { message } => {
                    tracing::warn!(%message, "generation failed");
                    self.set_state(ExpansionState::Idle);
                    return Err(ExpansionError::Generation(message));
                }
                StreamEvent::Complete => {
                    completed = true;
                    break;
                }
            }
        }

        if !completed {
            if cancel.is_cancelled() {
                tracing::info!("generation cancelled");
                self.set_state(ExpansionState::Cancelled);
                return Ok(None);
            }
            self.set_state(ExpansionState::Idle);
            return Err(ExpansionError::Generation(
                "generation stream ended before completion".to_owned(),
            ));
        }

        match result {
            Some(value) => Ok(Some(value)),
            None => {
                self.set_state(ExpansionState::Idle);
                Err(ExpansionError::Generation(
                    "generation finished without chapter plans".to_owned(),
                ))
            }
        }
    }

    /// Leaves the preview. Cached plans stay available for a later commit.
    pub fn cancel_preview(&mut self) -> Result<(), ExpansionError> {
        self.require("cancel preview", |s| {
            matches!(s, ExpansionState::Previewing { .. })
        })?;
        self.set_state(ExpansionState::Cancelled);
        Ok(())
    }

    pub fn reopen_preview(&mut self) -> Result<(), ExpansionError> {
        self.require("reopen preview", |s| {
            matches!(s, ExpansionState::Cancelled | ExpansionState::Configuring)
        })?;
        let Some(plans) = self.cached_plans() else {
            return Err(ExpansionError::StaleCache);
        };
        let scope = plans.scope();
        self.set_state(ExpansionState::Previewing { scope });
        Ok(())
    }

    /// Drops cached plans for the current target after an abandoned preview.
    pub fn discard_plans(&mut self) -> Result<(), ExpansionError> {
        self.require("discard plans", |s| matches!(s, ExpansionState::Cancelled))?;
        if let Some(target) = &self.target {
            self.cache.clear(target.scope());
        }
        self.set_state(ExpansionState::Idle);
        Ok(())
    }

    /// Persists the cached plans as chapters.
    ///
    /// Batch commits run outline by outline; a failing outline is recorded in
    /// the report and the remaining outlines are still committed.
    pub async fn commit(&mut self) -> Result<CommitReport, ExpansionError> {
        let scope = match &self.state {
            ExpansionState::Previewing { scope } => *scope,
            _ => return Err(self.invalid("commit")),
        };
        let Some(plans) = self.cached_plans().cloned() else {
            return Err(ExpansionError::StaleCache);
        };

        self.set_state(ExpansionState::Committing);
        let report = match plans {
            CachedPlans::Single(result) => {
                match self
                    .api
                    .create_chapters_from_plans(&result.outline_id, &result.chapter_plans)
                    .await
                {
                    Ok(created) => CommitReport {
                        created: created.chapters_created,
                        ..CommitReport::default()
                    },
                    Err(err) => {
                        tracing::warn!(
                            outline_id = %result.outline_id,
                            error = %format!("{err:#}"),
                            "commit failed; plans kept for retry"
                        );
                        self.set_state(ExpansionState::Previewing { scope });
                        return Err(ExpansionError::Commit(format!("{err:#}")));
                    }
                }
            }
            CachedPlans::Batch { result, .. } => {
                let mut report = CommitReport::default();
                for expansion in &result.expansion_results {
                    if expansion.chapter_plans.is_empty() {
                        tracing::warn!(
                            outline_id = %expansion.outline_id,
                            "no chapter plans generated; skipping commit"
                        );
                        report.skipped.push(expansion.outline_title.clone());
                        continue;
                    }
                    match self
                        .api
                        .create_chapters_from_plans(&expansion.outline_id, &expansion.chapter_plans)
                        .await
                    {
                        Ok(created) => {
                            tracing::info!(
                                outline_id = %expansion.outline_id,
                                created = created.chapters_created,
                                "committed outline"
                            );
                            report.created += created.chapters_created;
                        }
                        Err(err) => {
                            tracing::warn!(
                                outline_id = %expansion.outline_id,
                                error = %format!("{err:#}"),
                                "commit failed for outline"
                            );
                            report.failed += 1;
                            report
                                .errors
                                .push(format!("{}: {err:#}", expansion.outline_title));
                        }
                    }
                }
                report
            }
        };

        self.cache.clear(scope);
        tracing::info!(
            created = report.created,
            failed = report.failed,
            skipped = report.skipped.len(),
            "expansion committed"
        );
        self.set_state(ExpansionState::Done(report.clone()));
        Ok(report)
    }

    pub fn reset(&mut self) -> Result<(), ExpansionError> {
        self.require("reset", |s| {
            s.is_terminal() || matches!(s, ExpansionState::Idle)
        })?;
        self.target = None;
        self.set_state(ExpansionState::Idle);
        Ok(())
    }

    fn require(
        &self,
        action: &'static str,
        allowed: impl Fn(&ExpansionState) -> bool,
    ) -> Result<(), ExpansionError> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> ExpansionError {
        ExpansionError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }

    fn set_state(&mut self, next: ExpansionState) {
        if next.name() != self.state.name() {
            tracing::info!(from = self.state.name(), to = next.name(), "expansion state");
        } else if let ExpansionState::Generating { message, percent } = &next {
            tracing::debug!(%message, percent, "generation progress");
        }
        self.state = next.clone();
        self.state_tx.send_replace(next);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub outlines: usize,
    pub chapters: usize,
}

/// Deletes the chapters of every expanded outline. Outlines and chapters are
/// processed strictly one after another; the backend keeps an aggregate word
/// count that concurrent deletes would race on.
pub async fn delete_expanded_chapters(
    api: &dyn NovelApi,
    outlines: &[Outline],
) -> anyhow::Result<DeletionReport> {
    let mut ordered: Vec<&Outline> = outlines.iter().collect();
    ordered.sort_by_key(|o| o.order_index);

    let mut report = DeletionReport::default();
    for outline in ordered {
        let existing = api.outline_chapters(&outline.id).await.map_err(|err| {
            err.context(format!("check chapters of outline {}", outline.id))
        })?;
        if !existing.has_chapters {
            continue;
        }
        for chapter in &existing.chapters {
            api.delete_chapter(&chapter.id)
                .await
                .map_err(|err| err.context(format!("delete chapter {}", chapter.id)))?;
            report.chapters += 1;
        }
        report.outlines += 1;
        tracing::info!(
            outline_id = %outline.id,
            chapters = existing.chapters.len(),
            "deleted expanded chapters"
        );
    }
    Ok(report)
}
