use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use graph_flow::{Context, GraphError, NextAction, Task, TaskResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::artifacts::{ArtifactStore, NotesEntry, OpenQuestion};
use crate::collaborator::AgentRuntime;
use crate::critic::{CriticDecision, UnparseablePolicy, resolved_since};
use crate::plan::ResearchPlan;
use crate::prompts;
use crate::report::ResearchReport;
use crate::trace::TraceEvent;
use crate::workflow::LoopSettings;
use crate::DeepCriticError;

/// Context keys shared by the revision tasks.
pub(crate) mod keys {
    pub const QUESTION: &str = "question";
    pub const PLAN: &str = "plan";
    pub const ANSWER: &str = "answer.current";
    pub const FORMAT_OK: &str = "answer.format_ok";
    pub const REVISION_ROUNDS: &str = "loop.revision_rounds";
    pub const CRITIQUE_ROUNDS: &str = "loop.critique_rounds";
    pub const STOP_REASON: &str = "loop.stop_reason";
    pub const REVISE: &str = "critique.revise";
    pub const FIXES: &str = "critique.fixes";
    pub const PENDING: &str = "questions.pending";
    pub const TRACE: &str = "trace.events";
}

/// Why a revision loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The critic answered `ENOUGH`.
    CriticSatisfied,
    /// `max_revisions` revision rounds were used.
    BudgetExhausted,
    /// The critic reply was unparseable and the `accept` policy is active.
    UnparseableCritique,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::CriticSatisfied => "critic_satisfied",
            StopReason::BudgetExhausted => "budget_exhausted",
            StopReason::UnparseableCritique => "unparseable_critique",
        }
    }
}

/// Collaborators and settings for one run, plus the first fault raised by a task.
///
/// `graph_flow` flattens task errors into strings; the typed error is parked
/// here so the controller can hand it back unchanged.
pub(crate) struct LoopShared {
    pub planner: Option<Arc<dyn AgentRuntime>>,
    pub research: Arc<dyn AgentRuntime>,
    pub critic: Arc<dyn AgentRuntime>,
    pub artifacts: ArtifactStore,
    pub settings: LoopSettings,
    fault: Mutex<Option<DeepCriticError>>,
}

impl LoopShared {
    pub fn new(
        planner: Option<Arc<dyn AgentRuntime>>,
        research: Arc<dyn AgentRuntime>,
        critic: Arc<dyn AgentRuntime>,
        artifacts: ArtifactStore,
        settings: LoopSettings,
    ) -> Self {
        Self {
            planner,
            research,
            critic,
            artifacts,
            settings,
            fault: Mutex::new(None),
        }
    }

    fn fail(&self, task: &str, err: impl Into<DeepCriticError>) -> GraphError {
        let err = err.into();
        let message = format!("{task}: {err}");
        if let Ok(mut slot) = self.fault.lock() {
            slot.get_or_insert(err);
        }
        GraphError::TaskExecutionFailed(message)
    }

    pub fn take_fault(&self) -> Option<DeepCriticError> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }
}

async fn record_trace(context: &Context, step: &str, round: u32, message: impl Into<String>) {
    let mut events: Vec<TraceEvent> = context.get(keys::TRACE).await.unwrap_or_default();
    events.push(TraceEvent::new(step, round, message));
    context.set(keys::TRACE, events).await;
}

/// Asks the planner for sub-questions and search queries before research starts.
///
/// A reply that is not a usable plan is logged and research proceeds without
/// one; a collaborator fault ends the run.
pub struct PlanTask {
    shared: Arc<LoopShared>,
}

impl PlanTask {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl Task for PlanTask {
    fn id(&self) -> &str {
        "plan"
    }

    #[instrument(name = "task.plan", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let shared = &self.shared;
        let Some(planner) = shared.planner.as_ref() else {
            return Ok(TaskResult::new(None, NextAction::ContinueAndExecute));
        };
        let question: String = context.get(keys::QUESTION).await.unwrap_or_default();

        info!(collaborator = planner.name(), "invoking planner");
        let reply = planner
            .run_turn(prompts::plan_turn(
                &question,
                shared.settings.max_search_queries,
                shared.settings.planner_step_limit,
            ))
            .await
            .map_err(|err| shared.fail(self.id(), err))?;

        let message = match ResearchPlan::parse(&reply, shared.settings.max_search_queries) {
            Ok(plan) => {
                let message = format!(
                    "plan: {} sub-questions, {} searches",
                    plan.sub_questions.len(),
                    plan.search_queries.len()
                );
                context.set(keys::PLAN, plan).await;
                message
            }
            Err(err) => {
                warn!(error = %err, "planner reply ignored; researching without a plan");
                format!("plan skipped ({err})")
            }
        };
        record_trace(&context, self.id(), 0, message.clone()).await;

        Ok(TaskResult::new(
            Some(message),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// Invokes the research collaborator, first with the question (and plan, if
/// any) and then with the critic's fixes as feedback.
pub struct ResearchTask {
    shared: Arc<LoopShared>,
}

impl ResearchTask {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl Task for ResearchTask {
    fn id(&self) -> &str {
        "research"
    }

    #[instrument(name = "task.research", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let shared = &self.shared;
        let settings = &shared.settings;
        let question: String = context.get(keys::QUESTION).await.unwrap_or_default();
        let revising: bool = context.get(keys::REVISE).await.unwrap_or(false);
        let mut revision_rounds: u32 = context.get(keys::REVISION_ROUNDS).await.unwrap_or(0);

        let (turn, notes_context) = if revising {
            let fixes: Vec<String> = context.get(keys::FIXES).await.unwrap_or_default();
            revision_rounds += 1;
            context.set(keys::REVISION_ROUNDS, revision_rounds).await;
            context.set(keys::REVISE, false).await;
            (
                prompts::revision_turn(&question, &fixes, settings.research_step_limit),
                prompts::revision_message(&question, &fixes),
            )
        } else {
            let plan: Option<ResearchPlan> = context.get(keys::PLAN).await;
            let mut notes_context = format!("Question: {question}");
            if let Some(plan) = &plan {
                notes_context = format!("{notes_context}\n{}", plan.render());
            }
            (
                prompts::research_turn(&question, plan.as_ref(), settings.research_step_limit),
                notes_context,
            )
        };

        info!(
            round = revision_rounds,
            collaborator = shared.research.name(),
            "invoking research collaborator"
        );
        let answer = shared
            .research
            .run_turn(turn)
            .await
            .map_err(|err| shared.fail(self.id(), err))?;

        let format_ok = match ResearchReport::parse(&answer) {
            Ok(report) => {
                shared
                    .artifacts
                    .write_answer(&answer)
                    .map_err(|err| shared.fail(self.id(), err))?;
                shared
                    .artifacts
                    .append_notes(&NotesEntry::from_report(notes_context, &report))
                    .map_err(|err| shared.fail(self.id(), err))?;
                debug!(
                    round = revision_rounds,
                    sources = report.source_urls().len(),
                    "answer persisted"
                );
                true
            }
            Err(format_err) => {
                if settings.strict_format {
                    return Err(shared.fail(self.id(), format_err));
                }
                warn!(
                    round = revision_rounds,
                    error = %format_err,
                    "research answer failed the section format check; output artifact left unchanged"
                );
                shared
                    .artifacts
                    .append_notes(&NotesEntry::unstructured(
                        notes_context,
                        &format_err.to_string(),
                    ))
                    .map_err(|err| shared.fail(self.id(), err))?;
                false
            }
        };

        context.set(keys::ANSWER, answer.clone()).await;
        context.set(keys::FORMAT_OK, format_ok).await;
        record_trace(
            &context,
            self.id(),
            revision_rounds,
            format!(
                "answer captured ({} chars, format {})",
                answer.chars().count(),
                if format_ok { "ok" } else { "invalid" }
            ),
        )
        .await;

        Ok(TaskResult::new(
            Some(format!("Research round {revision_rounds} complete")),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// Asks the critic to review the current answer and records its decision.
pub struct CriticTask {
    shared: Arc<LoopShared>,
}

impl CriticTask {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }

    fn append_questions(&self, entries: &[OpenQuestion]) -> Result<(), DeepCriticError> {
        for entry in entries {
            self.shared.artifacts.append_open_question(entry)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Task for CriticTask {
    fn id(&self) -> &str {
        "critic"
    }

    #[instrument(name = "task.critic", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let shared = &self.shared;
        let question: String = context.get(keys::QUESTION).await.unwrap_or_default();
        let answer: String = context.get(keys::ANSWER).await.unwrap_or_default();
        let critique_rounds: u32 = context.get::<u32>(keys::CRITIQUE_ROUNDS).await.unwrap_or(0) + 1;
        context.set(keys::CRITIQUE_ROUNDS, critique_rounds).await;

        info!(
            round = critique_rounds,
            collaborator = shared.critic.name(),
            "invoking critic collaborator"
        );
        let reply = shared
            .critic
            .run_turn(prompts::critic_turn(
                &question,
                &answer,
                shared.settings.critic_step_limit,
            ))
            .await
            .map_err(|err| shared.fail(self.id(), err))?;

        shared
            .artifacts
            .append_critique(critique_rounds, &reply)
            .map_err(|err| shared.fail(self.id(), err))?;

        let pending: Vec<String> = context.get(keys::PENDING).await.unwrap_or_default();

        let verdict = match CriticDecision::parse(&reply) {
            Ok(CriticDecision::Sufficient) => {
                let resolved: Vec<OpenQuestion> =
                    pending.into_iter().map(OpenQuestion::Resolved).collect();
                self.append_questions(&resolved)
                    .map_err(|err| shared.fail(self.id(), err))?;
                context.set(keys::PENDING, Vec::<String>::new()).await;
                context.set(keys::REVISE, false).await;
                context
                    .set(keys::STOP_REASON, StopReason::CriticSatisfied)
                    .await;
                info!(round = critique_rounds, "critic judged the answer sufficient");
                "verdict: enough".to_string()
            }
            Ok(CriticDecision::ReviseWith(fixes)) => {
                let mut entries: Vec<OpenQuestion> = resolved_since(&pending, &fixes)
                    .into_iter()
                    .map(OpenQuestion::Resolved)
                    .collect();
                entries.extend(
                    resolved_since(&fixes, &pending)
                        .into_iter()
                        .map(OpenQuestion::Unresolved),
                );
                self.append_questions(&entries)
                    .map_err(|err| shared.fail(self.id(), err))?;

                info!(
                    round = critique_rounds,
                    fixes = fixes.len(),
                    "critic requested a revision"
                );
                context.set(keys::PENDING, fixes.clone()).await;
                context.set(keys::FIXES, fixes.clone()).await;
                context.set(keys::REVISE, true).await;
                format!("verdict: revise ({} fixes)", fixes.len())
            }
            Err(parse_err) => match shared.settings.on_unparseable {
                UnparseablePolicy::Fail => {
                    return Err(shared.fail(self.id(), parse_err));
                }
                UnparseablePolicy::Accept => {
                    warn!(
                        round = critique_rounds,
                        error = %parse_err,
                        "Unexpected critic response. Stopping revisions."
                    );
                    context.set(keys::REVISE, false).await;
                    context
                        .set(keys::STOP_REASON, StopReason::UnparseableCritique)
                        .await;
                    format!("verdict: unparseable ({parse_err})")
                }
            },
        };

        record_trace(&context, self.id(), critique_rounds, verdict.clone()).await;

        Ok(TaskResult::new(
            Some(verdict),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// Closes the run: settles the stop reason and appends the round summary.
pub struct FinalizeTask {
    shared: Arc<LoopShared>,
}

impl FinalizeTask {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl Task for FinalizeTask {
    fn id(&self) -> &str {
        "finalize"
    }

    #[instrument(name = "task.finalize", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let critique_rounds: u32 = context.get(keys::CRITIQUE_ROUNDS).await.unwrap_or(0);
        let revision_rounds: u32 = context.get(keys::REVISION_ROUNDS).await.unwrap_or(0);
        let stop_reason: StopReason = context
            .get(keys::STOP_REASON)
            .await
            .unwrap_or(StopReason::BudgetExhausted);
        context.set(keys::STOP_REASON, stop_reason).await;

        self.shared
            .artifacts
            .append_round_summary(critique_rounds, revision_rounds)
            .map_err(|err| self.shared.fail(self.id(), err))?;

        let summary = format!(
            "Critique rounds: {critique_rounds}, Revision rounds: {revision_rounds}"
        );
        record_trace(
            &context,
            self.id(),
            revision_rounds,
            format!("stopped: {}", stop_reason.as_str()),
        )
        .await;

        info!(
            critique_rounds,
            revision_rounds,
            stop_reason = stop_reason.as_str(),
            "revision loop finished"
        );

        Ok(TaskResult::new(Some(summary), NextAction::End))
    }
}
