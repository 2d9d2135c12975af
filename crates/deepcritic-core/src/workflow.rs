use std::sync::Arc;

use graph_flow::{
    ExecutionStatus, FlowRunner, GraphBuilder, InMemorySessionStorage, Session, SessionStorage,
    Task,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::collaborator::AgentRuntime;
use crate::config::{PlannerConfig, RevisionConfig};
use crate::critic::UnparseablePolicy;
use crate::metrics::record_loop_metrics;
use crate::report::ResearchReport;
use crate::tasks::{
    CriticTask, FinalizeTask, LoopShared, PlanTask, ResearchTask, StopReason, keys,
};
use crate::trace::{TraceCollector, TraceEvent};
use crate::DeepCriticError;

/// Bounds and policies for one revision loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_revisions: u32,
    pub research_step_limit: u32,
    pub critic_step_limit: u32,
    pub on_unparseable: UnparseablePolicy,
    pub strict_format: bool,
    pub planner_step_limit: u32,
    pub max_search_queries: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from(&RevisionConfig::default())
    }
}

impl From<&RevisionConfig> for LoopSettings {
    fn from(config: &RevisionConfig) -> Self {
        let planner = PlannerConfig::default();
        Self {
            max_revisions: config.max_revisions,
            research_step_limit: config.research_step_limit,
            critic_step_limit: config.critic_step_limit,
            on_unparseable: config.on_unparseable_critique,
            strict_format: config.strict_format,
            planner_step_limit: planner.step_limit,
            max_search_queries: planner.max_search_queries as usize,
        }
    }
}

impl LoopSettings {
    pub fn with_planner_config(mut self, planner: &PlannerConfig) -> Self {
        self.planner_step_limit = planner.step_limit;
        self.max_search_queries = planner.max_search_queries as usize;
        self
    }
}

/// Result of answering one question.
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub session_id: String,
    pub question: String,
    pub answer: String,
    pub critique_rounds: u32,
    pub revision_rounds: u32,
    pub stop_reason: StopReason,
    pub format_ok: bool,
    /// Fixes the critic still listed when the loop stopped.
    pub unresolved: Vec<String>,
    pub trace: TraceCollector,
}

impl ResearchOutcome {
    /// Typed view of the final answer, when it follows the section contract.
    pub fn report(&self) -> Option<ResearchReport> {
        ResearchReport::parse(&self.answer).ok()
    }
}

/// Drives research and critique rounds for one question at a time.
///
/// The loop runs as a `graph_flow` graph:
/// an optional `plan` step, then `research -> critic` while revision rounds
/// remain, `critic -> research` when the critic asks for fixes, and
/// `finalize` otherwise.
pub struct RevisionController {
    planner: Option<Arc<dyn AgentRuntime>>,
    research: Arc<dyn AgentRuntime>,
    critic: Arc<dyn AgentRuntime>,
    artifacts: ArtifactStore,
    settings: LoopSettings,
}

impl RevisionController {
    pub fn new(
        research: Arc<dyn AgentRuntime>,
        critic: Arc<dyn AgentRuntime>,
        artifacts: ArtifactStore,
        settings: LoopSettings,
    ) -> Self {
        Self {
            planner: None,
            research,
            critic,
            artifacts,
            settings,
        }
    }

    /// Run `planner` once per question before the first research turn.
    pub fn with_planner(mut self, planner: Arc<dyn AgentRuntime>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Answer `question`, revising until the critic is satisfied or the
    /// revision budget is spent. Collaborator faults are returned as-is.
    #[instrument(name = "revision.run", skip(self, question))]
    pub async fn run(&self, question: &str) -> Result<ResearchOutcome, DeepCriticError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DeepCriticError::EmptyQuestion);
        }

        let shared = Arc::new(LoopShared::new(
            self.planner.clone(),
            self.research.clone(),
            self.critic.clone(),
            self.artifacts.clone(),
            self.settings.clone(),
        ));
        let (graph, start_task) = build_graph(shared.clone(), self.settings.max_revisions);

        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(graph, storage.clone());

        let session_id = Uuid::new_v4().to_string();
        let session = Session::new_from_task(session_id.clone(), &start_task);
        session.context.set(keys::QUESTION, question.to_string()).await;
        session.context.set(keys::REVISION_ROUNDS, 0u32).await;
        session.context.set(keys::CRITIQUE_ROUNDS, 0u32).await;

        storage
            .save(session)
            .await
            .map_err(|err| DeepCriticError::Workflow(format!("failed to persist session: {err}")))?;

        info!(session_id = %session_id, "starting revision loop");

        // research + critic per round, plus plan and finalize
        let max_runs = (self.settings.max_revisions as usize + 1) * 2 + 2;
        let mut completed = false;
        for _ in 0..max_runs {
            let result = match runner.run(&session_id).await {
                Ok(result) => result,
                Err(err) => {
                    return Err(shared
                        .take_fault()
                        .unwrap_or_else(|| DeepCriticError::Workflow(err.to_string())));
                }
            };

            match result.status {
                ExecutionStatus::Completed => {
                    completed = true;
                    break;
                }
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => {
                    return Err(shared
                        .take_fault()
                        .unwrap_or(DeepCriticError::Workflow(message)));
                }
            }
        }
        if !completed {
            return Err(DeepCriticError::Workflow(format!(
                "revision graph did not complete within {max_runs} runs"
            )));
        }

        let session = storage
            .get(&session_id)
            .await
            .map_err(|err| DeepCriticError::Workflow(format!("failed to reload session: {err}")))?
            .ok_or_else(|| DeepCriticError::Workflow("session missing after execution".into()))?;
        let context = &session.context;

        let outcome = ResearchOutcome {
            session_id,
            question: question.to_string(),
            answer: context.get(keys::ANSWER).await.unwrap_or_default(),
            critique_rounds: context.get(keys::CRITIQUE_ROUNDS).await.unwrap_or(0),
            revision_rounds: context.get(keys::REVISION_ROUNDS).await.unwrap_or(0),
            stop_reason: context
                .get(keys::STOP_REASON)
                .await
                .unwrap_or(StopReason::BudgetExhausted),
            format_ok: context.get(keys::FORMAT_OK).await.unwrap_or(false),
            unresolved: context.get(keys::PENDING).await.unwrap_or_default(),
            trace: TraceCollector::from_events(
                context
                    .get::<Vec<TraceEvent>>(keys::TRACE)
                    .await
                    .unwrap_or_default(),
            ),
        };

        record_loop_metrics(
            outcome.stop_reason.as_str(),
            outcome.critique_rounds,
            outcome.revision_rounds,
        );

        Ok(outcome)
    }
}

fn build_graph(shared: Arc<LoopShared>, max_revisions: u32) -> (Arc<graph_flow::Graph>, String) {
    let plan = shared
        .planner
        .is_some()
        .then(|| Arc::new(PlanTask::new(shared.clone())));
    let research = Arc::new(ResearchTask::new(shared.clone()));
    let critic = Arc::new(CriticTask::new(shared.clone()));
    let finalize = Arc::new(FinalizeTask::new(shared));

    let mut builder = GraphBuilder::new("deepcritic_revision_loop")
        .add_task(research.clone())
        .add_task(critic.clone())
        .add_task(finalize.clone())
        .add_conditional_edge(
            research.id(),
            move |ctx| ctx.get_sync::<u32>(keys::REVISION_ROUNDS).unwrap_or(0) < max_revisions,
            critic.id(),
            finalize.id(),
        )
        .add_conditional_edge(
            critic.id(),
            |ctx| ctx.get_sync::<bool>(keys::REVISE).unwrap_or(false),
            research.id(),
            finalize.id(),
        );

    let start_task = match plan {
        Some(plan) => {
            builder = builder
                .add_task(plan.clone())
                .add_edge(plan.id(), research.id());
            plan.id().to_string()
        }
        None => research.id().to_string(),
    };
    let graph = builder.set_start_task(&start_task).build();

    (Arc::new(graph), start_task)
}
