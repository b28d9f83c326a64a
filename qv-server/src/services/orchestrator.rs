//! Multi-agent orchestration
//!
//! One contribution task per agent, then a final integration task. Tasks run
//! in sequential batches of bounded parallelism; each task sees the outputs
//! of every earlier batch. Progress is reported as [`OrchestratorEvent`]s on
//! an mpsc channel in plan order.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::agents::{find_agent, Agent};
use super::code_extract::extract_code;
use super::llm::{LlmClient, LlmError, LlmRequest, Usage};
use super::prompts::generation_system_prompt;

pub const DEFAULT_MAX_PARALLEL: usize = 2;
pub const MAX_PARALLEL_LIMIT: usize = 4;
pub const INTEGRATOR_ID: &str = "integrator";

const CONTRIBUTION_INSTRUCTIONS: &str = "You are one specialist on a team building a single-file \
HTML/CSS/JS app. Contribute from your specialty only: concrete decisions, code fragments and \
requirements the integrator must honor. Be concise.";

const INTEGRATION_INSTRUCTIONS: &str = "Merge the team's contributions below into the final app. \
Resolve conflicts in favor of a working, coherent result.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Contribute,
    Integrate,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedTask {
    pub task_id: String,
    pub agent_id: String,
    pub kind: TaskKind,
    pub batch: usize,
}

/// Contribution tasks in agent order, then integration as the last batch
pub fn plan_tasks(agent_ids: &[&str], max_parallel: usize) -> Vec<PlannedTask> {
    let max_parallel = max_parallel.max(1);
    let mut tasks: Vec<PlannedTask> = agent_ids
        .iter()
        .enumerate()
        .map(|(i, agent_id)| PlannedTask {
            task_id: format!("task-{}", i + 1),
            agent_id: agent_id.to_string(),
            kind: TaskKind::Contribute,
            batch: i / max_parallel,
        })
        .collect();

    let integrate_batch = tasks.last().map(|t| t.batch + 1).unwrap_or(0);
    tasks.push(PlannedTask {
        task_id: format!("task-{}", agent_ids.len() + 1),
        agent_id: INTEGRATOR_ID.to_string(),
        kind: TaskKind::Integrate,
        batch: integrate_batch,
    });
    tasks
}

pub fn clamp_max_parallel(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_MAX_PARALLEL)
        .clamp(1, MAX_PARALLEL_LIMIT)
}

/// Progress events; the SSE event name is [`OrchestratorEvent::name`]
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OrchestratorEvent {
    Plan {
        run_id: String,
        tasks: Vec<PlannedTask>,
    },
    TaskStarted {
        task_id: String,
        agent_id: String,
    },
    TaskCompleted {
        task_id: String,
        agent_id: String,
        output_chars: usize,
    },
    TaskFailed {
        task_id: String,
        agent_id: String,
        error: String,
    },
    Completed {
        code: String,
        summary: String,
    },
    Failed {
        error: String,
    },
}

impl OrchestratorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plan { .. } => "plan",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("orchestration cancelled")]
    Cancelled,

    #[error("every contribution task failed")]
    AllContributionsFailed,

    #[error("integration failed: {0}")]
    Integration(String),
}

#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub code: String,
    pub summary: String,
}

struct Contribution {
    agent: String,
    output: String,
}

/// Runs a plan against an LLM client
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    /// Execute `tasks` (from [`plan_tasks`]) for `prompt`
    ///
    /// Emits `plan` first and exactly one of `completed` / `failed` last,
    /// except on cancellation, which stops without a terminal event. A closed
    /// event channel is ignored; cancellation is signalled via `cancel`.
    ///
    /// Returns the tokens spent by every finished LLM call alongside the
    /// result, whether or not the run succeeded.
    pub async fn run(
        &self,
        run_id: &str,
        prompt: &str,
        tasks: Vec<PlannedTask>,
        cancel: &CancellationToken,
        events: &mpsc::Sender<OrchestratorEvent>,
    ) -> (Result<OrchestrationOutcome, OrchestrationError>, Usage) {
        let mut usage = Usage::default();
        let result = self
            .execute(run_id, prompt, tasks, cancel, events, &mut usage)
            .await;

        match &result {
            Ok(outcome) => {
                send(
                    events,
                    OrchestratorEvent::Completed {
                        code: outcome.code.clone(),
                        summary: outcome.summary.clone(),
                    },
                )
                .await;
            }
            Err(OrchestrationError::Cancelled) => {
                info!(run_id, "Orchestration cancelled");
            }
            Err(e) => {
                warn!(run_id, error = %e, "Orchestration failed");
                send(events, OrchestratorEvent::Failed { error: e.to_string() }).await;
            }
        }

        (result, usage)
    }

    async fn execute(
        &self,
        run_id: &str,
        prompt: &str,
        tasks: Vec<PlannedTask>,
        cancel: &CancellationToken,
        events: &mpsc::Sender<OrchestratorEvent>,
        usage: &mut Usage,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        send(
            events,
            OrchestratorEvent::Plan {
                run_id: run_id.to_string(),
                tasks: tasks.clone(),
            },
        )
        .await;

        let (contribution_tasks, integration_tasks): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|t| t.kind == TaskKind::Contribute);

        let mut contributions: Vec<Contribution> = Vec::new();
        let mut attempted = 0usize;

        for batch in group_batches(contribution_tasks) {
            if cancel.is_cancelled() {
                return Err(OrchestrationError::Cancelled);
            }

            for task in &batch {
                send(
                    events,
                    OrchestratorEvent::TaskStarted {
                        task_id: task.task_id.clone(),
                        agent_id: task.agent_id.clone(),
                    },
                )
                .await;
            }

            // Prompts are built before the batch runs: tasks in one batch
            // only see earlier batches
            let requests: Vec<LlmRequest> = batch
                .iter()
                .map(|task| self.contribution_request(task, prompt, &contributions))
                .collect();

            let calls = requests.iter().map(|request| self.llm.complete(request));
            let results = tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                results = join_all(calls) => results,
            };

            attempted += batch.len();
            for (task, result) in batch.iter().zip(results) {
                match result {
                    Ok(response) => {
                        debug!(run_id, task_id = %task.task_id, "Contribution completed");
                        *usage += response.usage;
                        send(
                            events,
                            OrchestratorEvent::TaskCompleted {
                                task_id: task.task_id.clone(),
                                agent_id: task.agent_id.clone(),
                                output_chars: response.text.chars().count(),
                            },
                        )
                        .await;
                        contributions.push(Contribution {
                            agent: task.agent_id.clone(),
                            output: response.text,
                        });
                    }
                    Err(e) => {
                        warn!(run_id, task_id = %task.task_id, error = %e, "Contribution failed");
                        send(
                            events,
                            OrchestratorEvent::TaskFailed {
                                task_id: task.task_id.clone(),
                                agent_id: task.agent_id.clone(),
                                error: e.to_string(),
                            },
                        )
                        .await;
                    }
                }
            }
        }

        if attempted > 0 && contributions.is_empty() {
            return Err(OrchestrationError::AllContributionsFailed);
        }

        let Some(integration) = integration_tasks.into_iter().next() else {
            return Err(OrchestrationError::Integration("plan has no integration task".to_string()));
        };

        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }

        send(
            events,
            OrchestratorEvent::TaskStarted {
                task_id: integration.task_id.clone(),
                agent_id: integration.agent_id.clone(),
            },
        )
        .await;

        let request = self.integration_request(prompt, &contributions);
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            result = self.llm.complete(&request) => result,
        };

        let response = result.map_err(|e: LlmError| {
            OrchestrationError::Integration(e.to_string())
        })?;
        *usage += response.usage;

        send(
            events,
            OrchestratorEvent::TaskCompleted {
                task_id: integration.task_id.clone(),
                agent_id: integration.agent_id.clone(),
                output_chars: response.text.chars().count(),
            },
        )
        .await;

        let code = extract_code(&response.text).ok_or_else(|| {
            OrchestrationError::Integration("integrated reply contained no HTML document".to_string())
        })?;

        let agents: Vec<&str> = contributions.iter().map(|c| c.agent.as_str()).collect();
        let summary = format!(
            "Built with {} agent contribution{} ({}), integrated into a single HTML file.",
            agents.len(),
            if agents.len() == 1 { "" } else { "s" },
            agents.join(", ")
        );

        info!(run_id, contributions = agents.len(), "Orchestration completed");
        Ok(OrchestrationOutcome { code, summary })
    }

    fn contribution_request(
        &self,
        task: &PlannedTask,
        prompt: &str,
        previous: &[Contribution],
    ) -> LlmRequest {
        let persona = find_agent(&task.agent_id)
            .map(|a: &Agent| a.system_prompt)
            .unwrap_or("You are a senior software engineer.");
        let system = format!("{}\n\n{}", persona, CONTRIBUTION_INSTRUCTIONS);

        LlmRequest::prompt(Some(system), task_prompt(prompt, previous)).with_max_tokens(self.max_tokens)
    }

    fn integration_request(&self, prompt: &str, contributions: &[Contribution]) -> LlmRequest {
        let system = format!(
            "{}\n\n{}",
            generation_system_prompt(None, None),
            INTEGRATION_INSTRUCTIONS
        );
        LlmRequest::prompt(Some(system), task_prompt(prompt, contributions))
            .with_max_tokens(self.max_tokens)
    }
}

fn task_prompt(prompt: &str, previous: &[Contribution]) -> String {
    let mut text = format!("User request:\n{}", prompt);
    if !previous.is_empty() {
        text.push_str("\n\nContributions so far:");
        for c in previous {
            text.push_str(&format!("\n\n### {}\n{}", c.agent, c.output));
        }
    }
    text
}

fn group_batches(tasks: Vec<PlannedTask>) -> Vec<Vec<PlannedTask>> {
    let mut batches: Vec<Vec<PlannedTask>> = Vec::new();
    for task in tasks {
        match batches.last_mut() {
            Some(batch) if batch[0].batch == task.batch => batch.push(task),
            _ => batches.push(vec![task]),
        }
    }
    batches
}

async fn send(events: &mpsc::Sender<OrchestratorEvent>, event: OrchestratorEvent) {
    // Receiver gone means the client left; cancellation handles the rest
    let _ = events.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::{LlmResponse, LlmStream};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails contribution tasks whose system prompt mentions any of `fail_personas`
    struct ScriptedLlm {
        fail_personas: Vec<&'static str>,
        integrate_reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(fail_personas: Vec<&'static str>) -> Self {
            Self {
                fail_personas,
                integrate_reply: Ok("```html\n<html><body>done</body></html>\n```".to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            let system = request.system.clone().unwrap_or_default();
            let user = request.messages[0].content.clone();
            self.prompts.lock().unwrap().push(user);

            let usage = Usage { input_tokens: 10, output_tokens: 5 };
            if system.contains(INTEGRATION_INSTRUCTIONS) {
                return match &self.integrate_reply {
                    Ok(text) => Ok(LlmResponse { text: text.clone(), usage, stop_reason: None }),
                    Err(()) => Err(LlmError::Provider("integration down".into())),
                };
            }
            if self.fail_personas.iter().any(|p| system.contains(p)) {
                return Err(LlmError::Provider("boom".into()));
            }
            Ok(LlmResponse { text: "contribution".to_string(), usage, stop_reason: None })
        }

        async fn stream(&self, _request: &LlmRequest) -> Result<LlmStream, LlmError> {
            Err(LlmError::Provider("not scripted".into()))
        }
    }

    async fn run_with(
        llm: ScriptedLlm,
        agents: &[&str],
        max_parallel: usize,
    ) -> (Result<OrchestrationOutcome, OrchestrationError>, Usage, Vec<OrchestratorEvent>, Arc<ScriptedLlm>) {
        let llm = Arc::new(llm);
        let orchestrator = Orchestrator::new(llm.clone(), 1000);
        let (tx, mut rx) = mpsc::channel(64);
        let tasks = plan_tasks(agents, max_parallel);
        let (result, usage) = orchestrator
            .run("run-1", "make a game", tasks, &CancellationToken::new(), &tx)
            .await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (result, usage, events, llm)
    }

    #[test]
    fn test_plan_batches() {
        let tasks = plan_tasks(&["a", "b", "c"], 2);
        let batches: Vec<usize> = tasks.iter().map(|t| t.batch).collect();
        assert_eq!(batches, vec![0, 0, 1, 2]);
        assert_eq!(tasks[3].kind, TaskKind::Integrate);
        assert_eq!(tasks[3].task_id, "task-4");
    }

    #[test]
    fn test_clamp_max_parallel() {
        assert_eq!(clamp_max_parallel(None), 2);
        assert_eq!(clamp_max_parallel(Some(0)), 1);
        assert_eq!(clamp_max_parallel(Some(10)), 4);
    }

    #[tokio::test]
    async fn test_successful_run_event_order() {
        let agents = ["ui-designer", "game-developer", "frontend-architect"];
        let (result, usage, events, llm) = run_with(ScriptedLlm::new(vec![]), &agents, 2).await;

        let outcome = result.unwrap();
        assert_eq!(outcome.code, "<html><body>done</body></html>");
        assert_eq!(usage.total(), 4 * 15);

        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "plan",
                "task_started", "task_started", "task_completed", "task_completed",
                "task_started", "task_completed",
                "task_started", "task_completed",
                "completed",
            ]
        );

        // Batch results arrive in plan order
        let completed: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::TaskCompleted { task_id, .. } => Some(task_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec!["task-1", "task-2", "task-3", "task-4"]);

        // First batch sees no prior output; the second batch sees both
        let prompts = llm.prompts.lock().unwrap();
        assert!(!prompts[0].contains("Contributions so far"));
        assert!(!prompts[1].contains("Contributions so far"));
        assert!(prompts[2].contains("### ui-designer"));
        assert!(prompts[2].contains("### game-developer"));
    }

    #[tokio::test]
    async fn test_failed_task_does_not_stop_run() {
        let agents = ["ui-designer", "game-developer"];
        let (result, usage, events, _) =
            run_with(ScriptedLlm::new(vec!["game developer"]), &agents, 2).await;

        assert!(result.is_ok());
        // The failed contribution spent nothing
        assert_eq!(usage.total(), 2 * 15);
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::TaskFailed { agent_id, .. } if agent_id == "game-developer"
        )));
        assert_eq!(events.last().map(|e| e.name()), Some("completed"));
    }

    #[tokio::test]
    async fn test_all_contributions_failed_aborts() {
        let agents = ["game-developer"];
        let (result, usage, events, llm) =
            run_with(ScriptedLlm::new(vec!["game developer"]), &agents, 2).await;

        assert!(matches!(result, Err(OrchestrationError::AllContributionsFailed)));
        assert_eq!(usage.total(), 0);
        assert_eq!(events.last().map(|e| e.name()), Some("failed"));
        // Integration never ran
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_integration_failure_fails_run() {
        let mut llm = ScriptedLlm::new(vec![]);
        llm.integrate_reply = Err(());
        let (result, usage, events, _) = run_with(llm, &["ui-designer"], 2).await;

        assert!(matches!(result, Err(OrchestrationError::Integration(_))));
        assert_eq!(events.last().map(|e| e.name()), Some("failed"));
        // The contribution still counts
        assert_eq!(usage.total(), 15);
    }

    #[tokio::test]
    async fn test_integration_without_document_keeps_usage() {
        let mut llm = ScriptedLlm::new(vec![]);
        llm.integrate_reply = Ok("just prose, no document".to_string());
        let (result, usage, events, _) = run_with(llm, &["ui-designer", "game-developer"], 2).await;

        assert!(matches!(result, Err(OrchestrationError::Integration(_))));
        assert_eq!(events.last().map(|e| e.name()), Some("failed"));
        assert_eq!(usage.total(), 3 * 15);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let orchestrator = Orchestrator::new(Arc::new(ScriptedLlm::new(vec![])), 1000);
        let (tx, _rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, usage) = orchestrator
            .run("run-2", "x", plan_tasks(&["ui-designer"], 2), &cancel, &tx)
            .await;
        assert!(matches!(result, Err(OrchestrationError::Cancelled)));
        assert_eq!(usage, Usage::default());
    }
}
