//! Round controller - the debate state machine
//!
//! Drives generate, critique, synthesize, consensus, and judge phases over
//! the available backends, under the token budget and the debate deadline.
//! Worker failures degrade the candidate set; only zero backends at start
//! or a fully failed first round are fatal.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::batch::{run_in_batches, DEFAULT_BATCH_WIDTH};
use crate::budget::BudgetTracker;
use crate::error::{AbortedDebate, DebateError, TaskError};
use crate::model::{ModelDescriptor, ModelRegistry, Participant};
use crate::notify::{Notifier, NotifyLevel};
use crate::runner::{BackendClient, RetryPolicy, TaskRunner};
use crate::strategy::{JudgeVerdict, PromptPhase, Strategy, StrategyMap};
use crate::telemetry::{Collector, PhaseClock, ResultAssembler};
use crate::types::{
    CandidateRecord, DebateConfig, DebateContext, DebateId, DebateResult, LogLevel, Phase,
    TaskType, WarningCode, WinnerAttribution,
};

/// Similarity score at or above which the candidates are considered to
/// have converged
pub const CONSENSUS_THRESHOLD: f64 = 0.9;

/// Caller input for one debate
#[derive(Debug, Clone)]
pub struct DebateRequest {
    pub task_type: TaskType,
    pub user_prompt: String,
    pub code_context: Option<String>,
    pub config: DebateConfig,
    /// Optional parent token; the debate derives a child from it
    pub cancel: Option<CancellationToken>,
}

/// Config after strategy defaults have been applied
#[derive(Debug, Clone)]
struct ResolvedConfig {
    enabled: bool,
    rounds: u32,
    log_level: LogLevel,
    parallelism: usize,
    max_total_tokens: u64,
    deadline: Option<Duration>,
}

impl ResolvedConfig {
    /// Caller values take precedence; strategy fills the gaps
    fn resolve(config: &DebateConfig, strategy: &dyn Strategy) -> Self {
        Self {
            enabled: config.enabled,
            rounds: config.rounds.unwrap_or_else(|| strategy.default_rounds()).max(1),
            log_level: config
                .log_level
                .unwrap_or_else(|| strategy.default_log_level()),
            parallelism: config.parallelism.unwrap_or(DEFAULT_BATCH_WIDTH),
            max_total_tokens: config.max_total_tokens,
            deadline: config.deadline_ms.map(Duration::from_millis),
        }
    }
}

/// The debate orchestrator
///
/// Long-lived; one instance serves many debates. Per-debate state lives in
/// a [`DebateRun`] created inside [`run_debate`](Self::run_debate).
pub struct DebateOrchestrator {
    registry: Arc<ModelRegistry>,
    strategies: StrategyMap,
    runner: TaskRunner,
}

impl DebateOrchestrator {
    pub fn new(
        registry: ModelRegistry,
        strategies: StrategyMap,
        client: Arc<dyn BackendClient>,
    ) -> Self {
        let registry = Arc::new(registry);
        let runner = TaskRunner::new(client, RetryPolicy::default(), Arc::clone(&registry));
        Self {
            registry,
            strategies,
            runner,
        }
    }

    pub fn with_retry_policy(
        registry: ModelRegistry,
        strategies: StrategyMap,
        client: Arc<dyn BackendClient>,
        policy: RetryPolicy,
    ) -> Self {
        let registry = Arc::new(registry);
        let runner = TaskRunner::new(client, policy, Arc::clone(&registry));
        Self {
            registry,
            strategies,
            runner,
        }
    }

    /// Run one debate to completion
    #[instrument(skip(self, request, notifier), fields(task_type = %request.task_type))]
    pub async fn run_debate(
        &self,
        request: DebateRequest,
        notifier: Notifier,
    ) -> Result<DebateResult, DebateError> {
        let strategy = self
            .strategies
            .get(request.task_type)
            .ok_or(DebateError::UnknownTaskType(request.task_type))?;
        let cfg = ResolvedConfig::resolve(&request.config, strategy.as_ref());

        let roster = self.registry.assign_workers();
        if roster.is_empty() {
            return Err(DebateError::NoBackendsAvailable);
        }

        let cancel = request
            .cancel
            .as_ref()
            .map(|t| t.child_token())
            .unwrap_or_default();

        // Deadline fires the shared token; every in-flight call fails fast
        let watchdog = cfg.deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(deadline_ms = deadline.as_millis() as u64, "Debate deadline expired");
                cancel.cancel();
            })
        });

        let id = DebateId::new();
        info!(debate_id = %id, workers = roster.len(), rounds = cfg.rounds, "Starting debate");

        let mut run = DebateRun {
            runner: &self.runner,
            strategy: Arc::clone(&strategy),
            registry: Arc::clone(&self.registry),
            id,
            ctx: DebateContext::new(request.user_prompt.clone(), request.code_context.clone()),
            roster,
            records: Vec::new(),
            collector: Collector::new(cfg.log_level),
            budget: BudgetTracker::new(cfg.max_total_tokens),
            cancel,
            notifier,
            cfg,
        };

        let result = run.execute().await;

        if let Some(handle) = watchdog {
            handle.abort();
        }
        result
    }
}

/// State for one debate invocation; discarded once the result is consumed
struct DebateRun<'a> {
    runner: &'a TaskRunner,
    strategy: Arc<dyn Strategy>,
    registry: Arc<ModelRegistry>,
    id: DebateId,
    ctx: DebateContext,
    /// Surviving participants, always in worker-ID order
    roster: Vec<Participant>,
    records: Vec<CandidateRecord>,
    collector: Collector,
    budget: BudgetTracker,
    cancel: CancellationToken,
    notifier: Notifier,
    cfg: ResolvedConfig,
}

impl DebateRun<'_> {
    async fn execute(&mut self) -> Result<DebateResult, DebateError> {
        let mut clock = PhaseClock::start();

        // With one participant (or debate disabled) there is no peer set to
        // argue against: one generation call, its output is final.
        if self.roster.len() == 1 || !self.cfg.enabled {
            let (text, winner) = clock
                .measure(Phase::Generate, 1, self.single_generation())
                .await?;
            return Ok(self.assemble(text, Some(winner), clock, 1, false));
        }

        let mut consensus = false;
        let mut rounds_completed: u32 = 0;

        for round in 1..=self.cfg.rounds {
            if round == 1 {
                // Round 1 always runs: without it there is nothing to judge
                clock
                    .measure(Phase::Generate, 1, self.generate_round())
                    .await?;
            } else {
                if !self.budget_allows(Phase::Synthesize) {
                    break;
                }
                clock
                    .measure(Phase::Synthesize, round, self.synthesize_round(round))
                    .await?;

                if self.roster.len() > 1 {
                    consensus = clock
                        .measure(Phase::Consensus, round, self.consensus_check(round))
                        .await?;
                }
            }
            rounds_completed = round;

            if consensus {
                self.note(NotifyLevel::Info, format!("consensus reached in round {round}"));
                break;
            }

            // No critique on the final round (nothing will be revised) or
            // when a single survivor has no peers left to critique
            if round < self.cfg.rounds && self.roster.len() > 1 {
                if !self.budget_allows(Phase::Critique) {
                    break;
                }
                clock
                    .measure(Phase::Critique, round, self.critique_round(round))
                    .await?;
            }
        }

        let judge_round = rounds_completed.max(1);
        let (final_text, winner) = clock
            .measure(Phase::Judge, judge_round, self.judge_phase())
            .await?;

        Ok(self.assemble(final_text, winner, clock, rounds_completed, consensus))
    }

    fn assemble(
        &self,
        final_text: String,
        winner: Option<WinnerAttribution>,
        clock: PhaseClock,
        rounds_completed: u32,
        consensus: bool,
    ) -> DebateResult {
        let assembler = ResultAssembler {
            id: self.id,
            log_level: self.cfg.log_level,
        };
        assembler.assemble(
            final_text,
            winner,
            &self.collector,
            self.budget.usage(),
            clock.finish(),
            rounds_completed,
            consensus,
        )
    }

    /// Budget gate before a round phase. A failed gate stops the round loop
    /// (never mid-round) with a single `TOKEN_BUDGET` warning.
    fn budget_allows(&self, phase: Phase) -> bool {
        let estimate = self
            .budget
            .round_estimate(&self.ctx.user_prompt, self.roster.len());
        if self.budget.allows_round(estimate) {
            return true;
        }
        let message = format!(
            "token budget exhausted before {phase} (used {} of {})",
            self.budget.usage().total(),
            self.cfg.max_total_tokens
        );
        self.collector.warn(WarningCode::TokenBudget, phase, &message);
        self.note(NotifyLevel::Warning, message);
        false
    }

    /// One Task Runner invocation plus accounting
    async fn call_backend(
        &self,
        phase: Phase,
        round: u32,
        participant: Option<&Participant>,
        backend: &ModelDescriptor,
        prompt: String,
    ) -> Result<String, TaskError> {
        let response = self.runner.run(&prompt, backend, &self.cancel).await?;
        self.budget.record(&response.usage);
        self.collector.record_exchange(
            phase,
            round,
            participant.map(|p| p.worker),
            &prompt,
            &response.text,
        );
        Ok(response.text)
    }

    fn abort(&self) -> DebateError {
        DebateError::Aborted(Box::new(AbortedDebate {
            warnings: self.collector.warnings(),
            transcript: self.collector.transcript(),
        }))
    }

    fn note(&self, level: NotifyLevel, message: impl Into<String>) {
        let verbose_enough = match level {
            NotifyLevel::Warning | NotifyLevel::Error => true,
            NotifyLevel::Info => self.cfg.log_level >= LogLevel::Info,
            NotifyLevel::Debug => self.cfg.log_level >= LogLevel::Debug,
        };
        if verbose_enough {
            self.notifier.notify(level, message);
        }
    }

    /// Single-backend shortcut: no critique, no judge
    async fn single_generation(&mut self) -> Result<(String, WinnerAttribution), DebateError> {
        self.ctx.round = 1;
        let participant = self.roster[0].clone();
        let prompt = self.strategy.prompt(PromptPhase::Generate, &self.ctx);

        match self
            .call_backend(
                Phase::Generate,
                1,
                Some(&participant),
                &participant.backend,
                prompt,
            )
            .await
        {
            Ok(text) => {
                self.ctx.candidates = vec![text.clone()];
                Ok((
                    text,
                    WinnerAttribution {
                        worker: participant.worker,
                        backend: participant.backend.name.clone(),
                    },
                ))
            }
            Err(TaskError::Aborted) => Err(self.abort()),
            Err(err) => {
                warn!(backend = %participant.backend.name, error = %err, "Sole backend failed");
                Err(DebateError::AllGenerationFailed)
            }
        }
    }

    /// Round 1: every participant answers the prompt in parallel
    async fn generate_round(&mut self) -> Result<(), DebateError> {
        self.ctx.round = 1;
        self.note(NotifyLevel::Info, "round 1: generating candidates");
        let prompt = self.strategy.prompt(PromptPhase::Generate, &self.ctx);
        let roster = self.roster.clone();

        let this = &*self;
        let tasks: Vec<_> = roster
            .iter()
            .map(|p| this.call_backend(Phase::Generate, 1, Some(p), &p.backend, prompt.clone()))
            .collect();
        let results = run_in_batches(tasks, self.cfg.parallelism).await;

        let mut survivors = Vec::new();
        let mut candidates = Vec::new();
        let mut aborted = false;

        // Candidate order follows worker-ID order, never completion order
        for (participant, result) in roster.iter().zip(results) {
            match result {
                Ok(text) => {
                    self.check_validation(Phase::Generate, participant, &text);
                    candidates.push(text);
                    survivors.push(participant.clone());
                }
                Err(TaskError::Aborted) => aborted = true,
                Err(err) => {
                    let message = format!(
                        "worker {} ({}) failed generation: {}",
                        participant.worker, participant.backend.name, err
                    );
                    self.collector
                        .warn(WarningCode::GenFail, Phase::Generate, &message);
                    self.note(NotifyLevel::Warning, message);
                }
            }
        }

        if aborted {
            return Err(self.abort());
        }
        if candidates.is_empty() {
            return Err(DebateError::AllGenerationFailed);
        }

        self.records = survivors
            .iter()
            .map(|p| CandidateRecord {
                worker: p.worker,
                backend: p.backend.name.clone(),
            })
            .collect();
        self.roster = survivors;
        self.ctx.candidates = candidates;

        debug!(candidates = self.ctx.candidates.len(), "Generation round complete");
        Ok(())
    }

    /// Peers critique each other's candidates; self-critique is excluded
    async fn critique_round(&mut self, round: u32) -> Result<(), DebateError> {
        self.note(NotifyLevel::Info, format!("round {round}: critiquing candidates"));
        let roster = self.roster.clone();

        let this = &*self;
        let tasks: Vec<_> = roster
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let view = this.critique_view(i);
                let prompt = this.strategy.prompt(PromptPhase::Critique, &view);
                this.call_backend(Phase::Critique, round, Some(p), &p.backend, prompt)
            })
            .collect();
        let results = run_in_batches(tasks, self.cfg.parallelism).await;

        let mut critiques = Vec::new();
        let mut aborted = false;

        for (participant, result) in roster.iter().zip(results) {
            match result {
                Ok(text) => critiques.push(format!(
                    "### Critique from {}\n\n{}",
                    participant.worker, text
                )),
                Err(TaskError::Aborted) => aborted = true,
                Err(err) => {
                    // A lost critique just thins the feedback; the critic's
                    // own candidate stays in play
                    let message = format!(
                        "worker {} ({}) failed critique: {}",
                        participant.worker, participant.backend.name, err
                    );
                    self.collector
                        .warn(WarningCode::GenFail, Phase::Critique, &message);
                    self.note(NotifyLevel::Warning, message);
                }
            }
        }

        if aborted {
            return Err(self.abort());
        }
        self.ctx.critiques = critiques;
        Ok(())
    }

    /// Each participant rewrites its own candidate in light of critiques.
    /// Failure keeps that slot's previous candidate.
    async fn synthesize_round(&mut self, round: u32) -> Result<(), DebateError> {
        self.ctx.round = round;
        self.note(NotifyLevel::Info, format!("round {round}: synthesizing revisions"));
        let roster = self.roster.clone();

        let this = &*self;
        let tasks: Vec<_> = roster
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let view = this.synthesis_view(i);
                let prompt = this.strategy.prompt(PromptPhase::Generate, &view);
                this.call_backend(Phase::Synthesize, round, Some(p), &p.backend, prompt)
            })
            .collect();
        let results = run_in_batches(tasks, self.cfg.parallelism).await;

        let mut candidates = self.ctx.candidates.clone();
        let mut aborted = false;

        for (i, (participant, result)) in roster.iter().zip(results).enumerate() {
            match result {
                Ok(text) => {
                    self.check_validation(Phase::Synthesize, participant, &text);
                    candidates[i] = text;
                }
                Err(TaskError::Aborted) => aborted = true,
                Err(err) => {
                    let message = format!(
                        "worker {} ({}) failed synthesis, keeping round {} candidate: {}",
                        participant.worker,
                        participant.backend.name,
                        round - 1,
                        err
                    );
                    self.collector
                        .warn(WarningCode::GenFail, Phase::Synthesize, &message);
                    self.note(NotifyLevel::Warning, message);
                }
            }
        }

        if aborted {
            return Err(self.abort());
        }
        self.ctx.candidates = candidates;
        self.ctx.critiques.clear();
        Ok(())
    }

    /// Ask the judge how similar the candidates are. Parse failure is "no
    /// consensus", never fatal.
    async fn consensus_check(&mut self, round: u32) -> Result<bool, DebateError> {
        let prompt = consensus_prompt(&self.ctx.candidates);
        let judge = self.judge_backend();

        let score = match self
            .call_backend(Phase::Consensus, round, None, &judge, prompt)
            .await
        {
            Ok(text) => parse_consensus_score(&text).unwrap_or_else(|| {
                debug!("Unparsable consensus score, treating as 0.0");
                0.0
            }),
            Err(TaskError::Aborted) => return Err(self.abort()),
            Err(err) => {
                debug!(error = %err, "Consensus check failed, treating as no consensus");
                0.0
            }
        };

        debug!(round, score, "Consensus check");
        Ok(score >= CONSENSUS_THRESHOLD)
    }

    /// Terminal phase: the judge selects a winner or synthesizes its own
    /// answer. Any failure falls back to the first candidate; the debate
    /// never ends without a textual result.
    async fn judge_phase(&mut self) -> Result<(String, Option<WinnerAttribution>), DebateError> {
        let view = self.judge_view();
        let prompt = self.strategy.prompt(PromptPhase::Judge, &view);
        let judge = self.judge_backend();
        let round = self.ctx.round.max(1);

        let raw = match self
            .call_backend(Phase::Judge, round, None, &judge, prompt)
            .await
        {
            Ok(text) => text,
            Err(TaskError::Aborted) => return Err(self.abort()),
            Err(err) => {
                return Ok(self.judge_fallback(format!("judge call failed: {err}")));
            }
        };

        match self.strategy.parse_judge(&raw, &self.ctx.candidates) {
            Ok(JudgeVerdict::Winner(index)) => {
                let record = &self.records[index];
                info!(winner = %record.worker, backend = %record.backend, "Judge selected a winner");
                Ok((
                    self.ctx.candidates[index].clone(),
                    Some(WinnerAttribution {
                        worker: record.worker,
                        backend: record.backend.clone(),
                    }),
                ))
            }
            Ok(JudgeVerdict::Synthesized) => {
                info!("Judge synthesized its own answer");
                Ok((raw, None))
            }
            Err(parse_err) => Ok(self.judge_fallback(format!("unparsable judge output: {parse_err}"))),
        }
    }

    fn judge_fallback(&self, message: String) -> (String, Option<WinnerAttribution>) {
        self.collector
            .warn(WarningCode::JudgeMalformed, Phase::Judge, &message);
        self.note(NotifyLevel::Warning, message);
        let record = &self.records[0];
        (
            self.ctx.candidates[0].clone(),
            Some(WinnerAttribution {
                worker: record.worker,
                backend: record.backend.clone(),
            }),
        )
    }

    /// Preferred judge if its credential is present, else the first
    /// surviving participant
    fn judge_backend(&self) -> ModelDescriptor {
        self.registry
            .preferred_judge()
            .unwrap_or_else(|| self.roster[0].backend.clone())
    }

    fn check_validation(&self, phase: Phase, participant: &Participant, candidate: &str) {
        if let Err(reason) = self.strategy.validate(candidate) {
            let message = format!(
                "worker {} ({}) produced a structurally invalid candidate: {reason}",
                participant.worker, participant.backend.name
            );
            self.collector
                .warn(WarningCode::ValidationFail, phase, &message);
            self.note(NotifyLevel::Warning, message);
        }
    }

    /// Context for worker `i`'s critique: everyone else's answers, labeled
    /// by letter
    fn critique_view(&self, i: usize) -> DebateContext {
        let mut view = self.ctx.clone();
        view.critiques = Vec::new();
        view.candidates = self
            .roster
            .iter()
            .zip(&self.ctx.candidates)
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, (p, text))| format!("### Answer {}\n\n{}", p.worker, text))
            .collect();
        view
    }

    /// Context for worker `i`'s synthesis: its own answer plus the full
    /// critique set from the previous round
    fn synthesis_view(&self, i: usize) -> DebateContext {
        let mut view = self.ctx.clone();
        view.candidates = vec![format!(
            "### Your previous answer ({})\n\n{}",
            self.roster[i].worker, self.ctx.candidates[i]
        )];
        view
    }

    /// Context for the judge: numbered candidates
    fn judge_view(&self) -> DebateContext {
        let mut view = self.ctx.clone();
        view.critiques = Vec::new();
        view.candidates = self
            .ctx
            .candidates
            .iter()
            .enumerate()
            .map(|(i, text)| format!("### Candidate {}\n\n{}", i + 1, text))
            .collect();
        view
    }
}

/// Referee prompt asking for a similarity score over the candidate set
pub(crate) fn consensus_prompt(candidates: &[String]) -> String {
    let mut prompt = String::from(
        "## Your task\n\n\
         You are the referee of a debate. Rate how similar in substance the \
         answers below are to one another, on a continuous scale from 0.0 \
         (entirely different) to 1.0 (interchangeable). Reply with a single \
         line `SIMILARITY: <score>`.\n\n## Answers\n\n",
    );
    for (i, candidate) in candidates.iter().enumerate() {
        prompt.push_str(&format!("### Answer {}\n\n{}\n\n", i + 1, candidate));
    }
    prompt
}

/// Extract the similarity score; `None` when the reply does not follow the
/// `SIMILARITY:` convention
pub(crate) fn parse_consensus_score(raw: &str) -> Option<f64> {
    raw.lines()
        .filter_map(|line| line.trim().strip_prefix("SIMILARITY:"))
        .find_map(|rest| rest.trim().parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderFamily;
    use crate::runner::{BackendResponse, InvokeOptions};
    use crate::types::TokenUsage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Mock backend that answers by prompt kind and records every call
    struct MockClient {
        /// Response to judge prompts
        judge_reply: String,
        /// Response to consensus prompts
        consensus_reply: String,
        /// Fixed response to generation prompts, overriding the counters
        generation_reply: Option<String>,
        /// Backends that fail every call with the given error
        failing: HashMap<String, TaskError>,
        /// Token usage attached to every response
        usage: TokenUsage,
        /// (backend, prompt) per call, in arrival order
        calls: Mutex<Vec<(String, String)>>,
        /// Per-backend sequence numbers for deterministic reply text
        counters: Mutex<HashMap<String, u32>>,
    }

    impl MockClient {
        fn new() -> Self {
            Self {
                judge_reply: "WINNER: 1".to_string(),
                consensus_reply: "SIMILARITY: 0.2".to_string(),
                generation_reply: None,
                failing: HashMap::new(),
                usage: TokenUsage::new(100, 100),
                calls: Mutex::new(Vec::new()),
                counters: Mutex::new(HashMap::new()),
            }
        }

        fn with_judge_reply(mut self, reply: &str) -> Self {
            self.judge_reply = reply.to_string();
            self
        }

        fn with_consensus_reply(mut self, reply: &str) -> Self {
            self.consensus_reply = reply.to_string();
            self
        }

        fn with_generation_reply(mut self, reply: &str) -> Self {
            self.generation_reply = Some(reply.to_string());
            self
        }

        fn failing_backend(mut self, name: &str, err: TaskError) -> Self {
            self.failing.insert(name.to_string(), err);
            self
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().clone()
        }

        fn prompts_containing(&self, needle: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|(_, prompt)| prompt.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl BackendClient for MockClient {
        async fn invoke(
            &self,
            prompt: &str,
            opts: &InvokeOptions,
            _cancel: &CancellationToken,
        ) -> Result<BackendResponse, TaskError> {
            self.calls
                .lock()
                .push((opts.backend.clone(), prompt.to_string()));

            if let Some(err) = self.failing.get(&opts.backend) {
                return Err(err.clone());
            }

            let text = if prompt.contains("You are the judge") {
                self.judge_reply.clone()
            } else if prompt.contains("SIMILARITY") {
                self.consensus_reply.clone()
            } else if let Some(reply) = &self.generation_reply {
                reply.clone()
            } else {
                let mut counters = self.counters.lock();
                let n = counters.entry(opts.backend.clone()).or_insert(0);
                *n += 1;
                format!("1. reply-{}-{}", opts.backend, n)
            };

            Ok(BackendResponse {
                text,
                usage: self.usage,
            })
        }
    }

    fn registry(names: &[&str]) -> ModelRegistry {
        let families = [
            ProviderFamily::Anthropic,
            ProviderFamily::OpenAi,
            ProviderFamily::Google,
            ProviderFamily::Local,
        ];
        ModelRegistry::new(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    ModelDescriptor::new(*name, families[i % families.len()], 200_000)
                })
                .collect(),
        )
    }

    fn orchestrator(client: Arc<MockClient>, names: &[&str]) -> DebateOrchestrator {
        DebateOrchestrator::new(registry(names), StrategyMap::with_defaults(), client)
    }

    fn request(rounds: u32) -> DebateRequest {
        DebateRequest {
            task_type: TaskType::Opinion,
            user_prompt: "Should we rewrite the scheduler?".to_string(),
            code_context: None,
            config: DebateConfig {
                enabled: true,
                rounds: Some(rounds),
                ..Default::default()
            },
            cancel: None,
        }
    }

    #[tokio::test]
    async fn test_no_backends_is_fatal() {
        let client = Arc::new(MockClient::new());
        let models = vec![ModelDescriptor::new(
            "claude",
            ProviderFamily::Anthropic,
            200_000,
        )
        .unavailable()];
        let orchestrator = DebateOrchestrator::new(
            ModelRegistry::new(models),
            StrategyMap::with_defaults(),
            client,
        );

        let result = orchestrator.run_debate(request(2), Notifier::sink()).await;
        assert!(matches!(result, Err(DebateError::NoBackendsAvailable)));
    }

    #[tokio::test]
    async fn test_single_backend_shortcut() {
        let client = Arc::new(MockClient::new());
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha"]);

        let result = orchestrator
            .run_debate(request(3), Notifier::sink())
            .await
            .unwrap();

        assert_eq!(result.final_text, "1. reply-alpha-1");
        assert_eq!(result.winner.as_ref().unwrap().worker.letter(), 'A');
        assert_eq!(result.winner.as_ref().unwrap().backend, "alpha");
        assert_eq!(result.rounds_completed, 1);
        assert!(result.warnings.is_empty());

        // Exactly one call; no critique or judge prompt was ever built
        assert_eq!(client.calls().len(), 1);
        assert_eq!(client.prompts_containing("You are the judge"), 0);
        assert_eq!(client.prompts_containing("Critique each answer"), 0);
    }

    #[tokio::test]
    async fn test_disabled_debate_uses_single_call() {
        let client = Arc::new(MockClient::new());
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let mut req = request(3);
        req.config.enabled = false;
        let result = orchestrator.run_debate(req, Notifier::sink()).await.unwrap();

        assert_eq!(result.final_text, "1. reply-alpha-1");
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_full_debate_winner_selection() {
        let client = Arc::new(MockClient::new().with_judge_reply("WINNER: 2"));
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta", "gamma"]);

        let result = orchestrator
            .run_debate(request(2), Notifier::sink())
            .await
            .unwrap();

        // Round 1 generate + critique, round 2 synthesize, then consensus
        // and judge: beta's synthesized answer (its second reply) wins.
        assert_eq!(result.final_text, "1. reply-beta-3");
        let winner = result.winner.unwrap();
        assert_eq!(winner.worker.letter(), 'B');
        assert_eq!(winner.backend, "beta");
        assert_eq!(result.rounds_completed, 2);
        assert!(!result.consensus_reached);
        assert!(result.warnings.is_empty());

        // 3 generate + 3 critique + 3 synthesize + 1 consensus + 1 judge
        assert_eq!(client.calls().len(), 11);
    }

    #[tokio::test]
    async fn test_generation_failure_reduces_candidate_set() {
        let client = Arc::new(
            MockClient::new()
                .with_judge_reply("WINNER: 1")
                .failing_backend("beta", TaskError::fatal("api key revoked")),
        );
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta", "gamma"]);

        let result = orchestrator
            .run_debate(request(2), Notifier::sink())
            .await
            .unwrap();

        let gen_fails: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.code == WarningCode::GenFail && w.phase == Phase::Generate)
            .collect();
        assert_eq!(gen_fails.len(), 1);
        assert!(gen_fails[0].message.contains("worker B"));

        // Judge saw exactly two candidates; winner 1 is worker A
        let judge_prompt = client
            .calls()
            .into_iter()
            .map(|(_, p)| p)
            .rfind(|p| p.contains("You are the judge"))
            .unwrap();
        assert_eq!(judge_prompt.matches("### Candidate").count(), 2);
        assert_eq!(result.winner.unwrap().worker.letter(), 'A');

        // Beta is never called again after dropping out of round 1
        let beta_calls = client
            .calls()
            .iter()
            .filter(|(backend, _)| backend == "beta")
            .count();
        assert_eq!(beta_calls, 1);
    }

    #[tokio::test]
    async fn test_all_generation_failures_are_fatal() {
        let client = Arc::new(
            MockClient::new()
                .failing_backend("alpha", TaskError::fatal("down"))
                .failing_backend("beta", TaskError::fatal("down")),
        );
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let result = orchestrator.run_debate(request(2), Notifier::sink()).await;
        assert!(matches!(result, Err(DebateError::AllGenerationFailed)));
    }

    #[tokio::test]
    async fn test_malformed_judge_falls_back_to_first_candidate() {
        let client =
            Arc::new(MockClient::new().with_judge_reply("I liked the first answer the most."));
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let result = orchestrator
            .run_debate(request(1), Notifier::sink())
            .await
            .unwrap();

        // candidates[0] is alpha's round-1 answer
        assert_eq!(result.final_text, "1. reply-alpha-1");
        let judge_warnings: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.code == WarningCode::JudgeMalformed)
            .collect();
        assert_eq!(judge_warnings.len(), 1);
        assert_eq!(judge_warnings[0].phase, Phase::Judge);
    }

    #[tokio::test]
    async fn test_judge_synthesis_uses_raw_text() {
        let raw = "SYNTHESIS\nBoth answers agree on the core: rewrite it incrementally.";
        let client = Arc::new(MockClient::new().with_judge_reply(raw));
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let result = orchestrator
            .run_debate(request(1), Notifier::sink())
            .await
            .unwrap();

        assert_eq!(result.final_text, raw);
        assert!(result.winner.is_none());
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_consensus_short_circuits_remaining_rounds() {
        let client = Arc::new(MockClient::new().with_consensus_reply("SIMILARITY: 0.95"));
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let result = orchestrator
            .run_debate(request(5), Notifier::sink())
            .await
            .unwrap();

        assert!(result.consensus_reached);
        assert_eq!(result.rounds_completed, 2);
        // No phase did any work in rounds 3-5
        assert!(result.timings.per_phase.iter().all(|t| t.round <= 2));
        // Exactly one judge phase ran
        let judges = result
            .timings
            .per_phase
            .iter()
            .filter(|t| t.phase == Phase::Judge)
            .count();
        assert_eq!(judges, 1);
    }

    #[tokio::test]
    async fn test_round_cap_respected() {
        let client = Arc::new(MockClient::new());
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let result = orchestrator
            .run_debate(request(3), Notifier::sink())
            .await
            .unwrap();

        assert_eq!(result.rounds_completed, 3);
        let synth_rounds: Vec<u32> = result
            .timings
            .per_phase
            .iter()
            .filter(|t| t.phase == Phase::Synthesize)
            .map(|t| t.round)
            .collect();
        assert_eq!(synth_rounds, vec![2, 3]);
        // Critique runs for every round except the last
        let critique_rounds: Vec<u32> = result
            .timings
            .per_phase
            .iter()
            .filter(|t| t.phase == Phase::Critique)
            .map(|t| t.round)
            .collect();
        assert_eq!(critique_rounds, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_token_budget_stops_round_loop() {
        // Round 1 costs 2 workers * 200 tokens; the critique gate for round
        // 1 then fails against the ceiling.
        let client = Arc::new(MockClient::new());
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let mut req = request(2);
        req.config.max_total_tokens = 500;
        let result = orchestrator.run_debate(req, Notifier::sink()).await.unwrap();

        let budget_warnings: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.code == WarningCode::TokenBudget)
            .collect();
        assert_eq!(budget_warnings.len(), 1);

        // Result is built from round-1 candidates: no synthesize phase ran
        assert!(result
            .timings
            .per_phase
            .iter()
            .all(|t| t.phase != Phase::Synthesize));
        assert_eq!(result.final_text, "1. reply-alpha-1");
        assert_eq!(result.rounds_completed, 1);
    }

    #[tokio::test]
    async fn test_no_self_critique() {
        let client = Arc::new(MockClient::new());
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        orchestrator
            .run_debate(request(2), Notifier::sink())
            .await
            .unwrap();

        for (backend, prompt) in client.calls() {
            if !prompt.contains("Critique each answer") {
                continue;
            }
            // Each critic sees exactly one labeled answer: the other one's
            assert_eq!(prompt.matches("### Answer").count(), 1);
            let own_reply = format!("reply-{backend}-1");
            assert!(
                !prompt.contains(&own_reply),
                "critic {backend} was shown its own answer"
            );
        }
    }

    #[tokio::test]
    async fn test_structurally_invalid_candidates_warn() {
        // A plan with no numbered or bulleted steps fails PlanStrategy's
        // structural check; the candidates stay in the debate regardless.
        let client = Arc::new(MockClient::new().with_generation_reply("just wing it"));
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let mut req = request(1);
        req.task_type = TaskType::Plan;
        let result = orchestrator.run_debate(req, Notifier::sink()).await.unwrap();

        let validation_warnings: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.code == WarningCode::ValidationFail)
            .collect();
        assert_eq!(validation_warnings.len(), 2);
        assert!(validation_warnings
            .iter()
            .all(|w| w.phase == Phase::Generate));
        assert!(validation_warnings[0].message.contains("worker A"));

        // Validation failure is advisory: both candidates survived and the
        // judge still picked one
        assert_eq!(result.final_text, "just wing it");
        assert!(result.winner.is_some());
    }

    #[tokio::test]
    async fn test_transcript_only_at_debug() {
        let client = Arc::new(MockClient::new());
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let mut req = request(1);
        req.config.log_level = Some(LogLevel::Debug);
        let result = orchestrator.run_debate(req, Notifier::sink()).await.unwrap();
        let transcript = result.transcript.unwrap();
        // 2 generations + 1 judge exchange
        assert_eq!(transcript.len(), 3);

        let client = Arc::new(MockClient::new());
        let orchestrator = self::orchestrator(Arc::clone(&client), &["alpha", "beta"]);
        let result = orchestrator
            .run_debate(request(1), Notifier::sink())
            .await
            .unwrap();
        assert!(result.transcript.is_none());
    }

    #[tokio::test]
    async fn test_token_usage_accumulates_across_phases() {
        let client = Arc::new(MockClient::new());
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta"]);

        let result = orchestrator
            .run_debate(request(1), Notifier::sink())
            .await
            .unwrap();

        // 3 calls (2 generate + 1 judge), 100 prompt + 100 completion each
        assert_eq!(result.token_usage.prompt_tokens, 300);
        assert_eq!(result.token_usage.completion_tokens, 300);
    }

    #[tokio::test]
    async fn test_notifications_emitted() {
        let client = Arc::new(
            MockClient::new().failing_backend("beta", TaskError::fatal("down")),
        );
        let orchestrator = orchestrator(Arc::clone(&client), &["alpha", "beta", "gamma"]);

        let (notifier, mut rx) = Notifier::channel();
        orchestrator
            .run_debate(request(1), notifier)
            .await
            .unwrap();

        let mut notifications = Vec::new();
        while let Ok(n) = rx.try_recv() {
            notifications.push(n);
        }
        assert!(notifications
            .iter()
            .any(|n| n.level == NotifyLevel::Warning && n.message.contains("worker B")));
    }

    /// Client that never answers; used for deadline tests
    struct StalledClient;

    #[async_trait]
    impl BackendClient for StalledClient {
        async fn invoke(
            &self,
            _prompt: &str,
            _opts: &InvokeOptions,
            cancel: &CancellationToken,
        ) -> Result<BackendResponse, TaskError> {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(3_600)) => {
                    Err(TaskError::fatal("unreachable"))
                }
                _ = cancel.cancelled() => Err(TaskError::Aborted),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_debate() {
        let orchestrator = DebateOrchestrator::new(
            registry(&["alpha", "beta"]),
            StrategyMap::with_defaults(),
            Arc::new(StalledClient),
        );

        let mut req = request(2);
        req.config.deadline_ms = Some(250);
        let result = orchestrator.run_debate(req, Notifier::sink()).await;
        assert!(matches!(result, Err(DebateError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_caller_cancellation_aborts_debate() {
        let orchestrator = DebateOrchestrator::new(
            registry(&["alpha", "beta"]),
            StrategyMap::with_defaults(),
            Arc::new(StalledClient),
        );

        let cancel = CancellationToken::new();
        let mut req = request(2);
        req.cancel = Some(cancel.clone());

        let debate = orchestrator.run_debate(req, Notifier::sink());
        tokio::pin!(debate);

        tokio::select! {
            _ = &mut debate => panic!("debate finished before cancellation"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => cancel.cancel(),
        }
        let result = debate.await;
        assert!(matches!(result, Err(DebateError::Aborted(_))));
    }

    #[test]
    fn test_parse_consensus_score() {
        assert_eq!(parse_consensus_score("SIMILARITY: 0.85"), Some(0.85));
        assert_eq!(
            parse_consensus_score("thinking...\nSIMILARITY: 0.4\n"),
            Some(0.4)
        );
        assert_eq!(parse_consensus_score("SIMILARITY: 7"), Some(1.0));
        assert_eq!(parse_consensus_score("the answers look alike"), None);
    }
}
