//! Per-task-type debate strategies
//!
//! A strategy owns the prompt templates for its task type and knows how to
//! read the judge's verdict back out of free text. Prompt construction is
//! pure: same phase and context in, byte-identical text out.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{DebateContext, LogLevel, TaskType};

/// Phases a strategy builds prompts for
///
/// Synthesis reuses the `Generate` template: when `ctx.critiques` is
/// non-empty the template appends revision instructions instead of adding
/// a fourth template family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPhase {
    Generate,
    Critique,
    Judge,
}

/// Parsed judge output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeVerdict {
    /// Zero-based index into the candidate list
    Winner(usize),
    /// The judge wrote its own merged answer; use its raw text verbatim
    Synthesized,
}

/// Pluggable per-task-type behavior
pub trait Strategy: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Round count applied when the caller did not specify one
    fn default_rounds(&self) -> u32;

    /// Verbosity applied when the caller did not specify one
    fn default_log_level(&self) -> LogLevel;

    /// Build the prompt for a phase. Pure: no I/O, no hidden state.
    fn prompt(&self, phase: PromptPhase, ctx: &DebateContext) -> String;

    /// Parse the judge's raw output into a verdict
    ///
    /// Errors are returned as strings, never panics; the round controller
    /// converts them into a `JUDGE_MALFORMED` warning and falls back to the
    /// first candidate.
    fn parse_judge(&self, raw: &str, candidates: &[String]) -> Result<JudgeVerdict, String>;

    /// Structural validation of a candidate (the `VALIDATION_FAIL` hook)
    fn validate(&self, _candidate: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Shared judge-output parser
///
/// Accepts a line `WINNER: <n>` (1-based candidate number) or a line
/// starting with `SYNTHESIS`.
fn parse_judge_lines(raw: &str, candidates: &[String]) -> Result<JudgeVerdict, String> {
    for line in raw.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("WINNER:") {
            let number: usize = rest
                .trim()
                .parse()
                .map_err(|_| format!("unparsable winner number: {:?}", rest.trim()))?;
            if number == 0 || number > candidates.len() {
                return Err(format!(
                    "winner number {} out of range 1..={}",
                    number,
                    candidates.len()
                ));
            }
            return Ok(JudgeVerdict::Winner(number - 1));
        }
        if line.starts_with("SYNTHESIS") {
            return Ok(JudgeVerdict::Synthesized);
        }
    }
    Err("no WINNER or SYNTHESIS line in judge output".to_string())
}

fn push_code_context(prompt: &mut String, ctx: &DebateContext) {
    if let Some(code) = &ctx.code_context {
        prompt.push_str("\n## Relevant code\n\n");
        prompt.push_str(code);
        prompt.push('\n');
    }
}

fn push_critique_material(prompt: &mut String, ctx: &DebateContext) {
    if ctx.critiques.is_empty() {
        return;
    }
    prompt.push_str(
        "\n## Critiques of the current answers\n\n\
         You previously produced one of the answers under debate. Revise your \
         own answer, addressing every critique directed at it. Keep what the \
         critiques did not challenge.\n\n",
    );
    for critique in &ctx.critiques {
        prompt.push_str(critique);
        prompt.push_str("\n\n");
    }
}

fn push_critique_task(prompt: &mut String, ctx: &DebateContext) {
    prompt.push_str(
        "\n## Your task\n\n\
         Critique each answer below. For every answer, name its strongest \
         point and its most serious flaw. Do not rewrite the answers; judge \
         them. Refer to answers by their letter.\n\n## Answers\n\n",
    );
    for candidate in &ctx.candidates {
        prompt.push_str(candidate);
        prompt.push_str("\n\n");
    }
}

fn push_judge_task(prompt: &mut String, ctx: &DebateContext) {
    prompt.push_str(
        "\n## Your task\n\n\
         You are the judge. Pick the single best answer, or write a better \
         merged answer yourself.\n\
         - To pick, reply with a line `WINNER: <number>`.\n\
         - To merge, reply with a line `SYNTHESIS` followed by your answer.\n\n\
         ## Candidate answers\n\n",
    );
    for candidate in &ctx.candidates {
        prompt.push_str(candidate);
        prompt.push_str("\n\n");
    }
}

/// Strategy for reasoned opinions
pub struct OpinionStrategy;

impl Strategy for OpinionStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Opinion
    }

    fn default_rounds(&self) -> u32 {
        2
    }

    fn default_log_level(&self) -> LogLevel {
        LogLevel::Info
    }

    fn prompt(&self, phase: PromptPhase, ctx: &DebateContext) -> String {
        let mut prompt = format!("## Question\n\n{}\n", ctx.user_prompt);
        push_code_context(&mut prompt, ctx);
        match phase {
            PromptPhase::Generate => {
                prompt.push_str(
                    "\n## Your task\n\n\
                     Give your considered opinion on the question. State your \
                     position, your strongest arguments, and the tradeoffs \
                     you weighed.\n",
                );
                push_critique_material(&mut prompt, ctx);
            }
            PromptPhase::Critique => push_critique_task(&mut prompt, ctx),
            PromptPhase::Judge => push_judge_task(&mut prompt, ctx),
        }
        prompt
    }

    fn parse_judge(&self, raw: &str, candidates: &[String]) -> Result<JudgeVerdict, String> {
        parse_judge_lines(raw, candidates)
    }
}

/// Strategy for code reviews
pub struct ReviewStrategy;

impl Strategy for ReviewStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Review
    }

    fn default_rounds(&self) -> u32 {
        2
    }

    fn default_log_level(&self) -> LogLevel {
        LogLevel::Info
    }

    fn prompt(&self, phase: PromptPhase, ctx: &DebateContext) -> String {
        let mut prompt = format!("## Review request\n\n{}\n", ctx.user_prompt);
        push_code_context(&mut prompt, ctx);
        match phase {
            PromptPhase::Generate => {
                prompt.push_str(
                    "\n## Your task\n\n\
                     Review the code. Report correctness issues first, then \
                     design concerns, then style. Cite the specific lines or \
                     functions you are talking about.\n",
                );
                push_critique_material(&mut prompt, ctx);
            }
            PromptPhase::Critique => push_critique_task(&mut prompt, ctx),
            PromptPhase::Judge => push_judge_task(&mut prompt, ctx),
        }
        prompt
    }

    fn parse_judge(&self, raw: &str, candidates: &[String]) -> Result<JudgeVerdict, String> {
        parse_judge_lines(raw, candidates)
    }

    fn validate(&self, candidate: &str) -> Result<(), String> {
        if candidate.trim().len() < 40 {
            return Err("review body too short to be a real review".to_string());
        }
        Ok(())
    }
}

/// Strategy for implementation plans
pub struct PlanStrategy;

impl Strategy for PlanStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Plan
    }

    fn default_rounds(&self) -> u32 {
        3
    }

    fn default_log_level(&self) -> LogLevel {
        LogLevel::Info
    }

    fn prompt(&self, phase: PromptPhase, ctx: &DebateContext) -> String {
        let mut prompt = format!("## Goal\n\n{}\n", ctx.user_prompt);
        push_code_context(&mut prompt, ctx);
        match phase {
            PromptPhase::Generate => {
                prompt.push_str(
                    "\n## Your task\n\n\
                     Produce a step-by-step implementation plan. Number the \
                     steps, note dependencies between them, and call out the \
                     riskiest step.\n",
                );
                push_critique_material(&mut prompt, ctx);
            }
            PromptPhase::Critique => push_critique_task(&mut prompt, ctx),
            PromptPhase::Judge => push_judge_task(&mut prompt, ctx),
        }
        prompt
    }

    fn parse_judge(&self, raw: &str, candidates: &[String]) -> Result<JudgeVerdict, String> {
        parse_judge_lines(raw, candidates)
    }

    fn validate(&self, candidate: &str) -> Result<(), String> {
        let has_steps = candidate
            .lines()
            .any(|l| {
                let l = l.trim_start();
                l.starts_with("1.") || l.starts_with("1)") || l.starts_with("- ")
            });
        if has_steps {
            Ok(())
        } else {
            Err("plan contains no numbered or bulleted steps".to_string())
        }
    }
}

/// Explicit strategy table, built at startup and passed by reference
///
/// Replaces a global singleton registry so the round controller can be
/// tested against a stub strategy.
pub struct StrategyMap {
    map: HashMap<TaskType, Arc<dyn Strategy>>,
}

impl StrategyMap {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// The three built-in strategies
    pub fn with_defaults() -> Self {
        let mut map = Self::new();
        map.insert(Arc::new(OpinionStrategy));
        map.insert(Arc::new(ReviewStrategy));
        map.insert(Arc::new(PlanStrategy));
        map
    }

    pub fn insert(&mut self, strategy: Arc<dyn Strategy>) {
        self.map.insert(strategy.task_type(), strategy);
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn Strategy>> {
        self.map.get(&task_type).cloned()
    }
}

impl Default for StrategyMap {
    fn default() -> Self {
        Self::with_defaults()
    }
}
