//! Shared data model for debate orchestration

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one debate invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebateId(Uuid);

impl DebateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DebateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DebateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anonymous worker identifier (`A` through `H`)
///
/// Assigned positionally from the registry's availability list at debate
/// start. A worker that drops out keeps its letter; letters are never
/// recycled within a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(u8);

/// Maximum number of debate participants (letters `A`..`H`)
pub const MAX_WORKERS: usize = 8;

impl WorkerId {
    /// Create a worker ID from a zero-based index. `None` past the cap.
    pub fn from_index(index: usize) -> Option<Self> {
        if index < MAX_WORKERS {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// The single-letter form used in prompts
    pub fn letter(&self) -> char {
        (b'A' + self.0) as char
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// The kind of artifact a debate produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// A reasoned opinion on a question
    Opinion,
    /// A code review
    Review,
    /// An implementation plan
    Plan,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opinion => write!(f, "opinion"),
            Self::Review => write!(f, "review"),
            Self::Plan => write!(f, "plan"),
        }
    }
}

/// Verbosity of notifications and transcript retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Warn,
    Info,
    Debug,
}

/// Caller-supplied debate configuration
///
/// `rounds` and `log_level` are optional so that strategy defaults apply
/// only when the caller left them unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebateConfig {
    /// Whether multi-model debate is enabled at all
    #[serde(default)]
    pub enabled: bool,
    /// Number of debate rounds (>= 1); default comes from the strategy
    #[serde(default)]
    pub rounds: Option<u32>,
    /// Token ceiling across the whole debate; 0 = unlimited
    #[serde(default)]
    pub max_total_tokens: u64,
    /// Notification verbosity; default comes from the strategy
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    /// Batch width for within-round parallelism
    #[serde(default)]
    pub parallelism: Option<usize>,
    /// Overall wall-clock deadline in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// Mutable working state threaded through debate phases
///
/// `candidates` is replaced wholesale at the end of each generate or
/// synthesize phase; it is never mutated element-by-element while worker
/// tasks are reading it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebateContext {
    pub user_prompt: String,
    pub code_context: Option<String>,
    pub candidates: Vec<String>,
    pub critiques: Vec<String>,
    pub round: u32,
}

impl DebateContext {
    pub fn new(user_prompt: impl Into<String>, code_context: Option<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            code_context,
            ..Default::default()
        }
    }
}

/// Maps a candidate slot to the worker that produced it
///
/// Records are kept in candidate-list order, so slot `i` of the candidate
/// list is attributed through record `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub worker: WorkerId,
    pub backend: String,
}

/// Debate phase, used for warning attribution and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Generate,
    Critique,
    Synthesize,
    Consensus,
    Judge,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generate => write!(f, "generate"),
            Self::Critique => write!(f, "critique"),
            Self::Synthesize => write!(f, "synthesize"),
            Self::Consensus => write!(f, "consensus"),
            Self::Judge => write!(f, "judge"),
        }
    }
}

/// Recoverable-failure classification surfaced in the final result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    GenFail,
    JudgeMalformed,
    ValidationFail,
    TokenBudget,
}

/// A recoverable failure recorded during the debate
///
/// Warnings are append-only and never emitted on a success path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
    pub phase: Phase,
}

/// Cumulative token accounting; only ever grows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One prompt/response exchange, retained only at debug verbosity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub phase: Phase,
    pub round: u32,
    pub worker: Option<WorkerId>,
    pub prompt: String,
    pub response: String,
}

/// Wall-clock time spent in one phase of one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub round: u32,
    pub elapsed_ms: u64,
}

/// Timing breakdown for a completed debate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub total_ms: u64,
    pub per_phase: Vec<PhaseTiming>,
}

/// Who won the debate, in both anonymous and concrete form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerAttribution {
    pub worker: WorkerId,
    pub backend: String,
}

/// The externally consumed outcome of one debate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateResult {
    pub id: DebateId,
    pub final_text: String,
    pub warnings: Vec<Warning>,
    pub token_usage: TokenUsage,
    pub timings: Timings,
    /// Absent when the judge synthesized its own answer
    pub winner: Option<WinnerAttribution>,
    /// Present only at `LogLevel::Debug`
    pub transcript: Option<Vec<TranscriptEntry>>,
    pub rounds_completed: u32,
    pub consensus_reached: bool,
}
