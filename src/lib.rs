//! # Conclave
//!
//! Multi-model debate orchestration - several backends argue, one answer
//! emerges.
//!
//! A debate runs independent text-generation backends against the same task,
//! has them critique and revise each other's work over a bounded number of
//! rounds, and lets a judge backend select or merge the final artifact.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ROUND CONTROLLER                           │
//! │   Generate ─▶ Critique ─▶ { Synthesize ─▶ Consensus? }* ─▶ Judge  │
//! └──────┬──────────────┬──────────────┬──────────────────────┬──────┘
//!        │              │              │                      │
//!        ▼              ▼              ▼                      ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐       ┌──────────────┐
//! │  Strategy  │ │   Batch    │ │   Budget   │       │ Task Runner  │
//! │  (prompts) │ │ Scheduler  │ │  Tracker   │       │(retry+cancel)│
//! └────────────┘ └────────────┘ └────────────┘       └──────┬───────┘
//!                                                           │
//!                                                  ┌────────┴────────┐
//!                                                  ▼        ▼        ▼
//!                                               ┌────┐   ┌────┐   ┌────┐
//!                                               │ A  │   │ B  │   │ C  │
//!                                               └────┘   └────┘   └────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Backend / worker**: one provider+model combination, addressed by an
//!   anonymous letter (`A`, `B`, ...) for the debate's duration
//! - **Candidate**: a backend's current best answer for the task
//! - **Critique**: feedback one backend gives on its peers' candidates
//! - **Judge**: the backend that selects or merges the final answer
//!
//! Partial failure is the norm: workers that drop out become warnings on
//! the result, and the debate completes as long as anything succeeded.

pub mod batch;
pub mod budget;
pub mod debate;
pub mod error;
pub mod model;
pub mod notify;
pub mod runner;
pub mod strategy;
pub mod telemetry;
pub mod types;

pub use debate::{DebateOrchestrator, DebateRequest, CONSENSUS_THRESHOLD};
pub use error::{AbortedDebate, DebateError, TaskError, TransientKind};
pub use model::{ModelDescriptor, ModelRegistry, Participant, ProviderFamily};
pub use notify::{Notification, Notifier, NotifyLevel};
pub use runner::{BackendClient, BackendResponse, InvokeOptions, RetryPolicy, TaskRunner};
pub use strategy::{JudgeVerdict, PromptPhase, Strategy, StrategyMap};

// Re-export commonly used data-model types
pub use types::{
    CandidateRecord, DebateConfig, DebateContext, DebateId, DebateResult, LogLevel, Phase,
    TaskType, TokenUsage, Warning, WarningCode, WorkerId,
};
