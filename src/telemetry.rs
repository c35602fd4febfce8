//! Warning/transcript collection and result assembly
//!
//! Workers in the same batch complete concurrently, so the collector is the
//! one piece of state they share. Both lists are append-only.

use parking_lot::Mutex;
use std::time::Instant;

use crate::types::{
    DebateId, DebateResult, LogLevel, Phase, PhaseTiming, Timings, TokenUsage, TranscriptEntry,
    Warning, WarningCode, WinnerAttribution, WorkerId,
};

/// Append-only warning and transcript store shared across batch tasks
pub struct Collector {
    log_level: LogLevel,
    warnings: Mutex<Vec<Warning>>,
    transcript: Mutex<Vec<TranscriptEntry>>,
}

impl Collector {
    pub fn new(log_level: LogLevel) -> Self {
        Self {
            log_level,
            warnings: Mutex::new(Vec::new()),
            transcript: Mutex::new(Vec::new()),
        }
    }

    pub fn warn(&self, code: WarningCode, phase: Phase, message: impl Into<String>) {
        self.warnings.lock().push(Warning {
            code,
            message: message.into(),
            phase,
        });
    }

    /// Record an exchange; dropped unless running at debug verbosity
    pub fn record_exchange(
        &self,
        phase: Phase,
        round: u32,
        worker: Option<WorkerId>,
        prompt: &str,
        response: &str,
    ) {
        if self.log_level < LogLevel::Debug {
            return;
        }
        self.transcript.lock().push(TranscriptEntry {
            phase,
            round,
            worker,
            prompt: prompt.to_string(),
            response: response.to_string(),
        });
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().clone()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.lock().clone()
    }
}

/// Per-phase wall-clock accounting
pub struct PhaseClock {
    started: Instant,
    per_phase: Vec<PhaseTiming>,
}

impl PhaseClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            per_phase: Vec::new(),
        }
    }

    /// Time one phase of one round
    pub async fn measure<T, F>(&mut self, phase: Phase, round: u32, work: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let phase_start = Instant::now();
        let out = work.await;
        self.per_phase.push(PhaseTiming {
            phase,
            round,
            elapsed_ms: phase_start.elapsed().as_millis() as u64,
        });
        out
    }

    pub fn finish(self) -> Timings {
        Timings {
            total_ms: self.started.elapsed().as_millis() as u64,
            per_phase: self.per_phase,
        }
    }
}

/// Package internal state into the externally consumed result
pub struct ResultAssembler {
    pub id: DebateId,
    pub log_level: LogLevel,
}

impl ResultAssembler {
    pub fn assemble(
        &self,
        final_text: String,
        winner: Option<WinnerAttribution>,
        collector: &Collector,
        token_usage: TokenUsage,
        timings: Timings,
        rounds_completed: u32,
        consensus_reached: bool,
    ) -> DebateResult {
        let transcript = if self.log_level >= LogLevel::Debug {
            Some(collector.transcript())
        } else {
            None
        };

        DebateResult {
            id: self.id,
            final_text,
            warnings: collector.warnings(),
            token_usage,
            timings,
            winner,
            transcript,
            rounds_completed,
            consensus_reached,
        }
    }
}
