//! Backend model registry and anonymous worker assignment

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::types::{WorkerId, MAX_WORKERS};

/// Provider family a backend belongs to
///
/// Carried explicitly on every descriptor; never inferred from model-name
/// substrings. Failover only ever crosses family boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Anthropic,
    OpenAi,
    Google,
    Local,
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Google => write!(f, "google"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Capability and availability of one backend
///
/// Constructed once from configuration; `available` reflects credential
/// presence at process start and is frozen for the debate's duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub family: ProviderFamily,
    pub token_limit: u64,
    pub cost_per_input_token: f64,
    pub cost_per_output_token: f64,
    pub available: bool,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, family: ProviderFamily, token_limit: u64) -> Self {
        Self {
            name: name.into(),
            family,
            token_limit,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            available: true,
        }
    }

    pub fn with_cost(mut self, input: f64, output: f64) -> Self {
        self.cost_per_input_token = input;
        self.cost_per_output_token = output;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

/// One debate participant: an anonymous letter bound to a concrete backend
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub worker: WorkerId,
    pub backend: ModelDescriptor,
}

/// Enumerates configured backends and their availability
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
    preferred_judge: Option<String>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            models,
            preferred_judge: None,
        }
    }

    /// Prefer a specific backend for judge and consensus calls
    pub fn with_preferred_judge(mut self, name: impl Into<String>) -> Self {
        self.preferred_judge = Some(name.into());
        self
    }

    /// All backends whose required credential is present
    pub fn list_available(&self) -> Vec<ModelDescriptor> {
        self.models.iter().filter(|m| m.available).cloned().collect()
    }

    /// Available backends in a different provider family, for failover
    pub fn failover_candidates(&self, exclude: ProviderFamily) -> Vec<ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| m.available && m.family != exclude)
            .cloned()
            .collect()
    }

    /// The preferred judge, if configured and its credential is present
    pub fn preferred_judge(&self) -> Option<ModelDescriptor> {
        let name = self.preferred_judge.as_deref()?;
        self.models
            .iter()
            .find(|m| m.name == name && m.available)
            .cloned()
    }

    /// Assign anonymous letters to available backends, in registry order
    ///
    /// Capped at [`MAX_WORKERS`]; the mapping is fixed for one debate and
    /// only stable within it.
    pub fn assign_workers(&self) -> Vec<Participant> {
        let roster: Vec<Participant> = self
            .list_available()
            .into_iter()
            .take(MAX_WORKERS)
            .enumerate()
            .filter_map(|(i, backend)| {
                WorkerId::from_index(i).map(|worker| Participant { worker, backend })
            })
            .collect();

        debug!(count = roster.len(), "Assigned debate workers");
        roster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, family: ProviderFamily) -> ModelDescriptor {
        ModelDescriptor::new(name, family, 200_000)
    }

    fn test_registry() -> ModelRegistry {
        ModelRegistry::new(vec![
            descriptor("claude-sonnet", ProviderFamily::Anthropic),
            descriptor("gpt-5", ProviderFamily::OpenAi).unavailable(),
            descriptor("gemini-pro", ProviderFamily::Google),
        ])
    }

    #[test]
    fn test_list_available_filters_credentials() {
        let registry = test_registry();
        let available = registry.list_available();
        assert_eq!(available.len(), 2);
        assert!(available.iter().all(|m| m.available));
    }

    #[test]
    fn test_worker_assignment_order() {
        let registry = test_registry();
        let roster = registry.assign_workers();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].worker.letter(), 'A');
        assert_eq!(roster[0].backend.name, "claude-sonnet");
        assert_eq!(roster[1].worker.letter(), 'B');
        assert_eq!(roster[1].backend.name, "gemini-pro");
    }

    #[test]
    fn test_worker_assignment_caps_at_eight() {
        let models = (0..12)
            .map(|i| descriptor(&format!("model-{i}"), ProviderFamily::Local))
            .collect();
        let registry = ModelRegistry::new(models);
        let roster = registry.assign_workers();
        assert_eq!(roster.len(), 8);
        assert_eq!(roster.last().unwrap().worker.letter(), 'H');
    }

    #[test]
    fn test_failover_candidates_cross_family_only() {
        let registry = test_registry();
        let alternates = registry.failover_candidates(ProviderFamily::Anthropic);
        assert_eq!(alternates.len(), 1);
        assert_eq!(alternates[0].name, "gemini-pro");
    }

    #[test]
    fn test_preferred_judge_requires_credential() {
        let registry = test_registry().with_preferred_judge("gpt-5");
        assert!(registry.preferred_judge().is_none());

        let registry = test_registry().with_preferred_judge("gemini-pro");
        assert_eq!(registry.preferred_judge().unwrap().name, "gemini-pro");
    }
}
