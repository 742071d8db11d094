//! Result shape returned by the pipeline's LLM-backed agents

use serde::{Deserialize, Serialize};

/// What an agent invocation hands back to the orchestration loop
///
/// The core only reads `success` and `cost_usd`; `output` and `errors` are
/// carried for callers and logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(default)]
    pub output: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub cost_usd: f64,
}

impl AgentResult {
    /// A successful result with the given cost
    pub fn succeeded(cost_usd: f64) -> Self {
        Self {
            success: true,
            cost_usd,
            ..Default::default()
        }
    }

    /// A failed result with the given cost and error messages
    pub fn failed(cost_usd: f64, errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            cost_usd,
            ..Default::default()
        }
    }
}
