// src/repair/mod.rs
//
// Compile-feedback repair: one session per candidate test file, driven either
// by the controller (`directed`) or by the model through a compile tool
// (`agent`), fanned out across candidates by the batch driver.

pub mod agent;
pub mod batch;
pub mod claims;
pub mod session;
pub mod workspace;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, RepairConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// The controller compiles, then asks for one revision per failure.
    #[default]
    Directed,
    /// The model drives the loop through the `compile_test_contract` tool.
    Agent,
}

/// Bounds every session in a batch shares.
#[derive(Debug, Clone, Copy)]
pub struct RepairLimits {
    /// Wall-clock ceiling per session.
    pub budget: Duration,
    /// Compile attempts per session. Zero disables the cap.
    pub max_attempts: u32,
    /// Upper bound for a single LLM round-trip.
    pub request_timeout: Duration,
}

impl RepairLimits {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(&cfg.repair, cfg.llm.request_timeout())
    }

    pub fn new(repair: &RepairConfig, request_timeout: Duration) -> Self {
        Self {
            budget: Duration::from_secs(repair.budget_secs),
            max_attempts: repair.max_attempts,
            request_timeout,
        }
    }
}
