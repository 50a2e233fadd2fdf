// Simulation Report Types
// Structured output for the rewardsim JSON run file

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use unilevel_engine::audit::AuditReport;

// ─── Single-Scenario Result ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub label: String,
    pub seed: u64,
    pub members: usize,
    pub pass: bool,
    pub activations_ok: usize,
    pub activation_failures: BTreeMap<String, usize>,
    pub activation_points: Decimal,
    pub faults_injected: usize,
    pub retries_ok: usize,
    pub purchases_ok: usize,
    pub purchase_pool: Decimal,
    pub purchase_points: Decimal,
    pub replays_rejected: usize,
    pub grant_rows: usize,
    pub house_points: Decimal,
    pub audit: AuditReport,
    pub elapsed_ms: u128,
}

impl ScenarioResult {
    pub fn failures_total(&self) -> usize {
        self.activation_failures.values().sum()
    }

    pub fn total_points(&self) -> Decimal {
        self.activation_points + self.purchase_points
    }
}

// ─── Top-Level Report ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub timestamp: String,
    pub version: &'static str,
    pub prng: &'static str,
    pub seed: u64,
    pub members: usize,
    pub summary: Summary,
    pub scenarios: Vec<ScenarioResult>,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        let passed = results.iter().filter(|r| r.pass).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
        }
    }
}
