//! Mission plan validation

use std::path::Path;

use anyhow::Context;
use missionpay_types::{ordered_assignments, MissionMode, MissionPlan};

use crate::display;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let plan: MissionPlan = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;

    display::section("Mission plan");
    display::kv("client", plan.client.as_str());
    display::kv("mode", &plan.mode.to_string());
    display::kv("budget", &plan.total_budget.to_string());

    if let Err(err) = plan.validate() {
        display::error(&err.to_string());
        return Err(err).context("plan is not executable");
    }

    let assignments = match plan.mode {
        MissionMode::Sequential => ordered_assignments(&plan.assignments),
        MissionMode::Parallel => plan.assignments.clone(),
    };
    println!();
    for (index, a) in assignments.iter().enumerate() {
        display::info(&format!(
            "{}. {} at {} for {}",
            index + 1,
            a.capability,
            a.endpoint,
            a.payment
        ));
    }

    // validate() guarantees the contracted total fits the budget
    let contracted = plan.contracted_total().unwrap_or(plan.total_budget);
    let surplus = plan.total_budget.saturating_sub(contracted);
    println!();
    display::kv("contracted", &contracted.to_string());
    display::kv("returned to client on release", &surplus.to_string());
    display::success("Plan is valid");
    Ok(())
}
