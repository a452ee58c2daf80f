//! Display utilities for the CLI

use colored::*;
use missionpay_types::{ExecutionRecord, ExecutionStatus, MissionExecution};

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", "━".repeat(60).bright_black());
    println!(" {}", title.bright_white().bold());
    println!("{}", "━".repeat(60).bright_black());
}

pub fn success(message: &str) {
    println!("  {} {}", "✓".bright_green(), message);
}

pub fn error(message: &str) {
    println!("  {} {}", "✗".bright_red(), message.bright_red());
}

pub fn info(message: &str) {
    println!("  {} {}", "→".bright_blue(), message);
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("      {}: {}", key, value.bright_cyan());
}

fn execution_line(name: &str, record: &ExecutionRecord) {
    let status = match record.status {
        ExecutionStatus::Completed => record.status.to_string().bright_green(),
        ExecutionStatus::Failed => record.status.to_string().bright_red(),
        _ => record.status.to_string().yellow(),
    };
    println!("  {:<12} {:<10} paid {}", name.bright_white(), status, record.paid);
    if let Some(tx_hash) = &record.tx_hash {
        kv("tx", tx_hash.as_str());
    }
    if let Some(error) = &record.error {
        kv("error", error);
    }
}

/// Per-agent records and totals of one mission run
pub fn mission(result: &MissionExecution, names: &[(String, missionpay_types::AgentId)]) {
    for (name, agent_id) in names {
        if let Some(record) = result.execution_for(agent_id) {
            execution_line(name, record);
        }
    }
    println!();
    kv("mode", &result.mode.to_string());
    kv("total paid", &result.total_paid.to_string());
    kv("escrow status", &result.status.to_string());
    if let Some(deliverable) = &result.deliverable {
        kv("deliverable", deliverable);
    }
    match &result.error {
        Some(message) => error(message),
        None => success("All agents delivered"),
    }
}
