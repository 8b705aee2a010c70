//! Command implementations for adaptctl.

use crate::client::DaemonClient;
use adapt_common::{EventStatus, Policy};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;

pub async fn status(client: &DaemonClient) -> Result<()> {
    let health = client.health().await?;

    println!("{}", "Adaptation daemon".bold());
    println!("  status:   {}", health.status.green());
    println!("  version:  {}", health.version);
    println!("  uptime:   {}s", health.uptime_seconds);
    println!("  policies: {}", health.policies);
    Ok(())
}

pub async fn register_policy(client: &DaemonClient, file: &str) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read policy file '{}'", file))?;
    let policy: Policy =
        serde_json::from_str(&content).context("Policy file is not valid policy JSON")?;

    let policy_id = policy.policy_id.clone();
    client.register_policy(&policy).await?;
    println!("{} policy '{}'", "Registered".green().bold(), policy_id);
    Ok(())
}

pub async fn events(client: &DaemonClient, limit: usize) -> Result<()> {
    let events = client.events(limit).await?;
    if events.is_empty() {
        println!("No adaptation events recorded");
        return Ok(());
    }

    for event in events {
        let status = match event.status {
            EventStatus::Delivered => "delivered".green().to_string(),
            EventStatus::Triggered => "triggered".yellow().to_string(),
            // A failed dispatch means the managed system is not receiving
            // adaptations; make it stand out.
            EventStatus::Failed => "FAILED".red().bold().to_string(),
        };
        println!(
            "{}  {}  {}/{}  {:?} -> {}  [{}]{}",
            event.issued_at.format("%Y-%m-%d %H:%M:%S"),
            &event.event_id[..8.min(event.event_id.len())],
            event.policy_id,
            event.instance_id,
            event.tactic.kind,
            event.tactic.target.as_deref().unwrap_or("-"),
            status,
            event
                .failure_reason
                .as_deref()
                .map(|r| format!("  ({})", r))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

pub async fn knowledge(client: &DaemonClient, policy_id: &str) -> Result<()> {
    let view = client.knowledge(policy_id).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

pub async fn export(
    client: &DaemonClient,
    policy_id: &str,
    instance_id: &str,
    limit: usize,
) -> Result<()> {
    let rows = client.export(policy_id, instance_id, limit).await?;
    if rows.is_empty() {
        println!("No telemetry exported for {}/{}", policy_id, instance_id);
        return Ok(());
    }

    println!(
        "{:>12}  {:>7}  {:>7}  {:>8}  model",
        "timestamp", "score", "energy", "kl_div"
    );
    for row in rows {
        println!(
            "{:>12}  {:>7.4}  {:>7.4}  {:>8}  {}",
            row.timestamp,
            row.score,
            row.normalized_energy,
            row.kl_div
                .map(|kl| format!("{:.4}", kl))
                .unwrap_or_else(|| "-".to_string()),
            row.model_used,
        );
    }
    Ok(())
}
