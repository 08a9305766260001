//! Read-only inspection of the buffer objects

use anyhow::{Context, Result};
use buffer_lib::{inspect_buffer, template, KubeCluster, ObjectState, ReconcileContext};
use colored::Colorize;

use crate::output::{color_state, format_gi, print_info, print_json, print_success, OutputFormat};

/// Show whether the buffer objects match their desired state
pub async fn run(
    cluster: &KubeCluster,
    namespace: &str,
    ctx: &ReconcileContext,
    format: OutputFormat,
) -> Result<()> {
    let status = inspect_buffer(cluster, namespace, ctx)
        .await
        .context("Failed to inspect buffer")?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", "Autoscaling Buffer".bold());
            println!("{}", "=".repeat(50));
            println!(
                "PriorityClass {:<20} {}",
                template::PRIORITY_CLASS_NAME,
                color_state(status.priority_class)
            );
            println!(
                "Deployment    {:<20} {}",
                format!("{}/{}", namespace, template::BUFFER_APP_NAME),
                color_state(status.deployment)
            );
            println!();

            let requested = status
                .requested_size_gi
                .map(format_gi)
                .unwrap_or_else(|| "-".to_string());
            println!("Requested:    {}", requested);
            println!(
                "Desired:      {} (from {})",
                format_gi(status.desired_size.size_gi).cyan(),
                status.desired_size.node
            );
            println!();

            if status.priority_class == ObjectState::InSync
                && status.deployment == ObjectState::InSync
            {
                print_success("Buffer is up to date");
            } else {
                print_info("Run `bufferctl ensure` to reconcile");
            }
        }
    }

    Ok(())
}
