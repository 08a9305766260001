//! One-shot reconciliation

use anyhow::{Context, Result};
use buffer_lib::{ensure_buffer, template, Convergence, KubeCluster, ReconcileContext};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crate::output::{
    color_outcome, format_gi, print_json, print_success, print_warning, OutputFormat,
};

/// Row for the per-object outcome table
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Conflicts")]
    conflicts: u32,
}

fn row(kind: &'static str, name: String, outcome: Convergence) -> OutcomeRow {
    OutcomeRow {
        kind,
        name,
        outcome: color_outcome(outcome),
        conflicts: outcome.conflicts(),
    }
}

/// Run one reconciliation pass and print what it did
pub async fn run(
    cluster: &KubeCluster,
    namespace: &str,
    ctx: &ReconcileContext,
    format: OutputFormat,
) -> Result<()> {
    let report = ensure_buffer(cluster, namespace, ctx)
        .await
        .context("Reconciliation failed")?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            let rows = vec![
                row(
                    "PriorityClass",
                    template::PRIORITY_CLASS_NAME.to_string(),
                    report.priority_class,
                ),
                row(
                    "Deployment",
                    format!("{}/{}", namespace, template::BUFFER_APP_NAME),
                    report.deployment,
                ),
            ];
            println!("{}", Table::new(rows).with(Style::rounded()));
            println!(
                "Buffer size:  {} (from {}, {} allocatable)",
                format_gi(report.size.size_gi).cyan(),
                report.size.node,
                format_gi(report.size.allocatable_gi)
            );
            println!();

            let abandoned = [report.priority_class, report.deployment]
                .iter()
                .any(|o| matches!(o, Convergence::Abandoned { .. }));
            if abandoned {
                print_warning("Gave up after repeated write conflicts; run again to retry");
            } else if report.wrote() {
                print_success("Buffer reconciled");
            } else {
                print_success("Buffer already up to date");
            }
        }
    }

    Ok(())
}
