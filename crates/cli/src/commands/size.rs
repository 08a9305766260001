//! Buffer sizing preview

use anyhow::{Context, Result};
use buffer_lib::sizing::{self, BufferSize};
use buffer_lib::{KubeCluster, NodeInventory, ReconcileContext};
use colored::Colorize;
use k8s_openapi::api::core::v1::Node;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use crate::output::{format_gi, print_error, print_info, print_json, OutputFormat};

const NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";

/// Row for the node table
#[derive(Tabled, Serialize)]
struct NodeRow {
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "Roles")]
    roles: String,
    #[tabled(rename = "Worker")]
    worker: bool,
    #[tabled(rename = "Allocatable Memory")]
    allocatable_memory: String,
    #[tabled(rename = "Selected")]
    #[serde(skip)]
    marker: &'static str,
}

#[derive(Serialize)]
struct SizeOutput {
    nodes: Vec<NodeRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<BufferSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn roles(node: &Node) -> String {
    let roles: Vec<&str> = node
        .metadata
        .labels
        .iter()
        .flatten()
        .filter_map(|(key, _)| key.strip_prefix(NODE_ROLE_PREFIX))
        .collect();
    if roles.is_empty() {
        "<none>".to_string()
    } else {
        roles.join(",")
    }
}

fn node_rows(nodes: &[Node], selected: Option<&str>) -> Vec<NodeRow> {
    nodes
        .iter()
        .map(|node| {
            let name = node.metadata.name.clone().unwrap_or_default();
            NodeRow {
                marker: if selected == Some(name.as_str()) { "*" } else { "" },
                roles: roles(node),
                worker: sizing::is_worker(node),
                allocatable_memory: sizing::allocatable_memory(node)
                    .unwrap_or("<unknown>")
                    .to_string(),
                name,
            }
        })
        .collect()
}

/// List nodes and the buffer size the first worker yields
pub async fn run(
    cluster: &KubeCluster,
    ctx: &ReconcileContext,
    format: OutputFormat,
) -> Result<()> {
    let nodes = ctx
        .call(cluster.list_nodes())
        .await
        .context("Failed to list nodes")?;
    let result = sizing::buffer_size(&nodes);
    let selected = result.as_ref().ok().map(|size| size.node.as_str());
    let rows = node_rows(&nodes, selected);

    match format {
        OutputFormat::Json => {
            let output = SizeOutput {
                nodes: rows,
                size: result.as_ref().ok().cloned(),
                error: result.as_ref().err().map(|e| e.to_string()),
            };
            print_json(&output)?;
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                print_info("No nodes found");
            } else {
                println!("{}", Table::new(&rows).with(Style::rounded()));
            }
            if let Ok(size) = &result {
                println!(
                    "Buffer size:  {} ({:.0}% of {} on {})",
                    format_gi(size.size_gi).cyan().bold(),
                    sizing::BUFFER_SIZE_NODE_SIZE_RATIO * 100.0,
                    format_gi(size.allocatable_gi),
                    size.node
                );
            }
        }
    }

    if let Err(e) = result {
        if matches!(format, OutputFormat::Table) {
            print_error(&e.to_string());
        }
        return Err(e).context("Unable to size the buffer");
    }
    Ok(())
}
