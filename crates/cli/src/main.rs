//! Autoscaling buffer CLI
//!
//! A command-line tool for running one reconciliation by hand, checking
//! how the buffer would be sized and inspecting the buffer objects.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use buffer_lib::ReconcileContext;
use clap::{Parser, Subcommand};
use commands::{ensure, size, status};
use std::time::Duration;

/// Autoscaling buffer CLI
#[derive(Parser)]
#[command(name = "bufferctl")]
#[command(author, version, about = "CLI for the autoscaling buffer reconciler", long_about = None)]
pub struct Cli {
    /// Kubeconfig file or PATH-style list of files (defaults to ~/.kube/config, then in-cluster)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<String>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Namespace of the buffer deployment
    #[arg(
        long,
        short,
        env = "BUFFER_NAMESPACE",
        default_value = "toolchain-member-operator",
        global = true
    )]
    pub namespace: String,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Deadline for each cluster call, in seconds
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update the buffer priority class and deployment
    Ensure,

    /// Show worker nodes and the buffer size they yield
    Size,

    /// Compare the buffer objects against their desired state without writing
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cluster = client::connect(cli.kubeconfig.as_deref(), cli.context.clone()).await?;

    // Ctrl-C aborts the call in flight instead of killing the process mid-write
    let ctx = ReconcileContext::new(Duration::from_secs(cli.timeout));
    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    match cli.command {
        Commands::Ensure => ensure::run(&cluster, &cli.namespace, &ctx, cli.format).await?,
        Commands::Size => size::run(&cluster, &ctx, cli.format).await?,
        Commands::Status => status::run(&cluster, &cli.namespace, &ctx, cli.format).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_namespace_after_subcommand() {
        let cli = Cli::try_parse_from(["bufferctl", "ensure", "-n", "member-ns"]).unwrap();
        assert_eq!(cli.namespace, "member-ns");
        assert!(matches!(cli.command, Commands::Ensure));
    }

    #[test]
    fn test_json_format_and_timeout() {
        let cli =
            Cli::try_parse_from(["bufferctl", "--format", "json", "--timeout", "5", "size"])
                .unwrap();
        assert!(matches!(cli.format, output::OutputFormat::Json));
        assert_eq!(cli.timeout, 5);
    }
}
