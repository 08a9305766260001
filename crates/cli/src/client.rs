//! Kubernetes client construction for the CLI

use anyhow::{Context, Result};
use buffer_lib::KubeCluster;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::PathBuf;

use crate::config::kubeconfig_paths;

/// Connect to the cluster named by `kubeconfig` and `context`
///
/// `kubeconfig` may list several files; they are merged with the first
/// file taking precedence. Falls back to in-cluster configuration when no
/// kubeconfig is found.
pub async fn connect(kubeconfig: Option<&str>, context: Option<String>) -> Result<KubeCluster> {
    let options = KubeConfigOptions {
        context,
        cluster: None,
        user: None,
    };

    let config = match load_kubeconfig(&kubeconfig_paths(kubeconfig, dirs_next::home_dir()))? {
        Some(kubeconfig) => Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .context("Failed to load kubeconfig")?,
        None => Config::infer()
            .await
            .context("No kubeconfig found and not running in a cluster")?,
    };

    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
    Ok(KubeCluster::new(client))
}

/// Read and merge kubeconfig files, `None` when `paths` is empty
fn load_kubeconfig(paths: &[PathBuf]) -> Result<Option<Kubeconfig>> {
    let mut merged: Option<Kubeconfig> = None;
    for path in paths {
        let next = Kubeconfig::read_from(path)
            .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
        merged = Some(match merged {
            Some(current) => current
                .merge(next)
                .with_context(|| format!("Failed to merge kubeconfig {}", path.display()))?,
            None => next,
        });
    }
    Ok(merged)
}
