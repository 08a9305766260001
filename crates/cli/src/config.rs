//! Kubeconfig discovery for the CLI

use std::env;
use std::path::PathBuf;

/// Kubeconfig files to load, in merge order
///
/// An explicit value (flag or `KUBECONFIG`) wins and may list several files
/// separated like `PATH`. A single file is used as given. In a list,
/// entries that do not exist are skipped. Without an explicit value,
/// `~/.kube/config` is used when it exists. An empty result means
/// in-cluster configuration.
pub fn kubeconfig_paths(override_paths: Option<&str>, home: Option<PathBuf>) -> Vec<PathBuf> {
    if let Some(value) = override_paths.filter(|v| !v.is_empty()) {
        let paths: Vec<PathBuf> = env::split_paths(value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if paths.len() <= 1 {
            return paths;
        }
        return paths.into_iter().filter(|p| p.exists()).collect();
    }

    home.map(|home| home.join(".kube").join("config"))
        .filter(|path| path.exists())
        .into_iter()
        .collect()
}
