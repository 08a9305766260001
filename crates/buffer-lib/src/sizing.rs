//! Buffer sizing from node inventory
//!
//! The buffer requests 80% of the allocatable memory of the first worker
//! node in inventory order. Infra nodes never qualify, even when they also
//! carry the worker role.

use k8s_openapi::api::core::v1::Node;
use serde::Serialize;
use thiserror::Error;

/// Fraction of a worker node's allocatable memory taken by the buffer
///
/// Applied to the allocatable memory after it is rounded up to whole
/// gibibytes, as a quantity's `ScaledValue` would round it. A node with
/// 15.4Gi allocatable therefore counts as 16Gi and yields a 13Gi buffer.
pub const BUFFER_SIZE_NODE_SIZE_RATIO: f64 = 0.8;

pub const LABEL_NODE_ROLE_WORKER: &str = "node-role.kubernetes.io/worker";
pub const LABEL_NODE_ROLE_INFRA: &str = "node-role.kubernetes.io/infra";

const GIBIBYTE: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("unable to obtain allocatable memory of a worker node")]
    NoUsableWorker,

    #[error("node {node} reports unparseable allocatable memory {value:?}")]
    InvalidQuantity { node: String, value: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid quantity {0:?}")]
pub struct QuantityError(pub String);

/// Result of a sizing pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferSize {
    /// Worker node the size was derived from
    pub node: String,
    /// That node's allocatable memory, rounded up to whole gibibytes
    pub allocatable_gi: i64,
    /// Memory to request for the buffer pod, in gibibytes
    pub size_gi: i64,
}

/// Bytes in `gi` gibibytes
pub fn gibibytes(gi: i64) -> f64 {
    gi as f64 * GIBIBYTE
}

/// Parse a Kubernetes resource quantity into its value in base units
///
/// Accepts plain and fractional numbers, binary suffixes (`Ki` to `Ei`),
/// decimal suffixes (`n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`) and
/// decimal exponents (`5e9`, `5E9`).
pub fn parse_quantity(input: &str) -> Result<f64, QuantityError> {
    let s = input.trim();
    let invalid = || QuantityError(input.to_string());

    let number_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_end);
    if number.is_empty() {
        return Err(invalid());
    }
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        exp if exp.starts_with(['e', 'E']) => {
            let exponent: i32 = exp[1..].parse().map_err(|_| invalid())?;
            10f64.powi(exponent)
        }
        _ => return Err(invalid()),
    };

    Ok(value * multiplier)
}

fn has_label(node: &Node, key: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(key))
}

/// A node runs general workloads: worker role and no infra role
pub fn is_worker(node: &Node) -> bool {
    if has_label(node, LABEL_NODE_ROLE_INFRA) {
        return false;
    }
    has_label(node, LABEL_NODE_ROLE_WORKER)
}

/// Allocatable memory reported in a node's status, if any
pub fn allocatable_memory(node: &Node) -> Option<&str> {
    node.status
        .as_ref()?
        .allocatable
        .as_ref()?
        .get("memory")
        .map(|q| q.0.as_str())
}

/// Derive the buffer size from the first worker node in `nodes`
///
/// Only the first worker is consulted; a cluster with several worker pools
/// is sized after whichever pool lists first.
pub fn buffer_size(nodes: &[Node]) -> Result<BufferSize, SizingError> {
    let node = nodes
        .iter()
        .find(|node| is_worker(node))
        .ok_or(SizingError::NoUsableWorker)?;
    let memory = allocatable_memory(node).ok_or(SizingError::NoUsableWorker)?;

    let node_name = node.metadata.name.clone().unwrap_or_default();
    let invalid = || SizingError::InvalidQuantity {
        node: node_name.clone(),
        value: memory.to_string(),
    };
    let bytes = parse_quantity(memory).map_err(|_| invalid())?;
    if !bytes.is_finite() || bytes <= 0.0 {
        return Err(invalid());
    }

    // Whole gibibytes rounded up (ScaledValue style), then the ratio
    // rounded to nearest
    let allocatable_gi = (bytes / GIBIBYTE).ceil() as i64;
    let size_gi = (BUFFER_SIZE_NODE_SIZE_RATIO * allocatable_gi as f64).round() as i64;

    Ok(BufferSize {
        node: node_name,
        allocatable_gi,
        size_gi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node_fixture;

    #[test]
    fn test_parse_quantity_binary_suffixes() {
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024.0);
        assert_eq!(parse_quantity("100Gi").unwrap(), gibibytes(100));
        assert_eq!(parse_quantity("16265420Ki").unwrap(), 16_265_420.0 * 1024.0);
    }

    #[test]
    fn test_parse_quantity_decimal_forms() {
        assert_eq!(parse_quantity("1G").unwrap(), 1e9);
        assert_eq!(parse_quantity("500M").unwrap(), 5e8);
        assert_eq!(parse_quantity("1e9").unwrap(), 1e9);
        assert_eq!(parse_quantity("2E3").unwrap(), 2000.0);
        assert_eq!(parse_quantity("1.5").unwrap(), 1.5);
        assert_eq!(parse_quantity("8589934592").unwrap(), gibibytes(8));
        assert!((parse_quantity("250m").unwrap() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_quantity_rejects_garbage() {
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("Gi").is_err());
        assert!(parse_quantity("12XB").is_err());
        assert!(parse_quantity("1.2.3Gi").is_err());
        assert!(parse_quantity("5ex").is_err());
    }

    #[test]
    fn test_worker_classification() {
        assert!(is_worker(&node_fixture("w", &["worker"], Some("1Gi"))));
        assert!(!is_worker(&node_fixture("i", &["infra"], Some("1Gi"))));
        assert!(!is_worker(&node_fixture("iw", &["worker", "infra"], Some("1Gi"))));
        assert!(!is_worker(&node_fixture("m", &["master"], Some("1Gi"))));
        assert!(!is_worker(&node_fixture("none", &[], Some("1Gi"))));
    }

    #[test]
    fn test_buffer_size_ratios() {
        let cases = [("100Gi", 80), ("10Gi", 8), ("15Gi", 12), ("1Gi", 1)];
        for (memory, expected) in cases {
            let nodes = vec![node_fixture("w", &["worker"], Some(memory))];
            assert_eq!(buffer_size(&nodes).unwrap().size_gi, expected, "{}", memory);
        }
    }

    #[test]
    fn test_buffer_size_rounds_allocatable_up() {
        // 15.51Gi counts as 16Gi; 0.8 * 16 = 12.8 rounds to 13
        let nodes = vec![node_fixture("w", &["worker"], Some("16265420Ki"))];
        let size = buffer_size(&nodes).unwrap();
        assert_eq!(size.allocatable_gi, 16);
        assert_eq!(size.size_gi, 13);
    }

    #[test]
    fn test_buffer_size_fractional_allocatable_rounds_up_first() {
        let nodes = vec![node_fixture("w", &["worker"], Some("15.4Gi"))];
        let size = buffer_size(&nodes).unwrap();
        assert_eq!(size.allocatable_gi, 16);
        assert_eq!(size.size_gi, 13);
    }

    #[test]
    fn test_buffer_size_rejects_non_positive_allocatable() {
        for memory in ["-4Gi", "0", "0Gi"] {
            let nodes = vec![node_fixture("worker-0", &["worker"], Some(memory))];
            assert_eq!(
                buffer_size(&nodes),
                Err(SizingError::InvalidQuantity {
                    node: "worker-0".to_string(),
                    value: memory.to_string(),
                }),
                "{}",
                memory
            );
        }
    }

    #[test]
    fn test_buffer_size_picks_first_worker_only() {
        let nodes = vec![
            node_fixture("master-0", &["master"], Some("64Gi")),
            node_fixture("infra-0", &["infra", "worker"], Some("200Gi")),
            node_fixture("worker-0", &["worker"], Some("10Gi")),
            node_fixture("worker-1", &["worker"], Some("100Gi")),
        ];
        let size = buffer_size(&nodes).unwrap();
        assert_eq!(
            size,
            BufferSize {
                node: "worker-0".to_string(),
                allocatable_gi: 10,
                size_gi: 8,
            }
        );
    }

    #[test]
    fn test_buffer_size_empty_inventory() {
        assert_eq!(buffer_size(&[]), Err(SizingError::NoUsableWorker));
    }

    #[test]
    fn test_buffer_size_only_infra_nodes() {
        let nodes = vec![node_fixture("infra-0", &["infra", "worker"], Some("32Gi"))];
        assert_eq!(buffer_size(&nodes), Err(SizingError::NoUsableWorker));
    }

    #[test]
    fn test_buffer_size_worker_without_allocatable() {
        let nodes = vec![
            node_fixture("worker-0", &["worker"], None),
            node_fixture("worker-1", &["worker"], Some("32Gi")),
        ];
        assert_eq!(buffer_size(&nodes), Err(SizingError::NoUsableWorker));
    }

    #[test]
    fn test_buffer_size_unparseable_allocatable() {
        let nodes = vec![node_fixture("worker-0", &["worker"], Some("lots"))];
        assert_eq!(
            buffer_size(&nodes),
            Err(SizingError::InvalidQuantity {
                node: "worker-0".to_string(),
                value: "lots".to_string(),
            })
        );
    }
}
