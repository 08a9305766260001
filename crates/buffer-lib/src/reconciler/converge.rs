//! Bounded read-modify-write against an object store
//!
//! [`converge`] implements the get, diff, create-or-update cycle shared by
//! every reconciled kind. Updates are optimistic: a conflict means someone
//! else wrote in between, so the object is read again and the patch is
//! recomputed against the fresh copy. After [`MAX_CONFLICT_RETRIES`] rejected
//! writes the attempt is abandoned without error; the next reconciliation
//! pass starts over.

use crate::cluster::{ClusterError, ObjectKey, ObjectStore};
use crate::context::ReconcileContext;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Write attempts allowed per object before giving up on conflicts
pub const MAX_CONFLICT_RETRIES: u32 = 10;

/// What a convergence pass did to one object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Convergence {
    /// The object was absent and has been created
    Created,
    /// The object had drifted and was written; `attempts` counts every
    /// write including the one that succeeded
    Updated { attempts: u32 },
    /// The object already matched the desired state
    Unchanged,
    /// Every write attempt hit a conflict
    Abandoned { attempts: u32 },
}

impl Convergence {
    /// Whether this pass wrote to the cluster
    pub fn wrote(&self) -> bool {
        matches!(self, Convergence::Created | Convergence::Updated { .. })
    }

    /// Writes rejected with a conflict during this pass
    pub fn conflicts(&self) -> u32 {
        match self {
            Convergence::Updated { attempts } => attempts.saturating_sub(1),
            Convergence::Abandoned { attempts } => *attempts,
            Convergence::Created | Convergence::Unchanged => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Convergence::Created => "created",
            Convergence::Updated { .. } => "updated",
            Convergence::Unchanged => "unchanged",
            Convergence::Abandoned { .. } => "abandoned",
        }
    }
}

impl fmt::Display for Convergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Make the object at `key` match the desired state
///
/// `build` produces the object to create when none exists; `patch` edits an
/// observed object in place and returns true if it changed anything.
/// Errors other than conflicts are returned as is.
pub async fn converge<K, S, B, P>(
    store: &S,
    ctx: &ReconcileContext,
    kind: &'static str,
    key: &ObjectKey,
    build: B,
    patch: P,
) -> Result<Convergence, ClusterError>
where
    K: Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
    B: Fn() -> K,
    P: Fn(&mut K) -> bool,
{
    let mut current = ctx.call(store.get(key)).await?;
    let mut attempts = 0;

    while attempts < MAX_CONFLICT_RETRIES {
        let mut obj = match current {
            Some(obj) => obj,
            None => {
                attempts += 1;
                match ctx.call(store.create(&build())).await {
                    Ok(_) => {
                        debug!(kind, key = %key, "Created object");
                        return Ok(Convergence::Created);
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(kind, key = %key, "Object appeared concurrently, re-reading");
                        current = ctx.call(store.get(key)).await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        if !patch(&mut obj) {
            if attempts > 0 {
                debug!(kind, key = %key, attempts, "Concurrent writer already converged object");
            }
            return Ok(Convergence::Unchanged);
        }

        attempts += 1;
        match ctx.call(store.update(&obj)).await {
            Ok(_) => {
                debug!(kind, key = %key, attempts, "Patched object");
                return Ok(Convergence::Updated { attempts });
            }
            // Deleted since the read: re-reading yields None and recreates it
            Err(e) if e.is_conflict() || e.is_not_found() => {
                debug!(kind, key = %key, attempts, error = %e, "Write rejected, re-reading");
                current = ctx.call(store.get(key)).await?;
            }
            Err(e) => return Err(e),
        }
    }

    warn!(
        kind,
        key = %key,
        attempts,
        "Giving up after repeated write conflicts"
    );
    Ok(Convergence::Abandoned { attempts })
}
