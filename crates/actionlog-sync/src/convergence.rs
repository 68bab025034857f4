//! Convergence verification.
//!
//! After syncing, two replicas should hold the same set of entries. Each
//! side computes a digest over its ids in created order; equal digests
//! mean equal entry sets.

use std::fmt;

use actionlog_core::Order;
use actionlog_store::{Store, StoreExt};

use crate::error::Result;

const DIGEST_DOMAIN: &[u8] = b"actionlog-digest-v1:";

/// Deterministic fingerprint of a store's live entry ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogDigest {
    /// Number of live entries.
    pub entries: usize,
    pub hash: [u8; 32],
}

impl LogDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

impl fmt::Display for LogDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entries, self.to_hex())
    }
}

/// Compute the digest of every live entry.
///
/// Algorithm: Blake3 over the domain tag followed, for each entry in
/// created order, by `id.time`, the origin length, the origin bytes and
/// `id.seq`, all integers little-endian. Local `added` values and
/// reasons are not part of it.
pub async fn compute_log_digest<S: Store + ?Sized>(store: &S) -> Result<LogDigest> {
    let entries = store.all(Order::Created).await?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(DIGEST_DOMAIN);
    for (_, meta) in &entries {
        let id = &meta.id;
        hasher.update(&id.time.to_le_bytes());
        hasher.update(&(id.origin.len() as u64).to_le_bytes());
        hasher.update(id.origin.as_bytes());
        hasher.update(&id.seq.to_le_bytes());
    }

    Ok(LogDigest {
        entries: entries.len(),
        hash: *hasher.finalize().as_bytes(),
    })
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both stores hold the same entries.
    Converged(LogDigest),
    /// The entry sets differ (sync may still be in progress).
    Diverged { local: LogDigest, remote: LogDigest },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged(_))
    }
}

/// Compare a local store against a digest received from elsewhere.
pub async fn verify_digest<S: Store + ?Sized>(
    local: &S,
    remote: LogDigest,
) -> Result<ConvergenceResult> {
    let local = compute_log_digest(local).await?;
    if local == remote {
        Ok(ConvergenceResult::Converged(local))
    } else {
        tracing::debug!(%local, %remote, "replicas diverged");
        Ok(ConvergenceResult::Diverged { local, remote })
    }
}

/// Compare two stores directly.
pub async fn verify_convergence<A, B>(local: &A, remote: &B) -> Result<ConvergenceResult>
where
    A: Store + ?Sized,
    B: Store + ?Sized,
{
    let remote = compute_log_digest(remote).await?;
    verify_digest(local, remote).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionlog_core::{Action, ActionId, NewMeta};
    use actionlog_store::MemoryStore;

    async fn store_with(ids: &[(i64, &str, u64)]) -> MemoryStore {
        let store = MemoryStore::new();
        for id in ids {
            store
                .add(Action::new("A"), NewMeta::with_id(*id).reason("test"))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_digest_ignores_insertion_order() {
        let a = store_with(&[(1, "a", 0), (2, "b", 0), (3, "a", 1)]).await;
        let b = store_with(&[(3, "a", 1), (1, "a", 0), (2, "b", 0)]).await;

        let digest = compute_log_digest(&a).await.unwrap();
        assert_eq!(digest, compute_log_digest(&b).await.unwrap());
        assert_eq!(digest.entries, 3);
        assert_eq!(digest.to_hex().len(), 64);

        assert!(verify_convergence(&a, &b).await.unwrap().is_converged());
    }

    #[tokio::test]
    async fn test_digest_detects_missing_entry() {
        let a = store_with(&[(1, "a", 0), (2, "b", 0)]).await;
        let b = store_with(&[(1, "a", 0)]).await;

        let result = verify_convergence(&a, &b).await.unwrap();
        assert!(!result.is_converged());

        b.add(Action::new("A"), NewMeta::with_id((2, "b", 0)).reason("test"))
            .await
            .unwrap();
        assert!(verify_convergence(&a, &b).await.unwrap().is_converged());

        a.remove(&ActionId::new(1, "a", 0)).await.unwrap();
        assert!(!verify_convergence(&a, &b).await.unwrap().is_converged());
    }
}
