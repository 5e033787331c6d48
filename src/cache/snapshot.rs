//! Snapshot data structures for the in-memory member directory.
//!
//! A snapshot is the complete email -> customer mapping produced by one bulk
//! load. It is built in one pass, never mutated afterwards, and replaced
//! wholesale through [`SnapshotHolder`] when a refresh succeeds.

use crate::model::Customer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Metadata about the snapshot
#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    /// When this snapshot was created
    pub created_at: Instant,
    /// Number of distinct emails in the snapshot
    pub member_count: usize,
    /// Number of double-active-subscription anomalies seen during the build
    pub conflict_count: usize,
    /// How long the merge took
    pub build_duration_ms: u64,
}

/// Complete mapping from lowercase email to the customer record that wins
/// conflict resolution.
#[derive(Debug, Clone)]
pub struct MemberSnapshot {
    /// Lowercase email -> winning record
    pub members: HashMap<String, Customer>,
    /// Snapshot metadata
    pub meta: SnapshotMeta,
}

impl MemberSnapshot {
    /// An empty snapshot, used before the first successful refresh.
    pub fn empty() -> Self {
        Self::build(Vec::new())
    }

    /// Build a snapshot from raw records in upstream-delivery order.
    ///
    /// Per email: the last-seen active record wins; a record that is not
    /// active never displaces a stored active record, so if no record is
    /// active the last-seen one overall wins. Two active records with
    /// different ids for the same email are an upstream data-quality anomaly
    /// and are logged, not fatal.
    pub fn build(customers: Vec<Customer>) -> Self {
        let start = Instant::now();

        let mut members: HashMap<String, Customer> = HashMap::new();
        let mut conflict_count = 0usize;

        for customer in customers {
            let email = customer.email.to_lowercase();

            if let Some(existing) = members.get(&email) {
                if existing.id != customer.id
                    && existing.subscription.status.is_active()
                    && customer.subscription.status.is_active()
                {
                    warn!(
                        email = %email,
                        stored_id = existing.id,
                        incoming_id = customer.id,
                        "More than one active subscription for the same email"
                    );
                    conflict_count += 1;
                }

                // An email can carry many historical subscriptions; once an
                // active one is stored, only another active record may
                // overwrite it.
                if existing.subscription.status.is_active()
                    && !customer.subscription.status.is_active()
                {
                    continue;
                }
            }

            members.insert(email, customer);
        }

        let meta = SnapshotMeta {
            created_at: start,
            member_count: members.len(),
            conflict_count,
            build_duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            members = meta.member_count,
            conflicts = meta.conflict_count,
            duration_ms = meta.build_duration_ms,
            "Snapshot built"
        );

        Self { members, meta }
    }

    /// Get the record for an email (case-insensitive)
    pub fn get(&self, email: &str) -> Option<&Customer> {
        self.members.get(&email.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Thread-safe holder for the current snapshot with atomic swap
#[derive(Clone)]
pub struct SnapshotHolder {
    current: Arc<RwLock<Arc<MemberSnapshot>>>,
}

impl SnapshotHolder {
    /// Create a new snapshot holder with the given initial snapshot
    pub fn new(snapshot: MemberSnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Get the current snapshot (readers acquire Arc clone - never blocked)
    pub async fn get(&self) -> Arc<MemberSnapshot> {
        self.current.read().await.clone()
    }

    /// Atomically swap to a new snapshot
    pub async fn swap(&self, new_snapshot: MemberSnapshot) {
        let new_arc = Arc::new(new_snapshot);
        let mut guard = self.current.write().await;
        debug!(
            old_count = guard.meta.member_count,
            new_count = new_arc.meta.member_count,
            "Swapping snapshot"
        );
        *guard = new_arc;
        // Old snapshot dropped when last reader releases Arc
    }
}
