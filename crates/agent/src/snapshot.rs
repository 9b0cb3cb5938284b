//! System-state provider seam.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dealpilot_core::domain::snapshot::SystemSnapshot;

use crate::tools::RecordBook;

/// Produces a point-in-time aggregate of business state for one user. Calls must be
/// safe to repeat; the orchestrator caches the result per session.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn generate_snapshot(
        &self,
        user_id: &str,
        permissions: &BTreeSet<String>,
    ) -> Result<SystemSnapshot>;
}

/// Returns a fixed snapshot re-stamped at call time and counts how often it was asked.
#[derive(Debug)]
pub struct StaticSnapshotProvider {
    snapshot: SystemSnapshot,
    calls: AtomicUsize,
}

impl StaticSnapshotProvider {
    pub fn new(snapshot: SystemSnapshot) -> Self {
        Self { snapshot, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticSnapshotProvider {
    fn default() -> Self {
        Self::new(SystemSnapshot::empty(Utc::now()))
    }
}

#[async_trait]
impl SnapshotProvider for StaticSnapshotProvider {
    async fn generate_snapshot(
        &self,
        _user_id: &str,
        _permissions: &BTreeSet<String>,
    ) -> Result<SystemSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut snapshot = self.snapshot.clone();
        snapshot.captured_at = Utc::now();
        Ok(snapshot)
    }
}

/// Aggregates the in-process [`RecordBook`].
pub struct RecordSnapshotProvider {
    book: Arc<RecordBook>,
}

impl RecordSnapshotProvider {
    pub fn new(book: Arc<RecordBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl SnapshotProvider for RecordSnapshotProvider {
    async fn generate_snapshot(
        &self,
        user_id: &str,
        _permissions: &BTreeSet<String>,
    ) -> Result<SystemSnapshot> {
        let snapshot = self.book.snapshot(Utc::now());
        tracing::debug!(
            event_name = "snapshot.generated",
            user_id,
            health = snapshot.pipeline_health.as_str(),
            "generated system snapshot"
        );
        Ok(snapshot)
    }
}
