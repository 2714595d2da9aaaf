//! Latest-snapshot publication.
//!
//! The checker is the only writer. Each publish replaces the whole
//! `Arc<FleetSnapshot>`, so a reader holding the previous `Arc` keeps a
//! consistent view and a new reader sees the new scan in full.

use std::sync::Arc;

use tokio::sync::watch;

use crate::types::FleetSnapshot;

/// Create a publisher/reader pair seeded with an empty snapshot.
pub fn snapshot_channel() -> (SnapshotPublisher, SnapshotReader) {
    let (tx, rx) = watch::channel(Arc::new(FleetSnapshot::empty()));
    (SnapshotPublisher { tx }, SnapshotReader { rx })
}

/// Write side, held by the checker loop.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<FleetSnapshot>>,
}

impl SnapshotPublisher {
    /// Replace the published snapshot.
    pub fn publish(&self, snapshot: FleetSnapshot) {
        // send_replace succeeds even with no live readers.
        self.tx.send_replace(Arc::new(snapshot));
    }
}

/// Read side, cloned into the HTTP front end.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Arc<FleetSnapshot>>,
}

impl SnapshotReader {
    pub fn latest(&self) -> Arc<FleetSnapshot> {
        self.rx.borrow().clone()
    }
}
