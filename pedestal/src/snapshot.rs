//! Latest decoded firmware status.

use std::sync::Arc;

use icd::{FirmwareInfo, ReadData};
use tokio::sync::watch;
use tokio::time::Instant;

/// Read access to the most recent status snapshot.
pub trait SnapshotProvider: Send + Sync {
    fn latest(&self) -> Option<Arc<ReadData>>;
}

/// A status snapshot and the time it was decoded.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub data: Arc<ReadData>,
    pub received_at: Instant,
}

/// Holds the latest [`ReadData`]; each publish replaces it atomically.
pub struct SnapshotCell {
    tx: watch::Sender<Option<Snapshot>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn publish(&self, data: Arc<ReadData>) {
        self.tx.send_replace(Some(Snapshot {
            data,
            received_at: Instant::now(),
        }));
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Time since the last publish.
    pub fn age(&self) -> Option<std::time::Duration> {
        self.tx.borrow().as_ref().map(|s| s.received_at.elapsed())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.tx.subscribe()
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for SnapshotCell {
    fn latest(&self) -> Option<Arc<ReadData>> {
        self.tx.borrow().as_ref().map(|s| s.data.clone())
    }
}

/// Latest firmware version reply, if one has arrived.
pub struct FirmwareCell {
    tx: watch::Sender<Option<FirmwareInfo>>,
}

impl FirmwareCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn publish(&self, info: FirmwareInfo) {
        self.tx.send_replace(Some(info));
    }

    pub fn latest(&self) -> Option<FirmwareInfo> {
        *self.tx.borrow()
    }
}

impl Default for FirmwareCell {
    fn default() -> Self {
        Self::new()
    }
}
