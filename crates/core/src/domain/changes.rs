//! External change notifications
//!
//! The device reports controls changed by other programs (alsamixer, a
//! second ftumix...). Notifications arrive from a monitor thread at any time;
//! they are queued here and drained in batches by the single writer, which
//! re-reads the named controls through [`RoutingModel::refresh`].
//!
//! [`RoutingModel::refresh`]: crate::domain::routing::RoutingModel::refresh

use crate::domain::control::ControlId;
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use std::collections::HashSet;
use tracing::trace;

/// Sending side handed to monitor threads
pub type ChangeSender = Sender<ControlId>;

/// Coalescing queue of changed control ids
#[derive(Debug, Clone)]
pub struct ChangeQueue {
    tx: Sender<ControlId>,
    rx: Receiver<ControlId>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> ChangeSender {
        self.tx.clone()
    }

    /// Everything queued so far, duplicates removed, in first-seen order
    pub fn drain(&self) -> Vec<ControlId> {
        let mut seen = HashSet::new();
        let mut batch = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(id) => {
                    if seen.insert(id.clone()) {
                        batch.push(id);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if !batch.is_empty() {
            trace!(count = batch.len(), "Drained change notifications");
        }
        batch
    }
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}
