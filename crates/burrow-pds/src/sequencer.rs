//! Live commit event stream

use std::sync::Arc;

use burrow_repo::CommitData;
use tokio::sync::{Mutex, broadcast};

use crate::error::Result;

pub use burrow_repo::commit::event::CommitEvent;

/// Numbers commit events and fans them out to live subscribers
///
/// Subscribers get a bounded buffer. One that falls further behind than the buffer is
/// cut off; publishing never waits on a subscriber.
#[derive(Debug)]
pub struct Sequencer {
    seq: Mutex<u64>,
    tx: broadcast::Sender<Arc<CommitEvent>>,
}

impl Sequencer {
    /// Sequencer buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            seq: Mutex::new(0),
            tx,
        }
    }

    /// Assign the next sequence number to `commit` and broadcast it
    pub async fn publish(&self, commit: &CommitData) -> Result<Arc<CommitEvent>> {
        let mut seq = self.seq.lock().await;
        let event = Arc::new(commit.to_event(*seq + 1, chrono::Utc::now()).await?);
        *seq += 1;
        // no receivers is fine
        let receivers = self.tx.send(event.clone()).unwrap_or(0);
        tracing::debug!(seq = event.seq, repo = %event.repo, rev = %event.rev, receivers, "sequenced commit");
        Ok(event)
    }

    /// Last sequence number handed out
    pub async fn current_seq(&self) -> u64 {
        *self.seq.lock().await
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            done: false,
        }
    }
}

/// One live subscriber
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Arc<CommitEvent>>,
    done: bool,
}

impl Subscription {
    /// Next event, or `None` once the sequencer is gone or this subscriber lagged
    ///
    /// Once this returns `None` it keeps returning `None`.
    pub async fn next(&mut self) -> Option<Arc<CommitEvent>> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "subscriber fell behind, disconnecting");
                self.done = true;
                None
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.done = true;
                None
            }
        }
    }
}
