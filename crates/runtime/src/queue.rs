//! Single-consumer trigger queue.  Platform callbacks post from any thread;
//! the sync service drains it one trigger at a time.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use sidequest_progress::TriggerKind;

/// Cloneable posting handle.
#[derive(Debug, Clone)]
pub struct TriggerQueue {
    tx: mpsc::Sender<TriggerKind>,
}

#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<TriggerKind>,
}

/// Queue holding at most `capacity` pending triggers (at least one).
pub fn trigger_queue(capacity: usize) -> (TriggerQueue, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TriggerQueue { tx }, TriggerReceiver { rx })
}

impl TriggerQueue {
    /// Enqueue without waiting.  Returns `false` if the trigger was dropped
    /// because the queue is full or the consumer is gone.
    pub fn post(&self, trigger: TriggerKind) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(trigger = trigger.label(), "trigger queue full; dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(trigger = trigger.label(), "sync service gone; trigger dropped");
                false
            }
        }
    }
}

impl TriggerReceiver {
    pub async fn recv(&mut self) -> Option<TriggerKind> {
        self.rx.recv().await
    }
}
