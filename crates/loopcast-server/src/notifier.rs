// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;

const SUBSCRIBER_BUFFER: usize = 10;

/// Per-email pub/sub fan-out that wakes stream subscribers when a view or
/// click lands. Sends are non-blocking; a subscriber with a full buffer
/// misses the wake-up and coalesces on its own throttle tick.
#[derive(Default)]
pub struct ViewNotifier {
    subscribers: RwLock<HashMap<String, Vec<(u64, mpsc::Sender<()>)>>>,
    next_id: AtomicU64,
}

impl ViewNotifier {
    pub fn subscribe(&self, email_id: &str) -> (u64, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.entry(email_id.to_string()).or_default().push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, email_id: &str, handle: u64) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(bucket) = subs.get_mut(email_id) {
            bucket.retain(|(id, _)| *id != handle);
            if bucket.is_empty() {
                subs.remove(email_id);
            }
        }
    }

    pub fn notify(&self, email_id: &str) {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        if let Some(bucket) = subs.get(email_id) {
            for (_, tx) in bucket {
                // Full buffer: drop the wake-up, the subscriber coalesces.
                let _ = tx.try_send(());
            }
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, email_id: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(email_id)
            .map_or(0, Vec::len)
    }
}
