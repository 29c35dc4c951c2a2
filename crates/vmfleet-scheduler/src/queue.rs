//! FIFO hand-off queues between the event path and the fleet workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use vmfleet_core::RunnerName;

/// Unbounded FIFO of runner names.
///
/// Pushing never blocks and takes no lock, so the webhook handler can hand
/// work over without waiting on a worker that is busy talking to Orka.
pub struct JobQueue {
    name: &'static str,
    tx: mpsc::UnboundedSender<RunnerName>,
    rx: Mutex<mpsc::UnboundedReceiver<RunnerName>>,
    len: AtomicUsize,
}

impl JobQueue {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a job to the back of the queue.
    pub fn push(&self, runner: RunnerName) {
        // Counted before sending so a concurrent pop never sees zero.
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(runner).is_err() {
            // The receiver lives as long as the queue itself.
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Wait for the next job. Cancel-safe: dropping the future loses nothing.
    pub async fn pop(&self) -> Option<RunnerName> {
        let runner = self.rx.lock().await.recv().await?;
        self.len.fetch_sub(1, Ordering::SeqCst);
        Some(runner)
    }

    /// Take the next job if one is ready and no one else is receiving.
    pub fn try_pop(&self) -> Option<RunnerName> {
        let runner = self.rx.try_lock().ok()?.try_recv().ok()?;
        self.len.fetch_sub(1, Ordering::SeqCst);
        Some(runner)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> RunnerName {
        RunnerName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new("start");
        queue.push(name("14-1-1"));
        queue.push(name("14-2-1"));
        queue.push(name("14-3-1"));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop().await, Some(name("14-1-1")));
        assert_eq!(queue.pop().await, Some(name("14-2-1")));
        assert_eq!(queue.try_pop(), Some(name("14-3-1")));
        assert!(queue.is_empty());
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = std::sync::Arc::new(JobQueue::new("stop"));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        queue.push(name("14-arm64-9-1"));
        assert_eq!(waiter.await.unwrap(), Some(name("14-arm64-9-1")));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_pop_loses_nothing() {
        let queue = JobQueue::new("start");
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(10), queue.pop()).await;
        assert!(timed_out.is_err());

        queue.push(name("14-1-1"));
        assert_eq!(queue.pop().await, Some(name("14-1-1")));
    }
}
