//! Serial control queue
//!
//! Session notifications and recovery retries run one at a time on a
//! dedicated thread, in submission order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable handle for submitting work to a [`ControlQueue`]
#[derive(Clone)]
pub struct ControlHandle {
    sender: UnboundedSender<Message>,
    pending: Arc<AtomicUsize>,
}

impl ControlHandle {
    /// Queue `job` behind everything already submitted.
    ///
    /// Returns `false` if the queue has shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Message::Run(Box::new(job))).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Jobs submitted and not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn flush_receiver(&self) -> Option<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(Message::Flush(tx)).ok()?;
        Some(rx)
    }

    /// Wait until every job submitted so far, and every job those submit in
    /// turn, has run.
    ///
    /// Must not be called from a job on the same queue.
    pub async fn flush(&self) {
        if let Some(rx) = self.flush_receiver() {
            let _ = rx.await;
        }
    }

    /// Blocking form of [`ControlHandle::flush`] for callers outside an async
    /// runtime.
    pub fn flush_blocking(&self) {
        if let Some(rx) = self.flush_receiver() {
            let _ = rx.blocking_recv();
        }
    }
}

impl std::fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Owner of the control thread
pub struct ControlQueue {
    handle: ControlHandle,
    thread: Option<JoinHandle<()>>,
}

impl ControlQueue {
    /// Spawn the control thread
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = ControlHandle {
            sender: sender.clone(),
            pending: pending.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(message) = receiver.blocking_recv() {
                    match message {
                        Message::Run(job) => {
                            job();
                            pending.fetch_sub(1, Ordering::SeqCst);
                        }
                        Message::Flush(reply) => {
                            if pending.load(Ordering::SeqCst) == 0 {
                                let _ = reply.send(());
                            } else if let Err(mpsc::error::SendError(Message::Flush(reply))) =
                                sender.send(Message::Flush(reply))
                            {
                                let _ = reply.send(());
                            }
                        }
                        Message::Shutdown => break,
                    }
                }
                debug!("Control queue stopped");
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Handle for submitting work
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }
}

impl Drop for ControlQueue {
    fn drop(&mut self) {
        let _ = self.handle.sender.send(Message::Shutdown);
        if let Some(thread) = self.thread.take() {
            // the last owner may be a job running on the control thread itself
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                warn!("Control queue thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for ControlQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlQueue")
            .field("pending", &self.handle.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_jobs_run_in_order() {
        let queue = ControlQueue::new("control-test").unwrap();
        let handle = queue.handle();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = log.clone();
            assert!(handle.submit(move || log.lock().push(i)));
        }
        handle.flush_blocking();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn test_flush_waits_for_rescheduled_jobs() {
        fn step(handle: ControlHandle, count: Arc<Mutex<u32>>) {
            let mut n = count.lock();
            *n += 1;
            if *n < 5 {
                let next = handle.clone();
                let count = count.clone();
                handle.submit(move || step(next, count));
            }
        }

        let queue = ControlQueue::new("control-test").unwrap();
        let handle = queue.handle();
        let count = Arc::new(Mutex::new(0));
        let (h, c) = (handle.clone(), count.clone());
        handle.submit(move || step(h, c));
        handle.flush_blocking();
        assert_eq!(*count.lock(), 5);
    }

    #[tokio::test]
    async fn test_async_flush() {
        let queue = ControlQueue::new("control-test").unwrap();
        let handle = queue.handle();
        let done = Arc::new(Mutex::new(false));
        let flag = done.clone();
        handle.submit(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            *flag.lock() = true;
        });
        handle.flush().await;
        assert!(*done.lock());
    }

    #[test]
    fn test_flush_on_idle_queue_completes() {
        let queue = ControlQueue::new("control-test").unwrap();
        tokio_test::block_on(queue.handle().flush());
        assert_eq!(queue.handle().pending(), 0);
    }

    #[test]
    fn test_submit_after_shutdown() {
        let queue = ControlQueue::new("control-test").unwrap();
        let handle = queue.handle();
        drop(queue);
        assert!(!handle.submit(|| {}));
        assert_eq!(handle.pending(), 0);
        handle.flush_blocking();
    }
}
