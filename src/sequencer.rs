//! Ordered outbound lane with strictly monotonic nonces
//!
//! Every sequenced command goes through one FIFO channel drained by a single
//! worker thread, so commands leave in submission order and nonces never
//! interleave. The baseline travels through the same channel, which orders
//! `initialize` with the submissions around it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::{Error, Result, StreamFailureListener};
use crate::listener::ListenerSlot;

enum Task<C> {
    Initialize(u64),
    Reset,
    Submit(C),
}

/// Single logical sender for one (account, nonce group).
///
/// `transmit` is called on the worker thread with each command and the nonce
/// it is stamped with. A nonce is consumed only when `transmit` succeeds, so
/// the venue never sees a gap; failures go to the failure listener and the
/// next command reuses the nonce.
pub struct NonceSequencer<C> {
    lane: Mutex<Option<flume::Sender<Task<C>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    failures: Arc<ListenerSlot<dyn StreamFailureListener>>,
}

impl<C: Send + 'static> NonceSequencer<C> {
    pub fn start<T>(name: &str, transmit: T) -> Result<Self>
    where
        T: FnMut(C, u64) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = flume::unbounded();
        let failures = Arc::new(ListenerSlot::new());

        let lane = Lane {
            rx,
            transmit,
            last_nonce: None,
            parked: VecDeque::new(),
            failures: failures.clone(),
        };
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || lane.run())
            .map_err(|e| Error::InvalidState(format!("Failed to spawn sequencer thread: {e}")))?;

        Ok(Self {
            lane: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            failures,
        })
    }

    /// Set the baseline: the next command is stamped `last_nonce + 1`.
    /// Commands submitted before the first baseline wait for it.
    pub fn initialize(&self, last_nonce: u64) -> Result<()> {
        self.enqueue(Task::Initialize(last_nonce))
    }

    /// Drop the baseline once everything queued so far has been sent.
    /// Later commands park until the next `initialize`.
    pub fn reset(&self) -> Result<()> {
        self.enqueue(Task::Reset)
    }

    /// Queue `command` for transmission. Never blocks.
    pub fn submit(&self, command: C) -> Result<()> {
        self.enqueue(Task::Submit(command))
    }

    fn enqueue(&self, task: Task<C>) -> Result<()> {
        match self.lane.lock().as_ref() {
            Some(tx) => tx.send(task).map_err(|_| Error::Shutdown),
            None => Err(Error::Shutdown),
        }
    }

    pub fn set_failure_listener(&self, listener: Arc<dyn StreamFailureListener>) {
        self.failures.register(listener);
    }

    pub fn is_running(&self) -> bool {
        self.lane.lock().is_some()
    }

    /// Stop accepting commands, transmit everything already queued, then
    /// join the worker. Idempotent.
    pub fn shutdown(&self) {
        let Some(tx) = self.lane.lock().take() else {
            return;
        };
        drop(tx);

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        // A failure listener may stop the channel from the worker itself.
        if worker.thread().id() == std::thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!("Sequencer worker panicked");
        }
    }
}

impl<C> Drop for NonceSequencer<C> {
    fn drop(&mut self) {
        self.lane.get_mut().take();
        if let Some(worker) = self.worker.get_mut().take() {
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

struct Lane<C, T> {
    rx: flume::Receiver<Task<C>>,
    transmit: T,
    last_nonce: Option<u64>,
    parked: VecDeque<C>,
    failures: Arc<ListenerSlot<dyn StreamFailureListener>>,
}

impl<C, T> Lane<C, T>
where
    T: FnMut(C, u64) -> Result<()>,
{
    fn run(mut self) {
        // recv fails once every sender is gone and the queue is empty.
        while let Ok(task) = self.rx.recv() {
            match task {
                Task::Initialize(last_nonce) => {
                    debug!(last_nonce, parked = self.parked.len(), "Nonce baseline set");
                    self.last_nonce = Some(last_nonce);
                    while let Some(command) = self.parked.pop_front() {
                        self.send(command);
                    }
                }
                Task::Reset => {
                    debug!(last_nonce = ?self.last_nonce, "Nonce baseline dropped");
                    self.last_nonce = None;
                }
                Task::Submit(command) if self.last_nonce.is_none() => self.parked.push_back(command),
                Task::Submit(command) => self.send(command),
            }
        }

        if !self.parked.is_empty() {
            warn!(count = self.parked.len(), "Discarding commands queued before any nonce baseline");
        }
        debug!("Sequencer stopped");
    }

    fn send(&mut self, command: C) {
        let Some(last_nonce) = self.last_nonce else {
            self.parked.push_back(command);
            return;
        };
        let Some(nonce) = last_nonce.checked_add(1) else {
            self.report(Error::InvalidState("nonce space exhausted".to_string()));
            return;
        };

        match (self.transmit)(command, nonce) {
            Ok(()) => self.last_nonce = Some(nonce),
            Err(e) => {
                warn!(nonce, error = %e, "Failed to send sequenced command");
                self.report(e);
            }
        }
    }

    fn report(&self, error: Error) {
        if let Some(listener) = self.failures.get() {
            listener.on_stream_failure(&error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Sent = Arc<Mutex<Vec<(String, u64)>>>;

    fn recording() -> (NonceSequencer<String>, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let sequencer = NonceSequencer::start("test-lane", move |command: String, nonce| {
            if command.starts_with("fail") {
                return Err(Error::Communication(format!("cannot send {command}")));
            }
            log.lock().push((command, nonce));
            Ok(())
        })
        .unwrap();
        (sequencer, sent)
    }

    #[test]
    fn test_initialize_then_submit_stamps_next_nonces() {
        let (sequencer, sent) = recording();
        sequencer.initialize(41).unwrap();
        sequencer.submit("A".to_string()).unwrap();
        sequencer.submit("B".to_string()).unwrap();
        sequencer.shutdown();

        assert_eq!(*sent.lock(), vec![("A".to_string(), 42), ("B".to_string(), 43)]);
    }

    #[test]
    fn test_commands_before_initialize_wait_for_baseline() {
        let (sequencer, sent) = recording();
        sequencer.submit("early".to_string()).unwrap();
        sequencer.initialize(7).unwrap();
        sequencer.submit("late".to_string()).unwrap();
        sequencer.shutdown();

        assert_eq!(*sent.lock(), vec![("early".to_string(), 8), ("late".to_string(), 9)]);
    }

    #[test]
    fn test_reinitialize_resets_baseline() {
        let (sequencer, sent) = recording();
        sequencer.initialize(1).unwrap();
        sequencer.submit("A".to_string()).unwrap();
        sequencer.initialize(100).unwrap();
        sequencer.submit("B".to_string()).unwrap();
        sequencer.shutdown();

        assert_eq!(*sent.lock(), vec![("A".to_string(), 2), ("B".to_string(), 101)]);
    }

    #[test]
    fn test_reset_parks_commands_until_next_baseline() {
        let (sequencer, sent) = recording();
        sequencer.initialize(41).unwrap();
        sequencer.submit("A".to_string()).unwrap();
        sequencer.reset().unwrap();
        sequencer.submit("B".to_string()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(*sent.lock(), vec![("A".to_string(), 42)]);

        sequencer.initialize(100).unwrap();
        sequencer.submit("C".to_string()).unwrap();
        sequencer.shutdown();

        assert_eq!(
            *sent.lock(),
            vec![("A".to_string(), 42), ("B".to_string(), 101), ("C".to_string(), 102)]
        );
    }

    #[test]
    fn test_failure_reported_and_lane_continues() {
        let (sequencer, sent) = recording();
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        sequencer.set_failure_listener(Arc::new(move |e: &Error| {
            assert!(matches!(e, Error::Communication(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sequencer.initialize(10).unwrap();
        sequencer.submit("fail-1".to_string()).unwrap();
        sequencer.submit("ok".to_string()).unwrap();
        sequencer.shutdown();

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(*sent.lock(), vec![("ok".to_string(), 11)]);
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let (sequencer, _sent) = recording();
        sequencer.initialize(0).unwrap();
        sequencer.shutdown();
        sequencer.shutdown();

        assert!(!sequencer.is_running());
        assert!(matches!(sequencer.submit("late".to_string()), Err(Error::Shutdown)));
        assert!(matches!(sequencer.initialize(5), Err(Error::Shutdown)));
    }

    #[test]
    fn test_unbaselined_commands_discarded_at_shutdown() {
        let (sequencer, sent) = recording();
        sequencer.submit("orphan".to_string()).unwrap();
        sequencer.shutdown();
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn test_concurrent_submitters_get_gapless_increasing_nonces() {
        let (sequencer, sent) = recording();
        let sequencer = Arc::new(sequencer);
        sequencer.initialize(0).unwrap();

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let sequencer = sequencer.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        sequencer.submit(format!("{t}:{i}")).unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        sequencer.shutdown();

        let sent = sent.lock();
        assert_eq!(sent.len(), 1600);
        for (i, (_, nonce)) in sent.iter().enumerate() {
            assert_eq!(*nonce, i as u64 + 1);
        }
        // Per-submitter order survives the shared lane.
        for t in 0..8 {
            let prefix = format!("{t}:");
            let seen: Vec<u32> = sent
                .iter()
                .filter_map(|(c, _)| c.strip_prefix(&prefix))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..200).collect::<Vec<_>>());
        }
    }
}
