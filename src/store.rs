//! This module provides the bounded history of captured entries.
//!
//! `RingBuffer` is the plain FIFO-evicting container. `LogStore` owns one,
//! and after every mutation mirrors the history into the persistence
//! adapter (if any) and publishes it to the broadcaster. The buffer lock is
//! released before either runs, so a subscriber may mutate the store again
//! from inside its callback.
//!
//! Each mutation takes a generation number while it still holds the buffer
//! lock. Persistence and delivery then discard anything older than what
//! they already handled, so a mutation finishing late on one thread cannot
//! resurrect history that another thread has since cleared.
use crate::broadcast::{self, Broadcaster, Snapshot, Subscription};
use crate::capture;
use crate::entry::LogEntry;
use crate::persistence::PersistenceAdapter;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// History size used when none is configured.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A fixed-capacity, order-preserving sequence.
#[derive(Debug)]
pub struct RingBuffer {
    entries: VecDeque<Arc<LogEntry>>,
    capacity: usize,
}

impl RingBuffer {
    /// Creates a buffer holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends `entry`, evicting the oldest entry when over capacity.
    ///
    /// Returns the evicted entry, if any.
    pub fn push(&mut self, entry: Arc<LogEntry>) -> Option<Arc<LogEntry>> {
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Copies the current contents, oldest first.
    pub fn snapshot(&self) -> Snapshot {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The history service: ring buffer, broadcaster and optional persistence.
pub struct LogStore {
    buffer: Mutex<RingBuffer>,
    broadcaster: Broadcaster,
    persistence: Option<PersistenceAdapter>,
    /// Generation of the last history written to (or purged from) persistence.
    persisted: Mutex<u64>,
}

impl LogStore {
    /// Creates an empty store.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of retained entries. Zero is raised to one.
    /// * `persistence` - Adapter mirroring the history after every mutation, if any.
    pub fn new(capacity: usize, persistence: Option<PersistenceAdapter>) -> Self {
        Self {
            buffer: Mutex::new(RingBuffer::new(capacity)),
            broadcaster: Broadcaster::new(),
            persistence,
            persisted: Mutex::new(0),
        }
    }

    /// Appends an entry, then persists and publishes the new history.
    pub fn insert(&self, entry: Arc<LogEntry>) {
        let (generation, snapshot) = match self.buffer.lock() {
            Ok(mut buffer) => {
                buffer.push(entry);
                (self.broadcaster.next_generation(), buffer.snapshot())
            }
            Err(_) => return,
        };
        self.persist(generation, Some(&snapshot));
        self.publish(generation, snapshot);
    }

    /// Seeds the store with recovered entries, keeping the newest `capacity`.
    pub fn restore(&self, entries: Vec<LogEntry>) {
        let (generation, snapshot) = match self.buffer.lock() {
            Ok(mut buffer) => {
                for entry in entries {
                    buffer.push(Arc::new(entry));
                }
                (self.broadcaster.next_generation(), buffer.snapshot())
            }
            Err(_) => return,
        };
        self.persist(generation, Some(&snapshot));
        self.publish(generation, snapshot);
    }

    /// Empties the history, deletes the persisted copy and publishes the
    /// empty snapshot.
    pub fn clear(&self) {
        let generation = match self.buffer.lock() {
            Ok(mut buffer) => {
                buffer.clear();
                self.broadcaster.next_generation()
            }
            Err(_) => return,
        };
        self.persist(generation, None);
        self.publish(generation, Vec::new());
    }

    /// Copies the current history, oldest first.
    pub fn snapshot(&self) -> Snapshot {
        self.buffer
            .lock()
            .map(|buffer| buffer.snapshot())
            .unwrap_or_default()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buffer| buffer.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.buffer
            .lock()
            .map(|buffer| buffer.capacity())
            .unwrap_or(DEFAULT_CAPACITY)
    }

    /// Registers `callback` and immediately hands it the current history.
    ///
    /// Every mutation after that point is delivered too; none falls between
    /// the replay and the registration.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[Arc<LogEntry>]) + Send + Sync + 'static,
    {
        let (generation, current, subscription, subscriber) = {
            let buffer = match self.buffer.lock() {
                Ok(buffer) => buffer,
                Err(poisoned) => poisoned.into_inner(),
            };
            let (subscription, subscriber) = self.broadcaster.register(Arc::new(callback));
            (self.broadcaster.generation(), buffer.snapshot(), subscription, subscriber)
        };
        subscriber.deliver(generation, &current);
        subscription
    }

    /// Like `subscribe`, but forwards snapshots into an unbounded channel.
    ///
    /// The first message is the current history.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<Snapshot>) {
        let (callback, binding, rx) = broadcast::channel_callback();
        let (generation, current, subscription, subscriber) = {
            let buffer = match self.buffer.lock() {
                Ok(buffer) => buffer,
                Err(poisoned) => poisoned.into_inner(),
            };
            let (subscription, subscriber) = self.broadcaster.register(callback);
            (self.broadcaster.generation(), buffer.snapshot(), subscription, subscriber)
        };
        binding.bind(&subscription);
        subscriber.deliver(generation, &current);
        (subscription, rx)
    }

    /// The broadcaster delivering this store's snapshots.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Saves `snapshot` (or purges when `None`) unless a newer generation
    /// already reached persistence.
    fn persist(&self, generation: u64, snapshot: Option<&[Arc<LogEntry>]>) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let mut persisted = match self.persisted.lock() {
            Ok(persisted) => persisted,
            Err(poisoned) => poisoned.into_inner(),
        };
        if generation <= *persisted {
            return;
        }
        let _ = match snapshot {
            Some(snapshot) => persistence.save(snapshot),
            None => persistence.purge(),
        };
        *persisted = generation;
    }

    /// Delivers on this thread, or on a fresh one while this thread unwinds.
    ///
    /// A subscriber that panics while the thread is already panicking would
    /// abort the process, and catching it is not possible there.
    fn publish(&self, generation: u64, snapshot: Snapshot) {
        if !std::thread::panicking() {
            self.broadcaster.publish_at(generation, &snapshot);
            return;
        }
        let round = self.broadcaster.detached_round(generation, snapshot);
        let _ = std::thread::Builder::new()
            .name("logtap-delivery".into())
            .spawn(move || capture::suppressing_captures(round));
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Severity;
    use crate::persistence::{MemoryStore, HISTORY_KEY};
    use proptest::prelude::*;

    fn entry(message: &str) -> Arc<LogEntry> {
        LogEntry::new(Severity::Info, message.to_string(), Vec::new())
    }

    #[test]
    fn evicts_oldest_first() {
        let mut buffer = RingBuffer::new(2);
        assert!(buffer.push(entry("a")).is_none());
        assert!(buffer.push(entry("b")).is_none());
        let evicted = buffer.push(entry("c")).unwrap();

        assert_eq!(evicted.message, "a");
        let messages: Vec<_> = buffer.snapshot().iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut buffer = RingBuffer::new(0);
        buffer.push(entry("a"));
        buffer.push(entry("b"));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.snapshot()[0].message, "b");
    }

    #[test]
    fn snapshot_is_immune_to_later_mutation() {
        let store = LogStore::new(10, None);
        store.insert(entry("first"));
        let snapshot = store.snapshot();
        store.insert(entry("second"));
        store.clear();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message, "first");
    }

    #[test]
    fn clear_purges_persisted_copy_and_replays_empty() {
        let memory = MemoryStore::new();
        let adapter = PersistenceAdapter::new(Arc::new(memory.clone()));
        let store = LogStore::new(10, Some(adapter));

        store.insert(entry("persisted"));
        assert!(memory.contains(HISTORY_KEY));

        store.clear();
        assert!(store.is_empty());
        assert!(!memory.contains(HISTORY_KEY));

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        store
            .subscribe(move |snapshot| *sink.lock().unwrap() = Some(snapshot.len()))
            .detach();
        assert_eq!(*seen.lock().unwrap(), Some(0));
    }

    #[test]
    fn failed_persistence_does_not_block_insert() {
        let memory = MemoryStore::new();
        let adapter = PersistenceAdapter::new(Arc::new(memory.clone())).with_quota(1);
        let store = LogStore::new(10, Some(adapter));

        store.insert(entry("too big to persist"));
        assert_eq!(store.len(), 1);
        assert!(!memory.contains(HISTORY_KEY));
    }

    #[test]
    fn restore_keeps_newest_entries() {
        let store = LogStore::new(2, None);
        let recovered = ["a", "b", "c"]
            .iter()
            .map(|m| entry(m).as_ref().clone())
            .collect();
        store.restore(recovered);

        let messages: Vec<_> = store.snapshot().iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn subscriber_may_clear_during_notification() {
        let store = Arc::new(LogStore::new(10, None));
        let inner = store.clone();
        store
            .subscribe(move |snapshot| {
                if snapshot.len() >= 3 {
                    inner.clear();
                }
            })
            .detach();

        for i in 0..3 {
            store.insert(entry(&format!("m{}", i)));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn stale_save_after_clear_is_discarded() {
        let memory = MemoryStore::new();
        let adapter = PersistenceAdapter::new(Arc::new(memory.clone()));
        let store = LogStore::new(10, Some(adapter));

        // An insert that reserved its generation but has not persisted yet.
        let stale = store.broadcaster.next_generation();
        let snapshot = vec![entry("stale")];
        store.clear();
        store.persist(stale, Some(&snapshot));

        assert!(!memory.contains(HISTORY_KEY));
    }

    #[test]
    fn racing_insert_and_clear_leave_persistence_matching_history() {
        for _ in 0..20 {
            let memory = MemoryStore::new();
            let adapter = PersistenceAdapter::new(Arc::new(memory.clone()));
            let store = Arc::new(LogStore::new(10, Some(adapter)));

            let writer = {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.insert(entry(&format!("w{}", i)));
                    }
                })
            };
            for _ in 0..50 {
                store.clear();
            }
            writer.join().unwrap();

            let persisted: Vec<String> = PersistenceAdapter::new(Arc::new(memory.clone()))
                .recover()
                .unwrap()
                .into_iter()
                .map(|e| e.message)
                .collect();
            let history: Vec<String> = store.snapshot().iter().map(|e| e.message.clone()).collect();
            assert_eq!(persisted, history);
        }
    }

    #[test]
    fn subscriber_registered_during_inserts_ends_on_the_final_history() {
        for _ in 0..20 {
            let store = Arc::new(LogStore::new(100, None));
            let writer = {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..30 {
                        store.insert(entry(&i.to_string()));
                    }
                })
            };

            let largest = Arc::new(Mutex::new(0));
            let sink = largest.clone();
            let subscription = store.subscribe(move |snapshot| {
                let mut largest = sink.lock().unwrap();
                *largest = (*largest).max(snapshot.len());
            });
            writer.join().unwrap();

            assert_eq!(*largest.lock().unwrap(), 30);
            subscription.unsubscribe();
        }
    }

    #[test]
    fn insert_while_unwinding_is_delivered_off_thread() {
        let _lock = crate::interceptors::panic::tests::HOOK_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let store = Arc::new(LogStore::new(10, None));
        store
            .subscribe(|snapshot| {
                if !snapshot.is_empty() {
                    panic!("viewer crashed");
                }
            })
            .detach();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        store
            .subscribe(move |snapshot| {
                if let Some(last) = snapshot.last() {
                    sink.lock().unwrap().push(last.message.clone());
                }
            })
            .detach();

        struct InsertOnDrop(Arc<LogStore>);
        impl Drop for InsertOnDrop {
            fn drop(&mut self) {
                self.0.insert(entry("written while unwinding"));
            }
        }

        let target = store.clone();
        let outcome = std::thread::spawn(move || {
            let _insert = InsertOnDrop(target);
            panic!("worker failed");
        })
        .join();
        assert!(outcome.is_err());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while delivered.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(*delivered.lock().unwrap(), vec!["written while unwinding"]);
        assert_eq!(store.len(), 1);
    }

    proptest! {
        #[test]
        fn history_is_the_last_c_inserts(capacity in 1_usize..32, extra in 1_usize..64) {
            let store = LogStore::new(capacity, None);
            let total = capacity + extra;
            for i in 0..total {
                store.insert(entry(&i.to_string()));
            }

            let messages: Vec<String> = store.snapshot().iter().map(|e| e.message.clone()).collect();
            let expected: Vec<String> = (extra..total).map(|i| i.to_string()).collect();
            prop_assert_eq!(messages, expected);
        }
    }
}
