//! In-process publish/subscribe for history snapshots.
//!
//! Every subscriber receives the full current history on subscription and
//! again after every store mutation. Delivery is synchronous and each
//! callback is isolated, so one failing viewer never starves the others.
use crate::entry::LogEntry;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// A point-in-time copy of the history, oldest first.
pub type Snapshot = Vec<Arc<LogEntry>>;

type Callback = Arc<dyn Fn(&[Arc<LogEntry>]) + Send + Sync>;
type SubscriberList = Mutex<Vec<Arc<Subscriber>>>;

/// One registered callback and the newest generation it has been handed.
pub(crate) struct Subscriber {
    id: u64,
    callback: Callback,
    /// One past the last delivered generation; zero before the first delivery.
    seen: AtomicU64,
}

impl Subscriber {
    /// Delivers `snapshot` unless this subscriber already saw a newer one.
    pub(crate) fn deliver(&self, generation: u64, snapshot: &[Arc<LogEntry>]) {
        if self.seen.fetch_max(generation + 1, Ordering::SeqCst) > generation {
            return;
        }
        let _ = catch_unwind(AssertUnwindSafe(|| (self.callback)(snapshot)));
    }
}

/// Maintains the set of live viewers.
///
/// Every published snapshot carries a generation number. A subscriber is
/// never handed a snapshot older than one it was already handed, so a round
/// that finishes late on another thread is skipped for that subscriber.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Arc<SubscriberList>,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl Broadcaster {
    /// Creates a broadcaster with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` and replays `current` to it before returning.
    ///
    /// The callback is registered before the replay runs, so it also sees
    /// every later publication; a publication that overtakes the replay
    /// makes the replay redundant and it is skipped.
    pub fn subscribe<F>(&self, current: &[Arc<LogEntry>], callback: F) -> Subscription
    where
        F: Fn(&[Arc<LogEntry>]) + Send + Sync + 'static,
    {
        let generation = self.generation();
        let (subscription, subscriber) = self.register(Arc::new(callback));
        subscriber.deliver(generation, current);
        subscription
    }

    /// Delivers `snapshot` as a new generation to every subscriber
    /// registered when the call began.
    pub fn publish(&self, snapshot: &[Arc<LogEntry>]) {
        let generation = self.next_generation();
        self.publish_at(generation, snapshot);
    }

    /// Delivers a snapshot whose generation was reserved with `next_generation`.
    pub(crate) fn publish_at(&self, generation: u64, snapshot: &[Arc<LogEntry>]) {
        deliver_round(&self.subscribers, generation, snapshot);
    }

    /// Packages a delivery round that can run on another thread.
    pub(crate) fn detached_round(&self, generation: u64, snapshot: Snapshot) -> impl FnOnce() + Send + 'static {
        let subscribers = self.subscribers.clone();
        move || deliver_round(&subscribers, generation, &snapshot)
    }

    /// The generation of the most recent publication.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Reserves the generation for the next publication.
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Adds `callback` without delivering anything to it yet.
    pub(crate) fn register(&self, callback: Callback) -> (Subscription, Arc<Subscriber>) {
        let subscriber = Arc::new(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            callback,
            seen: AtomicU64::new(0),
        });
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(subscriber.clone());
        }
        let subscription = Subscription {
            id: subscriber.id,
            subscribers: Arc::downgrade(&self.subscribers),
        };
        (subscription, subscriber)
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Drops every subscriber.
    pub fn close(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }
}

fn deliver_round(subscribers: &SubscriberList, generation: u64, snapshot: &[Arc<LogEntry>]) {
    let targets: Vec<Arc<Subscriber>> = match subscribers.lock() {
        Ok(subscribers) => subscribers.clone(),
        Err(_) => return,
    };

    for subscriber in &targets {
        subscriber.deliver(generation, snapshot);
    }
}

/// Handle returned by `subscribe`.
#[must_use = "dropping a Subscription keeps the callback registered; call `unsubscribe` to remove it"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberList>,
}

impl Subscription {
    /// Removes the callback. Deliveries already in flight still complete.
    pub fn unsubscribe(self) {
        remove(&self.subscribers, self.id);
    }

    /// Keeps the callback registered for the life of the broadcaster.
    pub fn detach(self) {}
}

fn remove(subscribers: &Weak<SubscriberList>, id: u64) {
    if let Some(subscribers) = subscribers.upgrade() {
        if let Ok(mut subscribers) = subscribers.lock() {
            subscribers.retain(|existing| existing.id != id);
        }
    }
}

/// The sending half of a channel subscription, bound to its registration
/// once that exists so a closed receiver can unregister it.
pub(crate) struct ChannelBinding {
    registration: Arc<Mutex<Option<(u64, Weak<SubscriberList>)>>>,
}

impl ChannelBinding {
    pub(crate) fn bind(&self, subscription: &Subscription) {
        if let Ok(mut guard) = self.registration.lock() {
            *guard = Some((subscription.id, subscription.subscribers.clone()));
        }
    }
}

/// Builds a callback forwarding snapshots into a fresh unbounded channel.
pub(crate) fn channel_callback() -> (Callback, ChannelBinding, mpsc::UnboundedReceiver<Snapshot>) {
    let (tx, rx) = mpsc::unbounded_channel::<Snapshot>();
    let registration: Arc<Mutex<Option<(u64, Weak<SubscriberList>)>>> = Arc::new(Mutex::new(None));
    let slot = registration.clone();

    let callback: Callback = Arc::new(move |snapshot: &[Arc<LogEntry>]| {
        if tx.send(snapshot.to_vec()).is_err() {
            if let Ok(guard) = slot.lock() {
                if let Some((id, subscribers)) = guard.as_ref() {
                    remove(subscribers, *id);
                }
            }
        }
    });

    (callback, ChannelBinding { registration }, rx)
}

/// Subscribes a channel instead of a callback.
///
/// Snapshots are forwarded to the returned receiver, starting with
/// `current`. Once the receiver is dropped the subscription removes itself
/// on the next delivery.
pub fn subscribe_channel(
    broadcaster: &Broadcaster,
    current: &[Arc<LogEntry>],
) -> (Subscription, mpsc::UnboundedReceiver<Snapshot>) {
    let generation = broadcaster.generation();
    let (callback, binding, rx) = channel_callback();
    let (subscription, subscriber) = broadcaster.register(callback);
    binding.bind(&subscription);
    subscriber.deliver(generation, current);
    (subscription, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Severity;
    use std::sync::atomic::AtomicUsize;

    fn entries(n: usize) -> Snapshot {
        (0..n)
            .map(|i| LogEntry::new(Severity::Info, format!("entry {}", i), Vec::new()))
            .collect()
    }

    #[test]
    fn subscribe_replays_current_history_first() {
        let broadcaster = Broadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let current = entries(2);
        broadcaster
            .subscribe(&current, move |snapshot| sink.lock().unwrap().push(snapshot.len()))
            .detach();
        broadcaster.publish(&entries(3));

        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn subscribe_replays_empty_history() {
        let broadcaster = Broadcaster::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        broadcaster
            .subscribe(&[], move |snapshot| {
                assert!(snapshot.is_empty());
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .detach();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broadcaster = Broadcaster::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = broadcaster.subscribe(&[], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        broadcaster.publish(&entries(1));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let _lock = crate::interceptors::panic::tests::HOOK_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let broadcaster = Broadcaster::new();
        let calls = Arc::new(AtomicUsize::new(0));

        broadcaster
            .subscribe(&[], |snapshot| {
                if !snapshot.is_empty() {
                    panic!("viewer crashed");
                }
            })
            .detach();
        let counter = calls.clone();
        broadcaster
            .subscribe(&[], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .detach();

        broadcaster.publish(&entries(1));
        broadcaster.publish(&entries(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn subscribing_during_delivery_does_not_join_current_round() {
        let broadcaster = Arc::new(Broadcaster::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let inner = broadcaster.clone();
        let late = late_calls.clone();
        let subscribed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        broadcaster
            .subscribe(&[], move |snapshot| {
                if !snapshot.is_empty() && !subscribed.swap(true, Ordering::SeqCst) {
                    let late = late.clone();
                    inner
                        .subscribe(snapshot, move |_| {
                            late.fetch_add(1, Ordering::SeqCst);
                        })
                        .detach();
                }
            })
            .detach();

        broadcaster.publish(&entries(1));
        // Only the replay on subscribe, not the in-flight round.
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);

        broadcaster.publish(&entries(2));
        assert_eq!(late_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_round_never_overwrites_a_newer_one() {
        let broadcaster = Broadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        broadcaster
            .subscribe(&[], move |snapshot| sink.lock().unwrap().push(snapshot.len()))
            .detach();

        let older = broadcaster.next_generation();
        let newer = broadcaster.next_generation();
        broadcaster.publish_at(newer, &entries(2));
        broadcaster.publish_at(older, &entries(1));

        assert_eq!(*seen.lock().unwrap(), vec![0, 2]);
    }

    #[test]
    fn replay_is_skipped_once_a_newer_round_arrived() {
        let broadcaster = Broadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let generation = broadcaster.generation();
        let (subscription, subscriber) = broadcaster.register(Arc::new(move |snapshot: &[Arc<LogEntry>]| {
            sink.lock().unwrap().push(snapshot.len())
        }));
        broadcaster.publish(&entries(3));
        subscriber.deliver(generation, &entries(1));

        assert_eq!(*seen.lock().unwrap(), vec![3]);
        subscription.unsubscribe();
    }

    #[test]
    fn detached_round_delivers_on_another_thread() {
        let broadcaster = Broadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        broadcaster
            .subscribe(&[], move |snapshot| {
                sink.lock().unwrap().push((std::thread::current().id(), snapshot.len()))
            })
            .detach();

        let round = broadcaster.detached_round(broadcaster.next_generation(), entries(4));
        std::thread::spawn(round).join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].1, 4);
        assert_ne!(seen[1].0, std::thread::current().id());
    }

    #[tokio::test]
    async fn channel_subscription_forwards_and_prunes_itself() {
        let broadcaster = Broadcaster::new();
        let (_subscription, mut rx) = subscribe_channel(&broadcaster, &entries(1));
        broadcaster.publish(&entries(2));

        assert_eq!(rx.recv().await.map(|s| s.len()), Some(1));
        assert_eq!(rx.recv().await.map(|s| s.len()), Some(2));

        drop(rx);
        broadcaster.publish(&entries(3));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
