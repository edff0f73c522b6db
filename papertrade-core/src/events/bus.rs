//! Event bus: fan-out to dashboard subscribers
//!
//! Each subscriber owns a bounded queue. Publishing never blocks: when a queue
//! is full its oldest non-critical event is replaced by a `resync_required`
//! marker, or folded into the marker already waiting in the queue. A client that
//! pops the marker is sent the latest snapshot next.
//!
//! The connect burst is held apart from the bounded queue, so a large cache can
//! never evict its own state.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ConnectionStatus, DashboardEvent, EventPayload, SnapshotData};
use crate::market::Symbol;

pub type ConnectionId = Uuid;

type SharedSnapshot = Arc<RwLock<Option<SnapshotData>>>;

fn is_marker(event: &DashboardEvent) -> bool {
    matches!(event.payload, EventPayload::ResyncRequired { .. })
}

struct QueueState {
    /// Connect burst, delivered before anything else
    burst: VecDeque<DashboardEvent>,
    events: VecDeque<DashboardEvent>,
    /// A `resync_required` marker is waiting in `events`
    marker_queued: bool,
    /// The last marker popped still owes the client a snapshot
    snapshot_owed: bool,
}

impl QueueState {
    /// Count one more dropped event against the queued marker, or queue a new
    /// one at `slot`.
    fn note_drop(&mut self, slot: Option<usize>) {
        if self.marker_queued {
            for event in self.events.iter_mut() {
                if let EventPayload::ResyncRequired { dropped } = &mut event.payload {
                    *dropped += 1;
                    break;
                }
            }
            if let Some(index) = slot {
                self.events.remove(index);
            }
            return;
        }
        let marker = DashboardEvent::resync_required(1);
        match slot {
            Some(index) => self.events[index] = marker,
            None => self.events.push_back(marker),
        }
        self.marker_queued = true;
    }
}

/// Bounded per-subscriber queue
struct SubscriberQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    snapshot: SharedSnapshot,
    notify: Notify,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize, snapshot: SharedSnapshot) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                burst: VecDeque::new(),
                events: VecDeque::with_capacity(capacity + 1),
                marker_queued: false,
                snapshot_owed: false,
            }),
            snapshot,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, event: DashboardEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut state = self.state.lock();
            let queued = state.events.len() - usize::from(state.marker_queued);
            if queued < self.capacity {
                state.events.push_back(event);
            } else {
                let victim = state
                    .events
                    .iter()
                    .position(|e| !e.is_critical() && !is_marker(e));
                match victim {
                    Some(index) => {
                        state.note_drop(Some(index));
                        state.events.push_back(event);
                    }
                    // Queue is all critical: critical events still go in
                    None if event.is_critical() => state.events.push_back(event),
                    None => state.note_drop(None),
                }
            }
        }
        self.notify.notify_one();
    }

    /// Queue the connect burst. It is not subject to the capacity bound.
    fn push_burst(&self, events: impl IntoIterator<Item = DashboardEvent>) {
        self.state.lock().burst.extend(events);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<DashboardEvent> {
        let mut state = self.state.lock();
        if let Some(event) = state.burst.pop_front() {
            return Some(event);
        }
        if std::mem::take(&mut state.snapshot_owed) {
            drop(state);
            let snapshot = self.snapshot.read().clone();
            if let Some(snapshot) = snapshot {
                return Some(DashboardEvent::new(EventPayload::Snapshot(snapshot)));
            }
            state = self.state.lock();
        }
        let event = state.events.pop_front()?;
        if is_marker(&event) {
            state.marker_queued = false;
            state.snapshot_owed = true;
        }
        Some(event)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// One connected dashboard client
pub struct Subscriber {
    connection_id: ConnectionId,
    queue: Arc<SubscriberQueue>,
}

impl Subscriber {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Next event in FIFO order, or `None` once the subscriber is closed and drained.
    pub async fn recv(&self) -> Option<DashboardEvent> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<DashboardEvent> {
        self.queue.pop()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.load(Ordering::Acquire)
    }
}

/// Chart state replayed to every (re)connecting subscriber
#[derive(Default)]
struct ResyncCache {
    bars: BTreeMap<(Symbol, String), DashboardEvent>,
    indicators: BTreeMap<Symbol, DashboardEvent>,
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<ConnectionId, Arc<SubscriberQueue>>,
    cache: ResyncCache,
    closed: bool,
}

/// Event bus
pub struct EventBus {
    capacity: usize,
    state: Mutex<BusState>,
    /// Latest account/position snapshot, shared with every queue
    snapshot: SharedSnapshot,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            capacity: queue_capacity.max(1),
            state: Mutex::new(BusState::default()),
            snapshot: Arc::new(RwLock::new(None)),
        }
    }

    /// Deliver an event to every subscriber. Returns the number of recipients.
    pub fn publish(&self, event: DashboardEvent) -> usize {
        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }

        match &event.payload {
            EventPayload::BarUpdate(bar) => {
                state
                    .cache
                    .bars
                    .insert((bar.symbol.clone(), bar.timeframe.clone()), event.clone());
            }
            EventPayload::IndicatorUpdate(indicators) => {
                state
                    .cache
                    .indicators
                    .insert(indicators.symbol.clone(), event.clone());
            }
            EventPayload::Snapshot(snapshot) => {
                *self.snapshot.write() = Some(snapshot.clone());
            }
            _ => {}
        }

        for queue in state.subscribers.values() {
            queue.push(event.clone());
        }
        state.subscribers.len()
    }

    /// Replace the account/position snapshot sent on (re)connect, without broadcasting.
    pub fn update_snapshot(&self, snapshot: SnapshotData) {
        *self.snapshot.write() = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<SnapshotData> {
        self.snapshot.read().clone()
    }

    /// Register a subscriber. It receives `connection: connected`, then the
    /// snapshot, then cached chart and indicator state, whatever the queue
    /// capacity. No live event can interleave with this burst.
    pub fn subscribe(&self) -> Subscriber {
        let connection_id = Uuid::new_v4();
        let queue = Arc::new(SubscriberQueue::new(self.capacity, Arc::clone(&self.snapshot)));

        let mut state = self.state.lock();
        if state.closed {
            queue.push_burst([DashboardEvent::connection(ConnectionStatus::Disconnected)]);
            queue.close();
            return Subscriber { connection_id, queue };
        }

        let mut burst = vec![DashboardEvent::connection(ConnectionStatus::Connected)];
        if let Some(snapshot) = self.snapshot.read().clone() {
            burst.push(DashboardEvent::new(EventPayload::Snapshot(snapshot)));
        }
        burst.extend(state.cache.bars.values().cloned());
        burst.extend(state.cache.indicators.values().cloned());
        queue.push_burst(burst);

        state.subscribers.insert(connection_id, Arc::clone(&queue));
        info!(
            "Dashboard subscriber {} connected ({} total)",
            connection_id,
            state.subscribers.len()
        );

        Subscriber { connection_id, queue }
    }

    pub fn unsubscribe(&self, connection_id: ConnectionId) {
        if let Some(queue) = self.state.lock().subscribers.remove(&connection_id) {
            queue.close();
            debug!("Dashboard subscriber {} removed", connection_id);
        }
    }

    /// Send `connection: disconnected` to everyone and close all queues.
    pub fn close_all(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for (_, queue) in state.subscribers.drain() {
            queue.push(DashboardEvent::connection(ConnectionStatus::Disconnected));
            queue.close();
        }
        info!("Event bus closed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}
