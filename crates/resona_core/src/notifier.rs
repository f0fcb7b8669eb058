//! Event Notifier
//!
//! Observer registry for engine events. Each `on_*` call returns a
//! [`Subscription`] that removes the listener when dropped. Channel
//! subscribers are pruned once their receiver is gone.
//!
//! Listeners are called with the registry unlocked, so a callback may
//! subscribe, unsubscribe or call back into the engine.
//!
//! Batches queued with [`EventNotifier::enqueue`] are delivered in queue
//! order by whichever thread is draining; a batch queued from inside a
//! listener goes out after the one being delivered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::message::EngineEvent;

type PositionFn = Arc<dyn Fn(f64) + Send + Sync>;
type EndedFn = Arc<dyn Fn() + Send + Sync>;
type EventFn = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Position(PositionFn),
    Ended(EndedFn),
    Ready(PositionFn),
    All(EventFn),
}

impl Listener {
    fn notify(&self, event: &EngineEvent) {
        match (self, event) {
            (Listener::Position(f), EngineEvent::Position { seconds }) => f(*seconds),
            (Listener::Ended(f), EngineEvent::Ended) => f(),
            (Listener::Ready(f), EngineEvent::Ready { duration }) => f(*duration),
            (Listener::All(f), event) => f(event),
            _ => {}
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
    channels: Vec<Sender<EngineEvent>>,
    last_position_at: Option<f64>,
}

/// Typed publish/subscribe with a position-update throttle
pub struct EventNotifier {
    registry: Arc<Mutex<Registry>>,
    throttle: f64,
    outbox: Mutex<VecDeque<Vec<EngineEvent>>>,
    draining: AtomicBool,
}

impl EventNotifier {
    pub fn new(throttle: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            throttle: throttle.as_secs_f64(),
            outbox: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.push((id, listener));
        Subscription {
            id,
            registry: Some(Arc::downgrade(&self.registry)),
        }
    }

    pub fn on_position<F>(&self, f: F) -> Subscription
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.subscribe(Listener::Position(Arc::new(f)))
    }

    pub fn on_ended<F>(&self, f: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Listener::Ended(Arc::new(f)))
    }

    pub fn on_ready<F>(&self, f: F) -> Subscription
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.subscribe(Listener::Ready(Arc::new(f)))
    }

    /// Every event, in emission order
    pub fn on_event<F>(&self, f: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.subscribe(Listener::All(Arc::new(f)))
    }

    /// Receive every event on a channel; dropping the receiver unsubscribes
    pub fn channel(&self) -> Receiver<EngineEvent> {
        let (sender, receiver) = unbounded();
        self.registry.lock().channels.push(sender);
        receiver
    }

    /// Whether a position update may be emitted at `now`
    ///
    /// Claims the slot when it returns true. `force` bypasses the throttle
    /// (seek landings, the final update before `Ended`).
    pub fn position_due(&self, now: f64, force: bool) -> bool {
        let mut registry = self.registry.lock();
        let due = force
            || match registry.last_position_at {
                None => true,
                Some(last) => now - last >= self.throttle || now < last,
            };
        if due {
            registry.last_position_at = Some(now);
        }
        due
    }

    /// Forget the last emission time so the next update goes out at once
    pub fn reset_throttle(&self) {
        self.registry.lock().last_position_at = None;
    }

    /// Queue a batch for delivery; call [`flush`](Self::flush) afterwards
    ///
    /// Callers that enqueue while holding their own lock get delivery in
    /// lock order.
    pub fn enqueue(&self, events: Vec<EngineEvent>) {
        if !events.is_empty() {
            self.outbox.lock().push_back(events);
        }
    }

    /// Deliver queued batches unless another thread is already doing so
    pub fn flush(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
            loop {
                let batch = self.outbox.lock().pop_front();
                match batch {
                    Some(events) => self.dispatch(&events),
                    None => break,
                }
            }
            self.draining.store(false, Ordering::Release);

            // A batch may have landed between the last pop and the release
            if self.outbox.lock().is_empty() {
                return;
            }
        }
    }

    /// Deliver events to every listener, in order
    pub fn dispatch(&self, events: &[EngineEvent]) {
        if events.is_empty() {
            return;
        }

        let (listeners, channels) = {
            let registry = self.registry.lock();
            let listeners: Vec<Listener> =
                registry.listeners.iter().map(|(_, l)| l.clone()).collect();
            (listeners, registry.channels.clone())
        };

        let mut dead: Vec<&Sender<EngineEvent>> = Vec::new();
        for event in events {
            for listener in &listeners {
                listener.notify(event);
            }
            for channel in &channels {
                if channel.send(event.clone()).is_err()
                    && !dead.iter().any(|d| d.same_channel(channel))
                {
                    dead.push(channel);
                }
            }
        }

        if !dead.is_empty() {
            self.registry
                .lock()
                .channels
                .retain(|c| !dead.iter().any(|d| d.same_channel(c)));
        }
    }

    /// Drop every listener and channel
    pub fn clear(&self) {
        self.outbox.lock().clear();
        let mut registry = self.registry.lock();
        registry.listeners.clear();
        registry.channels.clear();
        registry.last_position_at = None;
    }

    /// Callback listeners plus channel subscribers
    pub fn listener_count(&self) -> usize {
        let registry = self.registry.lock();
        registry.listeners.len() + registry.channels.len()
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Disposer for one listener; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Option<Weak<Mutex<Registry>>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the listener for the notifier's lifetime
    pub fn detach(mut self) {
        self.registry = None;
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|w| w.upgrade()) {
            registry.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
