//! Photo burst debouncing
//!
//! Two independent timer maps: grouped bursts keyed by `(actor, group)` and
//! individual photos keyed by actor. Scheduling a key again replaces its
//! pending timer. A timer that runs to completion does not touch any
//! conversation state itself; it emits a [`DebounceFired`] on the channel
//! returned by [`DebounceScheduler::new`] and the consumer routes it through
//! the actor's queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Which burst a firing belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BurstKind {
    /// Photos delivered together under a shared group identifier
    Group(String),
    /// Photos sent one by one
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceFired {
    pub actor: String,
    pub burst: BurstKind,
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    groups: HashMap<(String, String), Timer>,
    singles: HashMap<String, Timer>,
    /// Fired but not yet handed off by the consumer
    in_flight: usize,
}

impl Timers {
    fn slot(&mut self, actor: &str, burst: &BurstKind) -> Option<&Timer> {
        match burst {
            BurstKind::Group(group) => self.groups.get(&(actor.to_string(), group.clone())),
            BurstKind::Single => self.singles.get(actor),
        }
    }

    fn take(&mut self, actor: &str, burst: &BurstKind) -> Option<Timer> {
        match burst {
            BurstKind::Group(group) => self.groups.remove(&(actor.to_string(), group.clone())),
            BurstKind::Single => self.singles.remove(actor),
        }
    }

    fn put(&mut self, actor: &str, burst: &BurstKind, timer: Timer) -> Option<Timer> {
        match burst {
            BurstKind::Group(group) => self.groups.insert((actor.to_string(), group.clone()), timer),
            BurstKind::Single => self.singles.insert(actor.to_string(), timer),
        }
    }
}

pub struct DebounceScheduler {
    timers: Arc<Mutex<Timers>>,
    fired_tx: mpsc::UnboundedSender<DebounceFired>,
}

fn lock(timers: &Mutex<Timers>) -> MutexGuard<'_, Timers> {
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DebounceScheduler {
    /// Create a scheduler and the receiving end of its firings
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DebounceFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(Mutex::new(Timers::default())),
            fired_tx,
        };
        (scheduler, fired_rx)
    }

    /// (Re)start the timer for a grouped burst
    pub fn schedule_group(&self, actor: &str, group_id: &str, delay: Duration) {
        self.schedule(actor, BurstKind::Group(group_id.to_string()), delay);
    }

    /// (Re)start the timer for individually sent photos
    pub fn schedule_single(&self, actor: &str, delay: Duration) {
        self.schedule(actor, BurstKind::Single, delay);
    }

    /// Abort every pending timer for `actor`, returning how many were pending
    pub fn cancel_actor(&self, actor: &str) -> usize {
        let mut timers = lock(&self.timers);
        let mut cancelled = 0;

        if let Some(timer) = timers.singles.remove(actor) {
            timer.handle.abort();
            cancelled += 1;
        }

        let group_keys: Vec<(String, String)> = timers
            .groups
            .keys()
            .filter(|(owner, _)| owner == actor)
            .cloned()
            .collect();
        for key in group_keys {
            if let Some(timer) = timers.groups.remove(&key) {
                timer.handle.abort();
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            debug!(actor = %actor, cancelled, "Cancelled pending debounce timers");
        }
        cancelled
    }

    /// Number of timers pending for `actor`
    pub fn pending_for(&self, actor: &str) -> usize {
        let timers = lock(&self.timers);
        let singles = usize::from(timers.singles.contains_key(actor));
        let groups = timers.groups.keys().filter(|(owner, _)| owner == actor).count();
        singles + groups
    }

    /// Timers still waiting plus firings not yet acknowledged with [`handed_off`](Self::handed_off)
    pub fn pending_total(&self) -> usize {
        let timers = lock(&self.timers);
        timers.singles.len() + timers.groups.len() + timers.in_flight
    }

    /// Called by the consumer once a firing has been routed onward
    pub fn handed_off(&self) {
        let mut timers = lock(&self.timers);
        timers.in_flight = timers.in_flight.saturating_sub(1);
    }

    fn schedule(&self, actor: &str, burst: BurstKind, delay: Duration) {
        let mut timers = lock(&self.timers);
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let handle = tokio::spawn(fire_after(
            self.timers.clone(),
            self.fired_tx.clone(),
            actor.to_string(),
            burst.clone(),
            generation,
            delay,
        ));

        if let Some(previous) = timers.put(actor, &burst, Timer { generation, handle }) {
            previous.handle.abort();
            trace!(actor = %actor, burst = ?burst, "Debounce timer reset");
        }
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        let mut timers = lock(&self.timers);
        for (_, timer) in timers.singles.drain() {
            timer.handle.abort();
        }
        for (_, timer) in timers.groups.drain() {
            timer.handle.abort();
        }
    }
}

async fn fire_after(
    timers: Arc<Mutex<Timers>>,
    fired_tx: mpsc::UnboundedSender<DebounceFired>,
    actor: String,
    burst: BurstKind,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    {
        let mut map = lock(&timers);
        // A newer timer replaced this one between wake-up and lock
        match map.slot(&actor, &burst) {
            Some(current) if current.generation == generation => {
                map.take(&actor, &burst);
                map.in_flight += 1;
            }
            _ => return,
        }
    }

    trace!(actor = %actor, burst = ?burst, "Debounce timer fired");
    // Receiver gone means the engine shut down
    if fired_tx.send(DebounceFired { actor, burst }).is_err() {
        let mut map = lock(&timers);
        map.in_flight = map.in_flight.saturating_sub(1);
    }
}
