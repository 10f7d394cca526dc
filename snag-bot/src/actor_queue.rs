//! Per-actor serialization
//!
//! Every mutation of an actor's conversation state runs through
//! [`ActorQueue::run_exclusive`]. Tasks for one actor execute one at a time
//! in submission order; tasks for different actors run concurrently.
//!
//! Each actor with pending work owns a lane: an unbounded channel drained by
//! a dedicated worker task. The lane is removed as soon as it drains, so idle
//! actors cost nothing.

use futures::FutureExt;
use snag_common::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Lane {
    tx: mpsc::UnboundedSender<Job>,
    /// Jobs submitted and not yet finished
    pending: usize,
}

type Lanes = Arc<Mutex<HashMap<String, Lane>>>;

#[derive(Clone, Default)]
pub struct ActorQueue {
    lanes: Lanes,
}

fn lock(lanes: &Lanes) -> MutexGuard<'_, HashMap<String, Lane>> {
    // Jobs never run under this lock, so a poisoned map is still consistent
    lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ActorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` behind every task already submitted for `actor`
    ///
    /// The task is enqueued immediately, before the returned future is
    /// polled, so call order is execution order. A failing or panicking task
    /// is logged and does not affect later tasks; its caller still receives
    /// the error.
    pub fn run_exclusive<F, T>(
        &self,
        actor: &str,
        task: F,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let label = actor.to_string();

        let job: Job = Box::pin(async move {
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    warn!(actor = %label, "Queued task failed: {}", e);
                    Err(e)
                }
                Err(_) => {
                    error!(actor = %label, "Queued task panicked");
                    Err(Error::Internal(format!("task for actor {} panicked", label)))
                }
            };
            // Caller may have stopped waiting
            let _ = done_tx.send(result);
        });

        self.enqueue(actor, job);

        async move {
            done_rx
                .await
                .map_err(|_| Error::Internal("actor queue worker stopped".to_string()))?
        }
    }

    /// Number of actors with queued or running work
    pub fn active_lanes(&self) -> usize {
        lock(&self.lanes).len()
    }

    fn enqueue(&self, actor: &str, job: Job) {
        let mut lanes = lock(&self.lanes);

        let job = match lanes.get_mut(actor) {
            Some(lane) => match lane.tx.send(job) {
                Ok(()) => {
                    lane.pending += 1;
                    return;
                }
                // Worker is gone; start a fresh lane below
                Err(mpsc::error::SendError(job)) => {
                    lanes.remove(actor);
                    job
                }
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(job).is_err() {
            // Receiver is held right here
            return;
        }
        lanes.insert(actor.to_string(), Lane { tx, pending: 1 });
        drop(lanes);

        debug!(actor = %actor, "Actor lane opened");
        tokio::spawn(drain(self.lanes.clone(), actor.to_string(), rx));
    }
}

async fn drain(lanes: Lanes, actor: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        job.await;

        let mut map = lock(&lanes);
        match map.get_mut(&actor) {
            Some(lane) => {
                lane.pending = lane.pending.saturating_sub(1);
                if lane.pending == 0 {
                    map.remove(&actor);
                    debug!(actor = %actor, "Actor lane drained");
                    return;
                }
            }
            None => return,
        }
    }
}
