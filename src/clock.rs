use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Monotonic time source, seconds since the clock was created. Catalogue
/// deadlines are plain `u64` offsets against this origin so that "deadline <=
/// now" is integer comparison everywhere in the reconciler.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }

    pub fn now(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// A scheduler of one-shot delayed callbacks, expressed as messages delivered
/// back onto the owner's event channel. Every timer is owned by exactly one
/// logical caller (reconciler, autoshutdown, a poll worker) and must be
/// cancelled before a replacement is armed — callers enforce that discipline;
/// the wheel itself just tracks the spawned sleep task per id so it can be
/// aborted.
pub struct TimerWheel<E: Send + 'static> {
    tx: UnboundedSender<E>,
    next_id: u64,
    active: HashMap<u64, JoinHandle<()>>,
}

impl<E: Send + 'static> TimerWheel<E> {
    pub fn new(tx: UnboundedSender<E>) -> Self {
        Self { tx, next_id: 0, active: HashMap::new() }
    }

    /// Schedule `event` to be delivered after `delay_secs` seconds. A delay of
    /// zero or negative runs on the next loop iteration.
    pub fn schedule_after(&mut self, delay_secs: i64, event: E) -> TimerId
    where
        E: 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        let tx = self.tx.clone();
        let delay = Duration::from_secs(delay_secs.max(0) as u64);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(event);
        });
        self.active.insert(id, handle);
        TimerId(id)
    }

    pub fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.active.remove(&id.0) {
            handle.abort();
        }
    }
}
