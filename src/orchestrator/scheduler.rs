//! Per-task cancellable inactivity deadlines.
//!
//! Each armed task holds a `(ping, inactive)` deadline pair anchored to
//! its greeting timestamp, not to arm time: re-arming after a restart
//! yields deadlines that reflect real elapsed time and fire immediately
//! when overdue. The scheduler is strictly bookkeeping — it fires the
//! caller-supplied actions and never looks at task state itself.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Action fired when a deadline elapses. Receives the task identifier.
pub type TimerAction =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Entry {
    generation: u64,
    cancel: CancellationToken,
}

/// Bookkeeper for at most one armed `(ping, inactive)` pair per task id.
///
/// All operations are safe from any thread and from within a firing
/// callback; the map lock is never held across an `await`.
pub struct InactivityScheduler {
    entries: Mutex<HashMap<String, Entry>>,
    ping_offset: Duration,
    inactive_offset: Duration,
    next_generation: AtomicU64,
}

impl InactivityScheduler {
    /// Create a scheduler with the given offsets from the greeting anchor.
    #[must_use]
    pub fn new(ping_offset: Duration, inactive_offset: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ping_offset,
            inactive_offset,
            next_generation: AtomicU64::new(0),
        }
    }

    /// Arm the deadline pair for a task, replacing any existing entry.
    ///
    /// Deadlines are computed as `max(0, anchor + offset − now)`; an
    /// overdue deadline fires immediately. Callbacks run on spawned tasks
    /// and are not awaited by the caller; a panicking callback is
    /// contained and does not affect its sibling timer.
    pub fn schedule(
        self: &Arc<Self>,
        task_id: &str,
        greeting_sent_at: DateTime<Utc>,
        on_ping: TimerAction,
        on_inactive: TimerAction,
    ) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        {
            let mut entries = self.lock_entries();
            if let Some(previous) = entries.insert(
                task_id.to_owned(),
                Entry {
                    generation,
                    cancel: cancel.clone(),
                },
            ) {
                previous.cancel.cancel();
            }
        }

        let ping_delay = delay_until(greeting_sent_at, self.ping_offset);
        let inactive_delay = delay_until(greeting_sent_at, self.inactive_offset);
        debug!(
            task_id,
            ping_ms = ping_delay.as_millis() as u64,
            inactive_ms = inactive_delay.as_millis() as u64,
            "armed inactivity deadlines"
        );

        tokio::spawn(run_deadline(
            task_id.to_owned(),
            "ping",
            ping_delay,
            cancel.clone(),
            on_ping,
        ));

        let scheduler = Arc::clone(self);
        let task_id = task_id.to_owned();
        tokio::spawn(async move {
            run_deadline(
                task_id.clone(),
                "inactive",
                inactive_delay,
                cancel,
                on_inactive,
            )
            .await;
            // The inactive deadline is the last to fire; once its callback
            // has run, the entry is spent and the next reconciliation tick
            // must be able to re-arm it.
            scheduler.remove_if_generation(&task_id, generation);
        });
    }

    /// Cancel both deadlines for a task. Idempotent if absent.
    ///
    /// Prevents future firings only: a callback that already started is
    /// allowed to finish and must re-check its preconditions itself.
    pub fn cancel(&self, task_id: &str) {
        if let Some(entry) = self.lock_entries().remove(task_id) {
            entry.cancel.cancel();
            debug!(task_id, "cancelled inactivity deadlines");
        }
    }

    /// Whether the task currently has an armed entry.
    #[must_use]
    pub fn has(&self, task_id: &str) -> bool {
        self.lock_entries().contains_key(task_id)
    }

    /// Number of armed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether no entries are armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Cancel every armed entry (shutdown path).
    pub fn cancel_all(&self) {
        let mut entries = self.lock_entries();
        for entry in entries.values() {
            entry.cancel.cancel();
        }
        entries.clear();
    }

    fn remove_if_generation(&self, task_id: &str, generation: u64) {
        let mut entries = self.lock_entries();
        if entries
            .get(task_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(task_id);
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Delay from now until `anchor + offset`, clamped at zero.
fn delay_until(anchor: DateTime<Utc>, offset: Duration) -> Duration {
    let target = anchor + chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::zero());
    (target - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Sleep until the deadline or cancellation, then run the action on its
/// own task so a panic inside it is contained.
async fn run_deadline(
    task_id: String,
    kind: &'static str,
    delay: Duration,
    cancel: CancellationToken,
    action: TimerAction,
) {
    tokio::select! {
        () = cancel.cancelled() => {
            debug!(task_id, kind, "deadline cancelled before firing");
        }
        () = tokio::time::sleep(delay) => {
            let callback = tokio::spawn(action(task_id.clone()));
            if let Err(err) = callback.await {
                if err.is_panic() {
                    warn!(task_id, kind, "deadline callback panicked");
                }
            }
        }
    }
}
