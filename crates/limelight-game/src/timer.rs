use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// The two durable deadlines a turn can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// 120s for a manager to act on a fresh pick.
    ManagerAction,
    /// assigned_duration after the participant started.
    TurnExpiry,
}

/// In-process timer wheel over durable turn state. Tasks here are an
/// optimization only: every callback re-checks the database before acting,
/// and `rebuild` reconstructs the pending set after a restart, so a lost
/// task never loses a deadline.
pub struct TimerRegistry {
    handle: Handle,
    tasks: Mutex<HashMap<(i64, TimerKind), JoinHandle<()>>>,
}

impl TimerRegistry {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self {
            handle: Handle::current(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Run `callback` after `delay`. At most one timer per (game, kind);
    /// re-scheduling replaces the previous task. Callbacks do brief
    /// database work and run inline on the timer task.
    pub fn schedule<F>(&self, game_id: i64, kind: TimerKind, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        debug!("scheduling {kind:?} timer for game {game_id} in {delay:?}");
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = tasks.insert((game_id, kind), task) {
            old.abort();
        }
    }

    /// Drop a scheduled timer if one exists. Purely an optimization; the
    /// callback's own state re-check is what guarantees correctness.
    pub fn cancel(&self, game_id: i64, kind: TimerKind) {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = tasks.remove(&(game_id, kind)) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();

        registry.schedule(1, TimerKind::ManagerAction, Duration::from_secs(120), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_previous_timer() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));

        let first = fired.clone();
        registry.schedule(1, TimerKind::TurnExpiry, Duration::from_secs(10), move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = fired.clone();
        registry.schedule(1, TimerKind::TurnExpiry, Duration::from_secs(30), move || {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();

        registry.schedule(2, TimerKind::ManagerAction, Duration::from_secs(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.cancel(2, TimerKind::ManagerAction);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_for_different_games_are_independent() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));

        for game_id in [1, 2, 3] {
            let counter = fired.clone();
            registry.schedule(game_id, TimerKind::ManagerAction, Duration::from_secs(7), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
