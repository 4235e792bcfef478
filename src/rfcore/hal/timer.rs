//! Timer services
//!
//! [`TokioTimers`] runs each one-shot timer as a tokio sleep task.
//! [`ManualTimers`] only records what was started so tests can expire timers
//! at the moment they choose.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{trace, warn};
use tokio::runtime::Handle;
use tokio::time::Instant;

use super::{Interrupt, IrqLine, TimerId, TimerService};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Armed {
    generation: u64,
    deadline: Instant,
}

#[derive(Default)]
struct TimerTable {
    armed: HashMap<TimerId, Armed>,
    generation: u64,
}

/// Timers backed by the tokio runtime the driver runs on
#[derive(Clone)]
pub struct TokioTimers {
    irq: IrqLine,
    table: Arc<Mutex<TimerTable>>,
}

impl TokioTimers {
    pub fn new(irq: IrqLine) -> Self {
        Self {
            irq,
            table: Arc::new(Mutex::new(TimerTable::default())),
        }
    }
}

impl TimerService for TokioTimers {
    fn start(&mut self, id: TimerId, timeout_us: u32) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("Timer {id:?} started outside a tokio runtime, it will not fire");
            return;
        };
        let timeout = Duration::from_micros(timeout_us as u64);
        let generation = {
            let mut table = lock(&self.table);
            table.generation += 1;
            let generation = table.generation;
            table.armed.insert(
                id,
                Armed {
                    generation,
                    deadline: Instant::now() + timeout,
                },
            );
            generation
        };

        let table = Arc::clone(&self.table);
        let irq = self.irq.clone();
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = {
                let mut table = lock(&table);
                match table.armed.get(&id) {
                    Some(armed) if armed.generation == generation => {
                        table.armed.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if expired {
                trace!("Timer {id:?} fired");
                irq.raise(Interrupt::Timer(id));
            }
        });
    }

    fn stop(&mut self, id: TimerId) {
        lock(&self.table).armed.remove(&id);
    }

    fn is_active(&self, id: TimerId) -> bool {
        lock(&self.table).armed.contains_key(&id)
    }

    fn remaining_us(&self, id: TimerId) -> Option<u32> {
        lock(&self.table).armed.get(&id).map(|armed| {
            let left = armed.deadline.saturating_duration_since(Instant::now());
            left.as_micros().min(u32::MAX as u128) as u32
        })
    }
}

/// Timers that only expire when told to
#[derive(Clone)]
pub struct ManualTimers {
    irq: IrqLine,
    armed: Arc<Mutex<HashMap<TimerId, u32>>>,
}

impl ManualTimers {
    pub fn new(irq: IrqLine) -> Self {
        Self {
            irq,
            armed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Expire an armed timer; returns false when it was not armed
    pub fn fire(&self, id: TimerId) -> bool {
        let armed = lock(&self.armed).remove(&id).is_some();
        if armed {
            self.irq.raise(Interrupt::Timer(id));
        }
        armed
    }

    /// Timeout the timer was last started with
    pub fn timeout_of(&self, id: TimerId) -> Option<u32> {
        lock(&self.armed).get(&id).copied()
    }

    /// Pretend time passed on an armed timer
    pub fn set_remaining(&self, id: TimerId, us: u32) {
        if let Some(left) = lock(&self.armed).get_mut(&id) {
            *left = us;
        }
    }

    pub fn armed(&self) -> Vec<TimerId> {
        lock(&self.armed).keys().copied().collect()
    }
}

impl TimerService for ManualTimers {
    fn start(&mut self, id: TimerId, timeout_us: u32) {
        lock(&self.armed).insert(id, timeout_us);
    }

    fn stop(&mut self, id: TimerId) {
        lock(&self.armed).remove(&id);
    }

    fn is_active(&self, id: TimerId) -> bool {
        lock(&self.armed).contains_key(&id)
    }

    fn remaining_us(&self, id: TimerId) -> Option<u32> {
        self.timeout_of(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfcore::hal::irq_channel;

    #[test]
    fn test_manual_timer_fires_once() {
        let (line, mut rx) = irq_channel();
        let mut timers = ManualTimers::new(line);
        timers.start(TimerId::PowerUp, 1200);
        assert_eq!(timers.remaining_us(TimerId::PowerUp), Some(1200));
        timers.set_remaining(TimerId::PowerUp, 40);
        assert_eq!(timers.remaining_us(TimerId::PowerUp), Some(40));

        assert!(timers.fire(TimerId::PowerUp));
        assert!(!timers.fire(TimerId::PowerUp));
        assert_eq!(rx.try_recv(), Some(Interrupt::Timer(TimerId::PowerUp)));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_restart_supersedes() {
        let (line, mut rx) = irq_channel();
        let mut timers = TokioTimers::new(line);
        timers.start(TimerId::BackgroundStart, 50);
        timers.start(TimerId::BackgroundStart, 5_000);
        tokio::time::sleep(Duration::from_micros(100)).await;
        assert!(rx.try_recv().is_none());
        assert!(timers.is_active(TimerId::BackgroundStart));

        let irq = rx.recv().await;
        assert_eq!(irq, Some(Interrupt::Timer(TimerId::BackgroundStart)));
        assert!(!timers.is_active(TimerId::BackgroundStart));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_stop() {
        let (line, mut rx) = irq_channel();
        let mut timers = TokioTimers::new(line);
        timers.start(TimerId::PowerUp, 10);
        timers.stop(TimerId::PowerUp);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(rx.try_recv().is_none());
    }
}
