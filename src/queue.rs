use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::error;

use crate::error::Error;
use crate::util::lock_unpoisoned;

pub const DEFAULT_MAX_CONCURRENT: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

type QueueTask = Box<dyn FnOnce(SlotPermit) + Send + 'static>;

struct QueueEntry {
    priority: Priority,
    sequence: u64,
    task: QueueTask,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Max-heap: higher priority first, then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState {
    entries: BinaryHeap<QueueEntry>,
    active: usize,
    limit: usize,
    next_sequence: u64,
}

struct QueueShared {
    state: Mutex<QueueState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueTicket(u64);

/// Proof of admission. The slot is returned to the queue when the permit is dropped.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct SlotPermit {
    shared: Arc<QueueShared>,
}

impl std::fmt::Debug for SlotPermit {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("SlotPermit").finish_non_exhaustive()
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        release(&self.shared);
    }
}

struct ReadyTask {
    task: QueueTask,
    permit: SlotPermit,
}

impl ReadyTask {
    fn run(self) {
        let Self { task, permit } = self;
        if catch_unwind(AssertUnwindSafe(move || task(permit))).is_err() {
            error!("admission queue task panicked; its slot was released");
        }
    }
}

thread_local! {
    // Tasks admitted while this thread is already draining. Running them from the
    // outermost drain keeps permit release from recursing through nested drops.
    static DRAIN_BACKLOG: RefCell<Option<Vec<ReadyTask>>> = const { RefCell::new(None) };
}

#[derive(Clone)]
pub struct AdmissionQueue {
    shared: Arc<QueueShared>,
}

impl AdmissionQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    entries: BinaryHeap::new(),
                    active: 0,
                    limit: limit.max(1),
                    next_sequence: 0,
                }),
            }),
        }
    }

    pub fn enqueue<F>(&self, priority: Priority, task: F) -> QueueTicket
    where
        F: FnOnce(SlotPermit) + Send + 'static,
    {
        let (ticket, ready) = {
            let mut state = lock_unpoisoned(&self.shared.state);
            let sequence = state.next_sequence;
            state.next_sequence = state.next_sequence.wrapping_add(1);
            state.entries.push(QueueEntry {
                priority,
                sequence,
                task: Box::new(task),
            });
            (QueueTicket(sequence), take_ready(&self.shared, &mut state))
        };
        run_ready(ready);
        ticket
    }

    pub fn cancel(&self, ticket: QueueTicket) -> bool {
        let removed = {
            let mut state = lock_unpoisoned(&self.shared.state);
            let entries = std::mem::take(&mut state.entries).into_vec();
            let (removed, kept): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .partition(|entry| entry.sequence == ticket.0);
            state.entries = BinaryHeap::from(kept);
            removed
        };
        !removed.is_empty()
    }

    /// Waits for a slot. Dropping the future while queued withdraws the entry.
    pub async fn acquire(&self, priority: Priority) -> Result<SlotPermit, Error> {
        let (sender, receiver) = oneshot::channel();
        let ticket = self.enqueue(priority, move |permit| {
            let _ = sender.send(permit);
        });
        let mut guard = QueuedGuard {
            queue: self,
            ticket,
            armed: true,
        };
        let permit = receiver.await.map_err(|_| Error::QueueClosed)?;
        guard.armed = false;
        Ok(permit)
    }

    pub fn set_limit(&self, limit: usize) {
        let ready = {
            let mut state = lock_unpoisoned(&self.shared.state);
            state.limit = limit.max(1);
            take_ready(&self.shared, &mut state)
        };
        run_ready(ready);
    }

    pub fn limit(&self) -> usize {
        lock_unpoisoned(&self.shared.state).limit
    }

    pub fn active(&self) -> usize {
        lock_unpoisoned(&self.shared.state).active
    }

    pub fn queued(&self) -> usize {
        lock_unpoisoned(&self.shared.state).entries.len()
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl std::fmt::Debug for AdmissionQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_unpoisoned(&self.shared.state);
        formatter
            .debug_struct("AdmissionQueue")
            .field("limit", &state.limit)
            .field("active", &state.active)
            .field("queued", &state.entries.len())
            .finish()
    }
}

struct QueuedGuard<'a> {
    queue: &'a AdmissionQueue,
    ticket: QueueTicket,
    armed: bool,
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.cancel(self.ticket);
        }
    }
}

fn take_ready(shared: &Arc<QueueShared>, state: &mut QueueState) -> Vec<ReadyTask> {
    let mut ready = Vec::new();
    while state.active < state.limit {
        let Some(entry) = state.entries.pop() else {
            break;
        };
        state.active += 1;
        ready.push(ReadyTask {
            task: entry.task,
            permit: SlotPermit {
                shared: Arc::clone(shared),
            },
        });
    }
    ready
}

fn release(shared: &Arc<QueueShared>) {
    let ready = {
        let mut state = lock_unpoisoned(&shared.state);
        state.active = state.active.saturating_sub(1);
        take_ready(shared, &mut state)
    };
    run_ready(ready);
}

fn run_ready(ready: Vec<ReadyTask>) {
    if ready.is_empty() {
        return;
    }

    let mut ready = Some(ready);
    let nested = DRAIN_BACKLOG.with(|backlog| {
        let mut backlog = backlog.borrow_mut();
        match backlog.as_mut() {
            Some(pending) => {
                pending.extend(ready.take().into_iter().flatten());
                true
            }
            None => {
                *backlog = Some(Vec::new());
                false
            }
        }
    });
    if nested {
        return;
    }

    let mut batch = ready.unwrap_or_default();
    while !batch.is_empty() {
        for task in batch.drain(..) {
            task.run();
        }
        batch = DRAIN_BACKLOG.with(|backlog| {
            backlog
                .borrow_mut()
                .as_mut()
                .map(std::mem::take)
                .unwrap_or_default()
        });
    }
    DRAIN_BACKLOG.with(|backlog| backlog.borrow_mut().take());
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{AdmissionQueue, Priority, SlotPermit};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, Arc<Mutex<Vec<SlotPermit>>>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(Mutex::new(Vec::new())))
    }

    #[test]
    fn runs_immediately_while_under_limit() {
        let queue = AdmissionQueue::new(2);
        let (order, held) = recorder();

        for name in ["a", "b"] {
            let order = Arc::clone(&order);
            let held = Arc::clone(&held);
            queue.enqueue(Priority::Normal, move |permit| {
                order.lock().expect("order lock").push(name);
                held.lock().expect("held lock").push(permit);
            });
        }

        assert_eq!(*order.lock().expect("order lock"), vec!["a", "b"]);
        assert_eq!(queue.active(), 2);
        assert_eq!(queue.queued(), 0);
    }

    #[test]
    fn higher_priority_dispatches_first_when_slot_frees() {
        let queue = AdmissionQueue::new(1);
        let (order, held) = recorder();

        let blocker = {
            let held = Arc::clone(&held);
            move |permit| held.lock().expect("held lock").push(permit)
        };
        queue.enqueue(Priority::Normal, blocker);

        for (name, priority) in [
            ("low", Priority::Low),
            ("normal", Priority::Normal),
            ("high", Priority::High),
        ] {
            let order = Arc::clone(&order);
            queue.enqueue(priority, move |_permit| {
                order.lock().expect("order lock").push(name);
            });
        }
        assert_eq!(queue.queued(), 3);

        held.lock().expect("held lock").clear();

        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["high", "normal", "low"]
        );
        assert_eq!(queue.active(), 0);
    }

    #[test]
    fn equal_priority_preserves_arrival_order() {
        let queue = AdmissionQueue::new(1);
        let (order, held) = recorder();

        let first = {
            let held = Arc::clone(&held);
            move |permit| held.lock().expect("held lock").push(permit)
        };
        queue.enqueue(Priority::High, first);
        for name in ["one", "two", "three"] {
            let order = Arc::clone(&order);
            queue.enqueue(Priority::High, move |_permit| {
                order.lock().expect("order lock").push(name);
            });
        }

        held.lock().expect("held lock").clear();

        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["one", "two", "three"]
        );
    }

    #[test]
    fn cancelled_entry_never_runs() {
        let queue = AdmissionQueue::new(1);
        let (order, held) = recorder();

        let first = {
            let held = Arc::clone(&held);
            move |permit| held.lock().expect("held lock").push(permit)
        };
        queue.enqueue(Priority::Normal, first);
        let ticket = {
            let order = Arc::clone(&order);
            queue.enqueue(Priority::Normal, move |_permit| {
                order.lock().expect("order lock").push("cancelled");
            })
        };

        assert!(queue.cancel(ticket));
        assert!(!queue.cancel(ticket));
        held.lock().expect("held lock").clear();

        assert!(order.lock().expect("order lock").is_empty());
        assert_eq!(queue.active(), 0);
    }

    #[test]
    fn panicking_task_releases_its_slot() {
        let queue = AdmissionQueue::new(1);
        let (order, _held) = recorder();

        queue.enqueue(Priority::Normal, |_permit| panic!("task failure"));
        let after = Arc::clone(&order);
        queue.enqueue(Priority::Normal, move |_permit| {
            after.lock().expect("order lock").push("after");
        });

        assert_eq!(*order.lock().expect("order lock"), vec!["after"]);
        assert_eq!(queue.active(), 0);
    }

    #[test]
    fn long_chain_of_immediate_releases_does_not_recurse() {
        let queue = AdmissionQueue::new(1);
        let (_order, held) = recorder();
        let counter = Arc::new(Mutex::new(0_usize));

        let blocker = {
            let held = Arc::clone(&held);
            move |permit| held.lock().expect("held lock").push(permit)
        };
        queue.enqueue(Priority::Normal, blocker);
        for _ in 0..50_000 {
            let counter = Arc::clone(&counter);
            queue.enqueue(Priority::Normal, move |_permit| {
                *counter.lock().expect("counter lock") += 1;
            });
        }
        held.lock().expect("held lock").clear();

        assert_eq!(*counter.lock().expect("counter lock"), 50_000);
        assert_eq!(queue.active(), 0);
    }

    #[test]
    fn raising_limit_drains_waiting_entries() {
        let queue = AdmissionQueue::new(1);
        let (_order, held) = recorder();

        for _ in 0..3 {
            let held = Arc::clone(&held);
            queue.enqueue(Priority::Normal, move |permit| {
                held.lock().expect("held lock").push(permit);
            });
        }
        assert_eq!(queue.active(), 1);
        assert_eq!(queue.queued(), 2);

        queue.set_limit(3);

        assert_eq!(queue.active(), 3);
        assert_eq!(queue.queued(), 0);
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let queue = AdmissionQueue::new(1);
        let first = queue.acquire(Priority::Normal).await.expect("first permit");

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.acquire(Priority::High).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(queue.queued(), 1);

        drop(first);
        let second = waiter
            .await
            .expect("join waiter")
            .expect("second permit");
        assert_eq!(queue.active(), 1);
        drop(second);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn dropped_acquire_withdraws_its_entry() {
        let queue = AdmissionQueue::new(1);
        let held = queue.acquire(Priority::Normal).await.expect("permit");

        let pending = queue.acquire(Priority::Normal);
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(5), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(queue.queued(), 0);

        drop(held);
        assert_eq!(queue.active(), 0);
    }
}
