use std::sync::{Arc, Mutex};

use tracing::info;

use crate::util::lock_unpoisoned;

type AvailabilityListener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct MonitorState {
    available: bool,
    listeners: Vec<(ListenerId, AvailabilityListener)>,
    next_listener_id: u64,
}

#[derive(Clone)]
pub struct NetworkMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl NetworkMonitor {
    pub fn new(available: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                available,
                listeners: Vec::new(),
                next_listener_id: 0,
            })),
        }
    }

    pub fn is_available(&self) -> bool {
        lock_unpoisoned(&self.state).available
    }

    pub fn set_available(&self, available: bool) {
        let listeners = {
            let mut state = lock_unpoisoned(&self.state);
            if state.available == available {
                return;
            }
            state.available = available;
            state
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect::<Vec<_>>()
        };
        info!(available, "network availability changed");
        for listener in listeners {
            listener(available);
        }
    }

    pub fn on_availability_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut state = lock_unpoisoned(&self.state);
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id = state.next_listener_id.wrapping_add(1);
        state.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        state.listeners.len() != before
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_unpoisoned(&self.state);
        formatter
            .debug_struct("NetworkMonitor")
            .field("available", &state.available)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SuspensionId(u64);

struct SuspendedState<T> {
    entries: Vec<(SuspensionId, T)>,
    next_id: u64,
}

pub(crate) struct SuspendedRequests<T> {
    state: Mutex<SuspendedState<T>>,
}

impl<T> Default for SuspendedRequests<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SuspendedState {
                entries: Vec::new(),
                next_id: 1,
            }),
        }
    }
}

impl<T> SuspendedRequests<T> {
    pub(crate) fn suspend_if_unavailable<F>(
        &self,
        monitor: &NetworkMonitor,
        entry: T,
        on_suspend: F,
    ) -> Option<T>
    where
        F: FnOnce(SuspensionId, &T),
    {
        // Checked under the list lock so a concurrent drain cannot miss the entry.
        let mut state = lock_unpoisoned(&self.state);
        if monitor.is_available() {
            return Some(entry);
        }
        let id = SuspensionId(state.next_id);
        state.next_id += 1;
        on_suspend(id, &entry);
        state.entries.push((id, entry));
        None
    }

    pub(crate) fn remove(&self, id: SuspensionId) -> Option<T> {
        let mut state = lock_unpoisoned(&self.state);
        let index = state.entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(state.entries.remove(index).1)
    }

    pub(crate) fn take_all(&self) -> Vec<T> {
        let entries = std::mem::take(&mut lock_unpoisoned(&self.state).entries);
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.state).entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{NetworkMonitor, SuspendedRequests};

    #[test]
    fn listeners_fire_only_on_transitions() {
        let monitor = NetworkMonitor::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        monitor.on_availability_changed(move |available| {
            recorder.lock().expect("seen lock").push(available);
        });

        monitor.set_available(true);
        monitor.set_available(false);
        monitor.set_available(false);
        monitor.set_available(true);

        assert_eq!(*seen.lock().expect("seen lock"), vec![false, true]);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let monitor = NetworkMonitor::new(true);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let id = monitor.on_availability_changed(move |_| {
            *counter.lock().expect("calls lock") += 1;
        });

        assert!(monitor.remove_listener(id));
        monitor.set_available(false);

        assert_eq!(*calls.lock().expect("calls lock"), 0);
    }

    #[test]
    fn listener_may_query_the_monitor() {
        let monitor = NetworkMonitor::new(false);
        let observed = Arc::new(Mutex::new(None));
        let (inner, slot) = (monitor.clone(), Arc::clone(&observed));
        monitor.on_availability_changed(move |_| {
            *slot.lock().expect("slot lock") = Some(inner.is_available());
        });

        monitor.set_available(true);

        assert_eq!(*observed.lock().expect("slot lock"), Some(true));
    }

    #[test]
    fn suspension_keeps_fifo_order_and_drains_once() {
        let monitor = NetworkMonitor::new(false);
        let pending = SuspendedRequests::default();

        assert!(pending.suspend_if_unavailable(&monitor, 1, |_, _| {}).is_none());
        assert!(pending.suspend_if_unavailable(&monitor, 2, |_, _| {}).is_none());
        assert_eq!(pending.len(), 2);

        assert_eq!(pending.take_all(), vec![1, 2]);
        assert!(pending.take_all().is_empty());
    }

    #[test]
    fn available_network_hands_entry_back() {
        let monitor = NetworkMonitor::new(true);
        let pending = SuspendedRequests::default();

        assert_eq!(pending.suspend_if_unavailable(&monitor, 7, |_, _| {}), Some(7));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn removed_entry_is_skipped_by_drain() {
        let monitor = NetworkMonitor::new(false);
        let pending = SuspendedRequests::default();
        let mut ids = Vec::new();
        for entry in ["a", "b", "c"] {
            pending.suspend_if_unavailable(&monitor, entry, |id, _| ids.push(id));
        }

        assert_eq!(pending.remove(ids[1]), Some("b"));
        assert_eq!(pending.remove(ids[1]), None);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.take_all(), vec!["a", "c"]);
        assert_eq!(pending.remove(ids[0]), None);
    }
}
