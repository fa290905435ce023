use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::events::InboundEvent;
use super::queue::EventQueue;
use crate::error::{BridgeError, BridgeResult};

pub type Handle = u32;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum ResourceKind {
    MidiInput,
    MidiOutput,
    WebSocket,
    Subscription,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::MidiInput => write!(f, "MIDI input"),
            ResourceKind::MidiOutput => write!(f, "MIDI output"),
            ResourceKind::WebSocket => write!(f, "WebSocket port"),
            ResourceKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// Handle -> record map for one resource kind.
///
/// All access goes through one lock so a producer looking up a record either
/// sees it fully inserted or not at all.
pub struct Registry<R> {
    kind: ResourceKind,
    records: Mutex<BTreeMap<Handle, Arc<R>>>,
}

impl<R> Registry<R> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Inserts the record built by `make` under `hint`, or under the lowest
    /// free handle when no hint is given.
    pub fn allocate<F>(
        &self,
        hint: Option<Handle>,
        make: F,
    ) -> BridgeResult<Arc<R>>
    where
        F: FnOnce(Handle) -> R,
    {
        let mut records = self.records.lock();

        let handle = match hint {
            Some(handle) if records.contains_key(&handle) => {
                return Err(BridgeError::HandleInUse {
                    kind: self.kind,
                    handle,
                });
            }
            Some(handle) => handle,
            None => (0..)
                .find(|handle| !records.contains_key(handle))
                .unwrap_or(Handle::MAX),
        };

        let record = Arc::new(make(handle));
        records.insert(handle, record.clone());
        Ok(record)
    }

    pub fn lookup(&self, handle: Handle) -> BridgeResult<Arc<R>> {
        self.get(handle).ok_or(BridgeError::NotFound {
            kind: self.kind,
            handle,
        })
    }

    pub fn get(&self, handle: Handle) -> Option<Arc<R>> {
        self.records.lock().get(&handle).cloned()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.records.lock().contains_key(&handle)
    }

    pub fn remove(&self, handle: Handle) -> BridgeResult<Arc<R>> {
        self.records
            .lock()
            .remove(&handle)
            .ok_or(BridgeError::NotFound {
                kind: self.kind,
                handle,
            })
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.records.lock().keys().copied().collect()
    }

    pub fn records(&self) -> Vec<Arc<R>> {
        self.records.lock().values().cloned().collect()
    }

    /// Empties the registry and hands back what was in it so the caller can
    /// tear the records down outside the lock.
    pub fn drain(&self) -> Vec<Arc<R>> {
        let mut records = self.records.lock();
        std::mem::take(&mut *records).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// One open device, port or connection: its state machine, the native object
/// driving it, and the queue its producer writes to.
pub struct ResourceRecord<S, N: ?Sized> {
    kind: ResourceKind,
    handle: Handle,
    state: Mutex<S>,
    native: Mutex<Option<Box<N>>>,
    queue: EventQueue<InboundEvent>,
}

impl<S: Copy + PartialEq, N: ?Sized> ResourceRecord<S, N> {
    pub fn new(kind: ResourceKind, handle: Handle, state: S) -> Self {
        Self {
            kind,
            handle,
            state: Mutex::new(state),
            native: Mutex::new(None),
            queue: EventQueue::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn state(&self) -> S {
        *self.state.lock()
    }

    pub fn set_state(&self, state: S) {
        *self.state.lock() = state;
    }

    /// Applies `step` to the current state under the state lock. Returns the
    /// new state if `step` accepted the transition.
    pub fn transition<F>(&self, step: F) -> Option<S>
    where
        F: FnOnce(S) -> Option<S>,
    {
        let mut state = self.state.lock();
        let next = step(*state)?;
        *state = next;
        Some(next)
    }

    pub fn queue(&self) -> &EventQueue<InboundEvent> {
        &self.queue
    }

    /// Installs the native object, returning whatever it replaced.
    pub fn attach(&self, native: Box<N>) -> Option<Box<N>> {
        self.native.lock().replace(native)
    }

    pub fn detach(&self) -> Option<Box<N>> {
        self.native.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.native.lock().is_some()
    }

    pub fn with_native<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut N) -> T,
    {
        self.native.lock().as_deref_mut().map(f)
    }
}

impl<S, N: ?Sized> fmt::Debug for ResourceRecord<S, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestRecord = ResourceRecord<u8, dyn Fn() -> u8 + Send + Sync>;

    fn registry() -> Registry<TestRecord> {
        Registry::new(ResourceKind::WebSocket)
    }

    fn record(handle: Handle) -> TestRecord {
        ResourceRecord::new(ResourceKind::WebSocket, handle, 0)
    }

    #[test]
    fn allocate_with_hint_uses_it() {
        let registry = registry();
        let record = registry.allocate(Some(7), record).unwrap();
        assert_eq!(record.handle(), 7);
        assert!(registry.contains(7));
    }

    #[test]
    fn allocate_without_hint_picks_lowest_free() {
        let registry = registry();
        registry.allocate(Some(0), record).unwrap();
        registry.allocate(Some(2), record).unwrap();
        let record = registry.allocate(None, record).unwrap();
        assert_eq!(record.handle(), 1);
        assert_eq!(registry.handles(), vec![0, 1, 2]);
    }

    #[test]
    fn live_handle_cannot_be_allocated_twice() {
        let registry = registry();
        registry.allocate(Some(3), record).unwrap();
        let err = registry.allocate(Some(3), record).unwrap_err();
        assert_eq!(
            err,
            BridgeError::HandleInUse {
                kind: ResourceKind::WebSocket,
                handle: 3
            }
        );
    }

    #[test]
    fn removed_handle_is_reusable() {
        let registry = registry();
        registry.allocate(Some(3), record).unwrap();
        registry.remove(3).unwrap();
        assert!(registry.allocate(Some(3), record).is_ok());
    }

    #[test]
    fn removing_unknown_handle_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.remove(9),
            Err(BridgeError::NotFound { handle: 9, .. })
        ));
        assert!(registry.lookup(9).is_err());
    }

    #[test]
    fn drain_empties_registry() {
        let registry = registry();
        registry.allocate(Some(1), record).unwrap();
        registry.allocate(Some(4), record).unwrap();
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn transition_only_applies_accepted_steps() {
        let record = record(0);
        assert_eq!(record.transition(|s| (s == 0).then_some(1)), Some(1));
        assert_eq!(record.transition(|s| (s == 0).then_some(2)), None);
        assert_eq!(record.state(), 1);
    }

    #[test]
    fn attach_replaces_previous_native() {
        let record = record(0);
        assert!(record.attach(Box::new(|| 1)).is_none());
        let previous = record.attach(Box::new(|| 2)).unwrap();
        assert_eq!(previous(), 1);
        assert_eq!(record.with_native(|native| native()), Some(2));
        assert!(record.detach().is_some());
        assert!(!record.is_attached());
    }
}
