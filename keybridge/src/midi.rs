//! MIDI inputs and outputs. Handles are enumeration indices, valid for one
//! enumeration pass; [`MidiHub::refresh`] starts a new pass and closes
//! everything opened under the previous one.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};
use crate::framework::prelude::*;
use crate::runtime::callback::CallbackBridge;
use crate::runtime::events::{InboundEvent, MidiMessage};
use crate::runtime::registry::{Handle, Registry, ResourceKind, ResourceRecord};
use crate::runtime::state::{MidiInputState, MidiOutputState};

/// Device names from one enumeration pass, indexed by handle.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MidiDevices {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// A live input connection. Dropping or closing it detaches the callback.
pub trait MidiInputLink: Send {
    fn close(self: Box<Self>);
}

pub trait MidiOutputLink: Send {
    fn send(&mut self, bytes: &[u8]) -> BridgeResult<()>;

    fn close(self: Box<Self>) {}
}

/// Native MIDI access. `name` is the device name the index had in the current
/// enumeration pass, so backends can notice a reshuffled device list.
pub trait MidiBackend: Send + Sync {
    fn enumerate(&self) -> BridgeResult<MidiDevices>;

    fn connect_input(
        &self,
        index: usize,
        name: &str,
        producer: MidiProducer,
    ) -> BridgeResult<Box<dyn MidiInputLink>>;

    fn connect_output(
        &self,
        index: usize,
        name: &str,
    ) -> BridgeResult<Box<dyn MidiOutputLink>>;
}

pub type MidiInputRecord = ResourceRecord<MidiInputState, dyn MidiInputLink>;
pub type MidiOutputRecord = ResourceRecord<MidiOutputState, dyn MidiOutputLink>;

/// Handed to the backend when an input is opened; call [`message`] from the
/// device's callback.
///
/// [`message`]: MidiProducer::message
#[derive(Clone)]
pub struct MidiProducer {
    record: Arc<MidiInputRecord>,
    callbacks: CallbackBridge,
}

impl MidiProducer {
    fn new(record: Arc<MidiInputRecord>, callbacks: CallbackBridge) -> Self {
        Self { record, callbacks }
    }

    pub fn device(&self) -> Handle {
        self.record.handle()
    }

    pub fn message(&self, bytes: &[u8]) {
        if self.record.state() != MidiInputState::Open {
            trace!("MIDI input {} is closed; dropping message", self.device());
            return;
        }

        match MidiMessage::decode(self.device(), bytes) {
            Ok(message) => {
                self.callbacks
                    .deliver(self.record.queue(), InboundEvent::Midi(message));
            }
            Err(err) => {
                warn!(
                    "dropping message from MIDI input {}: {}",
                    self.device(),
                    err
                );
            }
        }
    }
}

pub struct MidiHub {
    backend: Box<dyn MidiBackend>,
    devices: RwLock<Option<MidiDevices>>,
    inputs: Registry<MidiInputRecord>,
    outputs: Registry<MidiOutputRecord>,
    callbacks: CallbackBridge,
}

impl MidiHub {
    pub fn new(backend: Box<dyn MidiBackend>, callbacks: CallbackBridge) -> Self {
        Self {
            backend,
            devices: RwLock::new(None),
            inputs: Registry::new(ResourceKind::MidiInput),
            outputs: Registry::new(ResourceKind::MidiOutput),
            callbacks,
        }
    }

    /// Current enumeration pass, enumerating on first use.
    pub fn devices(&self) -> BridgeResult<MidiDevices> {
        if let Some(devices) = self.devices.read().as_ref() {
            return Ok(devices.clone());
        }
        self.refresh()
    }

    pub fn refresh(&self) -> BridgeResult<MidiDevices> {
        let devices = self.backend.enumerate()?;

        self.close_all();

        info!(
            "MIDI devices: {} inputs, {} outputs",
            devices.inputs.len(),
            devices.outputs.len()
        );
        for (index, name) in devices.inputs.iter().enumerate() {
            debug!("  MIDI input {}: {}", index, name);
        }
        for (index, name) in devices.outputs.iter().enumerate() {
            debug!("  MIDI output {}: {}", index, name);
        }

        *self.devices.write() = Some(devices.clone());
        Ok(devices)
    }

    fn input_name(&self, index: usize) -> BridgeResult<String> {
        let devices = self.devices()?;
        devices.inputs.get(index).cloned().ok_or(BridgeError::InvalidIndex {
            kind: ResourceKind::MidiInput,
            index,
            available: devices.inputs.len(),
        })
    }

    fn output_name(&self, index: usize) -> BridgeResult<String> {
        let devices = self.devices()?;
        devices.outputs.get(index).cloned().ok_or(BridgeError::InvalidIndex {
            kind: ResourceKind::MidiOutput,
            index,
            available: devices.outputs.len(),
        })
    }

    /// Opens input `index` and returns its handle. Opening an input that is
    /// already open re-attaches the callback and keeps its queue.
    pub fn open_input(&self, index: usize) -> BridgeResult<Handle> {
        let name = self.input_name(index)?;
        let handle = to_handle(ResourceKind::MidiInput, index)?;

        let record = match self.inputs.get(handle) {
            Some(record) => {
                info!("Re-attaching MIDI input {} ({})", index, name);
                if let Some(previous) = record.detach() {
                    previous.close();
                }
                record
            }
            None => self.inputs.allocate(Some(handle), |handle| {
                ResourceRecord::new(
                    ResourceKind::MidiInput,
                    handle,
                    MidiInputState::Closed,
                )
            })?,
        };

        record.set_state(MidiInputState::Open);

        let producer = MidiProducer::new(record.clone(), self.callbacks.clone());

        match self.backend.connect_input(index, &name, producer) {
            Ok(link) => {
                record.attach(link);
                info!("Opened MIDI input {} ({})", index, name);
                Ok(handle)
            }
            Err(err) => {
                record.set_state(MidiInputState::Closed);
                record.queue().close();
                let _ = self.inputs.remove(handle);
                Err(err)
            }
        }
    }

    /// Idempotent: closing an input that isn't open succeeds.
    pub fn close_input(&self, handle: Handle) -> BridgeResult<()> {
        let Ok(record) = self.inputs.remove(handle) else {
            trace!("MIDI input {} already closed", handle);
            return Ok(());
        };

        record.set_state(MidiInputState::Closed);
        let dropped = record.queue().close();
        if let Some(link) = record.detach() {
            link.close();
        }

        info!(
            "Closed MIDI input {} ({} undelivered messages dropped)",
            handle, dropped
        );
        Ok(())
    }

    pub fn input_state(&self, handle: Handle) -> MidiInputState {
        self.inputs
            .get(handle)
            .map(|record| record.state())
            .unwrap_or_default()
    }

    pub fn open_inputs(&self) -> Vec<Handle> {
        self.inputs.handles()
    }

    pub fn poll(&self, handle: Handle) -> Option<InboundEvent> {
        self.inputs.get(handle)?.queue().drain()
    }

    pub fn has_data(&self, handle: Handle) -> bool {
        self.inputs
            .get(handle)
            .is_some_and(|record| record.queue().has_data())
    }

    pub fn open_output(&self, index: usize) -> BridgeResult<Handle> {
        let name = self.output_name(index)?;
        let handle = to_handle(ResourceKind::MidiOutput, index)?;

        if self.outputs.contains(handle) {
            debug!("MIDI output {} already open", index);
            return Ok(handle);
        }

        let link = self.backend.connect_output(index, &name)?;
        let record = self.outputs.allocate(Some(handle), |handle| {
            ResourceRecord::new(
                ResourceKind::MidiOutput,
                handle,
                MidiOutputState::Open,
            )
        })?;
        record.attach(link);

        info!("Opened MIDI output {} ({})", index, name);
        Ok(handle)
    }

    pub fn close_output(&self, handle: Handle) -> BridgeResult<()> {
        let Ok(record) = self.outputs.remove(handle) else {
            return Ok(());
        };

        record.set_state(MidiOutputState::Closed);
        if let Some(link) = record.detach() {
            link.close();
        }

        info!("Closed MIDI output {}", handle);
        Ok(())
    }

    pub fn output_state(&self, handle: Handle) -> MidiOutputState {
        self.outputs
            .get(handle)
            .map(|record| record.state())
            .unwrap_or_default()
    }

    /// Fire-and-forget: success means the bytes were handed to the device.
    pub fn send(&self, index: usize, bytes: &[u8]) -> BridgeResult<usize> {
        self.output_name(index)?;
        let handle = to_handle(ResourceKind::MidiOutput, index)?;

        let record = self.outputs.get(handle).ok_or_else(|| {
            BridgeError::NotConnected(format!("MIDI output {}", index))
        })?;

        record
            .with_native(|link| link.send(bytes))
            .unwrap_or_else(|| {
                Err(BridgeError::NotConnected(format!("MIDI output {}", index)))
            })?;

        trace!("Sent {} bytes to MIDI output {}", bytes.len(), index);
        Ok(bytes.len())
    }

    pub fn close_all(&self) {
        for record in self.inputs.drain() {
            record.set_state(MidiInputState::Closed);
            record.queue().close();
            if let Some(link) = record.detach() {
                link.close();
            }
        }

        for record in self.outputs.drain() {
            record.set_state(MidiOutputState::Closed);
            if let Some(link) = record.detach() {
                link.close();
            }
        }
    }
}

fn to_handle(kind: ResourceKind, index: usize) -> BridgeResult<Handle> {
    Handle::try_from(index).map_err(|_| BridgeError::InvalidIndex {
        kind,
        index,
        available: 0,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    type Sent = Arc<Mutex<Vec<Vec<u8>>>>;
    type Producers = Arc<Mutex<Vec<MidiProducer>>>;

    struct FakeBackend {
        devices: MidiDevices,
        producers: Producers,
        sent: Sent,
    }

    struct FakeInput;

    impl MidiInputLink for FakeInput {
        fn close(self: Box<Self>) {}
    }

    struct FakeOutput(Sent);

    impl MidiOutputLink for FakeOutput {
        fn send(&mut self, bytes: &[u8]) -> BridgeResult<()> {
            self.0.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    impl MidiBackend for FakeBackend {
        fn enumerate(&self) -> BridgeResult<MidiDevices> {
            Ok(self.devices.clone())
        }

        fn connect_input(
            &self,
            _index: usize,
            _name: &str,
            producer: MidiProducer,
        ) -> BridgeResult<Box<dyn MidiInputLink>> {
            self.producers.lock().unwrap().push(producer);
            Ok(Box::new(FakeInput))
        }

        fn connect_output(
            &self,
            _index: usize,
            _name: &str,
        ) -> BridgeResult<Box<dyn MidiOutputLink>> {
            Ok(Box::new(FakeOutput(self.sent.clone())))
        }
    }

    fn hub() -> (MidiHub, Producers, Sent) {
        let producers = Producers::default();
        let sent = Sent::default();
        let backend = FakeBackend {
            devices: MidiDevices {
                inputs: vec!["Keys".into(), "Pads".into()],
                outputs: vec!["Synth".into()],
            },
            producers: producers.clone(),
            sent: sent.clone(),
        };
        (
            MidiHub::new(Box::new(backend), CallbackBridge::new()),
            producers,
            sent,
        )
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let (hub, _, _) = hub();
        assert_eq!(
            hub.open_input(2),
            Err(BridgeError::InvalidIndex {
                kind: ResourceKind::MidiInput,
                index: 2,
                available: 2
            })
        );
    }

    #[test]
    fn reopening_reattaches_and_keeps_queue() {
        let (hub, producers, _) = hub();
        assert_eq!(hub.open_input(1), Ok(1));
        producers.lock().unwrap()[0].message(&[0x90, 60, 100]);

        assert_eq!(hub.open_input(1), Ok(1));
        producers.lock().unwrap()[1].message(&[0x80, 60, 0]);

        assert_eq!(hub.open_inputs(), vec![1]);
        assert!(matches!(
            hub.poll(1),
            Some(InboundEvent::Midi(MidiMessage { status: 0x90, .. }))
        ));
        assert!(matches!(
            hub.poll(1),
            Some(InboundEvent::Midi(MidiMessage { status: 0x80, .. }))
        ));
    }

    #[test]
    fn late_messages_after_close_are_dropped() {
        let (hub, producers, _) = hub();
        hub.open_input(0).unwrap();
        let producer = producers.lock().unwrap()[0].clone();

        hub.close_input(0).unwrap();
        producer.message(&[0x90, 60, 100]);

        assert_eq!(hub.input_state(0), MidiInputState::Closed);
        assert_eq!(hub.poll(0), None);
        assert!(hub.close_input(0).is_ok());
    }

    #[test]
    fn malformed_messages_are_not_queued() {
        let (hub, producers, _) = hub();
        hub.open_input(0).unwrap();
        producers.lock().unwrap()[0].message(&[0x90, 60]);
        assert!(!hub.has_data(0));
    }

    #[test]
    fn send_requires_open_output() {
        let (hub, _, sent) = hub();
        assert!(matches!(
            hub.send(0, &[0x90, 60, 100]),
            Err(BridgeError::NotConnected(_))
        ));
        assert!(sent.lock().unwrap().is_empty());

        hub.open_output(0).unwrap();
        assert_eq!(hub.send(0, &[0x90, 60, 100]), Ok(3));
        assert_eq!(*sent.lock().unwrap(), vec![vec![0x90, 60, 100]]);

        assert!(matches!(
            hub.send(5, &[0xF8]),
            Err(BridgeError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn refresh_closes_previous_pass() {
        let (hub, _, _) = hub();
        hub.open_input(0).unwrap();
        hub.open_output(0).unwrap();

        hub.refresh().unwrap();

        assert!(hub.open_inputs().is_empty());
        assert_eq!(hub.output_state(0), MidiOutputState::Closed);
    }
}
