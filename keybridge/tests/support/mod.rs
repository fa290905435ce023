#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use keybridge::config::BridgeConfig;
use keybridge::error::{BridgeError, BridgeResult};
use keybridge::midi::{
    MidiBackend, MidiDevices, MidiInputLink, MidiOutputLink, MidiProducer,
};
use keybridge::pubsub::{PubSubConnection, PubSubProducer, PubSubTransport};
use keybridge::runtime::events::{NativeFrame, NativeMessage};
use keybridge::runtime::registry::Handle;
use keybridge::websocket::{PortProducer, SocketConnection, SocketTransport};
use keybridge::Bridge;

/// MIDI devices that exist only in memory. Tests play the hardware by
/// calling [`FakeMidi::inject`].
#[derive(Clone, Default)]
pub struct FakeMidi {
    devices: MidiDevices,
    producers: Arc<Mutex<Vec<(usize, MidiProducer)>>>,
    sent: Arc<Mutex<Vec<(usize, Vec<u8>)>>>,
}

impl FakeMidi {
    pub fn with_inputs(names: &[&str]) -> Self {
        Self {
            devices: MidiDevices {
                inputs: names.iter().map(|name| name.to_string()).collect(),
                outputs: vec!["Fake Out".to_string()],
            },
            ..Default::default()
        }
    }

    /// Delivers to the most recent connection of input `index`.
    pub fn inject(&self, index: usize, bytes: &[u8]) {
        let producers = self.producers.lock().unwrap();
        if let Some((_, producer)) =
            producers.iter().rev().find(|(i, _)| *i == index)
        {
            producer.message(bytes);
        }
    }

    pub fn sent(&self) -> Vec<(usize, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

struct FakeInput;

impl MidiInputLink for FakeInput {
    fn close(self: Box<Self>) {}
}

struct FakeOutput {
    index: usize,
    sent: Arc<Mutex<Vec<(usize, Vec<u8>)>>>,
}

impl MidiOutputLink for FakeOutput {
    fn send(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.sent.lock().unwrap().push((self.index, bytes.to_vec()));
        Ok(())
    }
}

impl MidiBackend for FakeMidi {
    fn enumerate(&self) -> BridgeResult<MidiDevices> {
        Ok(self.devices.clone())
    }

    fn connect_input(
        &self,
        index: usize,
        _name: &str,
        producer: MidiProducer,
    ) -> BridgeResult<Box<dyn MidiInputLink>> {
        self.producers.lock().unwrap().push((index, producer));
        Ok(Box::new(FakeInput))
    }

    fn connect_output(
        &self,
        index: usize,
        _name: &str,
    ) -> BridgeResult<Box<dyn MidiOutputLink>> {
        Ok(Box::new(FakeOutput {
            index,
            sent: self.sent.clone(),
        }))
    }
}

/// Socket transport whose peer is the test: it decides when a port opens,
/// what frames arrive and when the peer goes away.
#[derive(Clone, Default)]
pub struct FakeSockets {
    producers: Arc<Mutex<Vec<PortProducer>>>,
    sent: Arc<Mutex<Vec<(Handle, Vec<u8>)>>>,
}

impl FakeSockets {
    fn producer(&self, port: Handle) -> PortProducer {
        self.producers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|producer| producer.port() == port)
            .cloned()
            .expect("port was never connected")
    }

    pub fn open(&self, port: Handle) {
        self.producer(port).opened();
    }

    pub fn text(&self, port: Handle, text: &str) {
        self.producer(port).frame(NativeFrame::Text(text.to_string()));
    }

    pub fn binary(&self, port: Handle, bytes: &[u8]) {
        self.producer(port).frame(NativeFrame::Binary(bytes.to_vec()));
    }

    pub fn fail(&self, port: Handle) {
        self.producer(port).error("connection reset");
    }

    pub fn hang_up(&self, port: Handle) {
        self.producer(port).closed();
    }

    pub fn sent(&self, port: Handle) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }
}

struct FakeSocket {
    port: Handle,
    sent: Arc<Mutex<Vec<(Handle, Vec<u8>)>>>,
}

impl SocketConnection for FakeSocket {
    fn send(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.sent.lock().unwrap().push((self.port, bytes.to_vec()));
        Ok(())
    }

    fn close(self: Box<Self>) {}
}

impl SocketTransport for FakeSockets {
    fn connect(
        &self,
        url: &str,
        producer: PortProducer,
    ) -> BridgeResult<Box<dyn SocketConnection>> {
        if !url.starts_with("ws://") {
            return Err(BridgeError::Transport(format!("bad url {}", url)));
        }
        let port = producer.port();
        self.producers.lock().unwrap().push(producer);
        Ok(Box::new(FakeSocket {
            port,
            sent: self.sent.clone(),
        }))
    }
}

/// A broker shared by every bridge built on it. Publishing fans out to all
/// live connections, the publisher's own included.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    peers: Arc<Mutex<Vec<(u64, PubSubProducer)>>>,
    next_id: Arc<Mutex<u64>>,
    /// When false, connections stay Connecting until [`ready_all`] runs.
    ///
    /// [`ready_all`]: MemoryBroker::ready_all
    pub manual_ready: bool,
}

impl MemoryBroker {
    pub fn manual() -> Self {
        Self {
            manual_ready: true,
            ..Default::default()
        }
    }

    pub fn ready_all(&self) {
        for (_, producer) in self.peers.lock().unwrap().iter() {
            producer.connected();
        }
    }

    pub fn inject(&self, subject: &str, payload: &[u8]) {
        let peers = self.peers.lock().unwrap().clone();
        for (_, producer) in peers {
            producer.message(NativeMessage::new(subject, payload.to_vec()));
        }
    }

    pub fn fail_all(&self) {
        let peers = std::mem::take(&mut *self.peers.lock().unwrap());
        for (_, producer) in peers {
            producer.failed("broker went away");
        }
    }
}

struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
}

impl PubSubConnection for MemoryConnection {
    fn publish(&mut self, subject: &str, payload: &[u8]) -> BridgeResult<()> {
        self.broker.inject(subject, payload);
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.broker
            .peers
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != self.id);
    }
}

impl PubSubTransport for MemoryBroker {
    fn connect(
        &self,
        _url: &str,
        producer: PubSubProducer,
    ) -> BridgeResult<Box<dyn PubSubConnection>> {
        let id = {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            *next_id
        };

        if !self.manual_ready {
            producer.connected();
        }
        self.peers.lock().unwrap().push((id, producer));

        Ok(Box::new(MemoryConnection {
            id,
            broker: self.clone(),
        }))
    }
}

pub struct Harness {
    pub bridge: Bridge,
    pub midi: FakeMidi,
    pub sockets: FakeSockets,
    pub broker: MemoryBroker,
}

pub fn harness_with(midi: FakeMidi, broker: MemoryBroker) -> Harness {
    let sockets = FakeSockets::default();
    let bridge = Bridge::new(
        BridgeConfig::default(),
        Box::new(midi.clone()),
        Box::new(sockets.clone()),
        Box::new(broker.clone()),
    )
    .expect("default config is valid");

    Harness {
        bridge,
        midi,
        sockets,
        broker,
    }
}

pub fn harness() -> Harness {
    harness_with(
        FakeMidi::with_inputs(&["Fake In A", "Fake In B"]),
        MemoryBroker::default(),
    )
}

/// Polls `f` until it returns `Some` or `timeout` passes.
pub fn wait_for<T>(
    timeout: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> Option<T> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(value) = f() {
            return Some(value);
        }
        thread::sleep(Duration::from_millis(5));
    }
    None
}
