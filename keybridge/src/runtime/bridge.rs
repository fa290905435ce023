//! The context object every consumer call goes through. One `Bridge` owns the
//! input snapshot, the per-kind hubs and the notifier they share; nothing in
//! the crate is process global.

use std::sync::Arc;

use super::callback::{CallbackBridge, Notifier};
use super::events::InboundEvent;
use super::registry::{Handle, ResourceKind};
use super::state::{MidiInputState, PortState, PubSubState};
use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::framework::midi::MidirBackend;
use crate::framework::osc::OscTransport;
use crate::framework::prelude::*;
use crate::framework::websocket::TungsteniteTransport;
use crate::input::{InputProducer, InputState, MouseState};
use crate::midi::{MidiBackend, MidiDevices, MidiHub};
use crate::pubsub::{PubSubHub, PubSubTransport, SubjectPattern};
use crate::surface::SurfaceSlot;
use crate::websocket::{PortHub, SocketTransport};

pub struct Bridge {
    config: BridgeConfig,
    callbacks: CallbackBridge,
    input: Arc<InputState>,
    midi: MidiHub,
    ports: PortHub,
    pubsub: PubSubHub,
    surface: SurfaceSlot,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        midi: Box<dyn MidiBackend>,
        sockets: Box<dyn SocketTransport>,
        pubsub: Box<dyn PubSubTransport>,
    ) -> BridgeResult<Self> {
        let default_pattern =
            SubjectPattern::parse(&config.pubsub.default_subject)?;
        let callbacks = CallbackBridge::new();

        Ok(Self {
            midi: MidiHub::new(midi, callbacks.clone()),
            ports: PortHub::new(sockets, callbacks.clone()),
            pubsub: PubSubHub::new(pubsub, default_pattern, callbacks.clone()),
            input: Arc::new(InputState::default()),
            surface: SurfaceSlot::new(),
            callbacks,
            config,
        })
    }

    /// midir for MIDI, tungstenite for WebSocket ports, OSC for pub/sub.
    pub fn native(config: BridgeConfig) -> BridgeResult<Self> {
        let midi = MidirBackend::new(&config.midi.client_name);
        let sockets = TungsteniteTransport::new(config.websocket.read_poll());
        let pubsub = OscTransport::new(
            &config.pubsub.bind_host,
            config.pubsub.listen_port,
        );

        Self::new(config, Box::new(midi), Box::new(sockets), Box::new(pubsub))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn attach_notifier(&self, notifier: Notifier) -> Option<Arc<Notifier>> {
        self.callbacks.attach(notifier)
    }

    pub fn detach_notifier(&self) -> Option<Arc<Notifier>> {
        self.callbacks.detach()
    }

    pub fn notification_failures(&self) -> u64 {
        self.callbacks.failures()
    }

    pub fn skipped_notifications(&self) -> u64 {
        self.callbacks.skipped()
    }

    pub fn surface(&self) -> &SurfaceSlot {
        &self.surface
    }

    // --- Input

    /// Handle for the host's pointer and keyboard callbacks.
    pub fn input_producer(&self) -> InputProducer {
        InputProducer::new(self.input.clone(), self.callbacks.clone())
    }

    pub fn mouse_state(&self) -> MouseState {
        self.input.mouse()
    }

    pub fn get_key(&self) -> Option<u32> {
        self.input.get_key()
    }

    pub fn has_key(&self) -> bool {
        self.input.has_key()
    }

    pub fn poll_input(&self) -> Option<InboundEvent> {
        self.input.events().drain()
    }

    pub fn has_input(&self) -> bool {
        self.input.events().has_data()
    }

    // --- MIDI

    pub fn midi_devices(&self) -> BridgeResult<MidiDevices> {
        self.midi.devices()
    }

    pub fn midi_inputs(&self) -> BridgeResult<Vec<String>> {
        Ok(self.midi.devices()?.inputs)
    }

    pub fn midi_outputs(&self) -> BridgeResult<Vec<String>> {
        Ok(self.midi.devices()?.outputs)
    }

    /// Re-enumerates; every MIDI handle from the previous pass is closed.
    pub fn refresh_midi(&self) -> BridgeResult<MidiDevices> {
        self.midi.refresh()
    }

    pub fn open_midi_input(&self, index: usize) -> BridgeResult<Handle> {
        self.midi.open_input(index)
    }

    pub fn close_midi_input(&self, handle: Handle) -> BridgeResult<()> {
        self.midi.close_input(handle)
    }

    pub fn midi_input_state(&self, handle: Handle) -> MidiInputState {
        self.midi.input_state(handle)
    }

    pub fn poll_midi(&self, handle: Handle) -> Option<InboundEvent> {
        self.midi.poll(handle)
    }

    pub fn open_midi_output(&self, index: usize) -> BridgeResult<Handle> {
        self.midi.open_output(index)
    }

    pub fn close_midi_output(&self, handle: Handle) -> BridgeResult<()> {
        self.midi.close_output(handle)
    }

    pub fn send_midi(&self, index: usize, bytes: &[u8]) -> BridgeResult<usize> {
        self.midi.send(index, bytes)
    }

    // --- WebSocket

    pub fn connect_websocket(&self, handle: Handle, url: &str) -> BridgeResult<()> {
        self.ports.connect(handle, url)
    }

    pub fn send_websocket(
        &self,
        handle: Handle,
        bytes: &[u8],
    ) -> BridgeResult<usize> {
        self.ports.send(handle, bytes)
    }

    pub fn websocket_state(&self, handle: Handle) -> BridgeResult<PortState> {
        self.ports.state(handle)
    }

    /// 0 unknown, 1 connecting, 2 connected, 3 closing, 4 closed, 5 error.
    pub fn websocket_state_code(&self, handle: Handle) -> i32 {
        self.ports.state_code(handle)
    }

    pub fn poll_websocket(&self, handle: Handle) -> Option<InboundEvent> {
        self.ports.poll(handle)
    }

    pub fn receive_websocket(&self, handle: Handle, buf: &mut [u8]) -> usize {
        self.ports.receive_into(handle, buf)
    }

    pub fn close_websocket(&self, handle: Handle) -> BridgeResult<()> {
        self.ports.close(handle)
    }

    // --- Pub/sub

    pub fn connect_pubsub(&self, url: &str) -> BridgeResult<()> {
        self.pubsub.connect(url)
    }

    pub fn pubsub_state(&self) -> PubSubState {
        self.pubsub.state()
    }

    pub fn publish(&self, subject: &str, payload: &[u8]) -> BridgeResult<()> {
        self.pubsub.publish(subject, payload)
    }

    pub fn subscribe(&self, handle: Handle, subject: &str) -> BridgeResult<()> {
        self.pubsub.subscribe(handle, subject)
    }

    pub fn unsubscribe(&self, handle: Handle) -> BridgeResult<()> {
        self.pubsub.unsubscribe(handle)
    }

    /// Next message on the default subscription.
    pub fn poll_pubsub(&self) -> Option<InboundEvent> {
        self.pubsub.poll_default()
    }

    pub fn has_pubsub_data(&self) -> bool {
        self.pubsub.has_default_data()
    }

    pub fn pubsub_close(&self) {
        self.pubsub.close();
    }

    // --- Generic by kind

    /// Idempotent for every kind.
    pub fn close(&self, kind: ResourceKind, handle: Handle) -> BridgeResult<()> {
        match kind {
            ResourceKind::MidiInput => self.midi.close_input(handle),
            ResourceKind::MidiOutput => self.midi.close_output(handle),
            ResourceKind::WebSocket => self.ports.close(handle),
            ResourceKind::Subscription => self.pubsub.unsubscribe(handle),
        }
    }

    /// MIDI outputs never have inbound data.
    pub fn poll(&self, kind: ResourceKind, handle: Handle) -> Option<InboundEvent> {
        match kind {
            ResourceKind::MidiInput => self.midi.poll(handle),
            ResourceKind::MidiOutput => None,
            ResourceKind::WebSocket => self.ports.poll(handle),
            ResourceKind::Subscription => self.pubsub.poll(handle),
        }
    }

    pub fn has_data(&self, kind: ResourceKind, handle: Handle) -> bool {
        match kind {
            ResourceKind::MidiInput => self.midi.has_data(handle),
            ResourceKind::MidiOutput => false,
            ResourceKind::WebSocket => self.ports.has_data(handle),
            ResourceKind::Subscription => self.pubsub.has_data(handle),
        }
    }

    /// Closes every resource. Also runs on drop.
    pub fn shutdown(&self) {
        debug!("Shutting down bridge");
        self.pubsub.close();
        self.ports.close_all();
        self.midi.close_all();
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::error::BridgeError;
    use crate::input::KeyInput;
    use crate::midi::{MidiInputLink, MidiOutputLink, MidiProducer};
    use crate::pubsub::{PubSubConnection, PubSubProducer};
    use crate::runtime::callback::Notification;
    use crate::websocket::{PortProducer, SocketConnection};

    struct NoMidi;

    impl MidiBackend for NoMidi {
        fn enumerate(&self) -> BridgeResult<MidiDevices> {
            Ok(MidiDevices::default())
        }

        fn connect_input(
            &self,
            index: usize,
            _name: &str,
            _producer: MidiProducer,
        ) -> BridgeResult<Box<dyn MidiInputLink>> {
            Err(BridgeError::Transport(format!("no input {}", index)))
        }

        fn connect_output(
            &self,
            index: usize,
            _name: &str,
        ) -> BridgeResult<Box<dyn MidiOutputLink>> {
            Err(BridgeError::Transport(format!("no output {}", index)))
        }
    }

    struct NoSockets;

    impl SocketTransport for NoSockets {
        fn connect(
            &self,
            url: &str,
            _producer: PortProducer,
        ) -> BridgeResult<Box<dyn SocketConnection>> {
            Err(BridgeError::Transport(format!("unreachable {}", url)))
        }
    }

    struct NoPubSub;

    impl PubSubTransport for NoPubSub {
        fn connect(
            &self,
            url: &str,
            _producer: PubSubProducer,
        ) -> BridgeResult<Box<dyn PubSubConnection>> {
            Err(BridgeError::Transport(format!("unreachable {}", url)))
        }
    }

    fn bridge() -> Bridge {
        Bridge::new(
            BridgeConfig::default(),
            Box::new(NoMidi),
            Box::new(NoSockets),
            Box::new(NoPubSub),
        )
        .unwrap()
    }

    #[test]
    fn rejects_malformed_default_subject() {
        let mut config = BridgeConfig::default();
        config.pubsub.default_subject = "keykit..>".to_string();
        let result = Bridge::new(
            config,
            Box::new(NoMidi),
            Box::new(NoSockets),
            Box::new(NoPubSub),
        );
        assert!(matches!(result, Err(BridgeError::InvalidSubject(_))));
    }

    #[test]
    fn mouse_snapshot_follows_events() {
        let bridge = bridge();
        let input = bridge.input_producer();
        input.mouse_move(10.0, 20.0);
        input.mouse_button(true, 12.4, 22.9, 0);

        assert_eq!(
            bridge.mouse_state(),
            MouseState {
                x: 12,
                y: 22,
                buttons: 1
            }
        );
        assert_eq!(
            bridge.poll_input(),
            Some(InboundEvent::MouseMove { x: 10, y: 20 })
        );
        assert_eq!(
            bridge.poll_input(),
            Some(InboundEvent::MouseButton {
                pressed: true,
                x: 12,
                y: 22,
                button_mask: 1
            })
        );
    }

    #[test]
    fn notifier_sees_input_events() {
        let bridge = bridge();
        let (notifier, rx) = Notifier::channel();
        bridge.attach_notifier(notifier);

        let input = bridge.input_producer();
        input.key(&KeyInput::down("Shift", 16));
        input.key(&KeyInput::down("a", 65));

        assert_eq!(bridge.get_key(), Some('a' as u32));
        assert!(!bridge.has_key());
        assert!(matches!(
            rx.try_recv(),
            Ok(Notification::Event(InboundEvent::Key(ref key))) if key.code == 'a' as u32
        ));
        assert_eq!(rx.try_recv(), Err(mpsc::TryRecvError::Empty));
    }

    #[test]
    fn failed_opens_surface_errors() {
        let bridge = bridge();
        assert!(matches!(
            bridge.open_midi_input(0),
            Err(BridgeError::InvalidIndex { .. })
        ));
        assert!(matches!(
            bridge.connect_websocket(1, "ws://x"),
            Err(BridgeError::Transport(_))
        ));
        assert!(bridge.connect_pubsub("osc://x").is_err());
        assert_eq!(bridge.pubsub_state(), PubSubState::Disconnected);
    }

    #[test]
    fn generic_close_is_idempotent() {
        let bridge = bridge();
        for kind in [
            ResourceKind::MidiInput,
            ResourceKind::MidiOutput,
            ResourceKind::WebSocket,
            ResourceKind::Subscription,
        ] {
            assert!(bridge.close(kind, 3).is_ok());
            assert!(bridge.close(kind, 3).is_ok());
            assert_eq!(bridge.poll(kind, 3), None);
            assert!(!bridge.has_data(kind, 3));
        }
    }
}
