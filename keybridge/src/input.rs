//! Pointer and keyboard input: the mouse snapshot, the raw key buffer for
//! polling consumers, and the queue of key/mouse events.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::framework::prelude::*;
use crate::runtime::callback::CallbackBridge;
use crate::runtime::events::{InboundEvent, KeyEvent};
use crate::runtime::queue::EventQueue;

/// Keys that are swallowed before decoding. They never reach the key buffer,
/// the event queue or the consumer.
pub const SUPPRESSED_KEYS: [&str; 8] = [
    "Shift",
    "Control",
    "Alt",
    "Meta",
    "CapsLock",
    "Tab",
    "NumLock",
    "ScrollLock",
];

pub fn is_suppressed_key(key: &str) -> bool {
    SUPPRESSED_KEYS.contains(&key)
}

/// A key-down or key-up as reported by the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyInput {
    pub pressed: bool,
    /// Key identifier, e.g. `"a"`, `"A"`, `"Enter"`, `"Shift"`.
    pub key: String,
    /// Legacy numeric key code for keys without a printable identifier.
    pub legacy_code: u32,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

impl KeyInput {
    pub fn down(key: impl Into<String>, legacy_code: u32) -> Self {
        Self {
            pressed: true,
            key: key.into(),
            legacy_code,
            ctrl: false,
            shift: false,
            alt: false,
        }
    }

    pub fn up(key: impl Into<String>, legacy_code: u32) -> Self {
        Self {
            pressed: false,
            ..Self::down(key, legacy_code)
        }
    }

    pub fn with_modifiers(mut self, ctrl: bool, shift: bool, alt: bool) -> Self {
        self.ctrl = ctrl;
        self.shift = shift;
        self.alt = alt;
        self
    }

    /// Code point for single-character identifiers (so case follows
    /// Shift/CapsLock), the legacy code otherwise.
    pub fn code(&self) -> u32 {
        let mut chars = self.key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c as u32,
            _ => self.legacy_code,
        }
    }
}

/// Whether the host should let its default key handling run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyDisposition {
    /// Modifier key: ignored here, default handling proceeds.
    Suppressed,
    /// Queued; the host should suppress its default handling.
    Captured,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MouseState {
    pub x: i32,
    pub y: i32,
    pub buttons: u32,
}

impl MouseState {
    pub fn is_pressed(&self, button: u8) -> bool {
        button < 32 && self.buttons & (1 << button) != 0
    }
}

#[derive(Debug, Default)]
pub struct InputState {
    mouse: Mutex<MouseState>,
    keys: EventQueue<u32>,
    events: EventQueue<InboundEvent>,
}

impl InputState {
    pub fn mouse(&self) -> MouseState {
        *self.mouse.lock()
    }

    pub fn get_key(&self) -> Option<u32> {
        self.keys.drain()
    }

    pub fn has_key(&self) -> bool {
        self.keys.has_data()
    }

    pub fn events(&self) -> &EventQueue<InboundEvent> {
        &self.events
    }
}

/// Producer side of [`InputState`], handed to whatever thread receives the
/// host's pointer and keyboard callbacks.
#[derive(Clone)]
pub struct InputProducer {
    state: Arc<InputState>,
    callbacks: CallbackBridge,
}

impl InputProducer {
    pub fn new(state: Arc<InputState>, callbacks: CallbackBridge) -> Self {
        Self { state, callbacks }
    }

    pub fn key(&self, input: &KeyInput) -> KeyDisposition {
        if is_suppressed_key(&input.key) {
            trace!("ignoring modifier key {}", input.key);
            return KeyDisposition::Suppressed;
        }

        let code = input.code();

        if input.pressed {
            self.state.keys.enqueue(code);
        }

        self.callbacks.deliver(
            &self.state.events,
            InboundEvent::Key(KeyEvent {
                pressed: input.pressed,
                code,
                ctrl: input.ctrl,
                shift: input.shift,
                alt: input.alt,
            }),
        );

        KeyDisposition::Captured
    }

    /// `x`/`y` are surface-relative and floored to whole pixels.
    pub fn mouse_move(&self, x: f64, y: f64) {
        let (x, y) = (x.floor() as i32, y.floor() as i32);

        {
            let mut mouse = self.state.mouse.lock();
            mouse.x = x;
            mouse.y = y;
        }

        self.callbacks
            .deliver(&self.state.events, InboundEvent::MouseMove { x, y });
    }

    /// `button` is the host's button index (0 left, 1 middle, 2 right).
    pub fn mouse_button(&self, pressed: bool, x: f64, y: f64, button: u8) {
        let (x, y) = (x.floor() as i32, y.floor() as i32);

        if button >= 32 {
            warn!("ignoring mouse button {} outside the button mask", button);
            return;
        }

        let button_mask = {
            let mut mouse = self.state.mouse.lock();
            mouse.x = x;
            mouse.y = y;
            if pressed {
                mouse.buttons |= 1 << button;
            } else {
                mouse.buttons &= !(1 << button);
            }
            mouse.buttons
        };

        self.callbacks.deliver(
            &self.state.events,
            InboundEvent::MouseButton {
                pressed,
                x,
                y,
                button_mask,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer() -> (Arc<InputState>, InputProducer) {
        let state = Arc::new(InputState::default());
        let producer = InputProducer::new(state.clone(), CallbackBridge::new());
        (state, producer)
    }

    #[test]
    fn single_characters_use_their_code_point() {
        assert_eq!(KeyInput::down("a", 65).code(), 'a' as u32);
        assert_eq!(KeyInput::down("A", 65).code(), 'A' as u32);
        assert_eq!(KeyInput::down("é", 0).code(), 'é' as u32);
        assert_eq!(KeyInput::down("Enter", 13).code(), 13);
        assert_eq!(KeyInput::down("ArrowLeft", 37).code(), 37);
    }

    #[test]
    fn modifiers_never_reach_buffers() {
        let (state, producer) = producer();

        for key in SUPPRESSED_KEYS {
            assert_eq!(
                producer.key(&KeyInput::down(key, 16)),
                KeyDisposition::Suppressed
            );
            assert_eq!(
                producer.key(&KeyInput::up(key, 16)),
                KeyDisposition::Suppressed
            );
        }

        assert!(!state.has_key());
        assert!(state.events().is_empty());
    }

    #[test]
    fn presses_fill_key_buffer_in_order() {
        let (state, producer) = producer();

        producer.key(&KeyInput::down("Shift", 16));
        producer.key(&KeyInput::down("H", 72).with_modifiers(false, true, false));
        producer.key(&KeyInput::up("H", 72));
        producer.key(&KeyInput::down("i", 73));

        assert_eq!(state.get_key(), Some('H' as u32));
        assert_eq!(state.get_key(), Some('i' as u32));
        assert_eq!(state.get_key(), None);
    }

    #[test]
    fn key_events_include_releases_and_modifier_flags() {
        let (state, producer) = producer();

        producer.key(&KeyInput::down("c", 67).with_modifiers(true, false, false));
        producer.key(&KeyInput::up("c", 67).with_modifiers(true, false, false));

        assert_eq!(
            state.events().drain(),
            Some(InboundEvent::Key(KeyEvent {
                pressed: true,
                code: 'c' as u32,
                ctrl: true,
                shift: false,
                alt: false,
            }))
        );
        assert!(matches!(
            state.events().drain(),
            Some(InboundEvent::Key(KeyEvent { pressed: false, .. }))
        ));
    }

    #[test]
    fn mouse_snapshot_tracks_latest_event() {
        let (state, producer) = producer();

        producer.mouse_move(10.0, 20.0);
        producer.mouse_button(true, 12.4, 22.9, 0);

        assert_eq!(
            state.mouse(),
            MouseState {
                x: 12,
                y: 22,
                buttons: 1
            }
        );

        producer.mouse_button(true, 12.0, 22.0, 2);
        assert_eq!(state.mouse().buttons, 0b101);
        assert!(state.mouse().is_pressed(2));

        producer.mouse_button(false, 13.0, 23.0, 0);
        assert_eq!(state.mouse().buttons, 0b100);
        assert_eq!(
            state.events().len(),
            4,
            "every mouse event is queued regardless of the snapshot"
        );
    }
}
