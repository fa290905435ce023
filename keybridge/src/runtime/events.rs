//! Decoded events as the consumer sees them, plus the decode step from each
//! native payload shape. Decoding fails closed: anything malformed is turned
//! into a [`DecodeError`] and dropped by the caller rather than guessed at.

use serde::Serialize;
use thiserror::Error;

use super::registry::Handle;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyEvent {
    pub pressed: bool,
    pub code: u32,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct MidiMessage {
    pub device: Handle,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PubSubMessage {
    pub subject: String,
    pub payload: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Key(KeyEvent),
    MouseMove {
        x: i32,
        y: i32,
    },
    MouseButton {
        pressed: bool,
        x: i32,
        y: i32,
        button_mask: u32,
    },
    Midi(MidiMessage),
    SocketFrame {
        port: Handle,
        bytes: Vec<u8>,
    },
    PubSub(PubSubMessage),
}

impl InboundEvent {
    pub fn label(&self) -> &'static str {
        match self {
            InboundEvent::Key(_) => "key",
            InboundEvent::MouseMove { .. } => "mouse_move",
            InboundEvent::MouseButton { .. } => "mouse_button",
            InboundEvent::Midi(_) => "midi",
            InboundEvent::SocketFrame { .. } => "socket_frame",
            InboundEvent::PubSub(_) => "pubsub",
        }
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("empty MIDI message")]
    EmptyMidi,

    #[error("MIDI message starts with data byte {0:#04x} (running status)")]
    RunningStatus(u8),

    #[error("unsupported MIDI status {0:#04x}")]
    UnsupportedStatus(u8),

    #[error(
        "MIDI status {status:#04x} expects {expected} bytes, got {actual}"
    )]
    MidiLength {
        status: u8,
        expected: usize,
        actual: usize,
    },

    #[error("MIDI data byte {0:#04x} has its high bit set")]
    MidiDataByte(u8),

    #[error("blob frames are not supported")]
    BlobFrame,

    #[error("invalid subject {0:?}")]
    InvalidSubject(String),

    #[error("payload on {0:?} is not valid UTF-8")]
    PayloadEncoding(String),
}

/// Number of bytes a complete message with this status byte carries, or
/// `None` for statuses that don't fit a `(status, data1, data2)` tuple.
pub fn expected_midi_len(status: u8) -> Option<usize> {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Some(3),
        0xC0..=0xDF => Some(2),
        0xF1 | 0xF3 => Some(2),
        0xF2 => Some(3),
        0xF6 | 0xF8 | 0xFA..=0xFC | 0xFE | 0xFF => Some(1),
        _ => None,
    }
}

impl MidiMessage {
    pub fn decode(device: Handle, bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&status, data) = bytes.split_first().ok_or(DecodeError::EmptyMidi)?;

        if status < 0x80 {
            return Err(DecodeError::RunningStatus(status));
        }

        let expected = expected_midi_len(status)
            .ok_or(DecodeError::UnsupportedStatus(status))?;

        if bytes.len() != expected {
            return Err(DecodeError::MidiLength {
                status,
                expected,
                actual: bytes.len(),
            });
        }

        if let Some(&byte) = data.iter().find(|byte| **byte > 0x7F) {
            return Err(DecodeError::MidiDataByte(byte));
        }

        Ok(Self {
            device,
            status,
            data1: data.first().copied().unwrap_or(0),
            data2: data.get(1).copied().unwrap_or(0),
        })
    }

    pub fn channel(&self) -> Option<u8> {
        (self.status < 0xF0).then_some(self.status & 0x0F)
    }

    pub fn is_note_on(&self) -> bool {
        self.status & 0xF0 == 0x90 && self.data2 > 0
    }

    pub fn is_note_off(&self) -> bool {
        self.status & 0xF0 == 0x80 || (self.status & 0xF0 == 0x90 && self.data2 == 0)
    }

    pub fn is_control_change(&self) -> bool {
        self.status & 0xF0 == 0xB0
    }

    pub fn bytes(&self) -> Vec<u8> {
        let len = expected_midi_len(self.status).unwrap_or(3);
        [self.status, self.data1, self.data2][..len].to_vec()
    }
}

/// Frame shapes a socket transport can hand over.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NativeFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Opaque binary large object. Reading one would need an async decode,
    /// so these are dropped.
    Blob,
}

pub fn decode_socket_frame(
    port: Handle,
    frame: NativeFrame,
) -> Result<InboundEvent, DecodeError> {
    let bytes = match frame {
        NativeFrame::Text(text) => text.into_bytes(),
        NativeFrame::Binary(bytes) => bytes,
        NativeFrame::Blob => return Err(DecodeError::BlobFrame),
    };
    Ok(InboundEvent::SocketFrame { port, bytes })
}

/// Message as delivered by a pub/sub transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NativeMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl NativeMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}

pub fn decode_pubsub_message(
    message: NativeMessage,
) -> Result<PubSubMessage, DecodeError> {
    let NativeMessage { subject, payload } = message;

    if !is_valid_subject(&subject) {
        return Err(DecodeError::InvalidSubject(subject));
    }

    match String::from_utf8(payload) {
        Ok(payload) => Ok(PubSubMessage { subject, payload }),
        Err(_) => Err(DecodeError::PayloadEncoding(subject)),
    }
}

/// A concrete subject: non-empty dot separated tokens with no wildcards or
/// whitespace.
pub fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject.split('.').all(|token| {
            !token.is_empty()
                && token != "*"
                && token != ">"
                && !token.chars().any(char::is_whitespace)
        })
}
