use midir::{
    Ignore, MidiInput, MidiInputConnection, MidiInputPort, MidiOutput,
    MidiOutputConnection, MidiOutputPort,
};

use super::prelude::*;
use crate::error::{BridgeError, BridgeResult};
use crate::midi::{
    MidiBackend, MidiDevices, MidiInputLink, MidiOutputLink, MidiProducer,
};

/// [`MidiBackend`] on top of `midir`. Each open input or output gets its own
/// client so closing one never disturbs another.
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
        }
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("keybridge")
    }
}

struct MidirInput(MidiInputConnection<()>);

impl MidiInputLink for MidirInput {
    fn close(self: Box<Self>) {
        let _ = self.0.close();
    }
}

struct MidirOutput(MidiOutputConnection);

impl MidiOutputLink for MidirOutput {
    fn send(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.0.send(bytes).map_err(BridgeError::transport)
    }

    fn close(self: Box<Self>) {
        let _ = self.0.close();
    }
}

impl MidiBackend for MidirBackend {
    fn enumerate(&self) -> BridgeResult<MidiDevices> {
        let midi_in =
            MidiInput::new(&format!("{} inputs", self.client_name))
                .map_err(BridgeError::transport)?;
        let midi_out =
            MidiOutput::new(&format!("{} outputs", self.client_name))
                .map_err(BridgeError::transport)?;

        let inputs = midi_in
            .ports()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                midi_in
                    .port_name(p)
                    .unwrap_or_else(|_| format!("MIDI Input {}", i))
            })
            .collect();

        let outputs = midi_out
            .ports()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                midi_out
                    .port_name(p)
                    .unwrap_or_else(|_| format!("MIDI Output {}", i))
            })
            .collect();

        Ok(MidiDevices { inputs, outputs })
    }

    fn connect_input(
        &self,
        index: usize,
        name: &str,
        producer: MidiProducer,
    ) -> BridgeResult<Box<dyn MidiInputLink>> {
        let mut midi_in =
            MidiInput::new(&self.client_name).map_err(BridgeError::transport)?;
        midi_in.ignore(Ignore::Sysex);

        let ports = midi_in.ports();
        let port: MidiInputPort = find_port(&ports, index, name, |p| {
            midi_in.port_name(p).ok()
        })
        .ok_or_else(|| {
            BridgeError::Transport(format!("Unable to find input port: {}", name))
        })?;

        let connection_name = format!("{} input {}", self.client_name, index);
        let connection = midi_in
            .connect(
                &port,
                &connection_name,
                move |stamp, message, _| {
                    trace!("MIDI message: {}, {:?}", stamp, message);
                    producer.message(message);
                },
                (),
            )
            .map_err(BridgeError::transport)?;

        Ok(Box::new(MidirInput(connection)))
    }

    fn connect_output(
        &self,
        index: usize,
        name: &str,
    ) -> BridgeResult<Box<dyn MidiOutputLink>> {
        let midi_out =
            MidiOutput::new(&self.client_name).map_err(BridgeError::transport)?;

        let ports = midi_out.ports();
        let port: MidiOutputPort = find_port(&ports, index, name, |p| {
            midi_out.port_name(p).ok()
        })
        .ok_or_else(|| {
            BridgeError::Transport(format!(
                "Unable to find output port: {}",
                name
            ))
        })?;

        let connection_name = format!("{} output {}", self.client_name, index);
        let connection = midi_out
            .connect(&port, &connection_name)
            .map_err(BridgeError::transport)?;

        Ok(Box::new(MidirOutput(connection)))
    }
}

/// The port at `index` if it still carries `name`, otherwise the first port
/// with that name (devices were plugged or unplugged since enumeration).
fn find_port<P: Clone>(
    ports: &[P],
    index: usize,
    name: &str,
    port_name: impl Fn(&P) -> Option<String>,
) -> Option<P> {
    if let Some(port) = ports.get(index) {
        if port_name(port).as_deref() == Some(name) {
            return Some(port.clone());
        }
    }

    let moved = ports
        .iter()
        .find(|p| port_name(p).as_deref() == Some(name))
        .cloned();

    if moved.is_some() {
        warn!("MIDI port {} moved since enumeration; matched by name", name);
    }

    moved
}
