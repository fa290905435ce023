//! WebSocket ports. Handles are chosen by the consumer; the port registry is
//! allocated on the first connect.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{BridgeError, BridgeResult};
use crate::framework::prelude::*;
use crate::runtime::callback::{CallbackBridge, Notification};
use crate::runtime::events::{InboundEvent, NativeFrame, decode_socket_frame};
use crate::runtime::registry::{Handle, Registry, ResourceKind, ResourceRecord};
use crate::runtime::state::{PortEvent, PortState};

/// Outbound half of a native socket. `send` hands bytes to the transport and
/// returns without waiting for the peer.
pub trait SocketConnection: Send {
    fn send(&mut self, bytes: &[u8]) -> BridgeResult<()>;

    /// Starts an orderly shutdown; completion may be asynchronous.
    fn close(self: Box<Self>);
}

pub trait SocketTransport: Send + Sync {
    /// Starts connecting to `url`. The transport reports progress through
    /// `producer`; an `Err` here means nothing was started.
    fn connect(
        &self,
        url: &str,
        producer: PortProducer,
    ) -> BridgeResult<Box<dyn SocketConnection>>;
}

pub type PortRecord = ResourceRecord<PortState, dyn SocketConnection>;

/// Transport-side view of one port.
#[derive(Clone)]
pub struct PortProducer {
    record: Arc<PortRecord>,
    callbacks: CallbackBridge,
}

impl PortProducer {
    fn new(record: Arc<PortRecord>, callbacks: CallbackBridge) -> Self {
        Self { record, callbacks }
    }

    pub fn port(&self) -> Handle {
        self.record.handle()
    }

    pub fn opened(&self) {
        self.apply(PortEvent::TransportOpen);
    }

    pub fn frame(&self, frame: NativeFrame) {
        let state = self.record.state();
        if !state.accepts_frames() {
            trace!("port {} is {}; dropping frame", self.port(), state);
            return;
        }

        match decode_socket_frame(self.port(), frame) {
            Ok(event) => {
                self.callbacks.deliver(self.record.queue(), event);
            }
            Err(err) => {
                warn!("dropping frame on port {}: {}", self.port(), err);
            }
        }
    }

    pub fn error(&self, err: impl fmt::Display) {
        warn!("WebSocket port {} error: {}", self.port(), err);
        self.apply(PortEvent::TransportError);
    }

    pub fn closed(&self) {
        self.apply(PortEvent::TransportClose);
    }

    fn apply(&self, event: PortEvent) {
        match self.record.transition(|state| state.next(event)) {
            Some(state) => {
                debug!("WebSocket port {} is now {}", self.port(), state);
                self.callbacks.notify(&Notification::PortState {
                    port: self.port(),
                    state,
                });
            }
            None => {
                trace!(
                    "ignoring {:?} on port {} ({})",
                    event,
                    self.port(),
                    self.record.state()
                );
            }
        }
    }
}

pub struct PortHub {
    transport: Box<dyn SocketTransport>,
    ports: OnceLock<Registry<PortRecord>>,
    callbacks: CallbackBridge,
}

impl PortHub {
    pub fn new(
        transport: Box<dyn SocketTransport>,
        callbacks: CallbackBridge,
    ) -> Self {
        Self {
            transport,
            ports: OnceLock::new(),
            callbacks,
        }
    }

    fn ports(&self) -> &Registry<PortRecord> {
        self.ports.get_or_init(|| {
            debug!("Allocating WebSocket port registry");
            Registry::new(ResourceKind::WebSocket)
        })
    }

    fn get(&self, handle: Handle) -> Option<Arc<PortRecord>> {
        self.ports.get()?.get(handle)
    }

    /// Starts connecting port `handle` to `url`. A handle that is still live
    /// is closed first so it never maps to two connections.
    pub fn connect(&self, handle: Handle, url: &str) -> BridgeResult<()> {
        if self.ports().contains(handle) {
            warn!("WebSocket port {} reused; closing previous connection", handle);
            self.close(handle)?;
        }

        let record = self.ports().allocate(Some(handle), |handle| {
            ResourceRecord::new(
                ResourceKind::WebSocket,
                handle,
                PortState::Connecting,
            )
        })?;

        let producer = PortProducer::new(record.clone(), self.callbacks.clone());

        match self.transport.connect(url, producer) {
            Ok(connection) => {
                record.attach(connection);
                info!("Connecting WebSocket port {} to {}", handle, url);
                Ok(())
            }
            Err(err) => {
                record.queue().close();
                let _ = self.ports().remove(handle);
                Err(err)
            }
        }
    }

    /// Legal only in Connected. Returns the number of bytes handed over.
    pub fn send(&self, handle: Handle, bytes: &[u8]) -> BridgeResult<usize> {
        let record = self.get(handle).ok_or(BridgeError::NotFound {
            kind: ResourceKind::WebSocket,
            handle,
        })?;

        let not_connected = || {
            BridgeError::NotConnected(format!(
                "WebSocket port {} ({})",
                handle,
                record.state()
            ))
        };

        if !record.state().can_send() {
            return Err(not_connected());
        }

        record
            .with_native(|connection| connection.send(bytes))
            .unwrap_or_else(|| Err(not_connected()))?;

        trace!("Sent {} bytes on port {}", bytes.len(), handle);
        Ok(bytes.len())
    }

    pub fn state(&self, handle: Handle) -> BridgeResult<PortState> {
        self.get(handle)
            .map(|record| record.state())
            .ok_or(BridgeError::NotFound {
                kind: ResourceKind::WebSocket,
                handle,
            })
    }

    /// Host library convention: 0 for an unknown port, else
    /// [`PortState::code`].
    pub fn state_code(&self, handle: Handle) -> i32 {
        self.state(handle).map(PortState::code).unwrap_or(0)
    }

    pub fn poll(&self, handle: Handle) -> Option<InboundEvent> {
        self.get(handle)?.queue().drain()
    }

    pub fn has_data(&self, handle: Handle) -> bool {
        self.get(handle)
            .is_some_and(|record| record.queue().has_data())
    }

    /// Copies the oldest frame into `buf` and returns the number of bytes
    /// copied. Whatever doesn't fit is discarded with the frame.
    pub fn receive_into(&self, handle: Handle, buf: &mut [u8]) -> usize {
        let Some(InboundEvent::SocketFrame { bytes, .. }) = self.poll(handle)
        else {
            return 0;
        };

        let count = bytes.len().min(buf.len());
        buf[..count].copy_from_slice(&bytes[..count]);

        if count < bytes.len() {
            debug!(
                "port {} frame truncated from {} to {} bytes",
                handle,
                bytes.len(),
                count
            );
        }

        count
    }

    /// Detaches the port immediately; the transport finishes closing on its
    /// own time and anything it still reports is dropped. Idempotent.
    pub fn close(&self, handle: Handle) -> BridgeResult<()> {
        let Some(record) = self
            .ports
            .get()
            .and_then(|ports| ports.remove(handle).ok())
        else {
            trace!("WebSocket port {} already closed", handle);
            return Ok(());
        };

        record.transition(|state| state.next(PortEvent::CloseRequested));
        let dropped = record.queue().close();
        if let Some(connection) = record.detach() {
            connection.close();
        }

        info!(
            "Closed WebSocket port {} ({} undelivered frames dropped)",
            handle, dropped
        );
        Ok(())
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.ports
            .get()
            .map(Registry::handles)
            .unwrap_or_default()
    }

    pub fn close_all(&self) {
        for handle in self.handles() {
            let _ = self.close(handle);
        }
    }
}
