use std::io;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::prelude::*;
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::events::NativeFrame;
use crate::websocket::{PortProducer, SocketConnection, SocketTransport};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// One thread per port. The thread owns the socket, alternating between
/// flushing queued outbound frames and a read bounded by `read_poll`.
pub struct TungsteniteTransport {
    read_poll: Duration,
}

impl TungsteniteTransport {
    pub fn new(read_poll: Duration) -> Self {
        Self {
            read_poll: read_poll.max(Duration::from_millis(1)),
        }
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

enum Outbound {
    Frame(Vec<u8>),
    Close,
}

impl SocketTransport for TungsteniteTransport {
    fn connect(
        &self,
        url: &str,
        producer: PortProducer,
    ) -> BridgeResult<Box<dyn SocketConnection>> {
        let request = url
            .into_client_request()
            .map_err(BridgeError::transport)?;

        let (tx, rx) = mpsc::channel();
        let read_poll = self.read_poll;

        thread::Builder::new()
            .name(format!("keybridge-ws-{}", producer.port()))
            .spawn(move || run(request, producer, rx, read_poll))
            .map_err(BridgeError::transport)?;

        Ok(Box::new(TungsteniteConnection { outbound: tx }))
    }
}

struct TungsteniteConnection {
    outbound: Sender<Outbound>,
}

impl SocketConnection for TungsteniteConnection {
    fn send(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.outbound
            .send(Outbound::Frame(bytes.to_vec()))
            .map_err(|_| {
                BridgeError::Transport("socket thread has exited".to_string())
            })
    }

    fn close(self: Box<Self>) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

fn run(
    request: Request,
    producer: PortProducer,
    outbound: Receiver<Outbound>,
    read_poll: Duration,
) {
    let port = producer.port();

    let mut socket = match tungstenite::connect(request) {
        Ok((socket, _)) => socket,
        Err(err) => {
            producer.error(err);
            return;
        }
    };

    if let Err(err) = set_read_timeout(&mut socket, read_poll) {
        producer.error(err);
        let _ = socket.close(None);
        return;
    }

    producer.opened();

    loop {
        match flush_outbound(&mut socket, &outbound) {
            Ok(true) => {}
            Ok(false) => {
                debug!("port {} closing on request", port);
                let _ = socket.close(None);
                let _ = socket.flush();
                break;
            }
            Err(err) => {
                producer.error(err);
                break;
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => producer.frame(NativeFrame::Text(text)),
            Ok(Message::Binary(bytes)) => {
                producer.frame(NativeFrame::Binary(bytes))
            }
            Ok(Message::Close(frame)) => {
                debug!("port {} closed by peer: {:?}", port, frame);
                let _ = socket.flush();
                producer.closed();
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(err)) if is_timeout(&err) => {}
            Err(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed,
            ) => {
                producer.closed();
                break;
            }
            Err(err) => {
                producer.error(err);
                break;
            }
        }
    }

    trace!("WebSocket thread for port {} is exiting", port);
}

/// Returns false once the owner asked to close or went away.
fn flush_outbound(
    socket: &mut Socket,
    outbound: &Receiver<Outbound>,
) -> tungstenite::Result<bool> {
    loop {
        match outbound.try_recv() {
            Ok(Outbound::Frame(bytes)) => socket.send(Message::Binary(bytes))?,
            Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => {
                return Ok(false);
            }
            Err(TryRecvError::Empty) => return Ok(true),
        }
    }
}

fn set_read_timeout(socket: &mut Socket, timeout: Duration) -> io::Result<()> {
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        _ => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "only plain ws:// streams are supported",
        )),
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
