use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use nannou_osc as osc;

use super::prelude::*;
use crate::error::{BridgeError, BridgeResult};
use crate::pubsub::{PubSubConnection, PubSubProducer, PubSubTransport};
use crate::runtime::events::NativeMessage;

const IDLE: Duration = Duration::from_millis(2);

/// Carries pub/sub subjects over OSC. Subject `a.b.c` travels as address
/// `/a/b/c` with the payload as its single argument. OSC has no broker, so
/// subject filtering happens on the receiving bridge.
pub struct OscTransport {
    bind_host: String,
    listen_port: u16,
}

impl OscTransport {
    pub fn new(bind_host: &str, listen_port: u16) -> Self {
        Self {
            bind_host: bind_host.to_string(),
            listen_port,
        }
    }
}

impl PubSubTransport for OscTransport {
    /// `url` names the peer to publish to, as `osc://host:port` or
    /// `host:port`.
    fn connect(
        &self,
        url: &str,
        producer: PubSubProducer,
    ) -> BridgeResult<Box<dyn PubSubConnection>> {
        let target = resolve(url)?;

        let receiver =
            osc::Receiver::bind_to((self.bind_host.as_str(), self.listen_port))
                .map_err(BridgeError::transport)?;
        let sender = osc::Sender::bind()
            .and_then(|sender| sender.connect(target))
            .map_err(BridgeError::transport)?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let listen_port = self.listen_port;
        let thread_producer = producer.clone();

        let handle = thread::Builder::new()
            .name(format!("keybridge-osc-{}", listen_port))
            .spawn(move || {
                while thread_running.load(Ordering::SeqCst) {
                    let mut processed = false;
                    for (packet, _) in receiver.try_iter() {
                        processed = true;
                        for message in flatten(packet) {
                            thread_producer.message(message);
                        }
                    }

                    if !processed {
                        thread::sleep(IDLE);
                    }
                }

                debug!("OSC receiver thread on port {} is exiting", listen_port);
            })
            .map_err(BridgeError::transport)?;

        info!(
            "OSC pub/sub listening on {}:{}, publishing to {}",
            self.bind_host, listen_port, target
        );
        producer.connected();

        Ok(Box::new(OscConnection {
            sender,
            running,
            thread: Some(handle),
        }))
    }
}

struct OscConnection {
    sender: osc::Sender<osc::Connected>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PubSubConnection for OscConnection {
    fn publish(&mut self, subject: &str, payload: &[u8]) -> BridgeResult<()> {
        let arg = match std::str::from_utf8(payload) {
            Ok(text) => osc::Type::String(text.to_string()),
            Err(_) => osc::Type::Blob(payload.to_vec()),
        };

        self.sender
            .send((subject_to_address(subject), vec![arg]))
            .map(|_| ())
            .map_err(BridgeError::transport)
    }

    fn close(mut self: Box<Self>) {
        self.running.store(false, Ordering::SeqCst);

        // The receiver thread can end up here itself through a producer
        // callback, so only join from elsewhere.
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                if handle.join().is_err() {
                    error!("OSC receiver thread panicked");
                }
            }
        }
    }
}

fn resolve(url: &str) -> BridgeResult<SocketAddr> {
    let host = url
        .strip_prefix("osc://")
        .or_else(|| url.strip_prefix("udp://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    host.to_socket_addrs()
        .map_err(|err| BridgeError::Transport(format!("{}: {}", url, err)))?
        .next()
        .ok_or_else(|| {
            BridgeError::Transport(format!("{} resolved to no address", url))
        })
}

pub fn subject_to_address(subject: &str) -> String {
    format!("/{}", subject.replace('.', "/"))
}

pub fn address_to_subject(address: &str) -> String {
    address.trim_start_matches('/').replace('/', ".")
}

/// Bundles are unpacked in order. Messages without a string or blob payload
/// are dropped.
fn flatten(packet: osc::Packet) -> Vec<NativeMessage> {
    packet.into_msgs().into_iter().filter_map(native_message).collect()
}

fn native_message(message: osc::Message) -> Option<NativeMessage> {
    let subject = address_to_subject(&message.addr);
    let payload = match message.args.into_iter().next() {
        Some(osc::Type::String(text)) => text.into_bytes(),
        Some(osc::Type::Blob(bytes)) => bytes,
        other => {
            warn!(
                "dropping OSC message {} with payload {:?}",
                message.addr, other
            );
            return None;
        }
    };
    Some(NativeMessage::new(subject, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_map_to_addresses() {
        assert_eq!(subject_to_address("keykit.note.on"), "/keykit/note/on");
        assert_eq!(address_to_subject("/keykit/note/on"), "keykit.note.on");
    }

    #[test]
    fn resolves_with_or_without_scheme() {
        assert_eq!(
            resolve("osc://127.0.0.1:2346").unwrap(),
            "127.0.0.1:2346".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert!(resolve("osc://no-port").is_err());
    }

    #[test]
    fn flattens_string_and_blob_payloads() {
        let message = |addr: &str, arg: osc::Type| {
            osc::Packet::Message(osc::Message {
                addr: addr.to_string(),
                args: vec![arg],
            })
        };

        assert_eq!(
            flatten(message("/a/b", osc::Type::String("one".into()))),
            vec![NativeMessage::new("a.b", "one")]
        );
        assert_eq!(
            flatten(message("/a/c", osc::Type::Blob(vec![1u8, 2]))),
            vec![NativeMessage::new("a.c", vec![1u8, 2])]
        );
        assert!(flatten(message("/a/d", osc::Type::Int(3))).is_empty());
    }

    #[test]
    fn flattens_nested_bundles_in_order() {
        let message = |addr: &str, text: &str| {
            osc::Packet::Message(osc::Message {
                addr: addr.to_string(),
                args: vec![osc::Type::String(text.to_string())],
            })
        };
        let inner = osc::Packet::Bundle(osc::Bundle {
            timetag: (0, 1).into(),
            content: vec![
                message("/n/two", "2").into(),
                message("/n/skip", "").into(),
            ],
        });
        let outer = osc::Packet::Bundle(osc::Bundle {
            timetag: (0, 1).into(),
            content: vec![
                message("/n/one", "1").into(),
                inner.into(),
                osc::Packet::Message(osc::Message {
                    addr: "/n/int".to_string(),
                    args: vec![osc::Type::Int(7)],
                })
                .into(),
            ],
        });

        assert_eq!(
            flatten(outer),
            vec![
                NativeMessage::new("n.one", "1"),
                NativeMessage::new("n.two", "2"),
                NativeMessage::new("n.skip", ""),
            ]
        );
    }
}
