//! The pub/sub channel: one connection per bridge, a default wildcard
//! subscription made when the connection comes up, and explicit subscriptions
//! under caller-chosen handles.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{BridgeError, BridgeResult};
use crate::framework::prelude::*;
use crate::runtime::callback::{CallbackBridge, Notification};
use crate::runtime::events::{
    InboundEvent, NativeMessage, decode_pubsub_message, is_valid_subject,
};
use crate::runtime::queue::EventQueue;
use crate::runtime::registry::{Handle, Registry, ResourceKind};
use crate::runtime::state::{PubSubEvent, PubSubState};

pub trait PubSubConnection: Send {
    /// Hands one message to the transport. Success means it was handed over,
    /// not that anyone received it.
    fn publish(&mut self, subject: &str, payload: &[u8]) -> BridgeResult<()>;

    /// Must not block on the transport's own threads; `close` may be called
    /// from one of them.
    fn close(self: Box<Self>);
}

pub trait PubSubTransport: Send + Sync {
    /// Starts connecting to `url`. Readiness, failure and incoming messages
    /// are reported through `producer`, possibly before this returns.
    fn connect(
        &self,
        url: &str,
        producer: PubSubProducer,
    ) -> BridgeResult<Box<dyn PubSubConnection>>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Token {
    Literal(String),
    /// `*`: exactly one token.
    Any,
    /// `>`: one or more trailing tokens.
    Tail,
}

/// Dot separated subject filter with `*` and `>` wildcards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    pub fn parse(pattern: &str) -> BridgeResult<Self> {
        let invalid = || BridgeError::InvalidSubject(pattern.to_string());

        if pattern.is_empty() {
            return Err(invalid());
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        let mut tokens = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let token = match *part {
                "" => return Err(invalid()),
                "*" => Token::Any,
                ">" if i + 1 == parts.len() => Token::Tail,
                ">" => return Err(invalid()),
                part if part.chars().any(char::is_whitespace) => {
                    return Err(invalid());
                }
                part => Token::Literal(part.to_string()),
            };
            tokens.push(token);
        }

        Ok(Self {
            raw: pattern.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut parts = subject.split('.');

        for token in &self.tokens {
            match token {
                Token::Tail => return parts.next().is_some(),
                Token::Any => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Token::Literal(literal) => {
                    if parts.next() != Some(literal.as_str()) {
                        return false;
                    }
                }
            }
        }

        parts.next().is_none()
    }
}

impl FromStr for SubjectPattern {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

pub struct Subscription {
    handle: Handle,
    pattern: SubjectPattern,
    queue: EventQueue<InboundEvent>,
}

impl Subscription {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }

    pub fn queue(&self) -> &EventQueue<InboundEvent> {
        &self.queue
    }
}

struct Session {
    state: Mutex<PubSubState>,
    /// Bumped on every connect and explicit close; producers from an older
    /// session are ignored.
    generation: AtomicU64,
    connection: Mutex<Option<Box<dyn PubSubConnection>>>,
    default_pattern: SubjectPattern,
    default_queue: EventQueue<InboundEvent>,
    subscriptions: OnceLock<Registry<Subscription>>,
    callbacks: CallbackBridge,
}

impl Session {
    fn state(&self) -> PubSubState {
        *self.state.lock()
    }

    fn subscriptions(&self) -> &Registry<Subscription> {
        self.subscriptions.get_or_init(|| {
            debug!("Allocating subscription registry");
            Registry::new(ResourceKind::Subscription)
        })
    }

    fn apply(&self, event: PubSubEvent) -> Option<PubSubState> {
        let next = {
            let mut state = self.state.lock();
            let next = state.next(event);
            if let Some(next) = next {
                *state = next;
            }
            next
        };

        let Some(state) = next else {
            trace!("ignoring {:?} while pub/sub is {}", event, self.state());
            return None;
        };

        debug!("pub/sub is now {}", state);
        match state {
            PubSubState::Connected => self.default_queue.reset(),
            PubSubState::Disconnected => self.teardown(),
            PubSubState::Connecting => {}
        }

        self.callbacks.notify(&Notification::PubSubState(state));
        Some(state)
    }

    fn teardown(&self) {
        let mut dropped = self.default_queue.close();

        if let Some(subscriptions) = self.subscriptions.get() {
            for subscription in subscriptions.drain() {
                dropped += subscription.queue.close();
            }
        }

        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.close();
        }

        if dropped > 0 {
            debug!("pub/sub teardown dropped {} undelivered messages", dropped);
        }
    }

    fn deliver(&self, message: NativeMessage) {
        if self.state() != PubSubState::Connected {
            trace!("pub/sub is {}; dropping {}", self.state(), message.subject);
            return;
        }

        let message = match decode_pubsub_message(message) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping pub/sub message: {}", err);
                return;
            }
        };

        let subject = message.subject.clone();
        let event = InboundEvent::PubSub(message);
        trace!("delivering {} event: {:?}", event.label(), event);

        let mut delivered = false;
        if self.default_pattern.matches(&subject) {
            delivered |= self.default_queue.enqueue(event.clone());
        }

        if let Some(subscriptions) = self.subscriptions.get() {
            for subscription in subscriptions.records() {
                if subscription.pattern.matches(&subject) {
                    delivered |= subscription.queue.enqueue(event.clone());
                }
            }
        }

        if delivered {
            self.callbacks.notify(&Notification::Event(event));
        } else {
            trace!("no subscription matched {}", subject);
        }
    }
}

/// Transport-side view of one connect attempt.
#[derive(Clone)]
pub struct PubSubProducer {
    session: Arc<Session>,
    generation: u64,
}

impl PubSubProducer {
    fn is_current(&self) -> bool {
        self.session.generation.load(Ordering::Acquire) == self.generation
    }

    pub fn connected(&self) {
        if self.is_current() {
            self.session.apply(PubSubEvent::TransportReady);
        }
    }

    pub fn failed(&self, err: impl fmt::Display) {
        warn!("pub/sub transport failed: {}", err);
        if self.is_current() {
            self.session.apply(PubSubEvent::TransportFailed);
            self.session.apply(PubSubEvent::TransportClosed);
        }
    }

    pub fn closed(&self) {
        if self.is_current() {
            self.session.apply(PubSubEvent::TransportClosed);
        }
    }

    pub fn message(&self, message: NativeMessage) {
        if self.is_current() {
            self.session.deliver(message);
        }
    }
}

pub struct PubSubHub {
    transport: Box<dyn PubSubTransport>,
    session: Arc<Session>,
}

impl PubSubHub {
    pub fn new(
        transport: Box<dyn PubSubTransport>,
        default_pattern: SubjectPattern,
        callbacks: CallbackBridge,
    ) -> Self {
        let default_queue = EventQueue::new();
        default_queue.close();

        Self {
            transport,
            session: Arc::new(Session {
                state: Mutex::new(PubSubState::Disconnected),
                generation: AtomicU64::new(0),
                connection: Mutex::new(None),
                default_pattern,
                default_queue,
                subscriptions: OnceLock::new(),
                callbacks,
            }),
        }
    }

    pub fn state(&self) -> PubSubState {
        self.session.state()
    }

    pub fn default_pattern(&self) -> &SubjectPattern {
        &self.session.default_pattern
    }

    /// Starts connecting. A no-op while already connecting or connected.
    pub fn connect(&self, url: &str) -> BridgeResult<()> {
        let session = &self.session;

        if session.apply(PubSubEvent::ConnectRequested).is_none() {
            debug!("pub/sub already {}; ignoring connect", self.state());
            return Ok(());
        }

        let generation = session.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let producer = PubSubProducer {
            session: session.clone(),
            generation,
        };

        match self.transport.connect(url, producer) {
            Ok(connection) => {
                let mut slot = session.connection.lock();
                let live = session.generation.load(Ordering::Acquire)
                    == generation
                    && session.state() != PubSubState::Disconnected;

                if live {
                    *slot = Some(connection);
                    info!("Connecting pub/sub to {}", url);
                } else {
                    drop(slot);
                    connection.close();
                }
                Ok(())
            }
            Err(err) => {
                session.apply(PubSubEvent::TransportFailed);
                Err(err)
            }
        }
    }

    fn not_connected(&self) -> BridgeError {
        BridgeError::NotConnected(format!("pub/sub ({})", self.state()))
    }

    pub fn publish(&self, subject: &str, payload: &[u8]) -> BridgeResult<()> {
        if !self.state().can_publish() {
            return Err(self.not_connected());
        }
        if !is_valid_subject(subject) {
            return Err(BridgeError::InvalidSubject(subject.to_string()));
        }

        self.session
            .connection
            .lock()
            .as_mut()
            .ok_or_else(|| self.not_connected())?
            .publish(subject, payload)?;

        trace!("Published {} bytes to {}", payload.len(), subject);
        Ok(())
    }

    /// Registers `subject` (wildcards allowed) under `handle`.
    pub fn subscribe(&self, handle: Handle, subject: &str) -> BridgeResult<()> {
        if !self.state().can_publish() {
            return Err(self.not_connected());
        }

        let pattern = SubjectPattern::parse(subject)?;
        self.session.subscriptions().allocate(Some(handle), |handle| {
            Subscription {
                handle,
                pattern,
                queue: EventQueue::new(),
            }
        })?;

        info!("Subscribed {} as handle {}", subject, handle);
        Ok(())
    }

    /// Idempotent.
    pub fn unsubscribe(&self, handle: Handle) -> BridgeResult<()> {
        let removed = self
            .session
            .subscriptions
            .get()
            .and_then(|subscriptions| subscriptions.remove(handle).ok());

        if let Some(subscription) = removed {
            let dropped = subscription.queue.close();
            info!(
                "Unsubscribed {} ({} undelivered messages dropped)",
                subscription.pattern, dropped
            );
        }
        Ok(())
    }

    pub fn subscriptions(&self) -> Vec<Handle> {
        self.session
            .subscriptions
            .get()
            .map(Registry::handles)
            .unwrap_or_default()
    }

    fn subscription(&self, handle: Handle) -> Option<Arc<Subscription>> {
        self.session.subscriptions.get()?.get(handle)
    }

    pub fn poll(&self, handle: Handle) -> Option<InboundEvent> {
        self.subscription(handle)?.queue.drain()
    }

    pub fn has_data(&self, handle: Handle) -> bool {
        self.subscription(handle)
            .is_some_and(|subscription| subscription.queue.has_data())
    }

    pub fn poll_default(&self) -> Option<InboundEvent> {
        self.session.default_queue.drain()
    }

    pub fn has_default_data(&self) -> bool {
        self.session.default_queue.has_data()
    }

    /// Drops the connection with every subscription. Idempotent.
    pub fn close(&self) {
        self.session.generation.fetch_add(1, Ordering::AcqRel);
        if self.session.apply(PubSubEvent::CloseRequested).is_some() {
            info!("Closed pub/sub connection");
        }
    }
}
