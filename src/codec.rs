//! # Message Codec
//!
//! Frames ADUs over a [`Transport`] and routes incoming frames to whoever is
//! waiting for them.
//!
//! A background receive loop (one tokio task per connection) reassembles
//! frames from the byte stream using the length word at offset 4..6 of the
//! header, decodes them, and hands each one to at most one party:
//!
//! 1. the first registered expectation whose predicate matches,
//! 2. otherwise the custom message handler, if it accepts the message,
//! 3. otherwise the default incoming channel, if one was taken,
//! 4. otherwise the message is logged and dropped.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use voltage_modbus_driver::adu::{ModbusAdu, ModbusTcpAdu};
//! use voltage_modbus_driver::codec::{CodecConfig, MessageCodec};
//! use voltage_modbus_driver::pdu::ModbusPdu;
//! use voltage_modbus_driver::transport::TcpTransport;
//!
//! # async fn example() -> voltage_modbus_driver::ModbusResult<()> {
//! let transport = TcpTransport::new("127.0.0.1:502".parse().unwrap(), Duration::from_secs(3));
//! let codec = MessageCodec::<_, ModbusTcpAdu>::new(transport, CodecConfig::default());
//! codec.connect().await?;
//!
//! let request = ModbusTcpAdu::new(1, 1, ModbusPdu::read_request(0x03, 0, 4)?);
//! let response = codec
//!     .send_request(&request, |adu: &ModbusTcpAdu| adu.transaction_id() == 1, None)
//!     .await?
//!     .await
//!     .map_err(|_| voltage_modbus_driver::ModbusError::internal("codec dropped"))??;
//! println!("{}", response.pdu());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::adu::ModbusAdu;
use crate::constants::{
    DEFAULT_POLL_INTERVAL, MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MBAP_LENGTH_OFFSET,
};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::{LoggingMode, PacketLogger};
use crate::transport::Transport;

/// Predicate deciding whether an incoming message answers an expectation.
pub type MessagePredicate<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

/// Custom handler for messages no expectation claimed. Returns `true` when
/// it consumed the message.
pub type MessageHandler<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

/// Receiver side of a registered expectation.
pub type ExpectationReceiver<A> = oneshot::Receiver<ModbusResult<A>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Message codec configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// Sleep between receive polls when idle or short of a full frame
    pub poll_interval: Duration,
    /// Decode incoming frames as responses (client side) or requests
    pub response: bool,
    /// Dump every sent and received frame through `tracing`
    pub packet_logging: bool,
    /// Layout of packet dumps
    pub logging_mode: LoggingMode,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            response: true,
            packet_logging: false,
            logging_mode: LoggingMode::Raw,
        }
    }
}

impl CodecConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_response(mut self, response: bool) -> Self {
        self.response = response;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }
}

/// A pending wait for one matching message.
struct Expectation<A> {
    id: u64,
    predicate: MessagePredicate<A>,
    responder: oneshot::Sender<ModbusResult<A>>,
    registered_at: DateTime<Utc>,
    ttl: Option<Duration>,
}

impl<A> Expectation<A> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.registered_at > ttl,
            Err(_) => false,
        }
    }

    fn fail(self, err: ModbusError) {
        // The waiter may have given up already
        let _ = self.responder.send(Err(err));
    }
}

/// State shared between the codec handle and its receive loop.
struct Routing<A> {
    expectations: Mutex<Vec<Expectation<A>>>,
    handler: RwLock<Option<MessageHandler<A>>>,
    default_incoming: Mutex<Option<mpsc::UnboundedSender<A>>>,
    next_expectation_id: AtomicU64,
}

impl<A: ModbusAdu> Routing<A> {
    fn new() -> Self {
        Self {
            expectations: Mutex::new(Vec::new()),
            handler: RwLock::new(None),
            default_incoming: Mutex::new(None),
            next_expectation_id: AtomicU64::new(0),
        }
    }

    fn register(
        &self,
        predicate: MessagePredicate<A>,
        ttl: Option<Duration>,
    ) -> (u64, ExpectationReceiver<A>) {
        let (responder, receiver) = oneshot::channel();
        let id = self.next_expectation_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.expectations).push(Expectation {
            id,
            predicate,
            responder,
            registered_at: Utc::now(),
            ttl,
        });
        (id, receiver)
    }

    fn remove(&self, id: u64) -> bool {
        let mut expectations = lock(&self.expectations);
        let before = expectations.len();
        expectations.retain(|e| e.id != id);
        expectations.len() != before
    }

    fn pending(&self) -> usize {
        lock(&self.expectations).len()
    }

    fn expire(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Expectation<A>> = {
            let mut expectations = lock(&self.expectations);
            let (expired, kept): (Vec<_>, Vec<_>) =
                expectations.drain(..).partition(|e| e.is_expired(now));
            *expectations = kept;
            expired
        };
        let count = expired.len();
        for expectation in expired {
            let ttl = expectation.ttl.unwrap_or_default();
            expectation.fail(ModbusError::timeout(
                "waiting for expected message",
                ttl.as_millis() as u64,
            ));
        }
        count
    }

    fn fail_all(&self, err: ModbusError) -> usize {
        let pending: Vec<Expectation<A>> = lock(&self.expectations).drain(..).collect();
        let count = pending.len();
        for expectation in pending {
            expectation.fail(err.clone());
        }
        count
    }

    fn dispatch(&self, message: A) {
        // Predicates run outside the lock so they may call back into the codec
        let candidates: Vec<(u64, MessagePredicate<A>)> = lock(&self.expectations)
            .iter()
            .map(|e| (e.id, Arc::clone(&e.predicate)))
            .collect();
        let mut matched = None;
        for (id, predicate) in candidates {
            if !predicate(&message) {
                continue;
            }
            let mut expectations = lock(&self.expectations);
            // Gone if it expired or was withdrawn meanwhile
            if let Some(index) = expectations.iter().position(|e| e.id == id) {
                matched = Some(expectations.remove(index));
                break;
            }
        }
        if let Some(expectation) = matched {
            trace!("Message tid={} matched expectation {}", message.transaction_id(), expectation.id);
            if expectation.responder.send(Ok(message)).is_err() {
                debug!("Expectation {} was abandoned before its message arrived", expectation.id);
            }
            return;
        }

        let handler = match self.handler.read() {
            Ok(handler) => handler.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(handler) = handler {
            if handler(&message) {
                return;
            }
        }

        let mut default_incoming = lock(&self.default_incoming);
        if let Some(sender) = default_incoming.as_ref() {
            match sender.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => {
                    *default_incoming = None;
                    warn!(
                        "Default incoming channel closed, dropping unexpected message: {}",
                        crate::logging::interpret_adu(&message)
                    );
                    return;
                }
            }
        }
        warn!(
            "No expectation matched, dropping message: {}",
            crate::logging::interpret_adu(&message)
        );
    }
}

/// Pull one complete frame out of `transport`, if buffered.
async fn receive_frame<T: Transport, A: ModbusAdu>(
    transport: &mut T,
    response: bool,
    logger: &PacketLogger,
) -> ModbusResult<Option<A>> {
    let available = transport.num_readable_bytes().await?;
    if available < MBAP_HEADER_LEN {
        return Ok(None);
    }

    let header = transport.peek_readable_bytes(MBAP_HEADER_LEN).await?;
    if header.len() < MBAP_HEADER_LEN {
        return Ok(None);
    }
    let length =
        u16::from_be_bytes([header[MBAP_LENGTH_OFFSET], header[MBAP_LENGTH_OFFSET + 1]]) as usize;
    if length == 0 || length > MAX_MBAP_LENGTH {
        // Resynchronise on whatever arrives next
        let discarded = transport.read(available).await?;
        warn!(
            "Invalid frame length {}, discarded {} buffered bytes",
            length,
            discarded.len()
        );
        return Err(ModbusError::frame(format!(
            "length field {} outside 1..={}",
            length, MAX_MBAP_LENGTH
        )));
    }

    let total = MBAP_HEADER_LEN + length;
    if available < total {
        trace!("Partial frame: {} of {} bytes buffered", available, total);
        return Ok(None);
    }

    let raw = transport.read(total).await?;
    match A::from_bytes(&raw, response) {
        Ok(message) => {
            logger.log_received(&raw, Some(&message));
            Ok(Some(message))
        }
        Err(e) => {
            logger.log_received::<A>(&raw, None);
            Err(e)
        }
    }
}

async fn run_receive_loop<T: Transport, A: ModbusAdu>(
    transport: Arc<tokio::sync::Mutex<T>>,
    routing: Arc<Routing<A>>,
    config: CodecConfig,
    logger: PacketLogger,
) {
    debug!("[MODBUS-{}] receive loop started", A::PROTOCOL);
    loop {
        let expired = routing.expire(Utc::now());
        if expired > 0 {
            debug!("{} expectations timed out", expired);
        }

        if routing.pending() == 0 {
            tokio::time::sleep(config.poll_interval).await;
            continue;
        }

        let received = {
            let mut transport = transport.lock().await;
            receive_frame::<T, A>(&mut transport, config.response, &logger).await
        };
        match received {
            Ok(Some(message)) => routing.dispatch(message),
            Ok(None) => tokio::time::sleep(config.poll_interval).await,
            Err(e) => {
                warn!("[MODBUS-{}] receive failed: {}", A::PROTOCOL, e);
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

/// Frames `A` messages over a transport `T` and correlates responses.
pub struct MessageCodec<T: Transport, A: ModbusAdu> {
    transport: Arc<tokio::sync::Mutex<T>>,
    routing: Arc<Routing<A>>,
    config: CodecConfig,
    logger: PacketLogger,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport, A: ModbusAdu> MessageCodec<T, A> {
    pub fn new(transport: T, config: CodecConfig) -> Self {
        let logger = PacketLogger::new(config.packet_logging, config.logging_mode);
        Self {
            transport: Arc::new(tokio::sync::Mutex::new(transport)),
            routing: Arc::new(Routing::new()),
            config,
            logger,
            receive_loop: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Connect the transport and start the receive loop.
    pub async fn connect(&self) -> ModbusResult<()> {
        self.transport.lock().await.connect().await?;

        let mut receive_loop = lock(&self.receive_loop);
        if receive_loop.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        *receive_loop = Some(tokio::spawn(run_receive_loop(
            Arc::clone(&self.transport),
            Arc::clone(&self.routing),
            self.config.clone(),
            self.logger,
        )));
        Ok(())
    }

    /// Stop the receive loop, close the transport and fail every pending
    /// expectation with a connection error.
    pub async fn disconnect(&self) -> ModbusResult<()> {
        if let Some(handle) = lock(&self.receive_loop).take() {
            handle.abort();
        }
        let failed = self
            .routing
            .fail_all(ModbusError::connection("codec disconnected"));
        if failed > 0 {
            debug!("Disconnect failed {} pending expectations", failed);
        }
        self.transport.lock().await.close().await
    }

    pub fn is_running(&self) -> bool {
        lock(&self.receive_loop)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    /// Serialize `message` and write it with a single transport write.
    pub async fn send(&self, message: &A) -> ModbusResult<()> {
        let frame = message.to_bytes()?;
        let mut transport = self.transport.lock().await;
        transport.write(&frame).await?;
        self.logger.log_sent(&frame, message);
        Ok(())
    }

    /// Register interest in the first incoming message matching `predicate`.
    ///
    /// With a `ttl`, the receiver resolves to a timeout error once the
    /// expectation has been pending longer than that. Predicates run on the
    /// receive loop without any codec lock held.
    pub fn expect<P>(&self, predicate: P, ttl: Option<Duration>) -> ExpectationReceiver<A>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.routing.register(Arc::new(predicate), ttl).1
    }

    /// Register an expectation, then send `message`. The expectation is
    /// withdrawn if the send fails.
    pub async fn send_request<P>(
        &self,
        message: &A,
        predicate: P,
        ttl: Option<Duration>,
    ) -> ModbusResult<ExpectationReceiver<A>>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let (id, receiver) = self.routing.register(Arc::new(predicate), ttl);
        if let Err(e) = self.send(message).await {
            self.routing.remove(id);
            return Err(e);
        }
        Ok(receiver)
    }

    /// Expire every expectation older than its ttl at `now`. Returns the
    /// number expired.
    pub fn timeout_expectations(&self, now: DateTime<Utc>) -> usize {
        self.routing.expire(now)
    }

    pub fn pending_expectations(&self) -> usize {
        self.routing.pending()
    }

    /// Install the handler consulted for messages no expectation claimed.
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let handler: MessageHandler<A> = Arc::new(handler);
        match self.routing.handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    /// Route unclaimed messages into a fresh channel and return its
    /// receiver. A previously taken receiver stops getting messages.
    pub fn take_default_incoming_messages(&self) -> mpsc::UnboundedReceiver<A> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *lock(&self.routing.default_incoming) = Some(sender);
        receiver
    }

    /// Read one complete frame if the transport has buffered it. The
    /// receive loop does this on its own; exposed for callers driving the
    /// codec by hand.
    pub async fn receive(&self) -> ModbusResult<Option<A>> {
        let mut transport = self.transport.lock().await;
        receive_frame::<T, A>(&mut transport, self.config.response, &self.logger).await
    }
}

impl<T: Transport, A: ModbusAdu> Drop for MessageCodec<T, A> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.receive_loop).take() {
            handle.abort();
        }
    }
}
