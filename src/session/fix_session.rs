//! FIX session lifecycle
//!
//! - Logon handshake with credentials and the SecurityDefinition capability flag
//! - Strict sequence numbering: outbound assigned pre-send, inbound must step by 1
//! - TestRequest answered immediately with a Heartbeat echoing TestReqID
//! - Keepalive Heartbeat every interval while the session is up
//! - Every validated inbound message republished on the bus after session handling
//!
//! There is no resend/gap-fill path: an inbound gap is a fatal `SequenceGap`.

use crate::fix::tags::{self, msg_type};
use crate::fix::FixMessage;
use crate::infrastructure::config::SessionConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::log_session;
use crate::session::bus::MessageBus;
use crate::session::transport::{ConnectionState, FixReader, TransportError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::format_description::BorrowedFormatItem;
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::Level;

/// SendingTime(52) as emitted: UTC with millisecond precision
const SENDING_TIME_FORMAT: &[BorrowedFormatItem<'static>] = time::macros::format_description!(
    "[year][month][day]-[hour]:[minute]:[second].[subsecond digits:3]"
);

/// SendingTime(52) as accepted: any sub-second precision
const SENDING_TIME_PARSE_FORMAT: &[BorrowedFormatItem<'static>] = time::macros::format_description!(
    "[year][month][day]-[hour]:[minute]:[second].[subsecond]"
);

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("inbound sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },
    #[error("inbound sequence number exhausted after {0}")]
    SequenceExhausted(u64),
    #[error("missing required field {0}")]
    MissingField(u32),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("session disconnected")]
    Disconnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Protocol faults end the session; there is no safe mid-session resync
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::SequenceGap { .. }
                | SessionError::SequenceExhausted(_)
                | SessionError::MissingField(_)
                | SessionError::Transport(TransportError::Framing(_))
        )
    }
}

/// Outbound and inbound sequence counters
#[derive(Debug)]
pub struct SequenceState {
    next_outbound: u64,
    last_inbound: Option<u64>,
}

impl SequenceState {
    pub fn new() -> Self {
        Self {
            next_outbound: 1,
            last_inbound: None,
        }
    }

    /// Take the next outbound number; never reused even if the send fails
    #[inline]
    pub fn next_outbound(&mut self) -> u64 {
        let seq = self.next_outbound;
        self.next_outbound += 1;
        seq
    }

    /// Validate an inbound number against the last one seen
    pub fn accept_inbound(&mut self, received: u64) -> Result<(), SessionError> {
        if let Some(last) = self.last_inbound {
            let expected = last
                .checked_add(1)
                .ok_or(SessionError::SequenceExhausted(last))?;
            if received != expected {
                return Err(SessionError::SequenceGap { expected, received });
            }
        }
        self.last_inbound = Some(received);
        Ok(())
    }

    #[inline]
    pub fn last_inbound(&self) -> Option<u64> {
        self.last_inbound
    }
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Live FIX session
///
/// Outbound frames are encoded under the sequence lock and queued to the
/// writer task, so wire order always matches sequence order.
pub struct FixSession {
    config: SessionConfig,
    sequence: Mutex<SequenceState>,
    outbound: mpsc::UnboundedSender<Bytes>,
    bus: Arc<MessageBus>,
    state: watch::Sender<ConnectionState>,
    metrics: Arc<MetricsCollector>,
    keepalive_started: AtomicBool,
}

impl FixSession {
    /// Create a session; the returned receiver feeds the transport writer
    pub fn new(
        config: SessionConfig,
        bus: Arc<MessageBus>,
        metrics: Arc<MetricsCollector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connected);
        let session = Arc::new(Self {
            config,
            sequence: Mutex::new(SequenceState::new()),
            outbound,
            bus,
            state,
            metrics,
            keepalive_started: AtomicBool::new(false),
        });
        (session, rx)
    }

    #[inline]
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Last validated inbound sequence number
    pub fn last_inbound_seq(&self) -> Option<u64> {
        self.sequence.lock().last_inbound()
    }

    /// Send Logon and wait for the exchange's acknowledgment
    pub async fn logon(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut state_rx = self.state.subscribe();

        let mut msg = FixMessage::new();
        msg.append(tags::MSG_TYPE, msg_type::LOGON)
            .append(tags::ENCRYPT_METHOD, 0)
            .append(tags::HEART_BT_INT, self.config.heartbeat_interval_secs)
            .append(tags::USERNAME, &self.config.username)
            .append(tags::PASSWORD, &self.config.password)
            .append(tags::NO_MSG_TYPES, 1)
            .append(tags::REF_MSG_TYPE, msg_type::SECURITY_DEFINITION_REQUEST);
        self.send_application_message(msg)?;
        log_session!(Level::INFO, user = %self.config.username, "logon sent");

        let ack = timeout(
            self.config.logon_timeout(),
            state_rx.wait_for(|s| *s != ConnectionState::Connected),
        )
        .await
        .map_err(|_| SessionError::AuthenticationFailed("no logon acknowledgment".into()))?;

        match ack.map(|s| *s) {
            Ok(ConnectionState::LoggedOn) => Ok(()),
            _ => Err(SessionError::AuthenticationFailed(
                "disconnected before logon acknowledgment".into(),
            )),
        }
    }

    /// Assign MsgSeqNum and SendingTime, encode and queue for the writer
    ///
    /// `msg` carries MsgType(35) and the body; the standard header is built here.
    pub fn send_application_message(&self, msg: FixMessage) -> Result<u64, SessionError> {
        let msg_type = msg
            .get(tags::MSG_TYPE)
            .map(Bytes::copy_from_slice)
            .ok_or(SessionError::MissingField(tags::MSG_TYPE))?;

        let mut sequence = self.sequence.lock();
        let seq = sequence.next_outbound();

        let mut wire = FixMessage::new();
        wire.append(tags::BEGIN_STRING, &self.config.begin_string)
            .append_bytes(tags::MSG_TYPE, msg_type)
            .append(tags::SENDER_COMP_ID, &self.config.sender_comp_id)
            .append(tags::TARGET_COMP_ID, &self.config.target_comp_id)
            .append(tags::MSG_SEQ_NUM, seq)
            .append(tags::SENDING_TIME, format_sending_time(OffsetDateTime::now_utc()));
        if !self.config.secure_data.is_empty() {
            wire.append(tags::SECURE_DATA_LEN, self.config.secure_data.len())
                .append(tags::SECURE_DATA, &self.config.secure_data);
        }
        for (tag, value) in msg.fields() {
            if *tag != tags::MSG_TYPE {
                wire.append_bytes(*tag, value.clone());
            }
        }

        log_session!(Level::DEBUG, seq, msg = %wire, "send");
        self.outbound
            .send(wire.encode())
            .map_err(|_| SessionError::Disconnected)?;
        drop(sequence);

        self.metrics.record_outbound();
        Ok(seq)
    }

    /// Validate and handle one inbound message, then republish it
    pub fn on_inbound(self: &Arc<Self>, msg: FixMessage) -> Result<(), SessionError> {
        let seq = msg
            .seq_num()
            .ok_or(SessionError::MissingField(tags::MSG_SEQ_NUM))?;
        self.sequence.lock().accept_inbound(seq)?;
        self.metrics.record_inbound();

        match msg.msg_type() {
            Some(msg_type::TEST_REQUEST) => {
                let mut heartbeat = FixMessage::new();
                heartbeat.append(tags::MSG_TYPE, msg_type::HEARTBEAT);
                if let Some(id) = msg.get(tags::TEST_REQ_ID) {
                    heartbeat.append_bytes(tags::TEST_REQ_ID, Bytes::copy_from_slice(id));
                }
                self.send_application_message(heartbeat)?;
            }
            Some(msg_type::LOGON) => {
                if self.state() == ConnectionState::Connected {
                    log_session!(Level::INFO, seq, "logon acknowledged");
                    self.state.send_replace(ConnectionState::LoggedOn);
                    self.metrics.set_logged_on(true);
                    self.start_keepalive();
                }
            }
            Some(msg_type::LOGOUT) => {
                log_session!(Level::WARN, text = msg.get_str(tags::TEXT).unwrap_or(""), "logout received");
            }
            Some(msg_type::REJECT) => {
                log_session!(Level::WARN, text = msg.get_str(tags::TEXT).unwrap_or(""), "session-level reject");
            }
            Some(_) => {}
            None => return Err(SessionError::MissingField(tags::MSG_TYPE)),
        }

        self.bus.publish(Arc::new(msg));
        Ok(())
    }

    /// Read, validate and publish until the stream ends or a fault occurs
    pub async fn run_reader<R: AsyncRead + Unpin>(
        self: Arc<Self>,
        mut reader: FixReader<R>,
    ) -> Result<(), SessionError> {
        let result = loop {
            match reader.next_message().await {
                Ok(Some(msg)) => {
                    log_session!(Level::DEBUG, %msg, "recv");
                    if let Err(e) = self.on_inbound(msg) {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(SessionError::from(e)),
            }
        };

        self.mark_disconnected();
        result
    }

    /// Report disconnection; stops keepalive and fails a pending logon
    pub fn mark_disconnected(&self) {
        if self.state.send_replace(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            log_session!(Level::WARN, "session disconnected");
        }
        self.metrics.set_logged_on(false);
    }

    fn start_keepalive(self: &Arc<Self>) {
        if self.keepalive_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let session = Arc::clone(self);
        tokio::spawn(async move { session.keepalive_loop().await });
    }

    async fn keepalive_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        let mut state_rx = self.state.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut heartbeat = FixMessage::new();
                    heartbeat.append(tags::MSG_TYPE, msg_type::HEARTBEAT);
                    if let Err(e) = self.send_application_message(heartbeat) {
                        log_session!(Level::WARN, error = %e, "keepalive stopped");
                        break;
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() || *state_rx.borrow() == ConnectionState::Disconnected {
                        log_session!(Level::DEBUG, "keepalive stopped on disconnect");
                        break;
                    }
                }
            }
        }
    }
}

/// Format SendingTime(52)
pub fn format_sending_time(t: OffsetDateTime) -> String {
    t.format(SENDING_TIME_FORMAT).unwrap_or_default()
}

/// Parse SendingTime(52) into Unix nanoseconds
pub fn parse_sending_time(value: &str) -> Option<u64> {
    let t = PrimitiveDateTime::parse(value, SENDING_TIME_PARSE_FORMAT).ok()?;
    u64::try_from(t.assume_utc().unix_timestamp_nanos()).ok()
}

// Session Checklist:
// ✓ Outbound seq assigned and frame queued under one lock
// ✓ Inbound gap is fatal (no ResendRequest)
// ✓ TestRequest echoed before republishing
// ✓ Keepalive ends on Disconnected
