//! Test helpers: an in-memory session and builders for exchange messages
//!
//! The session's outbound side is the writer channel, so tests read what
//! would have gone on the wire with `next_sent`.

use crate::fix::tags::{self, msg_type};
use crate::fix::{FixMessage, FixParser};
use crate::infrastructure::config::SessionConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::session::{FixSession, MessageBus};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

const TEST_SENDING_TIME: &str = "20240305-14:07:09.123";

pub fn test_config() -> SessionConfig {
    SessionConfig {
        sender_comp_id: "SENDER".into(),
        target_comp_id: "TARGET".into(),
        secure_data: "secret".into(),
        username: "user".into(),
        password: "pass".into(),
        heartbeat_interval_secs: 30,
        logon_timeout_secs: 5,
        ..SessionConfig::default()
    }
}

/// Session wired to a fresh bus; the receiver holds encoded outbound frames
pub fn test_session() -> (Arc<FixSession>, UnboundedReceiver<Bytes>) {
    let bus = Arc::new(MessageBus::new(1024));
    FixSession::new(test_config(), bus, Arc::new(MetricsCollector::new()))
}

/// Bare inbound message with header fields the session checks
pub fn inbound(seq: u64, msg_type: &str) -> FixMessage {
    let mut msg = FixMessage::new();
    msg.append(tags::MSG_TYPE, msg_type)
        .append(tags::SENDER_COMP_ID, "TARGET")
        .append(tags::TARGET_COMP_ID, "SENDER")
        .append(tags::MSG_SEQ_NUM, seq)
        .append(tags::SENDING_TIME, TEST_SENDING_TIME);
    msg
}

/// Await and decode the next outbound frame
pub async fn next_sent(rx: &mut UnboundedReceiver<Bytes>) -> FixMessage {
    let frame = rx.recv().await.expect("outbound channel closed");
    let mut parser = FixParser::new();
    parser.append_buffer(&frame);
    parser
        .get_message()
        .expect("outbound frame does not parse")
        .expect("outbound frame incomplete")
}

/// Decode every frame queued so far
pub fn drain_sent(rx: &mut UnboundedReceiver<Bytes>) -> Vec<FixMessage> {
    let mut parser = FixParser::new();
    while let Ok(frame) = rx.try_recv() {
        parser.append_buffer(&frame);
    }
    let mut out = Vec::new();
    while let Some(msg) = parser.get_message().expect("outbound frame does not parse") {
        out.push(msg);
    }
    out
}

/// One SecurityDefinition response for a CME ES future
pub fn secdef_response(seq: u64, req_id: &str, total: Option<usize>, security_id: &str) -> FixMessage {
    let mut msg = inbound(seq, msg_type::SECURITY_DEFINITION);
    msg.append(tags::SECURITY_REQ_ID, req_id);
    if let Some(total) = total {
        msg.append(tags::TOT_NUM_REPORTS, total);
    }
    msg.append(tags::SECURITY_TYPE, "FUT")
        .append(tags::SECURITY_EXCHANGE, "CME")
        .append(tags::SYMBOL, "ES")
        .append(tags::SECURITY_ID, security_id);
    msg
}

/// Full refresh fragment; entries are (exchange type code, price, size)
pub fn snapshot_fragment(security_id: &str, entries: &[(&str, f64, f64)]) -> FixMessage {
    let mut msg = inbound(0, msg_type::MARKET_DATA_SNAPSHOT);
    msg.append(tags::SECURITY_ID, security_id)
        .append(tags::NO_MD_ENTRIES, entries.len());
    for (code, price, size) in entries {
        msg.append(tags::MD_ENTRY_TYPE, code)
            .append(tags::MD_ENTRY_PX, price)
            .append(tags::MD_ENTRY_SIZE, size);
    }
    msg
}

/// Incremental refresh; entries are (action, exchange type code, level, price, size)
pub fn incremental(
    security_id: &str,
    entries: &[(&str, &str, u32, Option<f64>, f64)],
) -> FixMessage {
    let mut msg = inbound(0, msg_type::MARKET_DATA_INCREMENTAL);
    msg.append(tags::NO_MD_ENTRIES, entries.len());
    if entries.is_empty() {
        msg.append(tags::SECURITY_ID, security_id);
    }
    for (action, code, level, price, size) in entries {
        msg.append(tags::MD_UPDATE_ACTION, action)
            .append(tags::MD_ENTRY_TYPE, code)
            .append(tags::SECURITY_ID, security_id)
            .append(tags::MD_ENTRY_LEVEL, level);
        if let Some(price) = price {
            msg.append(tags::MD_ENTRY_PX, price);
        }
        msg.append(tags::MD_ENTRY_SIZE, size);
    }
    msg
}
