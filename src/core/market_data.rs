//! Normalized outbound market-data protocol
//!
//! Every event leaves the bridge as an [`OutboundFrame`]: a header with a
//! process-wide monotonically increasing sequence number and send timestamp,
//! followed by one of the event bodies:
//! - `Snapshot`: consolidated ladder state after assembly
//! - `Incremental`: positional ladder updates, trades and traded volume
//! - `SecurityStatus`: trading status and price limits

use crate::core::enums::{AggressorSide, EntryType, TradingStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Positional update action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateAction {
    New,
    Change,
    Delete,
}

impl UpdateAction {
    /// Map MDUpdateAction(279)
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(UpdateAction::New),
            "1" => Some(UpdateAction::Change),
            "2" => Some(UpdateAction::Delete),
            _ => None,
        }
    }
}

/// One entry of a consolidated snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookEntry {
    pub entry_type: EntryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    /// 1-based position within the entry type's ladder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggressor_side: Option<AggressorSide>,
}

/// One entry of an incremental update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalEntry {
    pub action: UpdateAction,
    pub entry_type: EntryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggressor_side: Option<AggressorSide>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvent {
    pub instrument_id: String,
    /// Exchange SendingTime of the first assembled fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_time_ns: Option<u64>,
    pub entries: Vec<BookEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalEvent {
    pub instrument_id: String,
    pub entries: Vec<IncrementalEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatusEvent {
    pub instrument_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_status: Option<TradingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_limit_price: Option<f64>,
}

/// Event body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "body")]
pub enum MarketEvent {
    Snapshot(SnapshotEvent),
    Incremental(IncrementalEvent),
    SecurityStatus(SecurityStatusEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameHeader {
    pub msg_seq_num: u64,
    pub sending_time_ns: u64,
}

/// Published unit of the outbound protocol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame {
    pub header: FrameHeader,
    #[serde(flatten)]
    pub event: MarketEvent,
}

/// Sequencing publisher for outbound frames
///
/// Sequence assignment and channel send happen under one lock so consumers
/// always observe frames in sequence order.
pub struct EventPublisher {
    next_seq: Mutex<u64>,
    tx: broadcast::Sender<Arc<OutboundFrame>>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            next_seq: Mutex::new(1),
            tx,
        }
    }

    /// Receive every frame published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OutboundFrame>> {
        self.tx.subscribe()
    }

    /// Stamp and publish an event, returning its sequence number
    ///
    /// Frames published with no subscriber attached are dropped.
    pub fn publish(&self, event: MarketEvent) -> u64 {
        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;
        *next_seq += 1;

        let frame = OutboundFrame {
            header: FrameHeader {
                msg_seq_num: seq,
                sending_time_ns: unix_nanos_now(),
            },
            event,
        };
        let _ = self.tx.send(Arc::new(frame));
        seq
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch
#[inline]
pub fn unix_nanos_now() -> u64 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event() -> MarketEvent {
        MarketEvent::SecurityStatus(SecurityStatusEvent {
            instrument_id: "/FUT/CME/ES/1".into(),
            trading_status: Some(TradingStatus::ReadyToTrade),
            high_limit_price: None,
            low_limit_price: None,
        })
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();

        assert_eq!(publisher.publish(status_event()), 1);
        assert_eq!(publisher.publish(status_event()), 2);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.header.msg_seq_num, 1);
        assert_eq!(second.header.msg_seq_num, 2);
        assert!(second.header.sending_time_ns >= first.header.sending_time_ns);
    }

    #[test]
    fn test_frame_json_shape() {
        let frame = OutboundFrame {
            header: FrameHeader { msg_seq_num: 3, sending_time_ns: 10 },
            event: status_event(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["header"]["msgSeqNum"], 3);
        assert_eq!(json["type"], "SecurityStatus");
        assert_eq!(json["body"]["tradingStatus"], "ReadyToTrade");
        assert!(json["body"].get("highLimitPrice").is_none());
    }

    #[test]
    fn test_update_action_codes() {
        assert_eq!(UpdateAction::from_code("0"), Some(UpdateAction::New));
        assert_eq!(UpdateAction::from_code("2"), Some(UpdateAction::Delete));
        assert_eq!(UpdateAction::from_code("9"), None);
    }
}
