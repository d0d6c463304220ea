//! Market-data subscriptions and W/X dispatch
//!
//! - `subscribe` validates a control request, sends MarketDataRequest(V) and
//!   waits for the exchange to either reject (Y) or start streaming (W)
//! - `run` consumes inbound W/X in wire order and drives each instrument's
//!   [`DepthSubscription`]
//!
//! Per-instrument state lives in a registry keyed by SecurityID. Only
//! `get_or_create` inserts into it.

use crate::core::enums::EntryType;
use crate::core::instrument::InstrumentId;
use crate::core::market_data::{EventPublisher, MarketEvent};
use crate::fix::tags::{self, msg_type, subscription_request_type as srt};
use crate::fix::FixMessage;
use crate::infrastructure::config::MarketDataConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::log_md;
use crate::market_data::depth::DepthSubscription;
use crate::session::bus::{BusMessage, ALL_TOPICS};
use crate::session::correlation::{CorrelationEngine, FieldMatch};
use crate::session::fix_session::{FixSession, SessionError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::Level;

/// Depth used by the updates-only request variant
const UPDATES_ONLY_DEPTH: u32 = 10;

/// Subscription request from the control surface
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataRequest {
    pub instrument_id: String,
    /// SubscriptionRequestType(263): `0`, `1` or `2`
    pub subscription_request_type: String,
    /// 0 means the configured default
    #[serde(default)]
    pub market_depth: u32,
    /// Exchange tick codes or normalized codes; empty or `*` means all
    #[serde(default)]
    pub entry_types: Vec<String>,
}

impl MarketDataRequest {
    pub fn new(instrument_id: impl Into<String>, subscription_request_type: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            subscription_request_type: subscription_request_type.into(),
            market_depth: 0,
            entry_types: Vec::new(),
        }
    }

    /// Resolve the entry-type filter
    pub fn requested_types(&self) -> Vec<EntryType> {
        if self.entry_types.is_empty() || self.entry_types.iter().any(|t| t == "*") {
            return EntryType::ALL.to_vec();
        }
        let mut types: Vec<EntryType> = self
            .entry_types
            .iter()
            .filter_map(|code| {
                let resolved =
                    EntryType::from_exchange_code(code).or_else(|| EntryType::from_code(code));
                if resolved.is_none() {
                    log_md!(Level::WARN, code = %code, "ignoring unknown requested entry type");
                }
                resolved
            })
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

/// Result of a successful subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscribeOutcome {
    /// Sent; neither data nor a reject arrived before the timeout
    Unconfirmed,
    /// The exchange started streaming snapshot data
    Confirmed,
    /// Fire-and-forget variant
    Sent,
}

/// Request rejected by validation or by the exchange
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusinessReject {
    #[error("unsupported SubscriptionRequestType {0}")]
    UnsupportedSubscriptionRequestType(String),
    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),
    #[error("unsync snapshots not implemented yet")]
    SnapshotOnlyNotImplemented,
    #[error("{text} ({reason})")]
    MarketDataRequestRejected { text: String, reason: String },
}

/// Market-data gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("subscription pending for {0}")]
    SubscriptionPending(String),
    #[error(transparent)]
    Reject(#[from] BusinessReject),
    #[error("incremental refresh names more than one SecurityID: {0}")]
    TwoInstruments(String),
    #[error("market-data consumer overrun, {0} messages lost")]
    BusOverrun(u64),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl GatewayError {
    pub fn is_fatal(&self) -> bool {
        match self {
            GatewayError::TwoInstruments(_) | GatewayError::BusOverrun(_) => true,
            GatewayError::Session(e) => e.is_fatal(),
            _ => false,
        }
    }

    #[inline]
    pub fn is_business_reject(&self) -> bool {
        matches!(self, GatewayError::Reject(_))
    }
}

type SharedSubscription = Arc<Mutex<DepthSubscription>>;

/// Clears the in-flight flag however the subscribe call ends
struct InFlightGuard(SharedSubscription);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.lock().set_in_flight(false);
    }
}

pub struct MarketDataGateway {
    session: Arc<FixSession>,
    correlation: CorrelationEngine,
    config: MarketDataConfig,
    subscriptions: Mutex<HashMap<String, SharedSubscription>>,
    next_md_req_id: AtomicU64,
    events: Arc<EventPublisher>,
    metrics: Arc<MetricsCollector>,
}

impl MarketDataGateway {
    pub fn new(
        session: Arc<FixSession>,
        config: MarketDataConfig,
        events: Arc<EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let correlation = CorrelationEngine::new(Arc::clone(session.bus()));
        Self {
            session,
            correlation,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            next_md_req_id: AtomicU64::new(0),
            events,
            metrics,
        }
    }

    #[inline]
    pub fn events(&self) -> &Arc<EventPublisher> {
        &self.events
    }

    /// Subscription for `id`, created on first use with a fresh MDReqID
    pub fn get_or_create(&self, id: &InstrumentId) -> SharedSubscription {
        let mut subscriptions = self.subscriptions.lock();
        let sub = subscriptions.entry(id.security_id.clone()).or_insert_with(|| {
            let md_req_id = self.next_md_req_id.fetch_add(1, Ordering::Relaxed);
            Arc::new(Mutex::new(DepthSubscription::new(
                id.to_string(),
                md_req_id.to_string(),
                self.config.default_depth as usize,
            )))
        });
        Arc::clone(sub)
    }

    fn lookup(&self, security_id: &str) -> Option<SharedSubscription> {
        self.subscriptions.lock().get(security_id).cloned()
    }

    /// Number of instruments ever subscribed
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub async fn subscribe(
        self: &Arc<Self>,
        request: &MarketDataRequest,
    ) -> Result<SubscribeOutcome, GatewayError> {
        let kind = request.subscription_request_type.as_str();
        if ![srt::SNAPSHOT, srt::SNAPSHOT_AND_UPDATES, srt::UNSUBSCRIBE].contains(&kind) {
            return Err(BusinessReject::UnsupportedSubscriptionRequestType(kind.to_string()).into());
        }
        let id = InstrumentId::decode(&request.instrument_id)
            .map_err(|e| BusinessReject::InvalidInstrument(e.to_string()))?;

        match kind {
            srt::SNAPSHOT_AND_UPDATES => self.subscribe_snapshot_and_updates(&id, request).await,
            srt::UNSUBSCRIBE => {
                let sub = self.get_or_create(&id);
                let md_req_id = sub.lock().md_req_id().to_string();
                let msg = market_data_request(
                    &md_req_id,
                    srt::UNSUBSCRIBE,
                    UPDATES_ONLY_DEPTH,
                    None,
                    &id,
                    &EntryType::ALL,
                );
                self.session.send_application_message(msg)?;
                log_md!(Level::INFO, instrument = %id, md_req_id = %md_req_id, "updates-only request sent");
                Ok(SubscribeOutcome::Sent)
            }
            _ => Err(BusinessReject::SnapshotOnlyNotImplemented.into()),
        }
    }

    async fn subscribe_snapshot_and_updates(
        &self,
        id: &InstrumentId,
        request: &MarketDataRequest,
    ) -> Result<SubscribeOutcome, GatewayError> {
        let depth = match request.market_depth {
            0 => self.config.default_depth,
            depth => depth,
        };
        let requested = request.requested_types();

        let sub = self.get_or_create(id);
        let _in_flight = {
            let mut state = sub.lock();
            if state.is_buffering() || state.in_flight() {
                return Err(GatewayError::SubscriptionPending(id.to_string()));
            }
            state.set_in_flight(true);
            InFlightGuard(Arc::clone(&sub))
        };

        let previous = {
            let state = sub.lock();
            state.is_assembled().then(|| {
                (
                    state.md_req_id().to_string(),
                    state.max_depth() as u32,
                    state.requested().to_vec(),
                )
            })
        };
        if let Some((md_req_id, old_depth, old_types)) = previous {
            let msg =
                market_data_request(&md_req_id, srt::UNSUBSCRIBE, old_depth, None, id, &old_types);
            self.session.send_application_message(msg)?;
            log_md!(Level::INFO, instrument = %id, "unsubscribed before resubscribe");
            tokio::time::sleep(self.config.resubscribe_settle()).await;
        }

        let md_req_id = {
            let mut state = sub.lock();
            state.reset_for_snapshot(depth as usize, requested.clone());
            state.md_req_id().to_string()
        };

        let mut pending = self.correlation.listen_until(
            &[msg_type::MARKET_DATA_REQUEST_REJECT, msg_type::MARKET_DATA_SNAPSHOT],
            FieldMatch::new()
                .or_field(tags::MD_REQ_ID, md_req_id.as_str())
                .or_field(tags::SECURITY_ID, id.security_id.as_str()),
            Some(self.config.confirmation_timeout()),
        );
        let msg = market_data_request(
            &md_req_id,
            srt::EXCHANGE_SNAPSHOT_AND_UPDATES,
            depth,
            Some(self.config.md_update_type),
            id,
            &requested,
        );
        self.session.send_application_message(msg)?;
        log_md!(Level::INFO, instrument = %id, md_req_id = %md_req_id, depth, "snapshot+updates request sent");

        while let Some(msg) = pending.next().await {
            if !pending.is_finished() {
                continue;
            }
            match msg.msg_type() {
                Some(msg_type::MARKET_DATA_REQUEST_REJECT) => {
                    let text = msg.get_str(tags::TEXT).unwrap_or_default().to_string();
                    let reason = msg.get_str(tags::MD_REQ_REJ_REASON).unwrap_or_default().to_string();
                    log_md!(Level::WARN, instrument = %id, %text, %reason, "market data request rejected");
                    return Err(BusinessReject::MarketDataRequestRejected { text, reason }.into());
                }
                Some(msg_type::MARKET_DATA_SNAPSHOT) => return Ok(SubscribeOutcome::Confirmed),
                _ => {}
            }
        }

        log_md!(Level::WARN, instrument = %id, "no confirmation for market data request");
        Ok(SubscribeOutcome::Unconfirmed)
    }

    /// Consume W/X until the bus closes or a fatal fault occurs
    pub async fn run(self: Arc<Self>) -> Result<(), GatewayError> {
        let mut rx = self.session.bus().subscribe(ALL_TOPICS);
        loop {
            match rx.recv().await {
                Ok(msg) => match msg.msg_type() {
                    Some(msg_type::MARKET_DATA_SNAPSHOT) => self.on_snapshot(msg),
                    Some(msg_type::MARKET_DATA_INCREMENTAL) => self.on_incremental(&msg)?,
                    _ => {}
                },
                Err(RecvError::Lagged(skipped)) => {
                    log_md!(Level::ERROR, skipped, "market data consumer lagged");
                    return Err(GatewayError::BusOverrun(skipped));
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }

    fn on_snapshot(self: &Arc<Self>, msg: BusMessage) {
        let Some(security_id) = msg.get_str(tags::SECURITY_ID) else {
            log_md!(Level::WARN, "full refresh without SecurityID");
            return;
        };
        let Some(sub) = self.lookup(security_id) else {
            log_md!(Level::WARN, security_id, "full refresh for unsubscribed instrument");
            return;
        };

        let mut state = sub.lock();
        if state.is_assembled() {
            let events = state.apply_refresh_after_assembly(&msg);
            self.publish_all(events);
            return;
        }
        if state.buffer_snapshot(Arc::clone(&msg), Instant::now()) {
            drop(state);
            self.spawn_assembly_timer(sub);
        }
    }

    /// Assemble once no fragment has arrived for the idle window
    fn spawn_assembly_timer(self: &Arc<Self>, sub: SharedSubscription) {
        let gateway = Arc::clone(self);
        let idle = self.config.snapshot_idle();
        tokio::spawn(async move {
            loop {
                let remaining = sub.lock().idle_remaining(Instant::now(), idle);
                match remaining {
                    // Flushed by an incremental or already assembled
                    None => return,
                    Some(wait) if wait.is_zero() => break,
                    Some(wait) => tokio::time::sleep(wait).await,
                }
            }
            let mut state = sub.lock();
            let events = state.assemble();
            gateway.publish_all(events);
        });
    }

    fn on_incremental(&self, msg: &FixMessage) -> Result<(), GatewayError> {
        let mut ids = msg
            .fields()
            .iter()
            .filter(|(tag, _)| *tag == tags::SECURITY_ID)
            .map(|(_, value)| value.as_ref());
        let first = ids.next();
        if let Some(first) = first {
            if ids.any(|other| other != first) {
                return Err(GatewayError::TwoInstruments(msg.to_string()));
            }
        }
        let Some(security_id) = first.and_then(|v| std::str::from_utf8(v).ok()) else {
            log_md!(Level::WARN, "incremental refresh without SecurityID");
            return Ok(());
        };
        let Some(sub) = self.lookup(security_id) else {
            log_md!(Level::WARN, security_id, "incremental refresh for unsubscribed instrument");
            return Ok(());
        };

        let mut state = sub.lock();
        if state.is_buffering() {
            let events = state.assemble();
            self.publish_all(events);
        }
        if !state.is_assembled() {
            log_md!(Level::WARN, security_id, "incremental refresh before snapshot");
            return Ok(());
        }
        let events = state.apply_incremental(msg);
        self.publish_all(events);
        Ok(())
    }

    /// Publish in order; callers hold the subscription lock
    fn publish_all(&self, events: Vec<MarketEvent>) {
        for event in events {
            match &event {
                MarketEvent::Snapshot(_) => self.metrics.record_snapshot(),
                MarketEvent::Incremental(_) => self.metrics.record_incremental(),
                MarketEvent::SecurityStatus(_) => {}
            }
            self.events.publish(event);
        }
    }
}

/// MarketDataRequest(V) body
fn market_data_request(
    md_req_id: &str,
    subscription_request_type: &str,
    depth: u32,
    md_update_type: Option<u32>,
    id: &InstrumentId,
    types: &[EntryType],
) -> FixMessage {
    let mut codes: Vec<&str> = types.iter().filter_map(|t| t.exchange_code()).collect();
    codes.sort_unstable();
    codes.dedup();

    let mut msg = FixMessage::new();
    msg.append(tags::MSG_TYPE, msg_type::MARKET_DATA_REQUEST)
        .append(tags::MD_REQ_ID, md_req_id)
        .append(tags::SUBSCRIPTION_REQUEST_TYPE, subscription_request_type)
        .append(tags::MARKET_DEPTH, depth);
    if let Some(update_type) = md_update_type {
        msg.append(tags::MD_UPDATE_TYPE, update_type);
    }
    msg.append(tags::SECURITY_TYPE, id.security_type.code())
        .append(tags::SECURITY_EXCHANGE, &id.exchange)
        .append(tags::SYMBOL, &id.symbol);
    if let Some(put_or_call) = id.put_or_call {
        msg.append(tags::PUT_OR_CALL, put_or_call.code());
    }
    msg.append(tags::SECURITY_ID, &id.security_id)
        .append(tags::NO_MD_ENTRY_TYPES, codes.len());
    for code in codes {
        msg.append(tags::MD_ENTRY_TYPE, code);
    }
    msg
}

// Gateway Checklist:
// ✓ W/X consumed from one ordered stream
// ✓ Assembly timer restarts on every fragment
// ✓ Events published under the subscription lock
// ✓ In-flight flag cleared on every exit path
// ✓ Lagged consumer is fatal

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market_data::OutboundFrame;
    use crate::test_utils::{drain_sent, inbound, incremental, next_sent, snapshot_fragment, test_session};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::sync::mpsc::UnboundedReceiver;

    const ES: &str = "/FUT/CME/ES/1";

    struct Harness {
        gateway: Arc<MarketDataGateway>,
        session: Arc<FixSession>,
        wire: UnboundedReceiver<Bytes>,
        frames: broadcast::Receiver<Arc<OutboundFrame>>,
    }

    fn harness() -> Harness {
        let (session, wire) = test_session();
        let events = Arc::new(EventPublisher::new(256));
        let frames = events.subscribe();
        let gateway = Arc::new(MarketDataGateway::new(
            Arc::clone(&session),
            MarketDataConfig::default(),
            events,
            Arc::new(MetricsCollector::new()),
        ));
        Harness { gateway, session, wire, frames }
    }

    fn publish(session: &FixSession, msg: FixMessage) {
        session.bus().publish(Arc::new(msg));
    }

    #[tokio::test]
    async fn test_request_validation() {
        let h = harness();

        let err = h.gateway.subscribe(&MarketDataRequest::new(ES, "5")).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Reject(BusinessReject::UnsupportedSubscriptionRequestType(ref t)) if t == "5"
        ));

        let err = h.gateway.subscribe(&MarketDataRequest::new(ES, "0")).await.unwrap_err();
        assert_eq!(err.to_string(), "unsync snapshots not implemented yet");
        assert!(err.is_business_reject());

        let err = h.gateway.subscribe(&MarketDataRequest::new("FUT/CME", "1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Reject(BusinessReject::InvalidInstrument(_))));
        assert_eq!(h.gateway.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_confirmed_then_snapshot_published() {
        let mut h = harness();
        tokio::spawn(Arc::clone(&h.gateway).run());
        tokio::task::yield_now().await;

        let responder = {
            let session = Arc::clone(&h.session);
            let mut wire = h.wire;
            tokio::spawn(async move {
                let req = next_sent(&mut wire).await;
                let mut first = snapshot_fragment("1", &[("0", 99.0, 1.0), ("1", 100.0, 2.0)]);
                first.append(tags::SECURITY_STATUS, 2);
                publish(&session, first);
                publish(&session, snapshot_fragment("1", &[("0", 99.5, 3.0), ("4", 99.75, 1.0)]));
                req
            })
        };

        let mut request = MarketDataRequest::new(ES, "1");
        request.entry_types = vec!["0".into(), "1".into(), "4".into()];
        let outcome = h.gateway.subscribe(&request).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Confirmed);

        let req = responder.await.unwrap();
        assert_eq!(req.msg_type(), Some(msg_type::MARKET_DATA_REQUEST));
        assert_eq!(req.get_str(tags::SUBSCRIPTION_REQUEST_TYPE), Some("7"));
        assert_eq!(req.get_str(tags::MARKET_DEPTH), Some("10"));
        assert_eq!(req.get_str(tags::MD_UPDATE_TYPE), Some("8"));
        assert_eq!(req.get_str(tags::SECURITY_ID), Some("1"));
        assert_eq!(req.get_str(tags::NO_MD_ENTRY_TYPES), Some("3"));
        assert_eq!(req.get_occurrence(tags::MD_ENTRY_TYPE, 3), Some(&b"4"[..]));

        let snapshot = h.frames.recv().await.unwrap();
        match &snapshot.event {
            MarketEvent::Snapshot(s) => {
                assert_eq!(s.instrument_id, ES);
                let bids: Vec<f64> = s
                    .entries
                    .iter()
                    .filter(|e| e.entry_type == EntryType::Bid)
                    .filter_map(|e| e.price)
                    .collect();
                assert_eq!(bids, vec![99.5, 99.0]);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        let status = h.frames.recv().await.unwrap();
        assert!(matches!(status.event, MarketEvent::SecurityStatus(_)));
        assert!(status.header.msg_seq_num > snapshot.header.msg_seq_num);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_reject_surfaces_text_and_reason() {
        let h = harness();
        let responder = {
            let session = Arc::clone(&h.session);
            let mut wire = h.wire;
            tokio::spawn(async move {
                let req = next_sent(&mut wire).await;
                let mut reject = inbound(0, msg_type::MARKET_DATA_REQUEST_REJECT);
                reject
                    .append(tags::MD_REQ_ID, req.get_str(tags::MD_REQ_ID).unwrap())
                    .append(tags::TEXT, "not entitled")
                    .append(tags::MD_REQ_REJ_REASON, "3");
                publish(&session, reject);
            })
        };

        let err = h.gateway.subscribe(&MarketDataRequest::new(ES, "1")).await.unwrap_err();
        responder.await.unwrap();
        assert_eq!(err.to_string(), "not entitled (3)");
        assert!(err.is_business_reject());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_response_is_unconfirmed() {
        let h = harness();
        let outcome = h.gateway.subscribe(&MarketDataRequest::new(ES, "1")).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Unconfirmed);

        // In-flight flag released after the call
        let sub = h.gateway.get_or_create(&InstrumentId::decode(ES).unwrap());
        assert!(!sub.lock().in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_subscribe_is_pending() {
        let mut h = harness();

        let first = {
            let gateway = Arc::clone(&h.gateway);
            tokio::spawn(async move { gateway.subscribe(&MarketDataRequest::new(ES, "1")).await })
        };
        // Request on the wire means the first call is in flight
        let _ = next_sent(&mut h.wire).await;

        let err = h.gateway.subscribe(&MarketDataRequest::new(ES, "1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::SubscriptionPending(ref id) if id == ES));
        assert!(!err.is_fatal());

        publish(&h.session, snapshot_fragment("1", &[("0", 1.0, 1.0)]));
        assert_eq!(first.await.unwrap().unwrap(), SubscribeOutcome::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_after_assembly_unsubscribes_first() {
        let mut h = harness();
        let gateway = Arc::clone(&h.gateway);
        let id = InstrumentId::decode(ES).unwrap();
        let sub = gateway.get_or_create(&id);
        gateway.on_snapshot(Arc::new(snapshot_fragment("1", &[("0", 1.0, 1.0)])));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sub.lock().is_assembled());

        let outcome = gateway.subscribe(&MarketDataRequest::new(ES, "1")).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Unconfirmed);

        let sent = drain_sent(&mut h.wire);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].get_str(tags::SUBSCRIPTION_REQUEST_TYPE), Some("2"));
        assert_eq!(sent[1].get_str(tags::SUBSCRIPTION_REQUEST_TYPE), Some("7"));
        assert_eq!(sent[0].get_str(tags::MD_REQ_ID), sent[1].get_str(tags::MD_REQ_ID));
    }

    #[tokio::test]
    async fn test_updates_only_is_fire_and_forget() {
        let mut h = harness();
        let outcome = h.gateway.subscribe(&MarketDataRequest::new(ES, "2")).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Sent);

        let sent = drain_sent(&mut h.wire);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get_str(tags::SUBSCRIPTION_REQUEST_TYPE), Some("2"));
        assert_eq!(sent[0].get_str(tags::MARKET_DEPTH), Some("10"));
        assert_eq!(sent[0].get_str(tags::NO_MD_ENTRY_TYPES), Some("9"));
        assert_eq!(sent[0].get_str(tags::MD_UPDATE_TYPE), None);
    }

    #[tokio::test]
    async fn test_incremental_flushes_pending_assembly() {
        let mut h = harness();
        let gateway = Arc::clone(&h.gateway);
        gateway.get_or_create(&InstrumentId::decode(ES).unwrap());

        gateway.on_snapshot(Arc::new(snapshot_fragment("1", &[("0", 10.0, 1.0)])));
        gateway
            .on_incremental(&incremental("1", &[("0", "0", 1, Some(11.0), 1.0)]))
            .unwrap();

        assert!(matches!(h.frames.try_recv().unwrap().event, MarketEvent::Snapshot(_)));
        match &h.frames.try_recv().unwrap().event {
            MarketEvent::Incremental(inc) => assert_eq!(inc.entries[0].price, Some(11.0)),
            other => panic!("expected incremental, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_incremental_before_snapshot_and_unknown_instrument_dropped() {
        let mut h = harness();
        let gateway = Arc::clone(&h.gateway);
        gateway.get_or_create(&InstrumentId::decode(ES).unwrap());

        gateway
            .on_incremental(&incremental("1", &[("0", "0", 1, Some(1.0), 1.0)]))
            .unwrap();
        gateway
            .on_incremental(&incremental("777", &[("0", "0", 1, Some(1.0), 1.0)]))
            .unwrap();
        assert!(h.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_two_instruments_is_fatal() {
        let h = harness();
        let gateway = Arc::clone(&h.gateway);
        let run = tokio::spawn(Arc::clone(&gateway).run());
        tokio::task::yield_now().await;

        let mut msg = incremental("1", &[("0", "0", 1, Some(1.0), 1.0)]);
        msg.append(tags::MD_UPDATE_ACTION, "0")
            .append(tags::MD_ENTRY_TYPE, "0")
            .append(tags::SECURITY_ID, "2");
        publish(&h.session, msg);

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::TwoInstruments(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_requested_types_filter() {
        let mut request = MarketDataRequest::new(ES, "1");
        assert_eq!(request.requested_types().len(), EntryType::ALL.len());

        request.entry_types = vec!["4".into(), "2".into(), "B".into(), "??".into()];
        assert_eq!(
            request.requested_types(),
            vec![EntryType::Trade, EntryType::BidImplied, EntryType::TradeVolume]
        );

        request.entry_types.push("*".into());
        assert_eq!(request.requested_types().len(), EntryType::ALL.len());
    }
}
