//! Request/response correlation over the broadcast bus
//!
//! `listen_until` subscribes to a set of MsgType topics at call time and
//! yields received messages until a termination predicate fires (the
//! triggering message is included) or the deadline passes. Hitting the
//! deadline is not an error: the caller gets whatever was accumulated.
//!
//! Create the listener *before* sending the request so no response can slip
//! past between send and subscribe.

use crate::fix::tags;
use crate::fix::FixMessage;
use crate::session::bus::{BusMessage, MessageBus};
use crate::log_session;
use futures_util::stream::{self, BoxStream, SelectAll, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout_at, Instant};
use tracing::Level;

/// Decides when a correlated response stream is complete
///
/// Implementations may keep call-scoped state (e.g. a running count).
pub trait TerminationPredicate: Send {
    fn is_terminal(&mut self, msg: &FixMessage) -> bool;
}

/// Terminal on the first message whose `tag` equals any of the accepted values
pub struct FieldMatch {
    accepted: Vec<(u32, String)>,
}

impl FieldMatch {
    pub fn new() -> Self {
        Self { accepted: Vec::new() }
    }

    /// Also accept messages where `tag == value`
    pub fn or_field(mut self, tag: u32, value: impl Into<String>) -> Self {
        self.accepted.push((tag, value.into()));
        self
    }

    pub fn matches(&self, msg: &FixMessage) -> bool {
        self.accepted
            .iter()
            .any(|(tag, value)| msg.get_str(*tag) == Some(value.as_str()))
    }
}

impl Default for FieldMatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationPredicate for FieldMatch {
    fn is_terminal(&mut self, msg: &FixMessage) -> bool {
        self.matches(msg)
    }
}

/// Counts responses for one SecurityReqID until the self-declared total is reached
///
/// The exchange announces the expected number of reports inside the response
/// stream (TotNumReports) rather than up front.
#[derive(Debug)]
pub struct DeclaredTotalPredicate {
    req_id: String,
    matched: usize,
    declared_total: Option<usize>,
}

impl DeclaredTotalPredicate {
    pub fn new(req_id: impl Into<String>) -> Self {
        Self {
            req_id: req_id.into(),
            matched: 0,
            declared_total: None,
        }
    }

    #[inline]
    pub fn matched(&self) -> usize {
        self.matched
    }

    #[inline]
    pub fn declared_total(&self) -> Option<usize> {
        self.declared_total
    }

    /// True if `msg` answers this request
    pub fn is_response(&self, msg: &FixMessage) -> bool {
        msg.get_str(tags::SECURITY_REQ_ID) == Some(self.req_id.as_str())
    }
}

impl TerminationPredicate for DeclaredTotalPredicate {
    fn is_terminal(&mut self, msg: &FixMessage) -> bool {
        if !self.is_response(msg) {
            return false;
        }
        self.matched += 1;
        // A rejection is a single response and may not declare a total
        if self.matched == 1
            && msg.get_str(tags::SECURITY_RESPONSE_TYPE) == Some(tags::RESPONSE_REJECT_PROPOSAL)
        {
            return true;
        }
        if let Some(total) = msg.parse::<usize>(tags::TOT_NUM_REPORTS) {
            self.declared_total = Some(total);
        }
        matches!(self.declared_total, Some(total) if self.matched >= total)
    }
}

/// Factory for correlation listeners
#[derive(Clone)]
pub struct CorrelationEngine {
    bus: Arc<MessageBus>,
}

impl CorrelationEngine {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }

    /// Subscribe to `topics` now; consume later with `next`/`collect`
    ///
    /// `timeout = None` waits indefinitely.
    pub fn listen_until<P: TerminationPredicate>(
        &self,
        topics: &[&str],
        predicate: P,
        timeout: Option<Duration>,
    ) -> Correlation<P> {
        let mut merged = SelectAll::new();
        for topic in topics {
            merged.push(topic_stream(topic.to_string(), self.bus.subscribe(topic)));
        }
        Correlation {
            messages: merged,
            predicate,
            deadline: timeout.map(|t| Instant::now() + t),
            finished: false,
        }
    }
}

/// One pending correlated call
///
/// Finite and not restartable: once it stops it yields nothing further.
pub struct Correlation<P> {
    messages: SelectAll<BoxStream<'static, BusMessage>>,
    predicate: P,
    deadline: Option<Instant>,
    finished: bool,
}

impl<P: TerminationPredicate> Correlation<P> {
    /// Next received message, or `None` once terminated or timed out
    pub async fn next(&mut self) -> Option<BusMessage> {
        if self.finished {
            return None;
        }

        let received = match self.deadline {
            Some(deadline) => timeout_at(deadline, self.messages.next()).await.ok().flatten(),
            None => self.messages.next().await,
        };

        match received {
            Some(msg) => {
                if self.predicate.is_terminal(&msg) {
                    self.finished = true;
                }
                Some(msg)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Drain to completion
    pub async fn collect(mut self) -> Vec<BusMessage> {
        let mut out = Vec::new();
        while let Some(msg) = self.next().await {
            out.push(msg);
        }
        out
    }

    /// Drain to completion, keeping the predicate for inspection
    pub async fn collect_with_predicate(mut self) -> (Vec<BusMessage>, P) {
        let mut out = Vec::new();
        while let Some(msg) = self.next().await {
            out.push(msg);
        }
        (out, self.predicate)
    }

    #[inline]
    pub fn predicate(&self) -> &P {
        &self.predicate
    }

    /// True once the predicate fired, the deadline passed or the bus closed
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn topic_stream(
    topic: String,
    rx: broadcast::Receiver<BusMessage>,
) -> BoxStream<'static, BusMessage> {
    stream::unfold((topic, rx), |(topic, mut rx)| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => return Some((msg, (topic, rx))),
                Err(RecvError::Lagged(skipped)) => {
                    log_session!(Level::WARN, %topic, skipped, "correlation listener lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::tags::msg_type;

    fn secdef(req_id: &str, total: Option<usize>) -> BusMessage {
        let mut m = FixMessage::new();
        m.append(tags::MSG_TYPE, msg_type::SECURITY_DEFINITION)
            .append(tags::SECURITY_REQ_ID, req_id);
        if let Some(total) = total {
            m.append(tags::TOT_NUM_REPORTS, total);
        }
        Arc::new(m)
    }

    #[tokio::test]
    async fn test_declared_count_stops_at_total() {
        let bus = Arc::new(MessageBus::new(64));
        let engine = CorrelationEngine::new(Arc::clone(&bus));
        let listener = engine.listen_until(
            &[msg_type::SECURITY_DEFINITION],
            DeclaredTotalPredicate::new("7"),
            Some(Duration::from_secs(5)),
        );

        bus.publish(secdef("7", Some(3)));
        bus.publish(secdef("6", Some(1)));
        bus.publish(secdef("7", None));
        bus.publish(secdef("99", Some(1)));
        bus.publish(secdef("7", None));
        bus.publish(secdef("7", None));

        let (msgs, predicate) = listener.collect_with_predicate().await;
        let responses: Vec<_> = msgs.iter().filter(|m| predicate.is_response(m)).collect();
        assert_eq!(responses.len(), 3);
        assert_eq!(predicate.matched(), 3);
        assert_eq!(predicate.declared_total(), Some(3));
        // Stopped on the third response; the fourth "7" was never consumed
        assert_eq!(msgs.len(), 5);
    }

    #[tokio::test]
    async fn test_lone_rejection_stops_without_total() {
        let bus = Arc::new(MessageBus::new(64));
        let engine = CorrelationEngine::new(Arc::clone(&bus));
        let listener = engine.listen_until(
            &[msg_type::SECURITY_DEFINITION],
            DeclaredTotalPredicate::new("4"),
            None,
        );

        let mut reject = FixMessage::new();
        reject
            .append(tags::MSG_TYPE, msg_type::SECURITY_DEFINITION)
            .append(tags::SECURITY_REQ_ID, "4")
            .append(tags::SECURITY_RESPONSE_TYPE, tags::RESPONSE_REJECT_PROPOSAL);
        bus.publish(Arc::new(reject));

        let (msgs, predicate) = listener.collect_with_predicate().await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(predicate.matched(), 1);
        assert_eq!(predicate.declared_total(), None);
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_result() {
        let bus = Arc::new(MessageBus::new(64));
        let engine = CorrelationEngine::new(Arc::clone(&bus));
        let listener = engine.listen_until(
            &[msg_type::SECURITY_DEFINITION],
            DeclaredTotalPredicate::new("1"),
            Some(Duration::from_millis(50)),
        );

        bus.publish(secdef("1", Some(2)));
        let msgs = listener.collect().await;
        assert_eq!(msgs.len(), 1);
    }

    #[tokio::test]
    async fn test_field_match_across_topics() {
        let bus = Arc::new(MessageBus::new(64));
        let engine = CorrelationEngine::new(Arc::clone(&bus));
        let mut listener = engine.listen_until(
            &["Y", "W"],
            FieldMatch::new()
                .or_field(tags::MD_REQ_ID, "5")
                .or_field(tags::SECURITY_ID, "ES1"),
            Some(Duration::from_secs(1)),
        );

        let mut other = FixMessage::new();
        other.append(tags::MSG_TYPE, "W").append(tags::SECURITY_ID, "NQ1");
        bus.publish(Arc::new(other));
        assert_eq!(listener.next().await.unwrap().get_str(tags::SECURITY_ID), Some("NQ1"));
        assert!(!listener.is_finished());

        let mut reject = FixMessage::new();
        reject.append(tags::MSG_TYPE, "Y").append(tags::MD_REQ_ID, "5");
        bus.publish(Arc::new(reject));
        assert_eq!(listener.next().await.unwrap().msg_type(), Some("Y"));
        assert!(listener.is_finished());
        assert!(listener.next().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_timeout_with_no_traffic_is_empty() {
        let bus = Arc::new(MessageBus::new(64));
        let engine = CorrelationEngine::new(bus);
        let listener = engine.listen_until(&["d"], FieldMatch::new(), Some(Duration::ZERO));
        assert!(listener.collect().await.is_empty());
    }
}
