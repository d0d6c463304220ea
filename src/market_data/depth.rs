//! Per-instrument depth state
//!
//! The exchange splits the initial snapshot across an unbounded run of full
//! refresh (W) messages with no terminator. Fragments are buffered until the
//! feed goes quiet for the idle window, then reduced into one consolidated
//! snapshot. After that, incremental (X) messages maintain four positional
//! price ladders.
//!
//! States: `Empty → Buffering → Assembled`, back to `Buffering` on resubscribe.
//!
//! Nothing here is async; the gateway drives the idle timer and holds the
//! lock only for the duration of one call.

use crate::core::enums::{
    AggressorSide, EntryType, TradingStatus, HIGH_LIMIT_CODE, LOW_LIMIT_CODE,
};
use crate::core::market_data::{
    BookEntry, IncrementalEntry, IncrementalEvent, MarketEvent, SecurityStatusEvent,
    SnapshotEvent, UpdateAction,
};
use crate::fix::tags;
use crate::fix::FixMessage;
use crate::session::bus::BusMessage;
use crate::session::fix_session::parse_sending_time;
use crate::log_md;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Level;

/// Assembly state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Empty,
    Buffering,
    Assembled,
}

/// One entry of a repeating MD group, resolved against its delimiter
struct GroupEntry<'a> {
    code: &'a str,
    price: Option<f64>,
    size: Option<f64>,
    level: Option<u32>,
    tick_direction: Option<&'a str>,
}

fn snapshot_entries(msg: &FixMessage) -> impl Iterator<Item = GroupEntry<'_>> {
    let count = msg.parse::<usize>(tags::NO_MD_ENTRIES).unwrap_or(0);
    let sep = tags::MD_ENTRY_TYPE;
    (1..=count).filter_map(move |i| {
        Some(GroupEntry {
            code: msg.get_str_in_group(tags::MD_ENTRY_TYPE, i, sep)?,
            price: msg.parse_in_group(tags::MD_ENTRY_PX, i, sep),
            size: msg.parse_in_group(tags::MD_ENTRY_SIZE, i, sep),
            level: msg.parse_in_group(tags::MD_ENTRY_LEVEL, i, sep),
            tick_direction: msg.get_str_in_group(tags::TICK_DIRECTION, i, sep),
        })
    })
}

#[inline]
fn ladder_index(entry_type: EntryType) -> Option<usize> {
    EntryType::LADDERS.iter().position(|t| *t == entry_type)
}

/// Depth subscription for one security id
pub struct DepthSubscription {
    instrument_id: String,
    md_req_id: String,
    buffer: Vec<BusMessage>,
    assembled: bool,
    last_snapshot_at: Option<Instant>,
    trading_status: Option<TradingStatus>,
    /// Prices only, indexed like `EntryType::LADDERS`
    ladders: [Vec<f64>; 4],
    max_depth: usize,
    requested: Vec<EntryType>,
    in_flight: bool,
}

impl DepthSubscription {
    pub fn new(instrument_id: impl Into<String>, md_req_id: impl Into<String>, max_depth: usize) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            md_req_id: md_req_id.into(),
            buffer: Vec::new(),
            assembled: false,
            last_snapshot_at: None,
            trading_status: None,
            ladders: Default::default(),
            max_depth,
            requested: EntryType::ALL.to_vec(),
            in_flight: false,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        if self.assembled {
            SubscriptionState::Assembled
        } else if self.buffer.is_empty() {
            SubscriptionState::Empty
        } else {
            SubscriptionState::Buffering
        }
    }

    #[inline]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    /// MDReqID(262), fixed for the lifetime of the subscription
    #[inline]
    pub fn md_req_id(&self) -> &str {
        &self.md_req_id
    }

    #[inline]
    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    #[inline]
    pub fn is_buffering(&self) -> bool {
        !self.buffer.is_empty()
    }

    #[inline]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[inline]
    pub fn trading_status(&self) -> Option<TradingStatus> {
        self.trading_status
    }

    /// Current prices of a ladder, best first
    pub fn ladder(&self, entry_type: EntryType) -> Option<&[f64]> {
        ladder_index(entry_type).map(|i| self.ladders[i].as_slice())
    }

    /// Entry types requested by the last subscribe
    #[inline]
    pub fn requested(&self) -> &[EntryType] {
        &self.requested
    }

    /// Whether `entry_type` was requested by the last subscribe
    #[inline]
    pub fn wants(&self, entry_type: EntryType) -> bool {
        self.requested.contains(&entry_type)
    }

    /// Return to `Empty` ahead of a fresh snapshot+updates subscribe
    ///
    /// Trading status survives so an unchanged status is not re-announced.
    pub fn reset_for_snapshot(&mut self, max_depth: usize, requested: Vec<EntryType>) {
        self.buffer.clear();
        self.assembled = false;
        self.last_snapshot_at = None;
        for ladder in &mut self.ladders {
            ladder.clear();
        }
        self.max_depth = max_depth;
        self.requested = requested;
    }

    /// Buffer a snapshot fragment; true if it is the first of the run
    pub fn buffer_snapshot(&mut self, msg: BusMessage, now: Instant) -> bool {
        let first = self.buffer.is_empty();
        self.buffer.push(msg);
        self.last_snapshot_at = Some(now);
        first
    }

    /// Time left before the idle window closes; `None` when nothing is buffered
    pub fn idle_remaining(&self, now: Instant, idle: Duration) -> Option<Duration> {
        if self.buffer.is_empty() || self.assembled {
            return None;
        }
        let last = self.last_snapshot_at?;
        Some((last + idle).saturating_duration_since(now))
    }

    /// Reduce buffered fragments into one snapshot (plus a status event)
    ///
    /// Returns nothing when there is nothing to assemble.
    pub fn assemble(&mut self) -> Vec<MarketEvent> {
        if self.assembled || self.buffer.is_empty() {
            return Vec::new();
        }
        let buffer = std::mem::take(&mut self.buffer);
        log_md!(Level::DEBUG, instrument = %self.instrument_id, fragments = buffer.len(), "assembling snapshot");

        // Newest first: status, last trade and limits
        let mut status = None;
        let mut last_trade = None;
        let mut high_limit = None;
        let mut low_limit = None;
        for msg in buffer.iter().rev() {
            if status.is_none() {
                status = msg.parse::<i64>(tags::SECURITY_STATUS);
            }
            for entry in snapshot_entries(msg) {
                match entry.code {
                    HIGH_LIMIT_CODE if high_limit.is_none() => high_limit = entry.price,
                    LOW_LIMIT_CODE if low_limit.is_none() => low_limit = entry.price,
                    code if last_trade.is_none()
                        && EntryType::from_exchange_code(code) == Some(EntryType::Trade) =>
                    {
                        last_trade = Some(BookEntry {
                            entry_type: EntryType::Trade,
                            price: entry.price,
                            size: entry.size,
                            level: None,
                            aggressor_side: entry
                                .tick_direction
                                .and_then(AggressorSide::from_exchange_code),
                        });
                    }
                    _ => {}
                }
            }
            if status.is_some() && last_trade.is_some() && high_limit.is_some() && low_limit.is_some() {
                break;
            }
        }

        // Oldest first: everything else
        let mut ladders: [Vec<BookEntry>; 4] = Default::default();
        let mut others = Vec::new();
        for msg in &buffer {
            for entry in snapshot_entries(msg) {
                if entry.code == HIGH_LIMIT_CODE || entry.code == LOW_LIMIT_CODE {
                    continue;
                }
                let entry_type = match EntryType::from_exchange_code(entry.code) {
                    Some(EntryType::Trade) => continue,
                    Some(t) => t,
                    None => {
                        log_md!(Level::WARN, instrument = %self.instrument_id, code = entry.code, "unrecognized MDEntryType in snapshot");
                        continue;
                    }
                };
                let book = BookEntry {
                    entry_type,
                    price: entry.price,
                    size: entry.size,
                    level: entry.level,
                    aggressor_side: None,
                };
                match ladder_index(entry_type) {
                    Some(_) if book.price.is_none() => {
                        log_md!(Level::WARN, instrument = %self.instrument_id, %entry_type, "ladder entry without price");
                    }
                    Some(i) => ladders[i].push(book),
                    None => others.push(book),
                }
            }
        }

        let mut entries = Vec::new();
        for (i, entry_type) in EntryType::LADDERS.iter().enumerate() {
            let ladder = &mut ladders[i];
            ladder.sort_by(|a, b| {
                let (a, b) = (a.price.unwrap_or_default(), b.price.unwrap_or_default());
                if entry_type.is_descending() {
                    b.total_cmp(&a)
                } else {
                    a.total_cmp(&b)
                }
            });
            ladder.truncate(self.max_depth);
            for (pos, entry) in ladder.iter_mut().enumerate() {
                entry.level = Some(pos as u32 + 1);
            }
            self.ladders[i] = ladder.iter().filter_map(|e| e.price).collect();
            entries.append(ladder);
        }
        entries.extend(others);
        match last_trade {
            Some(trade) => entries.push(trade),
            None => log_md!(Level::WARN, instrument = %self.instrument_id, "no trade found in snapshot"),
        }
        if status.is_none() {
            log_md!(Level::WARN, instrument = %self.instrument_id, "no SecurityStatus found in snapshot");
        }

        let exchange_time_ns = buffer
            .first()
            .and_then(|m| m.get_str(tags::SENDING_TIME))
            .and_then(parse_sending_time);

        self.assembled = true;
        let mut events = vec![MarketEvent::Snapshot(SnapshotEvent {
            instrument_id: self.instrument_id.clone(),
            exchange_time_ns,
            entries,
        })];
        events.extend(self.status_event(status, high_limit, low_limit));
        events
    }

    /// Apply one incremental refresh to the ladders
    pub fn apply_incremental(&mut self, msg: &FixMessage) -> Vec<MarketEvent> {
        let count = msg.parse::<usize>(tags::NO_MD_ENTRIES).unwrap_or(0);
        let sep = tags::MD_UPDATE_ACTION;

        // Limits come from this message only
        let mut high_limit = None;
        let mut low_limit = None;
        for i in 1..=count {
            match msg.get_str_in_group(tags::MD_ENTRY_TYPE, i, sep) {
                Some(HIGH_LIMIT_CODE) => high_limit = msg.parse_in_group(tags::MD_ENTRY_PX, i, sep),
                Some(LOW_LIMIT_CODE) => low_limit = msg.parse_in_group(tags::MD_ENTRY_PX, i, sep),
                _ => {}
            }
        }

        let mut events = Vec::new();
        let status = msg.parse::<i64>(tags::SECURITY_TRADING_STATUS);
        events.extend(self.status_event(status, high_limit, low_limit));

        let mut entries = Vec::new();
        for i in 1..=count {
            self.apply_entry(msg, i, &mut entries);
        }
        if !entries.is_empty() {
            events.push(MarketEvent::Incremental(IncrementalEvent {
                instrument_id: self.instrument_id.clone(),
                entries,
            }));
        }
        events
    }

    fn apply_entry(&mut self, msg: &FixMessage, nth: usize, out: &mut Vec<IncrementalEntry>) {
        let sep = tags::MD_UPDATE_ACTION;
        let code = match msg.get_str_in_group(tags::MD_ENTRY_TYPE, nth, sep) {
            Some(code) => code,
            None => {
                log_md!(Level::WARN, instrument = %self.instrument_id, nth, "incremental entry without MDEntryType");
                return;
            }
        };
        if code == HIGH_LIMIT_CODE || code == LOW_LIMIT_CODE {
            return;
        }
        let entry_type = match EntryType::from_exchange_code(code) {
            Some(t) => t,
            None => {
                log_md!(Level::ERROR, instrument = %self.instrument_id, code, "unknown MDEntryType");
                return;
            }
        };
        let action = msg
            .get_str_in_group(tags::MD_UPDATE_ACTION, nth, sep)
            .and_then(UpdateAction::from_code);
        let price: Option<f64> = msg.parse_in_group(tags::MD_ENTRY_PX, nth, sep);
        let size: Option<f64> = msg.parse_in_group(tags::MD_ENTRY_SIZE, nth, sep);

        let index = match ladder_index(entry_type) {
            Some(index) => index,
            None => {
                // Trades and statistics pass straight through
                out.push(IncrementalEntry {
                    action: action.unwrap_or(UpdateAction::New),
                    entry_type,
                    price,
                    size,
                    level: None,
                    aggressor_side: msg
                        .get_str_in_group(tags::TICK_DIRECTION, nth, sep)
                        .and_then(AggressorSide::from_exchange_code),
                });
                return;
            }
        };

        let action = match action {
            Some(action) => action,
            None => {
                log_md!(Level::WARN, instrument = %self.instrument_id, nth, "unknown MDUpdateAction");
                return;
            }
        };
        let level = match msg
            .parse_in_group::<usize>(tags::MD_ENTRY_LEVEL, nth, sep)
            .filter(|l| *l >= 1)
        {
            Some(level) => level,
            None => {
                log_md!(Level::WARN, instrument = %self.instrument_id, nth, "ladder entry without valid MDEntryLevel");
                return;
            }
        };
        let pos = level - 1;
        let max_depth = self.max_depth;
        let ladder = &mut self.ladders[index];

        let resolved = match action {
            UpdateAction::New => {
                let p = match price {
                    Some(p) => p,
                    None => {
                        log_md!(Level::ERROR, instrument = %self.instrument_id, level, "MDEntryPx not provided for insert");
                        return;
                    }
                };
                if pos > ladder.len() {
                    log_md!(Level::ERROR, instrument = %self.instrument_id, level, len = ladder.len(), "insert beyond ladder end");
                    return;
                }
                ladder.insert(pos, p);
                p
            }
            UpdateAction::Change => {
                if price.is_some() {
                    log_md!(Level::WARN, instrument = %self.instrument_id, level, "MDEntryPx provided for change; ignored");
                }
                match ladder.get(pos) {
                    Some(p) => *p,
                    None => {
                        log_md!(Level::ERROR, instrument = %self.instrument_id, level, "tried to update non-existing level");
                        return;
                    }
                }
            }
            UpdateAction::Delete => {
                if price.is_some() {
                    log_md!(Level::WARN, instrument = %self.instrument_id, level, "MDEntryPx provided for delete; ignored");
                }
                if pos >= ladder.len() {
                    log_md!(Level::ERROR, instrument = %self.instrument_id, level, "tried to delete non-existing level");
                    return;
                }
                ladder.remove(pos)
            }
        };

        out.push(IncrementalEntry {
            action,
            entry_type,
            price: Some(resolved),
            size,
            level: Some(level as u32),
            aggressor_side: None,
        });

        if ladder.len() > max_depth {
            for (offset, evicted) in ladder.drain(max_depth..).enumerate() {
                out.push(IncrementalEntry {
                    action: UpdateAction::Delete,
                    entry_type,
                    price: Some(evicted),
                    size: None,
                    level: Some((max_depth + offset + 1) as u32),
                    aggressor_side: None,
                });
            }
        }
    }

    /// Fold a full refresh received after assembly into an incremental event
    ///
    /// Only trades, traded volume and price limits are taken from it.
    pub fn apply_refresh_after_assembly(&mut self, msg: &FixMessage) -> Vec<MarketEvent> {
        let mut entries = Vec::new();
        let mut high_limit = None;
        let mut low_limit = None;

        for entry in snapshot_entries(msg) {
            match entry.code {
                HIGH_LIMIT_CODE => high_limit = entry.price,
                LOW_LIMIT_CODE => low_limit = entry.price,
                code if EntryType::from_exchange_code(code) == Some(EntryType::Trade) => {
                    if !self.wants(EntryType::Trade) {
                        continue;
                    }
                    entries.push(IncrementalEntry {
                        action: UpdateAction::New,
                        entry_type: EntryType::Trade,
                        price: entry.price,
                        size: entry.size,
                        level: None,
                        aggressor_side: entry
                            .tick_direction
                            .and_then(AggressorSide::from_exchange_code),
                    });
                }
                code => {
                    log_md!(Level::WARN, instrument = %self.instrument_id, code, "unexpected MDEntryType on refresh after snapshot");
                }
            }
        }

        if self.wants(EntryType::TradeVolume) {
            if let Some(volume) = msg.parse::<f64>(tags::TOTAL_VOLUME_TRADED) {
                entries.push(IncrementalEntry {
                    action: UpdateAction::New,
                    entry_type: EntryType::TradeVolume,
                    price: None,
                    size: Some(volume),
                    level: None,
                    aggressor_side: None,
                });
            }
        }

        let mut events = Vec::new();
        if !entries.is_empty() {
            events.push(MarketEvent::Incremental(IncrementalEvent {
                instrument_id: self.instrument_id.clone(),
                entries,
            }));
        }
        events.extend(self.status_event(None, high_limit, low_limit));
        events
    }

    /// Status event when the status changed or limits are present
    ///
    /// The status is carried only when it differs from the last one emitted.
    fn status_event(
        &mut self,
        raw_status: Option<i64>,
        high_limit_price: Option<f64>,
        low_limit_price: Option<f64>,
    ) -> Option<MarketEvent> {
        let mut trading_status = None;
        if let Some(code) = raw_status {
            match TradingStatus::from_exchange_code(code) {
                Some(status) if self.trading_status != Some(status) => {
                    self.trading_status = Some(status);
                    trading_status = Some(status);
                }
                Some(_) => {}
                None => {
                    log_md!(Level::WARN, instrument = %self.instrument_id, code, "unknown trading status");
                    return None;
                }
            }
        }

        if trading_status.is_none() && high_limit_price.is_none() && low_limit_price.is_none() {
            return None;
        }
        Some(MarketEvent::SecurityStatus(SecurityStatusEvent {
            instrument_id: self.instrument_id.clone(),
            trading_status,
            high_limit_price,
            low_limit_price,
        }))
    }
}

// Depth Checklist:
// ✓ Ladders sorted best-first and truncated on assembly
// ✓ Levels 1-based in and out
// ✓ Change/Delete take price from the ladder
// ✓ Evicted tail emitted as Delete with the normalized type
// ✓ Bad entries skipped, rest of message applied

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{incremental, snapshot_fragment};
    use std::sync::Arc;

    fn assembled(depth: usize, bids: &[f64], offers: &[f64]) -> DepthSubscription {
        let mut sub = DepthSubscription::new("/FUT/CME/ES/1", "0", depth);
        let mut entries: Vec<(&str, f64, f64)> = bids.iter().map(|p| ("0", *p, 1.0)).collect();
        entries.extend(offers.iter().map(|p| ("1", *p, 1.0)));
        sub.buffer_snapshot(Arc::new(snapshot_fragment("1", &entries)), Instant::now());
        sub.assemble();
        sub
    }

    fn incremental_entries(events: &[MarketEvent]) -> &[IncrementalEntry] {
        events
            .iter()
            .find_map(|e| match e {
                MarketEvent::Incremental(inc) => Some(inc.entries.as_slice()),
                _ => None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_three_fragments_assemble_sorted() {
        let mut sub = DepthSubscription::new("/FUT/CME/ES/1", "0", 10);
        let now = Instant::now();
        assert_eq!(sub.state(), SubscriptionState::Empty);

        let mut first = snapshot_fragment("1", &[("0", 100.0, 5.0), ("1", 103.0, 2.0)]);
        first.append(tags::SECURITY_STATUS, 2);
        assert!(sub.buffer_snapshot(Arc::new(first), now));
        assert!(!sub.buffer_snapshot(
            Arc::new(snapshot_fragment("1", &[("0", 102.0, 1.0), ("1", 101.5, 4.0), ("4", 101.0, 3.0)])),
            now
        ));
        assert!(!sub.buffer_snapshot(
            Arc::new(snapshot_fragment("1", &[("0", 101.0, 7.0), ("1", 102.5, 1.0), ("K", 110.0, 0.0)])),
            now
        ));
        assert_eq!(sub.state(), SubscriptionState::Buffering);

        let events = sub.assemble();
        assert_eq!(sub.state(), SubscriptionState::Assembled);
        assert_eq!(events.len(), 2);

        let snapshot = match &events[0] {
            MarketEvent::Snapshot(s) => s,
            other => panic!("expected snapshot, got {:?}", other),
        };
        let prices = |t: EntryType| -> Vec<f64> {
            snapshot
                .entries
                .iter()
                .filter(|e| e.entry_type == t)
                .filter_map(|e| e.price)
                .collect()
        };
        assert_eq!(prices(EntryType::Bid), vec![102.0, 101.0, 100.0]);
        assert_eq!(prices(EntryType::Offer), vec![101.5, 102.5, 103.0]);
        assert_eq!(prices(EntryType::Trade), vec![101.0]);
        assert_eq!(snapshot.entries.last().map(|e| e.entry_type), Some(EntryType::Trade));
        assert_eq!(sub.ladder(EntryType::Bid), Some(&[102.0, 101.0, 100.0][..]));

        match &events[1] {
            MarketEvent::SecurityStatus(s) => {
                assert_eq!(s.trading_status, Some(TradingStatus::ReadyToTrade));
                assert_eq!(s.high_limit_price, Some(110.0));
                assert_eq!(s.low_limit_price, None);
            }
            other => panic!("expected status, got {:?}", other),
        }

        // Nothing left to assemble
        assert!(sub.assemble().is_empty());
    }

    #[tokio::test]
    async fn test_assembly_truncates_to_depth_with_levels() {
        let sub = assembled(2, &[1.0, 3.0, 2.0], &[]);
        assert_eq!(sub.ladder(EntryType::Bid), Some(&[3.0, 2.0][..]));
    }

    #[tokio::test]
    async fn test_insert_beyond_depth_evicts_tail() {
        let mut sub = assembled(5, &[105.0, 104.0, 103.0, 102.0, 101.0], &[]);

        let msg = incremental("1", &[("0", "0", 1, Some(106.0), 2.0)]);
        let events = sub.apply_incremental(&msg);
        let entries = incremental_entries(&events);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, UpdateAction::New);
        assert_eq!(entries[0].level, Some(1));
        assert_eq!(entries[1].action, UpdateAction::Delete);
        assert_eq!(entries[1].entry_type, EntryType::Bid);
        assert_eq!(entries[1].price, Some(101.0));
        assert_eq!(entries[1].level, Some(6));
        assert_eq!(sub.ladder(EntryType::Bid).map(|l| l.len()), Some(5));
    }

    #[tokio::test]
    async fn test_change_and_delete_take_price_from_ladder() {
        let mut sub = assembled(10, &[], &[10.0, 11.0, 12.0]);

        let msg = incremental(
            "1",
            &[("1", "1", 2, Some(99.0), 8.0), ("2", "1", 1, None, 0.0)],
        );
        let events = sub.apply_incremental(&msg);
        let entries = incremental_entries(&events);

        assert_eq!(entries[0].action, UpdateAction::Change);
        assert_eq!(entries[0].price, Some(11.0));
        assert_eq!(entries[0].size, Some(8.0));
        assert_eq!(entries[1].action, UpdateAction::Delete);
        assert_eq!(entries[1].price, Some(10.0));
        assert_eq!(sub.ladder(EntryType::Offer), Some(&[11.0, 12.0][..]));
    }

    #[tokio::test]
    async fn test_out_of_range_entry_skipped_rest_applied() {
        let mut sub = assembled(10, &[5.0], &[]);

        let msg = incremental(
            "1",
            &[
                ("2", "0", 4, None, 0.0),
                ("0", "Z", 1, Some(1.0), 1.0),
                ("0", "0", 2, Some(4.0), 1.0),
            ],
        );
        let events = sub.apply_incremental(&msg);
        let entries = incremental_entries(&events);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].price, Some(4.0));
        assert_eq!(sub.ladder(EntryType::Bid), Some(&[5.0, 4.0][..]));
    }

    /// Records the target of every event
    struct TargetCapture(Arc<parking_lot::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for TargetCapture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            self.0.lock().push(event.metadata().target().to_string());
        }
    }

    #[tokio::test]
    async fn test_skipped_entries_log_under_market_data_target() {
        use tracing_subscriber::layer::SubscriberExt;

        let targets = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(TargetCapture(Arc::clone(&targets)));

        tracing::subscriber::with_default(subscriber, || {
            let mut sub = assembled(10, &[5.0], &[]);
            let msg = incremental(
                "1",
                &[
                    ("2", "0", 4, None, 0.0),
                    ("0", "Z", 1, Some(1.0), 1.0),
                    ("1", "0", 1, Some(5.0), 1.0),
                ],
            );
            sub.apply_incremental(&msg);
        });

        let targets = targets.lock();
        // Delete of a missing level, unknown type, price on change
        assert!(targets.len() >= 3);
        assert!(targets.iter().all(|t| t == "market_data"), "{:?}", *targets);
    }

    #[tokio::test]
    async fn test_trade_passes_through_without_ladder() {
        let mut sub = assembled(10, &[5.0], &[6.0]);
        let mut msg = incremental("1", &[("0", "4", 1, Some(5.5), 3.0)]);
        msg.append(tags::TICK_DIRECTION, "2");
        let events = sub.apply_incremental(&msg);
        let entries = incremental_entries(&events);

        assert_eq!(entries[0].entry_type, EntryType::Trade);
        assert_eq!(entries[0].level, None);
        assert_eq!(entries[0].aggressor_side, Some(AggressorSide::Sell));
        assert_eq!(sub.ladder(EntryType::Bid), Some(&[5.0][..]));
    }

    #[tokio::test]
    async fn test_status_emitted_only_on_change() {
        let mut sub = assembled(10, &[1.0], &[]);

        let mut msg = incremental("1", &[]);
        msg.append(tags::SECURITY_TRADING_STATUS, 2);
        assert_eq!(sub.apply_incremental(&msg).len(), 1);
        assert_eq!(sub.trading_status(), Some(TradingStatus::ReadyToTrade));
        assert!(sub.apply_incremental(&msg).is_empty());

        let mut unknown = incremental("1", &[]);
        unknown.append(tags::SECURITY_TRADING_STATUS, 99);
        assert!(sub.apply_incremental(&unknown).is_empty());
    }

    #[tokio::test]
    async fn test_incremental_limits_taken_from_same_message() {
        let mut sub = assembled(10, &[1.0], &[]);

        let msg = incremental(
            "1",
            &[("0", "K", 0, Some(12.0), 0.0), ("0", "0", 2, Some(0.5), 1.0)],
        );
        let events = sub.apply_incremental(&msg);

        assert_eq!(events.len(), 2);
        match &events[0] {
            MarketEvent::SecurityStatus(s) => {
                assert_eq!(s.trading_status, None);
                assert_eq!(s.high_limit_price, Some(12.0));
                assert_eq!(s.low_limit_price, None);
            }
            other => panic!("expected status, got {:?}", other),
        }
        let entries = incremental_entries(&events);
        assert_eq!(entries.len(), 1);
        assert_eq!(sub.ladder(EntryType::Bid), Some(&[1.0, 0.5][..]));
    }

    #[tokio::test]
    async fn test_refresh_after_assembly_folds_trades_and_limits() {
        let mut sub = assembled(10, &[1.0], &[2.0]);
        sub.requested = vec![EntryType::Trade, EntryType::TradeVolume];

        let mut msg = snapshot_fragment("1", &[("4", 1.5, 2.0), ("L", 0.5, 0.0), ("0", 9.0, 9.0)]);
        msg.append(tags::TOTAL_VOLUME_TRADED, 1234);
        let events = sub.apply_refresh_after_assembly(&msg);

        assert_eq!(events.len(), 2);
        let entries = incremental_entries(&events);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, EntryType::Trade);
        assert_eq!(entries[1].entry_type, EntryType::TradeVolume);
        assert_eq!(entries[1].size, Some(1234.0));
        assert!(matches!(&events[1], MarketEvent::SecurityStatus(s) if s.low_limit_price == Some(0.5)));
        // Ladders untouched
        assert_eq!(sub.ladder(EntryType::Bid), Some(&[1.0][..]));
    }

    #[tokio::test]
    async fn test_idle_window_and_reset() {
        let mut sub = DepthSubscription::new("/FUT/CME/ES/1", "0", 10);
        let idle = Duration::from_millis(100);
        let t0 = Instant::now();
        assert_eq!(sub.idle_remaining(t0, idle), None);

        sub.buffer_snapshot(Arc::new(snapshot_fragment("1", &[("0", 1.0, 1.0)])), t0);
        assert_eq!(sub.idle_remaining(t0 + Duration::from_millis(40), idle), Some(Duration::from_millis(60)));
        assert_eq!(sub.idle_remaining(t0 + Duration::from_millis(150), idle), Some(Duration::ZERO));

        sub.reset_for_snapshot(5, vec![EntryType::Bid]);
        assert_eq!(sub.state(), SubscriptionState::Empty);
        assert_eq!(sub.max_depth(), 5);
        assert!(!sub.wants(EntryType::Trade));
    }
}
