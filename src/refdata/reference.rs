//! Security-definition lookup
//!
//! `query` turns the broadcast `d` stream into a request/response call:
//! 1. Serve from cache when an unexpired entry exists
//! 2. Take the global secdef lock and re-check (a concurrent caller may have filled it)
//! 3. Subscribe, then send SecurityDefinitionRequest with a fresh SecurityReqID
//! 4. Collect responses until the exchange's self-declared total is reached
//! 5. Reject, or cache complete results
//!
//! The exchange does not handle overlapping secdef requests well, so only one
//! is ever outstanding; the lock is held across the whole round trip.

use crate::fix::tags::{self, msg_type};
use crate::fix::FixMessage;
use crate::infrastructure::config::ReferenceDataConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::refdata::cache::{SecDefCache, SecDefQuery};
use crate::session::bus::BusMessage;
use crate::session::correlation::{CorrelationEngine, DeclaredTotalPredicate};
use crate::session::fix_session::{FixSession, SessionError};
use crate::core::instrument::InstrumentError;
use crate::log_refdata;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::Level;

/// SecurityRequestType(321) used when the caller does not set one: list securities
pub const DEFAULT_SECURITY_REQUEST_TYPE: u32 = 3;

/// Reference-data errors
#[derive(Debug, thiserror::Error)]
pub enum RefDataError {
    #[error("{0}")]
    LookupRejected(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid instrument id: {0}")]
    InvalidInstrument(#[from] InstrumentError),
    #[error("SecurityType is required")]
    MissingSecurityType,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl RefDataError {
    /// Caller-facing rejection, as opposed to a session failure
    pub fn is_business_reject(&self) -> bool {
        !matches!(self, RefDataError::Session(_))
    }
}

/// Cached security-definition lookups over the live session
pub struct ReferenceDataCache {
    session: Arc<FixSession>,
    correlation: CorrelationEngine,
    cache: Mutex<SecDefCache>,
    sec_def_lock: tokio::sync::Mutex<()>,
    next_req_id: AtomicU64,
    response_timeout: Option<Duration>,
    cache_path: Option<PathBuf>,
    metrics: Arc<MetricsCollector>,
    clock: Box<dyn Fn() -> SystemTime + Send + Sync>,
}

impl ReferenceDataCache {
    /// Create the cache, loading persisted entries when `cache_path` is set
    pub fn new(
        session: Arc<FixSession>,
        config: &ReferenceDataConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let cache = match &config.cache_path {
            Some(path) => SecDefCache::load(path, config.cache_ttl()),
            None => SecDefCache::new(config.cache_ttl()),
        };
        Self {
            correlation: CorrelationEngine::new(Arc::clone(session.bus())),
            session,
            cache: Mutex::new(cache),
            sec_def_lock: tokio::sync::Mutex::new(()),
            next_req_id: AtomicU64::new(1),
            response_timeout: config.response_timeout(),
            cache_path: config.cache_path.clone(),
            metrics,
            clock: Box::new(SystemTime::now),
        }
    }

    /// Replace the wall clock used for cache expiry
    pub fn with_clock(mut self, clock: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Security definitions matching `query`
    pub async fn query(&self, query: &SecDefQuery) -> Result<Vec<BusMessage>, RefDataError> {
        let security_type = query
            .security_type
            .as_deref()
            .ok_or(RefDataError::MissingSecurityType)?;

        if let Some(hit) = self.cached(query) {
            return Ok(hit);
        }

        let _guard = self.sec_def_lock.lock().await;
        if let Some(hit) = self.cached(query) {
            return Ok(hit);
        }

        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed).to_string();
        let listener = self.correlation.listen_until(
            &[msg_type::SECURITY_DEFINITION],
            DeclaredTotalPredicate::new(req_id.as_str()),
            self.response_timeout,
        );

        self.session
            .send_application_message(build_request(query, security_type, &req_id))?;
        self.metrics.record_secdef_request();
        log_refdata!(Level::DEBUG, %req_id, ?query, "secdef request sent");

        let (received, predicate) = listener.collect_with_predicate().await;
        let responses: Vec<BusMessage> = received
            .into_iter()
            .filter(|m| predicate.is_response(m))
            .collect();

        check_rejection(&responses)?;

        let complete = matches!(predicate.declared_total(), Some(total) if predicate.matched() >= total);
        if complete {
            self.store(query.clone(), responses.clone()).await;
        } else {
            log_refdata!(
                Level::WARN,
                %req_id,
                received = predicate.matched(),
                declared = ?predicate.declared_total(),
                "secdef response incomplete at deadline; not cached"
            );
        }

        Ok(responses)
    }

    fn cached(&self, query: &SecDefQuery) -> Option<Vec<BusMessage>> {
        let hit = self.cache.lock().get(query, (self.clock)())?;
        self.metrics.record_cache_hit();
        log_refdata!(Level::DEBUG, results = hit.len(), "secdef cache hit");
        Some(hit)
    }

    async fn store(&self, query: SecDefQuery, responses: Vec<BusMessage>) {
        let now = (self.clock)();
        let json = {
            let mut cache = self.cache.lock();
            cache.insert(query, responses, now);
            match &self.cache_path {
                Some(_) => cache.to_json(now).ok(),
                None => None,
            }
        };

        if let (Some(path), Some(json)) = (&self.cache_path, json) {
            if let Err(e) = tokio::fs::write(path, json).await {
                log_refdata!(Level::WARN, path = %path.display(), error = %e, "failed to persist secdef cache");
            }
        }
    }
}

fn build_request(query: &SecDefQuery, security_type: &str, req_id: &str) -> FixMessage {
    let mut msg = FixMessage::new();
    msg.append(tags::MSG_TYPE, msg_type::SECURITY_DEFINITION_REQUEST)
        .append(tags::SECURITY_REQ_ID, req_id)
        .append(tags::SECURITY_TYPE, security_type);
    if let Some(exchange) = &query.security_exchange {
        msg.append(tags::SECURITY_EXCHANGE, exchange);
    }
    if let Some(put_or_call) = query.put_or_call {
        msg.append(tags::PUT_OR_CALL, put_or_call.code());
    }
    if let Some(symbol) = &query.symbol {
        msg.append(tags::SYMBOL, symbol);
    }
    if let Some(sub_type) = &query.security_sub_type {
        msg.append(tags::SECURITY_SUB_TYPE, sub_type);
    }
    if let Some(security_id) = &query.security_id {
        msg.append(tags::SECURITY_ID, security_id);
    }
    msg.append(
        tags::SECURITY_REQUEST_TYPE,
        query
            .security_request_type
            .unwrap_or(DEFAULT_SECURITY_REQUEST_TYPE),
    );
    if let Some(maturity) = &query.maturity_month_year {
        msg.append(tags::MATURITY_MONTH_YEAR, maturity);
    }
    msg
}

/// A lone response can carry an exchange-side rejection
fn check_rejection(responses: &[BusMessage]) -> Result<(), RefDataError> {
    let [only] = responses else {
        return Ok(());
    };
    let desc = only.get_str(tags::SECURITY_DESC).unwrap_or_default();
    if only.get_str(tags::SECURITY_RESPONSE_TYPE) == Some(tags::RESPONSE_REJECT_PROPOSAL) {
        return Err(RefDataError::LookupRejected(format!("Rejected: {}", desc)));
    }
    if only.get_str(tags::TOT_NUM_REPORTS) == Some("0") {
        return Err(RefDataError::LookupRejected(desc.to_string()));
    }
    Ok(())
}
