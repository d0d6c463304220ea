//! Security-definition response cache
//!
//! Keyed by the canonical query. Entries expire on wall-clock time so the
//! cache can be persisted across restarts as JSON:
//! - a read never returns an expired entry (and evicts it)
//! - a write replaces any earlier entry for the same key

use crate::core::enums::PutOrCall;
use crate::core::instrument::InstrumentId;
use crate::fix::FixMessage;
use crate::session::bus::BusMessage;
use crate::log_refdata;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::Level;

/// Canonical security-definition query
///
/// Attributes are named fields, so two queries built in a different order
/// compare and hash equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecDefQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put_or_call: Option<PutOrCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity_month_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_request_type: Option<u32>,
}

impl SecDefQuery {
    pub fn new(security_type: impl Into<String>) -> Self {
        Self {
            security_type: Some(security_type.into()),
            ..Self::default()
        }
    }

    /// Query that pins down exactly one instrument
    pub fn from_instrument(id: &InstrumentId) -> Self {
        Self {
            security_type: Some(id.security_type.code().to_string()),
            security_exchange: Some(id.exchange.clone()),
            symbol: Some(id.symbol.clone()),
            put_or_call: id.put_or_call,
            security_id: Some(id.security_id.clone()),
            ..Self::default()
        }
    }

    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.security_exchange = Some(exchange.into());
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn put_or_call(mut self, put_or_call: PutOrCall) -> Self {
        self.put_or_call = Some(put_or_call);
        self
    }

    pub fn sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.security_sub_type = Some(sub_type.into());
        self
    }

    pub fn security_id(mut self, security_id: impl Into<String>) -> Self {
        self.security_id = Some(security_id.into());
        self
    }

    pub fn maturity(mut self, maturity_month_year: impl Into<String>) -> Self {
        self.maturity_month_year = Some(maturity_month_year.into());
        self
    }
}

struct CacheEntry {
    messages: Vec<BusMessage>,
    expires_at: SystemTime,
}

/// On-disk form of one entry
#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    query: SecDefQuery,
    expires_unix: u64,
    messages: Vec<Vec<(u32, String)>>,
}

/// TTL cache of security-definition responses
pub struct SecDefCache {
    entries: HashMap<SecDefQuery, CacheEntry>,
    ttl: Duration,
}

impl SecDefCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unexpired responses for `query`
    pub fn get(&mut self, query: &SecDefQuery, now: SystemTime) -> Option<Vec<BusMessage>> {
        match self.entries.get(query) {
            Some(entry) if entry.expires_at > now => Some(entry.messages.clone()),
            Some(_) => {
                self.entries.remove(query);
                None
            }
            None => None,
        }
    }

    /// Store responses, replacing any previous entry
    pub fn insert(&mut self, query: SecDefQuery, messages: Vec<BusMessage>, now: SystemTime) {
        let entry = CacheEntry {
            messages,
            expires_at: now + self.ttl,
        };
        self.entries.insert(query, entry);
    }

    /// Serialize unexpired entries
    pub fn to_json(&self, now: SystemTime) -> serde_json::Result<String> {
        let persisted: Vec<PersistedEntry> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(query, entry)| PersistedEntry {
                query: query.clone(),
                expires_unix: unix_secs(entry.expires_at),
                messages: entry.messages.iter().map(|m| flatten_message(m)).collect(),
            })
            .collect();
        serde_json::to_string(&persisted)
    }

    /// Load entries from JSON, dropping those already expired
    pub fn from_json(contents: &str, ttl: Duration, now: SystemTime) -> serde_json::Result<Self> {
        let persisted: Vec<PersistedEntry> = serde_json::from_str(contents)?;
        let mut cache = Self::new(ttl);
        for entry in persisted {
            let expires_at = UNIX_EPOCH + Duration::from_secs(entry.expires_unix);
            if expires_at <= now {
                continue;
            }
            let messages = entry.messages.into_iter().map(rebuild_message).collect();
            cache.entries.insert(entry.query, CacheEntry { messages, expires_at });
        }
        Ok(cache)
    }

    /// Read a persisted cache; a missing or corrupt file yields an empty cache
    pub fn load(path: &Path, ttl: Duration) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return Self::new(ttl),
        };
        match Self::from_json(&contents, ttl, SystemTime::now()) {
            Ok(cache) => {
                log_refdata!(Level::INFO, path = %path.display(), entries = cache.len(), "secdef cache loaded");
                cache
            }
            Err(e) => {
                log_refdata!(Level::WARN, path = %path.display(), error = %e, "discarding unreadable secdef cache");
                Self::new(ttl)
            }
        }
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn flatten_message(msg: &FixMessage) -> Vec<(u32, String)> {
    msg.fields()
        .iter()
        .map(|(tag, value)| (*tag, String::from_utf8_lossy(value).into_owned()))
        .collect()
}

fn rebuild_message(fields: Vec<(u32, String)>) -> BusMessage {
    let mut msg = FixMessage::new();
    for (tag, value) in fields {
        msg.append_bytes(tag, value.into_bytes());
    }
    Arc::new(msg)
}
