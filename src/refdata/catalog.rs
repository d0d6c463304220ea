//! Instrument catalog built from security definitions
//!
//! - `security_list`: one [`SecurityRecord`] per definition, derived fields included
//! - `list_directory`: path-based browsing of the catalog
//!
//! Directory path segments map to security attributes:
//! `/TYPE/EXCHANGE/SYMBOL/<Put|Call|SubType>/MATURITY/SECID` for options and
//! `/TYPE/EXCHANGE/SYMBOL/SubType/SECID` for everything else.

use crate::core::enums::{security_sub_type_code, security_sub_type_name, PutOrCall};
use crate::core::instrument::{InstrumentId, SecurityType};
use crate::fix::tags;
use crate::fix::FixMessage;
use crate::refdata::cache::SecDefQuery;
use crate::refdata::reference::{RefDataError, ReferenceDataCache};
use crate::session::bus::BusMessage;
use crate::log_refdata;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use tracing::Level;

/// Security list request: a canonical instrument id or explicit attributes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityListRequest {
    #[serde(default)]
    pub instrument_id: Option<String>,
    #[serde(flatten)]
    pub query: SecDefQuery,
}

/// One instrument leg of a strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLeg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio_qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maturity_month_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strike_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_or_call: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAltId {
    pub security_alt_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Catalog view of one security definition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRecord {
    pub instrument_id: String,
    pub security_type: String,
    pub security_exchange: String,
    pub symbol: String,
    pub security_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maturity_month_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maturity_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_trade_vol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Tick size as the smallest integer sharing its significant digits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price_increment: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_sub_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strike_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_or_call: Option<PutOrCall>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub legs: Vec<SecurityLeg>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alt_ids: Vec<SecurityAltId>,
}

impl SecurityRecord {
    /// Build a record; `None` when the definition has no valid identity
    pub fn from_definition(msg: &FixMessage) -> Option<Self> {
        let security_type = msg.get_str(tags::SECURITY_TYPE)?.to_string();
        let security_exchange = msg.get_str(tags::SECURITY_EXCHANGE)?.to_string();
        let symbol = msg.get_str(tags::SYMBOL)?.to_string();
        let security_id = msg.get_str(tags::SECURITY_ID)?.to_string();
        let put_or_call = msg.parse::<i64>(tags::PUT_OR_CALL).and_then(PutOrCall::from_code);

        let instrument_id = InstrumentId::new(
            SecurityType::from_code(&security_type),
            security_exchange.as_str(),
            symbol.as_str(),
            put_or_call,
            security_id.as_str(),
        )
        .ok()?
        .to_string();

        let maturity_month_year = msg.get_str(tags::MATURITY_MONTH_YEAR).map(str::to_string);
        let maturity_date = maturity_month_year
            .as_ref()
            .map(|mmy| format!("{}{}", mmy, msg.get_str(tags::MATURITY_DAY).unwrap_or_default()));

        Some(Self {
            instrument_id,
            security_type,
            security_exchange,
            symbol,
            security_id,
            maturity_month_year,
            maturity_date,
            min_trade_vol: msg.parse(tags::MIN_TRADE_VOL),
            currency: msg.get_str(tags::CURRENCY).map(str::to_string),
            min_price_increment: msg.get_str(tags::PRICE_RATIO).and_then(tick_from_price_ratio),
            contract_multiplier: msg
                .get_str(tags::MIN_PRICE_INCREMENT_AMOUNT)
                .and_then(|v| v.split_whitespace().next())
                .and_then(|v| v.parse().ok()),
            security_desc: msg.get_str(tags::SECURITY_DESC).map(str::to_string),
            security_sub_type: msg.get_str(tags::SECURITY_SUB_TYPE).map(str::to_string),
            strike_price: msg.parse(tags::STRIKE_PRICE),
            put_or_call,
            legs: legs(msg),
            alt_ids: alt_ids(msg),
        })
    }
}

fn legs(msg: &FixMessage) -> Vec<SecurityLeg> {
    let count = msg.parse::<usize>(tags::NO_LEGS).unwrap_or(0);
    let sep = tags::LEG_SYMBOL;
    let field = |tag: u32, nth: usize| msg.get_str_in_group(tag, nth, sep).map(str::to_string);

    (1..=count)
        .map(|i| SecurityLeg {
            symbol: field(tags::LEG_SYMBOL, i),
            ratio_qty: field(tags::LEG_RATIO_QTY, i),
            side: field(tags::LEG_SIDE, i),
            security_type: field(tags::LEG_SECURITY_TYPE, i),
            security_id: field(tags::LEG_SECURITY_ID, i),
            security_exchange: field(tags::LEG_SECURITY_EXCHANGE, i),
            security_desc: field(tags::LEG_SECURITY_DESC, i),
            currency: field(tags::LEG_CURRENCY, i),
            maturity_month_year: field(tags::LEG_MATURITY_MONTH_YEAR, i),
            strike_price: msg.parse_in_group(tags::LEG_STRIKE_PRICE, i, sep),
            put_or_call: field(tags::LEG_PUT_OR_CALL, i),
        })
        .collect()
}

fn alt_ids(msg: &FixMessage) -> Vec<SecurityAltId> {
    let count = msg.parse::<usize>(tags::NO_SECURITY_ALT_ID).unwrap_or(0);
    let sep = tags::SECURITY_ALT_ID;
    (1..=count)
        .filter_map(|i| {
            Some(SecurityAltId {
                security_alt_id: msg.get_str_in_group(tags::SECURITY_ALT_ID, i, sep)?.to_string(),
                source: msg
                    .get_str_in_group(tags::SECURITY_ALT_ID_SOURCE, i, sep)
                    .map(str::to_string),
            })
        })
        .collect()
}

/// `3125/100000 RTS(78125/10000000)` → 3125
///
/// Only the leading fraction is used; the RTS part is a variable tick table.
pub fn tick_from_price_ratio(ratio: &str) -> Option<i64> {
    let fraction = ratio.split_whitespace().next()?;
    let (num, denom) = fraction.split_once('/')?;
    let num = Decimal::from_str(num.trim()).ok()?;
    let denom = Decimal::from_str(denom.trim()).ok()?;
    let value = num.checked_div(denom)?.normalize();
    i64::try_from(value.mantissa()).ok()
}

/// One directory listing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub node_name: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_id: Option<String>,
}

impl DirEntry {
    fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            text: name.clone(),
            node_name: name,
            instrument_id: None,
        }
    }
}

/// What a directory path lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listing {
    SubTypes,
    Maturities,
    Nodes { depth: usize },
}

/// Parsed directory path: the secdef query plus the listing shape
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryPlan {
    query: SecDefQuery,
    listing: Listing,
}

impl DirectoryPlan {
    /// `None` for the root
    pub fn parse(path: &str) -> Result<Option<Self>, RefDataError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Ok(None);
        }

        let depth = segments.len();
        let too_deep = || RefDataError::InvalidPath(path.to_string());
        let mut query = SecDefQuery::new(segments[0]);
        if let Some(exchange) = segments.get(1) {
            query.security_exchange = Some(exchange.to_string());
        }
        if let Some(symbol) = segments.get(2) {
            query.symbol = Some(symbol.to_string());
        }

        let is_option = SecurityType::from_code(segments[0]).is_option();
        let listing = if is_option {
            if depth > 6 {
                return Err(too_deep());
            }
            if let Some(kind) = segments.get(3) {
                match PutOrCall::from_name(kind) {
                    Some(put_or_call) => query.put_or_call = Some(put_or_call),
                    None => query.security_sub_type = Some(sub_type_filter(kind)),
                }
            }
            if let Some(maturity) = segments.get(4) {
                query.maturity_month_year = Some(maturity.to_string());
            }
            if let Some(security_id) = segments.get(5) {
                query.security_id = Some(security_id.to_string());
            }
            match depth {
                3 => Listing::SubTypes,
                4 => Listing::Maturities,
                _ => Listing::Nodes { depth },
            }
        } else {
            if depth > 5 {
                return Err(too_deep());
            }
            if let Some(sub_type) = segments.get(3) {
                query.security_sub_type = Some(sub_type_filter(sub_type));
            }
            if let Some(security_id) = segments.get(4) {
                query.security_id = Some(security_id.to_string());
            }
            match depth {
                3 => Listing::SubTypes,
                _ => Listing::Nodes { depth },
            }
        };

        Ok(Some(Self { query, listing }))
    }

    #[inline]
    pub fn query(&self) -> &SecDefQuery {
        &self.query
    }

    /// Build the listing from the definitions the query returned
    pub fn entries(&self, definitions: &[BusMessage]) -> Vec<DirEntry> {
        match self.listing {
            Listing::Maturities => maturities(definitions),
            Listing::SubTypes => self.sub_types(definitions),
            Listing::Nodes { depth } => self.nodes(definitions, depth),
        }
    }

    fn is_option(&self) -> bool {
        self.query.security_type.as_deref() == Some(SecurityType::Option.code())
    }

    fn sub_types(&self, definitions: &[BusMessage]) -> Vec<DirEntry> {
        let mut entries = Vec::new();
        if self.is_option() {
            entries.push(DirEntry::named(PutOrCall::Call.name()));
            entries.push(DirEntry::named(PutOrCall::Put.name()));
        }
        let codes: BTreeSet<i64> = definitions
            .iter()
            .filter_map(|m| m.parse::<i64>(tags::SECURITY_SUB_TYPE))
            .collect();
        entries.extend(codes.into_iter().map(|code| match security_sub_type_name(code) {
            Some(name) => DirEntry::named(name),
            None => DirEntry::named(code.to_string()),
        }));
        entries
    }

    fn nodes(&self, definitions: &[BusMessage], depth: usize) -> Vec<DirEntry> {
        let security_type = self.query.security_type.as_deref();
        let mut keyed: Vec<((String, f64, String), DirEntry)> = definitions
            .iter()
            .filter(|m| m.get_str(tags::SECURITY_TYPE) == security_type)
            .filter_map(|m| {
                let node_tag = match depth {
                    1 => tags::SECURITY_EXCHANGE,
                    2 => tags::SYMBOL,
                    _ => tags::SECURITY_ID,
                };
                let node_name = m.get_str(node_tag)?.to_string();
                let instrument_id = if depth >= 3 {
                    SecurityRecord::from_definition(m).map(|r| r.instrument_id)
                } else {
                    None
                };
                let key = (
                    m.get_str(tags::MATURITY_MONTH_YEAR).unwrap_or_default().to_string(),
                    m.parse::<f64>(tags::STRIKE_PRICE).unwrap_or(0.0),
                    node_name.clone(),
                );
                let entry = DirEntry {
                    node_name,
                    text: m.get_str(tags::SECURITY_DESC).unwrap_or_default().to_string(),
                    instrument_id,
                };
                Some((key, entry))
            })
            .collect();

        keyed.sort_by(|(a, _), (b, _)| {
            a.0.cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut seen = HashSet::new();
        keyed
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| seen.insert(entry.node_name.clone()))
            .collect()
    }
}

fn maturities(definitions: &[BusMessage]) -> Vec<DirEntry> {
    let set: BTreeSet<&str> = definitions
        .iter()
        .map(|m| match m.get_str(tags::MATURITY_MONTH_YEAR) {
            Some(mmy) if !mmy.is_empty() => mmy,
            _ => "UnspecifiedMaturity",
        })
        .collect();
    set.into_iter().map(DirEntry::named).collect()
}

/// Sub-type path segments are strategy names; unknown names pass through raw
fn sub_type_filter(segment: &str) -> String {
    match security_sub_type_code(segment) {
        Some(code) => code.to_string(),
        None => segment.to_string(),
    }
}

/// Entries listed at `/`
pub fn root_entries() -> Vec<DirEntry> {
    vec![
        DirEntry {
            node_name: "FUT".into(),
            text: "Futures".into(),
            instrument_id: None,
        },
        DirEntry {
            node_name: "OPT".into(),
            text: "Options".into(),
            instrument_id: None,
        },
    ]
}

impl ReferenceDataCache {
    /// Catalog records for an instrument id or attribute set
    pub async fn security_list(
        &self,
        request: &SecurityListRequest,
    ) -> Result<Vec<SecurityRecord>, RefDataError> {
        let query = match &request.instrument_id {
            Some(id) => SecDefQuery::from_instrument(&InstrumentId::decode(id)?),
            None => request.query.clone(),
        };

        let definitions = self.query(&query).await?;
        let records = definitions
            .iter()
            .filter_map(|m| {
                let record = SecurityRecord::from_definition(m);
                if record.is_none() {
                    log_refdata!(Level::DEBUG, definition = %m, "skipped secdef without valid identity");
                }
                record
            })
            .collect();
        Ok(records)
    }

    /// Browse the catalog by path
    pub async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, RefDataError> {
        let plan = match DirectoryPlan::parse(path)? {
            Some(plan) => plan,
            None => return Ok(root_entries()),
        };
        let definitions = self.query(plan.query()).await?;
        Ok(plan.entries(&definitions))
    }
}
