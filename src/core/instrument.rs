//! Canonical instrument identifier
//!
//! External form: `/TYPE/EXCHANGE/SYMBOL/SECID` for most instruments and
//! `/OPT/EXCHANGE/SYMBOL/Put|Call/SECID` for options. Decoding is strict: a
//! wrong segment count, an empty segment or a put/call flag on a non-option
//! is rejected rather than defaulted.

use crate::core::enums::PutOrCall;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Security type carried in SecurityType(167)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityType {
    Future,
    Option,
    Other(String),
}

impl SecurityType {
    /// FIX SecurityType code
    pub fn code(&self) -> &str {
        match self {
            SecurityType::Future => "FUT",
            SecurityType::Option => "OPT",
            SecurityType::Other(code) => code,
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "FUT" => SecurityType::Future,
            "OPT" => SecurityType::Option,
            other => SecurityType::Other(other.to_string()),
        }
    }

    #[inline]
    pub fn is_option(&self) -> bool {
        matches!(self, SecurityType::Option)
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Identity codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentError {
    #[error("instrument id must start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("wrong number of segments in instrument id: {0}")]
    SegmentCount(String),
    #[error("empty segment in instrument id: {0}")]
    EmptySegment(String),
    #[error("invalid put/call segment: {0}")]
    InvalidPutOrCall(String),
    #[error("missing required attribute: {0}")]
    MissingAttribute(&'static str),
    #[error("option instrument requires put/call")]
    OptionWithoutPutOrCall,
    #[error("put/call given for non-option security type {0}")]
    PutOrCallOnNonOption(String),
    #[error("attribute {0} may not contain '/'")]
    SlashInAttribute(&'static str),
}

/// Structured instrument identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId {
    pub security_type: SecurityType,
    pub exchange: String,
    pub symbol: String,
    pub put_or_call: Option<PutOrCall>,
    pub security_id: String,
}

impl InstrumentId {
    /// Build and validate an identity from its attributes
    pub fn new(
        security_type: SecurityType,
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        put_or_call: Option<PutOrCall>,
        security_id: impl Into<String>,
    ) -> Result<Self, InstrumentError> {
        let id = Self {
            security_type,
            exchange: exchange.into(),
            symbol: symbol.into(),
            put_or_call,
            security_id: security_id.into(),
        };
        id.validate()?;
        Ok(id)
    }

    /// Check required attributes and the option/put-call pairing
    pub fn validate(&self) -> Result<(), InstrumentError> {
        let attrs: [(&'static str, &str); 4] = [
            ("SecurityType", self.security_type.code()),
            ("SecurityExchange", &self.exchange),
            ("Symbol", &self.symbol),
            ("SecurityID", &self.security_id),
        ];
        for (name, value) in attrs {
            if value.is_empty() {
                return Err(InstrumentError::MissingAttribute(name));
            }
            if value.contains('/') {
                return Err(InstrumentError::SlashInAttribute(name));
            }
        }

        match (self.security_type.is_option(), self.put_or_call) {
            (true, None) => Err(InstrumentError::OptionWithoutPutOrCall),
            (false, Some(_)) => Err(InstrumentError::PutOrCallOnNonOption(
                self.security_type.code().to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Canonical slash-delimited form
    pub fn encode(&self) -> Result<String, InstrumentError> {
        self.validate()?;
        Ok(self.to_path())
    }

    /// Parse the canonical form
    pub fn decode(path: &str) -> Result<Self, InstrumentError> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| InstrumentError::MissingLeadingSlash(path.to_string()))?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(InstrumentError::EmptySegment(path.to_string()));
        }

        let security_type = SecurityType::from_code(segments[0]);
        let expected = if security_type.is_option() { 5 } else { 4 };
        if segments.len() != expected {
            return Err(InstrumentError::SegmentCount(path.to_string()));
        }

        let (put_or_call, security_id) = if security_type.is_option() {
            let poc = PutOrCall::from_name(segments[3])
                .ok_or_else(|| InstrumentError::InvalidPutOrCall(segments[3].to_string()))?;
            (Some(poc), segments[4])
        } else {
            (None, segments[3])
        };

        Self::new(security_type, segments[1], segments[2], put_or_call, security_id)
    }

    fn to_path(&self) -> String {
        match self.put_or_call {
            Some(poc) => format!(
                "/{}/{}/{}/{}/{}",
                self.security_type, self.exchange, self.symbol, poc, self.security_id
            ),
            None => format!(
                "/{}/{}/{}/{}",
                self.security_type, self.exchange, self.symbol, self.security_id
            ),
        }
    }
}

impl FromStr for InstrumentId {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}
