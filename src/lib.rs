//! FIX market-data and reference-data bridge
//!
//! Holds one FIX session to the exchange and republishes normalized depth.
//!
//! # Architecture
//! - **fix**: tag=value codec and streaming framer
//! - **core**: instrument identity, enum tables, outbound event protocol
//! - **session**: transport, logon/sequencing, message bus, correlation
//! - **refdata**: cached security definitions, catalog and directory
//! - **market_data**: snapshot assembly, positional ladders, subscriptions
//! - **infrastructure**: Cold path (logging, metrics, config, api)

pub mod core;
pub mod fix;
pub mod infrastructure;
pub mod market_data;
pub mod refdata;
pub mod session;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::{ApiConfig, Config};

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Parse error: {0}")]
    Parse(#[from] fix::FixParseError),

    #[error("Instrument error: {0}")]
    Instrument(#[from] crate::core::InstrumentError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Reference data error: {0}")]
    RefData(#[from] refdata::RefDataError),

    #[error("Market data error: {0}")]
    Gateway(#[from] market_data::GatewayError),

    #[error("Configuration error: {0}")]
    Config(#[from] infrastructure::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Protocol faults: the process cannot safely continue
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Parse(_) => true,
            BridgeError::Session(e) => e.is_fatal(),
            BridgeError::Gateway(e) => e.is_fatal(),
            BridgeError::RefData(refdata::RefDataError::Session(e)) => e.is_fatal(),
            _ => false,
        }
    }

    /// Request rejected by validation or by the exchange
    pub fn is_business_reject(&self) -> bool {
        match self {
            BridgeError::Instrument(_) => true,
            BridgeError::RefData(e) => e.is_business_reject(),
            BridgeError::Gateway(e) => e.is_business_reject(),
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BridgeError>;
