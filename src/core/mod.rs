//! Core domain types
//!
//! - InstrumentId: canonical slash-delimited instrument identifier
//! - Enum tables: exchange code ↔ normalized code mappings
//! - Outbound market-data protocol and its sequencing publisher

pub mod enums;
pub mod instrument;
pub mod market_data;

pub use enums::{AggressorSide, EntryType, PutOrCall, TradingStatus};
pub use instrument::{InstrumentError, InstrumentId, SecurityType};
pub use market_data::{
    BookEntry, EventPublisher, IncrementalEntry, IncrementalEvent, MarketEvent, OutboundFrame,
    SecurityStatusEvent, SnapshotEvent, UpdateAction,
};
