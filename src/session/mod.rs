//! FIX session plumbing
//!
//! - `transport`: TCP/TLS byte stream, framing and the writer task
//! - `bus`: per-MsgType broadcast topics for inbound messages
//! - `fix_session`: logon, sequencing, heartbeats
//! - `correlation`: request/response over the bus

pub mod bus;
pub mod correlation;
pub mod fix_session;
pub mod transport;

pub use bus::{BusMessage, MessageBus, ALL_TOPICS};
pub use correlation::{
    Correlation, CorrelationEngine, DeclaredTotalPredicate, FieldMatch, TerminationPredicate,
};
pub use fix_session::{FixSession, SequenceState, SessionError};
pub use transport::{ConnectionState, FixReader, TransportError};
