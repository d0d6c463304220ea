//! FIX tag=value codec
//!
//! - `tags`: tag numbers and enumerated values
//! - `message`: decoded message with scalar and group-scoped lookup
//! - `parser`: streaming framer over raw socket bytes

pub mod message;
pub mod parser;
pub mod tags;

pub use message::FixMessage;
pub use parser::{FixParseError, FixParser};
