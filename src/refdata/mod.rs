//! Reference data
//!
//! - `cache`: canonical secdef query and its TTL cache
//! - `reference`: serialized, correlated SecurityDefinitionRequest
//! - `catalog`: security records and directory browsing

pub mod cache;
pub mod catalog;
pub mod reference;

pub use cache::{SecDefCache, SecDefQuery};
pub use catalog::{DirEntry, SecurityListRequest, SecurityRecord};
pub use reference::{RefDataError, ReferenceDataCache};
