//! The entity store: single source of truth for services, incidents,
//! operations, and per-service logs.

pub mod entity_store;
pub mod error;

pub use entity_store::{EntityStore, LogPage, LogWindow, DEFAULT_LOG_LIMIT};
pub use error::StoreError;
