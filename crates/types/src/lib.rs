//! Core types shared across the copilot-relay workspace.
//!
//! This crate defines the abstractions every other layer depends on: the
//! unified error type, credential classification, profile and catalog data
//! models, and the inbound wire-schema identifier. Higher layers depend only
//! on `relay-types`, never on each other's internals.

pub mod catalog;
pub mod credential;
pub mod error;
pub mod profile;
pub mod schema;
pub mod stream;

pub use catalog::{
    CatalogView, EntryStatus, ModelDescriptor, RefreshSource, RefreshStats, StoredEntry,
};
pub use credential::{is_copilot_token, redact};
pub use error::{RelayError, Result};
pub use profile::{Profile, UserInfo, generate_profile_id, now_millis};
pub use schema::InboundSchema;
pub use stream::ByteStream;
