//! Profile persistence for copilot-relay.
//!
//! All state lives as JSON files under the per-user config root, written
//! with owner-only permissions. Files are rewritten in full on each
//! mutation; the last writer wins.

pub mod profiles;

pub use profiles::ProfileStore;
