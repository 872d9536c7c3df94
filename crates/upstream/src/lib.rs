//! Shared outbound client for the GitHub Copilot API.
//!
//! One connection pool, uniform headers, transient-failure retries with
//! exponential backoff, per-attempt timeouts, and caller-driven
//! cancellation. Streaming bodies are never buffered; the caller owns the
//! response reader.

pub mod client;

pub use client::CopilotClient;
