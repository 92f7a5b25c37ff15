//! Scribe chain - HTTP chain client adapter.
//!
//! Implements the core's `ChainClient` port against a node's block
//! gateway. No retry logic lives here; the block loop owns the retry
//! policy.

pub mod client;

pub use client::HttpChainClient;
