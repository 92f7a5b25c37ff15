//! Scribe handlers - the governance indexing logic.
//!
//! Each handler is a small unit bound to contract events through the
//! manifest; they read and write entities through the core's entity
//! store port and never touch SQL directly.

pub mod governance;

pub use governance::{register_governance_handlers, GOVERNANCE_SCHEMA};
