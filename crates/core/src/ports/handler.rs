//! Event handler port and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{IndexerResult, RegistryError, RegistryResult};
use crate::models::{Block, Event, Receipt, Transaction};
use crate::registry::{RegistryHandle, Source};

/// Everything a handler sees for one invocation.
///
/// `event` is `None` when the handler fires for a deployment transaction
/// rather than an emitted event.
pub struct HandlerCtx<'a> {
    /// The registered source that matched.
    pub source: &'a Source,
    pub block: &'a Block,
    pub transaction: &'a Transaction,
    pub receipt: &'a Receipt,
    pub event: Option<&'a Event>,
    /// Registry handle for instantiating templates mid-stream.
    pub registry: &'a RegistryHandle,
}

/// A unit of indexing logic bound to contract events by the manifest.
///
/// Handlers own their storage access (typically an `Arc<dyn EntityStore>`
/// captured at construction); the dispatcher only hands them chain data.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identifier the manifest binds against.
    fn id(&self) -> &'static str;

    async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()>;
}

impl std::fmt::Debug for dyn EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler").field("id", &self.id()).finish()
    }
}

/// Name-to-handler table seeded at startup.
///
/// Manifest handler names resolve here exactly once, while sources are
/// registered; an unknown name fails startup instead of being discovered
/// at dispatch time.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its own id. Re-registering an id
    /// replaces the previous handler.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(handler.id(), handler);
    }

    pub fn resolve(&self, id: &str) -> RegistryResult<Arc<dyn EventHandler>> {
        self.handlers
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownHandler(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
