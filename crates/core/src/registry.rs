//! Source registry: which contracts the indexer watches, and with which
//! handlers.
//!
//! Sources are registered from the manifest at startup and can also be
//! instantiated from templates at runtime (the factory pattern: a deploy
//! event on one contract spawns a new source for the deployed contract).
//! A source, once registered, is immutable; the registry only grows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::error::{RegistryError, RegistryResult};
use crate::metrics::record_source_instantiated;
use crate::models::{Address, Selector};
use crate::ports::handler::EventHandler;

/// One event-to-handler binding on a source or template.
#[derive(Clone, Debug)]
pub struct EventBinding {
    /// Declared event name (selector input).
    pub event_name: String,
    /// Precomputed selector, matched against `keys[0]` at dispatch time.
    pub selector: Selector,
    pub handler: Arc<dyn EventHandler>,
}

impl EventBinding {
    pub fn new(event_name: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        let event_name = event_name.into();
        let selector = Selector::from_event_name(&event_name);
        Self {
            event_name,
            selector,
            handler,
        }
    }
}

/// A watched contract.
#[derive(Debug)]
pub struct Source {
    pub address: Address,
    /// First block this source cares about.
    pub start_block: u64,
    pub event_bindings: Vec<EventBinding>,
    /// Invoked for deploy-type transactions targeting this address.
    pub deploy_handler: Option<Arc<dyn EventHandler>>,
    /// Template this source was instantiated from, if any.
    pub spawned_from: Option<String>,
}

/// A named blueprint for runtime-instantiated sources.
#[derive(Clone)]
pub struct Template {
    pub name: String,
    pub event_bindings: Vec<EventBinding>,
    pub deploy_handler: Option<Arc<dyn EventHandler>>,
}

#[derive(Default)]
struct RegistryInner {
    /// Insertion-ordered.
    sources: Vec<Arc<Source>>,
    by_address: HashMap<Address, Vec<Arc<Source>>>,
    templates: HashMap<String, Template>,
    /// Sources instantiated since the last drain, awaiting backfill.
    pending_backfill: Vec<Arc<Source>>,
}

impl RegistryInner {
    fn push_source(&mut self, source: Source) -> Arc<Source> {
        let source = Arc::new(source);
        self.sources.push(Arc::clone(&source));
        self.by_address
            .entry(source.address.clone())
            .or_default()
            .push(Arc::clone(&source));
        source
    }
}

/// Shared, mutable view of the registered sources.
///
/// Cloning is cheap; all clones see the same registry. Handlers receive a
/// reference through their context so they can instantiate templates
/// while a block is being processed. The dispatcher works from a snapshot
/// taken at block start, so a source instantiated during block `n`
/// becomes visible at block `n + 1`.
#[derive(Clone, Default)]
pub struct RegistryHandle {
    inner: Arc<Mutex<RegistryInner>>,
}

impl RegistryHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a static source from the manifest.
    pub fn register_source(&self, source: Source) {
        let mut inner = self.lock();
        info!(
            "📜 Watching contract {} from block {}",
            source.address, source.start_block
        );
        inner.push_source(source);
    }

    /// Declares a template available for instantiation.
    pub fn register_template(&self, template: Template) {
        let mut inner = self.lock();
        inner.templates.insert(template.name.clone(), template);
    }

    /// Spawns a new source from a declared template.
    ///
    /// The new source is queued for backfill and picked up by the block
    /// loop after the current block commits.
    pub fn instantiate(
        &self,
        template_name: &str,
        address: Address,
        start_block: u64,
    ) -> RegistryResult<Arc<Source>> {
        let mut inner = self.lock();
        let template = inner
            .templates
            .get(template_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTemplate(template_name.to_string()))?;

        info!(
            "🏭 Instantiating template '{}' for contract {} at block {}",
            template_name, address, start_block
        );
        let source = inner.push_source(Source {
            address,
            start_block,
            event_bindings: template.event_bindings,
            deploy_handler: template.deploy_handler,
            spawned_from: Some(template.name),
        });
        inner.pending_backfill.push(Arc::clone(&source));
        record_source_instantiated();
        Ok(source)
    }

    /// Snapshot of all registered sources, in registration order.
    pub fn sources(&self) -> Vec<Arc<Source>> {
        self.lock().sources.clone()
    }

    /// Sources registered for a canonical address.
    pub fn sources_for_address(&self, address: &Address) -> Vec<Arc<Source>> {
        self.lock().by_address.get(address).cloned().unwrap_or_default()
    }

    /// Smallest `start_block` across all sources, `None` when empty.
    pub fn min_start_block(&self) -> Option<u64> {
        self.lock().sources.iter().map(|s| s.start_block).min()
    }

    /// Takes the sources instantiated since the last drain.
    pub fn drain_pending_backfill(&self) -> Vec<Arc<Source>> {
        std::mem::take(&mut self.lock().pending_backfill)
    }
}
