//! Declarative source manifest.
//!
//! The manifest is a JSON document listing the contracts to watch, the
//! events to bind, and the templates handlers may instantiate at runtime.
//! Handler names in the manifest resolve against the typed
//! [`HandlerRegistry`] while the registry is seeded; an unknown name
//! fails startup.

use serde::Deserialize;

use crate::error::{IndexerError, IndexerResult, RegistryResult};
use crate::models::{Address, CheckpointRecord};
use crate::ports::handler::HandlerRegistry;
use crate::registry::{EventBinding, RegistryHandle, Source, Template};

/// One event-to-handler binding in the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    /// Event name; hashed into the selector the dispatcher matches on.
    pub name: String,
    /// Handler id, resolved at seed time.
    #[serde(rename = "fn")]
    pub handler: String,
}

/// A statically watched contract.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub contract: String,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub events: Vec<EventConfig>,
    /// Handler for deploy-type transactions targeting this contract.
    #[serde(default)]
    pub deploy_fn: Option<String>,
}

/// A template sources can be spawned from at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    #[serde(default)]
    pub events: Vec<EventConfig>,
    #[serde(default)]
    pub deploy_fn: Option<String>,
}

/// The full manifest document.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

impl Manifest {
    pub fn from_json(raw: &str) -> IndexerResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| IndexerError::ConfigError(format!("invalid manifest: {e}")))
    }

    /// Resolves every handler reference and registers all sources and
    /// templates.
    ///
    /// Fails with [`crate::error::RegistryError::UnknownHandler`] or
    /// [`crate::error::RegistryError::InvalidAddress`] before anything is
    /// registered half-way: the manifest is validated in full first.
    pub fn seed_registry(
        &self,
        handlers: &HandlerRegistry,
        registry: &RegistryHandle,
    ) -> IndexerResult<()> {
        let mut sources = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            sources.push(Source {
                address: Address::parse(&source.contract)?,
                start_block: source.start,
                event_bindings: resolve_bindings(&source.events, handlers)?,
                deploy_handler: source
                    .deploy_fn
                    .as_deref()
                    .map(|id| handlers.resolve(id))
                    .transpose()?,
                spawned_from: None,
            });
        }

        let mut templates = Vec::with_capacity(self.templates.len());
        for template in &self.templates {
            templates.push(Template {
                name: template.name.clone(),
                event_bindings: resolve_bindings(&template.events, handlers)?,
                deploy_handler: template
                    .deploy_fn
                    .as_deref()
                    .map(|id| handlers.resolve(id))
                    .transpose()?,
            });
        }

        for source in sources {
            registry.register_source(source);
        }
        for template in templates {
            registry.register_template(template);
        }
        Ok(())
    }
}

fn resolve_bindings(
    events: &[EventConfig],
    handlers: &HandlerRegistry,
) -> RegistryResult<Vec<EventBinding>> {
    events
        .iter()
        .map(|e| Ok(EventBinding::new(e.name.clone(), handlers.resolve(&e.handler)?)))
        .collect()
}

/// One exported checkpoint, as found in a seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSeed {
    pub block: u64,
    pub contract: String,
}

/// Parses a checkpoint seed file into insertable records.
pub fn parse_checkpoint_seeds(raw: &str) -> IndexerResult<Vec<CheckpointRecord>> {
    let seeds: Vec<CheckpointSeed> = serde_json::from_str(raw)
        .map_err(|e| IndexerError::ConfigError(format!("invalid checkpoint seed file: {e}")))?;
    seeds
        .into_iter()
        .map(|s| Ok(CheckpointRecord::new(s.block, Address::parse(&s.contract)?)))
        .collect()
}
