//! Event matcher and dispatcher.
//!
//! For one block, decides which registered handlers fire and in what
//! order, and reports which `(block, contract)` checkpoints the block
//! produced. Matching is purely structural: address-exact and
//! selector-exact, no ABI decoding.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::record_handler_invocation;
use crate::models::{Address, Block, CheckpointRecord, Event, Receipt, Selector, Transaction, TxType};
use crate::ports::handler::{EventHandler, HandlerCtx};
use crate::registry::{RegistryHandle, Source};

/// Which sources a dispatch pass considers.
#[derive(Clone, Copy)]
pub enum DispatchScope<'a> {
    /// Every registered source; the live loop.
    All,
    /// Only sources at one address; backfill replay.
    Single(&'a Address),
}

/// Matches block contents against the registered sources and runs the
/// bound handlers.
pub struct Dispatcher {
    registry: RegistryHandle,
}

impl Dispatcher {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Runs every matching handler for `block`, sequentially, in block
    /// order (transactions first-to-last, events in emission order).
    ///
    /// Returns the deduplicated checkpoint records: one `(block,
    /// contract)` per contract that had at least one handler invoked.
    /// Handler errors abort the block and propagate.
    ///
    /// The source set is snapshotted on entry, so a source instantiated
    /// by a handler during this block only participates from the next
    /// dispatch on.
    #[instrument(skip_all, fields(block = block.block_number))]
    pub async fn dispatch_block(
        &self,
        block: &Block,
        scope: DispatchScope<'_>,
    ) -> IndexerResult<Vec<CheckpointRecord>> {
        let sources = match scope {
            DispatchScope::All => self.registry.sources(),
            DispatchScope::Single(address) => self.registry.sources_for_address(address),
        };
        let sources: Vec<Arc<Source>> = sources
            .into_iter()
            .filter(|s| s.start_block <= block.block_number)
            .collect();
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let mut touched: BTreeSet<CheckpointRecord> = BTreeSet::new();

        // Receipts are paired by transaction hash, not by position; a
        // node returning them in a different order must not silently
        // shift events onto the wrong transaction.
        let receipts: HashMap<&str, &Receipt> = block
            .transaction_receipts
            .iter()
            .map(|r| (r.transaction_hash.as_str(), r))
            .collect();

        for transaction in &block.transactions {
            let Some(receipt) = receipts.get(transaction.hash.as_str()) else {
                warn!(tx = %transaction.hash, "Skipping transaction without a receipt");
                continue;
            };

            self.dispatch_deploy(block, transaction, receipt, &sources, &mut touched)
                .await?;

            for event in &receipt.events {
                self.dispatch_event(block, transaction, receipt, event, &sources, &mut touched)
                    .await?;
            }
        }

        if !touched.is_empty() {
            debug!(checkpoints = touched.len(), "Block touched watched contracts");
        }
        Ok(touched.into_iter().collect())
    }

    /// Fires deploy handlers for a deploy-type transaction targeting a
    /// watched address.
    async fn dispatch_deploy(
        &self,
        block: &Block,
        transaction: &Transaction,
        receipt: &Receipt,
        sources: &[Arc<Source>],
        touched: &mut BTreeSet<CheckpointRecord>,
    ) -> IndexerResult<()> {
        if transaction.tx_type != TxType::Deploy {
            return Ok(());
        }
        let Some(raw_address) = &transaction.contract_address else {
            return Ok(());
        };
        let Ok(address) = Address::parse(raw_address) else {
            warn!(tx = %transaction.hash, address = %raw_address, "Skipping malformed deploy address");
            return Ok(());
        };

        for source in sources.iter().filter(|s| s.address == address) {
            let Some(handler) = &source.deploy_handler else {
                continue;
            };
            self.invoke(handler, source, block, transaction, receipt, None)
                .await?;
            touched.insert(CheckpointRecord::new(block.block_number, address.clone()));
        }
        Ok(())
    }

    /// Fires event handlers whose binding selector matches `keys[0]`.
    async fn dispatch_event(
        &self,
        block: &Block,
        transaction: &Transaction,
        receipt: &Receipt,
        event: &Event,
        sources: &[Arc<Source>],
        touched: &mut BTreeSet<CheckpointRecord>,
    ) -> IndexerResult<()> {
        let Ok(address) = Address::parse(&event.from_address) else {
            warn!(tx = %transaction.hash, address = %event.from_address, "Skipping malformed emitter address");
            return Ok(());
        };
        let Some(raw_selector) = event.keys.first() else {
            return Ok(());
        };
        let Ok(selector) = Selector::from_raw(raw_selector) else {
            warn!(tx = %transaction.hash, key = %raw_selector, "Skipping malformed event key");
            return Ok(());
        };

        for source in sources.iter().filter(|s| s.address == address) {
            for binding in source
                .event_bindings
                .iter()
                .filter(|b| b.selector == selector)
            {
                self.invoke(&binding.handler, source, block, transaction, receipt, Some(event))
                    .await?;
                touched.insert(CheckpointRecord::new(block.block_number, address.clone()));
            }
        }
        Ok(())
    }

    async fn invoke(
        &self,
        handler: &Arc<dyn EventHandler>,
        source: &Source,
        block: &Block,
        transaction: &Transaction,
        receipt: &Receipt,
        event: Option<&Event>,
    ) -> IndexerResult<()> {
        record_handler_invocation(handler.id());
        handler
            .call(HandlerCtx {
                source,
                block,
                transaction,
                receipt,
                event,
                registry: &self.registry,
            })
            .await
            .map_err(|e| IndexerError::HandlerFailed {
                handler: handler.id().to_string(),
                block: block.block_number,
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::registry::EventBinding;

    /// Handler that records every invocation it sees.
    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<(u64, String, Option<String>)>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn id(&self) -> &'static str {
            "recording"
        }

        async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()> {
            self.calls.lock().unwrap().push((
                ctx.block.block_number,
                ctx.source.address.to_string(),
                ctx.event.map(|e| e.data.join(",")),
            ));
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        fn id(&self) -> &'static str {
            "failing"
        }

        async fn call(&self, _ctx: HandlerCtx<'_>) -> IndexerResult<()> {
            Err(IndexerError::ConfigError("boom".into()))
        }
    }

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{n:x}")).unwrap()
    }

    fn event_at(address: &Address, name: &str, data: &[&str]) -> Event {
        Event {
            from_address: address.to_string(),
            keys: vec![Selector::from_event_name(name).to_string()],
            data: data.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn block_with_events(number: u64, events: Vec<Event>) -> Block {
        Block {
            block_number: number,
            block_hash: format!("0x{number:x}"),
            timestamp: 1_700_000_000,
            transactions: vec![Transaction {
                hash: "0x1".into(),
                tx_type: TxType::Invoke,
                contract_address: None,
            }],
            transaction_receipts: vec![Receipt {
                transaction_hash: "0x1".into(),
                events,
            }],
        }
    }

    fn register_source(
        registry: &RegistryHandle,
        address: Address,
        start_block: u64,
        handler: Arc<dyn EventHandler>,
    ) {
        registry.register_source(Source {
            address,
            start_block,
            event_bindings: vec![EventBinding::new("vote", handler)],
            deploy_handler: None,
            spawned_from: None,
        });
    }

    // Test critique: correspondance exacte adresse + sélecteur, rien d'autre
    #[tokio::test]
    async fn test_matches_address_and_selector_exactly() {
        let registry = RegistryHandle::new();
        let handler = Arc::new(RecordingHandler::default());
        register_source(&registry, addr(0xaa), 0, handler.clone());

        let block = block_with_events(
            10,
            vec![
                event_at(&addr(0xaa), "vote", &["yes"]),
                event_at(&addr(0xaa), "propose", &["ignored: wrong selector"]),
                event_at(&addr(0xbb), "vote", &["ignored: wrong address"]),
            ],
        );

        let dispatcher = Dispatcher::new(registry);
        let records = dispatcher
            .dispatch_block(&block, DispatchScope::All)
            .await
            .unwrap();

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2.as_deref(), Some("yes"));
        assert_eq!(records, vec![CheckpointRecord::new(10, addr(0xaa))]);
    }

    // Test critique: un seul checkpoint par contrat même avec plusieurs
    // événements dans le bloc
    #[tokio::test]
    async fn test_checkpoints_deduplicated_within_block() {
        let registry = RegistryHandle::new();
        let handler = Arc::new(RecordingHandler::default());
        register_source(&registry, addr(0xaa), 0, handler.clone());

        let block = block_with_events(
            20,
            vec![
                event_at(&addr(0xaa), "vote", &["1"]),
                event_at(&addr(0xaa), "vote", &["2"]),
            ],
        );

        let dispatcher = Dispatcher::new(registry);
        let records = dispatcher
            .dispatch_block(&block, DispatchScope::All)
            .await
            .unwrap();

        assert_eq!(handler.calls.lock().unwrap().len(), 2);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_source_before_start_block_is_ignored() {
        let registry = RegistryHandle::new();
        let handler = Arc::new(RecordingHandler::default());
        register_source(&registry, addr(0xaa), 100, handler.clone());

        let block = block_with_events(99, vec![event_at(&addr(0xaa), "vote", &["early"])]);
        let dispatcher = Dispatcher::new(registry);
        let records = dispatcher
            .dispatch_block(&block, DispatchScope::All)
            .await
            .unwrap();

        assert!(handler.calls.lock().unwrap().is_empty());
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_single_scope_restricts_to_one_address() {
        let registry = RegistryHandle::new();
        let watched = Arc::new(RecordingHandler::default());
        let other = Arc::new(RecordingHandler::default());
        register_source(&registry, addr(0xaa), 0, watched.clone());
        register_source(&registry, addr(0xbb), 0, other.clone());

        let block = block_with_events(
            30,
            vec![
                event_at(&addr(0xaa), "vote", &["in scope"]),
                event_at(&addr(0xbb), "vote", &["out of scope"]),
            ],
        );

        let target = addr(0xaa);
        let dispatcher = Dispatcher::new(registry);
        dispatcher
            .dispatch_block(&block, DispatchScope::Single(&target))
            .await
            .unwrap();

        assert_eq!(watched.calls.lock().unwrap().len(), 1);
        assert!(other.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_transaction_invokes_deploy_handler() {
        let registry = RegistryHandle::new();
        let handler = Arc::new(RecordingHandler::default());
        registry.register_source(Source {
            address: addr(0xcc),
            start_block: 0,
            event_bindings: vec![],
            deploy_handler: Some(handler.clone()),
            spawned_from: None,
        });

        let block = Block {
            block_number: 40,
            block_hash: "0x28".into(),
            timestamp: 0,
            transactions: vec![Transaction {
                hash: "0x2".into(),
                tx_type: TxType::Deploy,
                contract_address: Some("0xCC".into()),
            }],
            transaction_receipts: vec![Receipt {
                transaction_hash: "0x2".into(),
                events: vec![],
            }],
        };

        let dispatcher = Dispatcher::new(registry);
        let records = dispatcher
            .dispatch_block(&block, DispatchScope::All)
            .await
            .unwrap();

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        // Deploy invocations carry no event
        assert_eq!(calls[0].2, None);
        assert_eq!(records, vec![CheckpointRecord::new(40, addr(0xcc))]);
    }

    // Test critique: les reçus désordonnés restent appariés à la bonne
    // transaction
    #[tokio::test]
    async fn test_receipts_paired_by_hash_not_position() {
        let registry = RegistryHandle::new();
        let handler = Arc::new(RecordingHandler::default());
        register_source(&registry, addr(0xaa), 0, handler.clone());

        let tx = |hash: &str| Transaction {
            hash: hash.into(),
            tx_type: TxType::Invoke,
            contract_address: None,
        };
        let block = Block {
            block_number: 60,
            block_hash: "0x3c".into(),
            timestamp: 0,
            transactions: vec![tx("0x1"), tx("0x2")],
            // Receipts arrive in reverse order; the match lives on 0x2
            transaction_receipts: vec![
                Receipt {
                    transaction_hash: "0x2".into(),
                    events: vec![event_at(&addr(0xaa), "vote", &["yes"])],
                },
                Receipt {
                    transaction_hash: "0x1".into(),
                    events: vec![],
                },
            ],
        };

        let dispatcher = Dispatcher::new(registry);
        let records = dispatcher
            .dispatch_block(&block, DispatchScope::All)
            .await
            .unwrap();

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2.as_deref(), Some("yes"));
        assert_eq!(records, vec![CheckpointRecord::new(60, addr(0xaa))]);
    }

    #[tokio::test]
    async fn test_transaction_without_receipt_is_skipped() {
        let registry = RegistryHandle::new();
        let handler = Arc::new(RecordingHandler::default());
        register_source(&registry, addr(0xaa), 0, handler.clone());

        let tx = |hash: &str| Transaction {
            hash: hash.into(),
            tx_type: TxType::Invoke,
            contract_address: None,
        };
        let block = Block {
            block_number: 61,
            block_hash: "0x3d".into(),
            timestamp: 0,
            transactions: vec![tx("0x1"), tx("0x2")],
            // Only the second transaction has a receipt
            transaction_receipts: vec![Receipt {
                transaction_hash: "0x2".into(),
                events: vec![event_at(&addr(0xaa), "vote", &["late"])],
            }],
        };

        let dispatcher = Dispatcher::new(registry);
        let records = dispatcher
            .dispatch_block(&block, DispatchScope::All)
            .await
            .unwrap();

        assert_eq!(handler.calls.lock().unwrap().len(), 1);
        assert_eq!(records.len(), 1);
    }

    // Test critique: une erreur de handler est fatale pour le bloc
    #[tokio::test]
    async fn test_handler_error_aborts_block() {
        let registry = RegistryHandle::new();
        register_source(&registry, addr(0xaa), 0, Arc::new(FailingHandler));

        let block = block_with_events(50, vec![event_at(&addr(0xaa), "vote", &["boom"])]);
        let dispatcher = Dispatcher::new(registry);
        let err = dispatcher
            .dispatch_block(&block, DispatchScope::All)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IndexerError::HandlerFailed { handler, block: 50, .. } if handler == "failing"
        ));
    }
}
