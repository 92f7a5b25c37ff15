//! Core indexer service - the block loop.
//!
//! Drives the pipeline one block at a time: fetch (with retry), dispatch
//! handlers, record checkpoints, advance the cursor, then backfill any
//! sources templates instantiated along the way. Strictly sequential:
//! block `n + 1` is never dispatched before block `n` is committed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::error::IndexerResult;
use crate::metrics::{record_block_indexed, record_checkpoints, ProcessingTimer};
use crate::models::{Block, METADATA_LAST_INDEXED_BLOCK};
use crate::ports::{ChainClient, CheckpointStore, DEFAULT_CHECKPOINT_FETCH_LIMIT};
use crate::registry::{RegistryHandle, Source};
use crate::services::dispatcher::{DispatchScope, Dispatcher};
use crate::services::retry::{fetch_with_retry, Sleeper, DEFAULT_RETRY_DELAY};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the indexer service.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Delay between fetch attempts for a block that is missing or whose
    /// fetch failed.
    pub retry_delay: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

// =============================================================================
// IndexerService
// =============================================================================

/// Main indexer service.
///
/// # Flow
///
/// 1. Compute the starting cursor: `max(last_indexed_block + 1,
///    min(source start blocks))`
/// 2. Fetch the cursor block, retrying indefinitely on chain errors
/// 3. Dispatch handlers, collect checkpoint records
/// 4. Persist checkpoints, then advance `last_indexed_block`
/// 5. Backfill sources instantiated during the block, replaying only
///    their checkpointed history
/// 6. Next block
///
/// Storage errors are fatal and propagate; only chain fetches retry.
pub struct IndexerService<C: ChainClient, K: CheckpointStore> {
    config: IndexerConfig,
    chain: Arc<C>,
    checkpoints: Arc<K>,
    registry: RegistryHandle,
    dispatcher: Dispatcher,
    sleeper: Arc<dyn Sleeper>,
}

impl<C: ChainClient, K: CheckpointStore> IndexerService<C, K> {
    pub fn new(
        config: IndexerConfig,
        chain: Arc<C>,
        checkpoints: Arc<K>,
        registry: RegistryHandle,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry.clone());
        Self {
            config,
            chain,
            checkpoints,
            registry,
            dispatcher,
            sleeper,
        }
    }

    /// Start the indexer.
    ///
    /// Runs until the shutdown signal flips; returns `Ok(())` on graceful
    /// shutdown.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        info!("⛓️  Starting indexer");

        let mut cursor = self.starting_cursor().await?;
        info!(block = cursor, "▶️  Resuming from block");

        loop {
            if *shutdown_rx.borrow() {
                info!("🛑 Shutdown requested, stopping block loop");
                return Ok(());
            }

            let block = tokio::select! {
                block = fetch_with_retry(
                    self.chain.as_ref(),
                    self.sleeper.as_ref(),
                    cursor,
                    self.config.retry_delay,
                ) => block,
                changed = shutdown_rx.changed() => {
                    // A closed channel means the sender side is gone;
                    // treat it like an explicit stop.
                    if changed.is_err() {
                        info!("🛑 Shutdown channel closed, stopping block loop");
                        return Ok(());
                    }
                    continue;
                }
            };

            self.process_block(&block).await?;
            info!(block = cursor, "⛓️  Block indexed");
            cursor += 1;
        }
    }

    /// Where to start: one past the committed cursor, but never before
    /// the earliest source start.
    async fn starting_cursor(&self) -> IndexerResult<u64> {
        let last = self
            .checkpoints
            .get_metadata_u64(METADATA_LAST_INDEXED_BLOCK)
            .await?;
        let next = last.map(|n| n + 1).unwrap_or(0);
        let min_start = self.registry.min_start_block().unwrap_or(0);
        Ok(next.max(min_start))
    }

    /// Process a single block through the dispatcher and commit it.
    #[instrument(skip_all, fields(block = block.block_number))]
    async fn process_block(&self, block: &Block) -> IndexerResult<()> {
        let _timer = ProcessingTimer::new();

        let records = self
            .dispatcher
            .dispatch_block(block, DispatchScope::All)
            .await?;
        self.checkpoints.insert_checkpoints(&records).await?;
        record_checkpoints(records.len() as u64);

        // The cursor only moves once every handler completed; a crash
        // before this point replays the whole block on restart.
        self.checkpoints
            .set_metadata(
                METADATA_LAST_INDEXED_BLOCK,
                &block.block_number.to_string(),
            )
            .await?;
        record_block_indexed();

        // Sources spawned by handlers during this block: replay their
        // checkpointed history before the live loop continues.
        loop {
            let pending = self.registry.drain_pending_backfill();
            if pending.is_empty() {
                break;
            }
            for source in pending {
                self.backfill_source(&source, block.block_number).await?;
            }
        }

        Ok(())
    }

    /// Replays the checkpointed blocks for one freshly instantiated
    /// source, up to (excluding) the live cursor.
    ///
    /// Only blocks another source already checkpointed are replayed; the
    /// rest of the range never had relevant activity recorded and the
    /// live loop covers everything from the cursor on.
    #[instrument(skip_all, fields(address = %source.address, start = source.start_block))]
    async fn backfill_source(&self, source: &Source, live_cursor: u64) -> IndexerResult<()> {
        if source.start_block >= live_cursor {
            debug!("Source starts at or ahead of cursor, no backfill needed");
            return Ok(());
        }

        info!(
            "⏪ Backfilling contract {} from block {}",
            source.address, source.start_block
        );

        let contracts = [source.address.clone()];
        let mut from = source.start_block;
        let mut replayed = 0u64;

        loop {
            let blocks = self
                .checkpoints
                .next_checkpoint_blocks(from, &contracts, DEFAULT_CHECKPOINT_FETCH_LIMIT)
                .await?;
            if blocks.is_empty() {
                break;
            }

            for number in &blocks {
                if *number >= live_cursor {
                    info!(replayed, "⏪ Backfill caught up to live cursor");
                    return Ok(());
                }
                let block = fetch_with_retry(
                    self.chain.as_ref(),
                    self.sleeper.as_ref(),
                    *number,
                    self.config.retry_delay,
                )
                .await;
                let records = self
                    .dispatcher
                    .dispatch_block(&block, DispatchScope::Single(&source.address))
                    .await?;
                self.checkpoints.insert_checkpoints(&records).await?;
                replayed += 1;
            }

            // Last page reached
            if (blocks.len() as u64) < DEFAULT_CHECKPOINT_FETCH_LIMIT {
                break;
            }
            from = blocks[blocks.len() - 1] + 1;
        }

        info!(replayed, "⏪ Backfill complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{ChainError, ChainResult, IndexerResult, StorageResult};
    use crate::models::{
        Address, CheckpointRecord, Event, Receipt, Selector, Transaction, TxType,
    };
    use crate::ports::handler::{EventHandler, HandlerCtx};
    use crate::registry::{EventBinding, Template};

    // =========================================================================
    // Fakes
    // =========================================================================

    /// In-memory chain serving prebuilt blocks.
    struct FakeChain {
        blocks: BTreeMap<u64, Block>,
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn get_block(&self, number: u64) -> ChainResult<Block> {
            self.blocks
                .get(&number)
                .cloned()
                .ok_or(ChainError::NotFound(number))
        }

        async fn latest_block(&self) -> ChainResult<u64> {
            Ok(self.blocks.keys().max().copied().unwrap_or(0))
        }
    }

    /// In-memory checkpoint store.
    #[derive(Default)]
    struct FakeCheckpoints {
        metadata: Mutex<BTreeMap<String, String>>,
        records: Mutex<BTreeSet<CheckpointRecord>>,
        /// Every value ever written to the cursor, in order.
        cursor_writes: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl CheckpointStore for FakeCheckpoints {
        async fn get_metadata(&self, id: &str) -> StorageResult<Option<String>> {
            Ok(self.metadata.lock().unwrap().get(id).cloned())
        }

        async fn set_metadata(&self, id: &str, value: &str) -> StorageResult<()> {
            if id == METADATA_LAST_INDEXED_BLOCK {
                self.cursor_writes
                    .lock()
                    .unwrap()
                    .push(value.parse().unwrap());
            }
            self.metadata
                .lock()
                .unwrap()
                .insert(id.to_string(), value.to_string());
            Ok(())
        }

        async fn insert_checkpoints(&self, records: &[CheckpointRecord]) -> StorageResult<()> {
            self.records.lock().unwrap().extend(records.iter().cloned());
            Ok(())
        }

        async fn next_checkpoint_blocks(
            &self,
            from_block: u64,
            contracts: &[Address],
            limit: u64,
        ) -> StorageResult<Vec<u64>> {
            let records = self.records.lock().unwrap();
            let mut blocks: Vec<u64> = records
                .iter()
                .filter(|r| r.block_number >= from_block && contracts.contains(&r.contract_address))
                .map(|r| r.block_number)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            blocks.truncate(limit as usize);
            Ok(blocks)
        }
    }

    struct InstantSleeper;

    #[async_trait]
    impl Sleeper for InstantSleeper {
        async fn sleep(&self, _duration: Duration) {
            // Yield so the test harness can observe progress between retries
            tokio::task::yield_now().await;
        }
    }

    /// Records `(block, source)` for every invocation.
    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn id(&self) -> &'static str {
            "recording"
        }

        async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((ctx.block.block_number, ctx.source.address.to_string()));
            Ok(())
        }
    }

    /// Instantiates a template once, on its first invocation.
    struct SpawningHandler {
        template: &'static str,
        spawn_address: Address,
        spawn_start: u64,
        spawned: Mutex<bool>,
    }

    #[async_trait]
    impl EventHandler for SpawningHandler {
        fn id(&self) -> &'static str {
            "spawning"
        }

        async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()> {
            let mut spawned = self.spawned.lock().unwrap();
            if !*spawned {
                ctx.registry.instantiate(
                    self.template,
                    self.spawn_address.clone(),
                    self.spawn_start,
                )?;
                *spawned = true;
            }
            Ok(())
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{n:x}")).unwrap()
    }

    fn block_with_event(number: u64, emitter: &Address, event_name: &str) -> Block {
        Block {
            block_number: number,
            block_hash: format!("0x{number:x}"),
            timestamp: 1_700_000_000 + number,
            transactions: vec![Transaction {
                hash: format!("0x{number:x}1"),
                tx_type: TxType::Invoke,
                contract_address: None,
            }],
            transaction_receipts: vec![Receipt {
                transaction_hash: format!("0x{number:x}1"),
                events: vec![Event {
                    from_address: emitter.to_string(),
                    keys: vec![Selector::from_event_name(event_name).to_string()],
                    data: vec![],
                }],
            }],
        }
    }

    fn empty_block(number: u64) -> Block {
        Block {
            block_number: number,
            block_hash: format!("0x{number:x}"),
            timestamp: 1_700_000_000 + number,
            transactions: vec![],
            transaction_receipts: vec![],
        }
    }

    fn service(
        chain: FakeChain,
        checkpoints: Arc<FakeCheckpoints>,
        registry: RegistryHandle,
    ) -> IndexerService<FakeChain, FakeCheckpoints> {
        IndexerService::new(
            IndexerConfig::default(),
            Arc::new(chain),
            checkpoints,
            registry,
            Arc::new(InstantSleeper),
        )
    }

    async fn run_until_cursor(
        service: &IndexerService<FakeChain, FakeCheckpoints>,
        checkpoints: &FakeCheckpoints,
        target: u64,
    ) {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let run = service.run(shutdown_rx);
        tokio::pin!(run);
        loop {
            tokio::select! {
                result = &mut run => {
                    result.unwrap();
                    break;
                }
                _ = tokio::task::yield_now() => {
                    let done = checkpoints
                        .cursor_writes
                        .lock()
                        .unwrap()
                        .last()
                        .is_some_and(|n| *n >= target);
                    if done {
                        shutdown_tx.send(true).unwrap();
                    }
                }
            }
        }
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[tokio::test]
    async fn test_starting_cursor_resumes_after_last_indexed() {
        let checkpoints = Arc::new(FakeCheckpoints::default());
        checkpoints
            .set_metadata(METADATA_LAST_INDEXED_BLOCK, "41")
            .await
            .unwrap();

        let registry = RegistryHandle::new();
        registry.register_source(Source {
            address: addr(1),
            start_block: 10,
            event_bindings: vec![],
            deploy_handler: None,
            spawned_from: None,
        });

        let svc = service(
            FakeChain {
                blocks: BTreeMap::new(),
            },
            checkpoints,
            registry,
        );
        assert_eq!(svc.starting_cursor().await.unwrap(), 42);
    }

    // Test critique: un démarrage à froid part du plus petit start_block,
    // pas de zéro
    #[tokio::test]
    async fn test_starting_cursor_cold_start_uses_min_source_start() {
        let checkpoints = Arc::new(FakeCheckpoints::default());
        let registry = RegistryHandle::new();
        for (n, start) in [(1u8, 500u64), (2, 300)] {
            registry.register_source(Source {
                address: addr(n),
                start_block: start,
                event_bindings: vec![],
                deploy_handler: None,
                spawned_from: None,
            });
        }

        let svc = service(
            FakeChain {
                blocks: BTreeMap::new(),
            },
            checkpoints,
            registry,
        );
        assert_eq!(svc.starting_cursor().await.unwrap(), 300);
    }

    // Test critique: le curseur n'avance qu'après le commit du bloc, et
    // de façon strictement monotone
    #[tokio::test]
    async fn test_cursor_advances_monotonically() {
        let source_addr = addr(0xaa);
        let registry = RegistryHandle::new();
        let handler = Arc::new(RecordingHandler::default());
        registry.register_source(Source {
            address: source_addr.clone(),
            start_block: 0,
            event_bindings: vec![EventBinding::new("vote", handler.clone())],
            deploy_handler: None,
            spawned_from: None,
        });

        let blocks: BTreeMap<u64, Block> = (0..=3)
            .map(|n| (n, block_with_event(n, &source_addr, "vote")))
            .collect();
        let checkpoints = Arc::new(FakeCheckpoints::default());
        let svc = service(FakeChain { blocks }, checkpoints.clone(), registry);

        run_until_cursor(&svc, &checkpoints, 3).await;

        let writes = checkpoints.cursor_writes.lock().unwrap().clone();
        assert!(writes.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(writes.first(), Some(&0));
        assert!(*writes.last().unwrap() >= 3);

        // Every block invoked the handler and left a checkpoint
        let records = checkpoints.records.lock().unwrap();
        for n in 0..=3 {
            assert!(records.contains(&CheckpointRecord::new(n, source_addr.clone())));
        }
    }

    // Test critique: un canal d'arrêt fermé stoppe la boucle au lieu de
    // la faire tourner à vide
    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_loop() {
        let checkpoints = Arc::new(FakeCheckpoints::default());
        let registry = RegistryHandle::new();
        // Empty chain: the fetch never succeeds and retries forever, so
        // the loop can only exit through the shutdown arm.
        let svc = service(
            FakeChain {
                blocks: BTreeMap::new(),
            },
            checkpoints,
            registry,
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        drop(shutdown_tx);
        svc.run(shutdown_rx).await.unwrap();
    }

    // Test critique: le backfill ne rejoue que les blocs checkpointés du
    // contrat instancié, jamais le reste de la plage
    #[tokio::test]
    async fn test_backfill_replays_only_checkpointed_blocks() {
        let factory_addr = addr(0xfa);
        let spawned_addr = addr(0x5b);

        // History: the spawned contract was active at blocks 10 and 25,
        // recorded by an earlier run. The live cursor is at 30.
        let checkpoints = Arc::new(FakeCheckpoints::default());
        checkpoints
            .insert_checkpoints(&[
                CheckpointRecord::new(10, spawned_addr.clone()),
                CheckpointRecord::new(25, spawned_addr.clone()),
                CheckpointRecord::new(12, addr(0x99)),
            ])
            .await
            .unwrap();
        checkpoints
            .set_metadata(METADATA_LAST_INDEXED_BLOCK, "29")
            .await
            .unwrap();

        let spawned_handler = Arc::new(RecordingHandler::default());
        let registry = RegistryHandle::new();
        registry.register_template(Template {
            name: "Space".into(),
            event_bindings: vec![EventBinding::new("vote", spawned_handler.clone())],
            deploy_handler: None,
        });
        registry.register_source(Source {
            address: factory_addr.clone(),
            start_block: 0,
            event_bindings: vec![EventBinding::new(
                "deployed",
                Arc::new(SpawningHandler {
                    template: "Space",
                    spawn_address: spawned_addr.clone(),
                    spawn_start: 5,
                    spawned: Mutex::new(false),
                }),
            )],
            deploy_handler: None,
            spawned_from: None,
        });

        let mut blocks: BTreeMap<u64, Block> = (30..=31).map(|n| (n, empty_block(n))).collect();
        // Block 30 carries the factory event that spawns the template
        blocks.insert(30, block_with_event(30, &factory_addr, "deployed"));
        // The spawned contract's historical activity
        blocks.insert(10, block_with_event(10, &spawned_addr, "vote"));
        blocks.insert(25, block_with_event(25, &spawned_addr, "vote"));

        let svc = service(FakeChain { blocks }, checkpoints.clone(), registry);
        run_until_cursor(&svc, &checkpoints, 31).await;

        // Exactly blocks 10 and 25 were replayed for the spawned source
        let calls = spawned_handler.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                (10, spawned_addr.to_string()),
                (25, spawned_addr.to_string())
            ]
        );

        // Backfill never moved the live cursor backwards
        let writes = checkpoints.cursor_writes.lock().unwrap();
        assert!(writes.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn test_blocks_without_matches_leave_no_checkpoints() {
        let registry = RegistryHandle::new();
        registry.register_source(Source {
            address: addr(0xaa),
            start_block: 0,
            event_bindings: vec![EventBinding::new(
                "vote",
                Arc::new(RecordingHandler::default()),
            )],
            deploy_handler: None,
            spawned_from: None,
        });

        let blocks: BTreeMap<u64, Block> = (0..=2).map(|n| (n, empty_block(n))).collect();
        let checkpoints = Arc::new(FakeCheckpoints::default());
        let svc = service(FakeChain { blocks }, checkpoints.clone(), registry);

        run_until_cursor(&svc, &checkpoints, 2).await;

        assert!(checkpoints.records.lock().unwrap().is_empty());
        // The cursor still advanced through the empty blocks
        assert!(*checkpoints.cursor_writes.lock().unwrap().last().unwrap() >= 2);
    }
}
