//! Domain services: the dispatcher, the retrying fetcher, and the block
//! loop that drives them.

pub mod dispatcher;
pub mod indexer;
pub mod retry;

pub use dispatcher::{DispatchScope, Dispatcher};
pub use indexer::{IndexerConfig, IndexerService};
pub use retry::{fetch_with_retry, Sleeper, TokioSleeper, DEFAULT_RETRY_DELAY};
