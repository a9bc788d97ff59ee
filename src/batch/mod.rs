//! Batch dispatcher.
//!
//! Admits a caller's batch against the rolling quota, then runs every item on
//! a worker pool that lives only for the duration of the call:
//!
//! ```text
//! dispatch(caller, [item0, item1, ...])
//!     │
//!     ├─ usage + N > limit ──────────────► QuotaExceeded (nothing runs)
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────┐
//! │  Semaphore(min(parallelism, N))             │
//! │   item ─► spawn_blocking(process + encode)  │
//! │        ─► AssetStore::persist_asset         │
//! │        ─► AccountLedger::log_processing_event│
//! └─────────────────────────────────────────────┘
//!     │
//!     ▼
//! [BatchResult { index: 0, .. }, BatchResult { index: 1, .. }, ...]
//! ```

mod dispatcher;
mod quota;

pub use dispatcher::{
    BatchDispatcher, BatchItem, BatchOutcome, BatchResult, DispatcherConfig, ItemSuccess,
};
pub use quota::{
    AccountTier, CallerContext, QuotaPolicy, DEFAULT_DAILY_LIMIT, DEFAULT_QUOTA_WINDOW,
};
