//! Staleness detection and batch snapshot fallback.
//!
//! Streamed data is only trusted while the exchange is open and the
//! last tick is fresh. Otherwise a periodic multi-symbol REST snapshot
//! takes over, and failing that the original REST baseline. The
//! decision is a strict priority rule evaluated per item; the poller is
//! visibility-aware and never lets a fetch failure escape ("fallback
//! must not throw").

pub mod error;
pub mod poller;
pub mod selector;
pub mod snapshot;

pub use error::{FallbackError, FallbackResult};
pub use poller::{PollerConfig, QuoteFetcher, SnapshotEntry, SnapshotPoller};
pub use selector::{select_source, SourceDecision, DEFAULT_STALE_THRESHOLD_MS};
pub use snapshot::SnapshotClient;
