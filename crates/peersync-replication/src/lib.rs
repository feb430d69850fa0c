//! Peersync Replication - the serverless replication core
//!
//! Synchronizes a client-side document collection through a shared drive
//! folder. The folder is the canonical merge surface; the only coordination
//! primitive between peers is a file-based mutex.
//!
//! ## Data Flow
//!
//! ```text
//! host push ──→ transaction ──→ WAL stage ──→ WAL apply ──→ docs/*.json
//! host pull ──→ transaction ──→ checkpointed listing ──→ documents
//! push commit ──→ RESYNC ping ──→ remote peers re-pull
//! ```
//!
//! Every pull and push acquires the [`transaction::Transaction`], runs its
//! body, drains the [WAL](upstream) and releases. The
//! [orchestrator](orchestrator::DriveReplication) wires the handlers
//! together and owns the signaling lifecycle in live mode.

pub mod downstream;
pub mod orchestrator;
pub mod transaction;
pub mod upstream;

pub use downstream::{DownstreamHandler, PullResult};
pub use orchestrator::DriveReplication;
pub use transaction::{Transaction, TransactionHandle, TryLockOutcome};
pub use upstream::UpstreamHandler;
