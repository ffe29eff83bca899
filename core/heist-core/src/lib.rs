//! # heist-core
//!
//! Coordination engine for community heists: crews assemble during a join
//! window, the heist resolves against a target's vault, and every member
//! walks away free, jailed or dead.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Each planned heist gets a worker
//!   thread; shared state sits behind `Mutex`/`RwLock`.
//! - **One session per community**: the [`SessionRegistry`] admits at most one
//!   live session per community, atomically.
//! - **Graceful degradation**: storage and notification failures are logged and
//!   the in-memory state stays authoritative.
//! - **Ports at the edges**: persistence, the ledger, display names and
//!   notifications are traits, so the daemon and tests wire their own.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use heist_core::{HeistService, ServiceParts, EngineSettings};
//!
//! let service = HeistService::new(EngineSettings::default(), parts);
//! service.start_event("guild-1", "boss")?;
//! service.join_event("guild-1", "rook")?;
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod book;
pub mod catalog;
pub mod config;
pub mod error;
pub mod member;
pub mod outcome;
pub mod ports;
pub mod registry;
pub mod render;
pub mod service;
pub mod session;
pub mod storage;
pub mod target;
pub mod theme;
pub mod tracker;
pub mod vault;

pub use catalog::TargetCatalog;
pub use config::{Config, ConfigUpdate, EngineSettings};
pub use error::{HeistError, LedgerError, Result, StoreError};
pub use member::{CriminalTier, MemberRecord, MemberStats, MemberStatus};
pub use outcome::{HeistResult, MemberOutcome, Outcome};
pub use ports::{Ledger, MemberDirectory, NotificationSink};
pub use registry::SessionRegistry;
pub use service::{
    BailoutOutcome, ExecutionReport, HeistService, JoinOutcome, ServiceParts, StartOutcome,
};
pub use session::{Phase, Session, SessionHandle, SessionSnapshot};
pub use storage::{MemoryStore, Store, StoreResult, TargetQuery, TargetSort};
pub use target::Target;
pub use theme::{BadMessage, FailureResult, GoodMessage, Theme};
pub use vault::VaultRecovery;

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
