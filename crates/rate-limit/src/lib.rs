//! Per-project hourly rate limiting.
//!
//! The crate is split along the lifecycle of a project's call counter:
//!
//! - [`CounterStore`] -- durable per-project counters with atomic
//!   create/increment/reset. Two backends ship here: [`MemoryCounterStore`]
//!   (a [`DashMap`](dashmap::DashMap) guarded per key) and
//!   [`SqliteCounterStore`] (rusqlite, one conditional `UPDATE` per check).
//!
//! - [`RateLimiter`] -- the single admission decision: premium projects pass
//!   unmetered, everyone else is counted until the configured calls-per-hour
//!   threshold and then rejected.
//!
//! - [`ResetJob`] / [`ResetScheduler`] -- zero every counter at the top of
//!   each UTC hour, which is what opens a new accounting window.

pub mod limiter;
pub mod memory;
pub mod scheduler;
pub mod sqlite;
pub mod store;
pub mod window;

pub use limiter::{AdmitError, Decision, ProjectDescriptor, RateLimiter};
pub use memory::MemoryCounterStore;
pub use scheduler::{ResetJob, ResetScheduler, Schedule, ScheduledTask};
pub use sqlite::SqliteCounterStore;
pub use store::{CounterStore, Increment, RateCounter, StoreError};
