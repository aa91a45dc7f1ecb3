//! Plugin host runtime.
//!
//! A host process discovers its bots from the control plane, supervises one
//! worker per bot, and gives workers the shared machinery they all need:
//! task groups wired to cancellation, per-user locks, an atomic JSON state
//! store, the bounded seen-set, the generic fetcher engine, and the proxy
//! pool.

pub mod fetch;
pub mod group;
pub mod locks;
pub mod proxy;
pub mod seen;
pub mod service;
pub mod store;
pub mod supervisor;

pub use group::{run_interval, TaskGroup};
pub use locks::UserLockMap;
pub use seen::SeenSet;
pub use service::{run_service, run_service_with_signals, ServiceOptions};
pub use store::StateStore;
pub use supervisor::{BotManager, Runner, RunnerFactory};
