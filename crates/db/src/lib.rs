//! Shared relational store for state more than one process needs to see:
//! topic slot leases, sessions, home ownership, and per-user auth policy
//! (§4.2 Data model).

pub mod home;
pub mod pool;
pub mod settings;

pub use home::{Home, HomeStore, PgHomeStore};
pub use pool::{connect, reconcile_schema};
pub use settings::{PgSettingsStore, ScopeAuthPolicy, SettingsStore};
