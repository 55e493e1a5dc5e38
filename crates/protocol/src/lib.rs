//! Wire protocol definitions shared by every HomeCast relay process.
//!
//! Three independent JSON-over-WebSocket protocols are defined here:
//!
//! - [`agent`] — the duplex protocol between the cloud and a headless agent
//!   running inside a home (§6.1 of the spec).
//! - [`bus`] — the frames exchanged between relay processes over the
//!   shared bus, keyed by slot topic (§6.2).
//! - [`listener`] — the protocol a web UI listener socket speaks (§6.3).

pub mod agent;
pub mod bus;
pub mod error_codes;
pub mod listener;

// ── Shared constants ─────────────────────────────────────────────────────────

/// Agent heartbeat cadence (§6.1, §4.3).
pub const AGENT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Agent session considered stale after this many seconds without a heartbeat (§3).
pub const AGENT_STALE_SECONDS: i64 = 120;
/// Listener session considered stale after this many seconds without a heartbeat (§3, §4.5).
pub const LISTENER_STALE_SECONDS: i64 = 120;
/// Slot lease considered stale after this many seconds without a heartbeat (§3, §4.1).
pub const SLOT_STALE_SECONDS: i64 = 300;
/// Slot heartbeat cadence (§4.1).
pub const SLOT_HEARTBEAT_INTERVAL_SECS: u64 = 60;
/// Session-registry garbage collection cadence (§4.5).
pub const SESSION_GC_INTERVAL_SECS: u64 = 60;
/// Default end-to-end deadline for `Route` (§5).
pub const DEFAULT_ROUTE_DEADLINE_MS: u64 = 30_000;
/// Bus publish deadline (§5).
pub const BUS_PUBLISH_DEADLINE_MS: u64 = 5_000;
/// Bus subscription ack deadline (§4.2).
pub const BUS_ACK_DEADLINE_SECS: u64 = 30;
/// Bus retained-message window (§4.2).
pub const BUS_RETENTION_SECS: u64 = 600;
