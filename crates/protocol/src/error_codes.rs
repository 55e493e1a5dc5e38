//! Error code taxonomies used across the relay (§6.1, §7).

/// Codes an agent may put in `response.error.code` (§6.1). The relay forwards
/// these verbatim; it never synthesizes them itself, with the sole exception
/// of [`INVALID_REQUEST`] for malformed frames it rejects before an agent
/// ever sees them.
pub mod agent {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNKNOWN_ACTION: &str = "UNKNOWN_ACTION";
    pub const HOME_NOT_FOUND: &str = "HOME_NOT_FOUND";
    pub const ROOM_NOT_FOUND: &str = "ROOM_NOT_FOUND";
    pub const ACCESSORY_NOT_FOUND: &str = "ACCESSORY_NOT_FOUND";
    pub const SCENE_NOT_FOUND: &str = "SCENE_NOT_FOUND";
    pub const CHARACTERISTIC_NOT_FOUND: &str = "CHARACTERISTIC_NOT_FOUND";
    pub const CHARACTERISTIC_NOT_WRITABLE: &str = "CHARACTERISTIC_NOT_WRITABLE";
    pub const ACCESSORY_UNREACHABLE: &str = "ACCESSORY_UNREACHABLE";
    pub const INVALID_VALUE: &str = "INVALID_VALUE";
    pub const HOMEKIT_ERROR: &str = "HOMEKIT_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Codes the relay itself produces for routing failures (§7 tier 2).
pub mod routing {
    pub const AGENT_UNREACHABLE: &str = "AGENT_UNREACHABLE";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const NO_HANDLER: &str = "NO_HANDLER";
    pub const BUS_PUBLISH_FAILED: &str = "BUS_PUBLISH_FAILED";
    pub const NOT_LOCAL: &str = "NOT_LOCAL";
}

/// WebSocket close codes used on the agent duplex socket (§6.1).
pub mod close_codes {
    /// Missing token or agent id in the connect frame.
    pub const MISSING_CREDENTIALS: u16 = 4000;
    /// Token failed verification.
    pub const INVALID_TOKEN: u16 = 4001;
    /// A newer connect for the same `agentID` replaced this socket.
    pub const REPLACED: u16 = 4002;
}
