use homecast_protocol::error_codes::routing;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("agent is not reachable")]
    AgentUnreachable,

    #[error("no reply within the routing deadline")]
    Timeout,

    #[error("no local handler registered for requests")]
    NoHandler,

    #[error("failed to publish to the bus: {0}")]
    BusPublishFailed(#[from] homecast_bus::Error),

    #[error("{message}")]
    Forwarded { code: String, message: String },
}

impl Error {
    /// The code this error would be reported to a caller under (§7).
    pub fn code(&self) -> &str {
        match self {
            Self::AgentUnreachable => routing::AGENT_UNREACHABLE,
            Self::Timeout => routing::TIMEOUT,
            Self::NoHandler => routing::NO_HANDLER,
            Self::BusPublishFailed(_) => routing::BUS_PUBLISH_FAILED,
            Self::Forwarded { code, .. } => code,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
