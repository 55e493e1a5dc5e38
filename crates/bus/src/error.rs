#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bus is not connected (local-only mode)")]
    NotConnected,

    #[error("failed to publish to topic {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("failed to subscribe to topic {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("publish to topic {topic} did not complete within the bus publish deadline")]
    Timeout { topic: String },

    #[error("malformed bus frame: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
