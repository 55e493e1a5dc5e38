use std::time::Duration;

use async_trait::async_trait;
use homecast_protocol::bus::BusFrame;
use homecast_protocol::{BUS_ACK_DEADLINE_SECS, BUS_RETENTION_SECS};
use redis::aio::ConnectionManager;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::RedisResult;
use tokio::sync::mpsc;

use crate::{BusAdapter, BusDelivery, BusSubscription, Error, Result};

/// Every subscription on a topic shares this consumer group name — one
/// relay process subscribes to its own slot topic exactly once, so there's
/// no need to distinguish consumer groups within a topic, only consumers
/// within the group (one per live subscription, named by a random id).
const GROUP_NAME: &str = "relay";
const READ_COUNT: usize = 16;
const BLOCK_MS: usize = 5_000;

/// Redis Stream backed bus adapter (§4.2): each topic is a stream with one
/// consumer group, giving at-least-once delivery with an explicit
/// ack/pending-entries mechanism for free — `XADD`/`XREADGROUP`/`XACK` in
/// the common case, `XAUTOCLAIM` to reclaim anything left unacked past
/// `BUS_ACK_DEADLINE_SECS`, and `XTRIM` on every publish to cap retained
/// history at `BUS_RETENTION_SECS`.
pub struct RedisBusAdapter {
    conn: ConnectionManager,
}

impl RedisBusAdapter {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|source| Error::Publish {
            topic: String::new(),
            source,
        })?;
        let conn = client.get_connection_manager().await.map_err(|source| Error::Publish {
            topic: String::new(),
            source,
        })?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl BusAdapter for RedisBusAdapter {
    async fn publish(&self, topic: &str, frame: &BusFrame) -> Result<()> {
        let payload = serde_json::to_string(frame)?;
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|source| Error::Publish {
                topic: topic.to_string(),
                source,
            })?;

        // Best-effort retention trim (§4.2): drop entries older than the
        // retention window. A failure here doesn't fail the publish itself —
        // an untrimmed stream just keeps more history than it needs to.
        let floor = retention_floor_id();
        let trimmed: RedisResult<i64> = redis::cmd("XTRIM").arg(topic).arg("MINID").arg(&floor).query_async(&mut conn).await;
        if let Err(err) = trimmed {
            tracing::debug!(%topic, %err, "bus retention trim failed");
        }
        Ok(())
    }

    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(GROUP_NAME)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            // A consumer group that already exists is success, not an error
            // (§4.2 "treat already exists as success").
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(source) => Err(Error::Subscribe {
                topic: topic.to_string(),
                source,
            }),
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
        self.ensure_topic(topic).await?;

        let (tx, rx) = mpsc::channel(256);
        let topic_owned = topic.to_string();
        let consumer = uuid::Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        tokio::spawn(async move {
            let mut last_reclaim = tokio::time::Instant::now();
            loop {
                if last_reclaim.elapsed() >= Duration::from_secs(BUS_ACK_DEADLINE_SECS) {
                    if !reclaim_stale(&mut conn, &topic_owned, &consumer, &tx).await {
                        return;
                    }
                    last_reclaim = tokio::time::Instant::now();
                }

                let reply: RedisResult<StreamReadReply> = redis::cmd("XREADGROUP")
                    .arg("GROUP")
                    .arg(GROUP_NAME)
                    .arg(&consumer)
                    .arg("COUNT")
                    .arg(READ_COUNT)
                    .arg("BLOCK")
                    .arg(BLOCK_MS)
                    .arg("STREAMS")
                    .arg(&topic_owned)
                    .arg(">")
                    .query_async(&mut conn)
                    .await;

                match reply {
                    Ok(reply) => {
                        for key in reply.keys {
                            for id in key.ids {
                                if !deliver_entry(id, &conn, &topic_owned, &tx).await {
                                    return;
                                }
                            }
                        }
                    },
                    Err(err) => {
                        tracing::error!(topic = %topic_owned, %err, "bus read failed, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    },
                }
            }
        });

        Ok(BusSubscription::new(rx))
    }

    fn enabled(&self) -> bool {
        true
    }
}

/// Decode one stream entry and forward it as a [`BusDelivery`], wiring its
/// ack sink to `XACK` the entry id. Returns `false` if the receiving end
/// hung up, so the caller should stop reading. A frame that fails to decode
/// (§4.2 "nack on decode error") is left unacked rather than forwarded —
/// it'll be reclaimed and retried once the ack deadline passes.
async fn deliver_entry(id: StreamId, conn: &ConnectionManager, topic: &str, tx: &mpsc::Sender<BusDelivery>) -> bool {
    let Some(payload) = id
        .map
        .get("payload")
        .and_then(|value| redis::from_redis_value::<String>(value).ok())
    else {
        tracing::warn!(%topic, entry_id = %id.id, "bus entry missing payload field, leaving unacked");
        return true;
    };

    let frame: BusFrame = match serde_json::from_str(&payload) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(%topic, entry_id = %id.id, %err, "undecodable bus frame, leaving unacked");
            return true;
        },
    };

    let ack_conn = conn.clone();
    let ack_topic = topic.to_string();
    let entry_id = id.id.clone();
    let delivery = BusDelivery::new(frame, move |acked| {
        if !acked {
            return;
        }
        let mut ack_conn = ack_conn;
        tokio::spawn(async move {
            let result: RedisResult<i64> = redis::cmd("XACK").arg(&ack_topic).arg(GROUP_NAME).arg(&entry_id).query_async(&mut ack_conn).await;
            if let Err(err) = result {
                tracing::warn!(topic = %ack_topic, entry_id = %entry_id, %err, "failed to ack bus entry");
            }
        });
    });

    tx.send(delivery).await.is_ok()
}

/// Reclaim entries idle in the pending-entries list longer than the ack
/// deadline and redeliver them to this consumer (§4.2 ack deadline).
/// Returns `false` if the receiving end hung up.
async fn reclaim_stale(conn: &mut ConnectionManager, topic: &str, consumer: &str, tx: &mpsc::Sender<BusDelivery>) -> bool {
    let min_idle_ms = BUS_ACK_DEADLINE_SECS * 1000;
    let reply: RedisResult<StreamAutoClaimReply> = redis::cmd("XAUTOCLAIM")
        .arg(topic)
        .arg(GROUP_NAME)
        .arg(consumer)
        .arg(min_idle_ms)
        .arg("0-0")
        .arg("COUNT")
        .arg(50)
        .query_async(conn)
        .await;

    match reply {
        Ok(reply) => {
            for id in reply.claimed {
                if !deliver_entry(id, conn, topic, tx).await {
                    return false;
                }
            }
            true
        },
        Err(err) => {
            tracing::debug!(%topic, %err, "stale bus entry reclaim sweep failed");
            true
        },
    }
}

fn retention_floor_id() -> String {
    let floor_ms = (chrono::Utc::now() - chrono::Duration::seconds(BUS_RETENTION_SECS as i64))
        .timestamp_millis()
        .max(0);
    format!("{floor_ms}-0")
}
