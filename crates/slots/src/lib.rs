//! Slot Registry (C1, §4.1): a fixed, database-backed pool of named topic
//! leases that let the bus use a small number of topics instead of one per
//! process. Each process claims a slot on startup, heartbeats it, and
//! releases it on shutdown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homecast_protocol::SLOT_STALE_SECONDS;
use rand::Rng;
use sqlx::PgPool;

/// A claimed or vacant row in the slot pool.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Slot {
    pub slot_name: String,
    pub instance_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SlotRegistry: Send + Sync {
    /// Claim a slot for `instance_id`: reclaim an existing row for this
    /// instance, else claim a vacant or stale row, else create a new one.
    async fn claim(&self, instance_id: &str) -> anyhow::Result<Slot>;

    async fn heartbeat(&self, instance_id: &str) -> anyhow::Result<bool>;

    async fn release(&self, instance_id: &str) -> anyhow::Result<bool>;

    async fn slot_for_instance(&self, instance_id: &str) -> anyhow::Result<Option<Slot>>;

    /// Every non-stale claimed slot, for fan-out notifications that must
    /// reach every live process rather than one specific target (§4.6
    /// listener-transition broadcast, which has no single target slot).
    async fn active_slots(&self) -> anyhow::Result<Vec<Slot>>;
}

pub struct PgSlotRegistry {
    pool: PgPool,
}

impl PgSlotRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn generate_slot_name() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[async_trait]
impl SlotRegistry for PgSlotRegistry {
    async fn claim(&self, instance_id: &str) -> anyhow::Result<Slot> {
        // 1. Reclaim a slot this instance already holds (restart scenario).
        if let Some(existing) = sqlx::query_as::<_, Slot>(
            "UPDATE topic_slots SET claimed_at = now(), last_heartbeat = now()
             WHERE instance_id = $1
             RETURNING slot_name, instance_id, claimed_at, last_heartbeat",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?
        {
            tracing::info!(slot = %existing.slot_name, "reclaimed existing slot");
            return Ok(existing);
        }

        // 2. Claim a vacant or stale row.
        if let Some(claimed) = sqlx::query_as::<_, Slot>(
            "UPDATE topic_slots SET instance_id = $1, claimed_at = now(), last_heartbeat = now()
             WHERE slot_name = (
                 SELECT slot_name FROM topic_slots
                 WHERE instance_id IS NULL
                    OR last_heartbeat < now() - ($2 || ' seconds')::interval
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING slot_name, instance_id, claimed_at, last_heartbeat",
        )
        .bind(instance_id)
        .bind(SLOT_STALE_SECONDS.to_string())
        .fetch_optional(&self.pool)
        .await?
        {
            tracing::info!(slot = %claimed.slot_name, "claimed stale slot");
            return Ok(claimed);
        }

        // 3. Create a new row with a randomly generated name, retrying on collision.
        loop {
            let slot_name = generate_slot_name();
            let inserted = sqlx::query_as::<_, Slot>(
                "INSERT INTO topic_slots (slot_name, instance_id, claimed_at, last_heartbeat)
                 VALUES ($1, $2, now(), now())
                 ON CONFLICT (slot_name) DO NOTHING
                 RETURNING slot_name, instance_id, claimed_at, last_heartbeat",
            )
            .bind(&slot_name)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(slot) = inserted {
                tracing::info!(slot = %slot.slot_name, "created new slot");
                return Ok(slot);
            }
            // Name collided with an existing row; try another.
        }
    }

    async fn heartbeat(&self, instance_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE topic_slots SET last_heartbeat = now() WHERE instance_id = $1",
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, instance_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE topic_slots SET instance_id = NULL, last_heartbeat = NULL WHERE instance_id = $1",
        )
        .bind(instance_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn slot_for_instance(&self, instance_id: &str) -> anyhow::Result<Option<Slot>> {
        let slot = sqlx::query_as::<_, Slot>(
            "SELECT slot_name, instance_id, claimed_at, last_heartbeat
             FROM topic_slots WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(slot)
    }

    async fn active_slots(&self) -> anyhow::Result<Vec<Slot>> {
        let slots = sqlx::query_as::<_, Slot>(
            "SELECT slot_name, instance_id, claimed_at, last_heartbeat
             FROM topic_slots
             WHERE instance_id IS NOT NULL
               AND last_heartbeat > now() - ($1 || ' seconds')::interval",
        )
        .bind(SLOT_STALE_SECONDS.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_slot_names_are_four_lowercase_alphanumerics() {
        for _ in 0..50 {
            let name = generate_slot_name();
            assert_eq!(name.len(), 4);
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }
}
