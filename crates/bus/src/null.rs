use async_trait::async_trait;
use homecast_protocol::bus::BusFrame;

use crate::{BusAdapter, BusSubscription, Error, Result};

/// Wired up when no bus URL is configured. Every operation fails with
/// [`Error::NotConnected`] — the relay runs local-only, and the Router
/// treats any agent not owned by this process as unreachable.
pub struct NullBusAdapter;

#[async_trait]
impl BusAdapter for NullBusAdapter {
    async fn publish(&self, _topic: &str, _frame: &BusFrame) -> Result<()> {
        Err(Error::NotConnected)
    }

    async fn ensure_topic(&self, _topic: &str) -> Result<()> {
        Err(Error::NotConnected)
    }

    async fn subscribe(&self, _topic: &str) -> Result<BusSubscription> {
        Err(Error::NotConnected)
    }

    fn enabled(&self) -> bool {
        false
    }
}
