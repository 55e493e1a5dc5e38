//! Entry point for a single relay process: load configuration, reconcile
//! the database schema, claim a slot, and serve until shutdown.

use std::sync::Arc;

use clap::Parser;
use homecast_auth::TokenAuthority;
use homecast_bus::{BusAdapter, LocalBusAdapter, NullBusAdapter, RedisBusAdapter};
use homecast_config::RelayConfig;
use homecast_db::{PgHomeStore, PgSettingsStore};
use homecast_gateway::GatewayState;
use homecast_sessions::PgSessionRegistry;
use homecast_slots::PgSlotRegistry;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "homecast-relay", about = "HomeCast cloud relay")]
struct Cli {
    /// Port to listen on (overrides HOMECAST_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Output logs as JSON instead of human-readable text.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = RelayConfig::from_env()?;
    if let Some(port) = cli.port {
        config.bind_port = port;
    }
    let config = Arc::new(config);

    let pool = homecast_db::connect(&config.database_url).await?;
    homecast_db::reconcile_schema(&config.database_url, &pool, config.db_startup_policy).await?;

    let sessions = Arc::new(PgSessionRegistry::new(pool.clone())) as Arc<dyn homecast_sessions::SessionRegistry>;
    let slots = Arc::new(PgSlotRegistry::new(pool.clone())) as Arc<dyn homecast_slots::SlotRegistry>;
    let homes = Arc::new(PgHomeStore::new(pool.clone())) as Arc<dyn homecast_db::HomeStore>;
    let settings = Arc::new(PgSettingsStore::new(pool)) as Arc<dyn homecast_db::SettingsStore>;
    let bus = build_bus(&config).await?;
    let tokens = Arc::new(TokenAuthority::from_config(&config));

    let instance_id = uuid::Uuid::new_v4().to_string();
    let own_slot = homecast_gateway::claim_slot(slots.as_ref(), &instance_id).await;
    let state = GatewayState::new(
        instance_id,
        own_slot,
        env!("CARGO_PKG_VERSION").to_string(),
        config.clone(),
        sessions,
        slots,
        bus,
        homes,
        settings,
        tokens,
    );

    homecast_gateway::run(state, config.bind_port).await
}

async fn build_bus(config: &RelayConfig) -> anyhow::Result<Arc<dyn BusAdapter>> {
    if !config.bus_enabled() {
        tracing::info!("no bus url configured, running in local-only mode");
        return Ok(Arc::new(NullBusAdapter));
    }
    if config.bus_url == "local" {
        return Ok(Arc::new(LocalBusAdapter::new()));
    }
    match RedisBusAdapter::connect(&config.bus_url).await {
        Ok(bus) => Ok(Arc::new(bus)),
        Err(err) => {
            tracing::error!(%err, "failed to connect to bus, falling back to local-only mode");
            Ok(Arc::new(NullBusAdapter))
        },
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
