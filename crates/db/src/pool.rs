use homecast_config::DbStartupPolicy;
use sqlx::migrate::MigrateDatabase;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};

/// Open a connection pool against `database_url`.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the configured startup policy to bring the schema in line before
/// the relay starts serving traffic.
///
/// `ValidateOrRecreate` drops and recreates the database if migrating fails
/// against whatever is already there (acceptable for this relay's state,
/// which is all ephemeral session/slot bookkeeping — nothing here is a
/// system of record). `CreateIfMissing` only migrates, leaving an existing,
/// already-migrated schema untouched. `Off` does nothing.
pub async fn reconcile_schema(
    database_url: &str,
    pool: &PgPool,
    policy: DbStartupPolicy,
) -> anyhow::Result<()> {
    match policy {
        DbStartupPolicy::Off => Ok(()),
        DbStartupPolicy::CreateIfMissing => {
            sqlx::migrate!("./migrations").run(pool).await?;
            Ok(())
        }
        DbStartupPolicy::ValidateOrRecreate => {
            match sqlx::migrate!("./migrations").run(pool).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "schema migration failed, recreating database"
                    );
                    Postgres::drop_database(database_url).await.ok();
                    Postgres::create_database(database_url).await?;
                    sqlx::migrate!("./migrations").run(pool).await?;
                    Ok(())
                }
            }
        }
    }
}
