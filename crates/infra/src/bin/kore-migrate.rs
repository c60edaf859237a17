//! Apply the embedded schema to `DATABASE_URL` and exit.

use anyhow::{Context, bail};
use tracing::info;

use kore_infra::postgres::{apply_schema, connect};
use kore_infra::{Backend, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kore_observability::init();

    let config = StoreConfig::from_env().context("loading store configuration")?;
    if config.backend != Backend::Postgres {
        bail!("kore-migrate needs KORE_STORE=postgres");
    }
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;

    let pool = connect(url, config.max_connections)
        .await
        .context("connecting to database")?;
    apply_schema(&pool).await.context("applying schema")?;
    info!("migration complete");
    Ok(())
}
