//! Store selection and wiring.
//!
//! Environment:
//!
//! | variable | meaning | default |
//! |----------|---------|---------|
//! | `KORE_STORE` | `memory` or `postgres` | `memory` |
//! | `DATABASE_URL` | Postgres connection string | required for `postgres` |
//! | `KORE_DB_MAX_CONNECTIONS` | pool size | `10` |
//! | `KORE_HISTORY_PAGE_SIZE` | movement history page size | `50`, capped at `1000` |

use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use kore_core::ProductId;

use crate::error::{StoreError, StoreResult};
use crate::inventory::{HistoryQuery, InMemoryStock, MovementHistory, PostgresStock, StockStore};
use crate::ledger::{InMemoryLedger, LedgerStore, PostgresLedger};
use crate::postgres::{apply_schema, connect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for Backend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(Backend::Memory),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            other => Err(StoreError::Config(format!(
                "KORE_STORE must be 'memory' or 'postgres', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub history_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            database_url: None,
            max_connections: 10,
            history_page_size: HistoryQuery::DEFAULT_LIMIT,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("KORE_STORE") {
            Some(raw) => raw.parse()?,
            None => defaults.backend,
        };
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if backend == Backend::Postgres && database_url.is_none() {
            return Err(StoreError::Config(
                "DATABASE_URL must be set when KORE_STORE=postgres".to_string(),
            ));
        }

        let max_connections = match lookup("KORE_DB_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(StoreError::Config(format!(
                        "KORE_DB_MAX_CONNECTIONS must be a positive integer, got '{raw}'"
                    )));
                }
            },
            None => defaults.max_connections,
        };

        let history_page_size = match lookup("KORE_HISTORY_PAGE_SIZE") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n.min(HistoryQuery::MAX_LIMIT),
                _ => {
                    return Err(StoreError::Config(format!(
                        "KORE_HISTORY_PAGE_SIZE must be a positive integer, got '{raw}'"
                    )));
                }
            },
            None => defaults.history_page_size,
        };

        Ok(Self {
            backend,
            database_url,
            max_connections,
            history_page_size,
        })
    }
}

/// Both engines, ready to use.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub stock: Arc<dyn StockStore>,
    pub history_page_size: usize,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            stock: Arc::new(InMemoryStock::new()),
            history_page_size: HistoryQuery::DEFAULT_LIMIT,
        }
    }

    /// Open the configured backend. The postgres path applies the embedded
    /// schema before returning.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        match config.backend {
            Backend::Memory => {
                info!("using in-memory stores");
                Ok(Self {
                    history_page_size: config.history_page_size,
                    ..Self::in_memory()
                })
            }
            Backend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| StoreError::Config("DATABASE_URL is not set".to_string()))?;
                let pool = connect(url, config.max_connections).await?;
                apply_schema(&pool).await?;
                info!("using postgres stores");
                Ok(Self {
                    ledger: Arc::new(PostgresLedger::new(pool.clone())),
                    stock: Arc::new(PostgresStock::new(pool)),
                    history_page_size: config.history_page_size,
                })
            }
        }
    }

    /// Lazy pager over `product`'s movements using the configured page size.
    pub fn movement_history(&self, product: ProductId) -> MovementHistory {
        let query = HistoryQuery::for_product(product).with_limit(self.history_page_size);
        MovementHistory::new(self.stock.clone(), query)
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("history_page_size", &self.history_page_size)
            .finish_non_exhaustive()
    }
}
