//! Infrastructure layer: record stores, engines, Postgres, config.
//!
//! The two engines sit behind [`LedgerStore`] and [`StockStore`]. Each has an
//! in-memory implementation (tests/dev) and a PostgreSQL implementation;
//! [`Stores::connect`] picks one from [`StoreConfig`].

pub mod config;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod postgres;
pub mod record_store;

pub use config::{Backend, StoreConfig, Stores};
pub use error::{StoreError, StoreResult};
pub use inventory::{HistoryPage, HistoryQuery, InMemoryStock, MovementHistory, PostgresStock, StockStore};
pub use ledger::{InMemoryLedger, LedgerStore, Pagination, PostgresLedger};

#[cfg(test)]
mod integration_tests;
