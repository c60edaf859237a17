//! Shared PostgreSQL plumbing: pool, schema, error mapping.
//!
//! ## Error Mapping
//!
//! | SQLx Error | SQLSTATE | StoreError |
//! |------------|----------|------------|
//! | unique violation on a known constraint | `23505` | `Domain(Duplicate / DuplicateEntryNumber / AlreadyReversed)` |
//! | foreign key violation | `23503` | `Domain(StillReferenced)` on delete, `Database` otherwise |
//! | check violation | `23514` | `Domain(Validation)` |
//! | numeric value out of range | `22003` | `Domain(Validation)` |
//! | immutability trigger | `KR001` | `Domain(ImmutabilityViolation)` |
//! | anything else | any | `Database` |

use rust_decimal::Decimal;
use sqlx::error::DatabaseError;
use sqlx::postgres::{PgDatabaseError, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, instrument};

use kore_core::{Amount, DomainError, Fixed, Quantity};

use crate::error::{StoreError, StoreResult};

/// Embedded schema, applied idempotently.
pub const SCHEMA: &str = include_str!("../migrations/0001_core.sql");

/// Advisory lock key serialising concurrent schema application.
const SCHEMA_LOCK: i64 = 0x6b6f_7265_0001;

/// Advisory lock key serialising chart-of-accounts structure changes.
pub(crate) const HIERARCHY_LOCK: i64 = 0x6b6f_7265_0002;

pub async fn connect(url: &str, max_connections: u32) -> StoreResult<PgPool> {
    info!(max_connections, "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| map_sqlx_error("verify_connection", e))?;
    Ok(pool)
}

#[instrument(skip(pool), err)]
pub async fn apply_schema(pool: &PgPool) -> StoreResult<()> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| map_sqlx_error("acquire", e))?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("schema_lock", e))?;

    let applied = sqlx::raw_sql(SCHEMA)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("apply_schema", e));

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("schema_unlock", e))?;

    applied?;
    info!("schema applied");
    Ok(())
}

/// Constraint name -> record, for unique violations on natural keys.
const UNIQUE_KEYS: &[(&str, &str)] = &[
    ("accounts_code_key", "account"),
    ("invoices_number_key", "invoice"),
    ("products_sku_key", "product"),
    ("warehouses_code_key", "warehouse"),
];

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("KR001") => {
                    let record = match table_of(db_err.as_ref()) {
                        Some("journal_entries") => "journal_entry",
                        Some("journal_lines") => "journal_line",
                        Some("stock_movements") => "stock_movement",
                        _ => "historical",
                    };
                    let op = if db_err.message().contains("delete") { "delete" } else { "update" };
                    DomainError::immutable(record, op).into()
                }
                Some("23514") => DomainError::validation(msg).into(),
                Some("22003") => DomainError::validation(format!(
                    "numeric value out of range in {operation}: {}",
                    db_err.message()
                ))
                .into(),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Database(format!("connection pool closed in {}", operation)),
        sqlx::Error::RowNotFound => StoreError::Database(format!("unexpected row not found in {}", operation)),
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Map an insert error, translating unique violations on natural keys into
/// the matching domain error for `key`.
pub(crate) fn map_insert_error(operation: &str, key: &str, err: sqlx::Error) -> StoreError {
    match unique_violation(&err).as_deref() {
        Some("journal_entries_entry_number_key") => DomainError::DuplicateEntryNumber(key.to_string()).into(),
        Some(constraint) => match UNIQUE_KEYS.iter().find(|(name, _)| *name == constraint) {
            Some((_, record)) => DomainError::duplicate(*record, key).into(),
            None => map_sqlx_error(operation, err),
        },
        None => map_sqlx_error(operation, err),
    }
}

/// Map a delete error, translating restrict violations into `StillReferenced`.
pub(crate) fn map_delete_error(operation: &str, record: &'static str, id: impl ToString, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23503") {
            let by = match table_of(db_err.as_ref()) {
                Some("journal_lines") => "journal_line",
                Some("stock_levels") => "stock_level",
                Some("stock_movements") => "stock_movement",
                Some("accounts") => "account",
                Some("invoices") => "invoice",
                _ => "record",
            };
            return DomainError::still_referenced(record, id, by).into();
        }
    }
    map_sqlx_error(operation, err)
}

fn table_of(db_err: &dyn DatabaseError) -> Option<&str> {
    db_err.try_downcast_ref::<PgDatabaseError>().and_then(PgDatabaseError::table)
}

/// Constraint name of a unique violation, if `err` is one.
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return Some(db_err.constraint().unwrap_or_default().to_string());
        }
    }
    None
}

/// Roll back explicitly and surface `err`.
pub(crate) async fn abort<T>(tx: Transaction<'_, Postgres>, err: impl Into<StoreError>) -> StoreResult<T> {
    tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
    Err(err.into())
}

fn fixed<const SCALE: u32>(column: &str, raw: Decimal) -> StoreResult<Fixed<SCALE>> {
    Fixed::new(raw).map_err(|e| StoreError::Database(format!("column {column} holds an invalid value: {e}")))
}

pub(crate) fn amount(column: &str, raw: Decimal) -> StoreResult<Amount> {
    fixed(column, raw)
}

pub(crate) fn quantity(column: &str, raw: Decimal) -> StoreResult<Quantity> {
    fixed(column, raw)
}

pub(crate) fn decode<T>(column: &str, raw: &str, parse: fn(&str) -> Result<T, DomainError>) -> StoreResult<T> {
    parse(raw).map_err(|e| StoreError::Database(format!("column {column} holds an invalid value: {e}")))
}
