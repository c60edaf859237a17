//! PostgreSQL-backed ledger.
//!
//! ## Locking
//!
//! Every write runs in one transaction. A posting takes `FOR UPDATE` on the
//! accounts it touches in a single `ORDER BY id` statement, so concurrent
//! postings over overlapping accounts queue instead of deadlocking. A reversal
//! additionally locks the original entry row; `UNIQUE (reversal_of)` backs the
//! check up. Hierarchy changes serialise on a transaction-scoped advisory lock.
//!
//! Committed journal rows are guarded by a trigger that raises SQLSTATE
//! `KR001` on any `UPDATE` or `DELETE`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use kore_accounting::{
    ancestor_chain, descendant_chain, ensure_acyclic, reconcile_balances, Account, AccountType,
    BalanceDrift, EntryDraft, Invoice, InvoiceDraftUpdate, InvoiceStatus, InvoiceType,
    JournalEntry, JournalLine, NewAccount, NewInvoice, PostEntry, ReverseEntry,
};
use kore_core::{AccountId, Amount, DomainError, Entity, EntryId, InvoiceId, UserId};

use super::{LedgerStore, Pagination};
use crate::error::{StoreError, StoreResult};
use crate::postgres::{
    abort, amount, decode, map_delete_error, map_insert_error, map_sqlx_error, unique_violation,
    HIERARCHY_LOCK,
};

macro_rules! select_accounts {
    ($tail:literal) => {
        concat!(
            "SELECT id, code, name, account_type, balance, parent_id, active, created_at FROM accounts ",
            $tail
        )
    };
}

macro_rules! select_entries {
    ($tail:literal) => {
        concat!(
            "SELECT id, entry_number, entry_date, description, created_by, created_at, reversal_of FROM journal_entries ",
            $tail
        )
    };
}

macro_rules! select_invoices {
    ($tail:literal) => {
        concat!(
            "SELECT id, number, invoice_type, status, counterparty, invoice_date, due_date, subtotal, tax, total, ",
            "journal_entry_id, created_by, created_at FROM invoices ",
            $tail
        )
    };
}

/// PostgreSQL ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn account_on(conn: &mut PgConnection, id: AccountId) -> StoreResult<Option<Account>> {
        sqlx::query_as::<_, AccountRow>(select_accounts!("WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(conn)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?
            .map(AccountRow::into_account)
            .transpose()
    }

    async fn require_account(conn: &mut PgConnection, id: AccountId) -> StoreResult<Account> {
        Self::account_on(conn, id)
            .await?
            .ok_or_else(|| DomainError::UnknownAccount(id).into())
    }

    async fn accounts_where_parent(conn: &mut PgConnection, parent: AccountId) -> StoreResult<Vec<Account>> {
        sqlx::query_as::<_, AccountRow>(select_accounts!("WHERE parent_id = $1 ORDER BY code"))
            .bind(parent.as_uuid())
            .fetch_all(conn)
            .await
            .map_err(|e| map_sqlx_error("list_children", e))?
            .into_iter()
            .map(AccountRow::into_account)
            .collect()
    }

    async fn all_accounts(conn: &mut PgConnection) -> StoreResult<Vec<Account>> {
        sqlx::query_as::<_, AccountRow>(select_accounts!("ORDER BY id"))
            .fetch_all(conn)
            .await
            .map_err(|e| map_sqlx_error("list_accounts", e))?
            .into_iter()
            .map(AccountRow::into_account)
            .collect()
    }

    async fn parent_links(conn: &mut PgConnection) -> StoreResult<HashMap<AccountId, Option<AccountId>>> {
        let rows = sqlx::query("SELECT id, parent_id FROM accounts")
            .fetch_all(conn)
            .await
            .map_err(|e| map_sqlx_error("parent_links", e))?;

        let mut links = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("parent_links", e))?;
            let parent: Option<Uuid> = row.try_get("parent_id").map_err(|e| map_sqlx_error("parent_links", e))?;
            links.insert(AccountId::from_uuid(id), parent.map(AccountId::from_uuid));
        }
        Ok(links)
    }

    /// Accounts for `ids`, in the order given.
    async fn accounts_in_order(conn: &mut PgConnection, ids: Vec<AccountId>) -> StoreResult<Vec<Account>> {
        let raw: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let mut by_id: HashMap<AccountId, Account> = sqlx::query_as::<_, AccountRow>(select_accounts!("WHERE id = ANY($1)"))
            .bind(&raw)
            .fetch_all(conn)
            .await
            .map_err(|e| map_sqlx_error("accounts_in_order", e))?
            .into_iter()
            .map(|row| row.into_account().map(|a| (a.id_typed(), a)))
            .collect::<StoreResult<_>>()?;

        ids.into_iter()
            .map(|id| by_id.remove(&id).ok_or_else(|| DomainError::UnknownAccount(id).into()))
            .collect()
    }

    async fn entry_on(conn: &mut PgConnection, id: EntryId) -> StoreResult<Option<JournalEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(select_entries!("WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("get_entry", e))?;
        match row {
            Some(row) => Ok(Self::with_lines(conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Attach lines to entry headers, keeping the header order.
    async fn with_lines(conn: &mut PgConnection, headers: Vec<EntryRow>) -> StoreResult<Vec<JournalEntry>> {
        let ids: Vec<Uuid> = headers.iter().map(|h| h.id).collect();
        let lines = sqlx::query_as::<_, LineRow>(
            "SELECT entry_id, account_id, debit, credit, description FROM journal_lines \
             WHERE entry_id = ANY($1) ORDER BY entry_id, line_no",
        )
        .bind(&ids)
        .fetch_all(conn)
        .await
        .map_err(|e| map_sqlx_error("load_lines", e))?;

        let mut grouped: HashMap<Uuid, Vec<JournalLine>> = HashMap::new();
        for line in lines {
            let entry_id = line.entry_id;
            grouped.entry(entry_id).or_default().push(line.into_line()?);
        }
        headers
            .into_iter()
            .map(|header| {
                let lines = grouped.remove(&header.id).unwrap_or_default();
                header.into_entry(lines)
            })
            .collect()
    }

    async fn invoice_on(conn: &mut PgConnection, id: InvoiceId, lock: bool) -> StoreResult<Invoice> {
        let query = if lock {
            select_invoices!("WHERE id = $1 FOR UPDATE")
        } else {
            select_invoices!("WHERE id = $1")
        };
        sqlx::query_as::<_, InvoiceRow>(query)
            .bind(id.as_uuid())
            .fetch_optional(conn)
            .await
            .map_err(|e| map_sqlx_error("get_invoice", e))?
            .ok_or(DomainError::UnknownInvoice(id))?
            .into_invoice()
    }

    async fn entry_exists(conn: &mut PgConnection, id: EntryId) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM journal_entries WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(conn)
            .await
            .map_err(|e| map_sqlx_error("entry_exists", e))
    }

    /// Child accounts and posting lines referencing `id`.
    async fn check_delete(conn: &mut PgConnection, id: AccountId) -> StoreResult<()> {
        let (children, lines): (bool, bool) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE parent_id = $1), \
                    EXISTS (SELECT 1 FROM journal_lines WHERE account_id = $1)",
        )
        .bind(id.as_uuid())
        .fetch_one(conn)
        .await
        .map_err(|e| map_sqlx_error("check_delete", e))?;

        if children {
            return Err(DomainError::still_referenced(Account::RECORD, id, Account::RECORD).into());
        }
        if lines {
            return Err(DomainError::still_referenced(Account::RECORD, id, "journal_line").into());
        }
        Ok(())
    }

    /// Lock, check, append, apply, commit. Any failure rolls everything back.
    async fn commit(&self, draft: EntryDraft) -> StoreResult<JournalEntry> {
        let deltas = draft.deltas();
        let ids: Vec<Uuid> = deltas.keys().map(|id| *id.as_uuid()).collect();

        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let locked = sqlx::query("SELECT id, active FROM accounts WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_accounts", e))?;

        let mut active = HashMap::with_capacity(locked.len());
        for row in locked {
            let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("lock_accounts", e))?;
            let is_active: bool = row.try_get("active").map_err(|e| map_sqlx_error("lock_accounts", e))?;
            active.insert(AccountId::from_uuid(id), is_active);
        }
        // Reversals may touch accounts deactivated since the original posting.
        let reversing = draft.reversal_of().is_some();
        for id in deltas.keys() {
            match active.get(id) {
                None => return abort(tx, DomainError::UnknownAccount(*id)).await,
                Some(false) if !reversing => return abort(tx, DomainError::InactiveAccount(*id)).await,
                Some(_) => {}
            }
        }

        if let Some(original) = draft.reversal_of() {
            let found = sqlx::query("SELECT id FROM journal_entries WHERE id = $1 FOR UPDATE")
                .bind(original.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_original", e))?;
            if found.is_none() {
                return abort(tx, DomainError::UnknownEntry(original)).await;
            }
            let reversed = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM journal_entries WHERE reversal_of = $1)",
            )
            .bind(original.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_reversed", e))?;
            if reversed {
                return abort(tx, DomainError::AlreadyReversed(original)).await;
            }
        }

        let entry = draft.into_entry(EntryId::new(), Utc::now());

        let inserted = sqlx::query(
            "INSERT INTO journal_entries (id, entry_number, entry_date, description, created_by, created_at, reversal_of) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.entry_number)
        .bind(entry.date)
        .bind(&entry.description)
        .bind(entry.created_by.as_uuid())
        .bind(entry.created_at)
        .bind(entry.reversal_of.map(|id| *id.as_uuid()))
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            return match (unique_violation(&e).as_deref(), entry.reversal_of) {
                (Some("journal_entries_reversal_of_key"), Some(original)) => {
                    abort(tx, DomainError::AlreadyReversed(original)).await
                }
                _ => abort(tx, map_insert_error("insert_entry", &entry.entry_number, e)).await,
            };
        }

        for (line_no, line) in entry.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO journal_lines (entry_id, line_no, account_id, debit, credit, description) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(entry.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.account.as_uuid())
            .bind(line.debit.value())
            .bind(line.credit.value())
            .bind(&line.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_line", e))?;
        }

        for (account, delta) in &deltas {
            sqlx::query("UPDATE accounts SET balance = balance + $2 WHERE id = $1")
                .bind(account.as_uuid())
                .bind(delta.value())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_balance", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;

        info!(
            entry_id = %entry.id,
            entry_number = %entry.entry_number,
            accounts = deltas.len(),
            "journal entry committed"
        );
        Ok(entry)
    }

    /// Load an invoice under `FOR UPDATE`, apply `change`, write it back.
    async fn modify_invoice<F>(&self, id: InvoiceId, change: F) -> StoreResult<Invoice>
    where
        F: FnOnce(&mut Invoice) -> Result<(), DomainError> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let mut invoice = match Self::invoice_on(&mut tx, id, true).await {
            Ok(invoice) => invoice,
            Err(e) => return abort(tx, e).await,
        };
        if let Err(e) = change(&mut invoice) {
            return abort(tx, e).await;
        }

        sqlx::query(
            "UPDATE invoices SET status = $2, counterparty = $3, invoice_date = $4, due_date = $5, \
             subtotal = $6, tax = $7, total = $8, journal_entry_id = $9 WHERE id = $1",
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.status.as_str())
        .bind(&invoice.counterparty)
        .bind(invoice.invoice_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal.value())
        .bind(invoice.tax.value())
        .bind(invoice.total.value())
        .bind(invoice.journal_entry.map(|id| *id.as_uuid()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_invoice", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(invoice)
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    #[instrument(skip(self, cmd), fields(code = %cmd.code), err)]
    async fn open_account(&self, cmd: NewAccount) -> StoreResult<Account> {
        let account = Account::open(AccountId::new(), cmd, Utc::now())?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(parent) = account.parent() {
            let found = sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR SHARE")
                .bind(parent.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_parent", e))?;
            if found.is_none() {
                return abort(tx, DomainError::UnknownAccount(parent)).await;
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO accounts (id, code, name, account_type, balance, parent_id, active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(account.id_typed().as_uuid())
        .bind(account.code())
        .bind(account.name())
        .bind(account.account_type().as_str())
        .bind(account.balance().value())
        .bind(account.parent().map(|id| *id.as_uuid()))
        .bind(account.is_active())
        .bind(account.created_at())
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            return abort(tx, map_insert_error("open_account", account.code(), e)).await;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        info!(account_id = %account.id_typed(), "account opened");
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn set_account_parent(&self, id: AccountId, parent: Option<AccountId>) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(HIERARCHY_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("hierarchy_lock", e))?;

        let mut account = match Self::require_account(&mut tx, id).await {
            Ok(account) => account,
            Err(e) => return abort(tx, e).await,
        };
        if let Some(parent) = parent {
            if let Err(e) = Self::require_account(&mut tx, parent).await {
                return abort(tx, e).await;
            }
            let links = Self::parent_links(&mut tx).await?;
            let chain = ancestor_chain(parent, |a| links.get(&a).copied().flatten());
            if let Err(e) = ensure_acyclic(id, parent, chain) {
                return abort(tx, e).await;
            }
        }

        sqlx::query("UPDATE accounts SET parent_id = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(parent.map(|p| *p.as_uuid()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_account_parent", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        account.set_parent(parent);
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn set_account_active(&self, id: AccountId, active: bool) -> StoreResult<Account> {
        sqlx::query_as::<_, AccountRow>(
            "UPDATE accounts SET active = $2 WHERE id = $1 \
             RETURNING id, code, name, account_type, balance, parent_id, active, created_at",
        )
        .bind(id.as_uuid())
        .bind(active)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_account_active", e))?
        .ok_or(DomainError::UnknownAccount(id))?
        .into_account()
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Account> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::require_account(&mut conn, id).await
    }

    async fn find_account_by_code(&self, code: &str) -> StoreResult<Option<Account>> {
        sqlx::query_as::<_, AccountRow>(select_accounts!("WHERE code = $1"))
            .bind(code.trim())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_account_by_code", e))?
            .map(AccountRow::into_account)
            .transpose()
    }

    async fn get_balance(&self, id: AccountId) -> StoreResult<Amount> {
        Ok(self.get_account(id).await?.balance())
    }

    async fn list_children(&self, id: AccountId) -> StoreResult<Vec<Account>> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::require_account(&mut conn, id).await?;
        Self::accounts_where_parent(&mut conn, id).await
    }

    async fn ancestors(&self, id: AccountId) -> StoreResult<Vec<Account>> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::require_account(&mut conn, id).await?;
        let links = Self::parent_links(&mut conn).await?;
        let chain = ancestor_chain(id, |a| links.get(&a).copied().flatten());
        Self::accounts_in_order(&mut conn, chain).await
    }

    async fn descendants(&self, id: AccountId) -> StoreResult<Vec<Account>> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::require_account(&mut conn, id).await?;
        let links = Self::parent_links(&mut conn).await?;
        Self::accounts_in_order(&mut conn, descendant_chain(id, links)).await
    }

    async fn protect_delete(&self, id: AccountId) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::require_account(&mut conn, id).await?;
        Self::check_delete(&mut conn, id).await
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn delete_account(&self, id: AccountId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(HIERARCHY_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("hierarchy_lock", e))?;

        let found = sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_account", e))?;
        if found.is_none() {
            return abort(tx, DomainError::UnknownAccount(id)).await;
        }
        if let Err(e) = Self::check_delete(&mut tx, id).await {
            return abort(tx, e).await;
        }

        let deleted = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await;
        if let Err(e) = deleted {
            return abort(tx, map_delete_error("delete_account", Account::RECORD, id, e)).await;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        info!("account deleted");
        Ok(())
    }

    #[instrument(skip(self, cmd), fields(entry_number = %cmd.entry_number, lines = cmd.lines.len()), err)]
    async fn post_entry(&self, cmd: PostEntry) -> StoreResult<JournalEntry> {
        let draft = cmd.validate().map_err(|e| StoreError::from(e).traced())?;
        self.commit(draft).await.map_err(StoreError::traced)
    }

    #[instrument(skip(self, cmd), fields(entry_id = %cmd.entry_id), err)]
    async fn reverse_entry(&self, cmd: ReverseEntry) -> StoreResult<JournalEntry> {
        let original = self.get_entry(cmd.entry_id).await?;
        let draft = EntryDraft::reversing(&original, cmd.actor, &cmd.description)?;
        self.commit(draft).await.map_err(StoreError::traced)
    }

    async fn get_entry(&self, id: EntryId) -> StoreResult<JournalEntry> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::entry_on(&mut conn, id)
            .await?
            .ok_or_else(|| DomainError::UnknownEntry(id).into())
    }

    async fn is_reversed(&self, id: EntryId) -> StoreResult<bool> {
        let (exists, reversed): (bool, bool) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM journal_entries WHERE id = $1), \
                    EXISTS (SELECT 1 FROM journal_entries WHERE reversal_of = $1)",
        )
        .bind(id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("is_reversed", e))?;

        if !exists {
            return Err(DomainError::UnknownEntry(id).into());
        }
        Ok(reversed)
    }

    async fn list_entries(&self, page: Pagination) -> StoreResult<Vec<JournalEntry>> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        let headers = sqlx::query_as::<_, EntryRow>(select_entries!(
            "ORDER BY entry_date DESC, created_at DESC, seq DESC LIMIT $1 OFFSET $2"
        ))
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("list_entries", e))?;
        Self::with_lines(&mut conn, headers).await
    }

    async fn update_entry(&self, entry: JournalEntry) -> StoreResult<()> {
        sqlx::query("UPDATE journal_entries SET description = $2 WHERE id = $1")
            .bind(entry.id.as_uuid())
            .bind(&entry.description)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_entry", e))?;
        // The trigger fires per row; with no row there is nothing to fire on.
        Err(DomainError::immutable(JournalEntry::RECORD, "update").into())
    }

    async fn delete_entry(&self, id: EntryId) -> StoreResult<()> {
        sqlx::query("DELETE FROM journal_entries WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_entry", e))?;
        Err(DomainError::immutable(JournalEntry::RECORD, "delete").into())
    }

    #[instrument(skip(self), err)]
    async fn reconcile_balances(&self) -> StoreResult<Vec<BalanceDrift>> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let accounts = Self::all_accounts(&mut tx).await?;
        let headers = sqlx::query_as::<_, EntryRow>(select_entries!("ORDER BY seq"))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_entries", e))?;
        let entries = Self::with_lines(&mut tx, headers).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let drift = reconcile_balances(&accounts, &entries);
        info!(accounts = accounts.len(), entries = entries.len(), drifted = drift.len(), "ledger reconciled");
        Ok(drift)
    }

    #[instrument(skip(self, cmd), fields(number = %cmd.number), err)]
    async fn create_invoice(&self, cmd: NewInvoice) -> StoreResult<Invoice> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        if let Some(entry) = cmd.journal_entry {
            if !Self::entry_exists(&mut conn, entry).await? {
                return Err(DomainError::UnknownEntry(entry).into());
            }
        }
        let invoice = Invoice::draft(InvoiceId::new(), cmd, Utc::now())?;

        sqlx::query(
            "INSERT INTO invoices (id, number, invoice_type, status, counterparty, invoice_date, due_date, \
             subtotal, tax, total, journal_entry_id, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(invoice.id.as_uuid())
        .bind(&invoice.number)
        .bind(invoice.invoice_type.as_str())
        .bind(invoice.status.as_str())
        .bind(&invoice.counterparty)
        .bind(invoice.invoice_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal.value())
        .bind(invoice.tax.value())
        .bind(invoice.total.value())
        .bind(invoice.journal_entry.map(|id| *id.as_uuid()))
        .bind(invoice.created_by.as_uuid())
        .bind(invoice.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_insert_error("create_invoice", &invoice.number, e))?;
        Ok(invoice)
    }

    #[instrument(skip(self, update), fields(invoice_id = %id), err)]
    async fn update_draft_invoice(&self, id: InvoiceId, update: InvoiceDraftUpdate) -> StoreResult<Invoice> {
        self.modify_invoice(id, |inv| inv.update_draft(update)).await
    }

    #[instrument(skip(self), fields(invoice_id = %id, status = status.as_str()), err)]
    async fn set_invoice_status(&self, id: InvoiceId, status: InvoiceStatus) -> StoreResult<Invoice> {
        self.modify_invoice(id, |inv| inv.transition(status)).await
    }

    #[instrument(skip(self), fields(invoice_id = %id, entry_id = %entry), err)]
    async fn link_invoice_entry(&self, id: InvoiceId, entry: EntryId) -> StoreResult<Invoice> {
        {
            let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
            if !Self::entry_exists(&mut conn, entry).await? {
                return Err(DomainError::UnknownEntry(entry).into());
            }
        }
        self.modify_invoice(id, |inv| inv.link_entry(entry)).await
    }

    async fn get_invoice(&self, id: InvoiceId) -> StoreResult<Invoice> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::invoice_on(&mut conn, id, false).await
    }
}

// Database row types

#[derive(Debug)]
struct AccountRow {
    id: Uuid,
    code: String,
    name: String,
    account_type: String,
    balance: Decimal,
    parent_id: Option<Uuid>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            account_type: row.try_get("account_type")?,
            balance: row.try_get("balance")?,
            parent_id: row.try_get("parent_id")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl AccountRow {
    fn into_account(self) -> StoreResult<Account> {
        Ok(Account::restore(
            AccountId::from_uuid(self.id),
            self.code,
            self.name,
            decode("account_type", &self.account_type, AccountType::parse)?,
            amount("balance", self.balance)?,
            self.parent_id.map(AccountId::from_uuid),
            self.active,
            self.created_at,
        ))
    }
}

#[derive(Debug)]
struct EntryRow {
    id: Uuid,
    entry_number: String,
    entry_date: NaiveDate,
    description: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    reversal_of: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for EntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntryRow {
            id: row.try_get("id")?,
            entry_number: row.try_get("entry_number")?,
            entry_date: row.try_get("entry_date")?,
            description: row.try_get("description")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            reversal_of: row.try_get("reversal_of")?,
        })
    }
}

impl EntryRow {
    fn into_entry(self, lines: Vec<JournalLine>) -> StoreResult<JournalEntry> {
        Ok(JournalEntry {
            id: EntryId::from_uuid(self.id),
            entry_number: self.entry_number,
            date: self.entry_date,
            description: self.description,
            created_by: UserId::from_uuid(self.created_by),
            created_at: self.created_at,
            reversal_of: self.reversal_of.map(EntryId::from_uuid),
            lines,
        })
    }
}

#[derive(Debug)]
struct LineRow {
    entry_id: Uuid,
    account_id: Uuid,
    debit: Decimal,
    credit: Decimal,
    description: String,
}

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineRow {
            entry_id: row.try_get("entry_id")?,
            account_id: row.try_get("account_id")?,
            debit: row.try_get("debit")?,
            credit: row.try_get("credit")?,
            description: row.try_get("description")?,
        })
    }
}

impl LineRow {
    fn into_line(self) -> StoreResult<JournalLine> {
        Ok(JournalLine {
            account: AccountId::from_uuid(self.account_id),
            debit: amount("debit", self.debit)?,
            credit: amount("credit", self.credit)?,
            description: self.description,
        })
    }
}

#[derive(Debug)]
struct InvoiceRow {
    id: Uuid,
    number: String,
    invoice_type: String,
    status: String,
    counterparty: String,
    invoice_date: NaiveDate,
    due_date: NaiveDate,
    subtotal: Decimal,
    tax: Decimal,
    total: Decimal,
    journal_entry_id: Option<Uuid>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for InvoiceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvoiceRow {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            invoice_type: row.try_get("invoice_type")?,
            status: row.try_get("status")?,
            counterparty: row.try_get("counterparty")?,
            invoice_date: row.try_get("invoice_date")?,
            due_date: row.try_get("due_date")?,
            subtotal: row.try_get("subtotal")?,
            tax: row.try_get("tax")?,
            total: row.try_get("total")?,
            journal_entry_id: row.try_get("journal_entry_id")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl InvoiceRow {
    fn into_invoice(self) -> StoreResult<Invoice> {
        Ok(Invoice {
            id: InvoiceId::from_uuid(self.id),
            number: self.number,
            invoice_type: decode("invoice_type", &self.invoice_type, InvoiceType::parse)?,
            status: decode("status", &self.status, InvoiceStatus::parse)?,
            counterparty: self.counterparty,
            invoice_date: self.invoice_date,
            due_date: self.due_date,
            subtotal: amount("subtotal", self.subtotal)?,
            tax: amount("tax", self.tax)?,
            total: amount("total", self.total)?,
            journal_entry: self.journal_entry_id.map(EntryId::from_uuid),
            created_by: UserId::from_uuid(self.created_by),
            created_at: self.created_at,
        })
    }
}
