//! Ledger Posting Engine and Account Aggregator boundary.
//!
//! Every write operation validates through `kore-accounting`, then commits
//! its log records and balance updates as one unit: either everything lands
//! or nothing does.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kore_accounting::{
    Account, BalanceDrift, Invoice, InvoiceDraftUpdate, InvoiceStatus, JournalEntry, NewAccount,
    NewInvoice, PostEntry, ReverseEntry,
};
use kore_core::{AccountId, Amount, EntryId, InvoiceId};

use crate::error::StoreResult;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;

/// Pagination parameters for entry listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Double-entry ledger storage.
///
/// Implementations must:
/// - lock every affected account in ascending id order before moving balances
/// - append the entry and its lines together with the balance updates
/// - never update or delete a committed entry
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn open_account(&self, cmd: NewAccount) -> StoreResult<Account>;

    /// Re-parent (or detach with `None`) after an ancestor-walk cycle check.
    async fn set_account_parent(&self, id: AccountId, parent: Option<AccountId>) -> StoreResult<Account>;

    async fn set_account_active(&self, id: AccountId, active: bool) -> StoreResult<Account>;

    async fn get_account(&self, id: AccountId) -> StoreResult<Account>;

    async fn find_account_by_code(&self, code: &str) -> StoreResult<Option<Account>>;

    /// Raw cached balance (debits minus credits).
    async fn get_balance(&self, id: AccountId) -> StoreResult<Amount>;

    /// Direct children, ordered by code.
    async fn list_children(&self, id: AccountId) -> StoreResult<Vec<Account>>;

    /// Parent chain, nearest first.
    async fn ancestors(&self, id: AccountId) -> StoreResult<Vec<Account>>;

    /// Whole subtree below `id`, breadth first.
    async fn descendants(&self, id: AccountId) -> StoreResult<Vec<Account>>;

    /// Fails with `StillReferenced` if any posting line or child account
    /// points at `id`.
    async fn protect_delete(&self, id: AccountId) -> StoreResult<()>;

    async fn delete_account(&self, id: AccountId) -> StoreResult<()>;

    async fn post_entry(&self, cmd: PostEntry) -> StoreResult<JournalEntry>;

    async fn reverse_entry(&self, cmd: ReverseEntry) -> StoreResult<JournalEntry>;

    async fn get_entry(&self, id: EntryId) -> StoreResult<JournalEntry>;

    /// Whether another entry's `reversal_of` points at `id`.
    async fn is_reversed(&self, id: EntryId) -> StoreResult<bool>;

    /// Latest entry date first, then latest posting; ties keep log order reversed.
    async fn list_entries(&self, page: Pagination) -> StoreResult<Vec<JournalEntry>>;

    /// Always fails with `ImmutabilityViolation`.
    async fn update_entry(&self, entry: JournalEntry) -> StoreResult<()>;

    /// Always fails with `ImmutabilityViolation`.
    async fn delete_entry(&self, id: EntryId) -> StoreResult<()>;

    /// Replay the journal and report accounts whose cached balance drifted.
    async fn reconcile_balances(&self) -> StoreResult<Vec<BalanceDrift>>;

    async fn create_invoice(&self, cmd: NewInvoice) -> StoreResult<Invoice>;

    async fn update_draft_invoice(&self, id: InvoiceId, update: InvoiceDraftUpdate) -> StoreResult<Invoice>;

    async fn set_invoice_status(&self, id: InvoiceId, status: InvoiceStatus) -> StoreResult<Invoice>;

    async fn link_invoice_entry(&self, id: InvoiceId, entry: EntryId) -> StoreResult<Invoice>;

    async fn get_invoice(&self, id: InvoiceId) -> StoreResult<Invoice>;
}
