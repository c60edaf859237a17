use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument};

use kore_accounting::{
    ancestor_chain, descendant_chain, ensure_acyclic, reconcile_balances, Account, BalanceDrift,
    EntryDraft, Invoice, InvoiceDraftUpdate, InvoiceStatus, JournalEntry, NewAccount, NewInvoice,
    PostEntry, ReverseEntry,
};
use kore_core::{AccountId, Aggregate, Amount, DomainError, Entity, EntryId, InvoiceId};

use super::{LedgerStore, Pagination};
use crate::error::{StoreError, StoreResult};
use crate::record_store::{lock_all, AppendOnlyLog, RecordStore, Table};

/// In-memory ledger.
///
/// Intended for tests/dev. Each account row has its own lock; postings lock
/// the rows they touch in ascending id order. Structural changes (re-parent,
/// delete) and reconciliation take the `structure` lock exclusively, so they
/// never interleave with a posting in flight.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: Table<Account>,
    journal: AppendOnlyLog<JournalEntry>,
    invoices: Table<Invoice>,
    structure: RwLock<()>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
        self.structure.read().map_err(|_| StoreError::LockPoisoned("ledger"))
    }

    fn exclusive(&self) -> StoreResult<RwLockWriteGuard<'_, ()>> {
        self.structure.write().map_err(|_| StoreError::LockPoisoned("ledger"))
    }

    fn account(&self, id: AccountId) -> StoreResult<Account> {
        self.accounts
            .get(id)?
            .ok_or_else(|| DomainError::UnknownAccount(id).into())
    }

    fn entry(&self, id: EntryId) -> StoreResult<JournalEntry> {
        self.journal
            .get(id)?
            .ok_or_else(|| DomainError::UnknownEntry(id).into())
    }

    fn parent_links(&self) -> StoreResult<HashMap<AccountId, Option<AccountId>>> {
        Ok(self
            .accounts
            .values()?
            .into_iter()
            .map(|a| (a.id_typed(), a.parent()))
            .collect())
    }

    fn accounts_in_order(&self, ids: Vec<AccountId>) -> StoreResult<Vec<Account>> {
        ids.into_iter().map(|id| self.account(id)).collect()
    }

    /// Lock, check, append, apply. Nothing is written unless every check passes.
    fn commit(&self, draft: EntryDraft) -> StoreResult<JournalEntry> {
        let _structure = self.shared()?;

        let deltas = draft.deltas();
        let mut rows = Vec::with_capacity(deltas.len());
        for (id, row) in self.accounts.rows_sorted(deltas.keys().copied())? {
            rows.push(row.ok_or(DomainError::UnknownAccount(id))?);
        }
        let mut guards = lock_all(&rows)?;
        // Reversals may touch accounts deactivated since the original posting.
        if draft.reversal_of().is_none() {
            if let Some(inactive) = guards.iter().find(|a| !a.is_active()) {
                return Err(DomainError::InactiveAccount(inactive.id_typed()).into());
            }
        }
        for account in guards.iter() {
            if let Some(delta) = deltas.get(&account.id_typed()) {
                account.balance_after(*delta)?;
            }
        }

        let reversal_of = draft.reversal_of();
        let entry = draft.into_entry(EntryId::new(), Utc::now());
        let appended = self.journal.append_if(entry.clone(), |existing| match reversal_of {
            Some(original) if existing.iter().any(|s| s.record.reversal_of == Some(original)) => {
                Err(DomainError::AlreadyReversed(original))
            }
            _ => Ok(()),
        });
        match appended {
            Ok(_) => {}
            Err(StoreError::Domain(DomainError::Duplicate { key, .. })) => {
                return Err(DomainError::DuplicateEntryNumber(key).into());
            }
            Err(e) => return Err(e),
        }

        for account in guards.iter_mut() {
            account.apply(&entry);
        }
        info!(
            entry_id = %entry.id,
            entry_number = %entry.entry_number,
            accounts = guards.len(),
            "journal entry committed"
        );
        Ok(entry)
    }

    fn check_delete(&self, id: AccountId) -> StoreResult<()> {
        self.account(id)?;
        if !self.accounts.filter(|a| a.parent() == Some(id))?.is_empty() {
            return Err(DomainError::still_referenced(Account::RECORD, id, Account::RECORD).into());
        }
        if self.journal.any(|e| e.touches(id))? {
            return Err(DomainError::still_referenced(Account::RECORD, id, "journal_line").into());
        }
        Ok(())
    }

    fn invoice_or_unknown(id: InvoiceId, found: Option<Invoice>) -> StoreResult<Invoice> {
        found.ok_or_else(|| DomainError::UnknownInvoice(id).into())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    #[instrument(skip(self, cmd), fields(code = %cmd.code), err)]
    async fn open_account(&self, cmd: NewAccount) -> StoreResult<Account> {
        let account = Account::open(AccountId::new(), cmd, Utc::now())?;
        let _structure = self.shared()?;
        if let Some(parent) = account.parent() {
            self.account(parent)?;
        }
        self.accounts.insert(account.clone())?;
        info!(account_id = %account.id_typed(), "account opened");
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn set_account_parent(&self, id: AccountId, parent: Option<AccountId>) -> StoreResult<Account> {
        let _structure = self.exclusive()?;
        self.account(id)?;
        if let Some(parent) = parent {
            self.account(parent)?;
            let links = self.parent_links()?;
            let chain = ancestor_chain(parent, |a| links.get(&a).copied().flatten());
            ensure_acyclic(id, parent, chain)?;
        }
        let updated = self.accounts.modify(id, |a| {
            a.set_parent(parent);
            Ok(())
        })?;
        updated.ok_or_else(|| DomainError::UnknownAccount(id).into())
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn set_account_active(&self, id: AccountId, active: bool) -> StoreResult<Account> {
        let _structure = self.shared()?;
        let updated = self.accounts.modify(id, |a| {
            a.set_active(active);
            Ok(())
        })?;
        updated.ok_or_else(|| DomainError::UnknownAccount(id).into())
    }

    async fn get_account(&self, id: AccountId) -> StoreResult<Account> {
        self.account(id)
    }

    async fn find_account_by_code(&self, code: &str) -> StoreResult<Option<Account>> {
        self.accounts.find_by_key(code.trim())
    }

    async fn get_balance(&self, id: AccountId) -> StoreResult<Amount> {
        Ok(self.account(id)?.balance())
    }

    async fn list_children(&self, id: AccountId) -> StoreResult<Vec<Account>> {
        self.account(id)?;
        let mut children = self.accounts.filter(|a| a.parent() == Some(id))?;
        children.sort_by(|a, b| a.code().cmp(b.code()));
        Ok(children)
    }

    async fn ancestors(&self, id: AccountId) -> StoreResult<Vec<Account>> {
        self.account(id)?;
        let links = self.parent_links()?;
        let chain = ancestor_chain(id, |a| links.get(&a).copied().flatten());
        self.accounts_in_order(chain)
    }

    async fn descendants(&self, id: AccountId) -> StoreResult<Vec<Account>> {
        self.account(id)?;
        let links = self.parent_links()?;
        self.accounts_in_order(descendant_chain(id, links))
    }

    async fn protect_delete(&self, id: AccountId) -> StoreResult<()> {
        let _structure = self.shared()?;
        self.check_delete(id)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn delete_account(&self, id: AccountId) -> StoreResult<()> {
        let _structure = self.exclusive()?;
        self.check_delete(id)?;
        self.accounts.delete(id)?;
        info!("account deleted");
        Ok(())
    }

    #[instrument(skip(self, cmd), fields(entry_number = %cmd.entry_number, lines = cmd.lines.len()), err)]
    async fn post_entry(&self, cmd: PostEntry) -> StoreResult<JournalEntry> {
        cmd.validate()
            .map_err(StoreError::from)
            .and_then(|draft| self.commit(draft))
            .map_err(StoreError::traced)
    }

    #[instrument(skip(self, cmd), fields(entry_id = %cmd.entry_id), err)]
    async fn reverse_entry(&self, cmd: ReverseEntry) -> StoreResult<JournalEntry> {
        let original = self.entry(cmd.entry_id)?;
        let draft = EntryDraft::reversing(&original, cmd.actor, &cmd.description)?;
        self.commit(draft).map_err(StoreError::traced)
    }

    async fn get_entry(&self, id: EntryId) -> StoreResult<JournalEntry> {
        self.entry(id)
    }

    async fn is_reversed(&self, id: EntryId) -> StoreResult<bool> {
        self.entry(id)?;
        self.journal.any(|e| e.reversal_of == Some(id))
    }

    async fn list_entries(&self, page: Pagination) -> StoreResult<Vec<JournalEntry>> {
        // Back-dated entries sort by their entry date, not by posting order.
        let mut entries: Vec<_> = self
            .journal
            .scan_back(None, usize::MAX, |_| true)?
            .into_iter()
            .map(|s| s.record)
            .collect();
        entries.sort_by(|a, b| (b.date, b.created_at).cmp(&(a.date, a.created_at)));
        Ok(entries
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn update_entry(&self, entry: JournalEntry) -> StoreResult<()> {
        self.journal.update(entry)
    }

    async fn delete_entry(&self, id: EntryId) -> StoreResult<()> {
        self.journal.delete(id)
    }

    #[instrument(skip(self), err)]
    async fn reconcile_balances(&self) -> StoreResult<Vec<BalanceDrift>> {
        let _structure = self.exclusive()?;
        let accounts = self.accounts.values()?;
        let entries = self.journal.snapshot()?;
        let drift = reconcile_balances(&accounts, &entries);
        info!(accounts = accounts.len(), entries = entries.len(), drifted = drift.len(), "ledger reconciled");
        Ok(drift)
    }

    #[instrument(skip(self, cmd), fields(number = %cmd.number), err)]
    async fn create_invoice(&self, cmd: NewInvoice) -> StoreResult<Invoice> {
        if let Some(entry) = cmd.journal_entry {
            self.entry(entry)?;
        }
        let invoice = Invoice::draft(InvoiceId::new(), cmd, Utc::now())?;
        self.invoices.insert(invoice.clone())?;
        Ok(invoice)
    }

    #[instrument(skip(self, update), fields(invoice_id = %id), err)]
    async fn update_draft_invoice(&self, id: InvoiceId, update: InvoiceDraftUpdate) -> StoreResult<Invoice> {
        let found = self.invoices.modify(id, |inv| inv.update_draft(update))?;
        Self::invoice_or_unknown(id, found)
    }

    #[instrument(skip(self), fields(invoice_id = %id, status = status.as_str()), err)]
    async fn set_invoice_status(&self, id: InvoiceId, status: InvoiceStatus) -> StoreResult<Invoice> {
        let found = self.invoices.modify(id, |inv| inv.transition(status))?;
        Self::invoice_or_unknown(id, found)
    }

    #[instrument(skip(self), fields(invoice_id = %id, entry_id = %entry), err)]
    async fn link_invoice_entry(&self, id: InvoiceId, entry: EntryId) -> StoreResult<Invoice> {
        self.entry(entry)?;
        let found = self.invoices.modify(id, |inv| inv.link_entry(entry))?;
        Self::invoice_or_unknown(id, found)
    }

    async fn get_invoice(&self, id: InvoiceId) -> StoreResult<Invoice> {
        let found = self.invoices.get(id)?;
        Self::invoice_or_unknown(id, found)
    }
}
