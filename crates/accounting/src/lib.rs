//! Accounting module (double-entry ledger).
//!
//! Pure domain logic only: no IO, no locking, no persistence concerns. The
//! storage engines in `kore-infra` validate through these types and commit
//! the result atomically.

pub mod account;
pub mod invoice;
pub mod journal;
pub mod reconcile;

pub use account::{
    ancestor_chain, descendant_chain, ensure_acyclic, Account, AccountType, NewAccount, Side,
};
pub use invoice::{Invoice, InvoiceDraftUpdate, InvoiceStatus, InvoiceType, NewInvoice};
pub use journal::{
    EntryDraft, JournalEntry, JournalLine, LineInput, PostEntry, ReverseEntry, REVERSAL_SUFFIX,
};
pub use reconcile::{reconcile_balances, replay_balances, BalanceDrift};
