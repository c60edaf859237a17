use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kore_core::{Amount, DomainError, DomainResult, Entity, EntryId, InvoiceId, Mutable, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceType {
    Customer,
    Supplier,
}

impl InvoiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceType::Customer => "customer",
            InvoiceType::Supplier => "supplier",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "customer" => Ok(InvoiceType::Customer),
            "supplier" => Ok(InvoiceType::Supplier),
            other => Err(DomainError::validation(format!("unknown invoice type '{other}'"))),
        }
    }
}

/// Invoice status lifecycle.
///
/// ```text
/// draft ──► issued ──► paid
///   │         │
///   └────►────┴──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "issued" => Ok(InvoiceStatus::Issued),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown invoice status '{other}'"))),
        }
    }

    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Draft, Issued) | (Issued, Paid) | (Draft, Cancelled) | (Issued, Cancelled)
        )
    }
}

/// Command: create a draft invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub number: String,
    pub invoice_type: InvoiceType,
    pub counterparty: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub journal_entry: Option<EntryId>,
    pub actor: UserId,
}

/// Command: edit the commercial fields of a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDraftUpdate {
    pub counterparty: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Billing document. Mutable while draft.
///
/// `journal_entry` is a lookup reference only; the invoice never owns the
/// entry's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub number: String,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub counterparty: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Amount,
    pub tax: Amount,
    pub total: Amount,
    pub journal_entry: Option<EntryId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

struct Figures {
    subtotal: Amount,
    tax: Amount,
    total: Amount,
}

fn check_figures(
    counterparty: &str,
    invoice_date: NaiveDate,
    due_date: NaiveDate,
    subtotal: Decimal,
    tax: Decimal,
    total: Decimal,
) -> DomainResult<Figures> {
    if counterparty.trim().is_empty() {
        return Err(DomainError::validation("counterparty cannot be empty"));
    }
    if due_date < invoice_date {
        return Err(DomainError::validation("due date precedes invoice date"));
    }
    let subtotal = Amount::new(subtotal)?;
    let tax = Amount::new(tax)?;
    let total = Amount::new(total)?;
    if subtotal.is_negative() || tax.is_negative() || total.is_negative() {
        return Err(DomainError::validation("invoice amounts must not be negative"));
    }
    if subtotal + tax != total {
        return Err(DomainError::validation(format!(
            "total {total} does not equal subtotal {subtotal} + tax {tax}"
        )));
    }
    Ok(Figures { subtotal, tax, total })
}

impl Invoice {
    pub fn draft(id: InvoiceId, cmd: NewInvoice, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let number = cmd.number.trim().to_string();
        if number.is_empty() {
            return Err(DomainError::validation("invoice number cannot be empty"));
        }
        let figures = check_figures(
            &cmd.counterparty,
            cmd.invoice_date,
            cmd.due_date,
            cmd.subtotal,
            cmd.tax,
            cmd.total,
        )?;
        Ok(Self {
            id,
            number,
            invoice_type: cmd.invoice_type,
            status: InvoiceStatus::Draft,
            counterparty: cmd.counterparty,
            invoice_date: cmd.invoice_date,
            due_date: cmd.due_date,
            subtotal: figures.subtotal,
            tax: figures.tax,
            total: figures.total,
            journal_entry: cmd.journal_entry,
            created_by: cmd.actor,
            created_at,
        })
    }

    fn ensure_draft(&self) -> DomainResult<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: "edited".to_string(),
            });
        }
        Ok(())
    }

    pub fn update_draft(&mut self, update: InvoiceDraftUpdate) -> DomainResult<()> {
        self.ensure_draft()?;
        let figures = check_figures(
            &update.counterparty,
            update.invoice_date,
            update.due_date,
            update.subtotal,
            update.tax,
            update.total,
        )?;
        self.counterparty = update.counterparty;
        self.invoice_date = update.invoice_date;
        self.due_date = update.due_date;
        self.subtotal = figures.subtotal;
        self.tax = figures.tax;
        self.total = figures.total;
        Ok(())
    }

    pub fn transition(&mut self, next: InvoiceStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Point at the entry that books this invoice. Cancelled and paid
    /// invoices are closed and keep whatever link they had.
    pub fn link_entry(&mut self, entry: EntryId) -> DomainResult<()> {
        if matches!(self.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled) {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: "linked".to_string(),
            });
        }
        self.journal_entry = Some(entry);
        Ok(())
    }
}

impl Entity for Invoice {
    type Id = InvoiceId;
    const RECORD: &'static str = "invoice";

    fn id(&self) -> Self::Id {
        self.id
    }

    fn natural_key(&self) -> Option<&str> {
        Some(&self.number)
    }
}

impl Mutable for Invoice {}
