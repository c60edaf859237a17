use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kore_core::{AccountId, Amount, DomainError, DomainResult, Entity, EntryId, Immutable, UserId};

/// Appended to an entry number to derive its reversal's number.
pub const REVERSAL_SUFFIX: &str = "-REV";

/// One debit/credit posting within an entry (immutable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account: AccountId,
    pub debit: Amount,
    pub credit: Amount,
    pub description: String,
}

impl JournalLine {
    /// Signed effect on the account balance.
    pub fn net(&self) -> Amount {
        self.debit - self.credit
    }
}

/// A committed, balanced journal entry.
///
/// There is no `reversed` field: whether an entry has been reversed is a
/// lookup for another entry whose `reversal_of` points here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub entry_number: String,
    pub date: NaiveDate,
    pub description: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub reversal_of: Option<EntryId>,
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    /// `(total debit, total credit)`.
    pub fn totals(&self) -> DomainResult<(Amount, Amount)> {
        totals(&self.lines)
    }

    pub fn touches(&self, account: AccountId) -> bool {
        self.lines.iter().any(|l| l.account == account)
    }
}

impl Entity for JournalEntry {
    type Id = EntryId;
    const RECORD: &'static str = "journal_entry";

    fn id(&self) -> Self::Id {
        self.id
    }

    fn natural_key(&self) -> Option<&str> {
        Some(&self.entry_number)
    }
}

impl Immutable for JournalEntry {}

/// Caller-supplied line: raw decimals, validated by [`PostEntry::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub account: AccountId,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: String,
}

impl LineInput {
    pub fn debit(account: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            account,
            debit: amount,
            credit: Decimal::ZERO,
            description: description.into(),
        }
    }

    pub fn credit(account: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            account,
            debit: Decimal::ZERO,
            credit: amount,
            description: description.into(),
        }
    }
}

/// Command: post a journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub entry_number: String,
    pub date: NaiveDate,
    pub description: String,
    pub actor: UserId,
    pub lines: Vec<LineInput>,
}

/// Command: reverse a committed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseEntry {
    pub entry_id: EntryId,
    pub actor: UserId,
    pub description: String,
}

/// A validated, balanced entry waiting for the engine to commit it.
///
/// Only [`PostEntry::validate`] and [`EntryDraft::reversing`] construct this,
/// so every draft has passed the same checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    entry_number: String,
    date: NaiveDate,
    description: String,
    actor: UserId,
    reversal_of: Option<EntryId>,
    lines: Vec<JournalLine>,
    deltas: BTreeMap<AccountId, Amount>,
}

impl PostEntry {
    pub fn validate(&self) -> DomainResult<EntryDraft> {
        let entry_number = self.entry_number.trim();
        if entry_number.is_empty() {
            return Err(DomainError::validation("entry number cannot be empty"));
        }
        let lines = validate_lines(&self.lines)?;
        Ok(EntryDraft {
            entry_number: entry_number.to_string(),
            date: self.date,
            description: self.description.clone(),
            actor: self.actor,
            reversal_of: None,
            deltas: net_deltas(&lines)?,
            lines,
        })
    }
}

impl EntryDraft {
    /// Build the correcting entry for `original`: same date, every line's
    /// debit and credit swapped, `reversal_of` pointing back.
    ///
    /// The swapped lines go through the same validation as a fresh posting.
    pub fn reversing(original: &JournalEntry, actor: UserId, description: &str) -> DomainResult<Self> {
        let inputs: Vec<LineInput> = original
            .lines
            .iter()
            .map(|line| LineInput {
                account: line.account,
                debit: line.credit.value(),
                credit: line.debit.value(),
                description: format!("Reversal: {}", line.description),
            })
            .collect();

        let lines = validate_lines(&inputs)?;
        Ok(Self {
            entry_number: format!("{}{}", original.entry_number, REVERSAL_SUFFIX),
            date: original.date,
            description: format!("{} of {}", description, original.entry_number),
            actor,
            reversal_of: Some(original.id),
            deltas: net_deltas(&lines)?,
            lines,
        })
    }

    pub fn entry_number(&self) -> &str {
        &self.entry_number
    }

    pub fn reversal_of(&self) -> Option<EntryId> {
        self.reversal_of
    }

    pub fn lines(&self) -> &[JournalLine] {
        &self.lines
    }

    /// Net balance change per account, keyed in ascending id order.
    ///
    /// The key order is the lock order the engines use.
    pub fn deltas(&self) -> BTreeMap<AccountId, Amount> {
        self.deltas.clone()
    }

    pub fn into_entry(self, id: EntryId, created_at: DateTime<Utc>) -> JournalEntry {
        JournalEntry {
            id,
            entry_number: self.entry_number,
            date: self.date,
            description: self.description,
            created_by: self.actor,
            created_at,
            reversal_of: self.reversal_of,
            lines: self.lines,
        }
    }
}

fn totals(lines: &[JournalLine]) -> DomainResult<(Amount, Amount)> {
    let debit = Amount::checked_sum(lines.iter().map(|l| l.debit))?;
    let credit = Amount::checked_sum(lines.iter().map(|l| l.credit))?;
    Ok((debit, credit))
}

fn net_deltas(lines: &[JournalLine]) -> DomainResult<BTreeMap<AccountId, Amount>> {
    let mut deltas = BTreeMap::new();
    for line in lines {
        let delta = deltas.entry(line.account).or_insert(Amount::ZERO);
        *delta = delta.checked_add(line.net())?;
    }
    Ok(deltas)
}

/// Per-line and whole-entry checks.
///
/// Each line must carry exactly one nonzero, non-negative side with at most
/// two decimal digits; total debit must equal total credit exactly.
fn validate_lines(inputs: &[LineInput]) -> DomainResult<Vec<JournalLine>> {
    if inputs.is_empty() {
        return Err(DomainError::validation("journal entry must have lines"));
    }

    let mut lines = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.iter().enumerate() {
        let debit = Amount::new(input.debit)?;
        let credit = Amount::new(input.credit)?;
        if debit.is_negative() || credit.is_negative() {
            return Err(DomainError::validation(format!(
                "line {idx}: debit and credit must not be negative"
            )));
        }
        match (debit.is_zero(), credit.is_zero()) {
            (false, false) => {
                return Err(DomainError::validation(format!(
                    "line {idx}: carries both a debit and a credit"
                )));
            }
            (true, true) => {
                return Err(DomainError::validation(format!(
                    "line {idx}: carries neither a debit nor a credit"
                )));
            }
            _ => {}
        }
        lines.push(JournalLine {
            account: input.account,
            debit,
            credit,
            description: input.description.clone(),
        });
    }

    let (debit, credit) = totals(&lines)?;
    if debit != credit {
        return Err(DomainError::UnbalancedEntry {
            debit: debit.value(),
            credit: credit.value(),
        });
    }

    Ok(lines)
}
