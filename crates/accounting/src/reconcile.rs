//! Offline replay of the journal against cached account balances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use kore_core::{AccountId, Aggregate, Amount};

use crate::account::Account;
use crate::journal::JournalEntry;

/// An account whose cached balance differs from the journal replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub account: AccountId,
    pub cached: Amount,
    pub replayed: Amount,
}

/// Replay `entries` into a zeroed copy of every account and report drift.
///
/// Uses [`Aggregate::apply`], the same code path the posting engine runs,
/// so reversals are accounted for exactly as they were at commit time.
pub fn reconcile_balances<'a, A, E>(accounts: A, entries: E) -> Vec<BalanceDrift>
where
    A: IntoIterator<Item = &'a Account>,
    E: IntoIterator<Item = &'a JournalEntry> + Clone,
{
    let mut drift = Vec::new();
    for account in accounts {
        let mut replayed = account.clone();
        replayed.post(-account.balance());
        replayed.replay(entries.clone());
        if replayed.balance() != account.balance() {
            drift.push(BalanceDrift {
                account: account.id_typed(),
                cached: account.balance(),
                replayed: replayed.balance(),
            });
        }
    }
    drift
}

/// Net balance per account computed purely from the journal.
pub fn replay_balances<'a, E>(entries: E) -> BTreeMap<AccountId, Amount>
where
    E: IntoIterator<Item = &'a JournalEntry>,
{
    let mut balances = BTreeMap::new();
    for entry in entries {
        for line in &entry.lines {
            *balances.entry(line.account).or_insert(Amount::ZERO) += line.net();
        }
    }
    balances
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use kore_core::{EntryId, UserId};
    use rust_decimal_macros::dec;

    use crate::account::{AccountType, NewAccount};
    use crate::journal::{LineInput, PostEntry};

    fn account(code: &str) -> Account {
        Account::open(
            AccountId::new(),
            NewAccount {
                code: code.to_string(),
                name: code.to_string(),
                account_type: AccountType::Asset,
                parent: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn entry(number: &str, debit: AccountId, credit: AccountId) -> JournalEntry {
        PostEntry {
            entry_number: number.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            description: String::new(),
            actor: UserId::new(),
            lines: vec![
                LineInput::debit(debit, dec!(40), ""),
                LineInput::credit(credit, dec!(40), ""),
            ],
        }
        .validate()
        .unwrap()
        .into_entry(EntryId::new(), Utc::now())
    }

    #[test]
    fn consistent_cache_has_no_drift() {
        let mut a = account("1000");
        let mut b = account("1100");
        let entries = vec![entry("1", a.id_typed(), b.id_typed()), entry("2", a.id_typed(), b.id_typed())];
        for e in &entries {
            a.apply(e);
            b.apply(e);
        }
        assert!(reconcile_balances([&a, &b], &entries).is_empty());
        assert_eq!(replay_balances(&entries)[&a.id_typed()], Amount::from_minor(8_000));
    }

    #[test]
    fn tampered_cache_is_reported() {
        let mut a = account("1000");
        let b = account("1100");
        let entries = vec![entry("1", a.id_typed(), b.id_typed())];
        a.apply(&entries[0]);
        a.post(Amount::from_minor(1));

        let drift = reconcile_balances([&a], &entries);
        assert_eq!(
            drift,
            vec![BalanceDrift {
                account: a.id_typed(),
                cached: Amount::from_minor(4_001),
                replayed: Amount::from_minor(4_000),
            }]
        );
    }
}
