use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kore_core::{AccountId, Aggregate, Amount, DomainError, DomainResult, Entity, Mutable};

use crate::journal::JournalEntry;

/// High-level account type (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

/// Side of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Debit,
    Credit,
}

impl AccountType {
    pub fn normal_side(self) -> Side {
        match self {
            AccountType::Asset | AccountType::Expense => Side::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Income => Side::Credit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Income => "income",
            AccountType::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "asset" => Ok(AccountType::Asset),
            "liability" => Ok(AccountType::Liability),
            "equity" => Ok(AccountType::Equity),
            "income" => Ok(AccountType::Income),
            "expense" => Ok(AccountType::Expense),
            other => Err(DomainError::validation(format!("unknown account type '{other}'"))),
        }
    }
}

/// Command: open a new chart-of-accounts node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub code: String, // e.g. "1000"
    pub name: String, // e.g. "Cash"
    pub account_type: AccountType,
    pub parent: Option<AccountId>,
}

/// Aggregate root: one node in the chart of accounts.
///
/// `balance` is a cache of `sum(debit - credit)` over every posted line that
/// targets this account, reversals included. Only the posting engine moves
/// it, through [`Aggregate::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    code: String,
    name: String,
    account_type: AccountType,
    balance: Amount,
    parent: Option<AccountId>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl Account {
    pub fn open(id: AccountId, cmd: NewAccount, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let code = cmd.code.trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("account code cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("account name cannot be empty"));
        }
        if cmd.parent == Some(id) {
            return Err(DomainError::HierarchyCycle {
                account: id,
                parent: id,
            });
        }
        Ok(Self {
            id,
            code,
            name: cmd.name,
            account_type: cmd.account_type,
            balance: Amount::ZERO,
            parent: cmd.parent,
            active: true,
            created_at,
        })
    }

    /// Rebuild an account exactly as a storage backend persisted it.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: AccountId,
        code: String,
        name: String,
        account_type: AccountType,
        balance: Amount,
        parent: Option<AccountId>,
        active: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            code,
            name,
            account_type,
            balance,
            parent,
            active,
            created_at,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    /// Raw net balance: debits minus credits.
    pub fn balance(&self) -> Amount {
        self.balance
    }

    /// Balance seen from the account's normal side (positive when the
    /// account carries its usual balance, e.g. a liability in credit).
    pub fn natural_balance(&self) -> Amount {
        match self.account_type.normal_side() {
            Side::Debit => self.balance,
            Side::Credit => -self.balance,
        }
    }

    pub fn parent(&self) -> Option<AccountId> {
        self.parent
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Re-parent after the caller has run [`ensure_acyclic`].
    pub fn set_parent(&mut self, parent: Option<AccountId>) {
        self.parent = parent;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Apply a signed `debit - credit` delta. Engine use only.
    pub fn post(&mut self, delta: Amount) {
        self.balance += delta;
    }

    /// Balance after `delta`, refusing results the balance column cannot hold.
    pub fn balance_after(&self, delta: Amount) -> DomainResult<Amount> {
        self.balance.checked_add(delta)
    }
}

impl Entity for Account {
    type Id = AccountId;
    const RECORD: &'static str = "account";

    fn id(&self) -> Self::Id {
        self.id
    }

    fn natural_key(&self) -> Option<&str> {
        Some(&self.code)
    }
}

impl Mutable for Account {}

impl Aggregate for Account {
    type Event = JournalEntry;

    fn apply(&mut self, event: &Self::Event) {
        for line in event.lines.iter().filter(|l| l.account == self.id) {
            self.balance += line.debit - line.credit;
        }
    }
}

/// Reject a parent assignment that would create a cycle.
///
/// `parent_ancestors` is the chain above `parent` (nearest first). The
/// assignment is a cycle if `account` is `parent` itself or one of its
/// ancestors.
pub fn ensure_acyclic<I>(account: AccountId, parent: AccountId, parent_ancestors: I) -> DomainResult<()>
where
    I: IntoIterator<Item = AccountId>,
{
    if account == parent || parent_ancestors.into_iter().any(|a| a == account) {
        return Err(DomainError::HierarchyCycle { account, parent });
    }
    Ok(())
}

/// Walk parent links upwards from `start` (exclusive), nearest first.
///
/// Stops if a link repeats so that corrupt data cannot loop forever.
pub fn ancestor_chain<F>(start: AccountId, mut parent_of: F) -> Vec<AccountId>
where
    F: FnMut(AccountId) -> Option<AccountId>,
{
    let mut chain = Vec::new();
    let mut seen = HashSet::from([start]);
    let mut cursor = parent_of(start);
    while let Some(id) = cursor {
        if !seen.insert(id) {
            break;
        }
        chain.push(id);
        cursor = parent_of(id);
    }
    chain
}

/// Every account below `root`, breadth first, given `(account, parent)` links.
pub fn descendant_chain<I>(root: AccountId, links: I) -> Vec<AccountId>
where
    I: IntoIterator<Item = (AccountId, Option<AccountId>)>,
{
    let mut children: HashMap<AccountId, Vec<AccountId>> = HashMap::new();
    for (id, parent) in links {
        if let Some(parent) = parent {
            children.entry(parent).or_default().push(id);
        }
    }
    for kids in children.values_mut() {
        kids.sort();
    }

    let mut out = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        for &child in children.get(&id).into_iter().flatten() {
            if seen.insert(child) {
                out.push(child);
                queue.push_back(child);
            }
        }
    }
    out
}
