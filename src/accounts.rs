//! Deal cash accounts
//!
//! Each account holds an (interest, principal) pair. The engine moves cash
//! between accounts at period boundaries; the waterfall drains the
//! collection account.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which side of an account a cash movement touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashKind {
    Interest,
    Principal,
}

/// Deal account identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    Payment,
    Collection,
    RampUp,
    RevolverFunding,
    ExpenseReserve,
    Custodial,
    SupplementalReserve,
    InterestReserve,
    FundingNote,
}

impl AccountKind {
    pub const ALL: [AccountKind; 9] = [
        AccountKind::Payment,
        AccountKind::Collection,
        AccountKind::RampUp,
        AccountKind::RevolverFunding,
        AccountKind::ExpenseReserve,
        AccountKind::Custodial,
        AccountKind::SupplementalReserve,
        AccountKind::InterestReserve,
        AccountKind::FundingNote,
    ];
}

/// An (interest, principal) cash pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub interest: f64,
    pub principal: f64,
}

impl Account {
    pub fn new(interest: f64, principal: f64) -> Self {
        Self { interest, principal }
    }

    pub fn add(&mut self, kind: CashKind, amount: f64) {
        match kind {
            CashKind::Interest => self.interest += amount,
            CashKind::Principal => self.principal += amount,
        }
    }

    pub fn balance(&self, kind: CashKind) -> f64 {
        match kind {
            CashKind::Interest => self.interest,
            CashKind::Principal => self.principal,
        }
    }

    /// Drain one side to zero, returning what was held.
    pub fn withdraw_all(&mut self, kind: CashKind) -> f64 {
        let amount = self.balance(kind);
        self.add(kind, -amount);
        amount
    }

    pub fn total(&self) -> f64 {
        self.interest + self.principal
    }
}

/// The full set of deal accounts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSet {
    accounts: BTreeMap<AccountKind, Account>,
}

impl AccountSet {
    pub fn new() -> Self {
        let mut accounts = BTreeMap::new();
        for kind in AccountKind::ALL {
            accounts.insert(kind, Account::default());
        }
        Self { accounts }
    }

    pub fn with_initial_balances(
        initial: impl IntoIterator<Item = (AccountKind, Account)>,
    ) -> Self {
        let mut set = Self::new();
        for (kind, account) in initial {
            set.accounts.insert(kind, account);
        }
        set
    }

    pub fn account(&self, kind: AccountKind) -> Account {
        self.accounts.get(&kind).copied().unwrap_or_default()
    }

    pub fn add(&mut self, kind: AccountKind, cash: CashKind, amount: f64) {
        self.accounts.entry(kind).or_default().add(cash, amount);
    }

    pub fn balance(&self, kind: AccountKind, cash: CashKind) -> f64 {
        self.account(kind).balance(cash)
    }

    pub fn withdraw_all(&mut self, kind: AccountKind, cash: CashKind) -> f64 {
        self.accounts.entry(kind).or_default().withdraw_all(cash)
    }

    /// Move one side of an account into another in full.
    pub fn transfer_all(
        &mut self,
        from: AccountKind,
        to: AccountKind,
        cash: CashKind,
    ) -> f64 {
        let amount = self.withdraw_all(from, cash);
        self.add(to, cash, amount);
        amount
    }

    pub fn total_cash(&self) -> f64 {
        self.accounts.values().map(Account::total).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountKind, &Account)> {
        self.accounts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_account_add_and_withdraw() {
        let mut account = Account::default();
        account.add(CashKind::Interest, 100.0);
        account.add(CashKind::Principal, 250.0);
        assert_relative_eq!(account.total(), 350.0);

        let drained = account.withdraw_all(CashKind::Interest);
        assert_relative_eq!(drained, 100.0);
        assert_relative_eq!(account.interest, 0.0);
        assert_relative_eq!(account.principal, 250.0);
    }

    #[test]
    fn test_set_initializes_all_kinds() {
        let set = AccountSet::new();
        assert_eq!(set.iter().count(), AccountKind::ALL.len());
    }

    #[test]
    fn test_transfer_all() {
        let mut set = AccountSet::new();
        set.add(AccountKind::RampUp, CashKind::Principal, 5_000_000.0);
        let moved = set.transfer_all(AccountKind::RampUp, AccountKind::Collection, CashKind::Principal);

        assert_relative_eq!(moved, 5_000_000.0);
        assert_relative_eq!(set.balance(AccountKind::RampUp, CashKind::Principal), 0.0);
        assert_relative_eq!(
            set.balance(AccountKind::Collection, CashKind::Principal),
            5_000_000.0
        );
    }
}
