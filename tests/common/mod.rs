//! Shared test domain: a small bank account aggregate.

#![allow(dead_code)]

use refold::{AggregateRoot, Apply, DomainEvent, EventRegistry, Handle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub owner: String,
}

impl DomainEvent for AccountOpened {
    const KIND: &'static str = "account-opened";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsDeposited {
    pub amount: i64,
}

impl DomainEvent for FundsDeposited {
    const KIND: &'static str = "funds-deposited";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsWithdrawn {
    pub amount: i64,
}

impl DomainEvent for FundsWithdrawn {
    const KIND: &'static str = "funds-withdrawn";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEvent {
    Opened(AccountOpened),
    Deposited(FundsDeposited),
    Withdrawn(FundsWithdrawn),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("account is already open")]
    AlreadyOpen,
    #[error("account is not open")]
    NotOpen,
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub open: bool,
    pub owner: Option<String>,
    pub balance: i64,
}

impl Apply<AccountOpened> for Account {
    fn apply(&mut self, event: &AccountOpened) {
        self.open = true;
        self.owner = Some(event.owner.clone());
    }
}

impl Apply<FundsDeposited> for Account {
    fn apply(&mut self, event: &FundsDeposited) {
        self.balance += event.amount;
    }
}

impl Apply<FundsWithdrawn> for Account {
    fn apply(&mut self, event: &FundsWithdrawn) {
        self.balance -= event.amount;
    }
}

impl AggregateRoot for Account {
    const KIND: &'static str = "account";

    type Id = String;
    type Event = AccountEvent;
    type Error = AccountError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::Opened(e) => Apply::apply(self, e),
            AccountEvent::Deposited(e) => Apply::apply(self, e),
            AccountEvent::Withdrawn(e) => Apply::apply(self, e),
        }
    }
}

pub struct OpenAccount {
    pub owner: String,
}

impl Handle<OpenAccount> for Account {
    fn handle(&self, command: &OpenAccount) -> Result<Vec<Self::Event>, Self::Error> {
        if self.open {
            return Err(AccountError::AlreadyOpen);
        }
        Ok(vec![AccountEvent::Opened(AccountOpened {
            owner: command.owner.clone(),
        })])
    }
}

pub struct Deposit {
    pub amount: i64,
}

impl Handle<Deposit> for Account {
    fn handle(&self, command: &Deposit) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.open {
            return Err(AccountError::NotOpen);
        }
        if command.amount <= 0 {
            return Err(AccountError::NonPositiveAmount);
        }
        Ok(vec![AccountEvent::Deposited(FundsDeposited {
            amount: command.amount,
        })])
    }
}

pub struct Withdraw {
    pub amount: i64,
}

impl Handle<Withdraw> for Account {
    fn handle(&self, command: &Withdraw) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.open {
            return Err(AccountError::NotOpen);
        }
        if command.amount <= 0 {
            return Err(AccountError::NonPositiveAmount);
        }
        if command.amount > self.balance {
            return Err(AccountError::InsufficientFunds {
                balance: self.balance,
                requested: command.amount,
            });
        }
        Ok(vec![AccountEvent::Withdrawn(FundsWithdrawn {
            amount: command.amount,
        })])
    }
}

/// The closed registry for [`AccountEvent`].
pub fn registry() -> EventRegistry<AccountEvent> {
    EventRegistry::new()
        .with(AccountEvent::Opened, |event| match event {
            AccountEvent::Opened(e) => Some(e),
            _ => None,
        })
        .with(AccountEvent::Deposited, |event| match event {
            AccountEvent::Deposited(e) => Some(e),
            _ => None,
        })
        .with(AccountEvent::Withdrawn, |event| match event {
            AccountEvent::Withdrawn(e) => Some(e),
            _ => None,
        })
}
