use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::access::{AccessError, OwnershipTransferred, Ownership};
use crate::snapshot;

pub type Address = String;
pub type Amount = u128;

/// The null identity. Mint events originate from it and burn events go to it.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// True for the canonical zero address, any all-zero hex address, and the
/// empty identity.
pub fn is_zero_address(address: &str) -> bool {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    digits.bytes().all(|b| b == b'0')
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("zero address")]
    ZeroAddress,
    #[error("insufficient balance in account {account}: have {available}, need {required}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        required: Amount,
    },
    #[error("insufficient allowance for {spender} on {owner}: have {available}, need {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        available: Amount,
        required: Amount,
    },
    #[error("decreased allowance below zero")]
    AllowanceBelowZero,
    #[error("caller {caller} is not the token owner")]
    OnlyOwner { caller: Address },
    #[error("amount overflows the ledger")]
    Overflow,
}

impl From<AccessError> for TokenError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotOwner { caller } => TokenError::OnlyOwner { caller },
            AccessError::ZeroOwner => TokenError::ZeroAddress,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenEvent {
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Approval {
        owner: Address,
        spender: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    OwnershipTransferred(OwnershipTransferred),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowanceEntry {
    pub owner: Address,
    pub spender: Address,
    #[serde(with = "crate::units::serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub meta: TokenMetadata,
    pub owner: Option<Address>,
    #[serde(with = "crate::units::serde_amount")]
    pub total_supply: Amount,
    #[serde(with = "crate::units::serde_amount_map")]
    pub balances: BTreeMap<Address, Amount>,
    pub allowances: Vec<AllowanceEntry>,
    pub events: Vec<TokenEvent>,
    #[serde(with = "crate::snapshot::serde_root")]
    pub state_root: [u8; 32],
}

/// Balances, allowances and supply for a single token.
///
/// Every operation validates completely before touching state, so a returned
/// error means nothing changed.
#[derive(Clone, Debug)]
pub struct TokenLedger {
    meta: TokenMetadata,
    ownership: Ownership,
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    events: Vec<TokenEvent>,
}

impl TokenLedger {
    /// Deploys a ledger whose whole initial supply belongs to `owner`, who is
    /// also its administrator.
    pub fn new(
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u8,
        initial_supply: Amount,
        owner: Address,
    ) -> Result<Self, TokenError> {
        let mut ledger = Self {
            meta: TokenMetadata {
                name: name.into(),
                symbol: symbol.into(),
                decimals,
            },
            ownership: Ownership::new(owner.clone()),
            total_supply: 0,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            events: Vec::new(),
        };
        ledger.mint(&owner, &owner, initial_supply)?;
        Ok(ledger)
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn symbol(&self) -> &str {
        &self.meta.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.meta.decimals
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn owner(&self) -> Option<&Address> {
        self.ownership.owner()
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &str, spender: &str) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn events(&self) -> &[TokenEvent] {
        &self.events
    }

    pub fn transfer(&mut self, caller: &str, to: &str, amount: Amount) -> Result<(), TokenError> {
        if is_zero_address(to) {
            return Err(TokenError::ZeroAddress);
        }
        self.move_balance(caller, to, amount)?;
        tracing::debug!(from = caller, to, amount = %amount, "transfer");
        self.events.push(TokenEvent::Transfer {
            from: caller.to_string(),
            to: to.to_string(),
            amount,
        });
        Ok(())
    }

    pub fn approve(&mut self, caller: &str, spender: &str, amount: Amount) -> Result<(), TokenError> {
        self.set_allowance(caller, spender, amount);
        Ok(())
    }

    /// Moves `amount` from `from` to `to` on behalf of `caller`. Checks run in
    /// a fixed order: zero recipient, then allowance, then balance.
    pub fn transfer_from(
        &mut self,
        caller: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), TokenError> {
        if is_zero_address(to) {
            return Err(TokenError::ZeroAddress);
        }
        let allowed = self.allowance(from, caller);
        if allowed < amount {
            return Err(TokenError::InsufficientAllowance {
                owner: from.to_string(),
                spender: caller.to_string(),
                available: allowed,
                required: amount,
            });
        }
        self.move_balance(from, to, amount)?;
        self.store_allowance(from, caller, allowed - amount);
        tracing::debug!(spender = caller, from, to, amount = %amount, "transfer_from");
        self.events.push(TokenEvent::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            amount,
        });
        Ok(())
    }

    pub fn increase_allowance(
        &mut self,
        caller: &str,
        spender: &str,
        added: Amount,
    ) -> Result<(), TokenError> {
        let current = self.allowance(caller, spender);
        let updated = current.checked_add(added).ok_or(TokenError::Overflow)?;
        self.set_allowance(caller, spender, updated);
        Ok(())
    }

    pub fn decrease_allowance(
        &mut self,
        caller: &str,
        spender: &str,
        subtracted: Amount,
    ) -> Result<(), TokenError> {
        let current = self.allowance(caller, spender);
        if current < subtracted {
            return Err(TokenError::AllowanceBelowZero);
        }
        self.set_allowance(caller, spender, current - subtracted);
        Ok(())
    }

    pub fn mint(&mut self, caller: &str, account: &str, amount: Amount) -> Result<(), TokenError> {
        self.ownership.ensure_owner(caller)?;
        if is_zero_address(account) {
            return Err(TokenError::ZeroAddress);
        }
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::Overflow)?;
        // balance <= supply, so this cannot overflow once the supply check passed
        *self.balances.entry(account.to_string()).or_insert(0) += amount;
        self.total_supply = supply;
        tracing::debug!(account, amount = %amount, supply = %supply, "mint");
        self.events.push(TokenEvent::Transfer {
            from: ZERO_ADDRESS.to_string(),
            to: account.to_string(),
            amount,
        });
        Ok(())
    }

    pub fn burn(&mut self, caller: &str, account: &str, amount: Amount) -> Result<(), TokenError> {
        self.ownership.ensure_owner(caller)?;
        self.debit(account, amount)?;
        self.total_supply -= amount;
        tracing::debug!(account, amount = %amount, supply = %self.total_supply, "burn");
        self.events.push(TokenEvent::Transfer {
            from: account.to_string(),
            to: ZERO_ADDRESS.to_string(),
            amount,
        });
        Ok(())
    }

    pub fn transfer_ownership(&mut self, caller: &str, new_owner: &str) -> Result<(), TokenError> {
        let event = self.ownership.transfer(caller, new_owner)?;
        tracing::info!(previous = ?event.previous, new = ?event.new, "token ownership transferred");
        self.events.push(TokenEvent::OwnershipTransferred(event));
        Ok(())
    }

    pub fn renounce_ownership(&mut self, caller: &str) -> Result<(), TokenError> {
        let event = self.ownership.renounce(caller)?;
        tracing::info!(previous = ?event.previous, "token ownership renounced");
        self.events.push(TokenEvent::OwnershipTransferred(event));
        Ok(())
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        let allowances: Vec<AllowanceEntry> = self
            .allowances
            .iter()
            .flat_map(|(owner, spenders)| {
                spenders.iter().map(move |(spender, amount)| AllowanceEntry {
                    owner: owner.clone(),
                    spender: spender.clone(),
                    amount: *amount,
                })
            })
            .collect();
        TokenSnapshot {
            meta: self.meta.clone(),
            owner: self.ownership.owner().cloned(),
            total_supply: self.total_supply,
            balances: self.balances.clone(),
            state_root: self.state_root(&allowances),
            allowances,
            events: self.events.clone(),
        }
    }

    fn state_root(&self, allowances: &[AllowanceEntry]) -> [u8; 32] {
        let mut leaves = vec![snapshot::leaf(
            b"meta",
            &[
                self.meta.name.as_bytes(),
                self.meta.symbol.as_bytes(),
                &[self.meta.decimals],
                &self.total_supply.to_le_bytes(),
            ],
        )];
        for (account, balance) in &self.balances {
            leaves.push(snapshot::leaf(
                b"acct",
                &[account.as_bytes(), &balance.to_le_bytes()],
            ));
        }
        for entry in allowances {
            leaves.push(snapshot::leaf(
                b"allowance",
                &[
                    entry.owner.as_bytes(),
                    entry.spender.as_bytes(),
                    &entry.amount.to_le_bytes(),
                ],
            ));
        }
        snapshot::merkle_root(leaves)
    }

    fn move_balance(&mut self, from: &str, to: &str, amount: Amount) -> Result<(), TokenError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                account: from.to_string(),
                available,
                required: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        // sum of balances == supply, so the recipient cannot overflow
        self.debit(from, amount)?;
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        Ok(())
    }

    fn debit(&mut self, account: &str, amount: Amount) -> Result<(), TokenError> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                account: account.to_string(),
                available,
                required: amount,
            });
        }
        if let Some(balance) = self.balances.get_mut(account) {
            *balance -= amount;
        }
        Ok(())
    }

    fn set_allowance(&mut self, owner: &str, spender: &str, amount: Amount) {
        self.store_allowance(owner, spender, amount);
        tracing::debug!(owner, spender, amount = %amount, "approval");
        self.events.push(TokenEvent::Approval {
            owner: owner.to_string(),
            spender: spender.to_string(),
            amount,
        });
    }

    fn store_allowance(&mut self, owner: &str, spender: &str, amount: Amount) {
        self.allowances
            .entry(owner.to_string())
            .or_default()
            .insert(spender.to_string(), amount);
    }
}

/// A [`TokenLedger`] behind a single lock, shareable across threads.
#[derive(Clone, Debug)]
pub struct SharedTokenLedger {
    inner: Arc<Mutex<TokenLedger>>,
}

impl SharedTokenLedger {
    pub fn new(ledger: TokenLedger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Runs `f` while holding the ledger lock, so the whole closure is one
    /// serialized transition.
    pub fn with<R>(&self, f: impl FnOnce(&mut TokenLedger) -> R) -> R {
        f(&mut lock(&self.inner))
    }
}

/// Operations validate before mutating, so state behind a poisoned lock is
/// still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
