use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::{AccessError, OwnershipTransferred, Ownership};
use crate::ledger::{Address, Amount};
use crate::snapshot;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EscrowError {
    #[error("donation must be greater than zero")]
    MinimumDonate,
    #[error("caller {caller} is not the account owner")]
    NotOwner { caller: Address },
    #[error("escrow {account} holds {available}, cannot pay out {required}")]
    InsufficientBalance {
        account: Address,
        available: Amount,
        required: Amount,
    },
    #[error("new owner is the zero address")]
    ZeroAddress,
    #[error("amount overflows the escrow totals")]
    Overflow,
}

impl From<AccessError> for EscrowError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotOwner { caller } => EscrowError::NotOwner { caller },
            AccessError::ZeroOwner => EscrowError::ZeroAddress,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscrowEvent {
    Donate {
        donor: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Received {
        sender: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    DonationWithdrawal {
        receiver: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    OwnershipTransferred(OwnershipTransferred),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowSnapshot {
    pub id: Address,
    pub receiver: Address,
    pub description: String,
    pub owner: Option<Address>,
    #[serde(with = "crate::units::serde_amount")]
    pub balance: Amount,
    #[serde(with = "crate::units::serde_amount")]
    pub total_donated: Amount,
    #[serde(with = "crate::units::serde_amount")]
    pub total_released: Amount,
    #[serde(with = "crate::units::serde_amount_map")]
    pub payments: BTreeMap<Address, Amount>,
    pub donators: Vec<Address>,
    pub events: Vec<EscrowEvent>,
    #[serde(with = "crate::snapshot::serde_root")]
    pub state_root: [u8; 32],
}

/// A single campaign: custody of donated value, a donor record, and a fixed
/// receiver that payouts go to.
#[derive(Clone, Debug)]
pub struct EscrowAccount {
    id: Address,
    receiver: Address,
    description: String,
    ownership: Ownership,
    balance: Amount,
    /// Initial funding plus every donation; releases never lower it.
    total_donated: Amount,
    total_released: Amount,
    payments: BTreeMap<Address, Amount>,
    donators: Vec<Address>,
    events: Vec<EscrowEvent>,
}

impl EscrowAccount {
    /// Opens an account holding `initial_funding`. The funding counts towards
    /// [`sum_of_donations`](Self::sum_of_donations) but is not attributed to a
    /// donor.
    pub fn new(
        id: Address,
        receiver: Address,
        description: impl Into<String>,
        initial_funding: Amount,
        owner: Address,
    ) -> Self {
        Self {
            id,
            receiver,
            description: description.into(),
            ownership: Ownership::new(owner),
            balance: initial_funding,
            total_donated: initial_funding,
            total_released: 0,
            payments: BTreeMap::new(),
            donators: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn owner(&self) -> Option<&Address> {
        self.ownership.owner()
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn total_released(&self) -> Amount {
        self.total_released
    }

    /// Cumulative amount donated by `donor`.
    pub fn payments(&self, donor: &str) -> Amount {
        self.payments.get(donor).copied().unwrap_or(0)
    }

    pub fn investor(&self, index: usize) -> Option<&Address> {
        self.donators.get(index)
    }

    pub fn donators(&self) -> &[Address] {
        &self.donators
    }

    pub fn sum_of_donations(&self) -> Amount {
        self.total_donated
    }

    pub fn events(&self) -> &[EscrowEvent] {
        &self.events
    }

    pub fn donate(&mut self, caller: &str, amount: Amount) -> Result<(), EscrowError> {
        if amount == 0 {
            return Err(EscrowError::MinimumDonate);
        }
        let balance = self.balance.checked_add(amount).ok_or(EscrowError::Overflow)?;
        let total = self
            .total_donated
            .checked_add(amount)
            .ok_or(EscrowError::Overflow)?;
        let paid = self
            .payments(caller)
            .checked_add(amount)
            .ok_or(EscrowError::Overflow)?;

        if !self.payments.contains_key(caller) {
            self.donators.push(caller.to_string());
        }
        self.payments.insert(caller.to_string(), paid);
        self.balance = balance;
        self.total_donated = total;
        tracing::debug!(account = %self.id, donor = caller, amount = %amount, "donation");
        self.events.push(EscrowEvent::Donate {
            donor: caller.to_string(),
            amount,
        });
        Ok(())
    }

    /// A plain value transfer into the account: recorded as a donation and
    /// additionally announced with `Received`.
    pub fn deposit(&mut self, caller: &str, amount: Amount) -> Result<(), EscrowError> {
        self.donate(caller, amount)?;
        self.events.push(EscrowEvent::Received {
            sender: caller.to_string(),
            amount,
        });
        Ok(())
    }

    /// Pays `amount` to the receiver. Only the account owner may call this.
    pub fn send_help(&mut self, caller: &str, amount: Amount) -> Result<(), EscrowError> {
        self.ownership.ensure_owner(caller)?;
        if self.balance < amount {
            return Err(EscrowError::InsufficientBalance {
                account: self.id.clone(),
                available: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        // released <= donated, which is bounded at donate time
        self.total_released += amount;
        tracing::info!(account = %self.id, receiver = %self.receiver, amount = %amount, "payout");
        self.events.push(EscrowEvent::DonationWithdrawal {
            receiver: self.receiver.clone(),
            amount,
        });
        Ok(())
    }

    pub fn update_description(
        &mut self,
        caller: &str,
        description: impl Into<String>,
    ) -> Result<(), EscrowError> {
        self.ownership.ensure_owner(caller)?;
        self.description = description.into();
        tracing::debug!(account = %self.id, description = %self.description, "description updated");
        Ok(())
    }

    pub fn transfer_ownership(&mut self, caller: &str, new_owner: &str) -> Result<(), EscrowError> {
        let event = self.ownership.transfer(caller, new_owner)?;
        self.events.push(EscrowEvent::OwnershipTransferred(event));
        Ok(())
    }

    pub fn renounce_ownership(&mut self, caller: &str) -> Result<(), EscrowError> {
        let event = self.ownership.renounce(caller)?;
        self.events.push(EscrowEvent::OwnershipTransferred(event));
        Ok(())
    }

    pub fn snapshot(&self) -> EscrowSnapshot {
        let mut leaves = vec![snapshot::leaf(
            b"escrow",
            &[
                self.id.as_bytes(),
                self.receiver.as_bytes(),
                self.description.as_bytes(),
                &self.balance.to_le_bytes(),
                &self.total_donated.to_le_bytes(),
                &self.total_released.to_le_bytes(),
            ],
        )];
        for (index, donor) in self.donators.iter().enumerate() {
            leaves.push(snapshot::leaf(
                b"donor",
                &[
                    &(index as u64).to_le_bytes(),
                    donor.as_bytes(),
                    &self.payments(donor).to_le_bytes(),
                ],
            ));
        }
        EscrowSnapshot {
            id: self.id.clone(),
            receiver: self.receiver.clone(),
            description: self.description.clone(),
            owner: self.ownership.owner().cloned(),
            balance: self.balance,
            total_donated: self.total_donated,
            total_released: self.total_released,
            payments: self.payments.clone(),
            donators: self.donators.clone(),
            events: self.events.clone(),
            state_root: snapshot::merkle_root(leaves),
        }
    }
}
