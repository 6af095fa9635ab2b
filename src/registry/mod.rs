use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::access::{AccessError, OwnershipTransferred, Ownership};
use crate::escrow::{EscrowAccount, EscrowError, EscrowSnapshot};
use crate::ledger::{lock, Address, Amount};

pub type AccountHandle = Arc<Mutex<EscrowAccount>>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("only the registry owner may withdraw, caller {caller}")]
    WithdrawOnlyOwner { caller: Address },
    #[error("withdrawal of {requested} exceeds escrow balance {available}")]
    WithdrawMax { available: Amount, requested: Amount },
    #[error("only the registry owner may update descriptions, caller {caller}")]
    UpdateDescriptionOnlyOwner { caller: Address },
    #[error("unknown escrow account {0}")]
    UnknownAccount(Address),
    #[error("caller {caller} is not the registry owner")]
    OnlyOwner { caller: Address },
    #[error("new owner is the zero address")]
    ZeroAddress,
    #[error(transparent)]
    Escrow(#[from] EscrowError),
}

impl From<AccessError> for RegistryError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotOwner { caller } => RegistryError::OnlyOwner { caller },
            AccessError::ZeroOwner => RegistryError::ZeroAddress,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// `marker` is the registry's creation sequence number, starting at 1.
    Created { account_id: Address, marker: u64 },
    OwnershipTransferred(OwnershipTransferred),
}

/// Factory and administrator of escrow accounts.
///
/// The registry has its own identity (`address`), which every account it
/// creates records as its owner, and a separate administrator who alone may
/// instruct releases and description changes. Privileged calls therefore
/// pass two checks: the caller against the registry administrator, then the
/// registry against the account owner.
#[derive(Debug)]
pub struct EscrowRegistry {
    address: Address,
    ownership: Ownership,
    sequence: u64,
    accounts: BTreeMap<Address, AccountHandle>,
    order: Vec<Address>,
    events: Vec<RegistryEvent>,
}

impl EscrowRegistry {
    pub fn new(address: Address, admin: Address) -> Self {
        Self {
            address,
            ownership: Ownership::new(admin),
            sequence: 0,
            accounts: BTreeMap::new(),
            order: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn admin(&self) -> Option<&Address> {
        self.ownership.owner()
    }

    pub fn events(&self) -> &[RegistryEvent] {
        &self.events
    }

    /// Account ids in creation order.
    pub fn account_ids(&self) -> &[Address] {
        &self.order
    }

    pub fn account(&self, account_id: &str) -> Option<AccountHandle> {
        self.accounts.get(account_id).cloned()
    }

    /// Runs `f` on the account while holding its lock.
    pub fn with_account<R>(
        &self,
        account_id: &str,
        f: impl FnOnce(&mut EscrowAccount) -> R,
    ) -> Result<R, RegistryError> {
        let handle = self.handle(account_id)?;
        let mut account = lock(&handle);
        Ok(f(&mut account))
    }

    /// Creates and funds a new escrow account. Anyone may call this; the
    /// caller only supplies the funding.
    pub fn create_account(
        &mut self,
        caller: &str,
        receiver: &str,
        description: &str,
        funding: Amount,
    ) -> Result<Address, RegistryError> {
        let marker = self.sequence + 1;
        let account_id = derive_account_address(&self.address, marker);
        let account = EscrowAccount::new(
            account_id.clone(),
            receiver.to_string(),
            description,
            funding,
            self.address.clone(),
        );
        self.sequence = marker;
        self.accounts
            .insert(account_id.clone(), Arc::new(Mutex::new(account)));
        self.order.push(account_id.clone());
        tracing::info!(
            account = %account_id,
            creator = caller,
            receiver,
            funding = %funding,
            marker,
            "escrow account created"
        );
        self.events.push(RegistryEvent::Created {
            account_id: account_id.clone(),
            marker,
        });
        Ok(account_id)
    }

    /// Pays `amount` out of `account_id` to its receiver. The account stays
    /// locked from the balance check through the payout.
    pub fn release(&self, caller: &str, account_id: &str, amount: Amount) -> Result<(), RegistryError> {
        self.ownership
            .ensure_owner(caller)
            .map_err(|_| RegistryError::WithdrawOnlyOwner {
                caller: caller.to_string(),
            })?;
        let handle = self.handle(account_id)?;
        let mut account = lock(&handle);
        if amount > account.balance() {
            return Err(RegistryError::WithdrawMax {
                available: account.balance(),
                requested: amount,
            });
        }
        account.send_help(&self.address, amount)?;
        Ok(())
    }

    pub fn update_description(
        &self,
        caller: &str,
        account_id: &str,
        description: &str,
    ) -> Result<(), RegistryError> {
        self.ownership
            .ensure_owner(caller)
            .map_err(|_| RegistryError::UpdateDescriptionOnlyOwner {
                caller: caller.to_string(),
            })?;
        let handle = self.handle(account_id)?;
        let mut account = lock(&handle);
        account.update_description(&self.address, description)?;
        Ok(())
    }

    pub fn transfer_ownership(&mut self, caller: &str, new_admin: &str) -> Result<(), RegistryError> {
        let event = self.ownership.transfer(caller, new_admin)?;
        tracing::info!(previous = ?event.previous, new = ?event.new, "registry ownership transferred");
        self.events.push(RegistryEvent::OwnershipTransferred(event));
        Ok(())
    }

    pub fn renounce_ownership(&mut self, caller: &str) -> Result<(), RegistryError> {
        let event = self.ownership.renounce(caller)?;
        tracing::info!(previous = ?event.previous, "registry ownership renounced");
        self.events.push(RegistryEvent::OwnershipTransferred(event));
        Ok(())
    }

    /// Snapshots of every account, in creation order.
    pub fn snapshots(&self) -> Vec<EscrowSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.accounts.get(id))
            .map(|handle| lock(handle).snapshot())
            .collect()
    }

    fn handle(&self, account_id: &str) -> Result<AccountHandle, RegistryError> {
        self.account(account_id)
            .ok_or_else(|| RegistryError::UnknownAccount(account_id.to_string()))
    }
}

/// Deterministic 20-byte hex address for the `marker`-th account of a registry.
pub fn derive_account_address(registry: &str, marker: u64) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(b"escrow-account");
    hasher.update((registry.len() as u64).to_le_bytes());
    hasher.update(registry.as_bytes());
    hasher.update(marker.to_le_bytes());
    let digest = hasher.finalize();
    format!("0x{}", hex::encode(&digest[..20]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: Amount = 1_000_000_000_000_000_000;
    const RECEIVER: &str = "0x1234567890123456789012345678901234567890";

    fn registry_with_account() -> (EscrowRegistry, Address) {
        let mut registry = EscrowRegistry::new("0xfundmanager".into(), "deployer".into());
        let id = registry
            .create_account("deployer", RECEIVER, "Test Foundation", ONE)
            .unwrap();
        (registry, id)
    }

    #[test]
    fn create_account_registers_and_emits_created() {
        let (registry, id) = registry_with_account();
        assert_eq!(
            registry.events(),
            &[RegistryEvent::Created {
                account_id: id.clone(),
                marker: 1,
            }]
        );
        assert_eq!(registry.account_ids(), [id.clone()]);
        registry
            .with_account(&id, |account| {
                assert_eq!(account.description(), "Test Foundation");
                assert_eq!(account.receiver(), RECEIVER);
                assert_eq!(account.balance(), ONE);
                assert_eq!(account.owner().map(String::as_str), Some("0xfundmanager"));
            })
            .unwrap();
    }

    #[test]
    fn account_addresses_are_distinct_and_deterministic() {
        let (mut registry, first) = registry_with_account();
        let second = registry.create_account("anyone", RECEIVER, "Other", 0).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, derive_account_address("0xfundmanager", 1));
        assert_eq!(second, derive_account_address("0xfundmanager", 2));
        assert_eq!(first.len(), 42);
        assert!(first.starts_with("0x"));
    }

    #[test]
    fn release_checks_admin_then_balance() {
        let (registry, id) = registry_with_account();
        assert_eq!(
            registry.release("fake", &id, 1_000_000_000_000),
            Err(RegistryError::WithdrawOnlyOwner {
                caller: "fake".into()
            })
        );
        assert_eq!(
            registry.release("deployer", &id, 2 * ONE),
            Err(RegistryError::WithdrawMax {
                available: ONE,
                requested: 2 * ONE,
            })
        );
        registry.release("deployer", &id, ONE).unwrap();
        registry
            .with_account(&id, |account| {
                assert_eq!(account.balance(), 0);
                assert_eq!(account.total_released(), ONE);
            })
            .unwrap();
    }

    #[test]
    fn release_does_not_touch_donation_record() {
        let (registry, id) = registry_with_account();
        let handle = registry.account(&id).unwrap();
        lock(&handle).donate("donor", ONE).unwrap();
        registry.release("deployer", &id, 2 * ONE).unwrap();
        let account = lock(&handle);
        assert_eq!(account.balance(), 0);
        assert_eq!(account.sum_of_donations(), 2 * ONE);
        assert_eq!(account.payments("donor"), ONE);
    }

    #[test]
    fn update_description_requires_registry_admin() {
        let (registry, id) = registry_with_account();
        assert_eq!(
            registry.update_description("fake", &id, "hi"),
            Err(RegistryError::UpdateDescriptionOnlyOwner {
                caller: "fake".into()
            })
        );
        registry.update_description("deployer", &id, "hello world").unwrap();
        registry
            .with_account(&id, |account| assert_eq!(account.description(), "hello world"))
            .unwrap();
    }

    #[test]
    fn registry_admin_cannot_bypass_account_check() {
        let (registry, id) = registry_with_account();
        let handle = registry.account(&id).unwrap();
        assert!(matches!(
            lock(&handle).send_help("deployer", ONE),
            Err(EscrowError::NotOwner { .. })
        ));
        lock(&handle)
            .transfer_ownership("0xfundmanager", "elsewhere")
            .unwrap();
        assert_eq!(
            registry.release("deployer", &id, ONE),
            Err(RegistryError::Escrow(EscrowError::NotOwner {
                caller: "0xfundmanager".into()
            }))
        );
        assert_eq!(lock(&handle).balance(), ONE);
    }

    #[test]
    fn unknown_account_is_reported() {
        let (registry, _) = registry_with_account();
        assert_eq!(
            registry.release("deployer", "0xmissing", 1),
            Err(RegistryError::UnknownAccount("0xmissing".into()))
        );
    }

    #[test]
    fn admin_check_precedes_account_lookup() {
        let (registry, _) = registry_with_account();
        assert_eq!(
            registry.release("fake", "0xmissing", 1),
            Err(RegistryError::WithdrawOnlyOwner {
                caller: "fake".into()
            })
        );
        assert_eq!(
            registry.update_description("fake", "0xmissing", "hi"),
            Err(RegistryError::UpdateDescriptionOnlyOwner {
                caller: "fake".into()
            })
        );
    }

    #[test]
    fn ownership_calls_report_registry_errors() {
        let (mut registry, _) = registry_with_account();
        assert_eq!(
            registry.transfer_ownership("fake", "fake"),
            Err(RegistryError::OnlyOwner {
                caller: "fake".into()
            })
        );
        assert_eq!(
            registry.transfer_ownership("deployer", crate::ledger::ZERO_ADDRESS),
            Err(RegistryError::ZeroAddress)
        );
        assert_eq!(
            registry.renounce_ownership("fake"),
            Err(RegistryError::OnlyOwner {
                caller: "fake".into()
            })
        );
        assert_eq!(registry.admin().map(String::as_str), Some("deployer"));
        assert!(registry.events().iter().all(|event| matches!(event, RegistryEvent::Created { .. })));
    }

    #[test]
    fn transferred_admin_controls_releases() {
        let (mut registry, id) = registry_with_account();
        registry.transfer_ownership("deployer", "treasurer").unwrap();
        assert!(registry.release("deployer", &id, 1).is_err());
        registry.release("treasurer", &id, 1).unwrap();
        registry.renounce_ownership("treasurer").unwrap();
        assert!(registry.release("treasurer", &id, 1).is_err());
        assert_eq!(registry.admin(), None);
    }

    #[test]
    fn concurrent_donations_and_releases_stay_consistent() {
        let (registry, id) = registry_with_account();
        let registry = Arc::new(registry);
        let donors: Vec<_> = (0..4)
            .map(|i| {
                let handle = registry.account(&id).unwrap();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        lock(&handle).donate(&format!("donor{i}"), 10).unwrap();
                    }
                })
            })
            .collect();
        let releaser = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    registry.release("deployer", &id, 5).unwrap();
                }
            })
        };
        for handle in donors {
            handle.join().unwrap();
        }
        releaser.join().unwrap();
        registry
            .with_account(&id, |account| {
                assert_eq!(account.sum_of_donations(), ONE + 2_000);
                assert_eq!(account.total_released(), 250);
                assert_eq!(account.balance(), ONE + 2_000 - 250);
                assert_eq!(account.donators().len(), 4);
            })
            .unwrap();
    }
}
