use serde::{Deserialize, Serialize};

use crate::ledger::{is_zero_address, Address};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("caller {caller} is not the owner")]
    NotOwner { caller: Address },
    #[error("new owner is the zero address")]
    ZeroOwner,
}

/// Emitted whenever the administrator identity changes. `new` is `None`
/// after a renounce.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnershipTransferred {
    pub previous: Option<Address>,
    pub new: Option<Address>,
}

/// Stored administrator identity compared on every privileged entry point.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ownership {
    owner: Option<Address>,
}

impl Ownership {
    pub fn new(owner: Address) -> Self {
        Self { owner: Some(owner) }
    }

    pub fn owner(&self) -> Option<&Address> {
        self.owner.as_ref()
    }

    pub fn is_owner(&self, caller: &str) -> bool {
        self.owner.as_deref() == Some(caller)
    }

    pub fn ensure_owner(&self, caller: &str) -> Result<(), AccessError> {
        if self.is_owner(caller) {
            Ok(())
        } else {
            tracing::warn!(caller, owner = ?self.owner, "privileged call rejected");
            Err(AccessError::NotOwner {
                caller: caller.to_string(),
            })
        }
    }

    pub fn transfer(
        &mut self,
        caller: &str,
        new_owner: &str,
    ) -> Result<OwnershipTransferred, AccessError> {
        self.ensure_owner(caller)?;
        if is_zero_address(new_owner) {
            return Err(AccessError::ZeroOwner);
        }
        let previous = self.owner.replace(new_owner.to_string());
        Ok(OwnershipTransferred {
            previous,
            new: self.owner.clone(),
        })
    }

    /// Leaves the component without an administrator; every privileged call
    /// fails afterwards.
    pub fn renounce(&mut self, caller: &str) -> Result<OwnershipTransferred, AccessError> {
        self.ensure_owner(caller)?;
        Ok(OwnershipTransferred {
            previous: self.owner.take(),
            new: None,
        })
    }
}
