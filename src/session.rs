//! Replays serialized operations against one token ledger and one escrow
//! registry.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, SessionConfig};
use crate::escrow::{EscrowError, EscrowEvent, EscrowSnapshot};
use crate::ledger::{Address, Amount, TokenError, TokenEvent, TokenLedger, TokenSnapshot};
use crate::registry::{EscrowRegistry, RegistryError, RegistryEvent};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no escrow account #{0} has been created")]
    UnknownMarker(usize),
}

/// One mutating call with its caller identity.
///
/// `account` fields take either an account address or `#N`, the N-th
/// account created in this session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Transfer {
        caller: Address,
        to: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Approve {
        caller: Address,
        spender: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    TransferFrom {
        caller: Address,
        from: Address,
        to: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    IncreaseAllowance {
        caller: Address,
        spender: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    DecreaseAllowance {
        caller: Address,
        spender: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Mint {
        caller: Address,
        account: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Burn {
        caller: Address,
        account: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    TransferTokenOwnership {
        caller: Address,
        new_owner: Address,
    },
    RenounceTokenOwnership {
        caller: Address,
    },
    CreateAccount {
        caller: Address,
        receiver: Address,
        description: String,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Donate {
        caller: Address,
        account: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    /// Plain value transfer into an account.
    Deposit {
        caller: Address,
        account: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Release {
        caller: Address,
        account: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    UpdateDescription {
        caller: Address,
        account: Address,
        description: String,
    },
    TransferRegistryOwnership {
        caller: Address,
        new_owner: Address,
    },
    RenounceRegistryOwnership {
        caller: Address,
    },
}

impl Step {
    /// The escrow account this step acts on, if any.
    fn account(&self) -> Option<&str> {
        match self {
            Step::Donate { account, .. }
            | Step::Deposit { account, .. }
            | Step::Release { account, .. }
            | Step::UpdateDescription { account, .. } => Some(account.as_str()),
            _ => None,
        }
    }
}

/// Events emitted by a successful step, grouped by component.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StepOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub token_events: Vec<TokenEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub registry_events: Vec<RegistryEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub escrow_events: Vec<EscrowEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Script {
    #[serde(default)]
    pub config: Option<SessionConfig>,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub token: TokenSnapshot,
    pub registry_events: Vec<RegistryEvent>,
    pub accounts: Vec<EscrowSnapshot>,
}

pub struct Session {
    token: TokenLedger,
    registry: EscrowRegistry,
}

impl Session {
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let supply = config.token.initial_supply_units()?;
        let token = TokenLedger::new(
            config.token.name.clone(),
            config.token.symbol.clone(),
            config.token.decimals,
            supply,
            config.token.owner.clone(),
        )?;
        let registry = EscrowRegistry::new(
            config.registry.address.clone(),
            config.registry.admin.clone(),
        );
        tracing::info!(
            token = %config.token.symbol,
            supply = %supply,
            registry = %config.registry.address,
            "session started"
        );
        Ok(Self { token, registry })
    }

    pub fn token(&self) -> &TokenLedger {
        &self.token
    }

    pub fn registry(&self) -> &EscrowRegistry {
        &self.registry
    }

    /// Applies one step. A failed step leaves every component unchanged.
    pub fn apply(&mut self, step: &Step) -> Result<StepOutcome, SessionError> {
        let account = step.account().map(|a| self.resolve(a)).transpose()?;
        let token_mark = self.token.events().len();
        let registry_mark = self.registry.events().len();
        // unknown accounts are reported by dispatch, after the admin checks
        let escrow_mark = account
            .as_deref()
            .and_then(|id| self.registry.with_account(id, |a| a.events().len()).ok())
            .unwrap_or(0);

        let created = self.dispatch(step, account.as_deref())?;

        let escrow_events = match (&created, &account) {
            (None, Some(id)) => self
                .registry
                .with_account(id, |a| a.events()[escrow_mark..].to_vec())?,
            _ => Vec::new(),
        };
        Ok(StepOutcome {
            account: created.or(account),
            token_events: self.token.events()[token_mark..].to_vec(),
            registry_events: self.registry.events()[registry_mark..].to_vec(),
            escrow_events,
        })
    }

    /// Applies every step, continuing past failures.
    pub fn run(&mut self, steps: &[Step]) -> Vec<Result<StepOutcome, SessionError>> {
        steps.iter().map(|step| self.apply(step)).collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            token: self.token.snapshot(),
            registry_events: self.registry.events().to_vec(),
            accounts: self.registry.snapshots(),
        }
    }

    fn dispatch(&mut self, step: &Step, account: Option<&str>) -> Result<Option<Address>, SessionError> {
        let token = &mut self.token;
        let registry = &mut self.registry;
        let account = account.unwrap_or_default();
        match step {
            Step::Transfer { caller, to, amount } => token.transfer(caller, to, *amount)?,
            Step::Approve {
                caller,
                spender,
                amount,
            } => token.approve(caller, spender, *amount)?,
            Step::TransferFrom {
                caller,
                from,
                to,
                amount,
            } => token.transfer_from(caller, from, to, *amount)?,
            Step::IncreaseAllowance {
                caller,
                spender,
                amount,
            } => token.increase_allowance(caller, spender, *amount)?,
            Step::DecreaseAllowance {
                caller,
                spender,
                amount,
            } => token.decrease_allowance(caller, spender, *amount)?,
            Step::Mint {
                caller,
                account,
                amount,
            } => token.mint(caller, account, *amount)?,
            Step::Burn {
                caller,
                account,
                amount,
            } => token.burn(caller, account, *amount)?,
            Step::TransferTokenOwnership { caller, new_owner } => {
                token.transfer_ownership(caller, new_owner)?
            }
            Step::RenounceTokenOwnership { caller } => token.renounce_ownership(caller)?,
            Step::CreateAccount {
                caller,
                receiver,
                description,
                amount,
            } => {
                let id = registry.create_account(caller, receiver, description, *amount)?;
                return Ok(Some(id));
            }
            Step::Donate { caller, amount, .. } => {
                registry.with_account(account, |a| a.donate(caller, *amount))??
            }
            Step::Deposit { caller, amount, .. } => {
                registry.with_account(account, |a| a.deposit(caller, *amount))??
            }
            Step::Release { caller, amount, .. } => registry.release(caller, account, *amount)?,
            Step::UpdateDescription {
                caller,
                description,
                ..
            } => registry.update_description(caller, account, description)?,
            Step::TransferRegistryOwnership { caller, new_owner } => {
                registry.transfer_ownership(caller, new_owner)?
            }
            Step::RenounceRegistryOwnership { caller } => registry.renounce_ownership(caller)?,
        }
        Ok(None)
    }

    fn resolve(&self, reference: &str) -> Result<Address, SessionError> {
        match reference.strip_prefix('#').map(str::parse::<usize>) {
            Some(Ok(index)) => index
                .checked_sub(1)
                .and_then(|i| self.registry.account_ids().get(i))
                .cloned()
                .ok_or(SessionError::UnknownMarker(index)),
            _ => Ok(reference.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: Amount = 1_000_000_000_000_000_000;

    fn session() -> Session {
        Session::new(&SessionConfig::default()).unwrap()
    }

    fn parse(json: &str) -> Vec<Step> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn steps_parse_from_json() {
        let steps = parse(
            r##"[
                {"op": "transfer", "caller": "deployer", "to": "user", "amount": "1000000000000000000"},
                {"op": "donate", "caller": "user", "account": "#1", "amount": 5}
            ]"##,
        );
        assert_eq!(
            steps[0],
            Step::Transfer {
                caller: "deployer".into(),
                to: "user".into(),
                amount: ONE,
            }
        );
        assert_eq!(
            steps[1],
            Step::Donate {
                caller: "user".into(),
                account: "#1".into(),
                amount: 5,
            }
        );
    }

    #[test]
    fn token_step_reports_its_events() {
        let mut session = session();
        let outcome = session
            .apply(&Step::Transfer {
                caller: "deployer".into(),
                to: "user".into(),
                amount: ONE,
            })
            .unwrap();
        assert_eq!(
            outcome.token_events,
            vec![TokenEvent::Transfer {
                from: "deployer".into(),
                to: "user".into(),
                amount: ONE,
            }]
        );
        assert!(outcome.account.is_none());
        assert_eq!(session.token().balance_of("deployer"), 9 * ONE);
    }

    #[test]
    fn escrow_lifecycle_through_markers() {
        let mut session = session();
        let steps = vec![
            Step::CreateAccount {
                caller: "deployer".into(),
                receiver: "0xreceiver".into(),
                description: "Test Foundation".into(),
                amount: ONE,
            },
            Step::Deposit {
                caller: "donor".into(),
                account: "#1".into(),
                amount: ONE,
            },
            Step::Release {
                caller: "fake".into(),
                account: "#1".into(),
                amount: 1,
            },
            Step::Release {
                caller: "deployer".into(),
                account: "#1".into(),
                amount: 2 * ONE,
            },
            Step::Donate {
                caller: "donor".into(),
                account: "#2".into(),
                amount: 1,
            },
        ];
        let results = session.run(&steps);

        let created = results[0].as_ref().unwrap();
        let id = created.account.clone().unwrap();
        assert_eq!(
            created.registry_events,
            vec![RegistryEvent::Created {
                account_id: id.clone(),
                marker: 1,
            }]
        );
        assert!(created.escrow_events.is_empty());

        let deposit = results[1].as_ref().unwrap();
        assert_eq!(deposit.account.as_deref(), Some(id.as_str()));
        assert_eq!(deposit.escrow_events.len(), 2);

        assert!(matches!(
            results[2],
            Err(SessionError::Registry(RegistryError::WithdrawOnlyOwner { .. }))
        ));
        let release = results[3].as_ref().unwrap();
        assert_eq!(
            release.escrow_events,
            vec![EscrowEvent::DonationWithdrawal {
                receiver: "0xreceiver".into(),
                amount: 2 * ONE,
            }]
        );
        assert!(matches!(results[4], Err(SessionError::UnknownMarker(2))));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.accounts.len(), 1);
        assert_eq!(snapshot.accounts[0].balance, 0);
        assert_eq!(snapshot.accounts[0].donators, vec!["donor".to_string()]);
    }

    #[test]
    fn failed_step_changes_nothing() {
        let mut session = session();
        let before = session.snapshot();
        let err = session
            .apply(&Step::Mint {
                caller: "user".into(),
                account: "user".into(),
                amount: 1,
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Token(TokenError::OnlyOwner { .. })));
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn non_admin_on_unknown_account_gets_the_admin_error() {
        let mut session = session();
        let err = session
            .apply(&Step::Release {
                caller: "fake".into(),
                account: "0xmissing".into(),
                amount: 1,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Registry(RegistryError::WithdrawOnlyOwner { ref caller }) if caller == "fake"
        ));
        let err = session
            .apply(&Step::UpdateDescription {
                caller: "fake".into(),
                account: "0xmissing".into(),
                description: "hi".into(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Registry(RegistryError::UpdateDescriptionOnlyOwner { ref caller }) if caller == "fake"
        ));
        let err = session
            .apply(&Step::Donate {
                caller: "user".into(),
                account: "0xmissing".into(),
                amount: 1,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Registry(RegistryError::UnknownAccount(ref id)) if id == "0xmissing"
        ));
    }

    #[test]
    fn script_config_is_optional() {
        let script: Script = serde_json::from_str(r#"{"steps": []}"#).unwrap();
        assert!(script.config.is_none());
        assert!(script.steps.is_empty());
    }
}
