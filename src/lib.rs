//! Accounting cores for token balances and donation escrow.
//!
//! The crate exposes two independent state machines that an embedding
//! application drives with an explicit caller identity on every mutation:
//!
//! * [`ledger`]: a token ledger with balances, allowances and
//!   administrator-gated mint/burn.
//! * [`registry`] and [`escrow`]: a factory of per-campaign escrow accounts
//!   that track donors and pay out to a fixed receiver on the registry
//!   administrator's instruction.
//!
//! [`session`] ties both together behind a serializable step format so a
//! transport (the `fundctl` binary, or an RPC layer) can replay operations
//! without knowing the component APIs.

pub mod access;
pub mod config;
pub mod escrow;
pub mod ledger;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod units;

pub use escrow::{EscrowAccount, EscrowError, EscrowEvent};
pub use ledger::{Address, Amount, TokenError, TokenEvent, TokenLedger, ZERO_ADDRESS};
pub use registry::{EscrowRegistry, RegistryError, RegistryEvent};
pub use session::{Session, SessionError, Step, StepOutcome};
