use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ledger::{Address, Amount};
use crate::units::{parse_units, UnitsError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid initial supply: {0}")]
    InitialSupply(#[from] UnitsError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Human units, scaled by `decimals` ("10" with 18 decimals = 10e18).
    pub initial_supply: String,
    pub owner: Address,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: "MyToken".into(),
            symbol: "MTK".into(),
            decimals: 18,
            initial_supply: "10".into(),
            owner: "deployer".into(),
        }
    }
}

impl TokenConfig {
    pub fn initial_supply_units(&self) -> Result<Amount, ConfigError> {
        Ok(parse_units(&self.initial_supply, self.decimals)?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Identity the registry uses as owner of the accounts it creates.
    pub address: Address,
    pub admin: Address,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: "fund-manager".into(),
            admin: "deployer".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SessionConfig {
    pub token: TokenConfig,
    pub registry: RegistryConfig,
}

pub fn load(path: &Path) -> Result<SessionConfig, ConfigError> {
    let raw = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
