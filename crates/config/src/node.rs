use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

/// Mnemonic the node derives its accounts from.
pub const DEFAULT_MNEMONIC: &str =
    "candy maple cake sugar pudding cream honey rich smooth crumble sweet treat";

/// The chain node implementation to launch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Ganache,
    Anvil,
}

impl NodeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ganache => "ganache",
            Self::Anvil => "anvil",
        }
    }

    /// The binary looked up in `PATH` when no program is configured.
    pub const fn default_program(&self) -> &'static str {
        self.as_str()
    }

    /// The privileged RPC method that overwrites an account balance.
    pub const fn set_balance_method(&self) -> &'static str {
        match self {
            Self::Ganache => "evm_setAccountBalance",
            Self::Anvil => "anvil_setBalance",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ganache" | "ganache-cli" => Ok(Self::Ganache),
            "anvil" => Ok(Self::Anvil),
            _ => Err(format!("unknown node kind `{s}`, expected `ganache` or `anvil`")),
        }
    }
}

/// How the chain node is launched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub kind: NodeKind,
    /// Path or name of the node binary, [`NodeKind::default_program`] if unset.
    pub program: Option<String>,
    pub host: String,
    pub port: u16,
    /// Network id (ganache) or chain id (anvil), the node's default if unset.
    pub network_id: Option<u64>,
    pub mnemonic: String,
    /// Number of accounts the node unlocks.
    pub accounts: usize,
    /// Initial balance of every account, in ether.
    pub balance: u64,
    /// Appended verbatim to the node's command line.
    pub extra_args: Vec<String>,
    /// Node stdout and stderr go here, or to the harness' own output if unset.
    pub log_file: Option<PathBuf>,
    pub startup_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            kind: NodeKind::default(),
            program: None,
            host: "127.0.0.1".to_string(),
            port: 8545,
            network_id: None,
            mnemonic: DEFAULT_MNEMONIC.to_string(),
            accounts: 10,
            balance: 1_000_000_000,
            extra_args: Vec::new(),
            log_file: Some(PathBuf::from("var/log/node.log")),
            startup_timeout_secs: 30,
        }
    }
}

impl NodeConfig {
    pub fn program(&self) -> &str {
        self.program.as_deref().unwrap_or(self.kind.default_program())
    }

    /// `http://<host>:<port>`.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!("Anvil".parse::<NodeKind>().unwrap(), NodeKind::Anvil);
        assert_eq!("ganache-cli".parse::<NodeKind>().unwrap(), NodeKind::Ganache);
        assert!("hardhat".parse::<NodeKind>().is_err());
        assert_eq!(NodeKind::Anvil.set_balance_method(), "anvil_setBalance");
    }

    #[test]
    fn program_defaults_to_kind() {
        let mut config = NodeConfig { kind: NodeKind::Anvil, ..Default::default() };
        assert_eq!(config.program(), "anvil");
        config.program = Some("/opt/bin/anvil".into());
        assert_eq!(config.program(), "/opt/bin/anvil");
        assert_eq!(config.endpoint(), "http://127.0.0.1:8545");
    }
}
