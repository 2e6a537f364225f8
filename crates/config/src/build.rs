use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Placeholder replaced by [`BuildConfig::network`] in build commands.
pub const NETWORK_PLACEHOLDER: &str = "{network}";

/// The compile and migrate commands run against a fresh node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Skip the build when the chain is already migrated.
    pub enabled: bool,
    /// Shell-style commands, run in order in the project directory.
    pub commands: Vec<String>,
    /// Truffle network name the migration targets.
    pub network: String,
    /// Write the `network` entry pointing at the node into the truffle config before building.
    pub inject_network: bool,
    /// Each command logs to `<log_dir>/<program>-<index>.log`.
    pub log_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            commands: vec![
                "truffle compile".to_string(),
                format!("truffle migrate --network {NETWORK_PLACEHOLDER}"),
            ],
            network: "fuzzing".to_string(),
            inject_network: true,
            log_dir: PathBuf::from("var/log"),
        }
    }
}

impl BuildConfig {
    /// The commands with the network name substituted.
    pub fn resolved_commands(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.replace(NETWORK_PLACEHOLDER, &self.network)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_network() {
        let config = BuildConfig { network: "development".into(), ..Default::default() };
        assert_eq!(
            config.resolved_commands(),
            ["truffle compile", "truffle migrate --network development"]
        );
    }
}
