use scfuzz_config::{NodeConfig, NodeKind};

/// The command line of the configured node, without the program.
///
/// Ganache 7 takes namespaced flags, anvil takes flat ones. `extra_args` are appended last so
/// they can override anything set here.
pub fn node_args(config: &NodeConfig) -> Vec<String> {
    let mut args = Vec::new();
    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        args.push(value);
    };
    match config.kind {
        NodeKind::Ganache => {
            push("--server.host", config.host.clone());
            push("--server.port", config.port.to_string());
            push("--wallet.mnemonic", config.mnemonic.clone());
            push("--wallet.totalAccounts", config.accounts.to_string());
            push("--wallet.defaultBalance", config.balance.to_string());
            if let Some(id) = config.network_id {
                push("--chain.networkId", id.to_string());
            }
        }
        NodeKind::Anvil => {
            push("--host", config.host.clone());
            push("--port", config.port.to_string());
            push("--mnemonic", config.mnemonic.clone());
            push("--accounts", config.accounts.to_string());
            push("--balance", config.balance.to_string());
            if let Some(id) = config.network_id {
                push("--chain-id", id.to_string());
            }
        }
    }
    args.extend(config.extra_args.iter().cloned());
    args
}
