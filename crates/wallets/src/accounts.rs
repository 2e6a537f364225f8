use alloy_primitives::{Address, U256};
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use scfuzz_common::{HarnessError, Result, RpcClient};
use scfuzz_config::NodeKind;
use serde::Serialize;

/// An account unlocked on the node.
///
/// Balance and nonce are the last values queried, never authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Account {
    pub index: usize,
    pub address: Address,
    pub balance: Option<U256>,
    pub nonce: Option<u64>,
}

/// Accounts derived from the node's mnemonic, checked against `eth_accounts`.
#[derive(Clone, Debug)]
pub struct AccountDirectory {
    client: RpcClient,
    accounts: Vec<Account>,
    signers: Vec<PrivateKeySigner>,
    set_balance_method: String,
}

impl AccountDirectory {
    /// Derives `count` accounts, all accounts the node reports when `None`.
    ///
    /// Account `i` is derived at `{derivation_path}{i}` and must equal the `i`th address of
    /// `eth_accounts`.
    pub async fn derive(
        client: &RpcClient,
        mnemonic: &str,
        count: Option<usize>,
        derivation_path: &str,
    ) -> Result<Self> {
        let reported = client.accounts().await?;
        let count = count.unwrap_or(reported.len());

        let mut path = derivation_path.to_string();
        if !path.ends_with('/') {
            path.push('/');
        }

        let mut accounts = Vec::with_capacity(count);
        let mut signers = Vec::with_capacity(count);
        for index in 0..count {
            let signer = MnemonicBuilder::<English>::default()
                .phrase(mnemonic)
                .derivation_path(format!("{path}{index}"))
                .and_then(|b| b.build())
                .map_err(|e| HarnessError::InvalidMnemonic(e.to_string()))?;
            let derived = signer.address();
            let on_node = reported.get(index).copied();
            if on_node != Some(derived) {
                return Err(HarnessError::DerivationMismatch { index, derived, reported: on_node });
            }
            accounts.push(Account { index, address: derived, balance: None, nonce: None });
            signers.push(signer);
        }
        debug!(count, node_accounts = reported.len(), "derived accounts");

        Ok(Self {
            client: client.clone(),
            accounts,
            signers,
            set_balance_method: NodeKind::Ganache.set_balance_method().to_string(),
        })
    }

    /// Uses `method` to set balances, `anvil_setBalance` on anvil.
    pub fn with_set_balance_method(mut self, method: impl Into<String>) -> Self {
        self.set_balance_method = method.into();
        self
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(|a| a.address).collect()
    }

    pub fn get(&self, index: usize) -> Option<&Account> {
        self.accounts.get(index)
    }

    pub fn index_of(&self, address: Address) -> Option<usize> {
        self.accounts.iter().position(|a| a.address == address)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Account 0, which deploys the contracts.
    pub fn deployer(&self) -> Option<&Account> {
        self.accounts.first()
    }

    /// Account 1, the unprivileged sender.
    pub fn attacker(&self) -> Option<&Account> {
        self.accounts.get(1)
    }

    /// The private key of account `index`.
    pub fn signer(&self, index: usize) -> Option<&PrivateKeySigner> {
        self.signers.get(index)
    }

    /// Queries the balance of `address` and caches it if the address is ours.
    pub async fn balance_of(&mut self, address: Address) -> Result<U256> {
        let balance = self.client.balance(address).await?;
        if let Some(account) = self.accounts.iter_mut().find(|a| a.address == address) {
            account.balance = Some(balance);
        }
        Ok(balance)
    }

    /// Queries the nonce of `address` and caches it if the address is ours.
    pub async fn nonce_of(&mut self, address: Address) -> Result<u64> {
        let nonce = self.client.nonce(address).await?;
        if let Some(account) = self.accounts.iter_mut().find(|a| a.address == address) {
            account.nonce = Some(nonce);
        }
        Ok(nonce)
    }

    /// Sets the balance of any address through the node's privileged method.
    pub async fn set_balance(&mut self, address: Address, wei: U256) -> Result<()> {
        self.client.set_balance(&self.set_balance_method, address, wei).await?;
        debug!(%address, %wei, method = %self.set_balance_method, "balance set");
        if let Some(account) = self.accounts.iter_mut().find(|a| a.address == address) {
            account.balance = Some(wei);
        }
        Ok(())
    }
}
