use crate::{
    build::{BuildStep, CommandBuildStep, NoopBuildStep},
    builder::{EncodedCall, TxBuilder},
    dispatch::{Dispatcher, TxOutput, TxResult},
};
use alloy_dyn_abi::DecodedEvent;
use alloy_primitives::{Address, B256, U256};
use scfuzz_common::{ArtifactStore, Contract, ContractDirectory, HarnessError, Result, RpcClient};
use scfuzz_config::{HarnessConfig, OracleConfig};
use scfuzz_evm_core::DisassemblyCache;
use scfuzz_evm_coverage::{CoverageTracker, RecordSummary};
use scfuzz_evm_fuzz::{
    BugKind, BugOracle, CallTarget, InspectContext, Observation, Reentrancy, StepFeedback,
    Target, TxIntent,
};
use scfuzz_evm_traces::{StructLog, TraceOptions, TraceReader, annotate};
use scfuzz_node::{ChainProcess, NetworkDescriptor, NodeStatus};
use scfuzz_wallets::AccountDirectory;
use std::collections::BTreeSet;

/// One fuzzing target: a node, the contracts deployed on it and everything learned about them.
///
/// Harnesses share no global state; several can run side by side on distinct ports.
#[derive(Debug)]
pub struct Harness {
    config: HarnessConfig,
    /// `None` when attached to a node given by `rpc.url`.
    node: Option<ChainProcess>,
    client: RpcClient,
    dispatcher: Dispatcher,
    build_step: Box<dyn BuildStep>,
    disassembly: DisassemblyCache,
    contracts: Option<ContractDirectory>,
    accounts: Option<AccountDirectory>,
    coverage: CoverageTracker,
    oracle: BugOracle,
    step: u64,
    episode: u64,
    episode_step: u64,
    last: Option<StepFeedback>,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let (node, client) = match &config.rpc.url {
            Some(url) => (None, RpcClient::from_str_url(url)?),
            None => {
                let node = ChainProcess::new(config.node.clone())?;
                let client = RpcClient::new(node.endpoint());
                (Some(node), client)
            }
        };
        let client = client.with_timeout(config.rpc.request_timeout());

        let options = TraceOptions {
            disable_storage: config.trace.disable_storage,
            disable_stack: config.trace.disable_stack,
            disable_memory: config.trace.disable_memory,
            enable_memory: !config.trace.disable_memory,
        };
        let traces = TraceReader::new(client.clone())
            .with_timeout(config.trace.timeout())
            .with_options(options);
        let dispatcher = Dispatcher::new(client.clone())
            .with_traces(traces)
            .with_receipt_timeout(config.rpc.receipt_timeout())
            .with_poll_interval(config.rpc.poll_interval())
            .with_gas_limit(config.rpc.tx_gas_limit);

        let build_step: Box<dyn BuildStep> = if config.build.enabled {
            Box::new(CommandBuildStep::from_config(&config.build, &config.project))
        } else {
            Box::new(NoopBuildStep)
        };
        let oracle = oracle_from_config(&config.oracle)?;

        Ok(Self {
            config,
            node,
            client,
            dispatcher,
            build_step,
            disassembly: DisassemblyCache::default(),
            contracts: None,
            accounts: None,
            coverage: CoverageTracker::new(),
            oracle,
            step: 0,
            episode: 0,
            episode_step: 0,
            last: None,
        })
    }

    /// Replaces the configured build step.
    pub fn with_build_step(mut self, step: impl BuildStep + 'static) -> Self {
        self.build_step = Box::new(step);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The contracts found by the last [`Self::discover`].
    pub fn contracts(&self) -> Option<&ContractDirectory> {
        self.contracts.as_ref()
    }

    pub fn coverage(&self) -> &CoverageTracker {
        &self.coverage
    }

    pub fn oracle(&self) -> &BugOracle {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut BugOracle {
        &mut self.oracle
    }

    /// Steps taken so far.
    pub fn steps(&self) -> u64 {
        self.step
    }

    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Where the build step finds the node.
    pub fn network(&self) -> NetworkDescriptor {
        match &self.node {
            Some(node) => node.network(),
            None => {
                let url = self.client.url();
                NetworkDescriptor {
                    host: url.host_str().unwrap_or("127.0.0.1").to_string(),
                    port: url.port_or_known_default().unwrap_or(8545),
                    network_id: self.config.node.network_id,
                }
            }
        }
    }

    /// State of the owned node, `None` when attached to an external one.
    pub async fn node_status(&mut self) -> Option<NodeStatus> {
        match &mut self.node {
            Some(node) => Some(node.status().await),
            None => None,
        }
    }

    /// Starts the node and runs the build step against it.
    ///
    /// Everything learned about a previous chain is dropped.
    pub async fn init(&mut self) -> Result<()> {
        if let Some(node) = &mut self.node {
            node.start().await?;
        }
        self.contracts = None;
        self.accounts = None;
        self.coverage = CoverageTracker::new();
        let network = self.network();
        self.build_step.run(&self.config.project, &network)?;
        info!(endpoint = %self.client.url(), "harness initialized");
        Ok(())
    }

    /// Loads the artifacts and finds every deployed contract; later calls reuse the result.
    pub async fn discover(&mut self) -> Result<&ContractDirectory> {
        let directory = match self.contracts.take() {
            Some(directory) => directory,
            None => {
                let store = ArtifactStore::load(self.config.build_dir())?;
                let directory =
                    ContractDirectory::discover(&self.client, &store, &mut self.disassembly)
                        .await?;
                for contract in &directory {
                    self.coverage.register(contract);
                }
                directory
            }
        };
        Ok(&*self.contracts.insert(directory))
    }

    /// The node's accounts, derived on first use.
    pub async fn accounts(&mut self) -> Result<&AccountDirectory> {
        Ok(&*self.accounts_mut().await?)
    }

    async fn accounts_mut(&mut self) -> Result<&mut AccountDirectory> {
        let accounts = match self.accounts.take() {
            Some(accounts) => accounts,
            None => AccountDirectory::derive(
                &self.client,
                &self.config.node.mnemonic,
                self.config.accounts.count,
                &self.config.accounts.derivation_path,
            )
            .await?
            .with_set_balance_method(self.config.set_balance_method()),
        };
        Ok(self.accounts.insert(accounts))
    }

    /// Executes one intent.
    ///
    /// selector call, which is always traced. Traced transactions feed coverage and the oracle.
    /// selector probe, which is always traced. Traced transactions feed coverage and the oracle.
    pub async fn call(&mut self, intent: &TxIntent) -> Result<TxResult> {
        Ok(self.execute(intent).await?.0)
    }

    /// Like [`Self::call`], and reports what the step discovered.
    pub async fn step(&mut self, intent: &TxIntent) -> Result<(TxResult, StepFeedback)> {
        let mut intent = intent.clone();
        intent.trace |= self.config.trace.enabled;
        self.step += 1;
        self.episode_step += 1;

        let (result, summary, bugs) = match self.execute(&intent).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.last = None;
                return Err(err);
            }
        };
        let feedback = StepFeedback {
            success: result.success,
            probe: result.probe,
            new_instructions: summary.new_instructions,
            new_blocks: summary.new_blocks,
            bugs,
        };
        self.last = Some(feedback.clone());
        Ok((result, feedback))
    }

    async fn execute(
        &mut self,
        intent: &TxIntent,
    ) -> Result<(TxResult, RecordSummary, BTreeSet<BugKind>)> {
        let contract = self
            .discover()
            .await?
            .by_address(intent.target)
            .cloned()
            .ok_or(HarnessError::UnknownContract { contract: intent.target })?;

        let name = match &intent.call {
            CallTarget::Function(name) => name,
            CallTarget::Event(name) => {
                let events = self.dispatcher.events(&contract, name, intent.tx_hash).await?;
                let result = TxResult {
                    success: true,
                    tx_hash: intent.tx_hash,
                    output: TxOutput::Events(events),
                    ..Default::default()
                };
                return Ok((result, RecordSummary::default(), BTreeSet::new()));
            }
        };

        let call = match TxBuilder::build(&contract, name, &intent.args) {
            Ok(call) => call,
            Err(
                err @ (HarnessError::MethodNotFound { .. } | HarnessError::UnknownContract { .. }),
            ) => {
                debug!(%err, contract = %contract, "sending probe");
                TxBuilder::probe(&contract)
            }
            Err(err) => return Err(err),
        };
        // invalid selector calls are only useful traced
        let trace = intent.trace || call.is_probe();
        let result = self.dispatcher.dispatch(&call, intent.sender, intent.value, trace).await?;

        let (summary, bugs) = match &result.trace {
            Some(steps) => self.observe(&contract, &call, intent.sender, &result, steps),
            None => Default::default(),
        };
        Ok((result, summary, bugs))
    }

    /// Feeds a trace to coverage and the oracle.
    fn observe(
        &mut self,
        contract: &Contract,
        call: &EncodedCall,
        sender: Address,
        result: &TxResult,
        steps: &[StructLog],
    ) -> (RecordSummary, BTreeSet<BugKind>) {
        let frames = annotate(steps, contract.address);
        let summary =
            self.coverage.record_frames(contract.address, call.signature(), steps, &frames);

        let deployer = self
            .accounts
            .as_ref()
            .and_then(AccountDirectory::deployer)
            .map_or(contract.creator, |account| account.address);
        let ctx = InspectContext {
            target: contract.address,
            contract: &call.contract,
            method: call.method_name(),
            sender,
            creator: contract.creator,
            deployer,
            success: result.success,
            tx_hash: result.tx_hash,
            steps,
            frames: &frames,
        };
        let bugs = self.oracle.inspect(&ctx);
        (summary, bugs)
    }

    /// Decodes the `name` events of the contract at `target`.
    pub async fn events(
        &mut self,
        target: Address,
        name: &str,
        tx_hash: Option<B256>,
    ) -> Result<Vec<DecodedEvent>> {
        let contract = self
            .discover()
            .await?
            .by_address(target)
            .cloned()
            .ok_or(HarnessError::UnknownContract { contract: target })?;
        self.dispatcher.events(&contract, name, tx_hash).await
    }

    /// The struct logs of a mined transaction.
    pub async fn trace(&self, hash: B256) -> Result<Vec<StructLog>> {
        self.dispatcher.traces().trace(hash, None).await
    }

    /// Sets the balance of `address` through the node's privileged method.
    pub async fn set_balance(&mut self, address: Address, wei: U256) -> Result<()> {
        self.accounts_mut().await?.set_balance(address, wei).await
    }

    /// What the strategy sees before choosing the next transaction.
    ///
    /// Drains the bugs found since the previous observation into `new_bugs`.
    pub fn observation(&mut self) -> Observation {
        let targets = self
            .contracts
            .iter()
            .flat_map(ContractDirectory::known)
            .filter_map(|c| {
                Some(Target { address: c.address, name: c.label(), abi: c.abi.clone()? })
            })
            .collect();
        let senders = self
            .accounts
            .as_ref()
            .map(|a| a.addresses().into_iter().take(2).collect())
            .unwrap_or_default();
        Observation {
            step: self.step,
            episode: self.episode,
            episode_step: self.episode_step,
            targets,
            senders,
            coverage: self.coverage.snapshot(),
            bugs: self.oracle.records().cloned().collect(),
            new_bugs: self.oracle.take_new(),
            last: self.last.clone(),
        }
    }

    /// Starts a new episode: episode coverage is zeroed, cumulative coverage is kept.
    pub fn reset_episode(&mut self) {
        self.coverage.reset_all_episodes();
        self.episode += 1;
        self.episode_step = 0;
        debug!(episode = self.episode, step = self.step, "new episode");
    }

    /// Stops the node if this harness started it.
    pub async fn teardown(&mut self) -> Result<()> {
        if let Some(node) = &mut self.node {
            node.stop(false).await?;
        }
        info!(steps = self.step, bugs = self.oracle.records().count(), "harness torn down");
        Ok(())
    }
}

/// An oracle running the configured bug kinds.
fn oracle_from_config(config: &OracleConfig) -> Result<BugOracle> {
    let kinds = config
        .kinds
        .iter()
        .map(|kind| {
            kind.parse::<BugKind>().map_err(|e| HarnessError::InvalidProject(e.to_string()))
        })
        .collect::<Result<BTreeSet<_>>>()?;
    let mut oracle =
        BugOracle::with_kinds(kinds.iter().copied().filter(|k| *k != BugKind::Reentrancy));
    if kinds.contains(&BugKind::Reentrancy) {
        oracle.add_detector(Box::new(Reentrancy { stipend: config.call_stipend }));
    }
    Ok(oracle)
}
