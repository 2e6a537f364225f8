use crate::{args::node_args, kill::kill_listener};
use scfuzz_common::{HarnessError, Result, RpcClient};
use scfuzz_config::{NodeConfig, NodeKind};
use serde::Serialize;
use std::{
    fs::{self, File},
    net::{TcpStream, ToSocketAddrs},
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};
use url::Url;

/// Interval between readiness probes while the node starts.
const READY_POLL: Duration = Duration::from_millis(100);

/// Bound on a single liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Observable state of the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Nothing answers on the configured port.
    Stopped,
    /// Our child is alive and answers RPC.
    Running,
    /// Our child is alive but does not answer RPC.
    Degraded,
    /// A node we did not start answers on the configured port.
    Unmanaged,
}

impl NodeStatus {
    pub fn from_probe(owned_alive: bool, reachable: bool) -> Self {
        match (owned_alive, reachable) {
            (true, true) => Self::Running,
            (true, false) => Self::Degraded,
            (false, true) => Self::Unmanaged,
            (false, false) => Self::Stopped,
        }
    }
}

/// Where the build step finds the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NetworkDescriptor {
    pub host: String,
    pub port: u16,
    /// `None` lets the migration accept any network id.
    pub network_id: Option<u64>,
}

/// A chain node child process.
///
/// At most one node is owned at a time; it is killed when the `ChainProcess` is dropped.
#[derive(Debug)]
pub struct ChainProcess {
    config: NodeConfig,
    endpoint: Url,
    client: RpcClient,
    child: Option<Child>,
}

impl ChainProcess {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint()).map_err(|e| {
            HarnessError::InvalidProject(format!("invalid node address {}: {e}", config.endpoint()))
        })?;
        let client = RpcClient::new(endpoint.clone()).with_timeout(PROBE_TIMEOUT);
        Ok(Self { config, endpoint, client, child: None })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind
    }

    pub fn endpoint(&self) -> Url {
        self.endpoint.clone()
    }

    pub fn network(&self) -> NetworkDescriptor {
        NetworkDescriptor {
            host: self.config.host.clone(),
            port: self.config.port,
            network_id: self.config.network_id,
        }
    }

    /// Id of the owned child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Launches the node and waits until it answers RPC.
    pub async fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            debug!("restarting owned node");
            self.stop(false).await?;
        }
        if self.port_in_use() {
            return Err(self.unmanaged());
        }

        let program = self.config.program().to_string();
        let mut cmd = Command::new(&program);
        cmd.args(node_args(&self.config)).stdin(Stdio::null());
        match &self.config.log_file {
            Some(path) => {
                let spawn_err =
                    |source| HarnessError::NodeSpawn { program: program.clone(), source };
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(spawn_err)?;
                }
                let log = File::create(path).map_err(spawn_err)?;
                let err_log = log.try_clone().map_err(spawn_err)?;
                cmd.stdout(log).stderr(err_log);
            }
            None => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        debug!(?cmd, "spawning node");
        let child = cmd
            .spawn()
            .map_err(|source| HarnessError::NodeSpawn { program: program.clone(), source })?;
        info!(
            kind = %self.config.kind,
            pid = child.id(),
            endpoint = %self.endpoint,
            "node spawned"
        );
        self.child = Some(child);

        if let Err(err) = self.wait_until_ready().await {
            self.kill_child();
            return Err(err);
        }
        info!(endpoint = %self.endpoint, "node ready");
        Ok(())
    }

    async fn wait_until_ready(&mut self) -> Result<()> {
        let timeout = self.config.startup_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(child) = &mut self.child {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        self.child = None;
                        return Err(HarnessError::NodeExited { status: status.to_string() });
                    }
                    Ok(None) => {}
                    Err(err) => return Err(HarnessError::NodeExited { status: err.to_string() }),
                }
            }
            if self.client.is_reachable().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::timeout("node startup", timeout));
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    pub async fn status(&mut self) -> NodeStatus {
        let owned_alive = self.owned_alive();
        let reachable = self.client.is_reachable().await;
        NodeStatus::from_probe(owned_alive, reachable)
    }

    pub async fn is_running(&mut self) -> bool {
        self.status().await == NodeStatus::Running
    }

    /// Stops the node.
    ///
    /// An owned child is killed and reaped. A node we did not start is only killed with
    /// `force_stop`, otherwise [`HarnessError::AlreadyRunningUnmanaged`] is returned. Stopping
    /// when nothing runs is a no-op.
    pub async fn stop(&mut self, force_stop: bool) -> Result<()> {
        if self.child.is_some() {
            self.kill_child();
            return Ok(());
        }
        if !self.port_in_use() {
            trace!(port = self.config.port, "no node to stop");
            return Ok(());
        }
        if !force_stop {
            return Err(self.unmanaged());
        }
        kill_listener(self.config.port)?;

        let deadline = Instant::now() + self.config.startup_timeout();
        while self.port_in_use() {
            if Instant::now() >= deadline {
                return Err(HarnessError::NodeStop {
                    port: self.config.port,
                    reason: "port still in use after kill".to_string(),
                });
            }
            tokio::time::sleep(READY_POLL).await;
        }
        Ok(())
    }

    fn owned_alive(&mut self) -> bool {
        let alive = self.child.as_mut().is_some_and(|c| matches!(c.try_wait(), Ok(None)));
        if !alive && self.child.take().is_some() {
            warn!(endpoint = %self.endpoint, "owned node exited");
        }
        alive
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            if let Err(err) = child.kill() {
                // already exited
                trace!(pid, %err, "kill failed");
            }
            match child.wait() {
                Ok(status) => info!(pid, %status, "node stopped"),
                Err(err) => warn!(pid, %err, "failed to reap node"),
            }
        }
    }

    /// Whether anything accepts TCP connections on the configured address.
    fn port_in_use(&self) -> bool {
        let Ok(addrs) = (self.config.host.as_str(), self.config.port).to_socket_addrs() else {
            return false;
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_ok())
    }

    fn unmanaged(&self) -> HarnessError {
        HarnessError::AlreadyRunningUnmanaged {
            host: self.config.host.clone(),
            port: self.config.port,
        }
    }
}

impl Drop for ChainProcess {
    fn drop(&mut self) {
        self.kill_child();
    }
}
