//! Compiling and migrating the project onto a fresh node.

use scfuzz_common::{HarnessError, Result};
use scfuzz_config::BuildConfig;
use scfuzz_node::NetworkDescriptor;
use std::{
    fmt,
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Prepares the contracts on a running node.
pub trait BuildStep: fmt::Debug + Send + Sync {
    fn run(&self, project: &Path, network: &NetworkDescriptor) -> Result<()>;
}

/// For chains that are already migrated.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBuildStep;

impl BuildStep for NoopBuildStep {
    fn run(&self, project: &Path, _network: &NetworkDescriptor) -> Result<()> {
        debug!(project = %project.display(), "skipping build step");
        Ok(())
    }
}

/// Runs shell-free commands in the project directory, one after another.
///
/// The node address is exported as `SCFUZZ_HOST`, `SCFUZZ_PORT` and `SCFUZZ_NETWORK_ID` (`*`
/// when any id is accepted) so the migration config can pick it up. With a `network` name the
/// truffle config is first given that network, see [`inject_network_config`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandBuildStep {
    pub commands: Vec<String>,
    /// Output of command `i` goes to `<log_dir>/<program>-<i>.log`; inherited when `None`.
    pub log_dir: Option<PathBuf>,
    pub network: Option<String>,
}

impl CommandBuildStep {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands, log_dir: None, network: None }
    }

    /// The configured commands; a relative log directory is resolved against `project`.
    pub fn from_config(config: &BuildConfig, project: &Path) -> Self {
        let log_dir = if config.log_dir.is_absolute() {
            config.log_dir.clone()
        } else {
            project.join(&config.log_dir)
        };
        Self {
            commands: config.resolved_commands(),
            log_dir: Some(log_dir),
            network: config.inject_network.then(|| config.network.clone()),
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_network(mut self, name: impl Into<String>) -> Self {
        self.network = Some(name.into());
        self
    }

    fn run_one(
        &self,
        index: usize,
        command: &str,
        project: &Path,
        network: &NetworkDescriptor,
    ) -> Result<()> {
        let failed = |reason: String| HarnessError::BuildFailed {
            command: command.to_string(),
            reason,
        };
        let mut words = command.split_whitespace();
        let Some(program) = words.next() else {
            return Ok(());
        };

        let mut cmd = Command::new(program);
        cmd.args(words)
            .current_dir(project)
            .stdin(Stdio::null())
            .env("SCFUZZ_HOST", &network.host)
            .env("SCFUZZ_PORT", network.port.to_string())
            .env(
                "SCFUZZ_NETWORK_ID",
                network.network_id.map_or_else(|| "*".to_string(), |id| id.to_string()),
            );
        if let Some(dir) = &self.log_dir {
            fs::create_dir_all(dir).map_err(|e| failed(format!("{}: {e}", dir.display())))?;
            let name = Path::new(program).file_name().map_or_else(
                || "build".to_string(),
                |n| n.to_string_lossy().into_owned(),
            );
            let path = dir.join(format!("{name}-{index}.log"));
            let log = File::create(&path).map_err(|e| failed(format!("{}: {e}", path.display())))?;
            let err_log = log.try_clone().map_err(|e| failed(e.to_string()))?;
            cmd.stdout(log).stderr(err_log);
        }

        info!(command, project = %project.display(), "running build step");
        let status = cmd.status().map_err(|e| failed(e.to_string()))?;
        if !status.success() {
            return Err(failed(status.to_string()));
        }
        Ok(())
    }
}

impl BuildStep for CommandBuildStep {
    fn run(&self, project: &Path, network: &NetworkDescriptor) -> Result<()> {
        if !project.is_dir() {
            return Err(HarnessError::InvalidProject(format!(
                "{} is not a directory",
                project.display()
            )));
        }
        match &self.network {
            Some(name) => {
                inject_network_config(project, name, network)?;
            }
            None if !is_truffle_project(project) => {
                warn!(project = %project.display(), "no truffle config found");
            }
            None => {}
        }
        for (index, command) in self.commands.iter().enumerate() {
            self.run_one(index, command, project, network)?;
        }
        Ok(())
    }
}

const TRUFFLE_CONFIGS: [&str; 2] = ["truffle-config.js", "truffle.js"];
const BEGIN_MARKER: &str = "/*---BEGIN-FUZZING-CONFIG---*/";
const END_MARKER: &str = "/*---END-FUZZING-CONFIG---*/";

/// Whether `path` holds a truffle configuration file.
pub fn is_truffle_project(path: &Path) -> bool {
    truffle_config(path).is_some()
}

fn truffle_config(project: &Path) -> Option<PathBuf> {
    TRUFFLE_CONFIGS.iter().map(|f| project.join(f)).find(|p| p.is_file())
}

/// The block appended to a truffle config that adds the `name` network.
pub fn network_config_block(name: &str, network: &NetworkDescriptor) -> String {
    let id = network.network_id.map_or_else(|| "*".to_string(), |id| id.to_string());
    format!(
        "{BEGIN_MARKER}\n\
         const config = module.exports;\n\
         config.networks = config.networks || {{}};\n\
         config.networks.{name} = {{\n    \
         host: \"{host}\",\n    \
         port: {port},\n    \
         network_id: \"{id}\",\n\
         }};\n\
         module.exports = config;\n\
         {END_MARKER}",
        host = network.host,
        port = network.port,
    )
}

/// Points the `name` network of the project's truffle config at `network`.
///
/// A block written by an earlier run is replaced in place, otherwise the block is appended. The
/// file is left untouched when it already has the expected block. Returns the config path.
pub fn inject_network_config(
    project: &Path,
    name: &str,
    network: &NetworkDescriptor,
) -> Result<PathBuf> {
    let path = truffle_config(project).ok_or_else(|| {
        HarnessError::InvalidProject(format!("no truffle config in {}", project.display()))
    })?;
    let io_err = |e: std::io::Error| {
        HarnessError::InvalidProject(format!("{}: {e}", path.display()))
    };
    let content = fs::read_to_string(&path).map_err(io_err)?;
    let block = network_config_block(name, network);

    let existing = content.find(BEGIN_MARKER).and_then(|start| {
        let end = content[start..].find(END_MARKER)? + start + END_MARKER.len();
        Some(start..end)
    });
    let updated = match existing {
        Some(range) if content[range.clone()] == block => {
            debug!(config = %path.display(), "fuzzing network already configured");
            return Ok(path);
        }
        Some(range) => {
            let mut updated = content;
            updated.replace_range(range, &block);
            updated
        }
        None => format!("{content}\n\n\n{block}"),
    };
    fs::write(&path, updated).map_err(io_err)?;
    info!(config = %path.display(), network = name, "configured fuzzing network");
    Ok(path)
}
