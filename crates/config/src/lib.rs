//! # scfuzz-config
//!
//! Harness configuration.
//!
//! Values are layered with [`figment`]: built-in defaults, then `scfuzz.toml` in the project
//! root (or the file named by `SCFUZZ_CONFIG`), then `SCFUZZ_*` environment variables. Section
//! keys are addressed in the environment with their section as prefix, e.g.
//! `SCFUZZ_NODE_PORT=9545` sets `node.port`.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod build;
pub use build::{BuildConfig, NETWORK_PLACEHOLDER};

pub mod error;
pub use error::ExtractConfigError;

mod node;
pub use node::{DEFAULT_MNEMONIC, NodeConfig, NodeKind};

mod rpc;
pub use rpc::{RpcConfig, TraceConfig};

mod session;
pub use session::{
    AccountsConfig, DEFAULT_BUG_KINDS, DEFAULT_DERIVATION_PATH, OracleConfig, SessionConfig,
};

// reexport so embedders can merge their own providers
pub use figment;

/// Harness configuration.
///
/// # Defaults
///
/// All configuration values have a default, documented in the [fields](#fields) section. See
/// [`HarnessConfig::figment_with_root`] for how overrides are layered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root of the truffle project under test.
    pub project: PathBuf,
    /// Compiled artifacts, `<project>/build/contracts` if unset.
    pub build_dir: Option<PathBuf>,
    pub node: NodeConfig,
    pub rpc: RpcConfig,
    pub trace: TraceConfig,
    pub build: BuildConfig,
    pub accounts: AccountsConfig,
    pub session: SessionConfig,
    pub oracle: OracleConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            project: PathBuf::from("."),
            build_dir: None,
            node: NodeConfig::default(),
            rpc: RpcConfig::default(),
            trace: TraceConfig::default(),
            build: BuildConfig::default(),
            accounts: AccountsConfig::default(),
            session: SessionConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// The default name of the config file.
    pub const FILE_NAME: &'static str = "scfuzz.toml";

    /// Prefix of the environment variables that override config values.
    pub const ENV_PREFIX: &'static str = "SCFUZZ_";

    /// Names a different config file, relative to the project root.
    pub const CONFIG_ENV: &'static str = "SCFUZZ_CONFIG";

    /// Sections that may be addressed as `SCFUZZ_<SECTION>_<KEY>`.
    pub const SECTIONS: &'static [&'static str] =
        &["node", "rpc", "trace", "build", "accounts", "session", "oracle"];

    /// Defaults for a project rooted at `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self { project: root.as_ref().to_path_buf(), ..Default::default() }
    }

    /// Loads the configuration of the project in the current directory.
    pub fn load() -> Result<Self, ExtractConfigError> {
        Self::load_with_root(".")
    }

    /// Loads the configuration of the project at `root`.
    pub fn load_with_root(root: impl AsRef<Path>) -> Result<Self, ExtractConfigError> {
        Self::try_from(Self::figment_with_root(root))
    }

    /// Attempts to extract a `HarnessConfig` from `provider`.
    ///
    /// ```no_run
    /// use scfuzz_config::{HarnessConfig, figment::providers::{Format, Toml}};
    ///
    /// let figment = HarnessConfig::figment_with_root(".").merge(Toml::file("ci.toml"));
    /// let config = HarnessConfig::try_from(figment)?;
    /// # Ok::<_, scfuzz_config::ExtractConfigError>(())
    /// ```
    pub fn try_from<T: Provider>(provider: T) -> Result<Self, ExtractConfigError> {
        trace!("load config with provider: {:?}", provider.metadata());
        Figment::from(provider).extract::<Self>().map_err(ExtractConfigError::new)
    }

    /// The defaults of `root` merged with its config file and the environment.
    pub fn figment_with_root(root: impl AsRef<Path>) -> Figment {
        let root = root.as_ref();
        let file = std::env::var(Self::CONFIG_ENV)
            .map(|f| root.join(f))
            .unwrap_or_else(|_| root.join(Self::FILE_NAME));
        Figment::from(Self::with_root(root)).merge(Toml::file(file)).merge(Self::env_provider())
    }

    fn env_provider() -> Env {
        Env::prefixed(Self::ENV_PREFIX).ignore(&["CONFIG", "PROFILE"]).map(|key| {
            let key = key.as_str();
            let lower = key.to_ascii_lowercase();
            if Self::SECTIONS.iter().any(|section| lower.starts_with(&format!("{section}_"))) {
                key.replacen('_', ".", 1).into()
            } else {
                key.into()
            }
        })
    }

    /// The artifact directory.
    pub fn build_dir(&self) -> PathBuf {
        match &self.build_dir {
            Some(dir) => self.resolve(dir),
            None => self.project.join("build").join("contracts"),
        }
    }

    /// Resolves `path` against the project root unless it is absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() { path.to_path_buf() } else { self.project.join(path) }
    }

    /// The set-balance method of the configured node.
    pub fn set_balance_method(&self) -> &str {
        self.accounts.set_balance_method(self.node.kind)
    }

    /// Serializes the configuration as TOML.
    pub fn to_string_pretty(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Provider for HarnessConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("scfuzz config")
    }

    #[track_caller]
    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}
