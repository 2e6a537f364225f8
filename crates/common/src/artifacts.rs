//! Loading of compiled (truffle style) contract artifacts.

use crate::errors::{HarnessError, Result};
use alloy_json_abi::JsonAbi;
use alloy_primitives::hex;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// Artifacts live under `<project>/build/contracts`.
pub fn project_build_dir(project: &Path) -> PathBuf {
    project.join("build").join("contracts")
}

/// One compiled contract.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub abi: JsonAbi,
    /// Lowercase, `0x`-prefixed deployed bytecode; `"0x"` for interfaces and abstract contracts.
    pub deployed_bytecode: String,
}

impl Artifact {
    /// Whether the artifact has runtime code that can be matched against the chain.
    pub fn has_code(&self) -> bool {
        self.deployed_bytecode.len() > 2
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: String,
    abi: serde_json::Value,
    #[serde(default)]
    deployed_bytecode: Option<DeployedBytecode>,
}

/// Truffle writes a string, hardhat/foundry style artifacts an object with an `object` key.
#[derive(Deserialize)]
#[serde(untagged)]
enum DeployedBytecode {
    Hex(String),
    Object { object: String },
}

/// Normalizes a hex string to lowercase with a `0x` prefix.
pub fn normalize_hex(code: &str) -> String {
    let code = code.trim();
    let code = code.strip_prefix("0x").or_else(|| code.strip_prefix("0X")).unwrap_or(code);
    format!("0x{}", code.to_ascii_lowercase())
}

/// All artifacts of a project, keyed by contract name.
#[derive(Clone, Debug, Default)]
pub struct ArtifactStore {
    dir: PathBuf,
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactStore {
    /// Loads every `*.json` file in `build_dir`.
    ///
    /// Malformed files are fatal: skipping one would make discovery tag its deployments as
    /// unknown contracts.
    pub fn load(build_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = build_dir.as_ref();
        if !dir.is_dir() {
            return Err(HarnessError::ArtifactNotFound(dir.to_path_buf()));
        }
        let entries = fs::read_dir(dir).map_err(|_| HarnessError::ArtifactNotFound(dir.into()))?;
        let mut paths = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        paths.sort();

        let mut artifacts: BTreeMap<String, Artifact> = BTreeMap::new();
        for path in paths {
            let artifact = read_artifact(&path)?;
            if let Some(prev) = artifacts.get(&artifact.name) {
                return Err(HarnessError::DuplicateArtifact {
                    names: vec![
                        prev.path.display().to_string(),
                        artifact.path.display().to_string(),
                    ],
                    what: format!("contract name `{}`", artifact.name),
                });
            }
            artifacts.insert(artifact.name.clone(), artifact);
        }
        debug!(dir = %dir.display(), count = artifacts.len(), "loaded artifacts");
        Ok(Self { dir: dir.to_path_buf(), artifacts })
    }

    /// Loads the artifacts of a truffle project.
    pub fn load_project(project: impl AsRef<Path>) -> Result<Self> {
        Self::load(project_build_dir(project.as_ref()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    /// Returns the artifact whose deployed bytecode equals `code` exactly.
    ///
    /// Empty code never matches. More than one match is a [`HarnessError::DuplicateArtifact`].
    pub fn find_by_deployed_code(&self, code: &[u8]) -> Result<Option<&Artifact>> {
        if code.is_empty() {
            return Ok(None);
        }
        let needle = format!("0x{}", hex::encode(code));
        let matches = self
            .iter()
            .filter(|a| a.has_code() && a.deployed_bytecode == needle)
            .collect::<Vec<_>>();
        match matches.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(*one)),
            many => Err(HarnessError::DuplicateArtifact {
                names: many.iter().map(|a| a.name.clone()).collect(),
                what: "deployed bytecode".to_string(),
            }),
        }
    }
}

fn read_artifact(path: &Path) -> Result<Artifact> {
    let corrupt =
        |reason: String| HarnessError::CorruptArtifact { path: path.to_path_buf(), reason };
    let content = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
    let raw: RawArtifact = serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
    if !raw.abi.is_array() {
        return Err(corrupt("`abi` is not an array".to_string()));
    }
    let abi: JsonAbi =
        serde_json::from_value(raw.abi).map_err(|e| corrupt(format!("invalid abi: {e}")))?;
    let code = match raw.deployed_bytecode {
        Some(DeployedBytecode::Hex(s) | DeployedBytecode::Object { object: s }) => s,
        None => String::new(),
    };
    let deployed_bytecode = normalize_hex(&code);
    if hex::decode(&deployed_bytecode).is_err() {
        // unlinked library placeholders end up here
        return Err(corrupt("`deployedBytecode` is not valid hex".to_string()));
    }
    Ok(Artifact { name: raw.contract_name, path: path.to_path_buf(), abi, deployed_bytecode })
}
