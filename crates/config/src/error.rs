//! Configuration errors.

use figment::providers::{Format, Toml};
use std::{collections::HashSet, error::Error, fmt};

/// The header of every [`ExtractConfigError`] message.
pub const FAILED_TO_EXTRACT_CONFIG_MSG: &str = "failed to extract scfuzz config:";

/// A failed attempt to extract a `HarnessConfig` from a `Figment`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractConfigError {
    pub(crate) error: figment::Error,
}

impl ExtractConfigError {
    /// Wraps the figment error.
    pub fn new(error: figment::Error) -> Self {
        Self { error }
    }

    /// Every distinct error, tagged with where it came from.
    pub fn errors(&self) -> Vec<ScfuzzConfigError> {
        let mut unique = HashSet::with_capacity(self.error.count());
        let mut errors = Vec::with_capacity(self.error.count());
        for err in self.error.clone() {
            let from_toml = err
                .metadata
                .as_ref()
                .map(|meta| meta.name.contains(Toml::NAME))
                .unwrap_or_default();
            let err = if from_toml {
                ScfuzzConfigError::Toml(err)
            } else {
                ScfuzzConfigError::Other(err)
            };
            if unique.insert(err.to_string()) {
                errors.push(err);
            }
        }
        errors
    }
}

impl fmt::Display for ExtractConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{FAILED_TO_EXTRACT_CONFIG_MSG}")?;
        for err in self.errors() {
            writeln!(f, "{err}")?;
        }
        Ok(())
    }
}

impl Error for ExtractConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Error::source(&self.error)
    }
}

impl From<figment::Error> for ExtractConfigError {
    fn from(error: figment::Error) -> Self {
        Self::new(error)
    }
}

/// One error found while building the configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum ScfuzzConfigError {
    /// An error in `scfuzz.toml`.
    Toml(figment::Error),
    /// An error from the defaults or the environment.
    Other(figment::Error),
}

impl fmt::Display for ScfuzzConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_err = |err: &figment::Error, f: &mut fmt::Formatter<'_>| {
            write!(f, "{err}")?;
            if !err.path.is_empty() {
                write!(f, " for setting `{}`", err.path.join("."))?;
            }
            Ok(())
        };

        match self {
            Self::Toml(err) => {
                f.write_str("scfuzz.toml error: ")?;
                fmt_err(err, f)
            }
            Self::Other(err) => {
                f.write_str("scfuzz config error: ")?;
                fmt_err(err, f)
            }
        }
    }
}

impl Error for ScfuzzConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Other(error) | Self::Toml(error) => Error::source(error),
        }
    }
}
