use crate::config::schema::{PatchRuleSet, ValidationError};
use crate::config::version::VersionError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Rule set shipped with the binary.
pub const BUILTIN_RULES: &str = include_str!("../../patches/sfcgal-lod2.toml");

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    Version(VersionError),
    /// The tree's library version is outside the rule set's `version_range`.
    VersionMismatch {
        version: String,
        requirement: String,
    },
    /// A `version_range` is declared but the tree's version is unknown.
    UnknownVersion {
        requirement: String,
    },
    MissingBuildPlan,
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read rule set from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse rule set TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse rule set TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid rule set ({}): {}", path.display(), source),
                None => write!(f, "invalid rule set: {}", source),
            },
            ConfigError::Version(e) => write!(f, "version error: {}", e),
            ConfigError::VersionMismatch {
                version,
                requirement,
            } => write!(
                f,
                "library version {version} does not satisfy version_range {requirement}"
            ),
            ConfigError::UnknownVersion { requirement } => write!(
                f,
                "rule set requires library version {requirement} but the tree's version \
                 could not be determined (pass --library-version)"
            ),
            ConfigError::MissingBuildPlan => write!(f, "rule set has no [build] section"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::Version(source) => Some(source),
            _ => None,
        }
    }
}

impl From<VersionError> for ConfigError {
    fn from(e: VersionError) -> Self {
        ConfigError::Version(e)
    }
}

pub fn load_from_str(input: &str) -> Result<PatchRuleSet, ConfigError> {
    let rules: PatchRuleSet = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    rules
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(rules)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchRuleSet, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Load the rule set embedded in the binary.
pub fn load_builtin() -> Result<PatchRuleSet, ConfigError> {
    load_from_str(BUILTIN_RULES)
}
