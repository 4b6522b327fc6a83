//! Library version detection and semver filtering for rule sets
//!
//! A rule set can declare `version_range = ">=1.4.0, <2.0.0"`; the version of
//! the library in the tree is read from its top-level `CMakeLists.txt`.

use regex::Regex;
use semver::{Version, VersionReq};
use std::fmt;
use std::fs;
use std::path::Path;

/// Errors during version filtering
#[derive(Debug, Clone)]
pub enum VersionError {
    /// Invalid version string (e.g., "not-a-version")
    InvalidVersion { value: String, source: String },
    /// Invalid version requirement (e.g., ">=bad")
    InvalidRequirement { value: String, source: String },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, source } => {
                write!(f, "invalid version '{}': {}", value, source)
            }
            VersionError::InvalidRequirement { value, source } => {
                write!(f, "invalid version requirement '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for VersionError {}

/// Check if a version matches a requirement string
///
/// Two-component versions ("1.5") are read as "1.5.0".
///
/// # Examples
///
/// ```
/// use lod2_patcher::config::version::matches_requirement;
///
/// assert!(matches_requirement("1.5.1", Some(">=1.4.0")).unwrap());
/// assert!(matches_requirement("1.5", Some(">=1.4.0, <2.0.0")).unwrap());
/// assert!(!matches_requirement("2.0.0", Some("<2.0.0")).unwrap());
///
/// // None requirement means "apply to all versions"
/// assert!(matches_requirement("1.0.0", None).unwrap());
/// ```
pub fn matches_requirement(
    version: &str,
    requirement: Option<&str>,
) -> Result<bool, VersionError> {
    let Some(req_str) = requirement else {
        return Ok(true);
    };

    let req_str = req_str.trim();
    if req_str.is_empty() {
        return Ok(true);
    }

    let version = parse_version(version)?;

    let req = VersionReq::parse(req_str).map_err(|e| VersionError::InvalidRequirement {
        value: req_str.to_string(),
        source: e.to_string(),
    })?;

    Ok(req.matches(&version))
}

pub fn parse_version(version: &str) -> Result<Version, VersionError> {
    let trimmed = version.trim();
    let padded = if trimmed.split('.').count() == 2 && !trimmed.contains('-') {
        format!("{trimmed}.0")
    } else {
        trimmed.to_string()
    };
    Version::parse(&padded).map_err(|e| VersionError::InvalidVersion {
        value: version.to_string(),
        source: e.to_string(),
    })
}

/// Read the library version declared in `<root>/CMakeLists.txt`.
///
/// Understands `project(NAME VERSION x.y.z ...)` and the older
/// `set(NAME_VERSION_MAJOR x)` / `_MINOR` / `_PATCH` triple.
pub fn detect_library_version(root: &Path) -> Option<String> {
    let cmake = fs::read_to_string(root.join("CMakeLists.txt")).ok()?;
    version_from_cmake(&cmake)
}

fn version_from_cmake(cmake: &str) -> Option<String> {
    let project = Regex::new(r"(?is)project\s*\(\s*[\w-]+[^)]*?\bVERSION\s+(\d+\.\d+(?:\.\d+)?)")
        .ok()?;
    if let Some(caps) = project.captures(cmake) {
        return Some(caps[1].to_string());
    }

    let part = |name: &str| -> Option<String> {
        let re = Regex::new(&format!(
            r#"(?i)set\s*\(\s*\w*_VERSION_{name}\s+"?(\d+)"?\s*\)"#
        ))
        .ok()?;
        re.captures(cmake).map(|caps| caps[1].to_string())
    };
    let major = part("MAJOR")?;
    let minor = part("MINOR")?;
    let patch = part("PATCH").unwrap_or_else(|| "0".to_string());
    Some(format!("{major}.{minor}.{patch}"))
}
