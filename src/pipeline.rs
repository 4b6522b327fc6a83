//! The patch → verify → build pipeline.
//!
//! Stages run strictly in order and the first failure ends the run. The
//! builder is reached only with a passing verdict; a failed verification
//! returns [`PipelineError::Verification`] carrying the full verdict.

use crate::build::{BuildArtifact, BuildFailure, Builder};
use crate::config::{detect_library_version, matches_requirement, ConfigError, PatchRuleSet};
use crate::engine::{apply_rules, PatchApplicationResult, PatchError};
use crate::tree::{SourceTree, TreeError};
use crate::verify::{verify, VerificationFailure, VerificationVerdict};
use std::fmt;
use thiserror::Error;
use tracing::info;

/// Pipeline stage, as reported in diagnostics and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    PatchApplication,
    Verification,
    Build,
}

impl Stage {
    /// Process exit code for a failure in this stage.
    pub fn exit_code(self) -> i32 {
        match self {
            Stage::Configuration => 2,
            Stage::PatchApplication => 3,
            Stage::Verification => 4,
            Stage::Build => 5,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Configuration => "configuration",
            Stage::PatchApplication => "patch application",
            Stage::Verification => "verification",
            Stage::Build => "build",
        })
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    PatchApplication(#[from] PatchError),

    #[error(transparent)]
    Verification(#[from] VerificationFailure),

    #[error(transparent)]
    Build(#[from] BuildFailure),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Configuration(_) | PipelineError::Tree(_) => Stage::Configuration,
            // Bad scopes are rule-set mistakes, reported before anything is written.
            PipelineError::PatchApplication(e) if e.is_configuration() => Stage::Configuration,
            PipelineError::PatchApplication(_) => Stage::PatchApplication,
            PipelineError::Verification(_) => Stage::Verification,
            PipelineError::Build(_) => Stage::Build,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.stage().exit_code()
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub library_version: Option<String>,
    pub results: Vec<PatchApplicationResult>,
    pub verdict: VerificationVerdict,
    pub artifact: Option<BuildArtifact>,
}

#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    rules: &'a PatchRuleSet,
    library_version: Option<String>,
}

impl<'a> Pipeline<'a> {
    pub fn new(rules: &'a PatchRuleSet) -> Self {
        Self {
            rules,
            library_version: None,
        }
    }

    /// Use this library version instead of detecting it from the tree.
    pub fn library_version(mut self, version: Option<String>) -> Self {
        self.library_version = version;
        self
    }

    /// Validate the rule set and gate on the tree's library version.
    ///
    /// Returns the effective library version, if known.
    pub fn check_configuration(&self, tree: &SourceTree) -> Result<Option<String>, ConfigError> {
        self.rules
            .validate()
            .map_err(|source| ConfigError::Validation { path: None, source })?;

        let version = self
            .library_version
            .clone()
            .or_else(|| detect_library_version(tree.root()));

        if let Some(requirement) = self.rules.meta.version_range.as_deref() {
            let Some(version) = version.as_deref() else {
                return Err(ConfigError::UnknownVersion {
                    requirement: requirement.to_string(),
                });
            };
            if !matches_requirement(version, Some(requirement))? {
                return Err(ConfigError::VersionMismatch {
                    version: version.to_string(),
                    requirement: requirement.to_string(),
                });
            }
        }

        Ok(version)
    }

    /// Configuration gate, patch application and verification.
    ///
    /// A failed verdict is returned as an error; the tree stays patched so
    /// the violations can be inspected.
    pub fn patch_and_verify(&self, tree: &mut SourceTree) -> Result<PipelineReport, PipelineError> {
        let library_version = self.check_configuration(tree)?;
        info!(
            rules = self.rules.rules.len(),
            version = library_version.as_deref().unwrap_or("unknown"),
            "applying patches"
        );

        let results = apply_rules(tree, self.rules)?;
        let replaced: usize = results.iter().map(|r| r.occurrences_replaced).sum();
        info!(replaced, "patches applied");

        let verdict = verify(tree, self.rules, &results);
        if !verdict.passed() {
            return Err(VerificationFailure { verdict }.into());
        }

        Ok(PipelineReport {
            library_version,
            results,
            verdict,
            artifact: None,
        })
    }

    /// The full pipeline. `builder` is invoked only after verification
    /// passed.
    pub fn run<B: Builder>(
        &self,
        tree: &mut SourceTree,
        builder: &mut B,
    ) -> Result<PipelineReport, PipelineError> {
        let mut report = self.patch_and_verify(tree)?;

        info!("building patched library");
        let artifact = builder.build(tree, &report.verdict, &report.results)?;
        report.artifact = Some(artifact);
        Ok(report)
    }
}
