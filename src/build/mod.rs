//! Native build and install of the patched library.
//!
//! The orchestrator only runs on a tree whose verification passed: calling
//! [`Builder::build`] with a failed verdict panics. The pipeline never does
//! that, so a panic here is a programming error, not a runtime condition.

pub mod toolchain;

pub use toolchain::{CommandOutput, Invocation, SystemToolchain, Toolchain};

use crate::config::{detect_library_version, BuildPlan, BuildStage, SonameLink};
use crate::engine::PatchApplicationResult;
use crate::fingerprint::patch_fingerprint;
use crate::tree::SourceTree;
use crate::verify::VerificationVerdict;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Lines of toolchain output kept on a failure.
const OUTPUT_TAIL_LINES: usize = 40;

#[derive(Error, Debug)]
pub enum BuildFailure {
    #[error("stage '{stage}': failed to run `{command}`: {source}")]
    Spawn {
        stage: String,
        command: String,
        source: io::Error,
    },

    #[error("stage '{stage}': `{command}` exited with {}\n{}", describe_code(*code), output_tail(stdout, stderr))]
    CommandFailed {
        stage: String,
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("stage '{stage}' has an empty command")]
    EmptyCommand { stage: String },

    #[error("stage '{stage}': expected artifact missing after install: {path}")]
    MissingArtifact { stage: String, path: PathBuf },

    #[error("failed to create soname link {link}: {source}")]
    Link { link: PathBuf, source: io::Error },
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

fn output_tail(stdout: &str, stderr: &str) -> String {
    let mut tail = String::new();
    for (name, text) in [("stdout", stdout), ("stderr", stderr)] {
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            continue;
        }
        let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
        tail.push_str(&format!("--- {name} ---\n"));
        for line in &lines[start..] {
            tail.push_str(line);
            tail.push('\n');
        }
    }
    tail
}

/// What a successful build installed. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    library_name: String,
    version: String,
    patch_fingerprint: String,
    installed: Vec<PathBuf>,
}

impl BuildArtifact {
    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn patch_fingerprint(&self) -> &str {
        &self.patch_fingerprint
    }

    pub fn installed(&self) -> &[PathBuf] {
        &self.installed
    }

    /// Write the artifact as a pretty-printed JSON manifest.
    pub fn write_manifest(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, json + "\n")
    }

    pub fn read_manifest(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Anything that can turn a verified tree into an installed artifact.
pub trait Builder {
    /// Build and install. Panics if `verdict` did not pass.
    fn build(
        &mut self,
        tree: &SourceTree,
        verdict: &VerificationVerdict,
        results: &[PatchApplicationResult],
    ) -> Result<BuildArtifact, BuildFailure>;
}

/// Runs a [`BuildPlan`] through a [`Toolchain`].
#[derive(Debug)]
pub struct BuildOrchestrator<T: Toolchain = SystemToolchain> {
    plan: BuildPlan,
    toolchain: T,
    prefix: PathBuf,
    jobs: usize,
    version: Option<String>,
}

impl BuildOrchestrator<SystemToolchain> {
    pub fn new(plan: BuildPlan) -> Self {
        Self::with_toolchain(plan, SystemToolchain)
    }
}

impl<T: Toolchain> BuildOrchestrator<T> {
    pub fn with_toolchain(plan: BuildPlan, toolchain: T) -> Self {
        let prefix = PathBuf::from(&plan.prefix);
        let jobs = plan.jobs.unwrap_or_else(default_jobs);
        Self {
            plan,
            toolchain,
            prefix,
            jobs,
            version: None,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Library version recorded in the artifact. Detected from the tree
    /// when not set.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    fn run_stage(&mut self, tree: &SourceTree, stage: &BuildStage) -> Result<(), BuildFailure> {
        let source = match stage.dir.as_deref() {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => tree.root().join(dir),
            None => tree.root().to_path_buf(),
        };
        info!(stage = %stage.name, dir = %source.display(), "building");

        for step in &stage.steps {
            let argv: Vec<String> = step
                .iter()
                .map(|arg| self.expand(arg, tree.root(), &source))
                .collect();
            let Some((program, args)) = argv.split_first() else {
                return Err(BuildFailure::EmptyCommand {
                    stage: stage.name.clone(),
                });
            };
            let invocation = Invocation {
                program: program.clone(),
                args: args.to_vec(),
                cwd: source.clone(),
            };
            debug!(stage = %stage.name, command = %invocation, "running");

            let output =
                self.toolchain
                    .run(&invocation)
                    .map_err(|source| BuildFailure::Spawn {
                        stage: stage.name.clone(),
                        command: invocation.to_string(),
                        source,
                    })?;
            if !output.success {
                return Err(BuildFailure::CommandFailed {
                    stage: stage.name.clone(),
                    command: invocation.to_string(),
                    code: output.code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                });
            }
        }

        self.check_artifacts(stage)?;
        Ok(())
    }

    fn check_artifacts(&self, stage: &BuildStage) -> Result<Vec<PathBuf>, BuildFailure> {
        stage
            .artifacts
            .iter()
            .map(|artifact| {
                let path = self.prefix.join(artifact);
                if path.exists() {
                    Ok(path)
                } else {
                    Err(BuildFailure::MissingArtifact {
                        stage: stage.name.clone(),
                        path,
                    })
                }
            })
            .collect()
    }

    fn expand(&self, arg: &str, tree: &Path, source: &Path) -> String {
        arg.replace("{prefix}", &self.prefix.to_string_lossy())
            .replace("{jobs}", &self.jobs.to_string())
            .replace("{source}", &source.to_string_lossy())
            .replace("{tree}", &tree.to_string_lossy())
    }
}

impl<T: Toolchain> Builder for BuildOrchestrator<T> {
    fn build(
        &mut self,
        tree: &SourceTree,
        verdict: &VerificationVerdict,
        results: &[PatchApplicationResult],
    ) -> Result<BuildArtifact, BuildFailure> {
        assert!(
            verdict.passed(),
            "build requested for a tree that failed verification"
        );

        let dependencies = self.plan.dependencies.clone();
        for stage in &dependencies {
            self.run_stage(tree, stage)?;
        }
        let target = self.plan.target.clone();
        self.run_stage(tree, &target)?;

        let mut installed = Vec::new();
        for link in &self.plan.links {
            let path = link_soname(&self.prefix, link)?;
            info!(link = %path.display(), target = %link.target, "soname link");
            installed.push(path);
        }

        // Post-install check, regardless of what the commands reported.
        let mut expected = self.check_artifacts(&target)?;
        for path in &installed {
            if !path.exists() {
                return Err(BuildFailure::MissingArtifact {
                    stage: target.name.clone(),
                    path: path.clone(),
                });
            }
        }
        expected.extend(installed);

        let version = self
            .version
            .clone()
            .or_else(|| detect_library_version(tree.root()))
            .unwrap_or_else(|| "unknown".to_string());

        let artifact = BuildArtifact {
            library_name: self.plan.library.clone(),
            version,
            patch_fingerprint: patch_fingerprint(results),
            installed: expected,
        };
        info!(
            library = %artifact.library_name,
            version = %artifact.version,
            fingerprint = %artifact.patch_fingerprint,
            "installed"
        );
        Ok(artifact)
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Create `prefix/link -> target`. An existing regular file is kept; a
/// stale link is replaced.
#[cfg(unix)]
fn link_soname(prefix: &Path, link: &SonameLink) -> Result<PathBuf, BuildFailure> {
    let path = prefix.join(&link.link);
    let failed = |source| BuildFailure::Link {
        link: path.clone(),
        source,
    };

    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(&path).map_err(failed)? == Path::new(&link.target) {
                return Ok(path);
            }
            fs::remove_file(&path).map_err(failed)?;
        }
        Ok(_) => return Ok(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(failed(e)),
    }

    std::os::unix::fs::symlink(&link.target, &path).map_err(failed)?;
    Ok(path)
}

#[cfg(not(unix))]
fn link_soname(prefix: &Path, link: &SonameLink) -> Result<PathBuf, BuildFailure> {
    let path = prefix.join(&link.link);
    let target = path
        .parent()
        .map(|dir| dir.join(&link.target))
        .unwrap_or_else(|| PathBuf::from(&link.target));
    if !path.exists() {
        fs::copy(&target, &path).map_err(|source| BuildFailure::Link {
            link: path.clone(),
            source,
        })?;
    }
    Ok(path)
}
