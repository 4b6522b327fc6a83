//! LOD2 Patcher: validity relaxation for SFCGAL source trees
//!
//! Rewrites an unpacked SFCGAL source tree so real-world LOD2 building
//! solids survive volume and area computation, proves the rewrite took
//! effect, and only then builds and installs the library.
//!
//! # Architecture
//!
//! ```text
//! PatchRuleSet ─▶ engine ─▶ verify ─▶ BuildOrchestrator ─▶ BuildArtifact
//!                 (&mut tree) (&tree)   (passed verdicts only)
//! ```
//!
//! Every rule action compiles down to byte-span [`Splice`]s found by a
//! [`Matcher`] that skips comments, string literals and macro definitions.
//! A file's splices from all rules are applied together and written once.
//!
//! # Safety
//!
//! - Scopes are resolved before any write; a misconfigured rule set leaves
//!   the tree untouched
//! - Atomic file writes (tempfile + fsync + rename), guarded by the content
//!   the rewrite was computed from
//! - Source tree boundary enforcement, symlinks included
//! - Delimiter balance is preserved by every rewrite
//! - Idempotent: patching a patched tree changes nothing
//!
//! # Example
//!
//! ```no_run
//! use lod2_patcher::{load_builtin, BuildOrchestrator, Pipeline, SourceTree};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rules = load_builtin()?;
//! let mut tree = SourceTree::open("SFCGAL-1.5.2")?;
//! let plan = rules.build.clone().ok_or("no build plan")?;
//!
//! let report = Pipeline::new(&rules).run(&mut tree, &mut BuildOrchestrator::new(plan))?;
//! if let Some(artifact) = report.artifact {
//!     println!("installed {} {}", artifact.library_name(), artifact.version());
//! }
//! # Ok(())
//! # }
//! ```

pub mod build;
pub mod cache;
pub mod config;
pub mod edit;
pub mod engine;
pub mod fingerprint;
pub mod lexer;
pub mod logging;
pub mod matcher;
pub mod pipeline;
pub mod tree;
pub mod verify;

// Re-exports
pub use build::{
    BuildArtifact, BuildFailure, BuildOrchestrator, Builder, SystemToolchain, Toolchain,
};
pub use config::{
    load_builtin, load_from_path, load_from_str, matches_requirement, Action, ConfigError,
    PatchRule, PatchRuleSet, VersionError,
};
pub use edit::{EditError, EditVerification, Rewrite, RewriteResult, Splice};
pub use engine::{
    apply_rules, check_rules, plan_rules, PatchApplicationResult, PatchError, PatchPlan,
    ScopeStatus,
};
pub use fingerprint::patch_fingerprint;
pub use matcher::{Matcher, Span};
pub use pipeline::{Pipeline, PipelineError, PipelineReport, Stage};
pub use tree::{SourceTree, TreeError};
pub use verify::{verify, Severity, VerificationFailure, VerificationVerdict, Violation};
