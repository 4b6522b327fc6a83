pub mod loader;
pub mod schema;
pub mod version;

pub use loader::{load_builtin, load_from_path, load_from_str, ConfigError, BUILTIN_RULES};
pub use schema::{
    Action, BuildPlan, BuildStage, MatchPolicy, Metadata, PatchRule, PatchRuleSet, Scope,
    SonameLink, ValidationError, ValidationIssue, MARKER_PREFIX,
};
pub use version::{detect_library_version, matches_requirement, VersionError};
