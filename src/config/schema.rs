use crate::matcher::Matcher;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Comment prefix shared by every marker this crate writes.
pub const MARKER_PREFIX: &str = "lod2-patch";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchRuleSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub rules: Vec<PatchRule>,
    #[serde(default)]
    pub build: Option<BuildPlan>,
}

impl PatchRuleSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.rules.is_empty() {
            issues.push(ValidationIssue::EmptyRuleList);
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            let rule_id = Some(rule.id.clone());

            if rule.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: None,
                    field: "id",
                });
            } else if !seen.insert(rule.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId(rule.id.clone()));
            }

            if rule.scope.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: rule_id.clone(),
                    field: "scope",
                });
            }
            for entry in rule.scope.entries() {
                if !is_tree_relative(entry) {
                    issues.push(ValidationIssue::InvalidScope {
                        rule_id: rule_id.clone(),
                        entry: entry.to_string(),
                        message: "must be relative to the tree root without '..'".to_string(),
                    });
                }
            }
            for pattern in &rule.scope.globs {
                if let Err(err) = glob::Pattern::new(pattern) {
                    issues.push(ValidationIssue::InvalidScope {
                        rule_id: rule_id.clone(),
                        entry: pattern.clone(),
                        message: err.to_string(),
                    });
                }
            }

            issues.extend(rule.action.issues(&rule.id));

            if let Some(residual) = &rule.residual {
                if residual.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        rule_id: rule_id.clone(),
                        field: "residual",
                    });
                }
            }

            // Only meaningful once the action itself is well formed.
            if let Ok(matcher) = rule.matcher() {
                let replacement = rule.replacement();
                if replacement.trim() == matcher.anchor() {
                    issues.push(ValidationIssue::NoOpReplacement(rule.id.clone()));
                } else if matcher.is_match(&replacement) {
                    issues.push(ValidationIssue::SelfMatchingReplacement(rule.id.clone()));
                }
            }
        }

        for file in &self.meta.must_fully_patch {
            if file.trim().is_empty() || !is_tree_relative(file) {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id: None,
                    message: format!("must_fully_patch entry '{file}' is not a tree-relative path"),
                });
            }
        }

        if let Some(plan) = &self.build {
            issues.extend(plan.issues());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    pub fn rule(&self, id: &str) -> Option<&PatchRule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    /// True if `file` (tree-relative) must carry no residual occurrences.
    pub fn must_fully_patch(&self, file: &Path) -> bool {
        self.meta
            .must_fully_patch
            .iter()
            .any(|entry| normalized(entry) == file)
    }
}

/// Tree-relative path with `.` components dropped.
pub(crate) fn normalized(entry: &str) -> PathBuf {
    Path::new(entry.trim())
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn is_tree_relative(entry: &str) -> bool {
    let path = Path::new(entry);
    !entry.trim().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Library the rules target, e.g. "SFCGAL".
    #[serde(default)]
    pub library: Option<String>,
    /// Semver requirement on the library version found in the tree.
    #[serde(default)]
    pub version_range: Option<String>,
    /// Files in which any residual occurrence fails verification.
    #[serde(default)]
    pub must_fully_patch: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchRule {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scope: Scope,
    pub action: Action,
    #[serde(default)]
    pub policy: MatchPolicy,
    /// A required rule must resolve to files and find something to patch.
    #[serde(default)]
    pub required: bool,
    /// Call-form prefix of the original pattern family, hunted for by the
    /// verifier's negative check.
    #[serde(default)]
    pub residual: Option<String>,
}

impl PatchRule {
    /// Build the matcher for this rule's original pattern.
    pub fn matcher(&self) -> Result<Matcher, regex::Error> {
        match &self.action {
            Action::ToleranceRewrite { from, .. } => Ok(Matcher::literal(from.trim())),
            Action::CallSuppression { call, .. } => Ok(Matcher::call(call.trim())),
            Action::CallShortcut {
                call, arguments, ..
            } => {
                let matcher = Matcher::call(call.trim());
                match arguments {
                    Some(pattern) => matcher.with_arguments(pattern),
                    None => Ok(matcher),
                }
            }
        }
    }

    /// Matcher for the residual family.
    ///
    /// A declared `residual` hunts the whole call-name family. Without one,
    /// call rules hunt their bare call regardless of any argument filter, so
    /// call sites the filter misses still surface. Tolerance rewrites own
    /// every hit of their literal and have no residual.
    pub fn residual_matcher(&self) -> Option<Matcher> {
        if let Some(prefix) = self.residual.as_deref() {
            return Some(Matcher::call_prefix(prefix.trim()));
        }
        match &self.action {
            Action::ToleranceRewrite { .. } => None,
            Action::CallSuppression { call, .. } | Action::CallShortcut { call, .. } => {
                Some(Matcher::call(call.trim()))
            }
        }
    }

    /// Text written in place of every match.
    pub fn replacement(&self) -> String {
        match &self.action {
            Action::ToleranceRewrite { to, .. } => {
                format!("{} /* {} */", to.trim(), self.marker())
            }
            Action::CallSuppression { .. } => format!("/* {} */", self.marker()),
            Action::CallShortcut { value, .. } => {
                format!("{} /* {} */", value.trim(), self.marker())
            }
        }
    }

    /// Text whose presence proves the rule took effect.
    ///
    /// The comment body written next to the new literal or in place of the
    /// call. A tolerance marker records the literal it replaced.
    pub fn marker(&self) -> String {
        match &self.action {
            Action::ToleranceRewrite { from, .. } => {
                format!("{MARKER_PREFIX}[{}]: was {}", self.id, from.trim())
            }
            Action::CallSuppression { call, marker } => marker
                .clone()
                .unwrap_or_else(|| format!("{MARKER_PREFIX}[{}]: {} disabled", self.id, call.trim())),
            Action::CallShortcut { call, marker, .. } => marker.clone().unwrap_or_else(|| {
                format!("{MARKER_PREFIX}[{}]: {} short-circuited", self.id, call.trim())
            }),
        }
    }

    /// Number of markers of this rule present in `source`.
    pub fn count_markers(&self, source: &str) -> usize {
        source.matches(self.marker().as_str()).count()
    }

    pub fn kind(&self) -> &'static str {
        match &self.action {
            Action::ToleranceRewrite { .. } => "tolerance-rewrite",
            Action::CallSuppression { .. } => "call-suppression",
            Action::CallShortcut { .. } => "call-shortcut",
        }
    }
}

/// Files a rule applies to: explicit tree-relative paths and globs.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Scope {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub globs: Vec<String>,
}

impl Scope {
    pub fn is_empty(&self) -> bool {
        self.entries().all(|entry| entry.trim().is_empty())
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().chain(self.globs.iter()).map(String::as_str)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    /// Replace a numeric epsilon literal with another one.
    ToleranceRewrite { from: String, to: String },
    /// Replace a whole call expression with a marker comment.
    CallSuppression {
        call: String,
        #[serde(default)]
        marker: Option<String>,
    },
    /// Replace a call expression with a constant value.
    CallShortcut {
        call: String,
        /// Regex the argument text must match.
        #[serde(default)]
        arguments: Option<String>,
        value: String,
        #[serde(default)]
        marker: Option<String>,
    },
}

impl Action {
    fn issues(&self, rule_id: &str) -> Vec<ValidationIssue> {
        let rule_id = Some(rule_id.to_string());
        let mut issues = Vec::new();
        let mut require = |value: &str, field: &'static str| {
            if value.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: rule_id.clone(),
                    field,
                });
            }
        };

        match self {
            Action::ToleranceRewrite { from, to } => {
                require(from, "action.from");
                require(to, "action.to");
                if from.trim().parse::<f64>().is_err() || to.trim().parse::<f64>().is_err() {
                    issues.push(ValidationIssue::InvalidCombo {
                        rule_id: rule_id.clone(),
                        message: "tolerance-rewrite requires numeric literals".to_string(),
                    });
                }
            }
            Action::CallSuppression { call, marker } => {
                require(call, "action.call");
                if let Some(marker) = marker {
                    require(marker, "action.marker");
                    if marker.contains("*/") {
                        issues.push(ValidationIssue::InvalidCombo {
                            rule_id: rule_id.clone(),
                            message: "marker must not close the comment it is written in"
                                .to_string(),
                        });
                    }
                }
            }
            Action::CallShortcut {
                call,
                arguments,
                value,
                marker,
            } => {
                require(call, "action.call");
                require(value, "action.value");
                if let Some(pattern) = arguments {
                    if let Err(err) = regex::Regex::new(pattern) {
                        issues.push(ValidationIssue::InvalidCombo {
                            rule_id: rule_id.clone(),
                            message: format!("invalid arguments regex: {err}"),
                        });
                    }
                }
                if marker.as_deref().is_some_and(|m| m.contains("*/")) {
                    issues.push(ValidationIssue::InvalidCombo {
                        rule_id: rule_id.clone(),
                        message: "marker must not close the comment it is written in".to_string(),
                    });
                }
            }
        }

        if let Action::CallSuppression { call, .. } | Action::CallShortcut { call, .. } = self {
            let call = call.trim();
            if !call.is_empty()
                && !call
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b':')
            {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id,
                    message: format!("'{call}' is not a call name"),
                });
            }
        }

        issues
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Rewrite every occurrence in every file in scope.
    #[default]
    AllOccurrences,
    /// Rewrite only the first occurrence in each file.
    FirstOnly,
}

/// Native build/install plan consumed by the build orchestrator.
#[derive(Debug, Deserialize, Clone)]
pub struct BuildPlan {
    pub library: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Libraries built and installed before the target, in order.
    #[serde(default)]
    pub dependencies: Vec<BuildStage>,
    pub target: BuildStage,
    /// Compatibility soname links created after install.
    #[serde(default)]
    pub links: Vec<SonameLink>,
}

fn default_prefix() -> String {
    "/usr/local".to_string()
}

impl BuildPlan {
    fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut invalid = |message: String| {
            issues.push(ValidationIssue::InvalidBuildPlan(message));
        };

        if self.library.trim().is_empty() {
            invalid("build.library is empty".to_string());
        }
        if self.prefix.trim().is_empty() {
            invalid("build.prefix is empty".to_string());
        }
        if self.jobs == Some(0) {
            invalid("build.jobs must be at least 1".to_string());
        }
        for stage in self.dependencies.iter().chain(std::iter::once(&self.target)) {
            if stage.name.trim().is_empty() {
                invalid("build stage without a name".to_string());
            }
            if stage.steps.is_empty() {
                invalid(format!("build stage '{}' has no steps", stage.name));
            }
            if stage.steps.iter().any(|step| step.is_empty() || step[0].trim().is_empty()) {
                invalid(format!("build stage '{}' has an empty command", stage.name));
            }
        }
        if self.target.artifacts.is_empty() {
            invalid("build.target must list at least one installed artifact".to_string());
        }
        for link in &self.links {
            if link.link.trim().is_empty() || link.target.trim().is_empty() {
                invalid("build.links entries need both 'link' and 'target'".to_string());
            }
        }

        issues
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildStage {
    pub name: String,
    /// Working directory, relative to the tree root unless absolute.
    #[serde(default)]
    pub dir: Option<String>,
    /// Commands as argv vectors. `{prefix}`, `{jobs}`, `{source}` and
    /// `{tree}` are expanded before execution.
    pub steps: Vec<Vec<String>>,
    /// Paths relative to the prefix that must exist once the stage finishes.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SonameLink {
    /// Link path relative to the prefix, e.g. `lib/libSFCGAL.so.1`.
    pub link: String,
    /// Link target, usually a sibling file name.
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyRuleList,
    DuplicateId(String),
    MissingField {
        rule_id: Option<String>,
        field: &'static str,
    },
    InvalidScope {
        rule_id: Option<String>,
        entry: String,
        message: String,
    },
    NoOpReplacement(String),
    SelfMatchingReplacement(String),
    InvalidCombo {
        rule_id: Option<String>,
        message: String,
    },
    InvalidBuildPlan(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyRuleList => write!(f, "rule set contains no rules"),
            ValidationIssue::DuplicateId(id) => write!(f, "rule id '{id}' is used more than once"),
            ValidationIssue::MissingField { rule_id, field } => match rule_id {
                Some(id) => write!(f, "rule '{id}' missing required field '{field}'"),
                None => write!(f, "rule missing required field '{field}'"),
            },
            ValidationIssue::InvalidScope {
                rule_id,
                entry,
                message,
            } => match rule_id {
                Some(id) => write!(f, "rule '{id}' has invalid scope entry '{entry}': {message}"),
                None => write!(f, "invalid scope entry '{entry}': {message}"),
            },
            ValidationIssue::NoOpReplacement(id) => {
                write!(f, "rule '{id}' replaces its pattern with identical text")
            }
            ValidationIssue::SelfMatchingReplacement(id) => write!(
                f,
                "rule '{id}' has a replacement that matches its own pattern (not idempotent)"
            ),
            ValidationIssue::InvalidCombo { rule_id, message } => match rule_id {
                Some(id) => write!(f, "rule '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid rule configuration: {message}"),
            },
            ValidationIssue::InvalidBuildPlan(message) => write!(f, "invalid build plan: {message}"),
        }
    }
}
