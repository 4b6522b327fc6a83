//! Post-patch verification
//!
//! Two checks over the tree as it is on disk after the engine ran:
//!
//! - **Positive**: every rule that reported an effect left its marker in each
//!   file it claims, required rules took effect somewhere, and rules with the
//!   all-occurrences policy have nothing left to match.
//! - **Negative**: each rule's residual pattern (a declared call-name prefix,
//!   else the rule's bare call) is scanned across the rule's scope. Any hit
//!   not owned by an all-occurrences rule's matcher is a residual occurrence:
//!   a failure in `must_fully_patch` files, a note elsewhere.
//!
//! The verdict enumerates every violation; nothing short-circuits.

use crate::cache;
use crate::config::{MatchPolicy, PatchRule, PatchRuleSet};
use crate::engine::{PatchApplicationResult, ScopeStatus};
use crate::lexer::{line_context, LexicalMap};
use crate::matcher::{Matcher, Span};
use crate::tree::{slash_path, SourceTree};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Minimum Jaro-Winkler similarity for a "did you mean" hint.
const HINT_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Failure,
    Informational,
}

/// Where an occurrence was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: PathBuf,
    /// 1-based
    pub line: usize,
    pub context: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", slash_path(&self.file), self.line, self.context)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ViolationKind {
    /// The engine produced no result for this rule.
    MissingResult,
    /// The rule's matcher could not be built.
    InvalidMatcher { reason: String },
    /// The rule's scope matched nothing in this tree.
    EmptyScope { missing: Vec<PathBuf> },
    /// A required rule neither patched anything nor found its marker.
    NoOccurrences { hint: Option<String> },
    /// A file reported as patched lacks the rule's marker.
    MissingMarker { file: PathBuf },
    /// The rule's own matcher still matches after patching.
    Unpatched { location: Location },
    /// A residual-pattern hit not owned by any rule.
    Residual { location: Location },
    Unreadable { file: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule '{}': ", self.rule_id)?;
        match &self.kind {
            ViolationKind::MissingResult => write!(f, "no patch result was produced"),
            ViolationKind::InvalidMatcher { reason } => write!(f, "invalid matcher: {reason}"),
            ViolationKind::EmptyScope { missing } => {
                write!(f, "scope matched no files")?;
                if !missing.is_empty() {
                    let missing: Vec<String> = missing.iter().map(|p| slash_path(p)).collect();
                    write!(f, " (missing: {})", missing.join(", "))?;
                }
                Ok(())
            }
            ViolationKind::NoOccurrences { hint } => {
                write!(f, "nothing to patch and no marker found")?;
                if let Some(hint) = hint {
                    write!(f, "; did you mean `{hint}`?")?;
                }
                Ok(())
            }
            ViolationKind::MissingMarker { file } => {
                write!(f, "expected marker missing in {}", slash_path(file))
            }
            ViolationKind::Unpatched { location } => {
                write!(f, "unpatched occurrence at {location}")
            }
            ViolationKind::Residual { location } => {
                write!(f, "residual occurrence at {location}")
            }
            ViolationKind::Unreadable { file, reason } => {
                write!(f, "cannot read {}: {reason}", slash_path(file))
            }
        }
    }
}

/// Outcome of verification. Built only by [`verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationVerdict {
    passed: bool,
    unpatched_occurrences: BTreeMap<String, Vec<Location>>,
    missing_expected_markers: Vec<PathBuf>,
    violations: Vec<Violation>,
}

impl VerificationVerdict {
    /// True iff there is no failure-severity violation.
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Occurrences still present, keyed by the rule that owns them.
    pub fn unpatched_occurrences(&self) -> &BTreeMap<String, Vec<Location>> {
        &self.unpatched_occurrences
    }

    pub fn missing_expected_markers(&self) -> &[PathBuf] {
        &self.missing_expected_markers
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn failures(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Failure)
    }

    pub fn notes(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Informational)
    }
}

/// A failed verdict, as an error.
#[derive(Debug, Clone)]
pub struct VerificationFailure {
    pub verdict: VerificationVerdict,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failures: Vec<&Violation> = self.verdict.failures().collect();
        write!(f, "verification failed with {} violation(s):", failures.len())?;
        for violation in failures {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VerificationFailure {}

/// Lazily read file contents; unreadable files keep their error text.
struct Contents<'t> {
    tree: &'t SourceTree,
    files: HashMap<PathBuf, Result<String, String>>,
}

impl<'t> Contents<'t> {
    fn new(tree: &'t SourceTree) -> Self {
        Self {
            tree,
            files: HashMap::new(),
        }
    }

    fn get(&mut self, file: &Path) -> Result<&str, String> {
        let tree = self.tree;
        self.files
            .entry(file.to_path_buf())
            .or_insert_with(|| tree.read_to_string(file).map_err(|e| e.to_string()))
            .as_deref()
            .map_err(|e| e.clone())
    }
}

#[derive(Default)]
struct Report {
    unpatched_occurrences: BTreeMap<String, Vec<Location>>,
    missing_expected_markers: Vec<PathBuf>,
    violations: Vec<Violation>,
}

impl Report {
    fn push(&mut self, rule_id: &str, severity: Severity, kind: ViolationKind) {
        match &kind {
            ViolationKind::Unpatched { location } | ViolationKind::Residual { location } => {
                self.unpatched_occurrences
                    .entry(rule_id.to_string())
                    .or_default()
                    .push(location.clone());
            }
            ViolationKind::MissingMarker { file } => {
                if !self.missing_expected_markers.contains(file) {
                    self.missing_expected_markers.push(file.clone());
                }
            }
            _ => {}
        }
        self.violations.push(Violation {
            rule_id: rule_id.to_string(),
            severity,
            kind,
        });
    }

    fn finish(self) -> VerificationVerdict {
        let passed = self
            .violations
            .iter()
            .all(|v| v.severity != Severity::Failure);
        VerificationVerdict {
            passed,
            unpatched_occurrences: self.unpatched_occurrences,
            missing_expected_markers: self.missing_expected_markers,
            violations: self.violations,
        }
    }
}

/// Verify the patched tree against the rule set and the engine's results.
///
/// Read-only: never modifies the tree.
pub fn verify(
    tree: &SourceTree,
    rules: &PatchRuleSet,
    results: &[PatchApplicationResult],
) -> VerificationVerdict {
    let mut contents = Contents::new(tree);
    let mut report = Report::default();

    let matchers: Vec<(&PatchRule, Option<Matcher>)> = rules
        .rules
        .iter()
        .map(|rule| (rule, rule.matcher().ok()))
        .collect();

    for (rule, matcher) in &matchers {
        let result = results.iter().find(|r| r.rule_id == rule.id);
        check_positive(&mut contents, &mut report, rule, matcher.as_ref(), result);
    }

    check_negative(&mut contents, &mut report, rules, &matchers, results);

    let verdict = report.finish();
    if verdict.passed() {
        info!(notes = verdict.notes().count(), "verification passed");
    } else {
        warn!(
            failures = verdict.failures().count(),
            "verification failed"
        );
    }
    verdict
}

fn check_positive(
    contents: &mut Contents<'_>,
    report: &mut Report,
    rule: &PatchRule,
    matcher: Option<&Matcher>,
    result: Option<&PatchApplicationResult>,
) {
    let Some(result) = result else {
        report.push(&rule.id, Severity::Failure, ViolationKind::MissingResult);
        return;
    };

    let files = match &result.scope {
        ScopeStatus::NoFiles { missing } => {
            let severity = if rule.required {
                Severity::Failure
            } else {
                Severity::Informational
            };
            report.push(
                &rule.id,
                severity,
                ViolationKind::EmptyScope {
                    missing: missing.clone(),
                },
            );
            return;
        }
        ScopeStatus::Resolved { files } => files,
    };

    for file in result.patched_files() {
        match contents.get(file) {
            Ok(content) => {
                if rule.count_markers(content) == 0 {
                    report.push(
                        &rule.id,
                        Severity::Failure,
                        ViolationKind::MissingMarker { file: file.clone() },
                    );
                }
            }
            Err(reason) => report.push(
                &rule.id,
                Severity::Failure,
                ViolationKind::Unreadable {
                    file: file.clone(),
                    reason,
                },
            ),
        }
    }

    let Some(matcher) = matcher else {
        report.push(
            &rule.id,
            Severity::Failure,
            ViolationKind::InvalidMatcher {
                reason: "arguments pattern does not compile".to_string(),
            },
        );
        return;
    };

    if rule.required && result.files_touched.is_empty() && result.already_patched.is_empty() {
        let hint = files
            .iter()
            .filter_map(|file| contents.get(file).ok().map(|c| near_miss(matcher, c)))
            .flatten()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(candidate, _)| candidate);
        report.push(&rule.id, Severity::Failure, ViolationKind::NoOccurrences { hint });
    }

    if rule.policy == MatchPolicy::AllOccurrences {
        for file in files {
            let Ok(content) = contents.get(file) else {
                continue;
            };
            for span in matcher.find_all(content) {
                let location = locate(file, content, span);
                debug!(rule = %rule.id, %location, "occurrence survived patching");
                report.push(&rule.id, Severity::Failure, ViolationKind::Unpatched { location });
            }
        }
    }
}

fn check_negative(
    contents: &mut Contents<'_>,
    report: &mut Report,
    rules: &PatchRuleSet,
    matchers: &[(&PatchRule, Option<Matcher>)],
    results: &[PatchApplicationResult],
) {
    let mut seen: HashSet<(PathBuf, usize)> = HashSet::new();

    for rule in &rules.rules {
        let Some(residual) = rule.residual_matcher() else {
            continue;
        };
        let Some(files) = results
            .iter()
            .find(|r| r.rule_id == rule.id)
            .and_then(PatchApplicationResult::scope_files)
        else {
            continue;
        };

        for file in files {
            let Ok(content) = contents.get(file) else {
                continue;
            };
            let map = LexicalMap::new(content);

            // Hits of an all-occurrences rule covering this file are reported
            // by the positive check against that rule. First-only rules leave
            // their later hits to this check.
            let owned: Vec<Span> = matchers
                .iter()
                .filter(|(owner, _)| owner.policy == MatchPolicy::AllOccurrences)
                .filter(|(owner, _)| {
                    results
                        .iter()
                        .any(|r| r.rule_id == owner.id && r.in_scope(file))
                })
                .filter_map(|(_, matcher)| matcher.as_ref())
                .flat_map(|matcher| matcher.find_all_in(content, &map))
                .collect();

            for span in residual.find_all_in(content, &map) {
                if owned.iter().any(|o| o.contains(span.start)) {
                    continue;
                }
                if !seen.insert((file.clone(), span.start)) {
                    continue;
                }
                let severity = if rules.must_fully_patch(file) {
                    Severity::Failure
                } else {
                    Severity::Informational
                };
                let location = locate(file, content, span);
                debug!(rule = %rule.id, %location, ?severity, "residual occurrence");
                report.push(&rule.id, severity, ViolationKind::Residual { location });
            }
        }
    }
}

fn locate(file: &Path, content: &str, span: Span) -> Location {
    let (line, context) = line_context(content, span.start);
    Location {
        file: file.to_path_buf(),
        line,
        context,
    }
}

/// Closest token in `content` to the matcher's anchor, with its similarity.
fn near_miss(matcher: &Matcher, content: &str) -> Option<(String, f64)> {
    let anchor = matcher.anchor();
    let pattern = match matcher {
        Matcher::Call(_) => r"[A-Za-z_][A-Za-z0-9_]{3,}",
        Matcher::Literal(_) => r"\b\d+(?:\.\d*)?[eE][-+]?\d+\b",
    };
    let tokens = cache::get_or_compile(pattern).ok()?;
    let map = LexicalMap::new(content);

    tokens
        .find_iter(content)
        .filter(|m| !map.is_masked(m.start()) && m.as_str() != anchor)
        .map(|m| (m.as_str().to_string(), strsim::jaro_winkler(anchor, m.as_str())))
        .filter(|(_, score)| *score >= HINT_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
}
