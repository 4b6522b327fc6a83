//! Patch engine - applies a rule set to a source tree
//!
//! This module:
//! - Resolves every rule scope before touching anything (misconfigured scopes
//!   fail the run with no file written)
//! - Groups rules by file so each file is read once, rewritten by the rules in
//!   rule-set order, and written once, atomically
//! - Records per-rule replacement counts and already-patched files
//! - Refuses rewrites that change the file's delimiter balance
//!
//! Planning is separate from writing: [`plan_rules`] computes every rewrite
//! without side effects (used for dry runs, status and diffs), and
//! [`apply_rules`] writes the plan.

use crate::config::{MatchPolicy, PatchRule, PatchRuleSet, Scope};
use crate::edit::{splice_all, EditError, RewriteResult, Splice};
use crate::lexer::LexicalMap;
use crate::matcher::Matcher;
use crate::tree::{slash_path, SourceTree, TreeError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How a rule's scope resolved against the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ScopeStatus {
    /// At least one file in scope exists.
    Resolved { files: BTreeSet<PathBuf> },
    /// Nothing in scope exists in this tree (e.g. a file absent from this
    /// library version).
    NoFiles { missing: Vec<PathBuf> },
}

/// Outcome of one rule over the whole tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchApplicationResult {
    pub rule_id: String,
    pub scope: ScopeStatus,
    /// Files in which this run replaced at least one occurrence.
    pub files_touched: BTreeSet<PathBuf>,
    pub occurrences_replaced: usize,
    /// Files with no occurrence left but the rule's marker present.
    pub already_patched: BTreeSet<PathBuf>,
    /// Markers of this rule across the scope after the run.
    pub markers_present: usize,
}

impl PatchApplicationResult {
    fn new(rule_id: &str, scope: ScopeStatus) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            scope,
            files_touched: BTreeSet::new(),
            occurrences_replaced: 0,
            already_patched: BTreeSet::new(),
            markers_present: 0,
        }
    }

    /// Files that carry this rule's effect, patched now or earlier.
    pub fn patched_files(&self) -> BTreeSet<&PathBuf> {
        self.files_touched
            .iter()
            .chain(self.already_patched.iter())
            .collect()
    }

    /// Files in scope (empty when the scope resolved to nothing).
    pub fn scope_files(&self) -> Option<&BTreeSet<PathBuf>> {
        match &self.scope {
            ScopeStatus::Resolved { files } => Some(files),
            ScopeStatus::NoFiles { .. } => None,
        }
    }

    pub fn in_scope(&self, file: &Path) -> bool {
        self.scope_files().is_some_and(|files| files.contains(file))
    }
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("rule '{rule_id}': {source}")]
    Scope { rule_id: String, source: TreeError },

    #[error("required rule '{rule_id}' matches no file in the tree (scope: {scope})")]
    UnresolvedScope { rule_id: String, scope: String },

    #[error("rule '{rule_id}': invalid matcher: {source}")]
    Matcher {
        rule_id: String,
        source: regex::Error,
    },

    #[error("cannot read {file} as text: {source}")]
    Read { file: PathBuf, source: TreeError },

    #[error("rewriting {file} would unbalance delimiters (rules: {})", rule_ids.join(", "))]
    Unbalanced {
        file: PathBuf,
        rule_ids: Vec<String>,
    },

    #[error("rule '{rule_id}' produced conflicting rewrites in {file}: {source}")]
    Splice {
        rule_id: String,
        file: PathBuf,
        source: EditError,
    },

    #[error("failed to write {file}: {source}")]
    Write { file: PathBuf, source: EditError },
}

impl PatchError {
    /// True for errors caused by the rule set rather than the tree's files.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PatchError::Scope { .. } | PatchError::UnresolvedScope { .. } | PatchError::Matcher { .. }
        )
    }
}

/// One file's planned rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRewrite {
    pub file: PathBuf,
    pub before: String,
    pub after: String,
    /// Rules that changed this file, in application order.
    pub rule_ids: Vec<String>,
}

/// Everything a run would do, computed without writing.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    pub results: Vec<PatchApplicationResult>,
    pub rewrites: Vec<FileRewrite>,
}

struct CompiledRule<'a> {
    rule: &'a PatchRule,
    matcher: Matcher,
    replacement: String,
}

/// Compute the rewrites of `rules` over `tree` without writing.
pub fn plan_rules(tree: &SourceTree, rules: &PatchRuleSet) -> Result<PatchPlan, PatchError> {
    let compiled = rules
        .rules
        .iter()
        .map(|rule| {
            let matcher = rule.matcher().map_err(|source| PatchError::Matcher {
                rule_id: rule.id.clone(),
                source,
            })?;
            Ok(CompiledRule {
                rule,
                matcher,
                replacement: rule.replacement(),
            })
        })
        .collect::<Result<Vec<_>, PatchError>>()?;

    // Preflight: every scope resolves before any file is read.
    let mut results = Vec::with_capacity(compiled.len());
    let mut rules_by_file: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();

    for (idx, compiled_rule) in compiled.iter().enumerate() {
        let rule = compiled_rule.rule;
        let resolution = tree
            .resolve(&rule.scope)
            .map_err(|source| PatchError::Scope {
                rule_id: rule.id.clone(),
                source,
            })?;

        if resolution.files.is_empty() {
            if rule.required {
                return Err(PatchError::UnresolvedScope {
                    rule_id: rule.id.clone(),
                    scope: describe_scope(&rule.scope),
                });
            }
            warn!(rule = %rule.id, missing = ?resolution.missing, "scope matched no files");
            results.push(PatchApplicationResult::new(
                &rule.id,
                ScopeStatus::NoFiles {
                    missing: resolution.missing,
                },
            ));
            continue;
        }

        for file in &resolution.files {
            rules_by_file.entry(file.clone()).or_default().push(idx);
        }
        results.push(PatchApplicationResult::new(
            &rule.id,
            ScopeStatus::Resolved {
                files: resolution.files,
            },
        ));
    }

    let mut rewrites = Vec::new();

    for (file, rule_indices) in rules_by_file {
        let before = tree
            .read_to_string(&file)
            .map_err(|source| PatchError::Read {
                file: file.clone(),
                source,
            })?;
        let mut content = before.clone();
        let mut changed_by = Vec::new();

        for &idx in &rule_indices {
            let compiled_rule = &compiled[idx];
            let rule = compiled_rule.rule;
            let result = &mut results[idx];

            // A first-only rule is done once its marker is in the file.
            if rule.policy == MatchPolicy::FirstOnly && rule.count_markers(&content) > 0 {
                debug!(rule = %rule.id, file = %file.display(), "already patched");
                result.already_patched.insert(file.clone());
                continue;
            }

            let mut spans = compiled_rule.matcher.find_all(&content);
            if rule.policy == MatchPolicy::FirstOnly {
                spans.truncate(1);
            }

            if spans.is_empty() {
                if rule.count_markers(&content) > 0 {
                    debug!(rule = %rule.id, file = %file.display(), "already patched");
                    result.already_patched.insert(file.clone());
                }
                continue;
            }

            let splices: Vec<Splice> = spans
                .iter()
                .map(|span| Splice {
                    start: span.start,
                    end: span.end,
                    text: compiled_rule.replacement.clone(),
                })
                .collect();
            content = splice_all(&content, &splices).map_err(|source| PatchError::Splice {
                rule_id: rule.id.clone(),
                file: file.clone(),
                source,
            })?;

            debug!(
                rule = %rule.id,
                file = %file.display(),
                occurrences = spans.len(),
                "rewrote occurrences"
            );
            result.files_touched.insert(file.clone());
            result.occurrences_replaced += spans.len();
            changed_by.push(rule.id.clone());
        }

        for &idx in &rule_indices {
            results[idx].markers_present += compiled[idx].rule.count_markers(&content);
        }

        if content == before {
            continue;
        }

        let balance_before = LexicalMap::new(&before).delimiter_balance(&before);
        let balance_after = LexicalMap::new(&content).delimiter_balance(&content);
        if balance_before != balance_after {
            return Err(PatchError::Unbalanced {
                file,
                rule_ids: changed_by,
            });
        }

        rewrites.push(FileRewrite {
            file,
            before,
            after: content,
            rule_ids: changed_by,
        });
    }

    Ok(PatchPlan { results, rewrites })
}

/// Apply `rules` to `tree` in place.
///
/// Nothing is written unless every scope resolves and every file's rewrite
/// was computed; each file is then replaced atomically. Running the same
/// rule set again is a no-op.
pub fn apply_rules(
    tree: &mut SourceTree,
    rules: &PatchRuleSet,
) -> Result<Vec<PatchApplicationResult>, PatchError> {
    let plan = plan_rules(tree, rules)?;

    for rewrite in &plan.rewrites {
        let outcome = tree
            .rewrite(&rewrite.file, &rewrite.before, &rewrite.after)
            .map_err(|source| PatchError::Write {
                file: rewrite.file.clone(),
                source,
            })?;
        match outcome {
            RewriteResult::Applied { bytes_written, .. } => info!(
                file = %rewrite.file.display(),
                rules = %rewrite.rule_ids.join(","),
                bytes_written,
                "patched"
            ),
            RewriteResult::AlreadyApplied { .. } => {
                debug!(file = %rewrite.file.display(), "content already up to date")
            }
        }
    }

    Ok(plan.results)
}

/// Compute results without mutating the tree.
///
/// Mirrors [`apply_rules`]: `files_touched`/`occurrences_replaced` mean
/// "would be patched".
pub fn check_rules(
    tree: &SourceTree,
    rules: &PatchRuleSet,
) -> Result<Vec<PatchApplicationResult>, PatchError> {
    plan_rules(tree, rules).map(|plan| plan.results)
}

fn describe_scope(scope: &Scope) -> String {
    scope
        .entries()
        .map(|entry| slash_path(Path::new(entry)))
        .collect::<Vec<_>>()
        .join(", ")
}
