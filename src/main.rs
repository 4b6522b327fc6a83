use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use lod2_patcher::config::{load_builtin, load_from_path, ConfigError, PatchRuleSet};
use lod2_patcher::engine::{check_rules, plan_rules, PatchApplicationResult, ScopeStatus};
use lod2_patcher::pipeline::{Pipeline, PipelineError};
use lod2_patcher::tree::{slash_path, SourceTree};
use lod2_patcher::verify::{verify, Severity, VerificationVerdict};
use lod2_patcher::{logging, patch_fingerprint, BuildOrchestrator};
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "lod2-patcher")]
#[command(about = "Relax SFCGAL validity checks for LOD2 building solids, verify, then build", long_about = None)]
#[command(version)]
struct Cli {
    /// Log progress (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct TreeArgs {
    /// SFCGAL source tree root (default: $LOD2_SOURCE_TREE, then auto-detected)
    #[arg(short, long)]
    tree: Option<PathBuf>,

    /// Rule set file (default: the built-in sfcgal-lod2 rules)
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Library version, instead of reading it from CMakeLists.txt
    #[arg(long)]
    library_version: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch, verify, then build and install
    Run {
        #[command(flatten)]
        target: TreeArgs,

        /// Install prefix (overrides the rule set's build.prefix)
        #[arg(long)]
        prefix: Option<PathBuf>,

        /// Parallel build jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Write a JSON manifest of the installed artifact
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Patch and verify without building
    Apply {
        #[command(flatten)]
        target: TreeArgs,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Verify the tree is fully patched (read-only)
    Verify {
        #[command(flatten)]
        target: TreeArgs,
    },

    /// Show which rules are applied or pending
    Status {
        #[command(flatten)]
        target: TreeArgs,
    },

    /// List the rules in a rule set
    List {
        /// Rule set file (default: the built-in sfcgal-lod2 rules)
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },

    /// Print the patch fingerprint of the tree once patched
    Fingerprint {
        #[command(flatten)]
        target: TreeArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let outcome = match cli.command {
        Commands::Run {
            target,
            prefix,
            jobs,
            manifest,
        } => cmd_run(target, prefix, jobs, manifest),
        Commands::Apply {
            target,
            dry_run,
            diff,
        } => cmd_apply(target, dry_run, diff),
        Commands::Verify { target } => cmd_verify(target),
        Commands::Status { target } => cmd_status(target),
        Commands::List { rules } => cmd_list(rules),
        Commands::Fingerprint { target } => cmd_fingerprint(target),
    };

    if let Err(err) = outcome {
        let code = match err.downcast_ref::<PipelineError>() {
            Some(failure) => {
                report_failure(failure);
                failure.exit_code()
            }
            None => {
                eprintln!("{} {:#}", "error:".red().bold(), err);
                1
            }
        };
        std::process::exit(code);
    }

    Ok(())
}

fn report_failure(err: &PipelineError) {
    eprintln!(
        "{} {} failed",
        "✗".red(),
        err.stage().to_string().red().bold()
    );
    match err {
        PipelineError::Verification(failure) => print_violations(&failure.verdict),
        other => eprintln!("  {other}"),
    }
}

/// Load the rule set from `--rules`, or the built-in one.
fn load_rules(path: Option<&Path>) -> Result<PatchRuleSet, PipelineError> {
    let rules = match path {
        Some(path) => load_from_path(path)?,
        None => load_builtin()?,
    };
    Ok(rules)
}

/// Resolve the source tree root
///
/// Priority order:
/// 1. Explicit --tree flag
/// 2. LOD2_SOURCE_TREE environment variable
/// 3. An ancestor of the current directory that looks like an SFCGAL tree
/// 4. The current directory
fn resolve_tree(cli_tree: Option<PathBuf>) -> Result<SourceTree, PipelineError> {
    if let Some(path) = cli_tree {
        return Ok(SourceTree::open(path)?);
    }

    if let Ok(env_path) = env::var("LOD2_SOURCE_TREE") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(SourceTree::open(path)?);
        }
        eprintln!(
            "{}",
            format!("Warning: LOD2_SOURCE_TREE is set but path doesn't exist: {env_path}").yellow()
        );
    }

    let current = env::current_dir().map_err(|source| lod2_patcher::TreeError::Open {
        path: PathBuf::from("."),
        source,
    })?;
    if let Some(path) = auto_detect_tree(&current) {
        println!(
            "{}",
            format!("Auto-detected source tree: {}", path.display()).dimmed()
        );
        return Ok(SourceTree::open(path)?);
    }

    Ok(SourceTree::open(current)?)
}

/// Walk up from `start` looking for a CMake project with SFCGAL's layout.
fn auto_detect_tree(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join("CMakeLists.txt").is_file() && dir.join("src/algorithm").is_dir())
        .map(Path::to_path_buf)
}

fn open(target: &TreeArgs) -> Result<(PatchRuleSet, SourceTree), PipelineError> {
    let rules = load_rules(target.rules.as_deref())?;
    let tree = resolve_tree(target.tree.clone())?;
    Ok((rules, tree))
}

fn print_header(rules: &PatchRuleSet, tree: &SourceTree, version: Option<&str>) {
    println!("Source tree: {}", tree.root().display());
    println!("Rule set: {} ({} rules)", rules.meta.name, rules.rules.len());
    println!("Library version: {}", version.unwrap_or("unknown"));
    println!();
}

/// Helper: Show unified diff between original and patched content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!("\n{}", format!("--- {} (original)", slash_path(file)).dimmed());
    println!("{}", format!("+++ {} (patched)", slash_path(file)).dimmed());

    let diff = TextDiff::from_lines(original, modified);
    for hunk in diff.unified_diff().context_radius(2).iter_hunks() {
        println!("{}", hunk.header().to_string().cyan());
        for change in hunk.iter_changes() {
            let line = match change.tag() {
                ChangeTag::Delete => format!("-{change}").red(),
                ChangeTag::Insert => format!("+{change}").green(),
                ChangeTag::Equal => format!(" {change}").normal(),
            };
            print!("{line}");
            if change.missing_newline() {
                println!();
            }
        }
    }
}

fn print_results(results: &[PatchApplicationResult], dry_run: bool) {
    let verb = if dry_run { "Would patch" } else { "Patched" };
    for result in results {
        match &result.scope {
            ScopeStatus::NoFiles { missing } => {
                let missing: Vec<String> = missing.iter().map(|p| slash_path(p)).collect();
                println!(
                    "{} {}: no files in scope ({})",
                    "⊘".cyan(),
                    result.rule_id,
                    missing.join(", ").dimmed()
                );
            }
            ScopeStatus::Resolved { .. } if result.occurrences_replaced > 0 => {
                println!(
                    "{} {}: {} {} occurrence(s) in {} file(s)",
                    "✓".green(),
                    result.rule_id,
                    verb,
                    result.occurrences_replaced,
                    result.files_touched.len()
                );
            }
            ScopeStatus::Resolved { .. } if !result.already_patched.is_empty() => {
                println!(
                    "{} {}: Already applied in {} file(s)",
                    "⊙".yellow(),
                    result.rule_id,
                    result.already_patched.len()
                );
            }
            ScopeStatus::Resolved { .. } => {
                println!("{} {}: nothing to patch", "⊘".cyan(), result.rule_id);
            }
        }
    }
}

fn print_violations(verdict: &VerificationVerdict) {
    for violation in verdict.violations() {
        match violation.severity {
            Severity::Failure => eprintln!("  {} {}", "✗".red(), violation),
            Severity::Informational => eprintln!("  {} {}", "ℹ".cyan(), violation.to_string().dimmed()),
        }
    }
}

fn print_verdict(verdict: &VerificationVerdict) {
    println!();
    if verdict.passed() {
        println!("{} {}", "✓".green(), "Verification passed".green().bold());
    } else {
        println!("{} {}", "✗".red(), "Verification failed".red().bold());
    }
    print_violations(verdict);
}

fn cmd_run(
    target: TreeArgs,
    prefix: Option<PathBuf>,
    jobs: Option<usize>,
    manifest: Option<PathBuf>,
) -> Result<()> {
    let (rules, mut tree) = open(&target)?;
    let pipeline = Pipeline::new(&rules).library_version(target.library_version.clone());
    let version = pipeline
        .check_configuration(&tree)
        .map_err(PipelineError::from)?;
    let plan = rules
        .build
        .clone()
        .ok_or(PipelineError::Configuration(ConfigError::MissingBuildPlan))?;

    print_header(&rules, &tree, version.as_deref());

    let mut orchestrator = BuildOrchestrator::new(plan);
    if let Some(prefix) = prefix {
        orchestrator = orchestrator.prefix(prefix);
    }
    if let Some(jobs) = jobs {
        orchestrator = orchestrator.jobs(jobs);
    }
    if let Some(version) = version {
        orchestrator = orchestrator.version(version);
    }

    let report = pipeline.run(&mut tree, &mut orchestrator)?;
    print_results(&report.results, false);
    print_verdict(&report.verdict);

    if let Some(artifact) = &report.artifact {
        println!();
        println!(
            "{} Installed {} {}",
            "✓".green(),
            artifact.library_name().bold(),
            artifact.version()
        );
        println!("  fingerprint {}", artifact.patch_fingerprint());
        for path in artifact.installed() {
            println!("  {}", path.display());
        }

        if let Some(manifest) = manifest {
            artifact
                .write_manifest(&manifest)
                .with_context(|| format!("failed to write manifest {}", manifest.display()))?;
            println!("  manifest {}", manifest.display());
        }
    }

    Ok(())
}

fn cmd_apply(target: TreeArgs, dry_run: bool, show_diff: bool) -> Result<()> {
    let (rules, mut tree) = open(&target)?;
    let pipeline = Pipeline::new(&rules).library_version(target.library_version.clone());
    let version = pipeline
        .check_configuration(&tree)
        .map_err(PipelineError::from)?;

    print_header(&rules, &tree, version.as_deref());

    if dry_run || show_diff {
        let plan = plan_rules(&tree, &rules).map_err(PipelineError::from)?;
        if dry_run {
            println!("{}", "[DRY RUN - showing what would be applied]".cyan());
            print_results(&plan.results, true);
        }
        if show_diff {
            for rewrite in &plan.rewrites {
                display_diff(&rewrite.file, &rewrite.before, &rewrite.after);
            }
        }
        if dry_run {
            return Ok(());
        }
        println!();
    }

    let report = pipeline.patch_and_verify(&mut tree)?;
    print_results(&report.results, false);
    print_verdict(&report.verdict);

    Ok(())
}

fn cmd_verify(target: TreeArgs) -> Result<()> {
    let (rules, tree) = open(&target)?;
    let version = Pipeline::new(&rules)
        .library_version(target.library_version.clone())
        .check_configuration(&tree)
        .map_err(PipelineError::from)?;

    println!("{}", "Verifying patches...".bold());
    print_header(&rules, &tree, version.as_deref());

    let results = check_rules(&tree, &rules).map_err(PipelineError::from)?;
    let verdict = verify(&tree, &rules, &results);
    print_verdict(&verdict);

    if !verdict.passed() {
        std::process::exit(PipelineError::from(lod2_patcher::VerificationFailure { verdict }).exit_code());
    }

    Ok(())
}

fn cmd_status(target: TreeArgs) -> Result<()> {
    let (rules, tree) = open(&target)?;
    let version = Pipeline::new(&rules)
        .library_version(target.library_version.clone())
        .check_configuration(&tree)
        .map_err(PipelineError::from)?;

    println!("{}", "Patch Status Report".bold());
    print_header(&rules, &tree, version.as_deref());

    let results = check_rules(&tree, &rules).map_err(PipelineError::from)?;

    let mut applied = Vec::new();
    let mut pending = Vec::new();
    let mut absent = Vec::new();

    for result in &results {
        if result.occurrences_replaced > 0 {
            pending.push((
                result.rule_id.as_str(),
                format!("{} occurrence(s)", result.occurrences_replaced),
            ));
        } else if !result.already_patched.is_empty() {
            applied.push(result.rule_id.as_str());
        } else {
            let reason = match &result.scope {
                ScopeStatus::NoFiles { .. } => "no files in scope",
                ScopeStatus::Resolved { .. } => "no occurrence and no marker",
            };
            absent.push((result.rule_id.as_str(), reason.to_string()));
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} rules)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {id}");
        }
        println!();
    }

    for (label, symbol, group) in [
        ("PENDING".yellow().bold(), "⊙".yellow(), &pending),
        ("NOT FOUND".cyan().bold(), "⊘".cyan(), &absent),
    ] {
        if group.is_empty() {
            continue;
        }
        println!("{} {} ({} rules)", symbol, label, group.len());
        for (id, reason) in group {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_list(rules_path: Option<PathBuf>) -> Result<()> {
    let rules = load_rules(rules_path.as_deref())?;

    println!("{} {}", "Rule set:".bold(), rules.meta.name);
    if let Some(description) = &rules.meta.description {
        println!("  {}", description.dimmed());
    }
    if let Some(range) = &rules.meta.version_range {
        println!("  {} {}", "library versions:".dimmed(), range);
    }
    println!();

    for rule in &rules.rules {
        let required = if rule.required {
            "required".red().to_string()
        } else {
            "optional".dimmed().to_string()
        };
        println!("{} [{}] {}", rule.id.bold(), rule.kind(), required);
        if let Some(description) = &rule.description {
            println!("    {description}");
        }
        let scope: Vec<&str> = rule.scope.entries().collect();
        println!("    {} {}", "scope:".dimmed(), scope.join(", "));
        println!("    {} {}", "marker:".dimmed(), rule.marker());
    }

    if let Some(build) = &rules.build {
        println!();
        let deps: Vec<&str> = build.dependencies.iter().map(|d| d.name.as_str()).collect();
        println!(
            "{} {} (dependencies: {}) into {}",
            "Build:".bold(),
            build.target.name,
            if deps.is_empty() { "none".to_string() } else { deps.join(", ") },
            build.prefix
        );
    }

    Ok(())
}

fn cmd_fingerprint(target: TreeArgs) -> Result<()> {
    let (rules, tree) = open(&target)?;
    Pipeline::new(&rules)
        .library_version(target.library_version.clone())
        .check_configuration(&tree)
        .map_err(PipelineError::from)?;

    let results = check_rules(&tree, &rules).map_err(PipelineError::from)?;
    let pending: usize = results.iter().map(|r| r.occurrences_replaced).sum();
    if pending > 0 {
        eprintln!(
            "{}",
            format!("Note: {pending} occurrence(s) not yet patched; fingerprint is for the patched tree")
                .yellow()
        );
    }
    println!("{}", patch_fingerprint(&results));

    Ok(())
}
