//! Nothing is built from a tree that failed verification.

use crate::fixture::{self, sfcgal_tree, write};
use lod2_patcher::build::{
    BuildArtifact, BuildFailure, BuildOrchestrator, Builder, CommandOutput, Invocation, Toolchain,
};
use lod2_patcher::config::load_builtin;
use lod2_patcher::engine::PatchApplicationResult;
use lod2_patcher::pipeline::{Pipeline, PipelineError, Stage};
use lod2_patcher::tree::SourceTree;
use lod2_patcher::verify::VerificationVerdict;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Default)]
struct StubBuilder {
    invoked: bool,
}

impl Builder for StubBuilder {
    fn build(
        &mut self,
        _tree: &SourceTree,
        _verdict: &VerificationVerdict,
        _results: &[PatchApplicationResult],
    ) -> Result<BuildArtifact, BuildFailure> {
        self.invoked = true;
        Err(BuildFailure::EmptyCommand {
            stage: "stub".to_string(),
        })
    }
}

/// Pretends to be cmake: `--install` drops the library into the prefix.
struct FakeCmake {
    prefix: PathBuf,
    calls: Vec<Invocation>,
}

impl Toolchain for FakeCmake {
    fn run(&mut self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.calls.push(invocation.clone());
        if invocation.args.first().map(String::as_str) == Some("--install") {
            let lib = self.prefix.join("lib");
            fs::create_dir_all(&lib)?;
            fs::write(lib.join("libSFCGAL.so"), b"\x7fELF")?;
            fs::create_dir_all(self.prefix.join("lib/cmake/CGAL"))?;
            fs::write(self.prefix.join("lib/cmake/CGAL/CGALConfig.cmake"), "")?;
        }
        Ok(CommandOutput {
            success: true,
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

fn broken_tree() -> tempfile::TempDir {
    let dir = sfcgal_tree();
    write(
        dir.path(),
        "src/algorithm/isValid.cpp",
        &fixture::IS_VALID_CPP.replace("selfIntersects3D(tin, graph)", "selfIntersects3D(graph, tin)"),
    );
    dir
}

#[test]
fn test_stub_builder_never_invoked_on_failed_verdict() {
    let dir = broken_tree();
    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let mut builder = StubBuilder::default();

    let err = Pipeline::new(&rules).run(&mut tree, &mut builder).unwrap_err();

    assert!(!builder.invoked);
    assert_eq!(err.stage(), Stage::Verification);
    match err {
        PipelineError::Verification(failure) => {
            assert!(!failure.verdict.passed());
            assert!(failure
                .verdict
                .failures()
                .any(|v| v.rule_id == "shortcut-tin-self-intersection"));
        }
        other => panic!("expected a verification failure, got {other}"),
    }
}

#[test]
fn test_stub_builder_invoked_on_passing_verdict() {
    let dir = sfcgal_tree();
    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let mut builder = StubBuilder::default();

    let err = Pipeline::new(&rules).run(&mut tree, &mut builder).unwrap_err();
    assert!(builder.invoked);
    assert_eq!(err.exit_code(), 5);
}

fn orchestrator(prefix: &Path) -> BuildOrchestrator<FakeCmake> {
    let plan = load_builtin().unwrap().build.unwrap();
    BuildOrchestrator::with_toolchain(
        plan,
        FakeCmake {
            prefix: prefix.to_path_buf(),
            calls: Vec::new(),
        },
    )
    .prefix(prefix)
    .jobs(3)
}

#[test]
#[cfg(unix)]
fn test_full_run_builds_dependency_then_target() {
    let workspace = tempfile::tempdir().unwrap();
    let root = workspace.path().join("SFCGAL-1.5.2");
    let dir = sfcgal_tree();
    fs::rename(dir.path(), &root)
        .or_else(|_| copy_dir(dir.path(), &root))
        .unwrap();
    fs::create_dir_all(workspace.path().join("cgal")).unwrap();
    let prefix = workspace.path().join("prefix");

    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(&root).unwrap();
    let mut builder = orchestrator(&prefix);

    let report = Pipeline::new(&rules).run(&mut tree, &mut builder).unwrap();
    let artifact = report.artifact.unwrap();

    assert_eq!(artifact.library_name(), "SFCGAL");
    assert_eq!(artifact.version(), "1.5.2");
    assert_eq!(artifact.patch_fingerprint().len(), 32);
    assert!(artifact
        .installed()
        .contains(&prefix.join("lib/libSFCGAL.so.1")));

    let calls = &builder.toolchain().calls;
    assert_eq!(calls.len(), 6);
    // CGAL first, from its own directory.
    assert!(calls[0].cwd.ends_with("cgal"));
    assert!(calls[3].cwd.ends_with("SFCGAL-1.5.2"));
    assert!(calls[4].args.contains(&"3".to_string()));
}

#[test]
fn test_missing_library_after_install_is_a_build_failure() {
    struct NoInstall;
    impl Toolchain for NoInstall {
        fn run(&mut self, _invocation: &Invocation) -> io::Result<CommandOutput> {
            Ok(CommandOutput {
                success: true,
                code: Some(0),
                ..CommandOutput::default()
            })
        }
    }

    let workspace = tempfile::tempdir().unwrap();
    let dir = sfcgal_tree();
    let rules = load_builtin().unwrap();
    let mut plan = rules.build.clone().unwrap();
    plan.dependencies.clear();

    let mut tree = SourceTree::open(dir.path()).unwrap();
    let mut builder = BuildOrchestrator::with_toolchain(plan, NoInstall).prefix(workspace.path());

    let err = Pipeline::new(&rules).run(&mut tree, &mut builder).unwrap_err();
    assert_eq!(err.stage(), Stage::Build);
    assert!(matches!(
        err,
        PipelineError::Build(BuildFailure::MissingArtifact { .. })
    ));
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry?;
        let target = to.join(entry.path().strip_prefix(from).unwrap());
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
