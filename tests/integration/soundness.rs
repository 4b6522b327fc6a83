//! The verifier catches what the engine missed or what was undone later.

use crate::fixture::{self, read, sfcgal_tree, write};
use lod2_patcher::config::load_builtin;
use lod2_patcher::engine::{apply_rules, check_rules};
use lod2_patcher::tree::SourceTree;
use lod2_patcher::verify::{verify, Severity, ViolationKind};
use std::path::PathBuf;

#[test]
fn test_unpatched_tree_fails_read_only_verification() {
    let dir = sfcgal_tree();
    let before = fixture::snapshot(dir.path());
    let rules = load_builtin().unwrap();
    let tree = SourceTree::open(dir.path()).unwrap();

    let results = check_rules(&tree, &rules).unwrap();
    let verdict = verify(&tree, &rules, &results);

    assert!(!verdict.passed());
    assert!(verdict
        .missing_expected_markers()
        .contains(&PathBuf::from("src/algorithm/isValid.cpp")));
    assert_eq!(fixture::snapshot(dir.path()), before);
}

#[test]
fn test_variant_in_must_fully_patch_file_fails() {
    let dir = sfcgal_tree();
    // A validity assertion form no rule knows about.
    write(
        dir.path(),
        "src/algorithm/isValid.cpp",
        &fixture::IS_VALID_CPP.replace(
            "    return Validity::invalid(\"ring not closed\");",
            "    SFCGAL_ASSERT_GEOMETRY_VALIDITY_RING(p.exteriorRing());\n        return Validity::invalid(\"ring not closed\");",
        ),
    );

    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let results = apply_rules(&mut tree, &rules).unwrap();
    let verdict = verify(&tree, &rules, &results);

    assert!(!verdict.passed());
    let residual: Vec<_> = verdict
        .failures()
        .filter_map(|v| match &v.kind {
            ViolationKind::Residual { location } => Some(location),
            _ => None,
        })
        .collect();
    // Reported once although four rules share the residual pattern.
    assert_eq!(residual.len(), 1);
    assert_eq!(residual[0].file, PathBuf::from("src/algorithm/isValid.cpp"));
    assert_eq!(
        residual[0].context,
        "SFCGAL_ASSERT_GEOMETRY_VALIDITY_RING(p.exteriorRing());"
    );
}

#[test]
fn test_variant_outside_must_fully_patch_is_a_note() {
    let dir = sfcgal_tree();
    write(
        dir.path(),
        "src/algorithm/detail/triangulate.cpp",
        "void triangulate(const Geometry& g)\n{\n    SFCGAL_ASSERT_GEOMETRY_VALIDITY_RING(g);\n}\n",
    );

    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let results = apply_rules(&mut tree, &rules).unwrap();
    let verdict = verify(&tree, &rules, &results);

    assert!(verdict.passed(), "{:#?}", verdict.violations());
    let note = verdict
        .notes()
        .find(|v| matches!(v.kind, ViolationKind::Residual { .. }))
        .unwrap();
    assert_eq!(note.severity, Severity::Informational);
    assert!(note.to_string().contains("src/algorithm/detail/triangulate.cpp:3"));
}

#[test]
fn test_reverted_file_fails_positive_check() {
    let dir = sfcgal_tree();
    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let results = apply_rules(&mut tree, &rules).unwrap();

    // Someone restores the pristine file after patching.
    write(dir.path(), "src/algorithm/volume.cpp", fixture::VOLUME_CPP);

    let verdict = verify(&tree, &rules, &results);
    assert!(!verdict.passed());
    assert!(verdict
        .missing_expected_markers()
        .contains(&PathBuf::from("src/algorithm/volume.cpp")));
    let unpatched = &verdict.unpatched_occurrences()["suppress-validity-assertion"];
    assert_eq!(unpatched.len(), 1);
    assert_eq!(unpatched[0].context, "SFCGAL_ASSERT_GEOMETRY_VALIDITY(g);");
}

#[test]
fn test_patched_tree_verifies_on_fresh_check() {
    let dir = sfcgal_tree();
    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    apply_rules(&mut tree, &rules).unwrap();

    // What `lod2-patcher verify` does: recompute results without writing.
    let results = check_rules(&tree, &rules).unwrap();
    let verdict = verify(&tree, &rules, &results);
    assert!(verdict.passed(), "{:#?}", verdict.violations());
    assert!(read(dir.path(), "src/algorithm/volume.cpp").contains("lod2-patch["));
}
