//! The built-in SFCGAL rule set against a mock source tree.

use crate::fixture::{self, read, sfcgal_tree, write};
use lod2_patcher::config::load_builtin;
use lod2_patcher::engine::{apply_rules, ScopeStatus};
use lod2_patcher::matcher::Matcher;
use lod2_patcher::pipeline::Pipeline;
use lod2_patcher::tree::SourceTree;
use lod2_patcher::verify::{verify, ViolationKind};
use std::path::PathBuf;

const ASSERTION_FORMS: [&str; 4] = [
    "SFCGAL_ASSERT_GEOMETRY_VALIDITY",
    "SFCGAL_ASSERT_GEOMETRY_VALIDITY_2D",
    "SFCGAL_ASSERT_GEOMETRY_VALIDITY_3D",
    "SFCGAL_ASSERT_GEOMETRY_VALIDITY_ON_PLANE",
];

fn live_count(matcher: &Matcher, root: &std::path::Path, files: &[&str]) -> usize {
    files
        .iter()
        .map(|f| matcher.find_all(&read(root, f)).len())
        .sum()
}

#[test]
fn test_tolerance_rewritten_everywhere_in_scope() {
    let dir = sfcgal_tree();
    let files = [
        "src/algorithm/isValid.cpp",
        "src/algorithm/isValid.h",
        "src/algorithm/plane.h",
    ];
    assert_eq!(live_count(&Matcher::literal("1e-9"), dir.path(), &files), 3);

    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let results = apply_rules(&mut tree, &rules).unwrap();

    let tolerance = results
        .iter()
        .find(|r| r.rule_id == "relax-planarity-epsilon")
        .unwrap();
    assert_eq!(tolerance.occurrences_replaced, 3);
    assert_eq!(tolerance.files_touched.len(), 3);
    assert_eq!(live_count(&Matcher::literal("1e-9"), dir.path(), &files), 0);
    assert_eq!(live_count(&Matcher::literal("1e-2"), dir.path(), &files), 3);

    // Commented mentions are documentation, not tolerances.
    assert!(read(dir.path(), "src/algorithm/isValid.cpp")
        .contains("// Rings closer than 1e-9 are considered closed."));
}

#[test]
fn test_tolerance_rewritten_three_times_in_one_file() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/algorithm/isValid.cpp",
        "// 1e-9 is the historical epsilon.\n\
         const double snap = 1e-9;\n\
         if (d > 1e-9 && e < 1e-9) {}\n",
    );
    let rules = lod2_patcher::config::load_from_str(
        r#"
[[rules]]
id = "relax"
required = true
scope = { paths = ["src/algorithm/isValid.cpp"] }
[rules.action]
type = "tolerance-rewrite"
from = "1e-9"
to = "1e-2"
"#,
    )
    .unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();

    let results = apply_rules(&mut tree, &rules).unwrap();
    assert_eq!(results[0].occurrences_replaced, 3);
    assert_eq!(results[0].files_touched.len(), 1);
    assert_eq!(results[0].markers_present, 3);
    assert_eq!(
        read(dir.path(), "src/algorithm/isValid.cpp"),
        "// 1e-9 is the historical epsilon.\n\
         const double snap = 1e-2 /* lod2-patch[relax]: was 1e-9 */;\n\
         if (d > 1e-2 /* lod2-patch[relax]: was 1e-9 */ && e < 1e-2 /* lod2-patch[relax]: was 1e-9 */) {}\n"
    );
    assert!(verify(&tree, &rules, &results).passed());
}

#[test]
fn test_self_intersection_gate_missed_by_filters_fails() {
    let dir = sfcgal_tree();
    write(
        dir.path(),
        "src/algorithm/isValid.cpp",
        &fixture::IS_VALID_CPP.replace("selfIntersects(ring)", "selfIntersects(p.ringN(r))"),
    );

    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let results = apply_rules(&mut tree, &rules).unwrap();
    let ring = results
        .iter()
        .find(|r| r.rule_id == "shortcut-ring-self-intersection")
        .unwrap();
    assert_eq!(ring.occurrences_replaced, 0);

    let verdict = verify(&tree, &rules, &results);
    assert!(!verdict.passed());
    let residual: Vec<_> = verdict
        .failures()
        .filter_map(|v| match &v.kind {
            ViolationKind::Residual { location } => Some(location),
            _ => None,
        })
        .collect();
    assert_eq!(residual.len(), 1);
    assert_eq!(residual[0].context, "if (selfIntersects(p.ringN(r))) {");
}

#[test]
fn test_all_assertion_forms_suppressed() {
    let dir = sfcgal_tree();
    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();

    let results = apply_rules(&mut tree, &rules).unwrap();
    let verdict = verify(&tree, &rules, &results);
    assert!(verdict.passed(), "{:#?}", verdict.violations());

    let cpp = [
        "src/algorithm/isValid.cpp",
        "src/algorithm/volume.cpp",
        "src/algorithm/area.cpp",
    ];
    let family = Matcher::call_prefix("SFCGAL_ASSERT_GEOMETRY_VALIDITY");
    assert_eq!(live_count(&family, dir.path(), &cpp), 0);

    let markers: usize = cpp
        .iter()
        .map(|f| read(dir.path(), f))
        .map(|content| {
            ASSERTION_FORMS
                .iter()
                .map(|form| content.matches(&format!("]: {form} disabled")).count())
                .sum::<usize>()
        })
        .sum();
    assert_eq!(markers, 4);

    // The macro definitions in the header are untouched.
    assert_eq!(read(dir.path(), "src/algorithm/isValid.h").matches("#define SFCGAL_ASSERT").count(), 4);
    assert!(!verdict
        .unpatched_occurrences()
        .contains_key("suppress-validity-assertion"));
}

#[test]
fn test_self_intersection_gates_short_circuited() {
    let dir = sfcgal_tree();
    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    apply_rules(&mut tree, &rules).unwrap();

    let is_valid = read(dir.path(), "src/algorithm/isValid.cpp");
    assert!(is_valid.contains(
        "if (false /* lod2-patch[shortcut-polyhedral-self-intersection]: selfIntersects3D short-circuited */)"
    ));
    assert!(is_valid.contains(
        "if (false /* lod2-patch[shortcut-tin-self-intersection]: selfIntersects3D short-circuited */)"
    ));
    assert!(is_valid.contains(
        "if (false /* lod2-patch[shortcut-ring-self-intersection]: selfIntersects short-circuited */)"
    ));
    assert!(is_valid.contains("const SurfaceGraph graph(s);"));
}

#[test]
fn test_missing_optional_file_is_informational() {
    let dir = sfcgal_tree();
    std::fs::remove_file(dir.path().join("src/algorithm/plane.h")).unwrap();

    let rules = lod2_patcher::config::load_from_str(
        r#"
[[rules]]
id = "plane-epsilon"
scope = { paths = ["src/algorithm/plane.h"] }
[rules.action]
type = "tolerance-rewrite"
from = "1e-9"
to = "1e-2"
"#,
    )
    .unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let results = apply_rules(&mut tree, &rules).unwrap();

    assert!(results[0].files_touched.is_empty());
    assert_eq!(results[0].occurrences_replaced, 0);
    assert_eq!(
        results[0].scope,
        ScopeStatus::NoFiles {
            missing: vec![PathBuf::from("src/algorithm/plane.h")]
        }
    );

    let verdict = verify(&tree, &rules, &results);
    assert!(verdict.passed());
    assert_eq!(verdict.notes().count(), 1);
}

#[test]
fn test_missing_required_file_fails_before_any_write() {
    let dir = sfcgal_tree();
    std::fs::remove_file(dir.path().join("src/algorithm/isValid.cpp")).unwrap();
    let before = fixture::snapshot(dir.path());

    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let err = Pipeline::new(&rules).patch_and_verify(&mut tree).unwrap_err();

    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("shortcut-polyhedral-self-intersection"));
    assert_eq!(fixture::snapshot(dir.path()), before);
}

#[test]
fn test_renamed_macro_fails_verification_with_hint() {
    let dir = sfcgal_tree();
    write(
        dir.path(),
        "src/algorithm/volume.cpp",
        &fixture::VOLUME_CPP.replace(
            "SFCGAL_ASSERT_GEOMETRY_VALIDITY(g);",
            "SFCGAL_ASSERT_GEOMETRY_VALID(g);",
        ),
    );

    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();
    let err = Pipeline::new(&rules).patch_and_verify(&mut tree).unwrap_err();

    assert_eq!(err.exit_code(), 4);
    let message = err.to_string();
    assert!(message.contains("rule 'suppress-validity-assertion'"));
    assert!(message.contains("did you mean `SFCGAL_ASSERT_GEOMETRY_VALID`?"));
}
