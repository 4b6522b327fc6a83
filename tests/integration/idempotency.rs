//! Patching a patched tree changes nothing.

use crate::fixture::{self, sfcgal_tree, snapshot, write};
use lod2_patcher::config::load_builtin;
use lod2_patcher::engine::apply_rules;
use lod2_patcher::fingerprint::patch_fingerprint;
use lod2_patcher::tree::SourceTree;
use proptest::prelude::*;
use tempfile::TempDir;

#[test]
fn test_second_run_is_a_no_op() {
    let dir = sfcgal_tree();
    let rules = load_builtin().unwrap();
    let mut tree = SourceTree::open(dir.path()).unwrap();

    let first = apply_rules(&mut tree, &rules).unwrap();
    let after_first = snapshot(dir.path());

    let second = apply_rules(&mut tree, &rules).unwrap();
    assert_eq!(snapshot(dir.path()), after_first);
    assert!(second.iter().all(|r| r.occurrences_replaced == 0));
    assert!(second.iter().all(|r| r.files_touched.is_empty()));
    assert_eq!(patch_fingerprint(&first), patch_fingerprint(&second));
}

/// Fragments a call site can be assembled from.
fn call_site() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("    SFCGAL_ASSERT_GEOMETRY_VALIDITY(g);\n".to_string()),
        Just("    SFCGAL_ASSERT_GEOMETRY_VALIDITY_2D( *g );\n".to_string()),
        Just("    SFCGAL_ASSERT_GEOMETRY_VALIDITY_3D(geometry(i));\n".to_string()),
        Just("    SFCGAL_ASSERT_GEOMETRY_VALIDITY_ON_PLANE(p);\n".to_string()),
        Just("    // SFCGAL_ASSERT_GEOMETRY_VALIDITY(g);\n".to_string()),
        Just("    const char* s = \"SFCGAL_ASSERT_GEOMETRY_VALIDITY(g)\";\n".to_string()),
        Just("    if (d > 1e-9) { return; }\n".to_string()),
        Just("    double eps = 1e-9f;\n".to_string()),
        Just("    double big = 11e-9;\n".to_string()),
        Just("    area += 1e-2;\n".to_string()),
        "[a-z]{1,8}".prop_map(|name| format!("    {name}();\n")),
    ]
}

fn body() -> impl Strategy<Value = String> {
    prop::collection::vec(call_site(), 0..12).prop_map(|lines| {
        format!("void f(const Geometry& g)\n{{\n{}}}\n", lines.concat())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_apply_twice_equals_apply_once(volume in body(), area in body()) {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "CMakeLists.txt", fixture::CMAKE_LISTS);
        write(dir.path(), "src/algorithm/isValid.cpp", fixture::IS_VALID_CPP);
        write(dir.path(), "src/algorithm/isValid.h", fixture::IS_VALID_H);
        write(dir.path(), "src/algorithm/volume.cpp", &volume);
        write(dir.path(), "src/algorithm/area.cpp", &area);

        let rules = load_builtin().unwrap();
        let mut tree = SourceTree::open(dir.path()).unwrap();

        let first = apply_rules(&mut tree, &rules).unwrap();
        let once = snapshot(dir.path());
        let second = apply_rules(&mut tree, &rules).unwrap();

        prop_assert_eq!(snapshot(dir.path()), once);
        prop_assert!(second.iter().all(|r| r.occurrences_replaced == 0));
        prop_assert_eq!(patch_fingerprint(&first), patch_fingerprint(&second));
    }
}
