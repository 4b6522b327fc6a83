//! Patch-set fingerprint recorded in build artifacts.

use crate::engine::PatchApplicationResult;
use crate::tree::slash_path;
use xxhash_rust::xxh3::xxh3_128;

/// Stable digest of which rules took effect where.
///
/// Covers each rule id with its patched files (touched now or already
/// patched) and its marker count, in rule-id order. Re-running the engine on
/// a patched tree yields the same fingerprint as the first run.
pub fn patch_fingerprint(results: &[PatchApplicationResult]) -> String {
    let mut ordered: Vec<&PatchApplicationResult> = results.iter().collect();
    ordered.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));

    let mut canonical = String::new();
    for result in ordered {
        canonical.push_str(&result.rule_id);
        canonical.push('\n');
        for file in result.patched_files() {
            canonical.push('\t');
            canonical.push_str(&slash_path(file));
            canonical.push('\n');
        }
        canonical.push_str(&format!("\tmarkers={}\n", result.markers_present));
    }

    format!("{:032x}", xxh3_128(canonical.as_bytes()))
}
