//! Mock SFCGAL source tree with the call sites the built-in rules target.

use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const CMAKE_LISTS: &str = r#"cmake_minimum_required(VERSION 3.10)
project(SFCGAL VERSION 1.5.2 LANGUAGES CXX C)
"#;

pub const IS_VALID_H: &str = r#"#ifndef SFCGAL_ALGORITHM_ISVALID_H_
#define SFCGAL_ALGORITHM_ISVALID_H_

#include <SFCGAL/Validity.h>

#define SFCGAL_ASSERT_GEOMETRY_VALIDITY(g) SFCGAL::algorithm::assertValid(g)
#define SFCGAL_ASSERT_GEOMETRY_VALIDITY_2D(g) SFCGAL::algorithm::assertValid2D(g)
#define SFCGAL_ASSERT_GEOMETRY_VALIDITY_3D(g) SFCGAL::algorithm::assertValid3D(g)
#define SFCGAL_ASSERT_GEOMETRY_VALIDITY_ON_PLANE(g) SFCGAL::algorithm::assertValidOnPlane(g)

namespace SFCGAL {
namespace algorithm {

const Validity isValid(const Geometry& g, const double& toleranceAbs = 1e-9);

} // namespace algorithm
} // namespace SFCGAL

#endif
"#;

pub const PLANE_H: &str = r#"#ifndef SFCGAL_ALGORITHM_PLANE_H_
#define SFCGAL_ALGORITHM_PLANE_H_

namespace SFCGAL {
namespace algorithm {

template <typename Kernel>
bool isPlane3D(const Polygon& polygon, const double& toleranceAbs = 1e-9);

} // namespace algorithm
} // namespace SFCGAL

#endif
"#;

pub const IS_VALID_CPP: &str = r#"#include <SFCGAL/algorithm/isValid.h>
#include <SFCGAL/algorithm/plane.h>

namespace SFCGAL {
namespace algorithm {

// Rings closer than 1e-9 are considered closed.
const Validity isValid(const LineString& ring, const double& toleranceAbs)
{
    if (selfIntersects(ring)) {
        return Validity::invalid("ring self-intersects");
    }
    return Validity::valid();
}

const Validity isValid(const Polygon& p, const double& toleranceAbs)
{
    SFCGAL_ASSERT_GEOMETRY_VALIDITY_ON_PLANE(p);
    if (squaredDistance(p.exteriorRing().startPoint(), p.exteriorRing().endPoint()) > 1e-9) {
        return Validity::invalid("ring not closed");
    }
    return Validity::valid();
}

const Validity isValid(const PolyhedralSurface& s, const double& toleranceAbs)
{
    const SurfaceGraph graph(s);
    if (selfIntersects3D(s, graph)) {
        return Validity::invalid("PolyhedralSurface self intersects");
    }
    return Validity::valid();
}

const Validity isValid(const TriangulatedSurface& tin, const double& toleranceAbs)
{
    const SurfaceGraph graph(tin);
    if (selfIntersects3D(tin, graph)) {
        return Validity::invalid("TriangulatedSurface self intersects");
    }
    return Validity::valid();
}

} // namespace algorithm
} // namespace SFCGAL
"#;

pub const VOLUME_CPP: &str = r#"#include <SFCGAL/algorithm/volume.h>
#include <SFCGAL/algorithm/isValid.h>

namespace SFCGAL {
namespace algorithm {

Kernel::FT volume(const Geometry& g)
{
    SFCGAL_ASSERT_GEOMETRY_VALIDITY(g);
    return volume(g, NoValidityCheck());
}

Kernel::FT volume3D(const Geometry& g)
{
    SFCGAL_ASSERT_GEOMETRY_VALIDITY_3D(g);
    return volume(g, NoValidityCheck());
}

} // namespace algorithm
} // namespace SFCGAL
"#;

pub const AREA_CPP: &str = r#"#include <SFCGAL/algorithm/area.h>
#include <SFCGAL/algorithm/isValid.h>

namespace SFCGAL {
namespace algorithm {

double area2D(const Geometry& g)
{
    SFCGAL_ASSERT_GEOMETRY_VALIDITY_2D(g);
    return area2D(g, NoValidityCheck());
}

} // namespace algorithm
} // namespace SFCGAL
"#;

pub fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

/// A complete mock tree every built-in rule applies to.
pub fn sfcgal_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "CMakeLists.txt", CMAKE_LISTS);
    write(root, "src/algorithm/isValid.h", IS_VALID_H);
    write(root, "src/algorithm/plane.h", PLANE_H);
    write(root, "src/algorithm/isValid.cpp", IS_VALID_CPP);
    write(root, "src/algorithm/volume.cpp", VOLUME_CPP);
    write(root, "src/algorithm/area.cpp", AREA_CPP);
    dir
}

/// Content of every file in the tree, keyed by relative path.
pub fn snapshot(root: &Path) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (relative, fs::read_to_string(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}
