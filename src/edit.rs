use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// One byte-span replacement inside a file's text.
///
/// Every rule action compiles down to splices; a file's splices are applied
/// together and the result written once through [`Rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    /// Starting byte offset (inclusive)
    pub start: usize,
    /// Ending byte offset (exclusive)
    pub end: usize,
    /// New text for [start, end)
    pub text: String,
}

/// Apply non-overlapping splices to `content`.
///
/// Splices may be given in any order; they are applied bottom-to-top so
/// offsets stay valid.
pub fn splice_all(content: &str, splices: &[Splice]) -> Result<String, EditError> {
    let mut ordered: Vec<&Splice> = splices.iter().collect();
    ordered.sort_by(|a, b| b.start.cmp(&a.start));

    for window in ordered.windows(2) {
        let (later, earlier) = (window[0], window[1]);
        if earlier.end > later.start {
            return Err(EditError::OverlappingSplices {
                first: earlier.start,
                second: later.start,
            });
        }
    }

    let mut out = content.to_string();
    for splice in ordered {
        if splice.start > splice.end
            || splice.end > out.len()
            || !out.is_char_boundary(splice.start)
            || !out.is_char_boundary(splice.end)
        {
            return Err(EditError::InvalidByteRange {
                byte_start: splice.start,
                byte_end: splice.end,
                file_len: content.len(),
            });
        }
        out.replace_range(splice.start..splice.end, &splice.text);
    }
    Ok(out)
}

/// Verification strategy for rewrite safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (faster for large files)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("{file} changed on disk since it was read")]
    BeforeTextMismatch { file: PathBuf },

    #[error("Invalid byte range: [{byte_start}, {byte_end}) in file of length {file_len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        file_len: usize,
    },

    #[error("Overlapping rewrites at byte {first} and byte {second}")]
    OverlappingSplices { first: usize, second: usize },

    #[error("Cannot edit file outside the source tree: {0}")]
    OutsideTree(PathBuf),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of writing a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "RewriteResult should be checked for applied/already-applied"]
pub enum RewriteResult {
    /// New content was written
    Applied { file: PathBuf, bytes_written: usize },
    /// File already had the new content
    AlreadyApplied { file: PathBuf },
}

/// Whole-file replacement guarded by a check on the content it was computed
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Rewrite does nothing until apply() is called"]
pub struct Rewrite {
    pub file: PathBuf,
    pub expected_before: EditVerification,
    pub new_content: String,
}

impl Rewrite {
    pub fn new(file: impl Into<PathBuf>, before: &str, after: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            expected_before: EditVerification::from_text(before),
            new_content: after.into(),
        }
    }

    /// Write the new content atomically.
    ///
    /// Uses tempfile + fsync + rename for crash safety, keeps the original
    /// permissions and bumps mtime so the native build recompiles the file.
    pub fn apply(&self) -> Result<RewriteResult, EditError> {
        let current = fs::read_to_string(&self.file)?;

        if current == self.new_content {
            return Ok(RewriteResult::AlreadyApplied {
                file: self.file.clone(),
            });
        }

        if !self.expected_before.matches(&current) {
            return Err(EditError::BeforeTextMismatch {
                file: self.file.clone(),
            });
        }

        atomic_write(&self.file, self.new_content.as_bytes())?;

        let now = filetime::FileTime::now();
        filetime::set_file_mtime(&self.file, now)?;

        Ok(RewriteResult::Applied {
            file: self.file.clone(),
            bytes_written: self.new_content.len(),
        })
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or nothing changes.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    // Same directory, same filesystem, so the rename is atomic.
    let parent = path.parent().ok_or_else(|| {
        EditError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Path has no parent directory",
        ))
    })?;

    let permissions = fs::metadata(path)?.permissions();
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;

    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), permissions)?;

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
