use std::path::Path;

const SHORT_LEN: usize = 6;

/// A stable document identifier derived from the document's source path.
///
/// Indexing the same file twice yields the same id, which is what turns a
/// second index call into a replace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    /// 16 hex characters used as the key in redb tables.
    pub full: String,
    /// The short hex prefix for human display (e.g. "a1b2c3").
    pub short: String,
}

impl DocumentId {
    /// Generate a stable document ID from a source path.
    pub fn new(source_path: &str) -> Self {
        let hash = blake3::hash(source_path.as_bytes());
        let full = hash.to_hex()[..16].to_string();
        let short = full[..SHORT_LEN].to_string();
        Self { full, short }
    }

    /// Generate an ID for a file, canonicalizing the path when it exists so
    /// that `./a.txt` and `a.txt` map to the same document.
    pub fn for_path(path: &Path) -> Self {
        let canonical =
            std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Self::new(&canonical.to_string_lossy())
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Wrap an id read back from the catalog. The short form is its first
    /// six characters, or all of it when shorter.
    pub fn from_full(full: &str) -> Self {
        Self {
            full: full.to_string(),
            short: full.chars().take(SHORT_LEN).collect(),
        }
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}
