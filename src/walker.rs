use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use globset::GlobSet;

use crate::{error::Result, parser::ParserRegistry};

/// A file found under a directory that some registered parser can read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
}

/// Recursively collect the files under `root` that `parsers` supports.
///
/// Hidden entries are skipped, and so are directory symlinks that point
/// back inside `root`. Each directory is entered at most once by its
/// canonical path, so symlink cycles outside `root` terminate. When
/// `filter` is given, only files whose relative path matches it are kept.
/// Results are sorted by relative path.
pub fn discover_files(
    root: &Path,
    parsers: &ParserRegistry,
    filter: Option<&GlobSet>,
) -> Result<Vec<DiscoveredFile>> {
    let root = root.canonicalize()?;
    let mut found = Vec::new();
    let mut pending = vec![root.clone()];
    let mut visited = HashSet::from([root.clone()]);

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            let path = entry.path();
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };

            if resolved.is_dir() {
                let is_link = entry.file_type()?.is_symlink();
                if is_link && resolved.starts_with(&root) {
                    continue;
                }
                if visited.insert(resolved) {
                    pending.push(path);
                }
                continue;
            }

            if !resolved.is_file() || !parsers.supports(&path) {
                continue;
            }
            let relative_path =
                path.strip_prefix(&root).unwrap_or(&path).to_path_buf();
            if filter.is_some_and(|globs| !globs.is_match(&relative_path)) {
                continue;
            }
            found.push(DiscoveredFile {
                relative_path,
                absolute_path: resolved,
            });
        }
    }

    found.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use globset::{Glob, GlobSetBuilder};

    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn keeps_supported_types_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("page.html"), "<p>Hi</p>").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files =
            discover_files(tmp.path(), &ParserRegistry::with_defaults(), None)
                .unwrap();
        assert_eq!(names(&files), vec!["note.md", "page.html", "readme.txt"]);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join(".secret.txt"), "secret").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "notes").unwrap();

        let files =
            discover_files(tmp.path(), &ParserRegistry::with_defaults(), None)
                .unwrap();
        assert_eq!(names(&files), vec!["notes.md"]);
    }

    #[test]
    fn recurses_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("b");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.txt"), "deep").unwrap();
        std::fs::write(tmp.path().join("z.txt"), "z").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();

        let files =
            discover_files(tmp.path(), &ParserRegistry::with_defaults(), None)
                .unwrap();
        assert_eq!(names(&files), vec!["a.txt", "b/deep.txt", "z.txt"]);
        assert!(files.iter().all(|f| f.absolute_path.is_absolute()));
    }

    #[test]
    fn glob_filter_applies_to_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("guides");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("setup.md"), "setup").unwrap();
        std::fs::write(tmp.path().join("todo.txt"), "todo").unwrap();

        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new("**/*.md").unwrap());
        let globs = builder.build().unwrap();

        let files = discover_files(
            tmp.path(),
            &ParserRegistry::with_defaults(),
            Some(&globs),
        )
        .unwrap();
        assert_eq!(names(&files), vec!["guides/setup.md"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_are_entered_once() {
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let sub = root.join("sub");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::create_dir(&outside).unwrap();
        std::fs::write(root.join("a.txt"), "a").unwrap();
        std::fs::write(sub.join("b.txt"), "b").unwrap();
        std::fs::write(outside.join("c.txt"), "c").unwrap();

        symlink(&root, sub.join("loop")).unwrap();
        symlink(&outside, outside.join("again")).unwrap();
        symlink(&outside, root.join("ext")).unwrap();

        let files =
            discover_files(&root, &ParserRegistry::with_defaults(), None).unwrap();
        assert_eq!(names(&files), vec!["a.txt", "ext/c.txt", "sub/b.txt"]);
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let files =
            discover_files(tmp.path(), &ParserRegistry::with_defaults(), None)
                .unwrap();
        assert!(files.is_empty());
    }
}
