use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV_VAR: &str = "DOCSIFT_DATA_DIR";

/// Where the index database lives.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCSIFT_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docsift/)
    ///
    /// The directory is created if missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(DATA_DIR_ENV_VAR) {
                Some(value) if !value.is_empty() => PathBuf::from(value),
                _ => xdg::BaseDirectories::with_prefix("docsift")
                    .get_data_home()
                    .ok_or_else(|| {
                        Error::Config("no XDG data home directory".into())
                    })?,
            },
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The redb file holding the catalog and the vectors.
    pub fn index_db(&self) -> PathBuf {
        self.root.join("index.redb")
    }
}
