use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A root storage scope. The engine treats `fs_path` as an opaque identity
/// label: note ids are unique across vaults, fnames only within one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Vault {
    pub fs_path: String,
}

impl Vault {
    pub fn new(fs_path: impl Into<String>) -> Self {
        Self {
            fs_path: fs_path.into(),
        }
    }

    /// The identity key used for per-vault locking and path indexing.
    pub fn id(&self) -> &str {
        &self.fs_path
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.fs_path)
    }
}

impl From<PathBuf> for Vault {
    fn from(value: PathBuf) -> Self {
        Self::new(value.to_string_lossy().to_string())
    }
}

impl From<&Path> for Vault {
    fn from(value: &Path) -> Self {
        Self::new(value.to_string_lossy().to_string())
    }
}

impl std::fmt::Display for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fs_path)
    }
}
