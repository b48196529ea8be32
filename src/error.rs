use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

/// Fatal failures: store I/O, serialization, and index-invariant violations.
/// These abort the operation; they never travel inside a response envelope.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vault root does not exist: {0}")]
    VaultNotFound(PathBuf),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frontmatter yaml error at {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    #[error("schema file error at {path}: {message}")]
    SchemaFile { path: PathBuf, message: String },

    #[error("no store configured for vault: {0}")]
    UnknownVault(String),

    #[error("index invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }
}

/// Domain errors: expected outcomes surfaced through the `error` field of a
/// response envelope. Callers check these before trusting `data`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineError {
    #[error("note not found: {0}")]
    NotFound(String),

    #[error("schema module not found: {0}")]
    SchemaNotFound(String),

    #[error("path already exists in vault {vault}: {fname}")]
    PathCollision { fname: String, vault: String },

    #[error("query `{query}` is ambiguous across vaults: {fname}")]
    Ambiguous { query: String, fname: String },

    #[error("cannot delete the vault root")]
    RootDelete,

    #[error("invalid node structure: {0}")]
    InvalidStructure(String),
}
