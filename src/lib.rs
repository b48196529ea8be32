mod cascade;
mod config;
mod engine;
mod error;
mod index;
mod link;
mod node;
mod query;
mod resp;
mod schema;
mod store;
mod vault;

pub use crate::config::VaultConfig;
pub use crate::engine::{
    DeleteOpts, Engine, GetNoteOpts, RenameOpts, UpdateOpts, WriteOpts,
};
pub use crate::error::{EngineError, Error, Result};
pub use crate::index::NodeIndex;
pub use crate::link::{Link, LinkKind, LinkPos, Loc, NoteLoc};
pub use crate::node::{
    ancestor_fnames, depth, is_valid_fname, parent_fname, title_from_fname, Node, NodeId,
    NodeKind, NoteProps, SchemaBinding, SchemaProps, ROOT_FNAME,
};
pub use crate::query::QueryOpts;
pub use crate::resp::{
    merge_entries, ChangeStatus, GetNotePayload, InitPayload, NoteChangeEntry, QueryResult, Resp,
};
pub use crate::schema::{SchemaData, SchemaModule, SchemaTemplate, TemplateKind};
pub use crate::store::{FileStore, MemStore, NoteStore, StorePayload};
pub use crate::vault::Vault;
