mod file;
mod mem;

pub use file::FileStore;
pub use mem::MemStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::NoteProps;
use crate::resp::NoteChangeEntry;
use crate::schema::SchemaModule;
use crate::Vault;

/// Everything a store hands back from its initial read-all pass.
#[derive(Debug, Clone, Default)]
pub struct StorePayload {
    pub notes: Vec<NoteProps>,
    pub schemas: Vec<SchemaModule>,
}

/// Per-vault persistence. Stores execute what the engine's cascade decided;
/// they hold no cross-vault index and no cascade logic, which is what makes
/// a backend swappable. Mutating operations report the change entries for
/// the records they physically touched, scoped to their own vault.
#[async_trait]
pub trait NoteStore: Send + Sync {
    fn vault(&self) -> &Vault;

    /// Read every persisted note and schema module in this vault.
    async fn init(&self) -> Result<StorePayload>;

    async fn write_note(&self, note: &NoteProps) -> Result<Vec<NoteChangeEntry>>;

    /// Remove the persisted record. Stubs have no record; deleting one is a
    /// no-op at this layer but still yields the delete entry.
    async fn delete_note(&self, note: &NoteProps) -> Result<Vec<NoteChangeEntry>>;

    /// Move the record for an already-renamed note from its previous fname.
    async fn rename_note(&self, note: &NoteProps, from_fname: &str)
        -> Result<Vec<NoteChangeEntry>>;

    async fn write_schema(&self, module: &SchemaModule) -> Result<()>;

    async fn delete_schema(&self, module: &SchemaModule) -> Result<()>;
}
