use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::NoteProps;
use crate::resp::NoteChangeEntry;
use crate::schema::SchemaModule;
use crate::store::{NoteStore, StorePayload};
use crate::Vault;

/// In-memory store, keyed by fname. Demonstrates that a backend can be
/// swapped without the engine's cascade logic changing, and doubles as the
/// persistence layer for tests.
#[derive(Debug)]
pub struct MemStore {
    vault: Vault,
    notes: Mutex<HashMap<String, NoteProps>>,
    schemas: Mutex<HashMap<String, SchemaModule>>,
}

impl MemStore {
    pub fn new(vault: Vault) -> Self {
        Self {
            vault,
            notes: Mutex::new(HashMap::new()),
            schemas: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notes(vault: Vault, notes: impl IntoIterator<Item = NoteProps>) -> Self {
        let store = Self::new(vault);
        {
            let mut guard = store.notes.lock().unwrap_or_else(|e| e.into_inner());
            for note in notes {
                guard.insert(note.fname.clone(), note);
            }
        }
        store
    }

    pub fn note_fnames(&self) -> Vec<String> {
        let guard = self.notes.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<String> = guard.keys().cloned().collect();
        out.sort();
        out
    }
}

#[async_trait]
impl NoteStore for MemStore {
    fn vault(&self) -> &Vault {
        &self.vault
    }

    async fn init(&self) -> Result<StorePayload> {
        let notes = self.notes.lock().unwrap_or_else(|e| e.into_inner());
        let schemas = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        Ok(StorePayload {
            notes: notes.values().cloned().collect(),
            schemas: schemas.values().cloned().collect(),
        })
    }

    async fn write_note(&self, note: &NoteProps) -> Result<Vec<NoteChangeEntry>> {
        let mut notes = self.notes.lock().unwrap_or_else(|e| e.into_inner());
        let existed = notes.insert(note.fname.clone(), note.clone()).is_some();
        let entry = if existed {
            NoteChangeEntry::update(note.clone())
        } else {
            NoteChangeEntry::create(note.clone())
        };
        Ok(vec![entry])
    }

    async fn delete_note(&self, note: &NoteProps) -> Result<Vec<NoteChangeEntry>> {
        let mut notes = self.notes.lock().unwrap_or_else(|e| e.into_inner());
        notes.remove(&note.fname);
        Ok(vec![NoteChangeEntry::delete(note.clone())])
    }

    async fn rename_note(
        &self,
        note: &NoteProps,
        from_fname: &str,
    ) -> Result<Vec<NoteChangeEntry>> {
        let mut notes = self.notes.lock().unwrap_or_else(|e| e.into_inner());
        notes.remove(from_fname);
        if !note.stub {
            notes.insert(note.fname.clone(), note.clone());
        }
        Ok(vec![NoteChangeEntry::update(note.clone())])
    }

    async fn write_schema(&self, module: &SchemaModule) -> Result<()> {
        let mut schemas = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        schemas.insert(module.fname.clone(), module.clone());
        Ok(())
    }

    async fn delete_schema(&self, module: &SchemaModule) -> Result<()> {
        let mut schemas = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        schemas.remove(&module.fname);
        Ok(())
    }
}
