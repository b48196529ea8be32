use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::node::{NodeId, NoteProps};
use crate::schema::SchemaModule;

/// Response envelope: `data` is present exactly when `error` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resp<T> {
    pub data: Option<T>,
    pub error: Option<EngineError>,
}

impl<T> Resp<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    /// Not-found without `create_if_new` is not exceptional: no data, no error.
    pub fn empty() -> Self {
        Self {
            data: None,
            error: None,
        }
    }

    pub fn err(error: EngineError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Create,
    Update,
    Delete,
}

/// The canonical audit unit: one node's outcome from a mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteChangeEntry {
    pub note: NoteProps,
    pub status: ChangeStatus,
}

impl NoteChangeEntry {
    pub fn create(note: NoteProps) -> Self {
        Self {
            note,
            status: ChangeStatus::Create,
        }
    }

    pub fn update(note: NoteProps) -> Self {
        Self {
            note,
            status: ChangeStatus::Update,
        }
    }

    pub fn delete(note: NoteProps) -> Self {
        Self {
            note,
            status: ChangeStatus::Delete,
        }
    }
}

/// Collapse duplicate entries per node id. Delete wins over create, create
/// over update; the node state of the later entry is kept.
pub fn merge_entries(entries: Vec<NoteChangeEntry>) -> Vec<NoteChangeEntry> {
    fn rank(status: ChangeStatus) -> u8 {
        match status {
            ChangeStatus::Delete => 2,
            ChangeStatus::Create => 1,
            ChangeStatus::Update => 0,
        }
    }

    let mut order: Vec<NodeId> = Vec::new();
    let mut by_id: HashMap<NodeId, NoteChangeEntry> = HashMap::new();
    for entry in entries {
        match by_id.get_mut(&entry.note.id) {
            None => {
                order.push(entry.note.id.clone());
                by_id.insert(entry.note.id.clone(), entry);
            }
            Some(existing) => {
                if rank(entry.status) >= rank(existing.status) {
                    *existing = entry;
                } else {
                    existing.note = entry.note;
                }
            }
        }
    }
    order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
}

/// Payload of `Engine::init`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    pub notes: HashMap<NodeId, NoteProps>,
    pub schemas: HashMap<String, SchemaModule>,
}

/// Payload of `Engine::get_note_by_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetNotePayload {
    pub note: Option<NoteProps>,
    pub changed: Vec<NoteChangeEntry>,
}

/// Query results, tagged by the mode the query ran in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "nodes", rename_all = "lowercase")]
pub enum QueryResult {
    Notes(Vec<NoteProps>),
    Schemas(Vec<SchemaModule>),
}
