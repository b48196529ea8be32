use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cascade::{self, CascadeError};
use crate::error::{EngineError, Error, Result};
use crate::index::NodeIndex;
use crate::link::NoteLoc;
use crate::node::{is_valid_fname, NodeId, NodeKind, NoteProps, ROOT_FNAME};
use crate::query::{self, QueryOpts};
use crate::resp::{
    merge_entries, ChangeStatus, GetNotePayload, InitPayload, NoteChangeEntry, QueryResult, Resp,
};
use crate::schema::SchemaModule;
use crate::store::NoteStore;
use crate::Vault;

#[derive(Debug, Clone)]
pub struct GetNoteOpts {
    pub npath: String,
    pub create_if_new: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOpts {
    /// Also persist every currently-held descendant of the written note.
    pub recursive: bool,
    /// Persist stub ancestors created along the note's path.
    pub write_hierarchy: bool,
    /// Assert the note carries a fresh id; a duplicate is a fatal error.
    pub new_node: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOpts {
    pub new_node: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOpts {
    /// Mutate the in-memory index only; leave persisted records alone.
    pub meta_only: bool,
}

#[derive(Debug, Clone)]
pub struct RenameOpts {
    pub old_loc: NoteLoc,
    pub new_loc: NoteLoc,
}

/// The orchestration layer clients talk to. Composes one store per vault,
/// owns the merged in-memory index, and runs the cascade on structural
/// change. Mutations are serialized per vault; reads run against the current
/// consistent snapshot.
///
/// Every mutation builds on a cloned index and swaps it in only after the
/// cascade and store I/O both succeed, so a failure anywhere leaves the
/// shared index at its pre-operation state.
pub struct Engine {
    stores: Vec<Arc<dyn NoteStore>>,
    index: Arc<RwLock<NodeIndex>>,
    vault_locks: HashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(stores: Vec<Arc<dyn NoteStore>>) -> Self {
        let vault_locks = stores
            .iter()
            .map(|s| (s.vault().id().to_string(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            stores,
            index: Arc::new(RwLock::new(NodeIndex::default())),
            vault_locks,
        }
    }

    pub fn vaults(&self) -> Vec<Vault> {
        self.stores.iter().map(|s| s.vault().clone()).collect()
    }

    pub fn with_index<R>(&self, f: impl FnOnce(&NodeIndex) -> R) -> R {
        let guard = self.index.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub fn index_snapshot(&self) -> NodeIndex {
        self.with_index(|idx| idx.clone())
    }

    fn commit(&self, next: NodeIndex) {
        let mut guard = self.index.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }

    fn store_for(&self, vault: &Vault) -> Result<Arc<dyn NoteStore>> {
        self.stores
            .iter()
            .find(|s| s.vault() == vault)
            .cloned()
            .ok_or_else(|| Error::UnknownVault(vault.to_string()))
    }

    fn lock_for(&self, vault: &Vault) -> Result<Arc<Mutex<()>>> {
        self.vault_locks
            .get(vault.id())
            .cloned()
            .ok_or_else(|| Error::UnknownVault(vault.to_string()))
    }

    /// Acquire every vault's mutation lock in sorted order. Used by the
    /// operations whose cascade may touch notes in any vault.
    async fn lock_all(&self) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
        let mut keys: Vec<&String> = self.vault_locks.keys().collect();
        keys.sort();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.vault_locks[key].clone().lock_owned().await);
        }
        guards
    }

    /// Load every configured vault, build both indices atomically, and
    /// resolve link targets. A failure leaves the engine uninitialized.
    pub async fn init(&self) -> Result<Resp<InitPayload>> {
        let _guards = self.lock_all().await;
        let mut next = NodeIndex::default();

        for store in &self.stores {
            let payload = store.init().await?;
            for mut note in payload.notes {
                // Hierarchy is derived from fnames, never trusted from the
                // store: a reloaded record may carry pointers at nodes that
                // no longer exist (unpersisted stubs).
                note.parent = None;
                note.children.clear();
                if !is_valid_fname(&note.fname) {
                    return Ok(Resp::err(EngineError::InvalidStructure(format!(
                        "vault {} contains invalid fname `{}`",
                        store.vault(),
                        note.fname
                    ))));
                }
                if next.note(&note.id).is_some() {
                    return Ok(Resp::err(EngineError::InvalidStructure(format!(
                        "duplicate note id across vaults: {}",
                        note.id
                    ))));
                }
                if next.note_by_path(&note.vault, &note.fname).is_some() {
                    return Ok(Resp::err(EngineError::InvalidStructure(format!(
                        "duplicate fname in vault {}: {}",
                        note.vault, note.fname
                    ))));
                }
                next.insert_note(note)?;
            }
            for module in payload.schemas {
                if let Err(e) = module.validate() {
                    return Ok(Resp::err(e));
                }
                next.insert_schema(module);
            }
        }

        // Connect the tree per vault: make sure a root exists, then wire
        // every loaded note under its (possibly stubbed-in) ancestors.
        for store in &self.stores {
            let vault = store.vault().clone();
            if next.id_at_path(&vault, ROOT_FNAME).is_none() {
                let root = NoteProps::root(vault.clone());
                next.insert_note(root.clone())?;
                store.write_note(&root).await?;
                debug!(vault = %vault, "created missing vault root");
            }
        }
        let mut ids: Vec<(usize, NodeId)> = next
            .notes_iter()
            .map(|n| (crate::node::depth(&n.fname), n.id.clone()))
            .collect();
        ids.sort();
        for (_, id) in ids {
            let Some(note) = next.note(&id) else { continue };
            if note.is_root() || note.parent.is_some() {
                continue;
            }
            let (vault, fname) = (note.vault.clone(), note.fname.clone());
            let (_, parent_id) = match cascade::ensure_ancestors(&mut next, &vault, &fname) {
                Ok(out) => out,
                Err(e) => return cascade_err(e),
            };
            next.attach_child(&parent_id, &id)?;
        }

        let resolved = cascade::resolve_link_targets(&mut next);
        next.verify_integrity()?;

        let payload = InitPayload {
            notes: next
                .notes_iter()
                .map(|n| (n.id.clone(), n.clone()))
                .collect(),
            schemas: next
                .schemas_iter()
                .map(|m| (m.fname.clone(), m.clone()))
                .collect(),
        };
        info!(
            notes = payload.notes.len(),
            schemas = payload.schemas.len(),
            resolved_links = resolved,
            "engine initialized"
        );
        self.commit(next);
        Ok(Resp::ok(payload))
    }

    /// Exact path lookup across vaults (vault-label order). With
    /// `create_if_new`, a missing path is stubbed in and the leaf persisted
    /// to the first configured vault.
    pub async fn get_note_by_path(&self, opts: GetNoteOpts) -> Result<Resp<GetNotePayload>> {
        let npath = opts.npath.trim().to_string();

        if !opts.create_if_new {
            let found = self.with_index(|idx| idx.note_by_fname(&npath).cloned());
            return Ok(match found {
                Some(note) => Resp::ok(GetNotePayload {
                    note: Some(note),
                    changed: Vec::new(),
                }),
                None => Resp::empty(),
            });
        }

        let Some(store) = self.stores.first().cloned() else {
            return Ok(Resp::err(EngineError::InvalidStructure(
                "engine has no vaults configured".into(),
            )));
        };
        let vault = store.vault().clone();
        let _guard = self.lock_for(&vault)?.lock_owned().await;

        let mut next = self.index_snapshot();
        if let Some(note) = next.note_by_fname(&npath).cloned() {
            return Ok(Resp::ok(GetNotePayload {
                note: Some(note),
                changed: Vec::new(),
            }));
        }

        let note = NoteProps::note(npath.clone(), vault);
        let (id, changed) = match cascade::upsert_note(&mut next, note) {
            Ok(out) => out,
            Err(e) => return cascade_err(e),
        };
        let leaf = next
            .note(&id)
            .cloned()
            .ok_or_else(|| Error::invariant(format!("created note missing from index: {id}")))?;
        store.write_note(&leaf).await?;
        self.commit(next);
        Ok(Resp::ok(GetNotePayload {
            note: Some(leaf),
            changed,
        }))
    }

    /// Upsert a note and report every node the write touched.
    pub async fn write_note(
        &self,
        note: NoteProps,
        opts: WriteOpts,
    ) -> Result<Resp<Vec<NoteChangeEntry>>> {
        let vault = note.vault.clone();
        let store = self.store_for(&vault)?;
        let _guard = self.lock_for(&vault)?.lock_owned().await;

        let mut next = self.index_snapshot();
        if opts.new_node && next.note(&note.id).is_some() {
            return Err(Error::invariant(format!(
                "write_note new_node with an id already indexed: {}",
                note.id
            )));
        }
        if let Some(binding) = &note.schema {
            let bound = next
                .schema_by_key(&binding.module_id)
                .is_some_and(|m| m.schemas.contains_key(&binding.schema_id));
            if !bound {
                return Ok(Resp::err(EngineError::InvalidStructure(format!(
                    "note {} binds to unknown schema {}/{}",
                    note.fname, binding.module_id, binding.schema_id
                ))));
            }
        }

        let (id, mut entries) = match cascade::upsert_note(&mut next, note) {
            Ok(out) => out,
            Err(e) => return cascade_err(e),
        };

        let written = next
            .note(&id)
            .cloned()
            .ok_or_else(|| Error::invariant(format!("written note missing from index: {id}")))?;
        store.write_note(&written).await?;

        if opts.write_hierarchy {
            for entry in &entries {
                if entry.status == ChangeStatus::Create && entry.note.id != id {
                    store.write_note(&entry.note).await?;
                }
            }
        }
        if opts.recursive {
            for desc_id in next.descendant_ids(&id) {
                let desc = match next.note(&desc_id) {
                    Some(d) if !d.stub => d.clone(),
                    _ => continue,
                };
                entries.extend(store.write_note(&desc).await?);
            }
        }

        debug!(fname = %written.fname, entries = entries.len(), "write complete");
        self.commit(next);
        Ok(Resp::ok(merge_entries(entries)))
    }

    /// Delete with the documented orphan policy; returns the full change set.
    pub async fn delete_note(
        &self,
        id: &str,
        opts: DeleteOpts,
    ) -> Result<Resp<Vec<NoteChangeEntry>>> {
        let Some(vault) = self.with_index(|idx| idx.note(id).map(|n| n.vault.clone())) else {
            return Ok(Resp::err(EngineError::NotFound(id.to_string())));
        };
        let store = self.store_for(&vault)?;
        let _guard = self.lock_for(&vault)?.lock_owned().await;

        let mut next = self.index_snapshot();
        let entries = match cascade::delete_note(&mut next, id) {
            Ok(out) => out,
            Err(e) => return cascade_err(e),
        };

        if !opts.meta_only {
            for entry in &entries {
                match entry.status {
                    ChangeStatus::Delete => {
                        store.delete_note(&entry.note).await?;
                    }
                    // The node survived as a stub; its content record goes.
                    ChangeStatus::Update if entry.note.id == id => {
                        store.delete_note(&entry.note).await?;
                    }
                    // Reparented children keep their fname; nothing physical.
                    _ => {}
                }
            }
        }

        debug!(id, entries = entries.len(), "delete complete");
        self.commit(next);
        Ok(Resp::ok(entries))
    }

    /// Run the rename cascade and flush it to the stores only after every
    /// in-memory step has succeeded. Locks every vault: inbound links may
    /// live anywhere.
    pub async fn rename_note(&self, opts: RenameOpts) -> Result<Resp<Vec<NoteChangeEntry>>> {
        let RenameOpts { old_loc, new_loc } = opts;
        let _guards = self.lock_all().await;

        let mut next = self.index_snapshot();
        let head_id = next.id_at_path(&old_loc.vault, &old_loc.fname).cloned();
        let moved_ids: std::collections::HashSet<NodeId> = head_id
            .as_ref()
            .map(|id| {
                let mut set: std::collections::HashSet<NodeId> =
                    next.descendant_ids(id).into_iter().collect();
                set.insert(id.clone());
                set
            })
            .unwrap_or_default();

        let entries = match cascade::rename_note(&mut next, &old_loc, &new_loc) {
            Ok(out) => out,
            Err(e) => return cascade_err(e),
        };
        if entries.is_empty() {
            return Ok(Resp::ok(entries));
        }

        for entry in &entries {
            match entry.status {
                ChangeStatus::Create => {} // stub ancestors stay memory-only
                ChangeStatus::Delete => {
                    let store = self.store_for(&entry.note.vault)?;
                    store.delete_note(&entry.note).await?;
                }
                ChangeStatus::Update => {
                    if moved_ids.contains(&entry.note.id) {
                        let suffix = entry
                            .note
                            .fname
                            .strip_prefix(&new_loc.fname)
                            .unwrap_or_default();
                        let from_fname = format!("{}{suffix}", old_loc.fname);
                        let store = self.store_for(&entry.note.vault)?;
                        store.rename_note(&entry.note, &from_fname).await?;
                    } else {
                        // A link host somewhere in the graph got its body and
                        // link records rewritten.
                        let store = self.store_for(&entry.note.vault)?;
                        store.write_note(&entry.note).await?;
                    }
                }
            }
        }

        info!(
            from = %old_loc.fname,
            to = %new_loc.fname,
            entries = entries.len(),
            "rename cascade complete"
        );
        self.commit(next);
        Ok(Resp::ok(entries))
    }

    /// In-memory index maintenance, no persistence. The primitive
    /// `write_note` builds on after a successful store write.
    pub async fn update_note(&self, note: NoteProps, opts: UpdateOpts) -> Result<()> {
        let _guard = self.lock_for(&note.vault)?.lock_owned().await;
        let mut next = self.index_snapshot();
        if opts.new_node {
            match cascade::upsert_note(&mut next, note) {
                Ok(_) => {}
                Err(CascadeError::Fatal(e)) => return Err(e),
                Err(CascadeError::Domain(e)) => return Err(Error::invariant(e.to_string())),
            }
        } else {
            next.replace_note(note)?;
        }
        self.commit(next);
        Ok(())
    }

    pub async fn update_schema(&self, module: SchemaModule) -> Result<()> {
        let _guard = self.lock_for(&module.vault)?.lock_owned().await;
        let mut next = self.index_snapshot();
        next.insert_schema(module);
        self.commit(next);
        Ok(())
    }

    /// Persist a schema module and index it. Validation failures are domain
    /// errors; the module is not written.
    pub async fn write_schema(&self, module: SchemaModule) -> Result<Resp<()>> {
        if let Err(e) = module.validate() {
            return Ok(Resp::err(e));
        }
        let store = self.store_for(&module.vault)?;
        let _guard = self.lock_for(&module.vault)?.lock_owned().await;
        let mut next = self.index_snapshot();
        store.write_schema(&module).await?;
        next.insert_schema(module);
        self.commit(next);
        Ok(Resp::ok(()))
    }

    /// Remove a schema module (by fname or root schema id) and all its
    /// constituent schema nodes atomically.
    pub async fn delete_schema(&self, key: &str, opts: DeleteOpts) -> Result<Resp<SchemaModule>> {
        let Some(module) = self.with_index(|idx| idx.schema_by_key(key).cloned()) else {
            return Ok(Resp::err(EngineError::SchemaNotFound(key.to_string())));
        };
        let store = self.store_for(&module.vault)?;
        let _guard = self.lock_for(&module.vault)?.lock_owned().await;
        let mut next = self.index_snapshot();
        if !opts.meta_only {
            store.delete_schema(&module).await?;
        }
        next.remove_schema(&module.fname);
        self.commit(next);
        Ok(Resp::ok(module))
    }

    /// Pattern match over notes or schemas depending on `mode`.
    pub async fn query(
        &self,
        query_string: &str,
        mode: NodeKind,
        opts: QueryOpts,
    ) -> Result<Resp<QueryResult>> {
        match mode {
            NodeKind::Note => {
                let resp = self.query_notes(query_string, opts).await?;
                Ok(Resp {
                    data: resp.data.map(QueryResult::Notes),
                    error: resp.error,
                })
            }
            NodeKind::Schema => {
                let resp = self.query_schemas(query_string).await?;
                Ok(Resp {
                    data: resp.data.map(QueryResult::Schemas),
                    error: resp.error,
                })
            }
        }
    }

    pub async fn query_notes(
        &self,
        query_string: &str,
        opts: QueryOpts,
    ) -> Result<Resp<Vec<NoteProps>>> {
        let picked = self.with_index(|idx| -> std::result::Result<Vec<NoteProps>, EngineError> {
            let hits = query::match_notes(idx, query_string);
            let hits: Vec<&NoteProps> = if opts.query_one {
                query::pick_one(&hits, query_string)?.into_iter().collect()
            } else {
                hits
            };
            Ok(hits
                .into_iter()
                .map(|n| if opts.full_node { n.clone() } else { n.summary() })
                .collect())
        });

        let hits = match picked {
            Ok(hits) => hits,
            Err(e) => return Ok(Resp::err(e)),
        };

        let qs = query_string.trim();
        if hits.is_empty() && opts.create_if_new && !qs.contains('*') && is_valid_fname(qs) {
            let resp = self
                .get_note_by_path(GetNoteOpts {
                    npath: qs.to_string(),
                    create_if_new: true,
                })
                .await?;
            return Ok(match resp {
                Resp {
                    data: Some(payload),
                    error: None,
                } => Resp::ok(payload.note.into_iter().collect()),
                Resp { error, .. } => Resp { data: None, error },
            });
        }

        Ok(Resp::ok(hits))
    }

    pub async fn query_schemas(&self, query_string: &str) -> Result<Resp<Vec<SchemaModule>>> {
        let hits = self.with_index(|idx| {
            query::match_schemas(idx, query_string)
                .into_iter()
                .cloned()
                .collect::<Vec<_>>()
        });
        Ok(Resp::ok(hits))
    }

    /// Fetch a single schema module by exact fname or root schema id.
    pub async fn get_schema(&self, qs: &str) -> Result<Resp<SchemaModule>> {
        let hit = self.with_index(|idx| idx.schema_by_key(qs.trim()).cloned());
        Ok(match hit {
            Some(module) => Resp::ok(module),
            None => Resp::err(EngineError::SchemaNotFound(qs.to_string())),
        })
    }
}

fn cascade_err<T>(err: CascadeError) -> Result<Resp<T>> {
    match err {
        CascadeError::Domain(e) => Ok(Resp::err(e)),
        CascadeError::Fatal(e) => Err(e),
    }
}
