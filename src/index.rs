use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::node::{NodeId, NoteProps, ROOT_FNAME};
use crate::schema::SchemaModule;
use crate::Vault;

/// The merged in-memory index: an id-keyed arena of notes plus a
/// (vault, fname) path index, and the schema module dictionary.
///
/// Both note maps are maintained together inside every mutating method; a
/// divergence between them is an invariant violation and aborts the
/// operation. The engine mutates a cloned snapshot and swaps it in only once
/// the whole cascade has succeeded, so a failed operation never leaves a
/// half-updated index behind.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    notes: HashMap<NodeId, NoteProps>,
    paths: HashMap<(String, String), NodeId>,
    schemas: BTreeMap<String, SchemaModule>,
}

impl NodeIndex {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.schemas.is_empty()
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    pub fn note(&self, id: &str) -> Option<&NoteProps> {
        self.notes.get(id)
    }

    pub(crate) fn note_mut(&mut self, id: &str) -> Option<&mut NoteProps> {
        self.notes.get_mut(id)
    }

    pub fn id_at_path(&self, vault: &Vault, fname: &str) -> Option<&NodeId> {
        self.paths.get(&path_key(vault, fname))
    }

    pub fn note_by_path(&self, vault: &Vault, fname: &str) -> Option<&NoteProps> {
        self.id_at_path(vault, fname).and_then(|id| self.notes.get(id))
    }

    /// First match for `fname` across vaults, in vault-label order.
    pub fn note_by_fname(&self, fname: &str) -> Option<&NoteProps> {
        let mut hits: Vec<&NoteProps> = self
            .notes
            .values()
            .filter(|n| n.fname == fname)
            .collect();
        hits.sort_by(|a, b| a.vault.fs_path.cmp(&b.vault.fs_path));
        hits.into_iter().next()
    }

    pub fn notes_iter(&self) -> impl Iterator<Item = &NoteProps> {
        self.notes.values()
    }

    pub fn root_of(&self, vault: &Vault) -> Option<&NoteProps> {
        self.note_by_path(vault, ROOT_FNAME)
    }

    pub fn vaults(&self) -> Vec<Vault> {
        let mut out: Vec<Vault> = self
            .notes
            .values()
            .map(|n| n.vault.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        out.sort();
        out
    }

    /// Insert a note with a fresh id. Duplicate ids and occupied paths are
    /// programming errors in the cascade, not domain outcomes.
    pub fn insert_note(&mut self, note: NoteProps) -> Result<()> {
        if self.notes.contains_key(&note.id) {
            return Err(Error::invariant(format!(
                "duplicate id insert: {} ({})",
                note.id, note.fname
            )));
        }
        let key = path_key(&note.vault, &note.fname);
        if let Some(existing) = self.paths.get(&key) {
            return Err(Error::invariant(format!(
                "path {} in vault {} already indexed to {existing}",
                note.fname, note.vault
            )));
        }
        self.paths.insert(key, note.id.clone());
        self.notes.insert(note.id.clone(), note);
        Ok(())
    }

    /// Replace the stored state of an existing note, keeping both maps in
    /// step when the fname moved.
    pub fn replace_note(&mut self, note: NoteProps) -> Result<()> {
        let Some(old) = self.notes.get(&note.id) else {
            return Err(Error::invariant(format!(
                "replace of unknown note: {}",
                note.id
            )));
        };
        if old.fname != note.fname || old.vault != note.vault {
            let new_key = path_key(&note.vault, &note.fname);
            if let Some(occupant) = self.paths.get(&new_key) {
                if *occupant != note.id {
                    return Err(Error::invariant(format!(
                        "replace target {} in vault {} occupied by {occupant}",
                        note.fname, note.vault
                    )));
                }
            }
            self.paths.remove(&path_key(&old.vault, &old.fname));
            self.paths.insert(new_key, note.id.clone());
        }
        self.notes.insert(note.id.clone(), note);
        Ok(())
    }

    pub fn remove_note(&mut self, id: &str) -> Result<Option<NoteProps>> {
        let Some(note) = self.notes.remove(id) else {
            return Ok(None);
        };
        let removed = self.paths.remove(&path_key(&note.vault, &note.fname));
        if removed.as_deref() != Some(id) {
            return Err(Error::invariant(format!(
                "path index diverged while removing {} ({})",
                id, note.fname
            )));
        }
        Ok(Some(note))
    }

    /// Move a note to a new fname, updating the path index with it.
    pub fn set_fname(&mut self, id: &str, new_fname: &str) -> Result<()> {
        let Some(note) = self.notes.get_mut(id) else {
            return Err(Error::invariant(format!("set_fname on unknown note: {id}")));
        };
        let old_key = path_key(&note.vault, &note.fname);
        let new_key = path_key(&note.vault, new_fname);
        if let Some(occupant) = self.paths.get(&new_key) {
            if occupant != id {
                return Err(Error::invariant(format!(
                    "set_fname target {new_fname} occupied by {occupant}"
                )));
            }
        }
        note.fname = new_fname.to_string();
        self.paths.remove(&old_key);
        self.paths.insert(new_key, id.to_string());
        Ok(())
    }

    /// Wire `child` under `parent`, guarding against cycles.
    pub fn attach_child(&mut self, parent_id: &str, child_id: &str) -> Result<()> {
        if parent_id == child_id {
            return Err(Error::invariant(format!(
                "cannot attach {child_id} to itself"
            )));
        }
        for ancestor in self.ancestor_ids(parent_id)? {
            if ancestor == child_id {
                return Err(Error::invariant(format!(
                    "cyclic parent assignment: {child_id} is an ancestor of {parent_id}"
                )));
            }
        }
        {
            let Some(parent) = self.notes.get_mut(parent_id) else {
                return Err(Error::invariant(format!(
                    "attach to unknown parent: {parent_id}"
                )));
            };
            parent.children.insert(child_id.to_string());
        }
        let Some(child) = self.notes.get_mut(child_id) else {
            return Err(Error::invariant(format!(
                "attach of unknown child: {child_id}"
            )));
        };
        child.parent = Some(parent_id.to_string());
        Ok(())
    }

    pub fn detach_child(&mut self, parent_id: &str, child_id: &str) {
        if let Some(parent) = self.notes.get_mut(parent_id) {
            parent.children.remove(child_id);
        }
        if let Some(child) = self.notes.get_mut(child_id) {
            if child.parent.as_deref() == Some(parent_id) {
                child.parent = None;
            }
        }
    }

    /// Ids from `id`'s parent up to the vault root. A repeated id means the
    /// parent relation has a cycle.
    pub fn ancestor_ids(&self, id: &str) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(id);
        let mut current = id;
        while let Some(parent) = self.notes.get(current).and_then(|n| n.parent.as_deref()) {
            if !seen.insert(parent) {
                return Err(Error::invariant(format!(
                    "parent cycle detected at {parent}"
                )));
            }
            out.push(parent.to_string());
            current = parent;
        }
        Ok(out)
    }

    /// Breadth-first descendant ids of `id` (excluding `id` itself).
    pub fn descendant_ids(&self, id: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue: Vec<&str> = self
            .notes
            .get(id)
            .map(|n| n.children.iter().map(|c| c.as_str()).collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop() {
            out.push(next.to_string());
            if let Some(note) = self.notes.get(next) {
                queue.extend(note.children.iter().map(|c| c.as_str()));
            }
        }
        out
    }

    pub fn schema(&self, fname: &str) -> Option<&SchemaModule> {
        self.schemas.get(fname)
    }

    /// Look a module up by fname or by its root schema id.
    pub fn schema_by_key(&self, key: &str) -> Option<&SchemaModule> {
        self.schemas
            .get(key)
            .or_else(|| self.schemas.values().find(|m| m.root == key))
    }

    pub fn schemas_iter(&self) -> impl Iterator<Item = &SchemaModule> {
        self.schemas.values()
    }

    pub fn insert_schema(&mut self, module: SchemaModule) {
        self.schemas.insert(module.fname.clone(), module);
    }

    pub fn remove_schema(&mut self, fname: &str) -> Option<SchemaModule> {
        self.schemas.remove(fname)
    }

    /// Full consistency sweep over the testable invariants: map agreement,
    /// fname uniqueness per vault, bidirectional parent/children, one root
    /// per vault, and acyclic ancestry.
    pub fn verify_integrity(&self) -> Result<()> {
        if self.paths.len() != self.notes.len() {
            return Err(Error::invariant(format!(
                "path index has {} entries for {} notes",
                self.paths.len(),
                self.notes.len()
            )));
        }
        for (key, id) in &self.paths {
            let Some(note) = self.notes.get(id) else {
                return Err(Error::invariant(format!(
                    "path index points at unknown note {id}"
                )));
            };
            if path_key(&note.vault, &note.fname) != *key {
                return Err(Error::invariant(format!(
                    "path index entry for {id} does not match its fname {}",
                    note.fname
                )));
            }
        }

        let mut roots: HashMap<&str, &str> = HashMap::new();
        for note in self.notes.values() {
            match &note.parent {
                None => {
                    if !note.is_root() {
                        return Err(Error::invariant(format!(
                            "non-root note {} has no parent",
                            note.fname
                        )));
                    }
                    if let Some(other) = roots.insert(note.vault.id(), note.id.as_str()) {
                        return Err(Error::invariant(format!(
                            "vault {} has two roots: {other} and {}",
                            note.vault, note.id
                        )));
                    }
                }
                Some(parent_id) => {
                    let Some(parent) = self.notes.get(parent_id) else {
                        return Err(Error::invariant(format!(
                            "note {} has dangling parent {parent_id}",
                            note.fname
                        )));
                    };
                    if !parent.children.contains(&note.id) {
                        return Err(Error::invariant(format!(
                            "parent {} does not list child {}",
                            parent.fname, note.fname
                        )));
                    }
                }
            }
            for child_id in &note.children {
                let Some(child) = self.notes.get(child_id) else {
                    return Err(Error::invariant(format!(
                        "note {} lists unknown child {child_id}",
                        note.fname
                    )));
                };
                if child.parent.as_deref() != Some(note.id.as_str()) {
                    return Err(Error::invariant(format!(
                        "child {} does not point back at {}",
                        child.fname, note.fname
                    )));
                }
            }
        }

        for id in self.notes.keys() {
            self.ancestor_ids(id)?;
        }

        Ok(())
    }
}

fn path_key(vault: &Vault, fname: &str) -> (String, String) {
    (vault.fs_path.clone(), fname.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NoteProps;

    fn index_with_root(vault: &Vault) -> (NodeIndex, NodeId) {
        let mut idx = NodeIndex::default();
        let root = NoteProps::root(vault.clone());
        let root_id = root.id.clone();
        idx.insert_note(root).unwrap();
        (idx, root_id)
    }

    #[test]
    fn duplicate_id_insert_is_fatal() {
        let vault = Vault::new("v1");
        let (mut idx, _) = index_with_root(&vault);
        let note = NoteProps::note("a", vault.clone());
        idx.insert_note(note.clone()).unwrap();
        let mut dup = NoteProps::note("b", vault);
        dup.id = note.id;
        assert!(matches!(idx.insert_note(dup), Err(Error::Invariant(_))));
    }

    #[test]
    fn same_fname_in_two_vaults_coexists() {
        let mut idx = NodeIndex::default();
        idx.insert_note(NoteProps::note("a", Vault::new("v1"))).unwrap();
        idx.insert_note(NoteProps::note("a", Vault::new("v2"))).unwrap();
        assert_eq!(idx.note_count(), 2);
        assert!(idx.note_by_path(&Vault::new("v1"), "a").is_some());
        assert!(idx.note_by_path(&Vault::new("v2"), "a").is_some());
    }

    #[test]
    fn attach_child_rejects_cycles() {
        let vault = Vault::new("v1");
        let (mut idx, root_id) = index_with_root(&vault);
        let a = NoteProps::note("a", vault.clone());
        let a_id = a.id.clone();
        let b = NoteProps::note("a.b", vault.clone());
        let b_id = b.id.clone();
        idx.insert_note(a).unwrap();
        idx.insert_note(b).unwrap();
        idx.attach_child(&root_id, &a_id).unwrap();
        idx.attach_child(&a_id, &b_id).unwrap();

        assert!(matches!(
            idx.attach_child(&b_id, &a_id),
            Err(Error::Invariant(_))
        ));
        idx.verify_integrity().unwrap();
    }

    #[test]
    fn set_fname_keeps_both_maps_in_step() {
        let vault = Vault::new("v1");
        let (mut idx, root_id) = index_with_root(&vault);
        let a = NoteProps::note("a", vault.clone());
        let a_id = a.id.clone();
        idx.insert_note(a).unwrap();
        idx.attach_child(&root_id, &a_id).unwrap();

        idx.set_fname(&a_id, "b").unwrap();
        assert!(idx.note_by_path(&vault, "a").is_none());
        assert_eq!(idx.id_at_path(&vault, "b"), Some(&a_id));
        idx.verify_integrity().unwrap();
    }
}
