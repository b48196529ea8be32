//! Secondary mutations that keep the graph consistent after a structural
//! change: stub-chain creation, the delete orphan policy, and the rename
//! cascade with its graph-wide link rewrite.
//!
//! Every function here mutates a `NodeIndex` the engine has already cloned;
//! on any error the clone is dropped, so the shared index never sees a
//! partial cascade.

use std::collections::HashSet;

use chrono::Utc;

use crate::error::{EngineError, Error, Result};
use crate::index::NodeIndex;
use crate::link::{Link, NoteLoc};
use crate::node::{
    ancestor_fnames, is_valid_fname, title_from_fname, NodeId, NoteProps, ROOT_FNAME,
};
use crate::resp::{merge_entries, NoteChangeEntry};
use crate::{Loc, Vault};

/// Domain errors flow back into the response envelope; fatal errors abort.
#[derive(Debug)]
pub(crate) enum CascadeError {
    Domain(EngineError),
    Fatal(Error),
}

impl From<EngineError> for CascadeError {
    fn from(value: EngineError) -> Self {
        Self::Domain(value)
    }
}

impl From<Error> for CascadeError {
    fn from(value: Error) -> Self {
        Self::Fatal(value)
    }
}

pub(crate) type CascadeResult<T> = std::result::Result<T, CascadeError>;

/// Create the vault root and any missing ancestors of `fname` as stubs.
/// Returns the create entries and the id of `fname`'s direct parent.
pub(crate) fn ensure_ancestors(
    index: &mut NodeIndex,
    vault: &Vault,
    fname: &str,
) -> CascadeResult<(Vec<NoteChangeEntry>, NodeId)> {
    let mut entries = Vec::new();

    let mut parent_id = match index.id_at_path(vault, ROOT_FNAME) {
        Some(id) => id.clone(),
        None => {
            let root = NoteProps::root(vault.clone());
            let id = root.id.clone();
            index.insert_note(root)?;
            entries.push(NoteChangeEntry::create(expect_note(index, &id)?));
            id
        }
    };

    if fname == ROOT_FNAME {
        return Ok((entries, parent_id));
    }

    for ancestor in ancestor_fnames(fname) {
        match index.id_at_path(vault, &ancestor) {
            Some(id) => parent_id = id.clone(),
            None => {
                let stub = NoteProps::stub_at(ancestor, vault.clone());
                let id = stub.id.clone();
                index.insert_note(stub)?;
                index.attach_child(&parent_id, &id)?;
                entries.push(NoteChangeEntry::create(expect_note(index, &id)?));
                parent_id = id;
            }
        }
    }

    Ok((entries, parent_id))
}

/// Upsert by path. An occupant at the same path keeps its id, parent,
/// children, and created timestamp; writing real content over a stub is how
/// stubs get promoted. A fresh fname inserts under a (possibly stubbed-in)
/// ancestor chain.
pub(crate) fn upsert_note(
    index: &mut NodeIndex,
    mut note: NoteProps,
) -> CascadeResult<(NodeId, Vec<NoteChangeEntry>)> {
    if !is_valid_fname(&note.fname) {
        return Err(EngineError::InvalidStructure(format!(
            "invalid fname: `{}`",
            note.fname
        ))
        .into());
    }
    note.updated = Utc::now();

    if let Some(existing_id) = index.id_at_path(&note.vault, &note.fname).cloned() {
        let existing = expect_note(index, &existing_id)?;
        note.id = existing_id.clone();
        note.parent = existing.parent;
        note.children = existing.children;
        note.created = existing.created;
        note.stub = false;
        index.replace_note(note.clone())?;
        return Ok((existing_id, vec![NoteChangeEntry::update(note)]));
    }

    if let Some(existing) = index.note(&note.id) {
        // Same id at a different path: structural moves go through rename.
        return Err(EngineError::InvalidStructure(format!(
            "write cannot move {} from {} to {}; use rename",
            note.id, existing.fname, note.fname
        ))
        .into());
    }

    let (mut entries, parent_id) = ensure_ancestors(index, &note.vault, &note.fname)?;
    let id = note.id.clone();
    index.insert_note(note)?;
    index.attach_child(&parent_id, &id)?;
    entries.push(NoteChangeEntry::create(expect_note(index, &id)?));
    Ok((id, entries))
}

/// Delete with the documented orphan policy:
/// - a content note with children survives as a stub (hierarchy stays
///   connected, one update entry);
/// - a stub with children is removed and its children reparent to the
///   grandparent (update entry per child, delete entry for the stub);
/// - a leaf is removed outright, and stub ancestors left childless are
///   pruned with it.
pub(crate) fn delete_note(index: &mut NodeIndex, id: &str) -> CascadeResult<Vec<NoteChangeEntry>> {
    let note = index
        .note(id)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
    if note.is_root() {
        return Err(EngineError::RootDelete.into());
    }

    let mut entries = Vec::new();

    if !note.children.is_empty() {
        if !note.stub {
            let n = index
                .note_mut(id)
                .ok_or_else(|| Error::invariant(format!("note vanished mid-delete: {id}")))?;
            n.title = title_from_fname(&n.fname);
            n.desc.clear();
            n.body.clear();
            n.links.clear();
            n.custom = None;
            n.schema = None;
            n.stub = true;
            n.updated = Utc::now();
            entries.push(NoteChangeEntry::update(n.clone()));
            return Ok(entries);
        }

        let parent_id = note.parent.clone().ok_or_else(|| {
            Error::invariant(format!("non-root stub {} has no parent", note.fname))
        })?;
        let child_ids: Vec<NodeId> = note.children.iter().cloned().collect();
        for child_id in &child_ids {
            index.detach_child(id, child_id);
        }
        index.detach_child(&parent_id, id);
        index.remove_note(id)?;
        for child_id in &child_ids {
            index.attach_child(&parent_id, child_id)?;
            entries.push(NoteChangeEntry::update(expect_note(index, child_id)?));
        }
        entries.push(NoteChangeEntry::delete(note));
        return Ok(entries);
    }

    if let Some(parent_id) = note.parent.clone() {
        index.detach_child(&parent_id, id);
    }
    index.remove_note(id)?;
    let parent = note.parent.clone();
    entries.push(NoteChangeEntry::delete(note));
    prune_stub_ancestors(index, parent, &mut entries)?;
    Ok(entries)
}

/// The rename cascade (all-or-nothing against the index the engine cloned):
/// collision check, fname move for the node and every descendant, reattach
/// under a (possibly stubbed-in) new ancestor chain, prune stubs left
/// childless at the old location, then rewrite every inbound link anywhere
/// in the graph.
pub(crate) fn rename_note(
    index: &mut NodeIndex,
    old_loc: &NoteLoc,
    new_loc: &NoteLoc,
) -> CascadeResult<Vec<NoteChangeEntry>> {
    if old_loc.vault != new_loc.vault {
        return Err(EngineError::InvalidStructure(
            "rename cannot move a note between vaults".into(),
        )
        .into());
    }
    if !is_valid_fname(&new_loc.fname) {
        return Err(EngineError::InvalidStructure(format!(
            "invalid fname: `{}`",
            new_loc.fname
        ))
        .into());
    }
    if old_loc.fname == ROOT_FNAME || new_loc.fname == ROOT_FNAME {
        return Err(EngineError::InvalidStructure(
            "the vault root cannot be renamed".into(),
        )
        .into());
    }

    let vault = &old_loc.vault;
    let id = index
        .id_at_path(vault, &old_loc.fname)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(old_loc.fname.clone()))?;
    if old_loc.fname == new_loc.fname {
        return Ok(Vec::new());
    }
    if let Some(occupant) = index.id_at_path(vault, &new_loc.fname) {
        if *occupant != id {
            return Err(EngineError::PathCollision {
                fname: new_loc.fname.clone(),
                vault: vault.fs_path.clone(),
            }
            .into());
        }
    }

    let old_fname = old_loc.fname.clone();
    let new_fname = new_loc.fname.clone();

    // Plan every fname move up front so a collision aborts before any
    // mutation happens.
    let descendants = index.descendant_ids(&id);
    let moving: HashSet<&NodeId> = std::iter::once(&id).chain(descendants.iter()).collect();
    let old_prefix = format!("{old_fname}.");
    let mut moves: Vec<(NodeId, String)> = vec![(id.clone(), new_fname.clone())];
    for d in &descendants {
        let current = expect_note(index, d)?.fname;
        let suffix = current.strip_prefix(&old_prefix).ok_or_else(|| {
            Error::invariant(format!(
                "descendant {current} does not extend ancestor {old_fname}"
            ))
        })?;
        let target = format!("{new_fname}.{suffix}");
        if let Some(occupant) = index.id_at_path(vault, &target) {
            if !moving.contains(occupant) {
                return Err(EngineError::PathCollision {
                    fname: target,
                    vault: vault.fs_path.clone(),
                }
                .into());
            }
        }
        moves.push((d.clone(), target));
    }
    drop(moving);

    let old_parent = expect_note(index, &id)?.parent;
    if let Some(parent_id) = &old_parent {
        index.detach_child(parent_id, &id);
    }

    let now = Utc::now();
    for (nid, target) in &moves {
        index.set_fname(nid, target)?;
        let note = index
            .note_mut(nid)
            .ok_or_else(|| Error::invariant(format!("note vanished mid-rename: {nid}")))?;
        note.updated = now;
        for link in &mut note.links {
            link.from.fname = Some(target.clone());
            link.from.vault.get_or_insert_with(|| vault.clone());
        }
    }

    let (stub_entries, new_parent) = ensure_ancestors(index, vault, &new_fname)?;
    index.attach_child(&new_parent, &id)?;

    let mut entries = Vec::new();
    for (nid, _) in &moves {
        entries.push(NoteChangeEntry::update(expect_note(index, nid)?));
    }
    entries.extend(stub_entries);
    prune_stub_ancestors(index, old_parent, &mut entries)?;

    // Any node anywhere may reference the old location, so the rewrite scans
    // the whole graph, not just the renamed node's neighbors.
    let target = expect_note(index, &id)?;
    let host_ids: Vec<NodeId> = index.notes_iter().map(|n| n.id.clone()).collect();
    for host_id in host_ids {
        let host = index
            .note_mut(&host_id)
            .ok_or_else(|| Error::invariant(format!("note vanished mid-rewrite: {host_id}")))?;
        if rewrite_links_to(host, &old_fname, vault, &target) {
            host.updated = now;
            let changed = host.clone();
            entries.push(NoteChangeEntry::update(changed));
        }
    }

    Ok(merge_entries(entries))
}

/// Match every `to`-less link against known fnames, preferring the
/// containing note's own vault. Returns how many links were resolved.
pub(crate) fn resolve_link_targets(index: &mut NodeIndex) -> usize {
    let ids: Vec<NodeId> = index.notes_iter().map(|n| n.id.clone()).collect();
    let mut resolved = 0;

    for id in ids {
        let Some(note) = index.note(&id) else { continue };
        let vault = note.vault.clone();
        let mut targets: Vec<(usize, Loc)> = Vec::new();
        for (ix, link) in note.links.iter().enumerate() {
            if link.to.is_some() {
                continue;
            }
            let hit = index
                .note_by_path(&vault, &link.value)
                .or_else(|| index.note_by_fname(&link.value));
            if let Some(target) = hit {
                targets.push((
                    ix,
                    Loc::at(target.fname.clone(), target.id.clone(), target.vault.clone()),
                ));
            }
        }
        if targets.is_empty() {
            continue;
        }
        if let Some(note) = index.note_mut(&id) {
            for (ix, loc) in targets {
                note.links[ix].to = Some(loc);
                resolved += 1;
            }
        }
    }

    resolved
}

fn link_points_to(link: &Link, old_fname: &str, vault: &Vault, target_id: &str) -> bool {
    match &link.to {
        Some(to) => {
            if to.id.as_deref() == Some(target_id) {
                return true;
            }
            to.fname.as_deref() == Some(old_fname)
                && to.vault.as_ref().is_none_or(|v| v == vault)
        }
        None => link.value == old_fname,
    }
}

/// Rewrite every link in `host` that points at `old_fname` so it targets the
/// renamed note, splicing the rendered text into the body and shifting later
/// link positions by the length delta.
fn rewrite_links_to(host: &mut NoteProps, old_fname: &str, vault: &Vault, target: &NoteProps) -> bool {
    let mut order: Vec<usize> = (0..host.links.len()).collect();
    order.sort_by_key(|&ix| host.links[ix].pos.start);

    let mut touched = false;
    let mut delta: isize = 0;
    for ix in order {
        let link = &mut host.links[ix];
        link.pos.start = shift(link.pos.start, delta);
        link.pos.end = shift(link.pos.end, delta);
        if !link_points_to(link, old_fname, vault, &target.id) {
            continue;
        }

        let new_original = link.original.replacen(old_fname, &target.fname, 1);
        let start = link.pos.start;
        let end = link.pos.end;
        if host.body.get(start..end) == Some(link.original.as_str()) {
            host.body.replace_range(start..end, &new_original);
            delta += new_original.len() as isize - link.original.len() as isize;
            link.pos.end = start + new_original.len();
        }
        link.original = new_original;
        link.value = target.fname.clone();
        link.to = Some(Loc::at(
            target.fname.clone(),
            target.id.clone(),
            target.vault.clone(),
        ));
        touched = true;
    }
    touched
}

fn shift(pos: usize, delta: isize) -> usize {
    usize::try_from(pos as isize + delta).unwrap_or(0)
}

/// Walk up from `start`, removing stub ancestors that no longer have
/// children. Roots and content notes stop the walk.
fn prune_stub_ancestors(
    index: &mut NodeIndex,
    start: Option<NodeId>,
    entries: &mut Vec<NoteChangeEntry>,
) -> Result<()> {
    let mut cursor = start;
    while let Some(id) = cursor {
        let Some(note) = index.note(&id) else { break };
        if !note.stub || note.is_root() || !note.children.is_empty() {
            break;
        }
        let removed = note.clone();
        cursor = removed.parent.clone();
        if let Some(parent_id) = &removed.parent {
            index.detach_child(parent_id, &id);
        }
        index.remove_note(&id)?;
        entries.push(NoteChangeEntry::delete(removed));
    }
    Ok(())
}

fn expect_note(index: &NodeIndex, id: &str) -> Result<NoteProps> {
    index
        .note(id)
        .cloned()
        .ok_or_else(|| Error::invariant(format!("expected note missing from index: {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkPos;
    use crate::resp::ChangeStatus;

    fn seeded(vault: &Vault, fnames: &[&str]) -> NodeIndex {
        let mut index = NodeIndex::default();
        for fname in fnames {
            let note = NoteProps::note(*fname, vault.clone());
            upsert_note(&mut index, note).unwrap();
        }
        index
    }

    #[test]
    fn ensure_ancestors_builds_the_stub_chain_once() {
        let vault = Vault::new("v1");
        let mut index = seeded(&vault, &["a"]);

        let (entries, parent) = ensure_ancestors(&mut index, &vault, "a.b.c").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].note.fname, "a.b");
        assert!(entries[0].note.stub);
        assert_eq!(index.note(&parent).unwrap().fname, "a.b");

        let (again, _) = ensure_ancestors(&mut index, &vault, "a.b.c").unwrap();
        assert!(again.is_empty());
        index.verify_integrity().unwrap();
    }

    #[test]
    fn upsert_promotes_a_stub_in_place() {
        let vault = Vault::new("v1");
        let mut index = seeded(&vault, &["a", "a.b.c"]);
        let stub_id = index.id_at_path(&vault, "a.b").unwrap().clone();

        let note = NoteProps::note("a.b", vault.clone()).with_body("real content");
        let (id, entries) = upsert_note(&mut index, note).unwrap();
        assert_eq!(id, stub_id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ChangeStatus::Update);
        let promoted = index.note(&stub_id).unwrap();
        assert!(!promoted.stub);
        assert_eq!(promoted.body, "real content");
        index.verify_integrity().unwrap();
    }

    #[test]
    fn delete_converts_content_note_with_children_to_stub() {
        let vault = Vault::new("v1");
        let mut index = seeded(&vault, &["a", "a.b"]);
        let a_id = index.id_at_path(&vault, "a").unwrap().clone();

        let entries = delete_note(&mut index, &a_id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ChangeStatus::Update);
        assert!(index.note(&a_id).unwrap().stub);
        index.verify_integrity().unwrap();
    }

    #[test]
    fn delete_of_stub_reparents_children_to_grandparent() {
        let vault = Vault::new("v1");
        let mut index = seeded(&vault, &["a", "a.b.c"]);
        let stub_id = index.id_at_path(&vault, "a.b").unwrap().clone();
        let a_id = index.id_at_path(&vault, "a").unwrap().clone();
        let c_id = index.id_at_path(&vault, "a.b.c").unwrap().clone();

        let entries = delete_note(&mut index, &stub_id).unwrap();
        assert!(index.note(&stub_id).is_none());
        assert_eq!(index.note(&c_id).unwrap().parent.as_deref(), Some(a_id.as_str()));
        assert!(index.note(&a_id).unwrap().children.contains(&c_id));
        let statuses: Vec<ChangeStatus> = entries.iter().map(|e| e.status).collect();
        assert!(statuses.contains(&ChangeStatus::Delete));
        assert!(statuses.contains(&ChangeStatus::Update));
    }

    #[test]
    fn delete_prunes_childless_stub_ancestors() {
        let vault = Vault::new("v1");
        let mut index = seeded(&vault, &["a.b.c"]);
        let c_id = index.id_at_path(&vault, "a.b.c").unwrap().clone();

        let entries = delete_note(&mut index, &c_id).unwrap();
        // a.b.c plus the stubs a.b and a all go.
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.status == ChangeStatus::Delete));
        assert!(index.note_by_path(&vault, "a").is_none());
        index.verify_integrity().unwrap();
    }

    #[test]
    fn rename_rewrites_descendants_and_inbound_links() {
        let vault = Vault::new("v1");
        let mut index = seeded(&vault, &["foo", "foo.child"]);
        let body = "see [[foo]] for details".to_string();
        let link = Link::wiki("foo", LinkPos { start: 4, end: 11 }, Loc::from_fname("host"));
        let host = NoteProps::note("host", vault.clone())
            .with_body(body)
            .with_links(vec![link]);
        let (host_id, _) = upsert_note(&mut index, host).unwrap();
        resolve_link_targets(&mut index);

        let foo_id = index.id_at_path(&vault, "foo").unwrap().clone();
        let entries = rename_note(
            &mut index,
            &NoteLoc::new("foo", vault.clone()),
            &NoteLoc::new("foo2", vault.clone()),
        )
        .unwrap();

        let renamed = index.note(&foo_id).unwrap();
        assert_eq!(renamed.fname, "foo2");
        assert_eq!(
            index.note_by_path(&vault, "foo2.child").unwrap().id,
            index.id_at_path(&vault, "foo2.child").unwrap().clone()
        );
        assert!(index.note_by_path(&vault, "foo").is_none());

        let host = index.note(&host_id).unwrap();
        assert_eq!(host.body, "see [[foo2]] for details");
        assert_eq!(host.links[0].value, "foo2");
        let to = host.links[0].to.as_ref().unwrap();
        assert_eq!(to.id.as_deref(), Some(foo_id.as_str()));
        assert_eq!(to.fname.as_deref(), Some("foo2"));

        let changed: Vec<&str> = entries.iter().map(|e| e.note.fname.as_str()).collect();
        assert!(changed.contains(&"foo2"));
        assert!(changed.contains(&"foo2.child"));
        assert!(changed.contains(&"host"));
        index.verify_integrity().unwrap();
    }

    #[test]
    fn rename_collision_leaves_index_untouched() {
        let vault = Vault::new("v1");
        let mut index = seeded(&vault, &["foo", "bar"]);
        let before: Vec<String> = {
            let mut v: Vec<String> = index.notes_iter().map(|n| n.fname.clone()).collect();
            v.sort();
            v
        };

        let err = rename_note(
            &mut index,
            &NoteLoc::new("foo", vault.clone()),
            &NoteLoc::new("bar", vault.clone()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CascadeError::Domain(EngineError::PathCollision { .. })
        ));

        let mut after: Vec<String> = index.notes_iter().map(|n| n.fname.clone()).collect();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn link_position_shift_keeps_later_links_aligned() {
        let vault = Vault::new("v1");
        let mut index = seeded(&vault, &["x", "other"]);
        let body = "[[x]] then [[other]]".to_string();
        let links = vec![
            Link::wiki("x", LinkPos { start: 0, end: 5 }, Loc::from_fname("host")),
            Link::wiki("other", LinkPos { start: 11, end: 20 }, Loc::from_fname("host")),
        ];
        let host = NoteProps::note("host", vault.clone())
            .with_body(body)
            .with_links(links);
        let (host_id, _) = upsert_note(&mut index, host).unwrap();
        resolve_link_targets(&mut index);

        rename_note(
            &mut index,
            &NoteLoc::new("x", vault.clone()),
            &NoteLoc::new("xlong", vault.clone()),
        )
        .unwrap();

        let host = index.note(&host_id).unwrap();
        assert_eq!(host.body, "[[xlong]] then [[other]]");
        let second = &host.links[1];
        assert_eq!(&host.body[second.pos.start..second.pos.end], "[[other]]");
    }
}
