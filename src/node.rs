use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::SchemaData;
use crate::{Link, Vault};

pub type NodeId = String;

/// The reserved fname of every vault's root node.
pub const ROOT_FNAME: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Note,
    Schema,
}

/// Binds a note to a schema node inside a schema module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaBinding {
    pub module_id: String,
    pub schema_id: String,
}

/// Shared node shape for notes and schemas, generic over the payload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node<D> {
    pub id: NodeId,
    pub kind: NodeKind,
    pub fname: String,
    pub vault: Vault,
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub links: Vec<Link>,
    /// None only for a vault's root node.
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub children: BTreeSet<NodeId>,
    #[serde(default)]
    pub stub: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
    pub data: D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaBinding>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

pub type NoteProps = Node<serde_json::Value>;
pub type SchemaProps = Node<SchemaData>;

impl<D: Default> Node<D> {
    /// Build a node with documented defaults: generated id, now-timestamps,
    /// empty children/links, title derived from the last path segment.
    pub fn new(kind: NodeKind, fname: impl Into<String>, vault: Vault) -> Self {
        let fname = fname.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title_from_fname(&fname),
            fname,
            vault,
            desc: String::new(),
            body: String::new(),
            links: Vec::new(),
            parent: None,
            children: BTreeSet::new(),
            stub: false,
            custom: None,
            data: D::default(),
            schema: None,
            created: now,
            updated: now,
        }
    }
}

impl NoteProps {
    pub fn note(fname: impl Into<String>, vault: Vault) -> Self {
        Self::new(NodeKind::Note, fname, vault)
    }

    pub fn root(vault: Vault) -> Self {
        Self::note(ROOT_FNAME, vault)
    }

    pub fn stub_at(fname: impl Into<String>, vault: Vault) -> Self {
        let mut note = Self::note(fname, vault);
        note.stub = true;
        note
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_links(mut self, links: Vec<Link>) -> Self {
        self.links = links;
        self
    }

    pub fn with_custom(mut self, custom: serde_json::Value) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn is_root(&self) -> bool {
        self.fname == ROOT_FNAME
    }

    /// Quick-pick shape: summary fields only, body and links stripped.
    pub fn summary(&self) -> Self {
        let mut out = self.clone();
        out.body = String::new();
        out.links = Vec::new();
        out
    }
}

impl SchemaProps {
    pub fn schema(id: impl Into<String>, fname: impl Into<String>, vault: Vault) -> Self {
        let mut node = Self::new(NodeKind::Schema, fname, vault);
        node.id = id.into();
        node.title = node.id.clone();
        node
    }
}

/// Immediate parent fname: `a.b.c` -> `a.b`, `a` -> `root`, `root` -> None.
pub fn parent_fname(fname: &str) -> Option<&str> {
    if fname == ROOT_FNAME {
        return None;
    }
    match fname.rsplit_once('.') {
        Some((head, _)) => Some(head),
        None => Some(ROOT_FNAME),
    }
}

/// Ancestor fnames between the root (exclusive) and `fname` (exclusive),
/// shallowest first: `a.b.c` -> ["a", "a.b"].
pub fn ancestor_fnames(fname: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = fname;
    while let Some(parent) = parent_fname(current) {
        if parent == ROOT_FNAME {
            break;
        }
        out.push(parent.to_string());
        current = parent;
    }
    out.reverse();
    out
}

pub fn depth(fname: &str) -> usize {
    if fname == ROOT_FNAME {
        0
    } else {
        fname.split('.').count()
    }
}

pub fn title_from_fname(fname: &str) -> String {
    fname.rsplit('.').next().unwrap_or(fname).to_string()
}

/// Dot-separated non-empty segments; no leading/trailing/double dots.
pub fn is_valid_fname(fname: &str) -> bool {
    !fname.is_empty() && fname.split('.').all(|seg| !seg.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_ancestors_follow_dotted_segments() {
        assert_eq!(parent_fname("a.b.c"), Some("a.b"));
        assert_eq!(parent_fname("a"), Some(ROOT_FNAME));
        assert_eq!(parent_fname(ROOT_FNAME), None);
        assert_eq!(ancestor_fnames("a.b.c"), vec!["a".to_string(), "a.b".into()]);
        assert!(ancestor_fnames("a").is_empty());
    }

    #[test]
    fn fname_validation_rejects_empty_segments() {
        assert!(is_valid_fname("a.b"));
        assert!(is_valid_fname("root"));
        assert!(!is_valid_fname(""));
        assert!(!is_valid_fname("a..b"));
        assert!(!is_valid_fname(".a"));
        assert!(!is_valid_fname("a."));
    }

    #[test]
    fn new_note_applies_defaults() {
        let note = NoteProps::note("proj.alpha", Vault::new("v1"));
        assert_eq!(note.title, "alpha");
        assert!(!note.stub);
        assert!(note.children.is_empty());
        assert!(note.links.is_empty());
        assert_eq!(note.created, note.updated);
        assert_eq!(note.id.len(), 36);
    }
}
