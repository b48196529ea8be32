use serde::{Deserialize, Serialize};

use crate::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Ref,
    Wiki,
    Md,
}

/// Byte offsets of the link text within the containing body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPos {
    pub start: usize,
    pub end: usize,
}

/// A partially-specified reference. At least one of `fname`/`id` is expected
/// to be present for the location to mean anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<Vault>,
}

impl Loc {
    pub fn from_fname(fname: impl Into<String>) -> Self {
        Self {
            fname: Some(fname.into()),
            id: None,
            vault: None,
        }
    }

    pub fn at(fname: impl Into<String>, id: impl Into<String>, vault: Vault) -> Self {
        Self {
            fname: Some(fname.into()),
            id: Some(id.into()),
            vault: Some(vault),
        }
    }
}

/// A fully-specified note location, used where a real note must be named
/// (rename endpoints). `fname` and `vault` are mandatory here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLoc {
    pub fname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vault: Vault,
}

impl NoteLoc {
    pub fn new(fname: impl Into<String>, vault: Vault) -> Self {
        Self {
            fname: fname.into(),
            id: None,
            vault,
        }
    }
}

/// A typed, positioned reference extracted from a node body. `from` is always
/// resolved (the containing node); `to` stays empty until the engine can match
/// `value` against a known fname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub kind: LinkKind,
    pub original: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub pos: LinkPos,
    pub from: Loc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Loc>,
}

impl Link {
    /// A wiki link `[[value]]` as the external parser would have produced it.
    /// Positions are relative to the body the caller embeds it in.
    pub fn wiki(value: impl Into<String>, pos: LinkPos, from: Loc) -> Self {
        let value = value.into();
        Self {
            kind: LinkKind::Wiki,
            original: format!("[[{value}]]"),
            value,
            alias: None,
            pos,
            from,
            to: None,
        }
    }
}
