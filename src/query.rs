//! Deterministic pattern matching over the path index.
//!
//! Grammar: an exact fname match always wins. Otherwise `*` matches any run
//! of characters within one segment (`a.*.c`), a trailing dot selects direct
//! children (`a.`), and a bare path selects the whole subtree under it
//! (`a.b` matches `a.b.c.d`). Unresolved queries return an empty result set,
//! not an error.

use regex::Regex;

use crate::index::NodeIndex;
use crate::node::{depth, NoteProps};
use crate::schema::SchemaModule;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOpts {
    /// Restrict the result to at most one match (shortest path, then
    /// lexicographic; a cross-vault tie is a domain error).
    pub query_one: bool,
    /// Hydrate full `body`/`links` instead of summary fields.
    pub full_node: bool,
    /// Create a stub chain and leaf when nothing matches.
    pub create_if_new: bool,
}

pub(crate) fn match_notes<'a>(index: &'a NodeIndex, qs: &str) -> Vec<&'a NoteProps> {
    let qs = qs.trim();
    let mut hits: Vec<&NoteProps> = if qs.is_empty() || qs == "*" {
        index.notes_iter().collect()
    } else {
        let exact: Vec<&NoteProps> = index.notes_iter().filter(|n| n.fname == qs).collect();
        if !exact.is_empty() {
            exact
        } else if qs.contains('*') {
            match wildcard_regex(qs) {
                Some(re) => index.notes_iter().filter(|n| re.is_match(&n.fname)).collect(),
                None => Vec::new(),
            }
        } else if let Some(parent) = qs.strip_suffix('.') {
            index
                .notes_iter()
                .filter(|n| {
                    n.fname
                        .strip_prefix(parent)
                        .and_then(|rest| rest.strip_prefix('.'))
                        .is_some_and(|rest| !rest.contains('.'))
                })
                .collect()
        } else {
            let prefix = format!("{qs}.");
            index
                .notes_iter()
                .filter(|n| n.fname.starts_with(&prefix))
                .collect()
        }
    };

    sort_hits(&mut hits);
    hits
}

pub(crate) fn match_schemas<'a>(index: &'a NodeIndex, qs: &str) -> Vec<&'a SchemaModule> {
    let qs = qs.trim();
    let mut hits: Vec<&SchemaModule> = if qs.is_empty() || qs == "*" {
        index.schemas_iter().collect()
    } else {
        let exact: Vec<&SchemaModule> =
            index.schemas_iter().filter(|m| m.fname == qs).collect();
        if !exact.is_empty() {
            exact
        } else {
            let prefix = format!("{qs}.");
            index
                .schemas_iter()
                .filter(|m| m.fname.starts_with(&prefix))
                .collect()
        }
    };
    hits.sort_by(|a, b| a.fname.cmp(&b.fname).then_with(|| a.vault.cmp(&b.vault)));
    hits
}

/// Tie-break for `query_one`: shortest path first, then lexicographic fname.
/// Two vaults holding the same shortest fname cannot be told apart, which is
/// the one genuinely ambiguous case.
pub(crate) fn pick_one<'a>(
    hits: &[&'a NoteProps],
    qs: &str,
) -> Result<Option<&'a NoteProps>, EngineError> {
    match hits {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        [first, second, ..] => {
            if first.fname == second.fname {
                return Err(EngineError::Ambiguous {
                    query: qs.to_string(),
                    fname: first.fname.clone(),
                });
            }
            Ok(Some(*first))
        }
    }
}

fn sort_hits(hits: &mut [&NoteProps]) {
    hits.sort_by(|a, b| {
        depth(&a.fname)
            .cmp(&depth(&b.fname))
            .then_with(|| a.fname.cmp(&b.fname))
            .then_with(|| a.vault.cmp(&b.vault))
    });
}

fn wildcard_regex(qs: &str) -> Option<Regex> {
    let mut pattern = String::with_capacity(qs.len() + 8);
    pattern.push('^');
    for ch in qs.chars() {
        match ch {
            '*' => pattern.push_str("[^.]*"),
            c if regex_syntax_char(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).ok()
}

fn regex_syntax_char(c: char) -> bool {
    matches!(
        c,
        '.' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::upsert_note;
    use crate::{NoteProps, Vault};

    fn seeded(fnames: &[(&str, &str)]) -> NodeIndex {
        let mut index = NodeIndex::default();
        for (vault, fname) in fnames {
            upsert_note(&mut index, NoteProps::note(*fname, Vault::new(*vault))).unwrap();
        }
        index
    }

    #[test]
    fn exact_match_takes_precedence_over_subtree() {
        let index = seeded(&[("v1", "a"), ("v1", "a.b"), ("v1", "a.b.c")]);
        let hits = match_notes(&index, "a.b");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fname, "a.b");
    }

    #[test]
    fn prefix_fallback_covers_gaps_left_by_stub_removal() {
        let vault = Vault::new("v1");
        let mut index = seeded(&[("v1", "proj.alpha")]);
        let stub_id = index.id_at_path(&vault, "proj").unwrap().clone();
        crate::cascade::delete_note(&mut index, &stub_id).unwrap();

        let hits = match_notes(&index, "proj");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fname, "proj.alpha");
        assert!(match_notes(&index, "proj.alpha.missing").is_empty());
    }

    #[test]
    fn trailing_dot_selects_direct_children_only() {
        let index = seeded(&[("v1", "a"), ("v1", "a.b"), ("v1", "a.c"), ("v1", "a.b.d")]);
        let hits = match_notes(&index, "a.");
        let fnames: Vec<&str> = hits.iter().map(|n| n.fname.as_str()).collect();
        assert_eq!(fnames, vec!["a.b", "a.c"]);
    }

    #[test]
    fn wildcard_stays_within_a_segment() {
        let index = seeded(&[("v1", "a.x.c"), ("v1", "a.y.c"), ("v1", "a.x.d.c")]);
        let hits = match_notes(&index, "a.*.c");
        let fnames: Vec<&str> = hits.iter().map(|n| n.fname.as_str()).collect();
        assert_eq!(fnames, vec!["a.x.c", "a.y.c"]);
    }

    #[test]
    fn pick_one_is_deterministic_and_flags_cross_vault_ties() {
        let index = seeded(&[("v1", "a.c"), ("v1", "a.b")]);
        let hits = match_notes(&index, "a.");
        let one = pick_one(&hits, "a.").unwrap().unwrap();
        assert_eq!(one.fname, "a.b");

        // The same stub fname exists in both vaults; nothing tells them apart.
        let index = seeded(&[("v1", "a.b"), ("v2", "a.b")]);
        let hits = match_notes(&index, "a");
        assert!(matches!(
            pick_one(&hits, "a"),
            Err(EngineError::Ambiguous { .. })
        ));
    }
}
