use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VaultConfig;
use crate::error::{Error, Result};
use crate::node::{NoteProps, SchemaBinding};
use crate::resp::NoteChangeEntry;
use crate::schema::{SchemaData, SchemaModule};
use crate::store::{NoteStore, StorePayload};
use crate::{SchemaProps, Vault};

/// Filesystem-backed store: one `<fname>.md` per note with YAML frontmatter
/// carrying the node metadata, one `<fname>.schema.yml` per schema module.
/// Hierarchy and links are not persisted; the engine derives both at init.
#[derive(Debug, Clone)]
pub struct FileStore {
    vault: Vault,
    root: PathBuf,
    cfg: VaultConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteFrontmatter {
    id: String,
    title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    desc: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    stub: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema: Option<SchemaBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    data: serde_json::Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SchemaModuleFile {
    version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    imports: Vec<String>,
    root: String,
    schemas: Vec<SchemaEntryFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaEntryFile {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    desc: String,
    #[serde(flatten)]
    data: SchemaData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<String>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(root, VaultConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, cfg: VaultConfig) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            return Err(Error::VaultNotFound(root));
        }
        let vault = Vault::new(root.to_string_lossy().to_string());
        Ok(Self { vault, root, cfg })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn note_path(&self, fname: &str) -> PathBuf {
        self.root
            .join(format!("{fname}.{}", self.cfg.note_extension))
    }

    fn schema_path(&self, fname: &str) -> PathBuf {
        self.root
            .join(format!("{fname}.{}", self.cfg.schema_extension))
    }

    fn read_note_file(&self, path: &Path, fname: &str) -> Result<NoteProps> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let (fm, body) = split_frontmatter(&content).ok_or_else(|| Error::Frontmatter {
            path: path.to_path_buf(),
            message: "missing `---` frontmatter block".into(),
        })?;
        let fm: NoteFrontmatter =
            serde_yaml::from_str(fm).map_err(|e| Error::Frontmatter {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut note = NoteProps::note(fname, self.vault.clone());
        note.id = fm.id;
        note.title = fm.title;
        note.desc = fm.desc;
        note.created = fm.created;
        note.updated = fm.updated;
        note.stub = fm.stub;
        note.schema = fm.schema;
        note.custom = fm.custom;
        note.data = fm.data;
        note.body = body.to_string();
        Ok(note)
    }

    fn read_schema_file(&self, path: &Path, fname: &str) -> Result<SchemaModule> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let file: SchemaModuleFile =
            serde_yaml::from_str(&content).map_err(|e| Error::SchemaFile {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut module = SchemaModule {
            version: file.version,
            imports: file.imports,
            schemas: Default::default(),
            root: file.root,
            fname: fname.to_string(),
            vault: self.vault.clone(),
        };
        for entry in file.schemas {
            let mut schema = SchemaProps::schema(entry.id, fname, self.vault.clone());
            if let Some(title) = entry.title {
                schema.title = title;
            }
            schema.desc = entry.desc;
            schema.data = entry.data;
            schema.children = entry.children.into_iter().collect();
            module.insert(schema);
        }
        Ok(module)
    }

    fn render_note(&self, note: &NoteProps) -> Result<String> {
        let fm = NoteFrontmatter {
            id: note.id.clone(),
            title: note.title.clone(),
            desc: note.desc.clone(),
            created: note.created,
            updated: note.updated,
            stub: note.stub,
            schema: note.schema.clone(),
            custom: note.custom.clone(),
            data: note.data.clone(),
        };
        let yaml = serde_yaml::to_string(&fm).map_err(|e| Error::Frontmatter {
            path: self.note_path(&note.fname),
            message: e.to_string(),
        })?;
        Ok(format!("---\n{yaml}---\n\n{}", note.body))
    }
}

#[async_trait]
impl NoteStore for FileStore {
    fn vault(&self) -> &Vault {
        &self.vault
    }

    async fn init(&self) -> Result<StorePayload> {
        let mut payload = StorePayload::default();
        let schema_suffix = format!(".{}", self.cfg.schema_extension);
        let note_suffix = format!(".{}", self.cfg.note_extension);

        for entry in walkdir::WalkDir::new(&self.root)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            if let Some(fname) = name.strip_suffix(&schema_suffix) {
                payload
                    .schemas
                    .push(self.read_schema_file(entry.path(), fname)?);
            } else if let Some(fname) = name.strip_suffix(&note_suffix) {
                payload
                    .notes
                    .push(self.read_note_file(entry.path(), fname)?);
            }
        }

        debug!(
            vault = %self.vault,
            notes = payload.notes.len(),
            schemas = payload.schemas.len(),
            "file store scan complete"
        );
        Ok(payload)
    }

    async fn write_note(&self, note: &NoteProps) -> Result<Vec<NoteChangeEntry>> {
        let path = self.note_path(&note.fname);
        let existed = path.exists();
        let rendered = self.render_note(note)?;
        std::fs::write(&path, rendered).map_err(|e| Error::io(&path, e))?;
        let entry = if existed {
            NoteChangeEntry::update(note.clone())
        } else {
            NoteChangeEntry::create(note.clone())
        };
        Ok(vec![entry])
    }

    async fn delete_note(&self, note: &NoteProps) -> Result<Vec<NoteChangeEntry>> {
        let path = self.note_path(&note.fname);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&path, e)),
        }
        Ok(vec![NoteChangeEntry::delete(note.clone())])
    }

    async fn rename_note(
        &self,
        note: &NoteProps,
        from_fname: &str,
    ) -> Result<Vec<NoteChangeEntry>> {
        let old_path = self.note_path(from_fname);
        match std::fs::remove_file(&old_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&old_path, e)),
        }
        if note.stub {
            return Ok(vec![NoteChangeEntry::update(note.clone())]);
        }
        self.write_note(note).await?;
        Ok(vec![NoteChangeEntry::update(note.clone())])
    }

    async fn write_schema(&self, module: &SchemaModule) -> Result<()> {
        let path = self.schema_path(&module.fname);
        let file = SchemaModuleFile {
            version: module.version,
            imports: module.imports.clone(),
            root: module.root.clone(),
            schemas: module
                .schemas
                .values()
                .map(|s| SchemaEntryFile {
                    id: s.id.clone(),
                    title: (s.title != s.id).then(|| s.title.clone()),
                    desc: s.desc.clone(),
                    data: s.data.clone(),
                    children: s.children.iter().cloned().collect(),
                })
                .collect(),
        };
        let yaml = serde_yaml::to_string(&file).map_err(|e| Error::SchemaFile {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, yaml).map_err(|e| Error::io(&path, e))?;
        Ok(())
    }

    async fn delete_schema(&self, module: &SchemaModule) -> Result<()> {
        let path = self.schema_path(&module.fname);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&path, e)),
        }
    }
}

fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let fm = &rest[..end + 1];
    let body = rest[end + 4..].strip_prefix('\n').unwrap_or(&rest[end + 4..]);
    let body = body.strip_prefix('\n').unwrap_or(body);
    Some((fm, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_splits_cleanly() {
        let content = "---\nid: abc\n---\n\nbody text\n";
        let (fm, body) = split_frontmatter(content).unwrap();
        assert_eq!(fm, "id: abc\n");
        assert_eq!(body, "body text\n");

        assert!(split_frontmatter("no frontmatter here").is_none());
    }
}
