use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::node::SchemaProps;
use crate::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Note,
    Snippet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTemplate {
    pub id: String,
    pub kind: TemplateKind,
}

/// Structural payload of a schema node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub namespace: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<SchemaTemplate>,
}

/// A named collection of schema nodes with a designated root. Schema ids are
/// unique within their module; notes bind to them as `{module_id, schema_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaModule {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    pub schemas: BTreeMap<String, SchemaProps>,
    /// Id of the root schema node; must be present in `schemas`.
    pub root: String,
    pub fname: String,
    pub vault: Vault,
}

impl SchemaModule {
    pub fn new(fname: impl Into<String>, vault: Vault, root: SchemaProps) -> Self {
        let root_id = root.id.clone();
        let mut schemas = BTreeMap::new();
        schemas.insert(root_id.clone(), root);
        Self {
            version: 1,
            imports: Vec::new(),
            schemas,
            root: root_id,
            fname: fname.into(),
            vault,
        }
    }

    pub fn insert(&mut self, schema: SchemaProps) {
        self.schemas.insert(schema.id.clone(), schema);
    }

    pub fn root_schema(&self) -> Option<&SchemaProps> {
        self.schemas.get(&self.root)
    }

    pub fn schema_ids(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(|k| k.as_str())
    }

    /// Structural validation: the root exists, every child pointer resolves
    /// inside the module, and the child relation is acyclic.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.schemas.contains_key(&self.root) {
            return Err(EngineError::InvalidStructure(format!(
                "schema module {} root `{}` is not defined",
                self.fname, self.root
            )));
        }

        for (id, schema) in &self.schemas {
            for child in &schema.children {
                if !self.schemas.contains_key(child) {
                    return Err(EngineError::InvalidStructure(format!(
                        "schema `{id}` in module {} references unknown child `{child}`",
                        self.fname
                    )));
                }
            }
        }

        // Walk down from the root; a repeat means a cycle.
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![self.root.as_str()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(EngineError::InvalidStructure(format!(
                    "schema module {} contains a cycle through `{id}`",
                    self.fname
                )));
            }
            if let Some(schema) = self.schemas.get(id) {
                stack.extend(schema.children.iter().map(|c| c.as_str()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SchemaProps;

    fn module_with(children: &[(&str, &[&str])], root: &str) -> SchemaModule {
        let vault = Vault::new("v1");
        let mut module = SchemaModule::new(
            "proj",
            vault.clone(),
            SchemaProps::schema(root, "proj", vault.clone()),
        );
        for (id, kids) in children {
            let mut s = SchemaProps::schema(*id, "proj", vault.clone());
            s.children = kids.iter().map(|k| k.to_string()).collect();
            module.insert(s);
        }
        module
    }

    #[test]
    fn validate_accepts_a_well_formed_module() {
        let module = module_with(&[("proj", &["task"]), ("task", &[])], "proj");
        assert!(module.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_root_and_dangling_children() {
        let mut module = module_with(&[("a", &[])], "proj");
        module.schemas.remove("proj");
        assert!(module.validate().is_err());

        let module = module_with(&[("proj", &["ghost"])], "proj");
        assert!(module.validate().is_err());
    }

    #[test]
    fn validate_rejects_cycles() {
        let module = module_with(&[("proj", &["a"]), ("a", &["proj"])], "proj");
        assert!(matches!(
            module.validate(),
            Err(EngineError::InvalidStructure(_))
        ));
    }
}
