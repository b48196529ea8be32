/// Settings for a filesystem-backed vault store.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// File extension (without dot) for note files.
    pub note_extension: String,
    /// File extension (without dot) for schema module files.
    pub schema_extension: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            note_extension: "md".into(),
            schema_extension: "schema.yml".into(),
        }
    }
}
