use std::sync::Arc;

use dendrite::{
    DeleteOpts, Engine, FileStore, MemStore, NoteProps, NoteStore, SchemaBinding, SchemaModule,
    SchemaProps, Vault, WriteOpts,
};

fn module_for(vault: &Vault) -> SchemaModule {
    let mut module = SchemaModule::new(
        "proj",
        vault.clone(),
        SchemaProps::schema("proj", "proj", vault.clone()),
    );
    let mut task = SchemaProps::schema("task", "proj", vault.clone());
    task.data.pattern = Some("task.*".into());
    module.insert(task);
    if let Some(root) = module.schemas.get_mut("proj") {
        root.children.insert("task".into());
    }
    module
}

async fn mem_engine() -> anyhow::Result<(Engine, Vault)> {
    let vault = Vault::new("v1");
    let engine = Engine::new(vec![
        Arc::new(MemStore::new(vault.clone())) as Arc<dyn NoteStore>
    ]);
    engine.init().await?;
    Ok((engine, vault))
}

#[tokio::test]
async fn schema_modules_write_query_and_delete_at_module_granularity() -> anyhow::Result<()> {
    let (engine, vault) = mem_engine().await?;

    let resp = engine.write_schema(module_for(&vault)).await?;
    assert!(resp.error.is_none());

    let module = engine.get_schema("proj").await?.data.unwrap();
    assert_eq!(module.root, "proj");
    assert_eq!(module.schemas.len(), 2);

    let hits = engine.query_schemas("*").await?.data.unwrap();
    assert_eq!(hits.len(), 1);

    // Deleting the module removes every constituent schema node at once.
    let removed = engine.delete_schema("proj", DeleteOpts::default()).await?;
    assert!(removed.error.is_none());
    assert_eq!(removed.data.unwrap().schemas.len(), 2);

    let resp = engine.get_schema("proj").await?;
    assert!(resp.error.is_some());
    assert!(engine.query_schemas("*").await?.data.unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn schema_module_is_addressable_by_root_id() -> anyhow::Result<()> {
    let (engine, vault) = mem_engine().await?;
    engine.write_schema(module_for(&vault)).await?;

    let by_root = engine.get_schema("proj").await?.data.unwrap();
    assert_eq!(by_root.fname, "proj");
    Ok(())
}

#[tokio::test]
async fn invalid_schema_module_is_rejected_in_the_envelope() -> anyhow::Result<()> {
    let (engine, vault) = mem_engine().await?;

    let mut module = module_for(&vault);
    if let Some(root) = module.schemas.get_mut("proj") {
        root.children.insert("ghost".into());
    }
    let resp = engine.write_schema(module).await?;
    assert!(resp.error.is_some());
    assert!(engine.query_schemas("*").await?.data.unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn note_schema_binding_must_resolve() -> anyhow::Result<()> {
    let (engine, vault) = mem_engine().await?;

    let mut note = NoteProps::note("task.one", vault.clone());
    note.schema = Some(SchemaBinding {
        module_id: "proj".into(),
        schema_id: "task".into(),
    });
    let resp = engine.write_note(note.clone(), WriteOpts::default()).await?;
    assert!(resp.error.is_some(), "binding to a missing module must fail");

    engine.write_schema(module_for(&vault)).await?;
    let resp = engine.write_note(note, WriteOpts::default()).await?;
    assert!(resp.error.is_none());
    Ok(())
}

#[tokio::test]
async fn schema_modules_round_trip_through_the_file_store() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path().join("vault");
    std::fs::create_dir_all(&root)?;

    let store = FileStore::open(&root)?;
    let vault = store.vault().clone();
    let engine = Engine::new(vec![Arc::new(store) as Arc<dyn NoteStore>]);
    engine.init().await?;
    engine.write_schema(module_for(&vault)).await?;
    drop(engine);

    assert!(root.join("proj.schema.yml").exists());

    let store = FileStore::open(&root)?;
    let engine = Engine::new(vec![Arc::new(store) as Arc<dyn NoteStore>]);
    let resp = engine.init().await?;
    assert!(resp.error.is_none());

    let module = engine.get_schema("proj").await?.data.unwrap();
    assert_eq!(module.root, "proj");
    assert_eq!(
        module.schemas.get("task").unwrap().data.pattern.as_deref(),
        Some("task.*")
    );
    module.validate().expect("reloaded module is structurally valid");
    Ok(())
}
