use std::sync::Arc;

use dendrite::{
    Engine, MemStore, NodeKind, NoteProps, NoteStore, QueryOpts, QueryResult, Vault, WriteOpts,
};

async fn seeded_engine(vaults: &[&str], notes: &[(&str, &str)]) -> anyhow::Result<Engine> {
    let stores: Vec<Arc<dyn NoteStore>> = vaults
        .iter()
        .map(|v| Arc::new(MemStore::new(Vault::new(*v))) as Arc<dyn NoteStore>)
        .collect();
    let engine = Engine::new(stores);
    engine.init().await?;
    for (vault, fname) in notes {
        let note = NoteProps::note(*fname, Vault::new(*vault)).with_body("body text");
        let resp = engine.write_note(note, WriteOpts::default()).await?;
        assert!(resp.error.is_none());
    }
    Ok(engine)
}

#[tokio::test]
async fn summary_mode_strips_body_and_full_mode_hydrates_it() -> anyhow::Result<()> {
    let engine = seeded_engine(&["v1"], &[("v1", "proj.alpha")]).await?;

    let hits = engine
        .query_notes("proj.alpha", QueryOpts::default())
        .await?
        .data
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].body.is_empty());

    let hits = engine
        .query_notes(
            "proj.alpha",
            QueryOpts {
                full_node: true,
                ..Default::default()
            },
        )
        .await?
        .data
        .unwrap();
    assert_eq!(hits[0].body, "body text");
    Ok(())
}

#[tokio::test]
async fn unresolved_query_returns_empty_not_error() -> anyhow::Result<()> {
    let engine = seeded_engine(&["v1"], &[("v1", "a")]).await?;
    let resp = engine.query_notes("zz.*.q", QueryOpts::default()).await?;
    assert!(resp.error.is_none());
    assert!(resp.data.unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn query_one_is_stable_across_repeated_calls() -> anyhow::Result<()> {
    let engine = seeded_engine(&["v1"], &[("v1", "t.b"), ("v1", "t.a"), ("v1", "t.a.x")]).await?;

    let opts = QueryOpts {
        query_one: true,
        ..Default::default()
    };
    let first = engine.query_notes("t.", opts).await?.data.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].fname, "t.a");
    for _ in 0..3 {
        let again = engine.query_notes("t.", opts).await?.data.unwrap();
        assert_eq!(again[0].fname, "t.a");
    }
    Ok(())
}

#[tokio::test]
async fn query_one_cross_vault_tie_is_a_domain_error() -> anyhow::Result<()> {
    let engine = seeded_engine(&["v1", "v2"], &[("v1", "same.path"), ("v2", "same.path")]).await?;
    let resp = engine
        .query_notes(
            "same.path",
            QueryOpts {
                query_one: true,
                ..Default::default()
            },
        )
        .await?;
    assert!(resp.error.is_some());
    Ok(())
}

#[tokio::test]
async fn query_create_if_new_creates_the_missing_note() -> anyhow::Result<()> {
    let engine = seeded_engine(&["v1"], &[]).await?;
    let hits = engine
        .query_notes(
            "fresh.note",
            QueryOpts {
                create_if_new: true,
                ..Default::default()
            },
        )
        .await?
        .data
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fname, "fresh.note");

    let vault = Vault::new("v1");
    assert!(engine.with_index(|idx| idx.note_by_path(&vault, "fresh.note").is_some()));
    Ok(())
}

#[tokio::test]
async fn query_dispatches_by_mode() -> anyhow::Result<()> {
    let engine = seeded_engine(&["v1"], &[("v1", "n.one")]).await?;
    let result = engine
        .query("n.one", NodeKind::Note, QueryOpts::default())
        .await?
        .data
        .unwrap();
    match result {
        QueryResult::Notes(notes) => assert_eq!(notes.len(), 1),
        QueryResult::Schemas(_) => panic!("expected note results"),
    }

    let result = engine
        .query("", NodeKind::Schema, QueryOpts::default())
        .await?
        .data
        .unwrap();
    match result {
        QueryResult::Schemas(modules) => assert!(modules.is_empty()),
        QueryResult::Notes(_) => panic!("expected schema results"),
    }
    Ok(())
}
