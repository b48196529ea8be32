use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use dendrite::{
    ChangeStatus, DeleteOpts, Engine, FileStore, GetNoteOpts, NodeKind, NoteChangeEntry, NoteLoc,
    NoteProps, NoteStore, QueryOpts, QueryResult, RenameOpts, Resp, WriteOpts,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Note,
    Schema,
}

impl From<ModeArg> for NodeKind {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Note => NodeKind::Note,
            ModeArg::Schema => NodeKind::Schema,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "den", version, about = "Hierarchical note engine CLI")]
struct Cli {
    /// Vault root directory (repeatable; the first one is the home vault).
    #[arg(long = "vault", env = "DENDRITE_VAULT", global = true)]
    vaults: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load all vaults and print index statistics.
    Init,
    /// Pattern match over notes or schemas.
    Query {
        query_string: String,

        #[arg(long, value_enum, default_value = "note")]
        mode: ModeArg,

        /// Restrict to a single deterministic match.
        #[arg(long)]
        one: bool,

        /// Hydrate full body/links instead of summaries.
        #[arg(long)]
        full: bool,
    },
    /// Fetch a note by exact path.
    Get {
        npath: String,

        /// Create the note (and stub ancestors) when missing.
        #[arg(long)]
        create: bool,
    },
    /// Write a note at a path in the home vault.
    Write {
        fname: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        body: Option<String>,

        /// Persist stub ancestors created along the path.
        #[arg(long)]
        hierarchy: bool,
    },
    /// Rename a note, cascading descendant paths and inbound links.
    Rename { from: String, to: String },
    /// Delete a note by path (or raw id).
    Delete { target: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let engine = build_engine(&cli.vaults)?;
    let init = unwrap_resp(engine.init().await?)?;

    match cli.command {
        Command::Init => {
            println!("vaults: {}", cli.vaults.len());
            println!("notes: {}", init.notes.len());
            println!("schemas: {}", init.schemas.len());
        }
        Command::Query {
            query_string,
            mode,
            one,
            full,
        } => {
            let opts = QueryOpts {
                query_one: one,
                full_node: full,
                ..Default::default()
            };
            match unwrap_resp(engine.query(&query_string, mode.into(), opts).await?)? {
                QueryResult::Notes(notes) => {
                    for note in notes {
                        print_note(&note);
                    }
                }
                QueryResult::Schemas(modules) => {
                    for module in modules {
                        println!(
                            "{}\troot={}\tschemas={}",
                            module.fname,
                            module.root,
                            module.schemas.len()
                        );
                    }
                }
            }
        }
        Command::Get { npath, create } => {
            let resp = engine
                .get_note_by_path(GetNoteOpts {
                    npath,
                    create_if_new: create,
                })
                .await?;
            if let Some(err) = resp.error {
                anyhow::bail!("{err}");
            }
            match resp.data.and_then(|p| p.note) {
                Some(note) => {
                    print_note(&note);
                    if !note.body.is_empty() {
                        println!("---");
                        println!("{}", note.body);
                    }
                }
                None => println!("not found"),
            }
        }
        Command::Write {
            fname,
            title,
            body,
            hierarchy,
        } => {
            let home = engine
                .vaults()
                .first()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no vault configured"))?;
            let mut note = NoteProps::note(fname, home);
            if let Some(title) = title {
                note = note.with_title(title);
            }
            if let Some(body) = body {
                note = note.with_body(body);
            }
            let opts = WriteOpts {
                write_hierarchy: hierarchy,
                ..Default::default()
            };
            let entries = unwrap_resp(engine.write_note(note, opts).await?)?;
            print_entries(&entries);
        }
        Command::Rename { from, to } => {
            let home = engine
                .vaults()
                .first()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no vault configured"))?;
            let entries = unwrap_resp(
                engine
                    .rename_note(RenameOpts {
                        old_loc: NoteLoc::new(from, home.clone()),
                        new_loc: NoteLoc::new(to, home),
                    })
                    .await?,
            )?;
            print_entries(&entries);
        }
        Command::Delete { target } => {
            let id = engine
                .with_index(|idx| idx.note_by_fname(&target).map(|n| n.id.clone()))
                .unwrap_or(target);
            let entries = unwrap_resp(engine.delete_note(&id, DeleteOpts::default()).await?)?;
            print_entries(&entries);
        }
    }

    Ok(())
}

fn build_engine(vaults: &[PathBuf]) -> anyhow::Result<Engine> {
    if vaults.is_empty() {
        anyhow::bail!("--vault is required (or set DENDRITE_VAULT)");
    }
    let mut stores: Vec<Arc<dyn NoteStore>> = Vec::with_capacity(vaults.len());
    for root in vaults {
        stores.push(Arc::new(FileStore::open(root)?));
    }
    Ok(Engine::new(stores))
}

fn unwrap_resp<T>(resp: Resp<T>) -> anyhow::Result<T> {
    if let Some(err) = resp.error {
        anyhow::bail!("{err}");
    }
    resp.data
        .ok_or_else(|| anyhow::anyhow!("engine returned an empty response"))
}

fn print_note(note: &NoteProps) {
    println!(
        "{}\t{}\tvault={}\tstub={}\tlinks={}",
        note.fname,
        note.id,
        note.vault,
        note.stub,
        note.links.len()
    );
}

fn print_entries(entries: &[NoteChangeEntry]) {
    for entry in entries {
        let status = match entry.status {
            ChangeStatus::Create => "create",
            ChangeStatus::Update => "update",
            ChangeStatus::Delete => "delete",
        };
        println!("{status}\t{}\t{}", entry.note.fname, entry.note.id);
    }
}
