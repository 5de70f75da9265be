//! confdb operator CLI
//!
//! Works on a root directory of databases. Documents are handled as JSON, so
//! the CLI can read any collection written with the JSON codec.

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use confdb::{CommitMeta, ConfDbConfig, ConfigDatabase, ConfigService, DocumentCodec};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "confdb", version, about = "Administrative CLI for confdb databases")]
struct Cli {
    #[arg(long, global = true, default_value = "./confdb_data", help = "Directory holding the databases")]
    root: PathBuf,

    #[arg(short, long, global = true, action = ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,

    #[arg(long, global = true, help = "Committer recorded with write commands")]
    committer: Option<String>,

    #[arg(short, long, global = true, help = "Commit message recorded with write commands")]
    message: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List databases
    Databases,
    /// Create a database
    Createdb { name: String },
    /// Delete a database and all of its history
    Dropdb { name: String },
    /// List collections of a database
    Cols { db: String },
    /// Create a collection
    Createcol { db: String, collection: String },
    /// Drop a collection (its history stays in older changesets)
    Dropcol { db: String, collection: String },
    /// Show commit logs, newest first
    Logs {
        db: String,
        #[arg(default_value_t = 0)]
        offset: usize,
        #[arg(default_value_t = 20)]
        limit: usize,
    },
    /// List documents of a collection
    Docs {
        db: String,
        collection: String,
        #[arg(long, help = "Read as of this changeset instead of the head")]
        at: Option<u64>,
    },
    /// Add a JSON document
    Add { db: String, collection: String, json: String },
    /// Delete a document by id
    Delete { db: String, collection: String, id: u64 },
    /// Make an earlier changeset current again
    Rollback { db: String, changeset: u64 },
}

fn main() {
    let cli = Cli::parse();
    install_tracing_subscriber(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn run(cli: Cli) -> Result<()> {
    let service = ConfigService::new(&cli.root, ConfDbConfig::default())
        .with_context(|| format!("opening root {}", cli.root.display()))?;
    let mut meta = CommitMeta::new();
    meta.committer = cli.committer.clone();
    meta.message = cli.message.clone();

    match cli.command {
        Command::Databases => {
            for name in service.database_names()? {
                println!("{}", name);
            }
        }
        Command::Createdb { name } => {
            let db = service.create_database(&name)?;
            println!("created database {} (manifest v{})", db.name(), db.format_version());
        }
        Command::Dropdb { name } => {
            if !service.drop_database(&name)? {
                bail!("no database named {}", name);
            }
            println!("dropped database {}", name);
        }
        Command::Cols { db } => {
            let db = open(&service, &db)?;
            for name in db.collection_names() {
                let count = db
                    .collection::<Value>(&name)
                    .map(|c| c.count())
                    .transpose()?
                    .unwrap_or(0);
                println!("{}\t{} documents", name, count);
            }
        }
        Command::Createcol { db, collection } => {
            let db = open(&service, &db)?;
            let col = db.ensure_collection::<Value>(&collection)?;
            println!("collection {} (id {})", col.name(), col.id());
        }
        Command::Dropcol { db, collection } => {
            let db = open(&service, &db)?;
            if !db.drop_collection(&collection)? {
                bail!("no collection named {}", collection);
            }
            println!("dropped collection {} at changeset {}", collection, db.head_changeset());
        }
        Command::Logs { db, offset, limit } => {
            let db = open(&service, &db)?;
            for log in db.commit_logs(offset, limit)? {
                println!("{}", log);
                for change in &log.changes {
                    println!("    {}", change);
                }
            }
        }
        Command::Docs { db, collection, at } => {
            let db = open(&service, &db)?;
            require_json(&db)?;
            let col = match at {
                Some(cs) => db.collection_at::<Value>(&collection, cs)?,
                None => db.collection::<Value>(&collection),
            }
            .ok_or_else(|| anyhow!("no collection named {}", collection))?;
            for config in col.find_all()? {
                let config = config?;
                println!(
                    "{}\trev {}\t{}",
                    config.id,
                    config.revision,
                    serde_json::to_string(&config.document)?
                );
            }
        }
        Command::Add { db, collection, json } => {
            let db = open(&service, &db)?;
            require_json(&db)?;
            let document: Value = serde_json::from_str(&json).context("parsing document")?;
            let col = db
                .collection::<Value>(&collection)
                .ok_or_else(|| anyhow!("no collection named {}", collection))?;
            let config = col.add_with(document, &meta)?;
            println!("added document {} at changeset {}", config.id, db.head_changeset());
        }
        Command::Delete { db, collection, id } => {
            let db = open(&service, &db)?;
            require_json(&db)?;
            let col = db
                .collection::<Value>(&collection)
                .ok_or_else(|| anyhow!("no collection named {}", collection))?;
            let config = col
                .get(id)?
                .ok_or_else(|| anyhow!("no document {} in {}", id, collection))?;
            col.remove_with(config, true, &meta)?;
            println!("deleted document {} at changeset {}", id, db.head_changeset());
        }
        Command::Rollback { db, changeset } => {
            let db = open(&service, &db)?;
            let new_head = db.rollback(changeset, &meta)?;
            println!("rolled back to changeset {} as changeset {}", changeset, new_head);
        }
    }
    Ok(())
}

fn open(service: &ConfigService, name: &str) -> Result<ConfigDatabase> {
    service
        .open_database(name)?
        .ok_or_else(|| anyhow!("no database named {}", name))
}

fn require_json(db: &ConfigDatabase) -> Result<()> {
    if db.codec() != DocumentCodec::Json {
        bail!(
            "database {} stores {} documents, which the CLI cannot read",
            db.name(),
            db.codec().name()
        );
    }
    Ok(())
}
