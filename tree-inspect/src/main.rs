mod config;
mod inspect;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use entity_tree::kinds::{MaterialProjection, MemoProjection, NoteProjection};
use entity_tree::{Entity, TreeSettings, ViewProjection};
use serde::de::DeserializeOwned;
use shared::{MaterialEntity, MemoEntity, NoteEntity};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tree-inspect")]
#[command(about = "Load an entity dump into an entity tree and inspect it")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tree outline
    Show {
        #[command(flatten)]
        source: Source,

        /// Fetch and expand every branch
        #[arg(long)]
        expand_all: bool,
    },
    /// Reveal entities the way "locate moved item" does and print their paths
    Locate {
        #[command(flatten)]
        source: Source,

        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Print the nodes a drag of the given entities may not be dropped onto
    DropTargets {
        #[command(flatten)]
        source: Source,

        #[arg(required = true)]
        ids: Vec<u64>,
    },
}

#[derive(Args)]
struct Source {
    /// JSON array of entities of the chosen kind
    #[arg(long, short)]
    entities: PathBuf,

    #[arg(long, short, value_enum, default_value = "note")]
    kind: Kind,

    /// TOML file with `[app]` and `[tree]` sections
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Note,
    Material,
    Memo,
}

impl Kind {
    fn root_title(self) -> &'static str {
        match self {
            Kind::Note => "Notes",
            Kind::Material => "Materials",
            Kind::Memo => "Memos",
        }
    }
}

impl Commands {
    fn source(&self) -> &Source {
        match self {
            Commands::Show { source, .. }
            | Commands::Locate { source, .. }
            | Commands::DropTargets { source, .. } => source,
        }
    }
}

#[tokio::main(flavor = "local")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    let source = command.source();
    let config = config::load_or_default(source.config.as_deref())?;
    let settings = TreeSettings {
        root_title: source.kind.root_title().to_string(),
        ..TreeSettings::from(&config.tree)
    };

    match source.kind {
        Kind::Note => execute::<NoteEntity>(&command, NoteProjection, settings).await,
        Kind::Material => execute::<MaterialEntity>(&command, MaterialProjection, settings).await,
        Kind::Memo => execute::<MemoEntity>(&command, MemoProjection, settings).await,
    }
}

async fn execute<E>(
    command: &Commands,
    projection: impl ViewProjection<E> + 'static,
    settings: TreeSettings,
) -> Result<()>
where
    E: Entity<Id = u64> + DeserializeOwned,
{
    let entities: Vec<E> = inspect::read_entities(&command.source().entities)?;
    let tree = inspect::open(entities, projection, settings).await?;

    match command {
        Commands::Show { expand_all, .. } => {
            if *expand_all {
                inspect::expand_all(&tree).await?;
            }
            print!("{}", inspect::render(&tree));
            let orphans = tree.orphans();
            if !orphans.is_empty() {
                log::warn!("{} entities reference parents missing from the dump", orphans.len());
            }
        }
        Commands::Locate { ids, .. } => {
            for id in ids {
                println!("{id}: {}", inspect::locate(&tree, id).await?);
            }
        }
        Commands::DropTargets { ids, .. } => {
            for target in inspect::drop_targets(&tree, ids).await? {
                println!("{target}");
            }
        }
    }
    Ok(())
}
