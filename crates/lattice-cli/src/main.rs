//! Lattice CLI: inspect and edit a note vault's graph and whiteboards.
//!
//! Commands: graph, local, note, boards, cards, move-card, remove-card,
//! restore, watch, completions

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use serde_json::json;
use tracing::Level;

use lattice_core::whiteboard::CardPosition;
use lattice_graph::Graph;
use lattice_vault::{Vault, DEFAULT_LOCAL_DEPTH};

/// Quiet period that ends a batch of watch events.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "lattice")]
#[command(version)]
#[command(about = "Plain-file note vault with whiteboards and a derived link graph")]
struct Cli {
    /// Vault root directory
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,

    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print the full note graph
    Graph {
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Print the neighbourhood of one note
    Local {
        /// Note id
        id: String,
        /// Levels of links and backlinks to follow
        #[arg(long, default_value_t = DEFAULT_LOCAL_DEPTH)]
        depth: usize,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Print one note with its links and backlinks
    Note {
        /// Note id, file name, or title
        id: String,
    },
    /// List whiteboards
    Boards,
    /// List the cards on a whiteboard
    Cards { whiteboard: String },
    /// Place a note's card on a whiteboard, moving it off any other
    MoveCard {
        whiteboard: String,
        note_id: String,
        #[arg(long, allow_negative_numbers = true)]
        x: f64,
        #[arg(long, allow_negative_numbers = true)]
        y: f64,
    },
    /// Remove a note's card from a whiteboard
    RemoveCard { whiteboard: String, note_id: String },
    /// Replace a file with its most recent backup
    Restore {
        /// Path, relative to the vault root or absolute
        file: PathBuf,
    },
    /// Rebuild the graph whenever notes change
    Watch,
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Dot,
    Mermaid,
}

impl Format {
    fn render(self, graph: &Graph) -> String {
        match self {
            Self::Json => graph.format_json(),
            Self::Dot => graph.format_dot(),
            Self::Mermaid => graph.format_mermaid(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let vault = Vault::open(&cli.vault)
        .with_context(|| format!("failed to open vault at {}", cli.vault.display()))?;
    let result = run(&vault, cli.command).await;
    vault.flush().await;
    result
}

async fn run(vault: &Vault, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Graph { format } => {
            let graph = vault.build_graph().await?;
            print!("{}", with_newline(format.render(&graph)));
        }
        Commands::Local { id, depth, format } => {
            vault.build_graph().await?;
            let center = resolve_note(vault, &id).await.map_or(id, |note| note.id);
            let graph = vault.get_local_graph(&center, depth).await;
            print!("{}", with_newline(format.render(&graph)));
        }
        Commands::Note { id } => {
            vault.build_graph().await?;
            let Some(note) = resolve_note(vault, &id).await else {
                bail!("note not found: {id}");
            };
            println!("{}", serde_json::to_string_pretty(&note)?);
        }
        Commands::Boards => {
            let set = vault.load_metadata().await?;
            let boards: Vec<_> = set
                .whiteboards
                .iter()
                .map(|wb| json!({ "id": wb.id, "name": wb.name, "cards": wb.cards.len() }))
                .collect();
            let out = json!({
                "activeWhiteboardId": set.index.active_whiteboard_id,
                "whiteboards": boards,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Cards { whiteboard } => {
            let cards = vault.get_card_positions(&whiteboard).await?;
            println!("{}", serde_json::to_string_pretty(&cards)?);
        }
        Commands::MoveCard {
            whiteboard,
            note_id,
            x,
            y,
        } => {
            vault
                .update_card_position(CardPosition::new(note_id, whiteboard.as_str(), x, y))
                .await?;
            let cards = vault.get_card_positions(&whiteboard).await?;
            println!("{}", serde_json::to_string_pretty(&cards)?);
        }
        Commands::RemoveCard {
            whiteboard,
            note_id,
        } => {
            vault
                .remove_card_from_whiteboard(&note_id, &whiteboard)
                .await?;
            println!("{}", json!({ "removed": note_id, "whiteboard": whiteboard }));
        }
        Commands::Restore { file } => {
            let restored = vault.restore_from_backup(&file).await?;
            println!("{}", json!({ "file": file, "restored": restored }));
        }
        Commands::Watch => watch(vault).await?,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "lattice", &mut io::stdout());
        }
    }
    Ok(())
}

/// Exact id first, then wikilink-style resolution.
async fn resolve_note(vault: &Vault, id: &str) -> Option<lattice_core::Note> {
    match vault.get_note(id).await {
        Some(note) => Some(note),
        None => vault.find_note_by_link(id).await,
    }
}

async fn watch(vault: &Vault) -> anyhow::Result<()> {
    let mut watcher = vault.watch().context("failed to start watcher")?;
    let graph = vault.build_graph().await?;
    print_summary(&graph, 0);

    loop {
        tokio::select! {
            batch = watcher.next_batch(WATCH_DEBOUNCE) => {
                let Some(batch) = batch else { break };
                tracing::debug!(events = batch.len(), "rebuilding after changes");
                let graph = vault.build_graph().await?;
                print_summary(&graph, batch.len());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_summary(graph: &Graph, changes: usize) {
    println!(
        "{}",
        json!({
            "at": chrono::Utc::now().to_rfc3339(),
            "changes": changes,
            "notes": graph.nodes.len(),
            "edges": graph.edges.len(),
        })
    );
}

fn with_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}
