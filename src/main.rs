//! # mailrag CLI
//!
//! The `mailrag` binary syncs exported mail into SQLite, indexes it into a
//! Qdrant collection and answers semantic queries over it.
//!
//! ## Usage
//!
//! ```bash
//! mailrag --config ./config/mailrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mailrag init` | Create the SQLite database and schema |
//! | `mailrag sync` | Import exported messages from `[sync].root` |
//! | `mailrag list` | List stored messages, newest first |
//! | `mailrag show <id>` | Print one stored message |
//! | `mailrag parse <file>` | Normalize an export file and print it as JSON |
//! | `mailrag index` | Chunk, embed and upsert stored messages |
//! | `mailrag search "<query>"` | Semantic search, one result per message |
//! | `mailrag delete <id>` | Remove a message and its vectors |
//! | `mailrag stats` | Database and collection overview |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mailrag::show::ListArgs;
use mailrag::{config, index_cmd, ingest, logging, migrate, search, show, stats};

/// mailrag: retrieval over your mailbox.
///
/// All commands except `parse` read a TOML configuration file. See
/// `config/mailrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mailrag",
    about = "Semantic search over exported email",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mailrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Import exported messages into the database.
    Sync {
        /// Process at most this many messages.
        #[arg(long)]
        limit: Option<usize>,

        /// Show counts without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// List stored messages, newest first.
    List {
        /// Sender substring (case-insensitive).
        #[arg(long)]
        from: Option<String>,

        /// Only messages on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only messages on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        #[arg(long, default_value = "50")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Print one stored message.
    Show {
        /// Provider message id.
        id: String,
    },

    /// Normalize an export file and print the result as JSON.
    ///
    /// Does not need a configuration file or database.
    Parse {
        file: PathBuf,
    },

    /// Chunk, embed and upsert stored messages into the vector store.
    Index {
        /// Index at most this many messages (newest first).
        #[arg(long)]
        limit: Option<usize>,

        /// Only messages on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,
    },

    /// Semantic search over indexed messages.
    Search {
        /// Query text.
        #[arg(required = true)]
        query: Vec<String>,

        /// Maximum number of messages to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Drop messages scoring below this.
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Remove a message from the vector store and the database.
    Delete {
        id: String,
    },

    /// Show database and collection statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Parse { file } = &cli.command {
        logging::init_logging("warn");
        show::run_parse(file)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { limit, dry_run } => {
            ingest::run_sync(&cfg, limit, dry_run).await?;
        }
        Commands::List {
            from,
            since,
            until,
            limit,
            offset,
        } => {
            let args = ListArgs {
                from,
                since,
                until,
                limit,
                offset,
            };
            show::run_list(&cfg, &args).await?;
        }
        Commands::Show { id } => {
            show::run_show(&cfg, &id).await?;
        }
        Commands::Parse { .. } => unreachable!("handled before config load"),
        Commands::Index { limit, since } => {
            index_cmd::run_index(&cfg, limit, since.as_deref()).await?;
        }
        Commands::Search {
            query,
            limit,
            min_score,
        } => {
            search::run_search(&cfg, &query.join(" "), limit, min_score).await?;
        }
        Commands::Delete { id } => {
            show::run_delete(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
