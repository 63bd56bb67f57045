//! # codeask CLI
//!
//! The `codeask` binary ingests a codebase into a local vector index and
//! answers questions about it.
//!
//! ## Usage
//!
//! ```bash
//! codeask --config ./codeask.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codeask init` | Create the index store and verify the configuration |
//! | `codeask ingest <dir>` | Index every eligible file under a directory |
//! | `codeask ask "<question>"` | Ask a one-shot question |
//! | `codeask chat` | Interactive session with conversation history |
//! | `codeask stats` | Show index entry count and model |
//! | `codeask clear --index` | Delete every entry in the index |
//!
//! ## Examples
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! codeask init
//! codeask ingest ./my-project
//! codeask ask "where is the HTTP router configured?"
//! codeask chat
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use codeask::assistant::Assistant;
use codeask::config::{self, Config};
use codeask::embedding::OpenAiEmbedder;
use codeask::generate::OpenAiGenerator;
use codeask::index::{SqliteIndex, VectorIndex};
use codeask::ingest;
use codeask::models::Answer;
use codeask::retry::RetryPolicy;

/// codeask — ask questions about your codebase, answered from retrieved
/// source snippets.
#[derive(Parser)]
#[command(
    name = "codeask",
    about = "Ask natural-language questions about a codebase",
    version,
    long_about = "codeask ingests a directory of source files into a chunked, embedded local \
    index and answers questions about the code, grounding each answer in the most relevant \
    retrieved snippets. Requires OPENAI_API_KEY for the embedding and generation services."
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./codeask.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index store and verify the configuration.
    ///
    /// Idempotent — running it multiple times is safe. Fails when the
    /// existing store was built with a different embedding model.
    Init,

    /// Ingest a directory of source files into the index.
    ///
    /// Validates, chunks, and embeds every eligible file. Files that fail
    /// validation are skipped and reported. Re-ingesting a file replaces
    /// its previous entries. Ctrl-C aborts cleanly, rolling back the file
    /// in flight.
    Ingest {
        /// Root directory to ingest.
        path: PathBuf,

        /// Only ingest the top level, not subdirectories.
        #[arg(long)]
        no_recursive: bool,
    },

    /// Ask a one-shot question about the indexed codebase.
    Ask {
        /// The question.
        question: String,
    },

    /// Start an interactive session with conversation history.
    ///
    /// In-session commands: `/history`, `/clear`, `/quit`.
    Chat,

    /// Show index statistics.
    Stats,

    /// Destructive clear operations.
    Clear {
        /// Delete every entry in the vector index.
        #[arg(long)]
        index: bool,
    },
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("codeask={level}")));

    fmt().with_env_filter(filter).with_target(false).init();
}

async fn open_index(cfg: &Config) -> Result<Arc<SqliteIndex>> {
    let index = SqliteIndex::open(
        &cfg.index.path,
        &cfg.embedding.model,
        cfg.embedding.dims,
    )
    .await?;
    Ok(Arc::new(index))
}

fn build_assistant(cfg: &Config, index: Arc<dyn VectorIndex>) -> Result<Assistant> {
    let embedder = Arc::new(OpenAiEmbedder::new(
        &cfg.embedding,
        RetryPolicy::with_retries(cfg.embedding.max_retries),
    )?);
    let generator = Arc::new(OpenAiGenerator::new(
        &cfg.generation,
        RetryPolicy::with_retries(cfg.generation.max_retries),
    )?);
    Ok(Assistant::new(cfg, embedder, index, generator)?)
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if answer.grounded {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!(
                "  {} (part {}, score {:.3})",
                source.path, source.ordinal, source.score
            );
        }
    } else {
        println!();
        println!("(ungrounded — no indexed context matched this question)");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.log_level);

    match cli.command {
        Commands::Init => {
            let index = open_index(&cfg).await?;
            println!(
                "Index store initialized at {} ({} entries, model {}).",
                cfg.index.path.display(),
                index.count().await?,
                cfg.embedding.model
            );
        }

        Commands::Ingest { path, no_recursive } => {
            let index = open_index(&cfg).await?;
            let embedder = Arc::new(OpenAiEmbedder::new(
                &cfg.embedding,
                RetryPolicy::with_retries(cfg.embedding.max_retries),
            )?);

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal_cancel.cancel();
                }
            });

            let report = ingest::ingest_directory(
                &cfg,
                embedder,
                index.clone(),
                &path,
                !no_recursive,
                &cancel,
            )
            .await?;

            println!("ingest {}", path.display());
            println!("  files indexed: {}", report.files_indexed);
            println!("  chunks indexed: {}", report.chunks_indexed);
            println!("  skipped: {}", report.skipped.len());
            for skipped in &report.skipped {
                println!("    {} — {}", skipped.path, skipped.reason);
            }
            if report.cancelled {
                println!("  aborted before completion");
            } else {
                println!("ok");
            }
        }

        Commands::Ask { question } => {
            let index = open_index(&cfg).await?;
            let assistant = build_assistant(&cfg, index)?;
            let answer = assistant.ask(&question).await?;
            print_answer(&answer);
        }

        Commands::Chat => {
            let index = open_index(&cfg).await?;
            let assistant = build_assistant(&cfg, index)?;
            run_chat(&assistant).await?;
        }

        Commands::Stats => {
            let index = open_index(&cfg).await?;
            println!("index: {}", cfg.index.path.display());
            println!("  entries: {}", index.count().await?);
            println!("  embedding model: {}", cfg.embedding.model);
            println!("  generation model: {}", cfg.generation.model);
        }

        Commands::Clear { index: clear_index } => {
            if !clear_index {
                anyhow::bail!("nothing to clear; pass --index to clear the vector index");
            }
            let index = open_index(&cfg).await?;
            let removed = index.delete_all().await?;
            println!("cleared {removed} entries from the index");
        }
    }

    Ok(())
}

/// Interactive question loop. Conversation history lives for the duration
/// of the session; `/clear` drops it without touching the index.
async fn run_chat(assistant: &Assistant) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("codeask chat — /history, /clear, /quit");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/clear" => {
                assistant.clear_history().await;
                println!("history cleared");
            }
            "/history" => {
                let turns = assistant.history().await;
                if turns.is_empty() {
                    println!("no turns yet");
                }
                for turn in turns {
                    println!("[{}] Q: {}", turn.timestamp.format("%H:%M:%S"), turn.question);
                    println!("        A: {}", turn.answer);
                }
            }
            "" => continue,
            question => match assistant.ask(question).await {
                Ok(answer) => {
                    print_answer(&answer);
                    println!();
                }
                Err(e) => {
                    println!("error: {e}");
                    println!();
                }
            },
        }
    }

    Ok(())
}
