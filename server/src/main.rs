//! LocalForge Entry Point
//!
//! Command-line access to the vector store, plus the MCP server (`mcp`)
//! that AI clients talk to over stdio.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use localforge_server::mcp::{McpBackend, McpServer};
use localforge_server::workspace::{index_folder, WalkOptions};
use localforge_server::{OllamaClient, Settings};
use localforge_store::Retriever;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "localforge")]
#[command(about = "Offline vector store and retrieval for LocalForge")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a file or every matching file under a folder
    Index {
        path: PathBuf,
        /// File extension to include (repeatable)
        #[arg(long = "ext")]
        extensions: Vec<String>,
        /// Glob, relative to PATH, to leave out (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Rank stored documents against a query
    Search {
        query: String,
        /// Hits to use; 0 or less returns none
        #[arg(short = 'k', long, allow_negative_numbers = true)]
        top_k: Option<i64>,
    },
    /// Answer a question with retrieved context and the Ollama model
    Query {
        question: String,
        /// Hits to use; 0 or less returns none
        #[arg(short = 'k', long, allow_negative_numbers = true)]
        top_k: Option<i64>,
    },
    /// Remove one document
    Delete { doc_id: String },
    /// Remove every document
    Clear,
    /// Reload the similarity index from the store
    Rebuild {
        /// Strategy id; all declared strategies when omitted
        strategy: Option<String>,
    },
    /// Re-embed documents stored under a strategy that is no longer configured
    Migrate,
    /// Show store statistics
    Stats,
    /// Serve the Model Context Protocol over stdio
    Mcp,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results and MCP traffic
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localforge_server=info,localforge_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = cli.settings;
    let retriever = settings
        .open_retriever()
        .with_context(|| format!("failed to open store at {}", settings.db_path.display()))?;
    let top_k = |k: Option<i64>| retriever.config().resolve_top_k(k);

    match cli.command {
        Command::Index {
            path,
            extensions,
            exclude,
        } => {
            let options = WalkOptions::new(&extensions, &exclude);
            print_json(&index_folder(&retriever, &path, &options).await?)?;
        }
        Command::Search { query, top_k: k } => {
            print_json(&retriever.search(&query, top_k(k)).await?)?;
        }
        Command::Query { question, top_k: k } => {
            let model = OllamaClient::new(settings.ollama_config())?;
            print_json(&retriever.query(&question, top_k(k), &model).await?)?;
        }
        Command::Delete { doc_id } => {
            let removed = retriever.delete(&doc_id)?;
            print_json(&serde_json::json!({ "deleted": removed.doc_id }))?;
        }
        Command::Clear => {
            print_json(&serde_json::json!({ "cleared": retriever.clear()? }))?;
        }
        Command::Rebuild { strategy } => {
            let rebuilt: BTreeMap<String, usize> = match strategy {
                Some(id) => {
                    let count = retriever.rebuild(&id)?;
                    [(id, count)].into_iter().collect()
                }
                None => retriever.rebuild_all()?,
            };
            print_json(&serde_json::json!({ "rebuilt": rebuilt }))?;
        }
        Command::Migrate => {
            print_json(&retriever.migrate_stale().await?)?;
        }
        Command::Stats => {
            print_json(&retriever.stats()?)?;
        }
        Command::Mcp => serve_mcp(&settings, retriever).await?,
    }

    Ok(())
}

async fn serve_mcp(settings: &Settings, retriever: Retriever) -> anyhow::Result<()> {
    if let Some(path) = &settings.auto_index_path {
        match index_folder(&retriever, path, &WalkOptions::default()).await {
            Ok(report) => tracing::info!(
                "Auto-indexed {:?}: {} indexed, {} failed",
                path,
                report.indexed,
                report.failed.len()
            ),
            Err(e) => tracing::warn!("Auto-index of {:?} failed: {}", path, e),
        }
    }

    let model = OllamaClient::new(settings.ollama_config())?;
    if !model.is_reachable().await {
        tracing::warn!(
            "Ollama is not reachable at {}; localforge_query will fail until it is",
            settings.ollama_url
        );
    }
    tracing::info!("Starting LocalForge MCP server");
    let mut server = McpServer::new(McpBackend::new(retriever, Arc::new(model)));
    server.run().await.context("MCP server error")
}
