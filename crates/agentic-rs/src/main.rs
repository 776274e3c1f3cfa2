//! Command-line front end for inspecting and editing assistant memory.

use agentic_rs::config::AgenticConfig;
use agentic_rs::memory::{
    MemoryManager, MemoryType, Metadata, MetadataValue, SearchFilter, build_metadata,
};
use agentic_rs::{embedder_from_config, open_memory};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "agentic-memory", version)]
struct Cli {
    /// Optional path to an agentic.json5 config file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a memory of the given type
    Remember {
        #[arg(long = "type", default_value = "fact")]
        memory_type: MemoryType,
        content: String,
        #[arg(long)]
        importance: Option<f32>,
        /// Metadata as key=value; repeatable
        #[arg(long = "meta", value_parser = parse_meta)]
        metadata: Vec<(String, MetadataValue)>,
    },
    /// Store one user/assistant exchange
    Converse {
        #[arg(long)]
        user: String,
        #[arg(long)]
        assistant: String,
    },
    /// Rank memories against a query
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        /// Restrict to these types; repeatable
        #[arg(long = "type")]
        types: Vec<MemoryType>,
    },
    /// Print the assembled context for a query
    Context {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Soft-delete a memory
    Forget { id: Uuid },
    /// Dump live memories as JSON lines
    Export {
        #[arg(long = "type")]
        types: Vec<MemoryType>,
    },
    /// Print store statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();
    let config = if let Some(path) = cli.config.as_ref() {
        info!("loading config from path: {}", path.display());
        AgenticConfig::load_from_path(path).context("failed to load config")?
    } else {
        let cwd = std::env::current_dir().context("cwd")?;
        let layered = AgenticConfig::load_layered(&cwd).context("failed to load layered config")?;
        debug!("layered config loaded (layers={})", layered.layers.len());
        layered.config
    };

    let embedder = embedder_from_config(&config.embedding).context("embedding provider")?;
    let manager = open_memory(&config, embedder)
        .await
        .context("failed to open memory")?;
    let result = run(&manager, cli.command).await;
    manager.close().await.context("failed to flush memory")?;
    result
}

async fn run(manager: &MemoryManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Remember {
            memory_type,
            content,
            importance,
            metadata,
        } => {
            if memory_type == MemoryType::Conversation {
                bail!("use `converse` to store conversation turns");
            }
            let record = manager
                .store_memory(memory_type, &content, importance, build_metadata(metadata))
                .await?;
            println!("{}", record.id);
        }
        Command::Converse { user, assistant } => {
            let record = manager
                .store_conversation(&user, &assistant, Metadata::new())
                .await?;
            println!("{}", record.id);
        }
        Command::Search { query, k, types } => {
            let filter = if types.is_empty() {
                SearchFilter::any()
            } else {
                SearchFilter::types(types)
            };
            for hit in manager.search_memories(&query, k, &filter).await? {
                let line = json!({
                    "id": hit.record.id,
                    "type": hit.record.memory_type,
                    "score": hit.score,
                    "similarity": hit.similarity,
                    "content": hit.record.content,
                });
                println!("{line}");
            }
        }
        Command::Context { query, k } => {
            let payload = manager
                .retrieve_context(&query, k, &SearchFilter::any())
                .await?;
            println!("{}", payload.render());
            info!(
                "context assembled (tokens={}/{}, dropped={})",
                payload.total_tokens, payload.max_tokens, payload.dropped
            );
        }
        Command::Forget { id } => {
            manager.forget(id).await?;
            println!("forgot {id}");
        }
        Command::Export { types } => {
            for record in manager.export_memories(&types) {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Stats => {
            let stats = manager.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

/// Parse `key=value`; booleans and numbers keep their JSON type.
fn parse_meta(raw: &str) -> Result<(String, MetadataValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("metadata key must not be empty".to_string());
    }
    let value = match value {
        "true" => MetadataValue::Bool(true),
        "false" => MetadataValue::Bool(false),
        other => match other.parse::<f64>() {
            Ok(number) if number.is_finite() => MetadataValue::Number(number),
            Ok(_) => return Err(format!("metadata `{key}` must be a finite number")),
            Err(_) => MetadataValue::String(other.to_string()),
        },
    };
    Ok((key.to_string(), value))
}
