use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use laureate_audit::{AuditWriter, summarize};
use laureate_config::AppConfig;
use laureate_embedder::{Embedder, OfflineEmbedder, RemoteEmbedder};
use laureate_engine::{AnswerType, EngineDeps, QueryEngine, QueryRequest};
use laureate_intent::ThemeTaxonomy;
use laureate_llm::{CompletionBackend, LlmClient};
use laureate_metadata::{FactualRegistry, load_laureates};
use laureate_store::{ChunkStore, QdrantStore};

#[derive(Debug, Parser)]
#[command(
    name = "laureate",
    version,
    about = "Ask questions about Nobel Prize in Literature laureates and their speeches"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "laureate.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Answer a query (factual lookups or retrieval-augmented synthesis).
    Query {
        /// The question to answer.
        text: String,
        /// Completion model id override.
        #[arg(long)]
        model: Option<String>,
        /// Retrieval depth override.
        #[arg(long)]
        top_k: Option<usize>,
        /// Similarity threshold override (0.0 – 1.0).
        #[arg(long)]
        score_threshold: Option<f32>,
        /// Equality filter over indexed chunk fields, as field=value.
        /// Repeatable.
        #[arg(long = "filter", value_name = "FIELD=VALUE")]
        filters: Vec<String>,
        /// Print the raw response object as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Probe the embedder, vector store, and loaded static data.
    Health,
    /// Warm the external services up (health check + throwaway embedding).
    Warmup,
    /// Inspect the audit log.
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Debug, Subcommand)]
enum AuditCommands {
    /// Summarize audit lines over a trailing window.
    Summary {
        /// Window size in hours.
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    match cli.command {
        Commands::Query {
            text,
            model,
            top_k,
            score_threshold,
            filters,
            json,
        } => {
            let engine = build_engine(&config)?;
            let mut request = QueryRequest::new(text);
            request.source = "cli".to_string();
            request.model_id = model;
            request.top_k = top_k;
            request.score_threshold = score_threshold;
            request.filters = parse_filters(&filters)?;

            match engine.answer(request).await {
                Ok(response) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&response)?);
                    } else {
                        print_response(&response);
                    }
                }
                Err(error) => {
                    eprintln!("{}", error.user_message());
                    std::process::exit(1);
                }
            }
        }
        Commands::Health => {
            let engine = build_engine(&config)?;
            let report = engine.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Warmup => {
            let engine = build_engine(&config)?;
            let report = engine.warmup().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Audit { command } => match command {
            AuditCommands::Summary { hours } => {
                let since = Utc::now() - Duration::hours(hours);
                let summary = summarize(&config.audit.dir, since)?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        },
    }

    Ok(())
}

fn build_engine(config: &AppConfig) -> Result<QueryEngine> {
    let laureates = load_laureates(&config.data.laureates_path)?;
    let taxonomy = ThemeTaxonomy::load(&config.data.taxonomy_path, config.embedder.dimension)
        .context("loading theme taxonomy")?;

    let embedder: Arc<dyn Embedder> = if config.embedder.offline || config.embedder.url.is_empty() {
        tracing::info!("using the offline embedder");
        Arc::new(OfflineEmbedder::new(config.embedder.dimension))
    } else {
        Arc::new(RemoteEmbedder::new(&config.embedder)?)
    };
    let store: Arc<dyn ChunkStore> = Arc::new(QdrantStore::connect(&config.store)?);
    let llm: Arc<dyn CompletionBackend> = Arc::new(LlmClient::new(&config.llm)?);
    let audit = Arc::new(AuditWriter::new(&config.audit.dir, config.audit.max_file_mb));

    Ok(QueryEngine::new(
        EngineDeps {
            laureates: Arc::new(laureates),
            registry: Arc::new(FactualRegistry::new()),
            taxonomy: Arc::new(taxonomy),
            embedder,
            store,
            llm,
            audit,
        },
        config,
    ))
}

fn parse_filters(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut filters = BTreeMap::new();
    for pair in pairs {
        let Some((field, value)) = pair.split_once('=') else {
            bail!("filter '{pair}' is not in FIELD=VALUE form");
        };
        filters.insert(field.trim().to_string(), value.trim().to_string());
    }
    Ok(filters)
}

fn print_response(response: &laureate_engine::QueryResponse) {
    println!("{}", response.answer);
    if response.answer_type == AnswerType::Rag && !response.sources.is_empty() {
        println!("\nSources:");
        for source in &response.sources {
            println!(
                "  [{:.2}] {} ({}, {}): {}",
                source.score,
                source.laureate,
                source.year_awarded,
                source.source_type,
                source.text_snippet
            );
        }
    }
}
