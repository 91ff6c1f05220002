//! Doc-Talk terminal chat
//!
//! `doctalk chat <file.pdf>` indexes a document and answers questions read
//! from stdin until EOF or `exit`. `doctalk index <file.pdf>` indexes and
//! prints chunk statistics.

use anyhow::Context;
use clap::{Parser, Subcommand};
use doctalk_common::chain::{ChainOptions, ConversationalRetrievalChain};
use doctalk_common::config::AppConfig;
use doctalk_common::embeddings::{create_embedder, Embedder};
use doctalk_common::llm::create_chat_model;
use doctalk_common::memory::ConversationMemory;
use doctalk_common::retrieval::VectorRetriever;
use doctalk_common::telemetry::init_tracing;
use doctalk_common::VERSION;
use doctalk_ingestion::{ChunkingConfig, IndexedDocument, Ingestor};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "doctalk", version, about = "Ask questions about a PDF from the terminal")]
struct Cli {
    /// Path to a config file; defaults to config/ plus APP__ environment variables
    #[arg(short, long, global = true, env = "DOCTALK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a PDF, then answer questions about it
    Chat {
        file: PathBuf,

        /// Print the chunks each answer was based on
        #[arg(long)]
        sources: bool,
    },

    /// Index a PDF and print chunk statistics
    Index { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config.observability)?;
    tracing::debug!(version = VERSION, "doctalk starting");

    let embedder = create_embedder(&config.embedding)?;
    let ingestor = Ingestor::new(embedder.clone(), ChunkingConfig::from(&config.chunking))?
        .with_metric(config.retrieval.metric);

    match cli.command {
        Commands::Index { file } => {
            let doc = index_file(&ingestor, &file).await?;
            print_stats(&doc);
            Ok(())
        }
        Commands::Chat { file, sources } => {
            let doc = index_file(&ingestor, &file).await?;
            chat(&config, embedder, doc, sources).await
        }
    }
}

async fn index_file(ingestor: &Ingestor, file: &Path) -> anyhow::Result<IndexedDocument> {
    ingestor
        .ingest_file(file)
        .await
        .with_context(|| format!("Failed to index {}", file.display()))
}

fn print_stats(doc: &IndexedDocument) {
    let lengths: Vec<usize> = doc
        .index
        .chunks()
        .iter()
        .map(|c| c.content.chars().count())
        .collect();
    let total: usize = lengths.iter().sum();

    println!("file:       {}", doc.info.file_name);
    println!("sha256:     {}", doc.info.sha256);
    println!("pages:      {}", doc.info.page_count);
    println!("chunks:     {}", doc.info.chunk_count);
    println!("dimension:  {}", doc.index.dimension());
    if !lengths.is_empty() {
        println!(
            "chunk size: min {} / mean {} / max {} chars",
            lengths.iter().min().copied().unwrap_or_default(),
            total / lengths.len(),
            lengths.iter().max().copied().unwrap_or_default(),
        );
    }
}

async fn chat(
    config: &AppConfig,
    embedder: Arc<dyn Embedder>,
    doc: IndexedDocument,
    show_sources: bool,
) -> anyhow::Result<()> {
    let retriever = VectorRetriever::new(doc.index.clone(), embedder, config.retrieval.top_k)
        .with_score_threshold(config.retrieval.score_threshold);
    let llm = create_chat_model(&config.llm)?;
    let chain = ConversationalRetrievalChain::new(
        llm,
        Arc::new(retriever),
        ChainOptions::from_config(&config.retrieval, &config.llm),
    );
    let mut memory = ConversationMemory::new();

    println!(
        "Indexed {} ({} pages, {} chunks). Ask a question, or type `exit` to quit.",
        doc.info.file_name, doc.info.page_count, doc.info.chunk_count
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        match chain.ask(&mut memory, question).await {
            Ok(response) => {
                println!("{}\n", response.answer.trim());
                if show_sources {
                    for source in &response.sources {
                        println!(
                            "  [chunk {} | relevance {:.3}] {}",
                            source.chunk_index,
                            source.relevance,
                            preview(&source.content, 80)
                        );
                    }
                    println!();
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to answer question");
                eprintln!("error: {}", e);
            }
        }
    }

    tracing::info!(turns = memory.turn_count(), "Chat ended");
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    }
}
