mod render;
mod repl;
mod settings;
mod web;

use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_chat_core::DisplayText;
use settings::{DisplayArgs, RagArgs};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    rag: RagArgs,

    #[command(flatten)]
    display: DisplayArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the chat web UI.
    Serve {
        /// Address to bind the HTTP server to (host:port).
        #[arg(long, env = "PDF_CHAT_BIND", default_value = "127.0.0.1:8501")]
        bind: String,
    },
    /// Chat with one PDF in the terminal.
    Chat {
        /// PDF to index.
        #[arg(long)]
        pdf: PathBuf,
    },
    /// Index a PDF and print its chunks or the top matches for a query, without calling the chat model.
    Inspect {
        /// PDF to index.
        #[arg(long)]
        pdf: PathBuf,
        /// Query to run against the index.
        #[arg(long)]
        query: Option<String>,
        /// Number of chunks to return; defaults to --retriever-k.
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let factory = cli.rag.chain_factory()?;
    let display: DisplayText = cli.display.into();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        llm_model = %factory.config().llm_model,
        embedder = factory.embedder().model_name(),
        "pdf-chat boot"
    );

    match cli.command {
        Command::Serve { bind } => {
            let state = web::AppState {
                factory,
                display: Arc::new(display),
                sessions: web::SessionStore::default(),
            };
            web::serve(state, &bind).await?;
        }
        Command::Chat { pdf } => {
            repl::run(&factory, &pdf).await?;
        }
        Command::Inspect { pdf, query, top_k } => {
            let chain = factory
                .build_from_path(&pdf)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let document = chain.document();
            println!(
                "{} pages={} chunks={} sha256={}",
                document.file_name,
                document.page_count,
                chain.chunk_count(),
                document.checksum
            );

            let preview_chars = factory.config().source_preview_chars;
            match query {
                Some(query) => {
                    let k = top_k.unwrap_or(factory.config().retriever_k);
                    let hits = chain
                        .index()
                        .retrieve(factory.embedder(), &query, k)
                        .await
                        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                    println!("query: {query}");
                    for (position, hit) in hits.iter().enumerate() {
                        println!(
                            "[{}] score={:.4} chunk_index={}\n{}\n",
                            render::source_label(position, &hit.chunk),
                            hit.score,
                            hit.chunk.chunk_index,
                            hit.chunk.preview(preview_chars)
                        );
                    }
                }
                None => {
                    for chunk in chain.index().chunks() {
                        println!(
                            "#{} page={} chars={}\n{}\n",
                            chunk.chunk_index,
                            chunk.display_page(),
                            chunk.text.chars().count(),
                            chunk.preview(preview_chars)
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
