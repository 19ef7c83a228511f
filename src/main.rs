//! nearfold CLI

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use nearfold::events::{CompletionStatus, ControlEvent};
use nearfold::extract::{DocumentExtractor, Extractor};
use nearfold::grouping::{LlmNamer, NamingDelegate, UndoStatus};
use nearfold::services::{create_watcher_handle, start_watcher, stop_watcher};
use nearfold::tasks::StartReply;
use nearfold::vector::load_embedder;
use nearfold::{AppConfig, Error, Result, TaskController};

#[cfg(feature = "fastembed")]
const EMBEDDER_NOTE: &str = "Embeddings come from the local fastembed model named by `embeddingModel` \
(downloaded on first use).";

#[cfg(not(feature = "fastembed"))]
const EMBEDDER_NOTE: &str = "This build has no model backend: embeddings come from a bag-of-words \
hashing fallback and `embeddingModel` is ignored. Rebuild with `--features fastembed` for \
sentence embeddings. Switching backends re-embeds everything on the next build.";

#[derive(Parser)]
#[command(
    name = "nearfold",
    version,
    about = "Embedding index and regrouping for your folders",
    after_help = EMBEDDER_NOTE
)]
struct Cli {
    /// Config file (defaults to <config dir>/nearfold/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the stores and the transaction log.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh the folder and file index. Ctrl-C stops cleanly.
    Build {
        /// Directory whose subfolders are indexed.
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Print the folder a file would be filed under.
    Classify {
        file: PathBuf,
    },

    /// Regroup the indexed folders into k groups.
    Group {
        #[arg(short)]
        k: usize,

        /// Use Group_<n> names instead of asking the naming endpoint.
        #[arg(long)]
        no_llm: bool,
    },

    /// Revert the last grouping.
    Undo,

    /// Classify files as they appear, printing events as JSON lines.
    Watch {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let embedder = load_embedder(config.embedding_model)?;
    let extractor: Arc<dyn Extractor> = Arc::new(DocumentExtractor::new());

    match cli.command {
        Commands::Build { root } => {
            let root = root.unwrap_or_else(|| config.root_dir.clone());
            let controller = TaskController::spawn(config, extractor, embedder);
            let mut events = controller.subscribe();

            if let StartReply::AlreadyRunning(task_id) = controller.start(&root).await? {
                return Err(Error::TaskController(format!("build {} already running", task_id)));
            }

            let stopper = controller.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Stopping build, flushing what is done");
                    let _ = stopper.stop().await;
                }
            });

            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Skipped {} events", n);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                print_json(&event)?;
                match event {
                    ControlEvent::BuildComplete {
                        status: CompletionStatus::Error,
                        ..
                    } => return Ok(ExitCode::FAILURE),
                    e if e.is_terminal() => break,
                    _ => {}
                }
            }
        }

        Commands::Classify { file } => {
            let controller = TaskController::spawn(config, Arc::clone(&extractor), embedder);
            let classifier = controller.classifier();
            let category = tokio::task::spawn_blocking(move || {
                let text = extractor.extract(&file).unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    String::new()
                });
                classifier.classify(&text)
            })
            .await
            .map_err(|e| Error::TaskController(e.to_string()))?;
            println!("{}", category);
        }

        Commands::Group { k, no_llm } => {
            let namer = match config.naming_endpoint.as_deref() {
                Some(endpoint) if !no_llm => Some(LlmNamer::new(endpoint).map_err(Error::Config)?),
                _ => None,
            };
            let controller = TaskController::spawn(config, extractor, embedder);
            let report = controller
                .group(k, namer.as_ref().map(|n| n as &dyn NamingDelegate))
                .await?;
            print_json(&report)?;
        }

        Commands::Undo => {
            let controller = TaskController::spawn(config, extractor, embedder);
            let report = controller.undo().await?;
            print_json(&report)?;
            if report.status != UndoStatus::Success {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Watch { dir } => {
            let dir = dir.unwrap_or_else(|| config.watch_dir.clone());
            let controller = TaskController::spawn(config, Arc::clone(&extractor), embedder);
            let mut events = controller.subscribe();
            let handle = create_watcher_handle();
            start_watcher(
                &handle,
                dir,
                Arc::new(controller.classifier()),
                extractor,
                controller.events().clone(),
            )?;

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(event) => print_json(&event)?,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Skipped {} events", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            stop_watcher(&handle)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).map_err(|e| Error::Serialization {
        path: "stdout".to_string(),
        message: e.to_string(),
    })?;
    println!("{}", line);
    Ok(())
}
