use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use synopsis::{
    default_sequence, write_report, Adapters, Artifact, DocumentStore, Orchestrator, ReviewConfig,
    StageKind,
};

#[derive(Parser)]
#[command(name = "synopsis")]
#[command(author, version, about = "Systematic literature review pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the review pipeline end to end (resumes where it left off)
    Run {
        /// Review configuration file (YAML)
        #[arg(short, long, default_value = "review.yaml")]
        config: PathBuf,

        /// Directory for the document store, PDFs, text, and reports
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Override the configured maximum search results
        #[arg(long)]
        max_results: Option<usize>,

        /// Override the configured per-stage concurrency
        #[arg(long)]
        concurrency: Option<usize>,

        /// Override the configured inter-call delay in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Show the search query and current progress without calling any service
        #[arg(long)]
        dry_run: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show per-stage progress for the current corpus
    Status {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Attach a manually obtained PDF to a document and mark it retrieved
    Attach {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Document id
        id: String,

        /// Path to the PDF file to attach
        pdf: PathBuf,
    },

    /// Reset a failed stage back to pending for one document
    Requeue {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Document id
        id: String,

        /// Stage name (search, screen, download, parse, extract, assess_bias)
        stage: String,
    },

    /// Delete the document store and all stage artifacts
    Clear {
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            data_dir,
            max_results,
            concurrency,
            delay_ms,
            dry_run,
            verbose,
        } => {
            setup_logging(verbose);
            run_review(
                config,
                data_dir,
                max_results,
                concurrency,
                delay_ms,
                dry_run,
            )
            .await
        }
        Commands::Status { data_dir } => {
            setup_logging(false);
            show_status(&data_dir)
        }
        Commands::Attach { data_dir, id, pdf } => {
            setup_logging(false);
            attach_pdf(&data_dir, &id, &pdf)
        }
        Commands::Requeue {
            data_dir,
            id,
            stage,
        } => {
            setup_logging(false);
            requeue_stage(&data_dir, &id, &stage)
        }
        Commands::Clear { data_dir, yes } => {
            setup_logging(false);
            clear_data(&data_dir, yes)
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn open_store(data_dir: &Path) -> Result<Arc<DocumentStore>> {
    let store = DocumentStore::open(&data_dir.join("documents.json"))
        .context("Failed to open document store")?;
    Ok(Arc::new(store))
}

async fn run_review(
    config_path: PathBuf,
    data_dir: PathBuf,
    max_results: Option<usize>,
    concurrency: Option<usize>,
    delay_ms: Option<u64>,
    dry_run: bool,
) -> Result<()> {
    let mut config = ReviewConfig::from_file(&config_path)?;
    if let Some(max_results) = max_results {
        config.search.max_results = max_results;
    }
    if let Some(concurrency) = concurrency {
        config.limits.concurrency = concurrency;
    }
    if let Some(delay_ms) = delay_ms {
        config.limits.delay_ms = delay_ms;
    }

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;
    let store = open_store(&data_dir)?;

    if dry_run {
        println!("Search query: {}", config.picos.search_query());
        println!("Documents in store: {}", store.len());
        for def in default_sequence() {
            let counts = store.counts(def.kind);
            println!(
                "{:>12}: {} done, {} failed, {} skipped, {} pending",
                counts.stage, counts.done, counts.failed, counts.skipped, counts.pending
            );
        }
        return Ok(());
    }

    let adapters = Adapters::from_config(&config);
    let orchestrator = Orchestrator::new(Arc::clone(&store), adapters, config.clone(), data_dir.clone());

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight documents");
            cancel.cancel();
        }
    });

    orchestrator.preflight().await?;
    let summary = orchestrator.run().await?;

    let report_path = write_report(&data_dir.join("report.md"), &config, &store, &summary)?;
    info!("Report written to {:?}", report_path);

    println!("Run {} finished: {} documents", summary.run_id, summary.total_documents);
    for stage in &summary.stages {
        println!(
            "{:>12}: {} done, {} failed, {} skipped, {} pending",
            stage.stage, stage.done, stage.failed, stage.skipped, stage.pending
        );
    }
    Ok(())
}

fn show_status(data_dir: &Path) -> Result<()> {
    let store = open_store(data_dir)?;
    println!("Documents: {}", store.len());
    for def in default_sequence() {
        let counts = store.counts(def.kind);
        println!(
            "{:>12}: {} done, {} failed, {} skipped, {} pending, {} in progress",
            counts.stage,
            counts.done,
            counts.failed,
            counts.skipped,
            counts.pending,
            counts.in_progress
        );
    }

    let failed: Vec<_> = store
        .documents()
        .into_iter()
        .filter(|d| d.stages.iter().any(|s| s.status == synopsis::StageStatus::Failed))
        .collect();
    if !failed.is_empty() {
        println!("\nFailed documents:");
        for doc in failed {
            for slot in &doc.stages {
                if slot.status == synopsis::StageStatus::Failed {
                    let error = slot
                        .last_error
                        .as_ref()
                        .map(|e| e.message.as_str())
                        .unwrap_or("unknown");
                    println!("  {} at {}: {}", doc.id, slot.stage, error);
                }
            }
        }
    }
    Ok(())
}

fn attach_pdf(data_dir: &Path, id: &str, pdf: &Path) -> Result<()> {
    let store = open_store(data_dir)?;
    if store.get(id).is_none() {
        bail!("No document with id '{}'", id);
    }

    let pdf_dir = data_dir.join("pdf");
    std::fs::create_dir_all(&pdf_dir)?;
    let target = pdf_dir.join(format!("{}.pdf", synopsis::pipeline::safe_file_stem(id)));
    std::fs::copy(pdf, &target)
        .with_context(|| format!("Failed to copy PDF from {:?}", pdf))?;

    store.record_result(id, StageKind::Download, Artifact::PdfFile { path: target.clone() })?;
    println!("Attached {:?} to {} (download marked done)", target, id);
    Ok(())
}

fn requeue_stage(data_dir: &Path, id: &str, stage: &str) -> Result<()> {
    let Some(kind) = StageKind::from_name(stage) else {
        bail!(
            "Unknown stage '{}'; expected one of search, screen, download, parse, extract, assess_bias",
            stage
        );
    };
    let store = open_store(data_dir)?;
    store.requeue(id, kind)?;
    println!("Requeued {} at {}", id, kind);
    Ok(())
}

fn clear_data(data_dir: &Path, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete {:?}; pass --yes to confirm", data_dir);
    }
    for file in ["documents.json", "report.md"] {
        let path = data_dir.join(file);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    for dir in ["pdf", "text", "runs"] {
        let path = data_dir.join(dir);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
    }
    println!("Cleared {:?}", data_dir);
    Ok(())
}
