use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pubmerge_collate::{CollationDriver, ResponseCache, RunSummary};
use pubmerge_core::{AppConfig, load_publications};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pubmerge",
    about = "Multi-source publication metadata collator",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting PUBMERGE_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Path to config.toml (defaults to ~/.config/pubmerge/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, cache, and merge metadata for a publication list.
    Collate {
        /// JSON array of publications: [{"key", "pmid"?, "doi"?}, ...]
        publications: PathBuf,

        /// Override the configured number of publications in flight.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show cache entry counts per partition.
    Stats,

    /// Run diagnostics.
    Doctor,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();
    let cli = Cli::parse();
    let json_output = cli.json || std::env::var("PUBMERGE_JSON").as_deref() == Ok("1");

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Collate {
            publications,
            concurrency,
        } => {
            // Configuration problems abort here, before any fetch.
            let mut config = config;
            if let Some(concurrency) = concurrency {
                config.network.concurrency = concurrency;
            }
            config.validate()?;

            let publications = load_publications(&publications)?;
            tracing::info!(publications = publications.len(), "starting collation");

            let cache = Arc::new(ResponseCache::new(config.cache_dir.clone()));
            let driver = CollationDriver::from_config(&config, cache)?;
            let summary = driver.collate(&publications).await?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": summary,
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                print_summary(&summary);
            }
        }

        Commands::Stats => {
            let cache = ResponseCache::new(config.cache_dir.clone());
            let stats = cache.stats().await;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": {
                        "cache_dir": config.cache_dir,
                        "raw": stats.raw,
                        "processed": stats.processed,
                        "merged": stats.merged
                    },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Cache: {}", config.cache_dir.display());
                println!("  Raw responses:      {}", stats.raw);
                println!("  Normalized records: {}", stats.processed);
                println!("  Merged records:     {}", stats.merged);
            }
        }

        Commands::Doctor => {
            let config_path = cli
                .config
                .clone()
                .unwrap_or_else(AppConfig::config_path);
            if config_path.exists() {
                println!("✓ Config: {}", config_path.display());
            } else {
                println!("○ Config: not found (using defaults)");
            }

            let mut issues = 0;
            match (config.sources.pubmed, &config.contact_email) {
                (true, Some(email)) if !email.trim().is_empty() => {
                    println!("✓ PubMed: contact email set ({email})")
                }
                (true, _) => {
                    issues += 1;
                    println!("✗ PubMed: enabled but contact_email is missing");
                }
                (false, _) => println!("○ PubMed: disabled"),
            }
            match (config.sources.scopus, &config.scopus_api_key) {
                (true, Some(key)) if !key.trim().is_empty() => println!("✓ Scopus: API key set"),
                (true, _) => {
                    issues += 1;
                    println!("✗ Scopus: enabled but scopus_api_key is missing");
                }
                (false, _) => println!("○ Scopus: disabled"),
            }

            if config.cache_dir.exists() {
                let stats = ResponseCache::new(config.cache_dir.clone()).stats().await;
                println!(
                    "✓ Cache: {} ({} merged records)",
                    config.cache_dir.display(),
                    stats.merged
                );
            } else {
                println!("○ Cache: directory not created yet");
            }
            println!("  Priority: {}", config.source_priority.join(" > "));

            if issues == 0 {
                println!("\nAll checks passed ✓");
            } else {
                println!("\n{issues} issues found");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_summary(summary: &RunSummary) {
    println!(
        "Collation finished: {} merged, {} partial, {} skipped.",
        summary.merged, summary.partial, summary.skipped
    );
    if !summary.quota_tripped.is_empty() {
        println!(
            "Quota exhausted mid-run for: {}.",
            summary.quota_tripped.join(", ")
        );
    }
    for outcome in &summary.outcomes {
        if !outcome.failures.is_empty() {
            let detail = outcome
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.source, f.kind))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  {}  [{}]  {detail}", outcome.local_key, status_label(outcome));
        }
    }
}

fn status_label(outcome: &pubmerge_collate::PublicationOutcome) -> &'static str {
    match outcome.status {
        pubmerge_collate::PublicationStatus::Merged => "partial",
        pubmerge_collate::PublicationStatus::Skipped => "skipped",
    }
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}
