//! secgraph CLI: build, cache and summarize security graphs.
//!
//! Usage:
//!   secgraph build <unit.json> [--json] [--detail low|medium|high]
//!   secgraph batch <units.jsonl>
//!   secgraph digest <key> [--max-items N] [--max-paths N]
//!   secgraph cache list

use clap::{Parser, Subcommand};
use secgraph::{
    render, summarize, ArtifactStore, CacheKey, CancellationToken, DetailLevel, DirStore, Pipeline, PipelineConfig,
    SourceUnit,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "secgraph",
    version,
    about = "Fused security graphs from static analyzers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cache directory (overrides the configuration)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or fetch) the graph for one unit and print its digest
    Build {
        /// Source unit as JSON
        unit: PathBuf,
        /// Print the digest as JSON instead of text
        #[arg(long)]
        json: bool,
        /// Text detail level
        #[arg(long)]
        detail: Option<DetailLevel>,
    },
    /// Build every unit of a JSON-lines file, one outcome line per unit
    Batch {
        units: PathBuf,
    },
    /// Re-summarize a cached graph under a new budget
    Digest {
        key: String,
        #[arg(long)]
        max_items: Option<usize>,
        #[arg(long)]
        max_paths: Option<usize>,
        #[arg(long)]
        detail: Option<DetailLevel>,
    },
    /// Inspect the graph cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached builds
    List,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<PipelineConfig, String> {
    let config = match path {
        Some(path) => PipelineConfig::load(path).map_err(|e| format!("{}: {}", path.display(), e))?,
        None => PipelineConfig::default(),
    };
    Ok(match cache_dir {
        Some(dir) => config.with_cache_dir(dir),
        None => config,
    })
}

fn read_unit(path: &Path) -> Result<SourceUnit, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid unit '{}': {}", path.display(), e))
}

async fn cmd_build(config: PipelineConfig, unit: &Path, as_json: bool, detail: Option<DetailLevel>) -> i32 {
    let unit = match read_unit(unit) {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let detail = detail.unwrap_or(config.digest.detail);
    let pipeline = match Pipeline::open(config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let report = pipeline.build(Arc::new(unit)).await;
    if as_json {
        match serde_json::to_string_pretty(&report.digest) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        println!("key: {} ({})", report.key, report.outcome.as_str());
        print!("{}", render(&report.digest, detail));
    }
    0
}

async fn cmd_batch(config: PipelineConfig, units: &Path) -> i32 {
    let text = match std::fs::read_to_string(units) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", units.display(), e);
            return 1;
        }
    };
    let pipeline = match Pipeline::open(config) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted: finishing running units");
                token.cancel();
            }
        });
    }

    let outcomes = pipeline.process_lines(&text, &token).await;
    let mut failures = 0;
    for outcome in outcomes {
        let line = match &outcome.result {
            Ok(report) => json!({
                "unit_id": outcome.unit_id,
                "key": report.key,
                "outcome": report.outcome.as_str(),
                "degradation": report.graph.metadata.degradation.as_str(),
                "nodes": report.graph.node_count(),
                "findings": report.digest.counts.findings,
            }),
            Err(e) => {
                failures += 1;
                json!({ "unit_id": outcome.unit_id, "error": e.to_string() })
            }
        };
        println!("{}", line);
    }
    if failures > 0 {
        1
    } else {
        0
    }
}

fn cmd_digest(
    config: PipelineConfig,
    key: &str,
    max_items: Option<usize>,
    max_paths: Option<usize>,
    detail: Option<DetailLevel>,
) -> i32 {
    let Some(key) = CacheKey::parse(key) else {
        eprintln!("Error: '{}' is not a cache key", key);
        return 1;
    };
    let store = match DirStore::open(&config.cache_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let graph = match store.load(&key) {
        Ok(Some(graph)) => graph,
        Ok(None) => {
            eprintln!("Error: no cached graph for {}", key);
            return 1;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let mut budget = config.digest.budget();
    if let Some(max_items) = max_items {
        budget.max_items = max_items.max(1);
    }
    if let Some(max_paths) = max_paths {
        budget.max_paths = max_paths;
    }
    let digest = summarize(&graph, budget);
    print!("{}", render(&digest, detail.unwrap_or(config.digest.detail)));
    0
}

fn cmd_cache_list(config: PipelineConfig) -> i32 {
    let store = match DirStore::open(&config.cache_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let entries = match store.list() {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if entries.is_empty() {
        println!("No cached graphs.");
        return 0;
    }
    println!(
        "{:<16}  {:<20}  {:<12}  {:>6}  {:>8}  {}",
        "KEY", "UNIT", "DEGRADATION", "NODES", "FINDINGS", "TOOLS"
    );
    println!("{}", "-".repeat(96));
    for entry in entries {
        println!(
            "{:<16}  {:<20}  {:<12}  {:>6}  {:>8}  {}",
            &entry.key[..16.min(entry.key.len())],
            entry.unit_id,
            entry.degradation,
            entry.nodes,
            entry.findings,
            entry.tools
        );
    }
    0
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(cli.config.as_deref(), cli.cache_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Build { unit, json, detail } => cmd_build(config, &unit, json, detail).await,
        Commands::Batch { units } => cmd_batch(config, &units).await,
        Commands::Digest {
            key,
            max_items,
            max_paths,
            detail,
        } => cmd_digest(config, &key, max_items, max_paths, detail),
        Commands::Cache { action } => match action {
            CacheAction::List => cmd_cache_list(config),
        },
    };
    std::process::exit(code);
}
