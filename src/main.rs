use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dupindex::config::{self, EngineConfig};
use dupindex::types::{Checksum, DuplicatePage, DuplicateQuery, SearchQuery};
use dupindex::Engine;

#[derive(Debug, Parser)]
#[command(name = "dupindex", version, about = "Index files, find duplicates, forget deleted files")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Override the configured database URL
    #[arg(long, global = true, value_name = "URL")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Phase 1: record path, size and modification time of every file under ROOT
    Scan(ScanArgs),
    /// Phase 2: hash files whose size is shared with another file
    Checksums(ChecksumArgs),
    /// Scan ROOT, then hash the duplicate candidates
    Index {
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        checksum: ChecksumArgs,
    },
    /// List groups of files with identical content
    Duplicates(DuplicateArgs),
    /// Remove records of files that no longer exist
    Reconcile {
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove bookkeeping for directories that no longer hold any record
    Prune {
        #[arg(long)]
        dry_run: bool,
    },
    /// Search the inventory
    Search(SearchArgs),
    /// Inventory statistics
    Stats,
}

#[derive(Debug, Args)]
struct ScanArgs {
    root: PathBuf,
    /// Only index files directly inside ROOT
    #[arg(long)]
    no_recursive: bool,
}

#[derive(Debug, Args)]
struct ChecksumArgs {
    /// Hash on the calling thread only
    #[arg(long)]
    sequential: bool,
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
    /// Skip files larger than this ("0" = no limit)
    #[arg(long, value_name = "SIZE", value_parser = parse_size_arg)]
    size_threshold: Option<u64>,
}

#[derive(Debug, Args)]
struct DuplicateArgs {
    #[arg(long, value_name = "N")]
    min_group_size: Option<usize>,
    #[arg(long, value_name = "SIZE", value_parser = parse_size_arg)]
    min_size: Option<u64>,
    #[arg(long, value_name = "SIZE", value_parser = parse_size_arg)]
    max_size: Option<u64>,
    /// Glob on the parent directory
    #[arg(long, value_name = "GLOB")]
    path: Option<String>,
    /// Glob on the file name
    #[arg(long, value_name = "GLOB")]
    name: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long, value_name = "GLOB")]
    name: Option<String>,
    #[arg(long, value_name = "GLOB")]
    path: Option<String>,
    #[arg(long)]
    checksum: Option<String>,
    /// Only files that have a checksum
    #[arg(long, conflicts_with = "unhashed")]
    hashed: bool,
    /// Only files that have no checksum
    #[arg(long)]
    unhashed: bool,
    #[arg(long, value_name = "SIZE", value_parser = parse_size_arg)]
    min_size: Option<u64>,
    #[arg(long, value_name = "SIZE", value_parser = parse_size_arg)]
    max_size: Option<u64>,
    #[arg(long, default_value_t = 100)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

fn parse_size_arg(s: &str) -> Result<u64, String> {
    config::parse_size(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging (stderr + daily file rotation under ./logs); stdout carries results
    std::fs::create_dir_all("logs").ok();
    let (stderr_nb, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let file_appender = tracing_appender::rolling::daily("logs", "dupindex.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,sqlx=warn".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stderr_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Keep the guards alive so the non-blocking writers flush on exit
    let _log_guards = (stderr_guard, file_guard);

    // Load configuration (embedded defaults -> dupindex.toml -> env/.env)
    let mut app_cfg = config::load()?;
    if let Some(url) = cli.database.clone() {
        app_cfg.database.url = url;
    }
    let mut engine_cfg = EngineConfig::try_from(app_cfg)?;
    if let Command::Checksums(args) | Command::Index { checksum: args, .. } = &cli.command {
        apply_checksum_args(&mut engine_cfg, args)?;
    }

    let engine = Engine::open(engine_cfg).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    match cli.command {
        Command::Scan(args) => {
            let session = engine.scan_metadata(&args.root, recursive_flag(&args), &cancel).await?;
            emit(cli.json, &session, || {
                format!(
                    "scanned {}: {} files seen, {} added, {} updated, {} unchanged, {} skipped, {} errors",
                    session.root.display(),
                    session.files_seen,
                    session.files_added,
                    session.files_updated,
                    session.files_unchanged,
                    session.skipped,
                    session.errors
                )
            })?;
        }
        Command::Checksums(_) => {
            let report = engine.compute_checksums(&cancel).await?;
            emit(cli.json, &report, || {
                format!(
                    "{} candidates, {} checksums committed, {} stale, {} special, {} read errors, {} failed batches",
                    report.candidates,
                    report.committed,
                    report.skipped_stale,
                    report.skipped_special,
                    report.read_errors,
                    report.batches_failed
                )
            })?;
        }
        Command::Index { scan, .. } => {
            let report = engine.full_index(&scan.root, recursive_flag(&scan), &cancel).await?;
            emit(cli.json, &report, || {
                format!(
                    "{} files seen, {} added, {} updated; {} checksums committed of {} candidates",
                    report.scan.files_seen,
                    report.scan.files_added,
                    report.scan.files_updated,
                    report.checksums.committed,
                    report.checksums.candidates
                )
            })?;
        }
        Command::Duplicates(args) => {
            let defaults = engine.default_duplicate_query();
            let query = DuplicateQuery {
                min_group_size: args.min_group_size.unwrap_or(defaults.min_group_size),
                min_size: args.min_size,
                max_size: args.max_size,
                path_pattern: args.path,
                filename_pattern: args.name,
                limit: args.limit.or(defaults.limit),
                offset: args.offset,
            };
            let page = engine.find_duplicates(&query).await?;
            emit(cli.json, &page, || render_duplicates(&page))?;
        }
        Command::Reconcile { dry_run } => {
            let report = engine.reconcile(dry_run.then_some(true)).await?;
            emit(cli.json, &report, || {
                format!(
                    "{}{} records removed ({} via {} missing directories, {} individually), {} filesystem calls saved",
                    if report.dry_run { "[dry run] " } else { "" },
                    report.files_removed,
                    report.files_removed_by_directory,
                    report.directories_short_circuited,
                    report.files_removed_individually,
                    report.filesystem_calls_saved
                )
            })?;
        }
        Command::Prune { dry_run } => {
            let report = engine.prune_empty_directories(dry_run.then_some(true)).await?;
            emit(cli.json, &report, || {
                format!(
                    "{}{} empty directories",
                    if report.dry_run { "[dry run] " } else { "" },
                    report.empty_directories
                )
            })?;
        }
        Command::Search(args) => {
            let query = SearchQuery {
                filename_pattern: args.name,
                path_pattern: args.path,
                checksum: args.checksum.map(Checksum::new),
                has_checksum: if args.hashed {
                    Some(true)
                } else if args.unhashed {
                    Some(false)
                } else {
                    None
                },
                min_size: args.min_size,
                max_size: args.max_size,
                modified_after: None,
                modified_before: None,
                limit: Some(args.limit),
                offset: args.offset,
            };
            let page = engine.search(&query).await?;
            emit(cli.json, &page, || {
                let mut out = String::new();
                for f in &page.files {
                    out.push_str(&format!(
                        "{}\t{}\t{}\n",
                        f.size,
                        f.checksum.as_ref().map(|c| c.as_str()).unwrap_or("-"),
                        f.full_path().display()
                    ));
                }
                out.push_str(&format!("{} of {} matching files", page.files.len(), page.total));
                out
            })?;
        }
        Command::Stats => {
            let stats = engine.stats().await?;
            let metrics = engine.metrics().get_snapshot();
            #[derive(Serialize)]
            struct StatsOut<'a> {
                inventory: &'a dupindex::types::InventoryStats,
                process: &'a dupindex::metrics::MetricsSnapshot,
            }
            emit(cli.json, &StatsOut { inventory: &stats, process: &metrics }, || {
                format!(
                    "{} files ({} bytes), {} hashed, {} duplicate groups holding {} files, {} bytes reclaimable, {} directories",
                    stats.total_files,
                    stats.total_size,
                    stats.files_with_checksum,
                    stats.duplicate_groups,
                    stats.duplicate_files,
                    stats.wasted_bytes,
                    stats.unique_directories
                )
            })?;
        }
    }

    if cancel.is_cancelled() {
        warn!("Run was interrupted; results above are partial");
    }
    Ok(())
}

fn recursive_flag(args: &ScanArgs) -> Option<bool> {
    args.no_recursive.then_some(false)
}

fn apply_checksum_args(cfg: &mut EngineConfig, args: &ChecksumArgs) -> anyhow::Result<()> {
    if args.sequential {
        cfg.checksum.sequential = true;
    }
    if let Some(w) = args.workers {
        if w == 0 || w > 256 {
            return Err(anyhow::anyhow!("--workers must be in 1..=256"));
        }
        cfg.checksum.workers = w;
    }
    if let Some(t) = args.size_threshold {
        cfg.checksum.size_threshold = t;
    }
    Ok(())
}

fn render_duplicates(page: &DuplicatePage) -> String {
    let mut out = String::new();
    for g in &page.groups {
        out.push_str(&format!(
            "{} ({} bytes x {}, {} wasted)\n",
            g.checksum,
            g.size,
            g.count(),
            g.wasted_bytes()
        ));
        for f in &g.files {
            out.push_str(&format!("  {}\n", f.full_path().display()));
        }
    }
    out.push_str(&format!("{} of {} groups", page.groups.len(), page.total_groups));
    out
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Finishing in-flight work...");
}
