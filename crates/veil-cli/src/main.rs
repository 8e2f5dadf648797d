//! Veil CLI - operator tool for the encrypted chunk cache
//!
//! Usage:
//!   veil spill <FILE>  - Seal a file into a chunk store, spill, verify, reload
//!   veil expire        - Populate a registry, let it expire, sweep, report

use anyhow::{bail, ensure, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use veil_cache::{CacheConfig, CacheRegistries, StorageMode};

#[derive(Parser)]
#[command(name = "veil")]
#[command(author = "HeyBattle1")]
#[command(version)]
#[command(about = "Encrypted in-memory chunk cache tooling", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// JSON file with a cache configuration (defaults and VEIL_* env otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for backing files
    #[arg(long, global = true)]
    spill_dir: Option<PathBuf>,

    /// Number of distinct cipher contexts
    #[arg(long, global = true)]
    pool_capacity: Option<usize>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a file into a chunk store, spill it, verify and reload
    Spill {
        /// File to load
        file: PathBuf,

        /// Bytes per appended (and sealed) chunk
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,

        /// Leave a copy of the sealed backing file next to the input
        #[arg(long)]
        keep: bool,
    },

    /// Populate a memory registry, wait past the max age, sweep
    Expire {
        /// Max age of the populated entries in milliseconds
        #[arg(long, default_value_t = 200)]
        ttl_ms: u64,

        /// Number of short-lived entries
        #[arg(long, default_value_t = 16)]
        entries: usize,
    },
}

#[derive(Serialize)]
struct SpillReport {
    input: PathBuf,
    bytes: usize,
    chunk_size: usize,
    chunks: usize,
    backing_file: PathBuf,
    backing_bytes: u64,
    peek_verified: bool,
    stream_verified: bool,
    reload_verified: bool,
    kept: Option<PathBuf>,
    elapsed_ms: u128,
}

#[derive(Serialize)]
struct ExpireReport {
    ttl_ms: u64,
    populated: usize,
    hidden_after_ttl: usize,
    destroyed_by_sweep: usize,
    survivors: usize,
    maintenance_failures: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.global)?;
    let caches = CacheRegistries::new(config).context("Failed to start cache")?;

    match cli.command {
        Commands::Spill {
            file,
            chunk_size,
            keep,
        } => {
            let report = spill(&caches, &file, chunk_size, keep)?;
            if cli.global.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Sealed {} ({} bytes)", report.input.display(), report.bytes);
                println!("  chunks:        {} x {} bytes", report.chunks, report.chunk_size);
                println!(
                    "  backing file:  {} ({} bytes)",
                    report.backing_file.display(),
                    report.backing_bytes
                );
                println!("  peek:          {}", verdict(report.peek_verified));
                println!("  stream:        {}", verdict(report.stream_verified));
                println!("  reload:        {}", verdict(report.reload_verified));
                if let Some(kept) = &report.kept {
                    println!("  kept copy:     {}", kept.display());
                }
                println!("  elapsed:       {} ms", report.elapsed_ms);
            }
        }

        Commands::Expire { ttl_ms, entries } => {
            let report = expire(&caches, ttl_ms, entries).await?;
            if cli.global.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Populated {} entries with max age {} ms", report.populated, report.ttl_ms);
                println!("  hidden after ttl:   {}", report.hidden_after_ttl);
                println!("  destroyed by sweep: {}", report.destroyed_by_sweep);
                println!("  survivors:          {}", report.survivors);
                if report.maintenance_failures > 0 {
                    println!("  ⚠️  maintenance failures: {}", report.maintenance_failures);
                }
            }
        }
    }

    caches.shutdown();
    Ok(())
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => CacheConfig::from_env().context("Invalid VEIL_* environment")?,
    };

    if let Some(dir) = &args.spill_dir {
        config = config.with_spill_dir(dir);
    }
    if let Some(capacity) = args.pool_capacity {
        config = config.with_cipher_pool_capacity(capacity);
    }
    config.validate()?;
    Ok(config)
}

fn spill(caches: &CacheRegistries, file: &Path, chunk_size: usize, keep: bool) -> anyhow::Result<SpillReport> {
    ensure!(chunk_size > 0, "--chunk-size must be > 0");
    let started = Instant::now();

    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let store = caches.new_store()?;
    for chunk in bytes.chunks(chunk_size) {
        store.append(chunk)?;
    }
    let chunks = store.chunk_count();

    let backing_file = store.store().context("Failed to spill chunk store")?;
    let backing_bytes = std::fs::metadata(&backing_file)
        .with_context(|| format!("Failed to stat {}", backing_file.display()))?
        .len();
    tracing::info!(path = %backing_file.display(), chunks, "spilled");

    let peek_verified = store.peek_stored(None)?.as_slice() == bytes.as_slice();
    let streamed = store
        .stream_stored(None)?
        .collect::<Result<Vec<u8>, _>>()
        .context("Failed to stream backing file")?;
    let stream_verified = streamed == bytes;

    let kept = if keep {
        let target = kept_path(file);
        std::fs::copy(&backing_file, &target)
            .with_context(|| format!("Failed to copy backing file to {}", target.display()))?;
        Some(target)
    } else {
        None
    };

    store.reload(None).context("Failed to reload chunk store")?;
    let reload_verified = store.read_all()?.as_slice() == bytes.as_slice() && !backing_file.exists();
    store.destroy();

    if !(peek_verified && stream_verified && reload_verified) {
        bail!("Verification failed for {}", file.display());
    }

    Ok(SpillReport {
        input: file.to_path_buf(),
        bytes: bytes.len(),
        chunk_size,
        chunks,
        backing_file,
        backing_bytes,
        peek_verified,
        stream_verified,
        reload_verified,
        kept,
        elapsed_ms: started.elapsed().as_millis(),
    })
}

fn kept_path(file: &Path) -> PathBuf {
    let mut name = file.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".veil-spill");
    file.with_file_name(name)
}

async fn expire(caches: &CacheRegistries, ttl_ms: u64, entries: usize) -> anyhow::Result<ExpireReport> {
    let ttl = Duration::from_millis(ttl_ms);
    let mut failures = caches.subscribe_failures();
    let registry = caches.registry("veil-cli/expire", StorageMode::Memory);

    registry.set_max_age(ttl);
    for i in 0..entries {
        let entry = caches.bind(i as u64, format!("short-lived #{i}").as_bytes())?;
        registry.add(entry)?;
    }

    // One entry outlives the sweep
    registry.set_max_age(ttl.saturating_mul(100).max(Duration::from_secs(60)));
    registry.add(caches.bind("survivor", b"still here")?)?;

    tokio::time::sleep(ttl + Duration::from_millis(20)).await;
    let mapped = registry.len();

    // Misses on expired entries queue a sweep of their own; ours runs after it
    let hidden_after_ttl = (0..entries as u64).filter(|&i| !registry.exists(i)).count();
    registry.recycle().await?;
    let survivors = registry.len();
    let destroyed_by_sweep = mapped - survivors;

    let mut maintenance_failures = 0;
    while failures.try_recv().is_ok() {
        maintenance_failures += 1;
    }

    registry.clear().await?;

    Ok(ExpireReport {
        ttl_ms,
        populated: entries,
        hidden_after_ttl,
        destroyed_by_sweep,
        survivors,
        maintenance_failures,
    })
}

fn verdict(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "MISMATCH"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caches_in(dir: &tempfile::TempDir) -> CacheRegistries {
        CacheRegistries::new(CacheConfig::default().with_spill_dir(dir.path())).unwrap()
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::parse_from(["veil", "--json", "spill", "data.bin", "--chunk-size", "16"]);
        assert!(cli.global.json);
        assert!(matches!(cli.command, Commands::Spill { chunk_size: 16, keep: false, .. }));
    }

    #[test]
    fn test_kept_path() {
        assert_eq!(kept_path(Path::new("/tmp/a.bin")), PathBuf::from("/tmp/a.bin.veil-spill"));
    }

    #[test]
    fn test_spill_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let caches = caches_in(&dir);
        let input = dir.path().join("input.bin");
        std::fs::write(&input, (0..5000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>()).unwrap();

        let report = spill(&caches, &input, 1000, true).unwrap();
        assert_eq!(report.bytes, 5000);
        assert_eq!(report.chunks, 5);
        assert!(report.peek_verified && report.stream_verified && report.reload_verified);
        assert!(!report.backing_file.exists());
        assert!(report.kept.unwrap().exists());
    }

    #[test]
    fn test_spill_rejects_zero_chunk_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let caches = caches_in(&dir);
        assert!(spill(&caches, Path::new("unused"), 0, false).is_err());
    }

    #[tokio::test]
    async fn test_expire_reports_survivor() {
        let dir = tempfile::TempDir::new().unwrap();
        let caches = caches_in(&dir);
        let report = expire(&caches, 30, 4).await.unwrap();

        assert_eq!(report.populated, 4);
        assert_eq!(report.hidden_after_ttl, 4);
        assert_eq!(report.destroyed_by_sweep, 4);
        assert_eq!(report.survivors, 1);
        assert_eq!(report.maintenance_failures, 0);
    }
}
