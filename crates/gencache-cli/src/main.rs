use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gencache::{
    CacheConfig, CacheDir, CacheSummary, DocCache, DocCacheStats, EntryState, MetadataCache,
    MetadataKey,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gencache",
    version,
    about = "Inspect and maintain the shared docs/metadata generation cache"
)]
struct Cli {
    /// Cache root (defaults to $GENCACHE_DIR, then ~/.gencache)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    /// Log cache activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize cached docs, cached metadata and unsupported adaptors
    Status(JsonArgs),
    /// Delete the entire cache directory
    Clear(JsonArgs),
    /// Print the metadata cache key for a configuration file and adaptor
    Key(KeyArgs),
    /// Query or update the unsupported-version registry
    Unsupported(UnsupportedArgs),
    /// Print the cached documentation for a package
    Docs(DocsArgs),
}

#[derive(Args)]
struct JsonArgs {
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct KeyArgs {
    /// JSON configuration file
    config: PathBuf,
    /// Adaptor specifier (`name`, `name@version`, `name=path`)
    adaptor: String,
}

#[derive(Args)]
struct UnsupportedArgs {
    #[command(subcommand)]
    command: UnsupportedCommand,
}

#[derive(Subcommand)]
enum UnsupportedCommand {
    /// Exit with status 1 if the adaptor version is presumed unsupported
    Check { adaptor: String },
    /// Record the adaptor version as unsupported
    Mark { adaptor: String },
}

#[derive(Args)]
struct DocsArgs {
    /// Package specifier with an explicit version, e.g. `@org/pkg@1.2.0`
    specifier: String,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct StatusReport {
    root: PathBuf,
    docs: DocCacheStats,
    metadata: CacheSummary,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "gencache=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn open_cache_dir(cache_dir: Option<PathBuf>) -> Result<CacheDir> {
    let config = match cache_dir {
        Some(root) => CacheConfig::with_root(root),
        None => CacheConfig::from_env(),
    };
    CacheDir::new(config).context("failed to open cache directory")
}

fn run(cli: Cli) -> Result<i32> {
    let dir = open_cache_dir(cli.cache_dir)?;

    match cli.command {
        Command::Status(args) => {
            let report = StatusReport {
                root: dir.root().to_path_buf(),
                docs: DocCache::new(&dir).stats()?,
                metadata: MetadataCache::new(&dir).summary()?,
            };
            if args.json {
                print_json(&report)?;
            } else {
                println!("cache: {}", report.root.display());
                println!("  docs: {} cached", report.docs.complete);
                println!("    in progress: {}", report.docs.in_progress);
                println!("  metadata: {} cached", report.metadata.cached_supported);
                println!("    unsupported adaptors: {}", report.metadata.unsupported);
            }
            Ok(0)
        }
        Command::Clear(args) => {
            dir.clear()?;
            tracing::info!(root = %dir.root().display(), "cleared cache");
            if args.json {
                print_json(&serde_json::json!({ "ok": true }))?;
            } else {
                println!("cache: cleaned {}", dir.root().display());
            }
            Ok(0)
        }
        Command::Key(args) => {
            let text = std::fs::read_to_string(&args.config)
                .with_context(|| format!("failed to read {}", args.config.display()))?;
            let config: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", args.config.display()))?;
            println!("{}", MetadataKey::generate(&config, &args.adaptor));
            Ok(0)
        }
        Command::Unsupported(args) => {
            let metadata = MetadataCache::new(&dir);
            let registry = metadata.registry();
            match args.command {
                UnsupportedCommand::Check { adaptor } => {
                    if registry.is_unsupported(&adaptor)? {
                        println!("{adaptor}: unsupported");
                        Ok(1)
                    } else {
                        println!("{adaptor}: not known to be unsupported");
                        Ok(0)
                    }
                }
                UnsupportedCommand::Mark { adaptor } => {
                    if registry.mark_unsupported(&adaptor)? {
                        println!("{adaptor}: recorded as unsupported");
                    } else {
                        println!("{adaptor}: registry unchanged");
                    }
                    Ok(0)
                }
            }
        }
        Command::Docs(args) => {
            let docs = DocCache::new(&dir);
            match docs.state(&args.specifier)? {
                EntryState::Complete => {
                    let Some(document) = docs.load(&args.specifier)? else {
                        eprintln!("docs: {} changed while reading; try again", args.specifier);
                        return Ok(1);
                    };
                    if args.json {
                        print_json(&document)?;
                    } else {
                        println!("{}", docs.entry_path(&args.specifier)?.display());
                    }
                    Ok(0)
                }
                EntryState::Placeholder { timestamp } => {
                    eprintln!(
                        "docs: {} is being generated (started at {timestamp})",
                        args.specifier
                    );
                    Ok(1)
                }
                EntryState::Absent => {
                    eprintln!("docs: {} is not cached", args.specifier);
                    Ok(1)
                }
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}
