//! imgstash - A disk cache for remote images
#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use imgstash::{Config, EntryStore, FsStore, ImageState, ResolveOptions, Resolver, key};

/// Eviction interval for `watch` when the config leaves it at zero
const DEFAULT_WATCH_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    match parse_args()? {
        Command::Fetch { url, options } => fetch_cli(&url, options).await,
        Command::List => list_cli().await,
        Command::Evict => evict_cli().await,
        Command::Remove { url, folder } => remove_cli(&url, folder.as_deref()).await,
        Command::Key { url } => key_cli(&url),
        Command::Watch { every } => watch_cli(every).await,
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// CLI commands
enum Command {
    Fetch {
        url: String,
        options: ResolveOptions,
    },
    List,
    Evict,
    Remove {
        url: String,
        folder: Option<String>,
    },
    Key {
        url: String,
    },
    Watch {
        every: Option<u64>,
    },
    Help,
    Version,
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() == 1 {
        return Ok(Command::Help);
    }

    let flag_value = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };
    let has_flag = |name: &str| args.iter().any(|a| a == name);
    let url = || {
        args.get(2)
            .filter(|a| !a.starts_with('-'))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing image URL"))
    };

    match args[1].as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),

        "fetch" | "get" => {
            let options = ResolveOptions {
                from_cache: !has_flag("--no-cache"),
                cache_folder: flag_value("--folder").or_else(|| flag_value("-f")),
                offline: has_flag("--offline"),
            };
            Ok(Command::Fetch {
                url: url()?,
                options,
            })
        }

        "list" | "ls" => Ok(Command::List),
        "evict" => Ok(Command::Evict),

        "remove" | "rm" => Ok(Command::Remove {
            url: url()?,
            folder: flag_value("--folder").or_else(|| flag_value("-f")),
        }),

        "key" => Ok(Command::Key { url: url()? }),

        "watch" => {
            let every = flag_value("--every")
                .map(|s| s.parse::<u64>())
                .transpose()
                .map_err(|_| anyhow::anyhow!("--every expects a number of seconds"))?;
            Ok(Command::Watch { every })
        }

        other => Err(anyhow::anyhow!(
            "Unknown command: {other}\nRun 'imgstash --help' for usage"
        )),
    }
}

fn print_help() {
    let config_path = Config::default_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"imgstash - A disk cache for remote images

USAGE:
    imgstash [COMMAND]

COMMANDS:
    fetch <url> [OPTIONS]              Resolve an image through the cache
      Options:
        -f, --folder <name>            Cache sub-folder
        --offline                      Only use what is already cached
        --no-cache                     Bypass the cache entirely
      Examples:
        imgstash fetch https://img.example.com/cats/1.jpg
        imgstash fetch https://img.example.com/u/42.png --folder avatars

    list                               List cached files, oldest first
    evict                              Trim the cache to its capacity
    remove <url> [-f <name>]           Delete one cached image
    key <url>                          Show the cache key and file for a URL
    watch [--every <secs>]             Evict periodically until Ctrl-C

OPTIONS:
    -h, --help                         Show this help message
    -v, --version                      Show version information

CONFIG:
    {}
"#,
        config_path
    );
}

fn print_version() {
    println!("imgstash {}", imgstash::VERSION);
}

/// Build the resolver and run the startup eviction pass
async fn open_cache(config: &Config) -> Result<Resolver<FsStore>> {
    let resolver = Resolver::from_config(config)?;
    if let Some(report) = resolver.context().evict_on_start().await
        && report.deleted > 0
    {
        eprintln!(
            "Trimmed {} cached files ({} bytes)",
            report.deleted, report.bytes_freed
        );
    }
    Ok(resolver)
}

async fn fetch_cli(url: &str, options: ResolveOptions) -> Result<()> {
    let resolver = open_cache(&Config::load()?).await?;

    let handle = resolver.spawn(url, options);
    let mut updates = handle.subscribe();

    loop {
        let state = updates.borrow_and_update().clone();
        match state {
            ImageState::Loading { progress } => eprint!("\r⬇ {:>3}%", progress),
            ImageState::Ready(resolution) => {
                eprintln!();
                println!("{}", resolution.uri());
                return Ok(());
            }
            ImageState::Failed(e) => {
                eprintln!();
                return Err(e.into());
            }
        }

        if updates.changed().await.is_err() {
            break;
        }
    }

    Err(anyhow::anyhow!("Fetch of {} stopped unexpectedly", url))
}

async fn list_cli() -> Result<()> {
    let config = Config::load()?;
    let resolver = Resolver::from_config(&config)?;
    let context = resolver.context();

    let mut entries = context.store().list_entries(&context.directory()).await?;
    entries.sort_by_key(|e| e.last_modified);

    if entries.is_empty() {
        println!("Cache is empty ({}).", context.directory().display());
        return Ok(());
    }

    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    for entry in &entries {
        println!(
            "{}  {:>10}  {}",
            entry.last_modified.format("%Y-%m-%d %H:%M:%S"),
            entry.size_bytes,
            entry.path.display()
        );
    }
    println!("{}", "─".repeat(60));
    println!(
        "{} files, {} of {} bytes",
        entries.len(),
        total,
        config.capacity_bytes()
    );

    Ok(())
}

async fn evict_cli() -> Result<()> {
    let resolver = Resolver::from_config(&Config::load()?)?;
    let report = resolver.context().trigger_eviction().await;

    if report.planned == 0 {
        println!("✓ Cache is within capacity");
    } else {
        println!(
            "✓ Evicted {} files ({} bytes)",
            report.deleted, report.bytes_freed
        );
        if report.failed > 0 {
            println!("  {} files could not be deleted", report.failed);
        }
    }

    Ok(())
}

async fn remove_cli(url: &str, folder: Option<&str>) -> Result<()> {
    let resolver = Resolver::from_config(&Config::load()?)?;

    if resolver.remove(url, folder).await {
        println!("✓ Removed {}", resolver.cache_path(url, folder).display());
    } else {
        println!("Not cached: {}", url);
    }

    Ok(())
}

fn key_cli(url: &str) -> Result<()> {
    let resolver = Resolver::from_config(&Config::load()?)?;

    println!("key:       {}", key::derive_key(url));
    println!("extension: {}", key::derive_extension(url));
    println!("path:      {}", resolver.cache_path(url, None).display());

    Ok(())
}

async fn watch_cli(every: Option<u64>) -> Result<()> {
    let config = Config::load()?;
    let resolver = open_cache(&config).await?;

    let secs = every
        .or(Some(config.eviction_interval_secs).filter(|s| *s > 0))
        .unwrap_or(DEFAULT_WATCH_SECS);
    let context = Arc::clone(resolver.context());

    println!(
        "Evicting {} every {}s (Ctrl-C to stop)",
        context.directory().display(),
        secs
    );

    tokio::select! {
        () = context.run_periodic_eviction(Duration::from_secs(secs)) => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    Ok(())
}
