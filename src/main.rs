use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use symdex_lib::config::{get_settings_path, load_settings_or_default, save_settings};
use symdex_lib::indexer::{ChannelObserver, IndexEvent, SymbolIndexer};
use symdex_lib::{logging, IndexSettings, StoredSymbol, SymbolStore};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

/// symdex - incremental symbol index for source trees
#[derive(Parser, Debug)]
#[command(name = "symdex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project root
    #[arg(short, long, value_name = "DIR", default_value = ".", global = true)]
    root: PathBuf,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the index up to date with the files on disk
    Sync,
    /// Re-index every file
    Rebuild {
        /// Wipe the index first instead of skipping unchanged files
        #[arg(long)]
        full: bool,
    },
    /// Sync, then keep the index current until interrupted
    Watch,
    /// Print the innermost symbol containing a line (1-based)
    Enclosing { file: PathBuf, line: u32 },
    /// Print symbols with exactly these names
    Find {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Print symbols whose name starts with a prefix
    Search {
        prefix: String,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Write default settings to .symdex/settings.json
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Project root not found: {}", cli.root.display()))?;

    match cli.command {
        Command::Init => init(&root),
        command => index_command(&root, command).await,
    }
}

fn init(root: &Path) -> Result<()> {
    let path = get_settings_path(root);
    if path.exists() {
        bail!("Settings already exist: {}", path.display());
    }
    save_settings(root, &IndexSettings::default())?;
    println!("✓ Wrote {}", path.display());
    Ok(())
}

async fn index_command(root: &Path, command: Command) -> Result<()> {
    let settings = load_settings_or_default(root);
    let store = SymbolIndexer::open_store(root, &settings)?;

    match command {
        Command::Sync => {
            let indexer = start_indexer(root, settings, store).await;
            let report = indexer.sync_index().await?;
            println!(
                "{} live, {} indexed, {} removed; {} files / {} symbols in index",
                report.live,
                report.scheduled,
                report.deleted,
                indexer.store().file_count()?,
                indexer.store().symbol_count()?
            );
        }
        Command::Rebuild { full } => {
            let indexer = start_indexer(root, settings, store).await;
            let files = if full {
                indexer.rebuild_index_full().await?
            } else {
                indexer.rebuild_index_incremental().await?
            };
            println!(
                "{} files scanned; {} symbols in index",
                files,
                indexer.store().symbol_count()?
            );
        }
        Command::Watch => {
            let indexer = start_indexer(root, settings, store).await;
            indexer.sync_index().await?;
            let _watcher = indexer.start_watching()?;
            info!("Press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            indexer.pause();
        }
        Command::Enclosing { file, line } => {
            let path = resolve(root, &file);
            let symbol = store.find_enclosing_symbol(&path, line.saturating_sub(1))?;
            match symbol {
                Some(symbol) => print_symbol(&symbol),
                None => bail!("No symbol encloses {}:{}", file.display(), line),
            }
        }
        Command::Find { names } => {
            print_all(&store.find_symbols_by_names(&names)?);
        }
        Command::Search { prefix, limit } => {
            print_all(&store.search_by_name_prefix(&prefix, limit)?);
        }
        Command::Init => init(root)?,
    }

    Ok(())
}

/// Build an unpaused indexer whose progress goes to the log
async fn start_indexer(root: &Path, settings: IndexSettings, store: Arc<SymbolStore>) -> SymbolIndexer {
    let (observer, events) = ChannelObserver::new();
    tokio::spawn(log_progress(events));

    let indexer = SymbolIndexer::builder(root, store)
        .settings(settings)
        .observer(Arc::new(observer))
        .build();
    indexer.resume().await;
    indexer
}

async fn log_progress(mut events: UnboundedReceiver<IndexEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            IndexEvent::Progress(percent) => info!(percent, "Indexing"),
            IndexEvent::Completed => info!("Index up to date"),
            IndexEvent::RebuildStarting => info!("Clearing index for full rebuild"),
        }
    }
}

fn resolve(root: &Path, file: &Path) -> String {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        root.join(file)
    };
    path.canonicalize()
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn print_all(symbols: &[StoredSymbol]) {
    for symbol in symbols {
        print_symbol(symbol);
    }
}

fn print_symbol(symbol: &StoredSymbol) {
    let s = &symbol.symbol;
    let kind = s
        .kind()
        .map(|k| k.to_string())
        .unwrap_or_else(|| format!("kind({})", s.kind));
    let name = if s.container_name.is_empty() {
        s.name.clone()
    } else {
        format!("{}.{}", s.container_name, s.name)
    };
    println!(
        "{}:{}:{}\t{}\t{}",
        symbol.file_path,
        s.selection_range.start.line + 1,
        s.selection_range.start.character + 1,
        kind,
        name
    );
}
