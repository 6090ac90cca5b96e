//! xref: command-line front end for the source cross-reference index.
//!
//! This CLI provides access to xref functionality for:
//! - Building and incrementally updating the symbol database
//! - Finding definitions, callers, callees and includers
//! - Locating indexed files by name

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use xref::indexer::FileOutcome;
use xref::{
    CancelToken, Category, Config, ContentMode, ContextReader, FileQueue, IndexStats, Indexer,
    QueryResult, SqliteStore,
};

/// Exit codes for the CLI
///
/// - 0: Success
/// - 1: Not found (valid query, no results)
/// - 2: Error (invalid input, unusable database, interrupted run)
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const NOT_FOUND: u8 = 1;
    pub const ERROR: u8 = 2;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

/// Incremental source cross-reference indexer
#[derive(Parser)]
#[command(name = "xref")]
#[command(author, version = env!("XREF_VERSION"), about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root of the source tree; `.xref.toml` and the default database live here
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Database file (overrides the configured location)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log indexing details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index up to date with the source tree
    Index {
        /// Discard the existing database and rebuild it
        #[arg(long, conflicts_with = "since_db")]
        full: bool,

        /// Only look at files modified since the database was last written
        #[arg(long)]
        since_db: bool,

        /// Worker threads (0 = one per CPU)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Store source lines in the database (eager) or read them on demand (lazy)
        #[arg(long)]
        content: Option<ContentMode>,

        /// Also index the files listed in a name file such as cscope.files
        #[arg(long = "namefile", value_name = "FILE")]
        namefiles: Vec<PathBuf>,
    },

    /// Find the definitions of a symbol
    Def { name: String },

    /// Find every occurrence of a symbol
    Symbol { name: String },

    /// Find calls to a function
    Callers { name: String },

    /// Find calls made inside a definition
    Calls { name: String },

    /// Find files that include a header (matches path suffixes)
    Includers { name: String },

    /// Find indexed files by name or path suffix
    File { name: String },

    /// Remove files from the index
    Forget {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

/// Options shared by every command.
struct Options {
    root: PathBuf,
    db: Option<PathBuf>,
    format: OutputFormat,
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_filter = if cli.verbose { "xref=debug,warn" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let options = Options {
        root: cli.root,
        db: cli.db,
        format: cli.format,
        quiet: cli.quiet,
    };
    let format = options.format;

    match run(cli.command, &options) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            if format == OutputFormat::Json {
                let error_json = serde_json::json!({
                    "error": "CommandFailed",
                    "message": format!("{:#}", e),
                });
                eprintln!("{}", error_json);
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn run(command: Commands, options: &Options) -> Result<u8> {
    match command {
        Commands::Index {
            full,
            since_db,
            threads,
            content,
            namefiles,
        } => cmd_index(
            options,
            IndexArgs {
                full,
                since_db,
                threads,
                content,
                namefiles,
            },
        ),
        Commands::Def { name } => cmd_query(options, Query::Definition, &name),
        Commands::Symbol { name } => cmd_query(options, Query::Symbol, &name),
        Commands::Callers { name } => cmd_query(options, Query::Callers, &name),
        Commands::Calls { name } => cmd_query(options, Query::Calls, &name),
        Commands::Includers { name } => cmd_query(options, Query::Includers, &name),
        Commands::File { name } => cmd_file(options, &name),
        Commands::Forget { paths } => cmd_forget(options, &paths),
        Commands::Config => cmd_config(options),
    }
}

// ============================================================================
// Setup
// ============================================================================

fn resolve_root(options: &Options) -> Result<PathBuf> {
    options
        .root
        .canonicalize()
        .with_context(|| format!("Failed to resolve root directory {}", options.root.display()))
}

fn load_config(root: &Path) -> Result<Config> {
    Config::load(root).context("Failed to load configuration")
}

fn database_path(options: &Options, config: &Config, root: &Path) -> PathBuf {
    options
        .db
        .clone()
        .unwrap_or_else(|| config.database_path(root))
}

fn open_store(db_path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(db_path)
        .with_context(|| format!("Failed to open index database {}", db_path.display()))
}

/// Open an existing index for querying.
fn load_index(options: &Options) -> Result<(PathBuf, SqliteStore)> {
    let root = resolve_root(options)?;
    let config = load_config(&root)?;
    let db_path = database_path(options, &config, &root);

    if !db_path.exists() {
        anyhow::bail!(
            "Index not found at {}. Run 'xref index' first.",
            db_path.display()
        );
    }

    Ok((root, open_store(&db_path)?))
}

/// Path as shown to the user: relative to the root when it lies inside it.
fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// index
// ============================================================================

struct IndexArgs {
    full: bool,
    since_db: bool,
    threads: Option<usize>,
    content: Option<ContentMode>,
    namefiles: Vec<PathBuf>,
}

#[derive(Serialize)]
struct IndexReport<'a> {
    database: String,
    #[serde(flatten)]
    stats: &'a IndexStats,
    pruned: usize,
    elapsed_ms: u128,
}

fn cmd_index(options: &Options, args: IndexArgs) -> Result<u8> {
    let root = resolve_root(options)?;
    let mut config = load_config(&root)?;
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(content) = args.content {
        config.content = content;
    }
    let db_path = database_path(options, &config, &root);

    if args.full {
        remove_database(&db_path)?;
    }

    // Files untouched since the database was last written are assumed indexed
    let era_start = if args.since_db {
        fs::metadata(&db_path)
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH)
    } else {
        UNIX_EPOCH
    };

    let store = open_store(&db_path)?;
    let registry = config
        .parser_registry()
        .context("Invalid parser configuration")?;

    let mut queue = FileQueue::new(&root, era_start)
        .with_registry(&registry)
        .with_excluded_dirs(config.excluded_dirs());
    for namefile in &args.namefiles {
        // entries are relative to the name file's directory
        let namefile = namefile
            .canonicalize()
            .with_context(|| format!("Failed to resolve name file {}", namefile.display()))?;
        queue
            .extend_from_namefile(&namefile)
            .with_context(|| format!("Failed to read name file {}", namefile.display()))?;
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        // the first interrupt drains in-flight files, a second one leaves now
        if handler_token.cancel() {
            eprintln!("Interrupted again, exiting without finishing in-flight files");
            std::process::exit(i32::from(exit_codes::ERROR));
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    let spinner = if options.quiet || options.format == OutputFormat::Json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} [{pos}] {msg}")
        {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    };

    let indexer = Indexer::new(&store, registry)
        .with_content(config.content)
        .with_threads(config.threads)
        .with_cancel_token(cancel.clone())
        .with_progress({
            let spinner = spinner.clone();
            let root = root.clone();
            move |path: &Path, outcome: &FileOutcome| {
                if matches!(outcome, FileOutcome::Reparsed { .. }) {
                    spinner.set_message(display_path(&root, path));
                }
                spinner.inc(1);
            }
        });

    let stats = indexer.run(queue).context("Indexing failed")?;
    let pruned = if stats.cancelled {
        0
    } else {
        indexer.prune_missing().context("Failed to prune deleted files")?
    };
    spinner.finish_and_clear();

    if options.format == OutputFormat::Json {
        print_json(&IndexReport {
            database: db_path.display().to_string(),
            stats: &stats,
            pruned,
            elapsed_ms: stats.elapsed.as_millis(),
        })?;
    } else if !options.quiet {
        println!(
            "Indexed {} files ({} re-parsed, {} unchanged, {} failed), {} symbols",
            stats.discovered, stats.reparsed, stats.skipped, stats.failed, stats.symbols
        );
        if pruned > 0 {
            println!("Removed {} deleted files", pruned);
        }
        println!("Database: {}", db_path.display());
    }

    if stats.cancelled {
        eprintln!("Interrupted; files indexed so far were kept");
        return Ok(exit_codes::ERROR);
    }
    Ok(exit_codes::SUCCESS)
}

/// Delete the database and its WAL side files.
fn remove_database(db_path: &Path) -> Result<()> {
    let mut wal = db_path.as_os_str().to_owned();
    wal.push("-wal");
    let mut shm = db_path.as_os_str().to_owned();
    shm.push("-shm");

    for path in [db_path.to_path_buf(), PathBuf::from(wal), PathBuf::from(shm)] {
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Query {
    Definition,
    Symbol,
    Callers,
    Calls,
    Includers,
}

impl Query {
    fn label(self) -> &'static str {
        match self {
            Query::Definition => "def",
            Query::Symbol => "symbol",
            Query::Callers => "callers",
            Query::Calls => "calls",
            Query::Includers => "includers",
        }
    }

    fn run(self, store: &SqliteStore, name: &str) -> xref::Result<Vec<QueryResult>> {
        match self {
            Query::Definition => store.find_definition(name),
            Query::Symbol => store.find_symbol(name),
            Query::Callers => store.find_caller(name),
            Query::Calls => store.find_call(name),
            Query::Includers => store.find_includer(name),
        }
    }
}

#[derive(Serialize)]
struct Match {
    category: Category,
    name: String,
    file: String,
    line: u32,
    column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    context: String,
}

fn cmd_query(options: &Options, query: Query, name: &str) -> Result<u8> {
    let (root, store) = load_index(options)?;
    let results = query
        .run(&store, name)
        .with_context(|| format!("Failed to run {} query", query.label()))?;

    let reader = ContextReader::new(Some(&store));
    let matches: Vec<Match> = results
        .iter()
        .map(|result| Match {
            category: result.symbol.category,
            name: result.symbol.name.clone(),
            file: display_path(&root, &result.symbol.path),
            line: result.symbol.line,
            column: result.symbol.column,
            parent: result.symbol.parent.clone(),
            context: reader.context_for(result),
        })
        .collect();

    if options.format == OutputFormat::Json {
        print_json(&serde_json::json!({
            "query": query.label(),
            "name": name,
            "results": matches,
        }))?;
    } else if matches.is_empty() {
        if !options.quiet {
            eprintln!("No matches for: {}", name);
        }
    } else {
        for m in &matches {
            let parent = m
                .parent
                .as_deref()
                .map(|p| format!(" in {}", p))
                .unwrap_or_default();
            println!(
                "{}:{}:{}: {} {}{}",
                m.file, m.line, m.column, m.category, m.name, parent
            );
            if !options.quiet && !m.context.trim().is_empty() {
                println!("    {}", m.context.trim());
            }
        }
    }

    Ok(if matches.is_empty() {
        exit_codes::NOT_FOUND
    } else {
        exit_codes::SUCCESS
    })
}

fn cmd_file(options: &Options, name: &str) -> Result<u8> {
    let (root, store) = load_index(options)?;
    let paths = store.find_file(name).context("Failed to search files")?;

    if options.format == OutputFormat::Json {
        let files: Vec<String> = paths.iter().map(|p| display_path(&root, p)).collect();
        print_json(&serde_json::json!({
            "query": "file",
            "name": name,
            "files": files,
        }))?;
    } else if paths.is_empty() {
        if !options.quiet {
            eprintln!("No files match: {}", name);
        }
    } else {
        for path in &paths {
            println!("{}", display_path(&root, path));
        }
    }

    Ok(if paths.is_empty() {
        exit_codes::NOT_FOUND
    } else {
        exit_codes::SUCCESS
    })
}

// ============================================================================
// Maintenance
// ============================================================================

fn cmd_forget(options: &Options, paths: &[PathBuf]) -> Result<u8> {
    let (_root, store) = load_index(options)?;

    let mut removed = Vec::new();
    for path in paths {
        // deleted files can no longer be canonicalized
        let absolute = match path.canonicalize() {
            Ok(p) => p,
            Err(_) => std::path::absolute(path)
                .with_context(|| format!("Failed to resolve {}", path.display()))?,
        };
        if store.find_record(&absolute)?.is_some() {
            store.remove(&absolute)?;
            removed.push(absolute.display().to_string());
        }
    }

    if options.format == OutputFormat::Json {
        print_json(&serde_json::json!({ "removed": removed }))?;
    } else if !options.quiet {
        println!("Removed {} of {} files", removed.len(), paths.len());
    }

    Ok(if removed.is_empty() {
        exit_codes::NOT_FOUND
    } else {
        exit_codes::SUCCESS
    })
}

fn cmd_config(options: &Options) -> Result<u8> {
    let root = resolve_root(options)?;
    let mut config = load_config(&root)?;
    config.database = database_path(options, &config, &root);

    if options.format == OutputFormat::Json {
        print_json(&config)?;
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(exit_codes::SUCCESS)
}
